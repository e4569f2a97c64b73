// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry of dataset and telegram definitions plus their runtimes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::model::{DatasetDef, TelegramDef, TelegramRuntime};

/// Owner of all dataset/telegram definitions and telegram runtimes.
///
/// Definitions are handed out as copies; runtimes as shared
/// `Arc<TelegramRuntime>` handles so observers can watch live values
/// while the engine mutates them.
///
/// # Thread Safety
/// A single reader/writer lock guards the three maps. Readers take
/// snapshots; list order is unspecified.
pub struct TelegramRegistry {
    inner: RwLock<RegistryState>,
    /// One-shot bootstrap outcome: None until the first `bootstrap` call.
    bootstrap_state: Mutex<Option<bool>>,
}

#[derive(Default)]
struct RegistryState {
    datasets: HashMap<String, DatasetDef>,
    telegrams: HashMap<u32, TelegramDef>,
    runtimes: HashMap<u32, Arc<TelegramRuntime>>,
}

impl TelegramRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryState::default()),
            bootstrap_state: Mutex::new(None),
        }
    }

    /// Insert or replace a dataset by name.
    pub fn register_dataset(&self, dataset: DatasetDef) {
        let mut state = self.inner.write();
        state.datasets.insert(dataset.name.clone(), dataset);
    }

    /// Insert or replace a telegram by comId.
    ///
    /// # Errors
    /// [`Error::UnknownDataset`] when the referenced dataset has not been
    /// registered; the registry is left unchanged.
    pub fn register_telegram(&self, telegram: TelegramDef) -> Result<()> {
        let mut state = self.inner.write();
        if !state.datasets.contains_key(&telegram.dataset_name) {
            return Err(Error::UnknownDataset(telegram.dataset_name));
        }
        state.telegrams.insert(telegram.com_id, telegram);
        Ok(())
    }

    /// Drop all datasets, telegrams, and runtimes.
    pub fn clear(&self) {
        let mut state = self.inner.write();
        state.datasets.clear();
        state.telegrams.clear();
        state.runtimes.clear();
    }

    /// Snapshot of all registered datasets (unspecified order).
    pub fn list_datasets(&self) -> Vec<DatasetDef> {
        self.inner.read().datasets.values().cloned().collect()
    }

    /// Snapshot of all registered telegrams (unspecified order).
    pub fn list_telegrams(&self) -> Vec<TelegramDef> {
        self.inner.read().telegrams.values().cloned().collect()
    }

    /// Snapshot copy of one dataset.
    pub fn dataset_copy(&self, name: &str) -> Option<DatasetDef> {
        self.inner.read().datasets.get(name).cloned()
    }

    /// Snapshot copy of one telegram.
    pub fn telegram_copy(&self, com_id: u32) -> Option<TelegramDef> {
        self.inner.read().telegrams.get(&com_id).cloned()
    }

    /// Shared runtime handle for `com_id`, created lazily from the
    /// telegram's dataset on first access.
    ///
    /// Returns None when the telegram or its dataset is missing.
    pub fn get_or_create_runtime(&self, com_id: u32) -> Option<Arc<TelegramRuntime>> {
        {
            let state = self.inner.read();
            if let Some(runtime) = state.runtimes.get(&com_id) {
                return Some(Arc::clone(runtime));
            }
        }

        let mut state = self.inner.write();
        // Re-check under the write lock: another caller may have raced us.
        if let Some(runtime) = state.runtimes.get(&com_id) {
            return Some(Arc::clone(runtime));
        }

        let dataset_name = state.telegrams.get(&com_id)?.dataset_name.clone();
        let dataset = state.datasets.get(&dataset_name)?.clone();
        let runtime = Arc::new(TelegramRuntime::new(dataset));
        state.runtimes.insert(com_id, Arc::clone(&runtime));
        Some(runtime)
    }

    /// Load definitions from an XML document at `path`, replacing any
    /// existing content. On failure the registry is left empty.
    pub fn load_from_xml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.clear();
        let outcome = crate::xml::load_document(path.as_ref(), self);
        if let Err(ref err) = outcome {
            log::error!(
                "[REGISTRY] XML reload from {} failed: {}",
                path.as_ref().display(),
                err
            );
            self.clear();
        }
        *self.bootstrap_state.lock() = Some(outcome.is_ok());
        outcome
    }

    /// One-shot bootstrap: load `path` on the first call only. Subsequent
    /// calls observe the stored outcome without touching the registry.
    pub fn bootstrap<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut state = self.bootstrap_state.lock();
        match *state {
            Some(true) => Ok(()),
            Some(false) => Err(Error::ConfigInvalid(
                "registry bootstrap previously failed".to_string(),
            )),
            None => {
                let outcome = self.load_locked_bootstrap(path.as_ref());
                *state = Some(outcome.is_ok());
                outcome
            }
        }
    }

    fn load_locked_bootstrap(&self, path: &Path) -> Result<()> {
        self.clear();
        let outcome = crate::xml::load_document(path, self);
        if let Err(ref err) = outcome {
            log::error!(
                "[REGISTRY] XML bootstrap from {} failed: {}",
                path.display(),
                err
            );
            self.clear();
        }
        outcome
    }
}

impl Default for TelegramRegistry {
    fn default() -> Self {
        Self::new()
    }
}
