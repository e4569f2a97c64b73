// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-telegram runtime state: field values and the wire buffer.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::model::dataset::DatasetDef;
use crate::model::value::FieldValue;

/// Mutable runtime state for one telegram.
///
/// Holds the current typed field values and the encoded wire buffer side
/// by side. The field map's key set is fixed at construction to exactly
/// the dataset's field names; the buffer length is fixed to the dataset's
/// effective size. All access goes through the internal lock; readers
/// receive snapshot copies, so a handle can be shared freely between the
/// engine worker and external observers.
///
/// # Thread Safety
/// Runtimes are shared as `Arc<TelegramRuntime>`. Mutations are serialized
/// by the internal `RwLock`; no caller ever observes a partially updated
/// field map.
pub struct TelegramRuntime {
    dataset: DatasetDef,
    state: RwLock<RuntimeState>,
}

struct RuntimeState {
    fields: BTreeMap<String, FieldValue>,
    buffer: Vec<u8>,
}

impl TelegramRuntime {
    /// Create a runtime for `dataset` with all fields unset and a zeroed
    /// buffer of the dataset's effective size.
    pub fn new(dataset: DatasetDef) -> Self {
        let mut fields = BTreeMap::new();
        for field in &dataset.fields {
            fields.insert(field.name.clone(), FieldValue::Unset);
        }
        let buffer = vec![0u8; dataset.effective_size()];
        Self {
            dataset,
            state: RwLock::new(RuntimeState { fields, buffer }),
        }
    }

    /// The dataset this runtime was built from.
    pub fn dataset(&self) -> &DatasetDef {
        &self.dataset
    }

    /// Current value of one field, or None for unknown names.
    pub fn field_value(&self, field_name: &str) -> Option<FieldValue> {
        self.state.read().fields.get(field_name).cloned()
    }

    /// Snapshot copy of the whole field map.
    pub fn snapshot_fields(&self) -> BTreeMap<String, FieldValue> {
        self.state.read().fields.clone()
    }

    /// Set one field value. Returns false when the name is not part of
    /// the dataset (the key set never grows).
    pub fn set_field_value(&self, field_name: &str, value: FieldValue) -> bool {
        let mut state = self.state.write();
        match state.fields.get_mut(field_name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Snapshot copy of the wire buffer.
    pub fn buffer_copy(&self) -> Vec<u8> {
        self.state.read().buffer.clone()
    }

    /// Replace the wire buffer wholesale (RX path / re-encode).
    pub fn overwrite_buffer(&self, data: Vec<u8>) {
        self.state.write().buffer = data;
    }

    /// Apply `values` and `buffer` in one critical section so observers
    /// never see a buffer that disagrees with the field map.
    pub fn store_decoded(&self, values: BTreeMap<String, FieldValue>, buffer: Vec<u8>) {
        let mut state = self.state.write();
        for (name, value) in values {
            if let Some(slot) = state.fields.get_mut(&name) {
                *slot = value;
            }
        }
        state.buffer = buffer;
    }

    /// Current buffer length.
    pub fn buffer_len(&self) -> usize {
        self.state.read().buffer.len()
    }
}
