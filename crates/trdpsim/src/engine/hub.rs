// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fan-out hub broadcasting runtime updates to attached observers.
//!
//! The engine publishes RX decodes and TX confirmations through the
//! [`TelegramHub`] trait; it never owns the observers. [`BroadcastHub`]
//! is the bundled implementation: each subscriber gets a dedicated
//! bounded channel, delivery is best-effort (a full channel drops the
//! event for that subscriber), and disconnected subscribers are pruned
//! during broadcast without backpressure on the engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;

use crate::model::{Direction, FieldValue, TelegramDef, TelegramType};
use crate::registry::TelegramRegistry;

/// One telegram entry of a snapshot event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramSnapshot {
    #[serde(flatten)]
    pub def: TelegramDef,
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_active: Option<bool>,
}

/// Events pushed to hub subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TelegramEvent {
    /// A subscribed telegram was received and decoded.
    #[serde(rename = "rx", rename_all = "camelCase")]
    RxUpdate {
        com_id: u32,
        fields: BTreeMap<String, FieldValue>,
    },
    /// A telegram was sent successfully.
    #[serde(rename = "tx", rename_all = "camelCase")]
    TxConfirmation {
        com_id: u32,
        fields: BTreeMap<String, FieldValue>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tx_active: Option<bool>,
    },
    /// Initial state pushed to a freshly attached subscriber.
    #[serde(rename = "snapshot")]
    Snapshot { telegrams: Vec<TelegramSnapshot> },
}

/// Sink for engine-originated telegram events.
///
/// # Thread Safety
/// Called from the engine worker and from API threads; implementations
/// must not block (the engine holds no lock while calling, but slow
/// fan-out would stall the caller).
pub trait TelegramHub: Send + Sync {
    /// A subscribed telegram was received and decoded.
    fn publish_rx_update(&self, com_id: u32, fields: BTreeMap<String, FieldValue>);

    /// A telegram was sent; `tx_active` carries the cyclic flag for
    /// explicitly sent PD telegrams.
    fn publish_tx_confirmation(
        &self,
        com_id: u32,
        fields: BTreeMap<String, FieldValue>,
        tx_active: Option<bool>,
    );
}

/// Hub that drops every event. Useful for headless deployments and tests
/// that do not observe events.
pub struct NullHub;

impl TelegramHub for NullHub {
    fn publish_rx_update(&self, _com_id: u32, _fields: BTreeMap<String, FieldValue>) {}

    fn publish_tx_confirmation(
        &self,
        _com_id: u32,
        _fields: BTreeMap<String, FieldValue>,
        _tx_active: Option<bool>,
    ) {
    }
}

type TxActiveProbe = Box<dyn Fn(u32) -> Option<bool> + Send + Sync>;

/// Channel-based hub implementation.
pub struct BroadcastHub {
    registry: Arc<TelegramRegistry>,
    subscribers: Mutex<Vec<Sender<TelegramEvent>>>,
    /// Optional probe reporting the cyclic-publish flag for snapshots.
    tx_active_probe: Mutex<Option<TxActiveProbe>>,
}

impl BroadcastHub {
    /// Create a hub that builds snapshots from `registry`.
    pub fn new(registry: Arc<TelegramRegistry>) -> Self {
        Self {
            registry,
            subscribers: Mutex::new(Vec::new()),
            tx_active_probe: Mutex::new(None),
        }
    }

    /// Install a probe used to fill the `tx_active` flag of snapshot
    /// entries (typically `TrdpEngine::tx_publish_active`).
    pub fn set_tx_active_probe(&self, probe: impl Fn(u32) -> Option<bool> + Send + Sync + 'static) {
        *self.tx_active_probe.lock() = Some(Box::new(probe));
    }

    /// Attach a new subscriber with the given channel capacity.
    ///
    /// The first event on the returned receiver is a
    /// [`TelegramEvent::Snapshot`] of the current registry state, sorted
    /// by comId.
    pub fn attach(&self, capacity: usize) -> Receiver<TelegramEvent> {
        let (sender, receiver) = bounded(capacity.max(1));
        let snapshot = self.build_snapshot();
        if sender.try_send(snapshot).is_err() {
            log::warn!("[HUB] Snapshot dropped for new subscriber (capacity too small)");
        }
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Number of currently attached subscribers (disconnected ones are
    /// only pruned on broadcast).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn build_snapshot(&self) -> TelegramEvent {
        let mut telegrams: Vec<TelegramDef> = self.registry.list_telegrams();
        telegrams.sort_by_key(|t| t.com_id);

        let probe = self.tx_active_probe.lock();
        let entries = telegrams
            .into_iter()
            .map(|def| {
                let fields = self
                    .registry
                    .get_or_create_runtime(def.com_id)
                    .map(|rt| rt.snapshot_fields())
                    .unwrap_or_default();
                let tx_active = if def.direction == Direction::Tx && def.ty == TelegramType::Pd {
                    probe.as_ref().and_then(|p| p(def.com_id)).or(Some(false))
                } else {
                    None
                };
                TelegramSnapshot {
                    def,
                    fields,
                    tx_active,
                }
            })
            .collect();

        TelegramEvent::Snapshot {
            telegrams: entries,
        }
    }

    fn broadcast(&self, event: TelegramEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            // Lossy: a slow subscriber loses this event but stays attached.
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl TelegramHub for BroadcastHub {
    fn publish_rx_update(&self, com_id: u32, fields: BTreeMap<String, FieldValue>) {
        self.broadcast(TelegramEvent::RxUpdate { com_id, fields });
    }

    fn publish_tx_confirmation(
        &self,
        com_id: u32,
        fields: BTreeMap<String, FieldValue>,
        tx_active: Option<bool>,
    ) {
        self.broadcast(TelegramEvent::TxConfirmation {
            com_id,
            fields,
            tx_active,
        });
    }
}
