// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # trdpsim - TRDP simulation and inspection engine
//!
//! A pure Rust engine for simulating and inspecting TRDP (Train Realtime
//! Data Protocol, IEC 61375-2-3) traffic. The engine sits between an XML
//! configuration describing datasets and telegrams and a native TRDP
//! stack performing wire-level I/O; it drives cyclic Process Data
//! publication, subscribes to inbound telegrams, executes Message Data
//! request/reply/confirm exchanges, and projects wire buffers to and
//! from a typed field model.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trdpsim::{
//!     BroadcastHub, StubStack, TelegramRegistry, TrdpConfig, TrdpEngine,
//! };
//!
//! fn main() -> trdpsim::Result<()> {
//!     let registry = Arc::new(TelegramRegistry::new());
//!     let hub = Arc::new(BroadcastHub::new(Arc::clone(&registry)));
//!     let engine = TrdpEngine::new(
//!         Arc::new(StubStack::absent()),
//!         hub.clone(),
//!         Arc::clone(&registry),
//!     );
//!
//!     engine.start(TrdpConfig::from_env())?;
//!     let events = hub.attach(64);
//!     for event in events.iter() {
//!         println!("{:?}", event);
//!     }
//!     engine.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                     Collaborators (not here)                 |
//! |        HTTP controllers | WebSocket transport | CLI          |
//! +--------------------------------------------------------------+
//! |                          Engine                              |
//! |  lifecycle | endpoint builder | cyclic scheduler | MD tracker|
//! |  topology counters | DNR caches | ECSP control | worker loop |
//! +--------------------------------------------------------------+
//! |     Model & codec     |   Registry    |     Subscriber hub   |
//! |  datasets, telegrams, |  definitions  |  lossy fan-out of    |
//! |  typed values, LE     |  + runtimes   |  RX/TX/snapshot      |
//! |  wire projection      |               |  events              |
//! +--------------------------------------------------------------+
//! |              Stack adapter (capability trait)                |
//! |     tlc/tlp/tlm/tau contract | stub mode for tests           |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`TrdpEngine`] | Engine handle: lifecycle, sends, DNR helpers |
//! | [`TelegramRegistry`] | Owns dataset/telegram definitions and runtimes |
//! | [`TelegramRuntime`] | Live field values + wire buffer of one telegram |
//! | [`TrdpStack`] | Capability trait over the native stack |
//! | [`BroadcastHub`] | Lossy fan-out of runtime events to observers |

/// Fixed-offset little-endian encode/decode of dataset buffers.
pub mod codec;
/// Engine configuration and environment knobs.
pub mod config;
/// The TRDP engine (scheduler, MD tracker, DNR, ECSP, hub).
pub mod engine;
/// Error type shared across the crate.
pub mod error;
/// Typed dataset/telegram/value model.
pub mod model;
/// Dataset and telegram registry.
pub mod registry;
/// Capability interface over the native TRDP stack.
pub mod stack;
/// XML configuration loader.
pub mod xml;

pub use config::{CacheConfig, DnrMode, EcspConfig, TrdpConfig};
pub use engine::{
    BroadcastHub, MdSendOptions, NullHub, TelegramEvent, TelegramHub, TelegramSnapshot, TrdpEngine,
};
pub use error::{Error, Result};
pub use model::{
    DatasetDef, Direction, FieldDef, FieldType, FieldValue, TelegramDef, TelegramRuntime,
    TelegramType,
};
pub use registry::TelegramRegistry;
pub use stack::{MdSessionKey, StubStack, TrdpStack};

/// trdpsim version string.
pub const VERSION: &str = "0.2.0";
