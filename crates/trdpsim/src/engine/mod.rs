// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The TRDP engine: stack lifecycle, endpoint bindings, cyclic PD
//! scheduling, MD session tracking, and the DNR/ECSP/topology control
//! surface.
//!
//! [`TrdpEngine`] is an owned value created by the composition root from
//! a stack, a hub, and a registry; clones share the same engine
//! instance. One background worker drives the cyclic scheduler and the
//! stack's process step; external callers invoke operations from any
//! thread. All multi-step state transitions are serialized by a single
//! state mutex that is never held across blocking stack I/O or hub
//! fan-out.

pub mod dnr;
pub mod ecsp;
pub mod endpoint;
pub mod hub;
pub mod md;
pub mod worker;

pub use hub::{BroadcastHub, NullHub, TelegramEvent, TelegramHub, TelegramSnapshot};

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

use dashmap::DashSet;
use parking_lot::Mutex;

use crate::codec;
use crate::config::TrdpConfig;
use crate::error::{Error, Result};
use crate::model::{Direction, FieldValue, TelegramRuntime, TelegramType};
use crate::registry::TelegramRegistry;
use crate::stack::{
    MdInfo, MdSessionKey, PdInfo, RequestSpec, SessionId, SessionRole, StackSink, TrdpStack,
};

use dnr::{DnrCaches, LabelIds};
use ecsp::EcspState;
use endpoint::{BindContext, EndpointHandle};
use md::MdTracker;

/// IANA-registered TRDP port, used when telegrams declare no ports.
const DEFAULT_TRDP_PORT: u16 = 17224;

/// Per-send overrides for the MD timers declared on the telegram.
#[derive(Debug, Clone, Copy, Default)]
pub struct MdSendOptions {
    pub expected_replies: Option<u32>,
    pub reply_timeout: Option<std::time::Duration>,
    pub confirm_timeout: Option<std::time::Duration>,
}

pub(crate) struct EngineState {
    pub config: TrdpConfig,
    pub stack_available: bool,
    pub pd_sessions: BTreeMap<u16, SessionId>,
    pub md_sessions: BTreeMap<u16, SessionId>,
    pub pd_ready: bool,
    pub md_ready: bool,
    pub dnr_initialised: bool,
    pub endpoints: BTreeMap<u32, EndpointHandle>,
    pub dnr: DnrCaches,
    pub ecsp: EcspState,
    pub etb_topo: u32,
    pub op_trn_topo: u32,
    pub topo_dirty: bool,
}

impl EngineState {
    fn new() -> Self {
        Self {
            config: TrdpConfig::default(),
            stack_available: false,
            pd_sessions: BTreeMap::new(),
            md_sessions: BTreeMap::new(),
            pd_ready: false,
            md_ready: false,
            dnr_initialised: false,
            endpoints: BTreeMap::new(),
            dnr: DnrCaches::new(),
            ecsp: EcspState::new(),
            etb_topo: 0,
            op_trn_topo: 0,
            topo_dirty: false,
        }
    }

    fn mark_topology_changed(&mut self) {
        self.etb_topo = self.etb_topo.wrapping_add(1);
        self.op_trn_topo = self.op_trn_topo.wrapping_add(1);
        self.topo_dirty = true;
        log::info!(
            "[ENGINE] Topology change detected; ETB={} OpTrain={}",
            self.etb_topo,
            self.op_trn_topo
        );
    }

    /// First usable session for session-agnostic stack calls (DNR).
    fn any_session(&self) -> Option<SessionId> {
        self.pd_sessions
            .values()
            .chain(self.md_sessions.values())
            .next()
            .copied()
    }
}

pub(crate) struct EngineInner {
    pub stack: Arc<dyn TrdpStack>,
    pub hub: Arc<dyn TelegramHub>,
    pub registry: Arc<TelegramRegistry>,
    pub running: AtomicBool,
    pub stop_requested: AtomicBool,
    pub state: Mutex<EngineState>,
    pub md: Mutex<MdTracker>,
    worker: Mutex<Option<JoinHandle<()>>>,
    warned_reasons: DashSet<String>,
}

impl EngineInner {
    /// Log a DNR-unavailable diagnostic once per distinct reason.
    fn warn_dnr_unavailable(&self, reason: &str) {
        if self.warned_reasons.insert(reason.to_string()) {
            log::warn!("[DNR] unavailable: {}", reason);
        }
    }

    fn handle_rx_telegram(&self, com_id: u32, payload: &[u8]) {
        let fields = {
            let state = self.state.lock();
            let Some(ep) = state.endpoints.get(&com_id) else {
                log::warn!("[ENGINE] Received unknown ComId {}", com_id);
                return;
            };
            if ep.def.direction != Direction::Rx {
                log::warn!("[ENGINE] Received RX telegram for TX ComId {}", com_id);
                return;
            }

            let decoded = codec::decode_fields(ep.runtime.dataset(), payload);
            // Truncated fields keep their previous value.
            let decoded: BTreeMap<String, FieldValue> = decoded
                .into_iter()
                .filter(|(_, value)| !value.is_unset())
                .collect();
            ep.runtime.store_decoded(decoded, payload.to_vec());
            ep.runtime.snapshot_fields()
        };

        self.hub.publish_rx_update(com_id, fields);
    }

    fn handle_rx_md_telegram(
        &self,
        com_id: u32,
        session_key: Option<&MdSessionKey>,
        payload: &[u8],
    ) {
        log::debug!(
            "[MD] telegram callback ComId={} bytes={}",
            com_id,
            payload.len()
        );
        if let Some(key) = session_key {
            self.md.lock().register_reply(key);
        }
        if !payload.is_empty() {
            self.handle_rx_telegram(com_id, payload);
        }
    }
}

/// Adapter feeding stack callbacks back into the engine.
struct EngineSink {
    inner: Weak<EngineInner>,
}

impl StackSink for EngineSink {
    fn on_pd(&self, info: &PdInfo, payload: &[u8]) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if info.result_code != 0 {
            log::error!(
                "[ENGINE] PD receive error for ComId {}: {}",
                info.com_id,
                info.result_code
            );
            return;
        }
        inner.handle_rx_telegram(info.com_id, payload);
    }

    fn on_md(&self, info: &MdInfo, payload: &[u8]) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if info.result_code != 0 {
            log::error!(
                "[ENGINE] MD receive error for ComId {}: {}",
                info.com_id,
                info.result_code
            );
            return;
        }
        inner.handle_rx_md_telegram(info.com_id, Some(&info.session_key), payload);
    }
}

/// Handle to a TRDP engine instance. Cheap to clone; all clones address
/// the same engine.
#[derive(Clone)]
pub struct TrdpEngine {
    inner: Arc<EngineInner>,
}

impl TrdpEngine {
    /// Create an engine over the given stack, hub, and registry.
    pub fn new(
        stack: Arc<dyn TrdpStack>,
        hub: Arc<dyn TelegramHub>,
        registry: Arc<TelegramRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                stack,
                hub,
                registry,
                running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                state: Mutex::new(EngineState::new()),
                md: Mutex::new(MdTracker::new()),
                worker: Mutex::new(None),
                warned_reasons: DashSet::new(),
            }),
        }
    }

    /// The registry this engine operates on.
    pub fn registry(&self) -> &Arc<TelegramRegistry> {
        &self.inner.registry
    }

    /// Whether the worker is running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start the engine. Idempotent: when already running with a changed
    /// configuration the new settings are reapplied in place (topology
    /// bump, cache trim, ECSP update) without restarting the worker.
    pub fn start(&self, config: TrdpConfig) -> Result<()> {
        let mut state = self.inner.state.lock();
        let config_changed = !self.is_running() || state.config.differs_from(&config);

        if self.is_running() {
            if config_changed {
                state.config = config;
                state.mark_topology_changed();
                let cache_config = state.config.cache.clone();
                state.dnr.trim(&cache_config, Instant::now());
                let ecsp_config = state.config.ecsp.clone();
                state.ecsp.update_control(self.inner.stack.as_ref(), &ecsp_config);
            }
            return Ok(());
        }

        state.config = config;
        if config_changed {
            state.mark_topology_changed();
        }
        state.stack_available = self.inner.stack.available();

        if state.config.enable_dnr && !state.stack_available {
            self.inner.warn_dnr_unavailable(
                "TRDP stack not present in this build; TAU DNR lookups are disabled",
            );
        } else if state.config.enable_dnr && !self.inner.stack.has_dnr() {
            self.inner.warn_dnr_unavailable(
                "TAU DNR APIs not available in detected stack; host lookups are disabled",
            );
        }

        self.bootstrap_registry(&state)?;

        if let Err(err) = self.initialise_stack(&mut state) {
            self.teardown_stack(&mut state);
            return Err(err);
        }

        let ctx = BindContext {
            stack_available: state.stack_available,
            pd_sessions: &state.pd_sessions,
            md_sessions: &state.md_sessions,
            pd_ready: state.pd_ready,
            md_ready: state.md_ready,
            etb_topo: state.etb_topo,
            op_trn_topo: state.op_trn_topo,
        };
        let endpoints = endpoint::build_endpoints(&self.inner.registry, self.inner.stack.as_ref(), &ctx);
        state.endpoints = endpoints;
        if state.endpoints.is_empty() {
            log::warn!("[ENGINE] No telegrams registered; starting with zero endpoints");
        }

        self.inner.stop_requested.store(false, Ordering::SeqCst);
        self.inner.running.store(true, Ordering::SeqCst);
        let worker_inner = Arc::clone(&self.inner);
        *self.inner.worker.lock() = Some(std::thread::spawn(move || worker::run(worker_inner)));
        Ok(())
    }

    /// Stop the worker, drop MD state, and tear the stack down. Safe to
    /// call repeatedly; returns only after the worker has exited.
    pub fn stop(&self) {
        {
            let _state = self.inner.state.lock();
            if !self.is_running() {
                return;
            }
            self.inner.stop_requested.store(true, Ordering::SeqCst);
        }

        if let Some(handle) = self.inner.worker.lock().take() {
            if handle.join().is_err() {
                log::error!("[ENGINE] Worker thread panicked during shutdown");
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.md.lock().clear();

        let mut state = self.inner.state.lock();
        self.teardown_stack(&mut state);
        state.endpoints.clear();
        log::info!("[ENGINE] Stopped");
    }

    /// Merge `overrides` into the runtime, re-encode the buffer, and
    /// send the telegram (PD put or MD request).
    pub fn send_tx_telegram(
        &self,
        com_id: u32,
        overrides: BTreeMap<String, FieldValue>,
    ) -> Result<()> {
        self.send_tx_telegram_with(com_id, overrides, None)
    }

    /// Like [`send_tx_telegram`](Self::send_tx_telegram) with per-send
    /// MD timer overrides.
    pub fn send_tx_telegram_with(
        &self,
        com_id: u32,
        overrides: BTreeMap<String, FieldValue>,
        md_options: Option<MdSendOptions>,
    ) -> Result<()> {
        let now = Instant::now();
        let (fields, tx_active) = {
            let mut state = self.inner.state.lock();
            let stack_available = state.stack_available;
            let (etb_topo, op_trn_topo) = (state.etb_topo, state.op_trn_topo);
            let ep = state
                .endpoints
                .get_mut(&com_id)
                .ok_or(Error::UnknownTelegram(com_id))?;
            if ep.def.direction != Direction::Tx {
                log::warn!("[ENGINE] ComId {} is not marked as TX", com_id);
                return Err(Error::WrongDirection(com_id));
            }

            for (name, value) in &overrides {
                if !ep.runtime.set_field_value(name, value.clone()) {
                    log::warn!(
                        "[ENGINE] Ignoring unknown field '{}' for ComId {}",
                        name,
                        com_id
                    );
                }
            }
            let merged = ep.runtime.snapshot_fields();
            let buffer = codec::encode_fields(ep.runtime.dataset(), &merged);
            ep.runtime.overwrite_buffer(buffer.clone());

            match ep.def.ty {
                TelegramType::Md => {
                    if !ep.md_ready {
                        log::warn!("[ENGINE] MD session not available; drop TX ComId {}", com_id);
                        return Err(Error::NotReady(com_id));
                    }
                    let mut md_def = ep.def.clone();
                    if let Some(options) = md_options {
                        if let Some(replies) = options.expected_replies {
                            md_def.expected_replies = replies;
                        }
                        if let Some(timeout) = options.reply_timeout {
                            md_def.reply_timeout = timeout;
                        }
                        if let Some(timeout) = options.confirm_timeout {
                            md_def.confirm_timeout = timeout;
                        }
                    }
                    if stack_available {
                        let session = ep.session.ok_or(Error::NotReady(com_id))?;
                        let spec = RequestSpec {
                            com_id,
                            src_ip: md_def.src_ip,
                            dest_ip: md_def.dest_ip,
                            expected_replies: md_def.expected_replies,
                            reply_timeout: md_def.reply_timeout,
                            confirm_timeout: md_def.confirm_timeout,
                            ttl: md_def.ttl,
                            qos: md_def.qos,
                            flags: md_def.trdp_flags,
                            etb_topo,
                            op_trn_topo,
                        };
                        let key = self
                            .inner
                            .stack
                            .request(session, &spec, &buffer)
                            .inspect_err(|err| {
                                log::error!(
                                    "[ENGINE] MD request failed for ComId {}: {}",
                                    com_id,
                                    err
                                );
                            })?;
                        self.inner.md.lock().track(key, &md_def, now);
                    }
                    log::debug!("[ENGINE] MD send ComId={} bytes={}", com_id, buffer.len());
                    (merged, None)
                }
                TelegramType::Pd => {
                    endpoint::publish_pd(self.inner.stack.as_ref(), stack_available, ep, &buffer)?;
                    if !ep.cycle.is_zero() {
                        ep.tx_cyclic_active = true;
                        ep.next_send = Some(now + ep.cycle);
                    }
                    (merged, Some(ep.tx_cyclic_active))
                }
            }
        };

        self.inner.hub.publish_tx_confirmation(com_id, fields, tx_active);
        Ok(())
    }

    /// Disable cyclic publishing for a TX PD telegram. Idempotent.
    pub fn stop_tx_telegram(&self, com_id: u32) -> Result<()> {
        let mut state = self.inner.state.lock();
        let ep = state
            .endpoints
            .get_mut(&com_id)
            .ok_or(Error::UnknownTelegram(com_id))?;
        if ep.def.direction != Direction::Tx || ep.def.ty != TelegramType::Pd {
            return Err(Error::WrongDirection(com_id));
        }
        ep.tx_cyclic_active = false;
        log::info!("[ENGINE] Cyclic TX disabled for ComId {}", com_id);
        Ok(())
    }

    /// Cyclic-publish flag of a TX PD endpoint; None otherwise.
    pub fn tx_publish_active(&self, com_id: u32) -> Option<bool> {
        let state = self.inner.state.lock();
        let ep = state.endpoints.get(&com_id)?;
        if ep.def.direction == Direction::Tx && ep.def.ty == TelegramType::Pd {
            Some(ep.tx_cyclic_active)
        } else {
            None
        }
    }

    /// Update runtime field values and re-encode the wire buffer without
    /// sending anything.
    pub fn set_fields(&self, com_id: u32, fields: BTreeMap<String, FieldValue>) -> Result<()> {
        let runtime = self
            .inner
            .registry
            .get_or_create_runtime(com_id)
            .ok_or(Error::UnknownTelegram(com_id))?;
        for (name, value) in fields {
            runtime.set_field_value(&name, value);
        }
        let merged = runtime.snapshot_fields();
        let buffer = codec::encode_fields(runtime.dataset(), &merged);
        runtime.overwrite_buffer(buffer);
        Ok(())
    }

    /// Shared runtime handle for a telegram, if registered.
    pub fn runtime(&self, com_id: u32) -> Option<Arc<TelegramRuntime>> {
        self.inner.registry.get_or_create_runtime(com_id)
    }

    /// Snapshot of all registered datasets.
    pub fn list_datasets(&self) -> Vec<crate::model::DatasetDef> {
        self.inner.registry.list_datasets()
    }

    /// Snapshot of all registered telegrams.
    pub fn list_telegrams(&self) -> Vec<crate::model::TelegramDef> {
        self.inner.registry.list_telegrams()
    }

    /// Snapshot copy of one telegram definition.
    pub fn telegram(&self, com_id: u32) -> Option<crate::model::TelegramDef> {
        self.inner.registry.telegram_copy(com_id)
    }

    /// Replace the registry content from an XML document. A failed
    /// reload leaves the registry empty.
    pub fn load_from_xml<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        self.inner.registry.load_from_xml(path)
    }

    /// Feed a received PD telegram into the matching runtime and notify
    /// the hub. Unknown or wrong-direction comIds are logged and
    /// discarded.
    pub fn handle_rx_telegram(&self, com_id: u32, payload: &[u8]) {
        self.inner.handle_rx_telegram(com_id, payload);
    }

    /// Feed a received MD telegram: registers the reply against the MD
    /// tracker (when a session key is present) and decodes the payload.
    pub fn handle_rx_md_telegram(
        &self,
        com_id: u32,
        session_key: Option<&MdSessionKey>,
        payload: &[u8],
    ) {
        self.inner.handle_rx_md_telegram(com_id, session_key, payload);
    }

    /// Bump topology counters; the next worker tick pushes them into
    /// every session.
    pub fn mark_topology_changed(&self) {
        self.inner.state.lock().mark_topology_changed();
    }

    /// Current `(ETB, OpTrain)` topology counters.
    pub fn topology_counters(&self) -> (u32, u32) {
        let state = self.inner.state.lock();
        (state.etb_topo, state.op_trn_topo)
    }

    /// Number of MD request sessions currently in flight.
    pub fn md_sessions_in_flight(&self) -> usize {
        self.inner.md.lock().len()
    }

    /// Resolve a TRDP URI to an IPv4 address via DNR.
    pub fn uri_to_ip(&self, uri: &str, use_cache: bool) -> Option<Ipv4Addr> {
        let now = Instant::now();
        let (cache_enabled, session) = {
            let mut state = self.inner.state.lock();
            let cache_config = state.config.cache.clone();
            state.dnr.trim(&cache_config, now);
            if use_cache && cache_config.enable {
                if let Some(hit) = state.dnr.get_uri(uri, now) {
                    return Some(hit);
                }
            }
            let session = self.dnr_session(&state)?;
            (cache_config.enable, session)
        };

        match self.inner.stack.uri_to_ip(session, uri) {
            Ok(ip) => {
                if cache_enabled && use_cache {
                    let mut state = self.inner.state.lock();
                    let cache_config = state.config.cache.clone();
                    state.dnr.put_uri(&cache_config, uri, ip, now);
                }
                Some(ip)
            }
            Err(err) => {
                log::error!("[DNR] uri_to_ip('{}') failed: {}", uri, err);
                None
            }
        }
    }

    /// Resolve an IPv4 address back to its TRDP URI via DNR.
    pub fn ip_to_uri(&self, ip: Ipv4Addr, use_cache: bool) -> Option<String> {
        let now = Instant::now();
        let (cache_enabled, session) = {
            let mut state = self.inner.state.lock();
            let cache_config = state.config.cache.clone();
            state.dnr.trim(&cache_config, now);
            if use_cache && cache_config.enable {
                if let Some(hit) = state.dnr.get_ip(ip, now) {
                    return Some(hit);
                }
            }
            let session = self.dnr_session(&state)?;
            (cache_config.enable, session)
        };

        match self.inner.stack.ip_to_uri(session, ip) {
            Ok(uri) => {
                if cache_enabled && use_cache {
                    let mut state = self.inner.state.lock();
                    let cache_config = state.config.cache.clone();
                    state.dnr.put_ip(&cache_config, ip, uri.clone(), now);
                }
                Some(uri)
            }
            Err(err) => {
                log::error!("[DNR] ip_to_uri({}) failed: {}", ip, err);
                None
            }
        }
    }

    /// Resolve a vehicle label to `(consist, vehicle, opConsist)`
    /// numbers via DNR. Both underlying lookups are combined into one
    /// atomically cached triple.
    pub fn label_to_ids(&self, label: &str, use_cache: bool) -> Option<LabelIds> {
        let now = Instant::now();
        let (cache_enabled, session) = {
            let mut state = self.inner.state.lock();
            let cache_config = state.config.cache.clone();
            state.dnr.trim(&cache_config, now);
            if use_cache && cache_config.enable {
                if let Some(hit) = state.dnr.get_label(label, now) {
                    return Some(hit);
                }
            }
            let session = self.dnr_session(&state)?;
            (cache_config.enable, session)
        };

        let resolved = self
            .inner
            .stack
            .label_to_vehicle(session, label)
            .and_then(|(consist, vehicle)| {
                self.inner
                    .stack
                    .label_to_op_consist(session, label)
                    .map(|op_consist| (consist, vehicle, op_consist))
            });

        match resolved {
            Ok(ids) => {
                if cache_enabled && use_cache {
                    let mut state = self.inner.state.lock();
                    let cache_config = state.config.cache.clone();
                    state.dnr.put_label(&cache_config, label, ids, now);
                }
                Some(ids)
            }
            Err(err) => {
                log::error!("[DNR] label_to_ids('{}') failed: {}", label, err);
                None
            }
        }
    }

    /// DNR preconditions: stack present, sub-API compiled in, resolver
    /// initialised, at least one session open. Emits one rate-limited
    /// diagnostic per distinct reason.
    fn dnr_session(&self, state: &EngineState) -> Option<SessionId> {
        if !state.stack_available {
            self.inner.warn_dnr_unavailable(
                "TRDP stack not present in this build; host lookups are disabled",
            );
            return None;
        }
        if !self.inner.stack.has_dnr() {
            self.inner.warn_dnr_unavailable(
                "TAU DNR APIs not available in detected stack; host lookups are disabled",
            );
            return None;
        }
        if !state.dnr_initialised {
            self.inner
                .warn_dnr_unavailable("DNR not initialised; host lookups are disabled");
            return None;
        }
        state.any_session()
    }

    fn bootstrap_registry(&self, state: &EngineState) -> Result<()> {
        if state.config.xml_path.is_empty() {
            return Ok(());
        }
        // A registry populated programmatically is left untouched.
        if !self.inner.registry.list_telegrams().is_empty()
            || !self.inner.registry.list_datasets().is_empty()
        {
            return Ok(());
        }
        self.inner.registry.bootstrap(&state.config.xml_path)
    }

    fn initialise_stack(&self, state: &mut EngineState) -> Result<()> {
        log::info!("[ENGINE] Initialising TRDP stack");
        if !state.stack_available {
            log::info!("[ENGINE] Stack not available; running in stub mode");
            state.pd_ready = true;
            state.md_ready = true;
            return Ok(());
        }

        self.inner.stack.init()?;
        self.inner.stack.install_sink(Arc::new(EngineSink {
            inner: Arc::downgrade(&self.inner),
        }));

        let session_ip = self.resolve_session_ip(state);
        if !session_ip.is_unspecified() {
            log::info!("[ENGINE] Binding TRDP sessions to interface IP {}", session_ip);
        }

        let mut pd_ports: Vec<u16> = Vec::new();
        let mut md_ports: Vec<u16> = Vec::new();
        let mut has_pd = false;
        let mut has_md = false;
        for telegram in self.inner.registry.list_telegrams() {
            let ports = match telegram.ty {
                TelegramType::Pd => {
                    has_pd = true;
                    &mut pd_ports
                }
                TelegramType::Md => {
                    has_md = true;
                    &mut md_ports
                }
            };
            for port in [telegram.src_port, telegram.dest_port] {
                if port != 0 && !ports.contains(&port) {
                    ports.push(port);
                }
            }
        }

        if has_pd && pd_ports.is_empty() {
            pd_ports.push(DEFAULT_TRDP_PORT);
        }
        if has_md && md_ports.is_empty() {
            md_ports.push(DEFAULT_TRDP_PORT);
        }
        if !has_pd {
            log::info!("[ENGINE] No PD telegrams configured; skipping PD session setup");
        }
        if !has_md {
            log::info!("[ENGINE] No MD telegrams configured; skipping MD session setup");
        }

        let mut last_err: Option<Error> = None;
        for port in pd_ports {
            match self.inner.stack.open_session(SessionRole::Pd, session_ip, port) {
                Ok(session) => {
                    state.pd_sessions.insert(port, session);
                }
                Err(err) => {
                    log::error!("[ENGINE] PD session open failed on port {}: {}", port, err);
                    last_err = Some(err);
                }
            }
        }
        for port in md_ports {
            match self.inner.stack.open_session(SessionRole::Md, session_ip, port) {
                Ok(session) => {
                    state.md_sessions.insert(port, session);
                }
                Err(err) => {
                    log::error!("[ENGINE] MD session open failed on port {}: {}", port, err);
                    last_err = Some(err);
                }
            }
        }

        state.pd_ready = has_pd && !state.pd_sessions.is_empty();
        state.md_ready = has_md && !state.md_sessions.is_empty();

        let pd_ok = !has_pd || state.pd_ready;
        let md_ok = !has_md || state.md_ready;
        if !pd_ok || !md_ok {
            if !pd_ok {
                log::error!("[ENGINE] PD stack failed to initialise for configured telegrams");
            }
            if !md_ok {
                log::error!("[ENGINE] MD stack failed to initialise for configured telegrams");
            }
            return Err(last_err.unwrap_or(Error::Stack(-1)));
        }

        let any_session = state.any_session().is_some();
        if state.config.enable_dnr && any_session && self.inner.stack.has_dnr() {
            let session = state.any_session().expect("session presence checked");
            let hosts_file = (!state.config.hosts_file.is_empty())
                .then(|| state.config.hosts_file.clone());
            match self
                .inner
                .stack
                .dnr_init(session, hosts_file.as_deref(), state.config.dnr_mode)
            {
                Ok(()) => {
                    state.dnr_initialised = true;
                    log::info!("[ENGINE] DNR initialised");
                }
                Err(err) => {
                    log::error!("[ENGINE] DNR initialisation failed: {}", err);
                    return Err(err);
                }
            }
        }

        if state.config.ecsp.enable {
            if any_session {
                let ecsp_config = state.config.ecsp.clone();
                state.ecsp.initialise(self.inner.stack.as_ref(), &ecsp_config);
            } else {
                log::info!(
                    "[ENGINE] ECSP enabled in config but no TRDP sessions are active; \
                     skipping initialisation"
                );
            }
        }

        log::info!(
            "[ENGINE] Sessions ready (PD: {}, MD: {})",
            state.pd_sessions.len(),
            state.md_sessions.len()
        );
        Ok(())
    }

    fn resolve_session_ip(&self, state: &EngineState) -> Ipv4Addr {
        let tx_ip = endpoint::resolve_interface_ip(&state.config.tx_interface);
        let rx_ip = endpoint::resolve_interface_ip(&state.config.rx_interface);

        if !state.config.tx_interface.is_empty() && tx_ip.is_none() {
            log::warn!(
                "[ENGINE] Unable to resolve TX interface '{}'; falling back to default \
                 stack selection",
                state.config.tx_interface
            );
        }
        if !state.config.rx_interface.is_empty() && rx_ip.is_none() {
            log::warn!(
                "[ENGINE] Unable to resolve RX interface '{}'; falling back to default \
                 stack selection",
                state.config.rx_interface
            );
        }

        tx_ip.or(rx_ip).unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    fn teardown_stack(&self, state: &mut EngineState) {
        if !state.pd_ready && !state.md_ready && state.any_session().is_none() {
            return;
        }

        if state.stack_available {
            if state.dnr_initialised {
                if let Some(session) = state.any_session() {
                    self.inner.stack.dnr_deinit(session);
                }
                state.dnr_initialised = false;
            }
            for session in state.md_sessions.values() {
                self.inner.stack.close_session(*session);
            }
            for session in state.pd_sessions.values() {
                self.inner.stack.close_session(*session);
            }
            self.inner.stack.terminate();
        } else {
            log::debug!("[ENGINE] Stack not available; stub teardown");
        }

        state.md_sessions.clear();
        state.pd_sessions.clear();
        state.pd_ready = false;
        state.md_ready = false;
        state.ecsp.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatasetDef, FieldDef, FieldType, TelegramDef};
    use crate::stack::StubStack;
    use std::time::Duration;

    fn engine_with_stub(stack: Arc<StubStack>) -> TrdpEngine {
        let registry = Arc::new(TelegramRegistry::new());
        let mut ds = DatasetDef::new("d");
        ds.fields.push(FieldDef::new("x", FieldType::U16, 0));
        registry.register_dataset(ds);

        let mut tx = TelegramDef::new(1, "tx", "d", Direction::Tx, TelegramType::Pd);
        tx.cycle = Duration::from_millis(10);
        registry.register_telegram(tx).expect("register tx");
        registry
            .register_telegram(TelegramDef::new(2, "rx", "d", Direction::Rx, TelegramType::Pd))
            .expect("register rx");

        TrdpEngine::new(stack, Arc::new(NullHub), registry)
    }

    fn test_config() -> TrdpConfig {
        TrdpConfig {
            xml_path: String::new(),
            idle_interval: Duration::from_millis(2),
            ..TrdpConfig::default()
        }
    }

    #[test]
    fn test_start_stop_restart() {
        let engine = engine_with_stub(Arc::new(StubStack::absent()));
        assert!(!engine.is_running());

        engine.start(test_config()).expect("start");
        assert!(engine.is_running());
        // Idempotent with the same config.
        engine.start(test_config()).expect("restart");
        assert!(engine.is_running());

        engine.stop();
        assert!(!engine.is_running());
        engine.stop();

        engine.start(test_config()).expect("second start");
        assert!(engine.is_running());
        engine.stop();
    }

    #[test]
    fn test_send_unknown_and_wrong_direction() {
        let engine = engine_with_stub(Arc::new(StubStack::absent()));
        engine.start(test_config()).expect("start");

        let err = engine.send_tx_telegram(99, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownTelegram(99)));

        let err = engine.send_tx_telegram(2, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::WrongDirection(2)));

        engine.stop();
    }

    #[test]
    fn test_stop_tx_requires_tx_pd() {
        let engine = engine_with_stub(Arc::new(StubStack::absent()));
        engine.start(test_config()).expect("start");

        assert!(matches!(
            engine.stop_tx_telegram(2),
            Err(Error::WrongDirection(2))
        ));
        // Idempotent on an inactive TX PD endpoint.
        engine.stop_tx_telegram(1).expect("stop idle");
        engine.stop_tx_telegram(1).expect("stop idle again");

        engine.stop();
    }

    #[test]
    fn test_reconfigure_without_restart_bumps_topology() {
        let engine = engine_with_stub(Arc::new(StubStack::absent()));
        engine.start(test_config()).expect("start");
        let (etb_before, op_before) = engine.topology_counters();

        let mut changed = test_config();
        changed.cache.ttl = Duration::from_secs(60);
        engine.start(changed).expect("reconfigure");

        assert!(engine.is_running());
        let (etb_after, op_after) = engine.topology_counters();
        assert_eq!(etb_after, etb_before + 1);
        assert_eq!(op_after, op_before + 1);

        engine.stop();
    }

    #[test]
    fn test_tx_publish_active_flag() {
        let engine = engine_with_stub(Arc::new(StubStack::absent()));
        engine.start(test_config()).expect("start");

        assert_eq!(engine.tx_publish_active(1), Some(false));
        assert_eq!(engine.tx_publish_active(2), None);
        assert_eq!(engine.tx_publish_active(99), None);

        engine
            .send_tx_telegram(1, BTreeMap::new())
            .expect("send");
        assert_eq!(engine.tx_publish_active(1), Some(true));

        engine.stop_tx_telegram(1).expect("stop tx");
        assert_eq!(engine.tx_publish_active(1), Some(false));

        engine.stop();
    }

    #[test]
    fn test_dnr_lookups_return_none_without_stack() {
        let engine = engine_with_stub(Arc::new(StubStack::absent()));
        engine.start(test_config()).expect("start");

        assert_eq!(engine.uri_to_ip("dev1.car1", true), None);
        assert_eq!(engine.ip_to_uri(Ipv4Addr::new(10, 0, 0, 1), true), None);
        assert_eq!(engine.label_to_ids("car1", true), None);

        engine.stop();
    }

    #[test]
    fn test_set_fields_reencodes_buffer() {
        let engine = engine_with_stub(Arc::new(StubStack::absent()));
        engine.start(test_config()).expect("start");

        let mut fields = BTreeMap::new();
        fields.insert("x".to_string(), FieldValue::U16(0x1234));
        engine.set_fields(1, fields).expect("set fields");

        let runtime = engine.runtime(1).expect("runtime");
        assert_eq!(runtime.buffer_copy(), vec![0x34, 0x12]);

        engine.stop();
    }
}
