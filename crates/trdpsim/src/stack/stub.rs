// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! No-op stack used for tests and stack-less deployments.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::DnrMode;
use crate::error::{Error, Result};
use crate::stack::{
    EcspStatus, ListenerHandle, ListenerSpec, MdSessionKey, PubHandle, PublishSpec, RequestSpec,
    SessionId, SessionRole, StackSink, SubHandle, SubscribeSpec, TrdpStack,
};

/// A [`TrdpStack`] that performs no wire I/O.
///
/// In the default mode every operation succeeds and is recorded so tests
/// can assert on publish/put/request traffic. [`StubStack::absent`]
/// builds an instance that reports no stack at all, which makes the
/// engine skip stack calls entirely (stub mode of the engine).
pub struct StubStack {
    available: bool,
    next_id: AtomicU32,
    next_session_key: AtomicU64,
    fail_puts: AtomicBool,
    fail_publish: AtomicBool,
    state: Mutex<StubState>,
}

#[derive(Default)]
struct StubState {
    sink: Option<Arc<dyn StackSink>>,
    sessions: Vec<(SessionRole, Ipv4Addr, u16, SessionId)>,
    /// publish handle -> comId
    publications: HashMap<u32, u32>,
    subscriptions: Vec<u32>,
    listeners: Vec<u32>,
    /// (comId, payload) per put, in call order
    puts: Vec<(u32, Vec<u8>)>,
    /// (comId, sessionKey) per request, in call order
    requests: Vec<(u32, MdSessionKey)>,
}

impl StubStack {
    /// Functional no-op stack: sessions open, sends succeed, recorded.
    pub fn new() -> Self {
        Self {
            available: true,
            next_id: AtomicU32::new(1),
            next_session_key: AtomicU64::new(1),
            fail_puts: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            state: Mutex::new(StubState::default()),
        }
    }

    /// A stack that is not present at all; `available()` returns false.
    pub fn absent() -> Self {
        let mut stub = Self::new();
        stub.available = false;
        stub
    }

    /// Make subsequent `put` calls fail with a stack error.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `publish` calls fail with a stack error.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Number of `put` calls recorded for `com_id`.
    pub fn put_count(&self, com_id: u32) -> usize {
        self.state
            .lock()
            .puts
            .iter()
            .filter(|(id, _)| *id == com_id)
            .count()
    }

    /// Last payload `put` for `com_id`, if any.
    pub fn last_put(&self, com_id: u32) -> Option<Vec<u8>> {
        self.state
            .lock()
            .puts
            .iter()
            .rev()
            .find(|(id, _)| *id == com_id)
            .map(|(_, payload)| payload.clone())
    }

    /// All MD session keys issued for `com_id`, in request order.
    pub fn request_keys(&self, com_id: u32) -> Vec<MdSessionKey> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|(id, _)| *id == com_id)
            .map(|(_, key)| *key)
            .collect()
    }

    /// Number of publications created (over the stack's lifetime).
    pub fn publication_count(&self) -> usize {
        self.state.lock().publications.len()
    }

    /// Number of subscriptions created.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Number of MD listeners added.
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// The installed callback sink, if any.
    pub fn sink(&self) -> Option<Arc<dyn StackSink>> {
        self.state.lock().sink.clone()
    }

    fn next_handle(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for StubStack {
    fn default() -> Self {
        Self::new()
    }
}

impl TrdpStack for StubStack {
    fn available(&self) -> bool {
        self.available
    }

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn terminate(&self) {
        let mut state = self.state.lock();
        state.sessions.clear();
        state.publications.clear();
        state.subscriptions.clear();
        state.listeners.clear();
    }

    fn install_sink(&self, sink: Arc<dyn StackSink>) {
        self.state.lock().sink = Some(sink);
    }

    fn open_session(&self, role: SessionRole, own_ip: Ipv4Addr, port: u16) -> Result<SessionId> {
        let session = SessionId(self.next_handle());
        self.state.lock().sessions.push((role, own_ip, port, session));
        Ok(session)
    }

    fn close_session(&self, session: SessionId) {
        self.state.lock().sessions.retain(|(_, _, _, s)| *s != session);
    }

    fn publish(&self, _session: SessionId, spec: &PublishSpec, _initial: &[u8]) -> Result<PubHandle> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(Error::Stack(-1));
        }
        let handle = PubHandle(self.next_handle());
        self.state.lock().publications.insert(handle.0, spec.com_id);
        Ok(handle)
    }

    fn put(&self, _session: SessionId, handle: PubHandle, payload: &[u8]) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Error::Stack(-1));
        }
        let mut state = self.state.lock();
        let com_id = state.publications.get(&handle.0).copied().unwrap_or(0);
        state.puts.push((com_id, payload.to_vec()));
        Ok(())
    }

    fn unpublish(&self, _session: SessionId, handle: PubHandle) {
        self.state.lock().publications.remove(&handle.0);
    }

    fn subscribe(&self, _session: SessionId, spec: &SubscribeSpec) -> Result<SubHandle> {
        self.state.lock().subscriptions.push(spec.com_id);
        Ok(SubHandle(self.next_handle()))
    }

    fn unsubscribe(&self, _session: SessionId, _handle: SubHandle) {}

    fn add_listener(&self, _session: SessionId, spec: &ListenerSpec) -> Result<ListenerHandle> {
        self.state.lock().listeners.push(spec.com_id);
        Ok(ListenerHandle(self.next_handle()))
    }

    fn remove_listener(&self, _session: SessionId, _handle: ListenerHandle) {}

    fn request(
        &self,
        _session: SessionId,
        spec: &RequestSpec,
        _payload: &[u8],
    ) -> Result<MdSessionKey> {
        let serial = self.next_session_key.fetch_add(1, Ordering::SeqCst);
        let mut raw = [0u8; 16];
        raw[..8].copy_from_slice(&serial.to_le_bytes());
        let key = MdSessionKey(raw);
        self.state.lock().requests.push((spec.com_id, key));
        Ok(key)
    }

    fn notify(&self, _session: SessionId, _spec: &RequestSpec, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    fn reply(
        &self,
        _session: SessionId,
        _key: &MdSessionKey,
        _com_id: u32,
        _payload: &[u8],
    ) -> Result<()> {
        Ok(())
    }

    fn reply_query(
        &self,
        _session: SessionId,
        _key: &MdSessionKey,
        _com_id: u32,
        _confirm_timeout: Duration,
        _payload: &[u8],
    ) -> Result<()> {
        Ok(())
    }

    fn confirm(&self, _session: SessionId, _key: &MdSessionKey, _com_id: u32) -> Result<()> {
        Ok(())
    }

    fn error_reply(
        &self,
        _session: SessionId,
        _key: &MdSessionKey,
        _com_id: u32,
        _error_code: i32,
    ) -> Result<()> {
        Ok(())
    }

    fn interval_hint(&self, _session: SessionId) -> Option<Duration> {
        None
    }

    fn process(&self, _session: SessionId, wait: Duration) -> Result<()> {
        // No sockets to drain; honor the wait budget like a select would.
        std::thread::sleep(wait);
        Ok(())
    }

    fn set_topology(&self, _session: SessionId, _etb: u32, _op_trn: u32) -> Result<()> {
        Ok(())
    }

    fn has_dnr(&self) -> bool {
        false
    }

    fn dnr_init(&self, _session: SessionId, _hosts_file: Option<&str>, _mode: DnrMode) -> Result<()> {
        Err(Error::DnrUnavailable)
    }

    fn dnr_deinit(&self, _session: SessionId) {}

    fn uri_to_ip(&self, _session: SessionId, _uri: &str) -> Result<Ipv4Addr> {
        Err(Error::DnrUnavailable)
    }

    fn ip_to_uri(&self, _session: SessionId, _ip: Ipv4Addr) -> Result<String> {
        Err(Error::DnrUnavailable)
    }

    fn label_to_vehicle(&self, _session: SessionId, _label: &str) -> Result<(u32, u32)> {
        Err(Error::DnrUnavailable)
    }

    fn label_to_op_consist(&self, _session: SessionId, _label: &str) -> Result<u32> {
        Err(Error::DnrUnavailable)
    }

    fn has_ecsp(&self) -> bool {
        false
    }

    fn ecsp_init(&self, _confirm_timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn ecsp_set_control(&self, _enable: bool, _confirm_timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn ecsp_status(&self) -> Result<EcspStatus> {
        Ok(EcspStatus::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_puts_and_requests() {
        let stub = StubStack::new();
        let session = stub
            .open_session(SessionRole::Pd, Ipv4Addr::UNSPECIFIED, 17224)
            .expect("session");

        let spec = PublishSpec {
            com_id: 100,
            src_ip: Ipv4Addr::UNSPECIFIED,
            dest_ip: Ipv4Addr::UNSPECIFIED,
            interval_us: 20_000,
            ttl: 64,
            qos: 0,
            flags: 0,
            etb_topo: 0,
            op_trn_topo: 0,
        };
        let handle = stub.publish(session, &spec, &[0, 0]).expect("publish");
        stub.put(session, handle, &[1, 2]).expect("put");
        stub.put(session, handle, &[3, 4]).expect("put");

        assert_eq!(stub.put_count(100), 2);
        assert_eq!(stub.last_put(100), Some(vec![3, 4]));
    }

    #[test]
    fn test_session_keys_are_distinct() {
        let stub = StubStack::new();
        let session = stub
            .open_session(SessionRole::Md, Ipv4Addr::UNSPECIFIED, 17225)
            .expect("session");
        let spec = RequestSpec {
            com_id: 300,
            src_ip: Ipv4Addr::UNSPECIFIED,
            dest_ip: Ipv4Addr::UNSPECIFIED,
            expected_replies: 1,
            reply_timeout: Duration::from_millis(500),
            confirm_timeout: Duration::ZERO,
            ttl: 64,
            qos: 0,
            flags: 0,
            etb_topo: 0,
            op_trn_topo: 0,
        };
        let k1 = stub.request(session, &spec, &[]).expect("request");
        let k2 = stub.request(session, &spec, &[]).expect("request");
        assert_ne!(k1, k2);
        assert_eq!(stub.request_keys(300), vec![k1, k2]);
    }

    #[test]
    fn test_failure_injection() {
        let stub = StubStack::new();
        let session = stub
            .open_session(SessionRole::Pd, Ipv4Addr::UNSPECIFIED, 17224)
            .expect("session");
        let spec = PublishSpec {
            com_id: 1,
            src_ip: Ipv4Addr::UNSPECIFIED,
            dest_ip: Ipv4Addr::UNSPECIFIED,
            interval_us: 0,
            ttl: 64,
            qos: 0,
            flags: 0,
            etb_topo: 0,
            op_trn_topo: 0,
        };
        let handle = stub.publish(session, &spec, &[]).expect("publish");

        stub.set_fail_puts(true);
        assert!(stub.put(session, handle, &[]).is_err());
        stub.set_fail_puts(false);
        assert!(stub.put(session, handle, &[]).is_ok());
    }
}
