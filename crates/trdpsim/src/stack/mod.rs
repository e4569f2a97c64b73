// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Capability interface over the native TRDP stack.
//!
//! The engine drives wire-level I/O exclusively through [`TrdpStack`], a
//! trait modelling the tlc/tlp/tlm/tau API surface as capabilities.
//! Platform builds differ in which sub-APIs exist (DNR and ECSP may be
//! absent), so the trait exposes `has_*` probes, and the whole stack may
//! be absent: [`StubStack`] provides the no-op rendition used by tests
//! and stack-less deployments.
//!
//! All cycle and timeout quantities cross this boundary as the stack's
//! wire unit (microseconds for PD cycles, milliseconds for MD timers);
//! the engine converts from [`std::time::Duration`] when building specs.

mod stub;

pub use stub::StubStack;

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DnrMode;
use crate::error::Result;

/// Opaque per-session identifier issued by [`TrdpStack::open_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u32);

/// Whether a session serves Process Data or Message Data traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Pd,
    Md,
}

/// Handle of an active PD publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubHandle(pub u32);

/// Handle of an active PD subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubHandle(pub u32);

/// Handle of an active MD listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(pub u32);

/// Opaque 16-byte MD session identifier returned by [`TrdpStack::request`].
///
/// This is the canonical key for in-flight MD exchanges; multiple
/// sessions per comId are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MdSessionKey(pub [u8; 16]);

impl fmt::Display for MdSessionKey {
    /// Hex rendering grouped in byte pairs, e.g. `0102:0304:...`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 && i % 2 == 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Parameters for a cyclic PD publication.
#[derive(Debug, Clone)]
pub struct PublishSpec {
    pub com_id: u32,
    pub src_ip: Ipv4Addr,
    pub dest_ip: Ipv4Addr,
    /// Publish interval in the stack's wire unit (microseconds); 0 for
    /// one-shot telegrams.
    pub interval_us: u32,
    pub ttl: u8,
    pub qos: u8,
    pub flags: u32,
    pub etb_topo: u32,
    pub op_trn_topo: u32,
}

/// Parameters for a PD subscription.
#[derive(Debug, Clone)]
pub struct SubscribeSpec {
    pub com_id: u32,
    pub src_ip: Ipv4Addr,
    pub dest_ip: Ipv4Addr,
    pub ttl: u8,
    pub qos: u8,
    pub flags: u32,
    pub etb_topo: u32,
    pub op_trn_topo: u32,
}

/// Parameters for an MD listener.
#[derive(Debug, Clone)]
pub struct ListenerSpec {
    pub com_id: u32,
    pub src_ip: Ipv4Addr,
    pub dest_ip: Ipv4Addr,
    pub flags: u32,
    pub etb_topo: u32,
    pub op_trn_topo: u32,
}

/// Parameters for an MD request (or notification when
/// `expected_replies == 0` and no confirm is requested).
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub com_id: u32,
    pub src_ip: Ipv4Addr,
    pub dest_ip: Ipv4Addr,
    pub expected_replies: u32,
    pub reply_timeout: Duration,
    pub confirm_timeout: Duration,
    pub ttl: u8,
    pub qos: u8,
    pub flags: u32,
    pub etb_topo: u32,
    pub op_trn_topo: u32,
}

/// Metadata delivered with a PD receive callback.
#[derive(Debug, Clone, Copy)]
pub struct PdInfo {
    pub com_id: u32,
    pub result_code: i32,
}

/// Metadata delivered with an MD receive callback.
#[derive(Debug, Clone, Copy)]
pub struct MdInfo {
    pub com_id: u32,
    pub result_code: i32,
    pub session_key: MdSessionKey,
}

/// ECSP status snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct EcspStatus {
    pub enabled: bool,
    pub confirm_outstanding: bool,
}

/// Receiver for stack callbacks.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; the stack invokes these from
/// its own threads.
pub trait StackSink: Send + Sync {
    /// A PD telegram arrived (or a PD error was reported via
    /// `info.result_code`).
    fn on_pd(&self, info: &PdInfo, payload: &[u8]);

    /// An MD telegram (reply, confirm, request, or error) arrived.
    fn on_md(&self, info: &MdInfo, payload: &[u8]);
}

/// The native TRDP stack as a capability set.
///
/// `available()` reports whether a real stack backs this instance; when
/// it returns false the engine skips every other call and runs its
/// scheduling and codec paths without wire I/O ("stub mode").
pub trait TrdpStack: Send + Sync {
    /// Whether a real stack is present.
    fn available(&self) -> bool;

    /// Initialise the stack (memory setup, global state).
    fn init(&self) -> Result<()>;

    /// Terminate the stack. All sessions must be closed first.
    fn terminate(&self);

    /// Register the callback receiver for PD/MD indications.
    fn install_sink(&self, sink: Arc<dyn StackSink>);

    /// Open a session bound to `own_ip` (unspecified = stack default)
    /// and `port` for the given role.
    fn open_session(&self, role: SessionRole, own_ip: Ipv4Addr, port: u16) -> Result<SessionId>;

    /// Close a session.
    fn close_session(&self, session: SessionId);

    /// Create a cyclic publication with its initial payload.
    fn publish(
        &self,
        session: SessionId,
        spec: &PublishSpec,
        initial: &[u8],
    ) -> Result<PubHandle>;

    /// Update the payload of an existing publication without changing
    /// its cadence.
    fn put(&self, session: SessionId, handle: PubHandle, payload: &[u8]) -> Result<()>;

    /// Tear down a publication.
    fn unpublish(&self, session: SessionId, handle: PubHandle);

    /// Subscribe to an inbound PD telegram.
    fn subscribe(&self, session: SessionId, spec: &SubscribeSpec) -> Result<SubHandle>;

    /// Tear down a subscription.
    fn unsubscribe(&self, session: SessionId, handle: SubHandle);

    /// Add an MD listener.
    fn add_listener(&self, session: SessionId, spec: &ListenerSpec) -> Result<ListenerHandle>;

    /// Remove an MD listener.
    fn remove_listener(&self, session: SessionId, handle: ListenerHandle);

    /// Send an MD request; returns the 16-byte session key tracking the
    /// exchange.
    fn request(&self, session: SessionId, spec: &RequestSpec, payload: &[u8])
        -> Result<MdSessionKey>;

    /// Send an MD notification (no reply expected).
    fn notify(&self, session: SessionId, spec: &RequestSpec, payload: &[u8]) -> Result<()>;

    /// Reply to a received MD request.
    fn reply(
        &self,
        session: SessionId,
        key: &MdSessionKey,
        com_id: u32,
        payload: &[u8],
    ) -> Result<()>;

    /// Reply to a received MD request, asking the requester to confirm.
    fn reply_query(
        &self,
        session: SessionId,
        key: &MdSessionKey,
        com_id: u32,
        confirm_timeout: Duration,
        payload: &[u8],
    ) -> Result<()>;

    /// Confirm a received MD reply.
    fn confirm(&self, session: SessionId, key: &MdSessionKey, com_id: u32) -> Result<()>;

    /// Report an application-level error for a received MD request.
    fn error_reply(
        &self,
        session: SessionId,
        key: &MdSessionKey,
        com_id: u32,
        error_code: i32,
    ) -> Result<()>;

    /// Next scheduling deadline the session wants to be processed by.
    fn interval_hint(&self, session: SessionId) -> Option<Duration>;

    /// Drain ready sockets and fire timers, blocking up to `wait`.
    /// The fd-set select is owned by the adapter.
    fn process(&self, session: SessionId, wait: Duration) -> Result<()>;

    /// Push the current topology counters into a session.
    fn set_topology(&self, session: SessionId, etb: u32, op_trn: u32) -> Result<()>;

    // ------------------------------------------------------------------
    // DNR (optional sub-API)
    // ------------------------------------------------------------------

    /// Whether the TAU DNR sub-API is present.
    fn has_dnr(&self) -> bool;

    /// Initialise the resolver on a session.
    fn dnr_init(&self, session: SessionId, hosts_file: Option<&str>, mode: DnrMode) -> Result<()>;

    /// Shut the resolver down.
    fn dnr_deinit(&self, session: SessionId);

    /// Resolve a TRDP URI to an IPv4 address.
    fn uri_to_ip(&self, session: SessionId, uri: &str) -> Result<Ipv4Addr>;

    /// Resolve an IPv4 address back to its URI.
    fn ip_to_uri(&self, session: SessionId, ip: Ipv4Addr) -> Result<String>;

    /// Resolve a vehicle label to `(consist number, vehicle number)`.
    fn label_to_vehicle(&self, session: SessionId, label: &str) -> Result<(u32, u32)>;

    /// Resolve a vehicle label to its operational consist number.
    fn label_to_op_consist(&self, session: SessionId, label: &str) -> Result<u32>;

    // ------------------------------------------------------------------
    // ECSP (optional sub-API)
    // ------------------------------------------------------------------

    /// Whether the TAU ECSP sub-API is present.
    fn has_ecsp(&self) -> bool;

    /// Initialise ECSP control with the confirm timeout.
    fn ecsp_init(&self, confirm_timeout: Duration) -> Result<()>;

    /// Apply ECSP control parameters.
    fn ecsp_set_control(&self, enable: bool, confirm_timeout: Duration) -> Result<()>;

    /// Read the current ECSP status.
    fn ecsp_status(&self) -> Result<EcspStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md_session_key_display() {
        let key = MdSessionKey([
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10,
        ]);
        assert_eq!(
            key.to_string(),
            "0102:0304:0506:0708:090a:0b0c:0d0e:0f10"
        );
    }
}
