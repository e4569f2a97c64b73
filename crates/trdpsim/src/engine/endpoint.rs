// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint binding: one stack attachment per registered telegram.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::model::{Direction, TelegramDef, TelegramRuntime, TelegramType};
use crate::registry::TelegramRegistry;
use crate::stack::{
    ListenerHandle, ListenerSpec, PubHandle, PublishSpec, SessionId, SubHandle, SubscribeSpec,
    TrdpStack,
};

/// Engine-internal binding of one telegram to its stack handles.
pub(crate) struct EndpointHandle {
    pub def: TelegramDef,
    pub runtime: Arc<TelegramRuntime>,
    pub session: Option<SessionId>,
    pub pub_handle: Option<PubHandle>,
    pub sub_handle: Option<SubHandle>,
    pub listener: Option<ListenerHandle>,
    pub pd_ready: bool,
    pub md_ready: bool,
    pub cycle: Duration,
    pub tx_cyclic_active: bool,
    pub next_send: Option<Instant>,
}

/// Session context needed to bind endpoints.
pub(crate) struct BindContext<'a> {
    pub stack_available: bool,
    pub pd_sessions: &'a BTreeMap<u16, SessionId>,
    pub md_sessions: &'a BTreeMap<u16, SessionId>,
    pub pd_ready: bool,
    pub md_ready: bool,
    pub etb_topo: u32,
    pub op_trn_topo: u32,
}

/// Resolve the IPv4 address assigned to a named interface.
pub(crate) fn resolve_interface_ip(name: &str) -> Option<Ipv4Addr> {
    if name.is_empty() {
        return None;
    }
    let interfaces = local_ip_address::list_afinet_netifas().ok()?;
    interfaces.into_iter().find_map(|(if_name, addr)| {
        match (if_name == name, addr) {
            (true, IpAddr::V4(ip)) => Some(ip),
            _ => None,
        }
    })
}

/// Whether `ip` is assigned to a local interface. The unspecified
/// address always counts as local.
pub(crate) fn ip_assigned_locally(ip: Ipv4Addr) -> bool {
    if ip.is_unspecified() {
        return true;
    }
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces
            .iter()
            .any(|(_, addr)| matches!(addr, IpAddr::V4(v4) if *v4 == ip)),
        Err(_) => false,
    }
}

fn session_for_port(
    sessions: &BTreeMap<u16, SessionId>,
    port: u16,
) -> (Option<SessionId>, Option<u16>) {
    if let Some(session) = sessions.get(&port) {
        return (Some(*session), Some(port));
    }
    match sessions.iter().next() {
        Some((bound_port, session)) => (Some(*session), Some(*bound_port)),
        None => (None, None),
    }
}

/// Build endpoint bindings for every telegram in the registry.
///
/// Telegrams whose runtime cannot be created, whose session role failed
/// to initialise, or whose addressing is invalid get a not-ready binding
/// (sends are rejected with a diagnostic) while the rest stay
/// operational. An empty registry yields an empty map; the caller logs
/// the warning.
pub(crate) fn build_endpoints(
    registry: &TelegramRegistry,
    stack: &dyn TrdpStack,
    ctx: &BindContext<'_>,
) -> BTreeMap<u32, EndpointHandle> {
    let mut endpoints = BTreeMap::new();

    for telegram in registry.list_telegrams() {
        let Some(runtime) = registry.get_or_create_runtime(telegram.com_id) else {
            log::error!(
                "[ENGINE] Failed to allocate runtime for ComId {}",
                telegram.com_id
            );
            continue;
        };

        let mut handle = EndpointHandle {
            cycle: telegram.cycle,
            def: telegram,
            runtime,
            session: None,
            pub_handle: None,
            sub_handle: None,
            listener: None,
            pd_ready: false,
            md_ready: false,
            tx_cyclic_active: false,
            next_send: None,
        };

        match handle.def.ty {
            TelegramType::Md => bind_md(&mut handle, stack, ctx),
            TelegramType::Pd => bind_pd(&mut handle, stack, ctx),
        }

        endpoints.insert(handle.def.com_id, handle);
    }

    endpoints
}

fn bind_md(handle: &mut EndpointHandle, stack: &dyn TrdpStack, ctx: &BindContext<'_>) {
    let requested_port = handle.def.effective_port();
    let (session, bound_port) = session_for_port(ctx.md_sessions, requested_port);
    handle.session = session;
    handle.md_ready = ctx.md_ready && (!ctx.stack_available || handle.session.is_some());

    if let Some(bound) = bound_port {
        if bound != requested_port {
            log::warn!(
                "[ENGINE] MD session port mismatch for ComId {} (requested {}, bound {})",
                handle.def.com_id,
                requested_port,
                bound
            );
        }
    }

    if handle.md_ready && ctx.stack_available {
        let spec = ListenerSpec {
            com_id: handle.def.com_id,
            src_ip: handle.def.src_ip,
            dest_ip: handle.def.dest_ip,
            flags: handle.def.trdp_flags,
            etb_topo: ctx.etb_topo,
            op_trn_topo: ctx.op_trn_topo,
        };
        match stack.add_listener(handle.session.expect("md session checked above"), &spec) {
            Ok(listener) => handle.listener = Some(listener),
            Err(err) => {
                log::error!(
                    "[ENGINE] add_listener failed for ComId {}: {}",
                    handle.def.com_id,
                    err
                );
                handle.md_ready = false;
            }
        }
    }

    if handle.md_ready {
        log::info!("[ENGINE] Binding MD endpoint for ComId {}", handle.def.com_id);
    } else if !ctx.md_ready {
        log::error!(
            "[ENGINE] MD session not initialised; unable to bind ComId {}",
            handle.def.com_id
        );
    } else {
        log::error!(
            "[ENGINE] Failed to bind MD endpoint for ComId {}",
            handle.def.com_id
        );
    }
}

fn bind_pd(handle: &mut EndpointHandle, stack: &dyn TrdpStack, ctx: &BindContext<'_>) {
    let requested_port = handle.def.effective_port();
    let (session, bound_port) = session_for_port(ctx.pd_sessions, requested_port);
    handle.session = session;
    handle.pd_ready = ctx.pd_ready && (!ctx.stack_available || handle.session.is_some());

    if let Some(bound) = bound_port {
        if bound != requested_port {
            log::warn!(
                "[ENGINE] PD session port mismatch for ComId {} (requested {}, bound {})",
                handle.def.com_id,
                requested_port,
                bound
            );
        }
    }

    if handle.pd_ready
        && ctx.stack_available
        && handle.def.direction == Direction::Tx
        && !ip_assigned_locally(handle.def.src_ip)
    {
        log::error!(
            "[ENGINE] Source IP {} for ComId {} is not configured on this host; \
             the stack will reject the publish request. Update the XML or bind \
             the engine to a matching local interface.",
            handle.def.src_ip,
            handle.def.com_id
        );
        handle.pd_ready = false;
    }

    if handle.pd_ready && ctx.stack_available {
        let session = handle.session.expect("pd session checked above");
        let outcome = match handle.def.direction {
            Direction::Tx => {
                let spec = PublishSpec {
                    com_id: handle.def.com_id,
                    src_ip: handle.def.src_ip,
                    dest_ip: handle.def.dest_ip,
                    interval_us: handle.cycle.as_micros().min(u128::from(u32::MAX)) as u32,
                    ttl: handle.def.ttl,
                    qos: handle.def.qos,
                    flags: handle.def.trdp_flags,
                    etb_topo: ctx.etb_topo,
                    op_trn_topo: ctx.op_trn_topo,
                };
                let initial = handle.runtime.buffer_copy();
                stack
                    .publish(session, &spec, &initial)
                    .map(|pub_handle| handle.pub_handle = Some(pub_handle))
            }
            Direction::Rx => {
                let mut dest_ip = handle.def.dest_ip;
                if !dest_ip.is_unspecified()
                    && !dest_ip.is_multicast()
                    && !ip_assigned_locally(dest_ip)
                {
                    log::warn!(
                        "[ENGINE] Destination IP {} for ComId {} is not configured on this \
                         host; subscribing with a wildcard address.",
                        dest_ip,
                        handle.def.com_id
                    );
                    dest_ip = Ipv4Addr::UNSPECIFIED;
                }
                let spec = SubscribeSpec {
                    com_id: handle.def.com_id,
                    src_ip: handle.def.src_ip,
                    dest_ip,
                    ttl: handle.def.ttl,
                    qos: handle.def.qos,
                    flags: handle.def.trdp_flags,
                    etb_topo: ctx.etb_topo,
                    op_trn_topo: ctx.op_trn_topo,
                };
                stack
                    .subscribe(session, &spec)
                    .map(|sub_handle| handle.sub_handle = Some(sub_handle))
            }
        };
        if let Err(err) = outcome {
            log::error!(
                "[ENGINE] PD binding failed for ComId {}: {}",
                handle.def.com_id,
                err
            );
            handle.pd_ready = false;
        }
    }

    if handle.pd_ready {
        log::info!("[ENGINE] Binding PD endpoint for ComId {}", handle.def.com_id);
    } else if !ctx.pd_ready {
        log::error!(
            "[ENGINE] PD session not initialised; unable to bind ComId {}",
            handle.def.com_id
        );
    } else {
        log::error!(
            "[ENGINE] Failed to bind PD endpoint for ComId {}",
            handle.def.com_id
        );
    }
}

/// Push `buffer` out on a TX PD endpoint.
pub(crate) fn publish_pd(
    stack: &dyn TrdpStack,
    stack_available: bool,
    endpoint: &EndpointHandle,
    buffer: &[u8],
) -> Result<()> {
    if !endpoint.pd_ready {
        log::warn!(
            "[ENGINE] PD session not available; drop TX ComId {}",
            endpoint.def.com_id
        );
        return Err(Error::NotReady(endpoint.def.com_id));
    }

    if stack_available {
        let (session, handle) = endpoint
            .session
            .zip(endpoint.pub_handle)
            .ok_or(Error::NotReady(endpoint.def.com_id))?;
        stack.put(session, handle, buffer).inspect_err(|err| {
            log::error!(
                "[ENGINE] PD put failed for ComId {}: {}",
                endpoint.def.com_id,
                err
            );
        })?;
    }

    log::debug!(
        "[ENGINE] PD send ComId={} bytes={}",
        endpoint.def.com_id,
        buffer.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatasetDef, FieldDef, FieldType};
    use crate::stack::StubStack;

    fn registry_with(telegrams: Vec<TelegramDef>) -> TelegramRegistry {
        let registry = TelegramRegistry::new();
        let mut ds = DatasetDef::new("d");
        ds.fields.push(FieldDef::new("x", FieldType::U8, 0));
        registry.register_dataset(ds);
        for t in telegrams {
            registry.register_telegram(t).expect("register telegram");
        }
        registry
    }

    #[test]
    fn test_stub_mode_endpoints_are_ready_without_sessions() {
        let registry = registry_with(vec![
            TelegramDef::new(1, "tx", "d", Direction::Tx, TelegramType::Pd),
            TelegramDef::new(2, "md", "d", Direction::Tx, TelegramType::Md),
        ]);
        let stack = StubStack::absent();
        let empty = BTreeMap::new();
        let ctx = BindContext {
            stack_available: false,
            pd_sessions: &empty,
            md_sessions: &empty,
            pd_ready: true,
            md_ready: true,
            etb_topo: 0,
            op_trn_topo: 0,
        };

        let endpoints = build_endpoints(&registry, &stack, &ctx);
        assert!(endpoints.get(&1).expect("pd endpoint").pd_ready);
        assert!(endpoints.get(&2).expect("md endpoint").md_ready);
    }

    #[test]
    fn test_available_stack_creates_bindings() {
        let mut tx = TelegramDef::new(1, "tx", "d", Direction::Tx, TelegramType::Pd);
        tx.cycle = Duration::from_millis(20);
        let rx = TelegramDef::new(2, "rx", "d", Direction::Rx, TelegramType::Pd);
        let md = TelegramDef::new(3, "md", "d", Direction::Rx, TelegramType::Md);
        let registry = registry_with(vec![tx, rx, md]);

        let stack = StubStack::new();
        let pd_session = stack
            .open_session(crate::stack::SessionRole::Pd, Ipv4Addr::UNSPECIFIED, 17224)
            .expect("pd session");
        let md_session = stack
            .open_session(crate::stack::SessionRole::Md, Ipv4Addr::UNSPECIFIED, 17225)
            .expect("md session");
        let pd_sessions = BTreeMap::from([(17224u16, pd_session)]);
        let md_sessions = BTreeMap::from([(17225u16, md_session)]);
        let ctx = BindContext {
            stack_available: true,
            pd_sessions: &pd_sessions,
            md_sessions: &md_sessions,
            pd_ready: true,
            md_ready: true,
            etb_topo: 0,
            op_trn_topo: 0,
        };

        let endpoints = build_endpoints(&registry, &stack, &ctx);
        assert!(endpoints.get(&1).expect("tx").pub_handle.is_some());
        assert!(endpoints.get(&2).expect("rx").sub_handle.is_some());
        assert!(endpoints.get(&3).expect("md").listener.is_some());
        assert_eq!(stack.publication_count(), 1);
        assert_eq!(stack.subscription_count(), 1);
        assert_eq!(stack.listener_count(), 1);
    }

    #[test]
    fn test_foreign_source_ip_disables_tx_endpoint() {
        let mut tx = TelegramDef::new(1, "tx", "d", Direction::Tx, TelegramType::Pd);
        // TEST-NET-1 is never assigned to a local interface.
        tx.src_ip = Ipv4Addr::new(192, 0, 2, 55);
        let registry = registry_with(vec![tx]);

        let stack = StubStack::new();
        let pd_session = stack
            .open_session(crate::stack::SessionRole::Pd, Ipv4Addr::UNSPECIFIED, 17224)
            .expect("pd session");
        let pd_sessions = BTreeMap::from([(17224u16, pd_session)]);
        let md_sessions = BTreeMap::new();
        let ctx = BindContext {
            stack_available: true,
            pd_sessions: &pd_sessions,
            md_sessions: &md_sessions,
            pd_ready: true,
            md_ready: false,
            etb_topo: 0,
            op_trn_topo: 0,
        };

        let endpoints = build_endpoints(&registry, &stack, &ctx);
        let endpoint = endpoints.get(&1).expect("endpoint");
        assert!(!endpoint.pd_ready);
        assert!(endpoint.pub_handle.is_none());
    }

    #[test]
    fn test_publish_pd_rejects_not_ready() {
        let registry = registry_with(vec![TelegramDef::new(
            1,
            "tx",
            "d",
            Direction::Tx,
            TelegramType::Pd,
        )]);
        let stack = StubStack::new();
        let runtime = registry.get_or_create_runtime(1).expect("runtime");
        let endpoint = EndpointHandle {
            def: registry.telegram_copy(1).expect("def"),
            runtime,
            session: None,
            pub_handle: None,
            sub_handle: None,
            listener: None,
            pd_ready: false,
            md_ready: false,
            cycle: Duration::ZERO,
            tx_cyclic_active: false,
            next_send: None,
        };

        let err = publish_pd(&stack, true, &endpoint, &[0]).unwrap_err();
        assert!(matches!(err, Error::NotReady(1)));
    }
}
