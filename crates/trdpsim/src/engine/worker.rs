// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background worker loop.
//!
//! One worker thread per engine instance. Each tick, under the state
//! lock: push dirty topology counters, dispatch due cyclic PD
//! transmissions, prune MD request timeouts, poll ECSP, and compute the
//! wait budget. The lock is released before hub fan-out and before
//! blocking in the stack's process step (or sleeping in stub mode).

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::endpoint;
use crate::engine::{EngineInner, EngineState};
use crate::model::{Direction, FieldValue, TelegramType};
use crate::stack::SessionId;

/// Wait budget when neither the stack nor the configuration provide one.
const FALLBACK_INTERVAL: Duration = Duration::from_millis(100);

type Confirmation = (u32, BTreeMap<String, FieldValue>, Option<bool>);

pub(crate) fn run(inner: Arc<EngineInner>) {
    log::info!("[ENGINE] Worker thread started");

    while !inner.stop_requested.load(Ordering::SeqCst) {
        let now = Instant::now();
        let mut confirmations: Vec<Confirmation> = Vec::new();

        let (wait, sessions, stack_available) = {
            let mut state = inner.state.lock();

            push_topology(&inner, &mut state);
            dispatch_cyclic(&inner, &mut state, now, &mut confirmations);
            inner.md.lock().prune(now);
            if state.config.ecsp.enable {
                let ecsp_config = state.config.ecsp.clone();
                state.ecsp.poll(inner.stack.as_ref(), &ecsp_config, now);
            }

            let wait = wait_budget(&inner, &state);
            let sessions: Vec<SessionId> = state
                .pd_sessions
                .values()
                .chain(state.md_sessions.values())
                .copied()
                .collect();
            (wait, sessions, state.stack_available)
        };

        // Hub fan-out happens outside the state lock.
        for (com_id, fields, tx_active) in confirmations {
            inner.hub.publish_tx_confirmation(com_id, fields, tx_active);
        }

        if inner.stop_requested.load(Ordering::SeqCst) {
            break;
        }

        if stack_available && !sessions.is_empty() {
            // The first session consumes the wait budget; the rest are
            // drained without blocking.
            let mut budget = wait;
            for session in sessions {
                if let Err(err) = inner.stack.process(session, budget) {
                    log::error!("[ENGINE] Stack process step failed: {}", err);
                }
                budget = Duration::ZERO;
            }
        } else {
            std::thread::sleep(wait);
        }
    }

    log::info!("[ENGINE] Worker thread exiting");
}

/// Push topology counters into every session when marked dirty.
fn push_topology(inner: &EngineInner, state: &mut EngineState) {
    if !state.topo_dirty {
        return;
    }
    if state.stack_available {
        let sessions: Vec<SessionId> = state
            .pd_sessions
            .values()
            .chain(state.md_sessions.values())
            .copied()
            .collect();
        for session in sessions {
            if let Err(err) =
                inner
                    .stack
                    .set_topology(session, state.etb_topo, state.op_trn_topo)
            {
                log::error!("[ENGINE] Failed to update topology counters: {}", err);
            }
        }
    }
    state.topo_dirty = false;
}

/// Publish every due cyclic TX PD endpoint.
fn dispatch_cyclic(
    inner: &EngineInner,
    state: &mut EngineState,
    now: Instant,
    confirmations: &mut Vec<Confirmation>,
) {
    let stack_available = state.stack_available;
    for (com_id, ep) in state.endpoints.iter_mut() {
        if ep.def.ty != TelegramType::Pd || ep.def.direction != Direction::Tx {
            continue;
        }
        if !ep.tx_cyclic_active || ep.cycle.is_zero() {
            continue;
        }
        match ep.next_send {
            None => {
                ep.next_send = Some(now + ep.cycle);
                continue;
            }
            Some(deadline) if now < deadline => continue,
            Some(_) => {}
        }

        let buffer = ep.runtime.buffer_copy();
        match endpoint::publish_pd(inner.stack.as_ref(), stack_available, ep, &buffer) {
            Ok(()) => {
                ep.next_send = Some(now + ep.cycle);
                confirmations.push((*com_id, ep.runtime.snapshot_fields(), None));
            }
            Err(_) => {
                // Re-enabled only by the next explicit send.
                ep.tx_cyclic_active = false;
            }
        }
    }
}

/// Wait budget for this tick: the smallest per-session stack hint,
/// clamped to the configured idle interval, with a hard fallback.
fn wait_budget(inner: &EngineInner, state: &EngineState) -> Duration {
    let idle = if state.config.idle_interval.is_zero() {
        FALLBACK_INTERVAL
    } else {
        state.config.idle_interval
    };

    if !state.stack_available {
        return idle;
    }

    let hint = state
        .pd_sessions
        .values()
        .chain(state.md_sessions.values())
        .filter_map(|session| inner.stack.interval_hint(*session))
        .min();

    match hint {
        Some(hint) => hint.min(idle),
        None => idle,
    }
}
