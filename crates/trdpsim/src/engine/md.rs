// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tracking of outbound MD request sessions.
//!
//! Every MD request the engine sends is keyed by the stack's opaque
//! 16-byte session identifier (never re-keyed by comId: multiple
//! in-flight sessions per comId are legal). The worker prunes the map
//! each tick; a session closes when its reply count and confirm
//! obligations are both met, and times out exactly once otherwise.

use std::collections::HashMap;
use std::time::Instant;

use crate::model::TelegramDef;
use crate::stack::MdSessionKey;

/// State of one in-flight MD request.
#[derive(Debug, Clone)]
pub(crate) struct MdRequestState {
    pub com_id: u32,
    pub expected_replies: u32,
    pub received_replies: u32,
    pub sent_at: Instant,
    pub reply_deadline: Option<Instant>,
    pub confirm_deadline: Option<Instant>,
    pub confirm_observed: bool,
}

impl MdRequestState {
    fn replies_satisfied(&self) -> bool {
        self.expected_replies == 0 || self.received_replies >= self.expected_replies
    }

    fn confirm_satisfied(&self) -> bool {
        self.confirm_observed || self.confirm_deadline.is_none()
    }

    fn closed(&self) -> bool {
        self.replies_satisfied() && self.confirm_satisfied()
    }
}

/// Map of in-flight MD requests keyed by session id.
#[derive(Default)]
pub(crate) struct MdTracker {
    states: HashMap<MdSessionKey, MdRequestState>,
}

impl MdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly sent request. Fire-and-forget requests
    /// (no replies expected, no confirm requested) are not tracked.
    pub fn track(&mut self, key: MdSessionKey, def: &TelegramDef, now: Instant) {
        if def.expected_replies == 0 && def.confirm_timeout.is_zero() {
            return;
        }

        let state = MdRequestState {
            com_id: def.com_id,
            expected_replies: def.expected_replies,
            received_replies: 0,
            sent_at: now,
            reply_deadline: (!def.reply_timeout.is_zero()).then(|| now + def.reply_timeout),
            confirm_deadline: (!def.confirm_timeout.is_zero()).then(|| now + def.confirm_timeout),
            // With no confirm requested the obligation is met up front.
            confirm_observed: def.confirm_timeout.is_zero(),
        };
        self.states.insert(key, state);
    }

    /// Register an inbound MD indication for `key`. Unknown keys are
    /// ignored. Removes the session once all obligations are met.
    pub fn register_reply(&mut self, key: &MdSessionKey) {
        let Some(state) = self.states.get_mut(key) else {
            return;
        };

        state.confirm_observed = true;
        if state.expected_replies > 0 {
            state.received_replies += 1;
        }

        if state.closed() {
            log::info!(
                "[MD] session {} received all expected replies ({}) for ComId {}",
                key,
                state.received_replies,
                state.com_id
            );
            self.states.remove(key);
        }
    }

    /// Expire overdue sessions and drop completed ones. Each timed-out
    /// session produces exactly one diagnostic.
    pub fn prune(&mut self, now: Instant) {
        self.states.retain(|key, state| {
            let reply_expired = state.expected_replies > state.received_replies
                && state.reply_deadline.is_some_and(|d| now >= d);
            let confirm_expired =
                !state.confirm_observed && state.confirm_deadline.is_some_and(|d| now >= d);

            if reply_expired || confirm_expired {
                let missing = state.expected_replies.saturating_sub(state.received_replies);
                let mut detail = String::new();
                if reply_expired {
                    detail = format!("missing {} reply(ies) before timeout", missing);
                }
                if confirm_expired {
                    if !detail.is_empty() {
                        detail.push_str("; ");
                    }
                    detail.push_str("confirm not received before timeout");
                }
                log::warn!(
                    "[MD] session {} for ComId {} {} (open for {:?})",
                    key,
                    state.com_id,
                    detail,
                    now.duration_since(state.sent_at)
                );
                return false;
            }

            !state.closed()
        });
    }

    /// Whether `key` is still tracked.
    pub fn contains(&self, key: &MdSessionKey) -> bool {
        self.states.contains_key(key)
    }

    /// Number of in-flight sessions.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Drop all tracked sessions (engine stop).
    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, TelegramType};
    use std::time::Duration;

    fn key(b: u8) -> MdSessionKey {
        MdSessionKey([b; 16])
    }

    fn md_def(expected: u32, reply_ms: u64, confirm_ms: u64) -> TelegramDef {
        let mut def = TelegramDef::new(300, "md", "d", Direction::Tx, TelegramType::Md);
        def.expected_replies = expected;
        def.reply_timeout = Duration::from_millis(reply_ms);
        def.confirm_timeout = Duration::from_millis(confirm_ms);
        def
    }

    #[test]
    fn test_fire_and_forget_is_not_tracked() {
        let mut tracker = MdTracker::new();
        tracker.track(key(1), &md_def(0, 0, 0), Instant::now());
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn test_replies_close_session_without_confirm() {
        let mut tracker = MdTracker::new();
        let now = Instant::now();
        tracker.track(key(1), &md_def(2, 500, 0), now);
        assert!(tracker.contains(&key(1)));

        tracker.register_reply(&key(1));
        assert!(tracker.contains(&key(1)));
        tracker.register_reply(&key(1));
        assert!(!tracker.contains(&key(1)));
    }

    #[test]
    fn test_unknown_key_ignored() {
        let mut tracker = MdTracker::new();
        tracker.register_reply(&key(9));
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn test_reply_timeout_drops_session() {
        let mut tracker = MdTracker::new();
        let now = Instant::now();
        tracker.track(key(1), &md_def(2, 500, 0), now);
        tracker.register_reply(&key(1));

        // Before the deadline nothing happens.
        tracker.prune(now + Duration::from_millis(499));
        assert!(tracker.contains(&key(1)));

        tracker.prune(now + Duration::from_millis(500));
        assert!(!tracker.contains(&key(1)));
    }

    #[test]
    fn test_confirm_timeout_drops_session() {
        let mut tracker = MdTracker::new();
        let now = Instant::now();
        // No replies expected, confirm required within 200 ms.
        tracker.track(key(2), &md_def(0, 0, 200), now);
        assert!(tracker.contains(&key(2)));

        tracker.prune(now + Duration::from_millis(200));
        assert!(!tracker.contains(&key(2)));
    }

    #[test]
    fn test_confirm_observation_closes_session() {
        let mut tracker = MdTracker::new();
        let now = Instant::now();
        tracker.track(key(2), &md_def(0, 0, 200), now);
        tracker.register_reply(&key(2));
        assert!(!tracker.contains(&key(2)));
    }

    #[test]
    fn test_multiple_sessions_per_com_id() {
        let mut tracker = MdTracker::new();
        let now = Instant::now();
        tracker.track(key(1), &md_def(1, 500, 0), now);
        tracker.track(key(2), &md_def(1, 500, 0), now);
        assert_eq!(tracker.len(), 2);

        tracker.register_reply(&key(1));
        assert_eq!(tracker.len(), 1);
        assert!(tracker.contains(&key(2)));
    }
}
