// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ECSP control state.

use std::time::{Duration, Instant};

use crate::config::EcspConfig;
use crate::stack::TrdpStack;

/// Lower bound on the status poll spacing.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runtime state of the optional ECSP control surface.
#[derive(Default)]
pub(crate) struct EcspState {
    pub initialised: bool,
    last_poll: Option<Instant>,
}

impl EcspState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialise ECSP control on the stack and apply the configured
    /// parameters. Failure leaves ECSP uninitialised and is logged.
    pub fn initialise(&mut self, stack: &dyn TrdpStack, config: &EcspConfig) {
        if !stack.has_ecsp() {
            log::info!("[ECSP] Control APIs not available in detected stack");
            return;
        }
        if let Err(err) = stack.ecsp_init(config.confirm_timeout) {
            log::error!("[ECSP] init failed: {}", err);
            return;
        }
        self.initialised = true;
        self.update_control(stack, config);
    }

    /// Push the current control parameters into the stack.
    pub fn update_control(&mut self, stack: &dyn TrdpStack, config: &EcspConfig) {
        if !self.initialised {
            return;
        }
        if let Err(err) = stack.ecsp_set_control(config.enable, config.confirm_timeout) {
            log::error!("[ECSP] set control failed: {}", err);
        }
    }

    /// Poll status if at least the configured interval (floored at
    /// 10 ms) has passed since the last poll.
    pub fn poll(&mut self, stack: &dyn TrdpStack, config: &EcspConfig, now: Instant) {
        if !self.initialised {
            return;
        }
        let interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        if let Some(last) = self.last_poll {
            if now.duration_since(last) < interval {
                return;
            }
        }
        self.last_poll = Some(now);
        if let Err(err) = stack.ecsp_status() {
            log::error!("[ECSP] status read failed: {}", err);
        }
    }

    /// Forget stack-side state (engine teardown).
    pub fn reset(&mut self) {
        self.initialised = false;
        self.last_poll = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StubStack;

    #[test]
    fn test_initialise_skips_when_ecsp_absent() {
        // StubStack reports no ECSP sub-API.
        let stack = StubStack::new();
        let mut state = EcspState::new();
        state.initialise(&stack, &EcspConfig::default());
        assert!(!state.initialised);
    }

    #[test]
    fn test_poll_noop_when_uninitialised() {
        let stack = StubStack::new();
        let mut state = EcspState::new();
        state.poll(&stack, &EcspConfig::default(), Instant::now());
        assert!(state.last_poll.is_none());
    }
}
