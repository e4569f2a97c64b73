// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telegram definitions.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Serialize;

/// Data flow direction relative to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Tx,
    Rx,
}

/// TRDP telegram class.
///
/// Process Data telegrams are cyclic and connectionless; Message Data
/// telegrams follow request/reply/confirm semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TelegramType {
    Pd,
    Md,
}

/// A named, directed channel carrying one dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramDef {
    /// 32-bit communication identifier, unique within the registry.
    pub com_id: u32,
    /// Display name.
    pub name: String,
    /// Name of the dataset this telegram carries. Must be registered
    /// before the telegram.
    pub dataset_name: String,
    pub direction: Direction,
    #[serde(rename = "type")]
    pub ty: TelegramType,
    pub src_ip: Ipv4Addr,
    pub dest_ip: Ipv4Addr,
    pub src_port: u16,
    pub dest_port: u16,
    /// IP time-to-live for outbound packets.
    pub ttl: u8,
    /// QoS / DSCP priority class passed through to the stack.
    pub qos: u8,
    /// Raw TRDP option flags passed through to the stack.
    pub trdp_flags: u32,
    /// PD publish cycle. Zero means one-shot (no cyclic re-send).
    pub cycle: Duration,
    /// MD: number of replies a request waits for (0 = notification).
    pub expected_replies: u32,
    /// MD: how long to wait for the expected replies.
    pub reply_timeout: Duration,
    /// MD: how long to wait for the confirm (0 = no confirm required).
    pub confirm_timeout: Duration,
}

impl TelegramDef {
    /// Create a telegram definition with neutral addressing and timers.
    pub fn new(
        com_id: u32,
        name: impl Into<String>,
        dataset_name: impl Into<String>,
        direction: Direction,
        ty: TelegramType,
    ) -> Self {
        Self {
            com_id,
            name: name.into(),
            dataset_name: dataset_name.into(),
            direction,
            ty,
            src_ip: Ipv4Addr::UNSPECIFIED,
            dest_ip: Ipv4Addr::UNSPECIFIED,
            src_port: 0,
            dest_port: 0,
            ttl: 64,
            qos: 0,
            trdp_flags: 0,
            cycle: Duration::ZERO,
            expected_replies: 0,
            reply_timeout: Duration::ZERO,
            confirm_timeout: Duration::ZERO,
        }
    }

    /// Port the endpoint should bind through: the local/source port when
    /// transmitting, otherwise the destination port, otherwise whatever
    /// source port is present.
    pub fn effective_port(&self) -> u16 {
        if self.direction == Direction::Tx && self.src_port != 0 {
            return self.src_port;
        }
        if self.dest_port != 0 {
            return self.dest_port;
        }
        self.src_port
    }
}
