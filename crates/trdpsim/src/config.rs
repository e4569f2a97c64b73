// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine configuration.
//!
//! All knobs can be set programmatically or picked up from `TRDP_*`
//! environment variables via [`TrdpConfig::from_env`]. Durations are kept
//! as [`Duration`] everywhere; conversion to the stack's microsecond wire
//! unit happens at the stack boundary only.

use std::time::Duration;

/// How DNR lookups are scheduled inside the native stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnrMode {
    /// Lookups run on the common stack thread.
    CommonThread,
    /// Lookups run on a dedicated resolver thread.
    DedicatedThread,
}

/// Expiring-cache settings shared by the three DNR caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Master switch; disabling clears and bypasses all caches.
    pub enable: bool,
    /// Absolute entry lifetime.
    pub ttl: Duration,
    /// Maximum entries per cache; over-capacity evicts the lowest key.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable: true,
            ttl: Duration::from_secs(30),
            capacity: 128,
        }
    }
}

/// ECSP (End Consist Switch Protection) control settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcspConfig {
    pub enable: bool,
    /// Minimum spacing between status polls (floored at 10 ms).
    pub poll_interval: Duration,
    pub confirm_timeout: Duration,
}

impl Default for EcspConfig {
    fn default() -> Self {
        Self {
            enable: false,
            poll_interval: Duration::from_secs(1),
            confirm_timeout: Duration::from_secs(5),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TrdpConfig {
    /// Path of the XML document the registry bootstraps from.
    pub xml_path: String,
    /// Interface name the RX side should bind to (empty = stack default).
    pub rx_interface: String,
    /// Interface name the TX side should bind to (empty = stack default).
    pub tx_interface: String,
    /// Optional DNR hosts file.
    pub hosts_file: String,
    pub enable_dnr: bool,
    pub dnr_mode: DnrMode,
    pub cache: CacheConfig,
    pub ecsp: EcspConfig,
    /// Worker wake interval when the stack reports no earlier deadline.
    pub idle_interval: Duration,
}

impl Default for TrdpConfig {
    fn default() -> Self {
        Self {
            xml_path: "configs/default.xml".to_string(),
            rx_interface: String::new(),
            tx_interface: String::new(),
            hosts_file: String::new(),
            enable_dnr: false,
            dnr_mode: DnrMode::CommonThread,
            cache: CacheConfig::default(),
            ecsp: EcspConfig::default(),
            idle_interval: Duration::from_millis(50),
        }
    }
}

impl TrdpConfig {
    /// Build a configuration from `TRDP_*` environment variables on top
    /// of the defaults. Unparsable values keep the default silently;
    /// boolean knobs accept `1`/`true`/`yes` (case-insensitive).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_str("TRDP_XML_PATH") {
            config.xml_path = v;
        }
        if let Some(v) = env_str("TRDP_RX_IFACE") {
            config.rx_interface = v;
        }
        if let Some(v) = env_str("TRDP_TX_IFACE") {
            config.tx_interface = v;
        }
        if let Some(v) = env_str("TRDP_HOSTS_FILE") {
            config.hosts_file = v;
        }
        if let Some(v) = env_bool("TRDP_ENABLE_DNR") {
            config.enable_dnr = v;
        }
        if let Some(v) = env_str("TRDP_DNR_MODE") {
            config.dnr_mode = if v.eq_ignore_ascii_case("dedicated") {
                DnrMode::DedicatedThread
            } else {
                DnrMode::CommonThread
            };
        }
        if let Some(v) = env_millis("TRDP_URI_CACHE_TTL_MS") {
            config.cache.ttl = v;
        }
        if let Some(v) = env_u64("TRDP_URI_CACHE_ENTRIES") {
            config.cache.capacity = v as usize;
        }
        if let Some(v) = env_bool("TRDP_DISABLE_URI_CACHE") {
            config.cache.enable = !v;
        }
        if let Some(v) = env_bool("TRDP_ENABLE_ECSP") {
            config.ecsp.enable = v;
        }
        if let Some(v) = env_millis("TRDP_ECSP_POLL_INTERVAL_MS") {
            config.ecsp.poll_interval = v;
        }
        if let Some(v) = env_millis("TRDP_ECSP_CONFIRM_TIMEOUT_MS") {
            config.ecsp.confirm_timeout = v;
        }
        if let Some(v) = env_millis("TRDP_IDLE_INTERVAL_MS") {
            config.idle_interval = v;
        }

        config
    }

    /// Whether `other` differs in any field that a running engine
    /// reapplies without a restart.
    pub fn differs_from(&self, other: &Self) -> bool {
        self.rx_interface != other.rx_interface
            || self.tx_interface != other.tx_interface
            || self.hosts_file != other.hosts_file
            || self.enable_dnr != other.enable_dnr
            || self.dnr_mode != other.dnr_mode
            || self.cache != other.cache
            || self.ecsp != other.ecsp
            || self.idle_interval != other.idle_interval
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|v| {
        matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|v| v.trim().parse::<u64>().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_u64(key).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrdpConfig::default();
        assert_eq!(config.idle_interval, Duration::from_millis(50));
        assert_eq!(config.cache.ttl, Duration::from_secs(30));
        assert_eq!(config.cache.capacity, 128);
        assert!(config.cache.enable);
        assert!(!config.ecsp.enable);
    }

    #[test]
    fn test_differs_from_tracks_reapply_fields() {
        let base = TrdpConfig::default();
        assert!(!base.differs_from(&base.clone()));

        let mut changed = base.clone();
        changed.cache.ttl = Duration::from_secs(60);
        assert!(base.differs_from(&changed));

        let mut changed = base.clone();
        changed.idle_interval = Duration::from_millis(20);
        assert!(base.differs_from(&changed));

        // The XML path is consumed only at bootstrap and is not a
        // reapply field.
        let mut changed = base.clone();
        changed.xml_path = "elsewhere.xml".to_string();
        assert!(!base.differs_from(&changed));
    }
}
