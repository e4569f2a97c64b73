// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Expiring caches for DNR lookups.
//!
//! Three caches back the engine's host-resolution helpers: URI to IP,
//! IP to URI, and label to the `(consist, vehicle, opConsist)` triple.
//! Entries carry an absolute expiry deadline; every trim pass purges
//! expired entries first and then enforces the capacity bound by
//! evicting the lowest-ordered keys (a simple cap, not LRU).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::config::CacheConfig;

/// Structural identifiers resolved from a vehicle label.
pub type LabelIds = (u32, u32, u32);

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    expires_at: Instant,
    value: T,
}

/// The three DNR caches.
#[derive(Default)]
pub(crate) struct DnrCaches {
    uri: BTreeMap<String, CacheEntry<Ipv4Addr>>,
    ip: BTreeMap<Ipv4Addr, CacheEntry<String>>,
    label: BTreeMap<String, CacheEntry<LabelIds>>,
}

fn purge_expired<K: Ord, T>(cache: &mut BTreeMap<K, CacheEntry<T>>, now: Instant) {
    cache.retain(|_, entry| now < entry.expires_at);
}

fn enforce_capacity<K: Ord + Clone, T>(cache: &mut BTreeMap<K, CacheEntry<T>>, capacity: usize) {
    while cache.len() > capacity {
        let Some(first) = cache.keys().next().cloned() else {
            break;
        };
        cache.remove(&first);
    }
}

fn fetch<K: Ord, T: Clone>(
    cache: &BTreeMap<K, CacheEntry<T>>,
    key: &K,
    now: Instant,
) -> Option<T> {
    let entry = cache.get(key)?;
    if now >= entry.expires_at {
        return None;
    }
    Some(entry.value.clone())
}

impl DnrCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Purge expired entries and enforce the capacity bound. A disabled
    /// cache configuration empties everything.
    pub fn trim(&mut self, config: &CacheConfig, now: Instant) {
        if !config.enable {
            self.clear();
            return;
        }
        purge_expired(&mut self.uri, now);
        purge_expired(&mut self.ip, now);
        purge_expired(&mut self.label, now);
        enforce_capacity(&mut self.uri, config.capacity);
        enforce_capacity(&mut self.ip, config.capacity);
        enforce_capacity(&mut self.label, config.capacity);
    }

    pub fn clear(&mut self) {
        self.uri.clear();
        self.ip.clear();
        self.label.clear();
    }

    fn expiry(config: &CacheConfig, now: Instant) -> Instant {
        // A zero TTL produces an already-expired entry.
        now + config.ttl
    }

    pub fn get_uri(&self, uri: &str, now: Instant) -> Option<Ipv4Addr> {
        fetch(&self.uri, &uri.to_string(), now)
    }

    pub fn put_uri(&mut self, config: &CacheConfig, uri: &str, ip: Ipv4Addr, now: Instant) {
        self.uri.insert(
            uri.to_string(),
            CacheEntry {
                expires_at: Self::expiry(config, now),
                value: ip,
            },
        );
        enforce_capacity(&mut self.uri, config.capacity);
    }

    pub fn get_ip(&self, ip: Ipv4Addr, now: Instant) -> Option<String> {
        fetch(&self.ip, &ip, now)
    }

    pub fn put_ip(&mut self, config: &CacheConfig, ip: Ipv4Addr, uri: String, now: Instant) {
        self.ip.insert(
            ip,
            CacheEntry {
                expires_at: Self::expiry(config, now),
                value: uri,
            },
        );
        enforce_capacity(&mut self.ip, config.capacity);
    }

    pub fn get_label(&self, label: &str, now: Instant) -> Option<LabelIds> {
        fetch(&self.label, &label.to_string(), now)
    }

    pub fn put_label(&mut self, config: &CacheConfig, label: &str, ids: LabelIds, now: Instant) {
        self.label.insert(
            label.to_string(),
            CacheEntry {
                expires_at: Self::expiry(config, now),
                value: ids,
            },
        );
        enforce_capacity(&mut self.label, config.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(ttl_ms: u64, capacity: usize) -> CacheConfig {
        CacheConfig {
            enable: true,
            ttl: Duration::from_millis(ttl_ms),
            capacity,
        }
    }

    #[test]
    fn test_hit_until_expiry() {
        let mut caches = DnrCaches::new();
        let cfg = config(100, 8);
        let now = Instant::now();
        let ip = Ipv4Addr::new(10, 0, 0, 1);

        caches.put_uri(&cfg, "dev1.car1", ip, now);
        assert_eq!(caches.get_uri("dev1.car1", now), Some(ip));
        assert_eq!(
            caches.get_uri("dev1.car1", now + Duration::from_millis(99)),
            Some(ip)
        );
        assert_eq!(
            caches.get_uri("dev1.car1", now + Duration::from_millis(100)),
            None
        );
    }

    #[test]
    fn test_trim_purges_expired() {
        let mut caches = DnrCaches::new();
        let cfg = config(50, 8);
        let now = Instant::now();

        caches.put_ip(&cfg, Ipv4Addr::new(10, 0, 0, 1), "dev1".into(), now);
        caches.trim(&cfg, now + Duration::from_millis(60));
        assert_eq!(
            caches.get_ip(Ipv4Addr::new(10, 0, 0, 1), now + Duration::from_millis(60)),
            None
        );
    }

    #[test]
    fn test_capacity_evicts_lowest_key() {
        let mut caches = DnrCaches::new();
        let cfg = config(10_000, 2);
        let now = Instant::now();
        let ip = Ipv4Addr::new(10, 0, 0, 1);

        caches.put_uri(&cfg, "b", ip, now);
        caches.put_uri(&cfg, "a", ip, now);
        caches.put_uri(&cfg, "c", ip, now);

        // "a" is the lowest ordered key and goes first, regardless of use.
        assert_eq!(caches.get_uri("a", now), None);
        assert_eq!(caches.get_uri("b", now), Some(ip));
        assert_eq!(caches.get_uri("c", now), Some(ip));
    }

    #[test]
    fn test_disabled_config_clears_all() {
        let mut caches = DnrCaches::new();
        let mut cfg = config(10_000, 8);
        let now = Instant::now();
        caches.put_label(&cfg, "car1", (1, 2, 3), now);

        cfg.enable = false;
        caches.trim(&cfg, now);
        assert_eq!(caches.get_label("car1", now), None);
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let mut caches = DnrCaches::new();
        let cfg = config(0, 8);
        let now = Instant::now();
        caches.put_uri(&cfg, "x", Ipv4Addr::LOCALHOST, now);
        assert_eq!(caches.get_uri("x", now), None);
    }
}
