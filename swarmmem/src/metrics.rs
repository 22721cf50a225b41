//! Facade-level counters, merged with the ACL enforcer's and the store's
//! own stats into a single snapshot on demand.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct AtomicCounters {
    pub gets: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub acl_denials: AtomicU64,
    pub key_rotations: AtomicU64,
    pub ttl_sweeps: AtomicU64,
    pub entries_swept: AtomicU64,
}

impl AtomicCounters {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            acl_denials: self.acl_denials.load(Ordering::Relaxed),
            key_rotations: self.key_rotations.load(Ordering::Relaxed),
            ttl_sweeps: self.ttl_sweeps.load(Ordering::Relaxed),
            entries_swept: self.entries_swept.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}

/// A point-in-time read of facade, ACL, and store counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub gets: u64,
    pub sets: u64,
    pub deletes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub acl_evaluations: u64,
    pub acl_denials: u64,
    pub acl_cache_hits: u64,
    pub acl_cache_misses: u64,
    pub key_rotations: u64,
    pub ttl_sweeps: u64,
    pub entries_swept: u64,
    pub entry_count: u64,
    pub total_bytes: u64,
    pub expired_pending_sweep: u64,
}
