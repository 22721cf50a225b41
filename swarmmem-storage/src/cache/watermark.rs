//! Watermark and change journal for cache invalidation.
//!
//! The change journal tracks mutations to memory entries, allowing the
//! cache to determine if cached data might be stale. Watermarks represent a
//! point in a swarm's mutation history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use swarmmem_core::{SwarmId, SwarmMemResult};

/// A watermark representing a point in the change journal.
///
/// Watermarks are monotonically increasing and can be compared to determine
/// if mutations have occurred between two points in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    /// Monotonically increasing sequence number.
    /// Each mutation increments this value.
    pub sequence: i64,
    /// When this watermark was observed.
    pub observed_at: DateTime<Utc>,
}

impl Watermark {
    /// Create a new watermark with the given sequence number.
    pub fn new(sequence: i64) -> Self {
        Self {
            sequence,
            observed_at: Utc::now(),
        }
    }

    /// Create a new watermark with explicit observed_at timestamp.
    pub fn with_timestamp(sequence: i64, observed_at: DateTime<Utc>) -> Self {
        Self {
            sequence,
            observed_at,
        }
    }

    /// Create a zero watermark (beginning of time).
    pub fn zero() -> Self {
        Self {
            sequence: 0,
            observed_at: DateTime::UNIX_EPOCH.into(),
        }
    }

    /// Check if this watermark is newer than another.
    pub fn is_newer_than(&self, other: &Watermark) -> bool {
        self.sequence > other.sequence
    }

    /// Check if this watermark is at least as fresh as another.
    pub fn is_at_least(&self, other: &Watermark) -> bool {
        self.sequence >= other.sequence
    }

    /// Calculate the sequence gap between two watermarks.
    pub fn gap(&self, other: &Watermark) -> i64 {
        (self.sequence - other.sequence).abs()
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::zero()
    }
}

/// Change journal for tracking mutations and cache invalidation.
///
/// The change journal maintains a per-swarm log of memory-entry mutations,
/// allowing the cache to determine if data has changed since it was cached.
#[async_trait]
pub trait ChangeJournal: Send + Sync {
    /// Get the current watermark for a swarm.
    async fn current_watermark(&self, swarm_id: SwarmId) -> SwarmMemResult<Watermark>;

    /// Get the watermark at a specific point in time. Returns `Watermark::zero()`
    /// if the swarm has no recorded history yet.
    async fn watermark_at(
        &self,
        swarm_id: SwarmId,
        at: DateTime<Utc>,
    ) -> SwarmMemResult<Option<Watermark>>;

    /// Check if any changes have occurred in the swarm since the given watermark.
    async fn changes_since(&self, swarm_id: SwarmId, watermark: &Watermark) -> SwarmMemResult<bool>;

    /// Record a mutation in the journal. Called on every entry put/delete.
    async fn record_change(&self, swarm_id: SwarmId) -> SwarmMemResult<Watermark>;

    /// Prune log entries older than `before`. Returns the count removed.
    async fn prune(&self, swarm_id: SwarmId, before: DateTime<Utc>) -> SwarmMemResult<u64>;
}

/// In-memory change journal, the default journal for a single-process
/// deployment and the fixture used by cache tests.
#[derive(Debug, Default)]
pub struct InMemoryChangeJournal {
    changes: std::sync::RwLock<std::collections::HashMap<SwarmId, SwarmChanges>>,
}

#[derive(Debug, Default)]
struct SwarmChanges {
    sequence: i64,
    log: Vec<ChangeEntry>,
}

#[derive(Debug, Clone)]
struct ChangeEntry {
    sequence: i64,
    timestamp: DateTime<Utc>,
}

impl InMemoryChangeJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChangeJournal for InMemoryChangeJournal {
    async fn current_watermark(&self, swarm_id: SwarmId) -> SwarmMemResult<Watermark> {
        let changes = self.changes.read().unwrap();
        let sequence = changes.get(&swarm_id).map(|c| c.sequence).unwrap_or(0);
        Ok(Watermark::new(sequence))
    }

    async fn watermark_at(
        &self,
        swarm_id: SwarmId,
        at: DateTime<Utc>,
    ) -> SwarmMemResult<Option<Watermark>> {
        let changes = self.changes.read().unwrap();
        if let Some(swarm_changes) = changes.get(&swarm_id) {
            let sequence = swarm_changes
                .log
                .iter()
                .rev()
                .find(|e| e.timestamp <= at)
                .map(|e| e.sequence)
                .unwrap_or(0);
            Ok(Some(Watermark::with_timestamp(sequence, at)))
        } else {
            Ok(Some(Watermark::zero()))
        }
    }

    async fn changes_since(&self, swarm_id: SwarmId, watermark: &Watermark) -> SwarmMemResult<bool> {
        let changes = self.changes.read().unwrap();
        Ok(changes
            .get(&swarm_id)
            .map(|c| c.log.iter().any(|e| e.sequence > watermark.sequence))
            .unwrap_or(false))
    }

    async fn record_change(&self, swarm_id: SwarmId) -> SwarmMemResult<Watermark> {
        let mut changes = self.changes.write().unwrap();
        let swarm_changes = changes.entry(swarm_id).or_default();

        swarm_changes.sequence += 1;
        swarm_changes.log.push(ChangeEntry {
            sequence: swarm_changes.sequence,
            timestamp: Utc::now(),
        });

        Ok(Watermark::new(swarm_changes.sequence))
    }

    async fn prune(&self, swarm_id: SwarmId, before: DateTime<Utc>) -> SwarmMemResult<u64> {
        let mut changes = self.changes.write().unwrap();
        if let Some(swarm_changes) = changes.get_mut(&swarm_id) {
            let before_len = swarm_changes.log.len();
            swarm_changes.log.retain(|e| e.timestamp >= before);
            Ok((before_len - swarm_changes.log.len()) as u64)
        } else {
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmmem_core::EntityIdType;

    #[test]
    fn test_watermark_ordering() {
        let w1 = Watermark::new(1);
        let w2 = Watermark::new(2);
        let w3 = Watermark::new(2);

        assert!(w2.is_newer_than(&w1));
        assert!(!w1.is_newer_than(&w2));
        assert!(!w2.is_newer_than(&w3));

        assert!(w2.is_at_least(&w1));
        assert!(w2.is_at_least(&w3));
        assert!(!w1.is_at_least(&w2));
    }

    #[test]
    fn test_watermark_gap() {
        let w1 = Watermark::new(10);
        let w2 = Watermark::new(15);

        assert_eq!(w1.gap(&w2), 5);
        assert_eq!(w2.gap(&w1), 5);
    }

    #[tokio::test]
    async fn test_in_memory_journal() {
        let journal = InMemoryChangeJournal::new();
        let swarm_id = SwarmId::now_v7();

        let w0 = journal.current_watermark(swarm_id).await.unwrap();
        assert_eq!(w0.sequence, 0);

        let w1 = journal.record_change(swarm_id).await.unwrap();
        assert_eq!(w1.sequence, 1);

        assert!(journal.changes_since(swarm_id, &w0).await.unwrap());
        assert!(!journal.changes_since(swarm_id, &w1).await.unwrap());
    }

    #[tokio::test]
    async fn test_journal_swarm_isolation() {
        let journal = InMemoryChangeJournal::new();
        let swarm_a = SwarmId::now_v7();
        let swarm_b = SwarmId::now_v7();

        let w0_a = journal.current_watermark(swarm_a).await.unwrap();
        let w0_b = journal.current_watermark(swarm_b).await.unwrap();

        journal.record_change(swarm_a).await.unwrap();

        assert!(journal.changes_since(swarm_a, &w0_a).await.unwrap());
        assert!(!journal.changes_since(swarm_b, &w0_b).await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_removes_old_entries() {
        let journal = InMemoryChangeJournal::new();
        let swarm_id = SwarmId::now_v7();
        journal.record_change(swarm_id).await.unwrap();

        let future = Utc::now() + chrono::Duration::seconds(1);
        let pruned = journal.prune(swarm_id, future).await.unwrap();
        assert_eq!(pruned, 1);
    }
}
