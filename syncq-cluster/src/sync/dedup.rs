//! Push notification deduplication
//!
//! The store may deliver the same creation push more than once, and a push can
//! race the poller that already saw the record. Remembering recently handled
//! records for a short window avoids redundant out-of-band fetches.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use syncq_core::models::{RecordName, RoomId};
use tokio_util::sync::CancellationToken;

use super::notification::PushPayload;

/// Deduplication key for pushes
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct DedupKey {
    pub zone: RoomId,
    pub record: RecordName,
}

impl DedupKey {
    #[must_use]
    pub fn from_payload(payload: &PushPayload) -> Self {
        Self {
            zone: payload.zone.clone(),
            record: payload.record.clone(),
        }
    }
}

/// Deduplicator with periodic cleanup of expired keys
#[derive(Clone)]
pub struct NotificationDeduplicator {
    /// Key -> time the key stops suppressing
    entries: Arc<DashMap<DedupKey, Instant>>,
    dedup_window: Duration,
    cleanup_interval: Duration,
}

impl NotificationDeduplicator {
    /// Create a deduplicator and start its cleanup task, which stops with `cancel`
    #[must_use]
    pub fn new(dedup_window: Duration, cleanup_interval: Duration, cancel: CancellationToken) -> Self {
        let dedup = Self {
            entries: Arc::new(DashMap::new()),
            dedup_window,
            cleanup_interval,
        };

        let dedup_clone = dedup.clone();
        tokio::spawn(async move {
            dedup_clone.run_cleanup(cancel).await;
        });

        dedup
    }

    /// Check whether a push should be handled, remembering it if so
    #[must_use]
    pub fn should_process(&self, key: &DedupKey) -> bool {
        let now = Instant::now();
        let mut fresh = true;
        self.entries
            .entry(key.clone())
            .and_modify(|expires_at| {
                if *expires_at > now {
                    fresh = false;
                } else {
                    *expires_at = now + self.dedup_window;
                }
            })
            .or_insert(now + self.dedup_window);
        fresh
    }

    async fn run_cleanup(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.cleanup_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => self.cleanup_expired(),
            }
        }
    }

    fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_key, expires_at| *expires_at > now);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything seen so far
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(record: &str) -> DedupKey {
        DedupKey {
            zone: RoomId::from("zone"),
            record: RecordName::from(record),
        }
    }

    #[tokio::test]
    async fn test_repeat_push_suppressed_within_window() {
        let cancel = CancellationToken::new();
        let dedup = NotificationDeduplicator::new(
            Duration::from_secs(5),
            Duration::from_secs(30),
            cancel.clone(),
        );

        assert!(dedup.should_process(&key("a")));
        assert!(!dedup.should_process(&key("a")));
        assert!(dedup.should_process(&key("b")));
        assert_eq!(dedup.len(), 2);

        dedup.clear();
        assert!(dedup.should_process(&key("a")));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_expired_key_is_processed_again() {
        let cancel = CancellationToken::new();
        let dedup = NotificationDeduplicator::new(Duration::ZERO, Duration::from_secs(30), cancel.clone());

        assert!(dedup.should_process(&key("a")));
        assert!(dedup.should_process(&key("a")));
        dedup.cleanup_expired();
        assert!(dedup.is_empty());
        cancel.cancel();
    }
}
