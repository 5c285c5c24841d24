//! In-process record store
//!
//! Implements the full [`RecordStore`] contract, including a paged change
//! feed with monotonically increasing resume tokens. Useful for local
//! development and as the reference store in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use syncq_core::codec::{fields, is_newer_than};
use syncq_core::models::{
    Asset, Record, RecordKind, RecordName, RecordValue, ResumeToken, RoomId, StoreScope,
};
use tracing::debug;

use crate::transport::{ChangePage, RecordQuery, RecordStore};
use crate::{Error, Result};

#[derive(Default)]
struct Zone {
    records: HashMap<RecordName, Record>,
    /// Sequence number of the latest write per record
    latest: HashMap<RecordName, u64>,
    subscriptions: Vec<RecordKind>,
}

#[derive(Default)]
struct StoreInner {
    zones: BTreeMap<RoomId, Zone>,
    next_seq: u64,
}

pub struct MemoryRecordStore {
    inner: Mutex<StoreInner>,
    page_size: usize,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    /// Limit how many changed records one feed page returns
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            page_size: page_size.max(1),
        }
    }

    /// Record kinds the zone has standing subscriptions for
    #[must_use]
    pub fn subscriptions(&self, zone: &RoomId) -> Vec<RecordKind> {
        self.inner
            .lock()
            .zones
            .get(zone)
            .map(|z| z.subscriptions.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn record_count(&self, zone: &RoomId) -> usize {
        self.inner
            .lock()
            .zones
            .get(zone)
            .map_or(0, |z| z.records.len())
    }

    fn encode_token(seq: u64) -> ResumeToken {
        ResumeToken(seq.to_be_bytes().to_vec())
    }

    fn decode_token(token: &ResumeToken) -> Result<u64> {
        let bytes: [u8; 8] = token
            .0
            .as_slice()
            .try_into()
            .map_err(|_| Error::Transport("unrecognized resume token".to_string()))?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Uploading reads staged asset files into the stored record
    fn materialize_assets(mut record: Record) -> Result<Record> {
        for value in record.fields.values_mut() {
            if let RecordValue::Asset(asset @ Asset::File(_)) = value {
                let data = asset
                    .read()
                    .map_err(|e| Error::Transport(format!("asset upload failed: {e}")))?;
                *asset = Asset::Data(data);
            }
        }
        Ok(record)
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn zone_not_found(zone: &RoomId) -> Error {
    Error::NotFound(format!("zone `{zone}`"))
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_zone(&self, zone: &RoomId) -> Result<()> {
        self.inner.lock().zones.entry(zone.clone()).or_default();
        debug!(zone = %zone, "Zone created");
        Ok(())
    }

    async fn delete_zone(&self, zone: &RoomId) -> Result<()> {
        self.inner
            .lock()
            .zones
            .remove(zone)
            .map(|_| ())
            .ok_or_else(|| zone_not_found(zone))
    }

    async fn list_zones(&self, scope: StoreScope) -> Result<Vec<RoomId>> {
        let inner = self.inner.lock();
        let zones = inner
            .zones
            .iter()
            .filter(|(_, zone)| match scope {
                StoreScope::Private => true,
                StoreScope::Shared => zone
                    .records
                    .values()
                    .any(|r| r.kind() == Some(RecordKind::Share)),
            })
            .map(|(id, _)| id.clone())
            .collect();
        Ok(zones)
    }

    async fn save_record(&self, record: Record) -> Result<()> {
        let record = Self::materialize_assets(record)?;
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        let zone = inner
            .zones
            .get_mut(&record.zone)
            .ok_or_else(|| zone_not_found(&record.zone))?;
        zone.latest.insert(record.name.clone(), seq);
        zone.records.insert(record.name.clone(), record);
        Ok(())
    }

    async fn fetch_record(&self, zone: &RoomId, name: &RecordName) -> Result<Option<Record>> {
        let inner = self.inner.lock();
        let zone = inner.zones.get(zone).ok_or_else(|| zone_not_found(zone))?;
        Ok(zone.records.get(name).cloned())
    }

    async fn query_records(&self, zone: &RoomId, query: RecordQuery) -> Result<Vec<Record>> {
        let inner = self.inner.lock();
        let zone = inner.zones.get(zone).ok_or_else(|| zone_not_found(zone))?;

        let mut matched: Vec<(Option<chrono::DateTime<chrono::Utc>>, Record)> = zone
            .records
            .values()
            .filter(|r| r.kind() == Some(query.kind))
            .map(|r| (r.get_timestamp(fields::TIME_ADDED).ok(), r.clone()))
            .filter(|(added, _)| match added {
                Some(added) => is_newer_than(*added, query.newer_than),
                None => query.newer_than.is_none(),
            })
            .collect();
        matched.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(matched.into_iter().map(|(_, r)| r).collect())
    }

    async fn create_subscription(&self, zone: &RoomId, kind: RecordKind) -> Result<()> {
        let mut inner = self.inner.lock();
        let zone = inner.zones.get_mut(zone).ok_or_else(|| zone_not_found(zone))?;
        if !zone.subscriptions.contains(&kind) {
            zone.subscriptions.push(kind);
        }
        Ok(())
    }

    async fn fetch_changes(&self, zone: &RoomId, token: Option<ResumeToken>) -> Result<ChangePage> {
        let since = token.as_ref().map(Self::decode_token).transpose()?.unwrap_or(0);
        let inner = self.inner.lock();
        let zone = inner.zones.get(zone).ok_or_else(|| zone_not_found(zone))?;

        let mut changed: Vec<(u64, &RecordName)> = zone
            .latest
            .iter()
            .filter(|(_, seq)| **seq > since)
            .map(|(name, seq)| (*seq, name))
            .collect();
        changed.sort_by_key(|(seq, _)| *seq);

        let more_coming = changed.len() > self.page_size;
        changed.truncate(self.page_size);

        let last = changed.last().map_or(since, |(seq, _)| *seq);
        let records = changed
            .into_iter()
            .filter_map(|(_, name)| zone.records.get(name).cloned())
            .collect();

        Ok(ChangePage {
            records,
            token: Self::encode_token(last),
            more_coming,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncq_core::models::RecordName;

    fn record(zone: &RoomId, name: &str) -> Record {
        Record::new(zone.clone(), RecordName::from(name), RecordKind::RoomDetails)
    }

    #[tokio::test]
    async fn test_change_feed_pages_and_tokens() {
        let store = MemoryRecordStore::with_page_size(2);
        let zone = RoomId::from("zone");
        store.create_zone(&zone).await.unwrap();
        for name in ["a", "b", "c"] {
            store.save_record(record(&zone, name)).await.unwrap();
        }

        let first = store.fetch_changes(&zone, None).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert!(first.more_coming);

        let second = store
            .fetch_changes(&zone, Some(first.token.clone()))
            .await
            .unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(!second.more_coming);

        let idle = store
            .fetch_changes(&zone, Some(second.token.clone()))
            .await
            .unwrap();
        assert!(idle.records.is_empty());
        assert_eq!(idle.token, second.token);
    }

    #[tokio::test]
    async fn test_rewritten_record_reported_once() {
        let store = MemoryRecordStore::new();
        let zone = RoomId::from("zone");
        store.create_zone(&zone).await.unwrap();
        store.save_record(record(&zone, "a")).await.unwrap();
        store.save_record(record(&zone, "a")).await.unwrap();

        let page = store.fetch_changes(&zone, None).await.unwrap();
        assert_eq!(page.records.len(), 1);
    }

    #[tokio::test]
    async fn test_queue_query_honours_watermark() {
        use syncq_core::config::ThumbnailConfig;
        use syncq_core::models::{PlayType, QueueEntry, SongRef};
        use syncq_core::QueueEntryCodec;

        let store = MemoryRecordStore::new();
        let zone = RoomId::from("zone");
        store.create_zone(&zone).await.unwrap();
        let codec = QueueEntryCodec::new(ThumbnailConfig::default());
        for (song, millis) in [("old", 1_000), ("edge", 2_000), ("new", 3_000)] {
            let entry = QueueEntry::new(SongRef::from(song), song, PlayType::Later, "guest")
                .with_time_added(chrono::DateTime::from_timestamp_millis(millis).unwrap());
            store.save_record(codec.to_record(&zone, &entry).record).await.unwrap();
        }
        store.save_record(record(&zone, "details")).await.unwrap();

        let all = store
            .query_records(&zone, RecordQuery::queue_songs_since(None))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let newer = store
            .query_records(
                &zone,
                RecordQuery::queue_songs_since(chrono::DateTime::from_timestamp_millis(2_000)),
            )
            .await
            .unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(codec.from_record(&newer[0]).unwrap().title, "new");
    }

    #[tokio::test]
    async fn test_missing_zone() {
        let store = MemoryRecordStore::new();
        let zone = RoomId::from("ghost");
        assert!(matches!(
            store.save_record(record(&zone, "a")).await,
            Err(Error::NotFound(_))
        ));
        assert!(store.delete_zone(&zone).await.is_err());
    }
}
