//! Contracts of the external collaborators the engine talks to

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use syncq_core::models::{
    PeerId, QueueEntry, Record, RecordKind, RecordName, ResumeToken, RoomId, StoreScope,
};

use crate::Result;

/// Local ad-hoc broadcast session: ordered, reliable delivery to connected peers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    async fn send(&self, peers: Vec<PeerId>, payload: Bytes) -> Result<()>;
}

/// Query over one zone's records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub kind: RecordKind,
    /// Only queue entries whose `timeAdded` is strictly newer
    pub newer_than: Option<DateTime<Utc>>,
}

impl RecordQuery {
    #[must_use]
    pub const fn queue_songs_since(newer_than: Option<DateTime<Utc>>) -> Self {
        Self {
            kind: RecordKind::QueueSong,
            newer_than,
        }
    }
}

/// One page of a zone's change feed
#[derive(Debug, Clone)]
pub struct ChangePage {
    pub records: Vec<Record>,
    pub token: ResumeToken,
    pub more_coming: bool,
}

/// Durable per-room record store with an incremental change feed
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_zone(&self, zone: &RoomId) -> Result<()>;

    async fn delete_zone(&self, zone: &RoomId) -> Result<()>;

    async fn list_zones(&self, scope: StoreScope) -> Result<Vec<RoomId>>;

    /// Create or replace a record. Asset files must stay readable until this returns.
    async fn save_record(&self, record: Record) -> Result<()>;

    async fn fetch_record(&self, zone: &RoomId, name: &RecordName) -> Result<Option<Record>>;

    /// Matching records, newest `timeAdded` first
    async fn query_records(&self, zone: &RoomId, query: RecordQuery) -> Result<Vec<Record>>;

    /// Standing subscription that pushes a notification whenever a record of
    /// `kind` is created in the zone
    async fn create_subscription(&self, zone: &RoomId, kind: RecordKind) -> Result<()>;

    /// Changes since `token`; `None` means since the zone was created
    async fn fetch_changes(&self, zone: &RoomId, token: Option<ResumeToken>) -> Result<ChangePage>;
}

/// Host-side playback collaborator receiving accepted queue entries
#[cfg_attr(test, mockall::automock)]
pub trait PlaybackSink: Send + Sync {
    fn enqueue(&self, room_id: &RoomId, entry: &QueueEntry);
}
