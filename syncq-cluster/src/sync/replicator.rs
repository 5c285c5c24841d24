//! Remote record replication: full fetch on activation, then the paged change feed

use chrono::{DateTime, Utc};
use std::sync::Arc;
use syncq_core::codec::{decode_details, decode_now_playing, DETAILS_RECORD, NOW_PLAYING_RECORD};
use syncq_core::models::{now_millis, QueueEntry, RecordName, SyncStatus};
use syncq_core::QueueEntryCodec;
use tracing::{debug, info, warn};

use super::changes::RecordChange;
use super::events::{publish, EngineEvent, EventSender};
use super::room::{ChangeEffect, RoomHandle};
use crate::transport::{RecordQuery, RecordStore};
use crate::{Error, Result};

/// Result of one fetch attempt
#[derive(Debug)]
pub enum FetchOutcome {
    /// Another fetch for the room was still running
    Skipped,
    Completed {
        effects: Vec<ChangeEffect>,
        pages: usize,
    },
}

impl FetchOutcome {
    #[must_use]
    pub fn into_effects(self) -> Vec<ChangeEffect> {
        match self {
            Self::Skipped => Vec::new(),
            Self::Completed { effects, .. } => effects,
        }
    }
}

pub struct RecordReplicator {
    store: Arc<dyn RecordStore>,
    codec: QueueEntryCodec,
    events: EventSender,
    lookback: chrono::Duration,
}

impl RecordReplicator {
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        codec: QueueEntryCodec,
        events: EventSender,
        lookback: chrono::Duration,
    ) -> Self {
        Self {
            store,
            codec,
            events,
            lookback,
        }
    }

    #[must_use]
    pub const fn codec(&self) -> &QueueEntryCodec {
        &self.codec
    }

    fn set_status(&self, room: &RoomHandle, status: SyncStatus) {
        if room.status() == status {
            return;
        }
        room.set_status(status);
        publish(
            &self.events,
            EngineEvent::SyncStatusChanged {
                room_id: room.id().clone(),
                status,
                timestamp: Utc::now(),
            },
        );
    }

    /// Initial load of a room. Either every matched entry merges in one batch
    /// or the queue is left untouched and the room is marked failed.
    pub async fn full_fetch(&self, room: &RoomHandle) -> Result<FetchOutcome> {
        let Some(_guard) = room.try_begin_fetch() else {
            debug!(room_id = %room.id(), "Fetch in flight, skipping full fetch");
            return Ok(FetchOutcome::Skipped);
        };
        self.set_status(room, SyncStatus::InProgress);

        let activated_at = now_millis();
        match self.load_snapshot(room, activated_at).await {
            Ok((entries, extras)) => {
                let added = room.merge_initial(entries, activated_at);
                let mut effects: Vec<ChangeEffect> =
                    extras.into_iter().map(|change| room.apply_change(change)).collect();
                room.set_resume_token(None);
                info!(room_id = %room.id(), entries = added.len(), "Full fetch complete");
                effects.extend(added.into_iter().map(|entry| ChangeEffect::Accepted {
                    entry,
                    forward: false,
                    expiry: None,
                    limits_changed: false,
                }));
                self.set_status(room, SyncStatus::Success);
                Ok(FetchOutcome::Completed { effects, pages: 1 })
            }
            Err(e) => {
                warn!(room_id = %room.id(), error = %e, "Full fetch failed");
                self.set_status(room, SyncStatus::Failure);
                Err(e)
            }
        }
    }

    /// Queue entries newer than the watermark plus the room's current
    /// details and now-playing, all decoded before anything is applied
    async fn load_snapshot(
        &self,
        room: &RoomHandle,
        activated_at: DateTime<Utc>,
    ) -> Result<(Vec<QueueEntry>, Vec<RecordChange>)> {
        let watermark = activated_at.checked_sub_signed(self.lookback);
        let records = self
            .store
            .query_records(room.id(), RecordQuery::queue_songs_since(watermark))
            .await?;
        let entries = records
            .iter()
            .map(|record| self.codec.from_record(record).map_err(Error::from))
            .collect::<Result<Vec<_>>>()?;

        let mut extras = Vec::new();
        if let Some(record) = self
            .store
            .fetch_record(room.id(), &RecordName::from(DETAILS_RECORD))
            .await?
        {
            extras.push(RecordChange::DetailsChanged(decode_details(&record)?));
        }
        if let Some(record) = self
            .store
            .fetch_record(room.id(), &RecordName::from(NOW_PLAYING_RECORD))
            .await?
        {
            extras.push(RecordChange::NowPlayingChanged(decode_now_playing(&record)?));
        }
        Ok((entries, extras))
    }

    /// Drain the change feed from the stored token. The token advances after
    /// every page; a failing page leaves it where the last good page put it.
    pub async fn incremental_fetch(&self, room: &RoomHandle) -> Result<FetchOutcome> {
        let Some(_guard) = room.try_begin_fetch() else {
            debug!(room_id = %room.id(), "Fetch in flight, skipping poll");
            return Ok(FetchOutcome::Skipped);
        };
        self.set_status(room, SyncStatus::InProgress);

        let mut effects = Vec::new();
        let mut pages = 0;
        let mut malformed = 0usize;
        loop {
            if room.is_closed() {
                break;
            }
            let page = match self.store.fetch_changes(room.id(), room.resume_token()).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(room_id = %room.id(), page = pages + 1, error = %e, "Change fetch failed");
                    self.set_status(room, SyncStatus::Failure);
                    return Err(e);
                }
            };
            pages += 1;

            for record in &page.records {
                match RecordChange::decode(record, &self.codec) {
                    Ok(change) => effects.push(room.apply_change(change)),
                    Err(e) => {
                        malformed += 1;
                        warn!(
                            room_id = %room.id(),
                            record = %record.name,
                            error = %e,
                            "Skipping malformed record"
                        );
                    }
                }
            }
            room.set_resume_token(Some(page.token));

            if !page.more_coming {
                break;
            }
        }

        debug!(room_id = %room.id(), pages, changes = effects.len(), "Incremental fetch complete");
        let status = if malformed == 0 {
            SyncStatus::Success
        } else {
            SyncStatus::Failure
        };
        self.set_status(room, status);
        Ok(FetchOutcome::Completed { effects, pages })
    }

    /// Fetch one record named by a push, out of band of the change feed
    pub async fn fetch_notified(
        &self,
        room: &RoomHandle,
        name: &RecordName,
    ) -> Result<Option<ChangeEffect>> {
        let Some(record) = self.store.fetch_record(room.id(), name).await? else {
            debug!(room_id = %room.id(), record = %name, "Notified record is gone");
            return Ok(None);
        };
        let change = RecordChange::decode(&record, &self.codec)?;
        Ok(Some(room.apply_change(change)))
    }
}
