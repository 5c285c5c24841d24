//! Room lifecycle: creation, listing, updates and deletion of room zones

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use syncq_core::codec::{
    decode_details, decode_now_playing, decode_sharing, details_record, now_playing_record,
    sharing_record, DETAILS_RECORD, NOW_PLAYING_RECORD, SHARE_RECORD,
};
use syncq_core::models::{
    LimitAction, NowPlaying, RecordKind, RecordName, RecordValue, Room, RoomDetails, RoomId,
    SharingInfo, StoreScope, SyncStatus,
};
use syncq_core::QueueEntryCodec;
use tracing::{debug, info, warn};

use super::room::RoomHandle;
use crate::transport::RecordStore;
use crate::{Error, Result};

/// Marker separating the bracketed parts of a managed zone name
const ZONE_MARKER: &str = "] [";

/// `"<name> [<creation timestamp>] [<random id>]"`
#[must_use]
pub fn zone_name(room_name: &str, created: DateTime<Utc>) -> RoomId {
    RoomId::from(format!(
        "{} [{}] [{}]",
        room_name,
        created.format("%Y-%m-%d %H:%M:%S"),
        nanoid::nanoid!(10)
    ))
}

/// Whether a zone was created by this engine
#[must_use]
pub fn is_managed_zone(zone: &RoomId) -> bool {
    zone.as_str().contains(ZONE_MARKER)
}

/// Everything a new room starts with
#[derive(Debug, Clone)]
pub struct CreateRoomRequest {
    pub details: RoomDetails,
    pub owner: String,
    pub now_playing: Option<NowPlaying>,
}

/// Rooms that loaded, plus the zones that did not
#[derive(Debug, Default)]
pub struct RoomListing {
    pub rooms: Vec<Room>,
    pub failed: Vec<(RoomId, Error)>,
}

impl RoomListing {
    /// Success only when every zone loaded
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        if self.failed.is_empty() {
            SyncStatus::Success
        } else {
            SyncStatus::Failure
        }
    }
}

pub struct RoomLifecycle {
    store: Arc<dyn RecordStore>,
    codec: QueueEntryCodec,
    create_timeout: Duration,
}

impl RoomLifecycle {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, codec: QueueEntryCodec, create_timeout: Duration) -> Self {
        Self {
            store,
            codec,
            create_timeout,
        }
    }

    /// Create the zone and its records in order. The first failing step
    /// aborts the rest without rolling back, and the whole chain is bounded
    /// by the creation timeout.
    pub async fn create_room(&self, request: CreateRoomRequest) -> Result<Room> {
        let zone = zone_name(&request.details.name, Utc::now());
        info!(room_id = %zone, "Creating room");

        match tokio::time::timeout(self.create_timeout, self.create_chain(&zone, &request)).await {
            Ok(Ok(sharing)) => {
                let mut room = Room::new(zone, request.details);
                room.now_playing = request.now_playing;
                room.sharing = Some(sharing);
                room.status = SyncStatus::Success;
                Ok(room)
            }
            Ok(Err(e)) => {
                warn!(room_id = %zone, error = %e, "Room creation failed");
                Err(e)
            }
            Err(_) => {
                warn!(room_id = %zone, timeout = ?self.create_timeout, "Room creation timed out");
                Err(Error::Timeout(format!(
                    "creating room `{zone}` took longer than {:?}",
                    self.create_timeout
                )))
            }
        }
    }

    async fn create_chain(&self, zone: &RoomId, request: &CreateRoomRequest) -> Result<SharingInfo> {
        self.store
            .create_zone(zone)
            .await
            .map_err(|e| e.in_step("create zone"))?;

        self.store
            .save_record(details_record(zone, &request.details))
            .await
            .map_err(|e| e.in_step("save details"))?;

        // The staged artwork file lives until this function returns
        let staged = request
            .now_playing
            .as_ref()
            .and_then(|np| np.artwork.as_deref())
            .and_then(|artwork| self.codec.stage_artwork(artwork));

        if let Some(now_playing) = &request.now_playing {
            self.store
                .save_record(now_playing_record(zone, now_playing, staged.as_ref()))
                .await
                .map_err(|e| e.in_step("save now playing"))?;
        }

        self.store
            .create_subscription(zone, RecordKind::QueueSong)
            .await
            .map_err(|e| e.in_step("create subscription"))?;

        let sharing = SharingInfo::new(request.owner.clone(), request.details.name.clone());
        self.store
            .save_record(sharing_record(zone, &sharing, staged.as_ref()))
            .await
            .map_err(|e| e.in_step("save share"))?;

        debug!(room_id = %zone, "Room records written");
        Ok(sharing)
    }

    /// Load every managed zone's details, now-playing and sharing
    /// concurrently
    pub async fn list_rooms(&self, scope: StoreScope) -> Result<RoomListing> {
        let zones: Vec<RoomId> = self
            .store
            .list_zones(scope)
            .await?
            .into_iter()
            .filter(is_managed_zone)
            .collect();

        let results = join_all(zones.iter().map(|zone| self.load_room(zone))).await;

        let mut listing = RoomListing::default();
        for (zone, result) in zones.into_iter().zip(results) {
            match result {
                Ok(room) => listing.rooms.push(room),
                Err(e) => {
                    warn!(room_id = %zone, error = %e, "Failed to load room");
                    listing.failed.push((zone, e));
                }
            }
        }
        debug!(
            rooms = listing.rooms.len(),
            failed = listing.failed.len(),
            "Room listing complete"
        );
        Ok(listing)
    }

    /// Details are required; now-playing and sharing may be absent
    pub async fn load_room(&self, zone: &RoomId) -> Result<Room> {
        let details_name = RecordName::from(DETAILS_RECORD);
        let now_playing_name = RecordName::from(NOW_PLAYING_RECORD);
        let share_name = RecordName::from(SHARE_RECORD);
        let (details, now_playing, sharing) = futures::try_join!(
            self.store.fetch_record(zone, &details_name),
            self.store.fetch_record(zone, &now_playing_name),
            self.store.fetch_record(zone, &share_name),
        )?;

        let details = details.ok_or_else(|| Error::NotFound(format!("details of `{zone}`")))?;
        let mut room = Room::new(zone.clone(), decode_details(&details)?);
        room.now_playing = now_playing.as_ref().map(decode_now_playing).transpose()?;
        room.sharing = sharing.as_ref().map(decode_sharing).transpose()?;
        room.status = SyncStatus::Success;
        Ok(room)
    }

    pub async fn delete_room(&self, zone: &RoomId) -> Result<()> {
        self.store.delete_zone(zone).await?;
        info!(room_id = %zone, "Room deleted");
        Ok(())
    }

    /// Read the stored details, apply `f`, write them back. Unless `f`
    /// reconfigures a limit, a host's live counters replace the stored ones.
    pub async fn update_details<F>(&self, room: &RoomHandle, f: F) -> Result<RoomDetails>
    where
        F: FnOnce(&mut RoomDetails),
    {
        let stored = self
            .store
            .fetch_record(room.id(), &RecordName::from(DETAILS_RECORD))
            .await?
            .ok_or_else(|| Error::NotFound(format!("details of `{}`", room.id())))?;
        let mut details = decode_details(&stored)?;
        let before = limit_config(&details);
        f(&mut details);
        if room.is_host() && limit_config(&details) == before {
            details.absorb_limits(&room.limits());
        }

        self.store.save_record(details_record(room.id(), &details)).await?;
        room.replace_details(details.clone());
        Ok(details)
    }

    /// Write details exactly as given, without a read
    pub async fn persist_details(&self, zone: &RoomId, details: &RoomDetails) -> Result<()> {
        self.store.save_record(details_record(zone, details)).await
    }

    pub async fn set_active(&self, room: &RoomHandle, active: bool) -> Result<RoomDetails> {
        self.update_details(room, |details| details.is_active = active)
            .await
    }

    pub async fn update_now_playing(&self, room: &RoomHandle, now_playing: NowPlaying) -> Result<()> {
        let staged = now_playing
            .artwork
            .as_deref()
            .and_then(|artwork| self.codec.stage_artwork(artwork));
        self.store
            .save_record(now_playing_record(room.id(), &now_playing, staged.as_ref()))
            .await?;
        room.set_now_playing(now_playing);
        Ok(())
    }

    /// Rewrite the share so only the owner remains, keeping its other fields
    pub async fn remove_participants(&self, room: &RoomHandle) -> Result<SharingInfo> {
        let mut record = self
            .store
            .fetch_record(room.id(), &RecordName::from(SHARE_RECORD))
            .await?
            .ok_or_else(|| Error::NotFound(format!("share of `{}`", room.id())))?;
        let mut sharing = decode_sharing(&record)?;
        sharing.retain_owner_only();
        record.set(
            "participants",
            RecordValue::StringList(sharing.participants.clone()),
        );
        self.store.save_record(record).await?;
        room.set_sharing(sharing.clone());
        Ok(sharing)
    }
}

fn limit_config(details: &RoomDetails) -> (Option<u32>, LimitAction, Option<u32>, LimitAction) {
    (
        details.song_limit,
        details.song_limit_action,
        details.time_limit,
        details.time_limit_action,
    )
}
