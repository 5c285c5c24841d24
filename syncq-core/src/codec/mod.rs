//! Queue entry codec
//!
//! One canonical entry representation for both transports: a JSON envelope for
//! the local broadcast channel and a `QueueSong` record for the remote store.
//! The song reference is carried as an opaque blob.

pub mod records;
pub mod thumbnail;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::ThumbnailConfig;
use crate::models::{
    EntryId, PlayType, QueueEntry, Record, RecordKind, RecordName, RecordValue, RoomId, SongRef,
};
use crate::{Error, Result};

pub use records::{
    details_record, decode_details, decode_now_playing, decode_sharing, now_playing_record,
    sharing_record, DETAILS_RECORD, NOW_PLAYING_RECORD, SHARE_RECORD,
};
pub use thumbnail::{make_thumbnail, StagedArtwork};

/// `QueueSong` record field names
pub mod fields {
    pub const SONG: &str = "song";
    pub const TITLE: &str = "title";
    pub const PLAY_TYPE: &str = "playType";
    pub const ADDER_NAME: &str = "adderName";
    pub const TIME_ADDED: &str = "timeAdded";
    pub const ARTWORK: &str = "artwork";
}

/// A `QueueSong` record ready for upload together with its staged artwork.
///
/// Keep the value alive until the store has accepted the record; dropping it
/// releases the temporary artwork file.
#[derive(Debug)]
pub struct EncodedRecord {
    pub record: Record,
    pub staged: Option<StagedArtwork>,
}

#[derive(Debug, Clone, Default)]
pub struct QueueEntryCodec {
    thumbnail: ThumbnailConfig,
}

impl QueueEntryCodec {
    #[must_use]
    pub const fn new(thumbnail: ThumbnailConfig) -> Self {
        Self { thumbnail }
    }

    /// Encode one entry for the broadcast channel
    pub fn encode(&self, entry: &QueueEntry) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(entry)?)
    }

    /// Decode one entry from the broadcast channel, assigning a fresh local id
    pub fn decode(&self, bytes: &[u8]) -> Result<QueueEntry> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::decode(format!("queue entry payload: {e}")))
    }

    /// Produce the bounded thumbnail for an artwork payload and stage it on
    /// disk. Artwork is best-effort: failures are logged and yield `None`.
    #[must_use]
    pub fn stage_artwork(&self, artwork: &[u8]) -> Option<StagedArtwork> {
        let staged = make_thumbnail(artwork, self.thumbnail.max_edge)
            .and_then(|thumb| StagedArtwork::stage(&thumb));
        match staged {
            Ok(staged) => Some(staged),
            Err(e) => {
                warn!(error = %e, "Dropping artwork that could not be thumbnailed");
                None
            }
        }
    }

    /// Build the `QueueSong` record for an entry
    pub fn to_record(&self, zone: &RoomId, entry: &QueueEntry) -> EncodedRecord {
        let mut record = Record::new(zone.clone(), record_name_for(entry), RecordKind::QueueSong)
            .with(fields::SONG, RecordValue::Bytes(entry.song.0.clone()))
            .with(fields::TITLE, RecordValue::String(entry.title.clone()))
            .with(
                fields::PLAY_TYPE,
                RecordValue::String(entry.play_type.as_str().to_string()),
            )
            .with(
                fields::ADDER_NAME,
                RecordValue::String(entry.adder_name.clone()),
            )
            .with(fields::TIME_ADDED, RecordValue::Timestamp(entry.time_added));

        let staged = entry
            .artwork
            .as_deref()
            .and_then(|artwork| self.stage_artwork(artwork));
        if let Some(staged) = &staged {
            record.set(fields::ARTWORK, RecordValue::Asset(staged.asset()));
        }

        EncodedRecord { record, staged }
    }

    /// Decode a `QueueSong` record
    pub fn from_record(&self, record: &Record) -> Result<QueueEntry> {
        if record.kind() != Some(RecordKind::QueueSong) {
            return Err(Error::decode(format!(
                "expected QueueSong record, got `{}`",
                record.record_type
            )));
        }

        Ok(QueueEntry {
            id: EntryId::new(),
            song: SongRef(record.get_bytes(fields::SONG)?.to_vec()),
            title: record.opt_str(fields::TITLE).unwrap_or_default().to_string(),
            play_type: record.get_str(fields::PLAY_TYPE)?.parse::<PlayType>()?,
            adder_name: record.get_str(fields::ADDER_NAME)?.to_string(),
            time_added: record.get_timestamp(fields::TIME_ADDED)?,
            artwork: record.opt_asset(fields::ARTWORK)?,
        })
    }
}

/// Record identity: title, adder, play type, creation time and a random suffix
#[must_use]
pub fn record_name_for(entry: &QueueEntry) -> RecordName {
    RecordName(format!(
        "{}|{}|{}|{}|{}",
        entry.title,
        entry.adder_name,
        entry.play_type,
        entry.time_added.timestamp_millis(),
        nanoid::nanoid!(8)
    ))
}

/// Watermark test shared by queries and replay: only an insertion time
/// strictly after `since` is newer. No watermark admits everything.
#[must_use]
pub fn is_newer_than(time_added: DateTime<Utc>, since: Option<DateTime<Utc>>) -> bool {
    since.is_none_or(|since| time_added > since)
}
