//! Typed view of records coming off the change feed

use syncq_core::codec::{decode_details, decode_now_playing, decode_sharing};
use syncq_core::models::{NowPlaying, QueueEntry, Record, RecordKind, RoomDetails, SharingInfo};
use syncq_core::QueueEntryCodec;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub enum RecordChange {
    QueueEntryChanged(QueueEntry),
    NowPlayingChanged(NowPlaying),
    DetailsChanged(RoomDetails),
    SharingChanged(SharingInfo),
}

impl RecordChange {
    /// Decode a record by its type name
    pub fn decode(record: &Record, codec: &QueueEntryCodec) -> Result<Self> {
        let kind = record.kind().ok_or_else(|| {
            Error::Decode(format!("unknown record type `{}`", record.record_type))
        })?;
        let change = match kind {
            RecordKind::QueueSong => Self::QueueEntryChanged(codec.from_record(record)?),
            RecordKind::NowPlayingSong => Self::NowPlayingChanged(decode_now_playing(record)?),
            RecordKind::RoomDetails => Self::DetailsChanged(decode_details(record)?),
            RecordKind::Share => Self::SharingChanged(decode_sharing(record)?),
        };
        Ok(change)
    }

    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::QueueEntryChanged(_) => RecordKind::QueueSong,
            Self::NowPlayingChanged(_) => RecordKind::NowPlayingSong,
            Self::DetailsChanged(_) => RecordKind::RoomDetails,
            Self::SharingChanged(_) => RecordKind::Share,
        }
    }
}
