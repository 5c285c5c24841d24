//! Room-level record mappings: details, now-playing and sharing

use crate::codec::StagedArtwork;
use crate::models::{
    LimitAction, NowPlaying, Record, RecordKind, RecordName, RecordValue, RoomColor, RoomDetails,
    RoomId, SharePermission, SharingInfo, SongRef,
};
use crate::{Error, Result};

pub const DETAILS_RECORD: &str = "roomDetails";
pub const NOW_PLAYING_RECORD: &str = "nowPlaying";
pub const SHARE_RECORD: &str = "roomShare";

/// Persisted value of a disabled limit
const LIMIT_DISABLED: i64 = -1;

fn flag(value: bool) -> RecordValue {
    RecordValue::Int(i64::from(value))
}

fn limit_value(limit: Option<u32>) -> RecordValue {
    RecordValue::Int(limit.map_or(LIMIT_DISABLED, i64::from))
}

fn parse_limit(record: &Record, key: &str) -> Result<Option<u32>> {
    let raw = record.get_int(key)?;
    if raw < 0 {
        return Ok(None);
    }
    u32::try_from(raw)
        .map(Some)
        .map_err(|_| Error::decode(format!("`{key}` out of range: {raw}")))
}

pub fn details_record(zone: &RoomId, details: &RoomDetails) -> Record {
    Record::new(zone.clone(), RecordName::from(DETAILS_RECORD), RecordKind::RoomDetails)
        .with("name", RecordValue::String(details.name.clone()))
        .with("icon", RecordValue::String(details.icon.clone()))
        .with("description", RecordValue::String(details.description.clone()))
        .with("activeFlag", flag(details.is_active))
        .with("hostOnScreenFlag", flag(details.host_on_screen))
        .with("color", RecordValue::DoubleList(details.color.to_array().to_vec()))
        .with("songLimit", limit_value(details.song_limit))
        .with(
            "songLimitAction",
            RecordValue::String(details.song_limit_action.as_str().to_string()),
        )
        .with("timeLimit", limit_value(details.time_limit))
        .with(
            "timeLimitAction",
            RecordValue::String(details.time_limit_action.as_str().to_string()),
        )
}

pub fn decode_details(record: &Record) -> Result<RoomDetails> {
    let color = record.get_doubles("color")?;
    Ok(RoomDetails {
        name: record.get_str("name")?.to_string(),
        icon: record.get_str("icon")?.to_string(),
        description: record.get_str("description")?.to_string(),
        is_active: record.get_int("activeFlag")? != 0,
        host_on_screen: record.get_int("hostOnScreenFlag")? != 0,
        color: RoomColor::from_slice(color)
            .ok_or_else(|| Error::decode("room color must have four channels"))?,
        song_limit: parse_limit(record, "songLimit")?,
        song_limit_action: record.get_str("songLimitAction")?.parse::<LimitAction>()?,
        time_limit: parse_limit(record, "timeLimit")?,
        time_limit_action: record.get_str("timeLimitAction")?.parse::<LimitAction>()?,
    })
}

pub fn now_playing_record(
    zone: &RoomId,
    now_playing: &NowPlaying,
    artwork: Option<&StagedArtwork>,
) -> Record {
    let mut record = Record::new(
        zone.clone(),
        RecordName::from(NOW_PLAYING_RECORD),
        RecordKind::NowPlayingSong,
    )
    .with("song", RecordValue::Bytes(now_playing.song.0.clone()))
    .with("title", RecordValue::String(now_playing.title.clone()))
    .with("artist", RecordValue::String(now_playing.artist.clone()))
    .with("timeElapsed", RecordValue::Double(now_playing.time_elapsed))
    .with("songTime", RecordValue::Double(now_playing.song_time));
    if let Some(staged) = artwork {
        record.set("artwork", RecordValue::Asset(staged.asset()));
    }
    record
}

pub fn decode_now_playing(record: &Record) -> Result<NowPlaying> {
    Ok(NowPlaying {
        song: SongRef(record.get_bytes("song")?.to_vec()),
        title: record.opt_str("title").unwrap_or_default().to_string(),
        artist: record.opt_str("artist").unwrap_or_default().to_string(),
        time_elapsed: record.get_double("timeElapsed")?,
        song_time: record.get_double("songTime")?,
        artwork: record.opt_asset("artwork")?,
    })
}

pub fn sharing_record(zone: &RoomId, sharing: &SharingInfo, thumbnail: Option<&StagedArtwork>) -> Record {
    let mut record = Record::new(zone.clone(), RecordName::from(SHARE_RECORD), RecordKind::Share)
        .with("owner", RecordValue::String(sharing.owner.clone()))
        .with(
            "participants",
            RecordValue::StringList(sharing.participants.clone()),
        )
        .with(
            "permission",
            RecordValue::String(sharing.permission.as_str().to_string()),
        )
        .with("title", RecordValue::String(sharing.title.clone()));
    if let Some(staged) = thumbnail {
        record.set("thumbnail", RecordValue::Asset(staged.asset()));
    }
    record
}

pub fn decode_sharing(record: &Record) -> Result<SharingInfo> {
    let permission = record.get_str("permission")?;
    Ok(SharingInfo {
        owner: record.get_str("owner")?.to_string(),
        participants: record.get_strings("participants")?.to_vec(),
        permission: SharePermission::from_name(permission)
            .ok_or_else(|| Error::decode(format!("unknown share permission `{permission}`")))?,
        title: record.get_str("title")?.to_string(),
        thumbnail: record.opt_asset("thumbnail")?,
    })
}
