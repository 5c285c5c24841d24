//! Queue entry and local session snapshot models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::id::EntryId;
use crate::Error;

/// Opaque catalog payload identifying a song.
///
/// The engine carries it verbatim and never interprets it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongRef(#[serde(with = "super::base64_bytes")] pub Vec<u8>);

impl SongRef {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SongRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SongRef({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for SongRef {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for SongRef {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// Where the adder wants the song placed in the host's playback queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayType {
    Next,
    Later,
}

impl PlayType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Next => "Next",
            Self::Later => "Later",
        }
    }
}

impl FromStr for PlayType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Next" => Ok(Self::Next),
            "Later" => Ok(Self::Later),
            other => Err(Error::decode(format!("unknown play type `{other}`"))),
        }
    }
}

impl std::fmt::Display for PlayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One song offered to a queue.
///
/// Immutable once accepted. `time_added` is the total order key and, together
/// with `song`, the delivery identity used for deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    #[serde(skip)]
    pub id: EntryId,
    pub song: SongRef,
    pub title: String,
    pub play_type: PlayType,
    pub adder_name: String,
    pub time_added: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "super::base64_bytes::option"
    )]
    pub artwork: Option<Vec<u8>>,
}

impl QueueEntry {
    /// Create an entry stamped with the current time at millisecond resolution
    #[must_use]
    pub fn new(song: SongRef, title: impl Into<String>, play_type: PlayType, adder_name: impl Into<String>) -> Self {
        Self {
            id: EntryId::new(),
            song,
            title: title.into(),
            play_type,
            adder_name: adder_name.into(),
            time_added: now_millis(),
            artwork: None,
        }
    }

    #[must_use]
    pub fn with_artwork(mut self, artwork: Vec<u8>) -> Self {
        self.artwork = Some(artwork);
        self
    }

    #[must_use]
    pub fn with_time_added(mut self, time_added: DateTime<Utc>) -> Self {
        self.time_added = time_added;
        self
    }

    /// Whether `other` is a re-delivery of this entry
    #[must_use]
    pub fn is_same_delivery(&self, other: &Self) -> bool {
        self.time_added == other.time_added && self.song == other.song
    }
}

/// Truncate the current time to whole milliseconds so it survives every
/// transport encoding unchanged.
#[must_use]
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// The entire shared snapshot of a local broadcast session.
///
/// Any connected device may produce a new one; receivers replace their copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueueState {
    pub now_playing_title: String,
    pub now_playing_artist: String,
    pub entries: Vec<QueueEntry>,
}

impl QueueState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entry with the same delivery identity is already present
    #[must_use]
    pub fn contains(&self, entry: &QueueEntry) -> bool {
        self.entries.iter().any(|e| e.is_same_delivery(entry))
    }
}
