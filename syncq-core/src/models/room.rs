use serde::{Deserialize, Serialize};

use super::id::RoomId;
use super::limit::LimitAction;
use super::queue::{QueueEntry, SongRef};
use crate::service::limit::LimitState;

/// RGBA room tint, each channel in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoomColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl RoomColor {
    #[must_use]
    pub const fn to_array(self) -> [f64; 4] {
        [self.r, self.g, self.b, self.a]
    }

    #[must_use]
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [r, g, b, a] => Some(Self {
                r: *r,
                g: *g,
                b: *b,
                a: *a,
            }),
            _ => None,
        }
    }
}

impl Default for RoomColor {
    fn default() -> Self {
        Self {
            r: 0.0,
            g: 0.5,
            b: 1.0,
            a: 1.0,
        }
    }
}

/// Host-owned room description, persisted as the `RoomDetails` record.
///
/// `song_limit` / `time_limit` hold the remaining count while a limit is
/// enabled and `None` while it is disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDetails {
    pub name: String,
    pub icon: String,
    pub description: String,
    pub is_active: bool,
    pub host_on_screen: bool,
    pub color: RoomColor,
    pub song_limit: Option<u32>,
    pub song_limit_action: LimitAction,
    pub time_limit: Option<u32>,
    pub time_limit_action: LimitAction,
}

impl RoomDetails {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            icon: "music.note".to_string(),
            description: String::new(),
            is_active: true,
            host_on_screen: false,
            color: RoomColor::default(),
            song_limit: None,
            song_limit_action: LimitAction::Nothing,
            time_limit: None,
            time_limit_action: LimitAction::Nothing,
        }
    }

    #[must_use]
    pub const fn with_song_limit(mut self, songs: u32, action: LimitAction) -> Self {
        self.song_limit = Some(songs);
        self.song_limit_action = action;
        self
    }

    #[must_use]
    pub const fn with_time_limit(mut self, seconds: u32, action: LimitAction) -> Self {
        self.time_limit = Some(seconds);
        self.time_limit_action = action;
        self
    }

    /// Copy the host's live counters into the persisted limit fields
    pub fn absorb_limits(&mut self, limits: &LimitState) {
        self.song_limit = limits.song.is_enabled().then(|| limits.song.remaining());
        self.song_limit_action = limits.song.action();
        self.time_limit = limits.time.is_enabled().then(|| limits.time.remaining());
        self.time_limit_action = limits.time.action();
    }
}

/// Snapshot of the host's currently playing item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub song: SongRef,
    pub title: String,
    pub artist: String,
    pub time_elapsed: f64,
    pub song_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SharePermission {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl SharePermission {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "readOnly",
            Self::ReadWrite => "readWrite",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "readOnly" => Some(Self::ReadOnly),
            "readWrite" => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

/// Sharing record: who may see and append to the room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharingInfo {
    pub owner: String,
    pub participants: Vec<String>,
    pub permission: SharePermission,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Vec<u8>>,
}

impl SharingInfo {
    #[must_use]
    pub fn new(owner: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            participants: Vec::new(),
            permission: SharePermission::ReadWrite,
            title: title.into(),
            thumbnail: None,
        }
    }

    /// Drop every participant except the owner
    pub fn retain_owner_only(&mut self) {
        let owner = self.owner.clone();
        self.participants.retain(|p| *p == owner);
    }
}

/// Opaque change-feed cursor supplied by the record store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeToken(pub Vec<u8>);

/// Room-scoped synchronization status exposed to callers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    InProgress,
    Success,
    Failure,
}

/// Which database of the record store to enumerate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreScope {
    /// Rooms this device hosts
    Private,
    /// Rooms shared with this device
    Shared,
}

/// Locally materialized view of one remote room
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub details: RoomDetails,
    pub now_playing: Option<NowPlaying>,
    pub sharing: Option<SharingInfo>,
    pub resume_token: Option<ResumeToken>,
    /// Accepted entries, most recently added first
    pub queue: Vec<QueueEntry>,
    pub limits: LimitState,
    pub status: SyncStatus,
}

impl Room {
    #[must_use]
    pub fn new(id: RoomId, details: RoomDetails) -> Self {
        let limits = LimitState::from_details(&details);
        Self {
            id,
            details,
            now_playing: None,
            sharing: None,
            resume_token: None,
            queue: Vec::new(),
            limits,
            status: SyncStatus::Idle,
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.details.is_active
    }
}
