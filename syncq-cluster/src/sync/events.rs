use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use syncq_core::models::{
    LimitAction, LimitInfoPack, LimitKind, NowPlaying, PeerId, QueueEntry, QueueState, RoomDetails,
    RoomId, SyncStatus,
};
use tokio::sync::broadcast;

use crate::{Error, Result};

pub type EventSender = broadcast::Sender<EngineEvent>;

/// Publish to whoever is listening; having no subscribers is fine
pub(crate) fn publish(events: &EventSender, event: EngineEvent) {
    let _ = events.send(event);
}

/// Literal payload a host sends when it ends a local session
pub const DISCONNECT_SIGNAL: &str = "DISCONNECT SIGNAL";

/// Payloads carried over the local broadcast channel
#[derive(Debug, Clone)]
pub enum SessionMessage {
    State(QueueState),
    Limits(LimitInfoPack),
    Disconnect,
}

impl SessionMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::State(state) => to_payload(state),
            Self::Limits(pack) => to_payload(pack),
            Self::Disconnect => Ok(DISCONNECT_SIGNAL.as_bytes().to_vec()),
        }
    }

    /// Payloads carry no type tag: try the full state, then the limit pack,
    /// then the sentinel.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if let Ok(state) = serde_json::from_slice::<QueueState>(bytes) {
            return Ok(Self::State(state));
        }
        if let Ok(pack) = serde_json::from_slice::<LimitInfoPack>(bytes) {
            return Ok(Self::Limits(pack));
        }
        if bytes == DISCONNECT_SIGNAL.as_bytes() {
            return Ok(Self::Disconnect);
        }
        Err(Error::Decode(format!(
            "unrecognized session payload ({} bytes)",
            bytes.len()
        )))
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value).map_err(syncq_core::Error::from)?)
}

/// Membership change of a local session peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerChange {
    Discovered,
    Connected,
    Lost,
    Disconnected,
}

/// Events published to the UI collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Entries were accepted into a room's queue
    QueueUpdated {
        room_id: RoomId,
        added: Vec<QueueEntry>,
        queue_len: usize,
        timestamp: DateTime<Utc>,
    },

    NowPlayingChanged {
        room_id: RoomId,
        now_playing: NowPlaying,
        timestamp: DateTime<Utc>,
    },

    DetailsChanged {
        room_id: RoomId,
        details: RoomDetails,
        timestamp: DateTime<Utc>,
    },

    SyncStatusChanged {
        room_id: RoomId,
        status: SyncStatus,
        timestamp: DateTime<Utc>,
    },

    /// A room limit ran out; `action` has been or is being executed
    LimitExpired {
        room_id: RoomId,
        kind: LimitKind,
        action: LimitAction,
        timestamp: DateTime<Utc>,
    },

    /// The room's zone is gone and its handle was closed
    RoomClosed {
        room_id: RoomId,
        timestamp: DateTime<Utc>,
    },

    /// A peer's full queue state replaced ours
    SessionStateReplaced {
        state: QueueState,
        timestamp: DateTime<Utc>,
    },

    SessionLimitsUpdated {
        limits: LimitInfoPack,
        timestamp: DateTime<Utc>,
    },

    PeerChanged {
        peer: PeerId,
        change: PeerChange,
        timestamp: DateTime<Utc>,
    },

    /// The local session was torn down, by a peer's signal or a limit
    SessionEnded {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::QueueUpdated { .. } => "queue_updated",
            Self::NowPlayingChanged { .. } => "now_playing_changed",
            Self::DetailsChanged { .. } => "details_changed",
            Self::SyncStatusChanged { .. } => "sync_status_changed",
            Self::LimitExpired { .. } => "limit_expired",
            Self::RoomClosed { .. } => "room_closed",
            Self::SessionStateReplaced { .. } => "session_state_replaced",
            Self::SessionLimitsUpdated { .. } => "session_limits_updated",
            Self::PeerChanged { .. } => "peer_changed",
            Self::SessionEnded { .. } => "session_ended",
        }
    }

    /// Room the event belongs to; session events have none
    #[must_use]
    pub const fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::QueueUpdated { room_id, .. }
            | Self::NowPlayingChanged { room_id, .. }
            | Self::DetailsChanged { room_id, .. }
            | Self::SyncStatusChanged { room_id, .. }
            | Self::LimitExpired { room_id, .. }
            | Self::RoomClosed { room_id, .. } => Some(room_id),
            Self::SessionStateReplaced { .. }
            | Self::SessionLimitsUpdated { .. }
            | Self::PeerChanged { .. }
            | Self::SessionEnded { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncq_core::models::{PlayType, SongRef};

    #[test]
    fn test_unserializable_payload_is_a_serialization_error() {
        let mut keyed = std::collections::HashMap::new();
        keyed.insert((1u8, 2u8), "non-string key");
        assert!(matches!(
            to_payload(&keyed),
            Err(Error::Core(syncq_core::Error::Serialization(_)))
        ));
    }

    #[test]
    fn test_decode_prefers_state_then_limits_then_sentinel() {
        let mut state = QueueState::new();
        state
            .entries
            .push(QueueEntry::new(SongRef::from("a"), "A", PlayType::Next, "ann"));
        let bytes = SessionMessage::State(state).encode().unwrap();
        assert!(matches!(
            SessionMessage::decode(&bytes).unwrap(),
            SessionMessage::State(s) if s.len() == 1
        ));

        let pack = LimitInfoPack {
            is_time_limit: true,
            time_limit: 90,
            is_song_limit: false,
            song_limit: 0,
        };
        let bytes = SessionMessage::Limits(pack).encode().unwrap();
        assert!(matches!(
            SessionMessage::decode(&bytes).unwrap(),
            SessionMessage::Limits(p) if p == pack
        ));

        assert!(matches!(
            SessionMessage::decode(b"DISCONNECT SIGNAL").unwrap(),
            SessionMessage::Disconnect
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_payloads() {
        assert!(matches!(
            SessionMessage::decode(b"{\"hello\":1}"),
            Err(Error::Decode(_))
        ));
        assert!(SessionMessage::decode(b"disconnect signal").is_err());
    }

    #[test]
    fn test_event_tagging() {
        let event = EngineEvent::RoomClosed {
            room_id: RoomId::from("zone"),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert_eq!(event.room_id().map(RoomId::as_str), Some("zone"));
    }
}
