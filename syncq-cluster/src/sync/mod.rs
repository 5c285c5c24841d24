// Module: sync

pub mod changes;
pub mod dedup;
pub mod engine;
pub mod events;
pub mod lifecycle;
pub mod notification;
pub mod replicator;
pub mod room;
pub mod session;

pub use changes::RecordChange;
pub use dedup::{DedupKey, NotificationDeduplicator};
pub use engine::SyncEngine;
pub use events::{EngineEvent, EventSender, PeerChange, SessionMessage, DISCONNECT_SIGNAL};
pub use lifecycle::{is_managed_zone, zone_name, CreateRoomRequest, RoomLifecycle, RoomListing};
pub use notification::PushPayload;
pub use replicator::{FetchOutcome, RecordReplicator};
pub use room::{ChangeEffect, FetchGuard, RoomHandle, RoomRole, TickOutcome};
pub use session::{SessionReplicator, SessionRole};
