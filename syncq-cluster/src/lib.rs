pub mod error;
pub mod memory_store;
pub mod sync;
pub mod transport;

pub use error::{Error, Result};
pub use memory_store::MemoryRecordStore;
pub use sync::{EngineEvent, RoomHandle, RoomRole, SessionReplicator, SessionRole, SyncEngine};
pub use transport::{BroadcastTransport, ChangePage, PlaybackSink, RecordQuery, RecordStore};
