use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use syncq_cluster::sync::{CreateRoomRequest, EngineEvent};
use syncq_cluster::{MemoryRecordStore, PlaybackSink, RecordStore, RoomRole, SyncEngine};
use syncq_core::models::{LimitAction, PlayType, QueueEntry, RoomDetails, RoomId, SongRef};
use syncq_core::{logging, Config};

/// Playback stand-in that logs what the host would play
struct LoggingPlayback;

impl PlaybackSink for LoggingPlayback {
    fn enqueue(&self, room_id: &RoomId, entry: &QueueEntry) {
        info!(
            room_id = %room_id,
            title = %entry.title,
            adder = %entry.adder_name,
            play_type = %entry.play_type,
            "Queued for playback"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config_file = std::env::var("SYNCQ_CONFIG").ok();
    let config = Config::load(config_file.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("syncq node starting...");

    // 3. A host and a guest sharing one in-process record store
    let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
    let host = SyncEngine::new(&config, Arc::clone(&store)).with_playback(Arc::new(LoggingPlayback));
    let guest = SyncEngine::new(&config, Arc::clone(&store));

    let mut events = host.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(event = event.event_type(), "Host event");
            if let EngineEvent::RoomClosed { .. } = event {
                break;
            }
        }
    });

    // 4. Host creates a room limited to three songs
    let room = host
        .create_room(CreateRoomRequest {
            details: RoomDetails::new("Demo Party").with_song_limit(3, LimitAction::DeactivateRoom),
            owner: "host".to_string(),
            now_playing: None,
        })
        .await?;
    let room_id = room.id().clone();
    info!(room_id = %room_id, "Room created");

    // 5. Guest joins and adds songs until the room closes to new entries
    guest.open_room(&room_id, RoomRole::Participant).await?;
    for (i, title) in ["Opening", "Groove", "Encore", "One More"].iter().enumerate() {
        let play_type = if i % 2 == 0 { PlayType::Later } else { PlayType::Next };
        let entry = QueueEntry::new(SongRef::from(*title), *title, play_type, "guest");
        if let Err(e) = guest.add_song(&room_id, entry).await {
            warn!(error = %e, title, "Song rejected");
        }
        host.poll_once(&room_id).await?;
        guest.poll_once(&room_id).await?;
    }

    info!(
        queue = room.queue().len(),
        active = room.is_active(),
        songs_remaining = room.limits().songs_remaining(),
        "Demo finished"
    );

    host.shutdown();
    guest.shutdown();
    Ok(())
}
