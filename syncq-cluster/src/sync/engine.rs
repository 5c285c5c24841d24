//! Room-mode engine
//!
//! Owns one [`RoomHandle`] per open room, drives each room's poller and a
//! host's time-limit timer, and turns the effects of every observed change
//! into playback, persisted counters, limit actions and UI events.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use syncq_core::logging::room_span;
use syncq_core::models::{LimitAction, QueueEntry, RoomId};
use syncq_core::service::LimitExpiry;
use syncq_core::{Config, QueueEntryCodec};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::dedup::{DedupKey, NotificationDeduplicator};
use super::events::{publish, EngineEvent, EventSender};
use super::lifecycle::{CreateRoomRequest, RoomLifecycle};
use super::notification::PushPayload;
use super::replicator::{FetchOutcome, RecordReplicator};
use super::room::{ChangeEffect, RoomHandle, RoomRole};
use crate::transport::{PlaybackSink, RecordStore};
use crate::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DEDUP_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Handle to the engine; clones share the same rooms
#[derive(Clone)]
pub struct SyncEngine {
    poll_interval: Duration,
    limit_tick: Duration,
    persist_every_ticks: u32,
    store: Arc<dyn RecordStore>,
    codec: QueueEntryCodec,
    replicator: Arc<RecordReplicator>,
    lifecycle: Arc<RoomLifecycle>,
    rooms: Arc<DashMap<RoomId, Arc<RoomHandle>>>,
    playback: Option<Arc<dyn PlaybackSink>>,
    events: EventSender,
    dedup: NotificationDeduplicator,
    shutdown: CancellationToken,
}

impl SyncEngine {
    /// Build an engine over `store`. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(config: &Config, store: Arc<dyn RecordStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let codec = QueueEntryCodec::new(config.thumbnail.clone());
        let shutdown = CancellationToken::new();
        Self {
            poll_interval: config.sync.poll_interval(),
            limit_tick: config.sync.limit_tick(),
            persist_every_ticks: config.sync.limit_persist_every_ticks,
            replicator: Arc::new(RecordReplicator::new(
                Arc::clone(&store),
                codec.clone(),
                events.clone(),
                config.sync.full_fetch_lookback(),
            )),
            lifecycle: Arc::new(RoomLifecycle::new(
                Arc::clone(&store),
                codec.clone(),
                config.sync.room_create_timeout(),
            )),
            store,
            codec,
            rooms: Arc::new(DashMap::new()),
            playback: None,
            dedup: NotificationDeduplicator::new(
                config.sync.notification_dedup_window(),
                DEDUP_CLEANUP_INTERVAL,
                shutdown.child_token(),
            ),
            events,
            shutdown,
        }
    }

    /// Hand accepted entries of hosted rooms to playback
    #[must_use]
    pub fn with_playback(mut self, playback: Arc<dyn PlaybackSink>) -> Self {
        self.playback = Some(playback);
        self
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn event_sender(&self) -> EventSender {
        self.events.clone()
    }

    #[must_use]
    pub fn lifecycle(&self) -> &RoomLifecycle {
        &self.lifecycle
    }

    #[must_use]
    pub fn room(&self, room_id: &RoomId) -> Option<Arc<RoomHandle>> {
        self.rooms.get(room_id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    fn require_room(&self, room_id: &RoomId) -> Result<Arc<RoomHandle>> {
        self.room(room_id)
            .ok_or_else(|| Error::NotFound(format!("room `{room_id}` is not open")))
    }

    /// Create a room and host it
    pub async fn create_room(&self, request: CreateRoomRequest) -> Result<Arc<RoomHandle>> {
        let room = self.lifecycle.create_room(request).await?;
        let handle = Arc::new(RoomHandle::new(room, RoomRole::Host, self.persist_every_ticks));
        self.register(&handle);
        Ok(handle)
    }

    /// Load a room, fetch its queue and start polling it. A failed full fetch
    /// leaves the room open with a failed status; the poller fills it in.
    pub async fn open_room(&self, room_id: &RoomId, role: RoomRole) -> Result<Arc<RoomHandle>> {
        if let Some(existing) = self.room(room_id) {
            return Ok(existing);
        }
        let room = self.lifecycle.load_room(room_id).await?;
        let handle = Arc::new(RoomHandle::new(room, role, self.persist_every_ticks));

        match self.replicator.full_fetch(&handle).await {
            Ok(outcome) => self.process_effects(&handle, outcome.into_effects()).await,
            Err(e) => warn!(room_id = %room_id, error = %e, "Opening room without its queue"),
        }
        self.register(&handle);
        Ok(handle)
    }

    fn register(&self, handle: &Arc<RoomHandle>) {
        self.rooms.insert(handle.id().clone(), Arc::clone(handle));
        self.spawn_poller(Arc::clone(handle));
        if handle.is_host() {
            self.spawn_limit_timer(Arc::clone(handle));
        }
        info!(room_id = %handle.id(), role = ?handle.role(), "Room opened");
    }

    fn spawn_poller(&self, handle: Arc<RoomHandle>) {
        let engine = self.clone();
        let cancel = handle.cancel_token();
        let span = room_span("poller", handle.id());
        tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(engine.poll_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                interval.tick().await;
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            debug!("Poller stopped");
                            break;
                        }
                        _ = interval.tick() => {
                            if let Err(e) = engine.poll_handle(&handle).await {
                                debug!(error = %e, "Poll failed, retrying next interval");
                            }
                        }
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Ticks for as long as the room is hosted. A tick is a no-op while the
    /// time limit is unarmed or spent, so a limit enabled later still counts.
    fn spawn_limit_timer(&self, handle: Arc<RoomHandle>) {
        let engine = self.clone();
        let cancel = handle.cancel_token();
        let span = room_span("limit_timer", handle.id());
        tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(engine.limit_tick);
                interval.tick().await;
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            engine.tick_handle(&handle).await;
                        }
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Write one queue entry to the room's zone, then merge it locally.
    /// The change feed fans it out to everyone else.
    pub async fn add_song(&self, room_id: &RoomId, entry: QueueEntry) -> Result<()> {
        let handle = self.require_room(room_id)?;
        if !handle.is_active() {
            return Err(Error::Inactive(format!("room `{room_id}`")));
        }

        let encoded = self.codec.to_record(room_id, &entry);
        self.store.save_record(encoded.record).await?;
        drop(encoded.staged);

        let effect = handle.add_local(entry);
        self.process_effects(&handle, vec![effect]).await;
        Ok(())
    }

    /// Run one incremental fetch for a room now
    pub async fn poll_once(&self, room_id: &RoomId) -> Result<()> {
        let handle = self.require_room(room_id)?;
        self.poll_handle(&handle).await
    }

    async fn poll_handle(&self, handle: &Arc<RoomHandle>) -> Result<()> {
        match self.replicator.incremental_fetch(handle).await? {
            FetchOutcome::Skipped => Ok(()),
            outcome => {
                self.process_effects(handle, outcome.into_effects()).await;
                Ok(())
            }
        }
    }

    /// Handle a subscription push. Returns whether it led to a fetch.
    pub async fn handle_notification(&self, payload: &[u8]) -> Result<bool> {
        let push = PushPayload::from_json(payload)?;
        let Some(handle) = self.room(&push.zone) else {
            debug!(room_id = %push.zone, "Push for a room that is not open");
            return Ok(false);
        };
        if !self.dedup.should_process(&DedupKey::from_payload(&push)) {
            debug!(room_id = %push.zone, record = %push.record, "Duplicate push ignored");
            return Ok(false);
        }

        if let Some(effect) = self.replicator.fetch_notified(&handle, &push.record).await? {
            self.process_effects(&handle, vec![effect]).await;
        }
        Ok(true)
    }

    /// Count one elapsed second on a hosted room
    pub async fn tick_time_limit(&self, room_id: &RoomId) -> Result<Option<LimitExpiry>> {
        let handle = self.require_room(room_id)?;
        Ok(self.tick_handle(&handle).await)
    }

    async fn tick_handle(&self, handle: &Arc<RoomHandle>) -> Option<LimitExpiry> {
        let outcome = handle.tick_time_limit();
        if let Some(details) = &outcome.persist {
            if let Err(e) = self.lifecycle.persist_details(handle.id(), details).await {
                warn!(room_id = %handle.id(), error = %e, "Failed to persist time limit");
            }
        }
        if let Some(expiry) = outcome.expiry {
            self.execute_limit_action(handle, expiry).await;
        }
        outcome.expiry
    }

    async fn process_effects(&self, handle: &Arc<RoomHandle>, effects: Vec<ChangeEffect>) {
        let mut added = Vec::new();
        let mut persist_limits = false;
        let mut expiries = Vec::new();

        for effect in effects {
            match effect {
                ChangeEffect::Accepted {
                    entry,
                    forward,
                    expiry,
                    limits_changed,
                } => {
                    if forward {
                        if let Some(playback) = &self.playback {
                            playback.enqueue(handle.id(), &entry);
                        }
                    }
                    persist_limits |= limits_changed;
                    expiries.extend(expiry);
                    added.push(entry);
                }
                ChangeEffect::Duplicate => {}
                ChangeEffect::Rejected(entry) => debug!(
                    room_id = %handle.id(),
                    title = %entry.title,
                    "Room is inactive, entry not accepted"
                ),
                ChangeEffect::NowPlaying(now_playing) => publish(
                    &self.events,
                    EngineEvent::NowPlayingChanged {
                        room_id: handle.id().clone(),
                        now_playing,
                        timestamp: Utc::now(),
                    },
                ),
                ChangeEffect::Details(details) => publish(
                    &self.events,
                    EngineEvent::DetailsChanged {
                        room_id: handle.id().clone(),
                        details,
                        timestamp: Utc::now(),
                    },
                ),
                ChangeEffect::Sharing(sharing) => {
                    debug!(
                        room_id = %handle.id(),
                        participants = sharing.participants.len(),
                        "Sharing changed"
                    );
                }
            }
        }

        if !added.is_empty() {
            publish(
                &self.events,
                EngineEvent::QueueUpdated {
                    room_id: handle.id().clone(),
                    queue_len: handle.queue().len(),
                    added,
                    timestamp: Utc::now(),
                },
            );
        }
        if persist_limits {
            let details = handle.details();
            if let Err(e) = self.lifecycle.persist_details(handle.id(), &details).await {
                warn!(room_id = %handle.id(), error = %e, "Failed to persist song limit");
            }
        }
        for expiry in expiries {
            self.execute_limit_action(handle, expiry).await;
        }
    }

    /// Carry out what an expired limit asks for
    pub async fn execute_limit_action(&self, handle: &Arc<RoomHandle>, expiry: LimitExpiry) {
        info!(
            room_id = %handle.id(),
            kind = ?expiry.kind,
            action = %expiry.action,
            "Limit expired"
        );
        publish(
            &self.events,
            EngineEvent::LimitExpired {
                room_id: handle.id().clone(),
                kind: expiry.kind,
                action: expiry.action,
                timestamp: Utc::now(),
            },
        );

        let result = match expiry.action {
            LimitAction::Nothing => Ok(()),
            LimitAction::DeactivateRoom => self.lifecycle.set_active(handle, false).await.map(drop),
            LimitAction::RemoveParticipants => {
                self.lifecycle.remove_participants(handle).await.map(drop)
            }
            LimitAction::DeleteRoom => match self.lifecycle.delete_room(handle.id()).await {
                Ok(()) => {
                    self.close_room(handle.id());
                    publish(
                        &self.events,
                        EngineEvent::RoomClosed {
                            room_id: handle.id().clone(),
                            timestamp: Utc::now(),
                        },
                    );
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };
        if let Err(e) = result {
            warn!(
                room_id = %handle.id(),
                action = %expiry.action,
                error = %e,
                "Limit action failed"
            );
        }
    }

    /// Delete the room's zone and drop it from the engine
    pub async fn delete_room(&self, room_id: &RoomId) -> Result<()> {
        self.lifecycle.delete_room(room_id).await?;
        self.close_room(room_id);
        Ok(())
    }

    /// Stop the room's tasks and forget it locally
    pub fn close_room(&self, room_id: &RoomId) {
        if let Some((_, handle)) = self.rooms.remove(room_id) {
            handle.close();
            info!(room_id = %room_id, "Room closed");
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for room_id in self.room_ids() {
            self.close_room(&room_id);
        }
    }
}
