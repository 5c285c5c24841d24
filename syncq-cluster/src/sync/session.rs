//! Local broadcast replication
//!
//! Every device in an ad-hoc session holds one [`QueueState`]. Any mutation is
//! followed by a retransmission of the whole state to every connected peer,
//! and a received state replaces ours unconditionally: the last full state
//! delivered wins.

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use syncq_core::models::{
    LimitAction, LimitInfoPack, PeerId, QueueEntry, QueueState, RoomDetails, RoomId,
};
use syncq_core::service::{merge_entry, LimitExpiry, LimitState};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{publish, EngineEvent, EventSender, PeerChange, SessionMessage};
use crate::transport::{BroadcastTransport, PlaybackSink};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Host,
    Participant,
}

impl SessionRole {
    #[must_use]
    pub const fn is_host(self) -> bool {
        matches!(self, Self::Host)
    }
}

#[derive(Debug, Default)]
struct SessionInner {
    state: QueueState,
    discovered: Vec<PeerId>,
    connected: Vec<PeerId>,
    limits: LimitState,
    active: bool,
}

/// Replicator for one local session
pub struct SessionReplicator {
    session_id: RoomId,
    role: SessionRole,
    inner: Mutex<SessionInner>,
    /// Held from state snapshot to send so peers see states in mutation order
    send_gate: tokio::sync::Mutex<()>,
    transport: Arc<dyn BroadcastTransport>,
    playback: Option<Arc<dyn PlaybackSink>>,
    events: EventSender,
    cancel: CancellationToken,
}

impl SessionReplicator {
    /// Start a session. Only a host passes limits; participants mirror the
    /// host's broadcast counters.
    #[must_use]
    pub fn new(
        session_id: RoomId,
        role: SessionRole,
        transport: Arc<dyn BroadcastTransport>,
        events: EventSender,
    ) -> Self {
        Self {
            session_id,
            role,
            inner: Mutex::new(SessionInner {
                active: true,
                ..SessionInner::default()
            }),
            send_gate: tokio::sync::Mutex::new(()),
            transport,
            playback: None,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Host sessions hand accepted entries to playback
    #[must_use]
    pub fn with_playback(mut self, playback: Arc<dyn PlaybackSink>) -> Self {
        self.playback = Some(playback);
        self
    }

    /// Host sessions take their limits from the room settings
    #[must_use]
    pub fn with_limits(self, details: &RoomDetails) -> Self {
        self.inner.lock().limits = LimitState::from_details(details);
        self
    }

    #[must_use]
    pub const fn role(&self) -> SessionRole {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> QueueState {
        self.inner.lock().state.clone()
    }

    #[must_use]
    pub fn limits(&self) -> LimitState {
        self.inner.lock().limits
    }

    #[must_use]
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.lock().connected.clone()
    }

    #[must_use]
    pub fn discovered_peers(&self) -> Vec<PeerId> {
        self.inner.lock().discovered.clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Apply `f` under the session lock, then send the new state to every
    /// connected peer
    pub async fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut QueueState),
    {
        self.apply_and_broadcast(|inner| f(&mut inner.state)).await
    }

    /// Append one entry. On the host an accepted entry counts against the
    /// song limit and goes to playback.
    pub async fn add_entry(&self, entry: QueueEntry) -> Result<Option<LimitExpiry>> {
        let is_host = self.role.is_host();
        let candidate = entry.clone();
        let (inserted, expiry) = self
            .apply_and_broadcast(move |inner| {
                let inserted = merge_entry(&mut inner.state.entries, candidate).is_inserted();
                let expiry = if inserted && is_host {
                    inner.limits.record_song()
                } else {
                    None
                };
                (inserted, expiry)
            })
            .await?;

        if inserted && is_host {
            self.forward_to_playback(std::slice::from_ref(&entry));
        }
        if let Some(expiry) = expiry {
            self.expire(expiry).await;
        }
        Ok(expiry)
    }

    pub async fn set_now_playing(&self, title: &str, artist: &str) -> Result<()> {
        self.mutate(|state| {
            state.now_playing_title = title.to_string();
            state.now_playing_artist = artist.to_string();
        })
        .await
    }

    /// Handle one payload from a peer. Undecodable payloads are dropped.
    pub async fn on_receive(&self, from: &PeerId, bytes: &[u8]) {
        let message = match SessionMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %from, error = %e, "Dropping session payload");
                return;
            }
        };

        match message {
            SessionMessage::State(state) => self.replace_state(from, state).await,
            SessionMessage::Limits(pack) => self.adopt_limits(from, pack),
            SessionMessage::Disconnect => {
                info!(peer = %from, "Peer ended the session");
                self.teardown("host disconnected");
            }
        }
    }

    async fn replace_state(&self, from: &PeerId, state: QueueState) {
        let is_host = self.role.is_host();
        let (fresh, expiry) = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return;
            }
            let fresh: Vec<QueueEntry> = if is_host {
                state
                    .entries
                    .iter()
                    .filter(|e| !inner.state.contains(e))
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            };
            let mut expiry = None;
            for _ in &fresh {
                if let Some(expired) = inner.limits.record_song() {
                    expiry = Some(expired);
                }
            }
            inner.state = state.clone();
            (fresh, expiry)
        };

        debug!(
            peer = %from,
            entries = state.len(),
            new_entries = fresh.len(),
            "Session state replaced"
        );
        self.forward_to_playback(&fresh);
        publish(
            &self.events,
            EngineEvent::SessionStateReplaced {
                state,
                timestamp: Utc::now(),
            },
        );
        if let Some(expiry) = expiry {
            self.expire(expiry).await;
        }
    }

    fn adopt_limits(&self, from: &PeerId, pack: LimitInfoPack) {
        if self.role.is_host() {
            debug!(peer = %from, "Host ignores peer limit broadcast");
            return;
        }
        self.inner.lock().limits.apply_info_pack(pack);
        publish(
            &self.events,
            EngineEvent::SessionLimitsUpdated {
                limits: pack,
                timestamp: Utc::now(),
            },
        );
    }

    /// Track session membership; a host pushes its state to each newly
    /// connected peer
    pub async fn on_peer_event(&self, peer: PeerId, change: PeerChange) {
        let _gate = self.send_gate.lock().await;
        let push = {
            let mut inner = self.inner.lock();
            match change {
                PeerChange::Discovered => {
                    if !inner.discovered.contains(&peer) {
                        inner.discovered.push(peer.clone());
                    }
                    None
                }
                PeerChange::Connected => {
                    inner.discovered.retain(|p| *p != peer);
                    if !inner.connected.contains(&peer) {
                        inner.connected.push(peer.clone());
                    }
                    (self.role.is_host() && inner.active).then(|| inner.state.clone())
                }
                PeerChange::Lost => {
                    inner.discovered.retain(|p| *p != peer);
                    None
                }
                PeerChange::Disconnected => {
                    inner.connected.retain(|p| *p != peer);
                    None
                }
            }
        };

        debug!(peer = %peer, change = ?change, "Session peer changed");
        if let Some(state) = push {
            self.transmit(vec![peer.clone()], &SessionMessage::State(state))
                .await;
        }
        publish(
            &self.events,
            EngineEvent::PeerChanged {
                peer,
                change,
                timestamp: Utc::now(),
            },
        );
    }

    /// Host-side: send the current counters to every connected peer
    pub async fn broadcast_limits(&self) {
        if !self.role.is_host() {
            return;
        }
        let (peers, pack) = {
            let inner = self.inner.lock();
            (inner.connected.clone(), inner.limits.to_info_pack())
        };
        self.transmit(peers, &SessionMessage::Limits(pack)).await;
    }

    /// Host-side: count one elapsed second
    pub async fn tick_time_limit(&self) -> Option<LimitExpiry> {
        if !self.role.is_host() {
            return None;
        }
        let expiry = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return None;
            }
            inner.limits.tick_second()
        };
        if let Some(expiry) = expiry {
            self.expire(expiry).await;
        }
        expiry
    }

    /// Drive the time limit on a host: tick once per `tick`, broadcasting the
    /// counters after each tick. Stops when the session ends.
    pub fn spawn_limit_timer(self: &Arc<Self>, tick: Duration) -> Option<JoinHandle<()>> {
        if !self.role.is_host() || !self.limits().time.is_enabled() {
            return None;
        }
        let session = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = session.cancel.cancelled() => {
                        debug!(session = %session.session_id, "Session limit timer stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if session.tick_time_limit().await.is_some() {
                            break;
                        }
                        session.broadcast_limits().await;
                    }
                }
            }
        }))
    }

    /// Leave the session. A host tells its peers first.
    pub async fn disconnect(&self) {
        if self.role.is_host() {
            let peers = self.inner.lock().connected.clone();
            self.transmit(peers, &SessionMessage::Disconnect).await;
        }
        self.teardown("disconnected");
    }

    /// A local session has no room to deactivate or trim: any expiry ends it
    async fn expire(&self, expiry: LimitExpiry) {
        info!(
            session = %self.session_id,
            kind = ?expiry.kind,
            action = %expiry.action,
            "Session limit expired, ending session"
        );
        if expiry.action == LimitAction::Nothing {
            debug!(session = %self.session_id, "Configured action is nothing; session still ends");
        }
        let peers = self.inner.lock().connected.clone();
        self.transmit(peers, &SessionMessage::Disconnect).await;
        self.teardown(&format!("{:?} limit expired", expiry.kind));
    }

    fn teardown(&self, reason: &str) {
        {
            let mut inner = self.inner.lock();
            if !inner.active {
                return;
            }
            inner.active = false;
            inner.state = QueueState::new();
            inner.discovered.clear();
            inner.connected.clear();
        }
        self.cancel.cancel();
        info!(session = %self.session_id, reason, "Session ended");
        publish(
            &self.events,
            EngineEvent::SessionEnded {
                reason: reason.to_string(),
                timestamp: Utc::now(),
            },
        );
    }

    async fn apply_and_broadcast<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut SessionInner) -> R,
    {
        let _gate = self.send_gate.lock().await;
        let (result, peers, message) = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return Err(Error::Inactive(format!("session {}", self.session_id)));
            }
            let result = f(&mut inner);
            (
                result,
                inner.connected.clone(),
                SessionMessage::State(inner.state.clone()),
            )
        };
        self.transmit(peers, &message).await;
        Ok(result)
    }

    /// Send without retrying; a failed send is only logged
    async fn transmit(&self, peers: Vec<PeerId>, message: &SessionMessage) {
        if peers.is_empty() {
            return;
        }
        let payload = match message.encode() {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!(session = %self.session_id, error = %e, "Failed to encode session payload");
                return;
            }
        };
        let peer_count = peers.len();
        if let Err(e) = self.transport.send(peers, payload).await {
            warn!(
                session = %self.session_id,
                peers = peer_count,
                error = %e,
                "Session broadcast failed"
            );
        }
    }

    fn forward_to_playback(&self, entries: &[QueueEntry]) {
        if let Some(playback) = &self.playback {
            for entry in entries {
                playback.enqueue(&self.session_id, entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockBroadcastTransport, MockPlaybackSink};
    use syncq_core::models::{PlayType, SongRef};
    use tokio::sync::broadcast;

    /// Transport that records what was sent
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(Vec<PeerId>, Bytes)>>,
    }

    #[async_trait::async_trait]
    impl BroadcastTransport for RecordingTransport {
        async fn send(&self, peers: Vec<PeerId>, payload: Bytes) -> Result<()> {
            self.sent.lock().push((peers, payload));
            Ok(())
        }
    }

    impl RecordingTransport {
        fn last_message(&self) -> Option<SessionMessage> {
            self.sent
                .lock()
                .last()
                .and_then(|(_, payload)| SessionMessage::decode(payload).ok())
        }
    }

    fn entry(song: &str, millis: i64) -> QueueEntry {
        QueueEntry::new(SongRef::from(song), song, PlayType::Later, "guest").with_time_added(
            chrono::DateTime::from_timestamp_millis(millis).unwrap(),
        )
    }

    fn session(role: SessionRole, transport: Arc<dyn BroadcastTransport>) -> SessionReplicator {
        let (events, _) = broadcast::channel(16);
        SessionReplicator::new(RoomId::from("session"), role, transport, events)
    }

    #[tokio::test]
    async fn test_mutation_is_broadcast_in_full() {
        let transport = Arc::new(RecordingTransport::default());
        let host = session(SessionRole::Host, transport.clone());
        host.on_peer_event(PeerId::from("p1"), PeerChange::Connected).await;

        host.add_entry(entry("a", 1_000)).await.unwrap();
        host.add_entry(entry("b", 2_000)).await.unwrap();

        match transport.last_message() {
            Some(SessionMessage::State(state)) => {
                let songs: Vec<_> = state.entries.iter().map(|e| e.title.clone()).collect();
                assert_eq!(songs, vec!["b", "a"]);
            }
            other => panic!("expected state, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_last_full_state_wins() {
        let transport = Arc::new(RecordingTransport::default());
        let participant = session(SessionRole::Participant, transport);
        let peer = PeerId::from("host");

        let mut e1 = QueueState::new();
        e1.entries.push(entry("one", 1_000));
        let mut e2 = e1.clone();
        e2.entries.insert(0, entry("two", 2_000));

        // E2 arrives before E1: the older state is still applied last
        participant
            .on_receive(&peer, &SessionMessage::State(e2).encode().unwrap())
            .await;
        participant
            .on_receive(&peer, &SessionMessage::State(e1).encode().unwrap())
            .await;

        let state = participant.state();
        assert_eq!(state.len(), 1);
        assert_eq!(state.entries[0].title, "one");
    }

    /// Transport whose first send stalls long enough for a later one to overtake it
    #[derive(Default)]
    struct StallingTransport {
        calls: std::sync::atomic::AtomicUsize,
        sent: Mutex<Vec<Bytes>>,
    }

    #[async_trait::async_trait]
    impl BroadcastTransport for StallingTransport {
        async fn send(&self, _peers: Vec<PeerId>, payload: Bytes) -> Result<()> {
            if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.sent.lock().push(payload);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_mutations_reach_peers_in_order() {
        let transport = Arc::new(StallingTransport::default());
        let participant = Arc::new(session(SessionRole::Participant, transport.clone()));
        participant
            .on_peer_event(PeerId::from("host"), PeerChange::Connected)
            .await;

        let first = {
            let participant = Arc::clone(&participant);
            tokio::spawn(async move { participant.add_entry(entry("a", 1_000)).await })
        };
        // Let the first mutation reach its stalled send
        tokio::task::yield_now().await;
        let second = {
            let participant = Arc::clone(&participant);
            tokio::spawn(async move { participant.add_entry(entry("b", 2_000)).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 2);
        match SessionMessage::decode(&sent[1]).unwrap() {
            SessionMessage::State(state) => assert_eq!(state.len(), 2),
            other => panic!("expected state, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_host_pushes_state_on_connect() {
        let transport = Arc::new(RecordingTransport::default());
        let host = session(SessionRole::Host, transport.clone());
        host.add_entry(entry("a", 1_000)).await.unwrap();
        assert!(transport.sent.lock().is_empty());

        host.on_peer_event(PeerId::from("p1"), PeerChange::Discovered).await;
        assert_eq!(host.discovered_peers().len(), 1);
        host.on_peer_event(PeerId::from("p1"), PeerChange::Connected).await;

        assert!(host.discovered_peers().is_empty());
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec![PeerId::from("p1")]);
    }

    #[tokio::test]
    async fn test_send_failure_is_not_retried() {
        let mut transport = MockBroadcastTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_, _| Err(Error::Transport("link down".to_string())));
        let participant = session(SessionRole::Participant, Arc::new(transport));
        participant
            .on_peer_event(PeerId::from("host"), PeerChange::Connected)
            .await;

        participant.add_entry(entry("a", 1)).await.unwrap();
        assert_eq!(participant.state().len(), 1);
    }

    #[tokio::test]
    async fn test_garbage_payload_is_dropped() {
        let participant = session(SessionRole::Participant, Arc::new(RecordingTransport::default()));
        participant.add_entry(entry("a", 1)).await.unwrap();
        participant.on_receive(&PeerId::from("x"), b"\x00\x01not json").await;
        assert_eq!(participant.state().len(), 1);
        assert!(participant.is_active());
    }

    #[tokio::test]
    async fn test_participant_adopts_limits() {
        let participant = session(SessionRole::Participant, Arc::new(RecordingTransport::default()));
        let pack = LimitInfoPack {
            is_time_limit: true,
            time_limit: 30,
            is_song_limit: true,
            song_limit: 2,
        };
        participant
            .on_receive(&PeerId::from("host"), &SessionMessage::Limits(pack).encode().unwrap())
            .await;
        assert_eq!(participant.limits().to_info_pack(), pack);
    }

    #[tokio::test]
    async fn test_host_counts_received_entries_and_forwards_them() {
        let mut playback = MockPlaybackSink::new();
        playback.expect_enqueue().times(2).return_const(());
        let host = session(SessionRole::Host, Arc::new(RecordingTransport::default()))
            .with_playback(Arc::new(playback))
            .with_limits(&RoomDetails::new("party").with_song_limit(5, LimitAction::Nothing));

        host.add_entry(entry("a", 1_000)).await.unwrap();

        let mut incoming = host.state();
        incoming.entries.insert(0, entry("b", 2_000));
        host.on_receive(
            &PeerId::from("p1"),
            &SessionMessage::State(incoming.clone()).encode().unwrap(),
        )
        .await;
        // Re-delivery of the same state counts nothing
        host.on_receive(&PeerId::from("p1"), &SessionMessage::State(incoming).encode().unwrap())
            .await;

        assert_eq!(host.limits().songs_remaining(), 3);
    }

    #[tokio::test]
    async fn test_song_limit_expiry_ends_session() {
        let transport = Arc::new(RecordingTransport::default());
        let host = session(SessionRole::Host, transport.clone())
            .with_limits(&RoomDetails::new("party").with_song_limit(1, LimitAction::DeactivateRoom));
        let mut events = host.events.subscribe();
        host.on_peer_event(PeerId::from("p1"), PeerChange::Connected).await;

        let expiry = host.add_entry(entry("a", 1)).await.unwrap();
        assert_eq!(expiry.map(|e| e.action), Some(LimitAction::DeactivateRoom));
        assert!(!host.is_active());
        assert!(host.cancel_token().is_cancelled());
        assert!(matches!(transport.last_message(), Some(SessionMessage::Disconnect)));
        assert!(matches!(
            host.add_entry(entry("b", 2)).await,
            Err(Error::Inactive(_))
        ));

        let mut ended = false;
        while let Ok(event) = events.try_recv() {
            ended |= matches!(event, EngineEvent::SessionEnded { .. });
        }
        assert!(ended);
    }

    #[tokio::test]
    async fn test_disconnect_signal_tears_down() {
        let participant = session(SessionRole::Participant, Arc::new(RecordingTransport::default()));
        participant
            .on_peer_event(PeerId::from("host"), PeerChange::Connected)
            .await;
        participant.add_entry(entry("a", 1)).await.unwrap();

        participant
            .on_receive(&PeerId::from("host"), b"DISCONNECT SIGNAL")
            .await;
        assert!(!participant.is_active());
        assert!(participant.state().is_empty());
        assert!(participant.connected_peers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_timer_expires_time_limit() {
        let host = Arc::new(
            session(SessionRole::Host, Arc::new(RecordingTransport::default()))
                .with_limits(&RoomDetails::new("party").with_time_limit(3, LimitAction::Nothing)),
        );
        let handle = host.spawn_limit_timer(Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        handle.await.unwrap();
        assert!(host.limits().time.is_expired());
        assert!(!host.is_active());
    }
}
