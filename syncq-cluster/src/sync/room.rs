//! Per-room state owned by the engine
//!
//! All mutation of a [`Room`] goes through its handle's lock. Network I/O
//! happens outside it; results re-acquire the lock to apply.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use syncq_core::codec::is_newer_than;
use syncq_core::models::{
    NowPlaying, QueueEntry, ResumeToken, Room, RoomDetails, RoomId, SharingInfo, SyncStatus,
};
use syncq_core::service::{merge_batch, merge_entry, LimitExpiry, LimitState};
use tokio_util::sync::CancellationToken;

use super::changes::RecordChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomRole {
    /// Owns the room: counts limits and feeds playback
    Host,
    Participant,
}

/// What applying one change did to the room
#[derive(Debug, Clone)]
pub enum ChangeEffect {
    Accepted {
        entry: QueueEntry,
        /// Host of an active room: hand the entry to playback
        forward: bool,
        /// Set when this entry used up the song limit
        expiry: Option<LimitExpiry>,
        /// Host-side song counter moved and should be persisted
        limits_changed: bool,
    },
    Duplicate,
    /// The room is inactive and takes no further entries
    Rejected(QueueEntry),
    NowPlaying(NowPlaying),
    Details(RoomDetails),
    Sharing(SharingInfo),
}

/// Outcome of one elapsed second on a host
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub expiry: Option<LimitExpiry>,
    /// Details carrying the current counters, when due for persisting
    pub persist: Option<RoomDetails>,
}

/// Marks a fetch in flight; cleared on drop
pub struct FetchGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct RoomHandle {
    id: RoomId,
    role: RoomRole,
    room: Mutex<Room>,
    /// Entries added at or before this instant were covered by the full
    /// fetch; replaying them never counts or plays
    activated_at: Mutex<Option<DateTime<Utc>>>,
    fetch_in_flight: AtomicBool,
    ticks_since_persist: AtomicU32,
    persist_every_ticks: u32,
    cancel: CancellationToken,
}

impl RoomHandle {
    #[must_use]
    pub fn new(room: Room, role: RoomRole, persist_every_ticks: u32) -> Self {
        Self {
            id: room.id.clone(),
            role,
            room: Mutex::new(room),
            activated_at: Mutex::new(None),
            fetch_in_flight: AtomicBool::new(false),
            ticks_since_persist: AtomicU32::new(0),
            persist_every_ticks: persist_every_ticks.max(1),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &RoomId {
        &self.id
    }

    #[must_use]
    pub const fn role(&self) -> RoomRole {
        self.role
    }

    #[must_use]
    pub const fn is_host(&self) -> bool {
        matches!(self.role, RoomRole::Host)
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Claim the room's single fetch slot, or `None` when a fetch is running
    #[must_use]
    pub fn try_begin_fetch(&self) -> Option<FetchGuard<'_>> {
        self.fetch_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FetchGuard {
                flag: &self.fetch_in_flight,
            })
    }

    #[must_use]
    pub fn snapshot(&self) -> Room {
        self.room.lock().clone()
    }

    /// Queue, most recently added first
    #[must_use]
    pub fn queue(&self) -> Vec<QueueEntry> {
        self.room.lock().queue.clone()
    }

    #[must_use]
    pub fn details(&self) -> RoomDetails {
        self.room.lock().details.clone()
    }

    #[must_use]
    pub fn sharing(&self) -> Option<SharingInfo> {
        self.room.lock().sharing.clone()
    }

    #[must_use]
    pub fn limits(&self) -> LimitState {
        self.room.lock().limits
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.room.lock().is_active()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.room.lock().status
    }

    pub fn set_status(&self, status: SyncStatus) {
        self.room.lock().status = status;
    }

    #[must_use]
    pub fn resume_token(&self) -> Option<ResumeToken> {
        self.room.lock().resume_token.clone()
    }

    pub fn set_resume_token(&self, token: Option<ResumeToken>) {
        self.room.lock().resume_token = token;
    }

    /// Merge a full-fetch batch taken at `activated_at` in one step. Initial
    /// entries, and any later replay of entries that old, count against no limit.
    pub fn merge_initial(&self, entries: Vec<QueueEntry>, activated_at: DateTime<Utc>) -> Vec<QueueEntry> {
        let mut room = self.room.lock();
        *self.activated_at.lock() = Some(activated_at);
        merge_batch(&mut room.queue, entries)
    }

    /// Apply one observed change. Merge, limit decrement and expiry happen
    /// under a single lock acquisition.
    pub fn apply_change(&self, change: RecordChange) -> ChangeEffect {
        let mut room = self.room.lock();
        match change {
            RecordChange::QueueEntryChanged(entry) => {
                let replayed = !is_newer_than(entry.time_added, *self.activated_at.lock());
                self.accept_entry(&mut room, entry, replayed)
            }
            RecordChange::NowPlayingChanged(now_playing) => {
                room.now_playing = Some(now_playing.clone());
                ChangeEffect::NowPlaying(now_playing)
            }
            RecordChange::DetailsChanged(mut details) => {
                if self.is_host() {
                    // The host's counters are authoritative
                    let limits = room.limits;
                    details.absorb_limits(&limits);
                } else {
                    room.limits = LimitState::from_details(&details);
                }
                room.details = details.clone();
                ChangeEffect::Details(details)
            }
            RecordChange::SharingChanged(sharing) => {
                room.sharing = Some(sharing.clone());
                ChangeEffect::Sharing(sharing)
            }
        }
    }

    /// Merge an entry this device just wrote. It is a new addition whatever
    /// its timestamp.
    pub fn add_local(&self, entry: QueueEntry) -> ChangeEffect {
        let mut room = self.room.lock();
        self.accept_entry(&mut room, entry, false)
    }

    fn accept_entry(&self, room: &mut Room, entry: QueueEntry, replayed: bool) -> ChangeEffect {
        if !room.is_active() {
            return ChangeEffect::Rejected(entry);
        }
        if !merge_entry(&mut room.queue, entry.clone()).is_inserted() {
            return ChangeEffect::Duplicate;
        }
        let counts = self.is_host() && !replayed;
        let limits_changed = counts && room.limits.song.is_enabled() && !room.limits.song.is_expired();
        let expiry = if counts { room.limits.record_song() } else { None };
        if limits_changed {
            let limits = room.limits;
            room.details.absorb_limits(&limits);
        }
        ChangeEffect::Accepted {
            entry,
            forward: counts,
            expiry,
            limits_changed,
        }
    }

    /// Host-side: count one elapsed second of an active room
    pub fn tick_time_limit(&self) -> TickOutcome {
        if !self.is_host() {
            return TickOutcome::default();
        }
        let mut room = self.room.lock();
        if !room.is_active() || !room.limits.time.is_enabled() || room.limits.time.is_expired() {
            return TickOutcome::default();
        }

        let expiry = room.limits.tick_second();
        let ticks = self.ticks_since_persist.fetch_add(1, Ordering::AcqRel) + 1;
        let due = expiry.is_some() || ticks >= self.persist_every_ticks;
        let limits = room.limits;
        room.details.absorb_limits(&limits);

        let persist = due.then(|| {
            self.ticks_since_persist.store(0, Ordering::Release);
            room.details.clone()
        });
        TickOutcome { expiry, persist }
    }

    /// Replace details with a locally written copy, re-arming limits from it
    pub fn replace_details(&self, details: RoomDetails) {
        let mut room = self.room.lock();
        room.limits = LimitState::from_details(&details);
        room.details = details;
    }

    pub fn set_now_playing(&self, now_playing: NowPlaying) {
        self.room.lock().now_playing = Some(now_playing);
    }

    pub fn set_sharing(&self, sharing: SharingInfo) {
        self.room.lock().sharing = Some(sharing);
    }

    /// Clear the active flag, returning the details to persist
    pub fn deactivate(&self) -> RoomDetails {
        let mut room = self.room.lock();
        room.details.is_active = false;
        room.details.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncq_core::codec::is_newer_than;
use syncq_core::models::{LimitAction, PlayType, SongRef};

    fn entry(song: &str, millis: i64) -> QueueEntry {
        QueueEntry::new(SongRef::from(song), song, PlayType::Later, "guest")
            .with_time_added(chrono::DateTime::from_timestamp_millis(millis).unwrap())
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn handle(role: RoomRole, details: RoomDetails) -> RoomHandle {
        RoomHandle::new(Room::new(RoomId::from("zone"), details), role, 3)
    }

    #[test]
    fn test_fetch_guard_is_exclusive() {
        let room = handle(RoomRole::Participant, RoomDetails::new("r"));
        let guard = room.try_begin_fetch();
        assert!(guard.is_some());
        assert!(room.try_begin_fetch().is_none());
        drop(guard);
        assert!(room.try_begin_fetch().is_some());
    }

    #[test]
    fn test_host_counts_only_new_entries() {
        let room = handle(
            RoomRole::Host,
            RoomDetails::new("r").with_song_limit(3, LimitAction::Nothing),
        );
        let first = room.apply_change(RecordChange::QueueEntryChanged(entry("a", 1)));
        assert!(matches!(first, ChangeEffect::Accepted { forward: true, limits_changed: true, .. }));
        let again = room.apply_change(RecordChange::QueueEntryChanged(entry("a", 1)));
        assert!(matches!(again, ChangeEffect::Duplicate));

        assert_eq!(room.limits().songs_remaining(), 2);
        assert_eq!(room.details().song_limit, Some(2));
    }

    #[test]
    fn test_initial_entries_do_not_count() {
        let room = handle(
            RoomRole::Host,
            RoomDetails::new("r").with_song_limit(2, LimitAction::Nothing),
        );
        let accepted = room.merge_initial(vec![entry("b", 2), entry("a", 1), entry("b", 2)], at(10));
        assert_eq!(accepted.len(), 2);
        assert_eq!(room.limits().songs_remaining(), 2);
    }

    #[test]
    fn test_replayed_history_merges_without_counting() {
        let room = handle(
            RoomRole::Host,
            RoomDetails::new("r").with_song_limit(5, LimitAction::Nothing),
        );
        room.merge_initial(Vec::new(), at(10));

        // Older than the full fetch window, so absent from the initial batch
        let old = room.apply_change(RecordChange::QueueEntryChanged(entry("old", 3)));
        assert!(matches!(
            old,
            ChangeEffect::Accepted { forward: false, expiry: None, limits_changed: false, .. }
        ));
        let edge = room.apply_change(RecordChange::QueueEntryChanged(entry("edge", 10)));
        assert!(matches!(edge, ChangeEffect::Accepted { forward: false, .. }));
        assert_eq!(room.limits().songs_remaining(), 5);

        let fresh = room.apply_change(RecordChange::QueueEntryChanged(entry("new", 11)));
        assert!(matches!(fresh, ChangeEffect::Accepted { forward: true, limits_changed: true, .. }));
        assert_eq!(room.limits().songs_remaining(), 4);

        // A local write counts even when stamped within the fetched window
        let local = room.add_local(entry("mine", 10));
        assert!(matches!(local, ChangeEffect::Accepted { forward: true, .. }));
        assert_eq!(room.limits().songs_remaining(), 3);
        assert_eq!(room.queue().len(), 4);
    }

    #[test]
    fn test_inactive_room_rejects_entries() {
        let mut details = RoomDetails::new("r").with_song_limit(2, LimitAction::Nothing);
        details.is_active = false;
        let room = handle(RoomRole::Host, details);

        let effect = room.apply_change(RecordChange::QueueEntryChanged(entry("a", 1)));
        assert!(matches!(effect, ChangeEffect::Rejected(_)));
        assert!(room.queue().is_empty());
        assert_eq!(room.limits().songs_remaining(), 2);

        let participant = handle(RoomRole::Participant, RoomDetails::new("r"));
        participant.apply_change(RecordChange::QueueEntryChanged(entry("a", 1)));
        let mut closed = RoomDetails::new("r");
        closed.is_active = false;
        participant.apply_change(RecordChange::DetailsChanged(closed));
        let late = participant.apply_change(RecordChange::QueueEntryChanged(entry("b", 2)));
        assert!(matches!(late, ChangeEffect::Rejected(_)));
        assert_eq!(participant.queue().len(), 1);
    }

    #[test]
    fn test_host_keeps_its_counters_on_details_echo() {
        let room = handle(
            RoomRole::Host,
            RoomDetails::new("r").with_song_limit(3, LimitAction::Nothing),
        );
        room.apply_change(RecordChange::QueueEntryChanged(entry("a", 1)));

        let stale = RoomDetails::new("renamed").with_song_limit(3, LimitAction::Nothing);
        room.apply_change(RecordChange::DetailsChanged(stale));
        assert_eq!(room.details().name, "renamed");
        assert_eq!(room.details().song_limit, Some(2));
    }

    #[test]
    fn test_participant_mirrors_details_limits() {
        let room = handle(RoomRole::Participant, RoomDetails::new("r"));
        room.apply_change(RecordChange::DetailsChanged(
            RoomDetails::new("r").with_time_limit(60, LimitAction::DeleteRoom),
        ));
        assert_eq!(room.limits().seconds_remaining(), 60);
        assert_eq!(room.tick_time_limit().expiry, None);
    }

    #[test]
    fn test_tick_persists_periodically_and_on_expiry() {
        let room = handle(
            RoomRole::Host,
            RoomDetails::new("r").with_time_limit(4, LimitAction::DeleteRoom),
        );
        assert!(room.tick_time_limit().persist.is_none());
        assert!(room.tick_time_limit().persist.is_none());
        let third = room.tick_time_limit();
        assert_eq!(third.persist.map(|d| d.time_limit), Some(Some(1)));

        let last = room.tick_time_limit();
        assert_eq!(last.expiry.map(|e| e.action), Some(LimitAction::DeleteRoom));
        assert_eq!(last.persist.map(|d| d.time_limit), Some(Some(0)));

        let after = room.tick_time_limit();
        assert!(after.expiry.is_none() && after.persist.is_none());
    }
}
