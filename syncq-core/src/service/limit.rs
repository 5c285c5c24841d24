//! Limit state machine
//!
//! Each counter moves `Unarmed -> Armed(n) -> Expired`. A decrement is a
//! single `&mut self` step, so callers holding the room lock can neither
//! double-count an event nor fire an expiry twice in one arm cycle.

use serde::{Deserialize, Serialize};

use crate::models::{LimitAction, LimitInfoPack, LimitKind, RoomDetails};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitPhase {
    Unarmed,
    Armed(u32),
    Expired,
}

/// One countdown (songs or seconds) with its configured expiry action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitCounter {
    phase: LimitPhase,
    action: LimitAction,
}

impl LimitCounter {
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            phase: LimitPhase::Unarmed,
            action: LimitAction::Nothing,
        }
    }

    /// Counter restored from persisted state; a remaining value of zero is
    /// already expired and will not fire again.
    #[must_use]
    pub const fn restored(remaining: Option<u32>, action: LimitAction) -> Self {
        let phase = match remaining {
            None => LimitPhase::Unarmed,
            Some(0) => LimitPhase::Expired,
            Some(n) => LimitPhase::Armed(n),
        };
        Self { phase, action }
    }

    /// Enable the limit, starting a new arm cycle
    pub fn arm(&mut self, initial: u32, action: LimitAction) -> Result<()> {
        if initial == 0 {
            return Err(Error::InvalidInput(
                "limit must start above zero".to_string(),
            ));
        }
        self.phase = LimitPhase::Armed(initial);
        self.action = action;
        Ok(())
    }

    pub fn disarm(&mut self) {
        self.phase = LimitPhase::Unarmed;
    }

    /// Count one event. Returns the action exactly when this call expired the counter.
    pub fn decrement(&mut self) -> Option<LimitAction> {
        match self.phase {
            LimitPhase::Armed(n) if n > 1 => {
                self.phase = LimitPhase::Armed(n - 1);
                None
            }
            LimitPhase::Armed(_) => {
                self.phase = LimitPhase::Expired;
                Some(self.action)
            }
            LimitPhase::Unarmed | LimitPhase::Expired => None,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> LimitPhase {
        self.phase
    }

    #[must_use]
    pub const fn action(&self) -> LimitAction {
        self.action
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self.phase, LimitPhase::Unarmed)
    }

    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self.phase, LimitPhase::Expired)
    }

    /// Remaining count, zero once expired or while unarmed
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        match self.phase {
            LimitPhase::Armed(n) => n,
            LimitPhase::Unarmed | LimitPhase::Expired => 0,
        }
    }
}

impl Default for LimitCounter {
    fn default() -> Self {
        Self::disabled()
    }
}

/// A counter that just expired, with the action it asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitExpiry {
    pub kind: LimitKind,
    pub action: LimitAction,
}

/// Song-count and elapsed-time limits of one room or session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitState {
    pub song: LimitCounter,
    pub time: LimitCounter,
}

impl LimitState {
    #[must_use]
    pub const fn from_details(details: &RoomDetails) -> Self {
        Self {
            song: LimitCounter::restored(details.song_limit, details.song_limit_action),
            time: LimitCounter::restored(details.time_limit, details.time_limit_action),
        }
    }

    /// Count one accepted queue entry
    pub fn record_song(&mut self) -> Option<LimitExpiry> {
        self.song.decrement().map(|action| LimitExpiry {
            kind: LimitKind::Songs,
            action,
        })
    }

    /// Count one elapsed whole second
    pub fn tick_second(&mut self) -> Option<LimitExpiry> {
        self.time.decrement().map(|action| LimitExpiry {
            kind: LimitKind::Time,
            action,
        })
    }

    #[must_use]
    pub const fn songs_remaining(&self) -> u32 {
        self.song.remaining()
    }

    #[must_use]
    pub const fn seconds_remaining(&self) -> u32 {
        self.time.remaining()
    }

    #[must_use]
    pub const fn any_expired(&self) -> bool {
        self.song.is_expired() || self.time.is_expired()
    }

    #[must_use]
    pub const fn to_info_pack(&self) -> LimitInfoPack {
        LimitInfoPack {
            is_time_limit: self.time.is_enabled(),
            time_limit: self.time.remaining(),
            is_song_limit: self.song.is_enabled(),
            song_limit: self.song.remaining(),
        }
    }

    /// Adopt the host's broadcast counters. Participants only mirror them,
    /// so the configured actions are kept as they are.
    pub fn apply_info_pack(&mut self, pack: LimitInfoPack) {
        self.song = LimitCounter::restored(
            pack.is_song_limit.then_some(pack.song_limit),
            self.song.action(),
        );
        self.time = LimitCounter::restored(
            pack.is_time_limit.then_some(pack.time_limit),
            self.time.action(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unarmed_ignores_decrements() {
        let mut counter = LimitCounter::disabled();
        assert_eq!(counter.decrement(), None);
        assert_eq!(counter.phase(), LimitPhase::Unarmed);
        assert_eq!(counter.remaining(), 0);
    }

    #[test]
    fn test_expiry_fires_exactly_once_per_arm_cycle() {
        let mut counter = LimitCounter::disabled();
        counter.arm(3, LimitAction::DeleteRoom).unwrap();

        let fired: Vec<_> = (0..10).filter_map(|_| counter.decrement()).collect();
        assert_eq!(fired, vec![LimitAction::DeleteRoom]);
        assert!(counter.is_expired());
        assert_eq!(counter.remaining(), 0);

        counter.arm(1, LimitAction::Nothing).unwrap();
        assert_eq!(counter.decrement(), Some(LimitAction::Nothing));
        assert_eq!(counter.decrement(), None);
    }

    #[test]
    fn test_remaining_is_monotonic_and_never_negative() {
        let mut counter = LimitCounter::disabled();
        counter.arm(5, LimitAction::Nothing).unwrap();
        let mut last = counter.remaining();
        for _ in 0..20 {
            counter.decrement();
            assert!(counter.remaining() <= last);
            last = counter.remaining();
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn test_arm_rejects_zero() {
        let mut counter = LimitCounter::disabled();
        assert!(counter.arm(0, LimitAction::Nothing).is_err());
        assert_eq!(counter.phase(), LimitPhase::Unarmed);
    }

    #[test]
    fn test_restored_zero_is_already_expired() {
        let mut counter = LimitCounter::restored(Some(0), LimitAction::DeleteRoom);
        assert!(counter.is_expired());
        assert_eq!(counter.decrement(), None);
    }

    #[test]
    fn test_limit_state_kinds() {
        let details = RoomDetails::new("Party")
            .with_song_limit(1, LimitAction::DeactivateRoom)
            .with_time_limit(2, LimitAction::RemoveParticipants);
        let mut limits = LimitState::from_details(&details);

        assert_eq!(
            limits.record_song(),
            Some(LimitExpiry {
                kind: LimitKind::Songs,
                action: LimitAction::DeactivateRoom
            })
        );
        assert_eq!(limits.tick_second(), None);
        assert_eq!(
            limits.tick_second().map(|e| e.action),
            Some(LimitAction::RemoveParticipants)
        );
        assert!(limits.any_expired());
    }

    #[test]
    fn test_info_pack_mirrors_counters() {
        let mut host = LimitState::default();
        host.song.arm(4, LimitAction::Nothing).unwrap();
        host.record_song();

        let mut participant = LimitState::default();
        participant.apply_info_pack(host.to_info_pack());
        assert_eq!(participant.songs_remaining(), 3);
        assert!(participant.song.is_enabled());
        assert!(!participant.time.is_enabled());
    }
}
