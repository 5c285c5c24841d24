use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// What a room does when one of its limits runs out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimitAction {
    #[default]
    Nothing,
    /// Stop accepting new queue entries, keep the room visible
    DeactivateRoom,
    /// Remove every participant except the owner
    RemoveParticipants,
    /// Delete the room's backing zone
    DeleteRoom,
}

impl LimitAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Nothing => "nothing",
            Self::DeactivateRoom => "deactivateRoom",
            Self::RemoveParticipants => "removeParticipants",
            Self::DeleteRoom => "deleteRoom",
        }
    }
}

impl FromStr for LimitAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nothing" => Ok(Self::Nothing),
            "deactivateRoom" => Ok(Self::DeactivateRoom),
            "removeParticipants" => Ok(Self::RemoveParticipants),
            "deleteRoom" => Ok(Self::DeleteRoom),
            other => Err(Error::decode(format!("unknown limit action `{other}`"))),
        }
    }
}

impl std::fmt::Display for LimitAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which counter a limit event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    Songs,
    Time,
}

/// Periodic host -> participant limit broadcast in a local session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LimitInfoPack {
    pub is_time_limit: bool,
    pub time_limit: u32,
    pub is_song_limit: bool,
    pub song_limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_action_strings() {
        for action in [
            LimitAction::Nothing,
            LimitAction::DeactivateRoom,
            LimitAction::RemoveParticipants,
            LimitAction::DeleteRoom,
        ] {
            assert_eq!(action.as_str().parse::<LimitAction>().unwrap(), action);
            assert_eq!(
                serde_json::to_string(&action).unwrap(),
                format!("\"{}\"", action.as_str())
            );
        }
        assert!("explode".parse::<LimitAction>().is_err());
    }

    #[test]
    fn test_limit_info_pack_keys() {
        let pack = LimitInfoPack {
            is_time_limit: true,
            time_limit: 90,
            is_song_limit: false,
            song_limit: 0,
        };
        let json = serde_json::to_value(pack).unwrap();
        assert_eq!(json["isTimeLimit"], true);
        assert_eq!(json["timeLimit"], 90);
        assert_eq!(json["isSongLimit"], false);
    }
}
