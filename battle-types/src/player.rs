use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::PlayerId;

/// Who a connection claims to be. Presentation fields only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PlayerProfile {
    pub id: PlayerId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum PlayerStatus {
    Waiting,
    Playing,
    Submitted,
    Spectating, // Terminal, never competes
}

impl PlayerStatus {
    /// Submitted and spectating players no longer hold up the battle.
    pub fn is_done(self) -> bool {
        matches!(self, PlayerStatus::Submitted | PlayerStatus::Spectating)
    }

    /// Forward-only: waiting -> playing -> submitted, or anything non-terminal -> spectating.
    pub fn can_advance_to(self, next: PlayerStatus) -> bool {
        use PlayerStatus::*;
        matches!(
            (self, next),
            (Waiting, Playing)
                | (Waiting, Submitted)
                | (Playing, Submitted)
                | (Waiting, Spectating)
                | (Playing, Spectating)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub score: i32,
    pub status: PlayerStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub correct: Option<bool>,
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
            score: 0,
            status: PlayerStatus::Waiting,
            submitted_at: None,
            correct: None,
        }
    }

    pub fn profile(&self) -> PlayerProfile {
        PlayerProfile {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            avatar_ref: self.avatar_ref.clone(),
        }
    }
}

impl From<PlayerProfile> for Player {
    fn from(profile: PlayerProfile) -> Self {
        Player {
            avatar_ref: profile.avatar_ref,
            ..Player::new(profile.id, profile.display_name)
        }
    }
}
