use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{BattleError, BattleId, Challenge, Player, PlayerId, PlayerStatus};

/// Seconds between the countdown starting and the battle going live.
pub const COUNTDOWN_SECONDS: u32 = 15;

/// Hard cap on the number of players (spectators included) in one battle.
pub const MAX_PLAYERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum BattleMode {
    Classic,
    TimeAttack,
    Survival,
    Practice,
}

/// Static rules attached to a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeConfig {
    /// Zero means the battle never times out.
    pub time_limit_seconds: u32,
    pub min_players: usize,
    pub label: &'static str,
    pub description: &'static str,
}

impl BattleMode {
    pub const ALL: [BattleMode; 4] = [
        BattleMode::Classic,
        BattleMode::TimeAttack,
        BattleMode::Survival,
        BattleMode::Practice,
    ];

    pub const fn config(self) -> ModeConfig {
        match self {
            BattleMode::Classic => ModeConfig {
                time_limit_seconds: 300,
                min_players: 2,
                label: "Classic",
                description: "Solve one challenge before the five minute clock runs out",
            },
            BattleMode::TimeAttack => ModeConfig {
                time_limit_seconds: 600,
                min_players: 2,
                label: "Time Attack",
                description: "A longer clock with a bigger bonus for finishing early",
            },
            BattleMode::Survival => ModeConfig {
                time_limit_seconds: 180,
                min_players: 2,
                label: "Survival",
                description: "Three minutes, no second chances",
            },
            BattleMode::Practice => ModeConfig {
                time_limit_seconds: 0,
                min_players: 1,
                label: "Practice",
                description: "Solo warm-up without a clock",
            },
        }
    }

    pub const fn time_limit_seconds(self) -> u32 {
        self.config().time_limit_seconds
    }

    pub const fn min_players(self) -> usize {
        self.config().min_players
    }

    pub fn is_timed(self) -> bool {
        self.time_limit_seconds() > 0
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BattleMode::Classic => "classic",
            BattleMode::TimeAttack => "timeAttack",
            BattleMode::Survival => "survival",
            BattleMode::Practice => "practice",
        }
    }
}

impl fmt::Display for BattleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BattleMode {
    type Err = BattleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        if tag.is_empty() {
            return Err(BattleError::Validation {
                message: "battle mode is required".to_string(),
            });
        }

        BattleMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(tag))
            .ok_or_else(|| BattleError::Validation {
                message: format!("unknown battle mode: {}", tag),
            })
    }
}

/// Lifecycle of a battle. The derived ordering is the only legal direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum BattleStatus {
    Waiting,
    Countdown,
    InProgress,
    Finished,
}

impl BattleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BattleStatus::Waiting => "waiting",
            BattleStatus::Countdown => "countdown",
            BattleStatus::InProgress => "inProgress",
            BattleStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for BattleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shared battle document every participant reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Battle {
    pub id: BattleId,
    pub mode: BattleMode,
    pub status: BattleStatus,
    pub players: Vec<Player>,
    pub challenge: Challenge,
    pub created_at: DateTime<Utc>,
    pub countdown_start: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub winner: Option<PlayerId>,
}

impl Battle {
    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn player_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == player_id)
    }

    pub fn contains_player(&self, player_id: &str) -> bool {
        self.player(player_id).is_some()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }

    /// Whether the battle should still be offered in the lobby.
    pub fn is_joinable(&self) -> bool {
        self.status == BattleStatus::Waiting && !self.is_full()
    }

    pub fn all_players_done(&self) -> bool {
        self.players.iter().all(|p| p.status.is_done())
    }

    pub fn winning_player(&self) -> Option<&Player> {
        self.winner.as_deref().and_then(|id| self.player(id))
    }

    pub fn count_with_status(&self, status: PlayerStatus) -> usize {
        self.players.iter().filter(|p| p.status == status).count()
    }
}

/// Partial update merged into a battle document.
///
/// Player records are matched by id; every other field is only written when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BattlePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BattleStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub players: Vec<Player>,
}

impl BattlePatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.countdown_start.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.winner.is_none()
            && self.players.is_empty()
    }
}
