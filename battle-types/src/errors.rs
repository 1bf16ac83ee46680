use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::{BattleId, BattleStatus, PlayerId};

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum BattleError {
    #[error("invalid request: {message}")]
    Validation { message: String },
    #[error("battle {battle_id} not found")]
    NotFound { battle_id: BattleId },
    #[error("battle is full")]
    Full { battle_id: BattleId },
    #[error("already in this battle")]
    AlreadyJoined { player_id: PlayerId },
    #[error("player {player_id} is not in this battle")]
    NotParticipant { player_id: PlayerId },
    #[error("player {player_id} has already submitted")]
    AlreadySubmitted { player_id: PlayerId },
    #[error("time is up")]
    TimeExpired,
    #[error("battle is {current}")]
    InvalidState { current: BattleStatus },
    // Network or storage failure; the caller may retry manually
    #[error("store unavailable: {message}")]
    Store { message: String },
}

impl BattleError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        BattleError::Store {
            message: err.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BattleError::Validation {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BattleError::Store { .. })
    }
}
