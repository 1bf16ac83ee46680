use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{Battle, BattleId, Player, PlayerId, PlayerProfile};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ClientMessage {
    Identify {
        player_id: Option<PlayerId>,
        display_name: String,
        avatar_ref: Option<String>,
    },
    CreateBattle { mode: String },
    JoinBattle { battle_id: BattleId },
    WatchBattle { battle_id: BattleId },
    ListBattles { mode: String },
    SubmitSolution { code: String },
    LeaveBattle,
    Heartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ServerMessage {
    Identified { player: PlayerProfile },
    BattleCreated { battle_id: BattleId },
    BattleJoined { battle_id: BattleId },
    WaitingBattles { battles: Vec<Battle> },
    BattleUpdate {
        battle: Battle,
        countdown_remaining: Option<u32>,
        seconds_remaining: Option<u32>,
    },
    PlayerJoined { player: Player },
    CountdownStarted { seconds: u32 },
    BattleStarted { time_limit_seconds: u32 },
    SubmissionResult { correct: bool, points_earned: i32 },
    BattleFinished {
        winner: Option<Player>,
        standings: Vec<Player>,
    },
    BattleLeft,
    Error { message: String },
}
