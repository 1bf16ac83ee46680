use battle_types::{Battle, BattleId, BattleMode, BattleStatus, COUNTDOWN_SECONDS, Player, PlayerId, PlayerStatus};

use serde::Serialize;

use crate::ScoringEngine;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BattleEvent {
    PlayerJoined {
        battle_id: BattleId,
        player: Player,
    },
    CountdownStarted {
        battle_id: BattleId,
        seconds: u32,
    },
    BattleStarted {
        battle_id: BattleId,
        mode: BattleMode,
        time_limit_seconds: u32,
    },
    PlayerSubmitted {
        battle_id: BattleId,
        player_id: PlayerId,
        correct: bool,
        score: i32,
    },
    PlayerTimedOut {
        battle_id: BattleId,
        player_id: PlayerId,
    },
    BattleFinished {
        battle_id: BattleId,
        winner: Option<Player>,
        standings: Vec<Player>,
    },
}

impl BattleEvent {
    pub fn battle_id(&self) -> BattleId {
        match self {
            BattleEvent::PlayerJoined { battle_id, .. } => *battle_id,
            BattleEvent::CountdownStarted { battle_id, .. } => *battle_id,
            BattleEvent::BattleStarted { battle_id, .. } => *battle_id,
            BattleEvent::PlayerSubmitted { battle_id, .. } => *battle_id,
            BattleEvent::PlayerTimedOut { battle_id, .. } => *battle_id,
            BattleEvent::BattleFinished { battle_id, .. } => *battle_id,
        }
    }
}

fn crossed(previous: Option<BattleStatus>, next: BattleStatus, threshold: BattleStatus) -> bool {
    previous.is_none_or(|prev| prev < threshold) && next >= threshold
}

/// Derive events from two successive views of the same battle.
///
/// Events come from the documents alone, never from who wrote them, so every
/// subscriber sees the same events. With no previous view only the current
/// phase is reported.
pub fn observe_changes(previous: Option<&Battle>, next: &Battle) -> Vec<BattleEvent> {
    let mut events = Vec::new();
    let battle_id = next.id;
    let previous_status = previous.map(|b| b.status);

    if let Some(previous) = previous {
        for player in next.players.iter().filter(|p| !previous.contains_player(&p.id)) {
            events.push(BattleEvent::PlayerJoined {
                battle_id,
                player: player.clone(),
            });
        }
    }

    // A late subscriber only needs the phase it landed in
    let only_current = previous.is_none();

    if crossed(previous_status, next.status, BattleStatus::Countdown)
        && (!only_current || next.status == BattleStatus::Countdown)
    {
        events.push(BattleEvent::CountdownStarted {
            battle_id,
            seconds: COUNTDOWN_SECONDS,
        });
    }

    if crossed(previous_status, next.status, BattleStatus::InProgress)
        && (!only_current || next.status == BattleStatus::InProgress)
    {
        events.push(BattleEvent::BattleStarted {
            battle_id,
            mode: next.mode,
            time_limit_seconds: next.mode.time_limit_seconds(),
        });
    }

    if let Some(previous) = previous {
        for player in &next.players {
            let was_done = previous
                .player(&player.id)
                .is_some_and(|p| p.status == PlayerStatus::Submitted);
            if was_done || player.status != PlayerStatus::Submitted {
                continue;
            }

            events.push(match player.correct {
                Some(correct) => BattleEvent::PlayerSubmitted {
                    battle_id,
                    player_id: player.id.clone(),
                    correct,
                    score: player.score,
                },
                None => BattleEvent::PlayerTimedOut {
                    battle_id,
                    player_id: player.id.clone(),
                },
            });
        }
    }

    if crossed(previous_status, next.status, BattleStatus::Finished) {
        events.push(BattleEvent::BattleFinished {
            battle_id,
            winner: next.winning_player().cloned(),
            standings: ScoringEngine::standings(&next.players),
        });
    }

    events
}

/// Event handler trait for processing battle events
pub trait BattleEventHandler: Send {
    fn handle_event(&mut self, event: BattleEvent);
}

/// Simple event bus for distributing battle events
pub struct BattleEventBus {
    handlers: Vec<Box<dyn BattleEventHandler>>,
}

impl BattleEventBus {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn add_handler(&mut self, handler: Box<dyn BattleEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn publish(&mut self, event: BattleEvent) {
        for handler in &mut self.handlers {
            handler.handle_event(event.clone());
        }
    }

    pub fn publish_all(&mut self, events: impl IntoIterator<Item = BattleEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

impl Default for BattleEventBus {
    fn default() -> Self {
        Self::new()
    }
}
