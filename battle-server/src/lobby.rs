use battle_core::{ChallengeCatalog, Clock, SubmissionOutcome, submit, validate_player};
use battle_persistence::MatchStore;
use battle_types::{Battle, BattleError, BattleId, BattleMode, Player};
use dashmap::DashMap;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::sync::BattleSession;

/// Entry point for creating, joining and playing battles.
///
/// Each battle also gets a headless session on the server so it keeps moving even
/// when no client is connected to watch it.
pub struct BattleLobby {
    store: Arc<dyn MatchStore>,
    catalog: Arc<ChallengeCatalog>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    drivers: DashMap<BattleId, BattleSession>,
}

impl BattleLobby {
    pub fn new(
        store: Arc<dyn MatchStore>,
        catalog: Arc<ChallengeCatalog>,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            tick_interval,
            drivers: DashMap::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn MatchStore> {
        self.store.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Create a battle hosted by `host` around a randomly chosen challenge.
    pub async fn create_battle(&self, mode: BattleMode, host: Player) -> Result<Battle, BattleError> {
        validate_player(&host)?;
        let challenge = self
            .catalog
            .pick_random(None)
            .map_err(|e| BattleError::validation(e.to_string()))?;

        let host_id = host.id.clone();
        let battle_id = self.store.create_match(mode, challenge, host).await?;
        info!("Player {} created {} battle {}", host_id, mode, battle_id);

        self.drive(battle_id).await;
        self.store.get_match(battle_id).await
    }

    pub async fn join_battle(&self, battle_id: BattleId, player: Player) -> Result<Battle, BattleError> {
        validate_player(&player)?;
        let player_id = player.id.clone();
        self.store.join_match(battle_id, player).await?;
        info!("Player {} joined battle {}", player_id, battle_id);

        // A restarted server has no driver for battles created before it came up
        self.drive(battle_id).await;
        self.store.get_match(battle_id).await
    }

    pub async fn waiting_battles(&self, mode: BattleMode) -> Result<Vec<Battle>, BattleError> {
        let battles = self.store.list_waiting_matches(mode).await?;
        Ok(battles.collect().await)
    }

    pub async fn get_battle(&self, battle_id: BattleId) -> Result<Battle, BattleError> {
        self.store.get_match(battle_id).await
    }

    /// Judge a submission against the freshest copy of the battle and record it.
    pub async fn submit_solution(
        &self,
        battle_id: BattleId,
        player_id: &str,
        code: &str,
    ) -> Result<SubmissionOutcome, BattleError> {
        let now = self.clock.now();
        let battle = self.store.get_match(battle_id).await?;
        let outcome = submit(&battle, player_id, code, now)?;
        self.store
            .update_match(battle_id, outcome.patch.clone())
            .await?;

        // A timeout or another submission may have settled this player first
        let stored = self.store.get_match(battle_id).await?;
        match stored.player(player_id) {
            Some(player)
                if player.submitted_at == Some(now) && player.correct == Some(outcome.correct) => {}
            Some(player) if player.submitted_at.is_none() => {
                warn!(
                    "Submission from {} to battle {} arrived after the timeout",
                    player_id, battle_id
                );
                return Err(BattleError::TimeExpired);
            }
            _ => {
                return Err(BattleError::AlreadySubmitted {
                    player_id: player_id.to_string(),
                });
            }
        }

        info!(
            "Player {} submitted to battle {}: correct={} points={}",
            player_id, battle_id, outcome.correct, outcome.points_earned
        );
        Ok(outcome)
    }

    async fn drive(&self, battle_id: BattleId) {
        if self
            .drivers
            .get(&battle_id)
            .is_some_and(|session| !session.is_finished())
        {
            return;
        }

        match BattleSession::open(
            self.store.clone(),
            self.clock.clone(),
            battle_id,
            self.tick_interval,
            None,
        )
        .await
        {
            Ok(session) => {
                self.drivers.insert(battle_id, session);
            }
            Err(e) => warn!("Could not start driver for battle {}: {}", battle_id, e),
        }
    }

    pub fn active_drivers(&self) -> usize {
        self.drivers.len()
    }

    /// Drop drivers whose battle has finished. Returns how many were removed.
    pub fn cleanup_finished_drivers(&self) -> usize {
        let before = self.drivers.len();
        self.drivers.retain(|_, session| !session.is_finished());
        before.saturating_sub(self.drivers.len())
    }
}
