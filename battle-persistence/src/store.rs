use async_trait::async_trait;
use battle_types::{Battle, BattleError, BattleId, BattleMode, BattlePatch, Challenge, Player};
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use tokio::sync::broadcast::{self, error::RecvError};

/// The shared document store every client of a battle talks to.
///
/// Writes are merges, never blind overwrites: `update_match` folds a patch into the
/// current document with the monotone rules of `battle_core::apply_patch`.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Create a waiting battle hosted by `host` and return its id.
    async fn create_match(
        &self,
        mode: BattleMode,
        challenge: Challenge,
        host: Player,
    ) -> Result<BattleId, BattleError>;

    async fn join_match(&self, battle_id: BattleId, player: Player) -> Result<(), BattleError>;

    /// Watch a battle. The current document is delivered first.
    async fn subscribe(&self, battle_id: BattleId) -> Result<Subscription, BattleError>;

    async fn update_match(
        &self,
        battle_id: BattleId,
        patch: BattlePatch,
    ) -> Result<(), BattleError>;

    /// Joinable battles of one mode, oldest first.
    async fn list_waiting_matches(
        &self,
        mode: BattleMode,
    ) -> Result<BoxStream<'static, Battle>, BattleError>;

    async fn get_match(&self, battle_id: BattleId) -> Result<Battle, BattleError>;

    /// Remove finished battles that ended before `finished_before`.
    async fn prune_finished(&self, finished_before: DateTime<Utc>) -> Result<usize, BattleError>;
}

/// Stream of full documents for one battle. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    battle_id: BattleId,
    pending: Option<Battle>,
    receiver: broadcast::Receiver<Battle>,
}

impl Subscription {
    pub fn new(current: Battle, receiver: broadcast::Receiver<Battle>) -> Self {
        Self {
            battle_id: current.id,
            pending: Some(current),
            receiver,
        }
    }

    pub fn battle_id(&self) -> BattleId {
        self.battle_id
    }

    /// Next document, or `None` once the battle's feed is closed.
    ///
    /// The same document may be seen more than once.
    pub async fn next(&mut self) -> Option<Battle> {
        if let Some(current) = self.pending.take() {
            return Some(current);
        }

        loop {
            match self.receiver.recv().await {
                Ok(battle) => return Some(battle),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        "Subscription to battle {} skipped {} stale documents",
                        self.battle_id,
                        skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
