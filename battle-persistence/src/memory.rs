use async_trait::async_trait;
use battle_core::{add_player, apply_patch, new_battle};
use battle_types::{
    Battle, BattleError, BattleId, BattleMode, BattlePatch, BattleStatus, Challenge, Player,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::{self, BoxStream, StreamExt};
use uuid::Uuid;

use crate::feed::ChangeFeed;
use crate::store::{MatchStore, Subscription};

/// Process-local store. Each document is merged under its map entry's lock.
#[derive(Debug, Default)]
pub struct InMemoryMatchStore {
    battles: DashMap<BattleId, Battle>,
    feed: ChangeFeed,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn battle_count(&self) -> usize {
        self.battles.len()
    }

    fn not_found(battle_id: BattleId) -> BattleError {
        BattleError::NotFound { battle_id }
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn create_match(
        &self,
        mode: BattleMode,
        challenge: Challenge,
        host: Player,
    ) -> Result<BattleId, BattleError> {
        let battle = new_battle(Uuid::new_v4(), mode, challenge, host, Utc::now())?;
        let battle_id = battle.id;
        self.battles.insert(battle_id, battle);
        Ok(battle_id)
    }

    async fn join_match(&self, battle_id: BattleId, player: Player) -> Result<(), BattleError> {
        let mut battle = self
            .battles
            .get_mut(&battle_id)
            .ok_or_else(|| Self::not_found(battle_id))?;

        add_player(&mut battle, player)?;
        self.feed.publish(&battle);
        Ok(())
    }

    async fn subscribe(&self, battle_id: BattleId) -> Result<Subscription, BattleError> {
        if !self.battles.contains_key(&battle_id) {
            return Err(Self::not_found(battle_id));
        }
        // Listen before reading so no write can fall between the two
        let receiver = self.feed.subscribe(battle_id);
        let current = self.get_match(battle_id).await?;
        Ok(Subscription::new(current, receiver))
    }

    async fn update_match(
        &self,
        battle_id: BattleId,
        patch: BattlePatch,
    ) -> Result<(), BattleError> {
        let mut battle = self
            .battles
            .get_mut(&battle_id)
            .ok_or_else(|| Self::not_found(battle_id))?;

        let before = battle.clone();
        apply_patch(&mut battle, &patch);
        if *battle != before {
            self.feed.publish(&battle);
        }
        Ok(())
    }

    async fn list_waiting_matches(
        &self,
        mode: BattleMode,
    ) -> Result<BoxStream<'static, Battle>, BattleError> {
        let mut waiting: Vec<Battle> = self
            .battles
            .iter()
            .filter(|entry| entry.mode == mode && entry.is_joinable())
            .map(|entry| entry.value().clone())
            .collect();
        waiting.sort_by_key(|battle| battle.created_at);

        Ok(stream::iter(waiting).boxed())
    }

    async fn get_match(&self, battle_id: BattleId) -> Result<Battle, BattleError> {
        self.battles
            .get(&battle_id)
            .map(|battle| battle.value().clone())
            .ok_or_else(|| Self::not_found(battle_id))
    }

    async fn prune_finished(&self, finished_before: DateTime<Utc>) -> Result<usize, BattleError> {
        let expired: Vec<BattleId> = self
            .battles
            .iter()
            .filter(|entry| {
                entry.status == BattleStatus::Finished
                    && entry.end_time.unwrap_or(entry.created_at) < finished_before
            })
            .map(|entry| *entry.key())
            .collect();

        for battle_id in &expired {
            self.battles.remove(battle_id);
            self.feed.close(*battle_id);
        }
        self.feed.prune();

        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use battle_types::{Difficulty, MAX_PLAYERS, PlayerStatus};
    use chrono::Duration;

    fn challenge() -> Challenge {
        Challenge {
            id: "welcome".to_string(),
            title: "Welcome".to_string(),
            description: "Render a heading".to_string(),
            initial_code: String::new(),
            expected_output: "<h1>Welcome</h1>".to_string(),
            difficulty: Difficulty::Easy,
            points: 100,
        }
    }

    async fn create(store: &InMemoryMatchStore, mode: BattleMode, host: &str) -> BattleId {
        store
            .create_match(mode, challenge(), Player::new(host, host.to_uppercase()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryMatchStore::new();
        let battle_id = create(&store, BattleMode::Classic, "alice").await;

        let battle = store.get_match(battle_id).await.unwrap();
        assert_eq!(battle.status, BattleStatus::Waiting);
        assert_eq!(battle.players[0].id, "alice");
        assert_eq!(store.battle_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_battle() {
        let store = InMemoryMatchStore::new();
        let missing = Uuid::new_v4();

        assert!(matches!(
            store.get_match(missing).await,
            Err(BattleError::NotFound { .. })
        ));
        assert!(matches!(
            store.join_match(missing, Player::new("bob", "Bob")).await,
            Err(BattleError::NotFound { .. })
        ));
        assert!(matches!(
            store.update_match(missing, BattlePatch::default()).await,
            Err(BattleError::NotFound { .. })
        ));
        assert!(matches!(
            store.subscribe(missing).await,
            Err(BattleError::NotFound { .. })
        ));
        assert_eq!(store.feed.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_join_capacity() {
        let store = InMemoryMatchStore::new();
        let battle_id = create(&store, BattleMode::Classic, "p0").await;

        for i in 1..MAX_PLAYERS {
            store
                .join_match(battle_id, Player::new(format!("p{}", i), "P"))
                .await
                .unwrap();
        }

        let result = store.join_match(battle_id, Player::new("late", "Late")).await;
        assert!(matches!(result, Err(BattleError::Full { .. })));
        assert_eq!(store.get_match(battle_id).await.unwrap().players.len(), MAX_PLAYERS);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_then_changes() {
        let store = InMemoryMatchStore::new();
        let battle_id = create(&store, BattleMode::Classic, "alice").await;

        let mut subscription = store.subscribe(battle_id).await.unwrap();
        assert_eq!(subscription.battle_id(), battle_id);

        let first = subscription.next().await.unwrap();
        assert_eq!(first.players.len(), 1);

        store.join_match(battle_id, Player::new("bob", "Bob")).await.unwrap();
        let second = subscription.next().await.unwrap();
        assert_eq!(second.players.len(), 2);
        assert_eq!(second.players[1].status, PlayerStatus::Waiting);
    }

    #[tokio::test]
    async fn test_noop_update_is_not_broadcast() {
        let store = InMemoryMatchStore::new();
        let battle_id = create(&store, BattleMode::Classic, "alice").await;
        let mut subscription = store.subscribe(battle_id).await.unwrap();
        subscription.next().await.unwrap();

        let stale = BattlePatch {
            status: Some(BattleStatus::Waiting),
            ..Default::default()
        };
        store.update_match(battle_id, stale).await.unwrap();

        let started = BattlePatch {
            status: Some(BattleStatus::Countdown),
            countdown_start: Some(Utc::now()),
            ..Default::default()
        };
        store.update_match(battle_id, started).await.unwrap();

        // The first message after the no-op is the countdown document
        let next = subscription.next().await.unwrap();
        assert_eq!(next.status, BattleStatus::Countdown);
    }

    #[tokio::test]
    async fn test_list_waiting_matches() {
        let store = InMemoryMatchStore::new();
        let first = create(&store, BattleMode::Classic, "a").await;
        let second = create(&store, BattleMode::Classic, "b").await;
        let _other_mode = create(&store, BattleMode::Survival, "c").await;
        let started = create(&store, BattleMode::Classic, "d").await;
        store
            .update_match(
                started,
                BattlePatch {
                    status: Some(BattleStatus::Countdown),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let waiting: Vec<Battle> = store
            .list_waiting_matches(BattleMode::Classic)
            .await
            .unwrap()
            .collect()
            .await;

        let ids: Vec<BattleId> = waiting.iter().map(|b| b.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first));
        assert!(ids.contains(&second));
        assert!(waiting.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn test_prune_finished() {
        let store = InMemoryMatchStore::new();
        let done = create(&store, BattleMode::Practice, "a").await;
        let live = create(&store, BattleMode::Classic, "b").await;

        let ended = Utc::now() - Duration::hours(2);
        store
            .update_match(
                done,
                BattlePatch {
                    status: Some(BattleStatus::Finished),
                    end_time: Some(ended),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let removed = store
            .prune_finished(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_match(done).await.is_err());
        assert!(store.get_match(live).await.is_ok());
    }
}
