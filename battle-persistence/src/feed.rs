use battle_types::{Battle, BattleId};
use dashmap::DashMap;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// Fan-out of full battle documents, one broadcast channel per battle.
///
/// Receivers that fall behind lose the oldest documents; since every message is a
/// complete document, the next one they do receive is enough to catch up.
#[derive(Debug)]
pub struct ChangeFeed {
    channels: DashMap<BattleId, broadcast::Sender<Battle>>,
    capacity: usize,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, battle_id: BattleId) -> broadcast::Receiver<Battle> {
        self.channels
            .entry(battle_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send a document to everyone watching its battle. Returns the number of receivers.
    pub fn publish(&self, battle: &Battle) -> usize {
        match self.channels.get(&battle.id) {
            // No receivers is not an error; the document is already stored
            Some(sender) => sender.send(battle.clone()).unwrap_or(0),
            None => 0,
        }
    }

    /// Close a battle's channel. Open subscriptions end after draining.
    pub fn close(&self, battle_id: BattleId) {
        self.channels.remove(&battle_id);
    }

    /// Drop channels nobody listens to any more
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before.saturating_sub(self.channels.len())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use battle_core::new_battle;
    use battle_types::{BattleMode, Challenge, Difficulty, Player};
    use chrono::Utc;
    use uuid::Uuid;

    fn battle() -> Battle {
        let challenge = Challenge {
            id: "c".to_string(),
            title: "C".to_string(),
            description: String::new(),
            initial_code: String::new(),
            expected_output: "<b>x</b>".to_string(),
            difficulty: Difficulty::Easy,
            points: 10,
        };
        new_battle(Uuid::new_v4(), BattleMode::Classic, challenge, Player::new("a", "A"), Utc::now())
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_of_that_battle() {
        let feed = ChangeFeed::new();
        let watched = battle();
        let other = battle();

        let mut receiver = feed.subscribe(watched.id);
        let _other_receiver = feed.subscribe(other.id);

        assert_eq!(feed.publish(&other), 1);
        assert_eq!(feed.publish(&watched), 1);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.id, watched.id);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let feed = ChangeFeed::new();
        assert_eq!(feed.publish(&battle()), 0);
        assert_eq!(feed.channel_count(), 0);
    }

    #[test]
    fn test_prune_drops_idle_channels() {
        let feed = ChangeFeed::new();
        let kept = battle();
        let receiver = feed.subscribe(kept.id);
        drop(feed.subscribe(battle().id));

        assert_eq!(feed.channel_count(), 2);
        assert_eq!(feed.prune(), 1);
        assert_eq!(feed.channel_count(), 1);
        drop(receiver);
    }

    #[tokio::test]
    async fn test_close_ends_receivers() {
        let feed = ChangeFeed::new();
        let battle = battle();
        let mut receiver = feed.subscribe(battle.id);

        feed.close(battle.id);
        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
