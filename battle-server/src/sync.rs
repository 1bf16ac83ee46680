use battle_core::{
    BattleEvent, BattleEventBus, BattleEventHandler, Clock, advance, apply_patch,
    countdown_remaining, observe_changes, seconds_remaining, supersedes,
};
use battle_persistence::{MatchStore, Subscription};
use battle_types::{Battle, BattleError, BattleId, BattleStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// What a session reports to whoever is watching it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Snapshot {
        battle: Battle,
        countdown_remaining: Option<u32>,
        seconds_remaining: Option<u32>,
    },
    Event(BattleEvent),
}

/// Logs every battle event
pub struct TracingEventHandler;

impl BattleEventHandler for TracingEventHandler {
    fn handle_event(&mut self, event: BattleEvent) {
        match &event {
            BattleEvent::PlayerJoined { battle_id, player } => {
                info!("Player {} joined battle {}", player.id, battle_id)
            }
            BattleEvent::CountdownStarted { battle_id, seconds } => {
                info!("Battle {} starts in {}s", battle_id, seconds)
            }
            BattleEvent::BattleStarted {
                battle_id,
                mode,
                time_limit_seconds,
            } => info!(
                "Battle {} started ({}, {}s limit)",
                battle_id, mode, time_limit_seconds
            ),
            BattleEvent::PlayerSubmitted {
                battle_id,
                player_id,
                correct,
                score,
            } => info!(
                "Player {} submitted in battle {}: correct={} score={}",
                player_id, battle_id, correct, score
            ),
            BattleEvent::PlayerTimedOut {
                battle_id,
                player_id,
            } => info!("Player {} ran out of time in battle {}", player_id, battle_id),
            BattleEvent::BattleFinished {
                battle_id, winner, ..
            } => info!(
                "Battle {} finished, winner: {}",
                battle_id,
                winner.as_ref().map(|p| p.id.as_str()).unwrap_or("none")
            ),
        }
    }
}

struct ForwardingHandler {
    sender: mpsc::UnboundedSender<SessionUpdate>,
}

impl BattleEventHandler for ForwardingHandler {
    fn handle_event(&mut self, event: BattleEvent) {
        let _ = self.sender.send(SessionUpdate::Event(event));
    }
}

/// One client's live view of one battle.
///
/// The session follows the shared document and, on every remote update and every
/// tick, asks the state machine whether the battle should move on. Any session may
/// perform a transition; the store's merge rules make concurrent ones agree.
///
/// Dropping the session stops its timer and subscription. It never writes on the way out.
pub struct BattleSession {
    battle_id: BattleId,
    task: JoinHandle<()>,
}

impl BattleSession {
    /// Start following `battle_id`.
    ///
    /// With `updates` set, snapshots and events are sent there and the session ends
    /// when the receiver goes away. Without it the session only drives transitions
    /// and logs events.
    pub async fn open(
        store: Arc<dyn MatchStore>,
        clock: Arc<dyn Clock>,
        battle_id: BattleId,
        tick_interval: Duration,
        updates: Option<mpsc::UnboundedSender<SessionUpdate>>,
    ) -> Result<Self, BattleError> {
        let subscription = store.subscribe(battle_id).await?;

        let mut bus = BattleEventBus::new();
        match &updates {
            Some(sender) => bus.add_handler(Box::new(ForwardingHandler {
                sender: sender.clone(),
            })),
            None => bus.add_handler(Box::new(TracingEventHandler)),
        }

        let driver = SessionDriver {
            store,
            clock,
            battle_id,
            bus,
            updates,
            latest: None,
        };
        // tokio intervals cannot have a zero period
        let tick_interval = tick_interval.max(MIN_TICK_INTERVAL);
        let task = tokio::spawn(driver.run(subscription, tick_interval));

        Ok(Self { battle_id, task })
    }

    pub fn battle_id(&self) -> BattleId {
        self.battle_id
    }

    /// True once the battle finished or the session lost its feed
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for BattleSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct SessionDriver {
    store: Arc<dyn MatchStore>,
    clock: Arc<dyn Clock>,
    battle_id: BattleId,
    bus: BattleEventBus,
    updates: Option<mpsc::UnboundedSender<SessionUpdate>>,
    latest: Option<Battle>,
}

impl SessionDriver {
    async fn run(mut self, mut subscription: Subscription, tick_interval: Duration) {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let received = tokio::select! {
                received = subscription.next() => Some(received),
                _ = interval.tick() => None,
            };

            match received {
                Some(Some(battle)) => self.receive(battle),
                Some(None) => {
                    debug!("Feed for battle {} closed", self.battle_id);
                    break;
                }
                None => {}
            }

            if !self.evaluate().await {
                break;
            }
        }

        debug!("Session for battle {} stopped", self.battle_id);
    }

    fn receive(&mut self, battle: Battle) {
        if let Some(current) = &self.latest {
            if !supersedes(current, &battle) {
                debug!("Ignoring stale document for battle {}", self.battle_id);
                return;
            }
        }

        self.bus
            .publish_all(observe_changes(self.latest.as_ref(), &battle));
        self.latest = Some(battle);
    }

    /// Run the state machine once. Returns false when the session should stop.
    async fn evaluate(&mut self) -> bool {
        let Some(battle) = self.latest.as_ref() else {
            return true;
        };
        let now = self.clock.now();

        if let Some(transition) = advance(battle, now) {
            match self
                .store
                .update_match(self.battle_id, transition.patch.clone())
                .await
            {
                Ok(()) => {
                    let mut next = battle.clone();
                    apply_patch(&mut next, &transition.patch);
                    self.receive(next);
                }
                // The next tick re-derives the same transition from the freshest document
                Err(e) => warn!(
                    "Failed to move battle {} from {} to {}: {}",
                    self.battle_id, transition.from, transition.to, e
                ),
            }
        }

        let Some(battle) = self.latest.as_ref() else {
            return true;
        };

        if let Some(updates) = &self.updates {
            let snapshot = SessionUpdate::Snapshot {
                battle: battle.clone(),
                countdown_remaining: countdown_remaining(battle, now),
                seconds_remaining: seconds_remaining(battle, now),
            };
            if updates.send(snapshot).is_err() {
                return false;
            }
        }

        battle.status != BattleStatus::Finished
    }
}
