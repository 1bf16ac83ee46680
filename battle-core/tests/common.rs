#![allow(dead_code)]

use battle_core::{BattleEvent, BattleEventHandler, add_player, advance, apply_patch, new_battle};
use battle_types::{Battle, BattleMode, BattleStatus, Challenge, Difficulty, Player};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};

/// Fixed reference instant so timings in assertions are exact
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 18, 30, 0).unwrap()
}

pub fn secs(n: i64) -> Duration {
    Duration::seconds(n)
}

/// Creates the heading challenge worth 200 points
pub fn create_test_challenge() -> Challenge {
    Challenge {
        id: "welcome".to_string(),
        title: "Welcome".to_string(),
        description: "Render a Welcome heading".to_string(),
        initial_code: "<!-- start here -->".to_string(),
        expected_output: "<h1>Welcome</h1>".to_string(),
        difficulty: Difficulty::Easy,
        points: 200,
    }
}

/// Creates a test player whose id is the lowercased name
pub fn create_test_player(name: &str) -> Player {
    Player::new(name.to_lowercase(), name)
}

/// Creates a waiting battle hosted by Alice
pub fn create_battle(mode: BattleMode) -> Battle {
    new_battle(
        uuid::Uuid::new_v4(),
        mode,
        create_test_challenge(),
        create_test_player("Alice"),
        t0(),
    )
    .unwrap()
}

/// Creates a waiting battle with the given players joined after the host
pub fn create_battle_with(mode: BattleMode, guests: &[&str]) -> Battle {
    let mut battle = create_battle(mode);
    for name in guests {
        add_player(&mut battle, create_test_player(name)).unwrap();
    }
    battle
}

/// Evaluate the state machine once and merge the result
pub fn tick(battle: &mut Battle, now: DateTime<Utc>) -> bool {
    match advance(battle, now) {
        Some(transition) => {
            apply_patch(battle, &transition.patch);
            true
        }
        None => false,
    }
}

/// Drive a battle with two or more players into the in-progress phase.
///
/// Countdown starts at `t0` and the battle goes live at `t0 + 15s`.
pub fn start_battle(battle: &mut Battle) {
    assert!(tick(battle, t0()));
    assert_eq!(battle.status, BattleStatus::Countdown);
    assert!(tick(battle, t0() + secs(15)));
    assert_eq!(battle.status, BattleStatus::InProgress);
}

/// Event collector for testing event emissions
#[derive(Clone)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<BattleEvent>>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get_events(&self) -> Vec<BattleEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn has_event_type(&self, check_fn: impl Fn(&BattleEvent) -> bool) -> bool {
        self.events.lock().unwrap().iter().any(check_fn)
    }
}

impl BattleEventHandler for EventCollector {
    fn handle_event(&mut self, event: BattleEvent) {
        self.events.lock().unwrap().push(event);
    }
}
