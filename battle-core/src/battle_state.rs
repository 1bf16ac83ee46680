use battle_types::{
    Battle, BattleError, BattleId, BattleMode, BattlePatch, BattleStatus, COUNTDOWN_SECONDS,
    Challenge, Player, PlayerStatus,
};
use chrono::{DateTime, Utc};

use crate::{ScoringEngine, is_correct_submission};

/// A state change computed from one battle document, ready to be merged into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: BattleStatus,
    pub to: BattleStatus,
    pub patch: BattlePatch,
}

/// Result of judging one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionOutcome {
    pub patch: BattlePatch,
    pub correct: bool,
    pub points_earned: i32,
    pub seconds_remaining: Option<u32>,
}

pub fn validate_player(player: &Player) -> Result<(), BattleError> {
    if player.id.trim().is_empty() {
        return Err(BattleError::validation("player id is required"));
    }
    if player.display_name.trim().is_empty() {
        return Err(BattleError::validation("display name is required"));
    }
    Ok(())
}

/// Fresh competitor record: status and match-local results are reset.
fn enrolled(player: Player, status: PlayerStatus) -> Player {
    Player {
        score: 0,
        status,
        submitted_at: None,
        correct: None,
        ..player
    }
}

/// Build the initial document for a battle hosted by `host`.
pub fn new_battle(
    id: BattleId,
    mode: BattleMode,
    challenge: Challenge,
    host: Player,
    now: DateTime<Utc>,
) -> Result<Battle, BattleError> {
    validate_player(&host)?;
    if challenge.expected_output.trim().is_empty() {
        return Err(BattleError::validation("challenge has no expected output"));
    }

    Ok(Battle {
        id,
        mode,
        status: BattleStatus::Waiting,
        players: vec![enrolled(host, PlayerStatus::Waiting)],
        challenge,
        created_at: now,
        countdown_start: None,
        start_time: None,
        end_time: None,
        winner: None,
    })
}

/// Append a player to the battle.
///
/// Players arriving after the start are seated as spectators.
pub fn add_player(battle: &mut Battle, player: Player) -> Result<(), BattleError> {
    validate_player(&player)?;

    if battle.contains_player(&player.id) {
        return Err(BattleError::AlreadyJoined {
            player_id: player.id,
        });
    }
    if battle.is_full() {
        return Err(BattleError::Full {
            battle_id: battle.id,
        });
    }

    let status = match battle.status {
        BattleStatus::Waiting | BattleStatus::Countdown => PlayerStatus::Waiting,
        BattleStatus::InProgress => PlayerStatus::Spectating,
        BattleStatus::Finished => {
            return Err(BattleError::InvalidState {
                current: battle.status,
            });
        }
    };

    battle.players.push(enrolled(player, status));
    Ok(())
}

fn elapsed_seconds(since: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    (now - since).num_seconds().clamp(0, u32::MAX as i64) as u32
}

/// Seconds left on the countdown, derived from the shared `countdown_start`.
pub fn countdown_remaining(battle: &Battle, now: DateTime<Utc>) -> Option<u32> {
    if battle.status != BattleStatus::Countdown {
        return None;
    }
    let start = battle.countdown_start?;
    Some(COUNTDOWN_SECONDS.saturating_sub(elapsed_seconds(start, now)))
}

/// Seconds left to submit, derived from the shared `start_time`.
///
/// `None` for untimed modes and for battles that have not started.
pub fn seconds_remaining(battle: &Battle, now: DateTime<Utc>) -> Option<u32> {
    if !battle.mode.is_timed() {
        return None;
    }
    let start = battle.start_time?;
    Some(
        battle
            .mode
            .time_limit_seconds()
            .saturating_sub(elapsed_seconds(start, now)),
    )
}

fn time_expired(battle: &Battle, now: DateTime<Utc>) -> bool {
    seconds_remaining(battle, now) == Some(0)
}

/// Decide what, if anything, should change in `battle` at `now`.
///
/// Pure and deterministic: any client holding the same document reaches the same
/// decision, so this is safe to call from a timer tick and from every remote update.
pub fn advance(battle: &Battle, now: DateTime<Utc>) -> Option<Transition> {
    match battle.status {
        BattleStatus::Waiting => {
            if battle.players.len() < battle.mode.min_players() {
                return None;
            }
            Some(Transition {
                from: BattleStatus::Waiting,
                to: BattleStatus::Countdown,
                patch: BattlePatch {
                    status: Some(BattleStatus::Countdown),
                    countdown_start: Some(now),
                    ..Default::default()
                },
            })
        }
        BattleStatus::Countdown => {
            let Some(countdown_start) = battle.countdown_start else {
                return Some(repair(battle, BattlePatch {
                    countdown_start: Some(now),
                    ..Default::default()
                }));
            };
            if elapsed_seconds(countdown_start, now) < COUNTDOWN_SECONDS {
                return None;
            }

            let players = battle
                .players
                .iter()
                .filter(|p| p.status == PlayerStatus::Waiting)
                .map(|p| Player {
                    status: PlayerStatus::Playing,
                    ..p.clone()
                })
                .collect();

            Some(Transition {
                from: BattleStatus::Countdown,
                to: BattleStatus::InProgress,
                patch: BattlePatch {
                    status: Some(BattleStatus::InProgress),
                    start_time: Some(now),
                    players,
                    ..Default::default()
                },
            })
        }
        BattleStatus::InProgress => {
            if battle.start_time.is_none() {
                return Some(repair(battle, BattlePatch {
                    start_time: Some(now),
                    ..Default::default()
                }));
            }
            time_out_or_finish(battle, now)
        }
        BattleStatus::Finished => None,
    }
}

// A document missing the timestamp its status depends on would never progress.
fn repair(battle: &Battle, patch: BattlePatch) -> Transition {
    Transition {
        from: battle.status,
        to: battle.status,
        patch,
    }
}

fn time_out_or_finish(battle: &Battle, now: DateTime<Utc>) -> Option<Transition> {
    let mut players = battle.players.clone();
    let mut timed_out = Vec::new();

    if time_expired(battle, now) {
        for player in players.iter_mut().filter(|p| !p.status.is_done()) {
            // Uncredited: no verdict, no submission time, score untouched
            player.status = PlayerStatus::Submitted;
            timed_out.push(player.clone());
        }
    }

    if !players.iter().all(|p| p.status.is_done()) {
        if timed_out.is_empty() {
            return None;
        }
        return Some(Transition {
            from: BattleStatus::InProgress,
            to: BattleStatus::InProgress,
            patch: BattlePatch {
                players: timed_out,
                ..Default::default()
            },
        });
    }

    let winner = ScoringEngine::determine_winner(&players).map(|p| p.id.clone());
    Some(Transition {
        from: BattleStatus::InProgress,
        to: BattleStatus::Finished,
        patch: BattlePatch {
            status: Some(BattleStatus::Finished),
            end_time: Some(now),
            winner,
            players: timed_out,
            ..Default::default()
        },
    })
}

/// Judge `code` for `player_id` and compute the resulting player record.
pub fn submit(
    battle: &Battle,
    player_id: &str,
    code: &str,
    now: DateTime<Utc>,
) -> Result<SubmissionOutcome, BattleError> {
    if battle.status != BattleStatus::InProgress {
        return Err(BattleError::InvalidState {
            current: battle.status,
        });
    }

    let player = battle
        .player(player_id)
        .ok_or_else(|| BattleError::NotParticipant {
            player_id: player_id.to_string(),
        })?;

    match player.status {
        PlayerStatus::Playing => {}
        PlayerStatus::Submitted => {
            return Err(BattleError::AlreadySubmitted {
                player_id: player.id.clone(),
            });
        }
        PlayerStatus::Spectating => {
            return Err(BattleError::validation("spectators cannot submit"));
        }
        PlayerStatus::Waiting => {
            return Err(BattleError::validation("player has not started"));
        }
    }

    let remaining = seconds_remaining(battle, now);
    if remaining == Some(0) {
        return Err(BattleError::TimeExpired);
    }

    let correct = is_correct_submission(code, &battle.challenge.expected_output);
    let points_earned = ScoringEngine::submission_score(
        correct,
        battle.challenge.points,
        remaining.unwrap_or(0),
    );

    let updated = Player {
        score: player.score.saturating_add(points_earned),
        status: PlayerStatus::Submitted,
        submitted_at: Some(now),
        correct: Some(correct),
        ..player.clone()
    };

    Ok(SubmissionOutcome {
        patch: BattlePatch {
            players: vec![updated],
            ..Default::default()
        },
        correct,
        points_earned,
        seconds_remaining: remaining,
    })
}

fn set_once<T: Copy>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Merge a patch into a battle document.
///
/// Status never moves backwards, timestamps keep the first value written, and a
/// player record is only replaced when its status moves forward. Replaying a patch,
/// or applying two patches computed from the same document, is harmless.
pub fn apply_patch(battle: &mut Battle, patch: &BattlePatch) {
    if let Some(status) = patch.status {
        if status > battle.status {
            battle.status = status;
        }
    }

    set_once(&mut battle.countdown_start, patch.countdown_start);
    set_once(&mut battle.start_time, patch.start_time);
    set_once(&mut battle.end_time, patch.end_time);

    for update in &patch.players {
        if let Some(existing) = battle.player_mut(&update.id) {
            if existing.status.can_advance_to(update.status) {
                *existing = update.clone();
            }
        }
    }

    if battle.status == BattleStatus::Finished {
        if let Some(winner) = patch.winner.as_ref().filter(|id| battle.contains_player(id)) {
            battle.winner = Some(winner.clone());
        }
        if battle.winner.is_none() {
            battle.winner = ScoringEngine::determine_winner(&battle.players).map(|p| p.id.clone());
        }
    }
}

/// Whether `candidate` is at least as far along as `current`.
///
/// Subscription callbacks may deliver an older document after a newer one; those are
/// dropped instead of rolling the local view back.
pub fn supersedes(current: &Battle, candidate: &Battle) -> bool {
    let done = |b: &Battle| b.players.iter().filter(|p| p.status.is_done()).count();

    candidate.status >= current.status
        && candidate.players.len() >= current.players.len()
        && done(candidate) >= done(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use battle_types::{Difficulty, MAX_PLAYERS};
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn challenge() -> Challenge {
        Challenge {
            id: "heading".to_string(),
            title: "Heading".to_string(),
            description: "Render a heading".to_string(),
            initial_code: String::new(),
            expected_output: "<h1>Welcome</h1>".to_string(),
            difficulty: Difficulty::Easy,
            points: 200,
        }
    }

    fn battle(mode: BattleMode) -> Battle {
        new_battle(Uuid::new_v4(), mode, challenge(), Player::new("alice", "Alice"), t0()).unwrap()
    }

    fn step(battle: &mut Battle, now: DateTime<Utc>) -> Option<Transition> {
        let transition = advance(battle, now)?;
        apply_patch(battle, &transition.patch);
        Some(transition)
    }

    fn started(mode: BattleMode) -> Battle {
        let mut battle = battle(mode);
        add_player(&mut battle, Player::new("bob", "Bob")).unwrap();
        step(&mut battle, t0()).unwrap();
        step(&mut battle, t0() + Duration::seconds(15)).unwrap();
        assert_eq!(battle.status, BattleStatus::InProgress);
        battle
    }

    #[test]
    fn test_new_battle() {
        let battle = battle(BattleMode::Classic);
        assert_eq!(battle.status, BattleStatus::Waiting);
        assert_eq!(battle.players.len(), 1);
        assert_eq!(battle.players[0].status, PlayerStatus::Waiting);
        assert!(battle.winner.is_none());
        assert_eq!(battle.created_at, t0());
    }

    #[test]
    fn test_new_battle_rejects_bad_host() {
        let result = new_battle(
            Uuid::new_v4(),
            BattleMode::Classic,
            challenge(),
            Player::new("", "Nobody"),
            t0(),
        );
        assert!(matches!(result, Err(BattleError::Validation { .. })));

        let result = new_battle(
            Uuid::new_v4(),
            BattleMode::Classic,
            challenge(),
            Player::new("x", "   "),
            t0(),
        );
        assert!(matches!(result, Err(BattleError::Validation { .. })));
    }

    #[test]
    fn test_host_results_are_reset() {
        let mut host = Player::new("alice", "Alice");
        host.score = 999;
        host.status = PlayerStatus::Submitted;
        let battle = new_battle(Uuid::new_v4(), BattleMode::Classic, challenge(), host, t0()).unwrap();
        assert_eq!(battle.players[0].score, 0);
        assert_eq!(battle.players[0].status, PlayerStatus::Waiting);
    }

    #[test]
    fn test_join_rules() {
        let mut battle = battle(BattleMode::Classic);

        let duplicate = add_player(&mut battle, Player::new("alice", "Alice again"));
        assert!(matches!(duplicate, Err(BattleError::AlreadyJoined { .. })));

        for i in 1..MAX_PLAYERS {
            add_player(&mut battle, Player::new(format!("p{}", i), format!("P{}", i))).unwrap();
        }
        assert_eq!(battle.players.len(), MAX_PLAYERS);

        let before = battle.players.clone();
        let fifth = add_player(&mut battle, Player::new("late", "Late"));
        assert!(matches!(fifth, Err(BattleError::Full { .. })));
        assert_eq!(battle.players, before);
    }

    #[test]
    fn test_join_after_start_spectates() {
        let mut battle = started(BattleMode::Classic);
        add_player(&mut battle, Player::new("carol", "Carol")).unwrap();
        assert_eq!(battle.player("carol").unwrap().status, PlayerStatus::Spectating);
    }

    #[test]
    fn test_join_finished_battle_rejected() {
        let mut battle = started(BattleMode::Classic);
        step(&mut battle, t0() + Duration::seconds(15 + 300)).unwrap();
        assert_eq!(battle.status, BattleStatus::Finished);

        let result = add_player(&mut battle, Player::new("carol", "Carol"));
        assert!(matches!(result, Err(BattleError::InvalidState { .. })));
    }

    #[test]
    fn test_waiting_needs_min_players() {
        let mut battle = battle(BattleMode::Classic);
        assert!(advance(&battle, t0()).is_none());

        add_player(&mut battle, Player::new("bob", "Bob")).unwrap();
        let transition = advance(&battle, t0()).unwrap();
        assert_eq!(transition.to, BattleStatus::Countdown);
        assert_eq!(transition.patch.countdown_start, Some(t0()));
    }

    #[test]
    fn test_practice_starts_alone() {
        let mut battle = battle(BattleMode::Practice);
        let transition = step(&mut battle, t0()).unwrap();
        assert_eq!(transition.to, BattleStatus::Countdown);
    }

    #[test]
    fn test_countdown_boundary() {
        let mut battle = battle(BattleMode::Classic);
        add_player(&mut battle, Player::new("bob", "Bob")).unwrap();
        step(&mut battle, t0()).unwrap();

        assert_eq!(countdown_remaining(&battle, t0() + Duration::seconds(4)), Some(11));
        assert!(advance(&battle, t0() + Duration::seconds(14)).is_none());

        let now = t0() + Duration::seconds(15);
        let transition = step(&mut battle, now).unwrap();
        assert_eq!(transition.to, BattleStatus::InProgress);
        assert_eq!(battle.start_time, Some(now));
        assert!(battle.players.iter().all(|p| p.status == PlayerStatus::Playing));
        assert_eq!(countdown_remaining(&battle, now), None);
    }

    #[test]
    fn test_countdown_without_start_is_repaired() {
        let mut battle = battle(BattleMode::Classic);
        battle.status = BattleStatus::Countdown;

        let transition = step(&mut battle, t0()).unwrap();
        assert_eq!(transition.from, transition.to);
        assert_eq!(battle.countdown_start, Some(t0()));
    }

    #[test]
    fn test_seconds_remaining() {
        let battle = started(BattleMode::Classic);
        let start = battle.start_time.unwrap();

        assert_eq!(seconds_remaining(&battle, start), Some(300));
        assert_eq!(seconds_remaining(&battle, start + Duration::seconds(50)), Some(250));
        assert_eq!(seconds_remaining(&battle, start + Duration::seconds(900)), Some(0));
        // A client whose clock runs behind sees the full limit, not more
        assert_eq!(seconds_remaining(&battle, start - Duration::seconds(3)), Some(300));

        let practice = started(BattleMode::Practice);
        assert_eq!(seconds_remaining(&practice, start), None);
    }

    #[test]
    fn test_submit_correct_and_incorrect() {
        let battle = started(BattleMode::Classic);
        let start = battle.start_time.unwrap();

        let outcome = submit(&battle, "alice", "<h1>Welcome</h1>", start + Duration::seconds(50)).unwrap();
        assert!(outcome.correct);
        assert_eq!(outcome.points_earned, 325);
        assert_eq!(outcome.seconds_remaining, Some(250));
        let record = &outcome.patch.players[0];
        assert_eq!(record.status, PlayerStatus::Submitted);
        assert_eq!(record.correct, Some(true));
        assert_eq!(record.score, 325);

        let outcome = submit(&battle, "bob", "<h1>Goodbye</h1>", start + Duration::seconds(200)).unwrap();
        assert!(!outcome.correct);
        assert_eq!(outcome.points_earned, 0);
        assert_eq!(outcome.patch.players[0].correct, Some(false));
    }

    #[test]
    fn test_submit_score_saturates() {
        let mut battle = started(BattleMode::Classic);
        if let Some(alice) = battle.player_mut("alice") {
            alice.score = i32::MAX - 10;
        }

        let outcome = submit(&battle, "alice", "<h1>Welcome</h1>", t0() + Duration::seconds(15)).unwrap();
        assert_eq!(outcome.points_earned, 350);
        assert_eq!(outcome.patch.players[0].score, i32::MAX);
    }

    #[test]
    fn test_submit_rejections() {
        let mut battle = started(BattleMode::Classic);
        let start = battle.start_time.unwrap();

        let outsider = submit(&battle, "mallory", "x", start);
        assert!(matches!(outsider, Err(BattleError::NotParticipant { .. })));

        let outcome = submit(&battle, "alice", "<h1>Welcome</h1>", start).unwrap();
        apply_patch(&mut battle, &outcome.patch);
        let again = submit(&battle, "alice", "<h1>Welcome</h1>", start);
        assert!(matches!(again, Err(BattleError::AlreadySubmitted { .. })));

        let late = submit(&battle, "bob", "<h1>Welcome</h1>", start + Duration::seconds(300));
        assert!(matches!(late, Err(BattleError::TimeExpired)));

        let waiting = self::battle(BattleMode::Classic);
        let early = submit(&waiting, "alice", "<h1>Welcome</h1>", t0());
        assert!(matches!(
            early,
            Err(BattleError::InvalidState {
                current: BattleStatus::Waiting
            })
        ));
    }

    #[test]
    fn test_spectator_cannot_submit() {
        let mut battle = started(BattleMode::Classic);
        add_player(&mut battle, Player::new("carol", "Carol")).unwrap();
        let result = submit(&battle, "carol", "<h1>Welcome</h1>", battle.start_time.unwrap());
        assert!(matches!(result, Err(BattleError::Validation { .. })));
    }

    #[test]
    fn test_all_submitted_finishes() {
        let mut battle = started(BattleMode::Classic);
        let start = battle.start_time.unwrap();

        let a = submit(&battle, "alice", "<h1>welcome</h1>", start + Duration::seconds(10)).unwrap();
        apply_patch(&mut battle, &a.patch);
        assert!(advance(&battle, start + Duration::seconds(11)).is_none());

        let b = submit(&battle, "bob", "nope", start + Duration::seconds(20)).unwrap();
        apply_patch(&mut battle, &b.patch);

        let end = start + Duration::seconds(21);
        let transition = step(&mut battle, end).unwrap();
        assert_eq!(transition.to, BattleStatus::Finished);
        assert_eq!(battle.end_time, Some(end));
        assert_eq!(battle.winner.as_deref(), Some("alice"));
        assert!(advance(&battle, end + Duration::seconds(60)).is_none());
    }

    #[test]
    fn test_spectators_do_not_block_finish() {
        let mut battle = started(BattleMode::Classic);
        add_player(&mut battle, Player::new("carol", "Carol")).unwrap();
        let start = battle.start_time.unwrap();

        for id in ["alice", "bob"] {
            let outcome = submit(&battle, id, "<h1>Welcome</h1>", start).unwrap();
            apply_patch(&mut battle, &outcome.patch);
        }

        let transition = step(&mut battle, start).unwrap();
        assert_eq!(transition.to, BattleStatus::Finished);
        assert_ne!(battle.winner.as_deref(), Some("carol"));
    }

    #[test]
    fn test_timeout_marks_uncredited_and_finishes() {
        let mut battle = started(BattleMode::Survival);
        let start = battle.start_time.unwrap();

        let a = submit(&battle, "alice", "<h1>Welcome</h1>", start + Duration::seconds(100)).unwrap();
        apply_patch(&mut battle, &a.patch);

        assert!(advance(&battle, start + Duration::seconds(179)).is_none());

        let transition = step(&mut battle, start + Duration::seconds(180)).unwrap();
        assert_eq!(transition.to, BattleStatus::Finished);

        let bob = battle.player("bob").unwrap();
        assert_eq!(bob.status, PlayerStatus::Submitted);
        assert_eq!(bob.correct, None);
        assert_eq!(bob.submitted_at, None);
        assert_eq!(bob.score, 0);
        assert_eq!(battle.winner.as_deref(), Some("alice"));
    }

    #[test]
    fn test_apply_patch_never_reverts_status() {
        let mut battle = started(BattleMode::Classic);
        let stale = BattlePatch {
            status: Some(BattleStatus::Countdown),
            ..Default::default()
        };
        apply_patch(&mut battle, &stale);
        assert_eq!(battle.status, BattleStatus::InProgress);
    }

    #[test]
    fn test_apply_patch_keeps_first_timestamp() {
        let mut battle = battle(BattleMode::Practice);
        let first = advance(&battle, t0()).unwrap();
        let second = advance(&battle, t0() + Duration::seconds(2)).unwrap();

        apply_patch(&mut battle, &first.patch);
        apply_patch(&mut battle, &second.patch);
        assert_eq!(battle.countdown_start, Some(t0()));
    }

    #[test]
    fn test_apply_patch_freezes_submitted_player() {
        let mut battle = started(BattleMode::Classic);
        let start = battle.start_time.unwrap();

        let first = submit(&battle, "alice", "<h1>Welcome</h1>", start).unwrap();
        let second = submit(&battle, "alice", "wrong", start + Duration::seconds(5)).unwrap();
        apply_patch(&mut battle, &first.patch);
        apply_patch(&mut battle, &second.patch);

        let alice = battle.player("alice").unwrap();
        assert_eq!(alice.correct, Some(true));
        assert_eq!(alice.submitted_at, Some(start));
    }

    #[test]
    fn test_winner_requires_finished() {
        let mut battle = started(BattleMode::Classic);
        let premature = BattlePatch {
            winner: Some("alice".to_string()),
            ..Default::default()
        };
        apply_patch(&mut battle, &premature);
        assert!(battle.winner.is_none());
    }

    #[test]
    fn test_supersedes() {
        let waiting = battle(BattleMode::Classic);
        let mut later = waiting.clone();
        add_player(&mut later, Player::new("bob", "Bob")).unwrap();
        step(&mut later, t0()).unwrap();

        assert!(supersedes(&waiting, &later));
        assert!(!supersedes(&later, &waiting));
        assert!(supersedes(&later, &later));
    }
}
