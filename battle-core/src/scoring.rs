use battle_types::{Player, PlayerStatus};
use std::cmp::Ordering;

pub struct ScoringEngine;

impl ScoringEngine {
    /// Half a point per second left on the clock, rounded down.
    pub fn time_bonus(seconds_remaining: u32) -> i32 {
        (seconds_remaining / 2) as i32
    }

    /// Points awarded for one judged submission
    pub fn submission_score(correct: bool, points: i32, seconds_remaining: u32) -> i32 {
        if correct {
            points.saturating_add(Self::time_bonus(seconds_remaining))
        } else {
            0
        }
    }

    /// Ordering used for the final scoreboard.
    ///
    /// Competitors rank ahead of spectators. Among them: higher score first, then the
    /// earlier submission (players who never submitted come last), then player id.
    pub fn standing_order(a: &Player, b: &Player) -> Ordering {
        let a_spectating = a.status == PlayerStatus::Spectating;
        let b_spectating = b.status == PlayerStatus::Spectating;

        a_spectating
            .cmp(&b_spectating)
            .then_with(|| b.score.cmp(&a.score))
            .then_with(|| match (a.submitted_at, b.submitted_at) {
                (Some(a_at), Some(b_at)) => a_at.cmp(&b_at),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Pick the winner of a finished battle. Every client reaches the same answer
    /// from the same player list.
    pub fn determine_winner(players: &[Player]) -> Option<&Player> {
        players.iter().min_by(|a, b| Self::standing_order(a, b))
    }

    pub fn standings(players: &[Player]) -> Vec<Player> {
        let mut ranked = players.to_vec();
        ranked.sort_by(Self::standing_order);
        ranked
    }
}
