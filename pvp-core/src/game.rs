//! Round data generation.
//!
//! The ledger only decides the winning side; the per-player target scores
//! shown during the round are generated here and persisted so that every
//! client renders the same numbers. Scores are cosmetic but must be
//! consistent with the outcome: the winning side's total is strictly higher.

use crate::entities::MatchParticipant;
use rand::Rng;

const MIN_SCORE: i32 = 1000;
const MAX_SCORE: i32 = 2000;
/// Winner advantage bounds, in percent of the losing side's total.
const MIN_ADVANTAGE_PCT: i32 = 5;
const MAX_ADVANTAGE_PCT: i32 = 15;

/// Generate a target score for every participant such that the side reported
/// as winner has the strictly higher total.
///
/// Returns `(pubkey, score)` pairs in participant order.
pub fn generate_target_scores(
    participants: &[MatchParticipant],
    winner_side: i16,
) -> Vec<(String, i32)> {
    let mut rng = rand::rng();

    let mut scores: Vec<(String, i32)> = participants
        .iter()
        .map(|p| (p.pubkey.clone(), rng.random_range(MIN_SCORE..=MAX_SCORE)))
        .collect();

    let losing_total: i64 = participants
        .iter()
        .zip(scores.iter())
        .filter(|(p, _)| p.side != winner_side)
        .map(|(_, (_, score))| i64::from(*score))
        .sum();
    let winning_total: i64 = participants
        .iter()
        .zip(scores.iter())
        .filter(|(p, _)| p.side == winner_side)
        .map(|(_, (_, score))| i64::from(*score))
        .sum();

    let advantage_pct = i64::from(rng.random_range(MIN_ADVANTAGE_PCT..=MAX_ADVANTAGE_PCT));
    let target_total = losing_total + (losing_total * advantage_pct / 100).max(1);

    if winning_total < target_total {
        // Spread the deficit across the winning seats, front-loading the
        // remainder so totals land exactly on target.
        let winner_indices: Vec<usize> = participants
            .iter()
            .enumerate()
            .filter(|(_, p)| p.side == winner_side)
            .map(|(i, _)| i)
            .collect();
        if !winner_indices.is_empty() {
            let deficit = target_total - winning_total;
            let per_seat = deficit / winner_indices.len() as i64;
            let mut remainder = deficit % winner_indices.len() as i64;
            for i in winner_indices {
                let mut bump = per_seat;
                if remainder > 0 {
                    bump += 1;
                    remainder -= 1;
                }
                scores[i].1 = scores[i].1.saturating_add(bump as i32);
            }
        }
    }

    scores
}
