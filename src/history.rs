use chrono::{DateTime, Utc};

use crate::models::{CohortStatus, Direction, HistoryEntry, PrimaryScore, ScoreId};

/// Finds the neighbour of `current` in the reviewer's completed scores,
/// ordered by `(created, id)`. Without a current position, stepping back
/// lands on the most recent score.
pub fn adjacent(
    sequence: &[PrimaryScore],
    current: Option<(DateTime<Utc>, ScoreId)>,
    direction: Direction,
) -> Option<HistoryEntry> {
    let completed = sequence
        .iter()
        .filter(|c| !c.score.is_placeholder() && c.cohort_status != CohortStatus::Inactive);

    let found = match (direction, current) {
        (Direction::Previous, Some(key)) => completed
            .filter(|c| c.score.sequence_key() < key)
            .max_by_key(|c| c.score.sequence_key()),
        (Direction::Previous, None) => completed.max_by_key(|c| c.score.sequence_key()),
        (Direction::Next, Some(key)) => completed
            .filter(|c| c.score.sequence_key() > key)
            .min_by_key(|c| c.score.sequence_key()),
        (Direction::Next, None) => None,
    };

    found.map(|c| HistoryEntry {
        submission: c.score.submission,
        cohort_id: c.score.cohort_id,
        score_id: c.score.id,
        created: c.score.created,
    })
}
