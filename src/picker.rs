use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::index;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Cohort, Criterion, FormId, NewClaim, ReviewerId, Score};
use crate::store::ReviewStore;

/// Chooses a candidate index from `pool`, preferring a submission the
/// reviewer already holds a claim on, then the lower load. Equal loads go
/// to the first sampled candidate.
pub fn choose_candidate(
    pool: &[Uuid],
    loads: &HashMap<Uuid, i64>,
    outstanding: &HashSet<Uuid>,
    rng: &mut StdRng,
) -> Option<usize> {
    match pool.len() {
        0 => None,
        1 => Some(0),
        len => {
            let sampled = index::sample(rng, len, 2);
            let (first, second) = (sampled.index(0), sampled.index(1));

            let held = |i: usize| outstanding.contains(&pool[i]);
            if held(first) {
                return Some(first);
            }
            if held(second) {
                return Some(second);
            }

            let load = |i: usize| loads.get(&pool[i]).copied().unwrap_or(0);
            if load(second) < load(first) {
                Some(second)
            } else {
                Some(first)
            }
        }
    }
}

pub struct ClaimRequest<'a> {
    pub reviewer: ReviewerId,
    pub form: FormId,
    pub cohort: &'a Cohort,
    pub primary: &'a Criterion,
    /// Submissions the reviewer already holds a placeholder on.
    pub outstanding: &'a HashSet<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Score),
    /// Every candidate is held by another reviewer.
    Contended,
    Empty,
}

/// Claims one submission from `pool` for the reviewer, sampling two
/// candidates and keeping the less-reviewed one.
pub async fn claim_submission<S: ReviewStore + ?Sized>(
    store: &S,
    request: &ClaimRequest<'_>,
    mut pool: Vec<Uuid>,
    rng: &mut StdRng,
) -> Result<ClaimOutcome, StoreError> {
    let cohort = request.cohort.id;
    let loads = store.primary_loads(cohort, request.primary.id).await?;
    let mut lost = 0;

    while let Some(index) = choose_candidate(&pool, &loads, request.outstanding, rng) {
        let submission = pool[index];
        let claim = NewClaim {
            panelist: request.reviewer,
            submission,
            cohort_id: cohort,
            criterion_id: request.primary.id,
            form_id: request.form,
            created: Utc::now(),
        };

        match store.insert_claim(claim).await {
            Ok(score) => return Ok(ClaimOutcome::Claimed(score)),
            Err(StoreError::Conflict) => {
                debug!(reviewer = request.reviewer, cohort, %submission, "claim lost to another reviewer");
                pool.swap_remove(index);
                lost += 1;
            }
            Err(err) => return Err(err),
        }
    }

    if lost > 0 {
        Ok(ClaimOutcome::Contended)
    } else {
        Ok(ClaimOutcome::Empty)
    }
}
