use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use rand::Rng;
use uuid::Uuid;

use crate::models::{Cohort, CohortId, CohortMember, PanelId, PrimaryScore};

#[derive(Debug, Clone)]
pub struct EligibleCohort {
    pub cohort: Cohort,
    pub pending: Vec<Uuid>,
}

/// Smallest cohort wins an overlapping submission, then the newest.
pub fn owning_cohorts(cohorts: &[Cohort], members: &[CohortMember]) -> HashMap<Uuid, CohortId> {
    let by_id: HashMap<CohortId, &Cohort> = cohorts.iter().map(|c| (c.id, c)).collect();
    let rank = |c: &Cohort| (c.size, Reverse(c.created), Reverse(c.id));

    let mut owners: HashMap<Uuid, &Cohort> = HashMap::new();
    for member in members {
        let Some(cohort) = by_id.get(&member.cohort_id).copied() else {
            continue;
        };
        owners
            .entry(member.submission)
            .and_modify(|owner| {
                if rank(cohort) < rank(*owner) {
                    *owner = cohort;
                }
            })
            .or_insert(cohort);
    }

    owners.into_iter().map(|(s, c)| (s, c.id)).collect()
}

pub fn eligible_cohorts(
    cohorts: &[Cohort],
    members: &[CohortMember],
    panels: &[PanelId],
    claims: &[PrimaryScore],
) -> Vec<EligibleCohort> {
    let owners = owning_cohorts(cohorts, members);

    let completed: HashSet<Uuid> = claims
        .iter()
        .filter(|c| !c.score.is_placeholder())
        .map(|c| c.score.submission)
        .collect();
    let touched: HashSet<(Uuid, CohortId)> = claims
        .iter()
        .map(|c| (c.score.submission, c.score.cohort_id))
        .collect();

    cohorts
        .iter()
        .filter(|c| c.panel_id.is_some_and(|p| panels.contains(&p)))
        .filter_map(|cohort| {
            let pending: Vec<Uuid> = members
                .iter()
                .filter(|m| m.cohort_id == cohort.id)
                .map(|m| m.submission)
                .filter(|s| owners.get(s) == Some(&cohort.id))
                .filter(|s| !completed.contains(s) && !touched.contains(&(*s, cohort.id)))
                .collect();
            (!pending.is_empty()).then(|| EligibleCohort {
                cohort: cohort.clone(),
                pending,
            })
        })
        .collect()
}

pub fn weighted_pick<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }

    let total: f64 = weights.iter().map(|w| w.max(0.0)).sum();
    if total <= 0.0 {
        return Some(rng.random_range(0..weights.len()));
    }

    let target = rng.random::<f64>() * total;
    let mut cumulative = 0.0;
    for (index, weight) in weights.iter().enumerate() {
        cumulative += weight.max(0.0);
        if target < cumulative {
            return Some(index);
        }
    }

    // Rounding can leave target just past the last boundary.
    weights.iter().rposition(|w| *w > 0.0)
}
