//! In-process ledger with the same constraint semantics as the Postgres one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Cohort, CohortId, CohortMember, CohortStatus, Criterion, CriterionId, CriterionKind, FormId,
    NewClaim, NewCohort, PanelId, PrimaryScore, ReviewerId, Score, ScoreCommit, ScoreId,
    ScoreWrite,
};
use crate::store::ReviewStore;

#[derive(Default)]
struct Tables {
    next_id: i64,
    panels: HashMap<PanelId, Vec<ReviewerId>>,
    criteria: HashMap<CriterionId, Criterion>,
    cohorts: HashMap<CohortId, Cohort>,
    cohort_criteria: HashMap<CohortId, Vec<CriterionId>>,
    members: Vec<CohortMember>,
    scores: Vec<Score>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn criteria_of(&self, cohort: CohortId) -> Vec<Criterion> {
        let mut criteria: Vec<Criterion> = self
            .cohort_criteria
            .get(&cohort)
            .into_iter()
            .flatten()
            .filter_map(|id| self.criteria.get(id).cloned())
            .collect();
        criteria.sort_by_key(|c| (c.rank, c.id));
        criteria
    }

    fn primary_of(&self, cohort: CohortId) -> Option<Criterion> {
        self.criteria_of(cohort).into_iter().next()
    }

    fn find_score(
        &self,
        panelist: ReviewerId,
        submission: Uuid,
        cohort: CohortId,
        criterion: CriterionId,
    ) -> Option<usize> {
        self.scores.iter().position(|s| {
            s.panelist == panelist
                && s.submission == submission
                && s.cohort_id == cohort
                && s.criterion_id == criterion
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A panic while holding the lock leaves the tables consistent: every
        // mutation below is a single push, retain or field assignment.
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_panel(&self, reviewers: &[ReviewerId]) -> PanelId {
        let mut tables = self.lock();
        let id = tables.next_id();
        tables.panels.insert(id, reviewers.to_vec());
        id
    }

    pub fn add_criterion(&self, form_id: FormId, rank: i32, name: &str, kind: CriterionKind) -> Criterion {
        let mut tables = self.lock();
        let criterion = Criterion {
            id: tables.next_id(),
            form_id,
            rank,
            name: name.to_string(),
            label: String::new(),
            kind,
        };
        tables.criteria.insert(criterion.id, criterion.clone());
        criterion
    }

    pub fn add_cohort(&self, new: NewCohort) -> CohortId {
        let mut tables = self.lock();
        let id = tables.next_id();
        let activated = (new.status == CohortStatus::Active).then_some(new.created);
        tables.cohorts.insert(
            id,
            Cohort {
                id,
                form_id: new.form_id,
                panel_id: new.panel_id,
                name: new.name,
                message: new.message,
                status: new.status,
                panel_weight: new.panel_weight,
                size: 0,
                allow_skip: new.allow_skip,
                created: new.created,
                activated,
                completed: None,
            },
        );
        tables.cohort_criteria.insert(id, new.criteria);
        id
    }

    /// Writes a ledger row directly, bypassing the claim guards.
    pub fn record(
        &self,
        panelist: ReviewerId,
        submission: Uuid,
        cohort_id: CohortId,
        criterion_id: CriterionId,
        value: Option<i32>,
        created: DateTime<Utc>,
    ) -> Score {
        let mut tables = self.lock();
        let form_id = tables.cohorts.get(&cohort_id).map_or(0, |c| c.form_id);
        let score = Score {
            id: tables.next_id(),
            panelist,
            submission,
            cohort_id,
            criterion_id,
            form_id,
            value,
            text: String::new(),
            created,
        };
        tables.scores.push(score.clone());
        score
    }

    pub fn scores(&self) -> Vec<Score> {
        self.lock().scores.clone()
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn active_cohorts(&self, form: FormId) -> Result<Vec<Cohort>, StoreError> {
        let tables = self.lock();
        let mut cohorts: Vec<Cohort> = tables
            .cohorts
            .values()
            .filter(|c| c.form_id == form && c.status == CohortStatus::Active)
            .cloned()
            .collect();
        cohorts.sort_by_key(|c| c.id);
        Ok(cohorts)
    }

    async fn reviewer_panels(&self, reviewer: ReviewerId) -> Result<Vec<PanelId>, StoreError> {
        let tables = self.lock();
        let mut panels: Vec<PanelId> = tables
            .panels
            .iter()
            .filter(|(_, reviewers)| reviewers.contains(&reviewer))
            .map(|(id, _)| *id)
            .collect();
        panels.sort_unstable();
        Ok(panels)
    }

    async fn cohort(&self, cohort: CohortId) -> Result<Option<Cohort>, StoreError> {
        Ok(self.lock().cohorts.get(&cohort).cloned())
    }

    async fn cohort_criteria(&self, cohort: CohortId) -> Result<Vec<Criterion>, StoreError> {
        Ok(self.lock().criteria_of(cohort))
    }

    async fn cohort_members(&self, cohorts: &[CohortId]) -> Result<Vec<CohortMember>, StoreError> {
        let tables = self.lock();
        Ok(tables
            .members
            .iter()
            .filter(|m| cohorts.contains(&m.cohort_id))
            .cloned()
            .collect())
    }

    async fn primary_scores(
        &self,
        reviewer: ReviewerId,
        form: FormId,
    ) -> Result<Vec<PrimaryScore>, StoreError> {
        let tables = self.lock();
        let mut rows = Vec::new();
        for score in tables
            .scores
            .iter()
            .filter(|s| s.panelist == reviewer && s.form_id == form)
        {
            let Some(cohort) = tables.cohorts.get(&score.cohort_id) else {
                continue;
            };
            let Some(primary) = tables.primary_of(score.cohort_id) else {
                continue;
            };
            if primary.id != score.criterion_id {
                continue;
            }
            rows.push(PrimaryScore {
                score: score.clone(),
                cohort_status: cohort.status,
                kind: primary.kind,
            });
        }
        rows.sort_by_key(|row| row.score.sequence_key());
        Ok(rows)
    }

    async fn primary_loads(
        &self,
        cohort: CohortId,
        criterion: CriterionId,
    ) -> Result<HashMap<Uuid, i64>, StoreError> {
        let tables = self.lock();
        let mut loads = HashMap::new();
        for score in tables.scores.iter().filter(|s| {
            s.cohort_id == cohort && s.criterion_id == criterion && s.value.unwrap_or(0) > 0
        }) {
            *loads.entry(score.submission).or_insert(0) += 1;
        }
        Ok(loads)
    }

    async fn insert_claim(&self, claim: NewClaim) -> Result<Score, StoreError> {
        let mut tables = self.lock();
        let taken = tables.scores.iter().any(|s| {
            s.submission == claim.submission
                && s.cohort_id == claim.cohort_id
                && s.criterion_id == claim.criterion_id
                && (s.panelist == claim.panelist || s.value.is_none())
        });
        if taken {
            return Err(StoreError::Conflict);
        }
        let score = Score {
            id: tables.next_id(),
            panelist: claim.panelist,
            submission: claim.submission,
            cohort_id: claim.cohort_id,
            criterion_id: claim.criterion_id,
            form_id: claim.form_id,
            value: None,
            text: String::new(),
            created: claim.created,
        };
        tables.scores.push(score.clone());
        Ok(score)
    }

    async fn delete_score(&self, id: ScoreId) -> Result<(), StoreError> {
        self.lock().scores.retain(|s| s.id != id);
        Ok(())
    }

    async fn commit_scores(&self, commit: &ScoreCommit) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let Some(primary) = tables.find_score(
            commit.panelist,
            commit.submission,
            commit.cohort_id,
            commit.primary_criterion,
        ) else {
            return Err(StoreError::StaleClaim);
        };
        tables.scores[primary].value = Some(commit.primary_value);
        tables.scores[primary].text = commit.primary_text.clone();

        for write in &commit.secondary {
            match write {
                ScoreWrite::Upsert {
                    criterion_id,
                    value,
                    text,
                } => {
                    match tables.find_score(
                        commit.panelist,
                        commit.submission,
                        commit.cohort_id,
                        *criterion_id,
                    ) {
                        Some(index) => {
                            tables.scores[index].value = Some(*value);
                            tables.scores[index].text = text.clone();
                        }
                        None => {
                            let score = Score {
                                id: tables.next_id(),
                                panelist: commit.panelist,
                                submission: commit.submission,
                                cohort_id: commit.cohort_id,
                                criterion_id: *criterion_id,
                                form_id: commit.form_id,
                                value: Some(*value),
                                text: text.clone(),
                                created: commit.created,
                            };
                            tables.scores.push(score);
                        }
                    }
                }
                ScoreWrite::Delete { criterion_id } => {
                    tables.scores.retain(|s| {
                        !(s.panelist == commit.panelist
                            && s.submission == commit.submission
                            && s.cohort_id == commit.cohort_id
                            && s.criterion_id == *criterion_id)
                    });
                }
            }
        }
        Ok(())
    }

    async fn submission_scores(
        &self,
        reviewer: ReviewerId,
        submission: Uuid,
        cohort: CohortId,
    ) -> Result<Vec<Score>, StoreError> {
        let tables = self.lock();
        Ok(tables
            .scores
            .iter()
            .filter(|s| s.panelist == reviewer && s.submission == submission && s.cohort_id == cohort)
            .cloned()
            .collect())
    }

    async fn set_cohort_status(
        &self,
        cohort: CohortId,
        status: CohortStatus,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tables = self.lock();
        let Some(entry) = tables.cohorts.get_mut(&cohort) else {
            return Err(StoreError::NotFound(format!("cohort {cohort}")));
        };
        entry.status = status;
        match status {
            CohortStatus::Active => entry.activated = Some(at),
            CohortStatus::Completed => entry.completed = Some(at),
            CohortStatus::Inactive => {}
        }
        if status != CohortStatus::Inactive {
            return Ok(0);
        }
        let before = tables.scores.len();
        tables
            .scores
            .retain(|s| !(s.cohort_id == cohort && s.value.is_none()));
        Ok((before - tables.scores.len()) as u64)
    }

    async fn add_members(
        &self,
        cohort: CohortId,
        members: &[(Uuid, String)],
    ) -> Result<i64, StoreError> {
        let mut tables = self.lock();
        if !tables.cohorts.contains_key(&cohort) {
            return Err(StoreError::NotFound(format!("cohort {cohort}")));
        }
        for (submission, content_type) in members {
            let exists = tables
                .members
                .iter()
                .any(|m| m.cohort_id == cohort && m.submission == *submission);
            if !exists {
                tables.members.push(CohortMember {
                    cohort_id: cohort,
                    submission: *submission,
                    content_type: content_type.clone(),
                });
            }
        }
        let size = tables.members.iter().filter(|m| m.cohort_id == cohort).count() as i64;
        if let Some(entry) = tables.cohorts.get_mut(&cohort) {
            entry.size = size;
        }
        Ok(size)
    }

    async fn sweep_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.lock();
        let before = tables.scores.len();
        tables
            .scores
            .retain(|s| !(s.value.is_none() && s.created < cutoff));
        Ok((before - tables.scores.len()) as u64)
    }
}
