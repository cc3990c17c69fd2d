use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Cohort, CohortId, CohortMember, CohortStatus, Criterion, CriterionId, FormId, NewClaim,
    PanelId, PrimaryScore, ReviewerId, Score, ScoreCommit, ScoreId,
};

#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn active_cohorts(&self, form: FormId) -> Result<Vec<Cohort>, StoreError>;

    async fn reviewer_panels(&self, reviewer: ReviewerId) -> Result<Vec<PanelId>, StoreError>;

    async fn cohort(&self, cohort: CohortId) -> Result<Option<Cohort>, StoreError>;

    /// The cohort's criteria ordered by rank; the first one is primary.
    async fn cohort_criteria(&self, cohort: CohortId) -> Result<Vec<Criterion>, StoreError>;

    async fn cohort_members(&self, cohorts: &[CohortId]) -> Result<Vec<CohortMember>, StoreError>;

    /// The reviewer's rows on each cohort's primary criterion for a form.
    async fn primary_scores(
        &self,
        reviewer: ReviewerId,
        form: FormId,
    ) -> Result<Vec<PrimaryScore>, StoreError>;

    /// Completed (value > 0) scores per submission, across all reviewers.
    async fn primary_loads(
        &self,
        cohort: CohortId,
        criterion: CriterionId,
    ) -> Result<HashMap<Uuid, i64>, StoreError>;

    /// Fails with [`StoreError::Conflict`] if the reviewer already has this row
    /// or another reviewer holds a live placeholder on it.
    async fn insert_claim(&self, claim: NewClaim) -> Result<Score, StoreError>;

    async fn delete_score(&self, id: ScoreId) -> Result<(), StoreError>;

    /// Applies a submission in one transaction. The primary row is updated
    /// only if it still exists; otherwise nothing is written and
    /// [`StoreError::StaleClaim`] is returned.
    async fn commit_scores(&self, commit: &ScoreCommit) -> Result<(), StoreError>;

    async fn submission_scores(
        &self,
        reviewer: ReviewerId,
        submission: Uuid,
        cohort: CohortId,
    ) -> Result<Vec<Score>, StoreError>;

    /// Changes a cohort's status and stamps its lifecycle timestamps. A move
    /// to inactive releases the cohort's placeholders; returns how many.
    async fn set_cohort_status(
        &self,
        cohort: CohortId,
        status: CohortStatus,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn add_members(
        &self,
        cohort: CohortId,
        members: &[(Uuid, String)],
    ) -> Result<i64, StoreError>;

    /// Deletes placeholders created before `cutoff`.
    async fn sweep_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
