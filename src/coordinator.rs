//! A placeholder score (value `NULL`) on a cohort's primary criterion is a
//! lease on that submission for one reviewer.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, StoreError};
use crate::history;
use crate::models::{
    Assignment, CohortId, CohortStatus, Direction, FormId, HistoryEntry, NextAssignment,
    PrimaryScore, ReviewerId, Score, ScoreCommit, ScoreStatus,
};
use crate::picker::{self, ClaimOutcome, ClaimRequest};
use crate::selector;
use crate::store::ReviewStore;
use crate::validate::{self, FieldValue};

/// Where the reviewer goes after their scores are saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AfterSubmit {
    #[default]
    Assign,
    Step(Direction),
}

#[derive(Debug, Clone)]
pub struct ScoreSubmission {
    pub reviewer: ReviewerId,
    pub form: FormId,
    pub submission: Uuid,
    pub cohort: CohortId,
    pub values: BTreeMap<String, FieldValue>,
    pub then: AfterSubmit,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "navigation", content = "target", rename_all = "snake_case")]
pub enum Navigation {
    Assignment(NextAssignment),
    /// `None` sends the reviewer to their summary view.
    History(Option<HistoryEntry>),
}

pub struct Coordinator<S> {
    store: S,
    config: CoordinatorConfig,
    calls: AtomicU64,
}

impl<S: ReviewStore> Coordinator<S> {
    pub fn new(store: S, config: CoordinatorConfig) -> Self {
        Self {
            store,
            config,
            calls: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(base) => {
                let call = self.calls.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(base.wrapping_add(call))
            }
            None => StdRng::from_os_rng(),
        }
    }

    async fn assignment(
        &self,
        submission: Uuid,
        cohort: CohortId,
    ) -> Result<Option<Assignment>, StoreError> {
        let Some(cohort) = self.store.cohort(cohort).await? else {
            return Ok(None);
        };
        let criteria = self.store.cohort_criteria(cohort.id).await?;
        Ok(Some(Assignment {
            submission,
            cohort,
            criteria,
        }))
    }

    /// Returns the reviewer's live claim, releasing any that went stale.
    async fn resume_claim(
        &self,
        claims: &[PrimaryScore],
    ) -> Result<Option<Assignment>, StoreError> {
        let placeholders = claims.iter().rev().filter(|c| c.score.is_placeholder());

        for claim in placeholders {
            let score = &claim.score;
            let superseded = claims.iter().any(|other| {
                other.score.submission == score.submission
                    && !other.score.is_placeholder()
                    && other.score.sequence_key() > score.sequence_key()
            });

            if claim.cohort_status != CohortStatus::Active || superseded {
                info!(
                    reviewer = score.panelist,
                    cohort = score.cohort_id,
                    submission = %score.submission,
                    superseded,
                    "releasing stale claim"
                );
                self.store.delete_score(score.id).await?;
                continue;
            }

            match self.assignment(score.submission, score.cohort_id).await? {
                Some(assignment) => {
                    debug!(
                        reviewer = score.panelist,
                        cohort = score.cohort_id,
                        submission = %score.submission,
                        "resuming claim"
                    );
                    return Ok(Some(assignment));
                }
                None => self.store.delete_score(score.id).await?,
            }
        }

        Ok(None)
    }

    /// Oldest explicitly skipped submission in a still-active cohort.
    async fn skipped_revisit(
        &self,
        claims: &[PrimaryScore],
    ) -> Result<Option<Assignment>, StoreError> {
        let skipped = claims.iter().find(|c| {
            c.cohort_status == CohortStatus::Active && c.status() == ScoreStatus::Skipped
        });
        match skipped {
            Some(claim) => {
                self.assignment(claim.score.submission, claim.score.cohort_id)
                    .await
            }
            None => Ok(None),
        }
    }

    /// Picks what the reviewer should score next for a form.
    pub async fn next_assignment(
        &self,
        reviewer: ReviewerId,
        form: FormId,
    ) -> Result<NextAssignment, CoordinatorError> {
        let mut rng = self.rng();

        let claims = self.store.primary_scores(reviewer, form).await?;
        if let Some(assignment) = self.resume_claim(&claims).await? {
            return Ok(NextAssignment::Assigned(assignment));
        }

        // Resuming returns any live claim, so `outstanding` is empty unless
        // another request for this reviewer claimed something meanwhile.
        let claims = self.store.primary_scores(reviewer, form).await?;
        let outstanding: HashSet<Uuid> = claims
            .iter()
            .filter(|c| c.score.is_placeholder())
            .map(|c| c.score.submission)
            .collect();

        let cohorts = self.store.active_cohorts(form).await?;
        let panels = self.store.reviewer_panels(reviewer).await?;
        let ids: Vec<CohortId> = cohorts.iter().map(|c| c.id).collect();
        let members = self.store.cohort_members(&ids).await?;
        let mut eligible = selector::eligible_cohorts(&cohorts, &members, &panels, &claims);
        let mut contended = false;

        while !eligible.is_empty() {
            let weights: Vec<f64> = eligible.iter().map(|e| e.cohort.weight()).collect();
            let Some(index) = selector::weighted_pick(&weights, &mut rng) else {
                break;
            };
            let candidate = eligible.swap_remove(index);
            let cohort = candidate.cohort;

            let criteria = self.store.cohort_criteria(cohort.id).await?;
            let Some(primary) = criteria.first() else {
                warn!(cohort = cohort.id, "active cohort has no criteria");
                continue;
            };

            let request = ClaimRequest {
                reviewer,
                form,
                cohort: &cohort,
                primary,
                outstanding: &outstanding,
            };
            match picker::claim_submission(&self.store, &request, candidate.pending, &mut rng)
                .await?
            {
                ClaimOutcome::Claimed(score) => {
                    info!(reviewer, cohort = cohort.id, submission = %score.submission, "claimed submission");
                    return Ok(NextAssignment::Assigned(Assignment {
                        submission: score.submission,
                        cohort,
                        criteria,
                    }));
                }
                ClaimOutcome::Contended => {
                    debug!(reviewer, cohort = cohort.id, "remaining submissions are claimed");
                    contended = true;
                }
                ClaimOutcome::Empty => debug!(reviewer, cohort = cohort.id, "cohort exhausted"),
            }
        }

        if let Some(assignment) = self.skipped_revisit(&claims).await? {
            debug!(reviewer, submission = %assignment.submission, "revisiting skipped submission");
            return Ok(NextAssignment::Exhausted(assignment));
        }

        if contended {
            info!(reviewer, form, "unreviewed submissions are held by other reviewers");
            return Ok(NextAssignment::Busy);
        }

        info!(reviewer, form, "nothing left to review");
        Ok(NextAssignment::AllDone)
    }

    /// Validates and saves a reviewer's scores, then decides where they go
    /// next.
    pub async fn submit_scores(
        &self,
        request: ScoreSubmission,
    ) -> Result<Navigation, CoordinatorError> {
        let stale = || CoordinatorError::StaleClaim {
            submission: request.submission,
            cohort: request.cohort,
        };

        let cohort = match self.store.cohort(request.cohort).await? {
            Some(cohort) if cohort.form_id == request.form => cohort,
            _ => return Err(CoordinatorError::UnknownCohort(request.cohort)),
        };
        if cohort.status == CohortStatus::Inactive {
            warn!(reviewer = request.reviewer, cohort = cohort.id, "submission to inactive cohort");
            return Err(stale());
        }

        let criteria = self.store.cohort_criteria(cohort.id).await?;
        let scores = validate::validate(&cohort, &criteria, &request.values)?;
        let Some(primary) = criteria.first() else {
            return Err(CoordinatorError::UnknownCohort(cohort.id));
        };

        let commit = ScoreCommit {
            panelist: request.reviewer,
            submission: request.submission,
            cohort_id: cohort.id,
            form_id: request.form,
            primary_criterion: primary.id,
            primary_value: scores.primary_value,
            primary_text: scores.primary_text,
            secondary: scores.secondary,
            created: Utc::now(),
        };
        match self.store.commit_scores(&commit).await {
            Ok(()) => {}
            Err(StoreError::StaleClaim) => {
                warn!(
                    reviewer = request.reviewer,
                    cohort = cohort.id,
                    submission = %request.submission,
                    "claim vanished before scores were saved"
                );
                return Err(stale());
            }
            Err(err) => return Err(err.into()),
        }
        info!(
            reviewer = request.reviewer,
            cohort = cohort.id,
            submission = %request.submission,
            value = commit.primary_value,
            "scores committed"
        );

        match request.then {
            AfterSubmit::Assign => Ok(Navigation::Assignment(
                self.next_assignment(request.reviewer, request.form).await?,
            )),
            AfterSubmit::Step(direction) => Ok(Navigation::History(
                self.history_step(
                    request.reviewer,
                    request.form,
                    request.submission,
                    request.cohort,
                    direction,
                )
                .await?,
            )),
        }
    }

    /// Moves through the reviewer's completed scores from the given
    /// submission.
    pub async fn history_step(
        &self,
        reviewer: ReviewerId,
        form: FormId,
        submission: Uuid,
        cohort: CohortId,
        direction: Direction,
    ) -> Result<Option<HistoryEntry>, CoordinatorError> {
        let claims = self.store.primary_scores(reviewer, form).await?;
        let current = claims
            .iter()
            .find(|c| c.score.submission == submission && c.score.cohort_id == cohort)
            .map(|c| c.score.sequence_key());
        Ok(history::adjacent(&claims, current, direction))
    }

    /// The reviewer's saved scores for a submission, for re-showing them.
    pub async fn prior_scores(
        &self,
        reviewer: ReviewerId,
        submission: Uuid,
        cohort: CohortId,
    ) -> Result<Vec<Score>, CoordinatorError> {
        let scores = self
            .store
            .submission_scores(reviewer, submission, cohort)
            .await?;
        Ok(scores.into_iter().filter(|s| !s.is_placeholder()).collect())
    }

    pub async fn set_cohort_status(
        &self,
        cohort: CohortId,
        status: CohortStatus,
    ) -> Result<u64, CoordinatorError> {
        let released = self
            .store
            .set_cohort_status(cohort, status, Utc::now())
            .await?;
        info!(cohort, %status, released, "cohort status changed");
        Ok(released)
    }

    /// Releases placeholders older than `ttl`.
    pub async fn sweep_claims_older_than(
        &self,
        ttl: std::time::Duration,
    ) -> Result<u64, CoordinatorError> {
        let cutoff = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };
        let swept = self.store.sweep_claims(cutoff).await?;
        if swept > 0 {
            info!(swept, "released expired claims");
        }
        Ok(swept)
    }

    /// Runs the lease sweep when a claim TTL is configured.
    pub async fn sweep_expired_claims(&self) -> Result<u64, CoordinatorError> {
        match self.config.claim_ttl {
            Some(ttl) => self.sweep_claims_older_than(ttl).await,
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::memory::MemoryStore;
    use crate::models::{CriterionKind, NewCohort};
    use chrono::Duration;

    const FORM: FormId = 1;

    struct Fixture {
        coordinator: Coordinator<MemoryStore>,
        cohort: CohortId,
        merit: i64,
        fit: i64,
        submissions: Vec<Uuid>,
    }

    /// One skippable cohort of four submissions scored on merit (0-10) and fit.
    async fn fixture(reviewers: &[ReviewerId]) -> Fixture {
        let store = MemoryStore::new();
        let panel = store.add_panel(reviewers);
        let merit = store.add_criterion(
            FORM,
            0,
            "merit",
            CriterionKind::Numeric {
                min: Some(0),
                max: Some(10),
            },
        );
        let fit = store.add_criterion(FORM, 1, "fit", CriterionKind::Boolean);
        let cohort = store.add_cohort(
            NewCohort::new(FORM, panel, "a", vec![merit.id, fit.id]).skippable(),
        );
        let submissions: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let members: Vec<(Uuid, String)> =
            submissions.iter().map(|s| (*s, "application".to_string())).collect();
        store.add_members(cohort, &members).await.unwrap();

        Fixture {
            coordinator: Coordinator::new(store, CoordinatorConfig::seeded(17)),
            cohort,
            merit: merit.id,
            fit: fit.id,
            submissions,
        }
    }

    fn submission(
        reviewer: ReviewerId,
        assignment: &Assignment,
        pairs: &[(&str, &str)],
    ) -> ScoreSubmission {
        ScoreSubmission {
            reviewer,
            form: FORM,
            submission: assignment.submission,
            cohort: assignment.cohort.id,
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.parse().unwrap()))
                .collect(),
            then: AfterSubmit::Assign,
        }
    }

    fn assigned(next: NextAssignment) -> Assignment {
        match next {
            NextAssignment::Assigned(assignment) => assignment,
            other => panic!("expected an assignment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_secondary_is_recorded_as_skip() {
        let fx = fixture(&[1]).await;
        let assignment = assigned(fx.coordinator.next_assignment(1, FORM).await.unwrap());
        assert_eq!(assignment.criteria.len(), 2);

        fx.coordinator
            .submit_scores(submission(1, &assignment, &[("merit", "7")]))
            .await
            .unwrap();

        let scores = fx
            .coordinator
            .prior_scores(1, assignment.submission, fx.cohort)
            .await
            .unwrap();
        let value_of = |criterion: i64| {
            scores
                .iter()
                .find(|s| s.criterion_id == criterion)
                .and_then(|s| s.value)
        };
        assert_eq!(value_of(fx.merit), Some(7));
        assert_eq!(value_of(fx.fit), Some(0));
    }

    #[tokio::test]
    async fn resubmitting_identical_scores_changes_nothing() {
        let fx = fixture(&[1]).await;
        let assignment = assigned(fx.coordinator.next_assignment(1, FORM).await.unwrap());
        let request = submission(1, &assignment, &[("merit", "5"), ("fit", "true")]);

        fx.coordinator.submit_scores(request.clone()).await.unwrap();
        let mut before = fx.coordinator.store().scores();
        before.retain(|s| s.submission == assignment.submission);

        fx.coordinator.submit_scores(request).await.unwrap();
        let mut after = fx.coordinator.store().scores();
        after.retain(|s| s.submission == assignment.submission);

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn pending_claim_is_resumed_not_replaced() {
        let fx = fixture(&[1]).await;
        let first = assigned(fx.coordinator.next_assignment(1, FORM).await.unwrap());
        let again = assigned(fx.coordinator.next_assignment(1, FORM).await.unwrap());
        assert_eq!(first.submission, again.submission);
        assert_eq!(fx.coordinator.store().scores().len(), 1);
    }

    #[tokio::test]
    async fn scored_submissions_are_never_reassigned() {
        let fx = fixture(&[1]).await;
        let mut seen = HashSet::new();
        loop {
            match fx.coordinator.next_assignment(1, FORM).await.unwrap() {
                NextAssignment::Assigned(assignment) => {
                    assert!(seen.insert(assignment.submission), "reassigned a scored submission");
                    fx.coordinator
                        .submit_scores(submission(1, &assignment, &[("merit", "3"), ("fit", "false")]))
                        .await
                        .unwrap();
                }
                NextAssignment::AllDone => break,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(seen.len(), fx.submissions.len());
    }

    #[tokio::test]
    async fn skipped_submission_is_revisited_when_exhausted() {
        let fx = fixture(&[1]).await;
        let mut skipped = None;
        while let NextAssignment::Assigned(assignment) =
            fx.coordinator.next_assignment(1, FORM).await.unwrap()
        {
            let merit = if skipped.is_none() { "skip" } else { "6" };
            skipped.get_or_insert(assignment.submission);
            fx.coordinator
                .submit_scores(submission(1, &assignment, &[("merit", merit)]))
                .await
                .unwrap();
        }

        match fx.coordinator.next_assignment(1, FORM).await.unwrap() {
            NextAssignment::Exhausted(assignment) => {
                assert_eq!(Some(assignment.submission), skipped)
            }
            other => panic!("expected a skipped revisit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lone_submission_goes_to_exactly_one_of_two_racers() {
        let fx = fixture(&[1, 2]).await;
        for scored in &fx.submissions[1..] {
            fx.coordinator
                .store()
                .record(1, *scored, fx.cohort, fx.merit, Some(5), Utc::now());
            fx.coordinator
                .store()
                .record(2, *scored, fx.cohort, fx.merit, Some(5), Utc::now());
        }

        let (a, b) = tokio::join!(
            fx.coordinator.next_assignment(1, FORM),
            fx.coordinator.next_assignment(2, FORM)
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let winners: Vec<&Assignment> = outcomes
            .iter()
            .filter_map(|o| match o {
                NextAssignment::Assigned(a) => Some(a),
                _ => None,
            })
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].submission, fx.submissions[0]);
        assert!(outcomes.iter().any(|o| matches!(o, NextAssignment::Busy)));

        let live = fx
            .coordinator
            .store()
            .scores()
            .into_iter()
            .filter(|s| s.is_placeholder())
            .count();
        assert_eq!(live, 1);
    }

    #[tokio::test]
    async fn abandoned_claim_leaves_other_reviewer_busy_not_done() {
        let store = MemoryStore::new();
        let panel = store.add_panel(&[1, 2]);
        let merit = store.add_criterion(FORM, 0, "merit", CriterionKind::Boolean);
        let cohort = store.add_cohort(NewCohort::new(FORM, panel, "solo", vec![merit.id]));
        let only = Uuid::new_v4();
        store.add_members(cohort, &[(only, String::new())]).await.unwrap();
        let coordinator = Coordinator::new(store, CoordinatorConfig::seeded(3));

        let first = assigned(coordinator.next_assignment(1, FORM).await.unwrap());
        assert_eq!(first.submission, only);

        assert!(matches!(
            coordinator.next_assignment(2, FORM).await.unwrap(),
            NextAssignment::Busy
        ));

        // Once the first reviewer's claim expires the submission is free again.
        let swept = coordinator
            .store()
            .sweep_claims(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(swept, 1);
        let second = assigned(coordinator.next_assignment(2, FORM).await.unwrap());
        assert_eq!(second.submission, only);
    }

    #[tokio::test]
    async fn held_claim_is_returned_before_any_new_pick() {
        let store = MemoryStore::new();
        let panel = store.add_panel(&[1]);
        let merit = store.add_criterion(FORM, 0, "merit", CriterionKind::Boolean);
        for name in ["left", "right"] {
            let cohort = store.add_cohort(NewCohort::new(FORM, panel, name, vec![merit.id]));
            let members: Vec<(Uuid, String)> =
                (0..3).map(|_| (Uuid::new_v4(), String::new())).collect();
            store.add_members(cohort, &members).await.unwrap();
        }
        let coordinator = Coordinator::new(store, CoordinatorConfig::seeded(8));

        let held = assigned(coordinator.next_assignment(1, FORM).await.unwrap());
        for _ in 0..10 {
            let again = assigned(coordinator.next_assignment(1, FORM).await.unwrap());
            assert_eq!((again.submission, again.cohort.id), (held.submission, held.cohort.id));
        }
        assert_eq!(coordinator.store().scores().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reviewers_never_duplicate_rows() {
        let reviewers: Vec<ReviewerId> = (1..=8).collect();
        let fx = fixture(&reviewers).await;
        let coordinator = Arc::new(fx.coordinator);

        let mut handles = Vec::new();
        for reviewer in reviewers {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                for _ in 0..3 {
                    if let NextAssignment::Assigned(assignment) =
                        coordinator.next_assignment(reviewer, FORM).await.unwrap()
                    {
                        coordinator
                            .submit_scores(submission(reviewer, &assignment, &[("merit", "4")]))
                            .await
                            .unwrap();
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let scores = coordinator.store().scores();
        let keys: HashSet<_> = scores
            .iter()
            .map(|s| (s.panelist, s.submission, s.cohort_id, s.criterion_id))
            .collect();
        assert_eq!(keys.len(), scores.len());
    }

    #[tokio::test]
    async fn deactivation_drops_claim_and_stales_submission() {
        let fx = fixture(&[1]).await;
        let assignment = assigned(fx.coordinator.next_assignment(1, FORM).await.unwrap());

        let released = fx
            .coordinator
            .set_cohort_status(fx.cohort, CohortStatus::Inactive)
            .await
            .unwrap();
        assert_eq!(released, 1);

        let err = fx
            .coordinator
            .submit_scores(submission(1, &assignment, &[("merit", "8")]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::StaleClaim { .. }));
        assert!(matches!(
            fx.coordinator.next_assignment(1, FORM).await.unwrap(),
            NextAssignment::AllDone
        ));
    }

    #[tokio::test]
    async fn claim_deleted_mid_review_is_stale() {
        let fx = fixture(&[1]).await;
        let assignment = assigned(fx.coordinator.next_assignment(1, FORM).await.unwrap());
        let claim = fx.coordinator.store().scores().remove(0);
        fx.coordinator.store().delete_score(claim.id).await.unwrap();

        let err = fx
            .coordinator
            .submit_scores(submission(1, &assignment, &[("merit", "8")]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::StaleClaim { .. }));
        assert!(fx.coordinator.store().scores().is_empty());
    }

    #[tokio::test]
    async fn invalid_scores_write_nothing() {
        let fx = fixture(&[1]).await;
        let assignment = assigned(fx.coordinator.next_assignment(1, FORM).await.unwrap());
        let err = fx
            .coordinator
            .submit_scores(submission(1, &assignment, &[("merit", "42"), ("fit", "maybe")]))
            .await
            .unwrap_err();

        match err {
            CoordinatorError::Validation(errors) => {
                assert!(errors.rejects("merit"));
                assert!(errors.rejects("fit"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        let scores = fx.coordinator.store().scores();
        assert_eq!(scores.len(), 1);
        assert!(scores[0].is_placeholder());
    }

    #[tokio::test]
    async fn newer_score_elsewhere_supersedes_old_claim() {
        let fx = fixture(&[1]).await;
        let store = fx.coordinator.store();
        let target = fx.submissions[0];
        let old = Utc::now() - Duration::hours(2);
        store.record(1, target, fx.cohort, fx.merit, None, old);
        let other_cohort = store.add_cohort(NewCohort::new(FORM, 1, "b", vec![fx.merit]));
        store.record(1, target, other_cohort, fx.merit, Some(9), old + Duration::hours(1));

        let next = assigned(fx.coordinator.next_assignment(1, FORM).await.unwrap());
        assert_ne!(next.submission, target);
        let stale_left = store
            .scores()
            .iter()
            .any(|s| s.submission == target && s.is_placeholder());
        assert!(!stale_left);
    }

    #[tokio::test]
    async fn history_walks_back_and_forth_after_submit() {
        let fx = fixture(&[1]).await;
        let mut order = Vec::new();
        for _ in 0..3 {
            let assignment = assigned(fx.coordinator.next_assignment(1, FORM).await.unwrap());
            order.push(assignment.submission);
            fx.coordinator
                .submit_scores(submission(1, &assignment, &[("merit", "2")]))
                .await
                .unwrap();
        }

        let step = |submission, direction| {
            fx.coordinator
                .history_step(1, FORM, submission, fx.cohort, direction)
        };
        assert_eq!(step(order[2], Direction::Previous).await.unwrap().map(|e| e.submission), Some(order[1]));
        assert_eq!(step(order[1], Direction::Previous).await.unwrap().map(|e| e.submission), Some(order[0]));
        assert_eq!(step(order[0], Direction::Previous).await.unwrap(), None);
        assert_eq!(step(order[0], Direction::Next).await.unwrap().map(|e| e.submission), Some(order[1]));

        let mut request = ScoreSubmission {
            reviewer: 1,
            form: FORM,
            submission: order[1],
            cohort: fx.cohort,
            values: BTreeMap::from([("merit".to_string(), FieldValue::Number(9))]),
            then: AfterSubmit::Step(Direction::Previous),
        };
        match fx.coordinator.submit_scores(request.clone()).await.unwrap() {
            Navigation::History(Some(entry)) => assert_eq!(entry.submission, order[0]),
            other => panic!("expected history entry, got {other:?}"),
        }
        request.submission = order[2];
        request.then = AfterSubmit::Step(Direction::Next);
        assert!(matches!(
            fx.coordinator.submit_scores(request).await.unwrap(),
            Navigation::History(None)
        ));
    }

    #[tokio::test]
    async fn heavier_cohort_is_drawn_more_often() {
        let store = MemoryStore::new();
        let panel = store.add_panel(&[1]);
        let merit = store.add_criterion(FORM, 0, "merit", CriterionKind::Boolean);
        let heavy = store.add_cohort(NewCohort::new(FORM, panel, "heavy", vec![merit.id]).weight(3.0));
        let light = store.add_cohort(NewCohort::new(FORM, panel, "light", vec![merit.id]));
        store.add_members(heavy, &[(Uuid::new_v4(), String::new())]).await.unwrap();
        store.add_members(light, &[(Uuid::new_v4(), String::new())]).await.unwrap();
        let coordinator = Coordinator::new(store, CoordinatorConfig::seeded(99));

        let mut heavy_draws = 0;
        let rounds = 2_000;
        for _ in 0..rounds {
            let assignment = assigned(coordinator.next_assignment(1, FORM).await.unwrap());
            if assignment.cohort.id == heavy {
                heavy_draws += 1;
            }
            let claim = coordinator
                .store()
                .scores()
                .into_iter()
                .find(|s| s.is_placeholder())
                .unwrap();
            coordinator.store().delete_score(claim.id).await.unwrap();
        }
        let share = heavy_draws as f64 / rounds as f64;
        assert!((share - 0.75).abs() < 0.05, "share was {share}");
    }

    #[tokio::test]
    async fn sweep_runs_only_with_ttl() {
        let fx = fixture(&[1]).await;
        let old = Utc::now() - Duration::hours(5);
        fx.coordinator
            .store()
            .record(1, fx.submissions[0], fx.cohort, fx.merit, None, old);
        assert_eq!(fx.coordinator.sweep_expired_claims().await.unwrap(), 0);

        let store = MemoryStore::new();
        let coordinator = Coordinator::new(
            store,
            CoordinatorConfig {
                seed: Some(1),
                claim_ttl: Some(std::time::Duration::from_secs(3600)),
            },
        );
        coordinator.store().record(1, Uuid::new_v4(), 1, 1, None, old);
        assert_eq!(coordinator.sweep_expired_claims().await.unwrap(), 1);
        assert_eq!(fx.coordinator.sweep_claims_older_than(std::time::Duration::from_secs(60)).await.unwrap(), 1);
    }
}
