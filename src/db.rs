use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::config::DbConfig;
use crate::error::StoreError;
use crate::models::{
    Cohort, CohortId, CohortMember, CohortStatus, Criterion, CriterionId, CriterionKind, FormId,
    NewClaim, NewCohort, PanelId, PrimaryScore, ReviewerId, Score, ScoreCommit, ScoreId,
    ScoreWrite,
};
use crate::store::ReviewStore;

const SCORE_COLUMNS: &str = "s.id, s.panelist_id, s.object_id, s.cohort_id, s.input_id, \
                             s.form_id, s.value, s.text, s.created";

const COHORT_COLUMNS: &str = "c.id, c.form_id, c.panel_id, c.name, c.message, c.status, \
                              c.panel_weight, c.size, c.allow_skip, c.created, c.activated, \
                              c.completed";

pub async fn connect(config: &DbConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    Ok(pool)
}

pub async fn init_db(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn decode_error(message: String) -> StoreError {
    StoreError::Database(sqlx::Error::Decode(message.into()))
}

fn score_from_row(row: &PgRow) -> Score {
    Score {
        id: row.get("id"),
        panelist: row.get("panelist_id"),
        submission: row.get("object_id"),
        cohort_id: row.get("cohort_id"),
        criterion_id: row.get("input_id"),
        form_id: row.get("form_id"),
        value: row.get("value"),
        text: row.get("text"),
        created: row.get("created"),
    }
}

fn cohort_from_row(row: &PgRow) -> Result<Cohort, StoreError> {
    let status: String = row.get("status");
    Ok(Cohort {
        id: row.get("id"),
        form_id: row.get("form_id"),
        panel_id: row.get("panel_id"),
        name: row.get("name"),
        message: row.get("message"),
        status: status.parse().map_err(decode_error)?,
        panel_weight: row.get("panel_weight"),
        size: row.get("size"),
        allow_skip: row.get("allow_skip"),
        created: row.get("created"),
        activated: row.get("activated"),
        completed: row.get("completed"),
    })
}

fn kind_from_row(row: &PgRow) -> Result<CriterionKind, StoreError> {
    let tag: String = row.get("kind");
    CriterionKind::from_parts(&tag, row.get("min_num"), row.get("max_num"), row.get("max_chars"))
        .ok_or_else(|| decode_error(format!("unknown input kind: {tag}")))
}

fn criterion_from_row(row: &PgRow) -> Result<Criterion, StoreError> {
    Ok(Criterion {
        id: row.get("id"),
        form_id: row.get("form_id"),
        rank: row.get("rank"),
        name: row.get("name"),
        label: row.get("label"),
        kind: kind_from_row(row)?,
    })
}

/// Postgres-backed claim ledger.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create_panel(
        &self,
        program_id: i64,
        name: &str,
        reviewers: &[ReviewerId],
    ) -> Result<PanelId, StoreError> {
        let id: PanelId = sqlx::query(
            r#"
            INSERT INTO review_panel.panels (program_id, name)
            VALUES ($1, $2)
            ON CONFLICT (program_id, name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(program_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?
        .get("id");

        for reviewer in reviewers {
            sqlx::query(
                r#"
                INSERT INTO review_panel.panelists (panel_id, reviewer_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(id)
            .bind(reviewer)
            .execute(&self.pool)
            .await?;
        }

        Ok(id)
    }

    pub async fn create_criterion(
        &self,
        form_id: FormId,
        rank: i32,
        name: &str,
        kind: CriterionKind,
    ) -> Result<Criterion, StoreError> {
        let (min_num, max_num, max_chars) = match kind {
            CriterionKind::Numeric { min, max } => (min, max, None),
            CriterionKind::Boolean => (None, None, None),
            CriterionKind::Text { max_chars } => {
                (None, None, max_chars.and_then(|n| i32::try_from(n).ok()))
            }
        };
        let row = sqlx::query(
            r#"
            INSERT INTO review_panel.inputs (form_id, rank, name, kind, min_num, max_num, max_chars)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (form_id, name) DO UPDATE
            SET rank = EXCLUDED.rank, kind = EXCLUDED.kind, min_num = EXCLUDED.min_num,
                max_num = EXCLUDED.max_num, max_chars = EXCLUDED.max_chars
            RETURNING id, form_id, rank, name, label, kind, min_num, max_num, max_chars
            "#,
        )
        .bind(form_id)
        .bind(rank)
        .bind(name)
        .bind(kind.tag())
        .bind(min_num)
        .bind(max_num)
        .bind(max_chars)
        .fetch_one(&self.pool)
        .await?;

        criterion_from_row(&row)
    }

    pub async fn create_cohort(&self, new: &NewCohort) -> Result<CohortId, StoreError> {
        let activated = (new.status == CohortStatus::Active).then_some(new.created);
        let id: CohortId = sqlx::query(
            r#"
            INSERT INTO review_panel.cohorts
            (form_id, panel_id, name, message, status, panel_weight, allow_skip, created, activated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (form_id, name) DO UPDATE
            SET panel_id = EXCLUDED.panel_id, panel_weight = EXCLUDED.panel_weight,
                allow_skip = EXCLUDED.allow_skip
            RETURNING id
            "#,
        )
        .bind(new.form_id)
        .bind(new.panel_id)
        .bind(&new.name)
        .bind(&new.message)
        .bind(new.status.as_str())
        .bind(new.panel_weight)
        .bind(new.allow_skip)
        .bind(new.created)
        .bind(activated)
        .fetch_one(&self.pool)
        .await?
        .get("id");

        for input_id in &new.criteria {
            sqlx::query(
                r#"
                INSERT INTO review_panel.cohort_inputs (cohort_id, input_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(id)
            .bind(input_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(id)
    }
}

/// Loads a small demo program: one panel, three criteria and two
/// overlapping cohorts.
pub async fn seed(store: &PgStore) -> Result<(), StoreError> {
    let form_id: FormId = 1;
    let panel = store.create_panel(1, "reviewers", &[1, 2, 3]).await?;

    let merit = store
        .create_criterion(
            form_id,
            0,
            "merit",
            CriterionKind::Numeric {
                min: Some(1),
                max: Some(10),
            },
        )
        .await?;
    let fit = store
        .create_criterion(form_id, 1, "fit", CriterionKind::Boolean)
        .await?;
    let comments = store
        .create_criterion(
            form_id,
            2,
            "comments",
            CriterionKind::Text {
                max_chars: Some(1000),
            },
        )
        .await?;
    let criteria = vec![merit.id, fit.id, comments.id];

    let first = store
        .create_cohort(&NewCohort::new(form_id, panel, "round-one", criteria.clone()).skippable())
        .await?;
    let second = store
        .create_cohort(&NewCohort::new(form_id, panel, "round-two", criteria).weight(0.5))
        .await?;

    let applications: Vec<(Uuid, String)> = (1..=8u128)
        .map(|n| (Uuid::from_u128(0x5eed_0000 + n), "application".to_string()))
        .collect();
    let first_size = store.add_members(first, &applications).await?;
    let second_size = store.add_members(second, &applications[6..]).await?;
    info!(first_size, second_size, "seeded demo cohorts");

    Ok(())
}

#[async_trait]
impl ReviewStore for PgStore {
    async fn active_cohorts(&self, form: FormId) -> Result<Vec<Cohort>, StoreError> {
        let query = format!(
            "SELECT {COHORT_COLUMNS} FROM review_panel.cohorts c \
             WHERE c.form_id = $1 AND c.status = 'active' ORDER BY c.id"
        );
        let rows = sqlx::query(&query).bind(form).fetch_all(&self.pool).await?;
        rows.iter().map(cohort_from_row).collect()
    }

    async fn reviewer_panels(&self, reviewer: ReviewerId) -> Result<Vec<PanelId>, StoreError> {
        let rows = sqlx::query(
            "SELECT panel_id FROM review_panel.panelists WHERE reviewer_id = $1 ORDER BY panel_id",
        )
        .bind(reviewer)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|row| row.get("panel_id")).collect())
    }

    async fn cohort(&self, cohort: CohortId) -> Result<Option<Cohort>, StoreError> {
        let query = format!("SELECT {COHORT_COLUMNS} FROM review_panel.cohorts c WHERE c.id = $1");
        let row = sqlx::query(&query)
            .bind(cohort)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(cohort_from_row).transpose()
    }

    async fn cohort_criteria(&self, cohort: CohortId) -> Result<Vec<Criterion>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT i.id, i.form_id, i.rank, i.name, i.label, i.kind, i.min_num, i.max_num, i.max_chars
            FROM review_panel.cohort_inputs ci
            JOIN review_panel.inputs i ON i.id = ci.input_id
            WHERE ci.cohort_id = $1
            ORDER BY i.rank, i.id
            "#,
        )
        .bind(cohort)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(criterion_from_row).collect()
    }

    async fn cohort_members(&self, cohorts: &[CohortId]) -> Result<Vec<CohortMember>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT cohort_id, object_id, content_type
            FROM review_panel.cohort_members
            WHERE cohort_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(cohorts)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| CohortMember {
                cohort_id: row.get("cohort_id"),
                submission: row.get("object_id"),
                content_type: row.get("content_type"),
            })
            .collect())
    }

    async fn primary_scores(
        &self,
        reviewer: ReviewerId,
        form: FormId,
    ) -> Result<Vec<PrimaryScore>, StoreError> {
        let query = format!(
            r#"
            SELECT {SCORE_COLUMNS}, c.status, i.kind, i.min_num, i.max_num, i.max_chars
            FROM review_panel.scores s
            JOIN review_panel.cohorts c ON c.id = s.cohort_id
            JOIN review_panel.inputs i ON i.id = s.input_id
            WHERE s.panelist_id = $1 AND s.form_id = $2
              AND s.input_id = (
                  SELECT ci.input_id
                  FROM review_panel.cohort_inputs ci
                  JOIN review_panel.inputs pi ON pi.id = ci.input_id
                  WHERE ci.cohort_id = s.cohort_id
                  ORDER BY pi.rank, pi.id
                  LIMIT 1
              )
            ORDER BY s.created, s.id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(reviewer)
            .bind(form)
            .fetch_all(&self.pool)
            .await?;

        let mut scores = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: String = row.get("status");
            scores.push(PrimaryScore {
                score: score_from_row(row),
                cohort_status: status.parse().map_err(decode_error)?,
                kind: kind_from_row(row)?,
            });
        }
        Ok(scores)
    }

    async fn primary_loads(
        &self,
        cohort: CohortId,
        criterion: CriterionId,
    ) -> Result<HashMap<Uuid, i64>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT object_id, COUNT(*) AS completed
            FROM review_panel.scores
            WHERE cohort_id = $1 AND input_id = $2 AND value > 0
            GROUP BY object_id
            "#,
        )
        .bind(cohort)
        .bind(criterion)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("object_id"), row.get("completed")))
            .collect())
    }

    async fn insert_claim(&self, claim: NewClaim) -> Result<Score, StoreError> {
        // DO NOTHING covers both the row key and the live-claim index.
        let row = sqlx::query(
            r#"
            INSERT INTO review_panel.scores AS s
            (panelist_id, object_id, cohort_id, input_id, form_id, value, text, created)
            VALUES ($1, $2, $3, $4, $5, NULL, '', $6)
            ON CONFLICT DO NOTHING
            RETURNING s.id, s.panelist_id, s.object_id, s.cohort_id, s.input_id,
                      s.form_id, s.value, s.text, s.created
            "#,
        )
        .bind(claim.panelist)
        .bind(claim.submission)
        .bind(claim.cohort_id)
        .bind(claim.criterion_id)
        .bind(claim.form_id)
        .bind(claim.created)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(score_from_row(&row)),
            None => Err(StoreError::Conflict),
        }
    }

    async fn delete_score(&self, id: ScoreId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM review_panel.scores WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn commit_scores(&self, commit: &ScoreCommit) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE review_panel.scores
            SET value = $1, text = $2
            WHERE panelist_id = $3 AND object_id = $4 AND cohort_id = $5 AND input_id = $6
            "#,
        )
        .bind(commit.primary_value)
        .bind(&commit.primary_text)
        .bind(commit.panelist)
        .bind(commit.submission)
        .bind(commit.cohort_id)
        .bind(commit.primary_criterion)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::StaleClaim);
        }

        for write in &commit.secondary {
            match write {
                ScoreWrite::Upsert {
                    criterion_id,
                    value,
                    text,
                } => {
                    sqlx::query(
                        r#"
                        INSERT INTO review_panel.scores
                        (panelist_id, object_id, cohort_id, input_id, form_id, value, text, created)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                        ON CONFLICT ON CONSTRAINT unique_panelist_submission_cohort_input DO UPDATE
                        SET value = EXCLUDED.value, text = EXCLUDED.text
                        "#,
                    )
                    .bind(commit.panelist)
                    .bind(commit.submission)
                    .bind(commit.cohort_id)
                    .bind(criterion_id)
                    .bind(commit.form_id)
                    .bind(value)
                    .bind(text)
                    .bind(commit.created)
                    .execute(&mut *tx)
                    .await?;
                }
                ScoreWrite::Delete { criterion_id } => {
                    sqlx::query(
                        r#"
                        DELETE FROM review_panel.scores
                        WHERE panelist_id = $1 AND object_id = $2 AND cohort_id = $3 AND input_id = $4
                        "#,
                    )
                    .bind(commit.panelist)
                    .bind(commit.submission)
                    .bind(commit.cohort_id)
                    .bind(criterion_id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn submission_scores(
        &self,
        reviewer: ReviewerId,
        submission: Uuid,
        cohort: CohortId,
    ) -> Result<Vec<Score>, StoreError> {
        let query = format!(
            "SELECT {SCORE_COLUMNS} FROM review_panel.scores s \
             WHERE s.panelist_id = $1 AND s.object_id = $2 AND s.cohort_id = $3 ORDER BY s.id"
        );
        let rows = sqlx::query(&query)
            .bind(reviewer)
            .bind(submission)
            .bind(cohort)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(score_from_row).collect())
    }

    async fn set_cohort_status(
        &self,
        cohort: CohortId,
        status: CohortStatus,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE review_panel.cohorts
            SET status = $2::text,
                activated = CASE WHEN $2::text = 'active' THEN $3 ELSE activated END,
                completed = CASE WHEN $2::text = 'completed' THEN $3 ELSE completed END
            WHERE id = $1
            "#,
        )
        .bind(cohort)
        .bind(status.as_str())
        .bind(at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("cohort {cohort}")));
        }

        let mut released = 0;
        if status == CohortStatus::Inactive {
            released = sqlx::query(
                "DELETE FROM review_panel.scores WHERE cohort_id = $1 AND value IS NULL",
            )
            .bind(cohort)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(released)
    }

    async fn add_members(
        &self,
        cohort: CohortId,
        members: &[(Uuid, String)],
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT id FROM review_panel.cohorts WHERE id = $1 FOR UPDATE")
            .bind(cohort)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("cohort {cohort}")));
        }

        for (submission, content_type) in members {
            sqlx::query(
                r#"
                INSERT INTO review_panel.cohort_members (cohort_id, object_id, content_type)
                VALUES ($1, $2, $3)
                ON CONFLICT (cohort_id, object_id) DO NOTHING
                "#,
            )
            .bind(cohort)
            .bind(submission)
            .bind(content_type)
            .execute(&mut *tx)
            .await?;
        }

        let size: i64 = sqlx::query(
            r#"
            UPDATE review_panel.cohorts
            SET size = (SELECT COUNT(*) FROM review_panel.cohort_members WHERE cohort_id = $1)
            WHERE id = $1
            RETURNING size
            "#,
        )
        .bind(cohort)
        .fetch_one(&mut *tx)
        .await?
        .get("size");

        tx.commit().await?;
        Ok(size)
    }

    async fn sweep_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM review_panel.scores WHERE value IS NULL AND created < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    // Run with DATABASE_URL set and `--ignored`.

    use super::*;

    struct Fixture {
        store: PgStore,
        form: FormId,
        cohort: CohortId,
        merit: Criterion,
        submission: Uuid,
    }

    async fn fixture() -> Fixture {
        let config = DbConfig::from_env().unwrap();
        let store = PgStore::new(connect(&config).await.unwrap());
        init_db(store.pool()).await.unwrap();

        // A fresh form per run keeps runs independent.
        let form = (Uuid::new_v4().as_u128() >> 65) as FormId;
        let panel = store
            .create_panel(form, &format!("panel-{form}"), &[1, 2])
            .await
            .unwrap();
        let merit = store
            .create_criterion(form, 0, "merit", CriterionKind::Numeric { min: Some(1), max: Some(10) })
            .await
            .unwrap();
        let cohort = store
            .create_cohort(&NewCohort::new(form, panel, "only", vec![merit.id]))
            .await
            .unwrap();
        let submission = Uuid::new_v4();
        store
            .add_members(cohort, &[(submission, "application".to_string())])
            .await
            .unwrap();

        Fixture {
            store,
            form,
            cohort,
            merit,
            submission,
        }
    }

    fn claim(fx: &Fixture, panelist: ReviewerId) -> NewClaim {
        NewClaim {
            panelist,
            submission: fx.submission,
            cohort_id: fx.cohort,
            criterion_id: fx.merit.id,
            form_id: fx.form,
            created: Utc::now(),
        }
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn live_claim_is_exclusive_across_reviewers() {
        let fx = fixture().await;
        let first = fx.store.insert_claim(claim(&fx, 1)).await.unwrap();
        assert!(first.is_placeholder());

        assert!(matches!(
            fx.store.insert_claim(claim(&fx, 2)).await,
            Err(StoreError::Conflict)
        ));
        assert!(matches!(
            fx.store.insert_claim(claim(&fx, 1)).await,
            Err(StoreError::Conflict)
        ));
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn commit_without_primary_row_is_stale() {
        let fx = fixture().await;
        let commit = ScoreCommit {
            panelist: 2,
            submission: fx.submission,
            cohort_id: fx.cohort,
            form_id: fx.form,
            primary_criterion: fx.merit.id,
            primary_value: 6,
            primary_text: String::new(),
            secondary: Vec::new(),
            created: Utc::now(),
        };
        assert!(matches!(
            fx.store.commit_scores(&commit).await,
            Err(StoreError::StaleClaim)
        ));
        assert!(fx
            .store
            .submission_scores(2, fx.submission, fx.cohort)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn deactivation_releases_placeholders() {
        let fx = fixture().await;
        fx.store.insert_claim(claim(&fx, 1)).await.unwrap();

        let released = fx
            .store
            .set_cohort_status(fx.cohort, CohortStatus::Inactive, Utc::now())
            .await
            .unwrap();
        assert_eq!(released, 1);
        assert!(fx.store.active_cohorts(fx.form).await.unwrap().is_empty());
        assert!(fx
            .store
            .primary_scores(1, fx.form)
            .await
            .unwrap()
            .is_empty());
    }
}
