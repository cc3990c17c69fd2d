use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ReviewerId = i64;
pub type FormId = i64;
pub type PanelId = i64;
pub type CohortId = i64;
pub type CriterionId = i64;
pub type ScoreId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortStatus {
    Inactive,
    Active,
    Completed,
}

impl CohortStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for CohortStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(Self::Inactive),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown cohort status: {other}")),
        }
    }
}

impl fmt::Display for CohortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a criterion is answered, with the constraints that apply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CriterionKind {
    Numeric { min: Option<i32>, max: Option<i32> },
    Boolean,
    Text { max_chars: Option<usize> },
}

impl CriterionKind {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Numeric { .. } => "num",
            Self::Boolean => "bool",
            Self::Text { .. } => "text",
        }
    }

    /// Rebuilds a kind from its stored tag and constraint columns.
    pub fn from_parts(
        tag: &str,
        min: Option<i32>,
        max: Option<i32>,
        max_chars: Option<i32>,
    ) -> Option<Self> {
        match tag {
            "num" => Some(Self::Numeric { min, max }),
            "bool" => Some(Self::Boolean),
            "text" => Some(Self::Text {
                max_chars: max_chars.and_then(|n| usize::try_from(n).ok()),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: CriterionId,
    pub form_id: FormId,
    pub rank: i32,
    pub name: String,
    pub label: String,
    pub kind: CriterionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    pub id: CohortId,
    pub form_id: FormId,
    pub panel_id: Option<PanelId>,
    pub name: String,
    pub message: String,
    pub status: CohortStatus,
    pub panel_weight: f64,
    pub size: i64,
    pub allow_skip: bool,
    pub created: DateTime<Utc>,
    pub activated: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
}

impl Cohort {
    /// Sampling weight used by cohort selection.
    pub fn weight(&self) -> f64 {
        (self.panel_weight * self.size as f64).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortMember {
    pub cohort_id: CohortId,
    pub submission: Uuid,
    pub content_type: String,
}

/// A row of the claim ledger. A `None` value is a placeholder claim,
/// `Some(0)` an explicit skip and anything above zero a real score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub id: ScoreId,
    pub panelist: ReviewerId,
    pub submission: Uuid,
    pub cohort_id: CohortId,
    pub criterion_id: CriterionId,
    pub form_id: FormId,
    pub value: Option<i32>,
    pub text: String,
    pub created: DateTime<Utc>,
}

impl Score {
    pub fn is_placeholder(&self) -> bool {
        self.value.is_none()
    }

    pub fn status(&self, kind: &CriterionKind) -> ScoreStatus {
        match (self.value, kind) {
            (None, _) => ScoreStatus::Unscored,
            (Some(0), CriterionKind::Boolean) => ScoreStatus::Scored,
            (Some(0), _) => ScoreStatus::Skipped,
            (Some(_), _) => ScoreStatus::Scored,
        }
    }

    /// Position in the reviewer's personal history.
    pub fn sequence_key(&self) -> (DateTime<Utc>, ScoreId) {
        (self.created, self.id)
    }

    pub fn display_value(&self, kind: &CriterionKind) -> String {
        if let CriterionKind::Text { .. } = kind {
            return self.text.clone();
        }
        match (self.status(kind), kind) {
            (ScoreStatus::Unscored, _) => "[unscored]".to_string(),
            (ScoreStatus::Skipped, _) => "[skipped]".to_string(),
            (_, CriterionKind::Boolean) => (self.value.unwrap_or(0) > 0).to_string(),
            _ => self.value.unwrap_or(0).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    Scored,
    Skipped,
    Unscored,
}

/// A reviewer's row on a cohort's primary criterion, joined with what the
/// coordinator needs to interpret it.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryScore {
    pub score: Score,
    pub cohort_status: CohortStatus,
    pub kind: CriterionKind,
}

impl PrimaryScore {
    pub fn status(&self) -> ScoreStatus {
        self.score.status(&self.kind)
    }
}

/// Administrative description of a cohort to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCohort {
    pub form_id: FormId,
    pub panel_id: Option<PanelId>,
    pub name: String,
    pub message: String,
    pub status: CohortStatus,
    pub panel_weight: f64,
    pub allow_skip: bool,
    pub criteria: Vec<CriterionId>,
    pub created: DateTime<Utc>,
}

impl NewCohort {
    pub fn new(form_id: FormId, panel_id: PanelId, name: &str, criteria: Vec<CriterionId>) -> Self {
        Self {
            form_id,
            panel_id: Some(panel_id),
            name: name.to_string(),
            message: String::new(),
            status: CohortStatus::Active,
            panel_weight: 1.0,
            allow_skip: false,
            criteria,
            created: Utc::now(),
        }
    }

    pub fn weight(mut self, panel_weight: f64) -> Self {
        self.panel_weight = panel_weight;
        self
    }

    pub fn skippable(mut self) -> Self {
        self.allow_skip = true;
        self
    }

    pub fn status(mut self, status: CohortStatus) -> Self {
        self.status = status;
        self
    }

    pub fn created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }
}

/// Request to claim a submission for a reviewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClaim {
    pub panelist: ReviewerId,
    pub submission: Uuid,
    pub cohort_id: CohortId,
    pub criterion_id: CriterionId,
    pub form_id: FormId,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreWrite {
    Upsert {
        criterion_id: CriterionId,
        value: i32,
        text: String,
    },
    Delete {
        criterion_id: CriterionId,
    },
}

/// Everything a single score submission writes, applied atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreCommit {
    pub panelist: ReviewerId,
    pub submission: Uuid,
    pub cohort_id: CohortId,
    pub form_id: FormId,
    pub primary_criterion: CriterionId,
    pub primary_value: i32,
    pub primary_text: String,
    pub secondary: Vec<ScoreWrite>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub submission: Uuid,
    pub cohort: Cohort,
    pub criteria: Vec<Criterion>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NextAssignment {
    /// A fresh or resumed claim.
    Assigned(Assignment),
    /// Nothing new to review; revisit a submission the reviewer skipped.
    Exhausted(Assignment),
    /// Every remaining submission is claimed by another reviewer right now.
    Busy,
    AllDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Previous,
    Next,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub submission: Uuid,
    pub cohort_id: CohortId,
    pub score_id: ScoreId,
    pub created: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(value: Option<i32>) -> Score {
        Score {
            id: 1,
            panelist: 7,
            submission: Uuid::nil(),
            cohort_id: 1,
            criterion_id: 1,
            form_id: 1,
            value,
            text: String::new(),
            created: Utc::now(),
        }
    }

    #[test]
    fn zero_on_boolean_counts_as_scored() {
        assert_eq!(score(Some(0)).status(&CriterionKind::Boolean), ScoreStatus::Scored);
        let numeric = CriterionKind::Numeric { min: None, max: None };
        assert_eq!(score(Some(0)).status(&numeric), ScoreStatus::Skipped);
        assert_eq!(score(None).status(&numeric), ScoreStatus::Unscored);
        assert_eq!(score(Some(4)).status(&numeric), ScoreStatus::Scored);
    }

    #[test]
    fn display_values_follow_status() {
        let numeric = CriterionKind::Numeric { min: None, max: None };
        assert_eq!(score(None).display_value(&numeric), "[unscored]");
        assert_eq!(score(Some(0)).display_value(&numeric), "[skipped]");
        assert_eq!(score(Some(1)).display_value(&CriterionKind::Boolean), "true");
        assert_eq!(score(Some(9)).display_value(&numeric), "9");
    }

    #[test]
    fn cohort_status_round_trips_through_strings() {
        for status in [CohortStatus::Inactive, CohortStatus::Active, CohortStatus::Completed] {
            assert_eq!(status.as_str().parse::<CohortStatus>(), Ok(status));
        }
        assert!("archived".parse::<CohortStatus>().is_err());
    }

    #[test]
    fn criterion_kind_rebuilds_from_columns() {
        assert_eq!(
            CriterionKind::from_parts("num", Some(1), Some(10), None),
            Some(CriterionKind::Numeric { min: Some(1), max: Some(10) })
        );
        assert_eq!(
            CriterionKind::from_parts("text", None, None, Some(200)),
            Some(CriterionKind::Text { max_chars: Some(200) })
        );
        assert_eq!(CriterionKind::from_parts("scale", None, None, None), None);
    }
}
