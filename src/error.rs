use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::models::CohortId;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness guard on the claim ledger rejected the write.
    #[error("claim already held")]
    Conflict,
    /// A conditional write matched no row.
    #[error("claim no longer exists")]
    StaleClaim,
    #[error("{0} not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub criterion: String,
    pub message: String,
}

/// Every field rejected by a score submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn push(&mut self, criterion: &str, message: impl Into<String>) {
        self.fields.push(FieldError {
            criterion: criterion.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn rejects(&self, criterion: &str) -> bool {
        self.fields.iter().any(|f| f.criterion == criterion)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid scores")?;
        for (i, field) in self.fields.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{} ({})", field.criterion, field.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("stale claim on submission {submission} in cohort {cohort}")]
    StaleClaim { submission: Uuid, cohort: CohortId },
    #[error("unknown cohort {0}")]
    UnknownCohort(CohortId),
    #[error(transparent)]
    Store(#[from] StoreError),
}
