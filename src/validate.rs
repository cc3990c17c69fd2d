use std::collections::BTreeMap;
use std::convert::Infallible;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::{Cohort, Criterion, CriterionKind, ScoreWrite};

/// A reviewer's raw answer for one criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Blank,
    Skip,
    Number(i64),
    Flag(bool),
    Text(String),
}

impl FromStr for FieldValue {
    type Err = Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Ok(match trimmed {
            "" => Self::Blank,
            "skip" => Self::Skip,
            "true" => Self::Flag(true),
            "false" => Self::Flag(false),
            _ => match trimmed.parse::<i64>() {
                Ok(n) => Self::Number(n),
                Err(_) => Self::Text(raw.to_string()),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolved {
    Value(i32, String),
    Absent,
}

/// The ledger writes a valid submission turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedScores {
    pub primary_value: i32,
    pub primary_text: String,
    pub secondary: Vec<ScoreWrite>,
}

fn as_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Blank | FieldValue::Skip => None,
        FieldValue::Number(n) => Some(n.to_string()),
        FieldValue::Flag(b) => Some(b.to_string()),
        FieldValue::Text(s) if s.trim().is_empty() => None,
        FieldValue::Text(s) => Some(s.clone()),
    }
}

fn resolve(
    criterion: &Criterion,
    value: &FieldValue,
    primary: bool,
    allow_skip: bool,
) -> Result<Resolved, String> {
    let skipped = || {
        if allow_skip {
            Ok(Resolved::Value(0, String::new()))
        } else {
            Err("skipping is not allowed".to_string())
        }
    };
    let blank = || {
        if allow_skip && !primary {
            Ok(Resolved::Value(0, String::new()))
        } else {
            Err("required".to_string())
        }
    };

    match criterion.kind {
        CriterionKind::Numeric { min, max } => match value {
            FieldValue::Number(n) => {
                // 0 is reserved for an explicit skip.
                let low = i64::from(min.unwrap_or(1).max(1));
                if *n < low {
                    return Err(format!("must be at least {low}"));
                }
                if let Some(high) = max {
                    if *n > i64::from(high) {
                        return Err(format!("must be at most {high}"));
                    }
                }
                let n = i32::try_from(*n).map_err(|_| "out of range".to_string())?;
                Ok(Resolved::Value(n, String::new()))
            }
            FieldValue::Skip => skipped(),
            FieldValue::Blank => blank(),
            FieldValue::Flag(_) | FieldValue::Text(_) => Err("expected a number".to_string()),
        },
        CriterionKind::Boolean => match value {
            FieldValue::Flag(b) => Ok(Resolved::Value(i32::from(*b), String::new())),
            FieldValue::Number(n @ (0 | 1)) => Ok(Resolved::Value(*n as i32, String::new())),
            FieldValue::Skip => skipped(),
            FieldValue::Blank => blank(),
            FieldValue::Number(_) | FieldValue::Text(_) => {
                Err("expected true or false".to_string())
            }
        },
        CriterionKind::Text { max_chars } => match as_text(value) {
            Some(text) => {
                if let Some(limit) = max_chars {
                    if text.chars().count() > limit {
                        return Err(format!("at most {limit} characters"));
                    }
                }
                Ok(Resolved::Value(1, text))
            }
            None if primary => Ok(Resolved::Value(0, String::new())),
            None => Ok(Resolved::Absent),
        },
    }
}

/// Checks a submission against the cohort's criteria. Nothing is written
/// unless every field passes; the error carries all rejected fields.
pub fn validate(
    cohort: &Cohort,
    criteria: &[Criterion],
    values: &BTreeMap<String, FieldValue>,
) -> Result<ValidatedScores, ValidationError> {
    let mut errors = ValidationError::default();

    for name in values.keys() {
        if !criteria.iter().any(|c| &c.name == name) {
            errors.push(name, "not a criterion of this cohort");
        }
    }

    let mut primary = None;
    let mut secondary = Vec::new();
    for (index, criterion) in criteria.iter().enumerate() {
        let value = values.get(&criterion.name).unwrap_or(&FieldValue::Blank);
        match resolve(criterion, value, index == 0, cohort.allow_skip) {
            Ok(Resolved::Value(value, text)) if index == 0 => primary = Some((value, text)),
            Ok(Resolved::Value(value, text)) => secondary.push(ScoreWrite::Upsert {
                criterion_id: criterion.id,
                value,
                text,
            }),
            Ok(Resolved::Absent) => secondary.push(ScoreWrite::Delete {
                criterion_id: criterion.id,
            }),
            Err(message) => errors.push(&criterion.name, message),
        }
    }

    if criteria.is_empty() {
        errors.push("", "cohort has no criteria");
    }

    match primary {
        Some((primary_value, primary_text)) if errors.is_empty() => Ok(ValidatedScores {
            primary_value,
            primary_text,
            secondary,
        }),
        _ => Err(errors),
    }
}
