use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use review_panel::config::{parse_ttl, CoordinatorConfig, DbConfig};
use review_panel::coordinator::{AfterSubmit, Coordinator, Navigation, ScoreSubmission};
use review_panel::db::{self, PgStore};
use review_panel::import;
use review_panel::models::{
    CohortStatus, Criterion, Direction, HistoryEntry, NextAssignment, Score,
};
use review_panel::store::ReviewStore;
use review_panel::validate::FieldValue;

#[derive(Parser)]
#[command(name = "review-panel")]
#[command(about = "Review assignment and scoring coordinator", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    verbose: bool,
    /// Seed assignment draws for reproducible runs
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Release claims older than this before assigning, e.g. 45m
    #[arg(long, global = true, value_parser = parse_ttl)]
    claim_ttl: Option<Duration>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Then {
    Next,
    Previous,
    Forward,
}

#[derive(Clone, Copy, ValueEnum)]
enum Step {
    Previous,
    Next,
}

impl From<Step> for Direction {
    fn from(step: Step) -> Self {
        match step {
            Step::Previous => Direction::Previous,
            Step::Next => Direction::Next,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo panel, form and cohorts
    Seed,
    /// Add submissions to a cohort from a CSV file
    ImportMembers {
        #[arg(long)]
        cohort: i64,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Activate, deactivate or complete a cohort
    SetStatus {
        #[arg(long)]
        cohort: i64,
        #[arg(long)]
        status: CohortStatus,
    },
    /// Claim or resume the reviewer's next submission
    Next {
        #[arg(long)]
        reviewer: i64,
        #[arg(long)]
        form: i64,
    },
    /// Save scores for a claimed submission
    Submit {
        #[arg(long)]
        reviewer: i64,
        #[arg(long)]
        form: i64,
        #[arg(long)]
        cohort: i64,
        #[arg(long)]
        submission: Uuid,
        /// Criterion answer as name=value; repeat per criterion
        #[arg(long = "value", value_parser = parse_field)]
        values: Vec<(String, FieldValue)>,
        #[arg(long, value_enum, default_value = "next")]
        then: Then,
    },
    /// Step through the reviewer's completed scores
    History {
        #[arg(long)]
        reviewer: i64,
        #[arg(long)]
        form: i64,
        #[arg(long)]
        cohort: i64,
        #[arg(long)]
        submission: Uuid,
        #[arg(long, value_enum)]
        direction: Step,
    },
    /// Show the reviewer's saved scores for a submission
    Show {
        #[arg(long)]
        reviewer: i64,
        #[arg(long)]
        cohort: i64,
        #[arg(long)]
        submission: Uuid,
    },
    /// Release claims nobody has acted on
    Sweep {
        #[arg(long, value_parser = parse_ttl, default_value = "2h")]
        older_than: Duration,
    },
}

fn parse_field(raw: &str) -> anyhow::Result<(String, FieldValue)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected name=value, got {raw}");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("missing criterion name in {raw}");
    }
    let value = match value.parse::<FieldValue>() {
        Ok(value) => value,
        Err(never) => match never {},
    };
    Ok((name.to_string(), value))
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "review_panel=debug"
    } else {
        "review_panel=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn emit<T: Serialize>(json: bool, value: &T, plain: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", plain());
    }
    Ok(())
}

fn describe_assignment(next: &NextAssignment) -> String {
    match next {
        NextAssignment::Assigned(a) => format!(
            "Review {} in cohort {} ({}). Criteria: {}.",
            a.submission,
            a.cohort.id,
            a.cohort.name,
            a.criteria
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        NextAssignment::Exhausted(a) => format!(
            "Nothing new to review. Revisit skipped submission {} in cohort {}.",
            a.submission, a.cohort.id
        ),
        NextAssignment::Busy => {
            "Remaining submissions are being reviewed by others; try again later.".to_string()
        }
        NextAssignment::AllDone => "All submissions reviewed.".to_string(),
    }
}

#[derive(Serialize)]
struct ScoreLine {
    criterion: String,
    value: String,
}

fn score_lines(criteria: &[Criterion], scores: &[Score]) -> Vec<ScoreLine> {
    criteria
        .iter()
        .filter_map(|criterion| {
            let score = scores.iter().find(|s| s.criterion_id == criterion.id)?;
            Some(ScoreLine {
                criterion: criterion.name.clone(),
                value: score.display_value(&criterion.kind),
            })
        })
        .collect()
}

fn describe_entry(entry: &Option<HistoryEntry>) -> String {
    match entry {
        Some(entry) => format!(
            "Submission {} in cohort {} (scored {}).",
            entry.submission,
            entry.cohort_id,
            entry.created.format("%Y-%m-%d %H:%M")
        ),
        None => "No further history; back to summary.".to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let db_config = DbConfig::from_env()?;
    let pool = db::connect(&db_config)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool);

    let config = CoordinatorConfig {
        seed: cli.seed,
        claim_ttl: cli.claim_ttl,
    };

    match cli.command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&store).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportMembers { cohort, csv } => {
            let size = import::import_members(&store, cohort, &csv).await?;
            println!("Cohort {cohort} now has {size} submissions.");
        }
        Commands::SetStatus { cohort, status } => {
            let coordinator = Coordinator::new(store, config);
            let released = coordinator.set_cohort_status(cohort, status).await?;
            println!("Cohort {cohort} is now {status}; released {released} claims.");
        }
        Commands::Next { reviewer, form } => {
            let coordinator = Coordinator::new(store, config);
            coordinator.sweep_expired_claims().await?;
            let next = coordinator.next_assignment(reviewer, form).await?;
            emit(cli.json, &next, || describe_assignment(&next))?;
        }
        Commands::Submit {
            reviewer,
            form,
            cohort,
            submission,
            values,
            then,
        } => {
            let coordinator = Coordinator::new(store, config);
            let then = match then {
                Then::Next => AfterSubmit::Assign,
                Then::Previous => AfterSubmit::Step(Direction::Previous),
                Then::Forward => AfterSubmit::Step(Direction::Next),
            };
            let values: BTreeMap<String, FieldValue> = values.into_iter().collect();
            let navigation = coordinator
                .submit_scores(ScoreSubmission {
                    reviewer,
                    form,
                    submission,
                    cohort,
                    values,
                    then,
                })
                .await?;
            emit(cli.json, &navigation, || match &navigation {
                Navigation::Assignment(next) => describe_assignment(next),
                Navigation::History(entry) => describe_entry(entry),
            })?;
        }
        Commands::History {
            reviewer,
            form,
            cohort,
            submission,
            direction,
        } => {
            let coordinator = Coordinator::new(store, config);
            let entry = coordinator
                .history_step(reviewer, form, submission, cohort, direction.into())
                .await?;
            emit(cli.json, &entry, || describe_entry(&entry))?;
        }
        Commands::Show {
            reviewer,
            cohort,
            submission,
        } => {
            let coordinator = Coordinator::new(store, config);
            let scores = coordinator
                .prior_scores(reviewer, submission, cohort)
                .await?;
            let criteria = coordinator.store().cohort_criteria(cohort).await?;
            let lines = score_lines(&criteria, &scores);
            emit(cli.json, &lines, || {
                if lines.is_empty() {
                    return "No saved scores.".to_string();
                }
                lines
                    .iter()
                    .map(|line| format!("- {}: {}", line.criterion, line.value))
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
        Commands::Sweep { older_than } => {
            let coordinator = Coordinator::new(store, config);
            let swept = coordinator.sweep_claims_older_than(older_than).await?;
            println!("Released {swept} expired claims.");
        }
    }

    Ok(())
}
