use std::io::Read;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::models::CohortId;
use crate::store::ReviewStore;

#[derive(Debug, Deserialize)]
struct MemberRow {
    submission_id: Uuid,
    #[serde(default)]
    content_type: Option<String>,
}

/// Reads `submission_id[,content_type]` rows.
pub fn read_members<R: Read>(reader: R) -> anyhow::Result<Vec<(Uuid, String)>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut members = Vec::new();

    for (line, result) in reader.deserialize::<MemberRow>().enumerate() {
        let row = result.with_context(|| format!("invalid member row {}", line + 1))?;
        members.push((row.submission_id, row.content_type.unwrap_or_default()));
    }

    Ok(members)
}

/// Adds the members listed in a CSV file to a cohort and returns its new size.
pub async fn import_members<S: ReviewStore>(
    store: &S,
    cohort: CohortId,
    csv_path: &std::path::Path,
) -> anyhow::Result<i64> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let members = read_members(file)?;
    let size = store.add_members(cohort, &members).await?;
    info!(cohort, imported = members.len(), size, "imported cohort members");
    Ok(size)
}
