//! Reconciliation checks: source row counts vs lineage-tracked records.
//!
//! For each source file, the row count read straight off the file is
//! compared with the number of data_lineage rows tagged with that exact
//! file path and entity type. A mismatch means records were lost (or
//! duplicated) somewhere between parse and load. Reconciliation never
//! affects load outcome; mismatches are printed as alert-worthy lines.

use anyhow::Result;
use sqlx::PgPool;
use std::path::Path;

use crate::parse::{infer_entity_type, read_raw, EntityType};

#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub file_path: String,
    pub entity_type: String,
    pub source_count: i64,
    pub db_count: i64,
    pub matches: bool,
    pub discrepancy: Option<i64>,
}

impl ReconciliationResult {
    pub fn new(file_path: String, entity_type: String, source_count: i64, db_count: i64) -> Self {
        let matches = source_count == db_count;
        let discrepancy = if matches {
            None
        } else {
            Some((source_count - db_count).abs())
        };
        ReconciliationResult {
            file_path,
            entity_type,
            source_count,
            db_count,
            matches,
            discrepancy,
        }
    }

    /// Sentinel entry for a file that could not be read.
    pub fn failed(file_path: String, entity_type: String) -> Self {
        ReconciliationResult {
            file_path,
            entity_type,
            source_count: -1,
            db_count: -1,
            matches: false,
            discrepancy: None,
        }
    }
}

/// The denormalized join export maps rows to deduplicated entities and
/// junction edges, never 1:1, so a row-count comparison is meaningless
/// for it by construction.
pub fn is_join_file(filename: &str) -> bool {
    let name = filename.to_lowercase();
    name.contains("apoiador") && name.contains("emenda")
}

/// Compare one source file's row count with its lineage count.
pub async fn reconcile_file(
    pool: &PgPool,
    path: &Path,
    entity: EntityType,
) -> Result<ReconciliationResult> {
    let table = read_raw(path)?;
    let source_count = table.rows.len() as i64;

    let (db_count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM data_lineage WHERE source_file = $1 AND entity_type = $2",
    )
    .bind(path.display().to_string())
    .bind(entity.singular())
    .fetch_one(pool)
    .await?;

    let result = ReconciliationResult::new(
        path.display().to_string(),
        entity.singular().to_string(),
        source_count,
        db_count,
    );

    if !result.matches {
        eprintln!(
            "ALERT: reconciliation mismatch: {} (source={}, db={}, diff={})",
            result.file_path,
            result.source_count,
            result.db_count,
            result.discrepancy.unwrap_or(0)
        );
    }

    Ok(result)
}

/// Reconcile every recognized source file in a directory. Unreadable files
/// become sentinel entries; nothing aborts the scan.
pub async fn run_reconciliation(pool: &PgPool, data_dir: &Path) -> Result<Vec<ReconciliationResult>> {
    println!("Starting reconciliation from {}", data_dir.display());

    let mut files: Vec<std::path::PathBuf> = std::fs::read_dir(data_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("csv") | Some("xlsx")
            )
        })
        .collect();
    files.sort();

    let mut results = Vec::new();

    for path in files {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        if is_join_file(&filename) {
            println!("Skipping join file {} (no 1:1 row mapping)", filename);
            continue;
        }

        let entity = match infer_entity_type(&filename) {
            Some(entity) => entity,
            None => {
                println!("Unknown entity type for {}, skipping", filename);
                continue;
            }
        };

        match reconcile_file(pool, &path, entity).await {
            Ok(result) => results.push(result),
            Err(e) => {
                eprintln!("Error reconciling {}: {}", path.display(), e);
                results.push(ReconciliationResult::failed(
                    path.display().to_string(),
                    entity.singular().to_string(),
                ));
            }
        }
    }

    println!(
        "Reconciliation complete: {} files processed, {} matched",
        results.len(),
        results.iter().filter(|r| r.matches).count()
    );

    Ok(results)
}

/// Human-readable summary block, printed at the end of a reconcile run.
pub fn reconciliation_summary(results: &[ReconciliationResult]) -> String {
    if results.is_empty() {
        return "No files were processed for reconciliation.".to_string();
    }

    let passed = results.iter().filter(|r| r.matches).count();
    let failed = results.len() - passed;
    let total_discrepancy: i64 = results.iter().filter_map(|r| r.discrepancy).sum();

    let mut lines = vec![
        "=".repeat(60),
        "RECONCILIATION SUMMARY".to_string(),
        "=".repeat(60),
        format!("Files processed: {}", results.len()),
        format!("Passed: {}", passed),
        format!("Failed: {}", failed),
        format!("Total discrepancy: {} records", total_discrepancy),
        "-".repeat(60),
        "Details:".to_string(),
    ];

    for result in results {
        let status = if result.matches { "PASS" } else { "FAIL" };
        lines.push(format!(
            "  [{}] {} ({})",
            status, result.file_path, result.entity_type
        ));
        if !result.matches {
            if result.source_count == -1 {
                lines.push("         ERROR during processing".to_string());
            } else {
                lines.push(format!(
                    "         source={}, db={} (diff: {})",
                    result.source_count,
                    result.db_count,
                    result.discrepancy.unwrap_or(0)
                ));
            }
        }
    }

    lines.push("=".repeat(60));
    lines.join("\n")
}
