//! Pipeline Service - Extracts, validates and loads Transferegov data
//!
//! Responsibilities:
//! - Find the latest dated directory of downloaded source files
//! - Parse each file (Excel/CSV) into normalized text tables
//! - Validate records and extract relationships and proponents
//! - Load everything in one transaction via idempotent upserts
//! - Record an extraction log row and per-record data lineage
//! - Reconcile source row counts against lineage (--reconcile)
//!
//! One bad file or row never aborts a run: per-file and per-row failures
//! accumulate into the run's error list and the run finishes as "partial".
//! Only a storage failure rolls the whole run back.

mod encoding;
mod extract;
mod load;
mod parse;
mod reconcile;
mod validate;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::extract::{extract_proponentes, extract_relationships, is_relationship_table};
use crate::load::{
    create_extraction_log, get_last_extraction, init_db, lineage_rows, load_extraction_data,
    upsert_records, LineageRow, LoadStats, ValidatedData,
};
use crate::parse::{
    infer_entity_type, read_raw, resolve_aliases, validate_schema, EntityType, SchemaPolicy,
};
use crate::reconcile::{reconciliation_summary, run_reconciliation};
use crate::validate::{
    validate_apoiadores, validate_emendas, validate_programas, validate_propostas, RowError,
};

#[derive(Parser, Debug)]
#[command(name = "pipeline", about = "Runs the Transferegov extraction pipeline")]
struct Args {
    /// Base raw data directory (overrides RAW_DATA_DIR)
    #[arg(long)]
    data_dir: Option<String>,

    /// Extraction date to stamp onto records (YYYY-MM-DD, default: today)
    #[arg(long)]
    date: Option<String>,

    /// Parse and validate only - don't touch the database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Run reconciliation checks instead of a load
    #[arg(long, default_value = "false")]
    reconcile: bool,
}

#[derive(Debug, Clone)]
struct Config {
    db_url: String,
    raw_data_dir: PathBuf,
    batch_size: usize,
    schema_policy: SchemaPolicy,
}

impl Config {
    fn from_env() -> Result<Self> {
        Ok(Self {
            db_url: std::env::var("DB_URL").context("DB_URL env var missing")?,
            raw_data_dir: PathBuf::from(
                std::env::var("RAW_DATA_DIR").unwrap_or_else(|_| "./data/raw".to_string()),
            ),
            batch_size: std::env::var("BATCH_SIZE")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            schema_policy: SchemaPolicy::from_env(),
        })
    }
}

/// Find the newest dated subdirectory (YYYY-MM-DD) under the raw data dir,
/// or the base directory itself when none exist.
fn find_latest_data_directory(base: &Path) -> PathBuf {
    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(_) => return base.to_path_buf(),
    };

    let mut dated: Vec<(NaiveDate, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            NaiveDate::parse_from_str(&name, "%Y-%m-%d")
                .ok()
                .map(|date| (date, entry.path()))
        })
        .collect();

    dated.sort();
    dated
        .pop()
        .map(|(_, path)| path)
        .unwrap_or_else(|| base.to_path_buf())
}

/// Run status from the aggregate outcome: failed when nothing valid landed
/// anywhere, partial when errors occurred alongside valid records.
fn run_status(total_valid: usize, error_count: usize) -> &'static str {
    if total_valid == 0 {
        "failed"
    } else if error_count > 0 {
        "partial"
    } else {
        "success"
    }
}

/// Audit error text: the first few messages, not the whole list.
fn build_error_message(status: &str, errors: &[String]) -> Option<String> {
    match status {
        "failed" => Some("No valid records found in any file".to_string()),
        "partial" => {
            let head: Vec<&str> = errors.iter().take(5).map(String::as_str).collect();
            Some(head.join("; "))
        }
        _ => None,
    }
}

/// Everything the parse/validate phase produced for one run.
struct RunData {
    data: ValidatedData,
    errors: Vec<String>,
    lineage: Vec<LineageRow>,
    files_count: usize,
}

fn push_rejects(errors: &mut Vec<String>, file_name: &str, rejects: &[RowError]) {
    if rejects.is_empty() {
        return;
    }
    eprintln!(
        "Validation errors in {}: {} rows rejected",
        file_name,
        rejects.len()
    );
    for reject in rejects {
        errors.push(format!("{}: row {}: {}", file_name, reject.row, reject.reason));
    }
}

fn process_file(
    path: &Path,
    entity: EntityType,
    policy: SchemaPolicy,
    data: &mut ValidatedData,
    errors: &mut Vec<String>,
    lineage: &mut Vec<LineageRow>,
    programa_links: &mut BTreeMap<String, String>,
) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let source_file = path.display().to_string();

    let mut table = read_raw(path)?;
    resolve_aliases(&mut table, entity);
    println!(
        "Parsed {}: {} rows, {} columns",
        file_name,
        table.rows.len(),
        table.columns.len()
    );

    // The denormalized join export carries supporters, amendments and their
    // links in one table; plain entity files go through row validation.
    // Routing happens before the schema check: the join file intentionally
    // lacks the per-entity required columns.
    if matches!(entity, EntityType::Apoiadores | EntityType::Emendas)
        && is_relationship_table(&table)
    {
        let apoiadores_before = data.apoiadores.len();
        let emendas_before = data.emendas.len();
        extract_relationships(&table, data, programa_links);
        lineage.extend(lineage_rows(
            &data.apoiadores[apoiadores_before..],
            "apoiador",
            &source_file,
            |r| &r.transfer_gov_id,
        ));
        lineage.extend(lineage_rows(
            &data.emendas[emendas_before..],
            "emenda",
            &source_file,
            |r| &r.transfer_gov_id,
        ));
        return Ok(());
    }

    validate_schema(&table, entity, policy)?;

    match entity {
        EntityType::Propostas => {
            let (mut records, rejects) = validate_propostas(&table);
            push_rejects(errors, &file_name, &rejects);
            if !records.is_empty() {
                let proponentes = extract_proponentes(&mut records, &table);
                lineage.extend(lineage_rows(&proponentes, "proponente", &source_file, |r| {
                    &r.cnpj
                }));
                data.proponentes.extend(proponentes);
            }
            lineage.extend(lineage_rows(&records, "proposta", &source_file, |r| {
                &r.transfer_gov_id
            }));
            data.propostas.extend(records);
        }
        EntityType::Apoiadores => {
            let (records, rejects) = validate_apoiadores(&table);
            push_rejects(errors, &file_name, &rejects);
            lineage.extend(lineage_rows(&records, "apoiador", &source_file, |r| {
                &r.transfer_gov_id
            }));
            data.apoiadores.extend(records);
        }
        EntityType::Emendas => {
            let (records, rejects) = validate_emendas(&table);
            push_rejects(errors, &file_name, &rejects);
            lineage.extend(lineage_rows(&records, "emenda", &source_file, |r| {
                &r.transfer_gov_id
            }));
            data.emendas.extend(records);
        }
        EntityType::Programas => {
            let (records, rejects) = validate_programas(&table);
            push_rejects(errors, &file_name, &rejects);
            lineage.extend(lineage_rows(&records, "programa", &source_file, |r| {
                &r.transfer_gov_id
            }));
            data.programas.extend(records);
        }
    }

    Ok(())
}

/// Parse and validate every recognized file in the data directory,
/// accumulating records, lineage and errors. Files are processed in sorted
/// order; a later file's program links can back-fill earlier propostas.
fn parse_and_validate(data_dir: &Path, policy: SchemaPolicy) -> Result<RunData> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(data_dir)
        .with_context(|| format!("data directory not found: {}", data_dir.display()))?
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

    if files.is_empty() {
        anyhow::bail!("no source files found in {}", data_dir.display());
    }
    println!("Found {} files to process", files.len());

    let mut data = ValidatedData::default();
    let mut errors: Vec<String> = Vec::new();
    let mut lineage: Vec<LineageRow> = Vec::new();
    let mut programa_links: BTreeMap<String, String> = BTreeMap::new();

    for path in &files {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let entity = match infer_entity_type(&file_name) {
            Some(entity) => entity,
            None => {
                println!("Warning: could not determine entity type for: {}", file_name);
                continue;
            }
        };

        println!("\nProcessing {} as {}", file_name, entity.as_str());
        if let Err(e) = process_file(
            path,
            entity,
            policy,
            &mut data,
            &mut errors,
            &mut lineage,
            &mut programa_links,
        ) {
            let message = format!("Error processing {}: {}", file_name, e);
            eprintln!("{}", message);
            errors.push(message);
        }
    }

    // Back-fill programa references learned from the join file.
    if !programa_links.is_empty() {
        let mut linked = 0;
        for proposta in &mut data.propostas {
            if proposta.programa_id.is_none() {
                if let Some(programa_id) = programa_links.get(&proposta.transfer_gov_id) {
                    proposta.programa_id = Some(programa_id.clone());
                    linked += 1;
                }
            }
        }
        println!("Linked {} propostas to programa_id from relationship data", linked);
    }

    Ok(RunData {
        data,
        errors,
        lineage,
        files_count: files.len(),
    })
}

/// Load phase: one transaction for every upsert, the lineage batch and the
/// extraction log. On failure the transaction rolls back and a "failed"
/// audit row is written best-effort on a fresh connection.
async fn run_load(
    pool: &PgPool,
    config: &Config,
    run: &RunData,
    extraction_date: NaiveDate,
    started: Instant,
) -> Result<()> {
    let total_valid = run.data.total_records();
    let status = run_status(total_valid, run.errors.len());
    let error_message = build_error_message(status, &run.errors);

    let result: Result<()> = async {
        let mut tx = pool.begin().await?;

        let mut stats = LoadStats::new();
        if total_valid > 0 {
            stats =
                load_extraction_data(&mut tx, &run.data, extraction_date, config.batch_size)
                    .await?;
            let recorded =
                upsert_records(&mut tx, &run.lineage, extraction_date, config.batch_size).await?;
            println!("Recorded lineage for {} records", recorded);
        }

        let duration = started.elapsed().as_secs_f64();
        create_extraction_log(
            &mut tx,
            status,
            if stats.is_empty() { None } else { Some(&stats) },
            Some(run.files_count as i64),
            error_message.as_deref(),
            duration,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            println!(
                "\nPipeline completed: status={}, records={}, duration={:.2}s",
                status,
                total_valid,
                started.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Pipeline failed: {}", e);
            // Best-effort failure audit on a fresh connection; a secondary
            // failure must not mask the original error.
            let duration = started.elapsed().as_secs_f64();
            match pool.acquire().await {
                Ok(mut conn) => {
                    if let Err(log_err) = create_extraction_log(
                        &mut conn,
                        "failed",
                        None,
                        Some(run.files_count as i64),
                        Some(&e.to_string()),
                        duration,
                    )
                    .await
                    {
                        eprintln!("Warning: could not record failed run: {}", log_err);
                    }
                }
                Err(acquire_err) => {
                    eprintln!("Warning: could not record failed run: {}", acquire_err);
                }
            }
            Err(e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::from_env()?;

    println!("=== Transferegov Pipeline ===");
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let extraction_date = match &args.date {
        Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .context("invalid --date, expected YYYY-MM-DD")?,
        None => chrono::Local::now().date_naive(),
    };
    println!("Extraction date: {}", extraction_date);

    let base_dir = args
        .data_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| config.raw_data_dir.clone());
    let data_dir = find_latest_data_directory(&base_dir);
    println!("Data directory: {}", data_dir.display());

    if args.dry_run {
        let started = Instant::now();
        let run = parse_and_validate(&data_dir, config.schema_policy)?;
        let status = run_status(run.data.total_records(), run.errors.len());
        println!("\nDry run - nothing written to database");
        println!(
            "Would load {} records from {} files (status: {}, {} validation errors, {:.2}s)",
            run.data.total_records(),
            run.files_count,
            status,
            run.errors.len(),
            started.elapsed().as_secs_f64()
        );
        return Ok(());
    }

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .context("Failed to connect to database")?;

    init_db(&pool).await?;

    if args.reconcile {
        let results = run_reconciliation(&pool, &data_dir).await?;
        println!("\n{}", reconciliation_summary(&results));
        return Ok(());
    }

    {
        let mut conn = pool.acquire().await?;
        match get_last_extraction(&mut conn).await? {
            Some(last) => println!(
                "Last extraction: {} (status: {})",
                last.run_date.format("%Y-%m-%d %H:%M"),
                last.status
            ),
            None => println!("No previous extraction found"),
        }
    }

    let started = Instant::now();
    let run = parse_and_validate(&data_dir, config.schema_policy)?;
    run_load(&pool, &config, &run, extraction_date, started).await
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // STATUS COMPUTATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_run_status_rules() {
        assert_eq!(run_status(0, 0), "failed");
        assert_eq!(run_status(0, 3), "failed");
        assert_eq!(run_status(10, 0), "success");
        assert_eq!(run_status(10, 2), "partial");
    }

    #[test]
    fn test_build_error_message_truncates_to_five() {
        let errors: Vec<String> = (1..=8).map(|i| format!("err{}", i)).collect();
        let message = build_error_message("partial", &errors).unwrap();
        assert!(message.contains("err5"));
        assert!(!message.contains("err6"));
    }

    #[test]
    fn test_build_error_message_by_status() {
        assert_eq!(
            build_error_message("failed", &[]).as_deref(),
            Some("No valid records found in any file")
        );
        assert_eq!(build_error_message("success", &[]), None);
    }

    // -------------------------------------------------------------------------
    // DATA DIRECTORY DISCOVERY
    // -------------------------------------------------------------------------

    #[test]
    fn test_find_latest_data_directory_picks_newest_date() {
        let base = std::env::temp_dir().join("pipeline_main_latest_dir");
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(base.join("2025-07-30")).unwrap();
        std::fs::create_dir_all(base.join("2025-08-01")).unwrap();
        std::fs::create_dir_all(base.join("not-a-date")).unwrap();

        let latest = find_latest_data_directory(&base);
        assert_eq!(latest, base.join("2025-08-01"));
    }

    #[test]
    fn test_find_latest_data_directory_falls_back_to_base() {
        let base = std::env::temp_dir().join("pipeline_main_no_dated");
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(&base).unwrap();

        assert_eq!(find_latest_data_directory(&base), base);
        assert_eq!(
            find_latest_data_directory(Path::new("/does/not/exist")),
            PathBuf::from("/does/not/exist")
        );
    }

    // -------------------------------------------------------------------------
    // END-TO-END PARSE PHASE
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_and_validate_partial_run() {
        let dir = std::env::temp_dir().join("pipeline_main_partial_run");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        // 5 well-formed propostas rows.
        std::fs::write(
            dir.join("propostas.csv"),
            "ID_PROPOSTA;OBJETO;UF_PROPONENTE\n\
             P1;Quadra;SP\nP2;Creche;RJ\nP3;Ponte;MG\nP4;Escola;BA\nP5;Posto;CE\n",
        )
        .unwrap();
        // 4 apoiadores rows, one with an empty natural key.
        std::fs::write(
            dir.join("apoiadores.csv"),
            "transfer_gov_id;nome\nA1;Dep. Silva\n;Sem chave\nA3;Dep. Souza\nA4;Dep. Lima\n",
        )
        .unwrap();

        let run = parse_and_validate(&dir, SchemaPolicy::Warn).unwrap();

        assert_eq!(run.data.propostas.len(), 5);
        assert_eq!(run.data.apoiadores.len(), 3);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.files_count, 2);
        assert_eq!(run.data.total_records(), 8);
        assert_eq!(
            run_status(run.data.total_records(), run.errors.len()),
            "partial"
        );

        // One lineage row per landed record, tagged with its source file.
        assert_eq!(run.lineage.len(), 8);
        assert!(run
            .lineage
            .iter()
            .any(|l| l.entity_type == "proposta" && l.source_file.ends_with("propostas.csv")));
    }

    #[test]
    fn test_parse_and_validate_join_file_routes_to_extraction() {
        let dir = std::env::temp_dir().join("pipeline_main_join_run");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        std::fs::write(dir.join("propostas.csv"), "ID_PROPOSTA;OBJETO\nP1;Obra\n").unwrap();
        std::fs::write(
            dir.join("siconv_apoiadores_emendas.csv"),
            "ID_CNPJ_PROGRAMA_EMENDA_APOIADORES_EMENDAS;NUMERO_EMENDA_APOIADORES_EMENDAS;NOME_PARLAMENTAR_APOIADORES_EMENDAS;ID_PROGRAMA\n\
             P1;E100;Dep. Silva;PG7\nP1;E101;Dep. Silva;PG8\n",
        )
        .unwrap();

        let run = parse_and_validate(&dir, SchemaPolicy::Warn).unwrap();

        assert_eq!(run.data.apoiadores.len(), 1);
        assert_eq!(run.data.emendas.len(), 2);
        assert_eq!(run.data.proposta_apoiadores.len(), 1);
        assert_eq!(run.data.proposta_emendas.len(), 2);
        assert!(run.errors.is_empty());

        // First-seen program link back-filled onto the proposta.
        assert_eq!(run.data.propostas[0].programa_id.as_deref(), Some("PG7"));
    }

    #[test]
    fn test_parse_and_validate_empty_file_recovered() {
        let dir = std::env::temp_dir().join("pipeline_main_empty_file");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        std::fs::write(dir.join("programas.csv"), "ID_PROGRAMA;NOME_PROGRAMA\n").unwrap();
        std::fs::write(dir.join("propostas.csv"), "ID_PROPOSTA;OBJETO\nP1;Obra\n").unwrap();

        let run = parse_and_validate(&dir, SchemaPolicy::Warn).unwrap();
        // The empty file failed but processing continued.
        assert_eq!(run.data.propostas.len(), 1);
        assert_eq!(run.errors.len(), 1);
        assert!(run.errors[0].contains("programas.csv"));
    }
}
