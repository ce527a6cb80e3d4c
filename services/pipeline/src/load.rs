//! Idempotent loading of validated records into Postgres.
//!
//! Responsibilities:
//! - Bulk upsert with ON CONFLICT DO UPDATE (idempotent re-runs)
//! - Within-batch natural-key dedup (a statement cannot hold duplicate keys)
//! - Chunking under the bind-parameter ceiling
//! - Dependency-ordered loading of all entity tables
//! - Proponent aggregate recompute from the loaded fact tables
//! - Extraction audit log and per-record data lineage
//!
//! Transaction boundaries belong to the caller: nothing here commits. The
//! extraction log insert uses RETURNING so its id exists before commit.
//!
//! Postgres reports one affected-row count for the whole statement and does
//! not split inserts from updates; totals are reported as "inserted" with
//! "updated" pinned to zero.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::query_builder::Separated;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::collections::{BTreeMap, HashMap};

use crate::validate::{
    Apoiador, Emenda, Programa, Proponente, Proposta, PropostaApoiador, PropostaEmenda,
};

/// Postgres wire-protocol ceiling on bind parameters per statement.
const BIND_LIMIT: usize = 65_535;

pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Validated data accumulator
// =============================================================================

/// Everything a pipeline run has validated, keyed by destination table.
#[derive(Debug, Default)]
pub struct ValidatedData {
    pub programas: Vec<Programa>,
    pub propostas: Vec<Proposta>,
    pub proponentes: Vec<Proponente>,
    pub apoiadores: Vec<Apoiador>,
    pub emendas: Vec<Emenda>,
    pub proposta_apoiadores: Vec<PropostaApoiador>,
    pub proposta_emendas: Vec<PropostaEmenda>,
}

impl ValidatedData {
    pub fn total_records(&self) -> usize {
        self.programas.len()
            + self.propostas.len()
            + self.proponentes.len()
            + self.apoiadores.len()
            + self.emendas.len()
            + self.proposta_apoiadores.len()
            + self.proposta_emendas.len()
    }
}

// =============================================================================
// Upsert engine
// =============================================================================

/// A record that can be bulk-upserted. `COLUMNS` lists every bound column in
/// bind order (including `extraction_date`); `CONFLICT` names the natural
/// key. On conflict every non-key column is overwritten from the incoming
/// row, and `updated_at` is touched for tables that carry it.
pub trait UpsertRow {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    const CONFLICT: &'static [&'static str];
    const TOUCH_UPDATED_AT: bool = true;

    /// Natural-key tuple rendered for within-batch deduplication.
    fn natural_key(&self) -> String;

    fn bind(&self, b: &mut Separated<'_, '_, Postgres, &'static str>, extraction_date: NaiveDate);
}

/// Keep the last record per natural key, preserving first-seen order.
/// The bulk statement rejects duplicate conflict keys, and last-write-wins
/// matches what sequential single-row upserts would have produced.
fn dedupe_last_wins<T: UpsertRow>(records: &[T]) -> Vec<&T> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut deduped: Vec<&T> = Vec::new();
    for record in records {
        match index.get(&record.natural_key()) {
            Some(&at) => deduped[at] = record,
            None => {
                index.insert(record.natural_key(), deduped.len());
                deduped.push(record);
            }
        }
    }
    deduped
}

/// Rows per statement: bounded by the bind-parameter ceiling and by the
/// configured batch size.
fn rows_per_batch(column_count: usize, batch_size: usize) -> usize {
    (BIND_LIMIT / column_count.max(1)).min(batch_size).max(1)
}

/// Statement prefix ("INSERT INTO t (cols) ") and suffix (the ON CONFLICT
/// clause) shared by every batch of a table.
fn upsert_sql<T: UpsertRow>() -> (String, String) {
    let prefix = format!("INSERT INTO {} ({}) ", T::TABLE, T::COLUMNS.join(", "));

    let mut set_clauses: Vec<String> = T::COLUMNS
        .iter()
        .filter(|c| !T::CONFLICT.contains(c))
        .map(|c| format!("{} = EXCLUDED.{}", c, c))
        .collect();
    if T::TOUCH_UPDATED_AT {
        set_clauses.push("updated_at = now()".to_string());
    }

    let suffix = format!(
        " ON CONFLICT ({}) DO UPDATE SET {}",
        T::CONFLICT.join(", "),
        set_clauses.join(", ")
    );
    (prefix, suffix)
}

/// Bulk insert-or-update a batch of records. Idempotent: re-submitting the
/// same records changes nothing observable. Returns total affected rows.
pub async fn upsert_records<T: UpsertRow>(
    conn: &mut PgConnection,
    records: &[T],
    extraction_date: NaiveDate,
    batch_size: usize,
) -> Result<u64> {
    if records.is_empty() {
        return Ok(0);
    }

    let deduped = dedupe_last_wins(records);
    let chunk_rows = rows_per_batch(T::COLUMNS.len(), batch_size);
    let (prefix, suffix) = upsert_sql::<T>();

    let mut affected = 0u64;
    for batch in deduped.chunks(chunk_rows) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);
        qb.push_values(batch.iter(), |mut b, record| {
            record.bind(&mut b, extraction_date);
        });
        qb.push(&suffix);

        let result = qb
            .build()
            .execute(&mut *conn)
            .await
            .with_context(|| format!("upsert into {} failed", T::TABLE))?;
        affected += result.rows_affected();
    }

    println!(
        "Upserted {} records into {} (conflict: {})",
        affected,
        T::TABLE,
        T::CONFLICT.join(", ")
    );
    Ok(affected)
}

// =============================================================================
// UpsertRow implementations
// =============================================================================

impl UpsertRow for Programa {
    const TABLE: &'static str = "programas";
    const COLUMNS: &'static [&'static str] = &[
        "transfer_gov_id",
        "nome",
        "orgao_superior",
        "orgao_vinculado",
        "modalidade",
        "acao_orcamentaria",
        "natureza_juridica",
        "extraction_date",
    ];
    const CONFLICT: &'static [&'static str] = &["transfer_gov_id"];

    fn natural_key(&self) -> String {
        self.transfer_gov_id.clone()
    }

    fn bind(&self, b: &mut Separated<'_, '_, Postgres, &'static str>, extraction_date: NaiveDate) {
        b.push_bind(self.transfer_gov_id.clone());
        b.push_bind(self.nome.clone());
        b.push_bind(self.orgao_superior.clone());
        b.push_bind(self.orgao_vinculado.clone());
        b.push_bind(self.modalidade.clone());
        b.push_bind(self.acao_orcamentaria.clone());
        b.push_bind(self.natureza_juridica.clone());
        b.push_bind(extraction_date);
    }
}

impl UpsertRow for Proposta {
    const TABLE: &'static str = "propostas";
    const COLUMNS: &'static [&'static str] = &[
        "transfer_gov_id",
        "titulo",
        "valor_global",
        "valor_repasse",
        "valor_contrapartida",
        "data_publicacao",
        "data_inicio_vigencia",
        "data_fim_vigencia",
        "situacao",
        "estado",
        "municipio",
        "proponente",
        "programa_id",
        "proponente_cnpj",
        "extraction_date",
    ];
    const CONFLICT: &'static [&'static str] = &["transfer_gov_id"];

    fn natural_key(&self) -> String {
        self.transfer_gov_id.clone()
    }

    fn bind(&self, b: &mut Separated<'_, '_, Postgres, &'static str>, extraction_date: NaiveDate) {
        b.push_bind(self.transfer_gov_id.clone());
        b.push_bind(self.titulo.clone());
        b.push_bind(self.valor_global);
        b.push_bind(self.valor_repasse);
        b.push_bind(self.valor_contrapartida);
        b.push_bind(self.data_publicacao);
        b.push_bind(self.data_inicio_vigencia);
        b.push_bind(self.data_fim_vigencia);
        b.push_bind(self.situacao.clone());
        b.push_bind(self.estado.clone());
        b.push_bind(self.municipio.clone());
        b.push_bind(self.proponente.clone());
        b.push_bind(self.programa_id.clone());
        b.push_bind(self.proponente_cnpj.clone());
        b.push_bind(extraction_date);
    }
}

impl UpsertRow for Apoiador {
    const TABLE: &'static str = "apoiadores";
    const COLUMNS: &'static [&'static str] =
        &["transfer_gov_id", "nome", "tipo", "orgao", "extraction_date"];
    const CONFLICT: &'static [&'static str] = &["transfer_gov_id"];

    fn natural_key(&self) -> String {
        self.transfer_gov_id.clone()
    }

    fn bind(&self, b: &mut Separated<'_, '_, Postgres, &'static str>, extraction_date: NaiveDate) {
        b.push_bind(self.transfer_gov_id.clone());
        b.push_bind(self.nome.clone());
        b.push_bind(self.tipo.clone());
        b.push_bind(self.orgao.clone());
        b.push_bind(extraction_date);
    }
}

impl UpsertRow for Emenda {
    const TABLE: &'static str = "emendas";
    const COLUMNS: &'static [&'static str] = &[
        "transfer_gov_id",
        "numero",
        "autor",
        "valor",
        "tipo",
        "ano",
        "extraction_date",
    ];
    const CONFLICT: &'static [&'static str] = &["transfer_gov_id"];

    fn natural_key(&self) -> String {
        self.transfer_gov_id.clone()
    }

    fn bind(&self, b: &mut Separated<'_, '_, Postgres, &'static str>, extraction_date: NaiveDate) {
        b.push_bind(self.transfer_gov_id.clone());
        b.push_bind(self.numero.clone());
        b.push_bind(self.autor.clone());
        b.push_bind(self.valor);
        b.push_bind(self.tipo.clone());
        b.push_bind(self.ano);
        b.push_bind(extraction_date);
    }
}

impl UpsertRow for Proponente {
    const TABLE: &'static str = "proponentes";
    const COLUMNS: &'static [&'static str] = &[
        "cnpj",
        "nome",
        "natureza_juridica",
        "sem_fins_lucrativos",
        "estado",
        "municipio",
        "endereco",
        "cep",
        "total_propostas",
        "total_emendas",
        "total_valor_emendas",
        "extraction_date",
    ];
    const CONFLICT: &'static [&'static str] = &["cnpj"];

    fn natural_key(&self) -> String {
        self.cnpj.clone()
    }

    fn bind(&self, b: &mut Separated<'_, '_, Postgres, &'static str>, extraction_date: NaiveDate) {
        b.push_bind(self.cnpj.clone());
        b.push_bind(self.nome.clone());
        b.push_bind(self.natureza_juridica.clone());
        b.push_bind(self.sem_fins_lucrativos);
        b.push_bind(self.estado.clone());
        b.push_bind(self.municipio.clone());
        b.push_bind(self.endereco.clone());
        b.push_bind(self.cep.clone());
        b.push_bind(self.total_propostas);
        b.push_bind(self.total_emendas);
        b.push_bind(self.total_valor_emendas);
        b.push_bind(extraction_date);
    }
}

impl UpsertRow for PropostaApoiador {
    const TABLE: &'static str = "proposta_apoiadores";
    const COLUMNS: &'static [&'static str] = &[
        "proposta_transfer_gov_id",
        "apoiador_transfer_gov_id",
        "extraction_date",
    ];
    const CONFLICT: &'static [&'static str] =
        &["proposta_transfer_gov_id", "apoiador_transfer_gov_id"];
    const TOUCH_UPDATED_AT: bool = false;

    fn natural_key(&self) -> String {
        format!(
            "{}|{}",
            self.proposta_transfer_gov_id, self.apoiador_transfer_gov_id
        )
    }

    fn bind(&self, b: &mut Separated<'_, '_, Postgres, &'static str>, extraction_date: NaiveDate) {
        b.push_bind(self.proposta_transfer_gov_id.clone());
        b.push_bind(self.apoiador_transfer_gov_id.clone());
        b.push_bind(extraction_date);
    }
}

impl UpsertRow for PropostaEmenda {
    const TABLE: &'static str = "proposta_emendas";
    const COLUMNS: &'static [&'static str] = &[
        "proposta_transfer_gov_id",
        "emenda_transfer_gov_id",
        "extraction_date",
    ];
    const CONFLICT: &'static [&'static str] =
        &["proposta_transfer_gov_id", "emenda_transfer_gov_id"];
    const TOUCH_UPDATED_AT: bool = false;

    fn natural_key(&self) -> String {
        format!(
            "{}|{}",
            self.proposta_transfer_gov_id, self.emenda_transfer_gov_id
        )
    }

    fn bind(&self, b: &mut Separated<'_, '_, Postgres, &'static str>, extraction_date: NaiveDate) {
        b.push_bind(self.proposta_transfer_gov_id.clone());
        b.push_bind(self.emenda_transfer_gov_id.clone());
        b.push_bind(extraction_date);
    }
}

// =============================================================================
// Data lineage
// =============================================================================

/// One provenance row per landed record. Unique on (entity_type, entity_id,
/// source_file): re-ingesting the same file re-stamps the hash and date
/// instead of duplicating, which keeps reconciliation counts stable.
#[derive(Debug, Clone, Serialize)]
pub struct LineageRow {
    pub entity_type: &'static str,
    pub entity_id: String,
    pub source_file: String,
    pub record_hash: String,
}

impl UpsertRow for LineageRow {
    const TABLE: &'static str = "data_lineage";
    const COLUMNS: &'static [&'static str] = &[
        "entity_type",
        "entity_id",
        "source_file",
        "extraction_date",
        "pipeline_version",
        "record_hash",
    ];
    const CONFLICT: &'static [&'static str] = &["entity_type", "entity_id", "source_file"];
    const TOUCH_UPDATED_AT: bool = false;

    fn natural_key(&self) -> String {
        format!("{}|{}|{}", self.entity_type, self.entity_id, self.source_file)
    }

    fn bind(&self, b: &mut Separated<'_, '_, Postgres, &'static str>, extraction_date: NaiveDate) {
        b.push_bind(self.entity_type);
        b.push_bind(self.entity_id.clone());
        b.push_bind(self.source_file.clone());
        b.push_bind(extraction_date);
        b.push_bind(PIPELINE_VERSION);
        b.push_bind(self.record_hash.clone());
    }
}

/// SHA-256 of the record's JSON form. Struct field order is fixed, so the
/// hash is deterministic for identical content.
pub fn record_hash<T: Serialize>(record: &T) -> String {
    let json = serde_json::to_string(record).unwrap_or_default();
    let digest = Sha256::digest(json.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Build lineage rows for a batch of landed records from one source file.
pub fn lineage_rows<T: Serialize>(
    records: &[T],
    entity_type: &'static str,
    source_file: &str,
    entity_id: impl Fn(&T) -> &str,
) -> Vec<LineageRow> {
    records
        .iter()
        .map(|record| LineageRow {
            entity_type,
            entity_id: entity_id(record).to_string(),
            source_file: source_file.to_string(),
            record_hash: record_hash(record),
        })
        .collect()
}

// =============================================================================
// Load orchestration
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct EntityStats {
    pub inserted: u64,
    pub updated: u64,
}

pub type LoadStats = BTreeMap<&'static str, EntityStats>;

/// Aggregate per-entity stats into (total, inserted, updated).
pub fn aggregate_stats(stats: &LoadStats) -> (i64, i64, i64) {
    let inserted: u64 = stats.values().map(|s| s.inserted).sum();
    let updated: u64 = stats.values().map(|s| s.updated).sum();
    ((inserted + updated) as i64, inserted as i64, updated as i64)
}

/// Load all validated data in dependency order: dimensions, then facts,
/// then junctions, then the proponent aggregate recompute. Does NOT commit;
/// the caller owns the transaction so a run is atomic.
pub async fn load_extraction_data(
    conn: &mut PgConnection,
    data: &ValidatedData,
    extraction_date: NaiveDate,
    batch_size: usize,
) -> Result<LoadStats> {
    let mut stats = LoadStats::new();

    let n = upsert_records(conn, &data.programas, extraction_date, batch_size).await?;
    if n > 0 {
        stats.insert("programas", EntityStats { inserted: n, updated: 0 });
    }

    let n = upsert_records(conn, &data.proponentes, extraction_date, batch_size).await?;
    if n > 0 {
        stats.insert("proponentes", EntityStats { inserted: n, updated: 0 });
    }

    let n = upsert_records(conn, &data.propostas, extraction_date, batch_size).await?;
    if n > 0 {
        stats.insert("propostas", EntityStats { inserted: n, updated: 0 });
    }

    let n = upsert_records(conn, &data.apoiadores, extraction_date, batch_size).await?;
    if n > 0 {
        stats.insert("apoiadores", EntityStats { inserted: n, updated: 0 });
    }

    let n = upsert_records(conn, &data.emendas, extraction_date, batch_size).await?;
    if n > 0 {
        stats.insert("emendas", EntityStats { inserted: n, updated: 0 });
    }

    let n = upsert_records(conn, &data.proposta_apoiadores, extraction_date, batch_size).await?;
    if n > 0 {
        stats.insert("proposta_apoiadores", EntityStats { inserted: n, updated: 0 });
    }

    let n = upsert_records(conn, &data.proposta_emendas, extraction_date, batch_size).await?;
    if n > 0 {
        stats.insert("proposta_emendas", EntityStats { inserted: n, updated: 0 });
    }

    let recomputed = recompute_proponente_totals(conn).await?;
    println!("Recomputed aggregates for {} proponentes", recomputed);

    println!("Extraction data loading complete: {} tables processed", stats.len());
    Ok(stats)
}

/// Recompute proponent aggregates from the loaded fact tables, overwriting
/// whatever was there. Runs on every load; totals are never drifted
/// incrementally.
pub async fn recompute_proponente_totals(conn: &mut PgConnection) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE proponentes p SET
            total_propostas = (
                SELECT COUNT(*) FROM propostas pr
                WHERE pr.proponente_cnpj = p.cnpj
            ),
            total_emendas = (
                SELECT COUNT(DISTINCT pe.emenda_transfer_gov_id)
                FROM propostas pr
                JOIN proposta_emendas pe
                  ON pe.proposta_transfer_gov_id = pr.transfer_gov_id
                WHERE pr.proponente_cnpj = p.cnpj
            ),
            total_valor_emendas = (
                SELECT COALESCE(SUM(e.valor), 0)
                FROM propostas pr
                JOIN proposta_emendas pe
                  ON pe.proposta_transfer_gov_id = pr.transfer_gov_id
                JOIN emendas e
                  ON e.transfer_gov_id = pe.emenda_transfer_gov_id
                WHERE pr.proponente_cnpj = p.cnpj
            ),
            updated_at = now()
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("proponent aggregate recompute failed")?;

    Ok(result.rows_affected())
}

// =============================================================================
// Extraction log
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
pub struct ExtractionLogRow {
    pub id: i64,
    pub run_date: chrono::DateTime<chrono::Utc>,
    pub status: String,
    pub total_records: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

/// Record one audit row for a pipeline run and return its id. Inserted
/// with RETURNING inside the caller's transaction, so the id is available
/// before commit and the same path serves failure logging.
pub async fn create_extraction_log(
    conn: &mut PgConnection,
    status: &str,
    stats: Option<&LoadStats>,
    files_processed: Option<i64>,
    error: Option<&str>,
    duration_seconds: f64,
) -> Result<i64> {
    let (total, inserted, updated) = match stats {
        Some(stats) => aggregate_stats(stats),
        None => (0, 0, 0),
    };

    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO extraction_logs
        (status, files_processed, total_records, records_inserted, records_updated, records_skipped, duration_seconds, error_message)
        VALUES ($1, $2, $3, $4, $5, NULL, $6, $7)
        RETURNING id
        "#,
    )
    .bind(status)
    .bind(files_processed)
    .bind(total)
    .bind(inserted)
    .bind(updated)
    .bind(duration_seconds)
    .bind(error)
    .fetch_one(&mut *conn)
    .await
    .context("failed to create extraction log")?;

    println!(
        "Extraction log created: id={}, status={}, records={}, duration={:.2}s",
        id, status, total, duration_seconds
    );
    Ok(id)
}

/// Most recent audit row by run date, if any.
pub async fn get_last_extraction(conn: &mut PgConnection) -> Result<Option<ExtractionLogRow>> {
    let row = sqlx::query_as::<_, ExtractionLogRow>(
        r#"
        SELECT id, run_date, status, total_records, duration_seconds, error_message
        FROM extraction_logs
        ORDER BY run_date DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

// =============================================================================
// Schema
// =============================================================================

/// Idempotent DDL for the full schema. Application-level foreign keys only:
/// partial extractions may land children before their parents exist.
const DDL: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS programas (
        id BIGSERIAL PRIMARY KEY,
        transfer_gov_id TEXT NOT NULL UNIQUE,
        nome TEXT,
        orgao_superior TEXT,
        orgao_vinculado TEXT,
        modalidade TEXT,
        acao_orcamentaria TEXT,
        natureza_juridica TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        extraction_date DATE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS propostas (
        id BIGSERIAL PRIMARY KEY,
        transfer_gov_id TEXT NOT NULL UNIQUE,
        titulo TEXT,
        valor_global DOUBLE PRECISION,
        valor_repasse DOUBLE PRECISION,
        valor_contrapartida DOUBLE PRECISION,
        data_publicacao DATE,
        data_inicio_vigencia DATE,
        data_fim_vigencia DATE,
        situacao TEXT,
        estado VARCHAR(2),
        municipio TEXT,
        proponente TEXT,
        programa_id TEXT,
        proponente_cnpj VARCHAR(14),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        extraction_date DATE
    )"#,
    "CREATE INDEX IF NOT EXISTS ix_propostas_situacao ON propostas (situacao)",
    "CREATE INDEX IF NOT EXISTS ix_propostas_estado ON propostas (estado)",
    "CREATE INDEX IF NOT EXISTS ix_propostas_data_publicacao ON propostas (data_publicacao)",
    "CREATE INDEX IF NOT EXISTS ix_propostas_valor_global ON propostas (valor_global)",
    "CREATE INDEX IF NOT EXISTS ix_propostas_proponente_cnpj ON propostas (proponente_cnpj)",
    r#"CREATE TABLE IF NOT EXISTS apoiadores (
        id BIGSERIAL PRIMARY KEY,
        transfer_gov_id TEXT NOT NULL UNIQUE,
        nome TEXT,
        tipo TEXT,
        orgao TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        extraction_date DATE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS emendas (
        id BIGSERIAL PRIMARY KEY,
        transfer_gov_id TEXT NOT NULL UNIQUE,
        numero TEXT,
        autor TEXT,
        valor DOUBLE PRECISION,
        tipo TEXT,
        ano INTEGER,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        extraction_date DATE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS proponentes (
        id BIGSERIAL PRIMARY KEY,
        cnpj VARCHAR(14) NOT NULL UNIQUE,
        nome TEXT,
        natureza_juridica TEXT,
        sem_fins_lucrativos BOOLEAN NOT NULL DEFAULT false,
        estado TEXT,
        municipio TEXT,
        endereco TEXT,
        cep TEXT,
        total_propostas BIGINT NOT NULL DEFAULT 0,
        total_emendas BIGINT NOT NULL DEFAULT 0,
        total_valor_emendas DOUBLE PRECISION NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        extraction_date DATE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS proposta_apoiadores (
        id BIGSERIAL PRIMARY KEY,
        proposta_transfer_gov_id TEXT NOT NULL,
        apoiador_transfer_gov_id TEXT NOT NULL,
        extraction_date DATE,
        CONSTRAINT uq_proposta_apoiador UNIQUE (proposta_transfer_gov_id, apoiador_transfer_gov_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS ix_pa_apoiador ON proposta_apoiadores (apoiador_transfer_gov_id)",
    r#"CREATE TABLE IF NOT EXISTS proposta_emendas (
        id BIGSERIAL PRIMARY KEY,
        proposta_transfer_gov_id TEXT NOT NULL,
        emenda_transfer_gov_id TEXT NOT NULL,
        extraction_date DATE,
        CONSTRAINT uq_proposta_emenda UNIQUE (proposta_transfer_gov_id, emenda_transfer_gov_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS ix_pe_emenda ON proposta_emendas (emenda_transfer_gov_id)",
    r#"CREATE TABLE IF NOT EXISTS extraction_logs (
        id BIGSERIAL PRIMARY KEY,
        run_date TIMESTAMPTZ NOT NULL DEFAULT now(),
        status TEXT NOT NULL,
        files_processed BIGINT,
        total_records BIGINT,
        records_inserted BIGINT,
        records_updated BIGINT,
        records_skipped BIGINT,
        duration_seconds DOUBLE PRECISION,
        error_message TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS data_lineage (
        id BIGSERIAL PRIMARY KEY,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        source_file TEXT NOT NULL,
        extraction_date DATE,
        pipeline_version TEXT,
        record_hash TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT uq_lineage UNIQUE (entity_type, entity_id, source_file)
    )"#,
    "CREATE INDEX IF NOT EXISTS ix_lineage_source_file ON data_lineage (source_file)",
];

/// Create all tables and indexes if they do not exist.
pub async fn init_db(pool: &PgPool) -> Result<()> {
    for statement in DDL {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("schema initialization failed")?;
    }
    Ok(())
}
