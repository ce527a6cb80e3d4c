//! Tabular reader for Transferegov source files.
//!
//! Responsibilities:
//! - Read .xlsx and .csv files into a normalized text table
//! - Detect encoding and infer the field delimiter for CSV input
//! - Resolve raw source headers onto the canonical column vocabulary
//! - Validate that the minimum required columns are present
//!
//! Everything is read as text at this stage. Numeric and date coercion
//! happens during record validation, where a bad value rejects one row
//! instead of aborting a whole file.

use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::encoding::detect_encoding;

/// Candidate delimiters, tried in order. Transferegov exports are usually
/// semicolon-delimited but comma and tab versions appear in older dumps.
const DELIMITER_CANDIDATES: &[u8] = b";,\t";

/// How many bytes of a CSV file to sample when inferring the delimiter.
const SNIFF_BYTES: usize = 8192;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("file contains no data rows: {0}")]
    EmptyFile(String),

    #[error("unsupported file extension: {0} (only .xlsx and .csv)")]
    UnsupportedFormat(String),

    #[error("missing required columns for {entity}: {missing:?}")]
    SchemaIncomplete {
        entity: &'static str,
        missing: Vec<String>,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Malformed(String),
}

/// What to do when required columns are missing after alias resolution.
/// Source schemas drift; the default is to warn and keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaPolicy {
    Warn,
    Strict,
}

impl SchemaPolicy {
    pub fn from_env() -> Self {
        match std::env::var("SCHEMA_POLICY").as_deref() {
            Ok("strict") => SchemaPolicy::Strict,
            _ => SchemaPolicy::Warn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Propostas,
    Apoiadores,
    Emendas,
    Programas,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Propostas => "propostas",
            EntityType::Apoiadores => "apoiadores",
            EntityType::Emendas => "emendas",
            EntityType::Programas => "programas",
        }
    }

    /// Singular form used in data_lineage.entity_type.
    pub fn singular(&self) -> &'static str {
        match self {
            EntityType::Propostas => "proposta",
            EntityType::Apoiadores => "apoiador",
            EntityType::Emendas => "emenda",
            EntityType::Programas => "programa",
        }
    }
}

/// Infer entity type from a filename fragment, case-insensitive.
/// "proposta" is checked first so the programa_proposta link file
/// classifies the same way the original exports do.
pub fn infer_entity_type(filename: &str) -> Option<EntityType> {
    let name = filename.to_lowercase();
    if name.contains("proposta") {
        Some(EntityType::Propostas)
    } else if name.contains("apoiador") {
        Some(EntityType::Apoiadores)
    } else if name.contains("emenda") {
        Some(EntityType::Emendas)
    } else if name.contains("programa") {
        Some(EntityType::Programas)
    } else {
        None
    }
}

/// A parsed source file: named columns, rows of text values.
/// Every row has exactly `columns.len()` fields.
#[derive(Debug, Clone)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }
}

// =============================================================================
// Header normalization and column aliases
// =============================================================================

/// Normalize a raw header for comparison: strip BOM, trim, lowercase, fold
/// the diacritics that occur in Portuguese headers, and squash separators
/// to underscores. Everything else non-alphanumeric is dropped.
pub fn normalize_header(raw: &str) -> String {
    let stripped = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let mut out = String::with_capacity(stripped.len());
    for c in stripped.trim().to_lowercase().chars() {
        let mapped = match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' => 'e',
            'í' | 'ì' | 'î' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            ' ' | '-' | '/' | '.' => '_',
            other => other,
        };
        if mapped.is_alphanumeric() || mapped == '_' {
            out.push(mapped);
        }
    }
    out
}

/// (canonical column, known raw-header aliases) per entity type.
/// First match wins; order within each alias list matters.
const PROPOSTA_ALIASES: &[(&str, &[&str])] = &[
    ("transfer_gov_id", &["id_proposta", "codigo_da_proposta", "cod_proposta", "nr_proposta"]),
    ("titulo", &["objeto", "objeto_da_proposta", "nome_proposta"]),
    ("valor_global", &["vl_global_prop", "vl_global", "valor_global_da_proposta"]),
    ("valor_repasse", &["vl_repasse_prop", "vl_repasse", "valor_de_repasse"]),
    ("valor_contrapartida", &["vl_contrapartida_prop", "vl_contrapartida", "valor_de_contrapartida"]),
    ("data_publicacao", &["dt_publicacao_dou", "data_publicacao_dou", "dt_publicacao"]),
    ("data_inicio_vigencia", &["dia_inic_vigenc_proposta", "dt_inicio_vigencia", "data_inicio_de_vigencia"]),
    ("data_fim_vigencia", &["dia_fim_vigenc_proposta", "dt_fim_vigencia", "data_fim_de_vigencia"]),
    ("situacao", &["sit_proposta", "situacao_da_proposta", "status_proposta"]),
    ("estado", &["uf_proponente", "uf", "sigla_uf"]),
    ("municipio", &["munic_proponente", "municipio_proponente", "nome_municipio"]),
    ("proponente", &["nm_proponente", "nome_proponente", "razao_social_proponente"]),
    ("programa_id", &["id_programa", "cod_programa", "codigo_do_programa"]),
];

const APOIADOR_ALIASES: &[(&str, &[&str])] = &[
    ("transfer_gov_id", &["id_apoiador", "cod_apoiador"]),
    ("nome", &["nome_apoiador", "nm_apoiador", "nome_parlamentar"]),
    ("tipo", &["tipo_apoiador", "indicacao"]),
    ("orgao", &["orgao_apoiador", "nm_orgao", "orgao"]),
];

const EMENDA_ALIASES: &[(&str, &[&str])] = &[
    ("transfer_gov_id", &["id_emenda", "cod_emenda"]),
    ("numero", &["numero_emenda", "nr_emenda"]),
    ("autor", &["autor_emenda", "nome_parlamentar"]),
    ("valor", &["valor_repasse_emenda", "vl_emenda", "valor_emenda"]),
    ("tipo", &["tipo_parlamentar", "tipo_emenda"]),
    ("ano", &["ano_emenda", "ano_da_emenda"]),
];

const PROGRAMA_ALIASES: &[(&str, &[&str])] = &[
    ("transfer_gov_id", &["id_programa", "cod_programa", "codigo_do_programa"]),
    ("nome", &["nome_programa", "nm_programa"]),
    ("orgao_superior", &["desc_orgao_sup_programa", "orgao_superior_programa"]),
    ("orgao_vinculado", &["orgao_vinculado_programa", "nm_orgao_vinculado"]),
    ("modalidade", &["modalidade_programa", "sigla_modalidade"]),
    ("acao_orcamentaria", &["acao_orcamentaria_programa", "cod_acao_orcamentaria"]),
    ("natureza_juridica", &["natureza_juridica_programa", "natureza_juridica_proponente"]),
];

pub fn aliases_for(entity: EntityType) -> &'static [(&'static str, &'static [&'static str])] {
    match entity {
        EntityType::Propostas => PROPOSTA_ALIASES,
        EntityType::Apoiadores => APOIADOR_ALIASES,
        EntityType::Emendas => EMENDA_ALIASES,
        EntityType::Programas => PROGRAMA_ALIASES,
    }
}

/// Rename raw headers to canonical names where a confident alias match
/// exists. A canonical column that is already present is never overwritten,
/// which also makes the pass idempotent.
pub fn resolve_aliases(table: &mut Table, entity: EntityType) {
    for (canonical, aliases) in aliases_for(entity) {
        let already_present = table
            .columns
            .iter()
            .any(|c| normalize_header(c) == *canonical);
        if already_present {
            // Still canonicalize the spelling (casing, BOM, accents).
            if let Some(idx) = table
                .columns
                .iter()
                .position(|c| normalize_header(c) == *canonical)
            {
                table.columns[idx] = canonical.to_string();
            }
            continue;
        }
        for alias in aliases.iter() {
            if let Some(idx) = table
                .columns
                .iter()
                .position(|c| normalize_header(c) == *alias)
            {
                table.columns[idx] = canonical.to_string();
                break;
            }
        }
    }
}

/// Resolve a single raw key (as seen in row data or a header) to its
/// canonical name for the entity, if it is a known alias.
pub fn canonical_key(raw: &str, entity: EntityType) -> Option<&'static str> {
    let normalized = normalize_header(raw);
    for (canonical, aliases) in aliases_for(entity) {
        if normalized == *canonical || aliases.iter().any(|a| *a == normalized) {
            return Some(*canonical);
        }
    }
    None
}

/// Find a column by candidate raw names (normalized comparison).
/// Used for columns that live outside the canonical vocabulary, like the
/// denormalized join-file headers and the proponent fields.
pub fn find_raw_column(table: &Table, candidates: &[&str]) -> Option<usize> {
    for candidate in candidates {
        if let Some(idx) = table
            .columns
            .iter()
            .position(|c| normalize_header(c) == *candidate)
        {
            return Some(idx);
        }
    }
    None
}

// =============================================================================
// Schema validation
// =============================================================================

/// Documented column sets per entity type. Only `required` gates progress.
pub fn expected_columns(entity: EntityType) -> Vec<&'static str> {
    aliases_for(entity).iter().map(|(c, _)| *c).collect()
}

pub fn required_columns(entity: EntityType) -> &'static [&'static str] {
    // The natural key is the only column without which a file is unusable;
    // everything else tolerates partial extraction.
    match entity {
        EntityType::Propostas => &["transfer_gov_id"],
        EntityType::Apoiadores => &["transfer_gov_id"],
        EntityType::Emendas => &["transfer_gov_id"],
        EntityType::Programas => &["transfer_gov_id"],
    }
}

/// Check the required column set after alias resolution. Returns the list
/// of missing required columns; under `Strict` a non-empty list is an error.
pub fn validate_schema(
    table: &Table,
    entity: EntityType,
    policy: SchemaPolicy,
) -> Result<Vec<String>, ParseError> {
    let present: HashSet<&str> = table.columns.iter().map(String::as_str).collect();
    let missing: Vec<String> = required_columns(entity)
        .iter()
        .filter(|c| !present.contains(**c))
        .map(|c| c.to_string())
        .collect();

    if !missing.is_empty() {
        match policy {
            SchemaPolicy::Strict => {
                return Err(ParseError::SchemaIncomplete {
                    entity: entity.as_str(),
                    missing,
                });
            }
            SchemaPolicy::Warn => {
                eprintln!(
                    "Warning: missing required columns for {}: {:?} (expected: {:?}; continuing, SCHEMA_POLICY=warn)",
                    entity.as_str(),
                    missing,
                    expected_columns(entity)
                );
            }
        }
    }
    Ok(missing)
}

// =============================================================================
// Reading
// =============================================================================

/// Read a source file as raw text columns, without alias resolution or
/// schema checks. Used directly by the reconciliation checker.
pub fn read_raw(path: &Path) -> Result<Table, ParseError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let table = match ext.as_str() {
        "xlsx" => read_xlsx(path)?,
        "csv" => read_csv(path)?,
        other => return Err(ParseError::UnsupportedFormat(other.to_string())),
    };

    if table.rows.is_empty() {
        return Err(ParseError::EmptyFile(path.display().to_string()));
    }
    Ok(table)
}

fn read_xlsx(path: &Path) -> Result<Table, ParseError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| ParseError::Malformed(format!("{}: {}", path.display(), e)))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = sheet_names
        .first()
        .ok_or_else(|| ParseError::Malformed(format!("{}: workbook has no sheets", path.display())))?
        .clone();

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ParseError::Malformed(format!("{}: {}", path.display(), e)))?;

    let mut rows_iter = range.rows();
    let columns: Vec<String> = match rows_iter.next() {
        Some(header) => header.iter().map(cell_to_string).collect(),
        None => return Err(ParseError::EmptyFile(path.display().to_string())),
    };

    let mut rows = Vec::new();
    for row in rows_iter {
        let mut fields: Vec<String> = row.iter().map(cell_to_string).collect();
        fields.resize(columns.len(), String::new());
        rows.push(fields);
    }

    Ok(Table { columns, rows })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        Data::Float(f) => {
            // Excel stores ids as floats; render integral values without ".0"
            if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Int(i) => format!("{}", i),
        other => format!("{}", other),
    }
}

fn read_csv(path: &Path) -> Result<Table, ParseError> {
    let bytes = std::fs::read(path).map_err(|e| ParseError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let encoding = detect_encoding(&bytes);
    let content = encoding.decode(&bytes);
    parse_delimited(&content)
}

/// Parse delimited text content. The delimiter is inferred empirically:
/// the first candidate that yields more than one header column wins. When
/// no candidate works the lenient splitter takes over.
pub fn parse_delimited(content: &str) -> Result<Table, ParseError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    match infer_delimiter(content) {
        Some(delimiter) => parse_with_delimiter(content, delimiter),
        None => parse_lenient(content),
    }
}

/// Try each candidate delimiter against a short prefix of the file.
fn infer_delimiter(content: &str) -> Option<u8> {
    let sample = if content.len() <= SNIFF_BYTES {
        content
    } else {
        let mut end = SNIFF_BYTES;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        &content[..end]
    };

    for &delimiter in DELIMITER_CANDIDATES {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(sample.as_bytes());
        if let Ok(headers) = reader.headers() {
            if headers.len() > 1 {
                return Some(delimiter);
            }
        }
    }
    None
}

fn parse_with_delimiter(content: &str, delimiter: u8) -> Result<Table, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| ParseError::Malformed(format!("failed to read CSV headers: {}", e)))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for result in reader.records() {
        match result {
            Ok(record) => {
                let mut fields: Vec<String> = record.iter().map(|f| f.to_string()).collect();
                fields.resize(columns.len(), String::new());
                rows.push(fields);
            }
            Err(_) => dropped += 1,
        }
    }
    if dropped > 0 {
        eprintln!("Warning: dropped {} malformed CSV lines", dropped);
    }

    Ok(Table { columns, rows })
}

/// Last-resort parse for files no strict reader accepts: split on the
/// delimiter that occurs most in the header line and drop lines whose
/// field count does not match the header. Every field is plain text;
/// quoting is not interpreted.
fn parse_lenient(content: &str) -> Result<Table, ParseError> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| ParseError::EmptyFile("lenient parse: no header line".to_string()))?;

    let delimiter = DELIMITER_CANDIDATES
        .iter()
        .copied()
        .max_by_key(|&d| header.matches(d as char).count())
        .unwrap_or(b';');
    let sep = delimiter as char;

    let columns: Vec<String> = header.split(sep).map(|h| h.trim().to_string()).collect();

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for line in lines {
        let fields: Vec<String> = line.split(sep).map(|f| f.trim().to_string()).collect();
        if fields.len() == columns.len() {
            rows.push(fields);
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        eprintln!("Warning: lenient parse dropped {} unsplittable lines", dropped);
    }

    Ok(Table { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // ENTITY TYPE INFERENCE
    // -------------------------------------------------------------------------

    #[test]
    fn test_infer_entity_type_basic() {
        assert_eq!(
            infer_entity_type("siconv_proposta.csv"),
            Some(EntityType::Propostas)
        );
        assert_eq!(
            infer_entity_type("Apoiadores_2025.xlsx"),
            Some(EntityType::Apoiadores)
        );
        assert_eq!(infer_entity_type("EMENDAS.csv"), Some(EntityType::Emendas));
        assert_eq!(
            infer_entity_type("siconv_programa.csv"),
            Some(EntityType::Programas)
        );
        assert_eq!(infer_entity_type("readme.txt"), None);
    }

    #[test]
    fn test_infer_entity_type_link_file_classifies_as_proposta() {
        // programa_proposta contains both fragments; proposta wins.
        assert_eq!(
            infer_entity_type("siconv_programa_proposta.csv"),
            Some(EntityType::Propostas)
        );
    }

    // -------------------------------------------------------------------------
    // HEADER NORMALIZATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_normalize_header_case_and_trim() {
        assert_eq!(normalize_header("  ID_PROPOSTA  "), "id_proposta");
    }

    #[test]
    fn test_normalize_header_diacritics_and_spaces() {
        assert_eq!(normalize_header("Ação Orçamentária"), "acao_orcamentaria");
        assert_eq!(normalize_header("Município"), "municipio");
    }

    #[test]
    fn test_normalize_header_bom() {
        assert_eq!(normalize_header("\u{feff}id_proposta"), "id_proposta");
    }

    // -------------------------------------------------------------------------
    // DELIMITER INFERENCE
    // -------------------------------------------------------------------------

    #[test]
    fn test_delimiter_inference_same_table_three_ways() {
        let semicolon = "id_proposta;objeto\n1;Escola\n2;Creche\n";
        let comma = "id_proposta,objeto\n1,Escola\n2,Creche\n";
        let tab = "id_proposta\tobjeto\n1\tEscola\n2\tCreche\n";

        for content in [semicolon, comma, tab] {
            let table = parse_delimited(content).unwrap();
            assert_eq!(table.columns.len(), 2, "input: {:?}", content);
            assert_eq!(table.rows.len(), 2, "input: {:?}", content);
            assert_eq!(table.rows[0][1], "Escola");
        }
    }

    #[test]
    fn test_delimiter_inference_prefers_semicolon() {
        // Semicolon-delimited data with commas inside a field.
        let content = "id;objeto\n1;Reforma, ala norte\n";
        let table = parse_delimited(content).unwrap();
        assert_eq!(table.columns, vec!["id", "objeto"]);
        assert_eq!(table.rows[0][1], "Reforma, ala norte");
    }

    #[test]
    fn test_parse_strips_bom() {
        let content = "\u{feff}id_proposta;objeto\n1;Obra\n";
        let table = parse_delimited(content).unwrap();
        assert_eq!(table.columns[0], "id_proposta");
    }

    #[test]
    fn test_parse_ragged_rows_padded() {
        let content = "a;b;c\n1;2;3\n4;5\n";
        let table = parse_delimited(content).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["4", "5", ""]);
    }

    #[test]
    fn test_lenient_parse_drops_unsplittable_lines() {
        let content = "a;b\n1;2\nnodelimiterhere\n3;4\n";
        let table = parse_lenient(content).unwrap();
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["3", "4"]);
    }

    // -------------------------------------------------------------------------
    // ALIAS RESOLUTION
    // -------------------------------------------------------------------------

    fn table(columns: &[&str]) -> Table {
        Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: vec![vec![String::new(); columns.len()]],
        }
    }

    #[test]
    fn test_resolve_aliases_renames_first_match() {
        let mut t = table(&["ID_PROPOSTA", "OBJETO", "VL_GLOBAL_PROP"]);
        resolve_aliases(&mut t, EntityType::Propostas);
        assert_eq!(t.columns, vec!["transfer_gov_id", "titulo", "valor_global"]);
    }

    #[test]
    fn test_resolve_aliases_never_overwrites_canonical() {
        // Both the canonical column and an alias are present; the canonical
        // one stays, the alias column keeps its raw name.
        let mut t = table(&["transfer_gov_id", "id_proposta"]);
        resolve_aliases(&mut t, EntityType::Propostas);
        assert_eq!(t.columns, vec!["transfer_gov_id", "id_proposta"]);
    }

    #[test]
    fn test_resolve_aliases_idempotent() {
        let mut t = table(&["Id_Proposta", "Objeto", "UF_PROPONENTE"]);
        resolve_aliases(&mut t, EntityType::Propostas);
        let after_once = t.columns.clone();
        resolve_aliases(&mut t, EntityType::Propostas);
        assert_eq!(t.columns, after_once);
    }

    #[test]
    fn test_resolve_aliases_canonicalizes_spelling() {
        let mut t = table(&["TRANSFER_GOV_ID", "Nome"]);
        resolve_aliases(&mut t, EntityType::Apoiadores);
        assert_eq!(t.columns, vec!["transfer_gov_id", "nome"]);
    }

    #[test]
    fn test_canonical_key_remap() {
        assert_eq!(
            canonical_key("VL_REPASSE", EntityType::Propostas),
            Some("valor_repasse")
        );
        assert_eq!(
            canonical_key("estado", EntityType::Propostas),
            Some("estado")
        );
        assert_eq!(canonical_key("unrelated", EntityType::Propostas), None);
    }

    #[test]
    fn test_find_raw_column() {
        let t = table(&["NUMERO_EMENDA_APOIADORES_EMENDAS", "x"]);
        assert_eq!(
            find_raw_column(&t, &["numero_emenda_apoiadores_emendas"]),
            Some(0)
        );
        assert_eq!(find_raw_column(&t, &["missing"]), None);
    }

    // -------------------------------------------------------------------------
    // SCHEMA VALIDATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_validate_schema_ok() {
        let t = table(&["transfer_gov_id", "titulo"]);
        let missing = validate_schema(&t, EntityType::Propostas, SchemaPolicy::Warn).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_validate_schema_warn_reports_missing() {
        let t = table(&["titulo"]);
        let missing = validate_schema(&t, EntityType::Propostas, SchemaPolicy::Warn).unwrap();
        assert_eq!(missing, vec!["transfer_gov_id"]);
    }

    #[test]
    fn test_validate_schema_strict_fails() {
        let t = table(&["titulo"]);
        let err = validate_schema(&t, EntityType::Propostas, SchemaPolicy::Strict).unwrap_err();
        assert!(matches!(err, ParseError::SchemaIncomplete { .. }));
    }

    #[test]
    fn test_expected_columns_cover_schema() {
        let expected = expected_columns(EntityType::Programas);
        assert!(expected.contains(&"transfer_gov_id"));
        assert!(expected.contains(&"natureza_juridica"));
        assert_eq!(expected.len(), 7);
    }

    // -------------------------------------------------------------------------
    // EMPTY / UNSUPPORTED FILES
    // -------------------------------------------------------------------------

    #[test]
    fn test_header_only_csv_is_empty() {
        let dir = std::env::temp_dir().join("pipeline_parse_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty_propostas.csv");
        std::fs::write(&path, "id_proposta;objeto\n").unwrap();

        let err = read_raw(&path).unwrap_err();
        assert!(matches!(err, ParseError::EmptyFile(_)));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = std::env::temp_dir().join("pipeline_parse_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("propostas.pdf");
        std::fs::write(&path, "not a table").unwrap();

        let err = read_raw(&path).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_read_resolve_validate_sequence() {
        let dir = std::env::temp_dir().join("pipeline_parse_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ok_propostas.csv");
        std::fs::write(&path, "ID_PROPOSTA;OBJETO\n77;Quadra coberta\n").unwrap();

        let mut table = read_raw(&path).unwrap();
        resolve_aliases(&mut table, EntityType::Propostas);
        let missing =
            validate_schema(&table, EntityType::Propostas, SchemaPolicy::Strict).unwrap();
        assert!(missing.is_empty());
        assert_eq!(table.columns[0], "transfer_gov_id");
        assert_eq!(table.rows[0][0], "77");
    }

    #[test]
    fn test_windows_1252_csv_decodes() {
        let dir = std::env::temp_dir().join("pipeline_parse_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("latin_propostas.csv");
        // "id_proposta;munic_proponente\n1;São João\n" in Windows-1252
        let mut bytes = b"id_proposta;munic_proponente\n1;S".to_vec();
        bytes.push(0xE3);
        bytes.extend_from_slice(b"o Jo");
        bytes.push(0xE3);
        bytes.extend_from_slice(b"o\n");
        std::fs::write(&path, bytes).unwrap();

        let table = read_raw(&path).unwrap();
        assert_eq!(table.rows[0][1], "São João");
    }
}
