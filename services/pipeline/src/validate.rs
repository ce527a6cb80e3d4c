//! Record validation for Transferegov entities.
//!
//! Each entity type has an explicit record struct and a row validation
//! function. Validation partitions a table into (valid records, rejected
//! rows); a bad row never aborts the file it came from. Coercion rules:
//! - natural key: required, non-empty after trim
//! - monetary fields: optional, >= 0, Brazilian and plain decimal formats
//! - estado: optional, must normalize to one of the 27 UF codes
//! - emenda ano: optional, must lie in [2000, 2100]
//! - dates: optional, DD/MM/YYYY or ISO

use chrono::NaiveDate;
use serde::Serialize;

use crate::parse::{canonical_key, EntityType, Table};

/// The 27 Brazilian UF codes.
pub const VALID_UF_CODES: [&str; 27] = [
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB",
    "PR", "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

// =============================================================================
// Record types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Programa {
    pub transfer_gov_id: String,
    pub nome: Option<String>,
    pub orgao_superior: Option<String>,
    pub orgao_vinculado: Option<String>,
    pub modalidade: Option<String>,
    pub acao_orcamentaria: Option<String>,
    pub natureza_juridica: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposta {
    pub transfer_gov_id: String,
    pub titulo: Option<String>,
    pub valor_global: Option<f64>,
    pub valor_repasse: Option<f64>,
    pub valor_contrapartida: Option<f64>,
    pub data_publicacao: Option<NaiveDate>,
    pub data_inicio_vigencia: Option<NaiveDate>,
    pub data_fim_vigencia: Option<NaiveDate>,
    pub situacao: Option<String>,
    pub estado: Option<String>,
    pub municipio: Option<String>,
    pub proponente: Option<String>,
    pub programa_id: Option<String>,
    pub proponente_cnpj: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Apoiador {
    pub transfer_gov_id: String,
    pub nome: Option<String>,
    pub tipo: Option<String>,
    pub orgao: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Emenda {
    pub transfer_gov_id: String,
    pub numero: Option<String>,
    pub autor: Option<String>,
    pub valor: Option<f64>,
    pub tipo: Option<String>,
    pub ano: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proponente {
    pub cnpj: String,
    pub nome: Option<String>,
    pub natureza_juridica: Option<String>,
    pub sem_fins_lucrativos: bool,
    pub estado: Option<String>,
    pub municipio: Option<String>,
    pub endereco: Option<String>,
    pub cep: Option<String>,
    pub total_propostas: i64,
    pub total_emendas: i64,
    pub total_valor_emendas: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PropostaApoiador {
    pub proposta_transfer_gov_id: String,
    pub apoiador_transfer_gov_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PropostaEmenda {
    pub proposta_transfer_gov_id: String,
    pub emenda_transfer_gov_id: String,
}

/// A rejected row: 1-based data row number, what failed, and the raw row.
#[derive(Debug, Clone)]
pub struct RowError {
    pub row: usize,
    pub reason: String,
    pub raw: String,
}

// =============================================================================
// Field coercion helpers
// =============================================================================

fn opt_text(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Parse a monetary value. Accepts plain decimals ("1234.56"), the Brazilian
/// convention ("1.234,56"), and an optional "R$" prefix. Empty is None.
pub fn parse_money(raw: &str) -> Result<Option<f64>, String> {
    let t = raw.trim().trim_start_matches("R$").trim();
    if t.is_empty() {
        return Ok(None);
    }
    let mut s = t.replace(' ', "");
    if s.contains(',') {
        // decimal comma: dots are thousands separators
        s = s.replace('.', "").replace(',', ".");
    }
    s.parse::<f64>()
        .map(Some)
        .map_err(|_| format!("invalid monetary value: {}", raw.trim()))
}

fn non_negative(value: Option<f64>, field: &str) -> Result<Option<f64>, String> {
    match value {
        Some(v) if v < 0.0 => Err(format!("{} cannot be negative: {}", field, v)),
        other => Ok(other),
    }
}

/// Parse an optional date: ISO (with or without a time suffix) or DD/MM/YYYY.
pub fn parse_date(raw: &str) -> Result<Option<NaiveDate>, String> {
    let t = raw.trim();
    if t.is_empty() {
        return Ok(None);
    }
    let head = t.split_whitespace().next().unwrap_or(t);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(head, "%d/%m/%Y"))
        .map(Some)
        .map_err(|_| format!("invalid date: {}", t))
}

/// Parse an optional amendment year; must lie in [2000, 2100].
pub fn parse_ano(raw: &str) -> Result<Option<i32>, String> {
    let t = raw.trim();
    if t.is_empty() {
        return Ok(None);
    }
    let year: i32 = t
        .parse::<i32>()
        .or_else(|_| t.parse::<f64>().map(|f| f as i32))
        .map_err(|_| format!("invalid ano: {}", t))?;
    if !(2000..=2100).contains(&year) {
        return Err(format!("unreasonable ano value: {}", year));
    }
    Ok(Some(year))
}

/// Validate and normalize a UF state code.
pub fn parse_estado(raw: &str) -> Result<Option<String>, String> {
    let t = raw.trim().to_uppercase();
    if t.is_empty() {
        return Ok(None);
    }
    if VALID_UF_CODES.contains(&t.as_str()) {
        Ok(Some(t))
    } else {
        Err(format!("invalid estado UF code: {}", raw.trim()))
    }
}

fn natural_key(raw: &str) -> Result<String, String> {
    let t = raw.trim();
    if t.is_empty() {
        Err("transfer_gov_id cannot be empty".to_string())
    } else {
        Ok(t.to_string())
    }
}

// =============================================================================
// Row access
// =============================================================================

/// Find a column for a canonical name: exact match first, then the same
/// alias remap used on headers, so raw keys that slipped past header
/// normalization still resolve.
fn column_for(table: &Table, canonical: &str, entity: EntityType) -> Option<usize> {
    table.column_index(canonical).or_else(|| {
        table
            .columns
            .iter()
            .position(|c| canonical_key(c, entity) == Some(canonical))
    })
}

struct Row<'a> {
    table: &'a Table,
    entity: EntityType,
    index: usize,
}

impl<'a> Row<'a> {
    fn get(&self, canonical: &str) -> &'a str {
        match column_for(self.table, canonical, self.entity) {
            Some(col) => self.table.value(self.index, col),
            None => "",
        }
    }

    fn raw(&self) -> String {
        self.table.rows[self.index].join(";")
    }
}

// =============================================================================
// Per-entity validation
// =============================================================================

fn validate_rows<T>(
    table: &Table,
    entity: EntityType,
    mut build: impl FnMut(&Row) -> Result<T, String>,
) -> (Vec<T>, Vec<RowError>) {
    let mut records = Vec::new();
    let mut rejects = Vec::new();

    for index in 0..table.rows.len() {
        let row = Row { table, entity, index };
        match build(&row) {
            Ok(record) => records.push(record),
            Err(reason) => rejects.push(RowError {
                row: index + 1,
                reason,
                raw: row.raw(),
            }),
        }
    }

    println!(
        "Validation complete for {}: {} valid, {} invalid out of {} rows",
        entity.as_str(),
        records.len(),
        rejects.len(),
        table.rows.len()
    );

    (records, rejects)
}

pub fn validate_propostas(table: &Table) -> (Vec<Proposta>, Vec<RowError>) {
    validate_rows(table, EntityType::Propostas, |row| {
        Ok(Proposta {
            transfer_gov_id: natural_key(row.get("transfer_gov_id"))?,
            titulo: opt_text(row.get("titulo")),
            valor_global: non_negative(parse_money(row.get("valor_global"))?, "valor_global")?,
            valor_repasse: non_negative(parse_money(row.get("valor_repasse"))?, "valor_repasse")?,
            valor_contrapartida: non_negative(
                parse_money(row.get("valor_contrapartida"))?,
                "valor_contrapartida",
            )?,
            data_publicacao: parse_date(row.get("data_publicacao"))?,
            data_inicio_vigencia: parse_date(row.get("data_inicio_vigencia"))?,
            data_fim_vigencia: parse_date(row.get("data_fim_vigencia"))?,
            situacao: opt_text(row.get("situacao")),
            estado: parse_estado(row.get("estado"))?,
            municipio: opt_text(row.get("municipio")),
            proponente: opt_text(row.get("proponente")),
            programa_id: opt_text(row.get("programa_id")),
            proponente_cnpj: None,
        })
    })
}

pub fn validate_apoiadores(table: &Table) -> (Vec<Apoiador>, Vec<RowError>) {
    validate_rows(table, EntityType::Apoiadores, |row| {
        Ok(Apoiador {
            transfer_gov_id: natural_key(row.get("transfer_gov_id"))?,
            nome: opt_text(row.get("nome")),
            tipo: opt_text(row.get("tipo")),
            orgao: opt_text(row.get("orgao")),
        })
    })
}

pub fn validate_emendas(table: &Table) -> (Vec<Emenda>, Vec<RowError>) {
    validate_rows(table, EntityType::Emendas, |row| {
        Ok(Emenda {
            transfer_gov_id: natural_key(row.get("transfer_gov_id"))?,
            numero: opt_text(row.get("numero")),
            autor: opt_text(row.get("autor")),
            valor: non_negative(parse_money(row.get("valor"))?, "valor")?,
            tipo: opt_text(row.get("tipo")),
            ano: parse_ano(row.get("ano"))?,
        })
    })
}

pub fn validate_programas(table: &Table) -> (Vec<Programa>, Vec<RowError>) {
    validate_rows(table, EntityType::Programas, |row| {
        Ok(Programa {
            transfer_gov_id: natural_key(row.get("transfer_gov_id"))?,
            nome: opt_text(row.get("nome")),
            orgao_superior: opt_text(row.get("orgao_superior")),
            orgao_vinculado: opt_text(row.get("orgao_vinculado")),
            modalidade: opt_text(row.get("modalidade")),
            acao_orcamentaria: opt_text(row.get("acao_orcamentaria")),
            natureza_juridica: opt_text(row.get("natureza_juridica")),
        })
    })
}
