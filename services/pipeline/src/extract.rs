//! Entity and relationship extraction from denormalized sources.
//!
//! Two extractors live here:
//! - `extract_relationships` decomposes the apoiadores/emendas join file
//!   (one row per proposta-apoiador-emenda tuple) into deduplicated entity
//!   sets plus junction edges and proposta->programa links.
//! - `extract_proponentes` derives the proponent dimension from raw
//!   proposta rows, keyed by normalized CNPJ.

use sha2::{Digest, Sha256};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::load::ValidatedData;
use crate::parse::{find_raw_column, Table};
use crate::validate::{
    parse_money, Apoiador, Emenda, Proponente, Proposta, PropostaApoiador, PropostaEmenda,
};

// Raw headers specific to the denormalized join export. These never occur
// in the plain per-entity files, which is what makes routing reliable.
const JOIN_PROPOSTA_COLUMNS: &[&str] = &[
    "id_cnpj_programa_emenda_apoiadores_emendas",
    "id_proposta_apoiadores_emendas",
];
const JOIN_EMENDA_NUMERO_COLUMNS: &[&str] = &["numero_emenda_apoiadores_emendas", "numero_emenda"];
const JOIN_PARLAMENTAR_COLUMNS: &[&str] =
    &["nome_parlamentar_apoiadores_emendas", "nome_parlamentar"];
const JOIN_PROGRAMA_COLUMNS: &[&str] = &["id_programa"];
const JOIN_TIPO_COLUMNS: &[&str] = &["indicacao_apoiadores_emendas", "indicacao"];
const JOIN_ORGAO_COLUMNS: &[&str] = &["nome_proponente_apoiadores_emendas", "nome_proponente"];
const JOIN_VALOR_COLUMNS: &[&str] = &[
    "valor_repasse_proposta_apoiadores_emendas",
    "valor_repasse_emenda",
];

/// Whether a parsed table is the denormalized join export rather than a
/// plain per-entity file.
pub fn is_relationship_table(table: &Table) -> bool {
    find_raw_column(table, JOIN_PROPOSTA_COLUMNS).is_some()
        && (find_raw_column(table, JOIN_EMENDA_NUMERO_COLUMNS).is_some()
            || find_raw_column(table, JOIN_PARLAMENTAR_COLUMNS).is_some())
}

/// Stable synthetic key for a supporter: supporters have no id in the
/// source, only a name, so the key is a hash of the trimmed name.
pub fn apoiador_key(nome: &str) -> String {
    let digest = Sha256::digest(nome.trim().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// Decompose the join file into `data`. For each row:
/// - the supporter name (hashed) and amendment number become entity records,
///   first occurrence winning the descriptive fields;
/// - a (proposta, apoiador) and a (proposta, emenda) edge accumulate in
///   sets, so duplicate rows only ever produce one junction record;
/// - a proposta->programa link is recorded if not already present.
pub fn extract_relationships(
    raw: &Table,
    data: &mut ValidatedData,
    programa_links: &mut BTreeMap<String, String>,
) {
    let proposta_col = match find_raw_column(raw, JOIN_PROPOSTA_COLUMNS) {
        Some(col) => col,
        None => {
            eprintln!("Warning: could not find proposta ID column in relationship file");
            return;
        }
    };
    let emenda_num_col = find_raw_column(raw, JOIN_EMENDA_NUMERO_COLUMNS);
    let parlamentar_col = find_raw_column(raw, JOIN_PARLAMENTAR_COLUMNS);
    let programa_col = find_raw_column(raw, JOIN_PROGRAMA_COLUMNS);
    let tipo_col = find_raw_column(raw, JOIN_TIPO_COLUMNS);
    let orgao_col = find_raw_column(raw, JOIN_ORGAO_COLUMNS);
    let valor_col = find_raw_column(raw, JOIN_VALOR_COLUMNS);

    let mut seen_apoiadores: BTreeMap<String, Apoiador> = BTreeMap::new();
    let mut seen_emendas: BTreeMap<String, Emenda> = BTreeMap::new();
    let mut junction_apoiadores: BTreeSet<PropostaApoiador> = BTreeSet::new();
    let mut junction_emendas: BTreeSet<PropostaEmenda> = BTreeSet::new();

    let field = |row: usize, col: Option<usize>| col.map(|c| raw.value(row, c).trim()).unwrap_or("");

    for row in 0..raw.rows.len() {
        let proposta_id = raw.value(row, proposta_col).trim();
        if proposta_id.is_empty() {
            continue;
        }

        if let Some(col) = programa_col {
            let programa_id = raw.value(row, col).trim();
            if !programa_id.is_empty() {
                programa_links
                    .entry(proposta_id.to_string())
                    .or_insert_with(|| programa_id.to_string());
            }
        }

        let nome = field(row, parlamentar_col);
        if !nome.is_empty() {
            let apoiador_id = apoiador_key(nome);
            seen_apoiadores
                .entry(apoiador_id.clone())
                .or_insert_with(|| Apoiador {
                    transfer_gov_id: apoiador_id.clone(),
                    nome: Some(nome.to_string()),
                    tipo: non_empty(field(row, tipo_col)),
                    orgao: non_empty(field(row, orgao_col)),
                });
            junction_apoiadores.insert(PropostaApoiador {
                proposta_transfer_gov_id: proposta_id.to_string(),
                apoiador_transfer_gov_id: apoiador_id,
            });
        }

        let numero = field(row, emenda_num_col);
        if !numero.is_empty() {
            // numero_emenda is already unique in the source
            seen_emendas
                .entry(numero.to_string())
                .or_insert_with(|| Emenda {
                    transfer_gov_id: numero.to_string(),
                    numero: Some(numero.to_string()),
                    autor: non_empty(nome),
                    valor: parse_money(field(row, valor_col)).ok().flatten(),
                    tipo: non_empty(field(row, tipo_col)),
                    ano: None,
                });
            junction_emendas.insert(PropostaEmenda {
                proposta_transfer_gov_id: proposta_id.to_string(),
                emenda_transfer_gov_id: numero.to_string(),
            });
        }
    }

    println!(
        "Extracted relationships: {} apoiadores, {} emendas, {} proposta_apoiadores, {} proposta_emendas, {} programa links",
        seen_apoiadores.len(),
        seen_emendas.len(),
        junction_apoiadores.len(),
        junction_emendas.len(),
        programa_links.len()
    );

    data.apoiadores.extend(seen_apoiadores.into_values());
    data.emendas.extend(seen_emendas.into_values());
    data.proposta_apoiadores.extend(junction_apoiadores);
    data.proposta_emendas.extend(junction_emendas);
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

// =============================================================================
// Proponentes
// =============================================================================

const CNPJ_COLUMNS: &[&str] = &["identif_proponente", "cnpj_proponente", "cnpj"];
const PROPONENTE_NOME_COLUMNS: &[&str] = &["nm_proponente", "nome_proponente", "proponente"];
const NATUREZA_COLUMNS: &[&str] = &["natureza_juridica_proponente", "natureza_juridica"];
const PROPONENTE_UF_COLUMNS: &[&str] = &["uf_proponente", "uf", "estado"];
const PROPONENTE_MUNICIPIO_COLUMNS: &[&str] =
    &["munic_proponente", "municipio_proponente", "municipio"];
const ENDERECO_COLUMNS: &[&str] = &["endereco_proponente", "endereco"];
const CEP_COLUMNS: &[&str] = &["cep_proponente", "cep"];
const PROPOSTA_ID_COLUMNS: &[&str] = &["transfer_gov_id", "id_proposta"];

/// Normalize a CNPJ: strip everything but digits, left-pad to 14, reject
/// empty, overlong and all-zero values.
pub fn normalize_cnpj(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || digits.len() > 14 {
        return None;
    }
    let padded = format!("{:0>14}", digits);
    if padded.chars().all(|c| c == '0') {
        return None;
    }
    Some(padded)
}

/// Classification per the natureza-juridica convention: codes beginning
/// with 3 are private non-profit entities; free text is matched on the
/// marker phrase.
pub fn is_sem_fins_lucrativos(natureza: &str) -> bool {
    let t = natureza.trim();
    t.starts_with('3') || t.to_lowercase().contains("sem fins lucrativos")
}

/// Derive the proponent dimension from raw proposta rows. The first row
/// per CNPJ creates the record; later rows only bump the proposal count.
/// Validated proposta records get `proponente_cnpj` back-filled.
pub fn extract_proponentes(propostas: &mut [Proposta], raw: &Table) -> Vec<Proponente> {
    let cnpj_col = match find_raw_column(raw, CNPJ_COLUMNS) {
        Some(col) => col,
        None => {
            println!("No proponent CNPJ column found; skipping proponent extraction");
            return Vec::new();
        }
    };
    let nome_col = find_raw_column(raw, PROPONENTE_NOME_COLUMNS);
    let natureza_col = find_raw_column(raw, NATUREZA_COLUMNS);
    let uf_col = find_raw_column(raw, PROPONENTE_UF_COLUMNS);
    let municipio_col = find_raw_column(raw, PROPONENTE_MUNICIPIO_COLUMNS);
    let endereco_col = find_raw_column(raw, ENDERECO_COLUMNS);
    let cep_col = find_raw_column(raw, CEP_COLUMNS);
    let proposta_col = find_raw_column(raw, PROPOSTA_ID_COLUMNS);

    let field = |row: usize, col: Option<usize>| col.map(|c| raw.value(row, c).trim()).unwrap_or("");

    let mut seen: BTreeMap<String, Proponente> = BTreeMap::new();
    let mut cnpj_by_proposta: HashMap<String, String> = HashMap::new();

    for row in 0..raw.rows.len() {
        let cnpj = match normalize_cnpj(raw.value(row, cnpj_col)) {
            Some(cnpj) => cnpj,
            None => continue,
        };

        let proposta_id = field(row, proposta_col);
        if !proposta_id.is_empty() {
            cnpj_by_proposta
                .entry(proposta_id.to_string())
                .or_insert_with(|| cnpj.clone());
        }

        match seen.entry(cnpj.clone()) {
            Entry::Occupied(mut existing) => existing.get_mut().total_propostas += 1,
            Entry::Vacant(slot) => {
                let natureza = field(row, natureza_col);
                slot.insert(Proponente {
                    cnpj,
                    nome: non_empty(field(row, nome_col)),
                    natureza_juridica: non_empty(natureza),
                    sem_fins_lucrativos: is_sem_fins_lucrativos(natureza),
                    estado: non_empty(field(row, uf_col)),
                    municipio: non_empty(field(row, municipio_col)),
                    endereco: non_empty(field(row, endereco_col)),
                    cep: non_empty(field(row, cep_col)),
                    total_propostas: 1,
                    total_emendas: 0,
                    total_valor_emendas: 0.0,
                });
            }
        }
    }

    for proposta in propostas.iter_mut() {
        if let Some(cnpj) = cnpj_by_proposta.get(&proposta.transfer_gov_id) {
            proposta.proponente_cnpj = Some(cnpj.clone());
        }
    }

    println!("Extracted {} proponentes", seen.len());
    seen.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
        Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|f| f.to_string()).collect())
                .collect(),
        }
    }

    fn join_table(rows: &[&[&str]]) -> Table {
        table(
            &[
                "ID_CNPJ_PROGRAMA_EMENDA_APOIADORES_EMENDAS",
                "NUMERO_EMENDA_APOIADORES_EMENDAS",
                "NOME_PARLAMENTAR_APOIADORES_EMENDAS",
                "ID_PROGRAMA",
                "INDICACAO_APOIADORES_EMENDAS",
                "NOME_PROPONENTE_APOIADORES_EMENDAS",
                "VALOR_REPASSE_PROPOSTA_APOIADORES_EMENDAS",
            ],
            rows,
        )
    }

    // -------------------------------------------------------------------------
    // ROUTING
    // -------------------------------------------------------------------------

    #[test]
    fn test_join_table_detected() {
        let t = join_table(&[]);
        assert!(is_relationship_table(&t));
    }

    #[test]
    fn test_plain_apoiadores_table_not_detected() {
        let t = table(&["transfer_gov_id", "nome", "tipo", "orgao"], &[]);
        assert!(!is_relationship_table(&t));
    }

    #[test]
    fn test_plain_emendas_table_not_detected() {
        let t = table(&["transfer_gov_id", "numero", "autor", "valor", "ano"], &[]);
        assert!(!is_relationship_table(&t));
    }

    // -------------------------------------------------------------------------
    // RELATIONSHIP EXTRACTION
    // -------------------------------------------------------------------------

    #[test]
    fn test_extract_dedups_supporter_keeps_all_emendas() {
        // 3 rows, same supporter and proposta, different amendment numbers.
        let t = join_table(&[
            &["P1", "E100", "Dep. Silva", "PG1", "Impositiva", "Prefeitura", "1000"],
            &["P1", "E101", "Dep. Silva", "PG1", "Impositiva", "Prefeitura", "2000"],
            &["P1", "E102", "Dep. Silva", "PG1", "Impositiva", "Prefeitura", "3000"],
        ]);
        let mut data = ValidatedData::default();
        let mut links = BTreeMap::new();
        extract_relationships(&t, &mut data, &mut links);

        assert_eq!(data.apoiadores.len(), 1);
        assert_eq!(data.emendas.len(), 3);
        assert_eq!(data.proposta_apoiadores.len(), 1);
        assert_eq!(data.proposta_emendas.len(), 3);
        assert_eq!(data.apoiadores[0].nome.as_deref(), Some("Dep. Silva"));
    }

    #[test]
    fn test_extract_duplicate_rows_single_edge() {
        let t = join_table(&[
            &["P1", "E100", "Dep. Silva", "", "", "", "1000"],
            &["P1", "E100", "Dep. Silva", "", "", "", "1000"],
        ]);
        let mut data = ValidatedData::default();
        let mut links = BTreeMap::new();
        extract_relationships(&t, &mut data, &mut links);

        assert_eq!(data.apoiadores.len(), 1);
        assert_eq!(data.emendas.len(), 1);
        assert_eq!(data.proposta_apoiadores.len(), 1);
        assert_eq!(data.proposta_emendas.len(), 1);
    }

    #[test]
    fn test_extract_first_occurrence_wins_descriptive_fields() {
        let t = join_table(&[
            &["P1", "E100", "Dep. Silva", "", "Impositiva", "Orgao A", "1000"],
            &["P2", "E101", "Dep. Silva", "", "Bancada", "Orgao B", "2000"],
        ]);
        let mut data = ValidatedData::default();
        let mut links = BTreeMap::new();
        extract_relationships(&t, &mut data, &mut links);

        assert_eq!(data.apoiadores.len(), 1);
        assert_eq!(data.apoiadores[0].tipo.as_deref(), Some("Impositiva"));
        assert_eq!(data.apoiadores[0].orgao.as_deref(), Some("Orgao A"));
        // The second row still contributed its junction edge.
        assert_eq!(data.proposta_apoiadores.len(), 2);
    }

    #[test]
    fn test_extract_programa_links_first_wins() {
        let t = join_table(&[
            &["P1", "E100", "Dep. Silva", "PG1", "", "", ""],
            &["P1", "E101", "Dep. Silva", "PG2", "", "", ""],
        ]);
        let mut data = ValidatedData::default();
        let mut links = BTreeMap::new();
        extract_relationships(&t, &mut data, &mut links);

        assert_eq!(links.get("P1").map(String::as_str), Some("PG1"));
    }

    #[test]
    fn test_extract_skips_rows_without_proposta_id() {
        let t = join_table(&[
            &["", "E100", "Dep. Silva", "", "", "", ""],
            &["P1", "E101", "Dep. Souza", "", "", "", ""],
        ]);
        let mut data = ValidatedData::default();
        let mut links = BTreeMap::new();
        extract_relationships(&t, &mut data, &mut links);

        assert_eq!(data.apoiadores.len(), 1);
        assert_eq!(data.emendas.len(), 1);
        assert_eq!(data.emendas[0].transfer_gov_id, "E101");
    }

    #[test]
    fn test_emenda_carries_autor_and_valor() {
        let t = join_table(&[&["P1", "E100", "Dep. Silva", "", "Impositiva", "", "1.500,00"]]);
        let mut data = ValidatedData::default();
        let mut links = BTreeMap::new();
        extract_relationships(&t, &mut data, &mut links);

        let emenda = &data.emendas[0];
        assert_eq!(emenda.autor.as_deref(), Some("Dep. Silva"));
        assert_eq!(emenda.valor, Some(1500.0));
        assert_eq!(emenda.tipo.as_deref(), Some("Impositiva"));
        assert_eq!(emenda.ano, None);
    }

    #[test]
    fn test_apoiador_key_stable_and_trimmed() {
        assert_eq!(apoiador_key("Dep. Silva"), apoiador_key("  Dep. Silva  "));
        assert_ne!(apoiador_key("Dep. Silva"), apoiador_key("Dep. Souza"));
        assert_eq!(apoiador_key("Dep. Silva").len(), 16);
    }

    // -------------------------------------------------------------------------
    // CNPJ NORMALIZATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_normalize_cnpj_formatted() {
        assert_eq!(
            normalize_cnpj("12.345.678/0001-99").as_deref(),
            Some("12345678000199")
        );
    }

    #[test]
    fn test_normalize_cnpj_pads_short_values() {
        assert_eq!(normalize_cnpj("123").as_deref(), Some("00000000000123"));
    }

    #[test]
    fn test_normalize_cnpj_rejects_zero_and_empty() {
        assert_eq!(normalize_cnpj("0"), None);
        assert_eq!(normalize_cnpj("00.000.000/0000-00"), None);
        assert_eq!(normalize_cnpj(""), None);
        assert_eq!(normalize_cnpj("sem cnpj"), None);
    }

    #[test]
    fn test_normalize_cnpj_rejects_overlong() {
        assert_eq!(normalize_cnpj("123456789012345"), None);
    }

    // -------------------------------------------------------------------------
    // NON-PROFIT CLASSIFICATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_sem_fins_lucrativos_by_code() {
        assert!(is_sem_fins_lucrativos("306-9 - Fundação Privada"));
        assert!(is_sem_fins_lucrativos("399-9"));
        assert!(!is_sem_fins_lucrativos("103-1 - Órgão Público"));
        assert!(!is_sem_fins_lucrativos("205-4 Sociedade Anônima"));
    }

    #[test]
    fn test_sem_fins_lucrativos_by_text() {
        assert!(is_sem_fins_lucrativos("Entidade Sem Fins Lucrativos"));
        assert!(is_sem_fins_lucrativos("associação sem fins lucrativos"));
        assert!(!is_sem_fins_lucrativos("Administração Pública Municipal"));
        assert!(!is_sem_fins_lucrativos(""));
    }

    // -------------------------------------------------------------------------
    // PROPONENT EXTRACTION
    // -------------------------------------------------------------------------

    fn proposta(id: &str) -> Proposta {
        Proposta {
            transfer_gov_id: id.to_string(),
            titulo: None,
            valor_global: None,
            valor_repasse: None,
            valor_contrapartida: None,
            data_publicacao: None,
            data_inicio_vigencia: None,
            data_fim_vigencia: None,
            situacao: None,
            estado: None,
            municipio: None,
            proponente: None,
            programa_id: None,
            proponente_cnpj: None,
        }
    }

    #[test]
    fn test_extract_proponentes_dedups_and_counts() {
        let raw = table(
            &[
                "transfer_gov_id",
                "IDENTIF_PROPONENTE",
                "NM_PROPONENTE",
                "NATUREZA_JURIDICA",
                "UF_PROPONENTE",
                "MUNIC_PROPONENTE",
            ],
            &[
                &["P1", "12.345.678/0001-99", "Prefeitura de Ouro Preto", "103-1", "MG", "Ouro Preto"],
                &["P2", "12345678000199", "Prefeitura de Ouro Preto", "103-1", "MG", "Ouro Preto"],
                &["P3", "98.765.432/0001-10", "Instituto Esperança", "306-9 - Fundação Privada", "SP", "Campinas"],
            ],
        );
        let mut propostas = vec![proposta("P1"), proposta("P2"), proposta("P3")];
        let proponentes = extract_proponentes(&mut propostas, &raw);

        assert_eq!(proponentes.len(), 2);
        let prefeitura = proponentes
            .iter()
            .find(|p| p.cnpj == "12345678000199")
            .unwrap();
        assert_eq!(prefeitura.total_propostas, 2);
        assert!(!prefeitura.sem_fins_lucrativos);
        assert_eq!(prefeitura.estado.as_deref(), Some("MG"));

        let instituto = proponentes
            .iter()
            .find(|p| p.cnpj == "98765432000110")
            .unwrap();
        assert_eq!(instituto.total_propostas, 1);
        assert!(instituto.sem_fins_lucrativos);

        // Back-filled onto the validated records.
        assert_eq!(propostas[0].proponente_cnpj.as_deref(), Some("12345678000199"));
        assert_eq!(propostas[2].proponente_cnpj.as_deref(), Some("98765432000110"));
    }

    #[test]
    fn test_extract_proponentes_skips_invalid_cnpj() {
        let raw = table(
            &["transfer_gov_id", "IDENTIF_PROPONENTE"],
            &[&["P1", "0"], &["P2", ""], &["P3", "11.222.333/0001-44"]],
        );
        let mut propostas = vec![proposta("P1"), proposta("P2"), proposta("P3")];
        let proponentes = extract_proponentes(&mut propostas, &raw);

        assert_eq!(proponentes.len(), 1);
        assert_eq!(proponentes[0].cnpj, "11222333000144");
        assert_eq!(propostas[0].proponente_cnpj, None);
        assert_eq!(propostas[1].proponente_cnpj, None);
    }

    #[test]
    fn test_extract_proponentes_without_cnpj_column() {
        let raw = table(&["transfer_gov_id", "objeto"], &[&["P1", "Obra"]]);
        let mut propostas = vec![proposta("P1")];
        let proponentes = extract_proponentes(&mut propostas, &raw);
        assert!(proponentes.is_empty());
    }
}
