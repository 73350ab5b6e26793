use std::collections::{BTreeSet, HashSet};
use std::thread;

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row};
use tokio::runtime::Runtime;
use tracing::{info, warn};

use crate::config::DatabaseSettings;
use crate::error::GeneReportError;
use crate::table::{Cell, Table};

const GENE_QUERY: &str = include_str!("queries/gene_annotations.sql");
const GENE_LIST_TOKEN: &str = "{gene_list}";

pub const SYNONYM_COLUMNS: [(&str, &str); 3] = [
    ("GI", "gi"),
    ("NCBI accession number", "ncbi_accession_number"),
    ("NCBI GeneID", "ncbi_gene_id"),
];

pub trait GeneDatabase {
    fn fetch_genes(&self, names: &[String]) -> Result<Table, GeneReportError>;
}

pub struct MicrobesOnlineClient {
    runtime: Runtime,
    pool: MySqlPool,
}

impl MicrobesOnlineClient {
    pub fn connect(settings: &DatabaseSettings) -> Result<Self, GeneReportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| GeneReportError::Database(err.to_string()))?;
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.database);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let connected = runtime.block_on(
                MySqlPoolOptions::new()
                    .max_connections(1)
                    .connect_with(options.clone()),
            );
            match connected {
                Ok(pool) => {
                    info!(host = %settings.host, "connected to MicrobesOnline");
                    return Ok(Self { runtime, pool });
                }
                Err(err) if attempt >= settings.connect_retries => {
                    return Err(GeneReportError::DatabaseUnavailable {
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    let wait = settings.backoff(attempt);
                    warn!(
                        attempt,
                        wait_secs = wait.as_secs(),
                        error = %err,
                        "MicrobesOnline connection failed, waiting before reconnecting"
                    );
                    thread::sleep(wait);
                }
            }
        }
    }
}

impl GeneDatabase for MicrobesOnlineClient {
    fn fetch_genes(&self, names: &[String]) -> Result<Table, GeneReportError> {
        if names.is_empty() {
            return Ok(Table::default());
        }
        let sql = build_query(names.len());
        let rows = self.runtime.block_on(async {
            let mut query = sqlx::query(&sql);
            for name in names {
                query = query.bind(name.as_str());
            }
            query.fetch_all(&self.pool).await
        });
        let rows = rows.map_err(|err| GeneReportError::Database(err.to_string()))?;
        rows_to_table(&rows)
    }
}

pub fn build_query(gene_count: usize) -> String {
    let placeholders = vec!["?"; gene_count].join(", ");
    GENE_QUERY.replace(GENE_LIST_TOKEN, &placeholders)
}

fn rows_to_table(rows: &[MySqlRow]) -> Result<Table, GeneReportError> {
    let Some(first) = rows.first() else {
        return Ok(Table::default());
    };
    let names: Vec<String> = first
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();
    let mut table = Table::new(names.iter().cloned());
    let mut undecodable = BTreeSet::new();
    for row in rows {
        let decoded = (0..row.columns().len()).map(|idx| text_cell(row, idx)).collect();
        table.push_row(collect_cells(&names, decoded, &mut undecodable))?;
    }
    if !undecodable.is_empty() {
        let columns: Vec<&str> = undecodable.iter().map(String::as_str).collect();
        warn!(
            columns = %columns.join(", "),
            "MicrobesOnline columns could not be read as text, left empty"
        );
    }
    Ok(table)
}

// `None` marks a cell whose column type has no text form.
fn text_cell(row: &MySqlRow, idx: usize) -> Option<Cell> {
    if let Ok(value) = row.try_get::<Option<String>, _>(idx) {
        return Some(value);
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(idx) {
        return Some(value.map(|value| value.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<u64>, _>(idx) {
        return Some(value.map(|value| value.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(idx) {
        return Some(value.map(|value| value.to_string()));
    }
    // binary collations come back as blobs
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .map(|bytes| bytes.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}

fn collect_cells(
    names: &[String],
    decoded: Vec<Option<Cell>>,
    undecodable: &mut BTreeSet<String>,
) -> Vec<Cell> {
    decoded
        .into_iter()
        .zip(names)
        .map(|(cell, name)| {
            cell.unwrap_or_else(|| {
                undecodable.insert(name.clone());
                None
            })
        })
        .collect()
}

pub fn expand_synonyms(raw: &Table) -> Result<Table, GeneReportError> {
    if !raw.has_column("synonym") || !raw.has_column("synonym_description") {
        warn!("gene rows carry no synonym columns, identifier columns left empty");
        return Ok(raw.clone());
    }

    let mut table = raw.clone();
    for (description, column) in SYNONYM_COLUMNS {
        let pairs = synonym_pairs(raw, description, column)?;
        table = table.left_join(&pairs, &["name"])?;
    }
    table.drop_columns(&["synonym", "synonym_description"]);
    Ok(table)
}

fn synonym_pairs(raw: &Table, description: &str, column: &str) -> Result<Table, GeneReportError> {
    let names = raw
        .column_values("name")
        .ok_or_else(|| GeneReportError::MissingColumn("name".to_string()))?;
    let synonyms = raw.column_values("synonym").unwrap_or_default();
    let kinds = raw.column_values("synonym_description").unwrap_or_default();

    let mut seen = HashSet::new();
    let mut pairs = Table::new(["name", column]);
    for ((name, synonym), kind) in names.into_iter().zip(synonyms).zip(kinds) {
        if kind != Some(description) {
            continue;
        }
        if let (Some(name), Some(synonym)) = (name, synonym) {
            if seen.insert((name, synonym)) {
                pairs.push_row(vec![Some(name.to_string()), Some(synonym.to_string())])?;
            }
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<Cell> {
        values
            .iter()
            .map(|value| (!value.is_empty()).then(|| value.to_string()))
            .collect()
    }

    #[test]
    fn undecodable_cells_are_recorded_by_column() {
        let names = vec!["name".to_string(), "locus_id".to_string(), "geom".to_string()];
        let mut undecodable = BTreeSet::new();
        let cells = collect_cells(
            &names,
            vec![Some(Some("lacZ".to_string())), Some(None), None],
            &mut undecodable,
        );
        assert_eq!(cells, vec![Some("lacZ".to_string()), None, None]);
        assert_eq!(undecodable.into_iter().collect::<Vec<_>>(), vec!["geom"]);
    }

    #[test]
    fn query_has_one_placeholder_per_gene() {
        let sql = build_query(3);
        assert!(sql.contains("IN (?, ?, ?)"));
        assert!(!sql.contains(GENE_LIST_TOKEN));
    }

    #[test]
    fn synonyms_become_identifier_columns() {
        let raw = Table::from_rows(
            ["name", "organism", "synonym", "synonym_description"],
            vec![
                cells(&["lacZ", "E. coli", "16128324", "GI"]),
                cells(&["lacZ", "E. coli", "NP_414878.1", "NCBI accession number"]),
                cells(&["lacZ", "E. coli", "945006", "NCBI GeneID"]),
                cells(&["recA", "E. coli", "b2699", "Locus tag"]),
            ],
        )
        .unwrap();
        let table = expand_synonyms(&raw).unwrap();
        assert_eq!(
            table.columns(),
            ["name", "organism", "gi", "ncbi_accession_number", "ncbi_gene_id"]
        );
        assert_eq!(table.len(), 4);
        for row in 0..3 {
            assert_eq!(table.get(row, "gi"), Some("16128324"));
            assert_eq!(table.get(row, "ncbi_accession_number"), Some("NP_414878.1"));
            assert_eq!(table.get(row, "ncbi_gene_id"), Some("945006"));
        }
        assert_eq!(table.get(3, "name"), Some("recA"));
        assert_eq!(table.get(3, "gi"), None);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let settings = DatabaseSettings {
            retry_base: std::time::Duration::from_secs(60),
            ..DatabaseSettings::default()
        };
        assert_eq!(settings.backoff(1).as_secs(), 62);
        assert_eq!(settings.backoff(3).as_secs(), 68);
    }
}
