use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};

use crate::error::GeneReportError;

// missing values only become "" when written or reshaped
pub type Cell = Option<String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Cell>>,
    ) -> Result<Self, GeneReportError> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    fn require_column(&self, name: &str) -> Result<usize, GeneReportError> {
        self.column_index(name)
            .ok_or_else(|| GeneReportError::MissingColumn(name.to_string()))
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), GeneReportError> {
        if row.len() != self.columns.len() {
            return Err(GeneReportError::Csv(format!(
                "row has {} cells but table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    pub fn column_values(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[idx].as_deref()).collect())
    }

    pub fn distinct_values(&self, name: &str) -> Vec<String> {
        let Some(values) = self.column_values(name) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut distinct = Vec::new();
        for value in values.into_iter().flatten() {
            let value = value.trim();
            if !value.is_empty() && seen.insert(value.to_string()) {
                distinct.push(value.to_string());
            }
        }
        distinct
    }

    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) -> Result<(), GeneReportError> {
        if values.len() != self.rows.len() {
            return Err(GeneReportError::Csv(format!(
                "column {name} has {} values but table has {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&idx| !names.contains(&self.columns[idx].as_str()))
            .collect();
        if keep.len() == self.columns.len() {
            return;
        }
        self.columns = keep.iter().map(|&idx| self.columns[idx].clone()).collect();
        for row in &mut self.rows {
            let old = std::mem::take(row);
            *row = keep.iter().map(|&idx| old[idx].clone()).collect();
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        match self.column_index(from) {
            Some(idx) => {
                self.columns[idx] = to.to_string();
                true
            }
            None => false,
        }
    }

    pub fn reindex(&self, columns: &[&str]) -> Table {
        let indices: Vec<Option<usize>> =
            columns.iter().map(|name| self.column_index(name)).collect();
        Table {
            columns: columns.iter().map(|name| name.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| {
                    indices
                        .iter()
                        .map(|idx| idx.and_then(|idx| row[idx].clone()))
                        .collect()
                })
                .collect(),
        }
    }

    pub fn append(&mut self, other: Table) {
        for column in &other.columns {
            if !self.has_column(column) {
                self.columns.push(column.clone());
                for row in &mut self.rows {
                    row.push(None);
                }
            }
        }
        let names: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        let aligned = other.reindex(&names);
        self.rows.extend(aligned.rows);
    }

    pub fn left_join(&self, right: &Table, on: &[&str]) -> Result<Table, GeneReportError> {
        let left_keys = on
            .iter()
            .map(|name| self.require_column(name))
            .collect::<Result<Vec<_>, _>>()?;
        let right_keys = on
            .iter()
            .map(|name| right.require_column(name))
            .collect::<Result<Vec<_>, _>>()?;
        let right_extra: Vec<usize> = (0..right.columns.len())
            .filter(|idx| !right_keys.contains(idx))
            .collect();

        let mut index: HashMap<Vec<&str>, Vec<usize>> = HashMap::new();
        for (row_idx, row) in right.rows.iter().enumerate() {
            if let Some(key) = join_key(row, &right_keys) {
                index.entry(key).or_default().push(row_idx);
            }
        }

        let mut columns = self.columns.clone();
        columns.extend(right_extra.iter().map(|&idx| right.columns[idx].clone()));
        let mut joined = Table::new(columns);
        for row in &self.rows {
            let matches = join_key(row, &left_keys).and_then(|key| index.get(&key));
            match matches {
                Some(matches) => {
                    for &right_idx in matches {
                        let mut out = row.clone();
                        out.extend(
                            right_extra
                                .iter()
                                .map(|&idx| right.rows[right_idx][idx].clone()),
                        );
                        joined.rows.push(out);
                    }
                }
                None => {
                    let mut out = row.clone();
                    out.extend(std::iter::repeat_n(None, right_extra.len()));
                    joined.rows.push(out);
                }
            }
        }
        Ok(joined)
    }

    pub fn from_delimited(text: &str, delimiter: u8) -> Result<Table, GeneReportError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .quoting(false)
            .flexible(true)
            .from_reader(text.as_bytes());
        Self::read_records(&mut reader)
    }

    pub fn read_csv(path: &Path) -> Result<Table, GeneReportError> {
        let file = File::open(path)
            .map_err(|err| GeneReportError::Filesystem(format!("open {}: {err}", path.display())))?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        Self::read_records(&mut reader)
    }

    fn read_records<R: io::Read>(reader: &mut csv::Reader<R>) -> Result<Table, GeneReportError> {
        let headers = reader.headers()?.clone();
        let mut table = Table::new(headers.iter().map(str::trim));
        let width = table.columns.len();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<Cell> = record
                .iter()
                .take(width)
                .map(|field| (!field.is_empty()).then(|| field.to_string()))
                .collect();
            row.resize(width, None);
            table.rows.push(row);
        }
        Ok(table)
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), GeneReportError> {
        let file = File::create(path).map_err(|err| {
            GeneReportError::Filesystem(format!("create {}: {err}", path.display()))
        })?;
        self.write_to(file, true)
    }

    pub fn write_to<W: io::Write>(&self, writer: W, include_header: bool) -> Result<(), GeneReportError> {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(writer);
        if include_header {
            writer.write_record(&self.columns)?;
        }
        for row in &self.rows {
            let record: StringRecord = row
                .iter()
                .map(|cell| cell.as_deref().unwrap_or(""))
                .collect();
            writer.write_record(&record)?;
        }
        writer
            .flush()
            .map_err(|err| GeneReportError::Filesystem(err.to_string()))
    }
}

fn join_key<'a>(row: &'a [Cell], keys: &[usize]) -> Option<Vec<&'a str>> {
    keys.iter().map(|&idx| row[idx].as_deref()).collect()
}

pub fn project(table: &Table, wanted: &[&str]) -> (Table, Vec<String>) {
    if wanted.is_empty() {
        return (table.clone(), Vec::new());
    }
    let unknown = wanted
        .iter()
        .filter(|name| !table.has_column(name))
        .map(|name| name.to_string())
        .collect();
    let drop: Vec<&str> = table
        .columns
        .iter()
        .map(String::as_str)
        .filter(|column| !wanted.contains(column))
        .collect();
    let mut projected = table.clone();
    projected.drop_columns(&drop);
    (projected, unknown)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn cells(values: &[&str]) -> Vec<Cell> {
        values
            .iter()
            .map(|value| (!value.is_empty()).then(|| value.to_string()))
            .collect()
    }

    fn genes() -> Table {
        Table::from_rows(
            ["name", "gi", "organism"],
            vec![
                cells(&["lacZ", "100", "E. coli"]),
                cells(&["recA", "200", "E. coli"]),
                cells(&["orphan", "", "B. subtilis"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn left_join_keeps_unmatched_and_multiplies_matches() {
        let hits = Table::from_rows(
            ["gi", "accession"],
            vec![cells(&["100", "cd1"]), cells(&["100", "cd2"])],
        )
        .unwrap();
        let joined = genes().left_join(&hits, &["gi"]).unwrap();
        assert_eq!(joined.columns(), ["name", "gi", "organism", "accession"]);
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.get(0, "accession"), Some("cd1"));
        assert_eq!(joined.get(1, "accession"), Some("cd2"));
        assert_eq!(joined.get(2, "name"), Some("recA"));
        assert_eq!(joined.get(2, "accession"), None);
        assert_eq!(joined.get(3, "accession"), None);
    }

    #[test]
    fn left_join_requires_key_columns() {
        let other = Table::new(["accession"]);
        let err = genes().left_join(&other, &["gi"]).unwrap_err();
        assert_matches!(err, GeneReportError::MissingColumn(name) if name == "gi");
    }

    #[test]
    fn append_unions_columns() {
        let mut table = genes();
        let extra = Table::from_rows(["name", "locus_id"], vec![cells(&["dnaK", "7"])]).unwrap();
        table.append(extra);
        assert_eq!(table.columns(), ["name", "gi", "organism", "locus_id"]);
        assert_eq!(table.len(), 4);
        assert_eq!(table.get(0, "locus_id"), None);
        assert_eq!(table.get(3, "locus_id"), Some("7"));
        assert_eq!(table.get(3, "gi"), None);
    }

    #[test]
    fn reindex_fills_missing_columns() {
        let table = genes().reindex(&["organism", "locus_id", "name"]);
        assert_eq!(table.columns(), ["organism", "locus_id", "name"]);
        assert_eq!(table.get(1, "name"), Some("recA"));
        assert_eq!(table.get(1, "locus_id"), None);
    }

    #[test]
    fn distinct_values_skip_blank() {
        let table = genes();
        assert_eq!(table.distinct_values("gi"), vec!["100", "200"]);
        assert_eq!(table.distinct_values("organism"), vec!["E. coli", "B. subtilis"]);
        assert!(table.distinct_values("nope").is_empty());
    }

    #[test]
    fn parse_tab_delimited_block() {
        let text = "Query\tAccession\tE-Value\nQ#1 - 100\tcd1\t1e-10\nQ#2 - 200\tcd2\t\n";
        let table = Table::from_delimited(text, b'\t').unwrap();
        assert_eq!(table.columns(), ["Query", "Accession", "E-Value"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1, "E-Value"), None);
    }

    #[test]
    fn csv_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        let table = Table::from_rows(
            ["name", "gene_description"],
            vec![cells(&["lacZ", "beta-galactosidase, \"LacZ\""]), cells(&["recA", ""])],
        )
        .unwrap();
        table.write_csv(&path).unwrap();
        assert_eq!(Table::read_csv(&path).unwrap(), table);
    }

    #[test]
    fn project_reports_unknown_names() {
        let (projected, unknown) = project(&genes(), &["name", "gi", "go_id"]);
        assert_eq!(projected.columns(), ["name", "gi"]);
        assert_eq!(unknown, vec!["go_id"]);
        assert_eq!(projected.get(1, "gi"), Some("200"));
    }

    #[test]
    fn project_onto_own_columns_is_identity() {
        let table = genes();
        let names: Vec<&str> = table.columns().iter().map(String::as_str).collect();
        let (projected, unknown) = project(&table, &names);
        assert_eq!(projected, table);
        assert!(unknown.is_empty());
    }
}
