use std::collections::HashSet;
use std::fs::{self, OpenOptions};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::error::GeneReportError;
use crate::table::Table;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Data(T),
    Empty,
}

impl<T> Outcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Outcome::Data(value) => Some(value),
            Outcome::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Outcome::Empty)
    }
}

#[derive(Debug)]
pub struct StagingFile {
    path: Utf8PathBuf,
    header: Option<Vec<String>>,
}

impl StagingFile {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self { path, header: None }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn append(&mut self, table: &Table) -> Result<(), GeneReportError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| GeneReportError::Filesystem(format!("create {parent}: {err}")))?;
            }
        }
        // the first batch of a run replaces whatever an earlier run left under this name
        let first = self.header.is_none();
        if first && self.path.as_std_path().exists() {
            warn!(path = %self.path, "replacing existing staging file");
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(first)
            .append(!first)
            .open(self.path.as_std_path())
            .map_err(|err| GeneReportError::Filesystem(format!("open {}: {err}", self.path)))?;

        match &self.header {
            None => {
                table.write_to(file, true)?;
                self.header = Some(table.columns().to_vec());
            }
            Some(header) => {
                let names: Vec<&str> = header.iter().map(String::as_str).collect();
                table.reindex(&names).write_to(file, false)?;
            }
        }
        Ok(())
    }
}

pub fn fetch_all<F>(
    label: &str,
    ids: &[String],
    batch_size: usize,
    stage: &mut StagingFile,
    mut fetch: F,
) -> Result<Outcome<Table>, GeneReportError>
where
    F: FnMut(&[String]) -> Result<Outcome<Table>, GeneReportError>,
{
    if batch_size == 0 {
        return Err(GeneReportError::InvalidConfig(
            "batch size must be greater than zero".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let unique: Vec<String> = ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();

    let mut combined: Option<Table> = None;
    for (batch_idx, chunk) in unique.chunks(batch_size).enumerate() {
        let start = batch_idx * batch_size;
        info!(
            "{label}: processing {}-{} of {}",
            start + 1,
            start + chunk.len(),
            unique.len()
        );
        match fetch(chunk)? {
            Outcome::Data(table) => {
                stage.append(&table)?;
                match combined.as_mut() {
                    Some(all) => all.append(table),
                    None => combined = Some(table),
                }
            }
            Outcome::Empty => {
                warn!("{label}: no data for ids {}-{}", start + 1, start + chunk.len());
            }
        }
    }

    match combined {
        Some(table) => {
            info!(path = %stage.path(), rows = table.len(), "{label}: staged results");
            Ok(Outcome::Data(table))
        }
        None => {
            warn!("{label}: found no information for {} ids", unique.len());
            Ok(Outcome::Empty)
        }
    }
}
