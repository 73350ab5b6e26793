use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::warn;

use crate::batch::{Outcome, StagingFile, fetch_all};
use crate::cdd::{CddClient, describe_all};
use crate::config::ResolvedConfig;
use crate::domain::{CddAccession, Gi, REPORT_FIELDS, RunId};
use crate::error::GeneReportError;
use crate::microbes_online::{GeneDatabase, expand_synonyms};
use crate::reshape::reshape_annotations;
use crate::table::{Table, project};

pub const INTERPRO_ENTRY_URL: &str = "https://www.ebi.ac.uk/interpro/entry/";

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub gene_file: PathBuf,
    pub output: PathBuf,
    pub run_id: RunId,
    pub gene_stage: Option<PathBuf>,
    pub domain_stage: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub genes_requested: usize,
    pub gene_rows: usize,
    pub domain_hits: usize,
    pub descriptions: usize,
    pub report_rows: usize,
    pub output: String,
    pub gene_stage: Option<String>,
    pub domain_stage: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<G: GeneDatabase, C: CddClient> {
    config: ResolvedConfig,
    genes: G,
    cdd: C,
}

impl<G: GeneDatabase, C: CddClient> App<G, C> {
    pub fn new(config: ResolvedConfig, genes: G, cdd: C) -> Self {
        Self { config, genes, cdd }
    }

    pub fn run(
        &self,
        request: &RunRequest,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, GeneReportError> {
        let started = Instant::now();
        let names = read_gene_list(&request.gene_file)?;

        sink.event(ProgressEvent {
            message: format!("phase=Genes; {} gene names", names.len()),
            elapsed: None,
        });
        let phase = Instant::now();
        let (genes, gene_stage) = self.gene_table(request, &names)?;
        let mut table = match genes {
            Outcome::Data(table) => {
                let (table, unknown) = project(&table, &REPORT_FIELDS);
                if !unknown.is_empty() {
                    warn!("MicrobesOnline cannot filter: {}", unknown.join(", "));
                }
                table
            }
            Outcome::Empty => {
                warn!("no gene rows returned, report will have no rows");
                Table::new(REPORT_FIELDS)
            }
        };
        let gene_rows = table.len();
        sink.event(ProgressEvent {
            message: format!("phase=Genes; {gene_rows} rows"),
            elapsed: Some(phase.elapsed()),
        });

        let phase = Instant::now();
        canonicalize_gis(&mut table)?;
        add_interpro_links(&mut table)?;
        sink.event(ProgressEvent {
            message: "phase=Links; InterPro links created".to_string(),
            elapsed: Some(phase.elapsed()),
        });

        let phase = Instant::now();
        let (hits, domain_stage) = self.domain_hits(request, &table)?;
        let hits = hits
            .into_option()
            .map(|hits| {
                let (mut hits, unknown) = project(&hits, &REPORT_FIELDS);
                if !unknown.is_empty() {
                    warn!("conserved domains cannot filter: {}", unknown.join(", "));
                }
                canonicalize_gis(&mut hits)?;
                Ok::<_, GeneReportError>(hits)
            })
            .transpose()?;
        let domain_hits = hits.as_ref().map(Table::len).unwrap_or(0);
        sink.event(ProgressEvent {
            message: format!("phase=Domains; {domain_hits} hits"),
            elapsed: Some(phase.elapsed()),
        });

        let phase = Instant::now();
        let descriptions = match &hits {
            Some(hits) => Some(self.descriptions(hits)?),
            None => None,
        };
        let description_count = descriptions.as_ref().map(Table::len).unwrap_or(0);
        sink.event(ProgressEvent {
            message: format!("phase=Descriptions; {description_count} accessions"),
            elapsed: Some(phase.elapsed()),
        });

        let phase = Instant::now();
        let table = join_annotations(table, hits.as_ref(), descriptions.as_ref())?;
        sink.event(ProgressEvent {
            message: format!("phase=Join; {} rows", table.len()),
            elapsed: Some(phase.elapsed()),
        });

        let phase = Instant::now();
        let report = reshape_annotations(&table)?.reindex(&REPORT_FIELDS);
        sink.event(ProgressEvent {
            message: format!("phase=Reshape; {} report rows", report.len()),
            elapsed: Some(phase.elapsed()),
        });

        report.write_csv(&request.output)?;
        sink.event(ProgressEvent {
            message: format!("phase=Write; {}", request.output.display()),
            elapsed: Some(started.elapsed()),
        });

        Ok(RunSummary {
            run_id: request.run_id.to_string(),
            genes_requested: names.len(),
            gene_rows,
            domain_hits,
            descriptions: description_count,
            report_rows: report.len(),
            output: request.output.display().to_string(),
            gene_stage,
            domain_stage,
        })
    }

    fn gene_table(
        &self,
        request: &RunRequest,
        names: &[String],
    ) -> Result<(Outcome<Table>, Option<String>), GeneReportError> {
        if let Some(path) = &request.gene_stage {
            return load_stage(path);
        }
        let stem = request
            .gene_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "genes".to_string());
        let mut stage = StagingFile::new(self.stage_path(&format!(
            "tmp-microbes-online-{stem}-{}.csv",
            request.run_id
        )));
        let outcome = fetch_all(
            "MicrobesOnline",
            names,
            self.config.gene_batch_size,
            &mut stage,
            |chunk| {
                let raw = self.genes.fetch_genes(chunk)?;
                let table = expand_synonyms(&raw)?;
                Ok(if table.is_empty() {
                    Outcome::Empty
                } else {
                    Outcome::Data(table)
                })
            },
        )?;
        Ok((outcome, Some(stage.path().to_string())))
    }

    fn domain_hits(
        &self,
        request: &RunRequest,
        genes: &Table,
    ) -> Result<(Outcome<Table>, Option<String>), GeneReportError> {
        if let Some(path) = &request.domain_stage {
            return load_stage(path);
        }
        let gis: Vec<String> = genes
            .distinct_values("gi")
            .into_iter()
            .filter(|gi| match gi.parse::<Gi>() {
                Ok(_) => true,
                Err(err) => {
                    warn!(gi = %gi, error = %err, "skipping malformed GI");
                    false
                }
            })
            .collect();
        if gis.is_empty() {
            warn!("no GI numbers to search for conserved domains");
            return Ok((Outcome::Empty, None));
        }

        let mut stage = StagingFile::new(
            self.stage_path(&format!("tmp-cdd-information-{}.csv", request.run_id)),
        );
        let outcome = fetch_all(
            "conserved domains",
            &gis,
            self.config.cdd_batch_size,
            &mut stage,
            |chunk| {
                let batch = chunk
                    .iter()
                    .map(|gi| gi.parse::<Gi>())
                    .collect::<Result<Vec<_>, _>>()?;
                match self.cdd.search_hits(&batch) {
                    Ok(outcome) => Ok(outcome),
                    Err(err) => {
                        warn!(error = %err, ids = batch.len(), "CD-Search batch failed");
                        Ok(Outcome::Empty)
                    }
                }
            },
        )?;
        Ok((outcome, Some(stage.path().to_string())))
    }

    fn descriptions(&self, hits: &Table) -> Result<Table, GeneReportError> {
        let accessions: Vec<CddAccession> = hits
            .distinct_values("accession")
            .into_iter()
            .filter_map(|accession| match accession.parse() {
                Ok(accession) => Some(accession),
                Err(err) => {
                    warn!(error = %err, "skipping malformed conserved domain accession");
                    None
                }
            })
            .collect();
        describe_all(&self.cdd, &accessions, self.config.workers)
    }

    fn stage_path(&self, file_name: &str) -> Utf8PathBuf {
        self.config.staging_dir.join(file_name)
    }
}

fn load_stage(path: &Path) -> Result<(Outcome<Table>, Option<String>), GeneReportError> {
    let table = Table::read_csv(path)?;
    let outcome = if table.is_empty() {
        Outcome::Empty
    } else {
        Outcome::Data(table)
    };
    Ok((outcome, Some(path.display().to_string())))
}

pub fn read_gene_list(path: &Path) -> Result<Vec<String>, GeneReportError> {
    let content =
        fs::read_to_string(path).map_err(|_| GeneReportError::GeneListRead(path.to_path_buf()))?;
    let names: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(GeneReportError::EmptyGeneList(path.to_path_buf()));
    }
    Ok(names)
}

// Rewrites parseable GIs ("116863.0", " 116863") to the form used for searching,
// so hits join back onto the rows they were searched for.
pub fn canonicalize_gis(table: &mut Table) -> Result<(), GeneReportError> {
    let Some(values) = table.column_values("gi") else {
        return Ok(());
    };
    let canonical = values
        .into_iter()
        .map(|value| {
            value.map(|value| match value.parse::<Gi>() {
                Ok(gi) => gi.to_string(),
                Err(_) => value.to_string(),
            })
        })
        .collect();
    table.set_column("gi", canonical)
}

pub fn add_interpro_links(table: &mut Table) -> Result<(), GeneReportError> {
    let links = match table.column_values("ipr_id") {
        Some(ids) => ids
            .into_iter()
            .map(|id| {
                id.filter(|id| !id.is_empty())
                    .map(|id| format!("=HYPERLINK(\"{INTERPRO_ENTRY_URL}{id}\")"))
            })
            .collect(),
        None => vec![None; table.len()],
    };
    table.set_column("ipr_link", links)
}

pub fn join_annotations(
    genes: Table,
    hits: Option<&Table>,
    descriptions: Option<&Table>,
) -> Result<Table, GeneReportError> {
    let Some(hits) = hits else {
        return Ok(genes);
    };
    if !genes.has_column("gi") || !hits.has_column("gi") {
        warn!("cannot join conserved domains without a gi column on both sides");
        return Ok(genes);
    }
    let table = genes.left_join(hits, &["gi"])?;
    match descriptions {
        Some(descriptions) if table.has_column("accession") => {
            table.left_join(descriptions, &["accession"])
        }
        _ => Ok(table),
    }
}
