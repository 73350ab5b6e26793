use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use gene_report::app::{App, RunRequest};
use gene_report::cdd::CddHttpClient;
use gene_report::config::{ConfigLoader, ResolvedConfig};
use gene_report::domain::RunId;
use gene_report::error::GeneReportError;
use gene_report::microbes_online::{GeneDatabase, MicrobesOnlineClient};
use gene_report::output::{JsonOutput, LogProgress, OutputMode, print_summary};
use gene_report::table::Table;

#[derive(Parser)]
#[command(name = "gene-report")]
#[command(about = "Build a per-gene annotation report from MicrobesOnline and NCBI conserved domains")]
#[command(version, author)]
struct Cli {
    #[arg(help = "File with one gene name per line")]
    gene_file: PathBuf,

    #[arg(help = "Where to write the CSV report")]
    output: PathBuf,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, help = "Worker threads for conserved domain description lookups")]
    workers: Option<usize>,

    #[arg(long, help = "Directory for staged batch results")]
    staging_dir: Option<String>,

    #[arg(long, help = "Identifier used in staging file names (defaults to the start time)")]
    run_id: Option<String>,

    #[arg(long, help = "Reuse staged gene rows instead of querying MicrobesOnline")]
    gene_stage: Option<PathBuf>,

    #[arg(long, help = "Reuse staged conserved domain hits instead of running CD-Search")]
    domain_stage: Option<PathBuf>,

    #[arg(long, help = "Print the run summary as JSON")]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<GeneReportError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GeneReportError) -> u8 {
    match error {
        GeneReportError::ConfigRead(_)
        | GeneReportError::ConfigParse(_)
        | GeneReportError::InvalidConfig(_)
        | GeneReportError::GeneListRead(_)
        | GeneReportError::EmptyGeneList(_) => 2,
        GeneReportError::Database(_)
        | GeneReportError::DatabaseUnavailable { .. }
        | GeneReportError::CddHttp(_)
        | GeneReportError::CddStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let config = resolve_config(&cli)?;
    let run_id = match &cli.run_id {
        Some(value) => value.parse::<RunId>()?,
        None => RunId::now(),
    };
    let request = RunRequest {
        gene_file: cli.gene_file.clone(),
        output: cli.output.clone(),
        run_id,
        gene_stage: cli.gene_stage.clone(),
        domain_stage: cli.domain_stage.clone(),
    };

    let cdd = CddHttpClient::new(config.cdd_poll_interval)?;
    let summary = if request.gene_stage.is_some() {
        App::new(config, StagedGenes, cdd).run(&request, &LogProgress)?
    } else {
        let genes = MicrobesOnlineClient::connect(&config.database)?;
        App::new(config, genes, cdd).run(&request, &LogProgress)?
    };

    match output_mode {
        OutputMode::Json => JsonOutput::print_summary(&summary).into_diagnostic()?,
        OutputMode::Human => print_summary(&summary),
    }
    Ok(())
}

fn resolve_config(cli: &Cli) -> miette::Result<ResolvedConfig> {
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(dir) = &cli.staging_dir {
        config.staging_dir = Utf8PathBuf::from(dir.as_str());
    }
    config.validate()?;
    Ok(config)
}

struct StagedGenes;

impl GeneDatabase for StagedGenes {
    fn fetch_genes(&self, _names: &[String]) -> Result<Table, GeneReportError> {
        Err(GeneReportError::Database(
            "gene rows are loaded from a staging file".to_string(),
        ))
    }
}
