use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink, RunSummary};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_secs = elapsed.as_secs_f64(), "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub fn print_summary(summary: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}gene-report summary (run {}){reset}", summary.run_id);
    println!(
        "{green}genes requested: {}, gene rows: {}{reset}",
        summary.genes_requested, summary.gene_rows
    );
    let domain_color = if summary.domain_hits == 0 { yellow } else { green };
    println!(
        "{domain_color}conserved domain hits: {}, descriptions: {}{reset}",
        summary.domain_hits, summary.descriptions
    );
    println!(
        "{green}report rows: {} -> {}{reset}",
        summary.report_rows, summary.output
    );
    for stage in [&summary.gene_stage, &summary.domain_stage]
        .into_iter()
        .flatten()
    {
        println!("{cyan}   staged: {stage}{reset}");
    }
}
