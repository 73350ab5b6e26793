use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::batch::Outcome;
use crate::config::CDD_MAX_BATCH;
use crate::domain::{CddAccession, Gi};
use crate::error::GeneReportError;
use crate::reshape::GROUP_DELIMITER;
use crate::table::{Table, project};

pub const HIT_COLUMNS: [&str; 4] = ["gi", "accession", "cdd_name", "e-value"];

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
static PIPE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\|{3,}").expect("pipe pattern is valid"));

pub trait CddClient: Send + Sync {
    fn search_hits(&self, gis: &[Gi]) -> Result<Outcome<Table>, GeneReportError>;

    fn fetch_description(&self, accession: &CddAccession) -> Result<String, GeneReportError>;
}

#[derive(Clone)]
pub struct CddHttpClient {
    client: Client,
    search_url: String,
    domain_url: String,
    poll_interval: Duration,
}

impl CddHttpClient {
    pub fn new(poll_interval: Duration) -> Result<Self, GeneReportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gene-report/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GeneReportError::CddHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| GeneReportError::CddHttp(err.to_string()))?;
        Ok(Self {
            client,
            search_url: "https://www.ncbi.nlm.nih.gov/Structure/bwrpsb/bwrpsb.cgi".to_string(),
            domain_url: "https://www.ncbi.nlm.nih.gov/Structure/cdd".to_string(),
            poll_interval,
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<String, GeneReportError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Self::handle_status(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(GeneReportError::CddHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(response: reqwest::blocking::Response) -> Result<String, GeneReportError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "NCBI request failed".to_string());
            return Err(GeneReportError::CddStatus { status, message });
        }
        response
            .text()
            .map_err(|err| GeneReportError::CddHttp(err.to_string()))
    }
}

impl CddClient for CddHttpClient {
    fn search_hits(&self, gis: &[Gi]) -> Result<Outcome<Table>, GeneReportError> {
        if gis.len() > CDD_MAX_BATCH {
            return Err(GeneReportError::BatchTooLarge {
                max: CDD_MAX_BATCH,
                got: gis.len(),
            });
        }
        if gis.is_empty() {
            return Ok(Outcome::Empty);
        }

        let queries = gis.iter().map(Gi::to_string).collect::<Vec<_>>().join("\n");
        let submitted = self.send_with_retries(|| {
            self.client.get(&self.search_url).query(&[
                ("queries", queries.as_str()),
                ("useid1", "true"),
                ("tdata", "hits"),
            ])
        })?;
        let search_id = parse_search_id(&submitted)?;

        poll_search(search_budget(gis.len()), self.poll_interval, || {
            self.send_with_retries(|| {
                self.client
                    .get(&self.search_url)
                    .query(&[("cdsid", search_id.as_str())])
            })
        })
    }

    fn fetch_description(&self, accession: &CddAccession) -> Result<String, GeneReportError> {
        let url = format!("{}/{}", self.domain_url, accession.as_str());
        let html = self.send_with_retries(|| self.client.get(&url))?;
        Ok(extract_description(&html).unwrap_or_default())
    }
}

// 20 s plus 2 s per queried id
pub fn search_budget(ids: usize) -> Duration {
    Duration::from_secs(20 + 2 * ids as u64)
}

// Polls every `interval` while the next poll still fits in `budget`.
pub fn poll_search<F>(
    budget: Duration,
    interval: Duration,
    mut check: F,
) -> Result<Outcome<Table>, GeneReportError>
where
    F: FnMut() -> Result<String, GeneReportError>,
{
    let started = Instant::now();
    let mut waited = Duration::ZERO;
    let mut polls = 0u32;
    while waited + interval <= budget {
        thread::sleep(interval);
        waited += interval;
        polls += 1;
        let body = check()?;
        if is_search_complete(&body) {
            info!(
                polls,
                secs = started.elapsed().as_secs(),
                "CD-Search job returned"
            );
            return parse_hits(&body);
        }
    }

    warn!(
        polls,
        budget_secs = budget.as_secs(),
        "CD-Search job did not finish in time, giving up on this batch"
    );
    Ok(Outcome::Empty)
}

pub fn parse_search_id(body: &str) -> Result<String, GeneReportError> {
    body.split_once("cdsid\t")
        .and_then(|(_, rest)| rest.lines().next())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GeneReportError::CddParse("submission response has no cdsid".to_string()))
}

pub fn is_search_complete(body: &str) -> bool {
    if body.contains("success") {
        return true;
    }
    body.lines()
        .filter_map(|line| line.strip_prefix("#status"))
        .any(|status| status.trim() == "0")
}

pub fn parse_hits(body: &str) -> Result<Outcome<Table>, GeneReportError> {
    let normalized = body.replace("\r\n", "\n");
    let block = normalized
        .split("\n\n")
        .nth(1)
        .ok_or_else(|| GeneReportError::CddParse("result has no hit block".to_string()))?;
    let mut raw = Table::from_delimited(block.trim_start_matches('#'), b'\t')?;
    if raw.is_empty() {
        return Ok(Outcome::Empty);
    }

    let queries = raw
        .column_values("Query")
        .ok_or_else(|| GeneReportError::MissingColumn("Query".to_string()))?;
    let gis = queries
        .into_iter()
        .map(|query| query.and_then(gi_from_query))
        .collect();
    raw.set_column("gi", gis)?;
    raw.rename_column("Accession", "accession");
    raw.rename_column("Short name", "cdd_name");
    raw.rename_column("E-Value", "e-value");

    let (hits, unknown) = project(&raw, &HIT_COLUMNS);
    if !unknown.is_empty() {
        warn!("CD-Search result lacks columns: {}", unknown.join(", "));
    }
    Ok(Outcome::Data(hits.reindex(&HIT_COLUMNS)))
}

pub fn gi_from_query(query: &str) -> Option<String> {
    let (_, id) = query.split_once(" - ")?;
    let id = id.trim_start().trim_start_matches('>');
    let id = id.strip_prefix("gi|").unwrap_or(id);
    let end = id
        .find(|ch: char| ch == '(' || ch == '|' || ch.is_whitespace())
        .unwrap_or(id.len());
    let gi = &id[..end];
    (!gi.is_empty()).then(|| gi.to_string())
}

pub fn extract_description(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let container = Selector::parse("div#dscpt").ok()?;
    let span = Selector::parse("span").ok()?;
    let block = document.select(&container).next()?;
    let last = block.select(&span).last()?;
    let text = last.text().collect::<Vec<_>>().join(" ");
    Some(WHITESPACE.replace_all(&text, " ").trim().to_string())
}

pub fn describe_all<C: CddClient + ?Sized>(
    client: &C,
    accessions: &[CddAccession],
    workers: usize,
) -> Result<Table, GeneReportError> {
    let workers = workers.max(1);
    let per_worker = accessions.len().div_ceil(workers).max(1);
    let started = Instant::now();

    let descriptions: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = accessions
            .chunks(per_worker)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|accession| describe_one(client, accession))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(chunk) => chunk,
                Err(_) => {
                    warn!("description worker panicked, leaving its descriptions empty");
                    vec![String::new(); per_worker]
                }
            })
            .collect()
    });

    info!(
        workers,
        accessions = accessions.len(),
        secs = started.elapsed().as_secs_f32(),
        "fetched conserved domain descriptions"
    );

    let rows = accessions
        .iter()
        .zip(descriptions)
        .map(|(accession, description)| vec![Some(accession.to_string()), Some(description)])
        .collect();
    Table::from_rows(["accession", "cdd_description"], rows)
}

fn describe_one<C: CddClient + ?Sized>(client: &C, accession: &CddAccession) -> String {
    match client.fetch_description(accession) {
        Ok(description) => {
            if description.is_empty() {
                warn!(%accession, "no description block on conserved domain page");
            }
            clean_description(accession, description)
        }
        Err(err) => {
            warn!(%accession, error = %err, "conserved domain description lookup failed");
            String::new()
        }
    }
}

// Scraped text must never contain the group delimiter used by the reshaper.
fn clean_description(accession: &CddAccession, description: String) -> String {
    if !description.contains(GROUP_DELIMITER) {
        return description;
    }
    warn!(%accession, "description contains the group delimiter, collapsing pipe runs");
    PIPE_RUN.replace_all(&description, "|").into_owned()
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
