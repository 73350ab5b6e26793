use std::fmt;
use std::str::FromStr;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::GeneReportError;

pub const REPORT_FIELDS: [&str; 24] = [
    "name",
    "locus_id",
    "organism",
    "gene_name",
    "gene_description",
    "cdd_name",
    "e-value",
    "cdd_description",
    "ipr_id",
    "ipr_name",
    "ipr_link",
    "fun_code",
    "fun_code_description",
    "fun_code_group",
    "cog_info_id",
    "cog_description",
    "tigr_description",
    "go_id",
    "go_name",
    "go_type",
    "ncbi_accession_number",
    "ncbi_gene_id",
    "gi",
    "accession",
];

pub const IDENTITY_COLUMN: &str = "name";

pub const GO_GROUP: [&str; 3] = ["go_id", "go_name", "go_type"];
pub const INTERPRO_GROUP: [&str; 2] = ["ipr_id", "ipr_name"];
pub const CDD_GROUP: [&str; 4] = ["accession", "cdd_name", "e-value", "cdd_description"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn now() -> Self {
        Self(Local::now().format("%Y%m%dT%H%M%S%.3f").to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = GeneReportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
        if !is_valid {
            return Err(GeneReportError::InvalidConfig(format!(
                "run id must be a non-empty file-name-safe token: {value}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gi(u64);

impl Gi {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Gi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Gi {
    type Err = GeneReportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // staged CSVs written by other tools sometimes carry floats like "116863.0"
        let trimmed = value.trim();
        let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);
        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|_| GeneReportError::CddParse(format!("invalid GI number: {value}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CddAccession(String);

impl CddAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CddAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CddAccession {
    type Err = GeneReportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.'));
        if !is_valid {
            return Err(GeneReportError::CddParse(format!(
                "invalid conserved domain accession: {value}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }
}
