use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GeneReportError {
    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read gene list {0}")]
    GeneListRead(PathBuf),

    #[error("gene list {0} contains no gene names")]
    EmptyGeneList(PathBuf),

    #[error("MicrobesOnline database error: {0}")]
    Database(String),

    #[error("gave up connecting to MicrobesOnline after {attempts} attempts: {message}")]
    DatabaseUnavailable { attempts: u32, message: String },

    #[error("CD-Search request failed: {0}")]
    CddHttp(String),

    #[error("CD-Search returned status {status}: {message}")]
    CddStatus { status: u16, message: String },

    #[error("CD-Search response could not be parsed: {0}")]
    CddParse(String),

    #[error("CD-Search accepts at most {max} ids per request, got {got}")]
    BatchTooLarge { max: usize, got: usize },

    #[error("column not found: {0}")]
    MissingColumn(String),

    #[error("value {value:?} in column {column} contains the group delimiter")]
    DelimiterCollision { column: String, value: String },

    #[error("merged column {column} split into {got} parts, expected at most {expected}")]
    GroupArity {
        column: String,
        expected: usize,
        got: usize,
    },

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl From<csv::Error> for GeneReportError {
    fn from(err: csv::Error) -> Self {
        GeneReportError::Csv(err.to_string())
    }
}
