use serde::Serialize;
use thiserror::Error;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid input file {path}: {reason}")]
    Input { path: String, reason: String },

    #[error("Cannot consolidate an empty group")]
    EmptyGroup,
}

/// A raw record that cannot take part in consolidation
///
/// These are excluded from the output and listed in the import report.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("malformed record {record} (input #{position}): {reason}")]
pub struct MalformedRecord {
    /// The record id when it has one, otherwise `#<position>`
    pub record: String,
    /// Zero-based position among all input vote entries
    pub position: usize,
    pub reason: String,
    /// Input file the record was read from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

impl MalformedRecord {
    pub fn new(record: impl Into<String>, position: usize, reason: impl Into<String>) -> Self {
        Self {
            record: record.into(),
            position,
            reason: reason.into(),
            source_file: None,
        }
    }

    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }
}
