//! Error types for the compliance engine

use thiserror::Error;

/// Errors that can occur while building a compliance report
#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("Missing anchor data for participant {participant_id}: {reason}")]
    MissingAnchorData {
        participant_id: String,
        reason: String,
    },

    #[error("Source query failed on table {table}: {message}")]
    SourceQueryFailure { table: String, message: String },

    #[error("Vendor API failure: {0}")]
    VendorApiFailure(String),

    #[error("Series for {activity} has {actual} weeks, expected {expected}")]
    DataShapeMismatch {
        activity: String,
        expected: usize,
        actual: usize,
    },

    #[error("{category} needs {expected} activity rows, found {actual}")]
    IncompleteCategory {
        category: String,
        expected: usize,
        actual: usize,
    },

    #[error("No adapter registered for {0}")]
    MissingAdapter(String),

    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Failed to parse: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComplianceError {
    /// Shorthand for a missing-anchor failure
    pub fn missing_anchor(participant_id: &str, reason: impl Into<String>) -> Self {
        ComplianceError::MissingAnchorData {
            participant_id: participant_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a query failure against a named table
    pub fn query_failure(table: &str, message: impl Into<String>) -> Self {
        ComplianceError::SourceQueryFailure {
            table: table.to_string(),
            message: message.into(),
        }
    }
}
