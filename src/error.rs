use thiserror::Error;

use crate::llm::LlmError;
use crate::sources::SourceError;

/// Main error type for xkg
#[derive(Error, Debug)]
pub enum XkgError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization of persisted records
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Evidence source failures that escaped the retriever
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Generation model failures that escaped the planner or extractor
    #[error("Generation error: {0}")]
    Llm(#[from] LlmError),

    /// Concept or domain set unusable; fatal for the job
    #[error("Planning error: {0}")]
    Planning(String),

    /// Every query of a domain failed or returned nothing
    #[error("Retrieval error in {domain}: {reason}")]
    Retrieval { domain: String, reason: String },

    /// Extraction output stayed unusable after the retry
    #[error("Extraction error in {domain}: {reason}")]
    Extraction { domain: String, reason: String },

    /// Graph or job store write/read failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A single extracted element could not be repaired
    #[error("Schema repair failure: {0}")]
    SchemaRepair(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Node not found in any persisted graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// No persisted graph for the concept/version
    #[error("Graph not found: {0}")]
    GraphNotFound(String),

    /// Illegal job lifecycle transition (e.g. mutating a terminal job)
    #[error("Job state error: {0}")]
    JobState(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl XkgError {
    /// True for errors that mean "the thing asked for does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            XkgError::JobNotFound(_) | XkgError::NodeNotFound(_) | XkgError::GraphNotFound(_)
        )
    }
}

/// Convenient Result type using XkgError
pub type Result<T> = std::result::Result<T, XkgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = XkgError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_domain_errors_name_the_domain() {
        let err = XkgError::Retrieval {
            domain: "Biology".to_string(),
            reason: "all 3 queries failed".to_string(),
        };
        assert_eq!(err.to_string(), "Retrieval error in Biology: all 3 queries failed");
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: XkgError = rusqlite_err.into();
        assert!(matches!(err, XkgError::Database(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: XkgError = io_err.into();
        assert!(matches!(err, XkgError::Io(_)));
    }

    #[test]
    fn test_not_found_classification() {
        assert!(XkgError::JobNotFound("j".into()).is_not_found());
        assert!(XkgError::NodeNotFound("n".into()).is_not_found());
        assert!(!XkgError::Planning("empty".into()).is_not_found());
    }
}
