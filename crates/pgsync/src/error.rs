//! Error types for the sync library.

use thiserror::Error;

use crate::sync::SyncStage;

/// Main error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, bad identifiers, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Source database driver error (not yet attributed to a sync stage)
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Target database driver error (not yet attributed to a sync stage)
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// The source query could not be planned or executed
    #[error("Source query failed: {0}")]
    Query(String),

    /// A source row could not be decoded into the expected column shape
    #[error("Cannot decode column {column}: {message}")]
    Scan { column: String, message: String },

    /// Staging DDL could not be rendered or executed
    #[error("Schema error for table {table}: {message}")]
    Schema { table: String, message: String },

    /// Bulk load append or finalize failed
    #[error("Load failed for table {table}: {message}")]
    Load { table: String, message: String },

    /// The rename/drop swap batch failed
    #[error("Swap failed for table {table}: {message}")]
    Swap { table: String, message: String },

    /// The final commit failed
    #[error("Commit failed for table {table}: {message}")]
    Commit { table: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Sync was cancelled before or during the operation
    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        SyncError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Scan error for a column
    pub fn scan(column: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Scan {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Whether the error has already been classified into a sync stage.
    pub fn is_classified(&self) -> bool {
        matches!(
            self,
            SyncError::Cancelled
                | SyncError::Query(_)
                | SyncError::Scan { .. }
                | SyncError::Schema { .. }
                | SyncError::Load { .. }
                | SyncError::Swap { .. }
                | SyncError::Commit { .. }
        )
    }

    /// Attribute a low-level error to the stage that was being attempted.
    ///
    /// Errors that already carry a classification (including `Cancelled`)
    /// are returned unchanged.
    pub fn at_stage(self, stage: SyncStage, table: &str) -> Self {
        if self.is_classified() {
            return self;
        }

        let table = table.to_string();
        let message = self.chain_message();
        match stage {
            SyncStage::Init | SyncStage::QueryExecuted => SyncError::Query(message),
            SyncStage::StagingCreated => SyncError::Schema { table, message },
            SyncStage::Loading | SyncStage::LoadComplete => SyncError::Load { table, message },
            SyncStage::Swapped => SyncError::Swap { table, message },
            SyncStage::Committed => SyncError::Commit { table, message },
            SyncStage::Aborted => self,
        }
    }

    /// Display of this error followed by every error in its source chain.
    pub fn chain_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            message.push_str(": ");
            message.push_str(&err.to_string());
            source = err.source();
        }
        message
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_) | SyncError::Yaml(_) | SyncError::Json(_) => 1,
            SyncError::Query(_) | SyncError::Source(_) => 2,
            SyncError::Scan { .. } => 3,
            SyncError::Schema { .. }
            | SyncError::Load { .. }
            | SyncError::Swap { .. }
            | SyncError::Commit { .. }
            | SyncError::Target(_) => 4,
            SyncError::Pool { .. } => 5,
            SyncError::Io(_) => 7,
            SyncError::Cancelled => 130,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_stage_classifies_unclassified_errors() {
        let err = SyncError::pool("connection reset", "executing DDL");
        match err.at_stage(SyncStage::StagingCreated, "people") {
            SyncError::Schema { table, message } => {
                assert_eq!(table, "people");
                assert!(message.contains("connection reset"));
            }
            other => panic!("expected Schema error, got {other:?}"),
        }

        let err = SyncError::Config("boom".into()).at_stage(SyncStage::Swapped, "t");
        assert!(matches!(err, SyncError::Swap { .. }));

        let err = SyncError::Config("boom".into()).at_stage(SyncStage::Committed, "t");
        assert!(matches!(err, SyncError::Commit { .. }));

        let err = SyncError::Config("boom".into()).at_stage(SyncStage::LoadComplete, "t");
        assert!(matches!(err, SyncError::Load { .. }));
    }

    #[test]
    fn test_at_stage_keeps_classified_errors() {
        let err = SyncError::Cancelled.at_stage(SyncStage::Loading, "t");
        assert!(matches!(err, SyncError::Cancelled));

        let err = SyncError::scan("id", "out of range").at_stage(SyncStage::Loading, "t");
        assert!(matches!(err, SyncError::Scan { .. }));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SyncError::Config("x".into()).exit_code(), 1);
        assert_eq!(SyncError::Query("x".into()).exit_code(), 2);
        assert_eq!(SyncError::scan("c", "x").exit_code(), 3);
        assert_eq!(SyncError::pool("x", "y").exit_code(), 5);
        assert_eq!(SyncError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.yaml");
        let err = SyncError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error: missing.yaml"));
    }
}
