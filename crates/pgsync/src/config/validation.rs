//! Configuration validation.

use std::collections::HashSet;

use super::Config;
use crate::core::schema::TableNames;
use crate::error::{Result, SyncError};
use crate::target::tls::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.r#type != "sqlite" {
        return Err(SyncError::Config(format!(
            "source.type must be 'sqlite', got '{}'",
            config.source.r#type
        )));
    }
    if config.source.path.is_empty() {
        return Err(SyncError::Config("source.path is required".into()));
    }
    if config.source.max_connections == 0 {
        return Err(SyncError::Config(
            "source.max_connections must be at least 1".into(),
        ));
    }

    // Target validation
    if config.target.r#type != "postgres" {
        return Err(SyncError::Config(format!(
            "target.type must be 'postgres', got '{}'",
            config.target.r#type
        )));
    }
    if config.target.host.is_empty() {
        return Err(SyncError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(SyncError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(SyncError::Config("target.user is required".into()));
    }
    if config.target.max_connections == 0 {
        return Err(SyncError::Config(
            "target.max_connections must be at least 1".into(),
        ));
    }
    SslMode::parse(&config.target.ssl_mode)?;

    // Sync validation
    if config.sync.copy_buffer_rows == 0 {
        return Err(SyncError::Config(
            "sync.copy_buffer_rows must be at least 1".into(),
        ));
    }

    // Jobs validation
    let mut tables = HashSet::new();
    for (i, job) in config.jobs.iter().enumerate() {
        TableNames::new(&config.target.schema, &job.table).map_err(|e| {
            SyncError::Config(format!("jobs[{}].table is invalid: {}", i, e))
        })?;
        if job.query.trim().is_empty() {
            return Err(SyncError::Config(format!("jobs[{}].query is required", i)));
        }
        if !tables.insert(job.table.as_str()) {
            return Err(SyncError::Config(format!(
                "jobs[{}]: table '{}' is listed more than once",
                i, job.table
            )));
        }
    }

    Ok(())
}
