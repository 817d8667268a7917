//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::schema::SyncRequest;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (SQLite).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Sync behavior configuration.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Tables to mirror, each replaced by its own atomic sync.
    #[serde(default)]
    pub jobs: Vec<SyncRequest>,
}

/// Source database (SQLite) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type (always "sqlite" for now).
    #[serde(default = "default_sqlite")]
    pub r#type: String,

    /// Path to the database file, or ":memory:".
    pub path: String,

    /// Open the database read-only (default: true).
    #[serde(default = "default_true")]
    pub read_only: bool,

    /// Maximum pooled source connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (always "postgres" for now).
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema the live, staging and retiring tables live in (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode: disable, require, verify-ca, verify-full (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Maximum pooled target connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Sync behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Isolation level of the destination transaction (default: repeatable_read).
    #[serde(default)]
    pub isolation: IsolationLevel,

    /// COPY wire format (default: binary).
    #[serde(default)]
    pub copy_format: CopyFormat,

    /// Rows buffered before a COPY flush (default: 10000).
    #[serde(default = "default_copy_buffer_rows")]
    pub copy_buffer_rows: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::default(),
            copy_format: CopyFormat::default(),
            copy_buffer_rows: default_copy_buffer_rows(),
        }
    }
}

/// Isolation level for the destination transaction.
///
/// Weaker levels are not offered: the swap relies on at least repeatable read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// The `BEGIN` statement opening a transaction at this level.
    pub fn begin_statement(&self) -> &'static str {
        match self {
            IsolationLevel::RepeatableRead => "BEGIN ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::Serializable => "BEGIN ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

/// PostgreSQL COPY format used for the bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyFormat {
    #[default]
    Binary,
    Text,
}

// Default value functions for serde
fn default_sqlite() -> String {
    "sqlite".to_string()
}

fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    4
}

fn default_copy_buffer_rows() -> usize {
    10_000
}
