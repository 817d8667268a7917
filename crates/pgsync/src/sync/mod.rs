//! Swap-sync orchestrator.
//!
//! A sync moves through these stages, in order:
//!
//! 1. `Init`: the source query is executed. Nothing touches the destination.
//! 2. `StagingCreated`: a destination transaction is opened and the staging
//!    table is created.
//! 3. `Loading`: rows are pulled from the source one at a time, coerced to
//!    the staging column types and streamed into a bulk load.
//! 4. `LoadComplete`: the bulk load is finalized.
//! 5. `Swapped`: live is renamed to retiring, staging to live, and retiring
//!    is dropped, in one statement batch.
//! 6. `Committed`: the transaction commits.
//!
//! Any failure or cancellation after the transaction began rolls it back, so
//! readers of the live table see either the previous contents or the new
//! ones, never a missing or half-loaded table.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::Config;
use crate::core::schema::{ColumnDescriptor, SyncRequest, TableNames};
use crate::core::value::coerce_row;
use crate::error::{Result, SyncError};
use crate::source::{QueryResult, RowStream, SourceReader, SqliteReader};
use crate::target::{PgWriter, TargetTransaction, TargetWriter};
use crate::typemap::{render_create_table, render_swap, PgType};

/// Destination schema used when none is configured.
pub const DEFAULT_SCHEMA: &str = "public";

/// Stage a sync reached, or was attempting, when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Init,
    QueryExecuted,
    StagingCreated,
    Loading,
    LoadComplete,
    Swapped,
    Committed,
    Aborted,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Init => "init",
            SyncStage::QueryExecuted => "query_executed",
            SyncStage::StagingCreated => "staging_created",
            SyncStage::Loading => "loading",
            SyncStage::LoadComplete => "load_complete",
            SyncStage::Swapped => "swapped",
            SyncStage::Committed => "committed",
            SyncStage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Result of a successful sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Live destination table.
    pub table: String,

    /// Columns of the new table, in order.
    pub columns: Vec<ColumnDescriptor>,

    /// Rows loaded into the new table.
    pub rows_loaded: u64,

    /// When the sync started.
    pub started_at: DateTime<Utc>,

    /// When the sync committed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,
}

/// One column of a planned staging table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedColumn {
    pub name: String,
    pub source_type: String,
    pub target_type: PgType,
}

/// What a sync would execute, without executing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPlan {
    pub table: String,
    pub columns: Vec<PlannedColumn>,
    pub create_staging: String,
    pub swap: String,
}

/// Result of a connectivity check against both databases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Runs swap-syncs from a source reader into a target writer.
///
/// The engine holds its connections but never closes them on its own; call
/// [`SyncEngine::close`] when done.
pub struct SyncEngine {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    schema: String,
}

impl SyncEngine {
    /// Create an engine over explicit source and target connections.
    pub fn new(source: Arc<dyn SourceReader>, target: Arc<dyn TargetWriter>) -> Self {
        Self {
            source,
            target,
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }

    /// Set the destination schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Open the SQLite source and PostgreSQL target described by `config`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let source = SqliteReader::new(&config.source).await?;
        let target = PgWriter::new(&config.target, &config.sync).await?;

        Ok(Self::new(Arc::new(source), Arc::new(target)).with_schema(&config.target.schema))
    }

    /// Destination schema.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Replace the contents of `request.table` with the result of
    /// `request.query`, atomically.
    pub async fn sync(
        &self,
        cancel: &CancellationToken,
        request: &SyncRequest,
    ) -> Result<SyncResult> {
        let span = info_span!("sync", table = %request.table);
        self.run_sync(cancel, request).instrument(span).await
    }

    /// Run each request as an independent sync, in order.
    ///
    /// Stops at the first failure. Tables synced before it stay committed.
    pub async fn run_jobs(
        &self,
        cancel: &CancellationToken,
        requests: &[SyncRequest],
    ) -> Result<Vec<SyncResult>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            ensure_live(cancel)?;
            results.push(self.sync(cancel, request).await?);
        }
        Ok(results)
    }

    /// Execute the source query and render the statements a sync would run,
    /// without opening a destination transaction.
    pub async fn plan(&self, cancel: &CancellationToken, request: &SyncRequest) -> Result<SyncPlan> {
        let names = TableNames::new(&self.schema, &request.table)?;

        ensure_live(cancel)?;
        let QueryResult { columns, .. } = cancellable(cancel, self.source.open(&request.query))
            .await
            .map_err(|e| e.at_stage(SyncStage::Init, &names.live))?;

        let create_staging = render_create_table(&names.schema, &names.staging, &columns)?;
        let swap = render_swap(&names)?;

        Ok(SyncPlan {
            table: names.live,
            columns: columns
                .into_iter()
                .map(|c| PlannedColumn {
                    target_type: c.target_type(),
                    name: c.name,
                    source_type: c.source_type,
                })
                .collect(),
            create_staging,
            swap,
        })
    }

    /// Check connectivity to both databases.
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let source = self.source.health_check().await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let target = self.target.health_check().await;
        let target_latency_ms = start.elapsed().as_millis() as u64;

        let healthy = source.is_ok() && target.is_ok();
        HealthCheckResult {
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.err().map(|e| e.to_string()),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.err().map(|e| e.to_string()),
            healthy,
        }
    }

    /// Close both connections.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }

    async fn run_sync(&self, cancel: &CancellationToken, request: &SyncRequest) -> Result<SyncResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        let names = TableNames::new(&self.schema, &request.table)?;
        let table = names.live.as_str();

        // Init: the destination is not touched until the query has run.
        ensure_live(cancel)?;
        let QueryResult { columns, rows } = cancellable(cancel, self.source.open(&request.query))
            .await
            .map_err(|e| e.at_stage(SyncStage::Init, table))?;
        info!(
            "Stage {}: {} columns from {} source",
            SyncStage::QueryExecuted,
            columns.len(),
            self.source.db_type()
        );

        let create_staging = render_create_table(&names.schema, &names.staging, &columns)?;
        let swap = render_swap(&names)?;
        let staging = names
            .qualified_staging()
            .map_err(|e| e.at_stage(SyncStage::StagingCreated, table))?;

        ensure_live(cancel)?;
        let mut tx = cancellable(cancel, self.target.begin())
            .await
            .map_err(|e| e.at_stage(SyncStage::StagingCreated, table))?;

        let staged = Staged {
            table,
            staging: &staging,
            create_staging: &create_staging,
            swap: &swap,
            columns: &columns,
        };
        let outcome = staged.load_and_swap(cancel, tx.as_mut(), rows).await;
        let rows_loaded = match outcome {
            Ok(rows_loaded) => rows_loaded,
            Err(e) => return Err(abort(tx, e).await),
        };

        if cancel.is_cancelled() {
            return Err(abort(tx, SyncError::Cancelled).await);
        }
        if let Err(e) = tx.commit().await {
            let e = e.at_stage(SyncStage::Committed, table);
            error!("Sync of {} failed: {}", table, e);
            return Err(e);
        }

        let completed_at = Utc::now();
        let duration_seconds = start.elapsed().as_secs_f64();
        info!(
            "Stage {}: {} rows now live in {} ({:.2}s)",
            SyncStage::Committed,
            rows_loaded,
            table,
            duration_seconds
        );

        Ok(SyncResult {
            run_id: uuid::Uuid::new_v4().to_string(),
            table: names.live.clone(),
            columns,
            rows_loaded,
            started_at,
            completed_at,
            duration_seconds,
        })
    }
}

/// Everything needed between opening the transaction and committing it.
struct Staged<'s> {
    table: &'s str,
    staging: &'s str,
    create_staging: &'s str,
    swap: &'s str,
    columns: &'s [ColumnDescriptor],
}

impl Staged<'_> {
    async fn load_and_swap(
        &self,
        cancel: &CancellationToken,
        tx: &mut dyn TargetTransaction,
        rows: RowStream<'_>,
    ) -> Result<u64> {
        ensure_live(cancel)?;
        cancellable(cancel, tx.execute(self.create_staging))
            .await
            .map_err(|e| e.at_stage(SyncStage::StagingCreated, self.table))?;
        info!("Stage {}: {}", SyncStage::StagingCreated, self.staging);

        let rows_loaded = self.load(cancel, tx, rows).await?;
        info!("Stage {}: {} rows", SyncStage::LoadComplete, rows_loaded);

        ensure_live(cancel)?;
        cancellable(cancel, tx.execute(self.swap))
            .await
            .map_err(|e| e.at_stage(SyncStage::Swapped, self.table))?;
        info!("Stage {}", SyncStage::Swapped);

        Ok(rows_loaded)
    }

    async fn load(
        &self,
        cancel: &CancellationToken,
        tx: &mut dyn TargetTransaction,
        mut rows: RowStream<'_>,
    ) -> Result<u64> {
        let at_loading = |e: SyncError| e.at_stage(SyncStage::Loading, self.table);

        ensure_live(cancel)?;
        let mut loader = cancellable(cancel, tx.copy_in(self.staging, self.columns))
            .await
            .map_err(at_loading)?;

        let mut sent: u64 = 0;
        loop {
            ensure_live(cancel)?;
            let next = cancellable(cancel, async { Ok(rows.next().await) }).await?;
            let Some(row) = next else {
                break;
            };
            let row = coerce_row(row.map_err(at_loading)?, self.columns)?;
            cancellable(cancel, loader.send(&row))
                .await
                .map_err(at_loading)?;
            sent += 1;
        }

        ensure_live(cancel)?;
        let loaded = cancellable(cancel, loader.finish())
            .await
            .map_err(|e| e.at_stage(SyncStage::LoadComplete, self.table))?;
        debug!("Sent {} rows, destination reported {}", sent, loaded);

        Ok(loaded)
    }
}

/// Roll back after `err`, returning `err`.
///
/// A rollback failure is logged and otherwise ignored.
async fn abort(tx: Box<dyn TargetTransaction>, err: SyncError) -> SyncError {
    error!("Stage {}: {}", SyncStage::Aborted, err);
    if let Err(rollback_err) = tx.rollback().await {
        error!("Rollback failed: {}", rollback_err);
    }
    err
}

/// Fail with `Cancelled` if the token has fired.
fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

/// Await `fut`, giving up with `Cancelled` as soon as the token fires.
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        res = fut => res,
    }
}
