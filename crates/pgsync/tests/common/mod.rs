//! Shared fixtures: an in-memory SQLite source and a transactional fake
//! PostgreSQL target with failure injection.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pgsync::{
    BulkLoader, ColumnDescriptor, Result, SqlValue, SqliteReader, SyncEngine, SyncError,
    TargetTransaction, TargetWriter,
};
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;

/// Open a private in-memory SQLite database and run `setup` against it.
pub async fn memory_source(setup: &[&str]) -> Arc<SqliteReader> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    for sql in setup {
        sqlx::query(sql).execute(&pool).await.unwrap();
    }
    Arc::new(SqliteReader::from_pool(pool))
}

/// Build an engine over `source` and `target` in the `public` schema.
pub fn engine(source: &Arc<SqliteReader>, target: &Arc<FakeTarget>) -> SyncEngine {
    SyncEngine::new(source.clone(), target.clone())
}

/// Render a row as text, with `None` for NULL.
pub fn as_text(row: &[SqlValue]) -> Vec<Option<String>> {
    row.iter().map(SqlValue::to_text).collect()
}

/// A committed table: `(name, type)` column definitions and rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeTable {
    pub columns: Vec<(String, String)>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl FakeTable {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }
}

/// Points at which the fake target fails or cancels.
#[derive(Debug, Clone, Default)]
pub struct Failures {
    pub begin: bool,
    pub create: bool,
    /// Fail when receiving this (1-based) row.
    pub copy_row: Option<usize>,
    pub finish: bool,
    pub swap: bool,
    pub commit: bool,
    pub rollback: bool,
    /// Cancel the token after accepting this many rows.
    pub cancel_after_rows: Option<(usize, CancellationToken)>,
}

type Tables = BTreeMap<String, FakeTable>;

#[derive(Default)]
struct Shared {
    committed: Mutex<Tables>,
    failures: Mutex<Failures>,
    statements: Mutex<Vec<String>>,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// In-memory stand-in for a PostgreSQL database.
///
/// Each transaction works on a private copy of the committed tables, which
/// replaces the committed state only on commit. It understands exactly the
/// statements the sync engine issues.
#[derive(Default)]
pub struct FakeTarget {
    shared: Arc<Shared>,
}

impl FakeTarget {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_failures(failures: Failures) -> Arc<Self> {
        let target = Self::new();
        target.set_failures(failures);
        target
    }

    pub fn set_failures(&self, failures: Failures) {
        *self.shared.failures.lock().unwrap() = failures;
    }

    /// Create a committed `public.<name>` table directly.
    pub fn seed(&self, name: &str, columns: &[(&str, &str)], rows: Vec<Vec<SqlValue>>) {
        let table = FakeTable {
            columns: columns
                .iter()
                .map(|(n, t)| (n.to_string(), t.to_string()))
                .collect(),
            rows,
        };
        self.shared
            .committed
            .lock()
            .unwrap()
            .insert(format!("public.{}", name), table);
    }

    /// Committed `public.<name>`.
    pub fn table(&self, name: &str) -> Option<FakeTable> {
        self.shared
            .committed
            .lock()
            .unwrap()
            .get(&format!("public.{}", name))
            .cloned()
    }

    /// Committed tables as `schema.table` keys.
    pub fn table_names(&self) -> Vec<String> {
        self.shared.committed.lock().unwrap().keys().cloned().collect()
    }

    /// Every statement executed, committed or not.
    pub fn statements(&self) -> Vec<String> {
        self.shared.statements.lock().unwrap().clone()
    }

    pub fn begins(&self) -> usize {
        self.shared.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }
}

fn fake_err(message: impl Into<String>) -> SyncError {
    SyncError::pool(message.into(), "fake target")
}

#[async_trait]
impl TargetWriter for FakeTarget {
    async fn begin(&self) -> Result<Box<dyn TargetTransaction>> {
        if self.shared.failures.lock().unwrap().begin {
            return Err(fake_err("could not begin transaction"));
        }
        self.shared.begins.fetch_add(1, Ordering::SeqCst);
        let working = self.shared.committed.lock().unwrap().clone();
        Ok(Box::new(FakeTransaction {
            shared: self.shared.clone(),
            working,
        }))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "fake"
    }

    async fn close(&self) {}
}

pub struct FakeTransaction {
    shared: Arc<Shared>,
    working: Tables,
}

impl FakeTransaction {
    fn failures(&self) -> Failures {
        self.shared.failures.lock().unwrap().clone()
    }

    fn apply(&mut self, stmt: &str) -> Result<()> {
        let failures = self.failures();

        if let Some(rest) = stmt.strip_prefix("CREATE TABLE ") {
            if failures.create {
                return Err(fake_err("permission denied for schema public"));
            }
            let (key, rest) = parse_qualified(rest)?;
            if self.working.contains_key(&key) {
                return Err(fake_err(format!("relation {} already exists", key)));
            }
            let table = FakeTable {
                columns: parse_column_defs(rest)?,
                rows: Vec::new(),
            };
            self.working.insert(key, table);
            return Ok(());
        }

        if let Some(rest) = stmt.strip_prefix("ALTER TABLE ") {
            if failures.swap {
                return Err(fake_err("lock timeout"));
            }
            let (if_exists, rest) = match rest.strip_prefix("IF EXISTS ") {
                Some(rest) => (true, rest),
                None => (false, rest),
            };
            let (key, rest) = parse_qualified(rest)?;
            let rest = rest
                .trim()
                .strip_prefix("RENAME TO ")
                .ok_or_else(|| fake_err(format!("unsupported ALTER: {}", stmt)))?;
            let (new_name, _) = parse_ident(rest.trim())?;
            let schema = key.split('.').next().unwrap_or_default().to_string();
            let new_key = format!("{}.{}", schema, new_name);

            match self.working.remove(&key) {
                Some(table) => {
                    if self.working.contains_key(&new_key) {
                        return Err(fake_err(format!("relation {} already exists", new_key)));
                    }
                    self.working.insert(new_key, table);
                }
                None if if_exists => {}
                None => return Err(fake_err(format!("relation {} does not exist", key))),
            }
            return Ok(());
        }

        if let Some(rest) = stmt.strip_prefix("DROP TABLE ") {
            let (if_exists, rest) = match rest.strip_prefix("IF EXISTS ") {
                Some(rest) => (true, rest),
                None => (false, rest),
            };
            let (key, _) = parse_qualified(rest)?;
            if self.working.remove(&key).is_none() && !if_exists {
                return Err(fake_err(format!("relation {} does not exist", key)));
            }
            return Ok(());
        }

        Err(fake_err(format!("unsupported statement: {}", stmt)))
    }
}

#[async_trait]
impl TargetTransaction for FakeTransaction {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.shared.statements.lock().unwrap().push(sql.to_string());
        for stmt in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            self.apply(stmt)?;
        }
        Ok(())
    }

    async fn copy_in<'a>(
        &'a mut self,
        table: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<Box<dyn BulkLoader + 'a>> {
        let (key, _) = parse_qualified(table)?;
        let existing = self
            .working
            .get(&key)
            .ok_or_else(|| fake_err(format!("relation {} does not exist", key)))?;
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        if existing.column_names() != names {
            return Err(fake_err(format!("column list {:?} does not match {}", names, key)));
        }
        let types = existing.columns.iter().map(|(_, t)| t.clone()).collect();

        Ok(Box::new(FakeLoader {
            failures: self.failures(),
            tx: self,
            key,
            types,
            rows: Vec::new(),
        }))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.failures().commit {
            return Err(fake_err("could not serialize access"));
        }
        *self.shared.committed.lock().unwrap() = self.working.clone();
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.failures().rollback {
            return Err(fake_err("connection lost during rollback"));
        }
        Ok(())
    }
}

struct FakeLoader<'a> {
    tx: &'a mut FakeTransaction,
    failures: Failures,
    key: String,
    types: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

fn value_fits(value: &SqlValue, pg_type: &str) -> bool {
    matches!(
        (value, pg_type),
        (SqlValue::Null, _)
            | (SqlValue::Text(_), "text")
            | (SqlValue::I32(_), "integer")
            | (SqlValue::Bool(_), "boolean")
            | (SqlValue::TimestampTz(_), "timestamp with time zone")
    )
}

#[async_trait]
impl<'a> BulkLoader for FakeLoader<'a> {
    async fn send(&mut self, row: &[SqlValue]) -> Result<()> {
        let n = self.rows.len() + 1;
        if self.failures.copy_row == Some(n) {
            return Err(fake_err(format!("COPY failed at row {}", n)));
        }
        if row.len() != self.types.len() {
            return Err(fake_err(format!("row {} has {} fields", n, row.len())));
        }
        for (value, pg_type) in row.iter().zip(&self.types) {
            if !value_fits(value, pg_type) {
                return Err(fake_err(format!("{:?} is not valid for {}", value, pg_type)));
            }
        }
        self.rows.push(row.to_vec());

        if let Some((after, token)) = &self.failures.cancel_after_rows {
            if *after == n {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        if self.failures.finish {
            return Err(fake_err("COPY finalize failed"));
        }
        let FakeLoader { tx, key, rows, .. } = *self;
        let count = rows.len() as u64;
        tx.working
            .get_mut(&key)
            .ok_or_else(|| fake_err(format!("relation {} vanished", key)))?
            .rows
            .extend(rows);
        Ok(count)
    }
}

/// Parse one `"quoted"` identifier, returning it unescaped and the rest.
fn parse_ident(s: &str) -> Result<(String, &str)> {
    let body = s
        .strip_prefix('"')
        .ok_or_else(|| fake_err(format!("expected quoted identifier: {}", s)))?;
    let mut out = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '"' {
            if matches!(chars.peek(), Some((_, '"'))) {
                out.push('"');
                chars.next();
            } else {
                return Ok((out, &body[i + 1..]));
            }
        } else {
            out.push(c);
        }
    }
    Err(fake_err(format!("unterminated identifier: {}", s)))
}

/// Parse `"schema"."table"`, returning `schema.table` and the rest.
fn parse_qualified(s: &str) -> Result<(String, &str)> {
    let (schema, rest) = parse_ident(s.trim_start())?;
    let rest = rest
        .strip_prefix('.')
        .ok_or_else(|| fake_err(format!("expected qualified name: {}", s)))?;
    let (table, rest) = parse_ident(rest)?;
    Ok((format!("{}.{}", schema, table), rest))
}

/// Parse ` (\n    "a" text,\n    "b" integer\n)`.
fn parse_column_defs(s: &str) -> Result<Vec<(String, String)>> {
    let body = s
        .trim()
        .strip_prefix('(')
        .and_then(|b| b.strip_suffix(')'))
        .ok_or_else(|| fake_err(format!("malformed column list: {}", s)))?;
    let mut columns = Vec::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let line = line.trim_end_matches(',');
        let (name, pg_type) = parse_ident(line)?;
        columns.push((name, pg_type.trim().to_string()));
    }
    Ok(columns)
}
