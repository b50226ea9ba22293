//! Execution context: one connection plus its transaction and lock state.
//!
//! A context is not shareable between concurrent operations; it is handed out
//! by a [`DaoContextPool`](super::DaoContextPool) to one logical unit of work at
//! a time. Invalid transaction transitions are reported as `Ok(false)`, never as
//! errors.

use super::connection::DbConnection;
use super::types::Record;
use crate::config::DataSourceConfig;
use crate::error::{DbError, DbResult};
use crate::expr::Value;
use crate::sql::{Dialect, IdentityFetch, InsertSql, SqlGenResult};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Transaction isolation requested at `begin_transaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Whatever the server defaults to.
    #[default]
    Unspecified,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn keywords(&self) -> Option<&'static str> {
        match self {
            Self::Unspecified => None,
            Self::ReadUncommitted => Some("READ UNCOMMITTED"),
            Self::ReadCommitted => Some("READ COMMITTED"),
            Self::RepeatableRead => Some("REPEATABLE READ"),
            Self::Serializable => Some("SERIALIZABLE"),
        }
    }

    /// Statements that open a transaction at this level.
    pub fn begin_statements(&self, dialect: Dialect) -> Vec<String> {
        match (dialect, self.keywords()) {
            // SQLite transactions are always serializable; IMMEDIATE takes the
            // write lock up front instead of on first write.
            (Dialect::SQLite, _) if *self == Self::Serializable => vec!["BEGIN IMMEDIATE".into()],
            (Dialect::SQLite, _) => vec!["BEGIN".into()],
            (Dialect::PostgreSql, Some(level)) => vec![format!("BEGIN ISOLATION LEVEL {}", level)],
            (Dialect::PostgreSql, None) => vec!["BEGIN".into()],
            (Dialect::MySql, Some(level)) => vec![
                format!("SET TRANSACTION ISOLATION LEVEL {}", level),
                "START TRANSACTION".into(),
            ],
            (Dialect::MySql, None) => vec!["START TRANSACTION".into()],
            (Dialect::SqlServer, Some(level)) => vec![
                format!("SET TRANSACTION ISOLATION LEVEL {}", level),
                "BEGIN TRANSACTION".into(),
            ],
            (Dialect::SqlServer, None) => vec!["BEGIN TRANSACTION".into()],
        }
    }
}

/// Identifies the holder of a context's advisory lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockOwner(u64);

impl LockOwner {
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for LockOwner {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DaoContext {
    id: String,
    config: Arc<DataSourceConfig>,
    /// Shared with the owning pool so a data source can be closed for writes.
    writable: Arc<AtomicBool>,
    connection: Option<DbConnection>,
    transaction: Option<IsolationLevel>,
    lock_owner: Option<LockOwner>,
    lock_depth: usize,
    broken: bool,
    last_active: Instant,
}

impl std::fmt::Debug for DaoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaoContext")
            .field("id", &self.id)
            .field("data_source", &self.config.name)
            .field("open", &self.connection.is_some())
            .field("transaction", &self.transaction)
            .field("lock_depth", &self.lock_depth)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl DaoContext {
    /// Create a context for a data source. The connection opens lazily.
    pub fn new(config: Arc<DataSourceConfig>) -> Self {
        let writable = Arc::new(AtomicBool::new(config.writable));
        Self::with_availability(config, writable)
    }

    pub(crate) fn with_availability(
        config: Arc<DataSourceConfig>,
        writable: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id: generate_context_id(),
            config,
            writable,
            connection: None,
            transaction: None,
            lock_owner: None,
            lock_depth: 0,
            broken: false,
            last_active: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data_source(&self) -> &str {
        &self.config.name
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Set after a connection-level failure; a broken context is never reused.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.transaction
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    pub fn idle_time(&self) -> Duration {
        self.last_active.elapsed()
    }

    /// Fit for reuse: not broken and active within `keep_alive`.
    pub fn is_valid(&self, keep_alive: Duration) -> bool {
        !self.broken && self.idle_time() <= keep_alive
    }

    fn command_timeout(&self) -> Duration {
        self.config.pool.command_timeout()
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Open the connection if missing, otherwise check that it still answers.
    ///
    /// A failed check marks the context broken.
    pub async fn ensure_open(&mut self) -> DbResult<()> {
        let limit = self.command_timeout();
        let Some(conn) = self.connection.as_mut() else {
            return self.open().await;
        };
        let result = with_timeout("ping", limit, conn.ping()).await;
        self.observe(result)
    }

    async fn open(&mut self) -> DbResult<()> {
        let limit = self.command_timeout();
        let result = with_timeout("connect", limit, DbConnection::connect(&self.config)).await;
        let conn = self.observe(result)?;
        debug!(context_id = %self.id, data_source = %self.config.name, "Connection opened");
        self.connection = Some(conn);
        Ok(())
    }

    async fn connection(&mut self) -> DbResult<&mut DbConnection> {
        if self.connection.is_none() {
            self.open().await?;
        }
        self.connection
            .as_mut()
            .ok_or_else(|| DbError::internal("connection missing after open"))
    }

    /// Record activity and flag connection-level failures.
    fn observe<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        self.last_active = Instant::now();
        if let Err(e) = &result {
            if e.is_connection_failure() && !self.broken {
                warn!(context_id = %self.id, error = %e, "Context marked broken");
                self.broken = true;
            }
        }
        result
    }

    /// Close the connection. The context is consumed.
    pub async fn close(mut self) {
        if let Some(conn) = self.connection.take() {
            if let Err(e) = conn.close().await {
                debug!(context_id = %self.id, error = %e, "Error while closing connection");
            }
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begin a transaction. Returns `false` if one is already open.
    pub async fn begin_transaction(&mut self, isolation: IsolationLevel) -> DbResult<bool> {
        if self.transaction.is_some() {
            return Ok(false);
        }

        let limit = self.command_timeout();
        let statements = isolation.begin_statements(self.dialect());
        let conn = self.connection().await?;
        let mut result = Ok(());
        for sql in &statements {
            result = with_timeout("begin transaction", limit, conn.execute_raw(sql)).await;
            if result.is_err() {
                break;
            }
        }
        if let Err(e) = self.observe(result) {
            self.discard_transaction().await;
            return Err(e);
        }

        self.transaction = Some(isolation);
        info!(
            context_id = %self.id,
            data_source = %self.config.name,
            isolation = ?isolation,
            "Transaction started"
        );
        Ok(true)
    }

    /// Commit the open transaction. Returns `false` if none is open.
    ///
    /// The transaction state is cleared whether or not the commit succeeds.
    pub async fn commit(&mut self) -> DbResult<bool> {
        if self.transaction.take().is_none() {
            return Ok(false);
        }
        match self.finish_transaction("COMMIT").await {
            Ok(()) => {
                info!(context_id = %self.id, "Transaction committed");
                Ok(true)
            }
            Err(e) => {
                self.discard_transaction().await;
                Err(e)
            }
        }
    }

    /// Roll back the open transaction. Returns `false` if none is open.
    pub async fn rollback(&mut self) -> DbResult<bool> {
        if self.transaction.take().is_none() {
            return Ok(false);
        }
        self.finish_transaction("ROLLBACK").await?;
        info!(context_id = %self.id, "Transaction rolled back");
        Ok(true)
    }

    async fn finish_transaction(&mut self, sql: &'static str) -> DbResult<()> {
        let limit = self.command_timeout();
        let conn = self.connection().await?;
        let result = with_timeout(sql, limit, conn.execute_raw(sql)).await;
        self.observe(result)
    }

    /// Best-effort rollback of whatever the server still has open.
    async fn discard_transaction(&mut self) {
        if self.broken {
            return;
        }
        let limit = self.command_timeout();
        if let Some(conn) = self.connection.as_mut() {
            if let Err(e) = with_timeout("rollback", limit, conn.execute_raw("ROLLBACK")).await {
                debug!(context_id = %self.id, error = %e, "Discarding transaction failed");
            }
        }
    }

    // =========================================================================
    // Advisory lock
    // =========================================================================

    /// Take the lock for `owner`. Reentrant for the current holder; a different
    /// owner is refused immediately.
    pub fn acquire_lock(&mut self, owner: LockOwner) -> bool {
        match self.lock_owner {
            None => {
                self.lock_owner = Some(owner);
                self.lock_depth = 1;
                true
            }
            Some(current) if current == owner => {
                self.lock_depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Drop one reentry. The lock is free again when the count reaches zero.
    pub fn release_lock(&mut self, owner: LockOwner) -> bool {
        match self.lock_owner {
            Some(current) if current == owner => {
                self.lock_depth -= 1;
                if self.lock_depth == 0 {
                    self.lock_owner = None;
                }
                true
            }
            _ => false,
        }
    }

    pub fn lock_count(&self) -> usize {
        self.lock_depth
    }

    pub fn lock_owner(&self) -> Option<LockOwner> {
        self.lock_owner
    }

    /// Return the context to a clean state: roll back any open transaction
    /// (errors are logged, not returned) and release every lock reentry.
    pub async fn reset(&mut self) {
        if self.transaction.is_some() {
            if let Err(e) = self.rollback().await {
                warn!(context_id = %self.id, error = %e, "Rollback during reset failed");
            }
        }
        self.lock_owner = None;
        self.lock_depth = 0;
        self.last_active = Instant::now();
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn ensure_writable(&self, operation: &str) -> DbResult<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(DbError::permission(
                operation,
                format!("data source '{}' is not available for writes", self.config.name),
            ))
        }
    }

    async fn run_execute(&mut self, operation: &str, statement: &SqlGenResult) -> DbResult<u64> {
        debug!(
            context_id = %self.id,
            sql = %statement.sql,
            params = statement.params.len(),
            "Executing statement"
        );
        let limit = self.command_timeout();
        let conn = self.connection().await?;
        let result = with_timeout(
            operation,
            limit,
            conn.execute(&statement.sql, &statement.params),
        )
        .await;
        self.observe(result)
    }

    async fn run_fetch(&mut self, operation: &str, statement: &SqlGenResult) -> DbResult<Vec<Record>> {
        debug!(
            context_id = %self.id,
            sql = %statement.sql,
            params = statement.params.len(),
            "Executing query"
        );
        let limit = self.command_timeout();
        let conn = self.connection().await?;
        let result = with_timeout(
            operation,
            limit,
            conn.fetch_all(&statement.sql, &statement.params),
        )
        .await;
        self.observe(result)
    }

    /// Run a data-modifying statement and return the affected row count.
    pub async fn execute(&mut self, statement: &SqlGenResult) -> DbResult<u64> {
        self.ensure_writable("execute")?;
        self.run_execute("execute", statement).await
    }

    pub async fn query(&mut self, statement: &SqlGenResult) -> DbResult<Vec<Record>> {
        self.run_fetch("query", statement).await
    }

    /// First column of the first row, if any.
    pub async fn query_scalar(&mut self, statement: &SqlGenResult) -> DbResult<Option<Value>> {
        let rows = self.run_fetch("query", statement).await?;
        Ok(rows.into_iter().next().and_then(Record::into_first))
    }

    /// Run an INSERT and read back the generated identity on the same connection.
    pub async fn insert_returning_identity(&mut self, insert: &InsertSql) -> DbResult<Option<Value>> {
        self.ensure_writable("insert")?;
        match insert.identity {
            IdentityFetch::None => {
                self.run_execute("insert", &insert.statement).await?;
                Ok(None)
            }
            IdentityFetch::Returning => {
                let rows = self.run_fetch("insert", &insert.statement).await?;
                Ok(rows.into_iter().next().and_then(Record::into_first))
            }
            IdentityFetch::Query(sql) => {
                self.run_execute("insert", &insert.statement).await?;
                let rows = self.run_fetch("identity", &SqlGenResult::new(sql)).await?;
                Ok(rows.into_iter().next().and_then(Record::into_first))
            }
        }
    }
}

async fn with_timeout<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = DbResult<T>>,
) -> DbResult<T> {
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DbError::timeout(
            operation,
            u32::try_from(limit.as_secs()).unwrap_or(u32::MAX),
        )),
    }
}

fn generate_context_id() -> String {
    format!("ctx_{}", uuid::Uuid::new_v4().simple())
}
