//! Context pooling.
//!
//! A [`DaoContextPool`] caps how many *idle* contexts are retained per data
//! source; it never limits how many are in use. `acquire` always succeeds,
//! creating a fresh context when no retained one is fit for reuse.

use super::context::DaoContext;
use crate::config::DataSourceConfig;
use crate::error::{DbError, DbResult};
use std::collections::{BTreeMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Counters for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub idle: usize,
    pub created: usize,
    pub disposed: usize,
}

pub struct DaoContextPool {
    config: Arc<DataSourceConfig>,
    idle: Mutex<VecDeque<DaoContext>>,
    writable: Arc<AtomicBool>,
    created: AtomicUsize,
    disposed: AtomicUsize,
    closed: AtomicBool,
}

impl std::fmt::Debug for DaoContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaoContextPool")
            .field("data_source", &self.config.name)
            .field("stats", &self.stats())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl DaoContextPool {
    pub fn new(config: DataSourceConfig) -> Self {
        let writable = Arc::new(AtomicBool::new(config.writable));
        Self {
            config: Arc::new(config),
            idle: Mutex::new(VecDeque::new()),
            writable,
            created: AtomicUsize::new(0),
            disposed: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    pub fn pool_size(&self) -> usize {
        self.config.pool.pool_size
    }

    fn idle_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<DaoContext>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a retained context that is still fit for use, or create one.
    ///
    /// Stale and broken candidates are disposed along the way. A reused
    /// context is reset first, since one queued by a dropped guard may still
    /// hold a transaction.
    pub async fn acquire(&self) -> DaoContext {
        let keep_alive = self.config.pool.keep_alive();
        loop {
            let candidate = self.idle_queue().pop_front();
            let Some(mut ctx) = candidate else {
                break;
            };
            if !ctx.is_valid(keep_alive) {
                self.dispose(ctx, "stale").await;
                continue;
            }
            ctx.reset().await;
            if ctx.is_broken() {
                self.dispose(ctx, "broken during reset").await;
                continue;
            }
            debug!(data_source = %self.config.name, context_id = %ctx.id(), "Reusing context");
            return ctx;
        }

        let ctx = DaoContext::with_availability(Arc::clone(&self.config), Arc::clone(&self.writable));
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(data_source = %self.config.name, context_id = %ctx.id(), "Created context");
        ctx
    }

    /// Hand a context back. It is reset, then retained unless it is unfit,
    /// the pool is closed, or retention would exceed the pool size (the oldest
    /// idle contexts are evicted first).
    pub async fn return_context(&self, mut ctx: DaoContext) {
        ctx.reset().await;

        if let Some(reason) = self.rejection(&ctx) {
            self.dispose(ctx, reason).await;
            return;
        }
        for old in self.retain(ctx) {
            self.dispose(old, "over capacity").await;
        }
    }

    /// Synchronous return used when a guard is dropped. Nothing is awaited:
    /// the context is queued as is and reset by the `acquire` that picks it up.
    /// Rejected contexts are dropped, which closes their connection.
    fn requeue(&self, ctx: DaoContext) {
        if let Some(reason) = self.rejection(&ctx) {
            self.record_disposal(&ctx, reason);
            return;
        }
        for old in self.retain(ctx) {
            self.record_disposal(&old, "over capacity");
        }
    }

    fn rejection(&self, ctx: &DaoContext) -> Option<&'static str> {
        if self.closed.load(Ordering::Acquire) {
            Some("pool closed")
        } else if !ctx.is_valid(self.config.pool.keep_alive()) {
            Some("invalid")
        } else {
            None
        }
    }

    /// Queue `ctx` at the back and hand out whatever now exceeds the pool size.
    fn retain(&self, ctx: DaoContext) -> Vec<DaoContext> {
        let mut idle = self.idle_queue();
        idle.push_back(ctx);
        let excess = idle.len().saturating_sub(self.pool_size());
        idle.drain(..excess).collect()
    }

    fn record_disposal(&self, ctx: &DaoContext, reason: &str) {
        self.disposed.fetch_add(1, Ordering::Relaxed);
        if ctx.is_broken() {
            warn!(data_source = %self.config.name, context_id = %ctx.id(), reason, "Disposing broken context");
        } else {
            debug!(data_source = %self.config.name, context_id = %ctx.id(), reason, "Disposing context");
        }
    }

    async fn dispose(&self, ctx: DaoContext, reason: &str) {
        self.record_disposal(&ctx, reason);
        ctx.close().await;
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle_queue().len(),
            created: self.created.load(Ordering::Relaxed),
            disposed: self.disposed.load(Ordering::Relaxed),
        }
    }

    /// Whether new writes are accepted on this data source.
    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    /// Refuse writes from every context of this pool, including ones in use.
    pub fn mark_unavailable(&self) {
        if self.writable.swap(false, Ordering::AcqRel) {
            warn!(data_source = %self.config.name, "Data source marked unavailable for writes");
        }
    }

    /// Dispose all idle contexts; contexts returned afterwards are disposed too.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<DaoContext> = self.idle_queue().drain(..).collect();
        for ctx in drained {
            self.dispose(ctx, "pool closed").await;
        }
        info!(data_source = %self.config.name, "Context pool closed");
    }

    /// Acquire a context that goes back to this pool when the guard is released.
    pub async fn acquire_guarded(self: &Arc<Self>) -> ContextGuard {
        let ctx = self.acquire().await;
        ContextGuard::new(ctx, Arc::clone(self))
    }
}

/// RAII guard for a pooled context.
///
/// Dereferences to the [`DaoContext`]. Prefer `release().await`, which resets
/// the context (rolling back an open transaction) before returning it. On drop
/// the context is queued without being reset; the next `acquire` resets it.
///
/// ```ignore
/// let mut ctx = factory.acquire(None).await?;
/// ctx.execute(&statement).await?;
/// ctx.release().await;
/// ```
pub struct ContextGuard {
    ctx: Option<DaoContext>,
    pool: Arc<DaoContextPool>,
}

impl std::fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextGuard")
            .field("ctx", &self.ctx)
            .field("data_source", &self.pool.name())
            .finish_non_exhaustive()
    }
}

impl ContextGuard {
    fn new(ctx: DaoContext, pool: Arc<DaoContextPool>) -> Self {
        Self {
            ctx: Some(ctx),
            pool,
        }
    }

    pub fn pool(&self) -> &Arc<DaoContextPool> {
        &self.pool
    }

    /// Explicitly return the context (preferred over relying on Drop).
    pub async fn release(mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.return_context(ctx).await;
        }
    }
}

impl Deref for ContextGuard {
    type Target = DaoContext;

    fn deref(&self) -> &DaoContext {
        match &self.ctx {
            Some(ctx) => ctx,
            None => unreachable!("context is only taken by release or drop"),
        }
    }
}

impl DerefMut for ContextGuard {
    fn deref_mut(&mut self) -> &mut DaoContext {
        match &mut self.ctx {
            Some(ctx) => ctx,
            None => unreachable!("context is only taken by release or drop"),
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        warn!(
            data_source = %self.pool.name(),
            context_id = %ctx.id(),
            "Context returned via Drop - consider using explicit release()"
        );
        self.pool.requeue(ctx);
    }
}

/// One pool per configured data source, built once at startup.
#[derive(Debug)]
pub struct DaoContextPoolFactory {
    pools: BTreeMap<String, Arc<DaoContextPool>>,
    default_name: String,
}

impl DaoContextPoolFactory {
    /// Build the pools. The default is `default_name` if given, else the
    /// first data source.
    pub fn new(configs: Vec<DataSourceConfig>, default_name: Option<&str>) -> DbResult<Self> {
        let first = configs
            .first()
            .map(|c| c.name.clone())
            .ok_or_else(|| DbError::configuration("At least one data source must be configured"))?;

        let mut pools = BTreeMap::new();
        for config in configs {
            let name = config.name.clone();
            if pools.contains_key(&name) {
                return Err(DbError::configuration(format!(
                    "Data source '{}' is configured more than once",
                    name
                )));
            }
            info!(
                data_source = %name,
                dialect = %config.dialect,
                pool_size = config.pool.pool_size,
                writable = config.writable,
                "Creating context pool"
            );
            pools.insert(name, Arc::new(DaoContextPool::new(config)));
        }

        let default_name = default_name.map(String::from).unwrap_or(first);
        if !pools.contains_key(&default_name) {
            return Err(DbError::configuration(format!(
                "Default data source '{}' is not configured",
                default_name
            )));
        }

        Ok(Self {
            pools,
            default_name,
        })
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn pool_exists(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.pools.keys().map(String::as_str).collect()
    }

    /// The named pool, or the default one for `None`. Unknown names are a
    /// configuration error.
    pub fn pool(&self, name: Option<&str>) -> DbResult<&Arc<DaoContextPool>> {
        let name = name.unwrap_or(self.default_name.as_str());
        self.pools.get(name).ok_or_else(|| {
            DbError::configuration(format!(
                "Data source '{}' is not configured (known: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    pub async fn acquire(&self, name: Option<&str>) -> DbResult<ContextGuard> {
        Ok(self.pool(name)?.acquire_guarded().await)
    }

    pub fn mark_unavailable(&self, name: &str) -> DbResult<()> {
        self.pool(Some(name))?.mark_unavailable();
        Ok(())
    }

    pub async fn close_all(&self) {
        for pool in self.pools.values() {
            pool.close().await;
        }
        info!("All context pools closed");
    }
}
