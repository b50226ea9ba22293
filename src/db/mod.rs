//! Database execution layer.
//!
//! This module provides:
//! - Single connections per database (`DbConnection`)
//! - Execution contexts with transaction and lock state (`DaoContext`)
//! - Context pools and the per-data-source factory
//! - Entity CRUD, declarative transactions and atomic batches
//! - Schema introspection and row decoding

pub mod connection;
pub mod context;
mod crud;
pub mod params;
pub mod pool;
pub mod schema;
pub mod transaction;
pub mod types;

pub use connection::DbConnection;
pub use context::{DaoContext, IsolationLevel, LockOwner};
pub use pool::{ContextGuard, DaoContextPool, DaoContextPoolFactory, PoolStats};
pub use schema::SchemaInspector;
pub use transaction::{BatchOperation, EntityOperation, execute_batch, with_transaction};
pub use types::{Record, TypeCategory};
