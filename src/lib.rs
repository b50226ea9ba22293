//! LiteORM core library
//!
//! The query/execution core of a lightweight ORM: a metadata catalog mapping
//! entities to tables and views, a typed expression IR, a multi-dialect SQL
//! compiler, pooled execution contexts (SQLite, PostgreSQL, MySQL) and additive
//! schema reconciliation.

pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod expr;
pub mod meta;
pub mod sql;
pub mod sync;

pub use config::{Config, DataSourceConfig, PoolOptions};
pub use db::{ContextGuard, DaoContext, DaoContextPool, DaoContextPoolFactory, IsolationLevel};
pub use entity::Entity;
pub use error::{DbError, DbResult};
pub use expr::{Expr, SelectExpr, TableExpr, Value};
pub use meta::{Catalog, EntityRef};
pub use sql::{Dialect, SqlGen, SqlGenResult};
pub use sync::{SchemaSync, SyncPlan, SyncReport};
