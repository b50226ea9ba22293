//! Live schema introspection used by reconciliation.
//!
//! Queries are kept per database in the `queries` submodule. Every query takes
//! the table name as its single parameter and runs in the context's current
//! schema (`current_schema()` on PostgreSQL, `DATABASE()` on MySQL).

use super::context::DaoContext;
use crate::error::{DbError, DbResult};
use crate::expr::Value;
use crate::sql::{Dialect, SqlGenResult};
use tracing::debug;

/// Schema inspector for an open context.
pub struct SchemaInspector;

impl SchemaInspector {
    pub async fn table_exists(ctx: &mut DaoContext, table: &str) -> DbResult<bool> {
        let sql = match ctx.dialect() {
            Dialect::SQLite => queries::sqlite::TABLE_EXISTS,
            Dialect::PostgreSql => queries::postgres::TABLE_EXISTS,
            Dialect::MySql => queries::mysql::TABLE_EXISTS,
            Dialect::SqlServer => return Err(unsupported()),
        };
        let count = ctx.query_scalar(&with_table(sql, table)).await?;
        let exists = count.and_then(|v| v.as_i64()).unwrap_or(0) > 0;
        debug!(table = %table, exists, "Checked table existence");
        Ok(exists)
    }

    /// Column names of `table`, in declaration order.
    pub async fn column_names(ctx: &mut DaoContext, table: &str) -> DbResult<Vec<String>> {
        let sql = match ctx.dialect() {
            Dialect::SQLite => queries::sqlite::COLUMN_NAMES,
            Dialect::PostgreSql => queries::postgres::COLUMN_NAMES,
            Dialect::MySql => queries::mysql::COLUMN_NAMES,
            Dialect::SqlServer => return Err(unsupported()),
        };
        Self::names(ctx, sql, table).await
    }

    pub async fn index_names(ctx: &mut DaoContext, table: &str) -> DbResult<Vec<String>> {
        let sql = match ctx.dialect() {
            Dialect::SQLite => queries::sqlite::INDEX_NAMES,
            Dialect::PostgreSql => queries::postgres::INDEX_NAMES,
            Dialect::MySql => queries::mysql::INDEX_NAMES,
            Dialect::SqlServer => return Err(unsupported()),
        };
        Self::names(ctx, sql, table).await
    }

    async fn names(ctx: &mut DaoContext, sql: &str, table: &str) -> DbResult<Vec<String>> {
        let rows = ctx.query(&with_table(sql, table)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_first())
            .filter_map(name_text)
            .collect())
    }
}

fn with_table(sql: &str, table: &str) -> SqlGenResult {
    let mut statement = SqlGenResult::new(sql);
    statement.params.push(("p0".to_string(), Value::from(table)));
    statement
}

/// MySQL reports some catalog columns as binary strings.
fn name_text(value: Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s),
        Value::Bytes(b) => Some(String::from_utf8_lossy(&b).into_owned()),
        _ => None,
    }
}

fn unsupported() -> DbError {
    DbError::configuration("Schema introspection is not available for SQL Server")
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod sqlite {
        pub const TABLE_EXISTS: &str = "SELECT COUNT(*) FROM sqlite_master \
            WHERE type = 'table' AND name = ?1 COLLATE NOCASE";

        pub const COLUMN_NAMES: &str = "SELECT name FROM pragma_table_info(?1) ORDER BY cid";

        pub const INDEX_NAMES: &str = "SELECT name FROM sqlite_master \
            WHERE type = 'index' AND tbl_name = ?1 COLLATE NOCASE";
    }

    pub mod postgres {
        pub const TABLE_EXISTS: &str = r#"
            SELECT COUNT(*)
            FROM information_schema.tables
            WHERE table_schema = current_schema()
            AND table_name = $1
            "#;

        pub const COLUMN_NAMES: &str = r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema()
            AND table_name = $1
            ORDER BY ordinal_position
            "#;

        pub const INDEX_NAMES: &str = r#"
            SELECT indexname::text
            FROM pg_indexes
            WHERE schemaname = current_schema()
            AND tablename = $1
            "#;
    }

    pub mod mysql {
        pub const TABLE_EXISTS: &str = r#"
            SELECT COUNT(*)
            FROM information_schema.tables
            WHERE table_schema = DATABASE()
            AND table_name = ?
            "#;

        pub const COLUMN_NAMES: &str = r#"
            SELECT column_name
            FROM information_schema.columns
            WHERE table_schema = DATABASE()
            AND table_name = ?
            ORDER BY ordinal_position
            "#;

        pub const INDEX_NAMES: &str = r#"
            SELECT DISTINCT index_name
            FROM information_schema.statistics
            WHERE table_schema = DATABASE()
            AND table_name = ?
            "#;
    }
}
