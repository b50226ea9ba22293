//! Statement generation: queries, entity writes and DDL.

use super::builder::{SqlBuildContext, Target, resolve_target};
use super::dialect::{Dialect, IdentityFetch};
use crate::entity::Entity;
use crate::error::{DbError, DbResult};
use crate::expr::{Expr, Selectable, SelectExpr, TableExpr, Value};
use crate::meta::{Catalog, ColumnDefinition, EntityRef, TableDefinition};
use sqlparser::parser::Parser;
use std::sync::Arc;
use tracing::debug;

/// Generated SQL text plus its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlGenResult {
    pub sql: String,
    pub params: Vec<(String, Value)>,
}

impl SqlGenResult {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.params.iter().map(|(_, v)| v)
    }

    /// Parse the generated text with the dialect's grammar.
    pub fn check_syntax(&self, dialect: Dialect) -> DbResult<()> {
        Parser::parse_sql(&*dialect.parser_dialect(), &self.sql)
            .map(|_| ())
            .map_err(|e| {
                DbError::internal(format!(
                    "Generated {} SQL does not parse: {} ({})",
                    dialect, e, self.sql
                ))
            })
    }
}

/// An INSERT and the way to read the generated identity back.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertSql {
    pub statement: SqlGenResult,
    pub identity: IdentityFetch,
    /// Property receiving the generated identity.
    pub identity_property: Option<String>,
}

/// Entry point of the compiler for one dialect.
#[derive(Debug, Clone)]
pub struct SqlGen<'c> {
    catalog: &'c Catalog,
    dialect: Dialect,
    table_name_args: Vec<String>,
}

impl<'c> SqlGen<'c> {
    pub fn new(catalog: &'c Catalog, dialect: Dialect) -> Self {
        Self {
            catalog,
            dialect,
            table_name_args: Vec::new(),
        }
    }

    /// Arguments substituted into sharded table names (`Log_{0}`).
    pub fn with_table_args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.table_name_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn context(&self, target: Target) -> SqlBuildContext<'c> {
        SqlBuildContext::new(self.dialect, self.catalog, target)
            .with_table_args(self.table_name_args.clone())
    }

    fn table_context(&self, entity: EntityRef) -> DbResult<(Arc<TableDefinition>, SqlBuildContext<'c>)> {
        let table = self.catalog.table_definition(entity)?;
        let ctx = self.context(Target::Table(Arc::clone(&table)));
        Ok((table, ctx))
    }

    fn finish(sql: String, ctx: SqlBuildContext<'_>) -> SqlGenResult {
        debug!(sql = %sql, params = ctx.params().len(), "Generated SQL");
        SqlGenResult {
            sql,
            params: ctx.into_params(),
        }
    }

    /// Render a bare expression against an entity's view.
    pub fn to_sql(&self, entity: EntityRef, expr: &Expr) -> DbResult<SqlGenResult> {
        let view = self.catalog.table_view(entity)?;
        let mut ctx = self.context(Target::View(view));
        let sql = ctx.expr(expr)?;
        Ok(Self::finish(sql, ctx))
    }

    pub fn select(&self, query: &SelectExpr) -> DbResult<SqlGenResult> {
        let table = query.parts().table;
        let target = resolve_target(self.catalog, table.entity, table.mode)?;
        let mut ctx = self.context(target);
        let sql = ctx.select_body(query)?;
        Ok(Self::finish(sql, ctx))
    }

    pub fn count(&self, entity: EntityRef, filter: Option<&Expr>) -> DbResult<SqlGenResult> {
        let items = [Expr::count_all().alias("Count")];
        let query = match filter {
            Some(filter) => TableExpr::view(entity).filter(filter.clone()).select(items),
            None => TableExpr::view(entity).select(items),
        };
        self.select(&query)
    }

    pub fn select_by_keys(&self, entity: EntityRef, keys: &[Value]) -> DbResult<SqlGenResult> {
        let table = self.catalog.table_definition(entity)?;
        let filter = key_filter(&table, keys)?;
        self.select(&TableExpr::view(entity).filter(filter).select_all())
    }

    // =========================================================================
    // Entity writes
    // =========================================================================

    pub fn insert<T: Entity>(&self, item: &T) -> DbResult<InsertSql> {
        self.insert_values(T::ENTITY, |p| item.get(p))
    }

    pub fn update<T: Entity>(&self, item: &T) -> DbResult<SqlGenResult> {
        self.update_values(T::ENTITY, |p| item.get(p))
    }

    pub fn delete<T: Entity>(&self, item: &T) -> DbResult<SqlGenResult> {
        let table = self.catalog.table_definition(T::ENTITY)?;
        let keys = table
            .keys()
            .map(|k| required(&table, k, item.get(&k.property)))
            .collect::<DbResult<Vec<_>>>()?;
        self.delete_by_keys(T::ENTITY, &keys)
    }

    pub fn insert_values(
        &self,
        entity: EntityRef,
        get: impl Fn(&str) -> Option<Value>,
    ) -> DbResult<InsertSql> {
        let (table, mut ctx) = self.table_context(entity)?;
        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        for column in table.columns.iter().filter(|c| c.is_insertable()) {
            let value = required(&table, column, get(&column.property))?;
            columns.push(ctx.quote(&column.name));
            placeholders.push(ctx.push_param(value));
        }

        let mut sql = format!("INSERT INTO {}", ctx.quote(&ctx.table_name(&table)));
        if columns.is_empty() {
            sql.push(' ');
            sql.push_str(self.dialect.empty_insert_values());
        } else {
            sql.push_str(&format!(
                " ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            ));
        }

        let identity = table.identity();
        let fetch = match identity {
            Some(column) => {
                let fetch = self.dialect.identity_fetch();
                if fetch == IdentityFetch::Returning {
                    sql.push_str(&format!(" RETURNING {}", ctx.quote(&column.name)));
                }
                fetch
            }
            None => IdentityFetch::None,
        };

        Ok(InsertSql {
            statement: Self::finish(sql, ctx),
            identity: fetch,
            identity_property: identity.map(|c| c.property.clone()),
        })
    }

    pub fn update_values(
        &self,
        entity: EntityRef,
        get: impl Fn(&str) -> Option<Value>,
    ) -> DbResult<SqlGenResult> {
        let (table, mut ctx) = self.table_context(entity)?;
        ensure_keys(&table)?;

        let mut assignments = Vec::new();
        for column in table.columns.iter().filter(|c| c.is_updatable()) {
            let value = required(&table, column, get(&column.property))?;
            let placeholder = ctx.push_param(value);
            assignments.push(format!("{} = {}", ctx.quote(&column.name), placeholder));
        }
        if assignments.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Entity '{}' has no updatable columns",
                table.entity
            )));
        }

        let mut conditions = Vec::new();
        for key in table.keys() {
            let value = required(&table, key, get(&key.property))?;
            let placeholder = ctx.push_param(value);
            conditions.push(format!("{} = {}", ctx.quote(&key.name), placeholder));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            ctx.quote(&ctx.table_name(&table)),
            assignments.join(", "),
            conditions.join(" AND ")
        );
        Ok(Self::finish(sql, ctx))
    }

    pub fn delete_by_keys(&self, entity: EntityRef, keys: &[Value]) -> DbResult<SqlGenResult> {
        let table = self.catalog.table_definition(entity)?;
        let filter = key_filter(&table, keys)?;
        self.delete_where(entity, &filter)
    }

    /// `UPDATE ... SET property = expr, ... WHERE filter` on the bare table.
    pub fn update_where(
        &self,
        entity: EntityRef,
        assignments: &[(&str, Expr)],
        filter: &Expr,
    ) -> DbResult<SqlGenResult> {
        if assignments.is_empty() {
            return Err(DbError::invalid_input("No columns to update"));
        }
        let (table, mut ctx) = self.table_context(entity)?;
        let mut sets = Vec::with_capacity(assignments.len());
        for (property, value) in assignments {
            let column = table
                .column(property)
                .filter(|c| c.is_updatable())
                .ok_or_else(|| {
                    DbError::invalid_input(format!(
                        "Property '{}' of '{}' is not an updatable column",
                        property, table.entity
                    ))
                })?;
            let rendered = ctx.expr(value)?;
            sets.push(format!("{} = {}", ctx.quote(&column.name), rendered));
        }
        let condition = ctx.expr(filter)?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            ctx.quote(&ctx.table_name(&table)),
            sets.join(", "),
            condition
        );
        Ok(Self::finish(sql, ctx))
    }

    pub fn delete_where(&self, entity: EntityRef, filter: &Expr) -> DbResult<SqlGenResult> {
        let (table, mut ctx) = self.table_context(entity)?;
        let condition = ctx.expr(filter)?;
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            ctx.quote(&ctx.table_name(&table)),
            condition
        );
        Ok(Self::finish(sql, ctx))
    }

    // =========================================================================
    // DDL
    // =========================================================================

    fn column_sql(&self, column: &ColumnDefinition, inline_identity: bool) -> String {
        let mut sql = format!(
            "{} {}",
            self.dialect.quote(&column.name),
            self.dialect.column_type(column)
        );
        if column.identity {
            sql.push(' ');
            sql.push_str(self.dialect.identity_clause());
            if inline_identity {
                return sql;
            }
        }
        if column.primary_key || !column.allow_null {
            sql.push_str(" NOT NULL");
        }
        sql
    }

    pub fn create_table(&self, table: &TableDefinition) -> SqlGenResult {
        let keys: Vec<&Arc<ColumnDefinition>> = table.keys().collect();
        // SQLite only autoincrements an inline `INTEGER PRIMARY KEY`.
        let inline_identity = self.dialect == Dialect::SQLite && table.identity().is_some();

        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_sql(c, inline_identity))
            .collect();
        if !keys.is_empty() && !inline_identity {
            let names: Vec<String> = keys.iter().map(|k| self.dialect.quote(&k.name)).collect();
            parts.push(format!("PRIMARY KEY ({})", names.join(", ")));
        }

        SqlGenResult::new(format!(
            "CREATE TABLE {} ({})",
            self.dialect.quote(&table.resolve_name(&self.table_name_args)),
            parts.join(", ")
        ))
    }

    /// Added columns are always nullable so existing rows stay valid.
    pub fn add_column(&self, table: &TableDefinition, column: &ColumnDefinition) -> SqlGenResult {
        SqlGenResult::new(format!(
            "ALTER TABLE {} {} {} {}",
            self.dialect.quote(&table.resolve_name(&self.table_name_args)),
            self.dialect.add_column_keyword(),
            self.dialect.quote(&column.name),
            self.dialect.column_type(column)
        ))
    }

    pub fn index_name(&self, table: &TableDefinition, column: &ColumnDefinition) -> String {
        format!(
            "IX_{}_{}",
            table.resolve_name(&self.table_name_args),
            column.name
        )
    }

    pub fn create_index(&self, table: &TableDefinition, column: &ColumnDefinition) -> SqlGenResult {
        SqlGenResult::new(format!(
            "CREATE {}INDEX {} ON {} ({})",
            if column.unique { "UNIQUE " } else { "" },
            self.dialect.quote(&self.index_name(table, column)),
            self.dialect.quote(&table.resolve_name(&self.table_name_args)),
            self.dialect.quote(&column.name)
        ))
    }
}

fn ensure_keys(table: &TableDefinition) -> DbResult<()> {
    if table.key_count() == 0 {
        return Err(DbError::invalid_input(format!(
            "Entity '{}' has no primary key",
            table.entity
        )));
    }
    Ok(())
}

fn key_filter(table: &TableDefinition, keys: &[Value]) -> DbResult<Expr> {
    ensure_keys(table)?;
    if keys.len() != table.key_count() {
        return Err(DbError::invalid_input(format!(
            "Entity '{}' has {} key column(s), got {} value(s)",
            table.entity,
            table.key_count(),
            keys.len()
        )));
    }
    let conditions = table
        .keys()
        .zip(keys)
        .map(|(column, value)| Expr::prop(column.property.clone()).eq(value.clone()));
    Expr::all(conditions).ok_or_else(|| DbError::internal("empty key filter"))
}

fn required(table: &TableDefinition, column: &ColumnDefinition, value: Option<Value>) -> DbResult<Value> {
    value.ok_or_else(|| {
        DbError::invalid_input(format!(
            "Entity '{}' does not expose property '{}'",
            table.entity, column.property
        ))
    })
}
