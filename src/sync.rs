//! Additive schema reconciliation.
//!
//! For every data source with `sync_schema` enabled, the entities planned for it
//! are grouped by table name. Missing tables are created with their indexes;
//! existing tables only gain the columns (and indexes of those columns) they
//! lack. Nothing is ever dropped or altered in place.
//!
//! Data sources are reconciled concurrently, each on a single context. A
//! failing data source is marked unavailable for writes, the others still run,
//! and the first failure is returned once all of them have finished.

use crate::db::{DaoContext, DaoContextPoolFactory, SchemaInspector};
use crate::error::{DbError, DbResult};
use crate::meta::{Catalog, ColumnDefinition, EntityRef, TableDefinition};
use crate::sql::SqlGen;
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Which entities live in which data source.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    sources: BTreeMap<String, Vec<EntityRef>>,
}

impl SyncPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, data_source: impl Into<String>, entity: EntityRef) -> Self {
        self.sources.entry(data_source.into()).or_default().push(entity);
        self
    }

    pub fn add_all(
        mut self,
        data_source: impl Into<String>,
        entities: impl IntoIterator<Item = EntityRef>,
    ) -> Self {
        self.sources
            .entry(data_source.into())
            .or_default()
            .extend(entities);
        self
    }

    pub fn entities(&self, data_source: &str) -> &[EntityRef] {
        self.sources
            .get(data_source)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

/// What reconciliation changed on one data source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub data_source: String,
    pub tables_created: Vec<String>,
    /// `(table, column)` pairs.
    pub columns_added: Vec<(String, String)>,
    pub indexes_created: Vec<String>,
}

impl SyncReport {
    fn new(data_source: &str) -> Self {
        Self {
            data_source: data_source.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables_created.is_empty()
            && self.columns_added.is_empty()
            && self.indexes_created.is_empty()
    }
}

pub struct SchemaSync<'a> {
    factory: &'a DaoContextPoolFactory,
    catalog: &'a Catalog,
}

impl<'a> SchemaSync<'a> {
    pub fn new(factory: &'a DaoContextPoolFactory, catalog: &'a Catalog) -> Self {
        Self { factory, catalog }
    }

    /// Reconcile every sync-enabled data source named in `plan`.
    ///
    /// Reports come back in data-source name order. Data sources with
    /// `sync_schema = false` are skipped and produce no report.
    pub async fn run(&self, plan: &SyncPlan) -> DbResult<Vec<SyncReport>> {
        let mut targets = Vec::new();
        for name in plan.data_sources() {
            let pool = self.factory.pool(Some(name))?;
            if pool.config().sync_schema {
                targets.push(name);
            } else {
                debug!(data_source = %name, "Schema sync disabled, skipping");
            }
        }

        let results = join_all(
            targets
                .iter()
                .map(|name| self.sync_source(name, plan.entities(name))),
        )
        .await;

        let mut reports = Vec::new();
        let mut first_failure = None;
        for (name, result) in targets.into_iter().zip(results) {
            match result {
                Ok(report) => {
                    info!(
                        data_source = %name,
                        tables_created = report.tables_created.len(),
                        columns_added = report.columns_added.len(),
                        indexes_created = report.indexes_created.len(),
                        "Schema reconciled"
                    );
                    reports.push(report);
                }
                Err(e) => {
                    error!(data_source = %name, error = %e, "Schema reconciliation failed");
                    self.factory.mark_unavailable(name)?;
                    if first_failure.is_none() {
                        first_failure = Some(DbError::reconciliation(name, e));
                    }
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }

    async fn sync_source(&self, name: &str, entities: &[EntityRef]) -> DbResult<SyncReport> {
        let tables = merge_tables(self.catalog, entities)?;
        let mut guard = self.factory.acquire(Some(name)).await?;
        let result = self.sync_tables(&mut guard, name, &tables).await;
        guard.release().await;
        result
    }

    async fn sync_tables(
        &self,
        ctx: &mut DaoContext,
        name: &str,
        tables: &[TableDefinition],
    ) -> DbResult<SyncReport> {
        let generator = SqlGen::new(self.catalog, ctx.dialect());
        let mut report = SyncReport::new(name);

        for table in tables {
            let indexed: Vec<&Arc<ColumnDefinition>>;

            if !SchemaInspector::table_exists(ctx, &table.name).await? {
                ctx.execute(&generator.create_table(table)).await?;
                report.tables_created.push(table.name.clone());
                indexed = table.columns.iter().filter(|c| needs_index(c)).collect();
            } else {
                let live: HashSet<String> = SchemaInspector::column_names(ctx, &table.name)
                    .await?
                    .into_iter()
                    .map(|c| c.to_lowercase())
                    .collect();
                let missing: Vec<&Arc<ColumnDefinition>> = table
                    .columns
                    .iter()
                    .filter(|c| !live.contains(&c.name.to_lowercase()))
                    .collect();
                for column in &missing {
                    ctx.execute(&generator.add_column(table, column)).await?;
                    report
                        .columns_added
                        .push((table.name.clone(), column.name.clone()));
                }
                indexed = missing.into_iter().filter(|c| needs_index(c)).collect();
            }

            if indexed.is_empty() {
                continue;
            }
            let existing: HashSet<String> = SchemaInspector::index_names(ctx, &table.name)
                .await?
                .into_iter()
                .map(|i| i.to_lowercase())
                .collect();
            for column in indexed {
                let index = generator.index_name(table, column);
                if existing.contains(&index.to_lowercase()) {
                    continue;
                }
                ctx.execute(&generator.create_index(table, column)).await?;
                report.indexes_created.push(index);
            }
        }

        Ok(report)
    }
}

fn needs_index(column: &ColumnDefinition) -> bool {
    (column.index || column.unique) && !column.primary_key
}

/// Group entities by table name and merge their columns.
///
/// Columns are matched by name case-insensitively; on a collision the entity
/// seen last wins. Sharded tables have no concrete name and are skipped.
fn merge_tables(catalog: &Catalog, entities: &[EntityRef]) -> DbResult<Vec<TableDefinition>> {
    let mut tables: Vec<TableDefinition> = Vec::new();

    for entity in entities {
        let definition = catalog.table_definition(*entity)?;
        if definition.is_sharded() {
            debug!(entity = %entity.name, table = %definition.name, "Skipping sharded table");
            continue;
        }

        let Some(merged) = tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(&definition.name))
        else {
            tables.push(TableDefinition::clone(&definition));
            continue;
        };

        for column in &definition.columns {
            match merged
                .columns
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(&column.name))
            {
                Some(existing) => {
                    if existing.as_ref() != column.as_ref() {
                        warn!(
                            table = %merged.name,
                            column = %column.name,
                            entity = %entity.name,
                            "Conflicting column definitions, last one wins"
                        );
                    }
                    *existing = Arc::clone(column);
                }
                None => merged.columns.push(Arc::clone(column)),
            }
        }
        merged.entity = definition.entity.clone();
    }

    Ok(tables)
}
