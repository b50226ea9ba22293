//! Memoized table definitions and views.
//!
//! Building a view:
//!
//! 1. Every column with a foreign target contributes a `LEFT` join aliased by its
//!    declared alias (or the target's table name); explicit join declarations follow.
//! 2. Foreign columns are resolved through their join. When the target property is
//!    itself projected on the target's view, the join that owns it is imported
//!    under `"{outer}_{inner}"`, together with the joins it depends on, so the
//!    column always ends up referencing the alias that actually stores it.
//! 3. Explicit join keys are resolved against the view's columns, so a join key
//!    may be a foreign column (that is what creates join-to-join dependencies).
//! 4. Joins are ordered topologically; ties keep declaration order.
//!
//! Results are cached per entity name. Computation happens outside the lock and
//! the first stored result wins, which is harmless because building is pure.

use super::column::ColumnDefinition;
use super::descriptor::{EntityDescriptor, EntityRef};
use super::table::{ColumnRef, JoinType, JoinedTable, TableDefinition, TableView, ViewColumn};
use crate::entity::Entity;
use crate::error::{DbError, DbResult};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct Catalog {
    definitions: RwLock<HashMap<&'static str, Arc<TableDefinition>>>,
    views: RwLock<HashMap<&'static str, Arc<TableView>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_definition(&self, entity: EntityRef) -> DbResult<Arc<TableDefinition>> {
        if let Some(found) = read(&self.definitions).get(entity.name) {
            return Ok(Arc::clone(found));
        }

        let built = Arc::new(build_definition(&entity.descriptor())?);
        let mut cache = write(&self.definitions);
        Ok(Arc::clone(cache.entry(entity.name).or_insert(built)))
    }

    pub fn table_view(&self, entity: EntityRef) -> DbResult<Arc<TableView>> {
        self.view_with_stack(entity, &mut Vec::new())
    }

    pub fn table_definition_of<T: Entity>(&self) -> DbResult<Arc<TableDefinition>> {
        self.table_definition(T::ENTITY)
    }

    pub fn table_view_of<T: Entity>(&self) -> DbResult<Arc<TableView>> {
        self.table_view(T::ENTITY)
    }

    fn view_with_stack(
        &self,
        entity: EntityRef,
        stack: &mut Vec<&'static str>,
    ) -> DbResult<Arc<TableView>> {
        if let Some(found) = read(&self.views).get(entity.name) {
            return Ok(Arc::clone(found));
        }
        if stack.contains(&entity.name) {
            return Err(DbError::configuration(format!(
                "Foreign column chain cycles through entities: {} -> {}",
                stack.join(" -> "),
                entity.name
            )));
        }

        stack.push(entity.name);
        let built = self.build_view(entity, stack);
        stack.pop();
        let built = Arc::new(built?);

        debug!(
            entity = entity.name,
            joins = ?built.join_aliases(),
            "Built table view"
        );

        let mut cache = write(&self.views);
        Ok(Arc::clone(cache.entry(entity.name).or_insert(built)))
    }

    fn build_view(&self, entity: EntityRef, stack: &mut Vec<&'static str>) -> DbResult<TableView> {
        let desc = entity.descriptor();
        let definition = self.table_definition(entity)?;

        // Joins implied by foreign-typed columns, then explicit ones.
        let mut joins: Vec<JoinedTable> = Vec::new();
        let mut targets: Vec<EntityRef> = Vec::new();
        let mut pending_keys: Vec<(usize, Vec<String>)> = Vec::new();

        for column in &desc.columns {
            let Some(foreign) = &column.foreign else {
                continue;
            };
            let target = self.table_definition(foreign.target)?;
            let alias = foreign.alias.clone().unwrap_or_else(|| target.name.clone());
            if target.key_count() != 1 {
                return Err(arity_error(&desc.name, &alias, 1, target.key_count()));
            }
            let local = definition
                .column(&column.property)
                .ok_or_else(|| unknown_property(&desc.name, &column.property))?;
            joins.push(JoinedTable {
                alias,
                target_keys: target.keys().cloned().collect(),
                table: target,
                join_type: JoinType::Left,
                keys: vec![ColumnRef {
                    alias: None,
                    column: Arc::clone(local),
                }],
                filter: None,
            });
            targets.push(foreign.target);
        }

        for join in &desc.joins {
            let target = self.table_definition(join.target)?;
            let alias = join.alias.clone().unwrap_or_else(|| target.name.clone());
            pending_keys.push((joins.len(), join.local_keys.clone()));
            joins.push(JoinedTable {
                alias,
                target_keys: target.keys().cloned().collect(),
                table: target,
                join_type: join.join_type,
                keys: Vec::new(),
                filter: join.filter.clone(),
            });
            targets.push(join.target);
        }

        for (i, join) in joins.iter().enumerate() {
            if joins[..i]
                .iter()
                .any(|j| j.alias.eq_ignore_ascii_case(&join.alias))
            {
                return Err(DbError::configuration(format!(
                    "Entity '{}' declares join alias '{}' more than once",
                    desc.name, join.alias
                )));
            }
        }

        // Base columns, then projected foreign columns.
        let mut columns: Vec<ViewColumn> = definition
            .columns
            .iter()
            .map(|c| ViewColumn {
                property: c.property.clone(),
                source: ColumnRef {
                    alias: None,
                    column: Arc::clone(c),
                },
                foreign: false,
            })
            .collect();

        let declared = joins.len();
        for fc in &desc.foreign_columns {
            let index = joins[..declared]
                .iter()
                .position(|j| j.alias.eq_ignore_ascii_case(&fc.join_alias))
                .ok_or_else(|| {
                    DbError::configuration(format!(
                        "Foreign column '{}.{}' references unknown join alias '{}'",
                        desc.name, fc.property, fc.join_alias
                    ))
                })?;
            let outer = joins[index].alias.clone();

            let source = match joins[index].table.column(&fc.target_property) {
                Some(stored) => ColumnRef {
                    alias: Some(outer),
                    column: Arc::clone(stored),
                },
                None => {
                    let target_view = self.view_with_stack(targets[index], stack)?;
                    let projected = target_view
                        .column(&fc.target_property)
                        .ok_or_else(|| unknown_property(&target_view.entity, &fc.target_property))?;
                    let alias = match &projected.source.alias {
                        Some(inner) => {
                            import_join(&target_view, inner, &outer, &mut joins)?;
                            Some(imported_alias(&outer, inner))
                        }
                        None => Some(outer),
                    };
                    ColumnRef {
                        alias,
                        column: Arc::clone(&projected.source.column),
                    }
                }
            };

            if columns
                .iter()
                .any(|c| c.property.eq_ignore_ascii_case(&fc.property))
            {
                return Err(DbError::configuration(format!(
                    "Entity '{}' declares property '{}' more than once",
                    desc.name, fc.property
                )));
            }
            columns.push(ViewColumn {
                property: fc.property.clone(),
                source,
                foreign: true,
            });
        }

        // Explicit join keys may name foreign columns resolved above.
        for (index, local_keys) in pending_keys {
            let join = &joins[index];
            let expected = join.target_keys.len();
            if join.join_type == JoinType::Cross && local_keys.is_empty() {
                continue;
            }
            if local_keys.len() != expected {
                return Err(arity_error(&desc.name, &join.alias, expected, local_keys.len()));
            }
            let keys = local_keys
                .iter()
                .map(|key| {
                    columns
                        .iter()
                        .find(|c| c.property.eq_ignore_ascii_case(key))
                        .map(|c| c.source.clone())
                        .ok_or_else(|| unknown_property(&desc.name, key))
                })
                .collect::<DbResult<Vec<_>>>()?;
            joins[index].keys = keys;
        }

        let joins = order_joins(&desc.name, joins)?;

        Ok(TableView {
            entity: desc.name,
            definition,
            joins,
            columns,
        })
    }
}

fn build_definition(desc: &EntityDescriptor) -> DbResult<TableDefinition> {
    if desc.columns.is_empty() {
        return Err(DbError::configuration(format!(
            "Entity '{}' declares no columns",
            desc.name
        )));
    }

    let mut columns: Vec<Arc<ColumnDefinition>> = Vec::with_capacity(desc.columns.len());
    for c in &desc.columns {
        if columns
            .iter()
            .any(|existing| existing.property.eq_ignore_ascii_case(&c.property))
        {
            return Err(DbError::configuration(format!(
                "Entity '{}' declares property '{}' more than once",
                desc.name, c.property
            )));
        }
        columns.push(Arc::new(ColumnDefinition {
            property: c.property.clone(),
            name: c.column.clone().unwrap_or_else(|| c.property.clone()),
            value_type: c.value_type,
            primary_key: c.primary_key,
            identity: c.identity,
            index: c.index,
            unique: c.unique,
            length: c.length,
            db_type: c.db_type.clone(),
            allow_null: c.allow_null,
            mode: c.mode,
        }));
    }

    Ok(TableDefinition {
        entity: desc.name.clone(),
        name: desc.table.clone(),
        columns,
    })
}

fn imported_alias(outer: &str, inner: &str) -> String {
    format!("{}_{}", outer, inner)
}

/// Copy `inner` (and the joins its keys read from) out of a target view,
/// re-aliased under `outer`.
fn import_join(
    target_view: &TableView,
    inner: &str,
    outer: &str,
    joins: &mut Vec<JoinedTable>,
) -> DbResult<()> {
    let alias = imported_alias(outer, inner);
    if joins.iter().any(|j| j.alias.eq_ignore_ascii_case(&alias)) {
        return Ok(());
    }
    let source = target_view.join(inner).ok_or_else(|| {
        DbError::internal(format!(
            "View '{}' has no join '{}'",
            target_view.entity, inner
        ))
    })?;

    for dependency in source.dependencies() {
        import_join(target_view, dependency, outer, joins)?;
    }

    let keys = source
        .keys
        .iter()
        .map(|k| ColumnRef {
            alias: Some(match &k.alias {
                Some(a) => imported_alias(outer, a),
                None => outer.to_string(),
            }),
            column: Arc::clone(&k.column),
        })
        .collect();

    joins.push(JoinedTable {
        alias,
        table: Arc::clone(&source.table),
        join_type: source.join_type,
        keys,
        target_keys: source.target_keys.clone(),
        filter: source.filter.clone(),
    });
    Ok(())
}

/// Kahn's algorithm, always taking the earliest-declared ready join.
fn order_joins(entity: &str, mut remaining: Vec<JoinedTable>) -> DbResult<Vec<JoinedTable>> {
    let mut ordered: Vec<JoinedTable> = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|join| {
            join.dependencies().all(|dep| {
                ordered.iter().any(|placed| placed.alias.eq_ignore_ascii_case(dep))
            })
        });
        match ready {
            Some(index) => ordered.push(remaining.remove(index)),
            None => {
                let stuck: Vec<&str> = remaining.iter().map(|j| j.alias.as_str()).collect();
                return Err(DbError::configuration(format!(
                    "Joins of entity '{}' depend on each other in a cycle: {}",
                    entity,
                    stuck.join(", ")
                )));
            }
        }
    }
    Ok(ordered)
}

fn unknown_property(entity: &str, property: &str) -> DbError {
    DbError::configuration(format!(
        "Entity '{}' has no property '{}'",
        entity, property
    ))
}

fn arity_error(entity: &str, alias: &str, expected: usize, found: usize) -> DbError {
    DbError::configuration(format!(
        "Join '{}' of entity '{}' needs {} key column(s) to match the target's primary key, found {}",
        alias, entity, expected, found
    ))
}
