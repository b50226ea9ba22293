//! Resolved table definitions and views.

use super::column::ColumnDefinition;
use crate::expr::Expr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JoinType {
    Inner,
    #[default]
    Left,
    Right,
    Outer,
    Cross,
}

impl JoinType {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Outer => "FULL OUTER JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

/// One mapped table: its columns in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub entity: String,
    pub name: String,
    pub columns: Vec<Arc<ColumnDefinition>>,
}

impl TableDefinition {
    /// Look up a column by property name, case-insensitively.
    pub fn column(&self, property: &str) -> Option<&Arc<ColumnDefinition>> {
        self.columns
            .iter()
            .find(|c| c.property.eq_ignore_ascii_case(property))
    }

    /// Primary-key columns in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &Arc<ColumnDefinition>> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    pub fn key_count(&self) -> usize {
        self.keys().count()
    }

    pub fn identity(&self) -> Option<&Arc<ColumnDefinition>> {
        self.columns.iter().find(|c| c.identity)
    }

    pub fn is_sharded(&self) -> bool {
        self.name.contains("{0}")
    }

    /// Substitute `{0}`, `{1}`, ... with `args`. Without args the name is returned verbatim.
    pub fn resolve_name(&self, args: &[String]) -> String {
        args.iter()
            .enumerate()
            .fold(self.name.clone(), |name, (i, arg)| {
                name.replace(&format!("{{{}}}", i), arg)
            })
    }
}

/// A column as seen from a view: which join (or the base table) owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    /// Join alias; `None` means the base table.
    pub alias: Option<String>,
    pub column: Arc<ColumnDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinedTable {
    pub alias: String,
    pub table: Arc<TableDefinition>,
    pub join_type: JoinType,
    /// Referencing side, paired index-wise with `target_keys`.
    pub keys: Vec<ColumnRef>,
    pub target_keys: Vec<Arc<ColumnDefinition>>,
    /// Condition against the joined table's properties.
    pub filter: Option<Expr>,
}

impl JoinedTable {
    /// Aliases of other joins this join's keys read from.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().filter_map(|k| k.alias.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewColumn {
    pub property: String,
    pub source: ColumnRef,
    /// Projected from a join rather than stored on the base table.
    pub foreign: bool,
}

/// Base table plus joined tables in dependency order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableView {
    pub entity: String,
    pub definition: Arc<TableDefinition>,
    pub joins: Vec<JoinedTable>,
    pub columns: Vec<ViewColumn>,
}

impl TableView {
    pub fn column(&self, property: &str) -> Option<&ViewColumn> {
        self.columns
            .iter()
            .find(|c| c.property.eq_ignore_ascii_case(property))
    }

    pub fn join(&self, alias: &str) -> Option<&JoinedTable> {
        self.joins.iter().find(|j| j.alias.eq_ignore_ascii_case(alias))
    }

    pub fn join_aliases(&self) -> Vec<&str> {
        self.joins.iter().map(|j| j.alias.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ColumnMode, ValueType};

    fn col(property: &str, pk: bool) -> Arc<ColumnDefinition> {
        Arc::new(ColumnDefinition {
            property: property.to_string(),
            name: property.to_string(),
            value_type: ValueType::Int,
            primary_key: pk,
            identity: false,
            index: false,
            unique: false,
            length: None,
            db_type: None,
            allow_null: false,
            mode: ColumnMode::ALL,
        })
    }

    #[test]
    fn test_resolve_sharded_name() {
        let table = TableDefinition {
            entity: "Log".into(),
            name: "Log_{0}".into(),
            columns: vec![col("Id", true)],
        };
        assert!(table.is_sharded());
        assert_eq!(table.resolve_name(&["202401".to_string()]), "Log_202401");
        assert_eq!(table.resolve_name(&[]), "Log_{0}");
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let table = TableDefinition {
            entity: "User".into(),
            name: "Users".into(),
            columns: vec![col("Id", true), col("Name", false)],
        };
        assert!(table.column("name").is_some());
        assert!(table.column("Missing").is_none());
        assert_eq!(table.key_count(), 1);
    }
}
