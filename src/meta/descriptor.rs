//! Declarative entity descriptors supplied by the host.
//!
//! The catalog never inspects Rust types; a host describes each entity once with
//! these builders and hands out an [`EntityRef`] as its stable key.
//!
//! ```ignore
//! fn dept() -> EntityDescriptor {
//!     EntityDescriptor::new("Dept", "Depts")
//!         .column(ColumnDescriptor::new("Id", ValueType::BigInt).identity())
//!         .column(ColumnDescriptor::new("Name", ValueType::Text).length(64))
//! }
//! const DEPT: EntityRef = EntityRef::new("Dept", dept);
//!
//! fn user() -> EntityDescriptor {
//!     EntityDescriptor::new("User", "Users")
//!         .column(ColumnDescriptor::new("Id", ValueType::BigInt).identity())
//!         .column(ColumnDescriptor::new("DeptId", ValueType::BigInt).foreign_as(DEPT, "D"))
//!         .foreign_column(ForeignColumnDescriptor::new("DeptName", "D", "Name"))
//! }
//! ```

use super::column::{ColumnMode, ValueType};
use super::table::JoinType;
use crate::expr::Expr;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Stable, copyable handle to an entity's descriptor.
///
/// Identity is the name alone; two refs with the same name are the same entity.
#[derive(Clone, Copy)]
pub struct EntityRef {
    pub name: &'static str,
    pub describe: fn() -> EntityDescriptor,
}

impl EntityRef {
    pub const fn new(name: &'static str, describe: fn() -> EntityDescriptor) -> Self {
        Self { name, describe }
    }

    pub fn descriptor(&self) -> EntityDescriptor {
        (self.describe)()
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for EntityRef {}

impl Hash for EntityRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef({})", self.name)
    }
}

#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub name: String,
    /// May contain `{0}`-style placeholders for sharded tables.
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    pub foreign_columns: Vec<ForeignColumnDescriptor>,
    pub joins: Vec<JoinDescriptor>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
            foreign_columns: Vec::new(),
            joins: Vec::new(),
        }
    }

    /// An entity sharing `base`'s table and columns, typically adding projected
    /// foreign columns and joins on top.
    pub fn derived(name: impl Into<String>, base: EntityRef) -> Self {
        Self {
            name: name.into(),
            ..base.descriptor()
        }
    }

    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    pub fn foreign_column(mut self, column: ForeignColumnDescriptor) -> Self {
        self.foreign_columns.push(column);
        self
    }

    pub fn join(mut self, join: JoinDescriptor) -> Self {
        self.joins.push(join);
        self
    }
}

/// A column referencing another entity's primary key.
#[derive(Debug, Clone)]
pub struct ForeignTarget {
    pub target: EntityRef,
    /// Join alias; defaults to the target's table name.
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub property: String,
    /// Database column name; defaults to the property name.
    pub column: Option<String>,
    pub value_type: ValueType,
    pub primary_key: bool,
    pub identity: bool,
    pub index: bool,
    pub unique: bool,
    pub length: Option<u32>,
    pub db_type: Option<String>,
    pub allow_null: bool,
    pub mode: ColumnMode,
    pub foreign: Option<ForeignTarget>,
}

impl ColumnDescriptor {
    pub fn new(property: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            property: property.into(),
            column: None,
            value_type,
            primary_key: false,
            identity: false,
            index: false,
            unique: false,
            length: None,
            db_type: None,
            allow_null: false,
            mode: ColumnMode::ALL,
            foreign: None,
        }
    }

    pub fn named(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Database-generated primary key.
    pub fn identity(mut self) -> Self {
        self.primary_key = true;
        self.identity = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn db_type(mut self, db_type: impl Into<String>) -> Self {
        self.db_type = Some(db_type.into());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn mode(mut self, mode: ColumnMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn foreign(mut self, target: EntityRef) -> Self {
        self.foreign = Some(ForeignTarget {
            target,
            alias: None,
        });
        self
    }

    pub fn foreign_as(mut self, target: EntityRef, alias: impl Into<String>) -> Self {
        self.foreign = Some(ForeignTarget {
            target,
            alias: Some(alias.into()),
        });
        self
    }
}

/// A read-only column projected from a joined table.
#[derive(Debug, Clone)]
pub struct ForeignColumnDescriptor {
    pub property: String,
    pub join_alias: String,
    /// Property on the joined entity's view; may itself be a foreign column.
    pub target_property: String,
}

impl ForeignColumnDescriptor {
    pub fn new(
        property: impl Into<String>,
        join_alias: impl Into<String>,
        target_property: impl Into<String>,
    ) -> Self {
        Self {
            property: property.into(),
            join_alias: join_alias.into(),
            target_property: target_property.into(),
        }
    }
}

/// Explicit join declared on an entity's view.
#[derive(Debug, Clone)]
pub struct JoinDescriptor {
    pub target: EntityRef,
    /// Properties of this view matched against the target's primary key, in key order.
    pub local_keys: Vec<String>,
    pub alias: Option<String>,
    pub join_type: JoinType,
    /// Extra condition written against the target entity's properties.
    pub filter: Option<Expr>,
}

impl JoinDescriptor {
    pub fn new<S: Into<String>>(target: EntityRef, local_keys: impl IntoIterator<Item = S>) -> Self {
        Self {
            target,
            local_keys: local_keys.into_iter().map(Into::into).collect(),
            alias: None,
            join_type: JoinType::Left,
            filter: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }
}
