//! Column metadata.

use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Which generated statements a column participates in.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnMode(u8);

impl ColumnMode {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const INSERT: Self = Self(2);
    pub const UPDATE: Self = Self(4);
    /// Written once on insert, never updated.
    pub const FINAL: Self = Self(1 | 2);
    pub const ALL: Self = Self(1 | 2 | 4);

    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_insert(self) -> bool {
        self.contains(Self::INSERT)
    }

    pub fn can_update(self) -> bool {
        self.contains(Self::UPDATE)
    }
}

impl Default for ColumnMode {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for ColumnMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for ColumnMode {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for ColumnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("None");
        }
        let names: Vec<&str> = [(Self::READ, "Read"), (Self::INSERT, "Insert"), (Self::UPDATE, "Update")]
            .into_iter()
            .filter(|(m, _)| self.contains(*m))
            .map(|(_, n)| n)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// Logical storage type of a column, mapped to a SQL type per dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    BigInt,
    Float,
    Decimal,
    Text,
    Bytes,
    DateTime,
}

/// A concrete stored column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Property name on the entity.
    pub property: String,
    /// Column name in the database.
    pub name: String,
    pub value_type: ValueType,
    pub primary_key: bool,
    pub identity: bool,
    pub index: bool,
    pub unique: bool,
    pub length: Option<u32>,
    /// Explicit SQL type overriding the dialect mapping.
    pub db_type: Option<String>,
    pub allow_null: bool,
    pub mode: ColumnMode,
}

impl ColumnDefinition {
    /// Identity columns are never written by generated INSERTs.
    pub fn is_insertable(&self) -> bool {
        !self.identity && self.mode.can_insert()
    }

    pub fn is_updatable(&self) -> bool {
        !self.primary_key && !self.identity && self.mode.can_update()
    }

    pub fn is_readable(&self) -> bool {
        self.mode.can_read()
    }
}
