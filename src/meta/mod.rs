//! Entity metadata: descriptors in, cached table definitions and views out.

mod catalog;
mod column;
mod descriptor;
mod table;

pub use catalog::Catalog;
pub use column::{ColumnDefinition, ColumnMode, ValueType};
pub use descriptor::{
    ColumnDescriptor, EntityDescriptor, EntityRef, ForeignColumnDescriptor, ForeignTarget,
    JoinDescriptor,
};
pub use table::{ColumnRef, JoinType, JoinedTable, TableDefinition, TableView, ViewColumn};
