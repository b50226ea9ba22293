//! Dialect SQL compiler.
//!
//! Walks expression trees and entity metadata to produce parameterized SQL.
//! Generation is pure computation: nothing in this module performs I/O.
//!
//! ```ignore
//! let sql = SqlGen::new(&catalog, Dialect::SQLite).select(
//!     &TableExpr::view(USER)
//!         .filter(Expr::prop("Age").gt(18))
//!         .order_by(Expr::prop("Id").asc())
//!         .section(10, 5)
//!         .select_all(),
//! )?;
//! ```

mod builder;
mod dialect;
mod statement;

pub use builder::{SqlBuildContext, Target};
pub use dialect::{Dialect, IdentityFetch, PageParts};
pub use statement::{InsertSql, SqlGen, SqlGenResult};
