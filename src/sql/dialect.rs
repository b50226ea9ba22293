//! Per-database SQL rendering rules.
//!
//! Everything that varies between databases lives here: name quoting, parameter
//! placeholders, string concatenation, function names, pagination, identity
//! retrieval after INSERT and the column type mapping used for DDL.

use crate::meta::{ColumnDefinition, ValueType};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    SQLite,
    /// Includes MariaDB
    MySql,
    PostgreSql,
    /// SQL generation only; there is no driver for it.
    SqlServer,
}

/// How the generated identity of an inserted row is read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityFetch {
    /// Table has no identity column.
    None,
    /// The INSERT itself returns the value (`RETURNING`).
    Returning,
    /// A follow-up query on the same connection.
    Query(&'static str),
}

/// Clauses of a paged SELECT, already rendered.
#[derive(Debug, Clone, Default)]
pub struct PageParts {
    pub select: String,
    pub from: String,
    pub filter: Option<String>,
    pub group_by: Option<String>,
    pub having: Option<String>,
    pub order_by: Option<String>,
    pub start: usize,
    pub count: usize,
    /// Fresh number for the derived-table alias.
    pub sequence: usize,
}

impl PageParts {
    /// `WHERE`/`GROUP BY`/`HAVING`, each with a leading space.
    fn clauses(&self) -> String {
        let mut sql = String::new();
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        if let Some(group_by) = &self.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(group_by);
        }
        if let Some(having) = &self.having {
            sql.push_str(" HAVING ");
            sql.push_str(having);
        }
        sql
    }

    /// Full unpaged SELECT.
    pub(crate) fn ordered(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}{}", self.select, self.from, self.clauses());
        if let Some(order) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        sql
    }
}

impl Dialect {
    /// Detect the dialect from a connection string scheme.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSql)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySql)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else if lower.starts_with("mssql://") || lower.starts_with("sqlserver://") {
            Some(Self::SqlServer)
        } else {
            None
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SQLite => "SQLite",
            Self::MySql => "MySQL",
            Self::PostgreSql => "PostgreSQL",
            Self::SqlServer => "SQL Server",
        }
    }

    /// Quote an identifier, doubling any embedded closing quote.
    pub fn quote(&self, name: &str) -> String {
        match self {
            Self::SQLite | Self::PostgreSql => format!("\"{}\"", name.replace('"', "\"\"")),
            Self::MySql => format!("`{}`", name.replace('`', "``")),
            Self::SqlServer => format!("[{}]", name.replace(']', "]]")),
        }
    }

    /// Placeholder text for the parameter at `index` (0-based) named `name`.
    ///
    /// SQLite and PostgreSQL use numbered placeholders, so clause rendering order
    /// never matters for them. MySQL binds `?` positionally, which is why the
    /// compiler always renders clauses in textual order.
    pub fn placeholder(&self, index: usize, name: &str) -> String {
        match self {
            Self::SQLite => format!("?{}", index + 1),
            Self::MySql => "?".to_string(),
            Self::PostgreSql => format!("${}", index + 1),
            Self::SqlServer => format!("@{}", name),
        }
    }

    pub fn concat(&self, parts: &[String]) -> String {
        match self {
            Self::MySql => format!("CONCAT({})", parts.join(", ")),
            Self::SqlServer => format!("({})", parts.join(" + ")),
            Self::SQLite | Self::PostgreSql => format!("({})", parts.join(" || ")),
        }
    }

    /// Map a logical function name to SQL; unknown names pass through unchanged.
    pub fn function_name<'a>(&self, name: &'a str) -> &'a str {
        let overridden = match (self, name) {
            (Self::MySql, "Length") => Some("CHAR_LENGTH"),
            (Self::MySql, "Substring") => Some("SUBSTRING"),
            (Self::SqlServer, "Length") => Some("LEN"),
            (Self::SqlServer, "Substring") => Some("SUBSTRING"),
            (Self::SqlServer, "IfNull") => Some("ISNULL"),
            (Self::PostgreSql, "IfNull") => Some("COALESCE"),
            (Self::PostgreSql, "Substring") => Some("SUBSTRING"),
            _ => None,
        };
        if let Some(mapped) = overridden {
            return mapped;
        }
        match name {
            "ToUpper" => "UPPER",
            "ToLower" => "LOWER",
            "Trim" => "TRIM",
            "Length" => "LENGTH",
            "Substring" => "SUBSTR",
            "Abs" => "ABS",
            "Round" => "ROUND",
            "IfNull" => "IFNULL",
            "Coalesce" => "COALESCE",
            "Count" => "COUNT",
            "Sum" => "SUM",
            "Avg" => "AVG",
            "Min" => "MIN",
            "Max" => "MAX",
            other => other,
        }
    }

    /// Render a function call from already-rendered arguments.
    pub fn function(&self, name: &str, args: &[String]) -> String {
        match (name, args.len()) {
            ("Now", 0) => match self {
                Self::SqlServer => "GETDATE()".to_string(),
                _ => "CURRENT_TIMESTAMP".to_string(),
            },
            ("Count", 0) => "COUNT(*)".to_string(),
            ("Concat", _) => self.concat(args),
            _ => format!("{}({})", self.function_name(name), args.join(", ")),
        }
    }

    pub fn paginate(&self, page: &PageParts) -> String {
        match self {
            Self::SQLite | Self::MySql => {
                format!("{} LIMIT {},{}", page.ordered(), page.start, page.count)
            }
            Self::PostgreSql => {
                format!("{} LIMIT {} OFFSET {}", page.ordered(), page.count, page.start)
            }
            Self::SqlServer => format!(
                "SELECT * FROM (SELECT {}, ROW_NUMBER() OVER (ORDER BY {}) AS Row_Number FROM {}{}) T{} WHERE Row_Number > {} AND Row_Number <= {}",
                page.select,
                page.order_by.as_deref().unwrap_or("(SELECT NULL)"),
                page.from,
                page.clauses(),
                page.sequence,
                page.start,
                page.start.saturating_add(page.count)
            ),
        }
    }

    pub fn identity_fetch(&self) -> IdentityFetch {
        match self {
            Self::SQLite => IdentityFetch::Query("SELECT last_insert_rowid()"),
            Self::MySql => IdentityFetch::Query("SELECT LAST_INSERT_ID()"),
            Self::PostgreSql => IdentityFetch::Returning,
            Self::SqlServer => IdentityFetch::Query("SELECT @@IDENTITY"),
        }
    }

    /// Body of an INSERT that supplies no column values.
    pub fn empty_insert_values(&self) -> &'static str {
        match self {
            Self::MySql => "() VALUES ()",
            _ => "DEFAULT VALUES",
        }
    }

    pub fn add_column_keyword(&self) -> &'static str {
        match self {
            Self::SqlServer => "ADD",
            _ => "ADD COLUMN",
        }
    }

    /// SQL type of a column, honoring an explicit `db_type`.
    pub fn column_type(&self, column: &ColumnDefinition) -> String {
        if let Some(db_type) = &column.db_type {
            return db_type.clone();
        }
        let length = column.length;
        match (self, column.value_type) {
            (Self::SQLite, ValueType::Bool | ValueType::Int | ValueType::BigInt) => "INTEGER".into(),
            (Self::SQLite, ValueType::Float) => "REAL".into(),
            (Self::SQLite, ValueType::Decimal) => "NUMERIC".into(),
            (Self::SQLite, ValueType::Text | ValueType::DateTime) => "TEXT".into(),
            (Self::SQLite, ValueType::Bytes) => "BLOB".into(),

            (Self::MySql, ValueType::Bool) => "TINYINT(1)".into(),
            (Self::MySql, ValueType::Int) => "INT".into(),
            (Self::MySql, ValueType::BigInt) => "BIGINT".into(),
            (Self::MySql, ValueType::Float) => "DOUBLE".into(),
            (Self::MySql, ValueType::Decimal) => "DECIMAL(18,4)".into(),
            (Self::MySql, ValueType::Text) => match length {
                Some(n) if n <= 16_383 => format!("VARCHAR({})", n),
                Some(_) => "LONGTEXT".into(),
                // Indexed MySQL text needs a bounded length
                None if column.index || column.unique || column.primary_key => "VARCHAR(255)".into(),
                None => "TEXT".into(),
            },
            (Self::MySql, ValueType::Bytes) => "LONGBLOB".into(),
            (Self::MySql, ValueType::DateTime) => "DATETIME(6)".into(),

            (Self::PostgreSql, ValueType::Bool) => "BOOLEAN".into(),
            (Self::PostgreSql, ValueType::Int) => "INTEGER".into(),
            (Self::PostgreSql, ValueType::BigInt) => "BIGINT".into(),
            (Self::PostgreSql, ValueType::Float) => "DOUBLE PRECISION".into(),
            (Self::PostgreSql, ValueType::Decimal) => "NUMERIC(18,4)".into(),
            (Self::PostgreSql, ValueType::Text) => match length {
                Some(n) => format!("VARCHAR({})", n),
                None => "TEXT".into(),
            },
            (Self::PostgreSql, ValueType::Bytes) => "BYTEA".into(),
            (Self::PostgreSql, ValueType::DateTime) => "TIMESTAMPTZ".into(),

            (Self::SqlServer, ValueType::Bool) => "BIT".into(),
            (Self::SqlServer, ValueType::Int) => "INT".into(),
            (Self::SqlServer, ValueType::BigInt) => "BIGINT".into(),
            (Self::SqlServer, ValueType::Float) => "FLOAT".into(),
            (Self::SqlServer, ValueType::Decimal) => "DECIMAL(18,4)".into(),
            (Self::SqlServer, ValueType::Text) => match length {
                Some(n) if n <= 4000 => format!("NVARCHAR({})", n),
                _ => "NVARCHAR(MAX)".into(),
            },
            (Self::SqlServer, ValueType::Bytes) => "VARBINARY(MAX)".into(),
            (Self::SqlServer, ValueType::DateTime) => "DATETIME2".into(),
        }
    }

    /// Column-definition suffix for a database-generated key.
    pub fn identity_clause(&self) -> &'static str {
        match self {
            Self::SQLite => "PRIMARY KEY AUTOINCREMENT",
            Self::MySql => "AUTO_INCREMENT",
            Self::PostgreSql => "GENERATED BY DEFAULT AS IDENTITY",
            Self::SqlServer => "IDENTITY(1,1)",
        }
    }

    pub(crate) fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        use sqlparser::dialect::{MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
        match self {
            Self::SQLite => Box::new(SQLiteDialect {}),
            Self::MySql => Box::new(MySqlDialect {}),
            Self::PostgreSql => Box::new(PostgreSqlDialect {}),
            Self::SqlServer => Box::new(MsSqlDialect {}),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_connection_string() {
        assert_eq!(
            Dialect::from_connection_string("postgres://localhost/db"),
            Some(Dialect::PostgreSql)
        );
        assert_eq!(
            Dialect::from_connection_string("MARIADB://h/db"),
            Some(Dialect::MySql)
        );
        assert_eq!(
            Dialect::from_connection_string("sqlite::memory:"),
            Some(Dialect::SQLite)
        );
        assert_eq!(
            Dialect::from_connection_string("mssql://h/db"),
            Some(Dialect::SqlServer)
        );
        assert_eq!(Dialect::from_connection_string("redis://h"), None);
    }

    #[test]
    fn test_quoting() {
        assert_eq!(Dialect::SQLite.quote("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::MySql.quote("Users"), "`Users`");
        assert_eq!(Dialect::SqlServer.quote("Users"), "[Users]");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::SQLite.placeholder(0, "p0"), "?1");
        assert_eq!(Dialect::PostgreSql.placeholder(2, "p2"), "$3");
        assert_eq!(Dialect::MySql.placeholder(5, "p5"), "?");
        assert_eq!(Dialect::SqlServer.placeholder(1, "p1"), "@p1");
    }

    #[test]
    fn test_function_mapping() {
        let args = vec!["x".to_string()];
        assert_eq!(Dialect::SQLite.function("ToUpper", &args), "UPPER(x)");
        assert_eq!(Dialect::SQLite.function("Length", &args), "LENGTH(x)");
        assert_eq!(Dialect::MySql.function("Length", &args), "CHAR_LENGTH(x)");
        assert_eq!(Dialect::SqlServer.function("Length", &args), "LEN(x)");
        assert_eq!(Dialect::PostgreSql.function("Now", &[]), "CURRENT_TIMESTAMP");
        assert_eq!(Dialect::SqlServer.function("Now", &[]), "GETDATE()");
        assert_eq!(Dialect::MySql.function("Count", &[]), "COUNT(*)");
        assert_eq!(Dialect::SQLite.function("Custom", &args), "Custom(x)");
    }

    #[test]
    fn test_concat() {
        let parts = vec!["a".to_string(), "b".to_string()];
        assert_eq!(Dialect::SQLite.concat(&parts), "(a || b)");
        assert_eq!(Dialect::MySql.concat(&parts), "CONCAT(a, b)");
        assert_eq!(Dialect::SqlServer.concat(&parts), "(a + b)");
    }

    fn page() -> PageParts {
        PageParts {
            select: "Id,Name".into(),
            from: "Users".into(),
            filter: Some("Age>@p0".into()),
            order_by: Some("Id".into()),
            start: 10,
            count: 5,
            sequence: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_limit_pagination() {
        assert_eq!(
            Dialect::SQLite.paginate(&page()),
            "SELECT Id,Name FROM Users WHERE Age>@p0 ORDER BY Id LIMIT 10,5"
        );
        assert_eq!(
            Dialect::PostgreSql.paginate(&page()),
            "SELECT Id,Name FROM Users WHERE Age>@p0 ORDER BY Id LIMIT 5 OFFSET 10"
        );
    }

    #[test]
    fn test_windowed_pagination() {
        assert_eq!(
            Dialect::SqlServer.paginate(&page()),
            "SELECT * FROM (SELECT Id,Name, ROW_NUMBER() OVER (ORDER BY Id) AS Row_Number FROM Users WHERE Age>@p0) T1 WHERE Row_Number > 10 AND Row_Number <= 15"
        );
    }

    #[test]
    fn test_windowed_pagination_clamps_upper_bound() {
        let page = PageParts {
            count: usize::MAX,
            ..page()
        };
        assert!(
            Dialect::SqlServer
                .paginate(&page)
                .ends_with(&format!("WHERE Row_Number > 10 AND Row_Number <= {}", usize::MAX))
        );
    }
}
