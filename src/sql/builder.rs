//! Expression and SELECT compilation.
//!
//! A [`SqlBuildContext`] carries the per-call state: the table or view that
//! property names resolve against, the base alias, a sequence for fresh aliases,
//! sharding arguments and the parameters collected so far. Clauses are always
//! rendered in the order they appear in the final text, so positional
//! placeholders bind correctly.

use super::dialect::{Dialect, PageParts};
use crate::error::{DbError, DbResult};
use crate::expr::{
    BinaryExpr, BinaryOp, Expr, OrderByItem, SelectExpr, SetJoin, SourceMode, UnaryOp, Value,
};
use crate::meta::{
    Catalog, ColumnDefinition, ColumnRef, EntityRef, JoinType, TableDefinition, TableView,
};
use std::sync::Arc;

/// Table or view for a query source.
pub(crate) fn resolve_target(catalog: &Catalog, entity: EntityRef, mode: SourceMode) -> DbResult<Target> {
    Ok(match mode {
        SourceMode::View => Target::View(catalog.table_view(entity)?),
        SourceMode::Table => Target::Table(catalog.table_definition(entity)?),
    })
}

/// What property names resolve against.
#[derive(Debug, Clone)]
pub enum Target {
    Table(Arc<TableDefinition>),
    View(Arc<TableView>),
}

impl Target {
    pub fn definition(&self) -> &Arc<TableDefinition> {
        match self {
            Self::Table(table) => table,
            Self::View(view) => &view.definition,
        }
    }
}

pub struct SqlBuildContext<'c> {
    pub dialect: Dialect,
    catalog: &'c Catalog,
    pub target: Target,
    /// Base table alias; defaults to the resolved table name.
    pub alias: Option<String>,
    pub sequence: usize,
    /// Suppress table qualification of column references.
    pub single_table: bool,
    pub param_prefix: String,
    pub table_name_args: Vec<String>,
    params: Vec<(String, Value)>,
}

impl<'c> SqlBuildContext<'c> {
    pub fn new(dialect: Dialect, catalog: &'c Catalog, target: Target) -> Self {
        let single_table = matches!(target, Target::Table(_));
        Self {
            dialect,
            catalog,
            target,
            alias: None,
            sequence: 0,
            single_table,
            param_prefix: "p".to_string(),
            table_name_args: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn with_table_args(mut self, args: Vec<String>) -> Self {
        self.table_name_args = args;
        self
    }

    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    pub fn into_params(self) -> Vec<(String, Value)> {
        self.params
    }

    pub fn next_sequence(&mut self) -> usize {
        self.sequence += 1;
        self.sequence
    }

    /// Append a parameter and return its placeholder.
    pub fn push_param(&mut self, value: Value) -> String {
        let index = self.params.len();
        let name = format!("{}{}", self.param_prefix, index);
        let placeholder = self.dialect.placeholder(index, &name);
        self.params.push((name, value));
        placeholder
    }

    pub fn quote(&self, name: &str) -> String {
        self.dialect.quote(name)
    }

    /// Table name with sharding placeholders substituted.
    pub fn table_name(&self, table: &TableDefinition) -> String {
        table.resolve_name(&self.table_name_args)
    }

    pub fn base_alias(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| self.table_name(self.target.definition()))
    }

    /// `FROM` clause source: base table, then joins in dependency order.
    pub fn from_clause(&mut self) -> DbResult<String> {
        let definition = Arc::clone(self.target.definition());
        let name = self.table_name(&definition);
        let mut sql = self.quote(&name);
        if let Some(alias) = self.alias.as_ref().filter(|a| **a != name) {
            sql.push(' ');
            sql.push_str(&self.quote(alias));
        }

        let view = match &self.target {
            Target::View(view) if !self.single_table => Arc::clone(view),
            _ => return Ok(sql),
        };
        for join in &view.joins {
            let joined_name = self.table_name(&join.table);
            sql.push(' ');
            sql.push_str(join.join_type.keyword());
            sql.push(' ');
            sql.push_str(&self.quote(&joined_name));
            if join.alias != joined_name {
                sql.push(' ');
                sql.push_str(&self.quote(&join.alias));
            }

            let mut conditions: Vec<String> = join
                .keys
                .iter()
                .zip(&join.target_keys)
                .map(|(key, target)| {
                    format!(
                        "{}.{} = {}",
                        self.quote(&join.alias),
                        self.quote(&target.name),
                        self.column_ref(key)
                    )
                })
                .collect();
            if let Some(filter) = &join.filter {
                conditions.push(self.with_scope(
                    Target::Table(Arc::clone(&join.table)),
                    Some(join.alias.clone()),
                    false,
                    |ctx| ctx.expr(filter),
                )?);
            }

            if join.join_type == JoinType::Cross && conditions.is_empty() {
                continue;
            }
            if conditions.is_empty() {
                conditions.push("1=1".to_string());
            }
            sql.push_str(" ON ");
            sql.push_str(&conditions.join(" AND "));
        }
        Ok(sql)
    }

    /// Run `f` against another target, restoring the current one afterwards.
    fn with_scope<T>(
        &mut self,
        target: Target,
        alias: Option<String>,
        single_table: bool,
        f: impl FnOnce(&mut Self) -> DbResult<T>,
    ) -> DbResult<T> {
        let saved_target = std::mem::replace(&mut self.target, target);
        let saved_alias = std::mem::replace(&mut self.alias, alias);
        let saved_single = std::mem::replace(&mut self.single_table, single_table);
        let result = f(self);
        self.target = saved_target;
        self.alias = saved_alias;
        self.single_table = saved_single;
        result
    }

    /// Qualified reference to a view column.
    pub fn column_ref(&self, column: &ColumnRef) -> String {
        let name = self.quote(&column.column.name);
        if self.single_table {
            return name;
        }
        let owner = match &column.alias {
            Some(alias) => alias.clone(),
            None => self.base_alias(),
        };
        format!("{}.{}", self.quote(&owner), name)
    }

    /// Reference to a stored column of the base table.
    pub fn column(&self, column: &ColumnDefinition) -> String {
        let name = self.quote(&column.name);
        if self.single_table {
            name
        } else {
            format!("{}.{}", self.quote(&self.base_alias()), name)
        }
    }

    fn resolve_property(&self, property: &str) -> DbResult<String> {
        let unknown = || {
            DbError::invalid_input(format!(
                "Property '{}' is not a column of '{}'",
                property,
                self.target.definition().entity
            ))
        };
        match &self.target {
            Target::View(view) if !self.single_table => {
                view.column(property).map(|c| self.column_ref(&c.source)).ok_or_else(unknown)
            }
            target => target
                .definition()
                .column(property)
                .map(|c| self.column(c))
                .ok_or_else(unknown),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    pub fn expr(&mut self, expr: &Expr) -> DbResult<String> {
        match expr {
            Expr::Property(p) => self.resolve_property(&p.name),
            Expr::Value(v) => Ok(self.push_param(v.clone())),
            Expr::Function(f) => {
                let args = f
                    .args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<DbResult<Vec<_>>>()?;
                Ok(self.dialect.function(&f.name, &args))
            }
            Expr::Binary(b) => self.binary(b),
            Expr::Unary(u) => {
                let operand = self.expr(&u.operand)?;
                Ok(match u.op {
                    UnaryOp::Not => format!("NOT ({})", operand),
                    UnaryOp::Negate => format!("-({})", operand),
                    UnaryOp::Exists => format!("EXISTS {}", operand),
                })
            }
            Expr::Set(set) => {
                let items = set
                    .items
                    .iter()
                    .map(|item| self.expr(item))
                    .collect::<DbResult<Vec<_>>>()?;
                Ok(match set.join {
                    SetJoin::And if items.is_empty() => "1=1".to_string(),
                    SetJoin::Or if items.is_empty() => "1=0".to_string(),
                    SetJoin::And | SetJoin::Or if items.len() == 1 => items.concat(),
                    SetJoin::And => format!("({})", items.join(" AND ")),
                    SetJoin::Or => format!("({})", items.join(" OR ")),
                    SetJoin::Concat => self.dialect.concat(&items),
                    SetJoin::Default => items.join(", "),
                })
            }
            Expr::Subquery(select) => Ok(format!("({})", self.subquery(select)?)),
        }
    }

    fn binary(&mut self, b: &BinaryExpr) -> DbResult<String> {
        let not = if b.negated { "NOT " } else { "" };

        if b.op == BinaryOp::Equal && matches!(*b.right, Expr::Value(Value::Null)) {
            let left = self.expr(&b.left)?;
            return Ok(format!("{} IS {}NULL", left, not));
        }

        if b.op == BinaryOp::In {
            if let Expr::Set(set) = &*b.right {
                if set.join == SetJoin::Default && set.items.is_empty() {
                    return Ok(if b.negated { "1=1" } else { "1=0" }.to_string());
                }
            }
            let (left, right) = self.operands(&b.left, &b.right)?;
            let right = match &*b.right {
                // Already parenthesized
                Expr::Subquery(_) => right,
                _ => format!("({})", right),
            };
            return Ok(format!("{} {}IN {}", left, not, right));
        }

        let (left, right) = self.operands(&b.left, &b.right)?;
        let dialect = self.dialect;
        let like = |parts: &[&str]| {
            let parts: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
            format!("{} {}LIKE {}", left, not, dialect.concat(&parts))
        };
        Ok(match b.op {
            BinaryOp::Like => format!("{} {}LIKE {}", left, not, right),
            BinaryOp::StartsWith => like(&[right.as_str(), "'%'"]),
            BinaryOp::EndsWith => like(&["'%'", right.as_str()]),
            BinaryOp::Contains => like(&["'%'", right.as_str(), "'%'"]),
            BinaryOp::Add => format!("({} + {})", left, right),
            BinaryOp::Subtract => format!("({} - {})", left, right),
            BinaryOp::Multiply => format!("({} * {})", left, right),
            BinaryOp::Divide => format!("({} / {})", left, right),
            op => format!("{} {} {}", left, comparison(op, b.negated)?, right),
        })
    }

    /// Render two operands left to right.
    fn operands(&mut self, left: &Expr, right: &Expr) -> DbResult<(String, String)> {
        let left = self.expr(left)?;
        let right = self.expr(right)?;
        Ok((left, right))
    }

    fn order_item(&mut self, item: &OrderByItem) -> DbResult<String> {
        let expr = self.expr(&item.expr)?;
        Ok(if item.ascending {
            expr
        } else {
            format!("{} DESC", expr)
        })
    }

    // =========================================================================
    // SELECT
    // =========================================================================

    /// Compile a full query against its own table, keeping the current target.
    fn subquery(&mut self, select: &SelectExpr) -> DbResult<String> {
        let table = select.parts().table;
        let target = resolve_target(self.catalog, table.entity, table.mode)?;
        let single = table.mode == SourceMode::Table;
        let alias = format!("T{}", self.next_sequence());
        self.with_scope(target, Some(alias), single, |ctx| ctx.select_body(select))
    }

    /// Render `select` against the current target.
    pub fn select_body(&mut self, select: &SelectExpr) -> DbResult<String> {
        let parts = select.parts();

        let mut items = Vec::new();
        if parts.items.is_empty() {
            items.extend(self.default_columns());
        } else {
            for item in parts.items {
                let rendered = self.expr(&item.expr)?;
                let alias = item.alias.clone().or_else(|| match &item.expr {
                    Expr::Property(p) => Some(p.name.clone()),
                    _ => None,
                });
                items.push(match alias {
                    Some(alias) => format!("{} AS {}", rendered, self.quote(&alias)),
                    None => rendered,
                });
            }
        }
        let mut select_list = items.join(", ");
        if parts.distinct {
            select_list = format!("DISTINCT {}", select_list);
        }

        let from = self.from_clause()?;
        let filter = parts.filter.map(|f| self.expr(f)).transpose()?;
        let group_by = if parts.group_by.is_empty() {
            None
        } else {
            Some(
                parts
                    .group_by
                    .iter()
                    .map(|k| self.expr(k))
                    .collect::<DbResult<Vec<_>>>()?
                    .join(", "),
            )
        };
        let having = parts.having.map(|h| self.expr(h)).transpose()?;
        let order_by = if parts.order_by.is_empty() {
            None
        } else {
            Some(
                parts
                    .order_by
                    .iter()
                    .map(|o| self.order_item(o))
                    .collect::<DbResult<Vec<_>>>()?
                    .join(", "),
            )
        };

        let mut page = PageParts {
            select: select_list,
            from,
            filter,
            group_by,
            having,
            order_by,
            ..Default::default()
        };

        match parts.section {
            Some((_, 0)) => Err(DbError::invalid_input("Section count must be positive")),
            Some((start, count)) => {
                page.start = start;
                page.count = count;
                page.sequence = self.next_sequence();
                Ok(self.dialect.paginate(&page))
            }
            None => Ok(page.ordered()),
        }
    }

    /// Every readable column, aliased by property name.
    fn default_columns(&self) -> Vec<String> {
        match &self.target {
            Target::View(view) if !self.single_table => view
                .columns
                .iter()
                .filter(|c| c.source.column.is_readable())
                .map(|c| format!("{} AS {}", self.column_ref(&c.source), self.quote(&c.property)))
                .collect(),
            target => target
                .definition()
                .columns
                .iter()
                .filter(|c| c.is_readable())
                .map(|c| {
                    if c.name == c.property {
                        self.column(c)
                    } else {
                        format!("{} AS {}", self.column(c), self.quote(&c.property))
                    }
                })
                .collect(),
        }
    }
}

fn comparison(op: BinaryOp, negated: bool) -> DbResult<&'static str> {
    let (plain, inverse) = match op {
        BinaryOp::Equal => ("=", "<>"),
        BinaryOp::LessThan => ("<", ">="),
        BinaryOp::LessOrEqual => ("<=", ">"),
        BinaryOp::GreaterThan => (">", "<="),
        BinaryOp::GreaterOrEqual => (">=", "<"),
        BinaryOp::Like
        | BinaryOp::StartsWith
        | BinaryOp::EndsWith
        | BinaryOp::Contains
        | BinaryOp::In
        | BinaryOp::Add
        | BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide => {
            return Err(DbError::internal(format!(
                "{:?} is not a comparison operator",
                op
            )));
        }
    };
    Ok(if negated { inverse } else { plain })
}
