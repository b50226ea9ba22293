//! Query stage nodes.
//!
//! Each SQL clause is its own struct, and each stage's input is a small sum type
//! listing the stages allowed underneath it:
//!
//! ```text
//! TableExpr ─filter─▶ WhereExpr
//!     │                   │
//!     ├──────group_by─────┴─▶ GroupByExpr ─having─▶ HavingExpr
//!     │                                                 │
//!     └─order_by (Table/Where/GroupBy/Having)─▶ OrderByExpr ─section─▶ SectionExpr
//!
//! select (any stage) ─▶ SelectExpr
//! ```
//!
//! `having` only exists on [`GroupByExpr`] and `section` only on [`OrderByExpr`],
//! so attaching clauses out of order fails to compile.

use super::Expr;
use crate::meta::EntityRef;
use std::fmt;

/// Whether a table source reads the bare table or the joined view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SourceMode {
    /// Single-table statement: columns are not qualified, foreign columns are unavailable.
    Table,
    /// Base table plus its joined tables.
    #[default]
    View,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableExpr {
    pub entity: EntityRef,
    pub mode: SourceMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WhereExpr {
    pub source: TableExpr,
    pub condition: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupBySource {
    Table(TableExpr),
    Where(WhereExpr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupByExpr {
    pub source: GroupBySource,
    pub keys: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HavingExpr {
    pub source: GroupByExpr,
    pub condition: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderBySource {
    Table(TableExpr),
    Where(WhereExpr),
    GroupBy(GroupByExpr),
    Having(HavingExpr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderByItem {
    pub expr: Expr,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderByExpr {
    pub source: OrderBySource,
    pub items: Vec<OrderByItem>,
}

/// Paging: rows `(start, start + count]` of an ordered source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SectionExpr {
    pub source: OrderByExpr,
    pub start: usize,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectSource {
    Table(TableExpr),
    Where(WhereExpr),
    GroupBy(GroupByExpr),
    Having(HavingExpr),
    OrderBy(OrderByExpr),
    Section(SectionExpr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl From<Expr> for SelectItem {
    fn from(expr: Expr) -> Self {
        Self { expr, alias: None }
    }
}

/// Top of the chain. An empty item list selects every readable column of the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectExpr {
    pub source: SelectSource,
    pub items: Vec<SelectItem>,
    pub distinct: bool,
}

// =============================================================================
// Stage constructors
// =============================================================================

impl TableExpr {
    pub fn view(entity: EntityRef) -> Self {
        Self {
            entity,
            mode: SourceMode::View,
        }
    }

    pub fn table(entity: EntityRef) -> Self {
        Self {
            entity,
            mode: SourceMode::Table,
        }
    }

    pub fn filter(self, condition: Expr) -> WhereExpr {
        WhereExpr {
            source: self,
            condition,
        }
    }
}

impl WhereExpr {
    /// AND another condition onto this filter.
    pub fn and(self, condition: Expr) -> Self {
        Self {
            source: self.source,
            condition: self.condition.and(condition),
        }
    }
}

impl GroupByExpr {
    pub fn having(self, condition: Expr) -> HavingExpr {
        HavingExpr {
            source: self,
            condition,
        }
    }
}

impl OrderByExpr {
    pub fn then_by(mut self, item: OrderByItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn section(self, start: usize, count: usize) -> SectionExpr {
        SectionExpr {
            source: self,
            start,
            count,
        }
    }
}

impl SelectExpr {
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Flatten the stage chain into its clauses.
    pub fn parts(&self) -> QueryParts<'_> {
        let mut parts = QueryParts {
            table: table_of(&self.source),
            filter: None,
            group_by: &[],
            having: None,
            order_by: &[],
            section: None,
            items: &self.items,
            distinct: self.distinct,
        };

        let ordered = match &self.source {
            SelectSource::Table(_) => return parts,
            SelectSource::Where(w) => {
                parts.filter = Some(&w.condition);
                return parts;
            }
            SelectSource::GroupBy(g) => {
                parts.fill_group(g);
                return parts;
            }
            SelectSource::Having(h) => {
                parts.having = Some(&h.condition);
                parts.fill_group(&h.source);
                return parts;
            }
            SelectSource::OrderBy(o) => o,
            SelectSource::Section(s) => {
                parts.section = Some((s.start, s.count));
                &s.source
            }
        };
        parts.order_by = &ordered.items;
        match &ordered.source {
            OrderBySource::Table(_) => {}
            OrderBySource::Where(w) => parts.filter = Some(&w.condition),
            OrderBySource::GroupBy(g) => parts.fill_group(g),
            OrderBySource::Having(h) => {
                parts.having = Some(&h.condition);
                parts.fill_group(&h.source);
            }
        }
        parts
    }
}

fn table_of(source: &SelectSource) -> &TableExpr {
    fn group_table(g: &GroupByExpr) -> &TableExpr {
        match &g.source {
            GroupBySource::Table(t) => t,
            GroupBySource::Where(w) => &w.source,
        }
    }
    fn order_table(o: &OrderByExpr) -> &TableExpr {
        match &o.source {
            OrderBySource::Table(t) => t,
            OrderBySource::Where(w) => &w.source,
            OrderBySource::GroupBy(g) => group_table(g),
            OrderBySource::Having(h) => group_table(&h.source),
        }
    }
    match source {
        SelectSource::Table(t) => t,
        SelectSource::Where(w) => &w.source,
        SelectSource::GroupBy(g) => group_table(g),
        SelectSource::Having(h) => group_table(&h.source),
        SelectSource::OrderBy(o) => order_table(o),
        SelectSource::Section(s) => order_table(&s.source),
    }
}

/// Borrowed, flattened view of a [`SelectExpr`] used by the compiler.
#[derive(Debug, Clone, Copy)]
pub struct QueryParts<'a> {
    pub table: &'a TableExpr,
    pub filter: Option<&'a Expr>,
    pub group_by: &'a [Expr],
    pub having: Option<&'a Expr>,
    pub order_by: &'a [OrderByItem],
    pub section: Option<(usize, usize)>,
    pub items: &'a [SelectItem],
    pub distinct: bool,
}

impl<'a> QueryParts<'a> {
    fn fill_group(&mut self, group: &'a GroupByExpr) {
        self.group_by = &group.keys;
        if let GroupBySource::Where(w) = &group.source {
            self.filter = Some(&w.condition);
        }
    }
}

// =============================================================================
// Stage capabilities
// =============================================================================

/// Stages that may be grouped: a table or a filtered table.
pub trait Groupable: Sized {
    fn into_group_source(self) -> GroupBySource;

    fn group_by(self, keys: impl IntoIterator<Item = Expr>) -> GroupByExpr {
        GroupByExpr {
            source: self.into_group_source(),
            keys: keys.into_iter().collect(),
        }
    }
}

/// Stages that may be ordered.
pub trait Orderable: Sized {
    fn into_order_source(self) -> OrderBySource;

    fn order_by(self, item: OrderByItem) -> OrderByExpr {
        OrderByExpr {
            source: self.into_order_source(),
            items: vec![item],
        }
    }
}

/// Stages that may be projected.
pub trait Selectable: Sized {
    fn into_select_source(self) -> SelectSource;

    fn select<I: Into<SelectItem>>(self, items: impl IntoIterator<Item = I>) -> SelectExpr {
        SelectExpr {
            source: self.into_select_source(),
            items: items.into_iter().map(Into::into).collect(),
            distinct: false,
        }
    }

    /// Select every readable column.
    fn select_all(self) -> SelectExpr {
        self.select(Vec::<SelectItem>::new())
    }
}

impl Groupable for TableExpr {
    fn into_group_source(self) -> GroupBySource {
        GroupBySource::Table(self)
    }
}

impl Groupable for WhereExpr {
    fn into_group_source(self) -> GroupBySource {
        GroupBySource::Where(self)
    }
}

impl Orderable for TableExpr {
    fn into_order_source(self) -> OrderBySource {
        OrderBySource::Table(self)
    }
}

impl Orderable for WhereExpr {
    fn into_order_source(self) -> OrderBySource {
        OrderBySource::Where(self)
    }
}

impl Orderable for GroupByExpr {
    fn into_order_source(self) -> OrderBySource {
        OrderBySource::GroupBy(self)
    }
}

impl Orderable for HavingExpr {
    fn into_order_source(self) -> OrderBySource {
        OrderBySource::Having(self)
    }
}

macro_rules! selectable {
    ($($ty:ident => $variant:ident),+ $(,)?) => {
        $(
            impl Selectable for $ty {
                fn into_select_source(self) -> SelectSource {
                    SelectSource::$variant(self)
                }
            }
        )+
    };
}

selectable!(
    TableExpr => Table,
    WhereExpr => Where,
    GroupByExpr => GroupBy,
    HavingExpr => Having,
    OrderByExpr => OrderBy,
    SectionExpr => Section,
);

// =============================================================================
// Debug rendering
// =============================================================================

impl fmt::Display for TableExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            SourceMode::View => write!(f, "{}", self.entity.name),
            SourceMode::Table => write!(f, "table {}", self.entity.name),
        }
    }
}

impl fmt::Display for WhereExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} where {}", self.source, self.condition)
    }
}

impl fmt::Display for GroupBySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(t) => t.fmt(f),
            Self::Where(w) => w.fmt(f),
        }
    }
}

impl fmt::Display for GroupByExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} group by ", self.source)?;
        super::write_joined(f, &self.keys, ", ")
    }
}

impl fmt::Display for HavingExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} having {}", self.source, self.condition)
    }
}

impl fmt::Display for OrderBySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(t) => t.fmt(f),
            Self::Where(w) => w.fmt(f),
            Self::GroupBy(g) => g.fmt(f),
            Self::Having(h) => h.fmt(f),
        }
    }
}

impl fmt::Display for OrderByItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.ascending { "asc" } else { "desc" };
        write!(f, "{} {}", self.expr, dir)
    }
}

impl fmt::Display for OrderByExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} order by ", self.source)?;
        super::write_joined(f, &self.items, ", ")
    }
}

impl fmt::Display for SectionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} section {},{}", self.source, self.start, self.count)
    }
}

impl fmt::Display for SelectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(t) => t.fmt(f),
            Self::Where(w) => w.fmt(f),
            Self::GroupBy(g) => g.fmt(f),
            Self::Having(h) => h.fmt(f),
            Self::OrderBy(o) => o.fmt(f),
            Self::Section(s) => s.fmt(f),
        }
    }
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} as {}", self.expr, alias),
            None => write!(f, "{}", self.expr),
        }
    }
}

impl fmt::Display for SelectExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("select ")?;
        if self.distinct {
            f.write_str("distinct ")?;
        }
        if self.items.is_empty() {
            f.write_str("*")?;
        } else {
            super::write_joined(f, &self.items, ", ")?;
        }
        write!(f, " from {}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ColumnDescriptor, EntityDescriptor, ValueType};

    fn user() -> EntityDescriptor {
        EntityDescriptor::new("User", "Users")
            .column(ColumnDescriptor::new("Id", ValueType::BigInt).primary_key())
            .column(ColumnDescriptor::new("Age", ValueType::Int))
    }

    fn users() -> TableExpr {
        TableExpr::view(EntityRef::new("User", user))
    }

    #[test]
    fn test_parts_of_full_chain() {
        let query = users()
            .filter(Expr::prop("Age").gt(18))
            .group_by([Expr::prop("Age")])
            .having(Expr::count_all().gt(1))
            .order_by(Expr::prop("Age").desc())
            .section(10, 5)
            .select([Expr::prop("Age"), Expr::count_all()]);

        let parts = query.parts();
        assert_eq!(parts.table.entity.name, "User");
        assert_eq!(parts.filter, Some(&Expr::prop("Age").gt(18)));
        assert_eq!(parts.group_by, &[Expr::prop("Age")]);
        assert!(parts.having.is_some());
        assert_eq!(parts.order_by.len(), 1);
        assert_eq!(parts.section, Some((10, 5)));
        assert_eq!(parts.items.len(), 2);
    }

    #[test]
    fn test_parts_of_bare_table() {
        let query = users().select_all();
        let parts = query.parts();
        assert!(parts.filter.is_none());
        assert!(parts.group_by.is_empty());
        assert!(parts.order_by.is_empty());
        assert!(parts.section.is_none());
    }

    #[test]
    fn test_where_then_order() {
        let query = users()
            .filter(Expr::prop("Age").gt(1))
            .and(Expr::prop("Age").lt(9))
            .order_by(Expr::prop("Id").asc())
            .select_all();
        let parts = query.parts();
        assert!(matches!(parts.filter, Some(Expr::Set(_))));
        assert_eq!(parts.order_by[0], Expr::prop("Id").asc());
    }

    #[test]
    fn test_stage_equality_is_structural() {
        let a = users().filter(Expr::prop("Age").gt(1)).select_all();
        let b = users().filter(Expr::prop("Age").gt(1)).select_all();
        let c = users().filter(Expr::prop("Age").gt(2)).select_all();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display() {
        let query = users()
            .filter(Expr::prop("Age").gt(18))
            .order_by(Expr::prop("Id").asc())
            .section(0, 10)
            .select([Expr::prop("Id")]);
        assert_eq!(
            query.to_string(),
            "select Id from User where (Age > 18) order by Id asc section 0,10"
        );
    }
}
