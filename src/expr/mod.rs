//! Expression IR.
//!
//! A closed, statically-typed tree of query fragments. Leaves are property
//! references, literal values and function calls; composites are binary/unary
//! operators and combinator sets. Query stages (`FROM`/`WHERE`/`GROUP BY`/...)
//! live in [`stage`] and are typed so clauses can only be attached in valid order.
//!
//! The IR is pure data: it has structural equality and hashing (order-sensitive
//! for child lists) and a dialect-free `Display` rendering, but no knowledge of
//! SQL dialects. Rendering is done by [`crate::sql`].

pub mod stage;
pub mod value;

pub use stage::{
    GroupByExpr, GroupBySource, Groupable, HavingExpr, OrderByExpr, OrderByItem, OrderBySource,
    Orderable, SectionExpr, SelectExpr, SelectItem, SelectSource, Selectable, SourceMode,
    TableExpr, WhereExpr,
};
pub use value::Value;

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Reference to an entity property, resolved against the active table or view.
    Property(PropertyExpr),
    /// Literal; always emitted as a parameter.
    Value(Value),
    Function(FunctionExpr),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Set(ExprSet),
    Subquery(Box<SelectExpr>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyExpr {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionExpr {
    /// Logical name (e.g. `ToUpper`); dialects map it to SQL.
    pub name: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Equal,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Like,
    StartsWith,
    EndsWith,
    Contains,
    In,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    /// Operators that produce a boolean and accept the `negated` flag.
    pub fn is_predicate(&self) -> bool {
        !matches!(
            self,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide
        )
    }

    fn symbol(&self, negated: bool) -> &'static str {
        match (self, negated) {
            (Self::Equal, false) => "=",
            (Self::Equal, true) => "<>",
            (Self::LessThan, false) => "<",
            (Self::LessThan, true) => ">=",
            (Self::LessOrEqual, false) => "<=",
            (Self::LessOrEqual, true) => ">",
            (Self::GreaterThan, false) => ">",
            (Self::GreaterThan, true) => "<=",
            (Self::GreaterOrEqual, false) => ">=",
            (Self::GreaterOrEqual, true) => "<",
            (Self::Like, false) => "like",
            (Self::Like, true) => "not like",
            (Self::StartsWith, false) => "starts with",
            (Self::StartsWith, true) => "not starts with",
            (Self::EndsWith, false) => "ends with",
            (Self::EndsWith, true) => "not ends with",
            (Self::Contains, false) => "contains",
            (Self::Contains, true) => "not contains",
            (Self::In, false) => "in",
            (Self::In, true) => "not in",
            (Self::Add, _) => "+",
            (Self::Subtract, _) => "-",
            (Self::Multiply, _) => "*",
            (Self::Divide, _) => "/",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    /// Composed with the positive operator: `Like` + negated renders `NOT LIKE`.
    pub negated: bool,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
    /// Only meaningful on a subquery operand.
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: Box<Expr>,
}

/// How the items of an [`ExprSet`] are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetJoin {
    And,
    Or,
    /// String concatenation, rendered with the dialect's concat syntax.
    Concat,
    /// Comma-separated list (e.g. the right side of `IN`).
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExprSet {
    pub join: SetJoin,
    pub items: Vec<Expr>,
}

impl Expr {
    pub fn prop(name: impl Into<String>) -> Self {
        Self::Property(PropertyExpr { name: name.into() })
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn func(name: impl Into<String>, args: impl IntoIterator<Item = Expr>) -> Self {
        Self::Function(FunctionExpr {
            name: name.into(),
            args: args.into_iter().collect(),
        })
    }

    /// `COUNT(*)`
    pub fn count_all() -> Self {
        Self::func("Count", [])
    }

    pub fn set(join: SetJoin, items: impl IntoIterator<Item = Expr>) -> Self {
        Self::Set(ExprSet {
            join,
            items: items.into_iter().collect(),
        })
    }

    /// Comma list of literal values, used with [`Expr::in_list`].
    pub fn list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::set(SetJoin::Default, values.into_iter().map(Expr::value))
    }

    pub fn subquery(select: SelectExpr) -> Self {
        Self::Subquery(Box::new(select))
    }

    pub fn exists(select: SelectExpr) -> Self {
        Self::unary(UnaryOp::Exists, Self::subquery(select))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::Binary(BinaryExpr {
            op,
            negated: false,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::Unary(UnaryExpr {
            op,
            operand: Box::new(operand),
        })
    }

    fn compare(self, op: BinaryOp, right: impl Into<Expr>) -> Self {
        Self::binary(op, self, right.into())
    }

    pub fn eq(self, right: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::Equal, right)
    }

    pub fn ne(self, right: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::Equal, right).negate()
    }

    pub fn lt(self, right: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::LessThan, right)
    }

    pub fn le(self, right: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::LessOrEqual, right)
    }

    pub fn gt(self, right: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::GreaterThan, right)
    }

    pub fn ge(self, right: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::GreaterOrEqual, right)
    }

    pub fn like(self, pattern: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::Like, pattern)
    }

    pub fn starts_with(self, prefix: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::StartsWith, prefix)
    }

    pub fn ends_with(self, suffix: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::EndsWith, suffix)
    }

    pub fn contains(self, needle: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::Contains, needle)
    }

    pub fn in_list<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Self {
        self.compare(BinaryOp::In, Expr::list(values))
    }

    pub fn in_query(self, select: SelectExpr) -> Self {
        self.compare(BinaryOp::In, Expr::subquery(select))
    }

    pub fn is_null(self) -> Self {
        self.compare(BinaryOp::Equal, Expr::Value(Value::Null))
    }

    pub fn is_not_null(self) -> Self {
        self.is_null().negate()
    }

    pub fn add(self, right: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::Add, right)
    }

    pub fn sub(self, right: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::Subtract, right)
    }

    pub fn mul(self, right: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::Multiply, right)
    }

    pub fn div(self, right: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::Divide, right)
    }

    /// Flip the `negated` flag of a predicate, or wrap anything else in `NOT`.
    pub fn negate(self) -> Self {
        match self {
            Self::Binary(mut b) if b.op.is_predicate() => {
                b.negated = !b.negated;
                Self::Binary(b)
            }
            other => Self::unary(UnaryOp::Not, other),
        }
    }

    pub fn and(self, other: Expr) -> Self {
        self.combine(SetJoin::And, other)
    }

    pub fn or(self, other: Expr) -> Self {
        self.combine(SetJoin::Or, other)
    }

    /// Appends to an existing set with the same combinator instead of nesting.
    fn combine(self, join: SetJoin, other: Expr) -> Self {
        match self {
            Self::Set(mut set) if set.join == join => {
                set.items.push(other);
                Self::Set(set)
            }
            first => Self::set(join, [first, other]),
        }
    }

    /// Conjunction of all conditions; `None` when the input is empty.
    pub fn all(conditions: impl IntoIterator<Item = Expr>) -> Option<Self> {
        conditions.into_iter().reduce(Expr::and)
    }

    pub fn asc(self) -> OrderByItem {
        OrderByItem {
            expr: self,
            ascending: true,
        }
    }

    pub fn desc(self) -> OrderByItem {
        OrderByItem {
            expr: self,
            ascending: false,
        }
    }

    pub fn alias(self, alias: impl Into<String>) -> SelectItem {
        SelectItem {
            expr: self,
            alias: Some(alias.into()),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Value(value)
    }
}

macro_rules! expr_from_literal {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Expr {
                fn from(v: $ty) -> Self {
                    Expr::Value(Value::from(v))
                }
            }
        )+
    };
}

expr_from_literal!(bool, i32, i64, u32, f64, &str, String);

// =============================================================================
// Debug rendering
// =============================================================================

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(p) => write!(f, "{}", p.name),
            Self::Value(v) => write!(f, "{}", v),
            Self::Function(func) => {
                write!(f, "{}(", func.name)?;
                write_joined(f, &func.args, ", ")?;
                f.write_str(")")
            }
            Self::Binary(b) => write!(f, "({} {} {})", b.left, b.op.symbol(b.negated), b.right),
            Self::Unary(u) => match u.op {
                UnaryOp::Not => write!(f, "not {}", u.operand),
                UnaryOp::Negate => write!(f, "-{}", u.operand),
                UnaryOp::Exists => write!(f, "exists {}", u.operand),
            },
            Self::Set(set) => {
                let sep = match set.join {
                    SetJoin::And => " and ",
                    SetJoin::Or => " or ",
                    SetJoin::Concat => " || ",
                    SetJoin::Default => ", ",
                };
                f.write_str("(")?;
                write_joined(f, &set.items, sep)?;
                f.write_str(")")
            }
            Self::Subquery(select) => write!(f, "({})", select),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(expr: &Expr) -> u64 {
        let mut h = DefaultHasher::new();
        expr.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_structural_equality_and_hash() {
        let a = Expr::prop("Age").gt(18).and(Expr::prop("Name").like("a%"));
        let b = Expr::prop("Age").gt(18).and(Expr::prop("Name").like("a%"));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_child_order_matters() {
        let a = Expr::prop("A").eq(1).and(Expr::prop("B").eq(2));
        let b = Expr::prop("B").eq(2).and(Expr::prop("A").eq(1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_and_flattens_same_combinator() {
        let e = Expr::prop("A")
            .eq(1)
            .and(Expr::prop("B").eq(2))
            .and(Expr::prop("C").eq(3));
        match e {
            Expr::Set(set) => {
                assert_eq!(set.join, SetJoin::And);
                assert_eq!(set.items.len(), 3);
            }
            other => panic!("expected set, got {other:?}"),
        }
    }

    #[test]
    fn test_negate_flips_predicates() {
        let e = Expr::prop("Name").like("x%").negate();
        assert_eq!(e.to_string(), "(Name not like 'x%')");
        let back = e.negate();
        assert_eq!(back.to_string(), "(Name like 'x%')");

        let arithmetic = Expr::prop("A").add(1).negate();
        assert_eq!(arithmetic.to_string(), "not (A + 1)");
    }

    #[test]
    fn test_display_is_dialect_free() {
        let e = Expr::func("ToUpper", [Expr::prop("Name")])
            .eq("BOB")
            .or(Expr::prop("Id").in_list([1, 2]));
        assert_eq!(e.to_string(), "((ToUpper(Name) = 'BOB') or (Id in (1, 2)))");
    }

    #[test]
    fn test_all_of_empty_is_none() {
        assert!(Expr::all(Vec::new()).is_none());
        assert_eq!(
            Expr::all([Expr::prop("A").eq(1)]).unwrap(),
            Expr::prop("A").eq(1)
        );
    }
}
