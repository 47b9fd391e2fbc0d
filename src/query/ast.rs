//! Abstract syntax tree for Cypher queries
//!
//! The parser produces this tree, the validator checks it and lowering turns
//! it into a [`LogicalPlan`](super::ir::LogicalPlan). Names carry their source
//! position so scope errors can point at the offending token.

use crate::graph::Direction;

/// 1-based source position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A user-written name with its position
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub pos: Position,
}

/// A complete query: one or more single queries joined by UNION
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub first: SingleQuery,
    pub unions: Vec<Union>,
}

impl Query {
    /// All single queries in source order
    pub fn branches(&self) -> impl Iterator<Item = &SingleQuery> {
        std::iter::once(&self.first).chain(self.unions.iter().map(|u| &u.query))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Union {
    /// UNION ALL keeps duplicate rows
    pub all: bool,
    pub pos: Position,
    pub query: SingleQuery,
}

/// A sequence of clauses
#[derive(Debug, Clone, PartialEq)]
pub struct SingleQuery {
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub pos: Position,
    pub kind: ClauseKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClauseKind {
    Match {
        optional: bool,
        pattern: Vec<PathPattern>,
        predicate: Option<Expression>,
    },
    Unwind {
        expression: Expression,
        variable: Ident,
    },
    With {
        projection: Projection,
        predicate: Option<Expression>,
    },
    Return(Projection),
    Create(Vec<PathPattern>),
    Set(Vec<SetItem>),
    Remove(Vec<RemoveItem>),
    Delete {
        detach: bool,
        targets: Vec<Expression>,
    },
}

impl ClauseKind {
    pub fn name(&self) -> &'static str {
        match self {
            ClauseKind::Match { optional: true, .. } => "OPTIONAL MATCH",
            ClauseKind::Match { .. } => "MATCH",
            ClauseKind::Unwind { .. } => "UNWIND",
            ClauseKind::With { .. } => "WITH",
            ClauseKind::Return(_) => "RETURN",
            ClauseKind::Create(_) => "CREATE",
            ClauseKind::Set(_) => "SET",
            ClauseKind::Remove(_) => "REMOVE",
            ClauseKind::Delete { .. } => "DELETE",
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(
            self,
            ClauseKind::Create(_) | ClauseKind::Set(_) | ClauseKind::Remove(_) | ClauseKind::Delete { .. }
        )
    }
}

/// Body shared by RETURN and WITH
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub distinct: bool,
    /// `*` was written before the items
    pub star: bool,
    pub items: Vec<ProjectionItem>,
    pub order_by: Vec<SortItem>,
    pub skip: Option<Expression>,
    pub limit: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expression: Expression,
    pub alias: Option<Ident>,
    /// Canonical rendering of the expression source
    pub text: String,
}

impl ProjectionItem {
    /// Column name: the alias, the variable name, or the expression text
    pub fn name(&self) -> &str {
        match (&self.alias, &self.expression) {
            (Some(alias), _) => &alias.name,
            (None, Expression::Variable(var)) => &var.name,
            (None, _) => &self.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortItem {
    pub expression: Expression,
    pub descending: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetItem {
    /// `n.key = value`
    Property { variable: Ident, key: String, value: Expression },
    /// `n += map`
    Merge { variable: Ident, value: Expression },
    /// `n = map`
    Replace { variable: Ident, value: Expression },
    /// `n:Label`
    Labels { variable: Ident, labels: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveItem {
    Property { variable: Ident, key: String },
    Labels { variable: Ident, labels: Vec<String> },
}

/// `(a)-[r]->(b)<-[s]-(c)`
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    pub start: NodePattern,
    pub steps: Vec<(RelationshipPattern, NodePattern)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub variable: Option<Ident>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expression)>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipPattern {
    pub variable: Option<Ident>,
    pub types: Vec<String>,
    /// `->` is outgoing, `<-` incoming, anything else matches both ways
    pub direction: Direction,
    /// `*min..max`; `None` is a single hop
    pub length: Option<(Option<u64>, Option<u64>)>,
    pub properties: Vec<(String, Expression)>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    Xor,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    RegexMatch,
    StartsWith,
    EndsWith,
    Contains,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Parameter(String),
    Variable(Ident),
    Property {
        base: Box<Expression>,
        key: String,
    },
    Index {
        base: Box<Expression>,
        index: Box<Expression>,
    },
    List(Vec<Expression>),
    Map(Vec<(String, Expression)>),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    IsNull {
        operand: Box<Expression>,
        negated: bool,
    },
    Case {
        operand: Option<Box<Expression>>,
        alternatives: Vec<(Expression, Expression)>,
        default: Option<Box<Expression>>,
    },
    FunctionCall {
        name: String,
        distinct: bool,
        args: Vec<Expression>,
        pos: Position,
    },
    /// `count(*)`
    CountStar { pos: Position },
}

/// Functions evaluated over groups of rows
pub const AGGREGATE_FUNCTIONS: &[&str] = &["count", "sum", "avg", "min", "max", "collect"];

pub fn is_aggregate_name(name: &str) -> bool {
    AGGREGATE_FUNCTIONS.iter().any(|f| f.eq_ignore_ascii_case(name))
}

impl Expression {
    /// True for `count(*)` and calls of aggregate functions
    pub fn is_aggregate(&self) -> bool {
        match self {
            Expression::CountStar { .. } => true,
            Expression::FunctionCall { name, .. } => is_aggregate_name(name),
            _ => false,
        }
    }

    /// True if an aggregate appears anywhere in this expression
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| found |= e.is_aggregate());
        found
    }

    /// Direct sub-expressions
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Literal(_)
            | Expression::Parameter(_)
            | Expression::Variable(_)
            | Expression::CountStar { .. } => Vec::new(),
            Expression::Property { base, .. } => vec![base],
            Expression::Index { base, index } => vec![base, index],
            Expression::List(items) => items.iter().collect(),
            Expression::Map(entries) => entries.iter().map(|(_, e)| e).collect(),
            Expression::Binary { left, right, .. } => vec![left, right],
            Expression::Unary { operand, .. } | Expression::IsNull { operand, .. } => vec![operand],
            Expression::Case {
                operand,
                alternatives,
                default,
            } => {
                let mut out: Vec<&Expression> = Vec::new();
                if let Some(op) = operand {
                    out.push(op);
                }
                for (when, then) in alternatives {
                    out.push(when);
                    out.push(then);
                }
                if let Some(d) = default {
                    out.push(d);
                }
                out
            }
            Expression::FunctionCall { args, .. } => args.iter().collect(),
        }
    }

    /// Pre-order walk over this expression and all sub-expressions
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Expression)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Variables referenced outside of aggregate calls
    pub fn free_variables_outside_aggregates(&self) -> Vec<&Ident> {
        let mut out = Vec::new();
        collect_free(self, &mut out);
        out
    }
}

fn collect_free<'a>(expr: &'a Expression, out: &mut Vec<&'a Ident>) {
    if expr.is_aggregate() {
        return;
    }
    if let Expression::Variable(ident) = expr {
        out.push(ident);
    }
    for child in expr.children() {
        collect_free(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expression {
        Expression::Variable(Ident {
            name: name.to_string(),
            pos: Position::default(),
        })
    }

    fn call(name: &str, args: Vec<Expression>) -> Expression {
        Expression::FunctionCall {
            name: name.to_string(),
            distinct: false,
            args,
            pos: Position::default(),
        }
    }

    #[test]
    fn test_aggregate_detection() {
        assert!(call("COUNT", vec![var("n")]).is_aggregate());
        assert!(!call("toUpper", vec![var("n")]).is_aggregate());

        let nested = Expression::Binary {
            op: BinaryOp::Add,
            left: Box::new(var("x")),
            right: Box::new(call("sum", vec![var("y")])),
        };
        assert!(!nested.is_aggregate());
        assert!(nested.contains_aggregate());

        let free: Vec<&str> = nested
            .free_variables_outside_aggregates()
            .into_iter()
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(free, vec!["x"]);
    }

    #[test]
    fn test_projection_item_name() {
        let item = ProjectionItem {
            expression: var("n"),
            alias: None,
            text: "n".to_string(),
        };
        assert_eq!(item.name(), "n");

        let item = ProjectionItem {
            expression: Expression::Property {
                base: Box::new(var("n")),
                key: "age".to_string(),
            },
            alias: None,
            text: "n.age".to_string(),
        };
        assert_eq!(item.name(), "n.age");
    }
}
