//! Logical plan
//!
//! A plan is one pipeline of operators per UNION branch. Each pipeline reads
//! top to bottom: the first operator pulls from a single empty argument row,
//! every later operator consumes the rows of the one before it.

use super::executor::Value;
use super::functions::FunctionId;
use crate::graph::{Direction, HopRange, Label, RelType};

pub use super::ast::{BinaryOp, UnaryOp};

/// Compiled form of a query
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalPlan {
    pub branches: Vec<Pipeline>,
    /// UNION ALL keeps duplicates; ignored for a single branch
    pub union_all: bool,
    /// Output columns; empty when the query does not RETURN
    pub columns: Vec<String>,
    /// No CREATE, SET, REMOVE or DELETE anywhere in the plan
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub ops: Vec<LogicalOp>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalOp {
    /// Bind `variable` to each entity with all `labels` and matching properties
    Scan {
        variable: String,
        labels: Vec<Label>,
        properties: Vec<(String, Expr)>,
    },
    /// Walk a chain of steps from the entity bound to `start`
    Expand {
        start: String,
        steps: Vec<ExpandStep>,
    },
    /// Left join: run `ops` per input row, or bind `introduced` to NULL
    Optional {
        ops: Vec<LogicalOp>,
        introduced: Vec<String>,
    },
    Filter(Expr),
    Unwind {
        expression: Expr,
        variable: String,
    },
    /// Evaluate items into a new row, or into the input row when `retain_input`
    Project {
        items: Vec<(String, Expr)>,
        retain_input: bool,
    },
    /// Group by `keys`; output rows hold the keys then the aggregates
    Aggregate {
        keys: Vec<(String, Expr)>,
        aggregates: Vec<(String, AggregateExpr)>,
    },
    Distinct,
    Sort(Vec<SortKey>),
    Skip(Expr),
    Limit(Expr),
    Create(Vec<CreatePath>),
    Update(Vec<UpdateItem>),
    Delete {
        targets: Vec<Expr>,
        detach: bool,
    },
}

impl LogicalOp {
    pub fn is_update(&self) -> bool {
        match self {
            LogicalOp::Create(_) | LogicalOp::Update(_) | LogicalOp::Delete { .. } => true,
            LogicalOp::Optional { ops, .. } => ops.iter().any(LogicalOp::is_update),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandStep {
    pub rel_variable: String,
    /// The relationship variable was bound earlier and must match
    pub rel_bound: bool,
    pub rel_types: Vec<RelType>,
    pub direction: Direction,
    pub end_variable: String,
    pub end_bound: bool,
    pub end_labels: Vec<Label>,
    /// Variable-length step; binds a list of relationships
    pub hops: Option<HopBounds>,
}

/// `*min..max` as written; a missing upper bound is filled in at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopBounds {
    pub min: usize,
    pub max: Option<usize>,
}

impl HopBounds {
    pub fn resolve(&self, max_hops: usize) -> HopRange {
        HopRange::between(self.min, self.max.unwrap_or(max_hops))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "count" => AggregateFunction::Count,
            "sum" => AggregateFunction::Sum,
            "avg" => AggregateFunction::Avg,
            "min" => AggregateFunction::Min,
            "max" => AggregateFunction::Max,
            "collect" => AggregateFunction::Collect,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub function: AggregateFunction,
    pub distinct: bool,
    /// `None` for `count(*)`
    pub argument: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expression: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePath {
    pub nodes: Vec<CreateNode>,
    pub relationships: Vec<CreateRelationship>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateNode {
    pub variable: String,
    /// Refers to an entity bound earlier instead of creating one
    pub bound: bool,
    pub labels: Vec<Label>,
    pub properties: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRelationship {
    pub variable: String,
    pub rel_type: RelType,
    /// Indexes into the path's nodes
    pub start: usize,
    pub end: usize,
    pub properties: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateItem {
    SetProperty { variable: String, key: String, value: Expr },
    MergeProperties { variable: String, value: Expr },
    ReplaceProperties { variable: String, value: Expr },
    AddLabels { variable: String, labels: Vec<Label> },
    RemoveProperty { variable: String, key: String },
    RemoveLabels { variable: String, labels: Vec<Label> },
}

/// Scalar expression with functions resolved
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Value),
    Parameter(String),
    Variable(String),
    Property {
        base: Box<Expr>,
        key: String,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    IsNull {
        operand: Box<Expr>,
        negated: bool,
    },
    Case {
        operand: Option<Box<Expr>>,
        alternatives: Vec<(Expr, Expr)>,
        default: Option<Box<Expr>>,
    },
    Call {
        function: FunctionId,
        name: String,
        args: Vec<Expr>,
    },
    /// No function with this name and arity was registered at compile time
    UnknownCall {
        name: String,
        args: Vec<Expr>,
    },
    /// Entity carries every label
    HasLabels {
        operand: Box<Expr>,
        labels: Vec<Label>,
    },
}

impl Expr {
    pub fn variable(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    pub fn property(base: Expr, key: impl Into<String>) -> Self {
        Expr::Property {
            base: Box::new(base),
            key: key.into(),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// AND of all predicates, or `None` when there are none
    pub fn conjunction(predicates: Vec<Expr>) -> Option<Expr> {
        predicates.into_iter().reduce(|acc, p| Expr::binary(BinaryOp::And, acc, p))
    }
}
