//! Physical planning: logical plan to operator tree
//!
//! Each pipeline becomes a chain of operators over its own argument leaf.
//! Several UNION branches sit under one [`UnionOperator`].

use super::operator::*;
use crate::query::ir::{LogicalOp, LogicalPlan};

/// Build the root operator of `plan`
pub fn build_operator_tree(plan: &LogicalPlan) -> OperatorBox {
    let mut branches: Vec<OperatorBox> = plan.branches.iter().map(|p| build_pipeline(&p.ops)).collect();
    if branches.len() == 1 {
        if let Some(root) = branches.pop() {
            return root;
        }
    }
    Box::new(UnionOperator::new(branches, plan.union_all))
}

/// Chain `ops` on top of a fresh argument leaf
fn build_pipeline(ops: &[LogicalOp]) -> OperatorBox {
    let mut current: OperatorBox = Box::new(ArgumentOperator::new());
    for op in ops {
        current = match op {
            LogicalOp::Scan {
                variable,
                labels,
                properties,
            } => Box::new(ScanOperator::new(
                current,
                variable.clone(),
                labels.clone(),
                properties.clone(),
            )),
            LogicalOp::Expand { start, steps } => Box::new(ExpandOperator::new(current, start.clone(), steps.clone())),
            LogicalOp::Optional { ops, introduced } => {
                Box::new(OptionalOperator::new(current, build_pipeline(ops), introduced.clone()))
            }
            LogicalOp::Filter(predicate) => Box::new(FilterOperator::new(current, predicate.clone())),
            LogicalOp::Unwind { expression, variable } => {
                Box::new(UnwindOperator::new(current, expression.clone(), variable.clone()))
            }
            LogicalOp::Project { items, retain_input } => {
                Box::new(ProjectOperator::new(current, items.clone(), *retain_input))
            }
            LogicalOp::Aggregate { keys, aggregates } => {
                Box::new(AggregateOperator::new(current, keys.clone(), aggregates.clone()))
            }
            LogicalOp::Distinct => Box::new(DistinctOperator::new(current)),
            LogicalOp::Sort(keys) => Box::new(SortOperator::new(current, keys.clone())),
            LogicalOp::Skip(count) => Box::new(SkipOperator::new(current, count.clone())),
            LogicalOp::Limit(count) => Box::new(LimitOperator::new(current, count.clone())),
            LogicalOp::Create(paths) => Box::new(CreateOperator::new(current, paths.clone())),
            LogicalOp::Update(items) => Box::new(UpdateOperator::new(current, items.clone())),
            LogicalOp::Delete { targets, detach } => Box::new(DeleteOperator::new(current, targets.clone(), *detach)),
        };
    }
    current
}
