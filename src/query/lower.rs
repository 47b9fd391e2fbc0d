//! Lowering from a validated AST to the logical plan
//!
//! Lowering is deterministic: the same tree always produces the same plan,
//! including the names of generated variables, which is what makes plans
//! cacheable by query text.

use super::ast::*;
use super::error::{CompileError, CompileResult};
use super::executor::Value;
use super::functions::FunctionRegistry;
use super::ir::*;
use super::validate::{star_columns, ANONYMOUS_PREFIX};
use crate::graph::{Direction, Label, RelType};
use std::collections::BTreeSet;

/// Prefix of the variables that carry aggregate results between operators
const AGGREGATE_PREFIX: &str = "#agg";

/// Turn a validated query into a logical plan
pub fn lower(query: &Query, functions: &FunctionRegistry) -> CompileResult<LogicalPlan> {
    let mut branches = Vec::new();
    for single in query.branches() {
        let mut lowering = Lowering::new(functions);
        branches.push(lowering.single(single)?);
    }

    let columns = branches.first().map(|b| b.columns.clone()).unwrap_or_default();
    let read_only = !branches
        .iter()
        .any(|b| b.ops.iter().any(LogicalOp::is_update));
    let union_all = query.unions.first().map(|u| u.all).unwrap_or(false);

    Ok(LogicalPlan {
        branches,
        union_all,
        columns,
        read_only,
    })
}

fn semantic(pos: Position, message: impl Into<String>) -> CompileError {
    CompileError::semantic(pos.line, pos.column, message)
}

fn literal(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Integer(i) => Value::Integer(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn labels(names: &[String]) -> Vec<Label> {
    names.iter().map(Label::new).collect()
}

struct Lowering<'a> {
    functions: &'a FunctionRegistry,
    /// Variables bound so far in this branch
    scope: BTreeSet<String>,
    anonymous: usize,
}

impl<'a> Lowering<'a> {
    fn new(functions: &'a FunctionRegistry) -> Self {
        Self {
            functions,
            scope: BTreeSet::new(),
            anonymous: 0,
        }
    }

    fn fresh(&mut self) -> String {
        let name = format!("{}{}", ANONYMOUS_PREFIX, self.anonymous);
        self.anonymous += 1;
        name
    }

    fn name_of(&mut self, variable: &Option<Ident>) -> String {
        match variable {
            Some(ident) => ident.name.clone(),
            None => self.fresh(),
        }
    }

    fn single(&mut self, query: &SingleQuery) -> CompileResult<Pipeline> {
        let mut ops = Vec::new();
        let mut columns = Vec::new();

        for clause in &query.clauses {
            match &clause.kind {
                ClauseKind::Match {
                    optional,
                    pattern,
                    predicate,
                } => {
                    let before = self.scope.clone();
                    let mut match_ops = Vec::new();
                    for path in pattern {
                        self.match_path(path, &mut match_ops)?;
                    }
                    if let Some(predicate) = predicate {
                        match_ops.push(LogicalOp::Filter(self.expr(predicate)?));
                    }
                    if *optional {
                        let introduced = self.scope.difference(&before).cloned().collect();
                        ops.push(LogicalOp::Optional {
                            ops: match_ops,
                            introduced,
                        });
                    } else {
                        ops.extend(match_ops);
                    }
                }
                ClauseKind::Unwind { expression, variable } => {
                    ops.push(LogicalOp::Unwind {
                        expression: self.expr(expression)?,
                        variable: variable.name.clone(),
                    });
                    self.scope.insert(variable.name.clone());
                }
                ClauseKind::With { projection, predicate } => {
                    let projected = self.projection(projection, &mut ops)?;
                    self.scope = projected.into_iter().collect();
                    if let Some(predicate) = predicate {
                        ops.push(LogicalOp::Filter(self.expr(predicate)?));
                    }
                }
                ClauseKind::Return(projection) => {
                    columns = self.projection(projection, &mut ops)?;
                }
                ClauseKind::Create(pattern) => {
                    let mut paths = Vec::new();
                    for path in pattern {
                        paths.push(self.create_path(path)?);
                    }
                    ops.push(LogicalOp::Create(paths));
                }
                ClauseKind::Set(items) => {
                    let mut updates = Vec::new();
                    for item in items {
                        updates.push(match item {
                            SetItem::Property { variable, key, value } => UpdateItem::SetProperty {
                                variable: variable.name.clone(),
                                key: key.clone(),
                                value: self.expr(value)?,
                            },
                            SetItem::Merge { variable, value } => UpdateItem::MergeProperties {
                                variable: variable.name.clone(),
                                value: self.expr(value)?,
                            },
                            SetItem::Replace { variable, value } => UpdateItem::ReplaceProperties {
                                variable: variable.name.clone(),
                                value: self.expr(value)?,
                            },
                            SetItem::Labels { variable, labels: names } => UpdateItem::AddLabels {
                                variable: variable.name.clone(),
                                labels: labels(names),
                            },
                        });
                    }
                    ops.push(LogicalOp::Update(updates));
                }
                ClauseKind::Remove(items) => {
                    let updates = items
                        .iter()
                        .map(|item| match item {
                            RemoveItem::Property { variable, key } => UpdateItem::RemoveProperty {
                                variable: variable.name.clone(),
                                key: key.clone(),
                            },
                            RemoveItem::Labels { variable, labels: names } => UpdateItem::RemoveLabels {
                                variable: variable.name.clone(),
                                labels: labels(names),
                            },
                        })
                        .collect();
                    ops.push(LogicalOp::Update(updates));
                }
                ClauseKind::Delete { detach, targets } => {
                    let targets = targets.iter().map(|t| self.expr(t)).collect::<CompileResult<_>>()?;
                    ops.push(LogicalOp::Delete {
                        targets,
                        detach: *detach,
                    });
                }
            }
        }

        Ok(Pipeline { ops, columns })
    }

    /// Selectivity estimate used to pick the end a path is matched from
    fn anchor_score(&self, node: &NodePattern) -> u8 {
        let bound = node
            .variable
            .as_ref()
            .is_some_and(|v| self.scope.contains(&v.name));
        let mut score = if bound { 2 } else { 0 };
        if !node.labels.is_empty() {
            score += 1;
        }
        score
    }

    fn match_path(&mut self, path: &PathPattern, ops: &mut Vec<LogicalOp>) -> CompileResult<()> {
        let end = path.steps.last().map(|(_, node)| node).unwrap_or(&path.start);
        let reversed;
        let path = if self.anchor_score(end) > self.anchor_score(&path.start) {
            reversed = reverse_path(path);
            &reversed
        } else {
            path
        };

        let mut predicates = Vec::new();
        let start = self.name_of(&path.start.variable);
        if self.scope.contains(&start) {
            if !path.start.labels.is_empty() {
                predicates.push(Expr::HasLabels {
                    operand: Box::new(Expr::variable(&start)),
                    labels: labels(&path.start.labels),
                });
            }
            self.property_predicates(&start, &path.start.properties, &mut predicates)?;
        } else {
            let properties = path
                .start
                .properties
                .iter()
                .map(|(key, value)| Ok::<_, CompileError>((key.clone(), self.expr(value)?)))
                .collect::<CompileResult<_>>()?;
            ops.push(LogicalOp::Scan {
                variable: start.clone(),
                labels: labels(&path.start.labels),
                properties,
            });
            self.scope.insert(start.clone());
        }

        if !path.steps.is_empty() {
            let mut steps = Vec::new();
            for (rel, node) in &path.steps {
                let rel_variable = self.name_of(&rel.variable);
                let rel_bound = self.scope.contains(&rel_variable);
                let hops = rel.length.map(|(min, max)| HopBounds {
                    min: min.unwrap_or(1) as usize,
                    max: max.map(|m| m as usize),
                });
                if hops.is_some() && !rel.properties.is_empty() {
                    return Err(semantic(
                        rel.pos,
                        "Property constraints on variable length relationships are not supported",
                    ));
                }
                self.property_predicates(&rel_variable, &rel.properties, &mut predicates)?;
                self.scope.insert(rel_variable.clone());

                let end_variable = self.name_of(&node.variable);
                let end_bound = self.scope.contains(&end_variable);
                self.property_predicates(&end_variable, &node.properties, &mut predicates)?;
                self.scope.insert(end_variable.clone());

                steps.push(ExpandStep {
                    rel_variable,
                    rel_bound,
                    rel_types: rel.types.iter().map(RelType::new).collect(),
                    direction: rel.direction,
                    end_variable,
                    end_bound,
                    end_labels: labels(&node.labels),
                    hops,
                });
            }
            ops.push(LogicalOp::Expand { start, steps });
        }

        if let Some(filter) = Expr::conjunction(predicates) {
            ops.push(LogicalOp::Filter(filter));
        }
        Ok(())
    }

    fn property_predicates(
        &mut self,
        variable: &str,
        properties: &[(String, Expression)],
        out: &mut Vec<Expr>,
    ) -> CompileResult<()> {
        for (key, value) in properties {
            out.push(Expr::binary(
                BinaryOp::Eq,
                Expr::property(Expr::variable(variable), key.clone()),
                self.expr(value)?,
            ));
        }
        Ok(())
    }

    fn create_path(&mut self, path: &PathPattern) -> CompileResult<CreatePath> {
        let mut nodes = vec![self.create_node(&path.start)?];
        let mut relationships = Vec::new();
        for (index, (rel, node)) in path.steps.iter().enumerate() {
            nodes.push(self.create_node(node)?);
            let (start, end) = match rel.direction {
                Direction::Incoming => (index + 1, index),
                _ => (index, index + 1),
            };
            let rel_type = rel
                .types
                .first()
                .map(RelType::new)
                .ok_or_else(|| semantic(rel.pos, "A relationship created with CREATE must have exactly one type"))?;
            let variable = self.name_of(&rel.variable);
            self.scope.insert(variable.clone());
            relationships.push(CreateRelationship {
                variable,
                rel_type,
                start,
                end,
                properties: self.properties(&rel.properties)?,
            });
        }
        Ok(CreatePath { nodes, relationships })
    }

    fn create_node(&mut self, node: &NodePattern) -> CompileResult<CreateNode> {
        let variable = self.name_of(&node.variable);
        let bound = self.scope.contains(&variable);
        self.scope.insert(variable.clone());
        Ok(CreateNode {
            variable,
            bound,
            labels: labels(&node.labels),
            properties: self.properties(&node.properties)?,
        })
    }

    fn properties(&mut self, properties: &[(String, Expression)]) -> CompileResult<Vec<(String, Expr)>> {
        properties
            .iter()
            .map(|(key, value)| Ok::<_, CompileError>((key.clone(), self.expr(value)?)))
            .collect()
    }

    /// Lower a RETURN or WITH body into `ops`; returns the projected columns
    fn projection(&mut self, projection: &Projection, ops: &mut Vec<LogicalOp>) -> CompileResult<Vec<String>> {
        let mut items: Vec<(String, &Expression, String)> = Vec::new();
        let star_items: Vec<Expression> = if projection.star {
            star_columns(self.scope.iter().cloned())
                .into_iter()
                .map(|name| {
                    Expression::Variable(Ident {
                        name,
                        pos: Position::default(),
                    })
                })
                .collect()
        } else {
            Vec::new()
        };
        for expression in &star_items {
            if let Expression::Variable(ident) = expression {
                items.push((ident.name.clone(), expression, ident.name.clone()));
            }
        }
        for item in &projection.items {
            items.push((item.name().to_string(), &item.expression, item.text.clone()));
        }
        let columns: Vec<String> = items.iter().map(|(name, _, _)| name.clone()).collect();

        let aggregating = items.iter().any(|(_, e, _)| e.contains_aggregate());
        let narrow = |columns: &[String]| LogicalOp::Project {
            items: columns.iter().map(|c| (c.clone(), Expr::variable(c))).collect(),
            retain_input: false,
        };

        if aggregating {
            let mut keys: Vec<(String, Expr)> = Vec::new();
            let mut aggregates = Vec::new();
            let mut projected = Vec::new();
            for (name, expression, _) in &items {
                if !expression.contains_aggregate() {
                    add_key(&mut keys, name, self.expr(expression)?, expression_pos(expression))?;
                    projected.push((name.clone(), Expr::variable(name)));
                    continue;
                }
                for ident in expression.free_variables_outside_aggregates() {
                    add_key(&mut keys, &ident.name, Expr::variable(&ident.name), ident.pos)?;
                }
                let rewritten = self.aggregate_expr(expression, &mut aggregates)?;
                projected.push((name.clone(), rewritten));
            }
            ops.push(LogicalOp::Aggregate { keys, aggregates });
            ops.push(LogicalOp::Project {
                items: projected,
                retain_input: false,
            });
            if projection.distinct {
                ops.push(LogicalOp::Distinct);
            }
            self.sort_skip_limit(projection, &items, ops)?;
        } else if projection.distinct {
            let projected = items
                .iter()
                .map(|(name, expression, _)| Ok::<_, CompileError>((name.clone(), self.expr(expression)?)))
                .collect::<CompileResult<_>>()?;
            ops.push(LogicalOp::Project {
                items: projected,
                retain_input: false,
            });
            ops.push(LogicalOp::Distinct);
            self.sort_skip_limit(projection, &items, ops)?;
        } else if !projection.order_by.is_empty() {
            let projected = items
                .iter()
                .map(|(name, expression, _)| Ok::<_, CompileError>((name.clone(), self.expr(expression)?)))
                .collect::<CompileResult<_>>()?;
            ops.push(LogicalOp::Project {
                items: projected,
                retain_input: true,
            });
            self.sort_skip_limit(projection, &items, ops)?;
            ops.push(narrow(&columns));
        } else {
            let projected = items
                .iter()
                .map(|(name, expression, _)| Ok::<_, CompileError>((name.clone(), self.expr(expression)?)))
                .collect::<CompileResult<_>>()?;
            ops.push(LogicalOp::Project {
                items: projected,
                retain_input: false,
            });
            self.sort_skip_limit(projection, &items, ops)?;
        }

        Ok(columns)
    }

    fn sort_skip_limit(
        &mut self,
        projection: &Projection,
        items: &[(String, &Expression, String)],
        ops: &mut Vec<LogicalOp>,
    ) -> CompileResult<()> {
        if !projection.order_by.is_empty() {
            let mut keys = Vec::new();
            for sort in &projection.order_by {
                let expression = match items.iter().find(|(_, _, text)| *text == sort.text) {
                    Some((name, _, _)) => Expr::variable(name),
                    None => self.expr(&sort.expression)?,
                };
                keys.push(SortKey {
                    expression,
                    descending: sort.descending,
                });
            }
            ops.push(LogicalOp::Sort(keys));
        }
        if let Some(skip) = &projection.skip {
            ops.push(LogicalOp::Skip(self.expr(skip)?));
        }
        if let Some(limit) = &projection.limit {
            ops.push(LogicalOp::Limit(self.expr(limit)?));
        }
        Ok(())
    }

    /// Lower an item containing aggregates, replacing each by its result variable
    fn aggregate_expr(
        &self,
        expression: &Expression,
        aggregates: &mut Vec<(String, AggregateExpr)>,
    ) -> CompileResult<Expr> {
        if expression.is_aggregate() {
            let aggregate = match expression {
                Expression::CountStar { .. } => AggregateExpr {
                    function: AggregateFunction::Count,
                    distinct: false,
                    argument: None,
                },
                Expression::FunctionCall {
                    name,
                    distinct,
                    args,
                    pos,
                } => {
                    let function = AggregateFunction::from_name(name)
                        .ok_or_else(|| semantic(*pos, format!("Unknown aggregate function {}", name)))?;
                    let [argument] = args.as_slice() else {
                        return Err(semantic(
                            *pos,
                            format!("Aggregate function {} takes exactly one argument", name),
                        ));
                    };
                    AggregateExpr {
                        function,
                        distinct: *distinct,
                        argument: Some(self.expr(argument)?),
                    }
                }
                _ => unreachable!("is_aggregate only holds for calls"),
            };
            let name = format!("{}{}", AGGREGATE_PREFIX, aggregates.len());
            aggregates.push((name.clone(), aggregate));
            return Ok(Expr::Variable(name));
        }

        let mut lower = |e: &Expression| self.aggregate_expr(e, aggregates);
        Ok(match expression {
            Expression::Property { base, key } => Expr::property(lower(base)?, key.clone()),
            Expression::Index { base, index } => Expr::Index {
                base: Box::new(lower(base)?),
                index: Box::new(lower(index)?),
            },
            Expression::List(items) => Expr::List(items.iter().map(&mut lower).collect::<CompileResult<_>>()?),
            Expression::Map(entries) => Expr::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok::<_, CompileError>((k.clone(), lower(v)?)))
                    .collect::<CompileResult<_>>()?,
            ),
            Expression::Binary { op, left, right } => Expr::binary(*op, lower(left)?, lower(right)?),
            Expression::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: Box::new(lower(operand)?),
            },
            Expression::IsNull { operand, negated } => Expr::IsNull {
                operand: Box::new(lower(operand)?),
                negated: *negated,
            },
            Expression::Case {
                operand,
                alternatives,
                default,
            } => Expr::Case {
                operand: operand.as_deref().map(&mut lower).transpose()?.map(Box::new),
                alternatives: alternatives
                    .iter()
                    .map(|(w, t)| Ok::<_, CompileError>((lower(w)?, lower(t)?)))
                    .collect::<CompileResult<_>>()?,
                default: default.as_deref().map(&mut lower).transpose()?.map(Box::new),
            },
            Expression::FunctionCall { name, args, .. } => {
                let args = args.iter().map(&mut lower).collect::<CompileResult<Vec<_>>>()?;
                self.call(name, args)
            }
            other => self.expr(other)?,
        })
    }

    fn call(&self, name: &str, args: Vec<Expr>) -> Expr {
        match self.functions.resolve(name, args.len()) {
            Some(function) => Expr::Call {
                function,
                name: name.to_string(),
                args,
            },
            None => Expr::UnknownCall {
                name: name.to_string(),
                args,
            },
        }
    }

    fn expr(&self, expression: &Expression) -> CompileResult<Expr> {
        Ok(match expression {
            Expression::Literal(lit) => Expr::Constant(literal(lit)),
            Expression::Parameter(name) => Expr::Parameter(name.clone()),
            Expression::Variable(ident) => Expr::Variable(ident.name.clone()),
            Expression::Property { base, key } => Expr::property(self.expr(base)?, key.clone()),
            Expression::Index { base, index } => Expr::Index {
                base: Box::new(self.expr(base)?),
                index: Box::new(self.expr(index)?),
            },
            Expression::List(items) => Expr::List(items.iter().map(|e| self.expr(e)).collect::<CompileResult<_>>()?),
            Expression::Map(entries) => Expr::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok::<_, CompileError>((k.clone(), self.expr(v)?)))
                    .collect::<CompileResult<_>>()?,
            ),
            Expression::Binary { op, left, right } => Expr::binary(*op, self.expr(left)?, self.expr(right)?),
            Expression::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: Box::new(self.expr(operand)?),
            },
            Expression::IsNull { operand, negated } => Expr::IsNull {
                operand: Box::new(self.expr(operand)?),
                negated: *negated,
            },
            Expression::Case {
                operand,
                alternatives,
                default,
            } => Expr::Case {
                operand: operand.as_deref().map(|e| self.expr(e)).transpose()?.map(Box::new),
                alternatives: alternatives
                    .iter()
                    .map(|(w, t)| Ok::<_, CompileError>((self.expr(w)?, self.expr(t)?)))
                    .collect::<CompileResult<_>>()?,
                default: default.as_deref().map(|e| self.expr(e)).transpose()?.map(Box::new),
            },
            Expression::FunctionCall { name, pos, .. } if is_aggregate_name(name) => {
                return Err(semantic(*pos, format!("Aggregate function {} is not allowed here", name)));
            }
            Expression::FunctionCall { name, args, .. } => {
                let args = args.iter().map(|e| self.expr(e)).collect::<CompileResult<Vec<_>>>()?;
                self.call(name, args)
            }
            Expression::CountStar { pos } => {
                return Err(semantic(*pos, "Aggregate function count(*) is not allowed here"));
            }
        })
    }
}

/// Add a grouping key unless an identical one exists under the same name
fn add_key(keys: &mut Vec<(String, Expr)>, name: &str, expr: Expr, pos: Position) -> CompileResult<()> {
    match keys.iter().find(|(k, _)| k == name) {
        Some((_, existing)) if *existing == expr => Ok(()),
        Some(_) => Err(semantic(pos, format!("Grouping key `{}` is ambiguous", name))),
        None => {
            keys.push((name.to_string(), expr));
            Ok(())
        }
    }
}

fn expression_pos(expression: &Expression) -> Position {
    let mut pos = Position::default();
    expression.visit(&mut |e| {
        if pos == Position::default() {
            match e {
                Expression::Variable(ident) => pos = ident.pos,
                Expression::FunctionCall { pos: p, .. } | Expression::CountStar { pos: p } => pos = *p,
                _ => {}
            }
        }
    });
    pos
}

/// The same path written from its other end
fn reverse_path(path: &PathPattern) -> PathPattern {
    let mut nodes: Vec<&NodePattern> = vec![&path.start];
    nodes.extend(path.steps.iter().map(|(_, node)| node));
    let rels: Vec<&RelationshipPattern> = path.steps.iter().map(|(rel, _)| rel).collect();

    let mut steps = Vec::with_capacity(rels.len());
    for index in (0..rels.len()).rev() {
        let mut rel = rels[index].clone();
        rel.direction = rel.direction.reverse();
        steps.push((rel, nodes[index].clone()));
    }
    PathPattern {
        start: nodes[nodes.len() - 1].clone(),
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_query;
    use crate::query::validate::validate;

    fn plan(text: &str) -> LogicalPlan {
        let query = parse_query(text).unwrap();
        validate(&query).unwrap();
        lower(&query, &FunctionRegistry::with_builtins()).unwrap()
    }

    fn ops(text: &str) -> Vec<LogicalOp> {
        plan(text).branches.remove(0).ops
    }

    #[test]
    fn test_scan_and_expand() {
        let ops = ops("MATCH (a:Person)-[r:KNOWS]->(b) RETURN a, b");
        assert!(matches!(
            &ops[0],
            LogicalOp::Scan { variable, labels, .. } if variable == "a" && labels == &vec![Label::new("Person")]
        ));
        let LogicalOp::Expand { start, steps } = &ops[1] else {
            panic!("expected expand, got {:?}", ops[1]);
        };
        assert_eq!(start, "a");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].rel_variable, "r");
        assert_eq!(steps[0].direction, Direction::Outgoing);
        assert_eq!(steps[0].end_variable, "b");
        assert!(steps[0].hops.is_none());
        assert!(matches!(&ops[2], LogicalOp::Project { retain_input: false, .. }));
    }

    #[test]
    fn test_path_is_anchored_at_labelled_end() {
        let ops = ops("MATCH (a)-[:KNOWS]->(b:Person) RETURN a");
        let LogicalOp::Scan { variable, .. } = &ops[0] else {
            panic!("expected scan");
        };
        assert_eq!(variable, "b");
        let LogicalOp::Expand { steps, .. } = &ops[1] else {
            panic!("expected expand");
        };
        assert_eq!(steps[0].direction, Direction::Incoming);
        assert_eq!(steps[0].end_variable, "a");
    }

    #[test]
    fn test_bound_start_becomes_filter() {
        let ops = ops("MATCH (a) MATCH (a:Person {name: 'x'}) RETURN a");
        assert_eq!(ops.iter().filter(|op| matches!(op, LogicalOp::Scan { .. })).count(), 1);
        assert!(matches!(&ops[1], LogicalOp::Filter(_)));
    }

    #[test]
    fn test_variable_length_bounds() {
        let bounded = ops("MATCH (a)-[r*2..]->(b) RETURN b");
        let LogicalOp::Expand { steps, .. } = &bounded[1] else {
            panic!("expected expand");
        };
        assert_eq!(steps[0].hops, Some(HopBounds { min: 2, max: None }));

        let unbounded = ops("MATCH (a)-[*]->(b) RETURN b");
        let LogicalOp::Expand { steps, .. } = &unbounded[1] else {
            panic!("expected expand");
        };
        assert_eq!(steps[0].hops, Some(HopBounds { min: 1, max: None }));
        assert!(steps[0].rel_variable.starts_with(ANONYMOUS_PREFIX));
    }

    #[test]
    fn test_optional_introduces_new_variables() {
        let ops = ops("MATCH (a) OPTIONAL MATCH (a)-[r]->(b) RETURN a, b");
        let LogicalOp::Optional { introduced, .. } = &ops[1] else {
            panic!("expected optional");
        };
        assert_eq!(introduced, &vec!["b".to_string(), "r".to_string()]);
    }

    #[test]
    fn test_aggregation_plan() {
        let ops = ops("MATCH (n) RETURN n.city AS city, count(*) + 1 AS c ORDER BY c DESC LIMIT 2");
        let LogicalOp::Aggregate { keys, aggregates } = &ops[1] else {
            panic!("expected aggregate, got {:?}", ops[1]);
        };
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].0, "city");
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].1.function, AggregateFunction::Count);
        assert!(aggregates[0].1.argument.is_none());
        assert!(matches!(&ops[2], LogicalOp::Project { .. }));
        assert!(matches!(&ops[3], LogicalOp::Sort(_)));
        assert!(matches!(&ops[4], LogicalOp::Limit(_)));
    }

    #[test]
    fn test_mixed_aggregate_adds_grouping_key() {
        let ops = ops("MATCH (n) RETURN n.age + count(*) AS x");
        let LogicalOp::Aggregate { keys, .. } = &ops[1] else {
            panic!("expected aggregate");
        };
        assert_eq!(keys, &vec![("n".to_string(), Expr::variable("n"))]);
    }

    #[test]
    fn test_order_by_on_plain_return_retains_input() {
        let ops = ops("MATCH (n) RETURN n.name AS name ORDER BY n.age");
        assert!(matches!(&ops[1], LogicalOp::Project { retain_input: true, .. }));
        assert!(matches!(&ops[2], LogicalOp::Sort(_)));
        let LogicalOp::Project { items, retain_input } = &ops[3] else {
            panic!("expected narrowing project");
        };
        assert!(!retain_input);
        assert_eq!(items, &vec![("name".to_string(), Expr::variable("name"))]);
    }

    #[test]
    fn test_sort_matching_item_text_uses_column() {
        let ops = ops("MATCH (n) RETURN DISTINCT n.name ORDER BY n.name");
        let LogicalOp::Sort(keys) = &ops[3] else {
            panic!("expected sort, got {:?}", ops[3]);
        };
        assert_eq!(keys[0].expression, Expr::variable("n.name"));
    }

    #[test]
    fn test_create_plan() {
        let plan = plan("MATCH (a) CREATE (a)<-[:OWNS {since: 1}]-(b:Thing)");
        assert!(!plan.read_only);
        assert!(plan.columns.is_empty());
        let LogicalOp::Create(paths) = &plan.branches[0].ops[1] else {
            panic!("expected create");
        };
        assert!(paths[0].nodes[0].bound);
        assert!(!paths[0].nodes[1].bound);
        assert_eq!(paths[0].relationships[0].start, 1);
        assert_eq!(paths[0].relationships[0].end, 0);
    }

    #[test]
    fn test_unknown_function_is_kept_for_runtime() {
        let ops = ops("RETURN nosuch(1) AS x");
        let LogicalOp::Project { items, .. } = &ops[0] else {
            panic!("expected project");
        };
        assert!(matches!(&items[0].1, Expr::UnknownCall { name, .. } if name == "nosuch"));
    }

    #[test]
    fn test_union_and_star() {
        let plan = plan("MATCH (a) RETURN * UNION ALL MATCH (a) RETURN a");
        assert_eq!(plan.branches.len(), 2);
        assert!(plan.union_all);
        assert_eq!(plan.columns, vec!["a".to_string()]);
        assert!(plan.read_only);
    }

    #[test]
    fn test_lowering_is_deterministic() {
        let text = "MATCH (a)-->()-[:R*1..3]-(b) WHERE a.x > 1 RETURN b, count(*) AS c";
        assert_eq!(plan(text), plan(text));
    }

    #[test]
    fn test_canonical_text_compiles_to_same_plan() {
        use crate::query::lexer::{canonical, tokenize};

        // Cache entries are keyed by the canonical rendering, so it must be
        // accepted by the grammar and mean the same query
        for text in [
            "match (a:Person {name:\"Al\"})-[r:KNOWS*1..3]->(b) where a.age>=18 and not b.x is null return b.name, count(*)",
            "MATCH (n) WHERE n.s =~ 'a.*' OR n.s STARTS WITH 'b' XOR n.s ENDS WITH 'c' RETURN DISTINCT n.s AS s ORDER BY s DESC SKIP 1 LIMIT 2",
            "UNWIND [1,2,3] AS x WITH x WHERE x <> 2 RETURN CASE x WHEN 1 THEN 'one' ELSE 'many' END AS word",
            "MATCH (a) OPTIONAL MATCH (a)<-[:R]-(c) RETURN a, c.v % 2 ^ 3 AS v UNION MATCH (a) RETURN a, -1 AS v",
            "MATCH (n:`Odd Label`) SET n += {k: $p}, n:Tag REMOVE n.old /* gone */ DETACH DELETE n // done",
            "CREATE (a:A {l: [1, 2.5, true, null]})-[:R]->(b:B) RETURN a.l[0], id(b)",
        ] {
            let rendered = canonical(&tokenize(text).unwrap());
            assert_eq!(canonical(&tokenize(&rendered).unwrap()), rendered);
            assert_eq!(plan(&rendered), plan(text), "{}", rendered);
        }
    }
}
