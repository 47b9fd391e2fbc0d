//! Scope and semantic checks over the AST
//!
//! Runs after parsing and before lowering. Lowering assumes a validated tree:
//! every variable it sees is bound and every aggregate sits in a projection.

use super::ast::*;
use super::error::{CompileError, CompileResult};
use crate::graph::Direction;
use std::collections::BTreeMap;

/// What a variable is bound to, as far as the compiler can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarKind {
    Entity,
    Relationship,
    Value,
}

type Scope = BTreeMap<String, VarKind>;

/// Where an expression appears, which decides whether aggregates are allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregatePolicy {
    Allowed,
    Forbidden(&'static str),
    Nested,
}

fn semantic(pos: Position, message: impl Into<String>) -> CompileError {
    CompileError::semantic(pos.line, pos.column, message)
}

/// Check a parsed query, returning the first error found
pub fn validate(query: &Query) -> CompileResult<()> {
    let first_columns = validate_single(&query.first)?;

    if let Some(first_union) = query.unions.first() {
        for union in &query.unions {
            if union.all != first_union.all {
                return Err(semantic(union.pos, "Cannot mix UNION and UNION ALL"));
            }
        }
        let Some(expected) = first_columns else {
            return Err(semantic(first_union.pos, "Every part of a UNION must end with RETURN"));
        };
        for union in &query.unions {
            match validate_single(&union.query)? {
                Some(columns) if columns == expected => {}
                Some(_) => {
                    return Err(semantic(
                        union.pos,
                        "All parts of a UNION must return the same column names",
                    ))
                }
                None => return Err(semantic(union.pos, "Every part of a UNION must end with RETURN")),
            }
        }
    }

    Ok(())
}

/// Validate one single query; returns its RETURN columns if it has one
fn validate_single(query: &SingleQuery) -> CompileResult<Option<Vec<String>>> {
    let mut scope = Scope::new();
    let mut columns = None;
    let count = query.clauses.len();

    for (index, clause) in query.clauses.iter().enumerate() {
        let last = index + 1 == count;
        match &clause.kind {
            ClauseKind::Match { pattern, predicate, .. } => {
                for path in pattern {
                    bind_path(path, &mut scope)?;
                }
                for path in pattern {
                    check_pattern_properties(path, &scope)?;
                }
                if let Some(predicate) = predicate {
                    check_expression(predicate, &scope, AggregatePolicy::Forbidden("WHERE"))?;
                }
            }
            ClauseKind::Unwind { expression, variable } => {
                check_expression(expression, &scope, AggregatePolicy::Forbidden("UNWIND"))?;
                if scope.contains_key(&variable.name) {
                    return Err(semantic(
                        variable.pos,
                        format!("Variable `{}` already declared", variable.name),
                    ));
                }
                scope.insert(variable.name.clone(), VarKind::Value);
            }
            ClauseKind::With { projection, predicate } => {
                let new_scope = check_projection(projection, &scope, true)?;
                scope = new_scope;
                if let Some(predicate) = predicate {
                    check_expression(predicate, &scope, AggregatePolicy::Forbidden("WHERE"))?;
                }
            }
            ClauseKind::Return(projection) => {
                if !last {
                    return Err(semantic(clause.pos, "RETURN can only be used at the end of the query"));
                }
                check_projection(projection, &scope, false)?;
                columns = Some(return_columns(projection, &scope));
            }
            ClauseKind::Create(pattern) => {
                for path in pattern {
                    check_create_path(path, &mut scope)?;
                }
            }
            ClauseKind::Set(items) => {
                for item in items {
                    let (variable, value) = match item {
                        SetItem::Property { variable, value, .. }
                        | SetItem::Merge { variable, value }
                        | SetItem::Replace { variable, value } => (variable, Some(value)),
                        SetItem::Labels { variable, .. } => (variable, None),
                    };
                    require_bound(variable, &scope)?;
                    if let Some(value) = value {
                        check_expression(value, &scope, AggregatePolicy::Forbidden("SET"))?;
                    }
                }
            }
            ClauseKind::Remove(items) => {
                for item in items {
                    let (RemoveItem::Property { variable, .. } | RemoveItem::Labels { variable, .. }) = item;
                    require_bound(variable, &scope)?;
                }
            }
            ClauseKind::Delete { targets, .. } => {
                for target in targets {
                    check_expression(target, &scope, AggregatePolicy::Forbidden("DELETE"))?;
                }
            }
        }
    }

    if let Some(last) = query.clauses.last() {
        if matches!(
            last.kind,
            ClauseKind::Match { .. } | ClauseKind::With { .. } | ClauseKind::Unwind { .. }
        ) {
            return Err(semantic(
                last.pos,
                format!(
                    "Query cannot conclude with {} (must be RETURN or an update clause)",
                    last.kind.name()
                ),
            ));
        }
    }

    Ok(columns)
}

/// Named variables expanded by `*`, sorted
pub(crate) fn star_columns(scope_names: impl Iterator<Item = String>) -> Vec<String> {
    let mut names: Vec<String> = scope_names.filter(|n| !is_anonymous(n)).collect();
    names.sort();
    names
}

/// Prefix of compiler-generated variable names; `#` cannot start an identifier
pub(crate) const ANONYMOUS_PREFIX: &str = "#anon";

pub(crate) fn is_anonymous(name: &str) -> bool {
    name.starts_with(ANONYMOUS_PREFIX)
}

fn return_columns(projection: &Projection, scope: &Scope) -> Vec<String> {
    let mut columns = if projection.star {
        star_columns(scope.keys().cloned())
    } else {
        Vec::new()
    };
    columns.extend(projection.items.iter().map(|i| i.name().to_string()));
    columns
}

fn require_bound(variable: &Ident, scope: &Scope) -> CompileResult<VarKind> {
    scope.get(&variable.name).copied().ok_or_else(|| {
        CompileError::scope(
            variable.pos.line,
            variable.pos.column,
            format!("Variable `{}` not defined", variable.name),
        )
    })
}

fn bind(variable: &Ident, kind: VarKind, scope: &mut Scope) -> CompileResult<()> {
    match scope.get(&variable.name) {
        None => {
            scope.insert(variable.name.clone(), kind);
            Ok(())
        }
        Some(existing) if *existing == kind || *existing == VarKind::Value => Ok(()),
        Some(_) => Err(semantic(
            variable.pos,
            format!("Variable `{}` is already bound to a different kind of value", variable.name),
        )),
    }
}

fn bind_path(path: &PathPattern, scope: &mut Scope) -> CompileResult<()> {
    if let Some(var) = &path.start.variable {
        bind(var, VarKind::Entity, scope)?;
    }
    for (rel, node) in &path.steps {
        if let Some(var) = &rel.variable {
            let kind = if rel.length.is_some() {
                VarKind::Value
            } else {
                VarKind::Relationship
            };
            bind(var, kind, scope)?;
        }
        if let Some((Some(min), Some(max))) = rel.length {
            if min > max {
                return Err(semantic(rel.pos, "Variable length lower bound exceeds the upper bound"));
            }
        }
        if let Some(var) = &node.variable {
            bind(var, VarKind::Entity, scope)?;
        }
    }
    Ok(())
}

fn check_properties(properties: &[(String, Expression)], scope: &Scope) -> CompileResult<()> {
    for (_, value) in properties {
        check_expression(value, scope, AggregatePolicy::Forbidden("a pattern"))?;
    }
    Ok(())
}

fn check_pattern_properties(path: &PathPattern, scope: &Scope) -> CompileResult<()> {
    check_properties(&path.start.properties, scope)?;
    for (rel, node) in &path.steps {
        check_properties(&rel.properties, scope)?;
        check_properties(&node.properties, scope)?;
    }
    Ok(())
}

fn check_create_node(node: &NodePattern, scope: &mut Scope) -> CompileResult<()> {
    check_properties(&node.properties, scope)?;
    if let Some(var) = &node.variable {
        if scope.contains_key(&var.name) {
            if !node.labels.is_empty() || !node.properties.is_empty() {
                return Err(semantic(
                    var.pos,
                    format!("Variable `{}` already declared", var.name),
                ));
            }
            if scope.get(&var.name) != Some(&VarKind::Entity) {
                return Err(semantic(var.pos, format!("Variable `{}` is not an entity", var.name)));
            }
        } else {
            scope.insert(var.name.clone(), VarKind::Entity);
        }
    }
    Ok(())
}

fn check_create_path(path: &PathPattern, scope: &mut Scope) -> CompileResult<()> {
    check_create_node(&path.start, scope)?;
    for (rel, node) in &path.steps {
        if rel.types.len() != 1 {
            return Err(semantic(
                rel.pos,
                "A relationship created with CREATE must have exactly one type",
            ));
        }
        if rel.direction == Direction::Both {
            return Err(semantic(
                rel.pos,
                "A relationship created with CREATE must have a direction",
            ));
        }
        if rel.length.is_some() {
            return Err(semantic(rel.pos, "Variable length relationships cannot be created"));
        }
        check_properties(&rel.properties, scope)?;
        if let Some(var) = &rel.variable {
            if scope.contains_key(&var.name) {
                return Err(semantic(var.pos, format!("Variable `{}` already declared", var.name)));
            }
            scope.insert(var.name.clone(), VarKind::Relationship);
        }
        check_create_node(node, scope)?;
    }
    Ok(())
}

/// Check a RETURN or WITH body; returns the scope visible after it
fn check_projection(projection: &Projection, scope: &Scope, is_with: bool) -> CompileResult<Scope> {
    let clause = if is_with { "WITH" } else { "RETURN" };

    if projection.star && scope.keys().all(|k| is_anonymous(k)) {
        let pos = projection
            .items
            .first()
            .map(|i| expression_position(&i.expression))
            .unwrap_or_default();
        return Err(semantic(pos, format!("{} * is not allowed when there are no variables in scope", clause)));
    }

    let mut projected = Scope::new();
    if projection.star {
        for name in star_columns(scope.keys().cloned()) {
            let kind = scope.get(&name).copied().unwrap_or(VarKind::Value);
            projected.insert(name, kind);
        }
    }

    for item in &projection.items {
        check_expression(&item.expression, scope, AggregatePolicy::Allowed)?;
        let is_variable = matches!(item.expression, Expression::Variable(_));
        if is_with && item.alias.is_none() && !is_variable {
            return Err(semantic(
                expression_position(&item.expression),
                "Expression in WITH must be aliased (use AS)",
            ));
        }
        let name = item.name().to_string();
        if projected.contains_key(&name) {
            let pos = item
                .alias
                .as_ref()
                .map(|a| a.pos)
                .unwrap_or_else(|| expression_position(&item.expression));
            return Err(semantic(pos, format!("Multiple result columns with the same name `{}`", name)));
        }
        let kind = match &item.expression {
            Expression::Variable(var) => scope.get(&var.name).copied().unwrap_or(VarKind::Value),
            _ => VarKind::Value,
        };
        projected.insert(name, kind);
    }

    for bound in [&projection.skip, &projection.limit].into_iter().flatten() {
        check_constant(bound)?;
    }

    let aggregating = projection.items.iter().any(|i| i.expression.contains_aggregate());
    for sort in &projection.order_by {
        let matches_item = projection.items.iter().any(|i| i.text == sort.text);
        if matches_item {
            continue;
        }
        if projection.distinct || aggregating {
            check_expression(&sort.expression, &projected, AggregatePolicy::Forbidden("ORDER BY"))
                .map_err(|_| {
                    semantic(
                        expression_position(&sort.expression),
                        "ORDER BY after DISTINCT or aggregation can only use projected columns",
                    )
                })?;
        } else {
            let mut visible = scope.clone();
            visible.extend(projected.iter().map(|(k, v)| (k.clone(), *v)));
            check_expression(&sort.expression, &visible, AggregatePolicy::Forbidden("ORDER BY"))?;
        }
    }

    Ok(projected)
}

/// SKIP and LIMIT must not depend on the row
fn check_constant(expr: &Expression) -> CompileResult<()> {
    let mut error = None;
    expr.visit(&mut |e| {
        if error.is_some() {
            return;
        }
        match e {
            Expression::Variable(var) => {
                error = Some(semantic(var.pos, "SKIP and LIMIT cannot reference variables"));
            }
            e if e.is_aggregate() => {
                error = Some(semantic(
                    expression_position(e),
                    "SKIP and LIMIT cannot use aggregate functions",
                ));
            }
            _ => {}
        }
    });
    error.map_or(Ok(()), Err)
}

fn check_expression(expr: &Expression, scope: &Scope, policy: AggregatePolicy) -> CompileResult<()> {
    match expr {
        Expression::Variable(var) => {
            require_bound(var, scope)?;
            return Ok(());
        }
        Expression::CountStar { pos } => {
            return match policy {
                AggregatePolicy::Allowed => Ok(()),
                AggregatePolicy::Forbidden(place) => Err(semantic(
                    *pos,
                    format!("Aggregate function count(*) is not allowed in {}", place),
                )),
                AggregatePolicy::Nested => Err(semantic(*pos, "Nested aggregate functions are not allowed")),
            };
        }
        Expression::FunctionCall { name, args, pos, .. } if is_aggregate_name(name) => {
            match policy {
                AggregatePolicy::Allowed => {}
                AggregatePolicy::Forbidden(place) => {
                    return Err(semantic(
                        *pos,
                        format!("Aggregate function {} is not allowed in {}", name, place),
                    ))
                }
                AggregatePolicy::Nested => {
                    return Err(semantic(*pos, "Nested aggregate functions are not allowed"));
                }
            }
            if args.len() != 1 {
                return Err(semantic(
                    *pos,
                    format!("Aggregate function {} takes exactly one argument", name),
                ));
            }
            for arg in args {
                check_expression(arg, scope, AggregatePolicy::Nested)?;
            }
            return Ok(());
        }
        _ => {}
    }

    for child in expr.children() {
        check_expression(child, scope, policy)?;
    }
    Ok(())
}

fn expression_position(expr: &Expression) -> Position {
    match expr {
        Expression::Variable(var) => var.pos,
        Expression::FunctionCall { pos, .. } | Expression::CountStar { pos } => *pos,
        other => other
            .children()
            .into_iter()
            .map(expression_position)
            .find(|p| *p != Position::default())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::CompileErrorKind;
    use crate::query::parser::parse_query;

    fn check(input: &str) -> CompileResult<()> {
        validate(&parse_query(input)?)
    }

    fn kind(input: &str) -> CompileErrorKind {
        check(input).unwrap_err().kind
    }

    #[test]
    fn test_valid_queries() {
        for query in [
            "MATCH (n:Person) RETURN n",
            "MATCH (a)-[r:KNOWS]->(b) WHERE a.age > 30 RETURN a.name, count(b) AS friends",
            "MATCH (n) WITH n.name AS name WHERE name STARTS WITH 'A' RETURN name",
            "UNWIND [1, 2, 3] AS x RETURN x",
            "CREATE (a:Person {name: 'Ann'})-[:KNOWS]->(b:Person) RETURN a, b",
            "MATCH (n) SET n.x = 1",
            "MATCH (n) DETACH DELETE n",
            "MATCH (n) RETURN * ORDER BY n.name",
            "MATCH (n) RETURN n.name AS name ORDER BY n.age",
            "MATCH (n) RETURN DISTINCT n.name ORDER BY n.name",
            "RETURN 1 AS x UNION RETURN 2 AS x",
            "MATCH (n) RETURN count(*)",
        ] {
            assert!(check(query).is_ok(), "{} should be valid: {:?}", query, check(query));
        }
    }

    #[test]
    fn test_unbound_variable() {
        let err = check("MATCH (n) RETURN m").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Scope);
        assert_eq!((err.line, err.column), (1, 18));

        assert_eq!(kind("MATCH (n) WHERE x.age > 1 RETURN n"), CompileErrorKind::Scope);
        assert_eq!(kind("MATCH (n) WITH n.name AS name RETURN n"), CompileErrorKind::Scope);
        assert_eq!(kind("MATCH (n) SET m.x = 1"), CompileErrorKind::Scope);
    }

    #[test]
    fn test_return_must_be_last() {
        assert_eq!(kind("RETURN 1 AS x MATCH (n) RETURN n"), CompileErrorKind::Semantic);
        assert_eq!(kind("MATCH (n)"), CompileErrorKind::Semantic);
    }

    #[test]
    fn test_aggregate_placement() {
        assert_eq!(kind("MATCH (n) WHERE count(n) > 1 RETURN n"), CompileErrorKind::Semantic);
        assert_eq!(kind("MATCH (n) RETURN sum(count(n))"), CompileErrorKind::Semantic);
        assert_eq!(kind("MATCH (n) RETURN n SKIP count(*)"), CompileErrorKind::Semantic);
    }

    #[test]
    fn test_with_requires_alias() {
        assert_eq!(kind("MATCH (n) WITH n.name RETURN 1 AS one"), CompileErrorKind::Semantic);
    }

    #[test]
    fn test_duplicate_columns() {
        assert_eq!(kind("MATCH (n) RETURN n.a AS x, n.b AS x"), CompileErrorKind::Semantic);
    }

    #[test]
    fn test_create_relationship_rules() {
        assert_eq!(kind("CREATE (a)-[:R]-(b)"), CompileErrorKind::Semantic);
        assert_eq!(kind("CREATE (a)-[:R|S]->(b)"), CompileErrorKind::Semantic);
        assert_eq!(kind("CREATE (a)-->(b)"), CompileErrorKind::Semantic);
        assert_eq!(kind("CREATE (a)-[:R*2]->(b)"), CompileErrorKind::Semantic);
    }

    #[test]
    fn test_skip_limit_constants() {
        assert_eq!(kind("MATCH (n) RETURN n LIMIT n.x"), CompileErrorKind::Semantic);
        assert!(check("MATCH (n) RETURN n SKIP $s LIMIT 1 + 1").is_ok());
    }

    #[test]
    fn test_union_rules() {
        assert_eq!(
            kind("RETURN 1 AS x UNION RETURN 2 AS x UNION ALL RETURN 3 AS x"),
            CompileErrorKind::Semantic
        );
        assert_eq!(kind("RETURN 1 AS x UNION RETURN 2 AS y"), CompileErrorKind::Semantic);
    }

    #[test]
    fn test_order_by_after_aggregation() {
        assert!(check("MATCH (n) RETURN n.city AS city, count(*) AS c ORDER BY c DESC").is_ok());
        assert!(check("MATCH (n) RETURN n.city, count(*) ORDER BY count(*)").is_ok());
        assert_eq!(
            kind("MATCH (n) RETURN n.city AS city, count(*) AS c ORDER BY n.age"),
            CompileErrorKind::Semantic
        );
    }
}
