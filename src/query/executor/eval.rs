//! Expression evaluation
//!
//! NULL semantics are three-valued throughout: comparisons and arithmetic
//! involving NULL yield NULL, and so do comparisons between values of
//! unrelated types. Only `AND`, `OR`, `IS NULL` and `CASE` can turn a NULL
//! operand into a definite answer.

use super::{ExecContext, ExecutionError, ExecutionResult, Record, Value};
use crate::query::ir::{BinaryOp, Expr, UnaryOp};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Evaluate `expr` against one row
pub fn evaluate(expr: &Expr, record: &Record, ctx: &ExecContext<'_>) -> ExecutionResult<Value> {
    match expr {
        Expr::Constant(value) => Ok(value.clone()),
        Expr::Parameter(name) => ctx
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutionError::InvalidArgument(format!("Missing parameter ${}", name))),
        Expr::Variable(name) => Ok(record.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Property { base, key } => {
            let base = evaluate(base, record, ctx)?;
            property(&base, key, ctx)
        }
        Expr::Index { base, index } => {
            let base = evaluate(base, record, ctx)?;
            let index = evaluate(index, record, ctx)?;
            Ok(index_value(&base, &index))
        }
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| evaluate(item, record, ctx))
                .collect::<ExecutionResult<_>>()?,
        )),
        Expr::Map(entries) => {
            let mut map = BTreeMap::new();
            for (key, value) in entries {
                map.insert(key.clone(), evaluate(value, record, ctx)?);
            }
            Ok(Value::Map(map))
        }
        Expr::Binary { op, left, right } => binary(*op, left, right, record, ctx),
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, record, ctx)?;
            match op {
                UnaryOp::Not => Ok(match logic_operand(&value) {
                    Some(b) => Value::Boolean(!b),
                    None => Value::Null,
                }),
                UnaryOp::Neg => match value {
                    Value::Integer(i) => i.checked_neg().map(Value::Integer).ok_or_else(overflow),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    _ => Ok(Value::Null),
                },
            }
        }
        Expr::IsNull { operand, negated } => {
            let value = evaluate(operand, record, ctx)?;
            Ok(Value::Boolean(value.is_null() != *negated))
        }
        Expr::Case {
            operand,
            alternatives,
            default,
        } => {
            let subject = operand.as_ref().map(|o| evaluate(o, record, ctx)).transpose()?;
            for (when, then) in alternatives {
                let candidate = evaluate(when, record, ctx)?;
                let hit = match &subject {
                    Some(subject) => values_equal(subject, &candidate) == Some(true),
                    None => is_true(&candidate),
                };
                if hit {
                    return evaluate(then, record, ctx);
                }
            }
            match default {
                Some(default) => evaluate(default, record, ctx),
                None => Ok(Value::Null),
            }
        }
        Expr::Call { function, args, .. } => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, record, ctx))
                .collect::<ExecutionResult<Vec<_>>>()?;
            ctx.functions.call(*function, ctx.graph.read(), &args)
        }
        Expr::UnknownCall { name, args } => Err(ExecutionError::UnknownFunction {
            name: name.clone(),
            arity: args.len(),
        }),
        Expr::HasLabels { operand, labels } => match evaluate(operand, record, ctx)? {
            Value::Entity(id) => Ok(Value::Boolean(match ctx.graph.read().entity(id)? {
                Some(entity) => labels.iter().all(|l| entity.has_label(l)),
                None => false,
            })),
            _ => Ok(Value::Null),
        },
    }
}

/// A predicate passes only when it is exactly `true`
pub fn is_true(value: &Value) -> bool {
    matches!(value, Value::Boolean(true))
}

fn overflow() -> ExecutionError {
    ExecutionError::InvalidArgument("Integer overflow".to_string())
}

fn property(base: &Value, key: &str, ctx: &ExecContext<'_>) -> ExecutionResult<Value> {
    let graph = ctx.graph.read();
    Ok(match base {
        Value::Entity(id) => graph
            .entity(*id)?
            .and_then(|e| e.get_property(key).map(Value::from))
            .unwrap_or(Value::Null),
        Value::Relationship(id) => graph
            .relationship(*id)?
            .and_then(|r| r.properties.get(key).map(Value::from))
            .unwrap_or(Value::Null),
        Value::Map(map) => map.get(key).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    })
}

fn index_value(base: &Value, index: &Value) -> Value {
    match (base, index) {
        (Value::List(items), Value::Integer(i)) => {
            let len = items.len() as i64;
            let position = if *i < 0 { len + i } else { *i };
            if (0..len).contains(&position) {
                items[position as usize].clone()
            } else {
                Value::Null
            }
        }
        (Value::Map(map), Value::String(key)) => map.get(key).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Three-valued truth of a logical operand; anything but a boolean is unknown
fn logic_operand(value: &Value) -> Option<bool> {
    match value {
        Value::Boolean(b) => Some(*b),
        _ => None,
    }
}

fn tri(value: Option<bool>) -> Value {
    value.map(Value::Boolean).unwrap_or(Value::Null)
}

fn binary(op: BinaryOp, left: &Expr, right: &Expr, record: &Record, ctx: &ExecContext<'_>) -> ExecutionResult<Value> {
    match op {
        BinaryOp::And => {
            let l = logic_operand(&evaluate(left, record, ctx)?);
            if l == Some(false) {
                return Ok(Value::Boolean(false));
            }
            let r = logic_operand(&evaluate(right, record, ctx)?);
            return Ok(match (l, r) {
                (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            });
        }
        BinaryOp::Or => {
            let l = logic_operand(&evaluate(left, record, ctx)?);
            if l == Some(true) {
                return Ok(Value::Boolean(true));
            }
            let r = logic_operand(&evaluate(right, record, ctx)?);
            return Ok(match (l, r) {
                (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            });
        }
        BinaryOp::Xor => {
            let l = logic_operand(&evaluate(left, record, ctx)?);
            let r = logic_operand(&evaluate(right, record, ctx)?);
            return Ok(tri(l.zip(r).map(|(a, b)| a != b)));
        }
        _ => {}
    }

    let l = evaluate(left, record, ctx)?;
    let r = evaluate(right, record, ctx)?;
    match op {
        BinaryOp::Eq => Ok(tri(values_equal(&l, &r))),
        BinaryOp::Ne => Ok(tri(values_equal(&l, &r).map(|eq| !eq))),
        BinaryOp::Lt => Ok(tri(compare_values(&l, &r).map(|o| o == Ordering::Less))),
        BinaryOp::Le => Ok(tri(compare_values(&l, &r).map(|o| o != Ordering::Greater))),
        BinaryOp::Gt => Ok(tri(compare_values(&l, &r).map(|o| o == Ordering::Greater))),
        BinaryOp::Ge => Ok(tri(compare_values(&l, &r).map(|o| o != Ordering::Less))),
        BinaryOp::RegexMatch => match (&l, &r) {
            (Value::String(text), Value::String(pattern)) => Ok(Value::Boolean(ctx.regex_matches(pattern, text)?)),
            _ => Ok(Value::Null),
        },
        BinaryOp::StartsWith | BinaryOp::EndsWith | BinaryOp::Contains => match (&l, &r) {
            (Value::String(a), Value::String(b)) => Ok(Value::Boolean(match op {
                BinaryOp::StartsWith => a.starts_with(b.as_str()),
                BinaryOp::EndsWith => a.ends_with(b.as_str()),
                _ => a.contains(b.as_str()),
            })),
            _ => Ok(Value::Null),
        },
        BinaryOp::In => Ok(list_contains(&l, &r)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => {
            arithmetic(op, l, r)
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => unreachable!("handled above"),
    }
}

fn list_contains(needle: &Value, haystack: &Value) -> Value {
    let Value::List(items) = haystack else {
        return Value::Null;
    };
    let mut unknown = false;
    for item in items {
        match values_equal(needle, item) {
            Some(true) => return Value::Boolean(true),
            Some(false) => {}
            None => unknown = true,
        }
    }
    if unknown {
        Value::Null
    } else {
        Value::Boolean(false)
    }
}

/// Query-level equality: `None` when either side is NULL or the types differ
pub fn values_equal(a: &Value, b: &Value) -> Option<bool> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Integer(x), Value::Integer(y)) => Some(x == y),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            Some(a.as_float() == b.as_float())
        }
        (Value::Boolean(x), Value::Boolean(y)) => Some(x == y),
        (Value::String(x), Value::String(y)) => Some(x == y),
        (Value::Entity(x), Value::Entity(y)) => Some(x == y),
        (Value::Relationship(x), Value::Relationship(y)) => Some(x == y),
        (Value::List(x), Value::List(y)) => {
            if x.len() != y.len() {
                return Some(false);
            }
            all_equal(x.iter().zip(y.iter()))
        }
        (Value::Map(x), Value::Map(y)) => {
            if x.len() != y.len() || x.keys().ne(y.keys()) {
                return Some(false);
            }
            all_equal(x.values().zip(y.values()))
        }
        _ => None,
    }
}

fn all_equal<'v>(pairs: impl Iterator<Item = (&'v Value, &'v Value)>) -> Option<bool> {
    let mut unknown = false;
    for (x, y) in pairs {
        match values_equal(x, y) {
            Some(false) => return Some(false),
            None => unknown = true,
            Some(true) => {}
        }
    }
    if unknown {
        None
    } else {
        Some(true)
    }
}

/// Ordering for `<` and friends; only numbers, strings and booleans compare
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            a.as_float()?.partial_cmp(&b.as_float()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> ExecutionResult<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }

    if op == BinaryOp::Add {
        match (l, r) {
            (Value::String(a), Value::String(b)) => return Ok(Value::String(a + &b)),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                return Ok(Value::List(a));
            }
            (Value::List(mut a), item) => {
                a.push(item);
                return Ok(Value::List(a));
            }
            (item, Value::List(b)) => {
                let mut out = Vec::with_capacity(b.len() + 1);
                out.push(item);
                out.extend(b);
                return Ok(Value::List(out));
            }
            (l, r) => return numeric(op, &l, &r),
        }
    }
    numeric(op, &l, &r)
}

fn numeric(op: BinaryOp, l: &Value, r: &Value) -> ExecutionResult<Value> {
    if let (Value::Integer(a), Value::Integer(b)) = (l, r) {
        let (a, b) = (*a, *b);
        return match op {
            BinaryOp::Add => a.checked_add(b).map(Value::Integer).ok_or_else(overflow),
            BinaryOp::Sub => a.checked_sub(b).map(Value::Integer).ok_or_else(overflow),
            BinaryOp::Mul => a.checked_mul(b).map(Value::Integer).ok_or_else(overflow),
            BinaryOp::Div if b == 0 => Err(ExecutionError::DivisionByZero),
            BinaryOp::Div => a.checked_div(b).map(Value::Integer).ok_or_else(overflow),
            BinaryOp::Mod if b == 0 => Err(ExecutionError::DivisionByZero),
            BinaryOp::Mod => a.checked_rem(b).map(Value::Integer).ok_or_else(overflow),
            _ => Ok(Value::Float((a as f64).powf(b as f64))),
        };
    }

    let (Some(a), Some(b)) = (l.as_float(), r.as_float()) else {
        return Ok(Value::Null);
    };
    Ok(Value::Float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => return Err(ExecutionError::DivisionByZero),
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => a.powf(b),
    }))
}
