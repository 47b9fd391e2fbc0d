//! Scalar function registry
//!
//! Functions are looked up by case-insensitive name and arity when a query is
//! lowered; the plan stores the resulting [`FunctionId`]. Ids are stable for
//! the life of a registry: registering an existing (name, arity) again
//! replaces the implementation in place.
//!
//! Unless noted, builtins return NULL when any argument is NULL and when an
//! argument has the wrong type. The conversion functions are the exception:
//! they raise `TypeMismatch` for lists, maps, entities and relationships.

use super::executor::{ExecutionError, ExecutionResult, Value};
use crate::graph::GraphRead;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Signature shared by every scalar function
pub type ScalarFunction = Arc<dyn Fn(&dyn GraphRead, &[Value]) -> ExecutionResult<Value> + Send + Sync>;

/// Stable handle to a registered function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// Any number of arguments, at least `min`
    Variadic { min: usize },
}

#[derive(Clone)]
struct FunctionEntry {
    name: String,
    arity: Arity,
    function: ScalarFunction,
}

/// Upper bound on the size of a list produced by `range`
const MAX_RANGE_LEN: i64 = 10_000_000;

#[derive(Clone)]
pub struct FunctionRegistry {
    entries: Vec<FunctionEntry>,
    exact: FxHashMap<(String, usize), FunctionId>,
    variadic: FxHashMap<String, FunctionId>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.entries.len())
            .finish()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionRegistry {
    /// A registry with no functions at all
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            exact: FxHashMap::default(),
            variadic: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, name: &str, arity: Arity, function: ScalarFunction) -> FunctionId {
        let key = name.to_ascii_lowercase();
        let existing = match arity {
            Arity::Exact(n) => self.exact.get(&(key.clone(), n)).copied(),
            Arity::Variadic { .. } => self.variadic.get(&key).copied(),
        };
        if let Some(id) = existing {
            self.entries[id.0 as usize] = FunctionEntry {
                name: name.to_string(),
                arity,
                function,
            };
            return id;
        }

        let id = FunctionId(self.entries.len() as u32);
        self.entries.push(FunctionEntry {
            name: name.to_string(),
            arity,
            function,
        });
        match arity {
            Arity::Exact(n) => {
                self.exact.insert((key, n), id);
            }
            Arity::Variadic { .. } => {
                self.variadic.insert(key, id);
            }
        }
        id
    }

    /// Register a function taking exactly `arity` arguments
    pub fn register<F>(&mut self, name: &str, arity: usize, function: F) -> FunctionId
    where
        F: Fn(&dyn GraphRead, &[Value]) -> ExecutionResult<Value> + Send + Sync + 'static,
    {
        self.insert(name, Arity::Exact(arity), Arc::new(function))
    }

    /// Register a function taking `min` or more arguments
    pub fn register_variadic<F>(&mut self, name: &str, min: usize, function: F) -> FunctionId
    where
        F: Fn(&dyn GraphRead, &[Value]) -> ExecutionResult<Value> + Send + Sync + 'static,
    {
        self.insert(name, Arity::Variadic { min }, Arc::new(function))
    }

    /// Exact-arity match first, then a variadic entry of the same name
    pub fn resolve(&self, name: &str, arity: usize) -> Option<FunctionId> {
        let key = name.to_ascii_lowercase();
        if let Some(id) = self.exact.get(&(key.clone(), arity)) {
            return Some(*id);
        }
        let id = self.variadic.get(&key)?;
        match self.entries[id.0 as usize].arity {
            Arity::Variadic { min } if arity >= min => Some(*id),
            _ => None,
        }
    }

    pub fn name(&self, id: FunctionId) -> Option<&str> {
        self.entries.get(id.0 as usize).map(|e| e.name.as_str())
    }

    pub fn call(&self, id: FunctionId, graph: &dyn GraphRead, args: &[Value]) -> ExecutionResult<Value> {
        let entry = self.entries.get(id.0 as usize).ok_or_else(|| ExecutionError::UnknownFunction {
            name: format!("#{}", id.0),
            arity: args.len(),
        })?;
        (entry.function)(graph, args)
    }

    /// Registry with every builtin scalar function
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        register_string_functions(&mut registry);
        register_math_functions(&mut registry);
        register_conversion_functions(&mut registry);
        register_list_functions(&mut registry);
        register_graph_functions(&mut registry);
        registry
    }
}

/// Wrap a function so it returns NULL when any argument is NULL
fn strict<F>(function: F) -> impl Fn(&dyn GraphRead, &[Value]) -> ExecutionResult<Value> + Send + Sync + 'static
where
    F: Fn(&dyn GraphRead, &[Value]) -> ExecutionResult<Value> + Send + Sync + 'static,
{
    move |graph, args| {
        if args.iter().any(Value::is_null) {
            Ok(Value::Null)
        } else {
            function(graph, args)
        }
    }
}

fn string_fn(f: fn(&str) -> String) -> impl Fn(&dyn GraphRead, &[Value]) -> ExecutionResult<Value> + Send + Sync {
    strict(move |_, args| {
        Ok(match &args[0] {
            Value::String(s) => Value::String(f(s)),
            _ => Value::Null,
        })
    })
}

fn non_negative(function: &str, value: &Value) -> ExecutionResult<Option<usize>> {
    match value {
        Value::Integer(i) if *i >= 0 => Ok(Some(*i as usize)),
        Value::Integer(i) => Err(ExecutionError::InvalidArgument(format!(
            "{} expects a non-negative integer, got {}",
            function, i
        ))),
        _ => Ok(None),
    }
}

fn register_string_functions(registry: &mut FunctionRegistry) {
    registry.register("toUpper", 1, string_fn(|s| s.to_uppercase()));
    registry.register("toLower", 1, string_fn(|s| s.to_lowercase()));
    registry.register("trim", 1, string_fn(|s| s.trim().to_string()));
    registry.register("ltrim", 1, string_fn(|s| s.trim_start().to_string()));
    registry.register("rtrim", 1, string_fn(|s| s.trim_end().to_string()));

    registry.register(
        "substring",
        2,
        strict(|_, args| {
            let (Value::String(s), Some(start)) = (&args[0], non_negative("substring", &args[1])?) else {
                return Ok(Value::Null);
            };
            Ok(Value::String(s.chars().skip(start).collect()))
        }),
    );
    registry.register(
        "substring",
        3,
        strict(|_, args| {
            let (Value::String(s), Some(start), Some(len)) = (
                &args[0],
                non_negative("substring", &args[1])?,
                non_negative("substring", &args[2])?,
            ) else {
                return Ok(Value::Null);
            };
            Ok(Value::String(s.chars().skip(start).take(len).collect()))
        }),
    );
    registry.register(
        "replace",
        3,
        strict(|_, args| {
            Ok(match (&args[0], &args[1], &args[2]) {
                (Value::String(s), Value::String(from), Value::String(to)) => Value::String(s.replace(from.as_str(), to)),
                _ => Value::Null,
            })
        }),
    );
    registry.register(
        "split",
        2,
        strict(|_, args| {
            Ok(match (&args[0], &args[1]) {
                (Value::String(s), Value::String(delimiter)) => Value::List(
                    s.split(delimiter.as_str())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                ),
                _ => Value::Null,
            })
        }),
    );
    registry.register(
        "left",
        2,
        strict(|_, args| {
            let (Value::String(s), Some(n)) = (&args[0], non_negative("left", &args[1])?) else {
                return Ok(Value::Null);
            };
            Ok(Value::String(s.chars().take(n).collect()))
        }),
    );
    registry.register(
        "right",
        2,
        strict(|_, args| {
            let (Value::String(s), Some(n)) = (&args[0], non_negative("right", &args[1])?) else {
                return Ok(Value::Null);
            };
            let count = s.chars().count();
            Ok(Value::String(s.chars().skip(count.saturating_sub(n)).collect()))
        }),
    );
    registry.register(
        "reverse",
        1,
        strict(|_, args| {
            Ok(match &args[0] {
                Value::String(s) => Value::String(s.chars().rev().collect()),
                Value::List(items) => Value::List(items.iter().rev().cloned().collect()),
                _ => Value::Null,
            })
        }),
    );

    let size = |_: &dyn GraphRead, args: &[Value]| -> ExecutionResult<Value> {
        Ok(match &args[0] {
            Value::String(s) => Value::Integer(s.chars().count() as i64),
            Value::List(items) => Value::Integer(items.len() as i64),
            Value::Map(map) => Value::Integer(map.len() as i64),
            _ => Value::Null,
        })
    };
    registry.register("size", 1, strict(size));
    registry.register("length", 1, strict(size));
}

fn float_fn(f: fn(f64) -> f64) -> impl Fn(&dyn GraphRead, &[Value]) -> ExecutionResult<Value> + Send + Sync {
    strict(move |_, args| Ok(args[0].as_float().map(|x| Value::Float(f(x))).unwrap_or(Value::Null)))
}

fn register_math_functions(registry: &mut FunctionRegistry) {
    registry.register(
        "abs",
        1,
        strict(|_, args| match &args[0] {
            Value::Integer(i) => i
                .checked_abs()
                .map(Value::Integer)
                .ok_or_else(|| ExecutionError::InvalidArgument("Integer overflow in abs".to_string())),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            _ => Ok(Value::Null),
        }),
    );
    registry.register("ceil", 1, float_fn(f64::ceil));
    registry.register("floor", 1, float_fn(f64::floor));
    registry.register("round", 1, float_fn(f64::round));
    registry.register("sqrt", 1, float_fn(f64::sqrt));
    registry.register(
        "sign",
        1,
        strict(|_, args| {
            Ok(match &args[0] {
                Value::Integer(i) => Value::Integer(i.signum()),
                Value::Float(f) if f.is_nan() => Value::Null,
                Value::Float(f) if *f == 0.0 => Value::Integer(0),
                Value::Float(f) => Value::Integer(if *f > 0.0 { 1 } else { -1 }),
                _ => Value::Null,
            })
        }),
    );
}

fn type_mismatch(function: &str, expected: &'static str, actual: &Value) -> ExecutionError {
    ExecutionError::TypeMismatch {
        function: function.to_string(),
        expected,
        actual: actual.type_name(),
    }
}

fn register_conversion_functions(registry: &mut FunctionRegistry) {
    registry.register(
        "toString",
        1,
        strict(|_, args| match &args[0] {
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Integer(i) => Ok(Value::String(i.to_string())),
            Value::Float(f) => Ok(Value::String(format!("{:?}", f))),
            Value::Boolean(b) => Ok(Value::String(b.to_string())),
            other => Err(type_mismatch("toString", "a string, number or boolean", other)),
        }),
    );
    registry.register(
        "toInteger",
        1,
        strict(|_, args| match &args[0] {
            Value::Integer(i) => Ok(Value::Integer(*i)),
            Value::Float(f) if f.is_finite() => Ok(Value::Integer(f.trunc() as i64)),
            Value::Float(_) => Ok(Value::Null),
            Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
            Value::String(s) => {
                let s = s.trim();
                Ok(match s.parse::<i64>() {
                    Ok(i) => Value::Integer(i),
                    Err(_) => s
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| Value::Integer(f.trunc() as i64))
                        .unwrap_or(Value::Null),
                })
            }
            other => Err(type_mismatch("toInteger", "a string, number or boolean", other)),
        }),
    );
    registry.register(
        "toFloat",
        1,
        strict(|_, args| match &args[0] {
            Value::Integer(i) => Ok(Value::Float(*i as f64)),
            Value::Float(f) => Ok(Value::Float(*f)),
            Value::String(s) => Ok(s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null)),
            Value::Boolean(_) => Ok(Value::Null),
            other => Err(type_mismatch("toFloat", "a string or number", other)),
        }),
    );
    registry.register(
        "toBoolean",
        1,
        strict(|_, args| match &args[0] {
            Value::Boolean(b) => Ok(Value::Boolean(*b)),
            Value::String(s) => Ok(match s.trim().to_ascii_lowercase().as_str() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                _ => Value::Null,
            }),
            Value::Integer(i) => Ok(Value::Boolean(*i != 0)),
            Value::Float(_) => Ok(Value::Null),
            other => Err(type_mismatch("toBoolean", "a string, integer or boolean", other)),
        }),
    );
}

fn range(start: i64, end: i64, step: i64) -> ExecutionResult<Value> {
    if step == 0 {
        return Err(ExecutionError::InvalidArgument("range step cannot be zero".to_string()));
    }
    let span = (end as i128 - start as i128) / step as i128;
    if span < 0 {
        return Ok(Value::List(Vec::new()));
    }
    if span >= MAX_RANGE_LEN as i128 {
        return Err(ExecutionError::InvalidArgument(format!(
            "range would produce more than {} elements",
            MAX_RANGE_LEN
        )));
    }
    let items = (0..=span as i64).map(|i| Value::Integer(start + i * step)).collect();
    Ok(Value::List(items))
}

fn register_list_functions(registry: &mut FunctionRegistry) {
    registry.register_variadic("coalesce", 1, |_, args| {
        Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))
    });
    registry.register(
        "head",
        1,
        strict(|_, args| Ok(args[0].as_list().and_then(|l| l.first()).cloned().unwrap_or(Value::Null))),
    );
    registry.register(
        "last",
        1,
        strict(|_, args| Ok(args[0].as_list().and_then(|l| l.last()).cloned().unwrap_or(Value::Null))),
    );
    registry.register(
        "tail",
        1,
        strict(|_, args| {
            Ok(match args[0].as_list() {
                Some(items) => Value::List(items.iter().skip(1).cloned().collect()),
                None => Value::Null,
            })
        }),
    );
    registry.register(
        "range",
        2,
        strict(|_, args| match (&args[0], &args[1]) {
            (Value::Integer(a), Value::Integer(b)) => range(*a, *b, 1),
            _ => Ok(Value::Null),
        }),
    );
    registry.register(
        "range",
        3,
        strict(|_, args| match (&args[0], &args[1], &args[2]) {
            (Value::Integer(a), Value::Integer(b), Value::Integer(step)) => range(*a, *b, *step),
            _ => Ok(Value::Null),
        }),
    );
}

fn register_graph_functions(registry: &mut FunctionRegistry) {
    registry.register(
        "keys",
        1,
        strict(|graph, args| {
            let keys = match &args[0] {
                Value::Entity(id) => graph.entity(*id)?.map(|e| e.properties.keys().cloned().collect::<Vec<_>>()),
                Value::Relationship(id) => graph
                    .relationship(*id)?
                    .map(|r| r.properties.keys().cloned().collect::<Vec<_>>()),
                Value::Map(map) => Some(map.keys().cloned().collect()),
                _ => None,
            };
            Ok(keys
                .map(|keys| Value::List(keys.into_iter().map(Value::String).collect()))
                .unwrap_or(Value::Null))
        }),
    );
    registry.register(
        "labels",
        1,
        strict(|graph, args| {
            let Value::Entity(id) = &args[0] else {
                return Ok(Value::Null);
            };
            Ok(graph
                .entity(*id)?
                .map(|e| Value::List(e.labels.iter().map(|l| Value::from(l.as_str())).collect()))
                .unwrap_or(Value::Null))
        }),
    );
    registry.register(
        "type",
        1,
        strict(|graph, args| {
            let Value::Relationship(id) = &args[0] else {
                return Ok(Value::Null);
            };
            Ok(graph
                .relationship(*id)?
                .map(|r| Value::from(r.rel_type.as_str()))
                .unwrap_or(Value::Null))
        }),
    );
    registry.register(
        "id",
        1,
        strict(|_, args| {
            Ok(match &args[0] {
                Value::Entity(id) => Value::Integer(id.as_u64() as i64),
                Value::Relationship(id) => Value::Integer(id.as_u64() as i64),
                _ => Value::Null,
            })
        }),
    );
    registry.register(
        "properties",
        1,
        strict(|graph, args| {
            let properties = match &args[0] {
                Value::Entity(id) => graph.entity(*id)?.map(|e| e.properties.clone()),
                Value::Relationship(id) => graph.relationship(*id)?.map(|r| r.properties.clone()),
                Value::Map(map) => return Ok(Value::Map(map.clone())),
                _ => None,
            };
            Ok(properties
                .map(|p| Value::Map(p.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect()))
                .unwrap_or(Value::Null))
        }),
    );
    registry.register(
        "startNode",
        1,
        strict(|graph, args| {
            let Value::Relationship(id) = &args[0] else {
                return Ok(Value::Null);
            };
            Ok(graph
                .relationship(*id)?
                .map(|r| Value::Entity(r.start))
                .unwrap_or(Value::Null))
        }),
    );
    registry.register(
        "endNode",
        1,
        strict(|graph, args| {
            let Value::Relationship(id) = &args[0] else {
                return Ok(Value::Null);
            };
            Ok(graph
                .relationship(*id)?
                .map(|r| Value::Entity(r.end))
                .unwrap_or(Value::Null))
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        Entity, EntityId, GraphResult, Label, PropertyValue, Relationship, RelationshipId,
    };
    use crate::graph::AdjacencyEntry;

    /// Graph with one entity (id 1, label Person, name "Ann") and one self-loop
    struct OneEntity;

    impl GraphRead for OneEntity {
        fn entity(&self, id: EntityId) -> GraphResult<Option<Arc<Entity>>> {
            if id.as_u64() != 1 {
                return Ok(None);
            }
            let mut entity = Entity::new(id, "Person");
            entity.set_property("name", "Ann");
            Ok(Some(Arc::new(entity)))
        }

        fn relationship(&self, id: RelationshipId) -> GraphResult<Option<Arc<Relationship>>> {
            if id.as_u64() != 9 {
                return Ok(None);
            }
            Ok(Some(Arc::new(Relationship::new(id, EntityId::new(1), EntityId::new(1), "LIKES"))))
        }

        fn entity_ids(&self) -> GraphResult<Vec<EntityId>> {
            Ok(vec![EntityId::new(1)])
        }

        fn entity_ids_with_label(&self, label: &Label) -> GraphResult<Vec<EntityId>> {
            Ok(if label.as_str() == "Person" { vec![EntityId::new(1)] } else { vec![] })
        }

        fn adjacency(&self, _id: EntityId) -> GraphResult<Vec<AdjacencyEntry>> {
            Ok(Vec::new())
        }
    }

    fn call(name: &str, args: Vec<Value>) -> ExecutionResult<Value> {
        let registry = FunctionRegistry::with_builtins();
        let id = registry
            .resolve(name, args.len())
            .unwrap_or_else(|| panic!("{}/{} not registered", name, args.len()));
        registry.call(id, &OneEntity, &args)
    }

    #[test]
    fn test_resolution_is_case_insensitive_and_arity_aware() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(registry.resolve("TOUPPER", 1), registry.resolve("toUpper", 1));
        assert!(registry.resolve("substring", 2).is_some());
        assert!(registry.resolve("substring", 3).is_some());
        assert_ne!(registry.resolve("substring", 2), registry.resolve("substring", 3));
        assert!(registry.resolve("substring", 4).is_none());
        assert!(registry.resolve("coalesce", 5).is_some());
        assert!(registry.resolve("coalesce", 0).is_none());
        assert!(registry.resolve("nope", 1).is_none());
    }

    #[test]
    fn test_ids_are_stable_across_reregistration() {
        let mut registry = FunctionRegistry::with_builtins();
        let before = registry.resolve("toUpper", 1).unwrap();
        let count = registry.len();
        let after = registry.register("toUpper", 1, |_, _| Ok(Value::from("custom")));
        assert_eq!(before, after);
        assert_eq!(registry.len(), count);
        assert_eq!(registry.call(after, &OneEntity, &[Value::from("x")]).unwrap(), Value::from("custom"));
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(call("toUpper", vec!["abc".into()]).unwrap(), Value::from("ABC"));
        assert_eq!(call("trim", vec!["  a  ".into()]).unwrap(), Value::from("a"));
        assert_eq!(call("substring", vec!["hello".into(), 1.into()]).unwrap(), Value::from("ello"));
        assert_eq!(
            call("substring", vec!["hello".into(), 1.into(), 3.into()]).unwrap(),
            Value::from("ell")
        );
        assert!(call("substring", vec!["hello".into(), (-1).into()]).is_err());
        assert_eq!(
            call("split", vec!["a,b".into(), ",".into()]).unwrap(),
            Value::List(vec!["a".into(), "b".into()])
        );
        assert_eq!(call("right", vec!["hello".into(), 2.into()]).unwrap(), Value::from("lo"));
        assert_eq!(call("reverse", vec!["abc".into()]).unwrap(), Value::from("cba"));
        assert_eq!(call("size", vec!["héllo".into()]).unwrap(), Value::Integer(5));
        assert_eq!(call("toUpper", vec![Value::Null]).unwrap(), Value::Null);
        assert_eq!(call("toUpper", vec![Value::Integer(1)]).unwrap(), Value::Null);
    }

    #[test]
    fn test_math_functions() {
        assert_eq!(call("abs", vec![(-3).into()]).unwrap(), Value::Integer(3));
        assert_eq!(call("ceil", vec![1.2.into()]).unwrap(), Value::Float(2.0));
        assert_eq!(call("round", vec![2.5.into()]).unwrap(), Value::Float(3.0));
        assert_eq!(call("sqrt", vec![16.into()]).unwrap(), Value::Float(4.0));
        assert_eq!(call("sign", vec![(-2.5).into()]).unwrap(), Value::Integer(-1));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("toInteger", vec!["42".into()]).unwrap(), Value::Integer(42));
        assert_eq!(call("toInteger", vec!["4.7".into()]).unwrap(), Value::Integer(4));
        assert_eq!(call("toInteger", vec!["x".into()]).unwrap(), Value::Null);
        assert_eq!(call("toFloat", vec![3.into()]).unwrap(), Value::Float(3.0));
        assert_eq!(call("toString", vec![1.5.into()]).unwrap(), Value::from("1.5"));
        assert_eq!(call("toString", vec![1.0.into()]).unwrap(), Value::from("1.0"));
        assert_eq!(call("toBoolean", vec!["TRUE".into()]).unwrap(), Value::Boolean(true));

        let err = call("toInteger", vec![Value::List(vec![])]).unwrap_err();
        assert!(matches!(err, ExecutionError::TypeMismatch { .. }));
        let err = call("toString", vec![Value::Entity(EntityId::new(1))]).unwrap_err();
        assert!(matches!(err, ExecutionError::TypeMismatch { .. }));
    }

    #[test]
    fn test_list_functions() {
        assert_eq!(
            call("coalesce", vec![Value::Null, 2.into(), 3.into()]).unwrap(),
            Value::Integer(2)
        );
        assert_eq!(call("coalesce", vec![Value::Null]).unwrap(), Value::Null);
        assert_eq!(
            call("range", vec![1.into(), 4.into()]).unwrap(),
            Value::List(vec![1.into(), 2.into(), 3.into(), 4.into()])
        );
        assert_eq!(
            call("range", vec![10.into(), 0.into(), (-5).into()]).unwrap(),
            Value::List(vec![10.into(), 5.into(), 0.into()])
        );
        assert_eq!(call("range", vec![5.into(), 1.into()]).unwrap(), Value::List(vec![]));
        assert!(call("range", vec![1.into(), 2.into(), 0.into()]).is_err());
        let list = Value::List(vec![1.into(), 2.into(), 3.into()]);
        assert_eq!(call("head", vec![list.clone()]).unwrap(), Value::Integer(1));
        assert_eq!(call("last", vec![list.clone()]).unwrap(), Value::Integer(3));
        assert_eq!(call("tail", vec![list]).unwrap(), Value::List(vec![2.into(), 3.into()]));
        assert_eq!(call("head", vec![Value::List(vec![])]).unwrap(), Value::Null);
    }

    #[test]
    fn test_graph_functions() {
        let entity = Value::Entity(EntityId::new(1));
        let rel = Value::Relationship(RelationshipId::new(9));
        assert_eq!(
            call("labels", vec![entity.clone()]).unwrap(),
            Value::List(vec!["Person".into()])
        );
        assert_eq!(call("keys", vec![entity.clone()]).unwrap(), Value::List(vec!["name".into()]));
        assert_eq!(call("id", vec![entity.clone()]).unwrap(), Value::Integer(1));
        assert_eq!(call("type", vec![rel.clone()]).unwrap(), Value::from("LIKES"));
        assert_eq!(call("startNode", vec![rel]).unwrap(), entity);

        let props = call("properties", vec![entity]).unwrap();
        let Value::Map(map) = props else {
            panic!("expected a map");
        };
        assert_eq!(map.get("name"), Some(&Value::from(&PropertyValue::from("Ann"))));

        assert_eq!(call("labels", vec![Value::Entity(EntityId::new(5))]).unwrap(), Value::Null);
    }
}
