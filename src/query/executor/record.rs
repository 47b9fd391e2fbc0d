//! Values, records and results flowing through the executor
//!
//! Entities and relationships travel as id references; their properties are
//! read through the graph view only when an expression asks for them.

use super::{ExecutionError, ExecutionResult};
use crate::graph::{EntityId, PropertyValue, RelationshipId};
use indexmap::IndexMap;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A runtime value
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Entity(EntityId),
    Relationship(RelationshipId),
}

// Structural equality used for grouping, DISTINCT and UNION: NULL equals
// NULL and Integer(1) differs from Float(1.0). Query-level `=` lives in eval.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Entity(a), Value::Entity(b)) => a == b,
            (Value::Relationship(a), Value::Relationship(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Integer(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                3u8.hash(state);
                // 0.0 and -0.0 compare equal
                let normalized = if *f == 0.0 { 0.0f64 } else { *f };
                normalized.to_bits().hash(state);
            }
            Value::String(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::List(items) => {
                5u8.hash(state);
                items.hash(state);
            }
            Value::Map(map) => {
                6u8.hash(state);
                map.hash(state);
            }
            Value::Entity(id) => {
                7u8.hash(state);
                id.hash(state);
            }
            Value::Relationship(id) => {
                8u8.hash(state);
                id.hash(state);
            }
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as a float, for integers and floats alike
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            Value::Entity(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<RelationshipId> {
        match self {
            Value::Relationship(id) => Some(*id),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Entity(_) => "Entity",
            Value::Relationship(_) => "Relationship",
        }
    }

    /// Rank in the global sort order: Map < Entity < Relationship < List <
    /// String < Boolean < Number < Null
    fn order_rank(&self) -> u8 {
        match self {
            Value::Map(_) => 0,
            Value::Entity(_) => 1,
            Value::Relationship(_) => 2,
            Value::List(_) => 3,
            Value::String(_) => 4,
            Value::Boolean(_) => 5,
            Value::Integer(_) | Value::Float(_) => 6,
            Value::Null => 7,
        }
    }

    /// Total order used by ORDER BY, MIN and MAX
    ///
    /// Values of different types order by type; numbers compare across
    /// integer and float.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (a @ (Value::Integer(_) | Value::Float(_)), b @ (Value::Integer(_) | Value::Float(_))) => {
                let (x, y) = (a.as_float().unwrap_or(f64::NAN), b.as_float().unwrap_or(f64::NAN));
                x.total_cmp(&y)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Entity(a), Value::Entity(b)) => a.cmp(b),
            (Value::Relationship(a), Value::Relationship(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.order_rank().cmp(&other.order_rank()),
        }
    }

    /// Convert to a storable property value
    pub fn to_property(&self) -> ExecutionResult<PropertyValue> {
        Ok(match self {
            Value::Null => PropertyValue::Null,
            Value::Boolean(b) => PropertyValue::Boolean(*b),
            Value::Integer(i) => PropertyValue::Integer(*i),
            Value::Float(f) => PropertyValue::Float(*f),
            Value::String(s) => PropertyValue::String(s.clone()),
            Value::List(items) => PropertyValue::Array(
                items
                    .iter()
                    .map(Value::to_property)
                    .collect::<ExecutionResult<Vec<_>>>()?,
            ),
            Value::Map(map) => PropertyValue::Map(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_property()?)))
                    .collect::<ExecutionResult<BTreeMap<_, _>>>()?,
            ),
            Value::Entity(_) | Value::Relationship(_) => {
                return Err(ExecutionError::InvalidArgument(format!(
                    "{} values cannot be stored as properties",
                    self.type_name()
                )))
            }
        })
    }

    /// Build a value from JSON: integral numbers become integers
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
            }
        }
    }

    /// JSON rendering; entities and relationships become `{"entity": id}` and
    /// `{"relationship": id}`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Entity(id) => serde_json::json!({ "entity": id.as_u64() }),
            Value::Relationship(id) => serde_json::json!({ "relationship": id.as_u64() }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Entity(id) => write!(f, "({})", id.as_u64()),
            Value::Relationship(id) => write!(f, "[{}]", id.as_u64()),
        }
    }
}

impl From<&PropertyValue> for Value {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::Null => Value::Null,
            PropertyValue::Boolean(b) => Value::Boolean(*b),
            PropertyValue::Integer(i) => Value::Integer(*i),
            PropertyValue::Float(f) => Value::Float(*f),
            PropertyValue::String(s) => Value::String(s.clone()),
            PropertyValue::Array(items) => Value::List(items.iter().map(Value::from).collect()),
            PropertyValue::Map(map) => Value::Map(map.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::Entity(id)
    }
}

impl From<RelationshipId> for Value {
    fn from(id: RelationshipId) -> Self {
        Value::Relationship(id)
    }
}

/// An ordered tuple of named values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    values: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a name, replacing any previous binding in place
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The values as a vector, in column order
    pub fn to_values(&self) -> Vec<Value> {
        self.values.values().cloned().collect()
    }

    /// Render as a JSON object with keys in column order
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }
}

/// Counters collected while a query runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    /// Candidate entities examined by scans
    pub rows_scanned: u64,
    pub rows_returned: u64,
    pub entities_created: u64,
    pub relationships_created: u64,
    pub entities_deleted: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
}

/// Output of a query
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
    pub stats: QueryStats,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one column, top to bottom
    pub fn column(&self, name: &str) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| row.get(name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// The only value of a one-row, one-column result
    pub fn single(&self) -> Option<&Value> {
        match (self.rows.as_slice(), self.columns.as_slice()) {
            ([row], [column]) => row.get(column),
            _ => None,
        }
    }

    /// Rows as a JSON array of objects
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.rows.iter().map(Record::to_json).collect())
    }
}

/// Named query parameters (`$name`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parameters from a JSON object
    pub fn from_json(json: &serde_json::Value) -> ExecutionResult<Self> {
        match json {
            serde_json::Value::Object(map) => Ok(Self {
                values: map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
            }),
            other => Err(ExecutionError::InvalidArgument(format!(
                "Parameters must be a JSON object, got {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;
    use serde_json::json;

    #[test]
    fn test_structural_equality_and_hash() {
        let mut set = FxHashSet::default();
        set.insert(Value::Null);
        set.insert(Value::Null);
        set.insert(Value::Integer(1));
        set.insert(Value::Float(1.0));
        set.insert(Value::Float(0.0));
        set.insert(Value::Float(-0.0));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_total_order_nulls_last() {
        let mut values = vec![
            Value::Null,
            Value::Integer(3),
            Value::String("a".into()),
            Value::Float(1.5),
            Value::Boolean(false),
            Value::List(vec![]),
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(
            values,
            vec![
                Value::List(vec![]),
                Value::String("a".into()),
                Value::Boolean(false),
                Value::Float(1.5),
                Value::Integer(3),
                Value::Null,
            ]
        );
    }

    #[test]
    fn test_property_conversion() {
        let value = Value::List(vec![Value::Integer(1), Value::String("x".into())]);
        let prop = value.to_property().unwrap();
        assert_eq!(Value::from(&prop), value);

        assert!(Value::Entity(EntityId::new(1)).to_property().is_err());
    }

    #[test]
    fn test_record_json_keeps_column_order() {
        let mut record = Record::new();
        record.insert("name", Value::from("Ann"));
        record.insert("age", Value::from(30));
        record.insert("person", Value::Entity(EntityId::new(7)));
        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["name", "age", "person"]);
        assert_eq!(
            record.to_json(),
            json!({"name": "Ann", "age": 30, "person": {"entity": 7}})
        );
    }

    #[test]
    fn test_params_from_json() {
        let params = Params::from_json(&json!({"limit": 3, "ratio": 0.5, "names": ["a"]})).unwrap();
        assert_eq!(params.get("limit"), Some(&Value::Integer(3)));
        assert_eq!(params.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(params.get("names"), Some(&Value::List(vec![Value::from("a")])));
        assert!(Params::from_json(&json!([1, 2])).is_err());
    }
}
