//! Property values stored on entities and relationships
//!
//! Property maps are ordered (`BTreeMap`) so that the serialized form of an
//! entity, and therefore its content hash, does not depend on insertion order.
//! `Null` is never stored: writing it through a [`PropertyPatch`] removes the key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A stored property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

/// Property map for storing entity and relationship properties
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// A partial property update: `Null` removes the key, anything else overwrites it
pub type PropertyPatch = BTreeMap<String, PropertyValue>;

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as a float; integers widen
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Null => "Null",
            PropertyValue::Boolean(_) => "Boolean",
            PropertyValue::Integer(_) => "Integer",
            PropertyValue::Float(_) => "Float",
            PropertyValue::String(_) => "String",
            PropertyValue::Array(_) => "Array",
            PropertyValue::Map(_) => "Map",
        }
    }
}

/// Write `items` separated by `, `
fn write_joined<T>(
    f: &mut fmt::Formatter<'_>,
    items: impl IntoIterator<Item = T>,
    mut write_item: impl FnMut(&mut fmt::Formatter<'_>, T) -> fmt::Result,
) -> fmt::Result {
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_item(f, item)?;
    }
    Ok(())
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => f.write_str("null"),
            PropertyValue::Boolean(b) => write!(f, "{}", b),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(x) => write!(f, "{}", x),
            PropertyValue::String(s) => write!(f, "\"{}\"", s),
            PropertyValue::Array(items) => {
                f.write_str("[")?;
                write_joined(f, items, |f, v| write!(f, "{}", v))?;
                f.write_str("]")
            }
            PropertyValue::Map(map) => {
                f.write_str("{")?;
                write_joined(f, map, |f, (k, v)| write!(f, "{}: {}", k, v))?;
                f.write_str("}")
            }
        }
    }
}

macro_rules! impl_from {
    ($($source:ty => |$v:ident| $body:expr),* $(,)?) => {
        $(impl From<$source> for PropertyValue {
            fn from($v: $source) -> Self {
                $body
            }
        })*
    };
}

impl_from! {
    bool => |b| PropertyValue::Boolean(b),
    i64 => |i| PropertyValue::Integer(i),
    i32 => |i| PropertyValue::Integer(i64::from(i)),
    f64 => |x| PropertyValue::Float(x),
    String => |s| PropertyValue::String(s),
    &str => |s| PropertyValue::String(s.to_string()),
    Vec<PropertyValue> => |items| PropertyValue::Array(items),
    PropertyMap => |map| PropertyValue::Map(map),
}

/// Apply a patch in place, returning true if anything changed
pub fn apply_patch(properties: &mut PropertyMap, patch: &PropertyPatch) -> bool {
    let mut changed = false;
    for (key, value) in patch {
        if value.is_null() {
            changed |= properties.remove(key).is_some();
        } else if properties.get(key) != Some(value) {
            properties.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_and_accessors() {
        let name: PropertyValue = "hello".into();
        assert_eq!(name.as_string(), Some("hello"));
        assert_eq!(name.as_integer(), None);
        assert_eq!(PropertyValue::from(42i32).as_integer(), Some(42));
        assert_eq!(PropertyValue::from(42i64).as_float(), Some(42.0));
        assert_eq!(PropertyValue::from(true).as_boolean(), Some(true));
        assert_eq!(PropertyValue::from(vec![PropertyValue::Null]).type_name(), "Array");
    }

    #[test]
    fn test_apply_patch() {
        let mut props = PropertyMap::new();
        props.insert("name".to_string(), "Alice".into());
        props.insert("age".to_string(), 30i64.into());

        let mut patch = PropertyPatch::new();
        patch.insert("age".to_string(), PropertyValue::Null);
        patch.insert("city".to_string(), "Paris".into());
        assert!(apply_patch(&mut props, &patch));

        assert!(!props.contains_key("age"));
        assert_eq!(props.get("city").and_then(PropertyValue::as_string), Some("Paris"));

        // Re-applying the same patch is a no-op
        assert!(!apply_patch(&mut props, &patch));
    }

    #[test]
    fn test_display_nested() {
        let mut map = PropertyMap::new();
        map.insert("b".to_string(), PropertyValue::Integer(2));
        map.insert("a".to_string(), PropertyValue::Array(vec![1i64.into(), "x".into()]));
        assert_eq!(PropertyValue::Map(map).to_string(), "{a: [1, \"x\"], b: 2}");
        assert_eq!(PropertyValue::Null.to_string(), "null");
    }
}
