//! # Core Type Definitions
//!
//! This module contains the value-level types shared by every other module:
//! - Node identifiers (`Uid`)
//! - Field values (`Value`), edge metadata (`Facets`) and query-computed
//!   extras (`Computed`)
//! - Error types (`DiggyError`)
//!
//! ## Determinism Guarantees
//!
//! - `Uid` implements `Ord` so instance maps can be `BTreeMap`s
//! - `Facets` and `Computed` keep their keys in insertion order, which is
//!   the order they are rendered in

use crate::primitives::PROVISIONAL_PREFIX;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::fmt;
use thiserror::Error;

// =============================================================================
// NODE IDENTIFIERS
// =============================================================================

/// Identifier of a node instance.
///
/// A persisted uid was assigned by the store. A provisional uid is a local
/// placeholder (`unsaved.<n>`) rendered as a blank node until the store
/// assigns a real one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Uid {
    /// Identifier assigned by the store.
    Persisted(u64),
    /// Locally generated placeholder.
    Provisional(String),
}

impl Uid {
    /// Build the provisional identifier for counter value `n`.
    #[must_use]
    pub fn provisional(n: u64) -> Self {
        Self::Provisional(format!("{}.{}", PROVISIONAL_PREFIX, n))
    }

    /// Parse a hex identifier as returned by the store (`0x1a`).
    pub fn parse_hex(raw: &str) -> Result<Self, DiggyError> {
        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .unwrap_or(raw);
        u64::from_str_radix(digits, 16)
            .map(Self::Persisted)
            .map_err(|_| DiggyError::InvalidData(format!("Invalid uid: {}", raw)))
    }

    /// Whether the store already knows this identifier.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted(_))
    }

    /// The numeric identifier, if persisted.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Persisted(n) => Some(*n),
            Self::Provisional(_) => None,
        }
    }

    /// The blank-node token, if provisional.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Persisted(_) => None,
            Self::Provisional(token) => Some(token),
        }
    }

    /// Render as a statement subject: `<0x11>` or `_:unsaved.0`.
    #[must_use]
    pub fn subject(&self) -> String {
        match self {
            Self::Persisted(n) => format!("<{:#x}>", n),
            Self::Provisional(token) => format!("_:{}", token),
        }
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted(n) => write!(f, "{:#x}", n),
            Self::Provisional(token) => f.write_str(token),
        }
    }
}

impl From<u64> for Uid {
    fn from(n: u64) -> Self {
        Self::Persisted(n)
    }
}

// =============================================================================
// FACETS
// =============================================================================

/// Attributes attached to one edge occurrence.
///
/// Wraps the edge target (usually a node reference) together with ordered,
/// named scalar attributes. Built once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Facets {
    target: Box<Value>,
    attrs: Vec<(String, Value)>,
}

impl Facets {
    /// Wrap an edge target with no attributes yet.
    #[must_use]
    pub fn new(target: impl Into<Value>) -> Self {
        Self {
            target: Box::new(target.into()),
            attrs: Vec::new(),
        }
    }

    /// Add an attribute. A repeated key replaces the earlier value in place.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
        self
    }

    /// The wrapped edge target.
    #[must_use]
    pub fn target(&self) -> &Value {
        &self.target
    }

    /// The wrapped node identifier, if the target is a node.
    #[must_use]
    pub fn target_uid(&self) -> Option<&Uid> {
        match self.target.as_ref() {
            Value::Node(uid) => Some(uid),
            _ => None,
        }
    }

    /// Look up one attribute.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Attributes in insertion order.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Whether no attribute is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Same attributes around a different target.
    #[must_use]
    pub fn retarget(&self, target: impl Into<Value>) -> Self {
        Self {
            target: Box::new(target.into()),
            attrs: self.attrs.clone(),
        }
    }
}

// =============================================================================
// COMPUTED
// =============================================================================

/// Non-schema values a query computed (counts, aggregates, aliases).
///
/// Attached to an instance after hydration. Keys ending in `_uid` hold the
/// numeric identifier parsed from the store's hex string.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Computed(JsonMap<String, JsonValue>);

impl Computed {
    /// Wrap collected key/value pairs.
    #[must_use]
    pub fn new(values: JsonMap<String, JsonValue>) -> Self {
        Self(values)
    }

    /// Look up one computed value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Computed values in result order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of computed values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was computed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The underlying JSON object.
    #[must_use]
    pub fn as_map(&self) -> &JsonMap<String, JsonValue> {
        &self.0
    }
}

// =============================================================================
// VALUE
// =============================================================================

/// A field value held by a node instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(DateTime<FixedOffset>),
    /// GeoJSON geometry, passed through untouched.
    Geo(JsonValue),
    /// Opaque JSON for fields whose kind the store does not recognize.
    Json(JsonValue),
    /// Reference to another node.
    Node(Uid),
    /// Edge target with per-edge attributes.
    Facets(Facets),
    List(Vec<Value>),
}

impl Value {
    /// The elements a field contributes: the list items, or the value itself.
    #[must_use]
    pub fn items(&self) -> &[Value] {
        match self {
            Self::List(items) => items,
            other => std::slice::from_ref(other),
        }
    }

    /// The referenced node, looking through a facet wrapper.
    #[must_use]
    pub fn node_uid(&self) -> Option<&Uid> {
        match self {
            Self::Node(uid) => Some(uid),
            Self::Facets(facets) => facets.target_uid(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_facets(&self) -> Option<&Facets> {
        match self {
            Self::Facets(facets) => Some(facets),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short description of the runtime shape, for error messages.
    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::DateTime(_) => "dateTime",
            Self::Geo(_) => "geo",
            Self::Json(_) => "json",
            Self::Node(_) => "node",
            Self::Facets(_) => "facets",
            Self::List(_) => "list",
        }
    }

    /// Convert a scalar JSON value. Objects, arrays and null are rejected.
    pub fn from_json_scalar(json: &JsonValue) -> Result<Self, DiggyError> {
        match json {
            JsonValue::String(s) => Ok(Self::String(s.clone())),
            JsonValue::Bool(b) => Ok(Self::Bool(*b)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Ok(Self::Int(i)),
                None => n
                    .as_f64()
                    .map(Self::Float)
                    .ok_or_else(|| DiggyError::InvalidData(format!("Unsupported number: {}", n))),
            },
            other => Err(DiggyError::InvalidData(format!(
                "Expected a scalar, found {}",
                other
            ))),
        }
    }

    /// Rewrite every node reference `f` maps to a new identifier.
    pub(crate) fn rename_uids(&mut self, f: &impl Fn(&Uid) -> Option<Uid>) {
        match self {
            Self::Node(uid) => {
                if let Some(renamed) = f(uid) {
                    *uid = renamed;
                }
            }
            Self::Facets(facets) => facets.target.rename_uids(f),
            Self::List(items) => items.iter_mut().for_each(|item| item.rename_uids(f)),
            _ => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{}", n),
            Self::Float(n) => write!(f, "{:?}", n),
            Self::Bool(b) => write!(f, "{}", b),
            Self::DateTime(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Geo(json) | Self::Json(json) => write!(f, "{}", json),
            Self::Node(uid) => write!(f, "{}", uid),
            Self::Facets(facets) => {
                write!(f, "Facets({}", facets.target)?;
                for (key, value) in facets.attrs() {
                    write!(f, ", {}={}", key, value)?;
                }
                f.write_str(")")
            }
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        Self::DateTime(dt)
    }
}

impl From<Uid> for Value {
    fn from(uid: Uid) -> Self {
        Self::Node(uid)
    }
}

impl From<&Uid> for Value {
    fn from(uid: &Uid) -> Self {
        Self::Node(uid.clone())
    }
}

impl From<Facets> for Value {
    fn from(facets: Facets) -> Self {
        Self::Facets(facets)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while declaring types, generating schema or
/// mutations, and hydrating query results.
///
/// - No silent failures
/// - None of these are retried internally
#[derive(Debug, Error)]
pub enum DiggyError {
    /// A predicate resolves to incompatible storage kinds across two types.
    #[error("You previously defined {predicate} as {existing}. You cannot now define it as {incoming}.")]
    ConflictingType {
        predicate: String,
        existing: String,
        incoming: String,
    },

    /// A mutation references a node that was not staged in this cycle.
    #[error("Node is not staged: <{node_type} {predicate}={target}>")]
    NotStaged {
        node_type: String,
        predicate: String,
        target: Uid,
    },

    /// Hydration input is malformed.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A declared field was read before it was assigned or fetched.
    #[error("<{node_type}> has no value for declared field '{field}'")]
    MissingAttribute { node_type: String, field: String },

    /// The name is not a field of the type at all.
    #[error("<{node_type}> has no attribute '{field}'")]
    UnknownAttribute { node_type: String, field: String },

    /// A runtime value does not fit the field's declared kind.
    #[error("Incorrect value type. Received <{node_type} {predicate}={value}>. Expecting <{node_type} {predicate}={expected}>")]
    ValueType {
        node_type: String,
        predicate: String,
        value: String,
        expected: String,
    },

    /// The store returned several values for a singular field.
    #[error("Unexpected multiplicity: <{node_type} {predicate}> is singular but {count} values were returned")]
    UnexpectedMultiplicity {
        node_type: String,
        predicate: String,
        count: usize,
    },

    /// No node type is declared under this name.
    #[error("Unknown node type: {0}")]
    UnknownType(String),

    /// No instance carries this identifier.
    #[error("Node not found: {0}")]
    NodeNotFound(Uid),

    /// An instance with this identifier already exists.
    #[error("Duplicate uid: {0}")]
    DuplicateUid(Uid),

    /// A type or field declaration is malformed.
    #[error("Invalid declaration: {0}")]
    InvalidDeclaration(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_subjects() {
        assert_eq!(Uid::Persisted(0x7b).subject(), "<0x7b>");
        assert_eq!(Uid::provisional(3).subject(), "_:unsaved.3");
    }

    #[test]
    fn uid_parse_hex_accepts_prefix() {
        assert_eq!(Uid::parse_hex("0x11").expect("parse"), Uid::Persisted(17));
        assert_eq!(Uid::parse_hex("1f").expect("parse"), Uid::Persisted(31));
        assert!(matches!(
            Uid::parse_hex("0xzz"),
            Err(DiggyError::InvalidData(_))
        ));
    }

    #[test]
    fn persisted_orders_before_provisional() {
        let mut uids = vec![Uid::provisional(0), Uid::Persisted(5)];
        uids.sort();
        assert_eq!(uids[0], Uid::Persisted(5));
    }

    #[test]
    fn facets_replace_repeated_key() {
        let facets = Facets::new(Uid::Persisted(1))
            .with("foo", "bar")
            .with("hello", "world")
            .with("foo", "baz");

        let keys: Vec<_> = facets.attrs().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["foo", "hello"]);
        assert_eq!(facets.get("foo"), Some(&Value::from("baz")));
        assert_eq!(facets.target_uid(), Some(&Uid::Persisted(1)));
    }

    #[test]
    fn items_of_scalar_is_itself() {
        let v = Value::from(5);
        assert_eq!(v.items(), &[Value::Int(5)]);

        let list = Value::from(vec![1, 2]);
        assert_eq!(list.items().len(), 2);
    }

    #[test]
    fn node_uid_looks_through_facets() {
        let v = Value::Facets(Facets::new(Uid::Persisted(2)).with("w", 1));
        assert_eq!(v.node_uid(), Some(&Uid::Persisted(2)));
        assert_eq!(Value::from("x").node_uid(), None);
    }

    #[test]
    fn rename_uids_reaches_nested_values() {
        let mut v = Value::List(vec![
            Value::Node(Uid::provisional(0)),
            Value::Facets(Facets::new(Uid::provisional(0)).with("a", true)),
        ]);
        v.rename_uids(&|uid| (uid == &Uid::provisional(0)).then_some(Uid::Persisted(9)));

        for item in v.items() {
            assert_eq!(item.node_uid(), Some(&Uid::Persisted(9)));
        }
    }

    #[test]
    fn from_json_scalar_rejects_objects() {
        assert_eq!(
            Value::from_json_scalar(&serde_json::json!(3)).expect("int"),
            Value::Int(3)
        );
        assert!(Value::from_json_scalar(&serde_json::json!({"a": 1})).is_err());
    }

    #[test]
    fn conflicting_type_message_names_both_kinds() {
        let err = DiggyError::ConflictingType {
            predicate: "name".into(),
            existing: "string".into(),
            incoming: "int".into(),
        };
        assert_eq!(
            err.to_string(),
            "You previously defined name as string. You cannot now define it as int."
        );
    }
}
