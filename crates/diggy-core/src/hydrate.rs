//! # Hydration Codec
//!
//! Query results back into typed instances.
//!
//! The input is a mapping of result block name to a list of records, either
//! at the top level or under `data`. Every key of a record falls into one
//! of these groups:
//!
//! - `uid` and `_type`: identity and type.
//! - `pred|attr`: a facet of the edge that led to this record.
//! - a declared field of the record's type: converted by its kind.
//! - `~pred`: a reverse result. The listed records get `pred` pointed back
//!   at this record once it exists.
//! - anything else not starting with `_`: a computed value.
//!
//! Records of unknown type are skipped. Instances already in the graph are
//! refreshed in place, so hydrating the same identifier twice yields one
//! instance.

use crate::graph::Graph;
use crate::primitives::{
    COMPUTED_UID_SUFFIX, FACET_SEPARATOR, INTERNAL_PREFIX, MAX_HYDRATION_DEPTH, REVERSE_MARKER,
    TYPE_PREDICATE, UID_KEY,
};
use crate::registry::{FieldDef, FieldKind, NodeType, ScalarKind};
use crate::{Computed, DiggyError, Facets, Uid, Value};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;

/// One hydrated record: the instance, or the instance wrapped with the
/// facets of the edge it was reached through.
#[derive(Debug, Clone, PartialEq)]
pub enum Hydrated {
    Node(Uid),
    Faceted(Facets),
}

impl Hydrated {
    /// The hydrated instance.
    #[must_use]
    pub fn uid(&self) -> Option<&Uid> {
        match self {
            Self::Node(uid) => Some(uid),
            Self::Faceted(facets) => facets.target_uid(),
        }
    }

    #[must_use]
    pub fn facets(&self) -> Option<&Facets> {
        match self {
            Self::Node(_) => None,
            Self::Faceted(facets) => Some(facets),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Node(uid) => Value::Node(uid),
            Self::Faceted(facets) => Value::Facets(facets),
        }
    }
}

/// Hydrated records per result block.
pub type HydratedBlocks = BTreeMap<String, Vec<Hydrated>>;

impl Graph {
    /// Hydrate a parsed query result.
    pub fn hydrate(&mut self, data: &JsonValue) -> Result<HydratedBlocks, DiggyError> {
        let blocks = match data {
            JsonValue::Object(map) => match map.get("data") {
                Some(JsonValue::Object(inner)) => inner,
                _ => map,
            },
            other => {
                return Err(DiggyError::InvalidData(format!(
                    "expected an object of result blocks, found {}",
                    other
                )));
            }
        };

        let mut hydrator = Hydrator {
            graph: self,
            in_progress: Vec::new(),
        };
        let mut output = BTreeMap::new();
        for (block, records) in blocks {
            let records = records.as_array().ok_or_else(|| {
                DiggyError::InvalidData(format!("block '{}' is not a list of records", block))
            })?;
            let mut hydrated = Vec::with_capacity(records.len());
            for record in records {
                if let Some(h) = hydrator.record(record, None, 0)? {
                    hydrated.push(h);
                }
            }
            tracing::debug!(block = %block, records = hydrated.len(), "block hydrated");
            output.insert(block.clone(), hydrated);
        }
        Ok(output)
    }

    /// Hydrate a query result given as JSON text.
    pub fn hydrate_str(&mut self, text: &str) -> Result<HydratedBlocks, DiggyError> {
        let data: JsonValue = serde_json::from_str(text)
            .map_err(|e| DiggyError::SerializationError(e.to_string()))?;
        self.hydrate(&data)
    }
}

struct Hydrator<'g> {
    graph: &'g mut Graph,
    /// Identifiers whose records are being hydrated further up the stack.
    in_progress: Vec<Uid>,
}

impl Hydrator<'_> {
    fn record(
        &mut self,
        raw: &JsonValue,
        fallback: Option<&str>,
        depth: usize,
    ) -> Result<Option<Hydrated>, DiggyError> {
        if depth > MAX_HYDRATION_DEPTH {
            return Err(DiggyError::InvalidData(format!(
                "records nested deeper than {}",
                MAX_HYDRATION_DEPTH
            )));
        }
        let JsonValue::Object(raw) = raw else {
            return Err(DiggyError::InvalidData(format!(
                "expected a record, found {}",
                raw
            )));
        };

        let type_name = raw
            .get(TYPE_PREDICATE)
            .and_then(JsonValue::as_str)
            .or(fallback);
        let Some(node_type) = type_name.and_then(|name| self.graph.registry.lookup(name)) else {
            tracing::debug!(node_type = ?type_name, "record of unknown type skipped");
            return Ok(None);
        };
        let node_type = node_type.clone();

        let uid = match raw.get(UID_KEY) {
            Some(JsonValue::String(hex)) => Uid::parse_hex(hex)?,
            Some(JsonValue::Number(n)) => n
                .as_u64()
                .map(Uid::Persisted)
                .ok_or_else(|| DiggyError::InvalidData(format!("Invalid uid: {}", n)))?,
            Some(other) => return Err(DiggyError::InvalidData(format!("Invalid uid: {}", other))),
            None => return Err(DiggyError::InvalidData("Missing uid.".to_string())),
        };

        let mut facets = Vec::new();
        for (key, value) in raw {
            if let Some((_, attr)) = key.split_once(FACET_SEPARATOR) {
                facets.push((attr.to_string(), Value::from_json_scalar(value)?));
            }
        }
        let wrap = |uid: Uid| {
            if facets.is_empty() {
                Hydrated::Node(uid)
            } else {
                Hydrated::Faceted(
                    facets
                        .iter()
                        .fold(Facets::new(uid), |f, (k, v)| f.with(k.clone(), v.clone())),
                )
            }
        };

        if self.in_progress.contains(&uid) {
            return Ok(Some(wrap(uid)));
        }
        self.graph.ensure_node(&uid, node_type.name())?;
        self.in_progress.push(uid.clone());
        let filled = self.fill(&node_type, &uid, raw, depth);
        self.in_progress.pop();
        filled?;

        Ok(Some(wrap(uid)))
    }

    fn fill(
        &mut self,
        node_type: &NodeType,
        uid: &Uid,
        raw: &JsonMap<String, JsonValue>,
        depth: usize,
    ) -> Result<(), DiggyError> {
        let mut values = Vec::new();
        let mut computed = JsonMap::new();
        let mut deferred = Vec::new();

        for (key, value) in raw {
            if key == UID_KEY || key == TYPE_PREDICATE || key.contains(FACET_SEPARATOR) {
                continue;
            }
            if let Some(field) = node_type.field(key) {
                if let Some(value) = self.field_value(node_type.name(), field, value, depth)? {
                    values.push((key.clone(), value));
                }
            } else if let Some(predicate) = key.strip_prefix(REVERSE_MARKER) {
                let items: Vec<&JsonValue> = match value {
                    JsonValue::Array(items) => items.iter().collect(),
                    JsonValue::Object(_) => vec![value],
                    JsonValue::Null => Vec::new(),
                    other => {
                        return Err(DiggyError::InvalidData(format!(
                            "reverse result '{}' is not a record: {}",
                            key, other
                        )));
                    }
                };
                for item in items {
                    if let Some(hydrated) = self.record(item, None, depth.saturating_add(1))? {
                        deferred.push((predicate.to_string(), hydrated));
                    }
                }
            } else if !key.starts_with(INTERNAL_PREFIX) {
                let value = match value.as_str() {
                    Some(hex) if key.ends_with(COMPUTED_UID_SUFFIX) => Uid::parse_hex(hex)?
                        .as_u64()
                        .map_or(JsonValue::Null, JsonValue::from),
                    _ => value.clone(),
                };
                computed.insert(key.clone(), value);
            }
        }

        self.graph
            .upsert_persisted(uid, node_type.name(), values, Computed::new(computed))?;
        for (predicate, item) in deferred {
            self.link_reverse(uid, &predicate, item)?;
        }
        Ok(())
    }

    fn field_value(
        &mut self,
        type_name: &str,
        field: &FieldDef,
        raw: &JsonValue,
        depth: usize,
    ) -> Result<Option<Value>, DiggyError> {
        if raw.is_null() {
            return Ok(None);
        }

        if field.is_list() {
            let items: Vec<&JsonValue> = match raw {
                JsonValue::Array(items) => items.iter().collect(),
                single => vec![single],
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(value) = self.element(type_name, field, item, depth)? {
                    out.push(value);
                }
            }
            return Ok(Some(Value::List(out)));
        }

        match raw {
            JsonValue::Array(items) if items.len() > 1 => Err(DiggyError::UnexpectedMultiplicity {
                node_type: type_name.to_string(),
                predicate: field.name().to_string(),
                count: items.len(),
            }),
            JsonValue::Array(items) => match items.first() {
                Some(item) => self.element(type_name, field, item, depth),
                None => Ok(None),
            },
            single => self.element(type_name, field, single, depth),
        }
    }

    fn element(
        &mut self,
        type_name: &str,
        field: &FieldDef,
        raw: &JsonValue,
        depth: usize,
    ) -> Result<Option<Value>, DiggyError> {
        let mismatch = || DiggyError::ValueType {
            node_type: type_name.to_string(),
            predicate: field.name().to_string(),
            value: raw.to_string(),
            expected: field.kind().name().to_string(),
        };

        let value = match field.kind() {
            FieldKind::Node(_) | FieldKind::Scalar(ScalarKind::Uid) => {
                if !raw.is_object() {
                    return Err(mismatch());
                }
                let fallback = match field.kind() {
                    FieldKind::Node(target) => Some(target.as_str()),
                    _ => None,
                };
                return Ok(self
                    .record(raw, fallback, depth.saturating_add(1))?
                    .map(Hydrated::into_value));
            }
            FieldKind::Scalar(ScalarKind::String) => raw.as_str().map(Value::from),
            FieldKind::Scalar(ScalarKind::Int) => raw.as_i64().map(Value::Int),
            FieldKind::Scalar(ScalarKind::Float) => raw.as_f64().map(Value::Float),
            FieldKind::Scalar(ScalarKind::Bool) => raw.as_bool().map(Value::Bool),
            FieldKind::Scalar(ScalarKind::DateTime) => {
                raw.as_str().and_then(parse_datetime).map(Value::DateTime)
            }
            FieldKind::Scalar(ScalarKind::Geo) => Some(Value::Geo(raw.clone())),
            FieldKind::Other(_) => Some(Value::Json(raw.clone())),
        };
        value.map(Some).ok_or_else(mismatch)
    }

    /// Point `predicate` of the reverse-result record back at `owner`.
    fn link_reverse(&mut self, owner: &Uid, predicate: &str, item: Hydrated) -> Result<(), DiggyError> {
        let (target, mirror) = match item {
            Hydrated::Node(target) => (target, Value::Node(owner.clone())),
            Hydrated::Faceted(facets) => match facets.target_uid() {
                Some(target) => (target.clone(), Value::Facets(facets.retarget(owner.clone()))),
                None => return Ok(()),
            },
        };

        let node = self.graph.node(&target)?;
        let forward = self
            .graph
            .registry
            .lookup(node.node_type())
            .and_then(|t| t.field(predicate))
            .is_some_and(|f| f.kind().is_reference());
        if !forward {
            tracing::warn!(
                node_type = %node.node_type(),
                predicate,
                "reverse result has no forward field; skipped"
            );
            return Ok(());
        }
        self.graph.attach(&target, predicate, mirror)
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    })
}

// =============================================================================
// TESTS
// =============================================================================
