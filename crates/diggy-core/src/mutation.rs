//! # Mutation Codec
//!
//! Staging and the statement text sent to the store.
//!
//! Every statement has the shape
//! `<subject> <predicate> <object> [(k=v, ...)] .` where the subject is
//! `<0x..>` for persisted instances and `_:unsaved.<n>` for provisional
//! ones. Objects are rendered from the field's declared kind:
//!
//! | kind       | object                                   |
//! |------------|------------------------------------------|
//! | `string`   | `"text"` (quotes escaped, right-trimmed) |
//! | `bool`     | `"true"` / `"false"`                     |
//! | `int`      | `"42"^^<xs:int>`                         |
//! | `float`    | `"9.9"^^<xs:float>`                      |
//! | `dateTime` | `"2018-06-01T00:00:00Z"`                 |
//! | `geo`      | `"{geojson}"^^<geo:geojson>`             |
//! | reference  | `<0x12>` or `_:unsaved.0`                |
//!
//! A provisional reference is only valid when the target is staged in the
//! same cycle, otherwise the store would mint an empty node for it.

use crate::graph::{Graph, Staged};
use crate::primitives::{FLOAT_TAG, GEO_TAG, INT_TAG, TYPE_PREDICATE};
use crate::registry::{FieldKind, ScalarKind};
use crate::{DiggyError, Facets, Uid, Value};
use chrono::SecondsFormat;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;

// =============================================================================
// MUTATION SET
// =============================================================================

/// Statements of one save, split into set and delete halves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationSet {
    pub set: Vec<String>,
    pub delete: Vec<String>,
}

impl MutationSet {
    #[must_use]
    pub fn set_text(&self) -> String {
        self.set.join("\n")
    }

    #[must_use]
    pub fn delete_text(&self) -> String {
        self.delete.join("\n")
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.delete.is_empty()
    }
}

// =============================================================================
// STAGING
// =============================================================================

impl Graph {
    /// Snapshot every set field of an instance into the staged set.
    pub fn stage(&mut self, uid: &Uid) -> Result<(), DiggyError> {
        self.stage_snapshot(uid, None)
    }

    /// Snapshot only the named fields.
    pub fn stage_fields(&mut self, uid: &Uid, fields: &[&str]) -> Result<(), DiggyError> {
        self.stage_snapshot(uid, Some(fields))
    }

    /// Staged identifiers in first-stage order.
    pub fn staged(&self) -> impl Iterator<Item = &Uid> {
        self.staged.iter().map(|s| &s.uid)
    }

    #[must_use]
    pub fn is_staged(&self, uid: &Uid) -> bool {
        self.staged.iter().any(|s| &s.uid == uid)
    }

    fn stage_snapshot(&mut self, uid: &Uid, only: Option<&[&str]>) -> Result<(), DiggyError> {
        let node = self.node(uid)?;
        let node_type = self.registry.require(&node.node_type)?;

        if let Some(only) = only {
            if let Some(unknown) = only.iter().find(|f| node_type.field(f).is_none()) {
                return Err(DiggyError::UnknownAttribute {
                    node_type: node.node_type.clone(),
                    field: (*unknown).to_string(),
                });
            }
        }

        let values = node_type
            .fields()
            .iter()
            .filter(|f| only.is_none_or(|only| only.contains(&f.name())))
            .filter_map(|f| {
                node.fields
                    .get(f.name())
                    .map(|v| (f.name().to_string(), v.clone()))
            })
            .collect();
        let snapshot = Staged {
            uid: uid.clone(),
            node_type: node.node_type.clone(),
            values,
        };

        match self.staged.iter_mut().find(|s| &s.uid == uid) {
            Some(existing) => *existing = snapshot,
            None => self.staged.push(snapshot),
        }
        Ok(())
    }

    // =========================================================================
    // GENERATION
    // =========================================================================

    /// Render the staged set as statements, one per line.
    ///
    /// The staged set is emptied only when generation succeeds.
    pub fn generate_mutation(&mut self) -> Result<String, DiggyError> {
        let staged: BTreeSet<&Uid> = self.staged.iter().map(|s| &s.uid).collect();
        let mut lines = Vec::new();

        for entry in &self.staged {
            let subject = entry.uid.subject();
            lines.extend(type_lines(&subject, &entry.node_type));

            let node_type = self.registry.require(&entry.node_type)?;
            for (predicate, value) in &entry.values {
                let kind = node_type
                    .field(predicate)
                    .map(|f| f.kind().clone())
                    .ok_or_else(|| DiggyError::UnknownAttribute {
                        node_type: entry.node_type.clone(),
                        field: predicate.clone(),
                    })?;
                for element in value.items() {
                    let object = render_element(element, &kind, |target| {
                        check_staged(target, &staged, &entry.node_type, predicate)
                    })?;
                    lines.push(format!("{} <{}> {} .", subject, predicate, object));
                }
            }
        }

        tracing::debug!(
            nodes = self.staged.len(),
            statements = lines.len(),
            "mutation generated"
        );
        self.staged.clear();
        Ok(lines.join("\n"))
    }

    // =========================================================================
    // DELETION
    // =========================================================================

    /// Queue a deletion statement for the next save and return it.
    ///
    /// Without a predicate every edge goes (`<s> * * .`); with a predicate
    /// and no target every value of that predicate goes.
    pub fn delete(
        &mut self,
        uid: &Uid,
        target: Option<&Value>,
        predicate: Option<&str>,
    ) -> Result<String, DiggyError> {
        let node = self.node(uid)?;
        let node_type = self.registry.require(&node.node_type)?;

        let statement = match (predicate, target) {
            (None, None) => format!("{} * * .", uid.subject()),
            (None, Some(_)) => {
                return Err(DiggyError::InvalidData(
                    "a delete target needs a predicate".to_string(),
                ));
            }
            (Some(predicate), target) => {
                let kind = node_type
                    .field(predicate)
                    .map(|f| f.kind().clone())
                    .ok_or_else(|| DiggyError::UnknownAttribute {
                        node_type: node.node_type.clone(),
                        field: predicate.to_string(),
                    })?;
                let object = match target {
                    Some(target) => render_element(target, &kind, |_| Ok(()))?,
                    None => "*".to_string(),
                };
                format!("{} <{}> {} .", uid.subject(), predicate, object)
            }
        };

        if let Some(node) = self.nodes.get_mut(uid) {
            node.pending_delete.insert(statement.clone());
        }
        Ok(statement)
    }

    // =========================================================================
    // SINGLE-INSTANCE SAVE
    // =========================================================================

    /// Statements persisting the dirty fields of one instance.
    ///
    /// Nothing is cleared here; call [`Graph::mark_saved`] once the store
    /// has committed.
    pub fn save_mutation(&self, uid: &Uid) -> Result<MutationSet, DiggyError> {
        let node = self.node(uid)?;
        let node_type = self.registry.require(&node.node_type)?;
        let staged: BTreeSet<&Uid> = self.staged.iter().map(|s| &s.uid).collect();
        let subject = uid.subject();

        let mut set = Vec::new();
        let mut delete: Vec<String> = node.pending_delete.iter().cloned().collect();
        if node.fresh {
            set.extend(type_lines(&subject, &node.node_type));
        }

        for field in node_type.fields() {
            let predicate = field.name();
            if !node.dirty.contains(predicate) {
                continue;
            }
            let Some(value) = node.fields.get(predicate) else {
                delete.push(format!("{} <{}> * .", subject, predicate));
                continue;
            };

            if !node.fresh && !field.is_list() && field.kind().is_reference() {
                delete.push(format!("{} <{}> * .", subject, predicate));
            }
            for element in value.items() {
                let object = render_element(element, field.kind(), |target| {
                    check_staged(target, &staged, &node.node_type, predicate)
                })?;
                set.push(format!("{} <{}> {} .", subject, predicate, object));
            }
        }

        Ok(MutationSet { set, delete })
    }
}

// =============================================================================
// RENDERING
// =============================================================================

fn type_lines(subject: &str, node_type: &str) -> [String; 2] {
    [
        format!("{} <{}> \"true\" .", subject, node_type),
        format!("{} <{}> \"{}\" .", subject, TYPE_PREDICATE, node_type),
    ]
}

fn check_staged(
    target: &Uid,
    staged: &BTreeSet<&Uid>,
    node_type: &str,
    predicate: &str,
) -> Result<(), DiggyError> {
    if target.is_persisted() || staged.contains(target) {
        Ok(())
    } else {
        Err(DiggyError::NotStaged {
            node_type: node_type.to_string(),
            predicate: predicate.to_string(),
            target: target.clone(),
        })
    }
}

/// Object of one statement, facets included.
fn render_element(
    element: &Value,
    kind: &FieldKind,
    check: impl Fn(&Uid) -> Result<(), DiggyError>,
) -> Result<String, DiggyError> {
    match element {
        Value::Facets(facets) => Ok(format!(
            "{} {}",
            render_object(facets.target(), kind, &check)?,
            render_facets(facets)
        )),
        other => render_object(other, kind, &check),
    }
}

fn render_object(
    value: &Value,
    kind: &FieldKind,
    check: &impl Fn(&Uid) -> Result<(), DiggyError>,
) -> Result<String, DiggyError> {
    Ok(match (kind, value) {
        (_, Value::Node(uid)) => {
            check(uid)?;
            uid.subject()
        }
        (FieldKind::Scalar(ScalarKind::Float), Value::Int(n)) => float_literal(*n as f64),
        (_, Value::String(s)) => quote(s),
        (_, Value::Bool(b)) => format!("\"{}\"", b),
        (_, Value::Int(n)) => format!("\"{}\"{}", n, typed(INT_TAG)),
        (_, Value::Float(n)) => float_literal(*n),
        (_, Value::DateTime(dt)) => format!("\"{}\"", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        (_, Value::Geo(json)) => format!("{}{}", quote(&json.to_string()), typed(GEO_TAG)),
        (_, Value::Json(json)) => render_json(json),
        (_, Value::Facets(_) | Value::List(_)) => {
            return Err(DiggyError::InvalidData(format!(
                "cannot render nested value {}",
                value
            )));
        }
    })
}

fn render_json(json: &JsonValue) -> String {
    match json {
        JsonValue::String(s) => quote(s),
        JsonValue::Bool(b) => format!("\"{}\"", b),
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => format!("\"{}\"{}", n, typed(INT_TAG)),
        JsonValue::Number(n) => format!("\"{}\"{}", n, typed(FLOAT_TAG)),
        other => quote(&other.to_string()),
    }
}

fn typed(tag: &str) -> String {
    format!("^^{}", tag)
}

fn float_literal(n: f64) -> String {
    format!("\"{:?}\"{}", n, typed(FLOAT_TAG))
}

/// Quote a string literal.
pub(crate) fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len().saturating_add(2));
    out.push('"');
    for c in s.trim_end().chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// `(k=v, ...)` with raw values: quoted strings, bare numbers and bools.
fn render_facets(facets: &Facets) -> String {
    let attrs: Vec<String> = facets
        .attrs()
        .map(|(key, value)| format!("{}={}", key, raw_value(value)))
        .collect();
    format!("({})", attrs.join(", "))
}

fn raw_value(value: &Value) -> String {
    match value {
        Value::String(s) => quote(s),
        Value::Float(n) => format!("{:?}", n),
        Value::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        Value::Json(JsonValue::String(s)) => quote(s),
        other => other.to_string(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
