//! # Schema Generator
//!
//! Derives the store schema from the registered types.
//!
//! Every field of every type lands in one global predicate table, so a field
//! name shared by several types must resolve to a single storage kind. The
//! output is sorted line by line and does not depend on registration order
//! as long as the declarations are consistent.

use crate::directive::{self, Directive};
use crate::graph::Graph;
use crate::primitives::TYPE_PREDICATE_SCHEMA;
use crate::registry::{FieldDef, ScalarKind, TypeRegistry};
use crate::DiggyError;
use std::collections::{BTreeMap, BTreeSet};

/// Generated schema text plus the fields that could not be expressed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    lines: Vec<String>,
    unknown: Vec<String>,
}

impl Schema {
    /// Schema lines, sorted.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Newline-joined schema, ready for `alter_schema`.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// `field: kind (Type)` for every field of an unrecognized kind.
    #[must_use]
    pub fn unknown(&self) -> &[String] {
        &self.unknown
    }
}

#[derive(Debug, Clone)]
struct Predicate {
    kind: ScalarKind,
    list: bool,
    directives: BTreeSet<Directive>,
}

impl Predicate {
    fn schema_kind(&self) -> String {
        if self.list {
            format!("[{}]", self.kind.name())
        } else {
            self.kind.name().to_string()
        }
    }
}

/// Build the schema for every registered type.
pub fn generate_schema(registry: &TypeRegistry) -> Result<Schema, DiggyError> {
    let mut type_lines = vec![TYPE_PREDICATE_SCHEMA.to_string()];
    let mut predicates: BTreeMap<String, Predicate> = BTreeMap::new();
    let mut unknown = BTreeSet::new();

    for node_type in registry.types() {
        type_lines.push(format!("{}: bool @index(bool) .", node_type.name()));

        for field in node_type.fields() {
            match field.kind().storage_kind() {
                Some(kind) => merge(&mut predicates, field, kind)?,
                None => {
                    unknown.insert(format!(
                        "{}: {} ({})",
                        field.name(),
                        field.kind(),
                        node_type.name()
                    ));
                }
            }
        }
    }

    type_lines.sort();
    let mut predicate_lines: Vec<String> = predicates
        .iter()
        .map(|(name, p)| {
            let directives: Vec<Directive> = p.directives.iter().cloned().collect();
            format!(
                "{}: {} {}.",
                name,
                p.schema_kind(),
                directive::render_clauses(&directives)
            )
        })
        .collect();
    predicate_lines.sort();

    type_lines.extend(predicate_lines);
    tracing::debug!(
        lines = type_lines.len(),
        unknown = unknown.len(),
        "schema generated"
    );
    Ok(Schema {
        lines: type_lines,
        unknown: unknown.into_iter().collect(),
    })
}

fn merge(
    predicates: &mut BTreeMap<String, Predicate>,
    field: &FieldDef,
    kind: ScalarKind,
) -> Result<(), DiggyError> {
    let incoming = Predicate {
        kind,
        list: field.is_list(),
        directives: field.directives().iter().cloned().collect(),
    };
    let Some(existing) = predicates.get_mut(field.name()) else {
        predicates.insert(field.name().to_string(), incoming);
        return Ok(());
    };

    if existing.kind == incoming.kind && existing.list == incoming.list {
        existing.directives.extend(incoming.directives);
        return Ok(());
    }

    if field.kind().is_reference() {
        if existing.kind == ScalarKind::Uid {
            existing.list |= incoming.list;
            existing.directives.extend(incoming.directives);
        } else {
            tracing::warn!(
                predicate = field.name(),
                previous = %existing.schema_kind(),
                "scalar predicate redeclared as a node reference"
            );
            *existing = incoming;
        }
        return Ok(());
    }

    if existing.directives != incoming.directives {
        tracing::warn!(
            predicate = field.name(),
            kept = %existing.schema_kind(),
            ignored = %incoming.schema_kind(),
            "predicate kinds differ; keeping the first declaration"
        );
        return Ok(());
    }

    Err(DiggyError::ConflictingType {
        predicate: field.name().to_string(),
        existing: existing.schema_kind(),
        incoming: incoming.schema_kind(),
    })
}

impl Graph {
    /// Schema for the graph's registered types.
    pub fn generate_schema(&self) -> Result<Schema, DiggyError> {
        generate_schema(&self.registry)
    }
}

// =============================================================================
// TESTS
// =============================================================================
