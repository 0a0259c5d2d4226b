//! # Declaration Files
//!
//! Node types declared in TOML instead of code.
//!
//! ```toml
//! [[types]]
//! name = "Region"
//! fields = [
//!     { name = "area", type = "int", directives = ["index"] },
//!     { name = "borders", type = "[Region]", directives = ["reverse(many)"] },
//! ]
//! ```
//!
//! A field type is a recognized scalar kind, the name of a declared type
//! (a node reference) or anything else (an unrecognized kind, reported by
//! the schema generator). `[...]` makes it a list. A type may `extends` an
//! earlier declared one.

use crate::directive::DirectiveSpec;
use crate::registry::{Field, FieldKind, NodeType, ScalarKind, TypeRegistry};
use crate::DiggyError;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Contents of a declaration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Declarations {
    #[serde(default)]
    pub types: Vec<TypeDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub directives: Vec<String>,
}

impl Declarations {
    pub fn from_toml(text: &str) -> Result<Self, DiggyError> {
        toml::from_str(text).map_err(|e| DiggyError::SerializationError(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, DiggyError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DiggyError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Build and register every declared type in file order.
    pub fn into_registry(self) -> Result<TypeRegistry, DiggyError> {
        let names: BTreeSet<String> = self.types.iter().map(|t| t.name.clone()).collect();
        let mut built: BTreeMap<String, NodeType> = BTreeMap::new();
        let mut registry = TypeRegistry::new();

        for decl in self.types {
            let mut builder = NodeType::builder(decl.name.clone());
            if decl.is_abstract {
                builder = builder.abstract_type();
            }
            if let Some(base) = &decl.extends {
                let base = built.get(base).ok_or_else(|| {
                    DiggyError::InvalidDeclaration(format!(
                        "{} extends '{}', which is not declared before it",
                        decl.name, base
                    ))
                })?;
                builder = builder.extends(base);
            }
            for field in decl.fields {
                builder = builder.field(field.resolve(&names)?);
            }

            let node_type = builder.build()?;
            if built.contains_key(node_type.name()) {
                return Err(DiggyError::InvalidDeclaration(format!(
                    "node type '{}' is declared twice",
                    node_type.name()
                )));
            }
            built.insert(node_type.name().to_string(), node_type.clone());
            registry.register(node_type)?;
        }

        tracing::debug!(types = registry.len(), "declarations loaded");
        Ok(registry)
    }
}

impl FieldDecl {
    fn resolve(self, declared: &BTreeSet<String>) -> Result<Field, DiggyError> {
        let raw = self.kind.trim();
        let (inner, list) = match raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            Some(inner) => (inner.trim(), true),
            None => (raw, false),
        };
        let kind = match ScalarKind::parse(inner) {
            Some(scalar) => FieldKind::Scalar(scalar),
            None if declared.contains(inner) => FieldKind::Node(inner.to_string()),
            None => FieldKind::Other(inner.to_string()),
        };

        let mut field = Field::new(self.name, kind);
        if list {
            field = field.list();
        }
        for directive in &self.directives {
            field = field.directive(directive.parse::<DirectiveSpec>()?);
        }
        Ok(field)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{Directive, Tokenizer};

    const REGIONS: &str = r#"
[[types]]
name = "Named"
abstract = true
fields = [{ name = "name", type = "string", directives = ["index(exact)"] }]

[[types]]
name = "Region"
extends = "Named"
fields = [
    { name = "area", type = "int", directives = ["index"] },
    { name = "borders", type = "[Region]", directives = ["reverse(many)", "count"] },
    { name = "meta", type = "Metadata" },
]
"#;

    #[test]
    fn loads_types_in_order() {
        let registry = Declarations::from_toml(REGIONS)
            .expect("parse")
            .into_registry()
            .expect("build");

        assert_eq!(registry.len(), 1);
        let region = registry.lookup("Region").expect("Region");
        let names: Vec<_> = region.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["name", "area", "borders", "meta"]);

        let borders = region.field("borders").expect("borders");
        assert!(borders.is_list());
        assert_eq!(borders.kind(), &FieldKind::Node("Region".into()));
        assert_eq!(
            region.field("name").expect("name").directives(),
            &[Directive::Index(vec![Tokenizer::Exact])]
        );
        assert_eq!(
            region.field("meta").expect("meta").kind(),
            &FieldKind::Other("Metadata".into())
        );
    }

    #[test]
    fn extends_must_name_an_earlier_type() {
        let text = r#"
[[types]]
name = "City"
extends = "Named"
"#;
        let result = Declarations::from_toml(text).expect("parse").into_registry();
        assert!(matches!(result, Err(DiggyError::InvalidDeclaration(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = r#"
[[types]]
name = "City"
colour = "red"
"#;
        assert!(matches!(
            Declarations::from_toml(text),
            Err(DiggyError::SerializationError(_))
        ));
    }

    #[test]
    fn bad_directive_is_reported() {
        let text = r#"
[[types]]
name = "City"
fields = [{ name = "name", type = "string", directives = ["index"] }]
"#;
        let result = Declarations::from_toml(text).expect("parse").into_registry();
        assert!(matches!(result, Err(DiggyError::InvalidDeclaration(_))));
    }
}
