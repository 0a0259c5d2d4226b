//! # Type Registry
//!
//! Declared node types in declaration order.
//!
//! A [`NodeType`] is built once through [`NodeTypeBuilder`]: field kinds are
//! resolved and directives normalized at that point, so every later consumer
//! (schema generator, codecs) reads a finished descriptor. Abstract types
//! serve only as bases for `extends` and are never registered.

use crate::directive::{self, Directive, DirectiveSpec, Reverse, Tokenizer};
use crate::primitives::{INTERNAL_PREFIX, UID_KEY};
use crate::DiggyError;
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// FIELD KINDS
// =============================================================================

/// Scalar kinds the store recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Bool,
    DateTime,
    Geo,
    Uid,
}

impl ScalarKind {
    /// Name used in schema text.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::DateTime => "dateTime",
            Self::Geo => "geo",
            Self::Uid => "uid",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "bool" => Some(Self::Bool),
            "dateTime" => Some(Self::DateTime),
            "geo" => Some(Self::Geo),
            "uid" => Some(Self::Uid),
            _ => None,
        }
    }
}

/// Kind of one field element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Scalar(ScalarKind),
    /// Reference to instances of the named node type.
    Node(String),
    /// A kind the store does not recognize. Reported, never emitted.
    Other(String),
}

impl FieldKind {
    #[must_use]
    pub fn scalar(&self) -> Option<ScalarKind> {
        match self {
            Self::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Whether elements are edges to other nodes.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Node(_) | Self::Scalar(ScalarKind::Uid))
    }

    /// Storage kind in schema text; `None` for unrecognized kinds.
    #[must_use]
    pub fn storage_kind(&self) -> Option<ScalarKind> {
        match self {
            Self::Scalar(kind) => Some(*kind),
            Self::Node(_) => Some(ScalarKind::Uid),
            Self::Other(_) => None,
        }
    }

    /// Name as declared.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Scalar(kind) => kind.name(),
            Self::Node(name) | Self::Other(name) => name,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// FIELD DECLARATIONS
// =============================================================================

/// A field as declared, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    kind: FieldKind,
    list: bool,
    directives: Vec<DirectiveSpec>,
}

impl Field {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            list: false,
            directives: Vec::new(),
        }
    }

    #[must_use]
    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self::new(name, FieldKind::Scalar(kind))
    }

    /// Reference to another node type.
    #[must_use]
    pub fn node(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Node(target.into()))
    }

    /// Holds a list of elements.
    #[must_use]
    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    #[must_use]
    pub fn directive(mut self, spec: impl Into<DirectiveSpec>) -> Self {
        self.directives.push(spec.into());
        self
    }

    /// Bare `index`; the tokenizer is inferred from the kind.
    #[must_use]
    pub fn index(self) -> Self {
        self.directive(DirectiveSpec::index())
    }

    #[must_use]
    pub fn index_with(self, tokenizers: impl IntoIterator<Item = Tokenizer>) -> Self {
        self.directive(DirectiveSpec::index_with(tokenizers))
    }

    #[must_use]
    pub fn reverse(self, reverse: Reverse) -> Self {
        self.directive(DirectiveSpec::Reverse(reverse))
    }

    #[must_use]
    pub fn count(self) -> Self {
        self.directive(DirectiveSpec::Count)
    }

    #[must_use]
    pub fn upsert(self) -> Self {
        self.directive(DirectiveSpec::Upsert)
    }

    #[must_use]
    pub fn lang(self) -> Self {
        self.directive(DirectiveSpec::Lang)
    }
}

/// A resolved field of a built [`NodeType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    name: String,
    kind: FieldKind,
    list: bool,
    specs: Vec<DirectiveSpec>,
    directives: Vec<Directive>,
}

impl FieldDef {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        self.list
    }

    /// Normalized directives in canonical order.
    #[must_use]
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    #[must_use]
    pub fn reverse(&self) -> Option<&Reverse> {
        self.directives.iter().find_map(Directive::as_reverse)
    }

    /// Kind as it appears in schema text, `[kind]` for lists.
    #[must_use]
    pub fn schema_kind(&self) -> Option<String> {
        self.kind.storage_kind().map(|kind| {
            if self.list {
                format!("[{}]", kind.name())
            } else {
                kind.name().to_string()
            }
        })
    }

    fn resolve(
        name: String,
        kind: FieldKind,
        list: bool,
        specs: Vec<DirectiveSpec>,
    ) -> Result<Self, DiggyError> {
        let directives = directive::normalize(&specs, &name, &kind)?;
        Ok(Self {
            name,
            kind,
            list,
            specs,
            directives,
        })
    }
}

// =============================================================================
// NODE TYPES
// =============================================================================

/// A declared node type. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeType {
    name: String,
    is_abstract: bool,
    fields: Vec<FieldDef>,
}

impl NodeType {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> NodeTypeBuilder {
        NodeTypeBuilder {
            name: name.into(),
            is_abstract: false,
            inherited: Vec::new(),
            declared: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Fields in declaration order, inherited fields first.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Builder for [`NodeType`].
#[derive(Debug, Clone)]
pub struct NodeTypeBuilder {
    name: String,
    is_abstract: bool,
    inherited: Vec<FieldDef>,
    declared: Vec<Field>,
}

impl NodeTypeBuilder {
    /// Inherit every field of `base`, directives included.
    #[must_use]
    pub fn extends(mut self, base: &NodeType) -> Self {
        for field in &base.fields {
            match self.inherited.iter_mut().find(|f| f.name == field.name) {
                Some(slot) => *slot = field.clone(),
                None => self.inherited.push(field.clone()),
            }
        }
        self
    }

    /// Mark as a base-only type that is never registered.
    #[must_use]
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.declared.push(field);
        self
    }

    /// Resolve kinds and normalize directives.
    ///
    /// A redeclared field takes the new kind; it keeps the inherited
    /// directives unless the redeclaration carries its own.
    pub fn build(self) -> Result<NodeType, DiggyError> {
        if self.name.is_empty() {
            return Err(DiggyError::InvalidDeclaration(
                "node type name is empty".to_string(),
            ));
        }

        let mut fields = self.inherited;
        for field in self.declared {
            if field.name.is_empty()
                || field.name == UID_KEY
                || field.name.starts_with(INTERNAL_PREFIX)
            {
                return Err(DiggyError::InvalidDeclaration(format!(
                    "{}: reserved field name '{}'",
                    self.name, field.name
                )));
            }

            let position = fields.iter().position(|f| f.name == field.name);
            let specs = match position {
                Some(i) if field.directives.is_empty() => fields[i].specs.clone(),
                _ => field.directives,
            };
            let resolved = FieldDef::resolve(field.name, field.kind, field.list, specs)?;
            match position {
                Some(i) => fields[i] = resolved,
                None => fields.push(resolved),
            }
        }

        Ok(NodeType {
            name: self.name,
            is_abstract: self.is_abstract,
            fields,
        })
    }
}

// =============================================================================
// REVERSE EDGES
// =============================================================================

/// A back-reference slot installed by a `reverse` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseEdge {
    /// Slot name on the target (`_borders`, or the explicit name).
    pub slot: String,
    /// Type declaring the forward field.
    pub source_type: String,
    pub source_field: String,
    /// Declared target type; `None` for plain `uid` fields.
    pub target_type: Option<String>,
    pub many: bool,
    pub with_facets: bool,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Catalog of registered node types.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: Vec<NodeType>,
    index: BTreeMap<String, usize>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a type in declaration order. Abstract types are skipped.
    pub fn register(&mut self, node_type: NodeType) -> Result<(), DiggyError> {
        if node_type.is_abstract {
            tracing::debug!(node_type = %node_type.name, "abstract type not registered");
            return Ok(());
        }
        if self.index.contains_key(&node_type.name) {
            return Err(DiggyError::InvalidDeclaration(format!(
                "node type '{}' is already registered",
                node_type.name
            )));
        }
        self.index.insert(node_type.name.clone(), self.types.len());
        self.types.push(node_type);
        Ok(())
    }

    /// Resolve a type by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&NodeType> {
        self.index.get(name).and_then(|&i| self.types.get(i))
    }

    /// Like [`lookup`](Self::lookup), failing with `UnknownType`.
    pub fn require(&self, name: &str) -> Result<&NodeType, DiggyError> {
        self.lookup(name)
            .ok_or_else(|| DiggyError::UnknownType(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Registered types in declaration order.
    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.types.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Every reverse registration, in declaration order.
    #[must_use]
    pub fn reverse_edges(&self) -> Vec<ReverseEdge> {
        self.types
            .iter()
            .flat_map(|t| {
                t.fields.iter().filter_map(move |f| {
                    f.reverse().map(|reverse| ReverseEdge {
                        slot: reverse.slot_name(&f.name),
                        source_type: t.name.clone(),
                        source_field: f.name.clone(),
                        target_type: match &f.kind {
                            FieldKind::Node(target) => Some(target.clone()),
                            _ => None,
                        },
                        many: reverse.many,
                        with_facets: reverse.with_facets,
                    })
                })
            })
            .collect()
    }

    /// Back-reference slots instances of `type_name` can carry.
    #[must_use]
    pub fn reverse_slots(&self, type_name: &str) -> Vec<ReverseEdge> {
        self.reverse_edges()
            .into_iter()
            .filter(|edge| edge.target_type.as_deref().is_none_or(|t| t == type_name))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> NodeType {
        NodeType::builder("Region")
            .field(Field::scalar("area", ScalarKind::Int).index())
            .field(Field::scalar("name", ScalarKind::String).index_with([Tokenizer::Exact]))
            .field(
                Field::node("borders", "Region")
                    .list()
                    .reverse(Reverse::new().many()),
            )
            .build()
            .expect("build Region")
    }

    #[test]
    fn build_normalizes_directives() {
        let t = region();
        let area = t.field("area").expect("area");
        assert_eq!(area.directives(), &[Directive::Index(vec![Tokenizer::Int])]);
        assert_eq!(t.field("borders").expect("borders").schema_kind().as_deref(), Some("[uid]"));
    }

    #[test]
    fn reserved_field_names_are_rejected() {
        for name in ["uid", "_type", ""] {
            let result = NodeType::builder("T")
                .field(Field::scalar(name, ScalarKind::String))
                .build();
            assert!(matches!(result, Err(DiggyError::InvalidDeclaration(_))), "{name}");
        }
    }

    #[test]
    fn subtype_inherits_and_overrides_directives() {
        let base = NodeType::builder("Named")
            .abstract_type()
            .field(Field::scalar("name", ScalarKind::String).index_with([Tokenizer::Exact]))
            .field(Field::scalar("code", ScalarKind::String).index_with([Tokenizer::Hash]))
            .build()
            .expect("base");

        let sub = NodeType::builder("City")
            .extends(&base)
            .field(Field::scalar("code", ScalarKind::String).index_with([Tokenizer::Term]))
            .field(Field::scalar("name", ScalarKind::String))
            .build()
            .expect("sub");

        let names: Vec<_> = sub.fields().iter().map(FieldDef::name).collect();
        assert_eq!(names, vec!["name", "code"]);
        assert_eq!(
            sub.field("name").expect("name").directives(),
            &[Directive::Index(vec![Tokenizer::Exact])]
        );
        assert_eq!(
            sub.field("code").expect("code").directives(),
            &[Directive::Index(vec![Tokenizer::Term])]
        );
    }

    #[test]
    fn abstract_types_are_not_registered() {
        let mut registry = TypeRegistry::new();
        let base = NodeType::builder("Base").abstract_type().build().expect("base");
        registry.register(base).expect("register");
        assert!(registry.is_empty());
        assert!(registry.lookup("Base").is_none());
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = TypeRegistry::new();
        registry.register(region()).expect("first");
        assert!(registry.register(region()).is_err());
        assert!(matches!(registry.require("Nope"), Err(DiggyError::UnknownType(_))));
    }

    #[test]
    fn reverse_edges_default_slot_name() {
        let mut registry = TypeRegistry::new();
        registry.register(region()).expect("register");
        let edges = registry.reverse_slots("Region");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].slot, "_borders");
        assert!(edges[0].many);
        assert!(registry.reverse_slots("City").is_empty());
    }
}
