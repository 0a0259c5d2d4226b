//! # Directive Model
//!
//! Field-level annotations and their schema rendering.
//!
//! A declaration carries [`DirectiveSpec`]s as written by the caller. When the
//! owning type is built they are normalized into [`Directive`]s: a bare
//! `index` on an int, float, bool or geo field gets its tokenizer inferred
//! from the field kind, duplicates collapse, and the set is put in canonical
//! order so two declarations with the same directives compare equal.

use crate::registry::{FieldKind, ScalarKind};
use crate::DiggyError;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// TOKENIZERS
// =============================================================================

/// Index tokenizers understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tokenizer {
    Hash,
    Exact,
    Term,
    Fulltext,
    Trigram,
    Int,
    Float,
    Bool,
    Geo,
}

impl Tokenizer {
    /// Name used inside `@index(...)`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Exact => "exact",
            Self::Term => "term",
            Self::Fulltext => "fulltext",
            Self::Trigram => "trigram",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Geo => "geo",
        }
    }

    /// Tokenizer implied by a bare `index` on a field of this kind.
    #[must_use]
    pub const fn inferred_for(kind: ScalarKind) -> Option<Self> {
        match kind {
            ScalarKind::Int => Some(Self::Int),
            ScalarKind::Float => Some(Self::Float),
            ScalarKind::Bool => Some(Self::Bool),
            ScalarKind::Geo => Some(Self::Geo),
            ScalarKind::String | ScalarKind::DateTime | ScalarKind::Uid => None,
        }
    }
}

impl fmt::Display for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tokenizer {
    type Err = DiggyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "hash" => Ok(Self::Hash),
            "exact" => Ok(Self::Exact),
            "term" => Ok(Self::Term),
            "fulltext" => Ok(Self::Fulltext),
            "trigram" => Ok(Self::Trigram),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "bool" => Ok(Self::Bool),
            "geo" => Ok(Self::Geo),
            other => Err(DiggyError::InvalidDeclaration(format!(
                "Unknown tokenizer: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// REVERSE
// =============================================================================

/// Options of a `reverse` directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reverse {
    /// Back-reference slot name; defaults to `_<field>`.
    pub name: Option<String>,
    /// The back-reference is a collection rather than a single slot.
    pub many: bool,
    /// Mirror the forward edge's facets onto the back-reference.
    pub with_facets: bool,
}

impl Reverse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn many(mut self) -> Self {
        self.many = true;
        self
    }

    #[must_use]
    pub fn with_facets(mut self) -> Self {
        self.with_facets = true;
        self
    }

    /// Name of the back-reference slot installed for `field`.
    #[must_use]
    pub fn slot_name(&self, field: &str) -> String {
        self.name.clone().unwrap_or_else(|| format!("_{}", field))
    }
}

// =============================================================================
// DIRECTIVES
// =============================================================================

/// A directive as declared, before normalization.
///
/// `Index(vec![])` is a bare `index` whose tokenizer must be inferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveSpec {
    Index(Vec<Tokenizer>),
    Reverse(Reverse),
    Count,
    Upsert,
    Lang,
}

impl DirectiveSpec {
    /// Bare `index`.
    #[must_use]
    pub fn index() -> Self {
        Self::Index(Vec::new())
    }

    /// `index` with explicit tokenizers.
    #[must_use]
    pub fn index_with(tokenizers: impl IntoIterator<Item = Tokenizer>) -> Self {
        Self::Index(tokenizers.into_iter().collect())
    }

    /// Resolve against the field it annotates.
    pub fn normalize(&self, field: &str, kind: &FieldKind) -> Result<Directive, DiggyError> {
        match self {
            Self::Index(tokenizers) if tokenizers.is_empty() => kind
                .scalar()
                .and_then(Tokenizer::inferred_for)
                .map(|t| Directive::Index(vec![t]))
                .ok_or_else(|| {
                    DiggyError::InvalidDeclaration(format!(
                        "index on '{}' ({}) needs an explicit tokenizer",
                        field,
                        kind.name()
                    ))
                }),
            Self::Index(tokenizers) => {
                let mut tokenizers = tokenizers.clone();
                tokenizers.sort_unstable();
                tokenizers.dedup();
                Ok(Directive::Index(tokenizers))
            }
            Self::Reverse(reverse) => {
                if !kind.is_reference() {
                    return Err(DiggyError::InvalidDeclaration(format!(
                        "reverse on '{}' requires a node reference, found {}",
                        field,
                        kind.name()
                    )));
                }
                Ok(Directive::Reverse(reverse.clone()))
            }
            Self::Count => Ok(Directive::Count),
            Self::Upsert => Ok(Directive::Upsert),
            Self::Lang => {
                if kind.scalar() != Some(ScalarKind::String) {
                    return Err(DiggyError::InvalidDeclaration(format!(
                        "lang on '{}' requires a string field, found {}",
                        field,
                        kind.name()
                    )));
                }
                Ok(Directive::Lang)
            }
        }
    }
}

impl From<Reverse> for DirectiveSpec {
    fn from(reverse: Reverse) -> Self {
        Self::Reverse(reverse)
    }
}

impl From<Tokenizer> for DirectiveSpec {
    fn from(tokenizer: Tokenizer) -> Self {
        Self::Index(vec![tokenizer])
    }
}

/// Parses the rendered syntax, with or without the leading `@`:
/// `index`, `index(exact, term)`, `reverse(name=territories, many, facets)`,
/// `count`, `upsert`, `lang`.
impl FromStr for DirectiveSpec {
    type Err = DiggyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix('@').unwrap_or(s);
        let (name, args) = match s.find('(') {
            Some(open) => {
                let close = s.rfind(')').filter(|&c| c > open).ok_or_else(|| {
                    DiggyError::InvalidDeclaration(format!("Unbalanced directive: {}", s))
                })?;
                let args: Vec<&str> = s[open + 1..close]
                    .split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .collect();
                (s[..open].trim(), args)
            }
            None => (s, Vec::new()),
        };

        let no_args = |directive: DirectiveSpec| {
            if args.is_empty() {
                Ok(directive)
            } else {
                Err(DiggyError::InvalidDeclaration(format!(
                    "{} takes no arguments",
                    name
                )))
            }
        };

        match name {
            "index" => args
                .iter()
                .map(|a| a.parse())
                .collect::<Result<Vec<_>, _>>()
                .map(DirectiveSpec::Index),
            "reverse" => {
                let mut reverse = Reverse::new();
                for arg in args {
                    match arg.split_once('=').map(|(k, v)| (k.trim(), v.trim())) {
                        Some(("name", v)) => reverse.name = Some(v.trim_matches('"').to_string()),
                        Some(("many", v)) => reverse.many = parse_flag(v)?,
                        Some(("facets" | "with_facets", v)) => reverse.with_facets = parse_flag(v)?,
                        None if arg == "many" => reverse.many = true,
                        None if arg == "facets" || arg == "with_facets" => {
                            reverse.with_facets = true;
                        }
                        _ => {
                            return Err(DiggyError::InvalidDeclaration(format!(
                                "Unknown reverse option: {}",
                                arg
                            )));
                        }
                    }
                }
                Ok(DirectiveSpec::Reverse(reverse))
            }
            "count" => no_args(DirectiveSpec::Count),
            "upsert" => no_args(DirectiveSpec::Upsert),
            "lang" => no_args(DirectiveSpec::Lang),
            other => Err(DiggyError::InvalidDeclaration(format!(
                "Unknown directive: {}",
                other
            ))),
        }
    }
}

fn parse_flag(v: &str) -> Result<bool, DiggyError> {
    v.parse()
        .map_err(|_| DiggyError::InvalidDeclaration(format!("Expected true or false, found {}", v)))
}

/// A normalized directive.
///
/// The derived order is the canonical rendering order within a schema line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Directive {
    /// Index with at least one tokenizer.
    Index(Vec<Tokenizer>),
    Reverse(Reverse),
    Count,
    Upsert,
    Lang,
}

impl Directive {
    #[must_use]
    pub fn as_reverse(&self) -> Option<&Reverse> {
        match self {
            Self::Reverse(reverse) => Some(reverse),
            _ => None,
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(tokenizers) => {
                f.write_str("@index(")?;
                for (i, t) in tokenizers.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(t.name())?;
                }
                f.write_str(")")
            }
            Self::Reverse(_) => f.write_str("@reverse"),
            Self::Count => f.write_str("@count"),
            Self::Upsert => f.write_str("@upsert"),
            Self::Lang => f.write_str("@lang"),
        }
    }
}

/// Normalize every directive declared on a field into a sorted, duplicate-free set.
pub fn normalize(
    specs: &[DirectiveSpec],
    field: &str,
    kind: &FieldKind,
) -> Result<Vec<Directive>, DiggyError> {
    let mut directives = specs
        .iter()
        .map(|spec| spec.normalize(field, kind))
        .collect::<Result<Vec<_>, _>>()?;
    directives.sort();
    directives.dedup();
    Ok(directives)
}

/// Render a directive set as it appears before the terminating ` .`:
/// each clause followed by one space.
#[must_use]
pub fn render_clauses(directives: &[Directive]) -> String {
    directives.iter().map(|d| format!("{} ", d)).collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_index_infers_tokenizer() {
        let int = FieldKind::Scalar(ScalarKind::Int);
        assert_eq!(
            DirectiveSpec::index().normalize("area", &int).expect("normalize"),
            Directive::Index(vec![Tokenizer::Int])
        );

        let float = FieldKind::Scalar(ScalarKind::Float);
        assert_eq!(
            DirectiveSpec::index().normalize("ratio", &float).expect("normalize"),
            Directive::Index(vec![Tokenizer::Float])
        );

        let flag = FieldKind::Scalar(ScalarKind::Bool);
        assert_eq!(
            DirectiveSpec::index().normalize("coastal", &flag).expect("normalize"),
            Directive::Index(vec![Tokenizer::Bool])
        );

        let geo = FieldKind::Scalar(ScalarKind::Geo);
        assert_eq!(
            DirectiveSpec::index().normalize("coord", &geo).expect("normalize"),
            Directive::Index(vec![Tokenizer::Geo])
        );
    }

    #[test]
    fn bare_index_on_string_is_rejected() {
        let string = FieldKind::Scalar(ScalarKind::String);
        let result = DirectiveSpec::index().normalize("name", &string);
        assert!(matches!(result, Err(DiggyError::InvalidDeclaration(_))));
    }

    #[test]
    fn reverse_requires_reference() {
        let string = FieldKind::Scalar(ScalarKind::String);
        assert!(DirectiveSpec::Reverse(Reverse::new())
            .normalize("name", &string)
            .is_err());

        let node = FieldKind::Node("Region".into());
        assert!(DirectiveSpec::Reverse(Reverse::new())
            .normalize("borders", &node)
            .is_ok());
    }

    #[test]
    fn rendering() {
        assert_eq!(
            Directive::Index(vec![Tokenizer::Exact, Tokenizer::Term]).to_string(),
            "@index(exact, term)"
        );
        assert_eq!(Directive::Reverse(Reverse::new().many()).to_string(), "@reverse");
        assert_eq!(
            render_clauses(&[Directive::Index(vec![Tokenizer::Exact]), Directive::Count]),
            "@index(exact) @count "
        );
        assert_eq!(render_clauses(&[]), "");
    }

    #[test]
    fn normalize_sorts_and_dedups() {
        let kind = FieldKind::Scalar(ScalarKind::String);
        let specs = vec![
            DirectiveSpec::Upsert,
            DirectiveSpec::Count,
            DirectiveSpec::index_with([Tokenizer::Exact]),
            DirectiveSpec::Count,
        ];
        let directives = normalize(&specs, "abbr", &kind).expect("normalize");
        assert_eq!(
            render_clauses(&directives),
            "@index(exact) @count @upsert "
        );
    }

    #[test]
    fn parse_directive_strings() {
        assert_eq!("index".parse::<DirectiveSpec>().expect("parse"), DirectiveSpec::index());
        assert_eq!(
            "@index(exact, term)".parse::<DirectiveSpec>().expect("parse"),
            DirectiveSpec::index_with([Tokenizer::Exact, Tokenizer::Term])
        );
        assert_eq!(
            "reverse(name=territories, many)"
                .parse::<DirectiveSpec>()
                .expect("parse"),
            DirectiveSpec::Reverse(Reverse::new().named("territories").many())
        );
        assert_eq!(
            "reverse(facets)".parse::<DirectiveSpec>().expect("parse"),
            DirectiveSpec::Reverse(Reverse::new().with_facets())
        );
        assert!("count(x)".parse::<DirectiveSpec>().is_err());
        assert!("unique".parse::<DirectiveSpec>().is_err());
        assert!("index(soundex)".parse::<DirectiveSpec>().is_err());
    }

    #[test]
    fn reverse_slot_name_defaults_to_underscore() {
        assert_eq!(Reverse::new().slot_name("borders"), "_borders");
        assert_eq!(Reverse::new().named("territories").slot_name("map"), "territories");
    }
}
