//! # Wire Primitives
//!
//! Fixed vocabulary shared by the schema generator, the mutation codec and
//! the hydration codec.
//!
//! These constants are part of the wire contract with the graph store.
//! Changing any of them changes the text the store receives.

/// Reserved predicate carrying the declared type name of every node.
pub const TYPE_PREDICATE: &str = "_type";

/// Key holding the node identifier in query results.
pub const UID_KEY: &str = "uid";

/// Prefix of provisional identifiers (`unsaved.<n>`).
pub const PROVISIONAL_PREFIX: &str = "unsaved";

/// Marker prefixed to a predicate name in query results for reverse edges.
pub const REVERSE_MARKER: char = '~';

/// Separator between predicate and facet name in query result keys
/// (`borders|since`).
pub const FACET_SEPARATOR: char = '|';

/// Computed keys ending with this suffix carry hex identifiers.
pub const COMPUTED_UID_SUFFIX: &str = "_uid";

/// Prefix that marks back-reference slots and other internal names.
pub const INTERNAL_PREFIX: char = '_';

/// Header line of every generated schema.
pub const TYPE_PREDICATE_SCHEMA: &str = "_type: string .";

/// Type tag appended to integer literals.
pub const INT_TAG: &str = "<xs:int>";

/// Type tag appended to float literals.
pub const FLOAT_TAG: &str = "<xs:float>";

/// Type tag appended to geo literals.
pub const GEO_TAG: &str = "<geo:geojson>";

// =============================================================================
// HYDRATION LIMITS
// =============================================================================

/// Maximum nesting depth accepted while hydrating a single record.
///
/// Query results are finite trees, but a malformed or hostile payload can
/// nest arbitrarily deep. Records nested deeper than this are rejected.
pub const MAX_HYDRATION_DEPTH: usize = 64;

/// Default depth used when dumping instances as JSON.
pub const DEFAULT_EXPLODE_DEPTH: usize = 1;
