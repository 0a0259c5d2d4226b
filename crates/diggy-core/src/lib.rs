//! # diggy-core
//!
//! Object-to-graph mapping for a triple store - THE LOGIC.
//!
//! Developers declare node types (fields with kinds and directives) and this
//! crate derives:
//! - the store schema, with conflict detection across types
//! - mutation statements for staged instances
//! - typed instances hydrated from query results, reverse edges and facets
//!   included
//!
//! ## Architectural Constraints
//!
//! - Single-threaded and synchronous. All shared state (registry, instances,
//!   staged set, identifier counter) lives in an explicit [`Graph`].
//! - Deterministic: `BTreeMap`/`BTreeSet` only, so output text is stable.
//! - No network code. A store client plugs in through [`Transport`].

// =============================================================================
// MODULES
// =============================================================================

pub mod declare;
pub mod directive;
pub mod export;
pub mod graph;
pub mod hydrate;
pub mod mutation;
pub mod primitives;
pub mod registry;
pub mod schema;
pub mod transport;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Computed, DiggyError, Facets, Uid, Value};

// =============================================================================
// RE-EXPORTS: Declarations
// =============================================================================

pub use declare::Declarations;
pub use directive::{Directive, DirectiveSpec, Reverse, Tokenizer};
pub use registry::{
    Field, FieldDef, FieldKind, NodeType, NodeTypeBuilder, ReverseEdge, ScalarKind, TypeRegistry,
};

// =============================================================================
// RE-EXPORTS: Graph and Codecs
// =============================================================================

pub use graph::{Graph, Node, NodeBuilder};
pub use hydrate::{Hydrated, HydratedBlocks};
pub use mutation::MutationSet;
pub use schema::{Schema, generate_schema};

// =============================================================================
// RE-EXPORTS: Transport
// =============================================================================

pub use transport::{
    CallError, MemoryError, MemoryTransport, MutationOutcome, QueryResponse, Transaction,
    Transport, TransportConfig, TxnGuard,
};
