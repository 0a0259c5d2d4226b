//! # Transport
//!
//! The seam between the codecs and a running store.
//!
//! The core never talks to the network. A client implements [`Transport`]
//! and [`Transaction`]; the helpers in this module drive one round-trip
//! each and always discard the transaction on the way out, committed or
//! not. [`MemoryTransport`] records calls instead of sending them and is
//! used by tests and dry runs.

use crate::graph::Graph;
use crate::hydrate::HydratedBlocks;
use crate::schema::Schema;
use crate::{DiggyError, Uid};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Where and how to reach the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// `host:port` of the store's client endpoint.
    #[serde(default = "default_address")]
    pub address: String,
    /// Deadline per round-trip, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_address() -> String {
    "localhost:9080".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// TRAITS
// =============================================================================

/// Raw body of a query response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResponse {
    pub body: Vec<u8>,
}

impl QueryResponse {
    /// Parse the body as JSON.
    pub fn json(&self) -> Result<serde_json::Value, DiggyError> {
        serde_json::from_slice(&self.body).map_err(|e| DiggyError::SerializationError(e.to_string()))
    }
}

/// What the store reports back for a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Blank-node token (without `_:`) to assigned uid.
    pub uids: BTreeMap<String, u64>,
}

/// One store transaction.
pub trait Transaction {
    type Error: std::error::Error + 'static;

    fn mutate(&mut self, set: &str, delete: &str) -> Result<MutationOutcome, Self::Error>;

    fn commit(&mut self) -> Result<(), Self::Error>;

    /// Abandon the transaction. Harmless after a commit.
    fn discard(&mut self) -> Result<(), Self::Error>;
}

/// A connected store client.
pub trait Transport {
    type Error: std::error::Error + 'static;
    type Txn<'a>: Transaction<Error = Self::Error>
    where
        Self: 'a;

    fn connect(config: &TransportConfig) -> Result<Self, Self::Error>
    where
        Self: Sized;

    /// Run a read-only query and return the JSON body.
    fn query(&mut self, text: &str) -> Result<QueryResponse, Self::Error>;

    fn begin(&mut self) -> Result<Self::Txn<'_>, Self::Error>;

    fn alter_schema(&mut self, schema: &str) -> Result<(), Self::Error>;
}

/// Error of a transport-backed helper: a codec error or the transport's own,
/// passed through untouched.
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error(transparent)]
    Diggy(#[from] DiggyError),

    #[error("transport error: {0}")]
    Transport(E),
}

// =============================================================================
// TRANSACTION GUARD
// =============================================================================

/// Discards the wrapped transaction when dropped.
#[derive(Debug)]
pub struct TxnGuard<T: Transaction> {
    txn: T,
}

impl<T: Transaction> TxnGuard<T> {
    pub fn new(txn: T) -> Self {
        Self { txn }
    }

    pub fn mutate(&mut self, set: &str, delete: &str) -> Result<MutationOutcome, T::Error> {
        self.txn.mutate(set, delete)
    }

    pub fn commit(&mut self) -> Result<(), T::Error> {
        self.txn.commit()
    }
}

impl<T: Transaction> Drop for TxnGuard<T> {
    fn drop(&mut self) {
        if let Err(e) = self.txn.discard() {
            tracing::warn!(error = %e, "transaction discard failed");
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// One mutate and one commit inside a fresh transaction.
pub fn run_mutation<T: Transport>(
    transport: &mut T,
    set: &str,
    delete: &str,
) -> Result<MutationOutcome, CallError<T::Error>> {
    let mut txn = TxnGuard::new(transport.begin().map_err(CallError::Transport)?);
    let outcome = txn.mutate(set, delete).map_err(CallError::Transport)?;
    txn.commit().map_err(CallError::Transport)?;
    tracing::debug!(assigned = outcome.uids.len(), "mutation committed");
    Ok(outcome)
}

/// Generate the staged mutation, commit it and adopt the assigned uids.
///
/// The staged set is consumed by generation even if the store then fails.
/// Only what the snapshots carried is marked clean: fields changed after
/// staging stay dirty and queued deletions wait for [`save`].
pub fn commit_staged<T: Transport>(
    transport: &mut T,
    graph: &mut Graph,
) -> Result<MutationOutcome, CallError<T::Error>> {
    let committed = graph.staged.clone();
    let set = graph.generate_mutation()?;
    let outcome = run_mutation(transport, &set, "")?;

    graph.assign_uids(&outcome.uids)?;
    for entry in committed {
        graph.mark_committed(entry, &outcome.uids)?;
    }
    Ok(outcome)
}

/// Persist the dirty fields of one instance.
///
/// Returns the identifier the instance is known by afterwards.
pub fn save<T: Transport>(
    transport: &mut T,
    graph: &mut Graph,
    uid: &Uid,
) -> Result<Uid, CallError<T::Error>> {
    let mutation = graph.save_mutation(uid)?;
    if mutation.is_empty() {
        return Ok(uid.clone());
    }

    let outcome = run_mutation(transport, &mutation.set_text(), &mutation.delete_text())?;
    graph.assign_uids(&outcome.uids)?;
    let uid = adopted(uid.clone(), &outcome);
    graph.mark_saved(&uid)?;
    Ok(uid)
}

/// Run a query and hydrate the result into `graph`.
pub fn query<T: Transport>(
    transport: &mut T,
    graph: &mut Graph,
    text: &str,
) -> Result<HydratedBlocks, CallError<T::Error>> {
    let response = transport.query(text).map_err(CallError::Transport)?;
    Ok(graph.hydrate(&response.json()?)?)
}

/// Generate the schema and send it to the store.
///
/// The returned schema carries the unknown-field report.
pub fn apply_schema<T: Transport>(
    transport: &mut T,
    graph: &Graph,
) -> Result<Schema, CallError<T::Error>> {
    let schema = graph.generate_schema()?;
    transport
        .alter_schema(&schema.text())
        .map_err(CallError::Transport)?;
    Ok(schema)
}

fn adopted(uid: Uid, outcome: &MutationOutcome) -> Uid {
    uid.token()
        .and_then(|token| outcome.uids.get(token))
        .map_or(uid.clone(), |&n| Uid::Persisted(n))
}

// =============================================================================
// MEMORY TRANSPORT
// =============================================================================

/// Failures of the in-memory transport.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("commit rejected")]
    CommitRejected,
}

/// A committed mutation as the store would have received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMutation {
    pub set: String,
    pub delete: String,
}

/// Records every call and answers queries from a queue of canned bodies.
///
/// An empty queue answers `{}`. Blank nodes in committed mutations get
/// sequential uids starting at `0x1`.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    address: String,
    responses: VecDeque<Vec<u8>>,
    queries: Vec<String>,
    schemas: Vec<String>,
    mutations: Vec<RecordedMutation>,
    next_uid: u64,
    reject_commits: bool,
    discards: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self {
            address: default_address(),
            responses: VecDeque::new(),
            queries: Vec::new(),
            schemas: Vec::new(),
            mutations: Vec::new(),
            next_uid: 1,
            reject_commits: false,
            discards: 0,
        }
    }
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the body returned by the next query.
    pub fn push_response(&mut self, body: impl Into<Vec<u8>>) {
        self.responses.push_back(body.into());
    }

    /// Make every later commit fail.
    pub fn reject_commits(&mut self, reject: bool) {
        self.reject_commits = reject;
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    #[must_use]
    pub fn schemas(&self) -> &[String] {
        &self.schemas
    }

    /// Committed mutations, oldest first.
    #[must_use]
    pub fn mutations(&self) -> &[RecordedMutation] {
        &self.mutations
    }

    /// Number of transactions discarded.
    #[must_use]
    pub fn discards(&self) -> usize {
        self.discards
    }
}

impl Transport for MemoryTransport {
    type Error = MemoryError;
    type Txn<'a> = MemoryTxn<'a>;

    fn connect(config: &TransportConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            address: config.address.clone(),
            ..Self::default()
        })
    }

    fn query(&mut self, text: &str) -> Result<QueryResponse, Self::Error> {
        self.queries.push(text.to_string());
        let body = self
            .responses
            .pop_front()
            .unwrap_or_else(|| b"{}".to_vec());
        Ok(QueryResponse { body })
    }

    fn begin(&mut self) -> Result<Self::Txn<'_>, Self::Error> {
        Ok(MemoryTxn {
            transport: self,
            pending: Vec::new(),
        })
    }

    fn alter_schema(&mut self, schema: &str) -> Result<(), Self::Error> {
        self.schemas.push(schema.to_string());
        Ok(())
    }
}

/// Transaction of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryTxn<'a> {
    transport: &'a mut MemoryTransport,
    pending: Vec<RecordedMutation>,
}

impl Transaction for MemoryTxn<'_> {
    type Error = MemoryError;

    fn mutate(&mut self, set: &str, delete: &str) -> Result<MutationOutcome, Self::Error> {
        let mut outcome = MutationOutcome::default();
        for token in set.split_whitespace().filter_map(|t| t.strip_prefix("_:")) {
            if !outcome.uids.contains_key(token) {
                outcome.uids.insert(token.to_string(), self.transport.next_uid);
                self.transport.next_uid = self.transport.next_uid.saturating_add(1);
            }
        }
        self.pending.push(RecordedMutation {
            set: set.to_string(),
            delete: delete.to_string(),
        });
        Ok(outcome)
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        if self.transport.reject_commits {
            return Err(MemoryError::CommitRejected);
        }
        self.transport.mutations.append(&mut self.pending);
        Ok(())
    }

    fn discard(&mut self) -> Result<(), Self::Error> {
        self.pending.clear();
        self.transport.discards = self.transport.discards.saturating_add(1);
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Field, NodeType, ScalarKind, TypeRegistry};
    use crate::Value;

    fn graph() -> Graph {
        let mut registry = TypeRegistry::new();
        registry
            .register(
                NodeType::builder("Region")
                    .field(Field::scalar("name", ScalarKind::String))
                    .field(Field::node("borders", "Region").list())
                    .build()
                    .expect("Region"),
            )
            .expect("register");
        Graph::new(registry)
    }

    #[test]
    fn connect_uses_config_address() {
        let config: TransportConfig = toml::from_str("address = \"db:9080\"").expect("config");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        let transport = MemoryTransport::connect(&config).expect("connect");
        assert_eq!(transport.address(), "db:9080");
    }

    #[test]
    fn commit_staged_adopts_assigned_uids() {
        let mut g = graph();
        let a = g.build("Region").set("name", "Gascony").finish().expect("a");
        let b = g
            .build("Region")
            .set("borders", vec![a.clone()])
            .finish()
            .expect("b");
        g.stage(&a).expect("stage a");
        g.stage(&b).expect("stage b");

        let mut transport = MemoryTransport::new();
        let outcome = commit_staged(&mut transport, &mut g).expect("commit");

        assert_eq!(outcome.uids.len(), 2);
        assert_eq!(transport.mutations().len(), 1);
        assert_eq!(transport.discards(), 1);

        let a = Uid::Persisted(outcome.uids["unsaved.0"]);
        let b = Uid::Persisted(outcome.uids["unsaved.1"]);
        assert!(!g.node(&a).expect("a").is_fresh());
        assert_eq!(
            g.get(&b, "borders").expect("borders"),
            &Value::List(vec![Value::Node(a)])
        );
    }

    #[test]
    fn commit_staged_keeps_changes_made_after_staging() {
        let mut g = graph();
        let a = g.create("Region").expect("a");
        let b = g.create("Region").expect("b");
        g.set(&a, "name", "Old").expect("set a");
        g.set(&b, "name", "Kept").expect("set b");
        g.stage(&a).expect("stage a");
        g.stage(&b).expect("stage b");
        g.set(&a, "name", "New").expect("change a");

        let mut transport = MemoryTransport::new();
        commit_staged(&mut transport, &mut g).expect("commit");
        assert!(transport.mutations()[0].set.contains("<name> \"Old\""));

        let a = Uid::Persisted(1);
        let b = Uid::Persisted(2);
        assert!(g.node(&a).expect("a").dirty().contains("name"));
        assert!(g.node(&b).expect("b").dirty().is_empty());

        save(&mut transport, &mut g, &a).expect("save");
        assert_eq!(transport.mutations().len(), 2);
        assert_eq!(transport.mutations()[1].set, "<0x1> <name> \"New\" .");
    }

    #[test]
    fn commit_staged_leaves_queued_deletes() {
        let mut g = graph();
        let a = g
            .build("Region")
            .uid(0x5)
            .set("name", "Gascony")
            .finish()
            .expect("a");
        let statement = g.delete(&a, None, Some("borders")).expect("delete");
        g.stage(&a).expect("stage");

        let mut transport = MemoryTransport::new();
        commit_staged(&mut transport, &mut g).expect("commit");
        assert_eq!(transport.mutations()[0].delete, "");
        assert!(g.node(&a).expect("a").pending_deletes().contains(&statement));

        save(&mut transport, &mut g, &a).expect("save");
        assert_eq!(transport.mutations()[1].delete, "<0x5> <borders> * .");
        assert!(g.node(&a).expect("a").pending_deletes().is_empty());
    }

    #[test]
    fn failed_commit_still_discards() {
        let mut g = graph();
        let a = g.create("Region").expect("a");
        g.set(&a, "name", "x").expect("set");

        let mut transport = MemoryTransport::new();
        transport.reject_commits(true);
        let err = save(&mut transport, &mut g, &a).expect_err("rejected");
        assert!(matches!(err, CallError::Transport(MemoryError::CommitRejected)));
        assert_eq!(transport.discards(), 1);
        assert!(transport.mutations().is_empty());
        assert!(g.node(&a).expect("a").is_fresh());
    }

    #[test]
    fn save_renames_fresh_instance() {
        let mut g = graph();
        let a = g.create("Region").expect("a");
        g.set(&a, "name", "Spain").expect("set");

        let mut transport = MemoryTransport::new();
        let saved = save(&mut transport, &mut g, &a).expect("save");
        assert_eq!(saved, Uid::Persisted(1));
        assert!(g.node(&saved).expect("saved").dirty().is_empty());
        assert!(transport.mutations()[0].set.contains("<name> \"Spain\""));

        let again = save(&mut transport, &mut g, &saved).expect("noop");
        assert_eq!(again, saved);
        assert_eq!(transport.mutations().len(), 1);
    }

    #[test]
    fn query_hydrates_canned_response() {
        let mut g = graph();
        let mut transport = MemoryTransport::new();
        transport.push_response(r#"{"q": [{"uid": "0x5", "_type": "Region", "name": "Portugal"}]}"#);

        let blocks = query(&mut transport, &mut g, "{ q(func: has(Region)) { uid } }").expect("query");
        assert_eq!(blocks["q"].len(), 1);
        assert_eq!(
            g.get(&Uid::Persisted(5), "name").expect("name"),
            &Value::from("Portugal")
        );

        let empty = query(&mut transport, &mut g, "{}").expect("empty");
        assert!(empty.is_empty());
        assert_eq!(transport.queries().len(), 2);
    }

    #[test]
    fn apply_schema_sends_text() {
        let g = graph();
        let mut transport = MemoryTransport::new();
        let schema = apply_schema(&mut transport, &g).expect("schema");
        assert_eq!(transport.schemas(), &[schema.text()]);
    }

    #[test]
    fn codec_errors_pass_through() {
        let mut g = graph();
        let a = g.create("Region").expect("a");
        let b = g
            .build("Region")
            .set("borders", vec![a])
            .finish()
            .expect("b");
        g.stage(&b).expect("stage");

        let mut transport = MemoryTransport::new();
        let err = commit_staged(&mut transport, &mut g).expect_err("not staged");
        assert!(matches!(err, CallError::Diggy(DiggyError::NotStaged { .. })));
        assert_eq!(transport.discards(), 0);
    }
}
