//! # Instance Graph
//!
//! Live node instances and the bookkeeping around them.
//!
//! A [`Graph`] owns the [`TypeRegistry`] and every instance created against
//! it, keyed by identifier. Relationships are stored as [`Uid`] references
//! and resolved through the graph, so there are no owning cycles.
//!
//! ## Lifecycle
//!
//! - Created without an identifier: provisional `unsaved.<n>`, fresh.
//! - Created with an identifier: persisted, not fresh.
//! - Fields given at construction are not dirty; [`Graph::set`] and
//!   [`Graph::clear`] afterwards mark the field dirty.
//! - Assigning a field carrying `reverse` mirrors the owner onto every
//!   referenced instance immediately, and removes it from instances that are
//!   no longer referenced.

use crate::directive::Reverse;
use crate::registry::{FieldDef, FieldKind, NodeType, ScalarKind, TypeRegistry};
use crate::{Computed, DiggyError, Uid, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

// =============================================================================
// NODE
// =============================================================================

/// One instance of a declared node type.
///
/// Equality, ordering and hashing consider the identifier only.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) uid: Uid,
    pub(crate) node_type: String,
    pub(crate) fields: BTreeMap<String, Value>,
    pub(crate) reverse: BTreeMap<String, Value>,
    pub(crate) computed: Computed,
    pub(crate) fresh: bool,
    pub(crate) dirty: BTreeSet<String>,
    pub(crate) pending_delete: BTreeSet<String>,
}

impl Node {
    fn new(uid: Uid, node_type: String) -> Self {
        Self {
            fresh: !uid.is_persisted(),
            uid,
            node_type,
            fields: BTreeMap::new(),
            reverse: BTreeMap::new(),
            computed: Computed::default(),
            dirty: BTreeSet::new(),
            pending_delete: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    #[must_use]
    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Raw field value, if set.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set fields, by name.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Back-reference slot value, if anything points here.
    #[must_use]
    pub fn back_reference(&self, slot: &str) -> Option<&Value> {
        self.reverse.get(slot)
    }

    /// Populated back-reference slots, by name.
    pub fn back_references(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.reverse.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn computed(&self) -> &Computed {
        &self.computed
    }

    /// Created locally and never saved.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Fields assigned or cleared since construction or the last save.
    #[must_use]
    pub fn dirty(&self) -> &BTreeSet<String> {
        &self.dirty
    }

    /// Deletion statements queued for the next save.
    #[must_use]
    pub fn pending_deletes(&self) -> &BTreeSet<String> {
        &self.pending_delete
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.uid.cmp(&other.uid)
    }
}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

// =============================================================================
// STAGING ENTRY
// =============================================================================

/// Snapshot of an instance taken by `stage`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Staged {
    pub(crate) uid: Uid,
    pub(crate) node_type: String,
    pub(crate) values: Vec<(String, Value)>,
}

// =============================================================================
// GRAPH
// =============================================================================

/// Registry plus live instances, staged set and identifier counter.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub(crate) registry: TypeRegistry,
    pub(crate) nodes: BTreeMap<Uid, Node>,
    pub(crate) staged: Vec<Staged>,
    counter: u64,
}

impl Graph {
    #[must_use]
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Start building an instance of `node_type`.
    #[must_use]
    pub fn build(&mut self, node_type: impl Into<String>) -> NodeBuilder<'_> {
        NodeBuilder {
            graph: self,
            node_type: node_type.into(),
            uid: None,
            values: Vec::new(),
        }
    }

    /// Create an instance with no field values.
    pub fn create(&mut self, node_type: &str) -> Result<Uid, DiggyError> {
        self.build(node_type).finish()
    }

    #[must_use]
    pub fn get_node(&self, uid: &Uid) -> Option<&Node> {
        self.nodes.get(uid)
    }

    pub fn node(&self, uid: &Uid) -> Result<&Node, DiggyError> {
        self.nodes
            .get(uid)
            .ok_or_else(|| DiggyError::NodeNotFound(uid.clone()))
    }

    #[must_use]
    pub fn contains(&self, uid: &Uid) -> bool {
        self.nodes.contains_key(uid)
    }

    /// All instances in identifier order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Live instances of one type, keyed by identifier.
    pub fn instances(&self, node_type: &str) -> Result<BTreeMap<&Uid, &Node>, DiggyError> {
        self.registry.require(node_type)?;
        Ok(self
            .nodes
            .iter()
            .filter(|(_, n)| n.node_type == node_type)
            .collect())
    }

    /// Read a field.
    ///
    /// A declared field (or registered back-reference slot) that holds no
    /// value is `MissingAttribute`; any other name is `UnknownAttribute`.
    pub fn get(&self, uid: &Uid, field: &str) -> Result<&Value, DiggyError> {
        let node = self.node(uid)?;
        let node_type = self.registry.require(&node.node_type)?;

        if let Some(value) = node.fields.get(field).or_else(|| node.reverse.get(field)) {
            return Ok(value);
        }

        let declared = node_type.field(field).is_some()
            || self
                .registry
                .reverse_slots(&node.node_type)
                .iter()
                .any(|edge| edge.slot == field);
        if declared {
            Err(DiggyError::MissingAttribute {
                node_type: node.node_type.clone(),
                field: field.to_string(),
            })
        } else {
            Err(DiggyError::UnknownAttribute {
                node_type: node.node_type.clone(),
                field: field.to_string(),
            })
        }
    }

    /// Assign a field, marking it dirty and cascading reverse edges.
    pub fn set(
        &mut self,
        uid: &Uid,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<(), DiggyError> {
        self.apply(uid, field, Some(value.into()), true)
    }

    /// Unset a field. The next save deletes the stored predicate.
    pub fn clear(&mut self, uid: &Uid, field: &str) -> Result<(), DiggyError> {
        self.apply(uid, field, None, true)
    }

    /// Drop every instance, the staged set and the identifier counter.
    /// Declarations are kept.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.staged.clear();
        self.counter = 0;
    }

    /// Drop the instances of one type.
    pub fn reset_type(&mut self, node_type: &str) -> Result<(), DiggyError> {
        self.registry.require(node_type)?;
        self.nodes.retain(|_, n| n.node_type != node_type);
        self.staged.retain(|s| s.node_type != node_type);
        Ok(())
    }

    /// Replace provisional identifiers with the ones the store assigned.
    ///
    /// `assigned` maps blank-node tokens (`unsaved.0`) to uids. Every
    /// reference is renamed: instance keys, field values, back-references
    /// and the staged set.
    pub fn assign_uids(&mut self, assigned: &BTreeMap<String, u64>) -> Result<(), DiggyError> {
        let rename = |uid: &Uid| {
            uid.token()
                .and_then(|token| assigned.get(token))
                .map(|&n| Uid::Persisted(n))
        };

        for (token, &n) in assigned {
            let provisional = Uid::Provisional(token.clone());
            let persisted = Uid::Persisted(n);
            if self.nodes.contains_key(&provisional) && self.nodes.contains_key(&persisted) {
                return Err(DiggyError::DuplicateUid(persisted));
            }
        }

        let nodes = std::mem::take(&mut self.nodes);
        for (uid, mut node) in nodes {
            let uid = rename(&uid).unwrap_or(uid);
            node.uid = uid.clone();
            node.fields.values_mut().for_each(|v| v.rename_uids(&rename));
            node.reverse.values_mut().for_each(|v| v.rename_uids(&rename));
            self.nodes.insert(uid, node);
        }
        for staged in &mut self.staged {
            if let Some(renamed) = rename(&staged.uid) {
                staged.uid = renamed;
            }
            staged.values.iter_mut().for_each(|(_, v)| v.rename_uids(&rename));
        }

        tracing::debug!(assigned = assigned.len(), "provisional uids replaced");
        Ok(())
    }

    /// Forget dirty fields and queued deletions after a successful save.
    pub fn mark_saved(&mut self, uid: &Uid) -> Result<(), DiggyError> {
        let node = self
            .nodes
            .get_mut(uid)
            .ok_or_else(|| DiggyError::NodeNotFound(uid.clone()))?;
        node.dirty.clear();
        node.pending_delete.clear();
        node.fresh = false;
        Ok(())
    }

    /// Settle an instance after its staged snapshot was committed.
    ///
    /// A dirty field stays dirty unless the committed value still equals the
    /// live one. Queued deletions were not sent and are kept.
    pub(crate) fn mark_committed(
        &mut self,
        mut entry: Staged,
        assigned: &BTreeMap<String, u64>,
    ) -> Result<Uid, DiggyError> {
        let rename = |uid: &Uid| {
            uid.token()
                .and_then(|token| assigned.get(token))
                .map(|&n| Uid::Persisted(n))
        };
        let uid = rename(&entry.uid).unwrap_or(entry.uid);
        entry.values.iter_mut().for_each(|(_, v)| v.rename_uids(&rename));

        let node = self
            .nodes
            .get_mut(&uid)
            .ok_or_else(|| DiggyError::NodeNotFound(uid.clone()))?;
        for (field, committed) in &entry.values {
            if node.fields.get(field) == Some(committed) {
                node.dirty.remove(field);
            }
        }
        node.fresh = false;
        Ok(uid)
    }

    // -------------------------------------------------------------------------
    // Internals shared with the codecs
    // -------------------------------------------------------------------------

    /// Make sure an instance of `node_type` exists under `uid`.
    pub(crate) fn ensure_node(&mut self, uid: &Uid, node_type: &str) -> Result<(), DiggyError> {
        match self.nodes.get(uid) {
            Some(existing) if existing.node_type != node_type => Err(DiggyError::InvalidData(
                format!("uid {} is a {}, not a {}", uid, existing.node_type, node_type),
            )),
            Some(_) => Ok(()),
            None => {
                self.registry.require(node_type)?;
                self.nodes
                    .insert(uid.clone(), Node::new(uid.clone(), node_type.to_string()));
                Ok(())
            }
        }
    }

    /// Create or refresh a persisted instance from stored data.
    ///
    /// Values are applied without marking anything dirty.
    pub(crate) fn upsert_persisted(
        &mut self,
        uid: &Uid,
        node_type: &str,
        values: Vec<(String, Value)>,
        computed: Computed,
    ) -> Result<(), DiggyError> {
        self.ensure_node(uid, node_type)?;
        let resolved = self.registry.require(node_type)?;
        for (field, value) in &values {
            self.check(resolved, field, value)?;
        }

        for (field, value) in values {
            self.apply(uid, &field, Some(value), false)?;
        }
        if !computed.is_empty() {
            if let Some(node) = self.nodes.get_mut(uid) {
                node.computed = computed;
            }
        }
        Ok(())
    }

    /// Add one element to a field without marking it dirty.
    ///
    /// List fields gain `item` unless an element already references the
    /// same node; singular fields are replaced.
    pub(crate) fn attach(&mut self, uid: &Uid, field: &str, item: Value) -> Result<(), DiggyError> {
        let node = self.node(uid)?;
        let is_list = self
            .registry
            .require(&node.node_type)?
            .field(field)
            .map(FieldDef::is_list)
            .ok_or_else(|| DiggyError::UnknownAttribute {
                node_type: node.node_type.clone(),
                field: field.to_string(),
            })?;

        let value = if is_list {
            let mut items = node
                .fields
                .get(field)
                .map(|v| v.items().to_vec())
                .unwrap_or_default();
            match items
                .iter_mut()
                .find(|existing| existing.node_uid().is_some() && existing.node_uid() == item.node_uid())
            {
                Some(existing) => *existing = item,
                None => items.push(item),
            }
            Value::List(items)
        } else {
            item
        };
        self.apply(uid, field, Some(value), false)
    }

    fn apply(
        &mut self,
        uid: &Uid,
        field: &str,
        value: Option<Value>,
        mark_dirty: bool,
    ) -> Result<(), DiggyError> {
        let type_name = self.node(uid)?.node_type.clone();
        let node_type = self.registry.require(&type_name)?;
        if let Some(value) = &value {
            self.check(node_type, field, value)?;
        }
        let reverse = node_type
            .field(field)
            .ok_or_else(|| DiggyError::UnknownAttribute {
                node_type: type_name.clone(),
                field: field.to_string(),
            })?
            .reverse()
            .cloned();

        let node = self
            .nodes
            .get_mut(uid)
            .ok_or_else(|| DiggyError::NodeNotFound(uid.clone()))?;
        let old = match value {
            Some(value) => node.fields.insert(field.to_string(), value),
            None => node.fields.remove(field),
        };
        if mark_dirty {
            node.dirty.insert(field.to_string());
        }
        let new = node.fields.get(field).cloned();

        if let Some(reverse) = reverse {
            self.relink(uid, field, &reverse, old.as_ref(), new.as_ref());
        }
        Ok(())
    }

    /// Validate `value` against the declared kind of `field`.
    fn check(&self, node_type: &NodeType, field: &str, value: &Value) -> Result<(), DiggyError> {
        let def = node_type
            .field(field)
            .ok_or_else(|| DiggyError::UnknownAttribute {
                node_type: node_type.name().to_string(),
                field: field.to_string(),
            })?;

        let mismatch = || DiggyError::ValueType {
            node_type: node_type.name().to_string(),
            predicate: field.to_string(),
            value: value.to_string(),
            expected: def
                .schema_kind()
                .unwrap_or_else(|| def.kind().name().to_string()),
        };

        let elements = match (def.is_list(), value) {
            (true, Value::List(items)) => items.as_slice(),
            (false, Value::List(_)) | (true, _) => return Err(mismatch()),
            (false, single) => std::slice::from_ref(single),
        };

        for element in elements {
            let inner = match element {
                Value::Facets(facets) => facets.target(),
                other => other,
            };
            let fits = match (def.kind(), inner) {
                (FieldKind::Other(_), Value::List(_) | Value::Facets(_)) => false,
                (FieldKind::Other(_), _) => true,
                (FieldKind::Scalar(ScalarKind::String), Value::String(_))
                | (FieldKind::Scalar(ScalarKind::Int), Value::Int(_))
                | (FieldKind::Scalar(ScalarKind::Float), Value::Float(_) | Value::Int(_))
                | (FieldKind::Scalar(ScalarKind::Bool), Value::Bool(_))
                | (FieldKind::Scalar(ScalarKind::DateTime), Value::DateTime(_))
                | (FieldKind::Scalar(ScalarKind::Geo), Value::Geo(_) | Value::Json(_)) => true,
                (FieldKind::Node(_) | FieldKind::Scalar(ScalarKind::Uid), Value::Node(target)) => {
                    if !self.nodes.contains_key(target) {
                        return Err(DiggyError::NodeNotFound(target.clone()));
                    }
                    true
                }
                _ => false,
            };
            if !fits {
                return Err(mismatch());
            }
        }
        Ok(())
    }

    /// Keep back-reference slots in step with a forward field change.
    fn relink(
        &mut self,
        source: &Uid,
        field: &str,
        reverse: &Reverse,
        old: Option<&Value>,
        new: Option<&Value>,
    ) {
        let slot = reverse.slot_name(field);
        let new_items: Vec<&Value> = new.map(|v| v.items().iter().collect()).unwrap_or_default();
        let new_targets: BTreeSet<&Uid> = new_items.iter().filter_map(|v| v.node_uid()).collect();

        let stale: Vec<Uid> = old
            .map(|v| v.items().iter().filter_map(Value::node_uid).cloned().collect())
            .unwrap_or_default();
        for target in stale.iter().filter(|t| !new_targets.contains(t)) {
            let Some(node) = self.nodes.get_mut(target) else {
                continue;
            };
            let emptied = match node.reverse.get_mut(&slot) {
                Some(Value::List(items)) => {
                    items.retain(|item| item.node_uid() != Some(source));
                    items.is_empty()
                }
                Some(single) => single.node_uid() == Some(source),
                None => false,
            };
            if emptied {
                node.reverse.remove(&slot);
            }
        }

        for item in new_items {
            let Some(target) = item.node_uid() else {
                continue;
            };
            let mirror = match item {
                Value::Facets(facets) if reverse.with_facets => {
                    Value::Facets(facets.retarget(source.clone()))
                }
                _ => Value::Node(source.clone()),
            };
            let Some(node) = self.nodes.get_mut(target) else {
                continue;
            };
            if reverse.many {
                let entry = node
                    .reverse
                    .entry(slot.clone())
                    .or_insert_with(|| Value::List(Vec::new()));
                if let Value::List(items) = entry {
                    match items.iter_mut().find(|i| i.node_uid() == Some(source)) {
                        Some(existing) => *existing = mirror,
                        None => items.push(mirror),
                    }
                }
            } else {
                node.reverse.insert(slot.clone(), mirror);
            }
        }
    }
}

// =============================================================================
// NODE BUILDER
// =============================================================================

/// Construction-time field values. Nothing set here is dirty.
#[derive(Debug)]
pub struct NodeBuilder<'g> {
    graph: &'g mut Graph,
    node_type: String,
    uid: Option<Uid>,
    values: Vec<(String, Value)>,
}

impl NodeBuilder<'_> {
    /// Bind to an identifier instead of drawing a provisional one.
    #[must_use]
    pub fn uid(mut self, uid: impl Into<Uid>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((field.into(), value.into()));
        self
    }

    /// Validate, insert and link the instance.
    pub fn finish(self) -> Result<Uid, DiggyError> {
        let graph = self.graph;
        let node_type = graph.registry.require(&self.node_type)?;
        for (field, value) in &self.values {
            graph.check(node_type, field, value)?;
        }

        let uid = match self.uid {
            Some(uid) if graph.nodes.contains_key(&uid) => {
                return Err(DiggyError::DuplicateUid(uid));
            }
            Some(uid) => uid,
            None => {
                let uid = Uid::provisional(graph.counter);
                graph.counter = graph.counter.saturating_add(1);
                uid
            }
        };

        graph
            .nodes
            .insert(uid.clone(), Node::new(uid.clone(), self.node_type));
        for (field, value) in self.values {
            graph.apply(&uid, &field, Some(value), false)?;
        }
        Ok(uid)
    }
}

// =============================================================================
// TESTS
// =============================================================================
