//! Normalized node store.
//!
//! The store owns exactly one [`ObjectInstance`] per [`NodeId`]. Each record
//! keeps the set of operations that retain it; once the last retainer is
//! released the record is evicted and outstanding
//! [`NodeHandle`](crate::object::NodeHandle)s stop resolving.
//!
//! Records also remember, per operation, which child nodes that operation's
//! merges linked from them. Releasing a node for an operation releases those
//! children for the same operation, so disposing an operation frees its
//! exclusive subgraph while nodes still retained elsewhere survive.
//!
//! # Example
//!
//! ```
//! use lattice_graphql::ids::{NodeId, OperationId};
//! use lattice_graphql::schema::ObjectType;
//! use lattice_graphql::store::NodeStore;
//! use std::sync::Arc;
//!
//! let mut store = NodeStore::new();
//! let op = OperationId::new();
//! let id = NodeId::from("42");
//!
//! let (user, created) = store.get_or_create(&id, &Arc::new(ObjectType::node("User")));
//! assert!(created);
//! store.retain(&id, op);
//! assert!(Arc::ptr_eq(&user, &store.lookup(&id).unwrap()));
//!
//! store.release(&id, op);
//! assert!(!store.contains(&id));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lattice_graphql_core::logging::targets;

use crate::ids::{NodeId, OperationId};
use crate::object::ObjectInstance;
use crate::schema::ObjectType;

/// Storage slot of one node.
#[derive(Debug)]
struct NodeRecord {
    instance: Arc<ObjectInstance>,
    retainers: HashSet<OperationId>,
    edges: HashMap<OperationId, HashSet<NodeId>>,
}

/// Refcounted storage keyed by node id.
#[derive(Debug, Default)]
pub struct NodeStore {
    records: HashMap<NodeId, NodeRecord>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the node's instance, creating an unretained record if needed.
    ///
    /// The boolean is `true` when the record was created by this call.
    pub fn get_or_create(
        &mut self,
        id: &NodeId,
        object_type: &Arc<ObjectType>,
    ) -> (Arc<ObjectInstance>, bool) {
        if let Some(record) = self.records.get(id) {
            return (record.instance.clone(), false);
        }
        tracing::trace!(target: targets::STORE, %id, type_name = object_type.name(), "creating node");
        let instance = ObjectInstance::new(object_type.clone());
        self.records.insert(
            id.clone(),
            NodeRecord {
                instance: instance.clone(),
                retainers: HashSet::new(),
                edges: HashMap::new(),
            },
        );
        (instance, true)
    }

    /// Non-owning lookup.
    pub fn lookup(&self, id: &NodeId) -> Option<Arc<ObjectInstance>> {
        self.records.get(id).map(|r| r.instance.clone())
    }

    /// Add `operation_id` to the node's retainers. Returns `false` if the
    /// node is absent or already retained by it.
    pub fn retain(&mut self, id: &NodeId, operation_id: OperationId) -> bool {
        match self.records.get_mut(id) {
            Some(record) => record.retainers.insert(operation_id),
            None => false,
        }
    }

    /// Release the node and, transitively, the children `operation_id`
    /// linked from it. Nodes left without retainers are evicted.
    pub fn release(&mut self, id: &NodeId, operation_id: OperationId) {
        self.release_all([id.clone()], operation_id, &HashSet::new());
    }

    /// Release every node in `roots` for `operation_id`, skipping ids in `keep`.
    pub(crate) fn release_all<I>(&mut self, roots: I, operation_id: OperationId, keep: &HashSet<NodeId>)
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut stack: Vec<NodeId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            if keep.contains(&id) {
                continue;
            }
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            if !record.retainers.remove(&operation_id) {
                continue;
            }
            if let Some(children) = record.edges.remove(&operation_id) {
                stack.extend(children);
            }
            if record.retainers.is_empty() {
                self.records.remove(&id);
                tracing::debug!(target: targets::STORE, %id, %operation_id, "evicted node");
            }
        }
    }

    /// Forget the children `operation_id` linked from `id`.
    pub(crate) fn clear_edges(&mut self, id: &NodeId, operation_id: OperationId) {
        if let Some(record) = self.records.get_mut(id) {
            record.edges.remove(&operation_id);
        }
    }

    /// Record a link from `id` to `child` made by `operation_id`.
    pub(crate) fn add_edge(&mut self, id: &NodeId, operation_id: OperationId, child: NodeId) {
        if let Some(record) = self.records.get_mut(id) {
            record.edges.entry(operation_id).or_default().insert(child);
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.records.contains_key(id)
    }

    /// Number of cached nodes.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Operations currently retaining the node.
    pub fn retainers(&self, id: &NodeId) -> Vec<OperationId> {
        let mut ops: Vec<OperationId> = self
            .records
            .get(id)
            .map(|r| r.retainers.iter().copied().collect())
            .unwrap_or_default();
        ops.sort_unstable();
        ops
    }

    /// Ids of every cached node.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.records.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }
}
