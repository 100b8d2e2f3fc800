//! Ordered containers for one-to-many fields.
//!
//! A merge replaces a container's contents wholesale and emits a single
//! [`ListContainer::reset`]. Local edits go through [`insert`](ListContainer::insert),
//! [`push`](ListContainer::push) and [`remove`](ListContainer::remove), which
//! emit row-level signals for incremental views.

use std::fmt;
use std::sync::Arc;

use lattice_graphql_core::Signal;
use parking_lot::RwLock;

use crate::ids::{NodeId, OperationId};
use crate::object::{ObjectHandle, ObjectInstance};

/// Ordered sequence of object handles.
pub struct ListContainer {
    items: RwLock<Vec<ObjectHandle>>,
    operation_id: RwLock<Option<OperationId>>,
    /// Contents were replaced as a whole.
    pub reset: Signal<()>,
    /// Rows `first..=last` were inserted.
    pub rows_inserted: Signal<(usize, usize)>,
    /// Rows `first..=last` were removed.
    pub rows_removed: Signal<(usize, usize)>,
}

impl ListContainer {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            operation_id: RwLock::new(None),
            reset: Signal::new(),
            rows_inserted: Signal::new(),
            rows_removed: Signal::new(),
        }
    }

    /// Replace the contents and emit `reset` if they changed.
    pub fn replace(&self, items: Vec<ObjectHandle>, operation_id: OperationId) -> bool {
        let changed = self.replace_silent(items, operation_id);
        if changed {
            self.reset.emit(());
        }
        changed
    }

    /// Replace the contents without notifying. Returns whether they changed.
    pub(crate) fn replace_silent(&self, items: Vec<ObjectHandle>, operation_id: OperationId) -> bool {
        *self.operation_id.write() = Some(operation_id);
        let mut current = self.items.write();
        if *current == items {
            return false;
        }
        *current = items;
        true
    }

    /// The operation whose merge produced the current contents.
    pub fn operation_id(&self) -> Option<OperationId> {
        *self.operation_id.read()
    }

    pub fn get(&self, index: usize) -> Option<ObjectHandle> {
        self.items.read().get(index).cloned()
    }

    /// Resolved instance at `index`.
    pub fn instance(&self, index: usize) -> Option<Arc<ObjectInstance>> {
        self.get(index)?.get()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Snapshot of the handles.
    pub fn to_vec(&self) -> Vec<ObjectHandle> {
        self.items.read().clone()
    }

    /// Snapshot of the resolved instances, skipping evicted nodes.
    pub fn instances(&self) -> Vec<Arc<ObjectInstance>> {
        self.items.read().iter().filter_map(ObjectHandle::get).collect()
    }

    /// Ids of the node elements.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.items
            .read()
            .iter()
            .filter_map(|h| h.node_id().cloned())
            .collect()
    }

    /// Insert at `index`. Returns `false` if `index > len`.
    pub fn insert(&self, index: usize, item: ObjectHandle) -> bool {
        {
            let mut items = self.items.write();
            if index > items.len() {
                return false;
            }
            items.insert(index, item);
        }
        self.rows_inserted.emit((index, index));
        true
    }

    /// Append an element.
    pub fn push(&self, item: ObjectHandle) {
        let index = {
            let mut items = self.items.write();
            items.push(item);
            items.len() - 1
        };
        self.rows_inserted.emit((index, index));
    }

    /// Remove the element at `index`.
    pub fn remove(&self, index: usize) -> Option<ObjectHandle> {
        let removed = {
            let mut items = self.items.write();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        self.rows_removed.emit((index, index));
        Some(removed)
    }

    pub(crate) fn same_contents(&self, other: &ListContainer) -> bool {
        let mine = self.to_vec();
        let theirs = other.to_vec();
        mine == theirs
    }
}

impl Default for ListContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListContainer")
            .field("len", &self.len())
            .field("operation_id", &self.operation_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::NodeHandle;
    use crate::schema::ObjectType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn node(id: &str, keep: &mut Vec<Arc<ObjectInstance>>) -> ObjectHandle {
        let instance = ObjectInstance::new(Arc::new(ObjectType::node("User")));
        let handle = ObjectHandle::Node(NodeHandle::new(NodeId::from(id), &instance));
        keep.push(instance);
        handle
    }

    #[test]
    fn test_replace_emits_single_reset() {
        let mut keep = Vec::new();
        let list = ListContainer::new();
        let resets = Arc::new(AtomicUsize::new(0));
        let r = resets.clone();
        list.reset.connect(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        let op = OperationId::new();
        let items = vec![node("1", &mut keep), node("2", &mut keep), node("3", &mut keep)];
        assert!(list.replace(items.clone(), op));
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(list.len(), 3);
        assert_eq!(list.operation_id(), Some(op));

        let next = OperationId::new();
        assert!(!list.replace(items, next));
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(list.operation_id(), Some(next));
    }

    #[test]
    fn test_incremental_edits() {
        let mut keep = Vec::new();
        let list = ListContainer::new();
        let inserted = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let ins = inserted.clone();
        list.rows_inserted.connect(move |&(first, last)| ins.lock().push((first, last)));

        list.push(node("1", &mut keep));
        assert!(list.insert(0, node("0", &mut keep)));
        assert!(!list.insert(5, node("9", &mut keep)));
        assert_eq!(*inserted.lock(), vec![(0, 0), (0, 0)]);
        assert_eq!(list.node_ids(), vec![NodeId::from("0"), NodeId::from("1")]);

        assert!(list.remove(0).is_some());
        assert!(list.remove(3).is_none());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut keep = Vec::new();
        let list = ListContainer::new();
        let a = node("1", &mut keep);
        list.replace(vec![a.clone(), a], OperationId::new());
        assert_eq!(list.len(), 2);
    }
}
