//! Mask-aware payload merging.
//!
//! A [`Merger`] walks a JSON payload together with the operation's
//! [`SelectionMask`] and writes it into the object graph: node payloads are
//! normalized through the [`NodeStore`], value payloads are rebuilt and kept
//! only if they differ, list fields are replaced wholesale. Fields absent from
//! the mask are never touched.
//!
//! Notifications are collected while merging and returned in a
//! [`MergeOutcome`]. The caller fires them with [`MergeOutcome::notify`] once
//! it has released the store, so observers always see a fully merged graph
//! and may freely read from the store.
//!
//! # Example
//!
//! ```
//! use lattice_graphql::ids::OperationId;
//! use lattice_graphql::merge::Merger;
//! use lattice_graphql::schema::{FieldType, ObjectType, Schema};
//! use lattice_graphql::selection::SelectionMask;
//! use lattice_graphql::store::NodeStore;
//! use serde_json::json;
//!
//! let schema = Schema::builder()
//!     .object(ObjectType::node("User").field("name", FieldType::string()))
//!     .build()
//!     .unwrap();
//! let user_type = schema.object("User").unwrap().clone();
//! let mut store = NodeStore::new();
//!
//! let mut merger = Merger::new(&mut store, &schema, OperationId::new());
//! let user = merger
//!     .merge_object(&user_type, None, &json!({"id": "42", "name": "Ann"}), &SelectionMask::fields(["id", "name"]))
//!     .unwrap();
//! merger.finish().notify();
//!
//! assert_eq!(user.get().unwrap().string("name").as_deref(), Some("Ann"));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lattice_graphql_core::logging::targets;
use serde_json::{Map, Value};

use crate::error::DeserializeError;
use crate::ids::{NodeId, OperationId};
use crate::list::ListContainer;
use crate::object::{FieldValue, NodeHandle, ObjectHandle, ObjectInstance};
use crate::scalars::Scalar;
use crate::schema::{FieldDef, FieldType, ObjectType, Schema, ID_FIELD, TYPENAME_FIELD};
use crate::selection::SelectionMask;
use crate::store::NodeStore;

type MergeResult<T> = std::result::Result<T, DeserializeError>;

/// A decoded field waiting to be written.
enum Staged {
    Assign(usize, FieldValue),
    List(Arc<ListContainer>, Vec<ObjectHandle>),
}

enum Pending {
    Fields(Arc<ObjectInstance>, Vec<usize>),
    Reset(Arc<ListContainer>),
}

/// Result of a merge pass: the nodes it reached and the notifications it owes.
#[must_use = "pending notifications are only delivered by `notify`"]
pub struct MergeOutcome {
    touched: HashSet<NodeId>,
    pending: Vec<Pending>,
}

impl MergeOutcome {
    /// Nodes retained by the pass.
    pub fn touched(&self) -> &HashSet<NodeId> {
        &self.touched
    }

    /// Number of field-change and reset notifications pending.
    pub fn notification_count(&self) -> usize {
        self.pending
            .iter()
            .map(|p| match p {
                Pending::Fields(_, fields) => fields.len(),
                Pending::Reset(_) => 1,
            })
            .sum()
    }

    /// Fire the collected notifications in merge order.
    pub fn notify(self) {
        for pending in self.pending {
            match pending {
                Pending::Fields(instance, fields) => instance.notify(&fields),
                Pending::Reset(list) => list.reset.emit(()),
            }
        }
    }
}

/// One merge pass for one operation.
pub struct Merger<'a> {
    store: &'a mut NodeStore,
    schema: &'a Schema,
    operation_id: OperationId,
    touched: HashSet<NodeId>,
    created: HashSet<NodeId>,
    edges_reset: HashSet<NodeId>,
    parents: Vec<NodeId>,
    pending: Vec<Pending>,
    pending_index: HashMap<usize, usize>,
    reset_lists: HashSet<usize>,
}

impl<'a> Merger<'a> {
    pub fn new(store: &'a mut NodeStore, schema: &'a Schema, operation_id: OperationId) -> Self {
        Self {
            store,
            schema,
            operation_id,
            touched: HashSet::new(),
            created: HashSet::new(),
            edges_reset: HashSet::new(),
            parents: Vec::new(),
            pending: Vec::new(),
            pending_index: HashMap::new(),
            reset_lists: HashSet::new(),
        }
    }

    /// Merge an operation's root payload.
    ///
    /// The root is created on the first call and merged in place afterwards.
    /// It is owned by the caller and never normalized.
    pub fn merge_root(
        &mut self,
        root_type: &Arc<ObjectType>,
        current: Option<&Arc<ObjectInstance>>,
        payload: &Value,
        mask: &SelectionMask,
    ) -> MergeResult<Arc<ObjectInstance>> {
        let map = payload
            .as_object()
            .ok_or_else(|| DeserializeError::mismatch(root_type.name(), "object", payload))?;
        let (root, fresh) = match current {
            Some(root) => (root.clone(), false),
            None => (ObjectInstance::new(root_type.clone()), true),
        };
        tracing::trace!(
            target: targets::MERGE,
            operation_id = %self.operation_id,
            root = root_type.name(),
            fresh,
            "merging root payload"
        );
        self.merge_fields(&root, map, mask, fresh)?;
        Ok(root)
    }

    /// Merge an object payload of a known concrete type.
    ///
    /// Node types are normalized and retained for this pass's operation.
    /// Value types are rebuilt; `current` is returned unchanged when the
    /// rebuilt value equals it.
    pub fn merge_object(
        &mut self,
        object_type: &Arc<ObjectType>,
        current: Option<&ObjectHandle>,
        payload: &Value,
        mask: &SelectionMask,
    ) -> MergeResult<ObjectHandle> {
        let map = payload
            .as_object()
            .ok_or_else(|| DeserializeError::mismatch(object_type.name(), "object", payload))?;

        if object_type.implements_node() {
            return self.merge_node(object_type, map, mask);
        }

        let rebuilt = ObjectInstance::new(object_type.clone());
        self.merge_fields(&rebuilt, map, mask, true)?;
        if let Some(ObjectHandle::Value(existing)) = current
            && existing.deep_eq(&rebuilt)
        {
            return Ok(ObjectHandle::Value(existing.clone()));
        }
        Ok(ObjectHandle::Value(rebuilt))
    }

    /// End the pass.
    pub fn finish(self) -> MergeOutcome {
        tracing::trace!(
            target: targets::MERGE,
            operation_id = %self.operation_id,
            touched = self.touched.len(),
            created = self.created.len(),
            "merge finished"
        );
        MergeOutcome {
            touched: self.touched,
            pending: self.pending,
        }
    }

    fn merge_node(
        &mut self,
        object_type: &Arc<ObjectType>,
        map: &Map<String, Value>,
        mask: &SelectionMask,
    ) -> MergeResult<ObjectHandle> {
        let id = match map.get(ID_FIELD) {
            Some(Value::String(s)) => NodeId::from(s.as_str()),
            Some(Value::Number(n)) => NodeId::from(n.to_string()),
            _ => {
                return Err(DeserializeError::MissingNodeId {
                    type_name: object_type.name().to_string(),
                });
            }
        };

        let (instance, created) = self.store.get_or_create(&id, object_type);
        if created {
            if let Some(index) = object_type.field_index(ID_FIELD) {
                instance.assign(index, FieldValue::Scalar(Scalar::Id(id.to_string())));
            }
            self.created.insert(id.clone());
        }
        if self.edges_reset.insert(id.clone()) {
            self.store.clear_edges(&id, self.operation_id);
        }
        self.store.retain(&id, self.operation_id);
        self.touched.insert(id.clone());
        if let Some(parent) = self.parents.last() {
            self.store.add_edge(parent, self.operation_id, id.clone());
        }

        let fresh = self.created.contains(&id);
        self.parents.push(id.clone());
        let merged = self.merge_fields(&instance, map, mask, fresh);
        self.parents.pop();
        merged?;

        Ok(ObjectHandle::Node(NodeHandle::new(id, &instance)))
    }

    fn merge_fields(
        &mut self,
        instance: &Arc<ObjectInstance>,
        map: &Map<String, Value>,
        mask: &SelectionMask,
        fresh: bool,
    ) -> MergeResult<()> {
        let object_type = instance.object_type().clone();
        let mut staged = Vec::new();

        for name in mask.field_names() {
            if name == TYPENAME_FIELD {
                continue;
            }
            let Some(raw) = map.get(name) else {
                continue;
            };
            let Some(index) = object_type.field_index(name) else {
                tracing::trace!(
                    target: targets::MERGE,
                    type_name = object_type.name(),
                    field = name,
                    "selected field not in type, skipping"
                );
                continue;
            };
            let Some(nested) = mask.get(name) else {
                continue;
            };
            let def = &object_type.fields()[index];
            staged.push(self.merge_field(instance, index, def, raw, nested)?);
        }

        // Every selected field decoded; only now write this object.
        let mut changed = Vec::new();
        for field in staged {
            match field {
                Staged::Assign(index, value) => {
                    if instance.assign(index, value) {
                        changed.push(index);
                    }
                }
                Staged::List(list, handles) => self.replace_list(&list, handles, fresh),
            }
        }

        if !fresh && !changed.is_empty() {
            self.queue_fields(instance, changed);
        }
        Ok(())
    }

    /// Decode one field into the write it implies. Nothing on `instance` is
    /// modified here.
    fn merge_field(
        &mut self,
        instance: &Arc<ObjectInstance>,
        index: usize,
        def: &FieldDef,
        raw: &Value,
        mask: &SelectionMask,
    ) -> MergeResult<Staged> {
        if raw.is_null() {
            if !def.nullable {
                return Err(DeserializeError::UnexpectedNull {
                    field: def.name.to_string(),
                });
            }
            if let FieldValue::List(list) = instance.field_at(index) {
                return Ok(Staged::List(list, Vec::new()));
            }
            return Ok(Staged::Assign(index, FieldValue::default_for(&def.field_type)));
        }

        match &def.field_type {
            FieldType::Scalar(codec) => Ok(Staged::Assign(
                index,
                FieldValue::Scalar(codec.decode(&def.name, raw)?),
            )),
            FieldType::Object(_) | FieldType::Abstract(_) => {
                let current = match instance.field_at(index) {
                    FieldValue::Object(handle) => handle,
                    _ => None,
                };
                let handle = self.merge_element(&def.field_type, &def.name, current.as_ref(), raw, mask)?;
                Ok(Staged::Assign(index, FieldValue::Object(Some(handle))))
            }
            FieldType::List(_) => {
                let items = raw
                    .as_array()
                    .ok_or_else(|| DeserializeError::mismatch(def.name.as_ref(), "list", raw))?;

                if let FieldType::Scalar(codec) = def.field_type.item() {
                    let decoded = items
                        .iter()
                        .map(|item| match item {
                            Value::Null => Ok(codec.default_value()),
                            item => codec.decode(&def.name, item),
                        })
                        .collect::<MergeResult<Vec<_>>>()?;
                    return Ok(Staged::Assign(index, FieldValue::Scalars(decoded)));
                }

                let FieldValue::List(list) = instance.field_at(index) else {
                    return Err(DeserializeError::mismatch(def.name.as_ref(), "list", raw));
                };
                let previous = list.to_vec();
                let mut handles = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    if item.is_null() {
                        continue;
                    }
                    let handle =
                        self.merge_element(def.field_type.item(), &def.name, previous.get(i), item, mask)?;
                    handles.push(handle);
                }
                Ok(Staged::List(list, handles))
            }
        }
    }

    /// Merge a single object or polymorphic value.
    fn merge_element(
        &mut self,
        field_type: &FieldType,
        field: &str,
        current: Option<&ObjectHandle>,
        raw: &Value,
        mask: &SelectionMask,
    ) -> MergeResult<ObjectHandle> {
        let schema = self.schema;
        match field_type {
            FieldType::Object(type_name) => {
                let object_type = schema.require(type_name)?;
                self.merge_object(object_type, current, raw, mask)
            }
            FieldType::Abstract(abstract_type) => {
                let type_name = raw
                    .get(TYPENAME_FIELD)
                    .and_then(Value::as_str)
                    .ok_or_else(|| DeserializeError::MissingTypename {
                        abstract_type: abstract_type.to_string(),
                    })?;
                let object_type = schema.resolve(abstract_type, type_name)?;
                self.merge_object(object_type, current, raw, mask.choice(type_name))
            }
            _ => Err(DeserializeError::mismatch(field, "object", raw)),
        }
    }

    fn replace_list(&mut self, list: &Arc<ListContainer>, handles: Vec<ObjectHandle>, fresh: bool) {
        let changed = list.replace_silent(handles, self.operation_id);
        let key = Arc::as_ptr(list) as usize;
        if changed && !fresh && self.reset_lists.insert(key) {
            self.pending.push(Pending::Reset(list.clone()));
        }
    }

    fn queue_fields(&mut self, instance: &Arc<ObjectInstance>, fields: Vec<usize>) {
        let key = Arc::as_ptr(instance) as usize;
        match self.pending_index.get(&key) {
            Some(&slot) => {
                if let Pending::Fields(_, queued) = &mut self.pending[slot] {
                    for field in fields {
                        if !queued.contains(&field) {
                            queued.push(field);
                        }
                    }
                }
            }
            None => {
                self.pending_index.insert(key, self.pending.len());
                self.pending.push(Pending::Fields(instance.clone(), fields));
            }
        }
    }
}
