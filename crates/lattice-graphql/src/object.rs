//! Object instances.
//!
//! An [`ObjectInstance`] is a live, typed value with one [`Property`] per
//! field. Node-typed instances are owned by the environment's node store and
//! shared by every operation that sees the node; value-typed instances are
//! owned by the field that holds them.
//!
//! Each field has its own change signal and every merge that changes at
//! least one field also emits [`ObjectInstance::changed`] with the names of
//! the changed fields.
//!
//! # Example
//!
//! ```
//! use lattice_graphql::object::{FieldValue, ObjectInstance};
//! use lattice_graphql::scalars::Scalar;
//! use lattice_graphql::schema::{FieldType, ObjectType};
//! use std::sync::Arc;
//!
//! let user = ObjectInstance::new(Arc::new(
//!     ObjectType::node("User").field("name", FieldType::string()),
//! ));
//! assert_eq!(user.string("name").as_deref(), Some(" - "));
//!
//! user.field_changed("name").unwrap().connect(|_| println!("renamed"));
//! user.set_field("name", FieldValue::Scalar(Scalar::String("Ann".into())));
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use lattice_graphql_core::{Property, Signal};
use serde_json::{Map, Value};

use crate::ids::NodeId;
use crate::list::ListContainer;
use crate::scalars::Scalar;
use crate::schema::{FieldType, ObjectType, ID_FIELD, TYPENAME_FIELD};
use crate::selection::SelectionMask;

/// Value held by one field.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Scalar(Scalar),
    /// List of scalars, compared as a whole.
    Scalars(Vec<Scalar>),
    /// Single object, `None` when null or not yet fetched.
    Object(Option<ObjectHandle>),
    /// List of objects. The container lives as long as the field.
    List(Arc<ListContainer>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => a == b,
            (Self::Scalars(a), Self::Scalars(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b) || a.same_contents(b),
            _ => false,
        }
    }
}

impl FieldValue {
    /// Initial value of a field of type `field_type`.
    pub fn default_for(field_type: &FieldType) -> Self {
        match field_type {
            FieldType::Scalar(scalar) => Self::Scalar(scalar.default_value()),
            FieldType::Object(_) | FieldType::Abstract(_) => Self::Object(None),
            FieldType::List(_) if field_type.is_object_list() => {
                Self::List(Arc::new(ListContainer::new()))
            }
            FieldType::List(_) => Self::Scalars(Vec::new()),
        }
    }
}

/// Non-owning handle to a store-owned node.
///
/// The handle stops resolving once the store evicts the node.
#[derive(Clone)]
pub struct NodeHandle {
    id: NodeId,
    instance: Weak<ObjectInstance>,
}

impl NodeHandle {
    pub fn new(id: NodeId, instance: &Arc<ObjectInstance>) -> Self {
        Self {
            id,
            instance: Arc::downgrade(instance),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// The live instance, if the node is still cached.
    pub fn get(&self) -> Option<Arc<ObjectInstance>> {
        self.instance.upgrade()
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.id)
            .field("alive", &(self.instance.strong_count() > 0))
            .finish()
    }
}

/// Reference from a field or list to an object.
#[derive(Debug, Clone)]
pub enum ObjectHandle {
    /// Owned value object.
    Value(Arc<ObjectInstance>),
    /// Normalized node.
    Node(NodeHandle),
}

impl ObjectHandle {
    pub fn get(&self) -> Option<Arc<ObjectInstance>> {
        match self {
            Self::Value(instance) => Some(instance.clone()),
            Self::Node(handle) => handle.get(),
        }
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Self::Node(handle) => Some(handle.id()),
            Self::Value(_) => None,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node(_))
    }
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Node(a), Self::Node(b)) => a.id == b.id,
            (Self::Value(a), Self::Value(b)) => Arc::ptr_eq(a, b) || a.deep_eq(b),
            _ => false,
        }
    }
}

/// A live typed object.
pub struct ObjectInstance {
    object_type: Arc<ObjectType>,
    fields: Vec<Property<FieldValue>>,
    field_signals: Vec<Signal<()>>,
    /// Emitted once per merge with the names of the fields it changed.
    pub changed: Signal<Vec<Arc<str>>>,
}

impl ObjectInstance {
    /// Create an instance with every field at its default.
    pub fn new(object_type: Arc<ObjectType>) -> Arc<Self> {
        let fields = object_type
            .fields()
            .iter()
            .map(|def| Property::new(FieldValue::default_for(&def.field_type)))
            .collect();
        let field_signals = object_type.fields().iter().map(|_| Signal::new()).collect();
        Arc::new(Self {
            object_type,
            fields,
            field_signals,
            changed: Signal::new(),
        })
    }

    pub fn object_type(&self) -> &Arc<ObjectType> {
        &self.object_type
    }

    pub fn type_name(&self) -> &str {
        self.object_type.name()
    }

    /// Node identity, for node-typed instances.
    pub fn id(&self) -> Option<NodeId> {
        if !self.object_type.implements_node() {
            return None;
        }
        match self.scalar(ID_FIELD)? {
            Scalar::Id(id) => Some(NodeId::from(id)),
            _ => None,
        }
    }

    /// Current value of a field.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.object_type
            .field_index(name)
            .map(|i| self.fields[i].get())
    }

    pub fn scalar(&self, name: &str) -> Option<Scalar> {
        let i = self.object_type.field_index(name)?;
        self.fields[i].with(|value| match value {
            FieldValue::Scalar(s) => Some(s.clone()),
            _ => None,
        })
    }

    /// Text of a `String`, `ID`, `Decimal` or enum field.
    pub fn string(&self, name: &str) -> Option<String> {
        self.scalar(name)?.as_str().map(str::to_string)
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        self.scalar(name)?.as_i32()
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.scalar(name)?.as_f64()
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.scalar(name)?.as_bool()
    }

    /// Elements of a list-of-scalars field.
    pub fn scalars(&self, name: &str) -> Option<Vec<Scalar>> {
        let i = self.object_type.field_index(name)?;
        self.fields[i].with(|value| match value {
            FieldValue::Scalars(items) => Some(items.clone()),
            _ => None,
        })
    }

    /// The object a single-object field points at, resolved.
    pub fn object(&self, name: &str) -> Option<Arc<ObjectInstance>> {
        let i = self.object_type.field_index(name)?;
        let handle = self.fields[i].with(|value| match value {
            FieldValue::Object(handle) => handle.clone(),
            _ => None,
        })?;
        handle.get()
    }

    /// The container of a list-of-objects field.
    pub fn list(&self, name: &str) -> Option<Arc<ListContainer>> {
        let i = self.object_type.field_index(name)?;
        self.fields[i].with(|value| match value {
            FieldValue::List(list) => Some(list.clone()),
            _ => None,
        })
    }

    /// Change signal of one field.
    pub fn field_changed(&self, name: &str) -> Option<&Signal<()>> {
        self.object_type
            .field_index(name)
            .map(|i| &self.field_signals[i])
    }

    /// Assign a field locally and notify if it changed.
    ///
    /// Returns `false` for unknown fields and unchanged values.
    pub fn set_field(&self, name: &str, value: FieldValue) -> bool {
        let Some(i) = self.object_type.field_index(name) else {
            return false;
        };
        if !self.assign(i, value) {
            return false;
        }
        self.notify(&[i]);
        true
    }

    pub(crate) fn field_at(&self, index: usize) -> FieldValue {
        self.fields[index].get()
    }

    pub(crate) fn assign(&self, index: usize, value: FieldValue) -> bool {
        self.fields[index].set(value)
    }

    /// Emit per-field signals, then the instance-level changed set.
    pub(crate) fn notify(&self, indices: &[usize]) {
        if indices.is_empty() {
            return;
        }
        for &i in indices {
            self.field_signals[i].emit(());
        }
        let names = indices
            .iter()
            .map(|&i| self.object_type.fields()[i].name.clone())
            .collect();
        self.changed.emit(names);
    }

    /// Field-by-field equality. Nodes compare by id.
    pub fn deep_eq(&self, other: &ObjectInstance) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.object_type.name() == other.object_type.name()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.with(|a| b.with(|b| a == b)))
    }

    /// Write the masked fields back to wire JSON.
    pub fn to_json(&self, mask: &SelectionMask) -> Value {
        let mut out = Map::new();
        for name in mask.field_names() {
            if name == TYPENAME_FIELD {
                out.insert(name.to_string(), Value::String(self.type_name().to_string()));
                continue;
            }
            let Some(def) = self.object_type.field_def(name) else {
                continue;
            };
            let Some(nested) = mask.get(name) else {
                continue;
            };
            let value = self.field(name).unwrap_or(FieldValue::Object(None));
            out.insert(name.to_string(), encode_field(&def.field_type, &value, nested));
        }
        Value::Object(out)
    }
}

fn encode_object(handle: Option<&ObjectHandle>, mask: &SelectionMask) -> Value {
    match handle.and_then(ObjectHandle::get) {
        Some(instance) => instance.to_json(mask.choice(instance.type_name())),
        None => Value::Null,
    }
}

fn encode_field(field_type: &FieldType, value: &FieldValue, mask: &SelectionMask) -> Value {
    match (field_type.item(), value) {
        (FieldType::Scalar(codec), FieldValue::Scalar(s)) => codec.encode(s),
        (FieldType::Scalar(codec), FieldValue::Scalars(items)) => {
            Value::Array(items.iter().map(|s| codec.encode(s)).collect())
        }
        (_, FieldValue::Object(handle)) => encode_object(handle.as_ref(), mask),
        (_, FieldValue::List(list)) => Value::Array(
            list.to_vec()
                .iter()
                .map(|handle| encode_object(Some(handle), mask))
                .collect(),
        ),
        _ => Value::Null,
    }
}

impl PartialEq for ObjectInstance {
    fn eq(&self, other: &Self) -> bool {
        self.deep_eq(other)
    }
}

impl fmt::Debug for ObjectInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ObjectInstance");
        s.field("type", &self.type_name());
        if let Some(id) = self.id() {
            s.field("id", &id);
        }
        s.finish_non_exhaustive()
    }
}
