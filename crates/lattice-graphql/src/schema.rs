//! Runtime type tables.
//!
//! A [`Schema`] holds the object types an environment can materialize and
//! the dispatch table that maps each abstract type (interface or union) to
//! its concrete types. Generated code builds one per GraphQL schema with
//! [`SchemaBuilder`].
//!
//! # Example
//!
//! ```
//! use lattice_graphql::schema::{FieldType, ObjectType, Schema};
//!
//! let schema = Schema::builder()
//!     .object(ObjectType::node("User").field("name", FieldType::string()))
//!     .object(ObjectType::new("Query").nullable("user", FieldType::object("User")))
//!     .build()
//!     .unwrap();
//!
//! assert!(schema.object("User").unwrap().implements_node());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DeserializeError, SchemaError};
use crate::scalars::{CustomScalar, EnumType, ScalarType};

/// Name of the field carrying a node's identity.
pub const ID_FIELD: &str = "id";

/// Name of the polymorphic discriminator.
pub const TYPENAME_FIELD: &str = "__typename";

/// The type of a field.
#[derive(Debug, Clone)]
pub enum FieldType {
    /// Leaf value.
    Scalar(ScalarType),
    /// Concrete object type, by name.
    Object(Arc<str>),
    /// Interface or union, by name. Resolved through `__typename`.
    Abstract(Arc<str>),
    /// One-to-many field.
    List(Box<FieldType>),
}

impl FieldType {
    pub fn boolean() -> Self {
        Self::Scalar(ScalarType::Boolean)
    }

    pub fn int() -> Self {
        Self::Scalar(ScalarType::Int)
    }

    pub fn float() -> Self {
        Self::Scalar(ScalarType::Float)
    }

    pub fn string() -> Self {
        Self::Scalar(ScalarType::String)
    }

    pub fn id() -> Self {
        Self::Scalar(ScalarType::Id)
    }

    pub fn scalar(scalar: ScalarType) -> Self {
        Self::Scalar(scalar)
    }

    pub fn enumeration(enum_type: Arc<EnumType>) -> Self {
        Self::Scalar(ScalarType::Enum(enum_type))
    }

    pub fn custom(codec: Arc<dyn CustomScalar>) -> Self {
        Self::Scalar(ScalarType::Custom(codec))
    }

    pub fn object(name: &str) -> Self {
        Self::Object(Arc::from(name))
    }

    pub fn polymorphic(name: &str) -> Self {
        Self::Abstract(Arc::from(name))
    }

    pub fn list(item: FieldType) -> Self {
        Self::List(Box::new(item))
    }

    /// Element type of a list field, or the type itself.
    pub fn item(&self) -> &FieldType {
        match self {
            Self::List(inner) => inner.item(),
            other => other,
        }
    }

    /// Whether this is a list whose elements are objects.
    pub fn is_object_list(&self) -> bool {
        matches!(self, Self::List(_)) && !matches!(self.item(), Self::Scalar(_))
    }
}

/// One field of an object type.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: Arc<str>,
    pub field_type: FieldType,
    pub nullable: bool,
}

/// A concrete object type.
#[derive(Debug, Clone)]
pub struct ObjectType {
    name: Arc<str>,
    fields: Vec<FieldDef>,
    index: HashMap<Arc<str>, usize>,
    implements_node: bool,
}

impl ObjectType {
    /// A value type: instances are owned by their parent and never normalized.
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            fields: Vec::new(),
            index: HashMap::new(),
            implements_node: false,
        }
    }

    /// A node type with a non-null `id: ID!` field.
    pub fn node(name: &str) -> Self {
        let mut ty = Self::new(name);
        ty.implements_node = true;
        ty.push(ID_FIELD, FieldType::id(), false)
    }

    /// Add a non-null field.
    pub fn field(self, name: &str, field_type: FieldType) -> Self {
        self.push(name, field_type, false)
    }

    /// Add a nullable field.
    pub fn nullable(self, name: &str, field_type: FieldType) -> Self {
        self.push(name, field_type, true)
    }

    fn push(mut self, name: &str, field_type: FieldType, nullable: bool) -> Self {
        let name: Arc<str> = Arc::from(name);
        let def = FieldDef {
            name: name.clone(),
            field_type,
            nullable,
        };
        match self.index.get(&name) {
            Some(&i) => self.fields[i] = def,
            None => {
                self.index.insert(name, self.fields.len());
                self.fields.push(def);
            }
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether instances are normalized into the node store.
    pub fn implements_node(&self) -> bool {
        self.implements_node
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Position of a field.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Look up a field definition.
    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.field_index(name).map(|i| &self.fields[i])
    }
}

/// Type tables for one GraphQL schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: HashMap<Arc<str>, Arc<ObjectType>>,
    abstracts: HashMap<Arc<str>, HashMap<Arc<str>, Arc<ObjectType>>>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Look up a concrete type.
    pub fn object(&self, name: &str) -> Option<&Arc<ObjectType>> {
        self.types.get(name)
    }

    /// Whether `name` is an interface or union.
    pub fn is_abstract(&self, name: &str) -> bool {
        self.abstracts.contains_key(name)
    }

    /// Concrete type names of an abstract type.
    pub fn possible_types(&self, abstract_type: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .abstracts
            .get(abstract_type)
            .map(|members| members.keys().map(|k| k.as_ref()).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Resolve an abstract type through a `__typename` discriminator.
    pub fn resolve(
        &self,
        abstract_type: &str,
        type_name: &str,
    ) -> Result<&Arc<ObjectType>, DeserializeError> {
        let members = self
            .abstracts
            .get(abstract_type)
            .ok_or_else(|| DeserializeError::UnknownType(abstract_type.to_string()))?;
        members
            .get(type_name)
            .ok_or_else(|| DeserializeError::UnknownTypename {
                abstract_type: abstract_type.to_string(),
                type_name: type_name.to_string(),
            })
    }

    /// Look up a concrete type, as a merge error when missing.
    pub(crate) fn require(&self, name: &str) -> Result<&Arc<ObjectType>, DeserializeError> {
        self.object(name)
            .ok_or_else(|| DeserializeError::UnknownType(name.to_string()))
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<ObjectType>,
    abstracts: Vec<(String, Vec<String>)>,
}

impl SchemaBuilder {
    /// Add a concrete type.
    pub fn object(mut self, object_type: ObjectType) -> Self {
        self.types.push(object_type);
        self
    }

    /// Add an interface with its implementing types.
    pub fn interface<I, S>(self, name: &str, implementors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.abstract_type(name, implementors)
    }

    /// Add a union with its member types.
    pub fn union<I, S>(self, name: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.abstract_type(name, members)
    }

    fn abstract_type<I, S>(mut self, name: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.abstracts
            .push((name.to_string(), members.into_iter().map(Into::into).collect()));
        self
    }

    /// Check that every referenced type exists and build the tables.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut types: HashMap<Arc<str>, Arc<ObjectType>> = HashMap::new();
        for ty in self.types {
            let name = ty.name.clone();
            if types.insert(name.clone(), Arc::new(ty)).is_some() {
                return Err(SchemaError::DuplicateType(name.to_string()));
            }
        }

        let mut abstracts = HashMap::new();
        for (name, members) in self.abstracts {
            if types.contains_key(name.as_str()) {
                return Err(SchemaError::DuplicateType(name));
            }
            let mut table = HashMap::new();
            for member in members {
                let ty = types.get(member.as_str()).ok_or_else(|| SchemaError::UnknownType {
                    owner: name.clone(),
                    referenced: member.clone(),
                })?;
                table.insert(ty.name.clone(), ty.clone());
            }
            if abstracts.insert(Arc::<str>::from(name.as_str()), table).is_some() {
                return Err(SchemaError::DuplicateType(name));
            }
        }

        for ty in types.values() {
            for field in &ty.fields {
                let missing = match field.field_type.item() {
                    FieldType::Object(target) => !types.contains_key(target),
                    FieldType::Abstract(target) => !abstracts.contains_key(target),
                    _ => false,
                };
                if missing {
                    let referenced = match field.field_type.item() {
                        FieldType::Object(t) | FieldType::Abstract(t) => t.to_string(),
                        _ => String::new(),
                    };
                    return Err(SchemaError::UnknownType {
                        owner: ty.name.to_string(),
                        referenced,
                    });
                }
            }
        }

        Ok(Schema { types, abstracts })
    }
}
