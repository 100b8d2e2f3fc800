//! Environments and the process-wide environment registry.
//!
//! An [`Environment`] binds one schema's type tables, one [`NodeStore`] and
//! one [`Transport`] under a name. Every operation runs in exactly one
//! environment; nodes are shared between the operations of an environment
//! and never across environments.
//!
//! Environments are registered explicitly:
//!
//! ```
//! use lattice_graphql::environment::{self, Environment};
//! use lattice_graphql::protocol::{ProtocolClient, ProtocolConfig};
//! use lattice_graphql::schema::{ObjectType, Schema};
//! use std::sync::Arc;
//!
//! let schema = Schema::builder().object(ObjectType::new("Query")).build().unwrap();
//! let transport = Arc::new(ProtocolClient::new(ProtocolConfig::new("ws://localhost:4000/graphql")));
//! let env = Environment::new("docs-main", schema, transport);
//!
//! environment::register(env.clone()).unwrap();
//! assert!(environment::get("docs-main").is_some());
//! environment::unregister("docs-main");
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use lattice_graphql_core::logging::targets;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{DeserializeError, EnvironmentError, Result};
use crate::ids::{NodeId, OperationId};
use crate::merge::Merger;
use crate::object::{ObjectHandle, ObjectInstance};
use crate::operation::{OperationDefinition, OperationHandler};
use crate::schema::Schema;
use crate::selection::SelectionMask;
use crate::store::NodeStore;
use crate::transport::Transport;

/// A schema, its node store and its transport.
pub struct Environment {
    name: String,
    schema: Arc<Schema>,
    store: Mutex<NodeStore>,
    transport: Arc<dyn Transport>,
}

impl Environment {
    /// Create an environment with an empty store.
    pub fn new(name: impl Into<String>, schema: Schema, transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::with_store(name, schema, transport, NodeStore::new())
    }

    /// Create an environment around an existing store.
    pub fn with_store(
        name: impl Into<String>,
        schema: Schema,
        transport: Arc<dyn Transport>,
        store: NodeStore,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            schema: Arc::new(schema),
            store: Mutex::new(store),
            transport,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run `f` with exclusive access to the store.
    ///
    /// Do not fire notifications from `f`: observers may read the store.
    pub fn with_store_mut<R>(&self, f: impl FnOnce(&mut NodeStore) -> R) -> R {
        f(&mut self.store.lock())
    }

    /// Non-owning node lookup.
    pub fn lookup(&self, id: &NodeId) -> Option<Arc<ObjectInstance>> {
        self.store.lock().lookup(id)
    }

    /// Number of cached nodes.
    pub fn node_count(&self) -> usize {
        self.store.lock().len()
    }

    /// Merge an object payload of type `type_name` for `operation_id`
    /// outside of any operation handler, then notify observers.
    ///
    /// Nodes reached are retained for `operation_id`; the caller releases
    /// them with [`release`](Self::release).
    pub fn merge(
        &self,
        operation_id: OperationId,
        type_name: &str,
        payload: &Value,
        mask: &SelectionMask,
    ) -> Result<ObjectHandle> {
        let object_type = self
            .schema
            .object(type_name)
            .ok_or_else(|| DeserializeError::UnknownType(type_name.to_string()))?
            .clone();
        let (result, outcome) = {
            let mut store = self.store.lock();
            let mut merger = Merger::new(&mut store, &self.schema, operation_id);
            let result = merger.merge_object(&object_type, None, payload, mask);
            (result, merger.finish())
        };
        outcome.notify();
        Ok(result?)
    }

    /// Release a node retained for `operation_id`.
    pub fn release(&self, id: &NodeId, operation_id: OperationId) {
        self.store.lock().release(id, operation_id);
    }

    /// Create a handler for an operation in this environment.
    pub fn operation(self: &Arc<Self>, definition: OperationDefinition) -> Result<Arc<OperationHandler>> {
        OperationHandler::new(self.clone(), definition)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.name)
            .field("nodes", &self.node_count())
            .finish()
    }
}

static REGISTRY: Mutex<Option<HashMap<String, Arc<Environment>>>> = Mutex::new(None);

/// Register an environment under its name.
pub fn register(environment: Arc<Environment>) -> std::result::Result<(), EnvironmentError> {
    let mut guard = REGISTRY.lock();
    let registry = guard.get_or_insert_with(HashMap::new);
    if registry.contains_key(environment.name()) {
        return Err(EnvironmentError::AlreadyRegistered(environment.name().to_string()));
    }
    tracing::debug!(target: targets::ENVIRONMENT, name = environment.name(), "registered environment");
    registry.insert(environment.name().to_string(), environment);
    Ok(())
}

/// Look up a registered environment.
pub fn get(name: &str) -> Option<Arc<Environment>> {
    REGISTRY.lock().as_ref().and_then(|r| r.get(name).cloned())
}

/// Look up a registered environment, failing if it is absent.
pub fn get_strict(name: &str) -> std::result::Result<Arc<Environment>, EnvironmentError> {
    get(name).ok_or_else(|| EnvironmentError::NotFound(name.to_string()))
}

/// Remove an environment from the registry.
pub fn unregister(name: &str) -> Option<Arc<Environment>> {
    let removed = REGISTRY.lock().as_mut().and_then(|r| r.remove(name));
    if removed.is_some() {
        tracing::debug!(target: targets::ENVIRONMENT, name, "unregistered environment");
    }
    removed
}
