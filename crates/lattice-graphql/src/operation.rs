//! Operation lifecycle.
//!
//! An [`OperationHandler`] owns one query, mutation or subscription of an
//! [`Environment`]. Each [`execute`](OperationHandler::execute) allocates a
//! fresh [`OperationId`], which tags every frame the transport routes back
//! and every node the handler's merges retain. Frames for an id that was
//! superseded by a later execution, or dropped by
//! [`dispose`](OperationHandler::dispose), are ignored.
//!
//! ```text
//! Idle ──execute──▶ Sent ──next──▶ Streaming ──complete──▶ Completed
//!                     │                │
//!                     └────error───────┴──────────────────▶ Failed
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lattice_graphql::environment;
//! use lattice_graphql::operation::OperationDefinition;
//! use lattice_graphql::selection::SelectionMask;
//! use serde_json::json;
//!
//! # fn run() -> lattice_graphql::Result<()> {
//! let env = environment::get_strict("main")?;
//! let definition = OperationDefinition::query(
//!     "GetUser",
//!     "query GetUser($id: ID!) { user(id: $id) { id name } }",
//!     "Query",
//! )
//! .mask(SelectionMask::new().select_with("user", SelectionMask::fields(["id", "name"])))
//! .required_variable("id");
//!
//! let handler = env.operation(definition)?;
//! handler.data_changed.connect(|_| println!("user updated"));
//! handler.execute(json!({"id": "42"}))?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use lattice_graphql_core::Signal;
use lattice_graphql_core::logging::targets;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::environment::Environment;
use crate::error::{Error, OperationError, Result, SchemaError, TransportError};
use crate::ids::{NodeId, OperationId};
use crate::merge::{MergeOutcome, Merger};
use crate::object::ObjectInstance;
use crate::protocol::{GraphQLError, GraphQLRequest, GraphQLResponse, OperationType};
use crate::schema::ObjectType;
use crate::selection::SelectionMask;
use crate::transport::OperationSink;

/// Everything the runtime needs to know about one operation document.
///
/// Produced by a code generator, usually as a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDefinition {
    /// The operation name, sent as `operationName` when not empty.
    pub name: String,
    pub kind: OperationType,
    /// The GraphQL document text.
    pub document: String,
    /// The object type of the result's root.
    pub root_type: String,
    /// Fields the document selects.
    #[serde(default)]
    pub mask: SelectionMask,
    /// Variables that must be bound to a non-null value.
    #[serde(default)]
    pub variables: Vec<String>,
}

impl OperationDefinition {
    pub fn new(
        name: impl Into<String>,
        kind: OperationType,
        document: impl Into<String>,
        root_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            document: document.into(),
            root_type: root_type.into(),
            mask: SelectionMask::new(),
            variables: Vec::new(),
        }
    }

    pub fn query(name: impl Into<String>, document: impl Into<String>, root_type: impl Into<String>) -> Self {
        Self::new(name, OperationType::Query, document, root_type)
    }

    pub fn mutation(name: impl Into<String>, document: impl Into<String>, root_type: impl Into<String>) -> Self {
        Self::new(name, OperationType::Mutation, document, root_type)
    }

    pub fn subscription(name: impl Into<String>, document: impl Into<String>, root_type: impl Into<String>) -> Self {
        Self::new(name, OperationType::Subscription, document, root_type)
    }

    pub fn mask(mut self, mask: SelectionMask) -> Self {
        self.mask = mask;
        self
    }

    pub fn required_variable(mut self, name: impl Into<String>) -> Self {
        self.variables.push(name.into());
        self
    }

    /// Check `variables` against the required list.
    ///
    /// `null` stands for "no variables".
    pub fn bind_variables(&self, variables: Value) -> Result<Value> {
        let map = match variables {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            _ => return Err(OperationError::VariablesNotObject.into()),
        };
        for name in &self.variables {
            if map.get(name).is_none_or(Value::is_null) {
                return Err(OperationError::MissingVariable(name.clone()).into());
            }
        }
        Ok(Value::Object(map))
    }

    /// The request payload for one execution.
    pub fn request(&self, variables: Value) -> GraphQLRequest {
        let request = GraphQLRequest::new(self.document.clone(), self.kind).variables(variables);
        if self.name.is_empty() {
            request
        } else {
            request.operation_name(self.name.clone())
        }
    }
}

/// Where an operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationState {
    /// Never executed, or disposed.
    #[default]
    Idle,
    /// Handed to the transport; no result yet.
    Sent,
    /// At least one result merged.
    Streaming,
    /// The server completed the operation.
    Completed,
    /// Error frame, merge failure or transport failure.
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

struct Inner {
    state: OperationState,
    /// Execution whose frames are accepted.
    in_flight: Option<OperationId>,
    /// Latest execution.
    operation_id: Option<OperationId>,
    variables: Value,
    root: Option<Arc<ObjectInstance>>,
    /// Execution that produced `root`.
    root_operation: Option<OperationId>,
    /// Nodes retained by each execution's latest merge.
    retained: HashMap<OperationId, HashSet<NodeId>>,
    errors: Vec<GraphQLError>,
    last_error: Option<Error>,
}

impl Inner {
    fn transition(&mut self, state: OperationState, effects: &mut Effects) {
        if self.state != state {
            self.state = state;
            effects.state = Some(state);
        }
    }

    fn fail(&mut self, error: Error, effects: &mut Effects) {
        self.in_flight = None;
        self.last_error = Some(error.clone());
        self.transition(OperationState::Failed, effects);
        effects.error = Some(error);
    }
}

/// Work left over once the handler and store locks are released.
#[derive(Default)]
struct Effects {
    outcome: Option<MergeOutcome>,
    unsubscribe: Option<OperationId>,
    state: Option<OperationState>,
    data_changed: bool,
    error: Option<Error>,
    completed: bool,
}

/// Drives one operation and owns its result.
pub struct OperationHandler {
    environment: Arc<Environment>,
    definition: OperationDefinition,
    root_type: Arc<ObjectType>,
    self_ref: Weak<OperationHandler>,
    inner: Mutex<Inner>,

    /// Emitted with the new state on every transition.
    pub state_changed: Signal<OperationState>,
    /// Emitted after a result was merged into the root.
    pub data_changed: Signal<()>,
    /// Emitted when the server completes the operation.
    pub completed: Signal<()>,
    /// Emitted when the operation fails.
    pub error: Signal<Error>,
}

impl OperationHandler {
    pub fn new(environment: Arc<Environment>, definition: OperationDefinition) -> Result<Arc<Self>> {
        let root_type = environment
            .schema()
            .object(&definition.root_type)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownType {
                owner: definition.name.clone(),
                referenced: definition.root_type.clone(),
            })?;

        Ok(Arc::new_cyclic(|self_ref| Self {
            environment,
            definition,
            root_type,
            self_ref: self_ref.clone(),
            inner: Mutex::new(Inner {
                state: OperationState::Idle,
                in_flight: None,
                operation_id: None,
                variables: Value::Object(Map::new()),
                root: None,
                root_operation: None,
                retained: HashMap::new(),
                errors: Vec::new(),
                last_error: None,
            }),
            state_changed: Signal::new(),
            data_changed: Signal::new(),
            completed: Signal::new(),
            error: Signal::new(),
        }))
    }

    pub fn definition(&self) -> &OperationDefinition {
        &self.definition
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// Send the operation with `variables`, superseding any execution in flight.
    ///
    /// Returns the id of the new execution. Fails synchronously when a
    /// required variable is missing or null; fails the operation when the
    /// transport refuses it.
    pub fn execute(&self, variables: Value) -> Result<OperationId> {
        let variables = self.definition.bind_variables(variables)?;
        let request = self.definition.request(variables.clone());
        let operation_id = OperationId::new();

        let mut effects = Effects::default();
        let previous = {
            let mut inner = self.inner.lock();
            inner.variables = variables;
            inner.operation_id = Some(operation_id);
            inner.errors.clear();
            inner.last_error = None;
            inner.transition(OperationState::Sent, &mut effects);
            inner.in_flight.replace(operation_id)
        };

        tracing::debug!(
            target: targets::OPERATION,
            operation = %self.definition.name,
            %operation_id,
            superseded = ?previous,
            "executing"
        );

        let transport = self.environment.transport();
        if let Some(previous) = previous {
            transport.unsubscribe(previous);
        }
        let sink: Weak<dyn OperationSink> = self.self_ref.clone();
        if let Err(error) = transport.subscribe(operation_id, request, sink) {
            tracing::warn!(target: targets::OPERATION, %operation_id, %error, "transport refused operation");
            let error = Error::from(error);
            {
                let mut inner = self.inner.lock();
                if inner.in_flight == Some(operation_id) {
                    inner.fail(error.clone(), &mut effects);
                }
            }
            self.apply(effects);
            return Err(error);
        }

        self.apply(effects);
        Ok(operation_id)
    }

    /// Execute again with the current variables.
    pub fn refetch(&self) -> Result<OperationId> {
        let variables = self.inner.lock().variables.clone();
        self.execute(variables)
    }

    /// Stop the operation and release every node it retained.
    ///
    /// Idempotent. Runs on drop.
    pub fn dispose(&self) {
        let mut effects = Effects::default();
        let (in_flight, retained) = {
            let mut inner = self.inner.lock();
            inner.root = None;
            inner.root_operation = None;
            inner.operation_id = None;
            inner.errors.clear();
            inner.last_error = None;
            inner.transition(OperationState::Idle, &mut effects);
            (inner.in_flight.take(), std::mem::take(&mut inner.retained))
        };

        if let Some(operation_id) = in_flight {
            self.environment.transport().unsubscribe(operation_id);
        }
        if !retained.is_empty() {
            let keep = HashSet::new();
            self.environment.with_store_mut(|store| {
                for (operation_id, ids) in retained {
                    store.release_all(ids, operation_id, &keep);
                }
            });
            tracing::debug!(target: targets::OPERATION, operation = %self.definition.name, "disposed");
        }
        self.apply(effects);
    }

    pub fn state(&self) -> OperationState {
        self.inner.lock().state
    }

    /// The result root.
    pub fn data(&self) -> Result<Arc<ObjectInstance>> {
        self.inner
            .lock()
            .root
            .clone()
            .ok_or_else(|| OperationError::NoData(self.definition.name.clone()).into())
    }

    /// Errors carried by the latest result or error frame.
    pub fn errors(&self) -> Vec<GraphQLError> {
        self.inner.lock().errors.clone()
    }

    /// The error that failed the operation.
    pub fn last_error(&self) -> Option<Error> {
        self.inner.lock().last_error.clone()
    }

    /// The latest execution's id.
    pub fn operation_id(&self) -> Option<OperationId> {
        self.inner.lock().operation_id
    }

    pub fn variables(&self) -> Value {
        self.inner.lock().variables.clone()
    }

    /// Nodes currently retained by this operation's executions.
    pub fn retained_nodes(&self) -> HashSet<NodeId> {
        self.inner.lock().retained.values().flatten().cloned().collect()
    }

    fn apply(&self, effects: Effects) {
        if let Some(outcome) = effects.outcome {
            outcome.notify();
        }
        if let Some(operation_id) = effects.unsubscribe {
            self.environment.transport().unsubscribe(operation_id);
        }
        if let Some(state) = effects.state {
            self.state_changed.emit(state);
        }
        if effects.data_changed {
            self.data_changed.emit(());
        }
        if let Some(error) = effects.error {
            self.error.emit(error);
        }
        if effects.completed {
            self.completed.emit(());
        }
    }

    fn merge(&self, inner: &mut Inner, operation_id: OperationId, data: &Value, effects: &mut Effects) {
        let first = inner.root_operation != Some(operation_id);
        let current = if first { None } else { inner.root.clone() };
        let environment = &self.environment;

        let result = environment.with_store_mut(|store| {
            let mut merger = Merger::new(store, environment.schema(), operation_id);
            let result = merger.merge_root(&self.root_type, current.as_ref(), data, &self.definition.mask);
            let outcome = merger.finish();

            if result.is_ok() {
                let touched = outcome.touched().clone();
                if let Some(previous) = inner.retained.get(&operation_id) {
                    let stale: Vec<NodeId> = previous.difference(&touched).cloned().collect();
                    store.release_all(stale, operation_id, &touched);
                }
                if first {
                    let empty = HashSet::new();
                    let superseded: Vec<OperationId> =
                        inner.retained.keys().filter(|id| **id != operation_id).copied().collect();
                    for old in superseded {
                        if let Some(ids) = inner.retained.remove(&old) {
                            store.release_all(ids, old, &empty);
                        }
                    }
                }
                inner.retained.insert(operation_id, touched);
            } else {
                inner
                    .retained
                    .entry(operation_id)
                    .or_default()
                    .extend(outcome.touched().iter().cloned());
            }
            effects.outcome = Some(outcome);
            result
        });

        match result {
            Ok(root) => {
                inner.root = Some(root);
                inner.root_operation = Some(operation_id);
                effects.data_changed = true;
            }
            Err(error) => {
                tracing::warn!(
                    target: targets::OPERATION,
                    operation = %self.definition.name,
                    %operation_id,
                    %error,
                    "could not merge result"
                );
                effects.unsubscribe = Some(operation_id);
                inner.fail(error.into(), effects);
            }
        }
    }

    /// Lock the handler if `operation_id` is the execution in flight.
    fn accept(&self, operation_id: OperationId) -> Option<parking_lot::MutexGuard<'_, Inner>> {
        let inner = self.inner.lock();
        if inner.in_flight == Some(operation_id) {
            Some(inner)
        } else {
            tracing::trace!(target: targets::OPERATION, %operation_id, "dropping frame for superseded execution");
            None
        }
    }
}

impl OperationSink for OperationHandler {
    fn on_next(&self, operation_id: OperationId, response: GraphQLResponse) {
        let mut effects = Effects::default();
        {
            let Some(mut inner) = self.accept(operation_id) else {
                return;
            };
            if response.has_errors() {
                tracing::debug!(
                    target: targets::OPERATION,
                    %operation_id,
                    count = response.errors.len(),
                    "result carries errors"
                );
            }
            inner.errors = response.errors;
            match &response.data {
                Some(data) if !data.is_null() => self.merge(&mut inner, operation_id, data, &mut effects),
                _ => {}
            }
            if inner.in_flight == Some(operation_id) {
                inner.transition(OperationState::Streaming, &mut effects);
            }
        }
        self.apply(effects);
    }

    fn on_error(&self, operation_id: OperationId, errors: Vec<GraphQLError>) {
        let mut effects = Effects::default();
        {
            let Some(mut inner) = self.accept(operation_id) else {
                return;
            };
            tracing::debug!(target: targets::OPERATION, %operation_id, count = errors.len(), "operation failed");
            inner.errors = errors.clone();
            inner.fail(Error::GraphQL(errors), &mut effects);
        }
        self.apply(effects);
    }

    fn on_complete(&self, operation_id: OperationId) {
        let mut effects = Effects::default();
        {
            let Some(mut inner) = self.accept(operation_id) else {
                return;
            };
            tracing::debug!(target: targets::OPERATION, %operation_id, "operation completed");
            inner.in_flight = None;
            inner.transition(OperationState::Completed, &mut effects);
            effects.completed = true;
        }
        self.apply(effects);
    }

    fn on_transport_failed(&self, operation_id: OperationId, error: &TransportError) {
        let mut effects = Effects::default();
        {
            let Some(mut inner) = self.accept(operation_id) else {
                return;
            };
            tracing::warn!(target: targets::OPERATION, %operation_id, %error, "transport gave up");
            inner.fail(error.clone().into(), &mut effects);
        }
        self.apply(effects);
    }
}

impl Drop for OperationHandler {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for OperationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("OperationHandler")
            .field("name", &self.definition.name)
            .field("state", &inner.state)
            .field("operation_id", &inner.operation_id)
            .finish()
    }
}
