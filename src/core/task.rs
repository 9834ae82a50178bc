//! Task data model for the operation graph.
//!
//! A task performs exactly one lifecycle operation against the external
//! client. Its resource identifier is either known up front, read from an
//! upstream task's recorded output, or left for the service to generate on
//! Create.

use crate::client::{ClientError, OperationClient, OperationRequest};
use crate::core::store::ResultStore;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Opaque attributes handed to the operation.
pub type Payload = serde_json::Map<String, Value>;

/// Lifecycle operation performed by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Get,
    Update,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Get => write!(f, "get"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "get" => Ok(Self::Get),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::Validation(format!(
                "unknown operation kind: {}",
                other
            ))),
        }
    }
}

/// Where a task gets its resource identifier from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source", content = "value")]
pub enum ResourceId {
    /// Identifier known when the graph is built.
    Literal(String),
    /// Output of the named task, read from the result store at run time.
    Reference(String),
    /// Left to the service. Only meaningful for Create.
    Generated,
}

impl ResourceId {
    /// Name of the referenced task, if any.
    pub fn reference(&self) -> Option<&str> {
        match self {
            ResourceId::Reference(task) => Some(task),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceId::Literal(id) => write!(f, "{}", id),
            ResourceId::Reference(task) => write!(f, "<output of {}>", task),
            ResourceId::Generated => write!(f, "<generated>"),
        }
    }
}

/// Final state of a task after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskOutcome {
    /// The operation ran and its output was recorded.
    Succeeded { output: Value },
    /// The operation was attempted and failed.
    Failed { error: String },
    /// Not executed because an upstream task failed.
    Skipped { upstream: String },
    /// Not started before the run was cancelled.
    Cancelled,
}

impl TaskOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }

    /// True if the task's operation never ran.
    pub fn is_skipped(&self) -> bool {
        matches!(self, TaskOutcome::Skipped { .. })
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Succeeded { .. } => write!(f, "succeeded"),
            TaskOutcome::Failed { error } => write!(f, "failed: {}", error),
            TaskOutcome::Skipped { upstream } => write!(f, "skipped: {} failed", upstream),
            TaskOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single unit of work in the graph.
///
/// Built once through the constructors and `with_*` methods, then handed to
/// the graph, which never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique name within the graph. Other tasks reference it by this name.
    pub name: String,
    /// The operation to perform.
    pub kind: OperationKind,
    /// Resource collection the operation targets.
    pub resource: String,
    /// Identifier of the targeted resource.
    pub resource_id: ResourceId,
    /// Attributes passed to the operation.
    #[serde(default)]
    pub payload: Payload,
    /// Target location/region.
    #[serde(default)]
    pub location: Option<String>,
    /// Upper bound on the external call.
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl TaskNode {
    pub fn new(name: &str, kind: OperationKind, resource: &str, resource_id: ResourceId) -> Self {
        Self {
            name: name.to_string(),
            kind,
            resource: resource.to_string(),
            resource_id,
            payload: Payload::new(),
            location: None,
            timeout: None,
        }
    }

    /// Create with a service-generated identifier. Pin one with [`with_id`](Self::with_id).
    pub fn create(name: &str, resource: &str) -> Self {
        Self::new(name, OperationKind::Create, resource, ResourceId::Generated)
    }

    pub fn get(name: &str, resource: &str, resource_id: ResourceId) -> Self {
        Self::new(name, OperationKind::Get, resource, resource_id)
    }

    pub fn update(name: &str, resource: &str, resource_id: ResourceId) -> Self {
        Self::new(name, OperationKind::Update, resource, resource_id)
    }

    pub fn delete(name: &str, resource: &str, resource_id: ResourceId) -> Self {
        Self::new(name, OperationKind::Delete, resource, resource_id)
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = ResourceId::Literal(id.to_string());
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Set a single payload attribute.
    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve the identifier this task operates on.
    ///
    /// References are read from `store`; the referenced output must be a
    /// JSON string.
    ///
    /// # Errors
    /// - [`Error::UnresolvedReference`] if the referenced task has no record yet
    /// - [`Error::Validation`] if the recorded output is not a string, or a
    ///   non-Create task has a generated identifier
    pub async fn resolve_id(&self, store: &ResultStore) -> Result<Option<String>> {
        match &self.resource_id {
            ResourceId::Literal(id) => Ok(Some(id.clone())),
            ResourceId::Generated if self.kind == OperationKind::Create => Ok(None),
            ResourceId::Generated => Err(Error::Validation(format!(
                "task {} needs a resource id for {}",
                self.name, self.kind
            ))),
            ResourceId::Reference(upstream) => {
                let value = store.get(upstream).await.map_err(|err| match err {
                    Error::NotFound(_) => Error::UnresolvedReference {
                        task: self.name.clone(),
                        reference: upstream.clone(),
                    },
                    other => other,
                })?;
                match value {
                    Value::String(id) => Ok(Some(id)),
                    other => Err(Error::Validation(format!(
                        "task {} expected a resource id from {}, got {}",
                        self.name, upstream, other
                    ))),
                }
            }
        }
    }

    /// Run the operation and return its output.
    ///
    /// Create is idempotent: if the service reports the explicit id already
    /// exists, the task succeeds with that id. The caller records the output
    /// in the store; this method only reads from it.
    pub async fn execute(&self, store: &ResultStore, client: &dyn OperationClient) -> Result<Value> {
        let resource_id = self.resolve_id(store).await?;
        let request = OperationRequest {
            kind: self.kind,
            resource: self.resource.clone(),
            location: self.location.clone(),
            resource_id: resource_id.clone(),
            payload: self.payload.clone(),
        };

        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, client.call(&request))
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => client.call(&request).await,
        };

        match (self.kind, response) {
            (OperationKind::Create, Err(ClientError::AlreadyExists { id, .. })) => {
                tracing::info!(
                    task = %self.name,
                    resource = %self.resource,
                    id = %id,
                    "resource already exists, treating create as done"
                );
                Ok(Value::String(id))
            }
            (OperationKind::Create, Ok(Value::String(id))) => Ok(Value::String(id)),
            (OperationKind::Create, Ok(other)) => match resource_id {
                Some(id) => Ok(Value::String(id)),
                None => Err(Error::Validation(format!(
                    "create in task {} returned no resource id: {}",
                    self.name, other
                ))),
            },
            (OperationKind::Delete, Ok(_)) => Ok(Value::Null),
            (_, Ok(value)) => Ok(value),
            (_, Err(source)) => Err(Error::OperationFailed {
                task: self.name.clone(),
                source,
            }),
        }
    }
}
