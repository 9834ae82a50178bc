//! External operation client.
//!
//! Task nodes reach the remote service only through [`OperationClient`]. The
//! graph treats each call as opaque: it hands over the operation kind, the
//! resource collection, the resolved identifier and the payload, and gets back
//! either a JSON value or a typed [`ClientError`]. Retries and backoff are the
//! client's business.
//!
//! [`InMemoryClient`] keeps resources in a map and is what the CLI and the
//! test suite run against.

use crate::core::task::{OperationKind, Payload};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Location used when a task does not name one.
pub const GLOBAL_LOCATION: &str = "global";

/// A single call to the external service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Which lifecycle operation to perform.
    pub kind: OperationKind,
    /// Resource collection, e.g. `product_sets`.
    pub resource: String,
    /// Target location/region, if the task names one.
    pub location: Option<String>,
    /// Resolved resource identifier. `None` only for Create with a generated id.
    pub resource_id: Option<String>,
    /// Opaque attributes for the operation.
    pub payload: Payload,
}

/// Typed failures reported by the external service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("{resource}/{id} already exists")]
    AlreadyExists { resource: String, id: String },

    #[error("{resource}/{id} not found")]
    NotFound { resource: String, id: String },

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Contract for the remote side of a task.
///
/// Create resolves to the identifier of the resource as a JSON string.
/// Get and Update resolve to the resource representation. Delete resolves to
/// `null`.
#[async_trait]
pub trait OperationClient: Send + Sync {
    async fn call(&self, request: &OperationRequest) -> Result<Value, ClientError>;
}

type ResourceKey = (String, String, String);

/// Map-backed client.
///
/// Resources are keyed by `(location, resource, id)`. Failures can be injected
/// per `(kind, resource)` pair and every call can be delayed to exercise
/// concurrency.
#[derive(Debug, Default)]
pub struct InMemoryClient {
    resources: Mutex<HashMap<ResourceKey, Value>>,
    history: Mutex<Vec<OperationRequest>>,
    failures: HashSet<(OperationKind, String)>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every `kind` call on `resource`.
    pub fn with_failure(mut self, kind: OperationKind, resource: &str) -> Self {
        self.failures.insert((kind, resource.to_string()));
        self
    }

    /// Sleep for `latency` before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of calls received so far, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests in the order they reached the client.
    pub async fn history(&self) -> Vec<OperationRequest> {
        self.history.lock().await.clone()
    }

    /// Number of live resources in a collection across all locations.
    pub async fn resource_count(&self, resource: &str) -> usize {
        self.resources
            .lock()
            .await
            .keys()
            .filter(|(_, r, _)| r == resource)
            .count()
    }

    /// Look up a stored resource.
    pub async fn resource(&self, location: &str, resource: &str, id: &str) -> Option<Value> {
        let key = (location.to_string(), resource.to_string(), id.to_string());
        self.resources.lock().await.get(&key).cloned()
    }

    fn missing_id(request: &OperationRequest) -> ClientError {
        ClientError::Rejected(format!(
            "{} on {} requires a resource id",
            request.kind, request.resource
        ))
    }
}

#[async_trait]
impl OperationClient for InMemoryClient {
    async fn call(&self, request: &OperationRequest) -> Result<Value, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history.lock().await.push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self
            .failures
            .contains(&(request.kind, request.resource.clone()))
        {
            return Err(ClientError::Rejected(format!(
                "injected failure for {} on {}",
                request.kind, request.resource
            )));
        }

        let location = request
            .location
            .clone()
            .unwrap_or_else(|| GLOBAL_LOCATION.to_string());
        let mut resources = self.resources.lock().await;

        match request.kind {
            OperationKind::Create => {
                let id = request
                    .resource_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
                let key = (location.clone(), request.resource.clone(), id.clone());
                if resources.contains_key(&key) {
                    return Err(ClientError::AlreadyExists {
                        resource: request.resource.clone(),
                        id,
                    });
                }

                let mut body = request.payload.clone();
                body.insert(
                    "name".to_string(),
                    Value::String(format!(
                        "locations/{}/{}/{}",
                        location, request.resource, id
                    )),
                );
                resources.insert(key, Value::Object(body));
                Ok(Value::String(id))
            }
            OperationKind::Get => {
                let id = request
                    .resource_id
                    .clone()
                    .ok_or_else(|| Self::missing_id(request))?;
                let key = (location, request.resource.clone(), id.clone());
                resources.get(&key).cloned().ok_or(ClientError::NotFound {
                    resource: request.resource.clone(),
                    id,
                })
            }
            OperationKind::Update => {
                let id = request
                    .resource_id
                    .clone()
                    .ok_or_else(|| Self::missing_id(request))?;
                let key = (location, request.resource.clone(), id.clone());
                let current = resources.get_mut(&key).ok_or(ClientError::NotFound {
                    resource: request.resource.clone(),
                    id,
                })?;
                if let Value::Object(fields) = current {
                    for (field, value) in &request.payload {
                        fields.insert(field.clone(), value.clone());
                    }
                }
                Ok(current.clone())
            }
            OperationKind::Delete => {
                let id = request
                    .resource_id
                    .clone()
                    .ok_or_else(|| Self::missing_id(request))?;
                let key = (location, request.resource.clone(), id.clone());
                match resources.remove(&key) {
                    Some(_) => Ok(Value::Null),
                    None => Err(ClientError::NotFound {
                        resource: request.resource.clone(),
                        id,
                    }),
                }
            }
        }
    }
}
