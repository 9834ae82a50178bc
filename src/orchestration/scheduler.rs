//! Scheduler for dependency-ordered task execution.
//!
//! The Scheduler walks a [`TaskGraph`], starting every task whose upstream
//! tasks have all succeeded, up to a concurrency limit. Outputs go into a
//! fresh [`ResultStore`] for each run. A failed task causes everything
//! reachable from it to be skipped while unrelated branches keep going.

use crate::client::OperationClient;
use crate::core::dag::TaskGraph;
use crate::core::store::ResultStore;
use crate::core::task::TaskOutcome;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events emitted by the scheduler for task lifecycle changes.
///
/// These events allow external components (like the CLI) to report
/// progress without polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A task's operation has been started.
    TaskStarted {
        /// The task that was started.
        task: String,
    },
    /// A task completed and its output was recorded.
    TaskSucceeded {
        /// The task that completed.
        task: String,
    },
    /// A task's operation failed.
    TaskFailed {
        /// The task that failed.
        task: String,
        /// Error message describing the failure.
        error: String,
    },
    /// A task will not run because an upstream task failed.
    TaskSkipped {
        /// The skipped task.
        task: String,
        /// The failed task that caused the skip.
        upstream: String,
    },
    /// No task is running and none will be started.
    RunFinished {
        /// Whether the run stopped because of cancellation.
        cancelled: bool,
    },
}

/// Unique identifier for a single run of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new unique run identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Identifier of this run.
    pub run_id: RunId,
    /// Final outcome per task.
    pub outcomes: BTreeMap<String, TaskOutcome>,
    /// Tasks in the order their operations were started.
    pub started: Vec<String>,
    /// Tasks in the order their operations finished (succeeded or failed).
    pub finished: Vec<String>,
    /// Whether the run was cancelled before every task was settled.
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Outcome of a single task.
    pub fn outcome(&self, task: &str) -> Option<&TaskOutcome> {
        self.outcomes.get(task)
    }

    /// Output recorded for a task that succeeded.
    pub fn output(&self, task: &str) -> Option<&Value> {
        match self.outcomes.get(task) {
            Some(TaskOutcome::Succeeded { output }) => Some(output),
            _ => None,
        }
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.filter(|o| matches!(o, TaskOutcome::Succeeded { .. }))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.filter(|o| matches!(o, TaskOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.filter(|o| matches!(o, TaskOutcome::Skipped { .. }))
    }

    /// True if every task succeeded.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.outcomes.values().all(TaskOutcome::is_succeeded)
    }

    fn filter(&self, pred: impl Fn(&TaskOutcome) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| pred(outcome))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Scheduler for parallel task execution.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
/// use opgraph::client::InMemoryClient;
/// use opgraph::orchestration::Scheduler;
///
/// let scheduler = Scheduler::new(graph, Arc::new(InMemoryClient::new()), 4);
/// let report = scheduler.run(CancellationToken::new()).await?;
/// assert!(report.is_success());
/// ```
pub struct Scheduler {
    /// The task dependency graph.
    graph: Arc<TaskGraph>,
    /// Client every task calls out to.
    client: Arc<dyn OperationClient>,
    /// Maximum number of operations in flight.
    max_concurrent: usize,
    /// Channel for emitting scheduler events.
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl Scheduler {
    /// Create a new scheduler.
    ///
    /// A `max_concurrent` of zero is treated as one.
    pub fn new(graph: TaskGraph, client: Arc<dyn OperationClient>, max_concurrent: usize) -> Self {
        Self {
            graph: Arc::new(graph),
            client,
            max_concurrent: max_concurrent.max(1),
            event_tx: None,
        }
    }

    /// Emit lifecycle events on `event_tx`.
    pub fn with_events(mut self, event_tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    async fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Run every task in the graph once.
    ///
    /// Task failures, panics included, do not make this return an error; they
    /// show up in the report as [`TaskOutcome::Failed`]. Cancelling `cancel`
    /// stops new tasks from starting, waits for running ones, and marks the
    /// rest [`TaskOutcome::Cancelled`].
    ///
    /// # Errors
    /// Returns the validation error if the graph is invalid.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport> {
        self.graph.validate()?;

        let run_id = RunId::new();
        let started_at = Utc::now();
        let store = ResultStore::new();
        let order: Vec<String> = self
            .graph
            .topological_order()?
            .into_iter()
            .map(|t| t.name.clone())
            .collect();

        info!(run_id = %run_id, tasks = order.len(), "run_started");

        let mut outcomes: BTreeMap<String, TaskOutcome> = BTreeMap::new();
        let mut dispatched: HashSet<String> = HashSet::new();
        let mut started = Vec::new();
        let mut finished = Vec::new();
        let mut running = JoinSet::new();
        let mut in_flight: HashMap<Id, String> = HashMap::new();

        loop {
            if !cancel.is_cancelled() {
                for name in &order {
                    if running.len() >= self.max_concurrent {
                        break;
                    }
                    if dispatched.contains(name) || outcomes.contains_key(name) {
                        continue;
                    }
                    let ready = self.graph.upstream(name).iter().all(|up| {
                        outcomes
                            .get(&up.name)
                            .is_some_and(TaskOutcome::is_succeeded)
                    });
                    if !ready {
                        continue;
                    }
                    let Some(task) = self.graph.get(name).cloned() else {
                        continue;
                    };

                    dispatched.insert(name.clone());
                    started.push(name.clone());
                    info!(run_id = %run_id, task = %name, kind = %task.kind, "task_started");
                    self.emit(SchedulerEvent::TaskStarted { task: name.clone() })
                        .await;

                    let store = store.clone();
                    let client = Arc::clone(&self.client);
                    let handle = running.spawn(async move {
                        task.execute(&store, client.as_ref()).await
                    });
                    in_flight.insert(handle.id(), name.clone());
                }
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };
            // A panicking task fails like any other; siblings keep running.
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => (e.id(), Err(Error::TaskJoin(e.to_string()))),
            };
            let Some(name) = in_flight.remove(&id) else {
                warn!(run_id = %run_id, task_id = %id, "unknown task finished");
                continue;
            };
            finished.push(name.clone());

            let result = match result {
                Ok(output) => store.put(&name, output.clone()).await.map(|_| output),
                Err(e) => Err(e),
            };

            match result {
                Ok(output) => {
                    info!(run_id = %run_id, task = %name, "task_succeeded");
                    outcomes.insert(name.clone(), TaskOutcome::Succeeded { output });
                    self.emit(SchedulerEvent::TaskSucceeded { task: name }).await;
                }
                Err(e) => {
                    error!(run_id = %run_id, task = %name, error = %e, "task_failed");
                    outcomes.insert(
                        name.clone(),
                        TaskOutcome::Failed {
                            error: e.to_string(),
                        },
                    );
                    self.emit(SchedulerEvent::TaskFailed {
                        task: name.clone(),
                        error: e.to_string(),
                    })
                    .await;
                    self.skip_descendants(&run_id, &name, &mut outcomes).await;
                }
            }
        }

        let cancelled = cancel.is_cancelled() && order.iter().any(|n| !outcomes.contains_key(n));
        for name in &order {
            if !outcomes.contains_key(name) {
                debug!(run_id = %run_id, task = %name, "task_cancelled");
                outcomes.insert(name.clone(), TaskOutcome::Cancelled);
            }
        }

        if cancelled {
            warn!(run_id = %run_id, "run_cancelled");
        } else {
            info!(run_id = %run_id, "run_finished");
        }
        self.emit(SchedulerEvent::RunFinished { cancelled }).await;

        Ok(RunReport {
            run_id,
            outcomes,
            started,
            finished,
            cancelled,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Mark every not-yet-settled task reachable from `failed` as skipped.
    async fn skip_descendants(
        &self,
        run_id: &RunId,
        failed: &str,
        outcomes: &mut BTreeMap<String, TaskOutcome>,
    ) {
        for task in self.graph.descendants(failed) {
            if outcomes.contains_key(&task.name) {
                continue;
            }
            warn!(run_id = %run_id, task = %task.name, upstream = %failed, "task_skipped");
            outcomes.insert(
                task.name.clone(),
                TaskOutcome::Skipped {
                    upstream: failed.to_string(),
                },
            );
            self.emit(SchedulerEvent::TaskSkipped {
                task: task.name.clone(),
                upstream: failed.to_string(),
            })
            .await;
        }
    }
}
