//! Run-scoped result store.
//!
//! Each task writes its own output exactly once; downstream tasks read it by
//! the producing task's name. The store never drives execution.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Output of one successful task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Name of the task that produced the value.
    pub task_name: String,
    /// The recorded output.
    pub value: Value,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

/// Write-once map from task name to output.
///
/// Cloning is cheap and every clone sees the same records, so the scheduler
/// hands one to each running task.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    records: Arc<RwLock<HashMap<String, ResultRecord>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the output of `task_name`.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyRecorded`] if the task already has a record.
    /// The existing record is left untouched.
    pub async fn put(&self, task_name: &str, value: Value) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(task_name) {
            return Err(Error::AlreadyRecorded(task_name.to_string()));
        }
        records.insert(
            task_name.to_string(),
            ResultRecord {
                task_name: task_name.to_string(),
                value,
                recorded_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Get the output recorded for `task_name`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if nothing has been recorded yet.
    pub async fn get(&self, task_name: &str) -> Result<Value> {
        self.record(task_name).await.map(|record| record.value)
    }

    /// Get the full record for `task_name`.
    pub async fn record(&self, task_name: &str) -> Result<ResultRecord> {
        self.records
            .read()
            .await
            .get(task_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(task_name.to_string()))
    }

    pub async fn contains(&self, task_name: &str) -> bool {
        self.records.read().await.contains_key(task_name)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Snapshot of all records, ordered by task name.
    pub async fn records(&self) -> Vec<ResultRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.task_name.cmp(&b.task_name));
        records
    }
}
