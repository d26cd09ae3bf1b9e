// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task store boundary.
//!
//! The continuation record lives inside task documents owned by an external
//! ticket/task system; the supervisor reads and writes only the record
//! fields and stays agnostic of the document format. `update` is the single
//! mutation path and must be atomic per task: two concurrent decision
//! cycles must not interleave their read-modify-write.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use vigil_core::{ContinuationRecord, TaskId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("store io: {0}")]
    Io(String),
}

/// Mutation applied under the store's per-task atomicity guarantee.
pub type RecordMutation = Box<dyn FnOnce(&mut ContinuationRecord) + Send>;

/// External task/ticket store, reduced to the continuation-record fields.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    async fn load(&self, task: &TaskId) -> Result<ContinuationRecord, StoreError>;

    /// Atomic read-modify-write; returns the record after mutation.
    async fn update(
        &self,
        task: &TaskId,
        mutation: RecordMutation,
    ) -> Result<ContinuationRecord, StoreError>;

    /// Mark the task complete in the owning system.
    ///
    /// Only called once every required quality gate passed.
    async fn mark_complete(&self, task: &TaskId) -> Result<(), StoreError>;
}

struct StoredTask {
    record: ContinuationRecord,
    completed: bool,
}

/// In-memory task store for embedding and tests.
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    inner: Arc<Mutex<HashMap<TaskId, StoredTask>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: TaskId, record: ContinuationRecord) {
        self.inner.lock().insert(task, StoredTask { record, completed: false });
    }

    pub fn record(&self, task: &TaskId) -> Option<ContinuationRecord> {
        self.inner.lock().get(task).map(|t| t.record.clone())
    }

    pub fn is_complete(&self, task: &TaskId) -> bool {
        self.inner.lock().get(task).map(|t| t.completed).unwrap_or(false)
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn load(&self, task: &TaskId) -> Result<ContinuationRecord, StoreError> {
        self.inner
            .lock()
            .get(task)
            .map(|t| t.record.clone())
            .ok_or_else(|| StoreError::TaskNotFound(task.clone()))
    }

    async fn update(
        &self,
        task: &TaskId,
        mutation: RecordMutation,
    ) -> Result<ContinuationRecord, StoreError> {
        let mut inner = self.inner.lock();
        let stored = inner.get_mut(task).ok_or_else(|| StoreError::TaskNotFound(task.clone()))?;
        mutation(&mut stored.record);
        Ok(stored.record.clone())
    }

    async fn mark_complete(&self, task: &TaskId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let stored = inner.get_mut(task).ok_or_else(|| StoreError::TaskNotFound(task.clone()))?;
        stored.completed = true;
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
