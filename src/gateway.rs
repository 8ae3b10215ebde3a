//! Durable backend interface.
//!
//! The persistence gateway provides durable CRUD for tasks. The engine
//! assumes at-least-once semantics per call and no transactional guarantee
//! across calls; every call is independently failable and the reconciler
//! decides per operation whether a failure rolls back optimistic state.
//!
//! `list` returns raw JSON records rather than decoded tasks so that a
//! single malformed stored record can be skipped during startup without
//! aborting the whole load.

use crate::error::Result;
use crate::model::{Task, TaskId, TaskPatch};
use async_trait::async_trait;
use serde_json::Value;

/// Asynchronous durable store for tasks.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Lists all stored task records, optionally filtered by assignee.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable; individual malformed
    /// records are returned as-is for the caller to skip.
    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Value>>;

    /// Stores a newly created task.
    async fn create(&self, task: &Task) -> Result<Task>;

    /// Applies a partial update to a stored task.
    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task>;

    /// Removes a stored task.
    async fn delete(&self, id: &TaskId) -> Result<()>;

    /// Rewrites the priority of many tasks in one call.
    async fn bulk_update_priorities(&self, updates: &[(TaskId, i64)]) -> Result<()>;

    /// Removes every stored task.
    async fn clear_all(&self) -> Result<()>;

    /// Replaces the entire stored collection.
    async fn import_all(&self, tasks: &[Task]) -> Result<()>;
}
