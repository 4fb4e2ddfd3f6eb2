//! Task registry.
//!
//! Holds every known task and enforces the single-active-task rule. Once
//! the registry is full, the oldest finished tasks are evicted.

use crate::task::TaskHandle;
use crate::{CoreError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const CONFLICT_MESSAGE: &str =
    "Another task is already running. Wait for it to finish or stop it first.";

#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Add a task, failing with a conflict when another one is active.
    async fn insert(&self, task: Arc<TaskHandle>) -> Result<()>;

    async fn get(&self, id: Uuid) -> Option<Arc<TaskHandle>>;

    /// The task currently holding the active slot, if any.
    async fn active(&self) -> Option<Arc<TaskHandle>>;

    async fn len(&self) -> usize;
}

/// In-memory registry with a fixed capacity.
pub struct BoundedRegistry {
    capacity: usize,
    tasks: Mutex<Vec<Arc<TaskHandle>>>,
}

impl BoundedRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tasks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TaskRegistry for BoundedRegistry {
    async fn insert(&self, task: Arc<TaskHandle>) -> Result<()> {
        let mut tasks = self.tasks.lock().await;

        if tasks.iter().any(|t| t.status().is_active()) {
            return Err(CoreError::Conflict(CONFLICT_MESSAGE.to_string()));
        }

        // Insertion order is creation order, so the front is oldest
        while tasks.len() >= self.capacity {
            match tasks.iter().position(|t| t.status().is_terminal()) {
                Some(index) => {
                    let evicted = tasks.remove(index);
                    debug!(task_id = %evicted.id(), "Evicted finished task");
                }
                None => break,
            }
        }

        tasks.push(task);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Option<Arc<TaskHandle>> {
        self.tasks
            .lock()
            .await
            .iter()
            .find(|t| t.id() == id)
            .cloned()
    }

    async fn active(&self) -> Option<Arc<TaskHandle>> {
        self.tasks
            .lock()
            .await
            .iter()
            .find(|t| t.status().is_active())
            .cloned()
    }

    async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::task::{TaskRequest, TaskSpec, TaskStatus};

    fn handle(prompt: &str) -> Arc<TaskHandle> {
        let spec = TaskSpec::from_request(TaskRequest::new(prompt), &AgentConfig::default()).unwrap();
        Arc::new(TaskHandle::new(spec))
    }

    #[tokio::test]
    async fn test_single_active_task() {
        let registry = BoundedRegistry::new(10);
        let first = handle("first");
        tokio_test::assert_ok!(registry.insert(first.clone()).await);

        let err = tokio_test::assert_err!(registry.insert(handle("second")).await);
        assert!(matches!(err, CoreError::Conflict(ref m) if m == CONFLICT_MESSAGE));

        first.finish(TaskStatus::Completed, "done");
        tokio_test::assert_ok!(registry.insert(handle("third")).await);
        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.active().await.unwrap().spec().prompt, "third");
    }

    #[tokio::test]
    async fn test_evicts_oldest_finished() {
        let registry = BoundedRegistry::new(2);
        let a = handle("a");
        registry.insert(a.clone()).await.unwrap();
        a.finish(TaskStatus::Failed, "x");
        let b = handle("b");
        registry.insert(b.clone()).await.unwrap();
        b.finish(TaskStatus::Stopped, "x");

        let c = handle("c");
        registry.insert(c.clone()).await.unwrap();

        assert_eq!(registry.len().await, 2);
        assert!(registry.get(a.id()).await.is_none());
        assert!(registry.get(b.id()).await.is_some());
        assert!(registry.get(c.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let registry = BoundedRegistry::new(2);
        assert!(registry.get(Uuid::new_v4()).await.is_none());
    }
}
