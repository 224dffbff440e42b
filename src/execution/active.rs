//! Active-execution registry
//!
//! An owned, dependency-injected table of in-flight executions -
//! created at startup, drained at shutdown, never ambient global
//! state. Removing an entry prevents further step dispatch; an
//! in-flight step is not interrupted beyond its own timeout.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Tracks which executions may keep dispatching steps
#[derive(Clone)]
pub struct ActiveExecutions {
    inner: Arc<RwLock<HashSet<Uuid>>>,
}

impl ActiveExecutions {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Mark an execution as active
    pub async fn register(&self, execution_id: Uuid) {
        self.inner.write().await.insert(execution_id);
    }

    /// Remove an execution; the orchestrator treats removal as cancellation
    pub async fn remove(&self, execution_id: Uuid) -> bool {
        self.inner.write().await.remove(&execution_id)
    }

    /// Whether an execution may still dispatch steps
    pub async fn contains(&self, execution_id: Uuid) -> bool {
        self.inner.read().await.contains(&execution_id)
    }

    /// Currently active execution ids
    pub async fn ids(&self) -> Vec<Uuid> {
        self.inner.read().await.iter().copied().collect()
    }

    /// Clear the table (process shutdown)
    pub async fn drain(&self) {
        self.inner.write().await.clear();
    }
}

impl Default for ActiveExecutions {
    fn default() -> Self {
        Self::new()
    }
}
