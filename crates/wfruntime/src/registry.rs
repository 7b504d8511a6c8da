use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wfcore::{InstanceId, WorkflowInstance};

/// Live state of one execution loop.
pub(crate) struct RunHandle {
    pub instance_id: InstanceId,
    /// Distinguishes successive loops of the same instance (pause/resume).
    pub run_id: Uuid,
    /// Cancelled by pause and terminate.
    pub cancel: CancellationToken,
    /// Cancelled once the loop has exited and left the registry.
    pub finished: CancellationToken,
    /// Authoritative copy of the instance while the loop is alive. Loop
    /// commits and pause/terminate transitions are serialized on this lock.
    pub instance: Mutex<WorkflowInstance>,
}

impl RunHandle {
    pub fn new(instance: WorkflowInstance) -> Self {
        Self {
            instance_id: instance.id,
            run_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            instance: Mutex::new(instance),
        }
    }
}

/// Registry of running instances.
///
/// The lock only guards the map itself and is never held while a node runs.
#[derive(Default)]
pub(crate) struct InstanceRegistry {
    runs: Mutex<HashMap<InstanceId, Arc<RunHandle>>>,
}

impl InstanceRegistry {
    /// Register a loop. Returns false if the instance already has one.
    pub async fn insert(&self, handle: Arc<RunHandle>) -> bool {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(&handle.instance_id) {
            return false;
        }
        runs.insert(handle.instance_id, handle);
        true
    }

    pub async fn get(&self, instance_id: InstanceId) -> Option<Arc<RunHandle>> {
        self.runs.lock().await.get(&instance_id).cloned()
    }

    /// Remove the entry only if it still belongs to `run_id`.
    pub async fn remove(&self, instance_id: InstanceId, run_id: Uuid) -> bool {
        let mut runs = self.runs.lock().await;
        match runs.get(&instance_id) {
            Some(handle) if handle.run_id == run_id => {
                runs.remove(&instance_id);
                true
            }
            _ => false,
        }
    }

    pub async fn ids(&self) -> Vec<InstanceId> {
        self.runs.lock().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> Arc<RunHandle> {
        let instance = WorkflowInstance::new(Uuid::new_v4(), "s", Default::default(), "test");
        Arc::new(RunHandle::new(instance))
    }

    #[tokio::test]
    async fn one_loop_per_instance() {
        let registry = InstanceRegistry::default();
        let first = handle();
        assert!(registry.insert(first.clone()).await);

        let instance = first.instance.lock().await.clone();
        let second = Arc::new(RunHandle::new(instance));
        assert!(!registry.insert(second).await);
        assert_eq!(registry.ids().await, vec![first.instance_id]);
    }

    #[tokio::test]
    async fn stale_run_cannot_remove_newer_entry() {
        let registry = InstanceRegistry::default();
        let old = handle();
        registry.insert(old.clone()).await;
        assert!(registry.remove(old.instance_id, old.run_id).await);

        let instance = old.instance.lock().await.clone();
        let new = Arc::new(RunHandle::new(instance));
        registry.insert(new.clone()).await;

        assert!(!registry.remove(old.instance_id, old.run_id).await);
        assert!(registry.get(new.instance_id).await.is_some());
    }
}
