use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use wfcore::{
    ApprovalError, ApprovalService, ApprovalStatus, ApprovalTask, EventBus, ExecutionEvent,
    InstanceId,
};

/// How long answered tasks are kept before [`ApprovalCoordinator`] drops them.
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// In-process approval service.
///
/// Every task lives in a watch channel; waiters are woken as soon as the
/// task is resolved instead of polling. Resolved tasks are dropped once they
/// are older than the retention window, checked whenever new tasks are
/// submitted. Pending tasks are never dropped.
pub struct ApprovalCoordinator {
    tasks: Mutex<HashMap<String, watch::Sender<ApprovalTask>>>,
    event_bus: Option<Arc<EventBus>>,
    retention: Duration,
}

impl ApprovalCoordinator {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            event_bus: None,
            retention: DEFAULT_TASK_RETENTION,
        }
    }

    pub fn with_event_bus(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus: Some(event_bus),
            ..Self::new()
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub async fn get_task(&self, task_id: &str) -> Option<ApprovalTask> {
        self.tasks
            .lock()
            .await
            .get(task_id)
            .map(|tx| tx.borrow().clone())
    }

    /// Every pending task regardless of approver.
    pub async fn all_pending(&self) -> Vec<ApprovalTask> {
        let tasks = self.tasks.lock().await;
        let mut pending: Vec<ApprovalTask> = tasks
            .values()
            .map(|tx| tx.borrow().clone())
            .filter(|t| t.status == ApprovalStatus::Pending)
            .collect();
        pending.sort_by_key(|t| t.created_time);
        pending
    }

    /// Drop resolved tasks answered (or created, for timeouts) more than
    /// `older_than` ago. Returns how many were dropped.
    pub async fn purge_resolved(&self, older_than: Duration) -> usize {
        let mut tasks = self.tasks.lock().await;
        purge(&mut tasks, older_than)
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event);
        }
    }
}

impl Default for ApprovalCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn purge(tasks: &mut HashMap<String, watch::Sender<ApprovalTask>>, older_than: Duration) -> usize {
    let cutoff = chrono::Duration::from_std(older_than)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age));
    let Some(cutoff) = cutoff else {
        return 0;
    };

    let before = tasks.len();
    tasks.retain(|_, tx| {
        let task = tx.borrow();
        !task.is_resolved() || task.approved_time.unwrap_or(task.created_time) > cutoff
    });
    let dropped = before - tasks.len();
    if dropped > 0 {
        tracing::debug!(dropped, "resolved approval tasks dropped");
    }
    dropped
}

/// Move a still-pending task to `Timeout`. Returns true if it changed.
fn close_pending(tx: &watch::Sender<ApprovalTask>) -> bool {
    tx.send_if_modified(|task| {
        if task.is_resolved() {
            return false;
        }
        task.status = ApprovalStatus::Timeout;
        true
    })
}

#[async_trait]
impl ApprovalService for ApprovalCoordinator {
    async fn submit_approval_tasks(&self, tasks: Vec<ApprovalTask>) -> Result<(), ApprovalError> {
        let mut map = self.tasks.lock().await;
        purge(&mut map, self.retention);
        for task in tasks {
            if map.contains_key(&task.id) {
                continue;
            }
            tracing::info!(
                task_id = %task.id,
                instance_id = %task.instance_id,
                approver = %task.approver_id,
                "approval requested"
            );
            self.emit(ExecutionEvent::ApprovalRequested { task: task.clone() });
            let (tx, _) = watch::channel(task.clone());
            map.insert(task.id, tx);
        }
        Ok(())
    }

    async fn wait_for_approval_results(
        &self,
        task_ids: &[String],
        timeout: Duration,
    ) -> Result<Vec<ApprovalTask>, ApprovalError> {
        let mut receivers = {
            let map = self.tasks.lock().await;
            task_ids
                .iter()
                .map(|id| {
                    map.get(id)
                        .map(|tx| tx.subscribe())
                        .ok_or_else(|| ApprovalError::TaskNotFound(id.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let waits = receivers.iter_mut().map(|rx| async move {
            let _ = rx.wait_for(ApprovalTask::is_resolved).await;
        });
        if tokio::time::timeout(timeout, join_all(waits)).await.is_err() {
            tracing::info!(tasks = task_ids.len(), "approval wait timed out");
        }

        let map = self.tasks.lock().await;
        let mut results = Vec::with_capacity(task_ids.len());
        for (id, rx) in task_ids.iter().zip(&receivers) {
            // A task missing by now was resolved and then dropped.
            let Some(tx) = map.get(id) else {
                results.push(rx.borrow().clone());
                continue;
            };
            let timed_out = close_pending(tx);
            let task = tx.borrow().clone();
            if timed_out {
                self.emit(ExecutionEvent::ApprovalResolved { task: task.clone() });
            }
            results.push(task);
        }
        Ok(results)
    }

    async fn approve_task(
        &self,
        task_id: &str,
        approver_id: &str,
        approved: bool,
        comment: Option<String>,
    ) -> Result<ApprovalTask, ApprovalError> {
        let map = self.tasks.lock().await;
        let tx = map
            .get(task_id)
            .ok_or_else(|| ApprovalError::TaskNotFound(task_id.to_string()))?;

        {
            let current = tx.borrow();
            if current.approver_id != approver_id {
                return Err(ApprovalError::NotAssignee {
                    task_id: task_id.to_string(),
                    approver: approver_id.to_string(),
                });
            }
            if current.is_resolved() {
                return Err(ApprovalError::AlreadyResolved(task_id.to_string()));
            }
        }

        tx.send_modify(|task| {
            task.status = if approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Rejected
            };
            task.approved_time = Some(Utc::now());
            task.comment = comment;
        });
        let task = tx.borrow().clone();

        tracing::info!(task_id, approver = approver_id, approved, "approval resolved");
        self.emit(ExecutionEvent::ApprovalResolved { task: task.clone() });
        Ok(task)
    }

    async fn get_pending_approvals(&self, user_id: &str) -> Vec<ApprovalTask> {
        self.all_pending()
            .await
            .into_iter()
            .filter(|t| t.approver_id == user_id)
            .collect()
    }

    async fn get_node_tasks(&self, instance_id: InstanceId, node_id: &str) -> Vec<ApprovalTask> {
        let map = self.tasks.lock().await;
        let mut tasks: Vec<ApprovalTask> = map
            .values()
            .map(|tx| tx.borrow().clone())
            .filter(|t| t.instance_id == instance_id && t.node_id == node_id)
            .collect();
        tasks.sort_by_key(|t| t.created_time);
        tasks
    }

    async fn expire_instance_tasks(&self, instance_id: InstanceId) -> Vec<ApprovalTask> {
        let map = self.tasks.lock().await;
        let mut expired = Vec::new();
        for tx in map.values() {
            let owned = tx.borrow().instance_id == instance_id;
            if !owned || !close_pending(tx) {
                continue;
            }
            let task = tx.borrow().clone();
            self.emit(ExecutionEvent::ApprovalResolved { task: task.clone() });
            expired.push(task);
        }
        if !expired.is_empty() {
            tracing::info!(%instance_id, tasks = expired.len(), "open approval tasks expired");
        }
        expired
    }
}
