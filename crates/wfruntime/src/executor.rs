use crate::engine::EngineShared;
use crate::registry::RunHandle;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use wfcore::{
    DataMap, ExecutionEvent, InstanceStatus, NodeContext, NodeError, NodeExecutionRecord,
    NodeExecutionStatus, NodeOutput, NodeSpec, PersistenceError, WorkflowGraph,
};

/// Drives one instance from its current node until it completes, fails or
/// is paused/terminated. Nodes run strictly one at a time.
pub(crate) struct InstanceExecutor {
    shared: Arc<EngineShared>,
    graph: Arc<WorkflowGraph>,
    handle: Arc<RunHandle>,
}

impl InstanceExecutor {
    pub fn new(shared: Arc<EngineShared>, graph: Arc<WorkflowGraph>, handle: Arc<RunHandle>) -> Self {
        Self {
            shared,
            graph,
            handle,
        }
    }

    pub async fn run(self) {
        let span = tracing::info_span!(
            "instance",
            instance_id = %self.handle.instance_id,
            run_id = %self.handle.run_id
        );
        async {
            if let Err(e) = self.drive().await {
                tracing::error!(error = %e, "execution loop aborted");
                self.abort(e).await;
            }
            self.shared
                .registry
                .remove(self.handle.instance_id, self.handle.run_id)
                .await;
            self.handle.finished.cancel();
            tracing::debug!("execution loop exited");
        }
        .instrument(span)
        .await
    }

    async fn drive(&self) -> Result<(), PersistenceError> {
        let instance_id = self.handle.instance_id;

        loop {
            // Saved under the instance lock: a pause cannot slip in between
            // the status check and the new record.
            let (spec, data, mut record) = {
                let instance = self.handle.instance.lock().await;
                if self.handle.cancel.is_cancelled() || instance.status != InstanceStatus::Running {
                    return Ok(());
                }
                let node_id = instance.current_node_id.clone();
                let Some(spec) = self.graph.node(&node_id) else {
                    drop(instance);
                    let message = format!("Node '{}' not found in definition", node_id);
                    self.fail_instance(message).await?;
                    return Ok(());
                };
                let data = instance.data.clone();
                let record = NodeExecutionRecord::begin(instance_id, node_id, data.clone());
                self.shared.save_record(&record).await?;
                (spec, data, record)
            };
            let node_id = record.node_id.clone();

            tracing::debug!(node_id = %node_id, node_type = %spec.node_type(), "node started");
            self.shared.event_bus.emit(ExecutionEvent::NodeStarted {
                instance_id,
                node_id: node_id.clone(),
                node_type: spec.node_type(),
                timestamp: Utc::now(),
            });

            let started = Instant::now();
            let outcome = self.execute_node(spec, data).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let finished = match outcome {
                Ok(output) if output.success => {
                    self.commit(&mut record, output, duration_ms).await?
                }
                Ok(output) => {
                    let message = output
                        .error_message
                        .clone()
                        .unwrap_or_else(|| format!("Node '{}' reported failure", node_id));
                    self.fail_node(&mut record, NodeExecutionStatus::Failed, output.output_port, message)
                        .await?;
                    true
                }
                Err(NodeError::Timeout { millis }) => {
                    let message = format!("Node '{}' timed out after {}ms", node_id, millis);
                    self.fail_node(&mut record, NodeExecutionStatus::Timeout, None, message)
                        .await?;
                    true
                }
                Err(e) => {
                    let message = format!("Node '{}' failed: {}", node_id, e);
                    self.fail_node(&mut record, NodeExecutionStatus::Failed, None, message)
                        .await?;
                    true
                }
            };

            if finished {
                return Ok(());
            }
        }
    }

    async fn execute_node(&self, spec: &NodeSpec, data: DataMap) -> Result<NodeOutput, NodeError> {
        let node = wfnodes::instantiate(spec);
        let token = self.handle.cancel.child_token();
        let ctx = NodeContext {
            instance_id: self.handle.instance_id,
            node_id: spec.node_id.clone(),
            data,
            approvals: self.shared.approvals.clone(),
            notifications: self.shared.notifications.clone(),
            events: self
                .shared
                .event_bus
                .create_emitter(self.handle.instance_id, spec.node_id.clone()),
            cancellation: token.clone(),
            default_approval_timeout: self.shared.config.default_approval_timeout(),
        };

        let run = AssertUnwindSafe(node.execute(ctx)).catch_unwind();
        let result = match spec.timeout_ms {
            Some(millis) => match tokio::time::timeout(Duration::from_millis(millis), run).await {
                Ok(result) => result,
                Err(_) => {
                    token.cancel();
                    return Err(NodeError::Timeout { millis });
                }
            },
            None => run.await,
        };

        result.unwrap_or_else(|panic| Err(NodeError::ExecutionFailed(panic_message(panic))))
    }

    /// Merge the node's data and advance along its output port. Returns true
    /// once the loop should stop.
    async fn commit(
        &self,
        record: &mut NodeExecutionRecord,
        output: NodeOutput,
        duration_ms: u64,
    ) -> Result<bool, PersistenceError> {
        let mut instance = self.handle.instance.lock().await;
        if self.handle.cancel.is_cancelled() {
            drop(instance);
            self.abandon(record).await?;
            return Ok(true);
        }

        let next = output
            .output_port
            .as_deref()
            .and_then(|port| self.graph.next_connection(&record.node_id, port))
            .map(|c| c.target_node_id.clone());

        instance.data.extend(output.data.clone());
        match &next {
            Some(target) => instance.current_node_id = target.clone(),
            None => instance.complete(),
        }

        record.finish(
            NodeExecutionStatus::Completed,
            output.output_port.clone(),
            Some(output.data),
            None,
        );
        self.shared.update_record(record).await?;
        self.shared.update_instance(&instance).await?;

        tracing::info!(
            node_id = %record.node_id,
            port = ?record.output_port,
            duration_ms,
            "node completed"
        );
        self.shared.event_bus.emit(ExecutionEvent::NodeCompleted {
            instance_id: instance.id,
            node_id: record.node_id.clone(),
            output_port: record.output_port.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });

        if next.is_none() {
            tracing::info!("instance completed");
            self.shared.emit_status(&instance);
            return Ok(true);
        }
        Ok(false)
    }

    async fn fail_node(
        &self,
        record: &mut NodeExecutionRecord,
        status: NodeExecutionStatus,
        port: Option<String>,
        message: String,
    ) -> Result<(), PersistenceError> {
        let mut instance = self.handle.instance.lock().await;
        if self.handle.cancel.is_cancelled() {
            drop(instance);
            return self.abandon(record).await;
        }

        record.finish(status, port, None, Some(message.clone()));
        self.shared.update_record(record).await?;

        tracing::warn!(node_id = %record.node_id, error = %message, "node failed");
        self.shared.event_bus.emit(ExecutionEvent::NodeFailed {
            instance_id: instance.id,
            node_id: record.node_id.clone(),
            error: message.clone(),
            timestamp: Utc::now(),
        });

        instance.fail(message);
        self.shared.update_instance(&instance).await?;
        self.shared.approvals.expire_instance_tasks(instance.id).await;
        self.shared.emit_status(&instance);
        Ok(())
    }

    /// The instance was paused or terminated while the node ran; its result
    /// is discarded.
    async fn abandon(&self, record: &mut NodeExecutionRecord) -> Result<(), PersistenceError> {
        tracing::info!(node_id = %record.node_id, "node abandoned");
        record.finish(NodeExecutionStatus::Cancelled, None, None, None);
        self.shared.update_record(record).await
    }

    async fn fail_instance(&self, message: String) -> Result<(), PersistenceError> {
        let mut instance = self.handle.instance.lock().await;
        if self.handle.cancel.is_cancelled() {
            return Ok(());
        }
        tracing::error!(error = %message, "instance failed");
        instance.fail(message);
        self.shared.update_instance(&instance).await?;
        self.shared.approvals.expire_instance_tasks(instance.id).await;
        self.shared.emit_status(&instance);
        Ok(())
    }

    /// Persistence gave up. Mark the live copy failed and make one last
    /// attempt to store it.
    async fn abort(&self, error: PersistenceError) {
        let mut instance = self.handle.instance.lock().await;
        if !instance.status.is_terminal() && !self.handle.cancel.is_cancelled() {
            instance.fail(format!("Persistence failure: {}", error));
        }
        if let Err(e) = self.shared.repository.update_instance(&instance).await {
            tracing::error!(error = %e, "could not store failed instance state");
        }
        if instance.status.is_terminal() {
            self.shared.approvals.expire_instance_tasks(instance.id).await;
        }
        self.shared.emit_status(&instance);
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("node panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("node panicked: {}", message)
    } else {
        "node panicked".to_string()
    }
}
