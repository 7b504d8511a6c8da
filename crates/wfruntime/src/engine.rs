use crate::config::EngineConfig;
use crate::executor::InstanceExecutor;
use crate::registry::{InstanceRegistry, RunHandle};
use crate::retry::with_retry;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use wfcore::{
    validate_network, ApprovalService, DataMap, EventBus, ExecutionEvent, FlowError, InstanceId,
    InstanceStatus, NodeExecutionRecord, NotificationService, PersistenceError,
    WorkflowDefinition, WorkflowError, WorkflowGraph, WorkflowId, WorkflowInstance,
    WorkflowRepository,
};

/// State shared between the engine handle and every instance loop.
pub(crate) struct EngineShared {
    pub repository: Arc<dyn WorkflowRepository>,
    pub approvals: Arc<dyn ApprovalService>,
    pub notifications: Arc<dyn NotificationService>,
    pub event_bus: Arc<EventBus>,
    pub registry: InstanceRegistry,
    pub config: EngineConfig,
    graphs: RwLock<HashMap<WorkflowId, Arc<WorkflowGraph>>>,
}

impl EngineShared {
    pub async fn update_instance(&self, instance: &WorkflowInstance) -> Result<(), PersistenceError> {
        let repo = &self.repository;
        with_retry(&self.config.persistence_retry, "update_instance", || {
            repo.update_instance(instance)
        })
        .await
    }

    pub async fn save_record(&self, record: &NodeExecutionRecord) -> Result<(), PersistenceError> {
        let repo = &self.repository;
        with_retry(&self.config.persistence_retry, "save_node_execution_record", || {
            repo.save_node_execution_record(record)
        })
        .await
    }

    pub async fn update_record(&self, record: &NodeExecutionRecord) -> Result<(), PersistenceError> {
        let repo = &self.repository;
        with_retry(&self.config.persistence_retry, "update_node_execution_record", || {
            repo.update_node_execution_record(record)
        })
        .await
    }

    pub fn emit_status(&self, instance: &WorkflowInstance) {
        self.event_bus.emit(ExecutionEvent::InstanceStatusChanged {
            instance_id: instance.id,
            status: instance.status,
            error: instance.error_message.clone(),
            timestamp: Utc::now(),
        });
    }
}

/// Runs workflow instances.
///
/// Each instance advances node by node on its own tokio task. Instances can
/// be paused, resumed and terminated at node boundaries.
#[derive(Clone)]
pub struct ExecutionEngine {
    shared: Arc<EngineShared>,
}

impl ExecutionEngine {
    pub fn new(
        repository: Arc<dyn WorkflowRepository>,
        approvals: Arc<dyn ApprovalService>,
        notifications: Arc<dyn NotificationService>,
        config: EngineConfig,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self::with_event_bus(repository, approvals, notifications, event_bus, config)
    }

    /// Create an engine that publishes on an existing bus, e.g. one shared
    /// with an [`ApprovalCoordinator`](crate::ApprovalCoordinator).
    pub fn with_event_bus(
        repository: Arc<dyn WorkflowRepository>,
        approvals: Arc<dyn ApprovalService>,
        notifications: Arc<dyn NotificationService>,
        event_bus: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                repository,
                approvals,
                notifications,
                event_bus,
                registry: InstanceRegistry::default(),
                config,
                graphs: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.shared.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.shared.event_bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Validate a definition and store it in the repository.
    pub async fn register_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowId, FlowError> {
        let graph = validated_graph(definition)?;
        let id = graph.definition().id;
        let repo = &self.shared.repository;
        with_retry(&self.shared.config.persistence_retry, "save_definition", || {
            repo.save_definition(graph.definition())
        })
        .await?;
        self.cache_graph(Arc::new(graph)).await;
        Ok(id)
    }

    /// Validate `definition` and start a new instance of it.
    pub async fn start(
        &self,
        definition: WorkflowDefinition,
        initial_data: DataMap,
        started_by: &str,
    ) -> Result<InstanceId, FlowError> {
        let graph = Arc::new(validated_graph(definition)?);
        self.cache_graph(graph.clone()).await;

        let mut instance = WorkflowInstance::new(
            graph.definition().id,
            graph.start_node_id(),
            initial_data,
            started_by,
        );
        instance.status = InstanceStatus::Running;

        let repo = &self.shared.repository;
        with_retry(&self.shared.config.persistence_retry, "save_instance", || {
            repo.save_instance(&instance)
        })
        .await?;

        tracing::info!(
            instance_id = %instance.id,
            definition_id = %instance.definition_id,
            started_by,
            "workflow instance started"
        );
        self.shared.event_bus.emit(ExecutionEvent::InstanceStarted {
            instance_id: instance.id,
            definition_id: instance.definition_id,
            started_by: started_by.to_string(),
            timestamp: Utc::now(),
        });

        let id = instance.id;
        self.launch(graph, instance).await?;
        Ok(id)
    }

    /// Start an instance of a definition held by the repository.
    pub async fn start_by_id(
        &self,
        definition_id: WorkflowId,
        initial_data: DataMap,
        started_by: &str,
    ) -> Result<InstanceId, FlowError> {
        let graph = self.graph_for(definition_id).await?;
        self.start(graph.definition().clone(), initial_data, started_by)
            .await
    }

    /// Stop a running instance at the next node boundary.
    pub async fn pause(&self, instance_id: InstanceId) -> Result<(), FlowError> {
        if let Some(handle) = self.shared.registry.get(instance_id).await {
            let mut instance = handle.instance.lock().await;
            ensure_status(&instance, "pause", &[InstanceStatus::Running])?;
            handle.cancel.cancel();
            instance.status = InstanceStatus::Paused;
            self.shared.update_instance(&instance).await?;
            tracing::info!(%instance_id, node_id = %instance.current_node_id, "instance paused");
            self.shared.emit_status(&instance);
            return Ok(());
        }

        // Running in the repository but without a loop, e.g. after a restart.
        let mut instance = self.load_instance(instance_id).await?;
        ensure_status(&instance, "pause", &[InstanceStatus::Running])?;
        instance.status = InstanceStatus::Paused;
        self.shared.update_instance(&instance).await?;
        tracing::info!(%instance_id, "orphaned instance paused");
        self.shared.emit_status(&instance);
        Ok(())
    }

    /// Continue a paused instance from its current node.
    pub async fn resume(&self, instance_id: InstanceId) -> Result<(), FlowError> {
        if let Some(handle) = self.shared.registry.get(instance_id).await {
            let status = handle.instance.lock().await.status;
            if status != InstanceStatus::Paused {
                return Err(invalid_transition("resume", status));
            }
            // The previous loop is still draining its last node.
            handle.finished.cancelled().await;
        }

        let mut instance = self.load_instance(instance_id).await?;
        ensure_status(&instance, "resume", &[InstanceStatus::Paused])?;
        let graph = self.graph_for(instance.definition_id).await?;

        instance.status = InstanceStatus::Running;
        self.shared.update_instance(&instance).await?;
        tracing::info!(%instance_id, node_id = %instance.current_node_id, "instance resumed");
        self.shared.emit_status(&instance);

        self.launch(graph, instance).await
    }

    /// Stop an instance for good. Its open approval tasks are closed.
    pub async fn terminate(&self, instance_id: InstanceId) -> Result<(), FlowError> {
        const ALLOWED: &[InstanceStatus] = &[InstanceStatus::Running, InstanceStatus::Paused];

        if let Some(handle) = self.shared.registry.get(instance_id).await {
            let mut instance = handle.instance.lock().await;
            ensure_status(&instance, "terminate", ALLOWED)?;
            handle.cancel.cancel();
            instance.terminate();
            self.shared.update_instance(&instance).await?;
            self.shared.approvals.expire_instance_tasks(instance_id).await;
            tracing::info!(%instance_id, "instance terminated");
            self.shared.emit_status(&instance);
            return Ok(());
        }

        let mut instance = self.load_instance(instance_id).await?;
        ensure_status(&instance, "terminate", ALLOWED)?;
        instance.terminate();
        self.shared.update_instance(&instance).await?;
        self.shared.approvals.expire_instance_tasks(instance_id).await;
        tracing::info!(%instance_id, "instance terminated");
        self.shared.emit_status(&instance);
        Ok(())
    }

    /// Current state: the live copy while a loop runs, the stored one otherwise.
    pub async fn get_instance(&self, instance_id: InstanceId) -> Result<WorkflowInstance, FlowError> {
        if let Some(handle) = self.shared.registry.get(instance_id).await {
            return Ok(handle.instance.lock().await.clone());
        }
        self.load_instance(instance_id).await
    }

    pub async fn get_execution_history(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<NodeExecutionRecord>, FlowError> {
        let repo = &self.shared.repository;
        Ok(
            with_retry(&self.shared.config.persistence_retry, "get_node_execution_records", || {
                repo.get_node_execution_records(instance_id)
            })
            .await?,
        )
    }

    /// Instances that currently have an execution loop.
    pub async fn active_instance_ids(&self) -> Vec<InstanceId> {
        self.shared.registry.ids().await
    }

    /// Relaunch instances stored as Running that have no loop in this
    /// process. Returns the ids that were relaunched.
    pub async fn recover_active_instances(&self) -> Result<Vec<InstanceId>, FlowError> {
        let repo = &self.shared.repository;
        let active = with_retry(&self.shared.config.persistence_retry, "get_active_instances", || {
            repo.get_active_instances()
        })
        .await?;

        let mut recovered = Vec::new();
        for instance in active {
            if self.shared.registry.get(instance.id).await.is_some() {
                continue;
            }
            let graph = match self.graph_for(instance.definition_id).await {
                Ok(graph) => graph,
                Err(e) => {
                    tracing::error!(instance_id = %instance.id, error = %e, "cannot recover instance");
                    continue;
                }
            };
            let id = instance.id;
            tracing::info!(instance_id = %id, node_id = %instance.current_node_id, "recovering instance");
            self.launch(graph, instance).await?;
            recovered.push(id);
        }
        Ok(recovered)
    }

    /// Wait until the instance has no running loop (finished, failed, paused
    /// or terminated) and return its state.
    pub async fn wait_for_completion(
        &self,
        instance_id: InstanceId,
        timeout: Duration,
    ) -> Result<WorkflowInstance, FlowError> {
        if let Some(handle) = self.shared.registry.get(instance_id).await {
            tokio::time::timeout(timeout, handle.finished.cancelled())
                .await
                .map_err(|_| {
                    FlowError::Execution(format!(
                        "instance {} still running after {}ms",
                        instance_id,
                        timeout.as_millis()
                    ))
                })?;
        }
        self.get_instance(instance_id).await
    }

    async fn launch(&self, graph: Arc<WorkflowGraph>, instance: WorkflowInstance) -> Result<(), FlowError> {
        let status = instance.status;
        let handle = Arc::new(RunHandle::new(instance));
        if !self.shared.registry.insert(handle.clone()).await {
            return Err(invalid_transition("launch", status));
        }
        let executor = InstanceExecutor::new(self.shared.clone(), graph, handle);
        tokio::spawn(executor.run());
        Ok(())
    }

    async fn load_instance(&self, instance_id: InstanceId) -> Result<WorkflowInstance, FlowError> {
        let repo = &self.shared.repository;
        with_retry(&self.shared.config.persistence_retry, "get_instance", || {
            repo.get_instance(instance_id)
        })
        .await
        .map_err(|e| match e {
            PersistenceError::NotFound { .. } => {
                WorkflowError::InstanceNotFound(instance_id.to_string()).into()
            }
            other => FlowError::from(other),
        })
    }

    async fn cache_graph(&self, graph: Arc<WorkflowGraph>) {
        self.shared
            .graphs
            .write()
            .await
            .insert(graph.definition().id, graph);
    }

    async fn graph_for(&self, definition_id: WorkflowId) -> Result<Arc<WorkflowGraph>, FlowError> {
        if let Some(graph) = self.shared.graphs.read().await.get(&definition_id) {
            return Ok(graph.clone());
        }

        let repo = &self.shared.repository;
        let definition = with_retry(&self.shared.config.persistence_retry, "get_definition", || {
            repo.get_definition(definition_id)
        })
        .await
        .map_err(|e| match e {
            PersistenceError::NotFound { .. } => {
                WorkflowError::NotFound(definition_id.to_string()).into()
            }
            other => FlowError::from(other),
        })?;

        let graph = Arc::new(validated_graph(definition)?);
        self.cache_graph(graph.clone()).await;
        Ok(graph)
    }
}

fn validated_graph(definition: WorkflowDefinition) -> Result<WorkflowGraph, WorkflowError> {
    let graph = WorkflowGraph::from_definition(definition);
    if let Err(errors) = validate_network(&graph) {
        tracing::warn!(
            definition_id = %graph.definition().id,
            errors = errors.len(),
            "workflow definition rejected"
        );
        return Err(WorkflowError::Validation(errors));
    }
    Ok(graph)
}

fn ensure_status(
    instance: &WorkflowInstance,
    action: &'static str,
    allowed: &[InstanceStatus],
) -> Result<(), FlowError> {
    if allowed.contains(&instance.status) {
        Ok(())
    } else {
        Err(invalid_transition(action, instance.status))
    }
}

fn invalid_transition(action: &'static str, status: InstanceStatus) -> FlowError {
    WorkflowError::InvalidTransition {
        action,
        status: status.to_string(),
    }
    .into()
}
