use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use wfcore::{
    InstanceId, InstanceStatus, NodeExecutionRecord, PersistenceError, WorkflowDefinition,
    WorkflowId, WorkflowInstance, WorkflowRepository,
};

/// Repository kept entirely in memory; used by the CLI and in tests.
#[derive(Default)]
pub struct InMemoryRepository {
    definitions: RwLock<HashMap<WorkflowId, WorkflowDefinition>>,
    instances: RwLock<HashMap<InstanceId, WorkflowInstance>>,
    records: RwLock<Vec<NodeExecutionRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(kind: &'static str, id: impl ToString) -> PersistenceError {
    PersistenceError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryRepository {
    async fn get_definition(&self, id: WorkflowId) -> Result<WorkflowDefinition, PersistenceError> {
        self.definitions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("definition", id))
    }

    async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), PersistenceError> {
        self.definitions
            .write()
            .await
            .insert(definition.id, definition.clone());
        Ok(())
    }

    async fn get_instance(&self, id: InstanceId) -> Result<WorkflowInstance, PersistenceError> {
        self.instances
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("instance", id))
    }

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<(), PersistenceError> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(PersistenceError::Backend(format!(
                "instance {} already exists",
                instance.id
            )));
        }
        instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<(), PersistenceError> {
        let mut instances = self.instances.write().await;
        let stored = instances
            .get_mut(&instance.id)
            .ok_or_else(|| not_found("instance", instance.id))?;
        *stored = instance.clone();
        Ok(())
    }

    async fn save_node_execution_record(
        &self,
        record: &NodeExecutionRecord,
    ) -> Result<(), PersistenceError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn update_node_execution_record(
        &self,
        record: &NodeExecutionRecord,
    ) -> Result<(), PersistenceError> {
        let mut records = self.records.write().await;
        let stored = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| not_found("node execution record", record.id))?;
        if stored.is_finalized() {
            return Err(PersistenceError::Backend(format!(
                "node execution record {} is already finalized",
                record.id
            )));
        }
        *stored = record.clone();
        Ok(())
    }

    async fn get_node_execution_records(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<NodeExecutionRecord>, PersistenceError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn get_active_instances(&self) -> Result<Vec<WorkflowInstance>, PersistenceError> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.status == InstanceStatus::Running)
            .cloned()
            .collect())
    }
}
