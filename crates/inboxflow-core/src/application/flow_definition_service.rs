use crate::{
    domain::flow_definition::FlowDefinition,
    domain::repository::{ExecutionFilter, FlowDefinitionRepository},
    types::FlowId,
    CoreError,
};
use std::sync::Arc;

use super::flow_execution_service::FlowExecutionService;
use super::handlers::validate_timers;

/// Reason recorded on executions cut short by an undeploy
pub const FLOW_UNDEPLOYED: &str = "flow undeployed";

/// Service for managing flow definitions
pub struct FlowDefinitionService {
    /// Repository for flow definitions
    flow_definition_repo: Arc<dyn FlowDefinitionRepository>,

    /// Stops the executions of undeployed flows under their conversation locks
    engine: Arc<FlowExecutionService>,
}

impl FlowDefinitionService {
    /// Create a new flow definition service
    pub fn new(
        flow_definition_repo: Arc<dyn FlowDefinitionRepository>,
        engine: Arc<FlowExecutionService>,
    ) -> Self {
        Self {
            flow_definition_repo,
            engine,
        }
    }

    /// Validate and store a flow definition, replacing any previous version
    pub async fn deploy_definition(&self, definition: FlowDefinition) -> Result<(), CoreError> {
        definition.validate()?;
        let trigger = definition.trigger_config()?;
        validate_timers(&definition)?;

        self.flow_definition_repo.save(&definition).await?;

        tracing::info!(
            flow_id = %definition.id,
            trigger_type = ?trigger.trigger_type,
            nodes = definition.nodes.len(),
            active = definition.active,
            "Flow deployed"
        );

        Ok(())
    }

    /// Delete the definition, then fail the flow's unfinished executions
    pub async fn undeploy_definition(&self, flow_id: &FlowId) -> Result<usize, CoreError> {
        if self.flow_definition_repo.find_by_id(flow_id).await?.is_none() {
            return Err(CoreError::FlowDefinitionNotFound(flow_id.to_string()));
        }
        self.flow_definition_repo.delete(flow_id).await?;

        let filter = ExecutionFilter {
            flow_id: Some(flow_id.clone()),
            ..Default::default()
        };
        let mut stopped = 0;
        for execution in self.engine.list_executions(&filter).await? {
            if execution.status.is_terminal() {
                continue;
            }
            // A step loop still in flight holds the lock; cancel sees its final state
            match self.engine.cancel(&execution.id, FLOW_UNDEPLOYED).await {
                Ok(_) => stopped += 1,
                Err(CoreError::FlowExecutionError(reason)) => {
                    tracing::debug!(
                        execution_id = %execution.id,
                        reason = %reason,
                        "Execution finished before undeploy reached it"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            flow_id = %flow_id,
            executions_stopped = stopped,
            "Flow undeployed"
        );

        Ok(stopped)
    }

    /// Look up one flow definition
    pub async fn get_definition(&self, flow_id: &FlowId) -> Result<FlowDefinition, CoreError> {
        self.flow_definition_repo
            .find_by_id(flow_id)
            .await?
            .ok_or_else(|| CoreError::FlowDefinitionNotFound(flow_id.to_string()))
    }

    /// List all deployed flow definitions
    pub async fn list_definitions(&self) -> Result<Vec<FlowDefinition>, CoreError> {
        self.flow_definition_repo.find_all().await
    }
}
