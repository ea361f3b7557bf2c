use crate::{
    config::EngineConfig,
    domain::execution_state::{ExecutionStatus, FlowExecutionState},
    domain::flow_definition::{FlowDefinition, FlowNode, NodeKind, HANDLE_TIMEOUT},
    domain::node_result::NodeExecutionResult,
    domain::repository::{ExecutionFilter, ExecutionStateRepository, FlowDefinitionRepository},
    types::{ConversationId, ExecutionId, FlowId, TriggerEvent, TriggerKind},
    CoreError,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tracing::{debug, error, info, warn};

use super::event_broadcaster::ExecutionEventHandler;
use super::handlers::{timer_deadline, WaitForInputConfig};
use super::node_executor::{NodeContext, NodeExecutor};

/// Failure reason when a run visits too many nodes
pub const STEP_BUDGET_EXCEEDED: &str = "step budget exceeded";
/// Failure reason when a reply deadline passes without a timeout edge
pub const WAIT_TIMED_OUT: &str = "timed out waiting for input";

type LockKey = (FlowId, ConversationId);

/// What a trigger event did to one flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// A new execution was started
    #[serde(rename_all = "camelCase")]
    Started {
        /// Flow started
        flow_id: FlowId,
        /// New execution
        execution_id: ExecutionId,
    },
    /// A waiting execution received the message as input
    #[serde(rename_all = "camelCase")]
    Resumed {
        /// Flow resumed
        flow_id: FlowId,
        /// Resumed execution
        execution_id: ExecutionId,
    },
    /// The flow already has an active execution in this conversation
    #[serde(rename_all = "camelCase")]
    Skipped {
        /// Flow skipped
        flow_id: FlowId,
        /// Execution already in progress
        execution_id: ExecutionId,
    },
}

/// Holds the per-(flow, conversation) lock and drops the map entry once unused
struct ConversationGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: LockKey,
    locks: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Service for executing flows
#[derive(Clone)]
pub struct FlowExecutionService {
    /// Repository for flow definitions
    flow_definition_repo: Arc<dyn FlowDefinitionRepository>,

    /// Repository for execution state
    execution_repo: Arc<dyn ExecutionStateRepository>,

    /// Node dispatch
    node_executor: NodeExecutor,

    /// Lifecycle event sink
    event_handler: Arc<dyn ExecutionEventHandler>,

    /// Engine limits
    config: EngineConfig,

    /// Caps concurrently running step loops
    bulkhead: Arc<Semaphore>,

    /// Serializes work per flow and conversation
    locks: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
}

impl FlowExecutionService {
    /// Create a new flow execution service
    pub fn new(
        flow_definition_repo: Arc<dyn FlowDefinitionRepository>,
        execution_repo: Arc<dyn ExecutionStateRepository>,
        node_executor: NodeExecutor,
        event_handler: Arc<dyn ExecutionEventHandler>,
        config: EngineConfig,
    ) -> Self {
        let permits = config.max_concurrent_executions.max(1) as usize;
        Self {
            flow_definition_repo,
            execution_repo,
            node_executor,
            event_handler,
            bulkhead: Arc::new(Semaphore::new(permits)),
            locks: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Route an inbound message, webhook or schedule event
    pub async fn handle_trigger(
        &self,
        event: TriggerEvent,
    ) -> Result<Vec<TriggerOutcome>, CoreError> {
        if event.kind == TriggerKind::Message {
            if let Some(waiting) = self
                .execution_repo
                .find_waiting_for_input(&event.conversation_id)
                .await?
            {
                let input = event.text.clone().unwrap_or_default();
                self.resume_with_input(&waiting.id, input).await?;
                return Ok(vec![TriggerOutcome::Resumed {
                    flow_id: waiting.flow_id,
                    execution_id: waiting.id,
                }]);
            }
        }

        let mut outcomes = Vec::new();
        for flow in self.flow_definition_repo.find_active().await? {
            let trigger = match flow.trigger_config() {
                Ok(trigger) => trigger,
                Err(e) => {
                    warn!(flow_id = %flow.id, error = %e, "Skipping flow with invalid trigger");
                    continue;
                }
            };
            if !trigger.matches(&flow.id, &event) {
                continue;
            }

            outcomes.push(self.start_locked(&flow, event.clone()).await?);
        }

        debug!(
            conversation_id = %event.conversation_id,
            outcomes = outcomes.len(),
            "Trigger event handled"
        );
        Ok(outcomes)
    }

    /// Start `flow_id` for the conversation of `event` and run it until it pauses or ends
    pub async fn start_execution(
        &self,
        flow_id: &FlowId,
        event: TriggerEvent,
    ) -> Result<ExecutionId, CoreError> {
        let flow = self.load_flow(flow_id).await?;
        if !flow.active {
            return Err(CoreError::FlowExecutionError(format!(
                "Flow {} is not active",
                flow_id
            )));
        }

        match self.start_locked(&flow, event).await? {
            TriggerOutcome::Started { execution_id, .. } => Ok(execution_id),
            TriggerOutcome::Skipped { execution_id, .. } | TriggerOutcome::Resumed { execution_id, .. } => {
                Err(CoreError::FlowExecutionError(format!(
                    "Flow {} already has an active execution: {}",
                    flow_id, execution_id
                )))
            }
        }
    }

    async fn start_locked(
        &self,
        flow: &FlowDefinition,
        event: TriggerEvent,
    ) -> Result<TriggerOutcome, CoreError> {
        let _guard = self
            .lock_conversation(&flow.id, &event.conversation_id)
            .await;

        if let Some(existing) = self
            .execution_repo
            .find_active(&flow.id, &event.conversation_id)
            .await?
        {
            debug!(
                flow_id = %flow.id,
                conversation_id = %event.conversation_id,
                execution_id = %existing.id,
                "Flow already active in conversation"
            );
            return Ok(TriggerOutcome::Skipped {
                flow_id: flow.id.clone(),
                execution_id: existing.id,
            });
        }

        let entry = flow.trigger_node()?.id.clone();
        let mut state = FlowExecutionState::new(flow.id.clone(), event, entry);
        self.persist(&mut state).await?;

        info!(
            execution_id = %state.id,
            flow_id = %state.flow_id,
            conversation_id = %state.conversation_id,
            "Execution started"
        );

        self.run_loop(flow, &mut state, None).await?;

        Ok(TriggerOutcome::Started {
            flow_id: flow.id.clone(),
            execution_id: state.id,
        })
    }

    /// Deliver the contact's reply to an execution waiting for input
    pub async fn resume_with_input(
        &self,
        execution_id: &ExecutionId,
        input: String,
    ) -> Result<(), CoreError> {
        let (_guard, mut state) = self.lock_execution(execution_id).await?;
        if state.status != ExecutionStatus::Waiting || !state.waiting_for_input {
            return Err(CoreError::FlowExecutionError(format!(
                "Execution {} is not waiting for input",
                execution_id
            )));
        }

        let Some(flow) = self.flow_for(&mut state).await? else {
            return Ok(());
        };

        state.resume(Some(input.clone()))?;
        self.persist(&mut state).await?;
        info!(
            execution_id = %state.id,
            flow_id = %state.flow_id,
            conversation_id = %state.conversation_id,
            "Execution resumed with input"
        );

        self.run_loop(&flow, &mut state, Some(input)).await
    }

    /// Continue an execution whose delay timer expired
    pub async fn resume_from_timer(&self, execution_id: &ExecutionId) -> Result<(), CoreError> {
        let (_guard, mut state) = self.lock_execution(execution_id).await?;
        if !state.is_waiting_for_timer() {
            return Err(CoreError::FlowExecutionError(format!(
                "Execution {} is not waiting for a timer",
                execution_id
            )));
        }

        let Some(flow) = self.flow_for(&mut state).await? else {
            return Ok(());
        };

        state.resume(None)?;
        info!(
            execution_id = %state.id,
            flow_id = %state.flow_id,
            conversation_id = %state.conversation_id,
            "Execution resumed from timer"
        );
        self.continue_after(&flow, &mut state, None).await
    }

    /// Fail a non-terminal execution
    pub async fn cancel(
        &self,
        execution_id: &ExecutionId,
        reason: &str,
    ) -> Result<FlowExecutionState, CoreError> {
        let (_guard, mut state) = self.lock_execution(execution_id).await?;
        state.fail(reason)?;
        self.persist(&mut state).await?;

        info!(
            execution_id = %state.id,
            flow_id = %state.flow_id,
            conversation_id = %state.conversation_id,
            reason,
            "Execution cancelled"
        );
        Ok(state)
    }

    /// Resume due timers and expire overdue waits. Returns how many executions moved.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<usize, CoreError> {
        let due = self.execution_repo.find_due(now).await?;
        if due.is_empty() {
            return Ok(0);
        }

        let work = due.into_iter().map(|state| async move {
            let outcome = if state.resume_at.map_or(false, |at| at <= now) {
                self.resume_from_timer(&state.id).await
            } else {
                self.expire_wait(&state.id, now).await
            };
            if let Err(e) = &outcome {
                error!(
                    execution_id = %state.id,
                    flow_id = %state.flow_id,
                    error = %e,
                    "Failed to process due execution"
                );
            }
            outcome.is_ok()
        });

        let processed = futures::future::join_all(work)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();
        Ok(processed)
    }

    async fn expire_wait(
        &self,
        execution_id: &ExecutionId,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let (_guard, mut state) = self.lock_execution(execution_id).await?;
        let overdue = state.status == ExecutionStatus::Waiting
            && state.waiting_for_input
            && state.wait_deadline.map_or(false, |at| at <= now);
        if !overdue {
            // Answered or cancelled since it was listed
            return Ok(());
        }

        let Some(flow) = self.flow_for(&mut state).await? else {
            return Ok(());
        };

        let timeout_target = state
            .current_node_id
            .as_ref()
            .and_then(|node_id| flow.next_node(node_id, Some(HANDLE_TIMEOUT)));

        match timeout_target {
            Some(next) => {
                info!(
                    execution_id = %state.id,
                    flow_id = %state.flow_id,
                    conversation_id = %state.conversation_id,
                    next_node_id = %next,
                    "Reply deadline passed, following timeout edge"
                );
                state.resume(None)?;
                state.visit(next)?;
                self.persist(&mut state).await?;
                self.run_loop(&flow, &mut state, None).await
            }
            None => self.fail_execution(&mut state, WAIT_TIMED_OUT).await,
        }
    }

    /// Re-enter executions a previous process left running
    pub async fn recover(&self) -> Result<usize, CoreError> {
        let running = self.execution_repo.find_running().await?;
        let mut recovered = 0;

        for stale in running {
            let (_guard, mut state) = self.lock_execution(&stale.id).await?;
            if state.status != ExecutionStatus::Running {
                continue;
            }
            let Some(flow) = self.flow_for(&mut state).await? else {
                continue;
            };

            info!(
                execution_id = %state.id,
                flow_id = %state.flow_id,
                conversation_id = %state.conversation_id,
                current_node_id = ?state.current_node_id,
                "Recovering execution"
            );
            state.begin_segment();
            match self.run_loop(&flow, &mut state, None).await {
                Ok(()) => recovered += 1,
                Err(e) => error!(execution_id = %state.id, error = %e, "Recovery failed"),
            }
        }

        Ok(recovered)
    }

    /// Look up one execution
    pub async fn get_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<FlowExecutionState, CoreError> {
        self.execution_repo
            .find_by_id(execution_id)
            .await?
            .ok_or_else(|| CoreError::ExecutionNotFound(execution_id.to_string()))
    }

    /// List executions
    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<FlowExecutionState>, CoreError> {
        self.execution_repo.list(filter).await
    }

    /// Move past the current node after a timer and keep running
    async fn continue_after(
        &self,
        flow: &FlowDefinition,
        state: &mut FlowExecutionState,
        user_input: Option<String>,
    ) -> Result<(), CoreError> {
        let next = state
            .current_node_id
            .as_ref()
            .and_then(|node_id| flow.next_node(node_id, None));

        match next {
            Some(next) => {
                state.visit(next)?;
                self.persist(state).await?;
                self.run_loop(flow, state, user_input).await
            }
            None => {
                state.complete()?;
                self.persist(state).await?;
                info!(
                    execution_id = %state.id,
                    flow_id = %state.flow_id,
                    conversation_id = %state.conversation_id,
                    "Execution completed"
                );
                Ok(())
            }
        }
    }

    /// Execute nodes until the execution waits, completes or fails
    async fn run_loop(
        &self,
        flow: &FlowDefinition,
        state: &mut FlowExecutionState,
        mut user_input: Option<String>,
    ) -> Result<(), CoreError> {
        let _permit = self
            .bulkhead
            .acquire()
            .await
            .map_err(|_| CoreError::FlowExecutionError("Execution bulkhead closed".to_string()))?;

        loop {
            if state.step_count >= self.config.max_steps_per_run {
                warn!(
                    execution_id = %state.id,
                    flow_id = %state.flow_id,
                    steps = state.step_count,
                    "Step budget exceeded"
                );
                return self.fail_execution(state, STEP_BUDGET_EXCEEDED).await;
            }

            let Some(node_id) = state.current_node_id.clone() else {
                return self
                    .fail_execution(state, "execution has no current node")
                    .await;
            };
            let Some(node) = flow.node(&node_id) else {
                let reason = CoreError::NodeNotFound(node_id.to_string()).to_string();
                return self.fail_execution(state, reason).await;
            };

            state.count_step();
            let result = match self
                .execute_with_retry(flow, node, state, user_input.take())
                .await
            {
                Ok(result) => result,
                Err(e) => NodeExecutionResult::failure(e.to_string()),
            };
            debug!(
                execution_id = %state.id,
                node_id = %node.id,
                result = ?result,
                "Node executed"
            );

            state.record_result(result.clone())?;
            self.persist(state).await?;

            if !result.success {
                let reason = result
                    .error
                    .unwrap_or_else(|| format!("Node {} failed", node.id));
                return self.fail_execution(state, reason).await;
            }

            if result.wait_for_user_input {
                let deadline = match self.wait_deadline(node, Utc::now()) {
                    Ok(deadline) => deadline,
                    Err(e) => return self.fail_execution(state, e.to_string()).await,
                };
                state.wait_for_input(deadline)?;
                self.persist(state).await?;
                info!(
                    execution_id = %state.id,
                    flow_id = %state.flow_id,
                    conversation_id = %state.conversation_id,
                    node_id = %node.id,
                    "Execution waiting for input"
                );
                return Ok(());
            }

            if let Some(resume_at) = result.resume_at {
                state.wait_for_timer(resume_at)?;
                self.persist(state).await?;
                info!(
                    execution_id = %state.id,
                    flow_id = %state.flow_id,
                    conversation_id = %state.conversation_id,
                    node_id = %node.id,
                    resume_at = %resume_at,
                    "Execution waiting for timer"
                );
                return Ok(());
            }

            match (result.should_continue, result.next_node_id) {
                (true, Some(next)) => state.visit(next)?,
                _ => {
                    state.complete()?;
                    self.persist(state).await?;
                    info!(
                        execution_id = %state.id,
                        flow_id = %state.flow_id,
                        conversation_id = %state.conversation_id,
                        duration_ms = state.duration_ms(),
                        "Execution completed"
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Run one node with a timeout, retrying retryable failures with exponential backoff
    async fn execute_with_retry(
        &self,
        flow: &FlowDefinition,
        node: &FlowNode,
        state: &FlowExecutionState,
        user_input: Option<String>,
    ) -> Result<NodeExecutionResult, CoreError> {
        let mut attempt = 0;
        loop {
            let ctx = NodeContext::new(state, flow, user_input.as_deref());
            let outcome = match tokio::time::timeout(
                self.config.node_timeout(),
                self.node_executor.execute(node, &ctx),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(CoreError::NodeTimeout(self.config.node_timeout_ms)),
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        execution_id = %state.id,
                        node_id = %node.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Node failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn wait_deadline(
        &self,
        node: &FlowNode,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, CoreError> {
        let configured = if node.kind == NodeKind::WaitForInput {
            node.parse_config::<WaitForInputConfig>()?.timeout_seconds
        } else {
            None
        };

        configured
            .or(self.config.default_wait_timeout_secs)
            .map(|secs| timer_deadline(now, secs))
            .transpose()
    }

    async fn fail_execution(
        &self,
        state: &mut FlowExecutionState,
        reason: impl Into<String>,
    ) -> Result<(), CoreError> {
        let reason = reason.into();
        state.fail(reason.clone())?;
        self.persist(state).await?;
        error!(
            execution_id = %state.id,
            flow_id = %state.flow_id,
            conversation_id = %state.conversation_id,
            error = %reason,
            "Execution failed"
        );
        Ok(())
    }

    /// Load the flow an execution belongs to, failing the execution when it was deleted
    async fn flow_for(
        &self,
        state: &mut FlowExecutionState,
    ) -> Result<Option<FlowDefinition>, CoreError> {
        match self.flow_definition_repo.find_by_id(&state.flow_id).await? {
            Some(flow) => Ok(Some(flow)),
            None => {
                let reason =
                    CoreError::FlowDefinitionNotFound(state.flow_id.to_string()).to_string();
                self.fail_execution(state, reason).await?;
                Ok(None)
            }
        }
    }

    async fn load_flow(&self, flow_id: &FlowId) -> Result<FlowDefinition, CoreError> {
        self.flow_definition_repo
            .find_by_id(flow_id)
            .await?
            .ok_or_else(|| CoreError::FlowDefinitionNotFound(flow_id.to_string()))
    }

    async fn lock_conversation(
        &self,
        flow_id: &FlowId,
        conversation_id: &ConversationId,
    ) -> ConversationGuard {
        let key = (flow_id.clone(), conversation_id.clone());
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        ConversationGuard {
            guard: Some(guard),
            key,
            locks: self.locks.clone(),
        }
    }

    /// Lock an execution's conversation and load its latest state
    async fn lock_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<(ConversationGuard, FlowExecutionState), CoreError> {
        let snapshot = self.get_execution(execution_id).await?;
        let guard = self
            .lock_conversation(&snapshot.flow_id, &snapshot.conversation_id)
            .await;
        let state = self.get_execution(execution_id).await?;
        Ok((guard, state))
    }

    /// Save the execution, then publish its pending lifecycle events
    async fn persist(&self, state: &mut FlowExecutionState) -> Result<(), CoreError> {
        self.execution_repo.save(state).await?;

        for event in state.take_events() {
            self.event_handler.handle_event(event).await?;
        }

        Ok(())
    }
}
