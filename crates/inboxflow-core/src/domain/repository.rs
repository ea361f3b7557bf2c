//! Repository traits for the Inboxflow engine
//!
//! The flow definition store and the execution state store are external
//! collaborators. Implement these traits to plug in a persistence backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::execution_state::{ExecutionStatus, FlowExecutionState};
use super::flow_definition::FlowDefinition;
use crate::types::{ConversationId, ExecutionId, FlowId};
use crate::CoreError;

/// Repository for flow definitions
#[async_trait]
pub trait FlowDefinitionRepository: Send + Sync {
    /// Find a flow definition by ID
    async fn find_by_id(&self, id: &FlowId) -> Result<Option<FlowDefinition>, CoreError>;

    /// Save a flow definition
    async fn save(&self, definition: &FlowDefinition) -> Result<(), CoreError>;

    /// Delete a flow definition
    async fn delete(&self, id: &FlowId) -> Result<(), CoreError>;

    /// Get all flow definitions
    async fn find_all(&self) -> Result<Vec<FlowDefinition>, CoreError>;

    /// Get the flow definitions that triggers may start
    async fn find_active(&self) -> Result<Vec<FlowDefinition>, CoreError> {
        Ok(self
            .find_all()
            .await?
            .into_iter()
            .filter(|flow| flow.active)
            .collect())
    }
}

/// Filter for listing executions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFilter {
    /// Only executions of this flow
    #[serde(default)]
    pub flow_id: Option<FlowId>,

    /// Only executions in this conversation
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,

    /// Only executions in this status
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

impl ExecutionFilter {
    /// Whether `state` passes the filter
    pub fn matches(&self, state: &FlowExecutionState) -> bool {
        self.flow_id.as_ref().map_or(true, |id| &state.flow_id == id)
            && self
                .conversation_id
                .as_ref()
                .map_or(true, |id| &state.conversation_id == id)
            && self.status.map_or(true, |status| state.status == status)
    }
}

/// Repository for execution state
#[async_trait]
pub trait ExecutionStateRepository: Send + Sync {
    /// Find an execution by ID
    async fn find_by_id(&self, id: &ExecutionId) -> Result<Option<FlowExecutionState>, CoreError>;

    /// Insert or replace an execution
    async fn save(&self, state: &FlowExecutionState) -> Result<(), CoreError>;

    /// Delete an execution
    async fn delete(&self, id: &ExecutionId) -> Result<(), CoreError>;

    /// The non-terminal execution of `flow_id` in `conversation_id`, if any
    async fn find_active(
        &self,
        flow_id: &FlowId,
        conversation_id: &ConversationId,
    ) -> Result<Option<FlowExecutionState>, CoreError>;

    /// The most recently active execution in `conversation_id` waiting for a reply
    async fn find_waiting_for_input(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<FlowExecutionState>, CoreError>;

    /// List executions matching `filter`, most recently active first
    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<FlowExecutionState>, CoreError>;

    /// Waiting executions whose timer or reply deadline is at or before `now`
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<FlowExecutionState>, CoreError>;

    /// Executions left in the running state
    async fn find_running(&self) -> Result<Vec<FlowExecutionState>, CoreError>;
}

/// Memory implementations for testing and single-process deployments
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::DashMap;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// In-memory flow definition repository
    pub struct MemoryFlowDefinitionRepository {
        definitions: Arc<DashMap<FlowId, FlowDefinition>>,
    }

    impl MemoryFlowDefinitionRepository {
        /// Create a new memory flow definition repository
        pub fn new() -> Self {
            Self {
                definitions: Arc::new(DashMap::with_capacity(16)),
            }
        }
    }

    impl Default for MemoryFlowDefinitionRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl FlowDefinitionRepository for MemoryFlowDefinitionRepository {
        async fn find_by_id(&self, id: &FlowId) -> Result<Option<FlowDefinition>, CoreError> {
            Ok(self.definitions.get(id).map(|entry| entry.clone()))
        }

        async fn save(&self, definition: &FlowDefinition) -> Result<(), CoreError> {
            self.definitions
                .insert(definition.id.clone(), definition.clone());
            Ok(())
        }

        async fn delete(&self, id: &FlowId) -> Result<(), CoreError> {
            self.definitions.remove(id);
            Ok(())
        }

        async fn find_all(&self) -> Result<Vec<FlowDefinition>, CoreError> {
            let mut all: Vec<FlowDefinition> = self
                .definitions
                .iter()
                .map(|entry| entry.value().clone())
                .collect();
            all.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(all)
        }
    }

    /// In-memory execution state repository.
    ///
    /// Unfinished executions are always kept. Finished ones are evicted oldest first
    /// once more than the retention limit have accumulated.
    pub struct MemoryExecutionStateRepository {
        executions: Arc<DashMap<ExecutionId, FlowExecutionState>>,
        finished: Mutex<VecDeque<ExecutionId>>,
        retention: Option<usize>,
    }

    impl MemoryExecutionStateRepository {
        /// Create a repository that keeps every execution
        pub fn new() -> Self {
            Self {
                executions: Arc::new(DashMap::with_capacity(64)),
                finished: Mutex::new(VecDeque::new()),
                retention: None,
            }
        }

        /// Create a repository that keeps at most `retention` finished executions
        pub fn with_retention(retention: usize) -> Self {
            Self {
                retention: Some(retention),
                ..Self::new()
            }
        }

        fn track_finished(&self, id: &ExecutionId) {
            let Some(retention) = self.retention else {
                return;
            };
            let mut finished = self
                .finished
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            finished.push_back(id.clone());
            while finished.len() > retention {
                if let Some(evicted) = finished.pop_front() {
                    self.executions.remove(&evicted);
                }
            }
        }

        fn collect<F>(&self, predicate: F) -> Vec<FlowExecutionState>
        where
            F: Fn(&FlowExecutionState) -> bool,
        {
            let mut found: Vec<FlowExecutionState> = self
                .executions
                .iter()
                .filter(|entry| predicate(entry.value()))
                .map(|entry| entry.value().clone())
                .collect();
            found.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
            found
        }
    }

    impl Default for MemoryExecutionStateRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ExecutionStateRepository for MemoryExecutionStateRepository {
        async fn find_by_id(
            &self,
            id: &ExecutionId,
        ) -> Result<Option<FlowExecutionState>, CoreError> {
            Ok(self.executions.get(id).map(|entry| entry.clone()))
        }

        async fn save(&self, state: &FlowExecutionState) -> Result<(), CoreError> {
            let previous = self.executions.insert(state.id.clone(), state.clone());
            let newly_finished = state.status.is_terminal()
                && previous.map_or(true, |previous| !previous.status.is_terminal());
            if newly_finished {
                self.track_finished(&state.id);
            }
            Ok(())
        }

        async fn delete(&self, id: &ExecutionId) -> Result<(), CoreError> {
            if self.executions.remove(id).is_some() && self.retention.is_some() {
                self.finished
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .retain(|tracked| tracked != id);
            }
            Ok(())
        }

        async fn find_active(
            &self,
            flow_id: &FlowId,
            conversation_id: &ConversationId,
        ) -> Result<Option<FlowExecutionState>, CoreError> {
            Ok(self
                .collect(|state| {
                    &state.flow_id == flow_id
                        && &state.conversation_id == conversation_id
                        && !state.status.is_terminal()
                })
                .into_iter()
                .next())
        }

        async fn find_waiting_for_input(
            &self,
            conversation_id: &ConversationId,
        ) -> Result<Option<FlowExecutionState>, CoreError> {
            Ok(self
                .collect(|state| {
                    &state.conversation_id == conversation_id
                        && state.status == ExecutionStatus::Waiting
                        && state.waiting_for_input
                })
                .into_iter()
                .next())
        }

        async fn list(
            &self,
            filter: &ExecutionFilter,
        ) -> Result<Vec<FlowExecutionState>, CoreError> {
            Ok(self.collect(|state| filter.matches(state)))
        }

        async fn find_due(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<FlowExecutionState>, CoreError> {
            let mut due = self.collect(|state| {
                state.status == ExecutionStatus::Waiting
                    && (state.resume_at.map_or(false, |at| at <= now)
                        || state.wait_deadline.map_or(false, |at| at <= now))
            });
            due.reverse();
            Ok(due)
        }

        async fn find_running(&self) -> Result<Vec<FlowExecutionState>, CoreError> {
            Ok(self.collect(|state| state.status == ExecutionStatus::Running))
        }
    }
}

#[cfg(all(test, feature = "testing"))]
mod tests {
    use super::memory::*;
    use super::*;
    use crate::domain::flow_definition::{FlowNode, NodeKind};
    use crate::types::{NodeId, TriggerEvent};
    use serde_json::json;

    fn flow(id: &str, active: bool) -> FlowDefinition {
        FlowDefinition {
            id: FlowId::from(id),
            name: id.to_string(),
            description: None,
            active,
            nodes: vec![FlowNode::new(
                "start",
                NodeKind::Trigger,
                json!({"trigger_type": "message_received"}),
            )],
            edges: vec![],
        }
    }

    fn execution(flow_id: &str, conversation: &str) -> FlowExecutionState {
        let mut state = FlowExecutionState::new(
            FlowId::from(flow_id),
            TriggerEvent::message(conversation, "p1", "hi"),
            NodeId::from("start"),
        );
        state.take_events();
        state
    }

    #[tokio::test]
    async fn test_flow_definition_repository() {
        let repo = MemoryFlowDefinitionRepository::new();
        repo.save(&flow("b", true)).await.unwrap();
        repo.save(&flow("a", false)).await.unwrap();

        assert!(repo.find_by_id(&FlowId::from("a")).await.unwrap().is_some());

        let all = repo.find_all().await.unwrap();
        assert_eq!(
            all.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        let active = repo.find_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, FlowId::from("b"));

        repo.delete(&FlowId::from("b")).await.unwrap();
        assert!(repo.find_by_id(&FlowId::from("b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_active_ignores_terminal() {
        let repo = MemoryExecutionStateRepository::new();
        let mut done = execution("f1", "c1");
        done.complete().unwrap();
        repo.save(&done).await.unwrap();

        let flow_id = FlowId::from("f1");
        let conversation = ConversationId::from("c1");
        assert!(repo.find_active(&flow_id, &conversation).await.unwrap().is_none());

        let running = execution("f1", "c1");
        repo.save(&running).await.unwrap();
        let found = repo.find_active(&flow_id, &conversation).await.unwrap().unwrap();
        assert_eq!(found.id, running.id);
    }

    #[tokio::test]
    async fn test_find_waiting_and_due() {
        let repo = MemoryExecutionStateRepository::new();
        let now = Utc::now();

        let mut asking = execution("f1", "c1");
        asking.wait_for_input(Some(now - chrono::Duration::seconds(1))).unwrap();
        repo.save(&asking).await.unwrap();

        let mut sleeping = execution("f2", "c1");
        sleeping
            .wait_for_timer(now + chrono::Duration::hours(1))
            .unwrap();
        repo.save(&sleeping).await.unwrap();

        let waiting = repo
            .find_waiting_for_input(&ConversationId::from("c1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(waiting.id, asking.id);

        let due = repo.find_due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, asking.id);

        let later = repo.find_due(now + chrono::Duration::hours(2)).await.unwrap();
        assert_eq!(later.len(), 2);
    }

    #[tokio::test]
    async fn test_list_with_filter_and_running() {
        let repo = MemoryExecutionStateRepository::new();
        repo.save(&execution("f1", "c1")).await.unwrap();
        repo.save(&execution("f1", "c2")).await.unwrap();
        let mut failed = execution("f2", "c1");
        failed.fail("boom").unwrap();
        repo.save(&failed).await.unwrap();

        let by_flow = ExecutionFilter {
            flow_id: Some(FlowId::from("f1")),
            ..Default::default()
        };
        assert_eq!(repo.list(&by_flow).await.unwrap().len(), 2);

        let failed_only = ExecutionFilter {
            status: Some(ExecutionStatus::Failed),
            ..Default::default()
        };
        let listed = repo.list(&failed_only).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, failed.id);

        assert_eq!(repo.list(&ExecutionFilter::default()).await.unwrap().len(), 3);
        assert_eq!(repo.find_running().await.unwrap().len(), 2);

        repo.delete(&failed.id).await.unwrap();
        assert!(repo.find_by_id(&failed.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest_finished() {
        let repo = MemoryExecutionStateRepository::with_retention(2);
        let waiting = execution("f1", "c0");
        repo.save(&waiting).await.unwrap();

        let mut finished = Vec::new();
        for conversation in ["c1", "c2", "c3"] {
            let mut state = execution("f1", conversation);
            repo.save(&state).await.unwrap();
            state.complete().unwrap();
            repo.save(&state).await.unwrap();
            // Saving a finished execution again does not count twice
            repo.save(&state).await.unwrap();
            finished.push(state);
        }

        assert!(repo.find_by_id(&finished[0].id).await.unwrap().is_none());
        assert!(repo.find_by_id(&finished[1].id).await.unwrap().is_some());
        assert!(repo.find_by_id(&finished[2].id).await.unwrap().is_some());
        assert!(repo.find_by_id(&waiting.id).await.unwrap().is_some());
        assert_eq!(repo.list(&ExecutionFilter::default()).await.unwrap().len(), 3);

        let unbounded = MemoryExecutionStateRepository::new();
        for state in &finished {
            unbounded.save(state).await.unwrap();
        }
        assert_eq!(unbounded.list(&ExecutionFilter::default()).await.unwrap().len(), 3);
    }
}
