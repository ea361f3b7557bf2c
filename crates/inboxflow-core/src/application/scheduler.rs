use super::flow_execution_service::FlowExecutionService;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodically resumes executions whose timers or reply deadlines are due
pub struct FlowScheduler;

impl FlowScheduler {
    /// Start ticking every `interval` on the current runtime
    pub fn spawn(service: Arc<FlowExecutionService>, interval: Duration) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_ms = interval.as_millis() as u64, "Flow scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.process_due(Utc::now()).await {
                            Ok(0) => {}
                            Ok(processed) => {
                                tracing::debug!(processed, "Processed due executions");
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to process due executions");
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Flow scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, task }
    }
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the scheduler and wait for the current tick to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Flow scheduler task panicked");
        }
    }
}

#[cfg(all(test, feature = "testing"))]
mod tests {
    use super::*;
    use crate::application::event_broadcaster::LoggingEventHandler;
    use crate::application::node_executor::NodeExecutor;
    use crate::config::EngineConfig;
    use crate::domain::repository::memory::{
        MemoryExecutionStateRepository, MemoryFlowDefinitionRepository,
    };

    fn idle_service() -> Arc<FlowExecutionService> {
        Arc::new(FlowExecutionService::new(
            Arc::new(MemoryFlowDefinitionRepository::new()),
            Arc::new(MemoryExecutionStateRepository::new()),
            NodeExecutor::new(),
            Arc::new(LoggingEventHandler),
            EngineConfig::default(),
        ))
    }

    #[test]
    fn test_shutdown_stops_the_task() {
        tokio_test::block_on(async {
            let handle = FlowScheduler::spawn(idle_service(), Duration::from_millis(5));
            tokio::time::sleep(Duration::from_millis(25)).await;
            handle.shutdown().await;
        });
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let handle = FlowScheduler::spawn(idle_service(), Duration::ZERO);
        tokio::task::yield_now().await;
        handle.shutdown().await;
    }
}
