//! Main Inboxflow Server implementation
//!
//! Wires repositories, the node executor, the execution engine and the event
//! broadcaster together and serves them over HTTP.

use axum::Router;
use inboxflow_core::domain::repository::memory::{
    MemoryExecutionStateRepository, MemoryFlowDefinitionRepository,
};
use inboxflow_core::{
    CompositeEventHandler, EventBroadcaster, ExecutionEventHandler, ExecutionStateRepository,
    FlowDefinitionRepository, FlowDefinitionService, FlowExecutionService, FlowScheduler,
    MessageSender, NodeExecutor, WebhookClient,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::http_client::ReqwestWebhookClient;
use crate::messaging::{LoggingMessageSender, MetricsEventHandler};

/// State shared by every request handler
#[derive(Clone)]
pub struct AppState {
    /// Flow definition store
    pub definitions: Arc<FlowDefinitionService>,
    /// Execution engine
    pub engine: Arc<FlowExecutionService>,
    /// Live event fan-out
    pub broadcaster: EventBroadcaster,
}

/// Main server implementation
pub struct InboxflowServer {
    /// Configuration
    pub config: ServerConfig,

    state: AppState,
}

impl std::fmt::Debug for InboxflowServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboxflowServer")
            .field("config", &self.config)
            .field("subscribers", &self.state.broadcaster.subscriber_count())
            .finish()
    }
}

impl InboxflowServer {
    /// Create a server that calls webhooks over HTTP and logs outbound messages
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let webhook_client = Arc::new(ReqwestWebhookClient::new(config.webhook_timeout())?);
        Ok(Self::with_collaborators(
            config,
            Arc::new(LoggingMessageSender),
            webhook_client,
        ))
    }

    /// Create a server with the given outbound collaborators
    pub fn with_collaborators(
        config: ServerConfig,
        sender: Arc<dyn MessageSender>,
        webhook_client: Arc<dyn WebhookClient>,
    ) -> Self {
        let flow_repo: Arc<dyn FlowDefinitionRepository> =
            Arc::new(MemoryFlowDefinitionRepository::new());
        let execution_repo: Arc<dyn ExecutionStateRepository> =
            Arc::new(MemoryExecutionStateRepository::with_retention(
                config.execution_retention,
            ));

        let broadcaster = EventBroadcaster::new(config.engine.event_buffer);
        let event_handler: Arc<dyn ExecutionEventHandler> = Arc::new(
            CompositeEventHandler::new()
                .with_handler(Arc::new(broadcaster.clone()))
                .with_handler(Arc::new(MetricsEventHandler)),
        );

        let engine = Arc::new(FlowExecutionService::new(
            flow_repo.clone(),
            execution_repo,
            NodeExecutor::with_builtin_handlers(sender, webhook_client),
            event_handler,
            config.engine.clone(),
        ));
        let definitions = Arc::new(FlowDefinitionService::new(flow_repo, engine.clone()));

        Self {
            config,
            state: AppState {
                definitions,
                engine,
                broadcaster,
            },
        }
    }

    /// Shared handler state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// HTTP router over this server's state
    pub fn router(&self) -> Router {
        crate::api::build_router(self.state())
    }

    /// Recover, start the scheduler and serve until Ctrl-C
    pub async fn run(self) -> ServerResult<()> {
        info!("Starting Inboxflow Server");

        let recovered = self.state.engine.recover().await?;
        if recovered > 0 {
            info!(recovered, "Recovered interrupted executions");
        }

        let scheduler = FlowScheduler::spawn(
            self.state.engine.clone(),
            self.config.engine.scheduler_interval(),
        );

        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| ServerError::ConfigError(format!("Invalid bind address: {}", e)))?;
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await;

        scheduler.shutdown().await;
        served?;

        info!("Inboxflow Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
