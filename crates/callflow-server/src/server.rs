//! Main call flow server implementation

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use callflow_core::{CallFlowEngine, CallId, CallRecordRepository};

use crate::config::ServerConfig;
use crate::error::ServerResult;

/// Main server implementation
#[derive(Clone)]
pub struct CallFlowServer {
    /// Configuration
    pub config: ServerConfig,

    /// The engine every webhook is handed to
    engine: Arc<CallFlowEngine>,

    /// Call records, for health checks
    records: Arc<dyn CallRecordRepository>,

    /// Label of the configured state store
    store_kind: &'static str,
}

impl std::fmt::Debug for CallFlowServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallFlowServer")
            .field("config", &self.config)
            .field("store_kind", &self.store_kind)
            .finish()
    }
}

impl CallFlowServer {
    /// Create a new server
    pub fn new(
        config: ServerConfig,
        engine: Arc<CallFlowEngine>,
        records: Arc<dyn CallRecordRepository>,
        store_kind: &'static str,
    ) -> Self {
        Self {
            config,
            engine,
            records,
            store_kind,
        }
    }

    /// The engine
    pub fn engine(&self) -> &CallFlowEngine {
        &self.engine
    }

    /// Label of the state store backend
    pub fn store_kind(&self) -> &'static str {
        self.store_kind
    }

    /// Run until ctrl-c
    pub async fn run(self) -> ServerResult<()> {
        info!("Starting call flow server");

        let app = crate::api::build_router(Arc::new(self.clone()));

        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| {
                crate::error::ServerError::ConfigError(format!("Invalid bind address: {}", e))
            })?;
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped");
        Ok(())
    }

    /// Whether the state store answers
    pub async fn check_state_store_health(&self) -> ServerResult<bool> {
        self.records
            .find_by_call_id(&CallId::new("health-check"))
            .await?;
        Ok(true)
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
