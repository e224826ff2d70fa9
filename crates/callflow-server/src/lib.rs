//! Call flow server
//!
//! HTTP front end of the call flow engine: carrier webhooks, the operator
//! API and the carrier REST client.

use std::sync::Arc;

use callflow_core::{
    CallFlowEngine, CarrierClient, EngineDependencies, LogOnlyCarrier, SharedClock, SystemClock,
};
use callflow_state_inmemory::{InMemoryStateStoreProvider, SeedData, StateRepositories};
use callflow_state_postgres::PostgresStateStoreProvider;

/// API module
pub mod api;

/// Carrier REST client module
pub mod carrier;

/// Configuration module
pub mod config;

/// Error module
pub mod error;

/// Server module
pub mod server;

pub use carrier::HttpCarrierClient;
pub use config::{CarrierMode, LogFormat, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use server::CallFlowServer;

/// Run function
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    init_logging(&config);

    let (repositories, store_kind) = create_state_store(&config).await?;
    let carrier = create_carrier(&config)?;
    let server = build_server(config, repositories, store_kind, carrier, Arc::new(SystemClock));

    server.run().await
}

/// Initialize logging
pub fn init_logging(config: &ServerConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let result = match config.log_format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Pretty => fmt().with_env_filter(filter).with_target(true).try_init(),
    };
    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

/// Wire the engine and the server around the given collaborators
pub fn build_server(
    config: ServerConfig,
    repositories: StateRepositories,
    store_kind: &'static str,
    carrier: Arc<dyn CarrierClient>,
    clock: SharedClock,
) -> CallFlowServer {
    let settings = config.engine_settings();
    let records = repositories.records.clone();
    let deps = EngineDependencies {
        flows: repositories.flows,
        records: repositories.records,
        routing: repositories.routing,
        accounts: repositories.accounts,
        carrier,
        clock,
    };
    let engine = Arc::new(CallFlowEngine::new(deps, settings));
    CallFlowServer::new(config, engine, records, store_kind)
}

/// Create the state store named by `STATE_STORE_URL`
pub async fn create_state_store(
    config: &ServerConfig,
) -> ServerResult<(StateRepositories, &'static str)> {
    if config.state_store_url.starts_with("memory://") {
        tracing::info!("Using in-memory state store");
        let provider = InMemoryStateStoreProvider::new();
        if let Some(path) = &config.seed_file {
            let seed = SeedData::from_file(path).await?;
            provider.seed(seed).await?;
        }
        return Ok((provider.create_repositories(), "memory"));
    }

    if config.state_store_url.starts_with("postgres://")
        || config.state_store_url.starts_with("postgresql://")
    {
        tracing::info!("Using PostgreSQL state store");
        let provider = PostgresStateStoreProvider::new(&config.state_store_url).await?;
        let repos = provider.create_repositories();
        return Ok((
            StateRepositories {
                flows: repos.flows,
                records: repos.records,
                routing: repos.routing,
                accounts: repos.accounts,
            },
            "postgres",
        ));
    }

    Err(ServerError::ConfigError(format!(
        "Unsupported state store URL: {}",
        config.state_store_url
    )))
}

/// Create the carrier client named by `CARRIER_MODE`
pub fn create_carrier(config: &ServerConfig) -> ServerResult<Arc<dyn CarrierClient>> {
    match config.carrier_mode {
        CarrierMode::Log => {
            tracing::warn!("Using log-only carrier, no calls will be placed");
            Ok(Arc::new(LogOnlyCarrier))
        }
        CarrierMode::Http => {
            let api_url = config.carrier_api_url.clone().ok_or_else(|| {
                ServerError::ConfigError("CARRIER_API_URL is required".to_string())
            })?;
            let account_sid = config.carrier_account_sid.clone().ok_or_else(|| {
                ServerError::ConfigError("CARRIER_ACCOUNT_SID is required".to_string())
            })?;
            tracing::info!(%api_url, "Using HTTP carrier client");
            let client =
                HttpCarrierClient::new(api_url, account_sid, config.carrier_auth_token.clone())?;
            Ok(Arc::new(client))
        }
    }
}
