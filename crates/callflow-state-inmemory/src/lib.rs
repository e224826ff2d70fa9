//! In-memory state store for the call flow engine
//!
//! This crate provides in-memory implementations of the repository and
//! collaborator traits defined in callflow-core, plus a carrier fake that
//! records commands. It backs tests and local development where persistence
//! is not required.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use callflow_core::{
    AccountDirectory, CallFlow, CallFlowError, CallFlowRepository, CallFlowResult, CallId,
    CallRecord, CallRecordRepository, NumberRoute, NumberRouting,
};

pub mod repositories;
pub use repositories::{
    InMemoryAccountDirectory, InMemoryCallFlowRepository, InMemoryCallRecordRepository,
    InMemoryNumberRouting,
};

pub mod carrier;
pub use carrier::{CarrierCommand, RecordingCarrier};

/// Flows, number routes and accounts to preload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    /// Flow definitions
    #[serde(default)]
    pub flows: Vec<CallFlow>,
    /// Number routing entries
    #[serde(default)]
    pub numbers: Vec<NumberRoute>,
    /// Account id to email
    #[serde(default)]
    pub accounts: HashMap<String, String>,
}

impl SeedData {
    /// Parse seed data from JSON
    pub fn from_json(json: &str) -> CallFlowResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read seed data from a JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> CallFlowResult<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            CallFlowError::Configuration(format!("cannot read seed file {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }
}

/// Repositories handed to the engine
#[derive(Clone)]
pub struct StateRepositories {
    /// Flow definitions
    pub flows: Arc<dyn CallFlowRepository>,
    /// Call records
    pub records: Arc<dyn CallRecordRepository>,
    /// Number routing
    pub routing: Arc<dyn NumberRouting>,
    /// Account directory
    pub accounts: Arc<dyn AccountDirectory>,
}

/// Provider for in-memory state store repositories
#[derive(Clone, Default)]
pub struct InMemoryStateStoreProvider {
    flows: Arc<RwLock<HashMap<String, CallFlow>>>,
    records: Arc<RwLock<HashMap<CallId, CallRecord>>>,
    routes: Arc<RwLock<HashMap<String, NumberRoute>>>,
    accounts: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStateStoreProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Create repositories over the provider's shared storage
    pub fn create_repositories(&self) -> StateRepositories {
        StateRepositories {
            flows: Arc::new(InMemoryCallFlowRepository::new(self.flows.clone())),
            records: Arc::new(InMemoryCallRecordRepository::new(self.records.clone())),
            routing: Arc::new(InMemoryNumberRouting::new(self.routes.clone())),
            accounts: Arc::new(InMemoryAccountDirectory::new(self.accounts.clone())),
        }
    }

    /// Routing table, for adding numbers
    pub fn routing(&self) -> InMemoryNumberRouting {
        InMemoryNumberRouting::new(self.routes.clone())
    }

    /// Account directory, for adding accounts
    pub fn accounts(&self) -> InMemoryAccountDirectory {
        InMemoryAccountDirectory::new(self.accounts.clone())
    }

    /// Load seed data. Flows that fail validation are stored anyway and
    /// fail closed when a call reaches the bad step.
    pub async fn seed(&self, data: SeedData) -> CallFlowResult<()> {
        let repositories = self.create_repositories();
        let (flows, numbers, accounts) = (data.flows.len(), data.numbers.len(), data.accounts.len());
        for flow in &data.flows {
            if let Err(err) = flow.validate() {
                warn!(flow_id = %flow.id, tenant_id = %flow.tenant_id, error = %err, "Seeded flow is invalid");
            }
            repositories.flows.save_flow(flow).await?;
        }
        let routing = self.routing();
        for route in data.numbers {
            routing.insert(route).await;
        }
        let directory = self.accounts();
        for (account_id, email) in data.accounts {
            directory.insert(account_id, email).await;
        }
        info!(flows, numbers, accounts, "Loaded seed data");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
