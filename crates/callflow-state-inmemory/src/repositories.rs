use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use callflow_core::{
    AccountDirectory, CallFlow, CallFlowError, CallFlowRepository, CallFlowResult, CallId,
    CallRecord, CallRecordPatch, CallRecordRepository, FlowId, NumberRoute, NumberRouting,
    TenantId,
};

/// Key for a tenant's flow
pub(crate) fn flow_key(tenant_id: &TenantId, flow_id: &FlowId) -> String {
    format!("{}/{}", tenant_id.0, flow_id.0)
}

/// In-memory implementation of the CallFlowRepository
pub struct InMemoryCallFlowRepository {
    flows: Arc<RwLock<HashMap<String, CallFlow>>>,
}

impl InMemoryCallFlowRepository {
    /// Create a new in-memory flow repository
    pub fn new(flows: Arc<RwLock<HashMap<String, CallFlow>>>) -> Self {
        Self { flows }
    }
}

#[async_trait]
impl CallFlowRepository for InMemoryCallFlowRepository {
    async fn get_flow(
        &self,
        tenant_id: &TenantId,
        flow_id: &FlowId,
    ) -> CallFlowResult<Option<CallFlow>> {
        let flows = self.flows.read().await;
        Ok(flows.get(&flow_key(tenant_id, flow_id)).cloned())
    }

    async fn save_flow(&self, flow: &CallFlow) -> CallFlowResult<()> {
        let mut flows = self.flows.write().await;
        flows.insert(flow_key(&flow.tenant_id, &flow.id), flow.clone());
        Ok(())
    }
}

/// In-memory implementation of the CallRecordRepository
///
/// Patches are applied while holding the write lock, so concurrent updates
/// of one record never lose each other's fields.
pub struct InMemoryCallRecordRepository {
    records: Arc<RwLock<HashMap<CallId, CallRecord>>>,
}

impl InMemoryCallRecordRepository {
    /// Create a new in-memory call record repository
    pub fn new(records: Arc<RwLock<HashMap<CallId, CallRecord>>>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl CallRecordRepository for InMemoryCallRecordRepository {
    async fn find_by_call_id(&self, call_id: &CallId) -> CallFlowResult<Option<CallRecord>> {
        let records = self.records.read().await;
        Ok(records.get(call_id).cloned())
    }

    async fn create(&self, record: CallRecord) -> CallFlowResult<CallRecord> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.call_id) {
            debug!(call_id = %record.call_id, "Call record already exists");
            return Ok(existing.clone());
        }
        records.insert(record.call_id.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, call_id: &CallId, patch: CallRecordPatch) -> CallFlowResult<CallRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(call_id)
            .ok_or_else(|| CallFlowError::call_not_found(call_id))?;
        patch.apply(record);
        Ok(record.clone())
    }

    async fn list_for_tenant(&self, tenant_id: &TenantId) -> CallFlowResult<Vec<CallRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<CallRecord> = records
            .values()
            .filter(|record| record.tenant_id == *tenant_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }
}

/// In-memory number routing table
pub struct InMemoryNumberRouting {
    routes: Arc<RwLock<HashMap<String, NumberRoute>>>,
}

impl InMemoryNumberRouting {
    /// Create a routing table over shared storage
    pub fn new(routes: Arc<RwLock<HashMap<String, NumberRoute>>>) -> Self {
        Self { routes }
    }

    /// Add or replace a route
    pub async fn insert(&self, route: NumberRoute) {
        let mut routes = self.routes.write().await;
        routes.insert(route.number.clone(), route);
    }
}

#[async_trait]
impl NumberRouting for InMemoryNumberRouting {
    async fn resolve_number(&self, number: &str) -> CallFlowResult<Option<NumberRoute>> {
        let routes = self.routes.read().await;
        Ok(routes.get(number.trim()).cloned())
    }
}

/// In-memory account id to email directory
pub struct InMemoryAccountDirectory {
    accounts: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryAccountDirectory {
    /// Create a directory over shared storage
    pub fn new(accounts: Arc<RwLock<HashMap<String, String>>>) -> Self {
        Self { accounts }
    }

    /// Add or replace an account
    pub async fn insert(&self, account_id: impl Into<String>, email: impl Into<String>) {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account_id.into(), email.into());
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn lookup_account_email(&self, account_id: &str) -> CallFlowResult<Option<String>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(account_id).cloned())
    }
}
