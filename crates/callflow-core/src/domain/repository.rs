//! Repository traits for the call flow engine
//!
//! The engine never talks to a database directly. State crates implement
//! these traits; the in-memory crate backs tests and local development.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::call_record::{CallId, CallRecord, CallRecordPatch};
use super::flow_definition::{CallFlow, FlowId, TenantId};
use crate::CallFlowResult;

/// Repository for flow definitions
#[async_trait]
pub trait CallFlowRepository: Send + Sync {
    /// Fetch a tenant's flow
    async fn get_flow(&self, tenant_id: &TenantId, flow_id: &FlowId)
        -> CallFlowResult<Option<CallFlow>>;

    /// Insert or replace a flow
    async fn save_flow(&self, flow: &CallFlow) -> CallFlowResult<()>;
}

/// Repository for call records
#[async_trait]
pub trait CallRecordRepository: Send + Sync {
    /// Find the record of a call
    async fn find_by_call_id(&self, call_id: &CallId) -> CallFlowResult<Option<CallRecord>>;

    /// Store a new record.
    ///
    /// There is at most one record per call id: if one already exists it is
    /// returned unchanged.
    async fn create(&self, record: CallRecord) -> CallFlowResult<CallRecord>;

    /// Atomically merge a patch into the stored record and return the result
    async fn update(&self, call_id: &CallId, patch: CallRecordPatch) -> CallFlowResult<CallRecord>;

    /// All records of a tenant
    async fn list_for_tenant(&self, tenant_id: &TenantId) -> CallFlowResult<Vec<CallRecord>>;
}

/// Routing entry for one of a tenant's phone numbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberRoute {
    /// Number in E.164 form
    pub number: String,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Phone number record id
    pub phone_number_id: String,
    /// Flow attached to the number
    #[serde(default)]
    pub flow_id: Option<FlowId>,
    /// Recording policy for calls to the number
    #[serde(default)]
    pub record_calls: bool,
}

/// Maps dialled numbers to tenants and flows
#[async_trait]
pub trait NumberRouting: Send + Sync {
    /// Look up the routing entry for a dialled number
    async fn resolve_number(&self, number: &str) -> CallFlowResult<Option<NumberRoute>>;
}

/// Resolves internal account ids to dialable identities
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Email of the account, if it exists
    async fn lookup_account_email(&self, account_id: &str) -> CallFlowResult<Option<String>>;
}
