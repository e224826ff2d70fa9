//! Outbound control of the carrier

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::call_record::CallId;
use crate::CallFlowResult;

/// Request to place an outbound leg into a conference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialLegRequest {
    /// Number or `client:` identity to ring
    pub to: String,
    /// Caller id presented to the callee
    pub from: String,
    /// URL fetched when the leg answers
    pub answer_url: String,
    /// URL receiving the leg's status changes
    pub status_callback: String,
    /// Ring timeout in seconds
    pub timeout_secs: u32,
}

/// REST operations the engine performs on live calls
#[async_trait]
pub trait CarrierClient: Send + Sync {
    /// Place an outbound leg, returning its call id
    async fn dial_leg(&self, request: DialLegRequest) -> CallFlowResult<CallId>;

    /// Point a live call at a new control document URL
    async fn redirect_call(&self, call_id: &CallId, url: &str) -> CallFlowResult<()>;

    /// End a live call
    async fn hangup_call(&self, call_id: &CallId) -> CallFlowResult<()>;
}

/// Carrier that only logs, for local development
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyCarrier;

#[async_trait]
impl CarrierClient for LogOnlyCarrier {
    async fn dial_leg(&self, request: DialLegRequest) -> CallFlowResult<CallId> {
        let leg = CallId(format!("LOG{}", uuid::Uuid::new_v4().simple()));
        info!(%leg, to = %request.to, answer_url = %request.answer_url, "dial leg (log only)");
        Ok(leg)
    }

    async fn redirect_call(&self, call_id: &CallId, url: &str) -> CallFlowResult<()> {
        info!(%call_id, %url, "redirect call (log only)");
        Ok(())
    }

    async fn hangup_call(&self, call_id: &CallId) -> CallFlowResult<()> {
        info!(%call_id, "hang up call (log only)");
        Ok(())
    }
}
