//! Operator endpoints: transfers, transcripts and call lookups

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use callflow_core::{
    CallId, CallRecord, CallTranscript, ResegmentSummary, TenantId, TransferRequest,
    TransferResult,
};

use crate::error::{ServerError, ServerResult};
use crate::server::CallFlowServer;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ServerResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ServerError::ValidationError(rejection.body_text()))
}

/// `GET /calls/:call_id`
pub async fn get_call(
    State(server): State<Arc<CallFlowServer>>,
    Path(call_id): Path<String>,
) -> ServerResult<Json<CallRecord>> {
    let record = server.engine().call_record(&CallId(call_id)).await?;
    Ok(Json(record))
}

/// `POST /calls/:call_id/transfer`
pub async fn transfer_call(
    State(server): State<Arc<CallFlowServer>>,
    Path(call_id): Path<String>,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> ServerResult<Json<TransferResult>> {
    let request = body(payload)?;
    info!(%call_id, target = %request.target, initiated_by = %request.initiated_by, "Transfer requested");
    let result = server
        .engine()
        .transfer_call(&CallId(call_id), &request)
        .await?;
    Ok(Json(result))
}

/// `PUT /calls/:call_id/transcript`
pub async fn put_transcript(
    State(server): State<Arc<CallFlowServer>>,
    Path(call_id): Path<String>,
    payload: Result<Json<CallTranscript>, JsonRejection>,
) -> ServerResult<StatusCode> {
    let transcript = body(payload)?;
    server
        .engine()
        .store_transcript(&CallId(call_id), transcript)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /calls/:call_id/resegment`
pub async fn resegment_call(
    State(server): State<Arc<CallFlowServer>>,
    Path(call_id): Path<String>,
) -> ServerResult<Json<Value>> {
    let segments = server
        .engine()
        .resegment_transcription(&CallId(call_id.clone()))
        .await?;
    Ok(Json(json!({ "callId": call_id, "segments": segments })))
}

/// `POST /tenants/:tenant_id/resegment`
pub async fn resegment_tenant(
    State(server): State<Arc<CallFlowServer>>,
    Path(tenant_id): Path<String>,
) -> ServerResult<Json<ResegmentSummary>> {
    let summary = server
        .engine()
        .resegment_all_transcriptions(&TenantId(tenant_id))
        .await?;
    Ok(Json(summary))
}
