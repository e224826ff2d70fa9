//! Carrier webhook endpoints
//!
//! Form-encoded carrier parameters in, XML control documents out. The query
//! string carries the resumption token. Nothing here answers with an error
//! status: a request that cannot be understood gets a hangup.

use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Query, RawQuery, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use callflow_core::{
    CallId, CallbackAction, ConferenceEvent, ConferenceEventKind, ControlDocument, FlowId,
    ResumptionToken, TenantId, WebhookParams,
};

use crate::server::CallFlowServer;

type Params = Result<Form<WebhookParams>, FormRejection>;

/// XML control document response
pub struct ControlXml(pub ControlDocument);

impl IntoResponse for ControlXml {
    fn into_response(self) -> Response {
        (
            [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
            self.0.render(),
        )
            .into_response()
    }
}

fn hangup() -> ControlXml {
    ControlXml(ControlDocument::hangup_only())
}

fn params(form: Params) -> Result<WebhookParams, ControlXml> {
    form.map(|Form(params)| params).map_err(|rejection| {
        error!(error = %rejection.body_text(), "Unreadable webhook body, hanging up");
        hangup()
    })
}

/// Parse the body and the resumption token of a callback
fn callback(
    action: CallbackAction,
    query: Option<String>,
    form: Params,
) -> Result<(ResumptionToken, WebhookParams), ControlXml> {
    let params = params(form)?;
    let token = ResumptionToken::from_query(action, query.as_deref().unwrap_or_default())
        .map_err(|err| {
            error!(call_sid = %params.call_sid, action = action.as_str(), error = %err, "Rejected callback, hanging up");
            hangup()
        })?;
    info!(call_sid = %params.call_sid, action = action.as_str(), "Webhook received");
    Ok((token, params))
}

/// Caller leg of a callback: the token names it when another leg is reporting
fn caller(token: &ResumptionToken, params: &WebhookParams) -> CallId {
    token.call.clone().unwrap_or_else(|| params.call_id())
}

macro_rules! try_xml {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(response) => return response,
        }
    };
}

/// `POST /voice/inbound`
pub async fn inbound(State(server): State<Arc<CallFlowServer>>, form: Params) -> ControlXml {
    let params = try_xml!(params(form));
    info!(call_sid = %params.call_sid, from = %params.from, to = %params.to, "Inbound call");
    ControlXml(server.engine().handle_inbound(&params).await)
}

/// Query of `/voice/outbound`
#[derive(Debug, Deserialize)]
pub struct OutboundQuery {
    /// Tenant placing the call
    pub tenant: String,
    /// Flow to run, if any
    #[serde(default)]
    pub flow: Option<String>,
}

/// `POST /voice/outbound?tenant=…&flow=…`
pub async fn outbound(
    State(server): State<Arc<CallFlowServer>>,
    query: Result<Query<OutboundQuery>, QueryRejection>,
    form: Params,
) -> ControlXml {
    let params = try_xml!(params(form));
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            error!(call_sid = %params.call_sid, error = %rejection.body_text(), "Outbound call without tenant, hanging up");
            return hangup();
        }
    };
    info!(call_sid = %params.call_sid, tenant = %query.tenant, flow = ?query.flow, "Outbound call");
    let flow = query.flow.filter(|f| !f.is_empty()).map(FlowId);
    ControlXml(
        server
            .engine()
            .handle_outbound(&params, TenantId(query.tenant), flow)
            .await,
    )
}

/// `POST /voice/status`
pub async fn call_status(State(server): State<Arc<CallFlowServer>>, form: Params) -> StatusCode {
    let params = match params(form) {
        Ok(params) => params,
        Err(_) => return StatusCode::NO_CONTENT,
    };
    let Some(status) = params.call_status.as_deref() else {
        return StatusCode::NO_CONTENT;
    };
    debug!(call_sid = %params.call_sid, status, "Call status");
    if let Err(err) = server
        .engine()
        .handle_call_status(&params.call_id(), status)
        .await
    {
        warn!(call_sid = %params.call_sid, error = %err, "Failed to record call status");
    }
    StatusCode::NO_CONTENT
}

/// `POST /voice/step`
pub async fn next_step(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> ControlXml {
    let (token, params) = try_xml!(callback(CallbackAction::Next, query, form));
    let call_id = caller(&token, &params);
    ControlXml(server.engine().continue_flow(&call_id, &token).await)
}

/// `POST /voice/menu`
pub async fn menu(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> ControlXml {
    let (token, params) = try_xml!(callback(CallbackAction::Menu, query, form));
    let call_id = caller(&token, &params);
    ControlXml(
        server
            .engine()
            .handle_menu_selection(&call_id, &token, params.digits())
            .await,
    )
}

/// `POST /voice/dial-status`
pub async fn dial_status(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> ControlXml {
    let (token, params) = try_xml!(callback(CallbackAction::DialStatus, query, form));
    let call_id = caller(&token, &params);
    ControlXml(
        server
            .engine()
            .handle_dial_status(&call_id, &token, params.dial_call_status.as_deref())
            .await,
    )
}

/// `POST /voice/nested-dial-status`
pub async fn nested_dial_status(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> ControlXml {
    let (token, params) = try_xml!(callback(CallbackAction::NestedDialStatus, query, form));
    let call_id = caller(&token, &params);
    ControlXml(
        server
            .engine()
            .handle_nested_dial_status(&call_id, params.dial_call_status.as_deref())
            .await,
    )
}

/// `POST /voice/round-robin`
pub async fn round_robin(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> ControlXml {
    let (token, params) = try_xml!(callback(CallbackAction::RoundRobin, query, form));
    let call_id = caller(&token, &params);
    ControlXml(
        server
            .engine()
            .handle_round_robin_status(&call_id, &token, params.dial_call_status.as_deref())
            .await,
    )
}

/// `POST /voice/keypad`
pub async fn keypad(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> ControlXml {
    let (token, params) = try_xml!(callback(CallbackAction::Keypad, query, form));
    let call_id = caller(&token, &params);
    ControlXml(
        server
            .engine()
            .handle_keypad_entry(&call_id, &token, params.digits())
            .await,
    )
}

/// `POST /voice/voicemail-complete`
pub async fn voicemail_complete(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> ControlXml {
    let (token, params) = try_xml!(callback(CallbackAction::VoicemailComplete, query, form));
    let call_id = caller(&token, &params);
    ControlXml(
        server
            .engine()
            .handle_voicemail_complete(&call_id, params.recording_url.as_deref())
            .await,
    )
}

/// `POST /voice/transcription`
pub async fn transcription(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> StatusCode {
    let Ok((token, params)) = callback(CallbackAction::Transcription, query, form) else {
        return StatusCode::NO_CONTENT;
    };
    let call_id = caller(&token, &params);
    let text = params.transcription_text.as_deref().unwrap_or_default();
    if let Err(err) = server
        .engine()
        .handle_voicemail_transcription(&call_id, text)
        .await
    {
        warn!(%call_id, error = %err, "Failed to store voicemail transcription");
    }
    StatusCode::NO_CONTENT
}

/// `POST /voice/conference-status`
pub async fn conference_status(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> StatusCode {
    let Ok((_, params)) = callback(CallbackAction::ConferenceStatus, query, form) else {
        return StatusCode::NO_CONTENT;
    };
    let (Some(event), Some(conference)) = (
        params.status_callback_event.as_deref(),
        params.friendly_name.as_deref(),
    ) else {
        warn!(call_sid = %params.call_sid, "Conference callback without event or name");
        return StatusCode::NO_CONTENT;
    };
    let event = ConferenceEvent {
        kind: ConferenceEventKind::parse(event),
        conference: conference.to_string(),
        participant: Some(params.call_id()).filter(|id| !id.0.is_empty()),
    };
    if let Err(err) = server.engine().conference().handle_conference_event(event).await {
        warn!(%conference, error = %err, "Failed to handle conference event");
    }
    StatusCode::NO_CONTENT
}

/// `POST /voice/leg-status`
pub async fn leg_status(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> StatusCode {
    let Ok((token, params)) = callback(CallbackAction::LegStatus, query, form) else {
        return StatusCode::NO_CONTENT;
    };
    if let Err(err) = server
        .engine()
        .conference()
        .handle_leg_status(&token, &params.call_id(), params.call_status.as_deref())
        .await
    {
        warn!(leg = %params.call_sid, error = %err, "Failed to handle leg status");
    }
    StatusCode::NO_CONTENT
}

/// `POST /voice/join`
pub async fn join(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> ControlXml {
    let (token, params) = try_xml!(callback(CallbackAction::Join, query, form));
    match server.engine().conference().callee_document(&token) {
        Ok(doc) => ControlXml(doc),
        Err(err) => {
            error!(leg = %params.call_sid, error = %err, "Cannot join callee, hanging up");
            hangup()
        }
    }
}

/// `POST /voice/transfer-join`
pub async fn transfer_join(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> ControlXml {
    let (token, params) = try_xml!(callback(CallbackAction::TransferJoin, query, form));
    let call_id = caller(&token, &params);
    ControlXml(server.engine().handle_transfer_join(&call_id, &token).await)
}

/// `POST /voice/transfer-status`
pub async fn transfer_status(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> ControlXml {
    let (token, params) = try_xml!(callback(CallbackAction::TransferStatus, query, form));
    let call_id = caller(&token, &params);
    ControlXml(
        server
            .engine()
            .handle_transfer_status(&call_id, &token, params.dial_call_status.as_deref())
            .await,
    )
}

/// `POST /voice/recording-status`
pub async fn recording_status(
    State(server): State<Arc<CallFlowServer>>,
    RawQuery(query): RawQuery,
    form: Params,
) -> StatusCode {
    let Ok((token, params)) = callback(CallbackAction::RecordingStatus, query, form) else {
        return StatusCode::NO_CONTENT;
    };
    let Some(url) = params.recording_url.as_deref() else {
        warn!(call_sid = %params.call_sid, "Recording callback without a URL");
        return StatusCode::NO_CONTENT;
    };
    if let Err(err) = server.engine().handle_recording_status(&token, url).await {
        warn!(call_sid = %params.call_sid, error = %err, "Failed to attach recording");
    }
    StatusCode::NO_CONTENT
}
