use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
// Note: tower requires the 'util' feature for ServiceExt
use tower::ServiceExt;

use callflow_core::{CallId, CallStatus, FixedClock};
use callflow_server::{api::build_router, build_server, CarrierMode, ServerConfig};
use callflow_state_inmemory::{InMemoryStateStoreProvider, RecordingCarrier, SeedData};

const SEED: &str = r#"{
    "flows": [{
        "id": "main",
        "tenant_id": "acme",
        "name": "Main line",
        "steps": [
            { "id": "welcome", "type": "greeting", "config": { "message": { "text": "Welcome to Acme & Co" } } },
            { "id": "desk", "type": "dial", "config": { "destination": "+15551230000" } }
        ]
    }],
    "numbers": [{
        "number": "+15550199",
        "tenant_id": "acme",
        "phone_number_id": "pn-1",
        "flow_id": "main"
    }]
}"#;

struct TestApp {
    router: Router,
    provider: InMemoryStateStoreProvider,
    carrier: RecordingCarrier,
}

async fn setup() -> TestApp {
    let config = ServerConfig {
        public_base_url: "https://cf.test".to_string(),
        carrier_mode: CarrierMode::Log,
        ..Default::default()
    };
    let provider = InMemoryStateStoreProvider::new();
    provider
        .seed(SeedData::from_json(SEED).unwrap())
        .await
        .unwrap();
    let carrier = RecordingCarrier::new();
    let clock = FixedClock(Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap());
    let server = build_server(
        config,
        provider.create_repositories(),
        "memory",
        Arc::new(carrier.clone()),
        Arc::new(clock),
    );
    TestApp {
        router: build_router(Arc::new(server)),
        provider,
        carrier,
    }
}

fn form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, String) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn inbound(app: &TestApp, call_sid: &str) -> String {
    let (status, xml) = send(
        app,
        form(
            "/voice/inbound",
            &format!("CallSid={}&From=%2B15550100&To=%2B15550199", call_sid),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    xml
}

#[tokio::test]
async fn test_inbound_webhook_returns_escaped_xml() {
    let app = setup().await;
    let response = app
        .router
        .clone()
        .oneshot(form(
            "/voice/inbound",
            "CallSid=CA1&From=%2B15550100&To=%2B15550199",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/xml"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let xml = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(xml.contains("<Say>Welcome to Acme &amp; Co</Say>"));
    assert!(xml.contains(
        "<Redirect method=\"POST\">https://cf.test/voice/step?action=next&amp;step=1</Redirect>"
    ));
}

#[tokio::test]
async fn test_step_callback_joins_conference_and_start_dials() {
    let app = setup().await;
    inbound(&app, "CA1").await;

    let (status, xml) = send(&app, form("/voice/step?action=next&step=1", "CallSid=CA1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains(">call_CA1_seg_0</Conference>"));

    let (status, _) = send(
        &app,
        form(
            "/voice/conference-status",
            "CallSid=CA1&FriendlyName=call_CA1_seg_0&StatusCallbackEvent=conference-start",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let dials = app.carrier.dials().await;
    assert_eq!(dials.len(), 1);
    assert_eq!(dials[0].to, "+15551230000");
}

#[tokio::test]
async fn test_bad_callbacks_fail_closed_with_hangup() {
    let app = setup().await;
    inbound(&app, "CA1").await;

    // Action disagrees with the route
    let (status, xml) = send(&app, form("/voice/step?action=menu&step=1", "CallSid=CA1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.ends_with("<Response><Hangup/></Response>"));

    // Not a form body
    let request = Request::builder()
        .method("POST")
        .uri("/voice/menu?action=menu&step=0")
        .body(Body::from("{}"))
        .unwrap();
    let (status, xml) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("<Hangup/>"));

    // Unknown call
    let (status, xml) = send(&app, form("/voice/step?action=next&step=1", "CallSid=CA404")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("<Hangup/>"));
}

#[tokio::test]
async fn test_status_callback_completes_call() {
    let app = setup().await;
    inbound(&app, "CA1").await;

    let (status, _) = send(&app, form("/voice/status", "CallSid=CA1&CallStatus=completed")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let record = app
        .provider
        .create_repositories()
        .records
        .find_by_call_id(&CallId::new("CA1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, CallStatus::Completed);
}

#[tokio::test]
async fn test_get_call_and_not_found() {
    let app = setup().await;
    inbound(&app, "CA1").await;

    let (status, body) = send(&app, Request::get("/calls/CA1").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let record: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(record["status"], "in_progress");
    assert_eq!(record["tenant_id"], "acme");

    let (status, body) = send(&app, Request::get("/calls/CA404").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["errorDetails"]["errorCode"], "ERR_NOT_FOUND");
}

#[tokio::test]
async fn test_transfer_endpoint_rejections() {
    let app = setup().await;
    inbound(&app, "CA1").await;

    // Not bridged yet
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/calls/CA1/transfer",
            json!({ "target": "+15557777", "initiated_by": "agent-7" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let error: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["errorDetails"]["errorCode"], "ERR_INVALID_STATE");

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/calls/CA1/transfer",
            json!({ "target": "", "initiated_by": "agent-7" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request("POST", "/calls/CA1/transfer", json!({ "target": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.carrier.redirects().await.is_empty());
}

#[tokio::test]
async fn test_transcript_upload_and_resegment() {
    let app = setup().await;
    inbound(&app, "CA1").await;

    let (status, _) = send(
        &app,
        json_request(
            "PUT",
            "/calls/CA1/transcript",
            json!({
                "started_at": "2024-03-04T10:00:00Z",
                "entries": [{ "offset_secs": 2.5, "speaker": "caller", "text": "Hello" }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &app,
        Request::post("/calls/CA1/resegment").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let result: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(result["segments"], 1);

    // Never transferred, so the tenant sweep skips it
    let (status, body) = send(
        &app,
        Request::post("/tenants/acme/resegment").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let summary: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(summary["processed"], 0);
}

#[tokio::test]
async fn test_health_check() {
    let app = setup().await;
    let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "UP");
    assert_eq!(health["dependencies"]["stateStore"]["kind"], "memory");
}
