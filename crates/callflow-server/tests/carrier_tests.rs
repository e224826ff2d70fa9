use callflow_core::{CallFlowError, CallId, CarrierClient, DialLegRequest};
use callflow_server::HttpCarrierClient;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> HttpCarrierClient {
    HttpCarrierClient::new(
        format!("{}/2010-04-01/", server.uri()),
        "AC123",
        Some("secret".to_string()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_dial_leg_posts_form_and_returns_sid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls.json"))
        .and(header_exists("authorization"))
        .and(body_string_contains("To=%2B15551230000"))
        .and(body_string_contains("Timeout=25"))
        .and(body_string_contains("StatusCallback=https%3A%2F%2Fcf.test%2Fvoice%2Fleg-status"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sid": "CAleg1", "status": "queued" })))
        .expect(1)
        .mount(&server)
        .await;

    let leg = client(&server)
        .dial_leg(DialLegRequest {
            to: "+15551230000".into(),
            from: "+15550100".into(),
            answer_url: "https://cf.test/voice/join?action=join&segment=0&call=CA1".into(),
            status_callback: "https://cf.test/voice/leg-status".into(),
            timeout_secs: 25,
        })
        .await
        .unwrap();
    assert_eq!(leg, CallId::new("CAleg1"));
}

#[tokio::test]
async fn test_redirect_and_hangup_update_the_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls/CA1.json"))
        .and(body_string_contains("Url=https%3A%2F%2Fcf.test%2Fvoice%2Fdial-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sid": "CA1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls/LEG2.json"))
        .and(body_string_contains("Status=completed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sid": "LEG2" })))
        .expect(1)
        .mount(&server)
        .await;

    let carrier = client(&server);
    carrier
        .redirect_call(&CallId::new("CA1"), "https://cf.test/voice/dial-status?action=dial_status&step=0")
        .await
        .unwrap();
    carrier.hangup_call(&CallId::new("LEG2")).await.unwrap();
}

#[tokio::test]
async fn test_carrier_errors_surface_as_carrier_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("call not found"))
        .mount(&server)
        .await;

    let err = client(&server)
        .hangup_call(&CallId::new("CA404"))
        .await
        .unwrap_err();
    match err {
        CallFlowError::Carrier(message) => assert!(message.contains("call not found")),
        other => panic!("expected a carrier error, got {:?}", other),
    }
}
