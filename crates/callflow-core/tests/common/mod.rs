#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use callflow_core::{
    CallFlow, CallFlowEngine, CallId, CallbackAction, Clock, EngineDependencies, EngineSettings,
    FlowId, NumberRoute, ResumptionToken, TenantId, Verb, WebhookParams,
};
use callflow_state_inmemory::{InMemoryStateStoreProvider, RecordingCarrier, StateRepositories};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

pub const BASE_URL: &str = "https://cf.test";
pub const TENANT: &str = "acme";
pub const MAIN_NUMBER: &str = "+15550199";
pub const CALLER: &str = "+15550100";

/// Clock the test moves by hand
#[derive(Clone)]
pub struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl TestClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(now)))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Monday 4 March 2024 at `hour:min` UTC
pub fn monday(hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, hour, min, 0).unwrap()
}

pub struct Harness {
    pub engine: CallFlowEngine,
    pub provider: InMemoryStateStoreProvider,
    pub repos: StateRepositories,
    pub carrier: RecordingCarrier,
    pub clock: TestClock,
}

/// Route engine logs to the test output; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        init_tracing();
        let provider = InMemoryStateStoreProvider::new();
        let repos = provider.create_repositories();
        let carrier = RecordingCarrier::new();
        let clock = TestClock::new(now);
        let deps = EngineDependencies {
            flows: repos.flows.clone(),
            records: repos.records.clone(),
            routing: repos.routing.clone(),
            accounts: repos.accounts.clone(),
            carrier: Arc::new(carrier.clone()),
            clock: Arc::new(clock.clone()),
        };
        let engine = CallFlowEngine::new(deps, Arc::new(EngineSettings::new(BASE_URL)));
        Self {
            engine,
            provider,
            repos,
            carrier,
            clock,
        }
    }

    /// Store a flow from its steps and route the main number to it
    pub async fn install_flow(&self, steps: Value) -> CallFlow {
        let flow: CallFlow = serde_json::from_value(serde_json::json!({
            "id": "main",
            "tenant_id": TENANT,
            "name": "Main line",
            "steps": steps,
        }))
        .unwrap();
        self.repos.flows.save_flow(&flow).await.unwrap();
        self.provider
            .routing()
            .insert(NumberRoute {
                number: MAIN_NUMBER.to_string(),
                tenant_id: TenantId(TENANT.to_string()),
                phone_number_id: "pn-1".to_string(),
                flow_id: Some(FlowId("main".to_string())),
                record_calls: false,
            })
            .await;
        flow
    }
}

pub fn inbound(call_sid: &str) -> WebhookParams {
    WebhookParams {
        call_sid: call_sid.to_string(),
        from: CALLER.to_string(),
        to: MAIN_NUMBER.to_string(),
        ..Default::default()
    }
}

pub fn call(id: &str) -> CallId {
    CallId::new(id)
}

/// Token the engine would receive on the URL
pub fn token_from_url(url: &str) -> ResumptionToken {
    let (path, query) = url.split_once('?').unwrap();
    let action = CallbackAction::ALL
        .into_iter()
        .find(|action| path.ends_with(action.route()))
        .unwrap();
    ResumptionToken::from_query(action, query).unwrap()
}

/// URL of the trailing redirect of a document
pub fn redirect_url(verbs: &[Verb]) -> String {
    match verbs.last() {
        Some(Verb::Redirect(url)) => url.clone(),
        other => panic!("expected a redirect, got {:?}", other),
    }
}

/// Action URL of the conference join in a document
pub fn conference_action(verbs: &[Verb]) -> (String, String) {
    verbs
        .iter()
        .find_map(|verb| match verb {
            Verb::Conference(join) => Some((join.name.clone(), join.action.clone().unwrap())),
            _ => None,
        })
        .unwrap_or_else(|| panic!("expected a conference join, got {:?}", verbs))
}

pub fn says(verbs: &[Verb]) -> Vec<String> {
    verbs
        .iter()
        .filter_map(|verb| match verb {
            Verb::Say(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}
