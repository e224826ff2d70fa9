use crate::{InMemoryStateStoreProvider, RecordingCarrier, SeedData};
use callflow_core::{
    CallDirection, CallFlowError, CallFlowResult, CallId, CallRecord, CallRecordPatch,
    CarrierClient, DialLegRequest, FlowId, TenantId,
};
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;

fn record(call_id: &str, tenant: &str, minute: u32) -> CallRecord {
    CallRecord::new(
        CallId::new(call_id),
        TenantId(tenant.to_string()),
        CallDirection::Inbound,
        "+15550100",
        "+15550199",
        format!("call_{}_seg_0", call_id),
        Utc.with_ymd_and_hms(2024, 3, 4, 9, minute, 0).unwrap(),
    )
}

#[tokio::test]
async fn test_call_record_create_is_first_writer_wins() -> CallFlowResult<()> {
    let provider = InMemoryStateStoreProvider::new();
    let repos = provider.create_repositories();

    let first = repos.records.create(record("CA1", "acme", 0)).await?;
    let mut second = record("CA1", "acme", 5);
    second.from = "+15559999".to_string();
    let stored = repos.records.create(second).await?;

    assert_eq!(stored, first);
    assert_eq!(stored.from, "+15550100");
    Ok(())
}

#[tokio::test]
async fn test_update_merges_patch() -> CallFlowResult<()> {
    let provider = InMemoryStateStoreProvider::new();
    let repos = provider.create_repositories();
    let call_id = CallId::new("CA1");
    repos.records.create(record("CA1", "acme", 0)).await?;

    let now = Utc::now();
    repos
        .records
        .update(&call_id, CallRecordPatch::new(now).add_tag("vip"))
        .await?;
    let updated = repos
        .records
        .update(&call_id, CallRecordPatch::new(now).variable("pin", "42"))
        .await?;

    assert_eq!(updated.tags, vec!["vip".to_string()]);
    assert_eq!(updated.variables.get("pin").map(String::as_str), Some("42"));
    Ok(())
}

#[tokio::test]
async fn test_update_unknown_call_is_not_found() {
    let provider = InMemoryStateStoreProvider::new();
    let repos = provider.create_repositories();
    let err = repos
        .records
        .update(&CallId::new("missing"), CallRecordPatch::new(Utc::now()))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_concurrent_updates_keep_every_tag() -> CallFlowResult<()> {
    let provider = InMemoryStateStoreProvider::new();
    let repos = provider.create_repositories();
    let call_id = CallId::new("CA1");
    repos.records.create(record("CA1", "acme", 0)).await?;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let records = repos.records.clone();
        let call_id = call_id.clone();
        tasks.push(tokio::spawn(async move {
            records
                .update(&call_id, CallRecordPatch::new(Utc::now()).add_tag(format!("t{}", i)))
                .await
        }));
    }
    for task in tasks {
        task.await.expect("task panicked")?;
    }

    let stored = repos.records.find_by_call_id(&call_id).await?.unwrap();
    assert_eq!(stored.tags.len(), 20);
    Ok(())
}

#[tokio::test]
async fn test_list_for_tenant_filters_and_orders() -> CallFlowResult<()> {
    let provider = InMemoryStateStoreProvider::new();
    let repos = provider.create_repositories();
    repos.records.create(record("CA2", "acme", 10)).await?;
    repos.records.create(record("CA1", "acme", 0)).await?;
    repos.records.create(record("CB1", "globex", 5)).await?;

    let listed = repos.records.list_for_tenant(&TenantId("acme".into())).await?;
    let ids: Vec<_> = listed.iter().map(|r| r.call_id.0.as_str()).collect();
    assert_eq!(ids, vec!["CA1", "CA2"]);
    Ok(())
}

#[tokio::test]
async fn test_seed_loads_flows_routes_and_accounts() -> CallFlowResult<()> {
    let seed = SeedData::from_json(
        r#"{
            "flows": [{
                "id": "main",
                "tenant_id": "acme",
                "name": "Main line",
                "steps": [
                    { "id": "hello", "type": "greeting", "config": { "message": { "text": "Hi" } } },
                    { "id": "bad", "type": "fax", "config": {} }
                ]
            }],
            "numbers": [{
                "number": "+15550199",
                "tenant_id": "acme",
                "phone_number_id": "pn-1",
                "flow_id": "main"
            }],
            "accounts": { "7d1f3c52-8a4e-4b6f-9c2d-1e5a6b7c8d9e": "ana@acme.test" }
        }"#,
    )?;
    let provider = InMemoryStateStoreProvider::new();
    provider.seed(seed).await?;
    let repos = provider.create_repositories();

    let flow = repos
        .flows
        .get_flow(&TenantId("acme".into()), &FlowId("main".into()))
        .await?
        .expect("flow seeded");
    assert_eq!(flow.steps.len(), 2);
    assert!(flow.steps[1].is_malformed());

    let route = repos.routing.resolve_number(" +15550199 ").await?.unwrap();
    assert_eq!(route.phone_number_id, "pn-1");
    assert_eq!(route.flow_id, Some(FlowId("main".into())));
    assert!(!route.record_calls);

    let email = repos
        .accounts
        .lookup_account_email("7d1f3c52-8a4e-4b6f-9c2d-1e5a6b7c8d9e")
        .await?;
    assert_eq!(email.as_deref(), Some("ana@acme.test"));

    // Flows are scoped per tenant
    let other = repos
        .flows
        .get_flow(&TenantId("globex".into()), &FlowId("main".into()))
        .await?;
    assert!(other.is_none());
    Ok(())
}

#[tokio::test]
async fn test_recording_carrier_logs_and_fails_on_demand() -> CallFlowResult<()> {
    let carrier = RecordingCarrier::new();
    let leg = carrier
        .dial_leg(DialLegRequest {
            to: "+15551230000".into(),
            from: "+15550100".into(),
            answer_url: "https://cf.test/voice/join".into(),
            status_callback: "https://cf.test/voice/leg-status".into(),
            timeout_secs: 30,
        })
        .await?;
    assert_eq!(leg, CallId::new("LEG1"));
    carrier.redirect_call(&CallId::new("CA1"), "https://cf.test/x").await?;
    carrier.hangup_call(&leg).await?;

    assert_eq!(carrier.dials().await.len(), 1);
    assert_eq!(carrier.redirects().await, vec![(CallId::new("CA1"), "https://cf.test/x".to_string())]);
    assert_eq!(carrier.hangups().await, vec![leg]);

    carrier.set_failing(true);
    let err = carrier.hangup_call(&CallId::new("CA1")).await.unwrap_err();
    assert!(matches!(err, CallFlowError::Carrier(_)));
    assert_eq!(carrier.commands().await.len(), 3);
    Ok(())
}
