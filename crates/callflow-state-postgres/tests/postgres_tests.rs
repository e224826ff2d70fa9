//! Runs against a live database when DATABASE_URL is set; skipped otherwise.

use callflow_core::{
    CallDirection, CallFlow, CallFlowResult, CallId, CallRecord, CallRecordPatch, CallStatus,
    FlowId, NumberRoute, TenantId,
};
use callflow_state_postgres::{
    PostgresAccountDirectory, PostgresNumberRouting, PostgresStateStoreProvider,
};
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;

async fn provider() -> Option<PostgresStateStoreProvider> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let url = std::env::var("DATABASE_URL").ok()?;
    Some(
        PostgresStateStoreProvider::new(&url)
            .await
            .expect("database reachable"),
    )
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

fn record(call_id: &str, tenant: &str) -> CallRecord {
    CallRecord::new(
        CallId::new(call_id),
        TenantId(tenant.to_string()),
        CallDirection::Inbound,
        "+15550100",
        "+15550199",
        format!("call_{}_seg_0", call_id),
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn test_call_record_lifecycle() -> CallFlowResult<()> {
    let Some(provider) = provider().await else {
        return Ok(());
    };
    let repos = provider.create_repositories();
    let tenant = unique("tenant");
    let call_id = unique("CA");

    let created = repos.records.create(record(&call_id, &tenant)).await?;
    let mut duplicate = record(&call_id, &tenant);
    duplicate.from = "+15559999".to_string();
    assert_eq!(repos.records.create(duplicate).await?, created);

    let id = CallId::new(call_id.as_str());
    let updated = repos
        .records
        .update(
            &id,
            CallRecordPatch::new(Utc::now())
                .status(CallStatus::Bridged)
                .add_tag("vip"),
        )
        .await?;
    assert_eq!(updated.status, CallStatus::Bridged);
    assert_eq!(updated.tags, vec!["vip".to_string()]);

    let listed = repos.records.list_for_tenant(&TenantId(tenant)).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], updated);

    let err = repos
        .records
        .update(&CallId::new(unique("missing")), CallRecordPatch::new(Utc::now()))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_patches_are_serialized() -> CallFlowResult<()> {
    let Some(provider) = provider().await else {
        return Ok(());
    };
    let repos = provider.create_repositories();
    let call_id = unique("CA");
    repos.records.create(record(&call_id, &unique("tenant"))).await?;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let records = repos.records.clone();
        let id = CallId::new(call_id.as_str());
        tasks.push(tokio::spawn(async move {
            records
                .update(&id, CallRecordPatch::new(Utc::now()).add_tag(format!("t{}", i)))
                .await
        }));
    }
    for task in tasks {
        task.await.expect("task panicked")?;
    }

    let stored = repos
        .records
        .find_by_call_id(&CallId::new(call_id.as_str()))
        .await?
        .expect("record exists");
    assert_eq!(stored.tags.len(), 10);
    Ok(())
}

#[tokio::test]
async fn test_flows_routes_and_accounts() -> CallFlowResult<()> {
    let Some(provider) = provider().await else {
        return Ok(());
    };
    let repos = provider.create_repositories();
    let tenant = TenantId(unique("tenant"));

    let flow: CallFlow = serde_json::from_value(serde_json::json!({
        "id": "main",
        "tenant_id": tenant.0,
        "name": "Main line",
        "steps": [{ "id": "hello", "type": "greeting", "config": { "message": { "text": "Hi" } } }]
    }))?;
    repos.flows.save_flow(&flow).await?;
    let loaded = repos
        .flows
        .get_flow(&tenant, &FlowId("main".into()))
        .await?
        .expect("flow stored");
    assert_eq!(loaded.revision(), flow.revision());

    let number = unique("+1555");
    let routing = PostgresNumberRouting::new(provider.connection().clone());
    routing
        .upsert(&NumberRoute {
            number: number.clone(),
            tenant_id: tenant.clone(),
            phone_number_id: "pn-1".into(),
            flow_id: Some(FlowId("main".into())),
            record_calls: true,
        })
        .await?;
    let route = repos
        .routing
        .resolve_number(&format!(" {} ", number))
        .await?
        .expect("route stored");
    assert_eq!(route.tenant_id, tenant);
    assert!(route.record_calls);

    let account = unique("acct");
    let accounts = PostgresAccountDirectory::new(provider.connection().clone());
    accounts.upsert(&account, Some("ana@acme.test")).await?;
    assert_eq!(
        repos.accounts.lookup_account_email(&account).await?.as_deref(),
        Some("ana@acme.test")
    );
    assert_eq!(repos.accounts.lookup_account_email(&unique("none")).await?, None);
    Ok(())
}
