use async_trait::async_trait;
use serde_json::Value;
use sqlx::Row;
use tracing::debug;

use callflow_core::{
    AccountDirectory, CallFlow, CallFlowError, CallFlowRepository, CallFlowResult, CallId,
    CallRecord, CallRecordPatch, CallRecordRepository, FlowId, NumberRoute, NumberRouting,
    TenantId,
};

use crate::{storage_error, PostgresConnection};

fn decode_record(row: &sqlx::postgres::PgRow) -> CallFlowResult<CallRecord> {
    let data: Value = row
        .try_get("data")
        .map_err(storage_error("Failed to read call record"))?;
    Ok(serde_json::from_value(data)?)
}

/// PostgreSQL implementation of the CallFlowRepository
pub struct PostgresCallFlowRepository {
    conn: PostgresConnection,
}

impl PostgresCallFlowRepository {
    /// Create a new PostgreSQL flow repository
    pub fn new(conn: PostgresConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CallFlowRepository for PostgresCallFlowRepository {
    async fn get_flow(
        &self,
        tenant_id: &TenantId,
        flow_id: &FlowId,
    ) -> CallFlowResult<Option<CallFlow>> {
        let row = sqlx::query("SELECT data FROM call_flows WHERE tenant_id = $1 AND id = $2")
            .bind(&tenant_id.0)
            .bind(&flow_id.0)
            .fetch_optional(self.conn.pool())
            .await
            .map_err(storage_error("Failed to get flow"))?;

        match row {
            Some(row) => {
                let data: Value = row
                    .try_get("data")
                    .map_err(storage_error("Failed to read flow"))?;
                Ok(Some(serde_json::from_value(data)?))
            }
            None => Ok(None),
        }
    }

    async fn save_flow(&self, flow: &CallFlow) -> CallFlowResult<()> {
        let data = serde_json::to_value(flow)?;
        sqlx::query(
            "INSERT INTO call_flows (tenant_id, id, revision, data)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (tenant_id, id)
             DO UPDATE SET revision = $3, data = $4, updated_at = NOW()",
        )
        .bind(&flow.tenant_id.0)
        .bind(&flow.id.0)
        .bind(flow.revision())
        .bind(data)
        .execute(self.conn.pool())
        .await
        .map_err(storage_error("Failed to save flow"))?;
        Ok(())
    }
}

/// PostgreSQL implementation of the CallRecordRepository
///
/// Updates read the row `FOR UPDATE`, merge the patch and write it back in
/// one transaction.
pub struct PostgresCallRecordRepository {
    conn: PostgresConnection,
}

impl PostgresCallRecordRepository {
    /// Create a new PostgreSQL call record repository
    pub fn new(conn: PostgresConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CallRecordRepository for PostgresCallRecordRepository {
    async fn find_by_call_id(&self, call_id: &CallId) -> CallFlowResult<Option<CallRecord>> {
        let row = sqlx::query("SELECT data FROM call_records WHERE call_id = $1")
            .bind(&call_id.0)
            .fetch_optional(self.conn.pool())
            .await
            .map_err(storage_error("Failed to get call record"))?;

        row.as_ref().map(decode_record).transpose()
    }

    async fn create(&self, record: CallRecord) -> CallFlowResult<CallRecord> {
        let data = serde_json::to_value(&record)?;
        let inserted = sqlx::query(
            "INSERT INTO call_records (call_id, tenant_id, status, data, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (call_id) DO NOTHING",
        )
        .bind(&record.call_id.0)
        .bind(&record.tenant_id.0)
        .bind(record.status.as_str())
        .bind(data)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.conn.pool())
        .await
        .map_err(storage_error("Failed to create call record"))?;

        if inserted.rows_affected() == 1 {
            return Ok(record);
        }

        debug!(call_id = %record.call_id, "Call record already exists");
        self.find_by_call_id(&record.call_id)
            .await?
            .ok_or_else(|| CallFlowError::call_not_found(&record.call_id))
    }

    async fn update(&self, call_id: &CallId, patch: CallRecordPatch) -> CallFlowResult<CallRecord> {
        let mut tx = self
            .conn
            .pool()
            .begin()
            .await
            .map_err(storage_error("Failed to start transaction"))?;

        let row = sqlx::query("SELECT data FROM call_records WHERE call_id = $1 FOR UPDATE")
            .bind(&call_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_error("Failed to lock call record"))?
            .ok_or_else(|| CallFlowError::call_not_found(call_id))?;

        let mut record = decode_record(&row)?;
        patch.apply(&mut record);
        let data = serde_json::to_value(&record)?;

        sqlx::query(
            "UPDATE call_records SET status = $2, data = $3, updated_at = $4 WHERE call_id = $1",
        )
        .bind(&call_id.0)
        .bind(record.status.as_str())
        .bind(data)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_error("Failed to update call record"))?;

        tx.commit()
            .await
            .map_err(storage_error("Failed to commit call record"))?;
        Ok(record)
    }

    async fn list_for_tenant(&self, tenant_id: &TenantId) -> CallFlowResult<Vec<CallRecord>> {
        let rows = sqlx::query(
            "SELECT data FROM call_records WHERE tenant_id = $1 ORDER BY created_at, call_id",
        )
        .bind(&tenant_id.0)
        .fetch_all(self.conn.pool())
        .await
        .map_err(storage_error("Failed to list call records"))?;

        rows.iter().map(decode_record).collect()
    }
}

/// Number routing table in PostgreSQL
pub struct PostgresNumberRouting {
    conn: PostgresConnection,
}

impl PostgresNumberRouting {
    /// Create a routing table over the connection
    pub fn new(conn: PostgresConnection) -> Self {
        Self { conn }
    }

    /// Add or replace a route
    pub async fn upsert(&self, route: &NumberRoute) -> CallFlowResult<()> {
        sqlx::query(
            "INSERT INTO phone_numbers (number, tenant_id, phone_number_id, flow_id, record_calls)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (number)
             DO UPDATE SET tenant_id = $2, phone_number_id = $3, flow_id = $4, record_calls = $5",
        )
        .bind(&route.number)
        .bind(&route.tenant_id.0)
        .bind(&route.phone_number_id)
        .bind(route.flow_id.as_ref().map(|f| f.0.clone()))
        .bind(route.record_calls)
        .execute(self.conn.pool())
        .await
        .map_err(storage_error("Failed to save number route"))?;
        Ok(())
    }
}

#[async_trait]
impl NumberRouting for PostgresNumberRouting {
    async fn resolve_number(&self, number: &str) -> CallFlowResult<Option<NumberRoute>> {
        let row = sqlx::query(
            "SELECT number, tenant_id, phone_number_id, flow_id, record_calls
             FROM phone_numbers WHERE number = $1",
        )
        .bind(number.trim())
        .fetch_optional(self.conn.pool())
        .await
        .map_err(storage_error("Failed to resolve number"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let read = storage_error("Failed to read number route");
        let flow_id: Option<String> = row.try_get("flow_id").map_err(&read)?;
        Ok(Some(NumberRoute {
            number: row.try_get("number").map_err(&read)?,
            tenant_id: TenantId(row.try_get("tenant_id").map_err(&read)?),
            phone_number_id: row.try_get("phone_number_id").map_err(&read)?,
            flow_id: flow_id.map(FlowId),
            record_calls: row.try_get("record_calls").map_err(&read)?,
        }))
    }
}

/// Account directory in PostgreSQL
pub struct PostgresAccountDirectory {
    conn: PostgresConnection,
}

impl PostgresAccountDirectory {
    /// Create a directory over the connection
    pub fn new(conn: PostgresConnection) -> Self {
        Self { conn }
    }

    /// Add or replace an account
    pub async fn upsert(&self, account_id: &str, email: Option<&str>) -> CallFlowResult<()> {
        sqlx::query(
            "INSERT INTO accounts (id, email) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET email = $2",
        )
        .bind(account_id)
        .bind(email)
        .execute(self.conn.pool())
        .await
        .map_err(storage_error("Failed to save account"))?;
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for PostgresAccountDirectory {
    async fn lookup_account_email(&self, account_id: &str) -> CallFlowResult<Option<String>> {
        let email: Option<Option<String>> =
            sqlx::query_scalar("SELECT email FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(self.conn.pool())
                .await
                .map_err(storage_error("Failed to look up account"))?;
        Ok(email.flatten())
    }
}
