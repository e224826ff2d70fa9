/// Generate SQL migrations for the PostgreSQL state store
///
/// Applied in order and recorded in `callflow_migrations`, so running them
/// again is a no-op.
pub fn generate_migrations() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "20240401000000_initial_schema",
            r#"
            CREATE TABLE IF NOT EXISTS call_flows (
                tenant_id TEXT NOT NULL,
                id TEXT NOT NULL,
                revision TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (tenant_id, id)
            );

            CREATE TABLE IF NOT EXISTS call_records (
                call_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                status TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_call_records_tenant_id ON call_records(tenant_id, created_at);

            CREATE TABLE IF NOT EXISTS phone_numbers (
                number TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                phone_number_id TEXT NOT NULL,
                flow_id TEXT,
                record_calls BOOLEAN NOT NULL DEFAULT FALSE
            );

            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                email TEXT
            );
            "#,
        ),
        (
            "20240402000000_call_record_status_index",
            r#"
            -- Status lookups for operator views
            CREATE INDEX IF NOT EXISTS idx_call_records_status ON call_records(status);
            "#,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_unique() {
        let migrations = generate_migrations();
        let names: Vec<_> = migrations.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names, sorted);
        assert!(migrations[0].1.contains("CREATE TABLE IF NOT EXISTS call_records"));
    }
}
