//! Database schema and migrations

use anyhow::Result;
use deadpool_postgres::Object;
use tracing::info;

pub async fn run_migrations(client: &Object) -> Result<()> {
    client.batch_execute(SCHEMA_SQL).await?;
    info!("Database migrations applied");
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Uptime Hub Database Schema

-- Validators, one row per signing key
CREATE TABLE IF NOT EXISTS validators (
    id VARCHAR(64) PRIMARY KEY,
    public_key VARCHAR(128) NOT NULL UNIQUE,
    ip VARCHAR(128) NOT NULL DEFAULT 'unknown',
    location VARCHAR(255) NOT NULL DEFAULT 'unknown',
    pending_payouts BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Monitored websites (managed by the dashboard, read-only for the hub)
CREATE TABLE IF NOT EXISTS websites (
    id VARCHAR(64) PRIMARY KEY,
    url TEXT NOT NULL,
    disabled BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_websites_disabled ON websites(disabled);

-- Verified check results
CREATE TABLE IF NOT EXISTS website_ticks (
    id VARCHAR(64) PRIMARY KEY,
    website_id VARCHAR(64) NOT NULL REFERENCES websites(id) ON DELETE CASCADE,
    validator_id VARCHAR(64) NOT NULL REFERENCES validators(id),
    status VARCHAR(8) NOT NULL,
    latency DOUBLE PRECISION NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_website_ticks_website ON website_ticks(website_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_website_ticks_validator ON website_ticks(validator_id);
"#;
