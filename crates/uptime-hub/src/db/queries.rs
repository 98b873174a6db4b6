//! Database queries for the hub (PostgreSQL)

use crate::models::{NewWebsiteTick, Validator, Website, WebsiteTick};
use crate::store::{ResolvedValidator, UNKNOWN_LOCATION};
use anyhow::{anyhow, Result};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tracing::debug;
use uuid::Uuid;

// ============================================================================
// VALIDATORS
// ============================================================================

fn validator_from_row(row: &Row) -> Validator {
    Validator {
        id: row.get(0),
        public_key: row.get(1),
        ip: row.get(2),
        location: row.get(3),
        pending_payouts: row.get(4),
    }
}

pub async fn get_validator(pool: &Pool, id: &str) -> Result<Option<Validator>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT id, public_key, ip, location, pending_payouts
         FROM validators WHERE id = $1",
            &[&id],
        )
        .await?;
    Ok(row.as_ref().map(validator_from_row))
}

/// Insert-if-absent keyed on public_key. Safe against concurrent signups of
/// the same key: the loser of the race reads the winner's row.
pub async fn find_or_create_validator(
    pool: &Pool,
    public_key: &str,
    ip: &str,
) -> Result<ResolvedValidator> {
    let client = pool.get().await?;
    let id = Uuid::new_v4().to_string();

    let inserted = client
        .query_opt(
            "INSERT INTO validators (id, public_key, ip, location, pending_payouts)
         VALUES ($1, $2, $3, $4, 0)
         ON CONFLICT (public_key) DO NOTHING
         RETURNING id, public_key, ip, location, pending_payouts",
            &[&id, &public_key, &ip, &UNKNOWN_LOCATION],
        )
        .await?;

    if let Some(row) = inserted {
        return Ok(ResolvedValidator {
            validator: validator_from_row(&row),
            created: true,
        });
    }

    let row = client
        .query_one(
            "SELECT id, public_key, ip, location, pending_payouts
         FROM validators WHERE public_key = $1",
            &[&public_key],
        )
        .await?;
    Ok(ResolvedValidator {
        validator: validator_from_row(&row),
        created: false,
    })
}

pub async fn update_validator_metadata(
    pool: &Pool,
    id: &str,
    ip: Option<&str>,
    location: Option<&str>,
) -> Result<()> {
    let client = pool.get().await?;
    let updated = client
        .execute(
            "UPDATE validators SET
            ip = COALESCE($2, ip),
            location = COALESCE($3, location)
         WHERE id = $1",
            &[&id, &ip, &location],
        )
        .await?;
    if updated == 0 {
        return Err(anyhow!("Validator {} not found", id));
    }
    Ok(())
}

// ============================================================================
// WEBSITES
// ============================================================================

pub async fn get_enabled_websites(pool: &Pool) -> Result<Vec<Website>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id, url, disabled FROM websites WHERE disabled = FALSE ORDER BY created_at",
            &[],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| Website {
            id: row.get(0),
            url: row.get(1),
            disabled: row.get(2),
        })
        .collect())
}

// ============================================================================
// TICKS
// ============================================================================

/// Insert a tick and credit the validator in a single transaction
pub async fn record_tick(pool: &Pool, tick: &NewWebsiteTick, reward: i64) -> Result<WebsiteTick> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO website_ticks (id, website_id, validator_id, status, latency, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
        &[
            &id,
            &tick.website_id,
            &tick.validator_id,
            &tick.status.as_str(),
            &tick.latency,
            &tick.created_at,
        ],
    )
    .await?;
    debug!("Created website tick {}", id);

    let updated = tx
        .execute(
            "UPDATE validators SET pending_payouts = pending_payouts + $2 WHERE id = $1",
            &[&tick.validator_id, &reward],
        )
        .await?;
    if updated == 0 {
        // Dropping tx rolls back the tick insert
        return Err(anyhow!("Validator {} not found", tick.validator_id));
    }

    tx.commit().await?;

    Ok(WebsiteTick {
        id,
        website_id: tick.website_id.clone(),
        validator_id: tick.validator_id.clone(),
        status: tick.status,
        latency: tick.latency,
        created_at: tick.created_at,
    })
}
