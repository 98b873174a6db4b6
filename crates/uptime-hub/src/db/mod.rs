//! PostgreSQL backend for the hub

pub mod queries;
pub mod schema;

use crate::models::{NewWebsiteTick, Validator, Website, WebsiteTick};
use crate::store::{HubStore, ResolvedValidator};
use anyhow::Result;
use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use tracing::info;

pub type DbPool = Pool;

/// Connect to `database_url` and apply migrations
pub async fn init_db(database_url: &str) -> Result<DbPool> {
    let pool = create_pool(database_url)?;

    let client = pool.get().await?;
    schema::run_migrations(&client).await?;

    info!("Database initialized");
    Ok(pool)
}

fn create_pool(database_url: &str) -> Result<DbPool> {
    let mut cfg = Config::new();
    cfg.url = Some(database_url.to_string());
    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
    Ok(pool)
}

/// [`HubStore`] backed by PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HubStore for PgStore {
    async fn list_enabled_websites(&self) -> Result<Vec<Website>> {
        queries::get_enabled_websites(&self.pool).await
    }

    async fn find_or_create_validator(
        &self,
        public_key: &str,
        ip: &str,
    ) -> Result<ResolvedValidator> {
        queries::find_or_create_validator(&self.pool, public_key, ip).await
    }

    async fn record_tick(&self, tick: &NewWebsiteTick, reward: i64) -> Result<WebsiteTick> {
        queries::record_tick(&self.pool, tick, reward).await
    }

    async fn update_validator_metadata(
        &self,
        validator_id: &str,
        ip: Option<&str>,
        location: Option<&str>,
    ) -> Result<()> {
        queries::update_validator_metadata(&self.pool, validator_id, ip, location).await
    }

    async fn get_validator(&self, validator_id: &str) -> Result<Option<Validator>> {
        queries::get_validator(&self.pool, validator_id).await
    }
}
