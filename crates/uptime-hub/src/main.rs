//! Uptime Hub - coordination server for remote uptime validators
//!
//! ```text
//! Uptime Hub (this)
//!  ├── WebSocket for validators (/ and /ws)
//!  │   └── signup -> admit -> dispatch -> signed result -> tick + payout
//!  ├── Periodic sweep (websites x validators)
//!  ├── Stats side channel (/stats)
//!  └── PostgreSQL (or in-memory store for local runs)
//! ```

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uptime_hub::config::{DEFAULT_GEO_ENDPOINT, DEFAULT_REWARD_PER_CHECK};
use uptime_hub::observability::{init_sentry, init_tracing};
use uptime_hub::{db, server, AppState, HubConfig, HubStore, MemoryStore, PgStore};

#[derive(Parser, Debug)]
#[command(name = "uptime-hub")]
#[command(about = "Uptime Hub - dispatches checks to validators and records signed results")]
struct Args {
    /// Server port
    #[arg(short, long, default_value = "8081", env = "PORT")]
    port: u16,

    /// Server host
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// PostgreSQL URL. Without it the hub keeps state in memory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Seconds between full dispatch sweeps
    #[arg(long, default_value = "60", env = "SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: u64,

    /// Seconds before the same validator/website pair can be dispatched again
    #[arg(long, default_value = "10", env = "COOLDOWN_SECS")]
    cooldown_secs: u64,

    /// Payout credit per verified check
    #[arg(long, default_value_t = DEFAULT_REWARD_PER_CHECK, env = "REWARD_PER_CHECK")]
    reward_per_check: i64,

    /// Drop unanswered dispatches after this many seconds (0 = keep)
    #[arg(long, default_value = "0", env = "CALLBACK_TTL_SECS")]
    callback_ttl_secs: u64,

    /// Resolve validator locations through a geolocation service
    #[arg(long, env = "GEO_LOOKUP")]
    geo_lookup: bool,

    /// Geolocation service base URL
    #[arg(long, default_value = DEFAULT_GEO_ENDPOINT, env = "GEO_ENDPOINT")]
    geo_endpoint: String,
}

impl Args {
    fn hub_config(&self) -> HubConfig {
        HubConfig {
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            cooldown: Duration::from_secs(self.cooldown_secs),
            reward_per_check: self.reward_per_check,
            callback_ttl: (self.callback_ttl_secs > 0)
                .then(|| Duration::from_secs(self.callback_ttl_secs)),
            geo_endpoint: self.geo_lookup.then(|| self.geo_endpoint.clone()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let _sentry_guard = init_sentry();
    if _sentry_guard.is_some() {
        info!("Sentry error tracking enabled");
    }

    let args = Args::parse();
    let config = args.hub_config();
    config.validate()?;

    info!("Uptime Hub");
    info!("  Listening on: {}:{}", args.host, args.port);
    info!(
        "  Sweep every {:?}, cooldown {:?}, reward {}",
        config.sweep_interval, config.cooldown, config.reward_per_check
    );

    let store: Arc<dyn HubStore> = match &args.database_url {
        Some(url) => {
            let pool = db::init_db(url).await?;
            info!("  Database: PostgreSQL");
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("  No DATABASE_URL set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let state = Arc::new(AppState::new(store, config));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("  Validators: ws://{}/", addr);
    info!("  Stats:      http://{}/stats", addr);

    server::run(listener, state).await
}
