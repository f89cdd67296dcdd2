//! Tally: seasonal inventory from the terminal
//!
//! Subcommands:
//! - `ensure`: get or create a store record and its default locations
//! - `watch`: follow a category live and print totals on every change
//! - `bump` / `set-count`: edit a pallet count
//! - `stats`: print totals and clearance rates
//! - `overview`: totals across every category of a store
//! - `set-date`: move the clearance target

use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tally_appwrite::{AppwriteClient, Category, DocumentStore, GatewayConfig, HolidayId};
use tally_cache::{CacheConfig, DataCache};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod inventory;
mod watch;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Seasonal inventory tracker", long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: Connection,

    #[command(subcommand)]
    command: Commands,
}

/// Where the document database lives.
#[derive(Args)]
struct Connection {
    /// Appwrite API endpoint
    #[arg(long, global = true, env = "TALLY_ENDPOINT", default_value = "https://cloud.appwrite.io/v1")]
    endpoint: String,

    /// Appwrite project id
    #[arg(long, global = true, env = "TALLY_PROJECT", default_value = "")]
    project: String,

    /// Database id
    #[arg(long, global = true, env = "TALLY_DATABASE", default_value = "tally")]
    database: String,

    /// Server API key
    #[arg(long, global = true, env = "TALLY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Seconds before cached data is refetched
    #[arg(long, global = true, env = "TALLY_CACHE_TTL", default_value = "300")]
    cache_ttl: u64,
}

/// Which inventory to work on.
#[derive(Args)]
struct Scope {
    /// Store number
    #[arg(long, short = 's', env = "TALLY_STORE")]
    store: String,

    /// Holiday (christmas, valentines, easter, halloween)
    #[arg(long, default_value = "christmas")]
    holiday: HolidayId,

    /// Category (candy, gm)
    #[arg(long, default_value = "candy")]
    category: Category,
}

#[derive(Subcommand)]
enum Commands {
    /// Get or create the store record for a holiday
    Ensure {
        #[command(flatten)]
        scope: Scope,
    },

    /// Follow a category and print totals until interrupted
    Watch {
        #[command(flatten)]
        scope: Scope,
    },

    /// Add to (or subtract from) a pallet count
    Bump {
        #[command(flatten)]
        scope: Scope,

        /// Item id
        item: String,

        /// Amount to add; negative to subtract
        #[arg(allow_hyphen_values = true, default_value = "1")]
        delta: i64,
    },

    /// Set a pallet count directly
    SetCount {
        #[command(flatten)]
        scope: Scope,

        /// Item id
        item: String,

        /// New count
        count: u32,
    },

    /// Print totals and clearance rates
    Stats {
        #[command(flatten)]
        scope: Scope,
    },

    /// Print totals for every category of a store
    Overview {
        /// Store number
        #[arg(long, short = 's', env = "TALLY_STORE")]
        store: String,

        /// Holiday (christmas, valentines, easter, halloween)
        #[arg(long, default_value = "christmas")]
        holiday: HolidayId,
    },

    /// Move the clearance target date
    SetDate {
        #[command(flatten)]
        scope: Scope,

        /// Target date (YYYY-MM-DD)
        date: NaiveDate,
    },
}

impl Connection {
    fn connect(&self) -> Result<DataCache> {
        if self.project.is_empty() {
            return Err(miette::miette!(
                "no project id: pass --project or set TALLY_PROJECT"
            ));
        }

        let mut config = GatewayConfig::new(&self.endpoint, &self.project, &self.database);
        if let Some(key) = &self.api_key {
            config = config.with_api_key(key);
        }
        let client: Arc<dyn DocumentStore> = Arc::new(AppwriteClient::new(config).into_diagnostic()?);

        let cache_config =
            CacheConfig::default().with_ttl(std::time::Duration::from_secs(self.cache_ttl));
        Ok(DataCache::new(client, cache_config))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tally=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let cache = cli.connection.connect()?;

    let result = match cli.command {
        Commands::Ensure { scope } => inventory::ensure(&cache, &scope.store, scope.holiday).await,
        Commands::Watch { scope } => {
            watch::run(&cache, &scope.store, scope.holiday, scope.category).await
        }
        Commands::Bump { scope, item, delta } => {
            inventory::bump(&cache, scope.into_inventory(&cache), &item, delta).await
        }
        Commands::SetCount { scope, item, count } => {
            inventory::set_count(&cache, scope.into_inventory(&cache), &item, count).await
        }
        Commands::Stats { scope } => inventory::stats(&cache, scope.into_inventory(&cache)).await,
        Commands::Overview { store, holiday } => inventory::overview(&cache, &store, holiday).await,
        Commands::SetDate { scope, date } => {
            inventory::set_date(scope.into_inventory(&cache), date).await
        }
    };

    cache.shutdown();
    result
}

impl Scope {
    fn into_inventory(self, cache: &DataCache) -> tally_cache::Inventory {
        tally_cache::Inventory::new(cache.clone(), self.store, self.holiday, self.category)
    }
}
