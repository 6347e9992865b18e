//! tablegate server binary

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tablegate::backend::DriverRegistry;
use tablegate::catalog::{Catalog, FileStore};
use tablegate::server::{load_database_file, maybe_initialize, InitConfig, InitResult, TablegateServer};
use tablegate::{Gateway, GatewayConfig};

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Per-table authorization gateway for relational databases")]
struct Cli {
    /// Address to accept JSON-lines requests on
    #[arg(long, default_value = "127.0.0.1:54541", env = "TABLEGATE_LISTEN")]
    listen: SocketAddr,

    /// Append-only log of tokens and grants
    #[arg(long, default_value = "./data/grants.log", env = "TABLEGATE_STORE")]
    store: PathBuf,

    /// JSON file with an array of databases to register at startup
    #[arg(long, env = "TABLEGATE_DATABASES")]
    databases: Option<PathBuf>,

    /// Seconds between table refreshes
    #[arg(long, default_value_t = 1800, env = "TABLEGATE_REFRESH_SECS")]
    refresh_secs: u64,

    /// Seconds a backend query may run
    #[arg(long, default_value_t = 30, env = "TABLEGATE_QUERY_TIMEOUT_SECS")]
    query_timeout_secs: u64,

    /// Seconds a schema scan may run
    #[arg(long, default_value_t = 30, env = "TABLEGATE_SCHEMA_TIMEOUT_SECS")]
    schema_timeout_secs: u64,

    /// Dispatch statements that are not plain reads
    #[arg(long, env = "TABLEGATE_ALLOW_WRITES")]
    allow_writes: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if cli.refresh_secs == 0 || cli.query_timeout_secs == 0 || cli.schema_timeout_secs == 0 {
        return Err("intervals and timeouts must be at least one second".into());
    }

    tracing::info!(
        listen = %cli.listen,
        store = %cli.store.display(),
        allow_writes = cli.allow_writes,
        "Starting tablegate"
    );

    let store = Arc::new(FileStore::open(&cli.store).await?);
    let catalog = Arc::new(Catalog::open(store).await?);

    let config = GatewayConfig::default()
        .query_timeout(Duration::from_secs(cli.query_timeout_secs))
        .schema_timeout(Duration::from_secs(cli.schema_timeout_secs))
        .refresh_interval(Duration::from_secs(cli.refresh_secs))
        .allow_writes(cli.allow_writes);
    let gateway = Gateway::new(catalog.clone(), DriverRegistry::with_default_drivers(), config);

    match maybe_initialize(&InitConfig::from_env(), &catalog, gateway.tokens()).await {
        InitResult::Initialized { issued: Some(token) } => {
            // Printed once, never logged
            eprintln!("Bootstrap admin token: {}", token);
        }
        InitResult::Initialized { issued: None } | InitResult::AlreadyInitialized => {}
        InitResult::Failed(msg) => return Err(msg.into()),
    }

    if let Some(path) = &cli.databases {
        for def in load_database_file(path)? {
            catalog.register_database(def)?;
        }
    }

    // First tick scans every preloaded database
    let refresh = gateway.spawn_refresh();

    let server = TablegateServer::bind(cli.listen, gateway).await?;
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received");
        }
    }

    refresh.stop().await;
    Ok(())
}
