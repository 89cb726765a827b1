use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use ledger_relay::{
    broker::AmqpConnector,
    config::{
        AppConfig, DatabaseSettings,
        database::{connect, create_order_tables, create_payment_tables},
    },
    errors::Result,
    scheduler::TokioScheduler,
    service::{spawn_order_service, spawn_payment_service},
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Order and account services linked by a transactional outbox/inbox.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    service: Service,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Service {
    /// Order side: relays payment requests and settles orders from responses
    Orders,
    /// Account side: applies payment requests and relays responses
    Payments,
}

impl Service {
    const fn name(self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Payments => "payments",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, non-fatal: env vars can be set externally
    dotenv().ok();

    let cli = Cli::parse();
    let service = cli.service.name();

    // 3. Load the application configuration
    let config = AppConfig::load(&cli.config)
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;

    // 4. Open the service's own store and create its tables
    if config.database.url.is_none() {
        std::fs::create_dir_all(DatabaseSettings::DEFAULT_DATA_DIR)?;
    }
    let db = connect(&config.database.url_for(service))
        .await
        .inspect_err(|e| error!("Failed to open database: {}", e))?;
    match cli.service {
        Service::Orders => create_order_tables(&db).await?,
        Service::Payments => create_payment_tables(&db).await?,
    }
    info!(service, "Database initialized successfully.");

    // 5. Start the relay and consumer loops
    let connector = AmqpConnector::new(&config.message_bus);
    let handle = match cli.service {
        Service::Orders => spawn_order_service(db, &config, connector, TokioScheduler),
        Service::Payments => spawn_payment_service(db, &config, connector, TokioScheduler),
    };

    // 6. Run until Ctrl-C, then let in-flight work finish
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received");
    handle.shutdown().await;

    Ok(())
}
