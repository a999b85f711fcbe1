use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use matome_aggregator::api::{self, AppState};
use matome_aggregator::config::{DEFAULT_BIND_ADDR, DEFAULT_DATABASE_URL, DEFAULT_SOURCES_PATH};
use matome_aggregator::{Aggregator, ArticleSummarizer, FetchConfig, RssTransport, SourcesConfig, Store};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "matome", about = "Link aggregation, dedup and scoring")]
struct Cli {
    /// SQLite connection string
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL, global = true)]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or upgrade the schema
    Migrate,
    /// Run one ingestion cycle over the configured sources, then rescore
    Ingest {
        #[arg(long, default_value = DEFAULT_SOURCES_PATH)]
        config: PathBuf,
    },
    /// Recompute every item's scores as of now
    Rescore,
    /// Serve the HTTP API
    Serve {
        #[arg(long, env = "MATOME_BIND", default_value = DEFAULT_BIND_ADDR)]
        bind: String,
    },
}

/// SQLite creates the database file but not its directory.
fn ensure_database_dir(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    Ok(())
}

async fn open_store(database_url: &str) -> anyhow::Result<Arc<Store>> {
    ensure_database_dir(database_url)?;
    let store = Store::connect(database_url)
        .await
        .with_context(|| format!("Failed to open database {}", database_url))?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

fn build_aggregator(store: Arc<Store>) -> anyhow::Result<Aggregator> {
    let fetch_config = FetchConfig::default();
    let page_size = fetch_config.page_size;
    let enricher = ArticleSummarizer::new(&fetch_config)?;
    let transport = RssTransport::new(fetch_config)?;
    Ok(Aggregator::new(store, Arc::new(transport), Arc::new(enricher)).with_page_size(page_size))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,matome_aggregator=debug")))
        .init();

    let cli = Cli::parse();
    let store = open_store(&cli.database_url).await?;

    match cli.command {
        Command::Migrate => {
            info!("Database is up to date");
        }
        Command::Ingest { config } => {
            let sources = SourcesConfig::load(&config)?;
            let aggregator = build_aggregator(store.clone())?;
            let report = aggregator.run_once(&sources).await?;
            let rescored = store.rescore_all(Utc::now()).await?;
            info!("Cycle report: {:?}, {} items rescored", report, rescored);

            for (key, value) in store.get_stats().await? {
                info!("  {}: {}", key, value);
            }
        }
        Command::Rescore => {
            let rescored = store.rescore_all(Utc::now()).await?;
            info!("Rescored {} items", rescored);
        }
        Command::Serve { bind } => {
            let aggregator = Arc::new(build_aggregator(store)?);
            let app = api::router(AppState { aggregator });

            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("Failed to bind {}", bind))?;
            info!("Server listening on http://{}", bind);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
