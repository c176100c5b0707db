//! Yearwrap - upload, share and compare yearly messaging statistics
//!
//! `serve` runs the HTTP API. `prepare` turns a raw export into an upload
//! body on the submitter's side, and `aggregate` prints the cohort report
//! straight from the database.

use anyhow::{Context, Result};
use chrono::Datelike;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;
use yearwrap_core::{
    aggregate_records, api::ApiServer, capture_hydration,
    privacy::hydration::DEFAULT_CAPTURE_PATHS, ConnectionMode, LibsqlStorage, Sanitizer,
    ServerConfig, StatTree, StatsStorage, UnlockCode,
};

#[derive(Parser)]
#[command(name = "yearwrap")]
#[command(about = "Privacy-preserving yearly messaging statistics", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen address (overrides config and YEARWRAP_ADDR)
        #[arg(long)]
        addr: Option<String>,

        /// Database path (overrides config and YEARWRAP_DB_PATH)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },

    /// Sanitize a raw export and print the upload body
    Prepare {
        /// Raw statistics JSON
        input: PathBuf,

        /// Year of the statistics (defaults to the export's `year`, then the current year)
        #[arg(short, long)]
        year: Option<i32>,

        /// Keep contact names aside behind a fresh unlock code
        #[arg(long)]
        with_contacts: bool,
    },

    /// Print the cohort report for stored records
    Aggregate {
        /// Database path (defaults to YEARWRAP_DB_PATH, then the data directory)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Only include records from this year
        #[arg(short, long)]
        year: Option<i32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Own crates at the requested level, noisy dependencies at warn
    let filter = EnvFilter::new(format!(
        "yearwrap={level},yearwrap_core={level},tower_http={level},libsql=warn,hyper=warn,reqwest=warn",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // stdout is reserved for command output
        .init();

    debug!("yearwrap v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve {
            config,
            addr,
            db_path,
        } => serve(config, addr, db_path).await,
        Commands::Prepare {
            input,
            year,
            with_contacts,
        } => prepare(input, year, with_contacts),
        Commands::Aggregate { db_path, year } => aggregate(db_path, year).await,
    }
}

async fn serve(
    config_path: Option<PathBuf>,
    addr: Option<String>,
    db_path: Option<PathBuf>,
) -> Result<()> {
    let mut config =
        ServerConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(addr) = addr {
        config.addr = addr
            .parse()
            .with_context(|| format!("Invalid address '{}'", addr))?;
    }
    if let Some(db_path) = db_path {
        config.database_path = db_path;
    }

    let storage = LibsqlStorage::new_with_validation(config.connection_mode(), true)
        .await
        .context("Failed to open database")?;
    info!("Database ready at {}", config.database_path.display());

    ApiServer::new(config, Arc::new(storage)).serve().await
}

fn prepare(input: PathBuf, year: Option<i32>, with_contacts: bool) -> Result<()> {
    let contents = std::fs::read_to_string(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let raw: serde_json::Value =
        serde_json::from_str(&contents).context("Export is not valid JSON")?;
    let raw = StatTree::from(raw);

    let year = year
        .or_else(|| raw.number_at("year").map(|y| y as i32))
        .unwrap_or_else(|| chrono::Utc::now().year());

    let sanitized = Sanitizer::default().sanitize(&raw);
    let mut body = json!({
        "year": year,
        "statistics": sanitized,
    });

    if with_contacts {
        let payload = capture_hydration(&raw, DEFAULT_CAPTURE_PATHS);
        let code = UnlockCode::generate();
        info!("Captured {} hydration entries", payload.len());
        eprintln!("Unlock code: {} (keep it to reveal contact names later)", code.as_str());
        body["hydrated_data"] = serde_json::to_value(&payload)?;
        body["unlock_code"] = json!(code.as_str());
    }

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn aggregate(db_path: Option<PathBuf>, year: Option<i32>) -> Result<()> {
    let mut config = ServerConfig::load(None).context("Failed to load configuration")?;
    if let Some(db_path) = db_path {
        config.database_path = db_path;
    }

    let path = config.database_path.to_string_lossy().into_owned();
    let storage = LibsqlStorage::new_with_validation(ConnectionMode::Local(path), false)
        .await
        .context("Failed to open database")?;

    let records = storage.list_records(year).await?;
    let report = aggregate_records(&records);
    info!(
        "Aggregated {} records ({} skipped)",
        report.total_records,
        report.skipped.len()
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
