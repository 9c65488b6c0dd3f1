use clap::{Parser, Subcommand};
use gasledger::application::ledger::Ledger;
use gasledger::config::Settings;
use gasledger::domain::ports::StoreHandle;
use gasledger::infrastructure::approvals::InMemoryApprovals;
use gasledger::infrastructure::gateway::HttpGateway;
use gasledger::infrastructure::in_memory::InMemoryStore;
#[cfg(feature = "storage-rocksdb")]
use gasledger::infrastructure::rocksdb::RocksDbStore;
use gasledger::interfaces::csv::audit_writer::AuditWriter;
use gasledger::interfaces::http::{AppState, router, run_server};
use miette::{IntoDiagnostic, Result, miette};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file. Defaults to ./gasledger.toml when present.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve {
        /// Address to listen on, overriding `server.bind_address`.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Check every wallet balance against its transaction log and print the
    /// result as CSV.
    Audit,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gasledger=debug"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<StoreHandle> {
    match db_path {
        Some(path) => {
            info!(path = %path.display(), "using RocksDB storage");
            Ok(Arc::new(RocksDbStore::open(path).into_diagnostic()?))
        }
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<StoreHandle> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).into_diagnostic()?;
    init_tracing();

    let store = open_store(cli.db_path.or_else(|| settings.storage.db_path.clone()))?;

    match cli.command {
        Command::Serve { bind } => {
            let gateway = HttpGateway::new(
                settings.gateway.base_url.clone(),
                settings.gateway.api_key.clone(),
                settings.gateway.timeout(),
            )
            .into_diagnostic()?;
            let approvals = InMemoryApprovals::from_settings(&settings.authorization);
            if approvals.allows_all() {
                warn!("authorization.allow_all is set, every buyer may order from every counterparty");
            } else {
                info!(pairs = settings.authorization.approved.len(), "buyer approvals loaded");
            }
            info!(gateway = %settings.gateway.base_url, "gateway configured");
            let state = AppState::new(store, Arc::new(gateway), Arc::new(approvals), &settings);
            let bind_address = bind.unwrap_or_else(|| settings.server.bind_address.clone());
            run_server(router(state), &bind_address)
                .await
                .into_diagnostic()?;
        }
        Command::Audit => {
            let audits = Ledger::new(store).audit_all().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = AuditWriter::new(stdout.lock());
            let inconsistent = writer.write_audits(&audits).into_diagnostic()?;
            if inconsistent > 0 {
                return Err(miette!(
                    "{inconsistent} wallet(s) disagree with their transaction log"
                ));
            }
        }
    }

    Ok(())
}
