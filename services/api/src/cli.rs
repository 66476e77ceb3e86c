use crate::server;
use clap::{Args, Parser, Subcommand};
use gatehouse::config::AppConfig;
use gatehouse::error::AppError;
use gatehouse::identity::FileIdentityStore;
use gatehouse::telemetry;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "Gatehouse",
    about = "Run the Gatehouse registration service or reconcile legacy credentials",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run one reconciliation pass against the configured stores and print the report
    Sync(SyncArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct SyncArgs {
    /// Override the configured legacy credential database
    #[arg(long)]
    pub(crate) database: Option<std::path::PathBuf>,
    /// Print the report as compact JSON instead of pretty-printed
    #[arg(long)]
    pub(crate) compact: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sync(args) => run_sync(args).await,
    }
}

async fn run_sync(args: SyncArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    if let Some(database) = args.database {
        config.legacy_auth.database_path = database;
    }
    telemetry::init(&config.telemetry)?;

    let identities = Arc::new(FileIdentityStore::open(&config.storage.users_path)?);
    let engine = server::legacy_engine(identities, &config.legacy_auth).await?;
    let report = engine.sync().await?;

    let rendered = if args.compact {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    }
    .map_err(std::io::Error::other)?;
    println!("{rendered}");
    Ok(())
}
