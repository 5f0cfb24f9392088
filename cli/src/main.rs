mod commands;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{
    get::GetCommand,
    info::InfoCommand,
    list::{DirsCommand, ExistsCommand, LsCommand},
    put::PutCommand,
    verify::VerifyCommand,
};
use config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "stowage",
    version,
    about = "Compressed, encrypted backup object repository",
    long_about = "Stowage stores backup objects under logical names, compressing and encrypting them on the way in"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, env = "STOWAGE_CONFIG", help = "Path to stowage.toml")]
    config: Option<PathBuf>,

    #[arg(long, help = "Keep objects in memory instead of writing the repository")]
    dry_run: bool,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Store an object, compressed and encrypted as configured")]
    Put(PutCommand),

    #[command(about = "Store an object as-is")]
    PutPlain(PutCommand),

    #[command(about = "Restore an object")]
    Get(GetCommand),

    #[command(about = "List objects by logical name")]
    Ls(LsCommand),

    #[command(about = "List directories directly below a prefix")]
    Dirs(DirsCommand),

    #[command(about = "Check whether an object exists")]
    Exists(ExistsCommand),

    #[command(about = "Show repository settings")]
    Info(InfoCommand),

    #[command(about = "Read objects back and print their decoded SHA-256")]
    Verify(VerifyCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet)?;

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;
    debug!(path = %config_path.display(), ?config, "Loaded configuration");

    let repo = Arc::new(
        config
            .open_repository(cli.dry_run)
            .with_context(|| format!("opening repository at {}", config.repo_path.display()))?,
    );

    match cli.command {
        Commands::Put(ref cmd) => cmd.run(&repo, cli.quiet).await,
        Commands::PutPlain(ref cmd) => cmd.run_plain(&repo, cli.quiet).await,
        Commands::Get(ref cmd) => cmd.run(&repo, cli.quiet).await,
        Commands::Ls(ref cmd) => cmd.run(&repo).await,
        Commands::Dirs(ref cmd) => cmd.run(&repo).await,
        Commands::Exists(ref cmd) => cmd.run(&repo).await,
        Commands::Info(ref cmd) => cmd.run(&repo, &config).await,
        Commands::Verify(ref cmd) => cmd.run(repo.clone()).await,
    }
}

fn init_tracing(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!("stowage={level}")))
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing subscriber")?;
    Ok(())
}
