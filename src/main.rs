use clap::{Parser, Subcommand};
use namesignal::config::{Config, Overrides};
use namesignal::diagnostics::{Diagnostics, TracingDiagnostics};
use namesignal::{run_client, ZbusNameBus};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "namesignal")]
#[command(author, version, about = "Release a D-Bus name and wait for NameLost", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read settings from this TOML file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Well-known name to claim
    #[arg(long)]
    name: Option<String>,

    /// Milliseconds to wait in the loop before releasing the name
    #[arg(long)]
    release_after_ms: Option<u64>,

    /// Exit with status 2 if the name cannot be acquired
    #[arg(long)]
    strict: bool,

    /// Bus address to use instead of the session bus
    #[arg(long)]
    address: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    ShowConfig,
}

fn init_logging(verbose: bool, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("namesignal=debug,zbus=info")
        } else {
            EnvFilter::new(format!("namesignal={},zbus=warn", level))
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply(Overrides {
        name: cli.name,
        release_after_ms: cli.release_after_ms,
        strict: cli.strict,
        address: cli.address,
    })?;

    if let Some(Commands::ShowConfig) = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(ExitCode::SUCCESS);
    }

    init_logging(cli.verbose, &config.logging.level.to_ascii_lowercase());
    debug!("Effective config: {:?}", config);

    let diagnostics: Arc<dyn Diagnostics> = Arc::new(TracingDiagnostics);
    let exit = run_client(
        ZbusNameBus::connect(config.bus.address.as_deref()),
        &config,
        diagnostics,
        interrupted(),
    )
    .await;

    debug!("Exiting with {:?}", exit);
    Ok(ExitCode::from(exit.code()))
}
