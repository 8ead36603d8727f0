mod config_commands;
mod handlers_commands;
mod simulate_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    patchbay_config::PatchbayConfig,
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "patchbay", about = "Patchbay: chat handler dispatch engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./patchbay.toml and the user config dir).
    #[arg(long, global = true, env = "PATCHBAY_CONFIG")]
    config: Option<PathBuf>,

    /// Custom data directory (holds the durable state database).
    #[arg(long, global = true, env = "PATCHBAY_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Handler discovery and validation.
    Handlers {
        #[command(subcommand)]
        action: handlers_commands::HandlersAction,
    },
    /// Dispatch one message against the loaded handlers without side effects.
    Simulate(simulate_commands::SimulateArgs),
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Load the config named on the command line, or discover one.
fn load_config(cli: &Cli) -> anyhow::Result<PatchbayConfig> {
    match &cli.config {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            Ok(patchbay_config::load_config(path)?)
        },
        None => Ok(patchbay_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "patchbay starting");

    if let Some(ref dir) = cli.data_dir {
        patchbay_config::set_data_dir(dir.clone());
    }

    match cli.command {
        Commands::Config { ref action } => config_commands::handle_config(action, cli.config.as_deref()),
        Commands::Handlers { ref action } => {
            let config = load_config(&cli)?;
            handlers_commands::handle_handlers(action, &config).await
        },
        Commands::Simulate(ref args) => {
            let config = load_config(&cli)?;
            let report = simulate_commands::handle_simulate(args, &config).await?;
            info!(handled = report.handled, stopped = report.stopped, "simulation finished");
            Ok(())
        },
    }
}
