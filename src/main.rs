//! Backtester - main entry point
//!
//! Two subcommands: `backtest` runs a configured simulation and writes
//! reports; `validate` checks configuration and data without running.
//! Exit codes distinguish failure classes: 2 for configuration errors,
//! 3 for data errors, 4 for simulation invariant violations, 1 otherwise.

use anyhow::Result;
use backtester::backtest::BacktestError;
use backtester::config::ConfigError;
use backtester::data::DataError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "backtester")]
#[command(about = "Daywise event-driven backtesting engine for bar-data strategies", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a backtest from a config file
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/backtest.json")]
        config: String,

        /// Strategy name (overrides config file)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Initial capital (overrides config file)
        #[arg(long)]
        capital: Option<f64>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },

    /// Validate configuration and data without running
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/backtest.json")]
        config: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("logging initialized");
    info!("log file: {}", log_path.display());

    Ok(())
}

/// Map an error chain to the documented exit codes
fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.is::<ConfigError>() {
            return 2;
        }
        if cause.is::<DataError>() {
            return 3;
        }
        if cause.is::<BacktestError>() {
            return 4;
        }
        // serde parse failures of the config file are configuration errors
        if cause.is::<serde_json::Error>() {
            return 2;
        }
    }
    1
}

fn main() {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Backtest { .. } => "backtest",
        Commands::Validate { .. } => "validate",
    };

    if let Err(e) = setup_logging(cli.verbose, command_name) {
        eprintln!("failed to initialize logging: {:#}", e);
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Backtest {
            config,
            strategy,
            capital,
            start,
            end,
        } => commands::backtest::run(config, strategy, capital, start, end),

        Commands::Validate { config } => commands::validate::run(config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}
