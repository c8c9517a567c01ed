//! Validate command: check configuration and data without running

use anyhow::Result;
use backtester::{data, strategy, BacktesterConfig};
use tracing::info;

pub fn run(config_path: String) -> Result<()> {
    let config = BacktesterConfig::from_file(&config_path)?;
    println!("config OK: {}", config_path);

    // The factory rejects unknown strategy names
    let strategy = strategy::create_strategy(&config)?;
    println!("strategy OK: {}", strategy.name());

    let bars = data::load_bars(
        &config.data.price_data,
        config.data.symbol.as_deref(),
        None,
        None,
    )?;

    let validation = data::validate_bars(&bars);
    for warning in &validation.warnings {
        println!("warning: {}", warning);
    }
    if !validation.is_valid() {
        for error in &validation.errors {
            println!("error: {}", error);
        }
        anyhow::bail!("bar data failed validation ({} errors)", validation.errors.len());
    }

    let first = bars.first().expect("load_bars rejects empty");
    let last = bars.last().expect("load_bars rejects empty");
    println!(
        "data OK: {} bars of {} from {} to {}",
        bars.len(),
        first.symbol,
        first.timestamp.format("%Y-%m-%d %H:%M:%S"),
        last.timestamp.format("%Y-%m-%d %H:%M:%S"),
    );

    if let Some(signal_file) = &config.data.signal_file {
        let signals = data::load_signals(signal_file)?;
        println!("signals OK: {} from {}", signals.len(), signal_file);
    }

    info!("validation passed");
    Ok(())
}
