//! Backtest command implementation

use anyhow::Result;
use backtester::reports::ReportGenerator;
use backtester::{data, strategy, Backtester, BacktesterConfig};
use chrono::{DateTime, Utc};
use tracing::info;

pub fn run(
    config_path: String,
    strategy_override: Option<String>,
    capital_override: Option<f64>,
    start_override: Option<String>,
    end_override: Option<String>,
) -> Result<()> {
    info!("starting backtest");

    let mut config = BacktesterConfig::from_file(&config_path)?;
    info!("loaded configuration from: {}", config_path);

    if let Some(name) = strategy_override {
        info!("overriding strategy to: {}", name);
        config.strategy.name = name;
    }

    if let Some(capital) = capital_override {
        info!("overriding initial capital to: {:.2}", capital);
        config.capital.initial = capital;
    }
    config.validate()?;

    let start: Option<DateTime<Utc>> = start_override
        .or_else(|| config.data.start_date.clone())
        .as_deref()
        .map(data::parse_timestamp)
        .transpose()?;
    let end: Option<DateTime<Utc>> = end_override
        .or_else(|| config.data.end_date.clone())
        .as_deref()
        .map(data::parse_timestamp)
        .transpose()?;

    // Load and prepare bar data
    let mut bars = data::load_bars(
        &config.data.price_data,
        config.data.symbol.as_deref(),
        start,
        end,
    )?;

    if config.data.timeframe != "1min" && config.data.timeframe != "1T" {
        bars = data::resample(&bars, &config.data.timeframe)?;
    }

    let validation = data::validate_bars(&bars);
    for warning in &validation.warnings {
        tracing::warn!("{}", warning);
    }
    if !validation.is_valid() {
        anyhow::bail!("bar data failed validation: {}", validation.errors.join("; "));
    }

    info!("processing {} bars", bars.len());

    // Build the engine
    let strategy = strategy::create_strategy(&config)?;
    info!("strategy: {}", strategy.name());

    let mut backtester = Backtester::new(config.clone(), strategy);

    // Optional pre-loaded signal file
    if let Some(signal_file) = &config.data.signal_file {
        let signals = data::load_signals(signal_file)?;
        let queued = backtester.queue_signals(signals);
        info!("queued {} signals from {}", queued, signal_file);
    }

    let result = backtester.run(&bars)?;

    // Print results
    let line = "=".repeat(60);
    println!("\n{}", line);
    println!("BACKTEST RESULTS");
    println!("{}", line);
    let m = &result.metrics;
    println!("Start Date:         {}", m.start_date);
    println!("End Date:           {}", m.end_date);
    println!("Initial Capital:    {:.2}", m.initial_capital);
    println!("Final Value:        {:.2}", m.final_value);
    println!("Total Return:       {:.2}%", m.total_return * 100.0);
    println!("CAGR:               {:.2}%", m.cagr * 100.0);
    println!("Volatility:         {:.2}%", m.volatility * 100.0);
    println!("Sharpe Ratio:       {:.2}", m.sharpe_ratio);
    println!("Sortino Ratio:      {:.2}", m.sortino_ratio);
    println!("Max Drawdown:       {:.2}%", m.max_drawdown * 100.0);
    println!("Calmar Ratio:       {:.2}", m.calmar_ratio);
    println!("Number of Trades:   {}", m.num_trades);
    println!("Win Rate:           {:.2}%", m.win_rate * 100.0);
    println!("Profit Factor:      {:.2}", m.profit_factor);
    println!("Expectancy:         {:.2}", m.expectancy);
    println!("Total Commission:   {:.2}", m.total_commission);
    println!("{}\n", line);

    // Reports
    if config.reporting.export_trades || config.reporting.export_metrics {
        let generator = ReportGenerator::new(&config.reporting.output_dir)?;
        if config.reporting.export_trades {
            generator.export_trade_sheet(&result.fills)?;
            generator.export_equity_curve(&result.snapshots)?;
        }
        if config.reporting.export_metrics {
            generator.export_metrics(&result.metrics)?;
        }
        println!("Reports written to: {}", config.reporting.output_dir);
    }

    info!("backtest completed successfully");
    Ok(())
}
