//! Report generation: trade sheet, metrics, equity curve
//!
//! Everything is written under the configured output directory; the
//! simulation itself never touches disk.

use crate::metrics::PerformanceMetrics;
use crate::oms::types::{Fill, PortfolioSnapshot};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Writes backtest outputs to disk
pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir).context("Failed to create output directory")?;
        Ok(Self { output_dir })
    }

    /// Export the fill stream as `trade_sheet.csv`
    pub fn export_trade_sheet(&self, fills: &[Fill]) -> Result<()> {
        if fills.is_empty() {
            warn!("no fills to export");
            return Ok(());
        }

        let path = self.output_dir.join("trade_sheet.csv");
        let mut writer = csv::Writer::from_path(&path).context("Failed to create trade sheet")?;

        writer.write_record([
            "fill_id",
            "timestamp",
            "symbol",
            "side",
            "quantity",
            "price",
            "commission",
            "slippage_bps",
            "realized_pnl",
            "gross_value",
            "net_value",
            "reason",
        ])?;

        for fill in fills {
            let record = [
                fill.fill_id.clone(),
                fill.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                fill.symbol.to_string(),
                fill.side.to_string(),
                fill.quantity.to_string(),
                fill.price.to_string(),
                fill.commission.to_string(),
                fill.slippage_bps.to_string(),
                fill.realized_pnl.to_string(),
                fill.gross_value().to_string(),
                fill.net_value().to_string(),
                fill.reason.clone().unwrap_or_default(),
            ];
            writer.write_record(&record)?;
        }

        writer.flush()?;
        info!("trade sheet exported: {} ({} fills)", path.display(), fills.len());
        Ok(())
    }

    /// Export metrics as `metrics.json` and a readable `metrics.txt`
    pub fn export_metrics(&self, metrics: &PerformanceMetrics) -> Result<()> {
        let json_path = self.output_dir.join("metrics.json");
        let json = serde_json::to_string_pretty(metrics)?;
        fs::write(&json_path, json).context("Failed to write metrics JSON")?;
        info!("metrics exported: {}", json_path.display());

        let txt_path = self.output_dir.join("metrics.txt");
        fs::write(&txt_path, format_metrics(metrics)).context("Failed to write metrics text")?;
        info!("metrics exported: {}", txt_path.display());

        Ok(())
    }

    /// Export the per-bar equity curve as `equity_curve.csv`
    pub fn export_equity_curve(&self, snapshots: &[PortfolioSnapshot]) -> Result<()> {
        if snapshots.is_empty() {
            warn!("no snapshots to export");
            return Ok(());
        }

        let path = self.output_dir.join("equity_curve.csv");
        let mut writer = csv::Writer::from_path(&path).context("Failed to create equity curve")?;

        writer.write_record([
            "timestamp",
            "total_equity",
            "cash",
            "realized_pnl",
            "unrealized_pnl",
            "daily_pnl",
            "num_trades",
        ])?;

        for snapshot in snapshots {
            let record = [
                snapshot.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                snapshot.total_equity.to_string(),
                snapshot.cash.to_string(),
                snapshot.realized_pnl.to_string(),
                snapshot.unrealized_pnl.to_string(),
                snapshot.daily_pnl.to_string(),
                snapshot.num_trades.to_string(),
            ];
            writer.write_record(&record)?;
        }

        writer.flush()?;
        info!(
            "equity curve exported: {} ({} snapshots)",
            path.display(),
            snapshots.len()
        );
        Ok(())
    }
}

/// Aligned text summary of the metrics set
pub fn format_metrics(m: &PerformanceMetrics) -> String {
    let mut out = String::new();
    let line = "=".repeat(60);

    out.push_str(&format!("{}\nBACKTEST PERFORMANCE METRICS\n{}\n\n", line, line));

    out.push_str("RETURN METRICS:\n");
    out.push_str(&format!("  Total Return:        {:>10.2}%\n", m.total_return * 100.0));
    out.push_str(&format!("  CAGR:                {:>10.2}%\n", m.cagr * 100.0));
    out.push_str(&format!("  Total P&L:           {:>10.2}\n\n", m.total_pnl));

    out.push_str("RISK METRICS:\n");
    out.push_str(&format!("  Volatility (Annual): {:>10.2}%\n", m.volatility * 100.0));
    out.push_str(&format!("  Sharpe Ratio:        {:>10.2}\n", m.sharpe_ratio));
    out.push_str(&format!("  Sortino Ratio:       {:>10.2}\n", m.sortino_ratio));
    out.push_str(&format!("  Max Drawdown:        {:>10.2}%\n", m.max_drawdown * 100.0));
    out.push_str(&format!(
        "  Max DD Duration:     {:>10} days\n",
        m.max_drawdown_duration_days
    ));
    out.push_str(&format!("  Calmar Ratio:        {:>10.2}\n", m.calmar_ratio));
    out.push_str(&format!("  VaR (95%):           {:>10.2}%\n", m.var_95 * 100.0));
    out.push_str(&format!("  CVaR (95%):          {:>10.2}%\n\n", m.cvar_95 * 100.0));

    out.push_str("TRADE METRICS:\n");
    out.push_str(&format!("  Number of Trades:    {:>10}\n", m.num_trades));
    out.push_str(&format!("  Win Rate:            {:>10.2}%\n", m.win_rate * 100.0));
    out.push_str(&format!("  Profit Factor:       {:>10.2}\n", m.profit_factor));
    out.push_str(&format!("  Average Win:         {:>10.2}\n", m.avg_win));
    out.push_str(&format!("  Average Loss:        {:>10.2}\n", m.avg_loss));
    out.push_str(&format!("  Expectancy:          {:>10.2}\n", m.expectancy));
    out.push_str(&format!("  Total Commission:    {:>10.2}\n\n", m.total_commission));

    out.push_str("PERIOD:\n");
    out.push_str(&format!("  Start Date:          {:>10}\n", m.start_date));
    out.push_str(&format!("  End Date:            {:>10}\n", m.end_date));
    out.push_str(&format!("  Initial Capital:     {:>10.2}\n", m.initial_capital));
    out.push_str(&format!("  Final Value:         {:>10.2}\n", m.final_value));
    out.push_str(&format!("{}\n", line));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Side, Symbol};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("backtester-report-tests").join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_exports_write_files() {
        let dir = temp_dir("basic");
        let generator = ReportGenerator::new(&dir).unwrap();

        let fill = Fill {
            fill_id: "SYM-1-F0".to_string(),
            order_id: "SYM-1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap(),
            symbol: Symbol::new("SYM"),
            side: Side::Buy,
            quantity: 10.0,
            price: 100.0,
            commission: 0.2,
            slippage_bps: 0.0,
            execution_price: 100.0,
            realized_pnl: 0.0,
            reason: None,
        };

        let snapshot = PortfolioSnapshot {
            timestamp: fill.timestamp,
            cash: 99_000.0,
            positions: HashMap::new(),
            total_equity: 99_000.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            daily_pnl: 0.0,
            daily_return: 0.0,
            total_commission: 0.2,
            num_trades: 1,
            initial_cash: 100_000.0,
            previous_day_equity: 100_000.0,
        };

        generator.export_trade_sheet(&[fill]).unwrap();
        generator.export_equity_curve(&[snapshot]).unwrap();
        generator.export_metrics(&PerformanceMetrics::default()).unwrap();

        assert!(dir.join("trade_sheet.csv").exists());
        assert!(dir.join("equity_curve.csv").exists());
        assert!(dir.join("metrics.json").exists());
        assert!(dir.join("metrics.txt").exists());

        let metrics_json = fs::read_to_string(dir.join("metrics.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&metrics_json).unwrap();
        assert!(parsed.get("sharpe_ratio").is_some());
        assert!(parsed.get("max_drawdown").is_some());
    }

    #[test]
    fn test_format_metrics_contains_sections() {
        let text = format_metrics(&PerformanceMetrics::default());
        assert!(text.contains("RETURN METRICS"));
        assert!(text.contains("RISK METRICS"));
        assert!(text.contains("TRADE METRICS"));
        assert!(text.contains("PERIOD"));
    }
}
