//! Data loading: CSV bars and signals, timestamp parsing, resampling
//!
//! Column detection is forgiving (timestamp/date/datetime/time,
//! price/close/value, optional symbol and OHLCV), timestamps accept RFC
//! 3339, `YYYY-MM-DD [HH:MM:SS[.ffffff]]`, and Unix epoch seconds.

use crate::{Bar, Side, Signal, Symbol};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Data loading errors; surfaced before the simulation loop
#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to read data file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("could not find required column (tried: {tried})")]
    MissingColumn { tried: &'static str },

    #[error("row {row}: failed to parse {column}: {value}")]
    BadField {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("unparseable timestamp: {0}")]
    BadTimestamp(String),

    #[error("no bars after filtering")]
    NoBars,

    #[error("unsupported timeframe: {0}")]
    BadTimeframe(String),
}

/// Parse a timestamp in any accepted format
///
/// Tries RFC 3339, then naive datetime (with optional fraction), then a
/// bare date at midnight, then Unix epoch seconds (int or float). All
/// naive forms are taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DataError> {
    let value = value.trim();

    if let Ok(dt) = value.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ndt.and_utc());
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let ndt = date.and_hms_opt(0, 0, 0).expect("midnight is valid");
        return Ok(ndt.and_utc());
    }

    if let Ok(epoch) = value.parse::<f64>() {
        let seconds = epoch.trunc() as i64;
        let nanos = ((epoch - epoch.trunc()) * 1e9).round() as u32;
        if let Some(dt) = DateTime::from_timestamp(seconds, nanos) {
            return Ok(dt);
        }
    }

    Err(DataError::BadTimestamp(value.to_string()))
}

fn detect_column(headers: &[String], candidates: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| candidates.contains(&h.to_ascii_lowercase().as_str()))
}

fn parse_opt_f64(
    record: &csv::StringRecord,
    index: Option<usize>,
    row: usize,
    column: &'static str,
) -> Result<Option<f64>, DataError> {
    let Some(index) = index else {
        return Ok(None);
    };
    let Some(raw) = record.get(index) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| DataError::BadField {
            row,
            column,
            value: raw.to_string(),
        })
}

/// Load bars from a CSV file
///
/// `symbol` overrides/backs the symbol column; `start`/`end` filter the
/// range inclusively. Missing OHLCV fields normalize from the price column.
pub fn load_bars(
    path: impl AsRef<Path>,
    symbol: Option<&str>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<Bar>, DataError> {
    let path = path.as_ref();
    info!("loading bars from {}", path.display());

    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let ts_col = detect_column(&headers, &["timestamp", "date", "datetime", "time"])
        .ok_or(DataError::MissingColumn {
            tried: "timestamp, date, datetime, time",
        })?;
    let price_col = detect_column(&headers, &["price", "close", "value"]).ok_or(
        DataError::MissingColumn {
            tried: "price, close, value",
        },
    )?;
    let symbol_col = detect_column(&headers, &["symbol", "ticker", "instrument"]);

    let open_col = detect_column(&headers, &["open"]);
    let high_col = detect_column(&headers, &["high"]);
    let low_col = detect_column(&headers, &["low"]);
    let close_col = detect_column(&headers, &["close"]);
    let volume_col = detect_column(&headers, &["volume"]);

    let mut bars = Vec::new();

    for (i, result) in reader.records().enumerate() {
        let row = i + 2; // 1-based, after the header
        let record = result?;

        let raw_ts = record.get(ts_col).ok_or(DataError::BadField {
            row,
            column: "timestamp",
            value: String::new(),
        })?;
        let timestamp = parse_timestamp(raw_ts)?;

        if let Some(start) = start {
            if timestamp < start {
                continue;
            }
        }
        if let Some(end) = end {
            if timestamp > end {
                continue;
            }
        }

        let bar_symbol = record
            .get(symbol_col.unwrap_or(usize::MAX))
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .or_else(|| symbol.map(|s| s.to_string()))
            .unwrap_or_else(|| "UNKNOWN".to_string());

        let price = parse_opt_f64(&record, Some(price_col), row, "price")?.ok_or(
            DataError::BadField {
                row,
                column: "price",
                value: String::new(),
            },
        )?;

        bars.push(Bar::new(
            timestamp,
            Symbol::new(bar_symbol),
            price,
            parse_opt_f64(&record, open_col, row, "open")?,
            parse_opt_f64(&record, high_col, row, "high")?,
            parse_opt_f64(&record, low_col, row, "low")?,
            parse_opt_f64(&record, close_col, row, "close")?,
            parse_opt_f64(&record, volume_col, row, "volume")?,
        ));
    }

    if bars.is_empty() {
        return Err(DataError::NoBars);
    }

    info!("loaded {} bars", bars.len());
    Ok(bars)
}

/// Load signals from a CSV file with columns
/// `timestamp, symbol, side[, price, size, stop_loss, take_profit, reason]`
///
/// Rows that fail to parse are skipped with a warning, matching bulk-import
/// semantics; the result is sorted by timestamp.
pub fn load_signals(path: impl AsRef<Path>) -> Result<Vec<Signal>, DataError> {
    let path = path.as_ref();
    info!("loading signals from {}", path.display());

    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let ts_col = detect_column(&headers, &["timestamp", "date", "datetime", "time"])
        .ok_or(DataError::MissingColumn {
            tried: "timestamp, date, datetime, time",
        })?;
    let symbol_col =
        detect_column(&headers, &["symbol", "ticker"]).ok_or(DataError::MissingColumn {
            tried: "symbol, ticker",
        })?;
    let side_col = detect_column(&headers, &["side"]).ok_or(DataError::MissingColumn {
        tried: "side",
    })?;

    let price_col = detect_column(&headers, &["price"]);
    let size_col = detect_column(&headers, &["size"]);
    let stop_loss_col = detect_column(&headers, &["stop_loss"]);
    let take_profit_col = detect_column(&headers, &["take_profit"]);
    let reason_col = detect_column(&headers, &["reason"]);

    let mut signals = Vec::new();

    for (i, result) in reader.records().enumerate() {
        let row = i + 2;
        let record = result?;

        let parsed = (|| -> Result<Signal, DataError> {
            let timestamp = parse_timestamp(record.get(ts_col).unwrap_or_default())?;
            let symbol = record
                .get(symbol_col)
                .filter(|s| !s.trim().is_empty())
                .ok_or(DataError::BadField {
                    row,
                    column: "symbol",
                    value: String::new(),
                })?;
            let side: Side = record
                .get(side_col)
                .unwrap_or_default()
                .parse()
                .map_err(|_| DataError::BadField {
                    row,
                    column: "side",
                    value: record.get(side_col).unwrap_or_default().to_string(),
                })?;

            let mut signal = Signal::new(timestamp, Symbol::new(symbol.trim()), side);
            signal.limit_price = parse_opt_f64(&record, price_col, row, "price")?;
            signal.size = parse_opt_f64(&record, size_col, row, "size")?;
            signal.stop_loss = parse_opt_f64(&record, stop_loss_col, row, "stop_loss")?;
            signal.take_profit = parse_opt_f64(&record, take_profit_col, row, "take_profit")?;
            signal.reason = reason_col
                .and_then(|c| record.get(c))
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().to_string());
            Ok(signal)
        })();

        match parsed {
            Ok(signal) => signals.push(signal),
            Err(e) => warn!("skipping signal row {}: {}", row, e),
        }
    }

    signals.sort_by_key(|s| s.timestamp);

    info!("loaded {} signals", signals.len());
    Ok(signals)
}

/// Resample bars to a coarser fixed timeframe
///
/// Timeframes: `<n>min`/`<n>T` (minutes), `<n>H` (hours), `<n>D` (days).
/// Aggregation: open=first, high=max, low=min, close=last, volume=sum,
/// price=last; the bucket start becomes the bar timestamp.
pub fn resample(bars: &[Bar], timeframe: &str) -> Result<Vec<Bar>, DataError> {
    if bars.is_empty() {
        return Ok(Vec::new());
    }

    let window_secs = parse_timeframe_seconds(timeframe)?;

    let mut resampled: Vec<Bar> = Vec::new();
    let mut current_bucket: Option<(i64, Bar)> = None;

    for bar in bars {
        let bucket = bar.timestamp.timestamp().div_euclid(window_secs) * window_secs;

        match &mut current_bucket {
            Some((key, agg)) if *key == bucket => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.price = bar.price;
                agg.volume += bar.volume;
            }
            _ => {
                if let Some((_, done)) = current_bucket.take() {
                    resampled.push(done);
                }
                let timestamp =
                    DateTime::from_timestamp(bucket, 0).expect("bucket within range");
                let mut agg = bar.clone();
                agg.timestamp = timestamp;
                current_bucket = Some((bucket, agg));
            }
        }
    }

    if let Some((_, done)) = current_bucket.take() {
        resampled.push(done);
    }

    info!(
        "resampled {} bars to {} ({} bars)",
        bars.len(),
        timeframe,
        resampled.len()
    );

    Ok(resampled)
}

fn parse_timeframe_seconds(timeframe: &str) -> Result<i64, DataError> {
    let tf = timeframe.trim();
    let split = tf
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| DataError::BadTimeframe(tf.to_string()))?;
    let (num, unit) = tf.split_at(split);
    let n: i64 = if num.is_empty() {
        1
    } else {
        num.parse()
            .map_err(|_| DataError::BadTimeframe(tf.to_string()))?
    };
    if n <= 0 {
        return Err(DataError::BadTimeframe(tf.to_string()));
    }

    let unit_secs = match unit.to_ascii_lowercase().as_str() {
        "t" | "min" | "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => return Err(DataError::BadTimeframe(tf.to_string())),
    };

    Ok(n * unit_secs)
}

/// Result of bar-series validation
#[derive(Debug)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a bar series for consistency before the run
pub fn validate_bars(bars: &[Bar]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if bars.is_empty() {
        errors.push("no bars provided".to_string());
        return ValidationResult { errors, warnings };
    }

    for (i, bar) in bars.iter().enumerate() {
        if let Err(e) = bar.validate() {
            errors.push(format!("bar {}: {}", i, e));
        }
        if i > 0 && bar.timestamp < bars[i - 1].timestamp {
            errors.push(format!("bar {}: timestamps not in order", i));
        }
        if i > 0 && bar.symbol != bars[i - 1].symbol {
            warnings.push(format!("bar {}: symbol changed mid-stream", i));
        }
    }

    ValidationResult { errors, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("backtester-data-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();

        assert_eq!(parse_timestamp("2024-01-02T09:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-02 09:30:00").unwrap(), expected);
        assert_eq!(
            parse_timestamp("2024-01-02 09:30:00.250000").unwrap(),
            expected + chrono::Duration::milliseconds(250)
        );
        assert_eq!(
            parse_timestamp("2024-01-02").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_timestamp(&expected.timestamp().to_string()).unwrap(),
            expected
        );
        assert!(parse_timestamp("not a date").is_err());
    }

    #[test]
    fn test_load_ohlcv_bars() {
        let path = write_temp(
            "ohlcv.csv",
            "timestamp,open,high,low,close,volume\n\
             2024-01-02 09:30:00,100,102,99,101,5000\n\
             2024-01-02 09:31:00,101,103,100,102,6000\n",
        );

        let bars = load_bars(&path, Some("SYM"), None, None).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].close, 101.0);
        assert_eq!(bars[0].price, 101.0);
        assert_eq!(bars[0].symbol.as_str(), "SYM");
    }

    #[test]
    fn test_load_price_only_bars_normalize() {
        let path = write_temp(
            "price.csv",
            "date,price\n2024-01-02,100.5\n2024-01-03,101.5\n",
        );

        let bars = load_bars(&path, Some("SYM"), None, None).unwrap();
        assert_eq!(bars[0].open, 100.5);
        assert_eq!(bars[0].high, 100.5);
        assert_eq!(bars[0].low, 100.5);
        assert_eq!(bars[0].close, 100.5);
        assert_eq!(bars[0].volume, 0.0);
    }

    #[test]
    fn test_date_range_filter() {
        let path = write_temp(
            "range.csv",
            "date,price\n2024-01-02,100\n2024-01-03,101\n2024-01-04,102\n",
        );

        let start = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let bars = load_bars(&path, Some("SYM"), Some(start), None).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].price, 101.0);
    }

    #[test]
    fn test_empty_after_filter_is_error() {
        let path = write_temp("empty.csv", "date,price\n2024-01-02,100\n");
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            load_bars(&path, None, Some(start), None),
            Err(DataError::NoBars)
        ));
    }

    #[test]
    fn test_load_signals_skips_bad_rows() {
        let path = write_temp(
            "signals.csv",
            "timestamp,symbol,side,price,size\n\
             2024-01-03 10:00:00,SYM,BUY,,10\n\
             2024-01-02 10:00:00,SYM,SELL,101.5,\n\
             bad-ts,SYM,BUY,,\n",
        );

        let signals = load_signals(&path).unwrap();
        assert_eq!(signals.len(), 2);
        // Sorted by timestamp
        assert_eq!(signals[0].side, Side::Sell);
        assert_eq!(signals[0].limit_price, Some(101.5));
        assert_eq!(signals[1].size, Some(10.0));
    }

    #[test]
    fn test_resample_to_five_minutes() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let bars: Vec<Bar> = (0..10)
            .map(|i| {
                Bar::new(
                    start + chrono::Duration::minutes(i),
                    Symbol::new("SYM"),
                    100.0 + i as f64,
                    Some(100.0 + i as f64),
                    Some(101.0 + i as f64),
                    Some(99.0 + i as f64),
                    Some(100.0 + i as f64),
                    Some(100.0),
                )
            })
            .collect();

        let resampled = resample(&bars, "5min").unwrap();
        assert_eq!(resampled.len(), 2);

        let first = &resampled[0];
        assert_eq!(first.open, 100.0);
        assert_eq!(first.close, 104.0);
        assert_eq!(first.high, 105.0);
        assert_eq!(first.low, 99.0);
        assert_eq!(first.volume, 500.0);
    }

    #[test]
    fn test_bad_timeframe_rejected() {
        assert!(matches!(
            parse_timeframe_seconds("1Q"),
            Err(DataError::BadTimeframe(_))
        ));
        assert_eq!(parse_timeframe_seconds("15min").unwrap(), 900);
        assert_eq!(parse_timeframe_seconds("1D").unwrap(), 86_400);
        assert_eq!(parse_timeframe_seconds("4H").unwrap(), 14_400);
    }

    #[test]
    fn test_validate_bars_flags_disorder() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let mut bars = vec![
            Bar::from_price(start, Symbol::new("SYM"), 100.0),
            Bar::from_price(start + chrono::Duration::minutes(1), Symbol::new("SYM"), 101.0),
        ];
        assert!(validate_bars(&bars).is_valid());

        bars.swap(0, 1);
        assert!(!validate_bars(&bars).is_valid());
    }
}
