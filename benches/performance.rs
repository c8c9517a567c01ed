//! Performance benchmarks for the backtesting engine
//!
//! Run with: `cargo bench`
//! View results: `open target/criterion/report/index.html`

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use backtester::config::{
    BacktesterConfig, CapitalConfig, DataConfig, EodConfig, ExecutionConfig, FillModel,
    ReportingConfig, RiskConfig, StrategyConfig,
};
use backtester::strategy::MovingAverageCrossStrategy;
use backtester::{Backtester, Bar, Symbol};
use chrono::{Duration, TimeZone, Utc};

fn bench_bars(count: usize) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
    let mut price = 100.0;

    (0..count)
        .map(|i| {
            // Deterministic zig-zag with a slow drift
            let wave = ((i % 20) as f64 - 10.0) * 0.15;
            let open = price;
            price = 100.0 + (i as f64) * 0.01 + wave;
            let close = price;
            let high = open.max(close) + 0.3;
            let low = open.min(close) - 0.3;

            Bar::new(
                start + Duration::hours(i as i64 * 6),
                Symbol::new("SYM"),
                close,
                Some(open),
                Some(high),
                Some(low),
                Some(close),
                Some(10_000.0),
            )
        })
        .collect()
}

fn bench_config() -> BacktesterConfig {
    BacktesterConfig {
        data: DataConfig {
            price_data: "unused.csv".to_string(),
            ..DataConfig::default()
        },
        capital: CapitalConfig {
            initial: 100_000.0,
            currency: "USD".to_string(),
        },
        execution: ExecutionConfig {
            slippage_bps: 5.0,
            commission_bps: 2.0,
            tick_size: 0.01,
            fill_model: FillModel::FirstTouch,
        },
        risk: RiskConfig::default(),
        eod: EodConfig::default(),
        reporting: ReportingConfig::default(),
        strategy: StrategyConfig::default(),
    }
}

fn benchmark_engine_loop(c: &mut Criterion) {
    let bars = bench_bars(2_000);
    let config = bench_config();

    c.bench_function("backtest_2k_bars_ma_cross", |b| {
        b.iter(|| {
            let strategy = MovingAverageCrossStrategy::new(5, 15, false);
            let mut backtester = Backtester::new(config.clone(), Box::new(strategy));
            black_box(backtester.run(&bars).unwrap())
        })
    });
}

fn benchmark_indicators(c: &mut Criterion) {
    let closes: Vec<f64> = bench_bars(2_000).iter().map(|b| b.close).collect();

    c.bench_function("sma_2k", |b| {
        b.iter(|| black_box(backtester::indicators::sma(&closes, 20)))
    });

    c.bench_function("annualized_vol_2k", |b| {
        b.iter(|| black_box(backtester::indicators::annualized_volatility(&closes, 20)))
    });
}

criterion_group!(benches, benchmark_engine_loop, benchmark_indicators);
criterion_main!(benches);
