//! Walk-forward evaluation: rolling train/test partitions over the feed.
//!
//! Given a train window `W` and test window `S`, fold `i` trains on ticks
//! `[i·S, i·S + W)` and tests on the `S` ticks immediately after. Each fold
//! tunes parameters on its train slice with the configured sampler, picks
//! the best row by the sweep score, and runs a single backtest on the test
//! slice with those parameters. The concatenated test results form the
//! out-of-sample series.

use crate::backtest::{bars_per_year_for, run_backtest, EngineConfig};
use crate::error::{QuantLabError, Result};
use crate::feed::HistoryFeed;
use crate::instrument::InstrumentIndex;
use crate::ledger::{EquityPoint, Trade};
use crate::metrics::{compute_metrics, Metrics, MetricsContext};
use crate::strategy::{Params, Strategy};
use crate::sweep::{run_sweep, SweepConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Walk-forward configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    /// Train window length `W`, in ticks of the merged feed.
    pub train_bars: usize,
    /// Test window length `S`, in ticks; also the fold step.
    pub test_bars: usize,
    /// Minimum number of folds required.
    pub min_folds: usize,
    /// Sweep to run on every train slice.
    pub sweep: SweepConfig,
}

impl WalkForwardConfig {
    pub fn new(train_bars: usize, test_bars: usize, sweep: SweepConfig) -> Self {
        Self {
            train_bars,
            test_bars,
            min_folds: 1,
            sweep,
        }
    }

    pub fn validate(&self, total_bars: usize) -> Result<()> {
        if self.train_bars == 0 || self.test_bars == 0 {
            return Err(QuantLabError::Config(
                "train_bars and test_bars must be > 0".into(),
            ));
        }
        let needed = self.train_bars + self.test_bars;
        if total_bars < needed {
            return Err(QuantLabError::Config(format!(
                "walk-forward needs at least {needed} bars, have {total_bars}"
            )));
        }
        Ok(())
    }
}

/// One fold's tick boundaries (train end == test start).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkForwardFold {
    pub fold_idx: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
}

/// Partition a tick count into folds. The test slice immediately follows
/// its train slice; successive folds advance by the test length.
pub fn generate_folds(
    total_bars: usize,
    config: &WalkForwardConfig,
) -> Result<Vec<WalkForwardFold>> {
    config.validate(total_bars)?;

    let mut folds = Vec::new();
    let mut fold_idx = 0;
    loop {
        let train_start = fold_idx * config.test_bars;
        let train_end = train_start + config.train_bars;
        let test_end = train_end + config.test_bars;
        if test_end > total_bars {
            break;
        }
        folds.push(WalkForwardFold {
            fold_idx,
            train_start,
            train_end,
            test_start: train_end,
            test_end,
        });
        fold_idx += 1;
    }

    if folds.len() < config.min_folds {
        return Err(QuantLabError::Config(format!(
            "walk-forward produced {} folds, need at least {}",
            folds.len(),
            config.min_folds
        )));
    }
    Ok(folds)
}

/// Outcome of one fold: the tuned parameters and the out-of-sample run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold_idx: usize,
    pub best_params: Params,
    /// Sampler seed the winning row was drawn with.
    pub seed: u64,
    /// Winning row's score on the train slice.
    pub train_score: f64,
    /// Metrics of the test-slice backtest.
    pub test_summary: Metrics,
}

/// Aggregated walk-forward outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub folds: Vec<FoldResult>,
    /// Test-slice equity points chained multiplicatively into one
    /// continuous out-of-sample curve.
    pub oos_equity: Vec<EquityPoint>,
    /// Metrics over the concatenated out-of-sample series and trades.
    pub oos_summary: Metrics,
}

/// Run walk-forward evaluation.
pub fn run_walk_forward<S, F>(
    engine_config: &EngineConfig,
    feed: &HistoryFeed,
    instruments: &InstrumentIndex,
    config: &WalkForwardConfig,
    make_strategy: F,
) -> Result<WalkForwardResult>
where
    S: Strategy,
    F: Fn(&Params) -> Result<S> + Sync,
{
    let folds = generate_folds(feed.len(), config)?;
    tracing::info!(
        folds = folds.len(),
        train_bars = config.train_bars,
        test_bars = config.test_bars,
        "starting walk-forward"
    );

    let mut fold_results = Vec::with_capacity(folds.len());
    let mut oos_equity: Vec<EquityPoint> = Vec::new();
    let mut oos_trades: Vec<Trade> = Vec::new();
    let mut total_fees = Decimal::ZERO;
    let mut total_taxes = Decimal::ZERO;
    let mut chain = Decimal::ONE;

    for fold in &folds {
        let train = sub_feed(feed, fold.train_start, fold.train_end)?;
        let test = sub_feed(feed, fold.test_start, fold.test_end)?;

        let sweep_result = run_sweep(
            engine_config,
            &train,
            instruments,
            &config.sweep,
            &make_strategy,
        )?;
        let Some(best) = sweep_result.best() else {
            return Err(QuantLabError::Config(format!(
                "fold {} produced no viable parameter sample",
                fold.fold_idx
            )));
        };

        let mut strategy = make_strategy(&best.params)?;
        let report = run_backtest(engine_config, &test, instruments, &mut strategy)?;

        // chain this fold's equity onto the running out-of-sample curve
        let initial = engine_config.initial_capital;
        for point in &report.equity {
            let mut chained = point.clone();
            chained.equity = point.equity * chain;
            chained.cash = point.cash * chain;
            oos_equity.push(chained);
        }
        if let Some(last) = report.equity.last() {
            chain *= last.equity / initial;
        }
        oos_trades.extend(report.trades.iter().cloned());
        total_fees += report.summary.total_fees;
        total_taxes += report.summary.total_taxes;

        tracing::info!(
            fold = fold.fold_idx,
            train_score = config.sweep.score.extract(&best.summary),
            oos_return = report.summary.total_return,
            "fold complete"
        );

        fold_results.push(FoldResult {
            fold_idx: fold.fold_idx,
            best_params: best.params.clone(),
            seed: best.seed,
            train_score: config.sweep.score.extract(&best.summary),
            test_summary: report.summary,
        });
    }

    let oos_summary = compute_metrics(
        &oos_equity,
        &oos_trades,
        &MetricsContext {
            initial_capital: engine_config.initial_capital,
            bars_per_year: bars_per_year_for(engine_config, feed, instruments),
            total_fees,
            total_taxes,
            total_traded: Decimal::ZERO,
        },
    );

    Ok(WalkForwardResult {
        folds: fold_results,
        oos_equity,
        oos_summary,
    })
}

/// Build a feed from a contiguous tick range, regrouping bars into their
/// original streams.
fn sub_feed(feed: &HistoryFeed, start: usize, end: usize) -> Result<HistoryFeed> {
    use std::collections::BTreeMap;

    let mut streams: BTreeMap<(String, u32), Vec<crate::bar::Bar>> = BTreeMap::new();
    for bar in &feed.bars()[start..end] {
        streams.entry(bar.stream_key()).or_default().push(bar.clone());
    }
    HistoryFeed::new(streams.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::Bar;
    use crate::instrument::{index_of, Instrument};
    use crate::sampling::ParamSpace;
    use crate::strategy::DualMaCrossover;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn feed(symbol: &str, count: usize) -> HistoryFeed {
        let bars: Vec<Bar> = (0..count)
            .map(|i| {
                let ts = chrono::Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64);
                let price = dec!(100)
                    + Decimal::from((i % 15) as i64)
                    + Decimal::from((i / 20) as i64);
                Bar::new(symbol, 86_400, ts, price, price, price, price, dec!(1000))
            })
            .collect();
        HistoryFeed::new(vec![bars]).unwrap()
    }

    fn wf_config(train: usize, test: usize) -> WalkForwardConfig {
        let space = ParamSpace::new()
            .int_range("fast", 3, 5, 2)
            .int_range("slow", 10, 20, 10);
        WalkForwardConfig::new(train, test, SweepConfig::grid(space).with_seed(7))
    }

    #[test]
    fn folds_step_by_test_window() {
        let config = wf_config(100, 20);
        let folds = generate_folds(200, &config).unwrap();

        assert_eq!(folds.len(), 5);
        assert_eq!(folds[0].train_start, 0);
        assert_eq!(folds[0].train_end, 100);
        assert_eq!(folds[0].test_start, 100);
        assert_eq!(folds[0].test_end, 120);
        assert_eq!(folds[1].train_start, 20);
        assert_eq!(folds[1].test_end, 140);
    }

    #[test]
    fn insufficient_data_is_config_error() {
        let config = wf_config(100, 50);
        assert!(generate_folds(120, &config).is_err());
    }

    #[test]
    fn walk_forward_produces_oos_series() {
        let symbol = "binance:BTC/USDT";
        let instruments = index_of([Instrument::crypto_spot("binance", "BTC", "USDT")]);
        let feed = feed(symbol, 200);
        let engine = EngineConfig::new(dec!(10000));
        let config = wf_config(100, 20);

        let result = run_walk_forward(&engine, &feed, &instruments, &config, |params| {
            DualMaCrossover::from_params(params)
        })
        .unwrap();

        assert_eq!(result.folds.len(), 5);
        // every test slice contributes its ticks to the OOS curve
        assert_eq!(result.oos_equity.len(), 5 * 20);
        for fold in &result.folds {
            assert_eq!(fold.seed, 7);
        }
    }

    #[test]
    fn walk_forward_is_deterministic() {
        let symbol = "binance:BTC/USDT";
        let instruments = index_of([Instrument::crypto_spot("binance", "BTC", "USDT")]);
        let feed = feed(symbol, 160);
        let engine = EngineConfig::new(dec!(10000));
        let config = wf_config(100, 20);

        let run = || {
            run_walk_forward(&engine, &feed, &instruments, &config, |params| {
                DualMaCrossover::from_params(params)
            })
            .unwrap()
        };
        assert_eq!(run(), run());
    }
}
