//! The deterministic bar-driven backtest engine.
//!
//! One pass over the merged feed drives everything:
//! - at each bar *open*: mark, rule-gate and fill the orders pending for
//!   that (symbol, timeframe) stream, in submission order;
//! - at each bar *close*: mark to market, run the perpetual liquidation
//!   check, append an equity point, then hand the strategy a frame whose
//!   signals become orders pending for the next open.
//!
//! Signals are computed on bar close and fill on the next bar open; no
//! decision ever reads the current bar beyond its close mark. The loop is
//! single-threaded with `BTreeMap` state throughout, so a run is
//! byte-identical given identical inputs.

use crate::costs::{slipped_price, FeeSchedule};
use crate::error::{QuantLabError, Result};
use crate::feed::{GapEvent, GapPolicy, HistoryFeed};
use crate::instrument::{AssetKind, Instrument, InstrumentIndex};
use crate::ledger::{EquityPoint, Ledger, Trade};
use crate::metrics::{compute_metrics, Metrics, MetricsContext};
use crate::order::{Fill, FillKind, LedgerEvent, Order, OrderType, Rejection, Side};
use crate::rules::{gate_for, shanghai_date, RuleContext, RuleDecision};
use crate::strategy::{BarFrame, ParamSpec, Params, Signal, Strategy};
use crate::translator::{translate_signals, IdGen};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Engine configuration. Validated once at the start of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_capital: Decimal,

    /// Commission override; `None` uses the venue default per asset kind.
    pub commission_rate: Option<Decimal>,

    /// Slippage in basis points, applied in the unfavorable direction.
    pub slippage_bps: u32,

    pub gap_policy: GapPolicy,

    /// Days per year for metric scaling (365 or 252); `None` derives it
    /// from the asset kinds in the feed.
    pub annualization_basis: Option<u32>,

    /// Leverage override for perpetuals; `None` uses the instrument cap.
    pub max_leverage: Option<Decimal>,

    /// Equity fraction of perp notional below which a position force-closes.
    pub maintenance_margin_rate: Decimal,

    /// Penalty fee charged on a liquidation fill, in basis points of the
    /// closed notional.
    pub liquidation_penalty_bps: u32,

    /// Warm-up floor; the effective warm-up is the larger of this and the
    /// strategy's declared requirement.
    pub warmup_bars: usize,

    /// Treat strategy faults as empty signal output instead of aborting.
    pub tolerant: bool,
}

impl EngineConfig {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            commission_rate: None,
            slippage_bps: 5,
            gap_policy: GapPolicy::default(),
            annualization_basis: None,
            max_leverage: None,
            maintenance_margin_rate: dec!(0.05),
            liquidation_penalty_bps: 50,
            warmup_bars: 0,
            tolerant: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_capital <= Decimal::ZERO {
            return Err(QuantLabError::Config(
                "initial_capital must be > 0".into(),
            ));
        }
        if let Some(rate) = self.commission_rate {
            if rate < Decimal::ZERO {
                return Err(QuantLabError::Config(
                    "commission_rate must be >= 0".into(),
                ));
            }
        }
        if let Some(basis) = self.annualization_basis {
            if basis != 365 && basis != 252 {
                return Err(QuantLabError::Config(format!(
                    "annualization_basis must be 365 or 252, got {basis}"
                )));
            }
        }
        if let Some(leverage) = self.max_leverage {
            if leverage <= Decimal::ZERO {
                return Err(QuantLabError::Config("max_leverage must be > 0".into()));
            }
        }
        if self.maintenance_margin_rate < Decimal::ZERO
            || self.maintenance_margin_rate >= Decimal::ONE
        {
            return Err(QuantLabError::Config(
                "maintenance_margin_rate must be in [0, 1)".into(),
            ));
        }
        Ok(())
    }
}

/// Structured result of a complete run: summary metrics, equity series,
/// and the full trade ledger (fills, rejections, tolerated faults) in
/// event order. External serializers stay outside the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub summary: Metrics,
    pub equity: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub ledger: Vec<LedgerEvent>,
    /// Grid holes observed by the feed (informational under `Skip`).
    pub gaps: Vec<GapEvent>,
}

impl BacktestReport {
    pub fn fills(&self) -> Vec<&Fill> {
        self.ledger
            .iter()
            .filter_map(|event| match event {
                LedgerEvent::Fill(fill) => Some(fill),
                _ => None,
            })
            .collect()
    }

    /// The audit subset: every rejection row.
    pub fn rejections(&self) -> Vec<&Rejection> {
        self.ledger
            .iter()
            .filter_map(|event| match event {
                LedgerEvent::Rejection(rejection) => Some(rejection),
                _ => None,
            })
            .collect()
    }

    pub fn final_equity(&self) -> Option<Decimal> {
        self.equity.last().map(|p| p.equity)
    }
}

/// Per-symbol Shanghai-calendar day tracking for the A-share limit
/// reference and the T+1 boundary.
#[derive(Debug, Default)]
struct DayTracker {
    current_date: Option<NaiveDate>,
    last_close: Option<Decimal>,
    prev_day_close: Option<Decimal>,
}

/// Run a backtest over a merged feed with a configured strategy.
pub fn run_backtest<S: Strategy>(
    config: &EngineConfig,
    feed: &HistoryFeed,
    instruments: &InstrumentIndex,
    strategy: &mut S,
) -> Result<BacktestReport> {
    config.validate()?;

    match config.gap_policy {
        GapPolicy::Abort => {
            if let Some(gap) = feed.gaps().first() {
                return Err(QuantLabError::DataGap {
                    symbol: gap.symbol.clone(),
                    timeframe_secs: gap.timeframe_secs,
                    expected: gap.expected,
                });
            }
        }
        GapPolicy::Skip => {
            for gap in feed.gaps() {
                tracing::warn!(
                    symbol = %gap.symbol,
                    timeframe_secs = gap.timeframe_secs,
                    expected = %gap.expected,
                    "bar gap skipped"
                );
            }
        }
    }

    for bar in feed.bars() {
        if !instruments.contains_key(&bar.symbol) {
            return Err(QuantLabError::UnknownInstrument(bar.symbol.clone()));
        }
    }

    strategy.reset();
    let warmup = strategy.warmup_bars().max(config.warmup_bars);
    let history_cap = warmup.max(2);

    tracing::info!(
        strategy = strategy.name(),
        bars = feed.len(),
        warmup,
        "starting backtest"
    );

    let mut ledger = Ledger::new(config.initial_capital);
    let mut ids = IdGen::default();
    let mut pending: BTreeMap<(String, u32), Vec<Order>> = BTreeMap::new();
    let mut history: BTreeMap<(String, u32), VecDeque<crate::bar::Bar>> = BTreeMap::new();
    let mut days: BTreeMap<String, DayTracker> = BTreeMap::new();
    let mut events: Vec<LedgerEvent> = Vec::new();
    let mut total_traded = Decimal::ZERO;

    let wanted_symbols = strategy.symbols();
    let wanted_timeframe = strategy.timeframe_secs();

    for (bar_index, bar) in feed.bars().iter().enumerate() {
        let key = bar.stream_key();
        let instrument = &instruments[&bar.symbol];

        // roll the Shanghai trading-day tracker before anything reads p_ref
        let tracker = days.entry(bar.symbol.clone()).or_insert_with(|| DayTracker {
            prev_day_close: instrument.prev_close,
            ..DayTracker::default()
        });
        let date = shanghai_date(bar.ts);
        if tracker.current_date != Some(date) {
            if tracker.current_date.is_some() {
                tracker.prev_day_close = tracker.last_close;
            }
            tracker.current_date = Some(date);
        }
        let prev_day_close = tracker.prev_day_close;

        // 1) mark at the open, so margin checks see the execution price
        ledger.mark(&bar.symbol, bar.open);

        // 2) execute the orders pending for this stream, in submission order
        for order in pending.remove(&key).unwrap_or_default() {
            let fill_price = slipped_price(bar.open, order.side, config.slippage_bps);

            if order.order_type == OrderType::Limit {
                let satisfied = match (order.side, order.limit_price) {
                    (Side::Buy, Some(limit)) => bar.open <= limit,
                    (Side::Sell, Some(limit)) => bar.open >= limit,
                    (_, None) => false,
                };
                if !satisfied {
                    events.push(LedgerEvent::Rejection(Rejection {
                        order_id: order.id,
                        symbol: order.symbol.clone(),
                        reason: crate::order::RejectReason::LimitExpired,
                        bar_index,
                        ts: bar.ts,
                    }));
                    continue;
                }
            }

            let leverage = effective_leverage(instrument, config);
            let ctx = RuleContext {
                instrument,
                open: bar.open,
                fill_price,
                ts: bar.ts,
                bar_index,
                ledger: &ledger,
                prev_day_close,
                leverage,
            };

            match gate_for(instrument.asset_kind).review(order, &ctx) {
                RuleDecision::Reject { order, reason } => {
                    events.push(LedgerEvent::Rejection(Rejection {
                        order_id: order.id,
                        symbol: order.symbol,
                        reason,
                        bar_index,
                        ts: bar.ts,
                    }));
                }
                RuleDecision::Accept(order) => {
                    let schedule =
                        FeeSchedule::for_kind(instrument.asset_kind, config.commission_rate);
                    let notional = order.quantity * fill_price;
                    let fill = Fill {
                        order_id: order.id,
                        symbol: order.symbol.clone(),
                        side: order.side,
                        quantity: order.quantity,
                        price: fill_price,
                        fee: schedule.fee(notional),
                        tax: schedule.tax(order.side, notional),
                        ts: bar.ts,
                        bar_index,
                        kind: FillKind::Normal,
                    };
                    apply_fill(
                        &mut ledger,
                        &fill,
                        instrument,
                        config,
                        &mut total_traded,
                        date,
                    );
                    strategy.on_fill(&fill);
                    events.push(LedgerEvent::Fill(fill));
                }
            }
        }

        // 3) close: mark to market, then the perp liquidation check
        ledger.mark(&bar.symbol, bar.close);
        if instrument.asset_kind == AssetKind::CryptoPerp {
            if let Some(fill) =
                liquidation_fill(&ledger, instrument, config, bar, bar_index, &mut ids)
            {
                tracing::warn!(
                    symbol = %fill.symbol,
                    price = %fill.price,
                    "position liquidated below maintenance margin"
                );
                apply_fill(
                    &mut ledger,
                    &fill,
                    instrument,
                    config,
                    &mut total_traded,
                    date,
                );
                strategy.on_fill(&fill);
                events.push(LedgerEvent::Fill(fill));
            }
        }
        ledger.mark_equity(bar.t_close(), bar_index);

        if let Some(tracker) = days.get_mut(&bar.symbol) {
            tracker.last_close = Some(bar.close);
        }

        // 4) extend history; the bar is now closed and visible
        let window = history.entry(key.clone()).or_default();
        window.push_back(bar.clone());
        while window.len() > history_cap {
            window.pop_front();
        }

        // 5) strategy decision on the close, orders pend for the next open
        let stream_matches = wanted_timeframe.map_or(true, |tf| tf == bar.timeframe_secs)
            && wanted_symbols
                .as_ref()
                .map_or(true, |symbols| symbols.iter().any(|s| s == &bar.symbol));
        if !stream_matches || window.len() < warmup {
            continue;
        }

        let snapshot = ledger.snapshot();
        let window: &[crate::bar::Bar] = match history.get_mut(&key) {
            Some(window) => window.make_contiguous(),
            None => &[],
        };
        let frame = BarFrame {
            bar,
            history: window,
            snapshot: &snapshot,
        };
        let signals = match strategy.on_bar(&frame) {
            Ok(signals) => signals,
            Err(error) if config.tolerant => {
                tracing::warn!(bar_index, error = %error, "strategy fault tolerated");
                events.push(LedgerEvent::StrategyFault {
                    bar_index,
                    ts: bar.t_close(),
                    detail: error.to_string(),
                });
                Vec::new()
            }
            Err(error) => return Err(error),
        };
        if signals.is_empty() {
            continue;
        }

        let translation = translate_signals(
            signals,
            &snapshot,
            instruments,
            bar.timeframe_secs,
            bar_index,
            bar.t_close(),
            &mut ids,
        )?;
        for duplicate in translation.duplicates {
            events.push(LedgerEvent::Rejection(duplicate));
        }
        if !translation.orders.is_empty() {
            pending.entry(key).or_default().extend(translation.orders);
        }
    }
    // orders still pending after the last bar are cancelled, never carried

    let bars_per_year = bars_per_year_for(config, feed, instruments);

    let total_fees = ledger.fees_paid();
    let total_taxes = ledger.taxes_paid();
    let (equity, trades) = ledger.into_series();
    let summary = compute_metrics(
        &equity,
        &trades,
        &MetricsContext {
            initial_capital: config.initial_capital,
            bars_per_year,
            total_fees,
            total_taxes,
            total_traded,
        },
    );

    tracing::info!(
        fills = events
            .iter()
            .filter(|e| matches!(e, LedgerEvent::Fill(_)))
            .count(),
        final_equity = %equity.last().map(|p| p.equity).unwrap_or(config.initial_capital),
        "backtest complete"
    );

    Ok(BacktestReport {
        summary,
        equity,
        trades,
        ledger: events,
        gaps: feed.gaps().to_vec(),
    })
}

fn effective_leverage(instrument: &Instrument, config: &EngineConfig) -> Decimal {
    config
        .max_leverage
        .or(instrument.max_leverage)
        .unwrap_or(Decimal::ONE)
}

fn apply_fill(
    ledger: &mut Ledger,
    fill: &Fill,
    instrument: &Instrument,
    config: &EngineConfig,
    total_traded: &mut Decimal,
    date: NaiveDate,
) {
    let leverage = match instrument.asset_kind {
        AssetKind::CryptoPerp => Some(effective_leverage(instrument, config)),
        _ => None,
    };
    ledger.apply_fill(fill, leverage);
    *total_traded += fill.notional();
    if instrument.asset_kind == AssetKind::StockAShare && fill.side == Side::Buy {
        ledger.lock_buy(&fill.symbol, fill.quantity, date);
    }
}

/// Build the forced-close fill when equity has fallen below the total
/// maintenance requirement. The position closes at the current bar's close
/// with the configured penalty charged as its fee.
fn liquidation_fill(
    ledger: &Ledger,
    instrument: &Instrument,
    config: &EngineConfig,
    bar: &crate::bar::Bar,
    bar_index: usize,
    ids: &mut IdGen,
) -> Option<Fill> {
    let position = ledger.position(&instrument.symbol)?;
    if position.is_flat() {
        return None;
    }

    let maintenance: Decimal = ledger
        .positions()
        .filter(|(_, p)| !p.is_flat() && p.leverage > Decimal::ZERO)
        .map(|(symbol, p)| {
            let mark = ledger.mark_price(symbol).unwrap_or(p.avg_entry);
            p.quantity.abs() * mark * config.maintenance_margin_rate
        })
        .sum();
    if ledger.equity() >= maintenance {
        return None;
    }

    let quantity = position.quantity.abs();
    let notional = quantity * bar.close;
    let penalty = notional * Decimal::from(config.liquidation_penalty_bps) / dec!(10000);
    Some(Fill {
        order_id: ids.next_order_id(),
        symbol: instrument.symbol.clone(),
        side: if position.quantity > Decimal::ZERO {
            Side::Sell
        } else {
            Side::Buy
        },
        quantity,
        price: bar.close,
        fee: penalty,
        tax: Decimal::ZERO,
        ts: bar.t_close(),
        bar_index,
        kind: FillKind::Liquidation,
    })
}

/// Bars per year on the effective basis: `basis_days × 86400 / timeframe`,
/// using the smallest timeframe present in the feed (the equity sampling
/// cadence).
pub(crate) fn bars_per_year_for(
    config: &EngineConfig,
    feed: &HistoryFeed,
    instruments: &InstrumentIndex,
) -> f64 {
    let basis = annualization_basis(config, feed, instruments);
    let min_timeframe = feed
        .bars()
        .iter()
        .map(|b| b.timeframe_secs)
        .min()
        .unwrap_or(86_400);
    basis as f64 * 86_400.0 / min_timeframe as f64
}

fn annualization_basis(
    config: &EngineConfig,
    feed: &HistoryFeed,
    instruments: &InstrumentIndex,
) -> u32 {
    if let Some(basis) = config.annualization_basis {
        return basis;
    }
    let all_a_share = !feed.is_empty()
        && feed.bars().iter().all(|bar| {
            instruments
                .get(&bar.symbol)
                .map(|i| i.asset_kind == AssetKind::StockAShare)
                .unwrap_or(false)
        });
    if all_a_share {
        252
    } else {
        365
    }
}

/// A deterministic, test-only strategy: emits a scripted signal list at
/// given per-stream bar indices (counted over `on_bar` invocations).
#[derive(Debug, Clone, Default)]
pub struct ScriptedStrategy {
    plan: BTreeMap<usize, Vec<Signal>>,
    seen: usize,
}

impl ScriptedStrategy {
    pub fn new(plan: BTreeMap<usize, Vec<Signal>>) -> Self {
        Self { plan, seen: 0 }
    }
}

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn param_schema(&self) -> Vec<ParamSpec> {
        vec![]
    }

    fn configure(&mut self, _params: &Params) -> Result<()> {
        Ok(())
    }

    fn warmup_bars(&self) -> usize {
        0
    }

    fn on_bar(&mut self, _frame: &BarFrame) -> Result<Vec<Signal>> {
        let idx = self.seen;
        self.seen += 1;
        Ok(self.plan.get(&idx).cloned().unwrap_or_default())
    }

    fn reset(&mut self) {
        self.seen = 0;
    }
}
