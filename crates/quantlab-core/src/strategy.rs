//! Strategy trait, parameter schemas, and the built-in reference strategies.
//!
//! A strategy is a pure per-bar function: it consumes a [`BarFrame`] (current
//! bar, bounded history, ledger snapshot) and emits zero or more [`Signal`]s.
//! Signals are *desired outcomes*; the translator and rule gate decide what
//! actually becomes an order. Strategies never touch the ledger directly.

use crate::bar::Bar;
use crate::error::{QuantLabError, Result};
use crate::ledger::LedgerSnapshot;
use crate::order::{Fill, OrderType, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Parameters
// =============================================================================

/// Parameter value kinds a strategy can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Int,
    Float,
    Decimal,
    Bool,
}

/// A single typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Bool(bool),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Int(_) => ParamKind::Int,
            ParamValue::Float(_) => ParamKind::Float,
            ParamValue::Decimal(_) => ParamKind::Decimal,
            ParamValue::Bool(_) => ParamKind::Bool,
        }
    }

    /// Numeric view for bounds checks; `None` for booleans.
    pub fn as_f64(&self) -> Option<f64> {
        use rust_decimal::prelude::ToPrimitive;
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Decimal(v) => v.to_f64(),
            ParamValue::Bool(_) => None,
        }
    }
}

/// Declared schema entry: name, kind, default, numeric bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: ParamValue,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ParamSpec {
    pub fn int(name: &'static str, default: i64, min: i64, max: i64) -> Self {
        Self {
            name,
            kind: ParamKind::Int,
            default: ParamValue::Int(default),
            min: Some(min as f64),
            max: Some(max as f64),
        }
    }

    pub fn float(name: &'static str, default: f64, min: f64, max: f64) -> Self {
        Self {
            name,
            kind: ParamKind::Float,
            default: ParamValue::Float(default),
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn decimal(name: &'static str, default: Decimal, min: f64, max: f64) -> Self {
        Self {
            name,
            kind: ParamKind::Decimal,
            default: ParamValue::Decimal(default),
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn bool(name: &'static str, default: bool) -> Self {
        Self {
            name,
            kind: ParamKind::Bool,
            default: ParamValue::Bool(default),
            min: None,
            max: None,
        }
    }
}

/// A typed parameter mapping. `BTreeMap` keeps iteration (and serialized
/// form) deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: ParamValue) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn set(&mut self, name: &str, value: ParamValue) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        self.0.get(name)?.as_f64()
    }

    pub fn get_decimal(&self, name: &str) -> Option<Decimal> {
        match self.0.get(name)? {
            ParamValue::Decimal(v) => Some(*v),
            ParamValue::Int(v) => Some(Decimal::from(*v)),
            ParamValue::Float(v) => Decimal::try_from(*v).ok(),
            ParamValue::Bool(_) => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.0.get(name)? {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Resolve supplied values against a schema: fill defaults, reject
    /// unknown names, enforce bounds. Called once at configure time.
    pub fn resolve(schema: &[ParamSpec], supplied: &Params) -> Result<Params> {
        for name in supplied.0.keys() {
            if !schema.iter().any(|s| s.name == name.as_str()) {
                return Err(QuantLabError::Config(format!("unknown parameter: {name}")));
            }
        }

        let mut resolved = Params::new();
        for spec in schema {
            let value = supplied
                .0
                .get(spec.name)
                .cloned()
                .unwrap_or_else(|| spec.default.clone());

            if let Some(v) = value.as_f64() {
                if let Some(min) = spec.min {
                    if v < min {
                        return Err(QuantLabError::Config(format!(
                            "parameter {} = {v} below minimum {min}",
                            spec.name
                        )));
                    }
                }
                if let Some(max) = spec.max {
                    if v > max {
                        return Err(QuantLabError::Config(format!(
                            "parameter {} = {v} above maximum {max}",
                            spec.name
                        )));
                    }
                }
            }
            resolved.0.insert(spec.name.to_string(), value);
        }
        Ok(resolved)
    }
}

// =============================================================================
// Signals and frames
// =============================================================================

/// What a strategy asks for. Two idioms: a desired end state
/// (`TargetPosition`) or a concrete order (`OrderIntent`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    /// Desired signed holdings after this decision. Zero closes.
    TargetPosition {
        symbol: String,
        quantity: Decimal,
        reason: String,
    },
    /// A concrete order request, passed through after validation.
    OrderIntent {
        symbol: String,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        limit_price: Option<Decimal>,
        reason: String,
    },
}

impl Signal {
    pub fn symbol(&self) -> &str {
        match self {
            Signal::TargetPosition { symbol, .. } => symbol,
            Signal::OrderIntent { symbol, .. } => symbol,
        }
    }

    /// Shorthand for a target-position signal on the frame's own symbol.
    pub fn target(symbol: &str, quantity: Decimal, reason: &str) -> Self {
        Signal::TargetPosition {
            symbol: symbol.to_string(),
            quantity,
            reason: reason.to_string(),
        }
    }
}

/// The strategy's per-bar view: the just-closed bar, a bounded history of
/// closed bars (oldest first, current bar last), and the account snapshot.
///
/// The history never contains future bars; the engine owns the window cap.
#[derive(Debug)]
pub struct BarFrame<'a> {
    pub bar: &'a Bar,
    pub history: &'a [Bar],
    pub snapshot: &'a LedgerSnapshot,
}

impl BarFrame<'_> {
    /// Signed quantity currently held in the frame's symbol.
    pub fn position_qty(&self) -> Decimal {
        self.snapshot.position_qty(&self.bar.symbol)
    }
}

// =============================================================================
// Strategy trait
// =============================================================================

/// The capability set every strategy implements.
///
/// `on_bar` runs at bar close; resulting orders fill at the next bar open.
/// Returning an empty vector means "hold". `on_fill` is a notification only
/// and must not issue orders.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Declared parameter schema (name, kind, default, bounds).
    fn param_schema(&self) -> Vec<ParamSpec>;

    /// Validate and apply a parameter mapping. Called once before a run.
    fn configure(&mut self, params: &Params) -> Result<()>;

    /// Minimum closed bars required before `on_bar` is invoked.
    fn warmup_bars(&self) -> usize;

    fn allow_short(&self) -> bool {
        false
    }

    /// Symbols this strategy trades; `None` means every fed symbol.
    fn symbols(&self) -> Option<Vec<String>> {
        None
    }

    /// Timeframe this strategy expects; `None` means every fed timeframe.
    fn timeframe_secs(&self) -> Option<u32> {
        None
    }

    fn on_bar(&mut self, frame: &BarFrame) -> Result<Vec<Signal>>;

    fn on_fill(&mut self, _fill: &Fill) {}

    /// Clear internal state so the instance can be reused for another run.
    fn reset(&mut self) {}
}

// =============================================================================
// Built-in reference strategies
// =============================================================================

/// Dual moving average crossover.
///
/// Enters long when the fast SMA crosses above the slow SMA; exits (or
/// reverses, with `allow_short`) on the opposite cross. Both crosses are
/// strict: the fast average must have been at or below the slow average on
/// the previous bar.
#[derive(Debug, Clone)]
pub struct DualMaCrossover {
    fast: usize,
    slow: usize,
    position_size: Decimal,
    allow_short: bool,
}

impl Default for DualMaCrossover {
    fn default() -> Self {
        Self {
            fast: 10,
            slow: 30,
            position_size: Decimal::ONE,
            allow_short: false,
        }
    }
}

impl DualMaCrossover {
    pub fn new(fast: usize, slow: usize, position_size: Decimal, allow_short: bool) -> Self {
        Self {
            fast,
            slow,
            position_size,
            allow_short,
        }
    }

    pub fn from_params(params: &Params) -> Result<Self> {
        let mut strategy = Self::default();
        strategy.configure(params)?;
        Ok(strategy)
    }
}

impl Strategy for DualMaCrossover {
    fn name(&self) -> &str {
        "dual_ma_crossover"
    }

    fn param_schema(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::int("fast", 10, 2, 500),
            ParamSpec::int("slow", 30, 3, 1000),
            ParamSpec::decimal("position_size", Decimal::ONE, 0.0, 1e12),
            ParamSpec::bool("allow_short", false),
        ]
    }

    fn configure(&mut self, params: &Params) -> Result<()> {
        let resolved = Params::resolve(&self.param_schema(), params)?;
        self.fast = resolved.get_int("fast").unwrap_or(10) as usize;
        self.slow = resolved.get_int("slow").unwrap_or(30) as usize;
        self.position_size = resolved
            .get_decimal("position_size")
            .unwrap_or(Decimal::ONE);
        self.allow_short = resolved.get_bool("allow_short").unwrap_or(false);
        if self.fast >= self.slow {
            return Err(QuantLabError::Config(
                "fast period must be less than slow period".into(),
            ));
        }
        Ok(())
    }

    fn warmup_bars(&self) -> usize {
        self.slow + 1
    }

    fn allow_short(&self) -> bool {
        self.allow_short
    }

    fn on_bar(&mut self, frame: &BarFrame) -> Result<Vec<Signal>> {
        let bars = frame.history;
        if bars.len() < 2 {
            return Ok(vec![]);
        }
        let idx = bars.len() - 1;

        let fast = crate::indicators::sma_close(bars, self.fast);
        let slow = crate::indicators::sma_close(bars, self.slow);
        let (Some(f), Some(s), Some(pf), Some(ps)) =
            (fast[idx], slow[idx], fast[idx - 1], slow[idx - 1])
        else {
            return Ok(vec![]);
        };

        let golden_cross = f > s && pf <= ps;
        let death_cross = f < s && pf >= ps;
        let held = frame.position_qty();

        if golden_cross && held <= Decimal::ZERO {
            return Ok(vec![Signal::target(
                &frame.bar.symbol,
                self.position_size,
                "golden_cross",
            )]);
        }
        if death_cross && held > Decimal::ZERO {
            let target = if self.allow_short {
                -self.position_size
            } else {
                Decimal::ZERO
            };
            return Ok(vec![Signal::target(
                &frame.bar.symbol,
                target,
                "death_cross",
            )]);
        }
        Ok(vec![])
    }
}

/// Donchian channel breakout.
///
/// Long on a close above the prior `entry_period` high, flat on a close
/// below the prior `exit_period` low. Channel bounds exclude the current
/// bar.
#[derive(Debug, Clone)]
pub struct DonchianBreakout {
    entry_period: usize,
    exit_period: usize,
    position_size: Decimal,
}

impl Default for DonchianBreakout {
    fn default() -> Self {
        Self {
            entry_period: 20,
            exit_period: 10,
            position_size: Decimal::ONE,
        }
    }
}

impl DonchianBreakout {
    pub fn new(entry_period: usize, exit_period: usize, position_size: Decimal) -> Self {
        Self {
            entry_period,
            exit_period,
            position_size,
        }
    }

    pub fn from_params(params: &Params) -> Result<Self> {
        let mut strategy = Self::default();
        strategy.configure(params)?;
        Ok(strategy)
    }
}

impl Strategy for DonchianBreakout {
    fn name(&self) -> &str {
        "donchian_breakout"
    }

    fn param_schema(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::int("entry_period", 20, 2, 1000),
            ParamSpec::int("exit_period", 10, 2, 1000),
            ParamSpec::decimal("position_size", Decimal::ONE, 0.0, 1e12),
        ]
    }

    fn configure(&mut self, params: &Params) -> Result<()> {
        let resolved = Params::resolve(&self.param_schema(), params)?;
        self.entry_period = resolved.get_int("entry_period").unwrap_or(20) as usize;
        self.exit_period = resolved.get_int("exit_period").unwrap_or(10) as usize;
        self.position_size = resolved
            .get_decimal("position_size")
            .unwrap_or(Decimal::ONE);
        Ok(())
    }

    fn warmup_bars(&self) -> usize {
        self.entry_period.max(self.exit_period) + 1
    }

    fn on_bar(&mut self, frame: &BarFrame) -> Result<Vec<Signal>> {
        use rust_decimal::prelude::ToPrimitive;

        let bars = frame.history;
        if bars.is_empty() {
            return Ok(vec![]);
        }
        let idx = bars.len() - 1;
        let close = frame.bar.close.to_f64().unwrap_or(0.0);
        let held = frame.position_qty();

        if held <= Decimal::ZERO {
            let channel = crate::indicators::donchian_channel(bars, self.entry_period);
            if let Some(ch) = channel[idx] {
                if close > ch.upper {
                    return Ok(vec![Signal::target(
                        &frame.bar.symbol,
                        self.position_size,
                        "channel_breakout",
                    )]);
                }
            }
        } else {
            let channel = crate::indicators::donchian_channel(bars, self.exit_period);
            if let Some(ch) = channel[idx] {
                if close < ch.lower {
                    return Ok(vec![Signal::target(
                        &frame.bar.symbol,
                        Decimal::ZERO,
                        "channel_breakdown",
                    )]);
                }
            }
        }
        Ok(vec![])
    }
}

/// Bollinger bands mean reversion.
///
/// Long on a touch of the lower band, flat once the close recovers to the
/// middle band (which also covers the upper band).
#[derive(Debug, Clone)]
pub struct BollingerReversion {
    period: usize,
    std_dev: f64,
    position_size: Decimal,
}

impl Default for BollingerReversion {
    fn default() -> Self {
        Self {
            period: 20,
            std_dev: 2.0,
            position_size: Decimal::ONE,
        }
    }
}

impl BollingerReversion {
    pub fn new(period: usize, std_dev: f64, position_size: Decimal) -> Self {
        Self {
            period,
            std_dev,
            position_size,
        }
    }

    pub fn from_params(params: &Params) -> Result<Self> {
        let mut strategy = Self::default();
        strategy.configure(params)?;
        Ok(strategy)
    }
}

impl Strategy for BollingerReversion {
    fn name(&self) -> &str {
        "bollinger_reversion"
    }

    fn param_schema(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::int("period", 20, 2, 1000),
            ParamSpec::float("std_dev", 2.0, 0.1, 10.0),
            ParamSpec::decimal("position_size", Decimal::ONE, 0.0, 1e12),
        ]
    }

    fn configure(&mut self, params: &Params) -> Result<()> {
        let resolved = Params::resolve(&self.param_schema(), params)?;
        self.period = resolved.get_int("period").unwrap_or(20) as usize;
        self.std_dev = resolved.get_float("std_dev").unwrap_or(2.0);
        self.position_size = resolved
            .get_decimal("position_size")
            .unwrap_or(Decimal::ONE);
        Ok(())
    }

    fn warmup_bars(&self) -> usize {
        self.period
    }

    fn on_bar(&mut self, frame: &BarFrame) -> Result<Vec<Signal>> {
        use rust_decimal::prelude::ToPrimitive;

        let bars = frame.history;
        if bars.is_empty() {
            return Ok(vec![]);
        }
        let idx = bars.len() - 1;
        let bands = crate::indicators::bollinger_bands(bars, self.period, self.std_dev);
        let Some(bb) = bands[idx] else {
            return Ok(vec![]);
        };

        let close = frame.bar.close.to_f64().unwrap_or(0.0);
        let held = frame.position_qty();

        if held <= Decimal::ZERO && close <= bb.lower {
            return Ok(vec![Signal::target(
                &frame.bar.symbol,
                self.position_size,
                "lower_band_touch",
            )]);
        }
        if held > Decimal::ZERO && close >= bb.middle {
            return Ok(vec![Signal::target(
                &frame.bar.symbol,
                Decimal::ZERO,
                "band_reversion",
            )]);
        }
        Ok(vec![])
    }
}

/// RSI mean reversion.
///
/// Long when Wilder RSI drops below `oversold`, flat when it rises above
/// `overbought`.
#[derive(Debug, Clone)]
pub struct RsiReversion {
    period: usize,
    oversold: f64,
    overbought: f64,
    position_size: Decimal,
}

impl Default for RsiReversion {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
            position_size: Decimal::ONE,
        }
    }
}

impl RsiReversion {
    pub fn new(period: usize, oversold: f64, overbought: f64, position_size: Decimal) -> Self {
        Self {
            period,
            oversold,
            overbought,
            position_size,
        }
    }

    pub fn from_params(params: &Params) -> Result<Self> {
        let mut strategy = Self::default();
        strategy.configure(params)?;
        Ok(strategy)
    }
}

impl Strategy for RsiReversion {
    fn name(&self) -> &str {
        "rsi_reversion"
    }

    fn param_schema(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::int("period", 14, 2, 500),
            ParamSpec::float("oversold", 30.0, 1.0, 50.0),
            ParamSpec::float("overbought", 70.0, 50.0, 99.0),
            ParamSpec::decimal("position_size", Decimal::ONE, 0.0, 1e12),
        ]
    }

    fn configure(&mut self, params: &Params) -> Result<()> {
        let resolved = Params::resolve(&self.param_schema(), params)?;
        self.period = resolved.get_int("period").unwrap_or(14) as usize;
        self.oversold = resolved.get_float("oversold").unwrap_or(30.0);
        self.overbought = resolved.get_float("overbought").unwrap_or(70.0);
        self.position_size = resolved
            .get_decimal("position_size")
            .unwrap_or(Decimal::ONE);
        Ok(())
    }

    fn warmup_bars(&self) -> usize {
        self.period + 1
    }

    fn on_bar(&mut self, frame: &BarFrame) -> Result<Vec<Signal>> {
        let bars = frame.history;
        if bars.is_empty() {
            return Ok(vec![]);
        }
        let idx = bars.len() - 1;
        let values = crate::indicators::rsi(bars, self.period);
        let Some(value) = values[idx] else {
            return Ok(vec![]);
        };

        let held = frame.position_qty();
        if held <= Decimal::ZERO && value < self.oversold {
            return Ok(vec![Signal::target(
                &frame.bar.symbol,
                self.position_size,
                "rsi_oversold",
            )]);
        }
        if held > Decimal::ZERO && value > self.overbought {
            return Ok(vec![Signal::target(
                &frame.bar.symbol,
                Decimal::ZERO,
                "rsi_overbought",
            )]);
        }
        Ok(vec![])
    }
}

/// Z-score mean reversion.
///
/// Long when the normalized deviation from the rolling mean drops below
/// `-entry_z`; flat once it recovers above `-exit_z`.
#[derive(Debug, Clone)]
pub struct ZScore {
    period: usize,
    entry_z: f64,
    exit_z: f64,
    position_size: Decimal,
}

impl Default for ZScore {
    fn default() -> Self {
        Self {
            period: 20,
            entry_z: 2.0,
            exit_z: 0.5,
            position_size: Decimal::ONE,
        }
    }
}

impl ZScore {
    pub fn new(period: usize, entry_z: f64, exit_z: f64, position_size: Decimal) -> Self {
        Self {
            period,
            entry_z,
            exit_z,
            position_size,
        }
    }

    pub fn from_params(params: &Params) -> Result<Self> {
        let mut strategy = Self::default();
        strategy.configure(params)?;
        Ok(strategy)
    }
}

impl Strategy for ZScore {
    fn name(&self) -> &str {
        "zscore"
    }

    fn param_schema(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::int("period", 20, 2, 1000),
            ParamSpec::float("entry_z", 2.0, 0.1, 10.0),
            ParamSpec::float("exit_z", 0.5, 0.0, 10.0),
            ParamSpec::decimal("position_size", Decimal::ONE, 0.0, 1e12),
        ]
    }

    fn configure(&mut self, params: &Params) -> Result<()> {
        let resolved = Params::resolve(&self.param_schema(), params)?;
        self.period = resolved.get_int("period").unwrap_or(20) as usize;
        self.entry_z = resolved.get_float("entry_z").unwrap_or(2.0);
        self.exit_z = resolved.get_float("exit_z").unwrap_or(0.5);
        self.position_size = resolved
            .get_decimal("position_size")
            .unwrap_or(Decimal::ONE);
        if self.exit_z > self.entry_z {
            return Err(QuantLabError::Config(
                "exit_z must not exceed entry_z".into(),
            ));
        }
        Ok(())
    }

    fn warmup_bars(&self) -> usize {
        self.period
    }

    fn on_bar(&mut self, frame: &BarFrame) -> Result<Vec<Signal>> {
        let bars = frame.history;
        if bars.is_empty() {
            return Ok(vec![]);
        }
        let idx = bars.len() - 1;
        let scores = crate::indicators::zscore_close(bars, self.period);
        let Some(z) = scores[idx] else {
            return Ok(vec![]);
        };

        let held = frame.position_qty();
        if held <= Decimal::ZERO && z < -self.entry_z {
            return Ok(vec![Signal::target(
                &frame.bar.symbol,
                self.position_size,
                "zscore_entry",
            )]);
        }
        if held > Decimal::ZERO && z > -self.exit_z {
            return Ok(vec![Signal::target(
                &frame.bar.symbol,
                Decimal::ZERO,
                "zscore_exit",
            )]);
        }
        Ok(vec![])
    }
}
