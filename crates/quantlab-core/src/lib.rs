//! QuantLab Core - deterministic event-driven backtest engine.
//!
//! This crate provides:
//! - Bar and instrument data types with exact decimal bookkeeping
//! - The bar-driven simulation loop (signals on close, fills on next open)
//! - Market-specific rule gates (crypto spot, crypto perpetual, A-share)
//! - Strategy trait, parameter schemas, and built-in reference strategies
//! - Performance metrics, parameter sweeps, and walk-forward evaluation
//!
//! The core is a pure library: no files, sockets, or databases. Callers
//! hand it bars, instrument specs, and a strategy; it hands back a report.

pub mod backtest;
pub mod bar;
pub mod costs;
pub mod error;
pub mod feed;
pub mod indicators;
pub mod instrument;
pub mod ledger;
pub mod metrics;
pub mod order;
pub mod rules;
pub mod sampling;
pub mod strategy;
pub mod sweep;
pub mod translator;
pub mod validation;

pub use backtest::{run_backtest, BacktestReport, EngineConfig};
pub use bar::Bar;
pub use error::QuantLabError;
pub use feed::{GapPolicy, HistoryFeed};
pub use instrument::{AssetKind, Board, Instrument};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backtest::{run_backtest, BacktestReport, EngineConfig};
    pub use crate::bar::Bar;
    pub use crate::error::{QuantLabError, Result};
    pub use crate::feed::{GapPolicy, HistoryFeed};
    pub use crate::instrument::{index_of, AssetKind, Board, Instrument};
    pub use crate::ledger::LedgerSnapshot;
    pub use crate::metrics::Metrics;
    pub use crate::order::{Fill, LedgerEvent, Order, RejectReason, Side};
    pub use crate::sampling::ParamSpace;
    pub use crate::strategy::{BarFrame, ParamValue, Params, Signal, Strategy};
    pub use crate::sweep::{run_sweep, Sampler, ScoreMetric, SweepConfig};
    pub use crate::validation::{run_walk_forward, WalkForwardConfig};
}
