//! Error types for QuantLab.
//!
//! Only *fatal* conditions live here. Rule rejections, duplicate signals,
//! liquidations, and tolerated strategy faults are decisions about an order
//! or a bar, not failures; they are modeled as ledger events (see
//! [`crate::order::LedgerEvent`]) and never unwind the engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Core error type for QuantLab operations.
#[derive(Error, Debug)]
pub enum QuantLabError {
    /// Configuration value out of range (negative slippage, zero capital, ...).
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// OHLC invariants violated or timestamps out of order.
    #[error("Malformed bar for {symbol} at {ts}: {detail}")]
    MalformedBar {
        symbol: String,
        ts: DateTime<Utc>,
        detail: String,
    },

    /// Missing bar inside an expected grid, surfaced under `GapPolicy::Abort`.
    #[error("Data gap for {symbol}/{timeframe_secs}s: expected bar at {expected}")]
    DataGap {
        symbol: String,
        timeframe_secs: u32,
        expected: DateTime<Utc>,
    },

    /// A signal referenced an instrument with no spec.
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    /// Strategy failed during `configure` or `on_bar`.
    #[error("Strategy error: {0}")]
    Strategy(String),
}

/// Result type alias for QuantLab operations.
pub type Result<T> = std::result::Result<T, QuantLabError>;
