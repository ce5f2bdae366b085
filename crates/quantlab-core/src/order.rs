//! Orders, fills, rejections, and the append-only ledger event stream.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells, as a decimal multiplier.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

/// A pending order, created by the signal translator on bar `submit_bar`.
///
/// Orders live exactly one bar: at the next bar open of their
/// (symbol, timeframe) stream they are filled, rejected, or expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub symbol: String,
    pub timeframe_secs: u32,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    /// Global tick index the order was submitted on.
    pub submit_bar: usize,
    /// Monotonic submission sequence, the intra-bar execution order.
    pub submit_seq: u64,
    /// Free-text strategy annotation, carried through to the ledger.
    pub reason: String,
}

/// How a fill came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillKind {
    /// Regular next-bar-open execution.
    Normal,
    /// Forced close of a perpetual position below maintenance margin.
    Liquidation,
}

/// An executed (or forced) trade leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: u64,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Commission charged to cash in the settlement currency.
    pub fee: Decimal,
    /// Market-specific tax (A-share stamp duty); separate ledger line.
    pub tax: Decimal,
    pub ts: DateTime<Utc>,
    /// Global tick index the fill occurred on.
    pub bar_index: usize,
    pub kind: FillKind,
}

impl Fill {
    /// Signed quantity: positive for buys, negative for sells.
    pub fn signed_quantity(&self) -> Decimal {
        self.side.sign() * self.quantity
    }

    /// Traded notional at the fill price.
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }
}

/// Why an order (or signal) was dropped. These are decisions, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Quantity snapped to zero on the lot grid.
    LotStepZero,
    /// A-share buy against an open at the up-limit price.
    UpLimit,
    /// A-share sell against an open at the down-limit price.
    DownLimit,
    /// A-share sell of quantity still locked by the T+1 rule.
    TPlusOne,
    InsufficientCash,
    InsufficientMargin,
    /// Sell exceeding long holdings on a market without shorts.
    NoShort,
    /// Conflicting signals for the same instrument on the same bar.
    DuplicateSignal,
    /// Limit order whose price was not satisfied by the next bar open.
    LimitExpired,
}

/// A structured rejection event, persisted for post-hoc audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub order_id: u64,
    pub symbol: String,
    pub reason: RejectReason,
    pub bar_index: usize,
    pub ts: DateTime<Utc>,
}

/// One row of the trade ledger, in event order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    Fill(Fill),
    Rejection(Rejection),
    /// A strategy fault tolerated under `tolerant` mode; the bar's output
    /// was treated as empty.
    StrategyFault {
        bar_index: usize,
        ts: DateTime<Utc>,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signed_quantity_follows_side() {
        let fill = Fill {
            order_id: 1,
            symbol: "binance:BTC/USDT".into(),
            side: Side::Sell,
            quantity: dec!(2),
            price: dec!(100),
            fee: dec!(0.2),
            tax: Decimal::ZERO,
            ts: chrono::Utc::now(),
            bar_index: 3,
            kind: FillKind::Normal,
        };
        assert_eq!(fill.signed_quantity(), dec!(-2));
        assert_eq!(fill.notional(), dec!(200));
    }
}
