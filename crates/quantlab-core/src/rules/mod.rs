//! Market-specific rule gates.
//!
//! A gate reviews each pending order at the next bar's open and either
//! accepts it (possibly rewritten, e.g. lot-snapped) or rejects it with a
//! structured reason. Rejections are decisions, not errors: the engine
//! records them in the ledger and moves on.
//!
//! Check order is fixed across modules: lot rounding, then price-limit
//! admissibility, then sellable-quantity / cash / margin sufficiency.

mod a_share;
mod crypto_perp;
mod crypto_spot;

pub use a_share::{shanghai_date, AShareGate};
pub use crypto_perp::CryptoPerpGate;
pub use crypto_spot::CryptoSpotGate;

use crate::instrument::{AssetKind, Instrument};
use crate::ledger::Ledger;
use crate::order::{Order, RejectReason};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Everything a gate may consult when reviewing one order.
pub struct RuleContext<'a> {
    pub instrument: &'a Instrument,
    /// Raw open of the execution bar.
    pub open: Decimal,
    /// Slippage-adjusted price the order would fill at.
    pub fill_price: Decimal,
    pub ts: DateTime<Utc>,
    pub bar_index: usize,
    pub ledger: &'a Ledger,
    /// Close of the previous Shanghai trading day (A-share limit reference).
    pub prev_day_close: Option<Decimal>,
    /// Effective leverage for margin math (perpetuals).
    pub leverage: Decimal,
}

/// Gate verdict. `Accept` carries the (possibly rewritten) order.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleDecision {
    Accept(Order),
    Reject { order: Order, reason: RejectReason },
}

pub trait RuleGate {
    fn review(&self, order: Order, ctx: &RuleContext) -> RuleDecision;
}

/// Select the gate module for an instrument's market.
pub fn gate_for(kind: AssetKind) -> &'static dyn RuleGate {
    match kind {
        AssetKind::CryptoSpot => &CryptoSpotGate,
        AssetKind::CryptoPerp => &CryptoPerpGate,
        AssetKind::StockAShare => &AShareGate,
    }
}

/// Shared first step: snap the quantity down to the instrument's lot grid.
/// Returns the rewritten order, or a rejection when nothing remains.
fn snap_lot(mut order: Order, ctx: &RuleContext) -> std::result::Result<Order, RuleDecision> {
    let snapped = ctx.instrument.snap_quantity(order.quantity);
    if snapped.is_zero() {
        return Err(RuleDecision::Reject {
            order,
            reason: RejectReason::LotStepZero,
        });
    }
    order.quantity = snapped;
    Ok(order)
}
