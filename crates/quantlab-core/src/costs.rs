//! Slippage and fee models applied by the matching engine.

use crate::instrument::AssetKind;
use crate::order::Side;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Default crypto commission: 10 bps on notional, both sides.
pub const DEFAULT_CRYPTO_COMMISSION: Decimal = dec!(0.001);
/// Default A-share commission: 3 bps on notional, both sides.
pub const DEFAULT_ASHARE_COMMISSION: Decimal = dec!(0.0003);
/// Minimum A-share commission per fill, in CNY.
pub const ASHARE_MIN_COMMISSION: Decimal = dec!(5);
/// A-share stamp duty: 5 bps, sell side only.
pub const ASHARE_STAMP_DUTY: Decimal = dec!(0.0005);

/// Apply slippage to a raw open price, always in the unfavorable direction.
pub fn slipped_price(open: Decimal, side: Side, slippage_bps: u32) -> Decimal {
    let slip = Decimal::from(slippage_bps) / dec!(10000);
    match side {
        Side::Buy => open * (Decimal::ONE + slip),
        Side::Sell => open * (Decimal::ONE - slip),
    }
}

/// Per-venue commission and tax rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeeSchedule {
    /// Flat proportional commission on notional (crypto spot and perp).
    Proportional { rate: Decimal },
    /// A-share schedule: proportional commission with a per-fill minimum,
    /// plus sell-side stamp duty reported as a separate tax line.
    AShare {
        commission_rate: Decimal,
        min_commission: Decimal,
        stamp_duty_rate: Decimal,
    },
}

impl FeeSchedule {
    /// Venue default for an asset kind, with an optional commission-rate
    /// override from the engine configuration.
    pub fn for_kind(kind: AssetKind, commission_rate: Option<Decimal>) -> Self {
        match kind {
            AssetKind::CryptoSpot | AssetKind::CryptoPerp => FeeSchedule::Proportional {
                rate: commission_rate.unwrap_or(DEFAULT_CRYPTO_COMMISSION),
            },
            AssetKind::StockAShare => FeeSchedule::AShare {
                commission_rate: commission_rate.unwrap_or(DEFAULT_ASHARE_COMMISSION),
                min_commission: ASHARE_MIN_COMMISSION,
                stamp_duty_rate: ASHARE_STAMP_DUTY,
            },
        }
    }

    /// Commission on a fill's notional.
    pub fn fee(&self, notional: Decimal) -> Decimal {
        match self {
            FeeSchedule::Proportional { rate } => notional * rate,
            FeeSchedule::AShare {
                commission_rate,
                min_commission,
                ..
            } => (notional * commission_rate).max(*min_commission),
        }
    }

    /// Tax on a fill's notional; non-zero only for A-share sells.
    pub fn tax(&self, side: Side, notional: Decimal) -> Decimal {
        match self {
            FeeSchedule::Proportional { .. } => Decimal::ZERO,
            FeeSchedule::AShare {
                stamp_duty_rate, ..
            } => match side {
                Side::Buy => Decimal::ZERO,
                Side::Sell => notional * stamp_duty_rate,
            },
        }
    }
}
