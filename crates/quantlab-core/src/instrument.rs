//! Instrument identity and contract specifications.
//!
//! An instrument is identified by its `symbol` string, which doubles as the
//! deterministic sort key everywhere the engine needs a total order across
//! instruments. Market-specific attributes (board classification, leverage
//! bounds, lot sizes) are *supplied* with the spec, never derived from symbol
//! prefixes.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The market an instrument trades in. Selects the rule-gate module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    CryptoSpot,
    CryptoPerp,
    StockAShare,
}

/// A-share board classification, which determines the daily price-limit band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Board {
    /// Main board (Shanghai / Shenzhen): ±10 % daily limit.
    Main,
    /// ChiNext (创业板): ±20 % daily limit.
    ChiNext,
    /// STAR board (科创板): ±20 % daily limit.
    Star,
}

/// Contract specification for one tradable instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Stable identity and deterministic sort key, e.g. "binance:BTC/USDT".
    pub symbol: String,
    pub venue: String,
    pub base: String,
    pub quote: String,
    pub asset_kind: AssetKind,
    /// Minimum price increment.
    pub price_tick: Decimal,
    /// Minimum order quantity.
    pub lot_min: Decimal,
    /// Quantity increment above the minimum.
    pub lot_step: Decimal,
    /// Currency cash and fees are settled in.
    pub settlement_currency: String,
    /// A-share board classification; `None` for crypto.
    pub board: Option<Board>,
    /// A-share ST (special treatment) flag: tightens the limit band to ±5 %.
    pub st_flag: bool,
    /// Maximum leverage; perpetuals only.
    pub max_leverage: Option<Decimal>,
    /// Close of the trading day immediately before the feed window.
    ///
    /// Seeds the A-share price-limit reference for the first session; with
    /// `None` the first day trades without limit checks.
    pub prev_close: Option<Decimal>,
}

impl Instrument {
    /// Crypto spot pair, e.g. `crypto_spot("binance", "BTC", "USDT")`.
    pub fn crypto_spot(venue: &str, base: &str, quote: &str) -> Self {
        Self {
            symbol: format!("{venue}:{base}/{quote}"),
            venue: venue.to_string(),
            base: base.to_string(),
            quote: quote.to_string(),
            asset_kind: AssetKind::CryptoSpot,
            price_tick: dec!(0.01),
            lot_min: dec!(0.0001),
            lot_step: dec!(0.0001),
            settlement_currency: quote.to_string(),
            board: None,
            st_flag: false,
            max_leverage: None,
            prev_close: None,
        }
    }

    /// Crypto perpetual swap with a leverage cap.
    pub fn crypto_perp(venue: &str, base: &str, quote: &str, max_leverage: Decimal) -> Self {
        Self {
            symbol: format!("{venue}:{base}-PERP/{quote}"),
            venue: venue.to_string(),
            base: base.to_string(),
            quote: quote.to_string(),
            asset_kind: AssetKind::CryptoPerp,
            price_tick: dec!(0.01),
            lot_min: dec!(0.001),
            lot_step: dec!(0.001),
            settlement_currency: quote.to_string(),
            board: None,
            st_flag: false,
            max_leverage: Some(max_leverage),
            prev_close: None,
        }
    }

    /// A-share stock. `code` is the exchange listing code, e.g. "600519".
    pub fn a_share(code: &str, board: Board, st_flag: bool) -> Self {
        Self {
            symbol: format!("ashare:{code}"),
            venue: "ashare".to_string(),
            base: code.to_string(),
            quote: "CNY".to_string(),
            asset_kind: AssetKind::StockAShare,
            price_tick: dec!(0.01),
            lot_min: dec!(100),
            lot_step: dec!(100),
            settlement_currency: "CNY".to_string(),
            board: Some(board),
            st_flag,
            max_leverage: None,
            prev_close: None,
        }
    }

    /// Builder-style override of the pre-window reference close.
    pub fn with_prev_close(mut self, prev_close: Decimal) -> Self {
        self.prev_close = Some(prev_close);
        self
    }

    /// Daily price-limit ratio for A-share instruments; `None` for crypto.
    ///
    /// ST classification overrides the board band.
    pub fn daily_limit_ratio(&self) -> Option<Decimal> {
        if self.asset_kind != AssetKind::StockAShare {
            return None;
        }
        if self.st_flag {
            return Some(dec!(0.05));
        }
        match self.board {
            Some(Board::Main) => Some(dec!(0.10)),
            Some(Board::ChiNext) | Some(Board::Star) => Some(dec!(0.20)),
            None => None,
        }
    }

    /// Round a price to the instrument's tick, ties away from zero.
    pub fn round_to_tick(&self, price: Decimal) -> Decimal {
        if self.price_tick.is_zero() {
            return price;
        }
        (price / self.price_tick)
            .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
            * self.price_tick
    }

    /// Snap a quantity *down* to the lot grid. Quantities below `lot_min`
    /// snap to zero.
    pub fn snap_quantity(&self, quantity: Decimal) -> Decimal {
        if quantity < self.lot_min {
            return Decimal::ZERO;
        }
        if self.lot_step.is_zero() {
            return quantity;
        }
        (quantity / self.lot_step).floor() * self.lot_step
    }
}

/// Instrument-spec lookup handed to the engine, keyed by symbol.
pub type InstrumentIndex = BTreeMap<String, Instrument>;

/// Build an [`InstrumentIndex`] from a list of specs.
pub fn index_of(instruments: impl IntoIterator<Item = Instrument>) -> InstrumentIndex {
    instruments
        .into_iter()
        .map(|i| (i.symbol.clone(), i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_ratio_follows_board() {
        let main = Instrument::a_share("600519", Board::Main, false);
        let chinext = Instrument::a_share("300750", Board::ChiNext, false);
        let st = Instrument::a_share("600005", Board::Main, true);
        let spot = Instrument::crypto_spot("binance", "BTC", "USDT");

        assert_eq!(main.daily_limit_ratio(), Some(dec!(0.10)));
        assert_eq!(chinext.daily_limit_ratio(), Some(dec!(0.20)));
        assert_eq!(st.daily_limit_ratio(), Some(dec!(0.05)));
        assert_eq!(spot.daily_limit_ratio(), None);
    }

    #[test]
    fn snap_quantity_floors_to_step() {
        let stock = Instrument::a_share("600519", Board::Main, false);
        assert_eq!(stock.snap_quantity(dec!(250)), dec!(200));
        assert_eq!(stock.snap_quantity(dec!(99)), Decimal::ZERO);

        let spot = Instrument::crypto_spot("binance", "BTC", "USDT");
        assert_eq!(spot.snap_quantity(dec!(0.12345)), dec!(0.1234));
    }

    #[test]
    fn round_to_tick_half_up() {
        let stock = Instrument::a_share("600519", Board::Main, false);
        assert_eq!(stock.round_to_tick(dec!(10.994)), dec!(10.99));
        assert_eq!(stock.round_to_tick(dec!(10.995)), dec!(11.00));
    }
}
