//! Crypto perpetual rules: lot snapping and margin sufficiency.
//!
//! Longs and shorts are both allowed. Opening (or extending) a position
//! engages margin `notional / leverage`; an order whose margin would drive
//! free cash negative is rejected. Orders that only reduce exposure never
//! need fresh margin. The liquidation check itself runs in the engine at
//! bar close (see `backtest`), not here: it is not a property of an order.

use super::{snap_lot, RuleContext, RuleDecision, RuleGate};
use crate::order::{RejectReason, Side};
use rust_decimal::Decimal;

pub struct CryptoPerpGate;

impl RuleGate for CryptoPerpGate {
    fn review(&self, order: crate::order::Order, ctx: &RuleContext) -> RuleDecision {
        let order = match snap_lot(order, ctx) {
            Ok(order) => order,
            Err(decision) => return decision,
        };

        let held = ctx.ledger.position_qty(&order.symbol);
        let delta = order.side.sign() * order.quantity;
        let exposure_after = (held + delta).abs();

        // pure reductions release margin, nothing to check
        if exposure_after <= held.abs() {
            return RuleDecision::Accept(order);
        }

        let added_exposure = exposure_after - held.abs();
        let required = added_exposure * ctx.fill_price / ctx.leverage;
        if ctx.ledger.free_cash() - required < Decimal::ZERO {
            return RuleDecision::Reject {
                order,
                reason: RejectReason::InsufficientMargin,
            };
        }

        RuleDecision::Accept(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Instrument;
    use crate::ledger::Ledger;
    use crate::order::{Order, OrderType};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn order(side: Side, quantity: Decimal) -> Order {
        Order {
            id: 1,
            symbol: "binance:BTC-PERP/USDT".into(),
            timeframe_secs: 86_400,
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            submit_bar: 0,
            submit_seq: 1,
            reason: "test".into(),
        }
    }

    fn ctx<'a>(instrument: &'a Instrument, ledger: &'a Ledger) -> RuleContext<'a> {
        RuleContext {
            instrument,
            open: dec!(100),
            fill_price: dec!(100),
            ts: chrono::Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            bar_index: 1,
            ledger,
            prev_day_close: None,
            leverage: dec!(10),
        }
    }

    #[test]
    fn margin_at_exact_capacity_is_accepted() {
        let instrument = Instrument::crypto_perp("binance", "BTC", "USDT", dec!(10));
        let ledger = Ledger::new(dec!(1000));
        // notional 10_000 at 10x needs exactly the full 1_000 of equity
        let decision = CryptoPerpGate.review(order(Side::Buy, dec!(100)), &ctx(&instrument, &ledger));
        assert!(matches!(decision, RuleDecision::Accept(_)));
    }

    #[test]
    fn margin_beyond_capacity_is_rejected() {
        let instrument = Instrument::crypto_perp("binance", "BTC", "USDT", dec!(10));
        let ledger = Ledger::new(dec!(1000));
        let decision =
            CryptoPerpGate.review(order(Side::Buy, dec!(100.001)), &ctx(&instrument, &ledger));
        assert!(matches!(
            decision,
            RuleDecision::Reject {
                reason: RejectReason::InsufficientMargin,
                ..
            }
        ));
    }

    #[test]
    fn shorts_are_allowed() {
        let instrument = Instrument::crypto_perp("binance", "BTC", "USDT", dec!(10));
        let ledger = Ledger::new(dec!(1000));
        let decision = CryptoPerpGate.review(order(Side::Sell, dec!(50)), &ctx(&instrument, &ledger));
        assert!(matches!(decision, RuleDecision::Accept(_)));
    }

    #[test]
    fn reducing_order_needs_no_margin() {
        let instrument = Instrument::crypto_perp("binance", "BTC", "USDT", dec!(10));
        let mut ledger = Ledger::new(dec!(1000));
        let fill = crate::order::Fill {
            order_id: 1,
            symbol: "binance:BTC-PERP/USDT".into(),
            side: Side::Buy,
            quantity: dec!(100),
            price: dec!(100),
            fee: Decimal::ZERO,
            tax: Decimal::ZERO,
            ts: chrono::Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            bar_index: 0,
            kind: crate::order::FillKind::Normal,
        };
        ledger.apply_fill(&fill, Some(dec!(10)));
        ledger.mark("binance:BTC-PERP/USDT", dec!(100));

        // free cash is zero, but closing must still be possible
        let decision = CryptoPerpGate.review(order(Side::Sell, dec!(100)), &ctx(&instrument, &ledger));
        assert!(matches!(decision, RuleDecision::Accept(_)));
    }
}
