//! A-share rules: T+1, daily price limits, 100-share lots.
//!
//! The T+1 calendar is the Asia/Shanghai civil date: a buy filled on date D
//! contributes no sellable quantity until date D+1. Price limits are checked
//! against the previous trading day's close; the band depends on the board
//! classification and the ST flag carried on the instrument spec.

use super::{snap_lot, RuleContext, RuleDecision, RuleGate};
use crate::order::{RejectReason, Side};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Asia::Shanghai;
use rust_decimal::Decimal;

/// Civil date in Shanghai for a UTC instant. The T+1 day boundary.
pub fn shanghai_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Shanghai).date_naive()
}

pub struct AShareGate;

impl RuleGate for AShareGate {
    fn review(&self, order: crate::order::Order, ctx: &RuleContext) -> RuleDecision {
        let order = match snap_lot(order, ctx) {
            Ok(order) => order,
            Err(decision) => return decision,
        };

        // price limits against the previous trading day's close
        if let (Some(p_ref), Some(ratio)) = (ctx.prev_day_close, ctx.instrument.daily_limit_ratio())
        {
            let up_limit = ctx.instrument.round_to_tick(p_ref * (Decimal::ONE + ratio));
            let down_limit = ctx.instrument.round_to_tick(p_ref * (Decimal::ONE - ratio));
            match order.side {
                Side::Buy if ctx.open >= up_limit => {
                    return RuleDecision::Reject {
                        order,
                        reason: RejectReason::UpLimit,
                    };
                }
                Side::Sell if ctx.open <= down_limit => {
                    return RuleDecision::Reject {
                        order,
                        reason: RejectReason::DownLimit,
                    };
                }
                _ => {}
            }
        }

        match order.side {
            Side::Sell => {
                let held = ctx.ledger.position_qty(&order.symbol);
                if order.quantity > held {
                    return RuleDecision::Reject {
                        order,
                        reason: RejectReason::NoShort,
                    };
                }
                let sellable = ctx.ledger.sellable_qty(&order.symbol, shanghai_date(ctx.ts));
                if order.quantity > sellable {
                    return RuleDecision::Reject {
                        order,
                        reason: RejectReason::TPlusOne,
                    };
                }
            }
            Side::Buy => {
                let cost = order.quantity * ctx.fill_price;
                if cost > ctx.ledger.cash {
                    return RuleDecision::Reject {
                        order,
                        reason: RejectReason::InsufficientCash,
                    };
                }
            }
        }

        RuleDecision::Accept(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{Board, Instrument};
    use crate::ledger::Ledger;
    use crate::order::{Fill, FillKind, Order, OrderType};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn order(side: Side, quantity: Decimal) -> Order {
        Order {
            id: 1,
            symbol: "ashare:600519".into(),
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

    fn ctx<'a>(
        instrument: &'a Instrument,
        ledger: &'a Ledger,
        open: Decimal,
        prev_day_close: Option<Decimal>,
        ts: DateTime<Utc>,
    ) -> RuleContext<'a> {
        RuleContext {
            instrument,
            open,
            fill_price: open,
            ts,
            bar_index: 1,
            ledger,
            prev_day_close,
            leverage: Decimal::ONE,
        }
    }

    fn buy_on(ledger: &mut Ledger, quantity: Decimal, ts: DateTime<Utc>) {
        let fill = Fill {
            order_id: 9,
            symbol: "ashare:600519".into(),
            side: Side::Buy,
            quantity,
            price: dec!(10),
            fee: Decimal::ZERO,
            tax: Decimal::ZERO,
            ts,
            bar_index: 0,
            kind: FillKind::Normal,
        };
        ledger.apply_fill(&fill, None);
        ledger.lock_buy("ashare:600519", quantity, shanghai_date(ts));
    }

    #[test]
    fn shanghai_date_shifts_from_utc() {
        // 20:00 UTC is already the next civil day in Shanghai (UTC+8)
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 20, 0, 0).unwrap();
        assert_eq!(
            shanghai_date(ts),
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
        );
    }

    #[test]
    fn same_day_sell_is_t_plus_one() {
        let instrument = Instrument::a_share("600519", Board::Main, false);
        let mut ledger = Ledger::new(dec!(10000));
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        buy_on(&mut ledger, dec!(100), ts);

        let later_same_day = Utc.with_ymd_and_hms(2024, 1, 2, 6, 0, 0).unwrap();
        let decision = AShareGate.review(
            order(Side::Sell, dec!(100)),
            &ctx(&instrument, &ledger, dec!(10.5), Some(dec!(10)), later_same_day),
        );
        assert!(matches!(
            decision,
            RuleDecision::Reject {
                reason: RejectReason::TPlusOne,
                ..
            }
        ));
    }

    #[test]
    fn next_day_sell_is_allowed() {
        let instrument = Instrument::a_share("600519", Board::Main, false);
        let mut ledger = Ledger::new(dec!(10000));
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        buy_on(&mut ledger, dec!(100), ts);

        let next_day = Utc.with_ymd_and_hms(2024, 1, 3, 2, 0, 0).unwrap();
        let decision = AShareGate.review(
            order(Side::Sell, dec!(100)),
            &ctx(&instrument, &ledger, dec!(10.5), Some(dec!(10)), next_day),
        );
        assert!(matches!(decision, RuleDecision::Accept(_)));
    }

    #[test]
    fn buy_at_up_limit_rejected() {
        let instrument = Instrument::a_share("600519", Board::Main, false);
        let ledger = Ledger::new(dec!(10000));
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        // p_ref 10.00, main board band ±10% → up-limit 11.00
        let decision = AShareGate.review(
            order(Side::Buy, dec!(100)),
            &ctx(&instrument, &ledger, dec!(11.00), Some(dec!(10)), ts),
        );
        assert!(matches!(
            decision,
            RuleDecision::Reject {
                reason: RejectReason::UpLimit,
                ..
            }
        ));
    }

    #[test]
    fn sell_at_down_limit_rejected() {
        let instrument = Instrument::a_share("600519", Board::Main, false);
        let mut ledger = Ledger::new(dec!(10000));
        let buy_ts = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        buy_on(&mut ledger, dec!(100), buy_ts);

        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        let decision = AShareGate.review(
            order(Side::Sell, dec!(100)),
            &ctx(&instrument, &ledger, dec!(9.00), Some(dec!(10)), ts),
        );
        assert!(matches!(
            decision,
            RuleDecision::Reject {
                reason: RejectReason::DownLimit,
                ..
            }
        ));
    }

    #[test]
    fn st_band_is_five_percent() {
        let instrument = Instrument::a_share("600005", Board::Main, true);
        let ledger = Ledger::new(dec!(10000));
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        let decision = AShareGate.review(
            order(Side::Buy, dec!(100)),
            &ctx(&instrument, &ledger, dec!(10.50), Some(dec!(10)), ts),
        );
        assert!(matches!(
            decision,
            RuleDecision::Reject {
                reason: RejectReason::UpLimit,
                ..
            }
        ));
    }

    #[test]
    fn odd_lot_floors_to_board_lot() {
        let instrument = Instrument::a_share("600519", Board::Main, false);
        let ledger = Ledger::new(dec!(10000));
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        let decision = AShareGate.review(
            order(Side::Buy, dec!(250)),
            &ctx(&instrument, &ledger, dec!(10), Some(dec!(10)), ts),
        );
        match decision {
            RuleDecision::Accept(accepted) => assert_eq!(accepted.quantity, dec!(200)),
            other => panic!("expected accept, got {other:?}"),
        }
    }
}
