//! Crypto spot rules: no shorts, lot snapping, cash sufficiency.

use super::{snap_lot, RuleContext, RuleDecision, RuleGate};
use crate::order::{RejectReason, Side};

pub struct CryptoSpotGate;

impl RuleGate for CryptoSpotGate {
    fn review(&self, order: crate::order::Order, ctx: &RuleContext) -> RuleDecision {
        let order = match snap_lot(order, ctx) {
            Ok(order) => order,
            Err(decision) => return decision,
        };

        match order.side {
            Side::Sell => {
                // sells must be covered by existing long quantity
                let held = ctx.ledger.position_qty(&order.symbol);
                if order.quantity > held {
                    return RuleDecision::Reject {
                        order,
                        reason: RejectReason::NoShort,
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
