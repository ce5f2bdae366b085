//! Signal translation: strategy output to concrete pending orders.
//!
//! Translation differences target positions against current holdings,
//! validates order intents, and collapses conflicting signals for the same
//! instrument deterministically:
//! - a `TargetPosition` overrides anything emitted earlier for that symbol,
//! - any signal arriving after a signal it cannot override is dropped with
//!   `DuplicateSignal` and recorded for audit.

use crate::error::{QuantLabError, Result};
use crate::instrument::InstrumentIndex;
use crate::ledger::LedgerSnapshot;
use crate::order::{Order, OrderType, RejectReason, Rejection, Side};
use crate::strategy::Signal;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Monotonic order-id and submission-sequence source, owned by the engine.
#[derive(Debug, Default)]
pub struct IdGen {
    next_id: u64,
    next_seq: u64,
}

impl IdGen {
    pub fn next_order_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn next_submit_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Outcome of translating one bar's signals.
#[derive(Debug, Default)]
pub struct Translation {
    pub orders: Vec<Order>,
    /// Signals dropped by the collapse rule, as audit rows.
    pub duplicates: Vec<Rejection>,
}

enum Collapsed {
    Target {
        quantity: Decimal,
        reason: String,
    },
    Intent {
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        limit_price: Option<Decimal>,
        reason: String,
    },
}

/// Translate the signals emitted by one `on_bar` call into pending orders.
pub fn translate_signals(
    signals: Vec<Signal>,
    snapshot: &LedgerSnapshot,
    instruments: &InstrumentIndex,
    timeframe_secs: u32,
    submit_bar: usize,
    ts: DateTime<Utc>,
    ids: &mut IdGen,
) -> Result<Translation> {
    let mut translation = Translation::default();
    let mut collapsed: BTreeMap<String, Collapsed> = BTreeMap::new();
    // symbols in first-emission order, so orders keep their emission sequence
    let mut appearance: Vec<String> = Vec::new();

    for signal in signals {
        let symbol = signal.symbol().to_string();
        if !instruments.contains_key(&symbol) {
            return Err(QuantLabError::UnknownInstrument(symbol));
        }

        match signal {
            Signal::TargetPosition {
                symbol,
                quantity,
                reason,
            } => {
                if collapsed
                    .insert(symbol.clone(), Collapsed::Target { quantity, reason })
                    .is_none()
                {
                    appearance.push(symbol);
                }
            }
            intent @ Signal::OrderIntent { .. } => {
                validate_intent(&intent)?;
                let Signal::OrderIntent {
                    symbol,
                    side,
                    order_type,
                    quantity,
                    limit_price,
                    reason,
                } = intent
                else {
                    continue;
                };
                if collapsed.contains_key(&symbol) {
                    translation.duplicates.push(Rejection {
                        order_id: ids.next_order_id(),
                        symbol,
                        reason: RejectReason::DuplicateSignal,
                        bar_index: submit_bar,
                        ts,
                    });
                } else {
                    collapsed.insert(
                        symbol.clone(),
                        Collapsed::Intent {
                            side,
                            order_type,
                            quantity,
                            limit_price,
                            reason,
                        },
                    );
                    appearance.push(symbol);
                }
            }
        }
    }

    for symbol in appearance {
        let Some(entry) = collapsed.remove(&symbol) else {
            continue;
        };
        match entry {
            Collapsed::Target { quantity, reason } => {
                let delta = quantity - snapshot.position_qty(&symbol);
                if delta.is_zero() {
                    continue;
                }
                let side = if delta > Decimal::ZERO {
                    Side::Buy
                } else {
                    Side::Sell
                };
                translation.orders.push(Order {
                    id: ids.next_order_id(),
                    symbol,
                    timeframe_secs,
                    side,
                    order_type: OrderType::Market,
                    quantity: delta.abs(),
                    limit_price: None,
                    submit_bar,
                    submit_seq: ids.next_submit_seq(),
                    reason,
                });
            }
            Collapsed::Intent {
                side,
                order_type,
                quantity,
                limit_price,
                reason,
            } => {
                translation.orders.push(Order {
                    id: ids.next_order_id(),
                    symbol,
                    timeframe_secs,
                    side,
                    order_type,
                    quantity,
                    limit_price,
                    submit_bar,
                    submit_seq: ids.next_submit_seq(),
                    reason,
                });
            }
        }
    }

    Ok(translation)
}

fn validate_intent(signal: &Signal) -> Result<()> {
    let Signal::OrderIntent {
        order_type,
        quantity,
        limit_price,
        symbol,
        ..
    } = signal
    else {
        return Ok(());
    };

    if *quantity <= Decimal::ZERO {
        return Err(QuantLabError::Strategy(format!(
            "order intent for {symbol} with non-positive quantity {quantity}"
        )));
    }
    match (order_type, limit_price) {
        (OrderType::Limit, None) => Err(QuantLabError::Strategy(format!(
            "limit intent for {symbol} without a limit price"
        ))),
        (OrderType::Market, Some(_)) => Err(QuantLabError::Strategy(format!(
            "market intent for {symbol} carries a limit price"
        ))),
        _ => Ok(()),
    }
}
