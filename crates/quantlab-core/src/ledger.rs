//! Portfolio ledger: cash, positions, realized/unrealized PnL, equity series.
//!
//! The ledger is the only owner of mutable account state. The engine mutates
//! it through [`Ledger::apply_fill`] and [`Ledger::mark`]; strategies and the
//! metrics layer only ever see an immutable [`LedgerSnapshot`].
//!
//! All bookkeeping is exact decimal arithmetic so the accounting identities
//! hold without tolerance:
//! `equity = cash + Σ qty × mark`, and
//! `equity − initial = Σ realized + Σ unrealized − Σ fees − Σ taxes`.

use crate::order::{Fill, FillKind};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-instrument holdings. Flat positions keep their record (and realized
/// PnL) with zero quantity for reporting continuity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Signed quantity: positive long, negative short.
    pub quantity: Decimal,
    /// Weighted-average entry price; zero when flat.
    pub avg_entry: Decimal,
    /// Cumulative realized PnL, gross of fees and taxes.
    pub realized_pnl: Decimal,
    /// Margin engaged (perpetuals), `notional / leverage` at entry basis.
    pub margin: Decimal,
    /// Leverage in effect (perpetuals); zero otherwise.
    pub leverage: Decimal,
    /// Entry-side fees and taxes not yet released to a closing trade.
    entry_costs: Decimal,
    /// Quantity bought on `locked_date` and unsellable until the next
    /// Shanghai calendar date (A-share T+1).
    locked_quantity: Decimal,
    locked_date: Option<NaiveDate>,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Market value at a mark price.
    pub fn market_value(&self, mark: Decimal) -> Decimal {
        self.quantity * mark
    }

    /// Unrealized PnL at a mark price.
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        (mark - self.avg_entry) * self.quantity
    }
}

/// A completed (or partially completed) round trip: a closing fill paired
/// with the position's average entry basis at close time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    /// `(exit − entry) × qty × direction`, before costs.
    pub gross_pnl: Decimal,
    /// Apportioned entry costs plus the closing fill's fee and tax.
    pub costs: Decimal,
    pub net_pnl: Decimal,
    pub ts: DateTime<Utc>,
    pub bar_index: usize,
    pub kind: FillKind,
}

/// One row of the equity series, appended at every bar close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: DateTime<Utc>,
    pub bar_index: usize,
    pub equity: Decimal,
    pub cash: Decimal,
    pub gross_exposure: Decimal,
    pub net_exposure: Decimal,
    /// `max(0, high_water − equity)` at this bar.
    pub drawdown: Decimal,
}

/// Read-only position view inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionView {
    pub quantity: Decimal,
    pub avg_entry: Decimal,
    pub realized_pnl: Decimal,
    pub margin: Decimal,
}

/// Immutable account view handed to strategies and the metrics layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub cash: Decimal,
    pub equity: Decimal,
    pub gross_exposure: Decimal,
    pub net_exposure: Decimal,
    pub high_water: Decimal,
    pub drawdown: Decimal,
    pub positions: BTreeMap<String, PositionView>,
}

impl LedgerSnapshot {
    /// Signed quantity held in `symbol`; zero when no position exists.
    pub fn position_qty(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }
}

/// The account ledger, owned exclusively by one engine instance.
#[derive(Debug, Clone)]
pub struct Ledger {
    pub cash: Decimal,
    initial_capital: Decimal,
    positions: BTreeMap<String, Position>,
    marks: BTreeMap<String, Decimal>,
    fees_paid: Decimal,
    taxes_paid: Decimal,
    high_water: Decimal,
    equity_series: Vec<EquityPoint>,
    trades: Vec<Trade>,
}

impl Ledger {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            cash: initial_capital,
            initial_capital,
            positions: BTreeMap::new(),
            marks: BTreeMap::new(),
            fees_paid: Decimal::ZERO,
            taxes_paid: Decimal::ZERO,
            high_water: initial_capital,
            equity_series: Vec::new(),
            trades: Vec::new(),
        }
    }

    /// Apply a fill: adjust cash (notional plus costs), position quantity
    /// and average basis, realized PnL, and the trade list.
    ///
    /// `leverage` is `Some` only for perpetuals and drives the margin
    /// bookkeeping; everything else about the cash accounting is uniform
    /// across asset kinds.
    pub fn apply_fill(&mut self, fill: &Fill, leverage: Option<Decimal>) {
        let delta = fill.signed_quantity();
        let price = fill.price;

        self.cash -= delta * price;
        self.cash -= fill.fee + fill.tax;
        self.fees_paid += fill.fee;
        self.taxes_paid += fill.tax;

        let pos = self.positions.entry(fill.symbol.clone()).or_default();
        let adds = pos.quantity.is_zero() || (pos.quantity > Decimal::ZERO) == (delta > Decimal::ZERO);

        if adds {
            let new_qty = pos.quantity + delta;
            if !new_qty.is_zero() {
                let total_cost = pos.avg_entry * pos.quantity.abs() + price * delta.abs();
                pos.avg_entry = total_cost / new_qty.abs();
            }
            pos.quantity = new_qty;
            pos.entry_costs += fill.fee + fill.tax;
        } else {
            let close_qty = delta.abs().min(pos.quantity.abs());
            let direction = if pos.quantity > Decimal::ZERO {
                Decimal::ONE
            } else {
                Decimal::NEGATIVE_ONE
            };
            let gross = (price - pos.avg_entry) * close_qty * direction;
            let entry_portion = pos.entry_costs * close_qty / pos.quantity.abs();
            let costs = entry_portion + fill.fee + fill.tax;

            pos.realized_pnl += gross;
            pos.entry_costs -= entry_portion;
            self.trades.push(Trade {
                symbol: fill.symbol.clone(),
                quantity: close_qty,
                entry_price: pos.avg_entry,
                exit_price: price,
                gross_pnl: gross,
                costs,
                net_pnl: gross - costs,
                ts: fill.ts,
                bar_index: fill.bar_index,
                kind: fill.kind,
            });

            let leftover = delta.abs() - close_qty;
            if leftover.is_zero() {
                pos.quantity += delta;
                if pos.quantity.is_zero() {
                    // basis released; the record stays for reporting
                    pos.avg_entry = Decimal::ZERO;
                    pos.entry_costs = Decimal::ZERO;
                }
            } else {
                // reversal: the remainder opens a fresh position at the fill price
                pos.quantity = -direction * leftover;
                pos.avg_entry = price;
                pos.entry_costs = Decimal::ZERO;
            }
        }

        match leverage {
            Some(lev) if !lev.is_zero() => {
                pos.leverage = lev;
                pos.margin = pos.quantity.abs() * pos.avg_entry / lev;
            }
            _ => {
                pos.leverage = Decimal::ZERO;
                pos.margin = Decimal::ZERO;
            }
        }
    }

    /// Record the latest mark price for a symbol.
    pub fn mark(&mut self, symbol: &str, price: Decimal) {
        self.marks.insert(symbol.to_string(), price);
    }

    /// Current equity at the recorded marks. Positions without a mark are
    /// valued at their entry basis.
    pub fn equity(&self) -> Decimal {
        let position_value: Decimal = self
            .positions
            .iter()
            .map(|(symbol, pos)| {
                let mark = self.marks.get(symbol).copied().unwrap_or(pos.avg_entry);
                pos.market_value(mark)
            })
            .sum();
        self.cash + position_value
    }

    /// Equity minus total margin engaged; must stay non-negative for a
    /// perpetual order to be accepted.
    pub fn free_cash(&self) -> Decimal {
        let margin: Decimal = self.positions.values().map(|p| p.margin).sum();
        self.equity() - margin
    }

    /// Append an equity point at a bar close and roll the high-water mark.
    pub fn mark_equity(&mut self, ts: DateTime<Utc>, bar_index: usize) {
        let equity = self.equity();
        let (gross, net) = self.exposures();
        if equity > self.high_water {
            self.high_water = equity;
        }
        let drawdown = (self.high_water - equity).max(Decimal::ZERO);
        self.equity_series.push(EquityPoint {
            ts,
            bar_index,
            equity,
            cash: self.cash,
            gross_exposure: gross,
            net_exposure: net,
            drawdown,
        });
    }

    fn exposures(&self) -> (Decimal, Decimal) {
        let mut gross = Decimal::ZERO;
        let mut net = Decimal::ZERO;
        for (symbol, pos) in &self.positions {
            let mark = self.marks.get(symbol).copied().unwrap_or(pos.avg_entry);
            let value = pos.market_value(mark);
            gross += value.abs();
            net += value;
        }
        (gross, net)
    }

    /// Register an A-share buy: the quantity is unsellable for the rest of
    /// the given Shanghai calendar date.
    pub fn lock_buy(&mut self, symbol: &str, quantity: Decimal, date: NaiveDate) {
        let pos = self.positions.entry(symbol.to_string()).or_default();
        if pos.locked_date == Some(date) {
            pos.locked_quantity += quantity;
        } else {
            pos.locked_date = Some(date);
            pos.locked_quantity = quantity;
        }
    }

    /// Long quantity sellable on the given Shanghai calendar date, after
    /// subtracting same-day buys.
    pub fn sellable_qty(&self, symbol: &str, date: NaiveDate) -> Decimal {
        match self.positions.get(symbol) {
            Some(pos) => {
                let locked = if pos.locked_date == Some(date) {
                    pos.locked_quantity
                } else {
                    Decimal::ZERO
                };
                (pos.quantity - locked).max(Decimal::ZERO)
            }
            None => Decimal::ZERO,
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&String, &Position)> {
        self.positions.iter()
    }

    pub fn position_qty(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn mark_price(&self, symbol: &str) -> Option<Decimal> {
        self.marks.get(symbol).copied()
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions
            .iter()
            .map(|(symbol, pos)| {
                let mark = self.marks.get(symbol).copied().unwrap_or(pos.avg_entry);
                pos.unrealized_pnl(mark)
            })
            .sum()
    }

    pub fn fees_paid(&self) -> Decimal {
        self.fees_paid
    }

    pub fn taxes_paid(&self) -> Decimal {
        self.taxes_paid
    }

    pub fn initial_capital(&self) -> Decimal {
        self.initial_capital
    }

    pub fn equity_series(&self) -> &[EquityPoint] {
        &self.equity_series
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn into_series(self) -> (Vec<EquityPoint>, Vec<Trade>) {
        (self.equity_series, self.trades)
    }

    /// Immutable view for strategies and metrics.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let equity = self.equity();
        let (gross, net) = self.exposures();
        let high_water = self.high_water.max(equity);
        LedgerSnapshot {
            cash: self.cash,
            equity,
            gross_exposure: gross,
            net_exposure: net,
            high_water,
            drawdown: (high_water - equity).max(Decimal::ZERO),
            positions: self
                .positions
                .iter()
                .map(|(symbol, pos)| {
                    (
                        symbol.clone(),
                        PositionView {
                            quantity: pos.quantity,
                            avg_entry: pos.avg_entry,
                            realized_pnl: pos.realized_pnl,
                            margin: pos.margin,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Side;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn fill(side: Side, qty: Decimal, price: Decimal, fee: Decimal) -> Fill {
        Fill {
            order_id: 1,
            symbol: "binance:BTC/USDT".into(),
            side,
            quantity: qty,
            price,
            fee,
            tax: Decimal::ZERO,
            ts: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            bar_index: 0,
            kind: FillKind::Normal,
        }
    }

    #[test]
    fn buy_then_sell_realizes_pnl() {
        let mut ledger = Ledger::new(dec!(10000));
        ledger.apply_fill(&fill(Side::Buy, dec!(1), dec!(100), dec!(0.1)), None);
        assert_eq!(ledger.cash, dec!(9899.9));
        assert_eq!(ledger.position_qty("binance:BTC/USDT"), dec!(1));

        ledger.apply_fill(&fill(Side::Sell, dec!(1), dec!(110), dec!(0.11)), None);
        assert_eq!(ledger.cash, dec!(10009.79));
        assert_eq!(ledger.position_qty("binance:BTC/USDT"), Decimal::ZERO);

        let trades = ledger.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].gross_pnl, dec!(10));
        assert_eq!(trades[0].costs, dec!(0.21));
        assert_eq!(trades[0].net_pnl, dec!(9.79));
    }

    #[test]
    fn weighted_average_basis_on_adds() {
        let mut ledger = Ledger::new(dec!(10000));
        ledger.apply_fill(&fill(Side::Buy, dec!(1), dec!(100), Decimal::ZERO), None);
        ledger.apply_fill(&fill(Side::Buy, dec!(1), dec!(110), Decimal::ZERO), None);
        let pos = ledger.position("binance:BTC/USDT").unwrap();
        assert_eq!(pos.quantity, dec!(2));
        assert_eq!(pos.avg_entry, dec!(105));
    }

    #[test]
    fn reversal_opens_fresh_basis() {
        let mut ledger = Ledger::new(dec!(10000));
        ledger.apply_fill(&fill(Side::Buy, dec!(1), dec!(100), Decimal::ZERO), None);
        ledger.apply_fill(&fill(Side::Sell, dec!(3), dec!(110), Decimal::ZERO), None);

        let pos = ledger.position("binance:BTC/USDT").unwrap();
        assert_eq!(pos.quantity, dec!(-2));
        assert_eq!(pos.avg_entry, dec!(110));
        assert_eq!(pos.realized_pnl, dec!(10));
        assert_eq!(ledger.trades().len(), 1);
    }

    #[test]
    fn equity_identity_holds_at_marks() {
        let mut ledger = Ledger::new(dec!(10000));
        ledger.apply_fill(&fill(Side::Buy, dec!(2), dec!(100), dec!(0.2)), None);
        ledger.mark("binance:BTC/USDT", dec!(105));

        let equity = ledger.equity();
        assert_eq!(equity, ledger.cash + dec!(2) * dec!(105));

        // equity − initial = realized + unrealized − fees − taxes
        assert_eq!(
            equity - ledger.initial_capital(),
            ledger.realized_pnl() + ledger.unrealized_pnl()
                - ledger.fees_paid()
                - ledger.taxes_paid()
        );
    }

    #[test]
    fn drawdown_tracks_high_water() {
        let mut ledger = Ledger::new(dec!(1000));
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        ledger.apply_fill(&fill(Side::Buy, dec!(10), dec!(100), Decimal::ZERO), None);

        ledger.mark("binance:BTC/USDT", dec!(110));
        ledger.mark_equity(ts, 0);
        ledger.mark("binance:BTC/USDT", dec!(95));
        ledger.mark_equity(ts, 1);

        let series = ledger.equity_series();
        assert_eq!(series[0].drawdown, Decimal::ZERO);
        assert_eq!(series[1].drawdown, dec!(150));
    }

    #[test]
    fn t_plus_one_lock_releases_next_date() {
        let mut ledger = Ledger::new(dec!(10000));
        let mut buy = fill(Side::Buy, dec!(100), dec!(10), Decimal::ZERO);
        buy.symbol = "ashare:600519".into();
        ledger.apply_fill(&buy, None);

        let day1 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        ledger.lock_buy("ashare:600519", dec!(100), day1);

        assert_eq!(ledger.sellable_qty("ashare:600519", day1), Decimal::ZERO);
        assert_eq!(ledger.sellable_qty("ashare:600519", day2), dec!(100));
    }
}
