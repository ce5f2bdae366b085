//! Performance metrics calculations.
//!
//! All metrics are deterministic functions of the equity series and trade
//! ledger. Statistics run in `f64`; only the fee/tax totals stay decimal
//! because they are accounting lines, not derived statistics.

use crate::ledger::{EquityPoint, Trade};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Performance summary for a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Total return (as decimal, e.g. 0.25 = 25%)
    pub total_return: f64,

    /// Annualized (compound) return on the configured basis
    pub annualized_return: f64,

    /// Annualized volatility of bar returns, scaled by sqrt(bars per year)
    pub annualized_volatility: f64,

    /// Annualized Sharpe ratio, excess over zero
    pub sharpe: f64,

    /// Annualized Sortino ratio (downside deviation denominator)
    pub sortino: f64,

    /// Calmar ratio (annualized return / |max drawdown|)
    pub calmar: f64,

    /// Maximum drawdown from the running high-water mark (0.20 = 20%)
    pub max_drawdown: f64,

    /// Winning trades / total trades
    pub win_rate: f64,

    /// Gross profit / gross loss
    pub profit_factor: f64,

    /// Mean net PnL per trade, as a fraction of the trade's entry notional
    pub avg_trade_return: f64,

    pub num_trades: u32,

    /// Annual traded notional as a multiple of average capital
    pub turnover: f64,

    /// Cumulative commissions, exact
    pub total_fees: Decimal,

    /// Cumulative taxes (stamp duty), exact
    pub total_taxes: Decimal,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            total_return: 0.0,
            annualized_return: 0.0,
            annualized_volatility: 0.0,
            sharpe: 0.0,
            sortino: 0.0,
            calmar: 0.0,
            max_drawdown: 0.0,
            win_rate: 0.0,
            profit_factor: 0.0,
            avg_trade_return: 0.0,
            num_trades: 0,
            turnover: 0.0,
            total_fees: Decimal::ZERO,
            total_taxes: Decimal::ZERO,
        }
    }
}

/// Inputs that are not derivable from the equity series itself.
#[derive(Debug, Clone, Copy)]
pub struct MetricsContext {
    pub initial_capital: Decimal,
    /// Bars per year for scaling: `basis_days × 86400 / timeframe_secs`.
    pub bars_per_year: f64,
    pub total_fees: Decimal,
    pub total_taxes: Decimal,
    /// Sum of |quantity × price| across all fills, for turnover.
    pub total_traded: Decimal,
}

/// Compute all metrics from an equity series and trade list.
pub fn compute_metrics(equity: &[EquityPoint], trades: &[Trade], ctx: &MetricsContext) -> Metrics {
    let mut metrics = Metrics {
        total_fees: ctx.total_fees,
        total_taxes: ctx.total_taxes,
        ..Metrics::default()
    };
    if equity.is_empty() {
        return metrics;
    }

    let initial = ctx.initial_capital.to_f64().unwrap_or(0.0);
    let curve: Vec<f64> = equity
        .iter()
        .map(|p| p.equity.to_f64().unwrap_or(0.0))
        .collect();
    let last = *curve.last().unwrap_or(&initial);

    metrics.total_return = if initial > 0.0 {
        (last - initial) / initial
    } else {
        0.0
    };

    let years = if ctx.bars_per_year > 0.0 && curve.len() > 1 {
        (curve.len() - 1) as f64 / ctx.bars_per_year
    } else {
        0.0
    };

    metrics.annualized_return = annualize_return(metrics.total_return, years);
    metrics.max_drawdown = max_drawdown(&curve);
    metrics.calmar = if metrics.max_drawdown > 0.0 {
        metrics.annualized_return / metrics.max_drawdown
    } else {
        0.0
    };

    let bar_returns: Vec<f64> = curve
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    metrics.annualized_volatility = volatility(&bar_returns) * ctx.bars_per_year.sqrt();
    metrics.sharpe = sharpe_ratio(&bar_returns, ctx.bars_per_year);
    metrics.sortino = sortino_ratio(&bar_returns, ctx.bars_per_year);

    metrics.num_trades = trades.len() as u32;
    let winners = trades
        .iter()
        .filter(|t| t.net_pnl > Decimal::ZERO)
        .count();
    metrics.win_rate = if trades.is_empty() {
        0.0
    } else {
        winners as f64 / trades.len() as f64
    };

    let gross_profit: f64 = trades
        .iter()
        .filter(|t| t.net_pnl > Decimal::ZERO)
        .map(|t| t.net_pnl.to_f64().unwrap_or(0.0))
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.net_pnl < Decimal::ZERO)
        .map(|t| t.net_pnl.to_f64().unwrap_or(0.0).abs())
        .sum();
    metrics.profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let trade_returns: Vec<f64> = trades
        .iter()
        .filter_map(|t| {
            let notional = (t.entry_price * t.quantity).to_f64()?;
            if notional == 0.0 {
                return None;
            }
            Some(t.net_pnl.to_f64()? / notional)
        })
        .collect();
    metrics.avg_trade_return = if trade_returns.is_empty() {
        0.0
    } else {
        trade_returns.iter().sum::<f64>() / trade_returns.len() as f64
    };

    let total_traded = ctx.total_traded.to_f64().unwrap_or(0.0);
    let avg_capital = (initial + last) / 2.0;
    metrics.turnover = if years > 0.0 && avg_capital > 0.0 {
        (total_traded / avg_capital) / years
    } else {
        0.0
    };

    metrics
}

/// Compound annualization of a total return over fractional years.
pub fn annualize_return(total_return: f64, years: f64) -> f64 {
    if years <= 0.0 || total_return <= -1.0 {
        return 0.0;
    }
    (1.0 + total_return).powf(1.0 / years) - 1.0
}

/// Maximum drawdown of an equity curve, as a positive fraction of the peak.
pub fn max_drawdown(curve: &[f64]) -> f64 {
    let mut peak = match curve.first() {
        Some(first) => *first,
        None => return 0.0,
    };
    let mut max_dd = 0.0;

    for &equity in curve {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dd = (peak - equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd
}

fn volatility(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Annualized Sharpe ratio (risk-free rate of zero). Undefined ratios
/// (zero variance) read as 0.
pub fn sharpe_ratio(returns: &[f64], bars_per_year: f64) -> f64 {
    if returns.is_empty() || bars_per_year <= 0.0 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let std_dev = volatility(returns);
    if std_dev == 0.0 {
        return 0.0;
    }
    (mean * bars_per_year) / (std_dev * bars_per_year.sqrt())
}

/// Annualized Sortino ratio: like Sharpe but only downside deviation in
/// the denominator.
pub fn sortino_ratio(returns: &[f64], bars_per_year: f64) -> f64 {
    if returns.is_empty() || bars_per_year <= 0.0 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let downside_variance = returns
        .iter()
        .map(|r| if *r < 0.0 { r.powi(2) } else { 0.0 })
        .sum::<f64>()
        / n;
    let downside_dev = downside_variance.sqrt();
    if downside_dev == 0.0 {
        return 0.0;
    }
    (mean * bars_per_year) / (downside_dev * bars_per_year.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn equity_points(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| EquityPoint {
                ts: chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64),
                bar_index: i,
                equity: Decimal::try_from(v).unwrap(),
                cash: Decimal::try_from(v).unwrap(),
                gross_exposure: Decimal::ZERO,
                net_exposure: Decimal::ZERO,
                drawdown: Decimal::ZERO,
            })
            .collect()
    }

    fn ctx(initial: Decimal) -> MetricsContext {
        MetricsContext {
            initial_capital: initial,
            bars_per_year: 365.0,
            total_fees: Decimal::ZERO,
            total_taxes: Decimal::ZERO,
            total_traded: Decimal::ZERO,
        }
    }

    #[test]
    fn max_drawdown_peak_to_trough() {
        let curve = vec![100.0, 110.0, 105.0, 120.0, 90.0, 100.0];
        // peak 120, trough 90 -> 25%
        assert!((max_drawdown(&curve) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn flat_equity_has_no_statistics() {
        let equity = equity_points(&[10_000.0; 50]);
        let metrics = compute_metrics(&equity, &[], &ctx(dec!(10000)));
        assert_eq!(metrics.total_return, 0.0);
        assert_eq!(metrics.sharpe, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
        assert_eq!(metrics.num_trades, 0);
    }

    #[test]
    fn total_return_from_endpoints() {
        let equity = equity_points(&[10_000.0, 10_500.0, 11_000.0]);
        let metrics = compute_metrics(&equity, &[], &ctx(dec!(10000)));
        assert!((metrics.total_return - 0.10).abs() < 1e-12);
    }

    #[test]
    fn annualization_compounds() {
        // +10% over one year of daily bars ~ +10% annualized
        let ann = annualize_return(0.10, 1.0);
        assert!((ann - 0.10).abs() < 1e-12);
        // +21% over two years ~ +10% per year
        let ann = annualize_return(0.21, 2.0);
        assert!((ann - 0.1).abs() < 1e-10);
    }

    #[test]
    fn win_rate_and_profit_factor() {
        let ts = chrono::Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let trade = |net: Decimal| Trade {
            symbol: "T".into(),
            quantity: dec!(1),
            entry_price: dec!(100),
            exit_price: dec!(100) + net,
            gross_pnl: net,
            costs: Decimal::ZERO,
            net_pnl: net,
            ts,
            bar_index: 5,
            kind: crate::order::FillKind::Normal,
        };
        let trades = vec![trade(dec!(10)), trade(dec!(-5)), trade(dec!(15))];
        let equity = equity_points(&[100.0, 120.0]);
        let metrics = compute_metrics(&equity, &trades, &ctx(dec!(100)));

        assert!((metrics.win_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.profit_factor - 5.0).abs() < 1e-12);
        assert_eq!(metrics.num_trades, 3);
    }
}
