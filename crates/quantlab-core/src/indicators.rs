//! Indicator calculations (pure functions, no IO).
//!
//! Key invariant: indicator values at index `t` must depend only on bars
//! `0..=t`. Warm-up positions are `None`.
//!
//! Indicator math runs in `f64`; only cash and position bookkeeping is
//! decimal. Signals derived from these values are still deterministic
//! because the inputs and operations are identical across runs.

use crate::bar::Bar;
use rust_decimal::prelude::ToPrimitive;

fn close(bar: &Bar) -> f64 {
    bar.close.to_f64().unwrap_or(0.0)
}

/// Simple moving average of `close` over a fixed window.
pub fn sma_close(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; bars.len()];
    }

    let mut out = vec![None; bars.len()];
    let mut sum = 0.0;

    for i in 0..bars.len() {
        sum += close(&bars[i]);
        if i >= window {
            sum -= close(&bars[i - window]);
        }
        if i + 1 >= window {
            out[i] = Some(sum / window as f64);
        }
    }

    out
}

/// Rolling population standard deviation of `close` over a fixed window.
pub fn rolling_std_close(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; bars.len()];
    }

    let mut out = vec![None; bars.len()];
    for i in 0..bars.len() {
        if i + 1 < window {
            continue;
        }
        let slice = &bars[i + 1 - window..=i];
        let mean = slice.iter().map(close).sum::<f64>() / window as f64;
        let variance = slice
            .iter()
            .map(|b| {
                let d = close(b) - mean;
                d * d
            })
            .sum::<f64>()
            / window as f64;
        out[i] = Some(variance.sqrt());
    }

    out
}

/// Donchian channel values (upper and lower bands).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DonchianChannel {
    pub upper: f64,
    pub lower: f64,
}

/// Compute Donchian channel over a lookback period.
///
/// - Upper = highest high over the prior N bars (NOT including current bar)
/// - Lower = lowest low over the prior N bars (NOT including current bar)
///
/// This matches the Turtle convention where a breakout triggers when the
/// current close exceeds the prior N-bar high.
pub fn donchian_channel(bars: &[Bar], lookback: usize) -> Vec<Option<DonchianChannel>> {
    if lookback == 0 {
        return vec![None; bars.len()];
    }

    let mut out = vec![None; bars.len()];

    for (i, out_slot) in out.iter_mut().enumerate() {
        if i < lookback {
            continue;
        }
        let start = i - lookback;
        let (highest, lowest) = bars[start..i].iter().fold(
            (f64::NEG_INFINITY, f64::INFINITY),
            |(h, l), bar| {
                let bh = bar.high.to_f64().unwrap_or(0.0);
                let bl = bar.low.to_f64().unwrap_or(0.0);
                (h.max(bh), l.min(bl))
            },
        );
        *out_slot = Some(DonchianChannel {
            upper: highest,
            lower: lowest,
        });
    }

    out
}

/// Bollinger band values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger bands: SMA ± `std_mult` rolling standard deviations.
pub fn bollinger_bands(bars: &[Bar], window: usize, std_mult: f64) -> Vec<Option<BollingerBands>> {
    let sma = sma_close(bars, window);
    let std = rolling_std_close(bars, window);

    sma.iter()
        .zip(std.iter())
        .map(|(m, s)| match (m, s) {
            (Some(middle), Some(sd)) => Some(BollingerBands {
                upper: middle + std_mult * sd,
                middle: *middle,
                lower: middle - std_mult * sd,
            }),
            _ => None,
        })
        .collect()
}

/// Relative Strength Index with Wilder smoothing.
///
/// The first value appears at index `period` (needs `period + 1` closes).
/// A window with no losses reads 100, no gains reads 0.
pub fn rsi(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if period == 0 || bars.len() <= period {
        return out;
    }

    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    for i in 1..=period {
        let change = close(&bars[i]) - close(&bars[i - 1]);
        if change > 0.0 {
            gain_sum += change;
        } else {
            loss_sum -= change;
        }
    }

    let mut avg_gain = gain_sum / period as f64;
    let mut avg_loss = loss_sum / period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    let alpha = 1.0 / period as f64;
    for i in period + 1..bars.len() {
        let change = close(&bars[i]) - close(&bars[i - 1]);
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = avg_gain * (1.0 - alpha) + gain * alpha;
        avg_loss = avg_loss * (1.0 - alpha) + loss * alpha;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }

    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            return 50.0;
        }
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// Z-score of the close against its rolling mean and standard deviation.
///
/// Reads `None` when the rolling standard deviation is zero (flat window).
pub fn zscore_close(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    let sma = sma_close(bars, window);
    let std = rolling_std_close(bars, window);

    bars.iter()
        .zip(sma.iter().zip(std.iter()))
        .map(|(bar, (m, s))| match (m, s) {
            (Some(mean), Some(sd)) if *sd > 0.0 => Some((close(bar) - mean) / sd),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let ts = chrono::Utc
                    .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                    .unwrap()
                    + chrono::Duration::days(i as i64);
                let c = Decimal::try_from(c).unwrap();
                Bar::new("TEST", 86_400, ts, c, c, c, c, Decimal::ZERO)
            })
            .collect()
    }

    fn bars_from_ohlc(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
        ohlc.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| {
                let ts = chrono::Utc
                    .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                    .unwrap()
                    + chrono::Duration::days(i as i64);
                Bar::new(
                    "TEST",
                    86_400,
                    ts,
                    Decimal::try_from(o).unwrap(),
                    Decimal::try_from(h).unwrap(),
                    Decimal::try_from(l).unwrap(),
                    Decimal::try_from(c).unwrap(),
                    Decimal::ZERO,
                )
            })
            .collect()
    }

    #[test]
    fn sma_window_3_matches_definition() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0]);
        let sma = sma_close(&bars, 3);
        assert_eq!(sma, vec![None, None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn rolling_std_flat_window_is_zero() {
        let bars = bars_from_closes(&[5.0, 5.0, 5.0, 5.0]);
        let std = rolling_std_close(&bars, 3);
        assert_eq!(std[2], Some(0.0));
        assert_eq!(std[3], Some(0.0));
    }

    #[test]
    fn donchian_excludes_current_bar() {
        let ohlc = vec![
            (100.0, 102.0, 98.0, 101.0),
            (101.0, 103.0, 99.0, 102.0),
            (102.0, 104.0, 100.0, 103.0),
            (103.0, 200.0, 50.0, 104.0), // extreme values on the current bar
        ];
        let bars = bars_from_ohlc(&ohlc);
        let dc = donchian_channel(&bars, 2);

        // Index 3 looks at bars 1-2 only; its own extremes are invisible.
        let ch = dc[3].unwrap();
        assert_eq!(ch.upper, 104.0);
        assert_eq!(ch.lower, 99.0);
    }

    #[test]
    fn donchian_warmup_period() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0]);
        let dc = donchian_channel(&bars, 2);
        assert!(dc[0].is_none());
        assert!(dc[1].is_none());
        assert!(dc[2].is_some());
    }

    #[test]
    fn bollinger_bands_symmetric_around_sma() {
        let bars = bars_from_closes(&[10.0, 12.0, 14.0, 12.0, 10.0]);
        let bb = bollinger_bands(&bars, 3, 2.0);
        let b = bb[4].unwrap();
        assert!((b.upper - b.middle - (b.middle - b.lower)).abs() < 1e-12);
    }

    #[test]
    fn rsi_all_gains_reads_100() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let r = rsi(&bars, 3);
        assert!(r[2].is_none());
        assert_eq!(r[3], Some(100.0));
    }

    #[test]
    fn rsi_alternating_is_bounded() {
        let bars = bars_from_closes(&[10.0, 11.0, 10.0, 11.0, 10.0, 11.0, 10.0]);
        let r = rsi(&bars, 3);
        for v in r.iter().flatten() {
            assert!(*v >= 0.0 && *v <= 100.0);
        }
    }

    #[test]
    fn zscore_flat_window_is_none() {
        let bars = bars_from_closes(&[5.0, 5.0, 5.0, 5.0]);
        let z = zscore_close(&bars, 3);
        assert_eq!(z[3], None);
    }

    #[test]
    fn zscore_sign_follows_deviation() {
        let bars = bars_from_closes(&[10.0, 10.0, 10.0, 7.0]);
        let z = zscore_close(&bars, 4);
        assert!(z[3].unwrap() < 0.0);
    }
}
