//! Bar (OHLCV) data types.

use crate::error::{QuantLabError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLCV bar for one (instrument, timeframe).
///
/// `ts` is the bar's *open* time; the bar is considered closed (and visible
/// to strategies) only at [`Bar::t_close`]. Prices and volume are exact
/// decimals so the downstream accounting identities hold without epsilon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Instrument symbol (see [`crate::instrument::Instrument`]).
    pub symbol: String,

    /// Bucket width in seconds (60, 900, 3600, 86400, ...).
    pub timeframe_secs: u32,

    /// Open timestamp (start of bar period, UTC).
    pub ts: DateTime<Utc>,

    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    /// Create a new bar with all fields.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        timeframe_secs: u32,
        ts: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe_secs,
            ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Close timestamp: `ts + timeframe`.
    pub fn t_close(&self) -> DateTime<Utc> {
        self.ts + Duration::seconds(self.timeframe_secs as i64)
    }

    /// Check the OHLCV invariants: `l ≤ min(o,c)`, `h ≥ max(o,c)`, `l ≤ h`,
    /// `v ≥ 0`, and a non-zero timeframe.
    pub fn validate(&self) -> Result<()> {
        let fail = |detail: &str| {
            Err(QuantLabError::MalformedBar {
                symbol: self.symbol.clone(),
                ts: self.ts,
                detail: detail.to_string(),
            })
        };

        if self.timeframe_secs == 0 {
            return fail("timeframe_secs must be > 0");
        }
        if self.low > self.open.min(self.close) {
            return fail("low above min(open, close)");
        }
        if self.high < self.open.max(self.close) {
            return fail("high below max(open, close)");
        }
        if self.low > self.high {
            return fail("low above high");
        }
        if self.volume < Decimal::ZERO {
            return fail("negative volume");
        }
        Ok(())
    }

    /// Stream key: the (symbol, timeframe) pair this bar belongs to.
    pub fn stream_key(&self) -> (String, u32) {
        (self.symbol.clone(), self.timeframe_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn sample_bar() -> Bar {
        Bar::new(
            "binance:BTC/USDT",
            86_400,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            dec!(100),
            dec!(105),
            dec!(99),
            dec!(103),
            dec!(1000),
        )
    }

    #[test]
    fn t_close_is_open_plus_timeframe() {
        let bar = sample_bar();
        assert_eq!(
            bar.t_close(),
            Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn valid_bar_passes() {
        assert!(sample_bar().validate().is_ok());
    }

    #[test]
    fn low_above_close_is_malformed() {
        let mut bar = sample_bar();
        bar.low = dec!(104);
        assert!(matches!(
            bar.validate(),
            Err(QuantLabError::MalformedBar { .. })
        ));
    }

    #[test]
    fn negative_volume_is_malformed() {
        let mut bar = sample_bar();
        bar.volume = dec!(-1);
        assert!(bar.validate().is_err());
    }
}
