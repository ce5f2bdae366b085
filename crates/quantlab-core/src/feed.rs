//! History feed: merge per-(instrument, timeframe) bar streams into one
//! globally chronological tick sequence.
//!
//! Ties at the same open time break deterministically on
//! `(t_open, timeframe_secs ascending, symbol ascending)`, which fixes the
//! engine's processing order and hence the whole run.

use crate::bar::Bar;
use crate::error::{QuantLabError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// What to do when a bar is missing from an expected grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Record and continue. The default.
    #[default]
    Skip,
    /// Abort the run with [`QuantLabError::DataGap`]. For conformance tests.
    Abort,
}

/// A detected hole in a stream's time grid. Never silently filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapEvent {
    pub symbol: String,
    pub timeframe_secs: u32,
    /// First missing open time.
    pub expected: DateTime<Utc>,
    /// Open time of the bar actually found.
    pub found: DateTime<Utc>,
}

/// Validated, chronologically merged bar stream.
#[derive(Debug, Clone)]
pub struct HistoryFeed {
    bars: Vec<Bar>,
    gaps: Vec<GapEvent>,
}

impl HistoryFeed {
    /// Validate and merge a set of per-(symbol, timeframe) streams.
    ///
    /// Each stream must be homogeneous in its key, strictly ascending in
    /// `ts`, and OHLC-valid; violations are fatal [`QuantLabError::MalformedBar`].
    /// Grid holes are recorded as [`GapEvent`]s for the engine's gap policy.
    pub fn new(streams: Vec<Vec<Bar>>) -> Result<Self> {
        let mut bars: Vec<Bar> = Vec::new();
        let mut gaps: Vec<GapEvent> = Vec::new();

        for stream in &streams {
            let Some(first) = stream.first() else {
                continue;
            };
            let key = first.stream_key();

            for (i, bar) in stream.iter().enumerate() {
                bar.validate()?;
                if bar.stream_key() != key {
                    return Err(QuantLabError::MalformedBar {
                        symbol: bar.symbol.clone(),
                        ts: bar.ts,
                        detail: format!(
                            "stream for {}/{}s contains a foreign bar",
                            key.0, key.1
                        ),
                    });
                }
                if i > 0 {
                    let prev = &stream[i - 1];
                    if bar.ts <= prev.ts {
                        return Err(QuantLabError::MalformedBar {
                            symbol: bar.symbol.clone(),
                            ts: bar.ts,
                            detail: "timestamps not strictly ascending".into(),
                        });
                    }
                    let expected = prev.ts + Duration::seconds(prev.timeframe_secs as i64);
                    if bar.ts != expected {
                        gaps.push(GapEvent {
                            symbol: bar.symbol.clone(),
                            timeframe_secs: bar.timeframe_secs,
                            expected,
                            found: bar.ts,
                        });
                    }
                }
            }
            bars.extend(stream.iter().cloned());
        }

        bars.sort_by(|a, b| {
            (a.ts, a.timeframe_secs, &a.symbol).cmp(&(b.ts, b.timeframe_secs, &b.symbol))
        });
        gaps.sort_by(|a, b| {
            (a.expected, a.timeframe_secs, &a.symbol).cmp(&(b.expected, b.timeframe_secs, &b.symbol))
        });

        Ok(Self { bars, gaps })
    }

    /// Merged bars, in global tick order.
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Detected grid holes, in time order.
    pub fn gaps(&self) -> &[GapEvent] {
        &self.gaps
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn bar(symbol: &str, timeframe_secs: u32, day: u32, hour: u32) -> Bar {
        Bar::new(
            symbol,
            timeframe_secs,
            Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap(),
            dec!(100),
            dec!(100),
            dec!(100),
            dec!(100),
            Decimal::ZERO,
        )
    }

    #[test]
    fn merge_orders_by_time_then_timeframe_then_symbol() {
        let daily_a = vec![bar("AAA", 86_400, 1, 0), bar("AAA", 86_400, 2, 0)];
        let daily_b = vec![bar("BBB", 86_400, 1, 0), bar("BBB", 86_400, 2, 0)];
        let hourly_a = vec![bar("AAA", 3_600, 1, 0), bar("AAA", 3_600, 1, 1)];

        let feed = HistoryFeed::new(vec![daily_b, daily_a, hourly_a]).unwrap();
        let keys: Vec<(String, u32)> = feed.bars().iter().map(|b| b.stream_key()).collect();
        assert_eq!(
            keys,
            vec![
                ("AAA".to_string(), 3_600),  // smallest timeframe first at t0
                ("AAA".to_string(), 86_400), // then symbol order
                ("BBB".to_string(), 86_400),
                ("AAA".to_string(), 3_600), // 01:00
                ("AAA".to_string(), 86_400),
                ("BBB".to_string(), 86_400),
            ]
        );
    }

    #[test]
    fn gap_in_grid_is_reported_not_filled() {
        let stream = vec![bar("AAA", 86_400, 1, 0), bar("AAA", 86_400, 3, 0)];
        let feed = HistoryFeed::new(vec![stream]).unwrap();

        assert_eq!(feed.len(), 2);
        assert_eq!(feed.gaps().len(), 1);
        assert_eq!(
            feed.gaps()[0].expected,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn duplicate_timestamp_is_malformed() {
        let stream = vec![bar("AAA", 86_400, 1, 0), bar("AAA", 86_400, 1, 0)];
        assert!(matches!(
            HistoryFeed::new(vec![stream]),
            Err(QuantLabError::MalformedBar { .. })
        ));
    }

    #[test]
    fn foreign_bar_in_stream_is_malformed() {
        let stream = vec![bar("AAA", 86_400, 1, 0), bar("BBB", 86_400, 2, 0)];
        assert!(HistoryFeed::new(vec![stream]).is_err());
    }

    #[test]
    fn empty_streams_are_fine() {
        let feed = HistoryFeed::new(vec![vec![], vec![]]).unwrap();
        assert!(feed.is_empty());
    }
}
