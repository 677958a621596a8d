//! Timeframe parsing and candle-close alignment
//!
//! `BotConfig::time` is a free-form string like `"1m"`, `"5m"`, `"4h"`,
//! `"1d"` (spec §3). `ON_CANDLE_CLOSE` scheduling (spec §4.6) needs to turn
//! that string into a `Duration` and align the next wakeup to the next
//! candle boundary since the Unix epoch, the same convention exchanges use
//! for kline buckets.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Parse a timeframe string (`"1m"`, `"5m"`, `"1h"`, `"4h"`, `"1d"`) into a
/// `Duration`. Returns `None` for anything unrecognized.
pub fn parse(timeframe: &str) -> Option<Duration> {
    let timeframe = timeframe.trim();
    let split_at = timeframe.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = timeframe.split_at(split_at);
    let n: u64 = digits.parse().ok()?;
    if n == 0 {
        return None;
    }
    let seconds = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86_400,
        "w" => n * 604_800,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

/// The next candle boundary strictly after `now`, aligned to the Unix epoch
/// (spec §4.6: "align to the next close of the bot's `time` timeframe, e.g. a
/// 5-minute boundary").
pub fn next_boundary(now: DateTime<Utc>, timeframe: Duration) -> DateTime<Utc> {
    let period_secs = timeframe.as_secs().max(1) as i64;
    let now_secs = now.timestamp();
    let next_secs = ((now_secs / period_secs) + 1) * period_secs;
    DateTime::from_timestamp(next_secs, 0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_common_timeframes() {
        assert_eq!(parse("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse("4h"), Some(Duration::from_secs(14_400)));
        assert_eq!(parse("1d"), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("m5"), None);
        assert_eq!(parse("0m"), None);
        assert_eq!(parse("5x"), None);
    }

    #[test]
    fn aligns_to_next_five_minute_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 2, 30).unwrap();
        let next = next_boundary(now, Duration::from_secs(300));
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn boundary_is_strictly_after_now_even_on_exact_match() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap();
        let next = next_boundary(now, Duration::from_secs(300));
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 10, 10, 0).unwrap());
    }
}
