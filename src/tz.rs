//! The one place local calendar days meet UTC instants.
//!
//! Weekly rules and overrides are times-of-day in a provider's IANA timezone;
//! everything downstream of this module works on UTC `Ms` spans. DST policy:
//! a time-of-day that falls in a spring-forward gap is shifted to the first
//! valid instant after the gap; an ambiguous (fold) time takes the earlier
//! offset.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::model::{Ms, Span, TimeRange, MINUTE_MS};

pub fn parse_tz(name: &str) -> Option<Tz> {
    name.parse::<Tz>().ok()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Parse an RFC 3339 instant ("2026-03-10T09:00:00Z" or with offset) to Ms.
pub fn parse_instant(s: &str) -> Option<Ms> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

/// Parse "HH:MM" as minutes since midnight.
pub fn parse_minutes(s: &str) -> Option<u16> {
    let (h, m) = s.split_once(':')?;
    let h: u16 = h.parse().ok()?;
    let m: u16 = m.parse().ok()?;
    if h > 24 || m > 59 || (h == 24 && m != 0) {
        return None;
    }
    Some(h * 60 + m)
}

pub fn format_minutes(min: u16) -> String {
    format!("{:02}:{:02}", min / 60, min % 60)
}

pub fn format_instant(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Resolve (date, minutes-since-midnight) in `tz` to a UTC instant.
///
/// Gap times (skipped by spring-forward) move forward to the first valid
/// instant; fold times (repeated by fall-back) take the earlier offset. Both
/// choices keep the mapping total and monotonic within a day.
pub fn local_instant(date: NaiveDate, minutes: u16, tz: Tz) -> Ms {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid wall time")
        + Duration::minutes(minutes as i64);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc).timestamp_millis(),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc).timestamp_millis(),
        LocalResult::None => {
            // Inside a DST gap; probe forward in 15-min steps (gaps are ≤ 2h).
            for step in 1..=8 {
                let probe = naive + Duration::minutes(15 * step);
                if let LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) =
                    tz.from_local_datetime(&probe)
                {
                    return dt.with_timezone(&Utc).timestamp_millis();
                }
            }
            // Unreachable for real tzdata; fall back to interpreting as UTC.
            naive.and_utc().timestamp_millis()
        }
    }
}

/// The UTC span covered by one local calendar day in `tz`.
/// 23 hours long on spring-forward days, 25 on fall-back days.
pub fn local_day_span(date: NaiveDate, tz: Tz) -> Span {
    let start = local_instant(date, 0, tz);
    let end = local_instant(date + Duration::days(1), 0, tz);
    Span::new(start, end)
}

/// The local calendar date in `tz` containing a UTC instant.
pub fn local_date_of(ms: Ms, tz: Tz) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&tz).date_naive())
        .unwrap_or_default()
}

/// Day-of-week index used by weekly rules: 0 = Sunday … 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    chrono::Datelike::weekday(&date).num_days_from_sunday() as u8
}

/// Convert a local time-of-day range on a concrete date to a UTC span.
/// Returns None if DST resolution collapses the range to nothing.
pub fn range_on_date(date: NaiveDate, range: &TimeRange, tz: Tz) -> Option<Span> {
    let start = local_instant(date, range.start_min, tz);
    let end = local_instant(date, range.end_min, tz);
    (start < end).then(|| Span::new(start, end))
}

/// Round a UTC instant up to a whole minute. Slot arithmetic is minute-grained.
pub fn ceil_minute(ms: Ms) -> Ms {
    (ms.div_euclid(MINUTE_MS) + (ms.rem_euclid(MINUTE_MS) != 0) as Ms) * MINUTE_MS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;
    use chrono_tz::Europe::Berlin;
    use chrono_tz::UTC;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_minutes("09:30"), Some(570));
        assert_eq!(parse_minutes("24:00"), Some(1440));
        assert_eq!(parse_minutes("24:01"), None);
        assert_eq!(parse_minutes("9"), None);
        assert_eq!(format_minutes(570), "09:30");
        assert!(parse_tz("Europe/Berlin").is_some());
        assert!(parse_tz("Mars/Olympus").is_none());
        assert_eq!(parse_date("2026-03-10"), Some(d(2026, 3, 10)));
        assert_eq!(parse_date("2026-3-10x"), None);
    }

    #[test]
    fn parse_instant_accepts_offsets() {
        let utc = parse_instant("2026-03-10T09:00:00Z").unwrap();
        let offset = parse_instant("2026-03-10T10:00:00+01:00").unwrap();
        assert_eq!(utc, offset);
    }

    #[test]
    fn utc_day_is_24_hours() {
        let span = local_day_span(d(2026, 3, 10), UTC);
        assert_eq!(span.duration_ms(), 24 * 3_600_000);
    }

    #[test]
    fn spring_forward_day_is_23_hours() {
        // Europe/Berlin jumps 02:00 → 03:00 on 2026-03-29.
        let span = local_day_span(d(2026, 3, 29), Berlin);
        assert_eq!(span.duration_ms(), 23 * 3_600_000);
    }

    #[test]
    fn fall_back_day_is_25_hours() {
        // Europe/Berlin repeats 02:00–03:00 on 2026-10-25.
        let span = local_day_span(d(2026, 10, 25), Berlin);
        assert_eq!(span.duration_ms(), 25 * 3_600_000);
    }

    #[test]
    fn gap_time_shifts_forward() {
        // 02:30 does not exist in America/New_York on 2026-03-08.
        let gap = local_instant(d(2026, 3, 8), 150, New_York);
        let three = local_instant(d(2026, 3, 8), 180, New_York);
        assert_eq!(gap, three); // resolved to 03:00 local
    }

    #[test]
    fn fold_time_takes_earlier_offset() {
        // 01:30 happens twice in America/New_York on 2026-11-01.
        let folded = local_instant(d(2026, 11, 1), 90, New_York);
        let midnight = local_instant(d(2026, 11, 1), 0, New_York);
        assert_eq!(folded - midnight, 90 * 60_000); // first occurrence
    }

    #[test]
    fn local_date_round_trip() {
        let date = d(2026, 7, 4);
        let noon = local_instant(date, 720, New_York);
        assert_eq!(local_date_of(noon, New_York), date);
        // Noon in New York is evening in Berlin, still the same date.
        assert_eq!(local_date_of(noon, Berlin), date);
        // 23:00 in New York is already past midnight in Berlin.
        let late = local_instant(date, 23 * 60, New_York);
        assert_eq!(local_date_of(late, Berlin), d(2026, 7, 5));
    }

    #[test]
    fn day_of_week_zero_is_sunday() {
        assert_eq!(day_of_week(d(2026, 3, 8)), 0); // Sunday
        assert_eq!(day_of_week(d(2026, 3, 10)), 2); // Tuesday
        assert_eq!(day_of_week(d(2026, 3, 14)), 6); // Saturday
    }

    #[test]
    fn range_on_date_crosses_offset() {
        // 09:00–17:00 Berlin in January (CET, UTC+1) is 08:00–16:00 UTC.
        let span = range_on_date(d(2026, 1, 15), &TimeRange::new(540, 1020), Berlin).unwrap();
        assert_eq!(span.duration_ms(), 8 * 3_600_000);
        assert_eq!(span.start, parse_instant("2026-01-15T08:00:00Z").unwrap());
    }

    #[test]
    fn range_spanning_spring_forward_shrinks() {
        // 01:00–04:00 on the Berlin spring-forward date covers only 2 real hours.
        let span = range_on_date(d(2026, 3, 29), &TimeRange::new(60, 240), Berlin).unwrap();
        assert_eq!(span.duration_ms(), 2 * 3_600_000);
    }

    #[test]
    fn ceil_minute_rounds_up() {
        assert_eq!(ceil_minute(60_000), 60_000);
        assert_eq!(ceil_minute(60_001), 120_000);
    }
}
