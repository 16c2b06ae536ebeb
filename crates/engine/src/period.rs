//! Date-range chunking.
//!
//! [`split`] divides an inclusive day range into ordered, contiguous,
//! non-overlapping chunks of at most `max_days` days each. Instants are
//! normalized to whole UTC days first, so a chunk always spans
//! `00:00:00.000` of its first day to `23:59:59.999` of its last.

use serde::Serialize;
use time::macros::{format_description, time};
use time::{Date, Duration, OffsetDateTime};

use crate::error::EngineError;

/// Chunk length for read-only scans over stored rates.
pub const AUDIT_CHUNK_DAYS: u32 = 31;
/// Chunk length for declaration ingestion (one GUID-list call per chunk).
pub const INGEST_CHUNK_DAYS: u32 = 7;
/// Rates are fetched one day per external call.
pub const RATE_CHUNK_DAYS: u32 = 1;

/// An inclusive, day-aligned range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub start: Date,
    pub end: Date,
}

impl Period {
    /// Build a period, swapping the endpoints if they are reversed.
    pub fn new(a: Date, b: Date) -> Self {
        if a <= b {
            Period { start: a, end: b }
        } else {
            Period { start: b, end: a }
        }
    }

    pub fn day_count(&self) -> i64 {
        (self.end - self.start).whole_days() + 1
    }

    /// First instant of the period: `00:00:00.000` UTC on `start`.
    pub fn start_at(&self) -> OffsetDateTime {
        self.start.midnight().assume_utc()
    }

    /// Last instant of the period: `23:59:59.999` UTC on `end`.
    pub fn end_at(&self) -> OffsetDateTime {
        self.end.with_time(time!(23:59:59.999)).assume_utc()
    }

    pub fn contains(&self, day: Date) -> bool {
        self.start <= day && day <= self.end
    }

    /// Every calendar day of the period, ascending.
    pub fn days(&self) -> Vec<Date> {
        let mut out = Vec::with_capacity(self.day_count().max(0) as usize);
        let mut day = self.start;
        loop {
            out.push(day);
            if day >= self.end {
                break;
            }
            match day.next_day() {
                Some(next) => day = next,
                None => break,
            }
        }
        out
    }
}

/// Split `[start, end]` into chunks of at most `max_days` days.
///
/// Reversed endpoints are swapped. `max_days == 0` behaves as `1`.
pub fn split(start: Date, end: Date, max_days: u32) -> Vec<Period> {
    let range = Period::new(start, end);
    let span = Duration::days(i64::from(max_days.max(1)) - 1);

    let mut chunks = Vec::new();
    let mut cursor = range.start;
    loop {
        let chunk_end = cursor
            .checked_add(span)
            .map_or(range.end, |d| d.min(range.end));
        chunks.push(Period {
            start: cursor,
            end: chunk_end,
        });
        if chunk_end >= range.end {
            break;
        }
        match chunk_end.next_day() {
            Some(next) => cursor = next,
            None => break,
        }
    }
    chunks
}

/// [`split`] over instants, each normalized to its UTC calendar day.
pub fn split_instants(start: OffsetDateTime, end: OffsetDateTime, max_days: u32) -> Vec<Period> {
    split(utc_day(start), utc_day(end), max_days)
}

/// Every calendar day in `[start, end]` (endpoints swapped if reversed).
pub fn days(start: Date, end: Date) -> Vec<Date> {
    Period::new(start, end).days()
}

pub fn utc_day(t: OffsetDateTime) -> Date {
    t.to_offset(time::UtcOffset::UTC).date()
}

/// The date `years` calendar years before `day`. Feb 29 maps to Feb 28.
pub fn years_before(day: Date, years: u32) -> Date {
    let year = day.year() - years as i32;
    day.replace_year(year)
        .or_else(|_| {
            day.replace_day(28)
                .and_then(|d| d.replace_year(year))
        })
        .unwrap_or(Date::MIN)
}

/// Parse a wire date, `YYYY-MM-DD`.
pub fn parse_day(s: &str) -> Result<Date, EngineError> {
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|e| EngineError::InvalidInput(format!("invalid date '{s}': {e}")))
}

/// Format a wire date, `YYYY-MM-DD`.
pub fn format_day(day: Date) -> String {
    day.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| day.to_string())
}

/// The 8-digit `YYYYMMDD` form used by the rate source.
pub fn compact_day(day: Date) -> String {
    day.format(format_description!("[year][month][day]"))
        .unwrap_or_else(|_| day.to_string())
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::{date, datetime};

    #[test]
    fn ten_days_by_seven() {
        let chunks = split(date!(2023 - 01 - 01), date!(2023 - 01 - 10), 7);
        assert_eq!(
            chunks,
            vec![
                Period {
                    start: date!(2023 - 01 - 01),
                    end: date!(2023 - 01 - 07)
                },
                Period {
                    start: date!(2023 - 01 - 08),
                    end: date!(2023 - 01 - 10)
                },
            ]
        );
    }

    #[test]
    fn single_day_range_is_one_chunk() {
        let chunks = split(date!(2024 - 02 - 29), date!(2024 - 02 - 29), 31);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].day_count(), 1);
    }

    #[test]
    fn zero_max_days_behaves_as_one() {
        let chunks = split(date!(2023 - 01 - 01), date!(2023 - 01 - 03), 0);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.start == c.end));
    }

    #[test]
    fn reversed_endpoints_are_swapped() {
        assert_eq!(
            split(date!(2023 - 01 - 10), date!(2023 - 01 - 01), 7),
            split(date!(2023 - 01 - 01), date!(2023 - 01 - 10), 7)
        );
    }

    #[test]
    fn partial_day_instants_are_normalized() {
        let chunks = split_instants(
            datetime!(2023-01-01 17:45:00 UTC),
            datetime!(2023-01-02 03:00:00 UTC),
            1,
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_at(), datetime!(2023-01-01 00:00:00 UTC));
        assert_eq!(chunks[1].end_at(), datetime!(2023-01-02 23:59:59.999 UTC));
    }

    #[test]
    fn days_lists_every_date() {
        let all = days(date!(2023 - 12 - 30), date!(2024 - 01 - 02));
        assert_eq!(
            all,
            vec![
                date!(2023 - 12 - 30),
                date!(2023 - 12 - 31),
                date!(2024 - 01 - 01),
                date!(2024 - 01 - 02)
            ]
        );
    }

    #[test]
    fn years_before_handles_leap_day() {
        assert_eq!(years_before(date!(2024 - 02 - 29), 1), date!(2023 - 02 - 28));
        assert_eq!(years_before(date!(2025 - 06 - 15), 5), date!(2020 - 06 - 15));
    }

    #[test]
    fn wire_dates_parse_and_format() {
        assert_eq!(parse_day("2023-01-09").unwrap(), date!(2023 - 01 - 09));
        assert_eq!(format_day(date!(2023 - 01 - 09)), "2023-01-09");
        assert_eq!(compact_day(date!(2023 - 01 - 09)), "20230109");
        assert!(matches!(
            parse_day("09.01.2023"),
            Err(EngineError::InvalidInput(_))
        ));
    }

    fn any_date() -> impl Strategy<Value = Date> {
        // Roughly 1990 through 2060.
        (2_447_893i32..=2_473_824).prop_map(|j| Date::from_julian_day(j).unwrap())
    }

    proptest! {
        #[test]
        fn chunks_cover_range_exactly(a in any_date(), len in 0i64..1500, m in 1u32..60) {
            let b = a.checked_add(Duration::days(len)).unwrap();
            let chunks = split(a, b, m);

            prop_assert_eq!(chunks.first().unwrap().start, a);
            prop_assert_eq!(chunks.last().unwrap().end, b);
            for c in &chunks {
                prop_assert!(c.start <= c.end);
                prop_assert!(c.day_count() <= i64::from(m));
            }
            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[0].end.next_day().unwrap(), pair[1].start);
            }
            let covered: i64 = chunks.iter().map(Period::day_count).sum();
            prop_assert_eq!(covered, len + 1);
            // Only the last chunk may be short.
            for c in &chunks[..chunks.len() - 1] {
                prop_assert_eq!(c.day_count(), i64::from(m));
            }
        }

        #[test]
        fn split_is_symmetric_under_swap(a in any_date(), b in any_date(), m in 1u32..40) {
            prop_assert_eq!(split(a, b, m), split(b, a, m));
        }
    }
}
