//! Calendar helpers: sortable date codes, day offsets from the epoch and month anchors.
//!
//! Every temporal computation in the crate works on day offsets from [`epoch`]. Week alignment
//! depends on the weekday of that epoch, which is pinned by [`EPOCH_WEEKDAY`] and checked in the
//! tests below so the two cannot drift apart.

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};

use crate::error::{AgeTrendsError, AgeTrendsResult};

pub const EPOCH_YEAR: i32 = 2020;
pub const EPOCH_MONTH: u32 = 1;
pub const EPOCH_DAY: u32 = 1;
/// 2020-01-01 was a Wednesday.
pub const EPOCH_WEEKDAY: Weekday = Weekday::Wed;
/// Year whose month starts are exposed by [`month_boundaries`].
pub const REFERENCE_YEAR: i32 = 2020;
/// Offset given to rows whose date cannot be parsed.
pub const SENTINEL_OFFSET: i64 = -1;

/// Date format of the raw harmonised input.
pub const INPUT_DATE_FORMAT: &str = "%d/%m/%Y";
/// Date format used for chart labels.
pub const LABEL_DATE_FORMAT: &str = "%Y/%m/%d";

pub fn epoch() -> NaiveDate {
    // Unwrap: constant, valid calendar date
    NaiveDate::from_ymd_opt(EPOCH_YEAR, EPOCH_MONTH, EPOCH_DAY).unwrap()
}

/// Parse a `DD/MM/YYYY` date.
pub fn parse_date(value: &str) -> AgeTrendsResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), INPUT_DATE_FORMAT)
        .map_err(|_| AgeTrendsError::InvalidDate(value.to_string()))
}

/// `YYYYMMDD` as an integer. Ordering of codes matches chronological ordering.
pub fn to_date_code(date: NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

pub fn from_date_code(code: i64) -> Option<NaiveDate> {
    let year = i32::try_from(code / 10_000).ok()?;
    let month = u32::try_from(code / 100 % 100).ok()?;
    let day = u32::try_from(code % 100).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Signed number of days between the epoch and `date`.
pub fn days_since_epoch(date: NaiveDate) -> i64 {
    (date - epoch()).num_days()
}

/// Day offset of a `DD/MM/YYYY` string.
pub fn day_offset(value: &str) -> AgeTrendsResult<i64> {
    parse_date(value).map(days_since_epoch)
}

/// Same as [`day_offset`] but malformed dates map to [`SENTINEL_OFFSET`].
pub fn day_offset_or_sentinel(value: &str) -> i64 {
    day_offset(value).unwrap_or(SENTINEL_OFFSET)
}

pub fn date_from_offset(offset: i64) -> NaiveDate {
    epoch() + Duration::days(offset)
}

pub fn date_code_from_offset(offset: i64) -> i64 {
    to_date_code(date_from_offset(offset))
}

/// `YYYY/MM/DD` label of a date code, or `None` if the code is not a calendar date.
pub fn date_label(code: i64) -> Option<String> {
    from_date_code(code).map(label_date_string)
}

pub fn input_date_string(date: NaiveDate) -> String {
    date.format(INPUT_DATE_FORMAT).to_string()
}

pub fn label_date_string(date: NaiveDate) -> String {
    date.format(LABEL_DATE_FORMAT).to_string()
}

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub fn weekday_of(offset: i64) -> Weekday {
    let from_monday = (EPOCH_WEEKDAY.num_days_from_monday() as i64 + offset).rem_euclid(7);
    WEEK[from_monday as usize]
}

/// First offset on or after `offset` that falls on `weekday`.
pub fn first_weekday_on_or_after(offset: i64, weekday: Weekday) -> i64 {
    let current = weekday_of(offset).num_days_from_monday() as i64;
    offset + (weekday.num_days_from_monday() as i64 - current).rem_euclid(7)
}

/// Day offsets of the first day of each month of [`REFERENCE_YEAR`].
pub fn month_boundaries() -> [i64; 12] {
    let mut boundaries = [0; 12];
    for (idx, month) in (1..=12).enumerate() {
        // Unwrap: first day of a month always exists
        let first = NaiveDate::from_ymd_opt(REFERENCE_YEAR, month, 1).unwrap();
        boundaries[idx] = days_since_epoch(first);
    }
    boundaries
}

/// Inclusive `(first, last)` offsets of every calendar month lying entirely within
/// `[start, end]`.
pub fn month_windows(start: i64, end: i64) -> Vec<(i64, i64)> {
    let mut windows = vec![];
    if end < start {
        return windows;
    }
    let start_date = date_from_offset(start);
    let mut first = if start_date.day() == 1 {
        Some(start_date)
    } else {
        start_date
            .with_day(1)
            .and_then(|d| d.checked_add_months(Months::new(1)))
    };
    while let Some(first_of_month) = first {
        let Some(next) = first_of_month.checked_add_months(Months::new(1)) else {
            break;
        };
        let last = days_since_epoch(next) - 1;
        if last > end {
            break;
        }
        windows.push((days_since_epoch(first_of_month), last));
        first = Some(next);
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_weekday_matches_calendar() {
        assert_eq!(epoch().weekday(), EPOCH_WEEKDAY);
        assert_eq!(weekday_of(0), Weekday::Wed);
        assert_eq!(weekday_of(5), Weekday::Mon);
        assert_eq!(weekday_of(-1), Weekday::Tue);
    }

    #[test]
    fn day_offsets_of_input_dates() -> anyhow::Result<()> {
        assert_eq!(day_offset("01/01/2020")?, 0);
        assert_eq!(day_offset("06/01/2020")?, 5);
        assert_eq!(day_offset("01/03/2020")?, 60);
        assert_eq!(day_offset("31/12/2019")?, -1);
        assert_eq!(day_offset("01/01/2021")?, 366);
        Ok(())
    }

    #[test]
    fn malformed_dates_fail_or_degrade_to_sentinel() {
        assert!(matches!(
            day_offset("2020-01-01"),
            Err(AgeTrendsError::InvalidDate(_))
        ));
        assert!(day_offset("31/02/2020").is_err());
        assert_eq!(day_offset_or_sentinel("not a date"), SENTINEL_OFFSET);
        assert_eq!(day_offset_or_sentinel(""), SENTINEL_OFFSET);
    }

    #[test]
    fn date_codes_sort_like_dates() -> anyhow::Result<()> {
        let dates = ["28/02/2020", "29/02/2020", "01/03/2020", "31/12/2020", "01/01/2021"];
        let codes: Vec<i64> = dates
            .iter()
            .map(|d| parse_date(d).map(to_date_code))
            .collect::<Result<_, _>>()?;
        assert_eq!(codes[0], 20200228);
        assert!(codes.windows(2).all(|w| w[0] < w[1]));

        let offsets: Vec<i64> = dates.iter().map(|d| day_offset(d)).collect::<Result<_, _>>()?;
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        Ok(())
    }

    #[test]
    fn date_code_round_trips_through_offsets() {
        assert_eq!(date_code_from_offset(0), 20200101);
        assert_eq!(date_code_from_offset(59), 20200229);
        assert_eq!(from_date_code(20200229), NaiveDate::from_ymd_opt(2020, 2, 29));
        assert_eq!(from_date_code(20200230), None);
        assert_eq!(date_label(20200305).as_deref(), Some("2020/03/05"));
    }

    #[test]
    fn first_monday_alignment() {
        // 2020-01-06 (offset 5) is the first Monday after the epoch
        assert_eq!(first_weekday_on_or_after(0, Weekday::Mon), 5);
        assert_eq!(first_weekday_on_or_after(5, Weekday::Mon), 5);
        assert_eq!(first_weekday_on_or_after(6, Weekday::Mon), 12);
        assert_eq!(first_weekday_on_or_after(-3, Weekday::Mon), -2);
    }

    #[test]
    fn reference_year_month_boundaries() {
        assert_eq!(
            month_boundaries(),
            [0, 31, 60, 91, 121, 152, 182, 213, 244, 274, 305, 335]
        );
    }

    #[test]
    fn month_windows_stay_inside_calendar_months() {
        let windows = month_windows(10, 400);
        // February 2020 is the first complete month after 2020-01-11
        assert_eq!(windows.first(), Some(&(31, 59)));
        for (first, last) in &windows {
            assert_eq!(date_from_offset(*first).day(), 1);
            assert_eq!(date_from_offset(*first).month(), date_from_offset(*last).month());
            assert_eq!(date_from_offset(*last + 1).day(), 1);
        }
        // January 2021 ends at offset 396, February 2021 would end at 424
        assert_eq!(windows.last(), Some(&(366, 396)));
        assert!(month_windows(31, 58).is_empty());
        assert_eq!(month_windows(0, 30), vec![(0, 30)]);
    }
}
