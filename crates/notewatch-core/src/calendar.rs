//! Server reset calendar. All resets happen at 04:00 server time.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc};

pub const SERVER_RESET_HOUR: u32 = 4;

/// Server-local wall time `naive` in `offset`, as a UTC instant.
/// `None` when the shifted instant falls outside the representable range.
pub fn server_time_to_utc(naive: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    naive
        .checked_sub_signed(Duration::seconds(i64::from(offset.local_minus_utc())))
        .map(|utc| DateTime::from_naive_utc_and_offset(utc, Utc))
}

/// The game day `at` falls in. Days roll over at the daily reset, not at
/// midnight.
pub fn server_day(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    let local = at.with_timezone(&offset).naive_local();
    (local - Duration::hours(i64::from(SERVER_RESET_HOUR))).date()
}

fn reset_on(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let naive = date
        .and_hms_opt(SERVER_RESET_HOUR, 0, 0)
        .expect("reset hour is a valid time of day");
    server_time_to_utc(naive, offset).expect("reset dates are near the current time")
}

/// Next weekly reset (Monday 04:00 server time) strictly after `after`.
pub fn next_weekly_reset(after: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let today = after.with_timezone(&offset).date_naive();
    let until_monday = (7 - today.weekday().num_days_from_monday()) % 7;
    let candidate = reset_on(today + Duration::days(i64::from(until_monday)), offset);
    if candidate > after {
        candidate
    } else {
        candidate + Duration::days(7)
    }
}

/// Next abyss reset (1st and 16th of the month, 04:00 server time) strictly
/// after `after`.
pub fn next_abyss_reset(after: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let today = after.with_timezone(&offset).date_naive();
    let (year, month) = (today.year(), today.month());
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };

    [(year, month, 1), (year, month, 16), (next_year, next_month, 1)]
        .into_iter()
        .map(|(y, m, d)| {
            let date = NaiveDate::from_ymd_opt(y, m, d).expect("day 1 and 16 exist in every month");
            reset_on(date, offset)
        })
        .find(|reset| *reset > after)
        .expect("the first of next month is always after `after`")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn na() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    #[test]
    fn weekly_reset_is_next_monday_morning() {
        // Wednesday 2024-01-03 12:00 server time.
        let at = Utc.with_ymd_and_hms(2024, 1, 3, 17, 0, 0).unwrap();
        let reset = next_weekly_reset(at, na());
        assert_eq!(reset, Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap());
    }

    #[test]
    fn weekly_reset_on_monday_before_and_after_four() {
        // Monday 2024-01-08 03:00 server time -> same morning.
        let early = Utc.with_ymd_and_hms(2024, 1, 8, 8, 0, 0).unwrap();
        assert_eq!(
            next_weekly_reset(early, na()),
            Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap()
        );
        // Exactly at the reset -> one week later.
        let at_reset = Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap();
        assert_eq!(
            next_weekly_reset(at_reset, na()),
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn abyss_reset_rolls_over_year_end() {
        let mid_month = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(
            next_abyss_reset(mid_month, na()),
            Utc.with_ymd_and_hms(2024, 3, 16, 9, 0, 0).unwrap()
        );

        let late_december = Utc.with_ymd_and_hms(2024, 12, 20, 0, 0, 0).unwrap();
        assert_eq!(
            next_abyss_reset(late_december, na()),
            Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn server_day_rolls_over_at_reset_hour() {
        let before = Utc.with_ymd_and_hms(2024, 1, 2, 8, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        assert_eq!(server_day(before, na()), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(server_day(after, na()), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }
}
