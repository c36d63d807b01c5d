//! Subscription window arithmetic.
//!
//! Windows start at the beginning of a day and end at the end of one, so a
//! subscription bought and expiring "today" is still active for the whole
//! calendar day.

use time::macros::time;
use time::{Date, Month, OffsetDateTime};

/// 00:00:00 of the same UTC day.
pub fn start_of_day(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_time(time!(00:00:00))
}

/// 23:59:59 of the same UTC day.
pub fn end_of_day(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_time(time!(23:59:59))
}

/// Calendar-month addition with day clamping (Jan 31 + 1 month = Feb 28/29).
pub fn add_months(at: OffsetDateTime, months: i32) -> OffsetDateTime {
    let date = at.date();
    let total = date.month() as i32 - 1 + months;
    let year = date.year() + total.div_euclid(12);
    let month_index = total.rem_euclid(12) + 1;
    // month_index is always 1..=12 after rem_euclid.
    let month = Month::try_from(month_index as u8).unwrap_or(Month::January);

    let day = date.day().min(days_in_month(year, month));
    match Date::from_calendar_date(year, month, day) {
        Ok(new_date) => at.replace_date(new_date),
        Err(_) => at,
    }
}

fn days_in_month(year: i32, month: Month) -> u8 {
    match month {
        Month::January
        | Month::March
        | Month::May
        | Month::July
        | Month::August
        | Month::October
        | Month::December => 31,
        Month::April | Month::June | Month::September | Month::November => 30,
        Month::February => {
            if time::util::is_leap_year(year) {
                29
            } else {
                28
            }
        }
    }
}

/// Fractional days between `now` and `until`; never negative.
pub fn days_remaining(now: OffsetDateTime, until: OffsetDateTime) -> f64 {
    ((until - now).as_seconds_f64() / 86_400.0).max(0.0)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use time::macros::datetime;

    #[test]
    fn month_addition_rolls_over_years() {
        let at = datetime!(2024-11-15 10:30:00 UTC);
        assert_eq!(add_months(at, 3).date(), datetime!(2025-02-15 0:00 UTC).date());
    }

    #[test]
    fn month_addition_clamps_short_months() {
        let at = datetime!(2024-01-31 12:00:00 UTC);
        assert_eq!(add_months(at, 1).date(), datetime!(2024-02-29 0:00 UTC).date());

        let at = datetime!(2023-01-31 12:00:00 UTC);
        assert_eq!(add_months(at, 1).date(), datetime!(2023-02-28 0:00 UTC).date());
    }

    #[test]
    fn day_alignment() {
        let at = datetime!(2024-06-10 13:45:12 UTC);
        assert_eq!(start_of_day(at), datetime!(2024-06-10 00:00:00 UTC));
        assert_eq!(end_of_day(at), datetime!(2024-06-10 23:59:59 UTC));
    }

    #[test]
    fn days_remaining_is_fractional_and_clamped() {
        let now = datetime!(2024-06-10 00:00:00 UTC);
        let until = datetime!(2024-06-20 12:00:00 UTC);
        assert!((days_remaining(now, until) - 10.5).abs() < 1e-9);
        assert_eq!(days_remaining(until, now), 0.0);
    }
}
