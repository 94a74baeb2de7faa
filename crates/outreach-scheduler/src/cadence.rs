//! Cadence resolution — when does a task fire next?
//!
//! Pure computation over (cadence, start time, reference time) in one
//! fixed, explicit UTC offset. The runtime owns the only write path for
//! the result; everything else treats next-run as derived data.
//!
//! A reference exactly on the slot counts as due: "at/after" is
//! inclusive, so a task created at its own start instant fires the same
//! day instead of silently rolling forward.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike, Utc,
};
use outreach_core::types::Cadence;

/// Compute the next fire time at/after `reference`, or None when the
/// cadence has no future automatic firing (`once` in the past,
/// `custom`, or a monthly slot that does not exist this month or next).
pub fn compute_next_run(
    cadence: &Cadence,
    start_time: DateTime<Utc>,
    reference: DateTime<Utc>,
    tz: FixedOffset,
) -> Option<DateTime<Utc>> {
    match cadence {
        Cadence::Once => (start_time >= reference).then_some(start_time),
        Cadence::Daily => Some(next_daily(start_time, reference, tz)),
        Cadence::Weekly { weekdays } => next_weekly(weekdays, start_time, reference, tz),
        Cadence::Monthly { day_of_month } => {
            next_monthly(*day_of_month, start_time, reference, tz)
        }
        // Custom cadences bring their own trigger; there is nothing to
        // display or bind here.
        Cadence::Custom => None,
    }
}

/// The daily hour:minute slot a recurring task fires at, taken from its
/// start time as seen in the schedule offset.
fn slot_time(start_time: DateTime<Utc>, tz: FixedOffset) -> NaiveTime {
    let local = start_time.with_timezone(&tz);
    NaiveTime::from_hms_opt(local.hour(), local.minute(), 0)
        .unwrap_or_else(|| local.time())
}

/// Place a local calendar date + slot onto the fixed offset. Always
/// unambiguous for a FixedOffset.
fn at_slot(date: NaiveDate, slot: NaiveTime, tz: FixedOffset) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(slot))
        .single()
        .map(|d| d.with_timezone(&Utc))
}

fn next_daily(start_time: DateTime<Utc>, reference: DateTime<Utc>, tz: FixedOffset) -> DateTime<Utc> {
    let slot = slot_time(start_time, tz);
    let local_ref = reference.with_timezone(&tz);
    let today = local_ref.date_naive();
    match at_slot(today, slot, tz) {
        Some(candidate) if candidate >= reference => candidate,
        _ => at_slot(today + Duration::days(1), slot, tz)
            .unwrap_or(reference + Duration::days(1)),
    }
}

fn next_weekly(
    weekdays: &[u8],
    start_time: DateTime<Utc>,
    reference: DateTime<Utc>,
    tz: FixedOffset,
) -> Option<DateTime<Utc>> {
    let mut days: Vec<u8> = weekdays.iter().copied().filter(|d| *d <= 6).collect();
    if days.is_empty() {
        return None;
    }
    days.sort_unstable();
    days.dedup();

    let slot = slot_time(start_time, tz);
    let local_ref = reference.with_timezone(&tz);
    let today = local_ref.date_naive();
    let current = local_ref.weekday().num_days_from_monday() as u8;

    for &day in &days {
        if day < current {
            continue;
        }
        let candidate_date = today + Duration::days((day - current) as i64);
        if let Some(candidate) = at_slot(candidate_date, slot, tz) {
            if candidate >= reference {
                return Some(candidate);
            }
        }
        // Today's slot already passed; keep looking later this week.
    }

    // Nothing left this week: wrap to the earliest configured weekday.
    let first = days[0];
    let days_ahead = (7 - current + first) as i64;
    at_slot(today + Duration::days(days_ahead), slot, tz)
}

fn next_monthly(
    day_of_month: u32,
    start_time: DateTime<Utc>,
    reference: DateTime<Utc>,
    tz: FixedOffset,
) -> Option<DateTime<Utc>> {
    let slot = slot_time(start_time, tz);
    let local_ref = reference.with_timezone(&tz);
    let (year, month) = (local_ref.year(), local_ref.month());

    // This month, if the day exists and is still ahead.
    if let Some(date) = NaiveDate::from_ymd_opt(year, month, day_of_month) {
        if let Some(candidate) = at_slot(date, slot, tz) {
            if candidate >= reference {
                return Some(candidate);
            }
        }
    }

    // Otherwise next month; a month without the day (e.g. 31 in April)
    // yields nothing rather than a substitute day.
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let date = NaiveDate::from_ymd_opt(next_year, next_month, day_of_month)?;
    at_slot(date, slot, tz)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    /// Local wall-clock instant in the schedule offset, as UTC.
    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        tz().with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_once_past_start_is_none() {
        let start = local(2026, 8, 1, 9, 0);
        let reference = local(2026, 8, 5, 9, 0);
        assert_eq!(compute_next_run(&Cadence::Once, start, reference, tz()), None);
    }

    #[test]
    fn test_once_future_start_is_start() {
        let start = local(2026, 8, 10, 9, 0);
        let reference = local(2026, 8, 5, 9, 0);
        assert_eq!(
            compute_next_run(&Cadence::Once, start, reference, tz()),
            Some(start)
        );
    }

    #[test]
    fn test_once_exact_reference_still_fires() {
        let start = local(2026, 8, 5, 9, 0);
        assert_eq!(
            compute_next_run(&Cadence::Once, start, start, tz()),
            Some(start)
        );
    }

    #[test]
    fn test_daily_slot_still_ahead_today() {
        let start = local(2026, 8, 1, 9, 0);
        let reference = local(2026, 8, 5, 8, 0);
        assert_eq!(
            compute_next_run(&Cadence::Daily, start, reference, tz()),
            Some(local(2026, 8, 5, 9, 0))
        );
    }

    #[test]
    fn test_daily_rolls_to_tomorrow() {
        let start = local(2026, 8, 1, 9, 0);
        let reference = local(2026, 8, 5, 10, 0);
        assert_eq!(
            compute_next_run(&Cadence::Daily, start, reference, tz()),
            Some(local(2026, 8, 6, 9, 0))
        );
    }

    #[test]
    fn test_daily_never_past_and_within_24h() {
        let start = local(2026, 8, 1, 14, 30);
        for hour in 0..24 {
            let reference = local(2026, 8, 5, hour, 17);
            let next = compute_next_run(&Cadence::Daily, start, reference, tz()).unwrap();
            assert!(next >= reference);
            assert!(next - reference <= Duration::hours(24));
        }
    }

    #[test]
    fn test_weekly_scenario_tue_to_wed() {
        // weekdays {Mon, Wed}, slot 09:00, reference Tue 10:00
        // 2026-08-04 is a Tuesday.
        let start = local(2026, 8, 3, 9, 0);
        let reference = local(2026, 8, 4, 10, 0);
        let next = compute_next_run(
            &Cadence::Weekly { weekdays: vec![0, 2] },
            start,
            reference,
            tz(),
        )
        .unwrap();
        assert_eq!(next, local(2026, 8, 5, 9, 0));
        assert_eq!(next.with_timezone(&tz()).weekday(), chrono::Weekday::Wed);
    }

    #[test]
    fn test_weekly_same_day_slot_ahead() {
        // Monday 08:00 with Monday in the set fires at 09:00 same day.
        let start = local(2026, 8, 3, 9, 0);
        let reference = local(2026, 8, 3, 8, 0);
        let next = compute_next_run(
            &Cadence::Weekly { weekdays: vec![0] },
            start,
            reference,
            tz(),
        )
        .unwrap();
        assert_eq!(next, local(2026, 8, 3, 9, 0));
    }

    #[test]
    fn test_weekly_wraps_to_next_week() {
        // Friday, set {Mon, Wed} → next Monday.
        let start = local(2026, 8, 3, 9, 0);
        let reference = local(2026, 8, 7, 12, 0);
        let next = compute_next_run(
            &Cadence::Weekly { weekdays: vec![0, 2] },
            start,
            reference,
            tz(),
        )
        .unwrap();
        assert_eq!(next, local(2026, 8, 10, 9, 0));
    }

    #[test]
    fn test_weekly_result_weekday_in_set() {
        let start = local(2026, 8, 1, 9, 0);
        let weekdays = vec![1u8, 4];
        for day in 1..=14 {
            let reference = local(2026, 8, day, 11, 0);
            let next = compute_next_run(
                &Cadence::Weekly { weekdays: weekdays.clone() },
                start,
                reference,
                tz(),
            )
            .unwrap();
            let wd = next
                .with_timezone(&tz())
                .weekday()
                .num_days_from_monday() as u8;
            assert!(weekdays.contains(&wd), "weekday {wd} not in set");
            assert!(next >= reference);
        }
    }

    #[test]
    fn test_weekly_empty_set_is_none() {
        let start = local(2026, 8, 3, 9, 0);
        assert_eq!(
            compute_next_run(
                &Cadence::Weekly { weekdays: vec![] },
                start,
                start,
                tz()
            ),
            None
        );
    }

    #[test]
    fn test_monthly_this_month_ahead() {
        let start = local(2026, 8, 1, 9, 0);
        let reference = local(2026, 8, 5, 10, 0);
        assert_eq!(
            compute_next_run(
                &Cadence::Monthly { day_of_month: 15 },
                start,
                reference,
                tz()
            ),
            Some(local(2026, 8, 15, 9, 0))
        );
    }

    #[test]
    fn test_monthly_rolls_to_next_month() {
        let start = local(2026, 8, 1, 9, 0);
        let reference = local(2026, 8, 20, 10, 0);
        assert_eq!(
            compute_next_run(
                &Cadence::Monthly { day_of_month: 15 },
                start,
                reference,
                tz()
            ),
            Some(local(2026, 9, 15, 9, 0))
        );
    }

    #[test]
    fn test_monthly_missing_day_is_skipped() {
        // Day 31 from late March: April has no 31st, no substitute.
        let start = local(2026, 3, 1, 9, 0);
        let reference = local(2026, 3, 31, 10, 0);
        assert_eq!(
            compute_next_run(
                &Cadence::Monthly { day_of_month: 31 },
                start,
                reference,
                tz()
            ),
            None
        );
    }

    #[test]
    fn test_monthly_december_wraps_year() {
        let start = local(2026, 12, 1, 9, 0);
        let reference = local(2026, 12, 20, 10, 0);
        assert_eq!(
            compute_next_run(
                &Cadence::Monthly { day_of_month: 5 },
                start,
                reference,
                tz()
            ),
            Some(local(2027, 1, 5, 9, 0))
        );
    }

    #[test]
    fn test_custom_is_none() {
        let start = local(2026, 8, 1, 9, 0);
        assert_eq!(compute_next_run(&Cadence::Custom, start, start, tz()), None);
    }

    #[test]
    fn test_offset_matters() {
        // Same UTC reference lands on different local days in +08:00
        // vs UTC; the computed slot must follow the configured offset.
        let start = local(2026, 8, 1, 1, 0); // 01:00 local = 17:00 UTC prev day
        let reference = Utc.with_ymd_and_hms(2026, 8, 4, 16, 0, 0).unwrap();
        let next = compute_next_run(&Cadence::Daily, start, reference, tz()).unwrap();
        // 01:00 local on Aug 5 = 17:00 UTC Aug 4.
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 4, 17, 0, 0).unwrap());
    }
}
