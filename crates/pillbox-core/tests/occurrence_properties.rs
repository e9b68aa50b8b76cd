//! Property tests for next-occurrence computation.
//!
//! Schedules are generated over a ten-year window with arbitrary day sets,
//! times of day and start/end bounds, and checked against a day-by-day
//! oracle in a fixed-offset zone.

use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone, Timelike, Utc, Weekday};
use pillbox_core::{DaySet, MedicineId, OccurrenceCalculator, Schedule, TimeOfDay};
use proptest::prelude::*;

const WEEK: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

fn zone() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

fn days_from_mask(mask: u8) -> DaySet {
    WEEK.iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, d)| *d)
        .collect()
}

fn instant(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

prop_compose! {
    fn arb_schedule()(
        mask in 1u8..128,
        hour in 0u32..24,
        minute in 0u32..60,
        start in 1_577_836_800i64..1_893_456_000,
        span in proptest::option::of(0i64..90 * 86_400),
    ) -> Schedule {
        let start = instant(start);
        Schedule::new(
            MedicineId::new("med-prop").unwrap(),
            TimeOfDay::new(hour, minute).unwrap(),
            days_from_mask(mask),
            start,
            span.map(|s| start + Duration::seconds(s)),
            "",
        )
        .unwrap()
    }
}

/// First candidate found by walking whole local days from the search start.
fn oracle(now: DateTime<Utc>, schedule: &Schedule) -> Option<DateTime<Utc>> {
    let search_start = now.max(schedule.start_date).with_timezone(&zone());
    let first_day = search_start.date_naive();
    (0..=8)
        .map(|d| first_day + Duration::days(d))
        .filter(|day| schedule.selected_days.contains(day.weekday()))
        .map(|day| {
            zone()
                .from_local_datetime(&day.and_time(schedule.time_of_day.to_naive_time()))
                .unwrap()
                .with_timezone(&Utc)
        })
        .find(|t| *t > now && *t >= schedule.start_date)
        .filter(|t| schedule.end_date.map_or(true, |end| *t <= end))
}

proptest! {
    #[test]
    fn next_is_future_on_selected_day_at_time(
        schedule in arb_schedule(),
        offset in -60i64 * 86_400..60 * 86_400,
    ) {
        let calc = OccurrenceCalculator::new(zone());
        let now = schedule.start_date + Duration::seconds(offset);
        if let Some(t) = calc.next(now, &schedule) {
            let local = t.with_timezone(&zone());
            prop_assert!(t > now);
            prop_assert!(t >= schedule.start_date);
            prop_assert!(schedule.selected_days.contains(local.weekday()));
            prop_assert_eq!(local.hour(), schedule.time_of_day.hour());
            prop_assert_eq!(local.minute(), schedule.time_of_day.minute());
            prop_assert_eq!(local.second(), 0);
            prop_assert_eq!(t.timestamp_subsec_nanos(), 0);
            if let Some(end) = schedule.end_date {
                prop_assert!(t <= end);
            }
        }
    }

    #[test]
    fn next_matches_day_walk(
        schedule in arb_schedule(),
        offset in -60i64 * 86_400..60 * 86_400,
    ) {
        let calc = OccurrenceCalculator::new(zone());
        let now = schedule.start_date + Duration::seconds(offset);
        prop_assert_eq!(calc.next(now, &schedule), oracle(now, &schedule));
    }

    #[test]
    fn open_ended_schedule_never_exhausts(
        schedule in arb_schedule(),
        offset in 0i64..3650 * 86_400,
    ) {
        let mut schedule = schedule;
        schedule.end_date = None;
        let calc = OccurrenceCalculator::new(zone());
        let now = schedule.start_date + Duration::seconds(offset);
        let t = calc.next(now, &schedule);
        prop_assert!(t.is_some());
        prop_assert!(t.unwrap() - now <= Duration::days(7));
    }

    #[test]
    fn upcoming_is_strictly_increasing(schedule in arb_schedule()) {
        let calc = OccurrenceCalculator::new(zone());
        let times: Vec<_> = calc.upcoming(schedule.start_date, &schedule).take(10).collect();
        for pair in times.windows(2) {
            prop_assert!(pair[0] < pair[1]);
            prop_assert!(pair[1] - pair[0] <= Duration::days(7));
        }
    }
}
