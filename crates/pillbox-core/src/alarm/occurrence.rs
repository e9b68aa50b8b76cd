//! Next-occurrence computation.
//!
//! Occurrences are recomputed from "now" on every step of the chain rather
//! than by adding a week to the previous fire instant. A device that slept
//! through several slots therefore lands on the next future slot and never
//! replays stale ones.
//!
//! Times of day are local wall-clock times in the calculator's zone, so a
//! schedule at 08:00 stays at 08:00 across DST changes while its UTC instant
//! moves. Local times that fall into a DST gap are shifted forward by one
//! hour; ambiguous local times resolve to the earlier instant.

use chrono::{DateTime, Datelike, Days, Duration, Local, NaiveDateTime, TimeZone, Utc};

use crate::schedule::Schedule;

/// Candidate day offsets examined from the search start. Offset 7 repeats
/// the start weekday one week later, for when today's slot already passed.
const MAX_DAY_OFFSET: u64 = 7;

/// Pure `(now, schedule) -> next fire instant` computation in a fixed zone.
#[derive(Debug, Clone)]
pub struct OccurrenceCalculator<Z: TimeZone = Local> {
    zone: Z,
}

impl OccurrenceCalculator<Local> {
    /// Calculator in the device's local zone.
    pub fn local() -> Self {
        Self { zone: Local }
    }
}

impl Default for OccurrenceCalculator<Local> {
    fn default() -> Self {
        Self::local()
    }
}

impl<Z: TimeZone> OccurrenceCalculator<Z> {
    pub fn new(zone: Z) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> &Z {
        &self.zone
    }

    /// Next fire instant strictly after `now`, or `None` when the schedule is
    /// exhausted.
    ///
    /// The search starts at `max(now, start_date)` and walks day offsets
    /// `0..=7` in ascending order; the first candidate whose weekday is
    /// selected and which lies after `now` (and not before `start_date`)
    /// wins. If that candidate is past `end_date` there is no next
    /// occurrence.
    pub fn next(&self, now: DateTime<Utc>, schedule: &Schedule) -> Option<DateTime<Utc>> {
        let search_start = now.max(schedule.start_date);
        let first_day = search_start.with_timezone(&self.zone).date_naive();
        let time = schedule.time_of_day.to_naive_time();

        for offset in 0..=MAX_DAY_OFFSET {
            let Some(day) = first_day.checked_add_days(Days::new(offset)) else {
                break;
            };
            if !schedule.selected_days.contains(day.weekday()) {
                continue;
            }
            let Some(candidate) = resolve_local(&self.zone, day.and_time(time)) else {
                continue;
            };
            let candidate = candidate.with_timezone(&Utc);
            // A start date later in the day must not let that day's earlier slot through.
            if candidate <= now || candidate < schedule.start_date {
                continue;
            }

            return match schedule.end_date {
                Some(end) if candidate > end => {
                    tracing::debug!(
                        medicine_id = %schedule.medicine_id,
                        candidate = %candidate,
                        end = %end,
                        "Schedule exhausted"
                    );
                    None
                }
                _ => Some(candidate),
            };
        }

        None
    }

    /// Successive occurrences after `from`, ending when the schedule is
    /// exhausted.
    pub fn upcoming<'a>(&'a self, from: DateTime<Utc>, schedule: &'a Schedule) -> Upcoming<'a, Z> {
        Upcoming {
            calculator: self,
            schedule,
            cursor: Some(from),
        }
    }
}

/// Iterator returned by [`OccurrenceCalculator::upcoming`].
pub struct Upcoming<'a, Z: TimeZone> {
    calculator: &'a OccurrenceCalculator<Z>,
    schedule: &'a Schedule,
    cursor: Option<DateTime<Utc>>,
}

impl<Z: TimeZone> Iterator for Upcoming<'_, Z> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.calculator.next(self.cursor?, self.schedule);
        self.cursor = next;
        next
    }
}

/// Map a local wall-clock time to an instant in `zone`.
fn resolve_local<Z: TimeZone>(zone: &Z, local: NaiveDateTime) -> Option<DateTime<Z>> {
    zone.from_local_datetime(&local)
        .earliest()
        .or_else(|| zone.from_local_datetime(&(local + Duration::hours(1))).earliest())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{DaySet, MedicineId, TimeOfDay};
    use chrono::{FixedOffset, LocalResult, NaiveDate};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn schedule(days: &str, time: &str) -> Schedule {
        Schedule::new(
            MedicineId::new("med-1").unwrap(),
            time.parse().unwrap(),
            days.parse().unwrap(),
            utc(2024, 1, 1, 0, 0),
            None,
            "Aspirin",
        )
        .unwrap()
    }

    // 2024-03-04 is a Monday.

    #[test]
    fn later_day_in_same_week() {
        let calc = OccurrenceCalculator::new(Utc);
        let s = schedule("mon,wed", "08:00");
        let next = calc.next(utc(2024, 3, 4, 9, 0), &s);
        assert_eq!(next, Some(utc(2024, 3, 6, 8, 0)));
    }

    #[test]
    fn same_day_before_time() {
        let calc = OccurrenceCalculator::new(Utc);
        let s = schedule("fri", "08:00");
        let next = calc.next(utc(2024, 3, 8, 7, 0), &s);
        assert_eq!(next, Some(utc(2024, 3, 8, 8, 0)));
    }

    #[test]
    fn end_before_only_matching_day_is_exhausted() {
        let calc = OccurrenceCalculator::new(Utc);
        let mut s = schedule("wed", "08:00");
        s.end_date = Some(utc(2024, 3, 5, 0, 0));
        assert_eq!(calc.next(utc(2024, 3, 4, 9, 0), &s), None);
    }

    #[test]
    fn elapsed_slot_today_wraps_to_next_week() {
        let calc = OccurrenceCalculator::new(Utc);
        let s = schedule("mon", "08:00");
        let next = calc.next(utc(2024, 3, 4, 9, 0), &s);
        assert_eq!(next, Some(utc(2024, 3, 11, 8, 0)));
    }

    #[test]
    fn slot_equal_to_now_is_not_returned() {
        let calc = OccurrenceCalculator::new(Utc);
        let s = schedule("mon", "08:00");
        let next = calc.next(utc(2024, 3, 4, 8, 0), &s);
        assert_eq!(next, Some(utc(2024, 3, 11, 8, 0)));
    }

    #[test]
    fn future_start_date_clamps_search() {
        let calc = OccurrenceCalculator::new(Utc);
        let mut s = schedule("mon", "08:00");
        s.start_date = utc(2024, 3, 10, 0, 0);
        let next = calc.next(utc(2024, 3, 4, 9, 0), &s);
        assert_eq!(next, Some(utc(2024, 3, 11, 8, 0)));
    }

    #[test]
    fn start_later_on_the_only_day_skips_a_week() {
        let calc = OccurrenceCalculator::new(Utc);
        let mut s = schedule("wed", "08:00");
        s.start_date = utc(2024, 3, 6, 10, 0);
        let next = calc.next(utc(2024, 3, 4, 9, 0), &s);
        assert_eq!(next, Some(utc(2024, 3, 13, 8, 0)));
    }

    #[test]
    fn end_date_is_inclusive() {
        let calc = OccurrenceCalculator::new(Utc);
        let mut s = schedule("wed", "08:00");
        s.end_date = Some(utc(2024, 3, 6, 8, 0));
        assert_eq!(calc.next(utc(2024, 3, 4, 9, 0), &s), Some(utc(2024, 3, 6, 8, 0)));
    }

    #[test]
    fn weekday_is_taken_in_the_local_zone() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let calc = OccurrenceCalculator::new(tokyo);
        let s = schedule("mon", "08:00");
        // Monday 07:00 in Tokyo is still Sunday in UTC.
        let next = calc.next(utc(2024, 3, 3, 22, 0), &s);
        assert_eq!(next, Some(utc(2024, 3, 3, 23, 0)));
    }

    #[test]
    fn upcoming_walks_the_chain_until_end() {
        let calc = OccurrenceCalculator::new(Utc);
        let mut s = schedule("mon,wed", "08:00");
        s.end_date = Some(utc(2024, 3, 14, 0, 0));
        let all: Vec<_> = calc.upcoming(utc(2024, 3, 4, 9, 0), &s).collect();
        assert_eq!(
            all,
            vec![utc(2024, 3, 6, 8, 0), utc(2024, 3, 11, 8, 0), utc(2024, 3, 13, 8, 0)]
        );
    }

    #[test]
    fn every_day_open_ended_never_exhausts() {
        let calc = OccurrenceCalculator::new(Utc);
        let mut s = schedule("mon", "08:00");
        s.selected_days = DaySet::every_day();
        s.time_of_day = TimeOfDay::new(23, 59).unwrap();
        assert_eq!(calc.upcoming(utc(2024, 3, 4, 0, 0), &s).take(30).count(), 30);
    }

    /// Central-European style zone: UTC+1, UTC+2 between the last Sundays
    /// of March and October 2024 (transitions at 01:00 UTC).
    #[derive(Debug, Clone, Copy)]
    struct DstZone;

    impl DstZone {
        fn offset_at(utc: &NaiveDateTime) -> FixedOffset {
            let spring = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap().and_hms_opt(1, 0, 0).unwrap();
            let fall = NaiveDate::from_ymd_opt(2024, 10, 27).unwrap().and_hms_opt(1, 0, 0).unwrap();
            let hours = if *utc >= spring && *utc < fall { 2 } else { 1 };
            FixedOffset::east_opt(hours * 3600).unwrap()
        }
    }

    impl TimeZone for DstZone {
        type Offset = FixedOffset;

        fn from_offset(_offset: &FixedOffset) -> Self {
            DstZone
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
            self.offset_from_local_datetime(&local.and_hms_opt(12, 0, 0).unwrap())
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            let summer = FixedOffset::east_opt(2 * 3600).unwrap();
            let winter = FixedOffset::east_opt(3600).unwrap();
            let fits = |off: FixedOffset| {
                let utc = *local - Duration::seconds(off.local_minus_utc() as i64);
                Self::offset_at(&utc) == off
            };
            match (fits(summer), fits(winter)) {
                (true, true) => LocalResult::Ambiguous(summer, winter),
                (true, false) => LocalResult::Single(summer),
                (false, true) => LocalResult::Single(winter),
                (false, false) => LocalResult::None,
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            Self::offset_at(&utc.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            Self::offset_at(utc)
        }
    }

    #[test]
    fn wall_clock_time_survives_dst_change() {
        let calc = OccurrenceCalculator::new(DstZone);
        let mut s = schedule("mon", "08:00");
        s.selected_days = DaySet::every_day();
        let before = calc.next(utc(2024, 3, 30, 12, 0), &s).unwrap();
        let after = calc.next(before, &s).unwrap();
        assert_eq!(before, utc(2024, 3, 31, 6, 0));
        assert_eq!(after, utc(2024, 4, 1, 6, 0));

        let winter = calc.next(utc(2024, 3, 29, 12, 0), &s).unwrap();
        assert_eq!(winter, utc(2024, 3, 30, 7, 0));
        assert_eq!(
            *winter.with_timezone(&DstZone).offset(),
            FixedOffset::east_opt(3600).unwrap()
        );
    }

    #[test]
    fn gap_time_shifts_forward_one_hour() {
        let calc = OccurrenceCalculator::new(DstZone);
        let mut s = schedule("mon", "02:30");
        s.selected_days = DaySet::every_day();
        // 02:30 local does not exist on 2024-03-31; 03:30 CEST is 01:30 UTC.
        let next = calc.next(utc(2024, 3, 30, 12, 0), &s);
        assert_eq!(next, Some(utc(2024, 3, 31, 1, 30)));
    }

    #[test]
    fn ambiguous_time_takes_earliest_instant() {
        let calc = OccurrenceCalculator::new(DstZone);
        let mut s = schedule("mon", "02:30");
        s.selected_days = DaySet::every_day();
        // 02:30 local happens twice on 2024-10-27; the first is 00:30 UTC.
        let next = calc.next(utc(2024, 10, 26, 12, 0), &s);
        assert_eq!(next, Some(utc(2024, 10, 27, 0, 30)));
    }
}
