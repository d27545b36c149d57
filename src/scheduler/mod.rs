pub mod reply;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;

pub use reply::format_reply;

/// Zone the fika slots are expressed in. CET/CEST, DST handled by chrono-tz.
pub const FIKA_TZ: Tz = chrono_tz::Europe::Stockholm;

/// Daily slots as (hour, minute), strictly ordered.
pub const FIKA_SLOTS: [(u32, u32); 2] = [(10, 0), (15, 0)];

/// The next slot strictly after a given instant.
#[derive(Debug, Clone, PartialEq)]
pub struct NextFika<Z: TimeZone> {
    pub target: DateTime<Z>,
    /// `HH:MM` in the slot's local time.
    pub label: String,
}

/// Resolve a wall-clock slot on `date` in `tz`. Ambiguous times take the
/// earliest instant; times that fall into a DST gap do not exist.
fn local_slot<Z: TimeZone>(tz: &Z, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Z>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    tz.from_local_datetime(&date.and_time(time)).earliest()
}

/// Find the first slot strictly after `now`, rolling over to the next day
/// once both of today's slots have passed. A slot equal to `now` counts as
/// passed.
pub fn next_fika<Z: TimeZone>(now: &DateTime<Z>) -> Option<NextFika<Z>> {
    let tz = now.timezone();
    let today = now.date_naive();

    // Two days always suffice unless a slot is swallowed by a DST gap.
    for offset in 0..3 {
        let date = today + Duration::days(offset);
        for (hour, minute) in FIKA_SLOTS {
            let Some(target) = local_slot(&tz, date, hour, minute) else {
                continue;
            };
            if target > *now {
                let label = target.naive_local().format("%H:%M").to_string();
                return Some(NextFika { target, label });
            }
        }
    }
    None
}

/// Whole minutes from `now` to `target`, floored and never negative.
pub fn minutes_until<Z: TimeZone>(target: &DateTime<Z>, now: &DateTime<Z>) -> u64 {
    let seconds = target.clone().signed_duration_since(now.clone()).num_seconds();
    seconds.div_euclid(60).max(0) as u64
}

/// Countdown reply for the slot following `now`.
pub fn reply_for<Z: TimeZone>(now: &DateTime<Z>) -> Option<String> {
    let next = next_fika(now)?;
    let minutes = minutes_until(&next.target, now);
    Some(format_reply(&next.label, minutes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Tz> {
        FIKA_TZ.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_before_morning_slot_returns_today_ten() {
        let now = at(2026, 3, 4, 9, 0, 0);
        let next = next_fika(&now).unwrap();
        assert_eq!(next.target, at(2026, 3, 4, 10, 0, 0));
        assert_eq!(next.label, "10:00");
    }

    #[test]
    fn test_just_after_midnight_returns_today_ten() {
        let now = at(2026, 3, 4, 0, 0, 1);
        assert_eq!(next_fika(&now).unwrap().target, at(2026, 3, 4, 10, 0, 0));
    }

    #[test]
    fn test_exact_morning_slot_is_exclusive() {
        let now = at(2026, 3, 4, 10, 0, 0);
        let next = next_fika(&now).unwrap();
        assert_eq!(next.target, at(2026, 3, 4, 15, 0, 0));
        assert_eq!(next.label, "15:00");
    }

    #[test]
    fn test_between_slots_returns_afternoon() {
        let now = at(2026, 3, 4, 14, 59, 59);
        assert_eq!(next_fika(&now).unwrap().target, at(2026, 3, 4, 15, 0, 0));
    }

    #[test]
    fn test_afternoon_slot_rolls_to_tomorrow() {
        let now = at(2026, 3, 4, 15, 0, 0);
        let next = next_fika(&now).unwrap();
        assert_eq!(next.target, at(2026, 3, 5, 10, 0, 0));
        assert_eq!(next.label, "10:00");
    }

    #[test]
    fn test_rolls_over_month_and_year_end() {
        let now = at(2026, 12, 31, 23, 30, 0);
        assert_eq!(next_fika(&now).unwrap().target, at(2027, 1, 1, 10, 0, 0));
    }

    #[test]
    fn test_result_always_in_future_across_a_day() {
        let start = at(2026, 6, 10, 0, 0, 0);
        for step in 0..(24 * 4) {
            let now = start + Duration::minutes(15 * step);
            let next = next_fika(&now).unwrap();
            assert!(next.target > now, "slot not after {now}");
            assert_eq!(next.target.minute(), 0);
            assert!(next.target.hour() == 10 || next.target.hour() == 15);
        }
    }

    #[test]
    fn test_dst_switch_days_keep_local_wall_clock() {
        // 2026-03-29 and 2026-10-25 are the Stockholm DST transition days.
        let spring = at(2026, 3, 29, 9, 0, 0);
        assert_eq!(next_fika(&spring).unwrap().label, "10:00");
        let autumn = at(2026, 10, 24, 16, 0, 0);
        let next = next_fika(&autumn).unwrap();
        assert_eq!(next.target, at(2026, 10, 25, 10, 0, 0));
        assert_eq!(minutes_until(&next.target, &autumn), 19 * 60);
    }

    #[test]
    fn test_works_with_utc_instants() {
        let now = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(next_fika(&now).unwrap().label, "15:00");
    }

    #[test]
    fn test_minutes_until_floors() {
        let now = at(2026, 3, 4, 9, 0, 30);
        let target = at(2026, 3, 4, 10, 0, 0);
        assert_eq!(minutes_until(&target, &now), 59);
        assert_eq!(minutes_until(&target, &at(2026, 3, 4, 9, 59, 1)), 0);
    }

    #[test]
    fn test_minutes_until_never_negative() {
        let target = at(2026, 3, 4, 10, 0, 0);
        assert_eq!(minutes_until(&target, &target), 0);
        assert_eq!(minutes_until(&target, &at(2026, 3, 4, 10, 0, 1)), 0);
        assert_eq!(minutes_until(&target, &at(2026, 3, 5, 10, 0, 0)), 0);
    }

    #[test]
    fn test_reply_for_nine_o_clock() {
        let reply = reply_for(&at(2026, 3, 4, 9, 0, 0)).unwrap();
        assert!(reply.contains("Next fika is at 10:00"));
        assert!(reply.contains("60 minutes left"));
    }

    #[test]
    fn test_reply_for_final_seconds_is_fika_time() {
        let reply = reply_for(&at(2026, 3, 4, 14, 59, 30)).unwrap();
        assert_eq!(reply, "☕️ It's FIKA time right now (15:00)!");
    }
}
