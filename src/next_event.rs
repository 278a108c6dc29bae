//! # Next Prayer Selection
//!
//! Picks the first prayer of the day that is still ahead of "now" and the time
//! left until it. Pure arithmetic on a [`PrayerTimeSet`], cheap enough to run on
//! every scheduler tick.
//!
//! ## Rules
//! - Prayers are checked in daily order: fajr, dhuhr, asr, maghrib, isha
//!   (sunrise is never selected)
//! - A prayer counts as upcoming only if it is **strictly** after now; at
//!   exactly 13:05 a 13:05 dhuhr has already started and asr is next
//! - After isha the next prayer is tomorrow's fajr, using today's fajr clock time
//! - The remaining time is floored to whole minutes

use crate::{NextEventInfo, Prayer, PrayerTimeSet, Remaining};
use chrono::{Duration, NaiveDateTime};

/// Select the upcoming prayer relative to `now` (local civil time).
///
/// # Example
/// ```
/// use chrono::{NaiveDate, NaiveTime};
/// use prayer_clock_lib::{next_event, Prayer, PrayerTimeSet};
///
/// let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
/// let times = PrayerTimeSet::new(
///     hm(5, 45), hm(7, 10), hm(13, 5), hm(16, 20), hm(19, 10), hm(20, 25),
/// ).unwrap();
/// let now = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(14, 0, 0).unwrap();
///
/// let next = next_event::select(&times, now);
/// assert_eq!(next.prayer, Prayer::Asr);
/// assert_eq!(next.remaining.to_string(), "2h 20m");
/// ```
pub fn select(times: &PrayerTimeSet, now: NaiveDateTime) -> NextEventInfo {
    let today = now.date();

    let (prayer, at) = Prayer::ALL
        .iter()
        .map(|&prayer| (prayer, today.and_time(times.time_of(prayer))))
        .find(|&(_, at)| at > now)
        .unwrap_or_else(|| {
            let fajr_today = today.and_time(times.fajr());
            let fajr_tomorrow = fajr_today
                .checked_add_signed(Duration::days(1))
                .unwrap_or(NaiveDateTime::MAX);
            (Prayer::Fajr, fajr_tomorrow)
        });

    NextEventInfo {
        prayer,
        clock_time: times.time_of(prayer),
        at,
        remaining: Remaining::from_minutes((at - now).num_minutes()),
    }
}
