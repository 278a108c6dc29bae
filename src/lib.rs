//! # Prayer Clock Core Library
//!
//! This library provides the data model and engine for the prayer clock: the five
//! daily prayer times (plus sunrise) for a location, the qibla bearing, and a
//! countdown to the next prayer that keeps itself current as time passes.
//!
//! ## Design Philosophy
//!
//! ### Remote first, local always
//! Times are fetched from a remote prayer-time service when it is reachable. Any
//! failure there is absorbed and the same answer is computed offline from solar
//! position formulas. Only a failure of the local calculation reaches the caller.
//!
//! ### Immutable time sets
//! A [`PrayerTimeSet`] is validated on construction (strictly increasing within one
//! civil day) and never mutated afterwards. Every recomputation produces a new set
//! that replaces the old one wholesale.
//!
//! ### Data Flow
//! 1. **Locate**: [`location`] resolves coordinates, substituting a fixed fallback
//! 2. **Arbitrate**: [`arbiter`] tries [`remote`], falls back to [`astronomy`]
//! 3. **Select**: [`next_event`] picks the upcoming prayer and the time remaining
//! 4. **Schedule**: [`engine`] re-runs step 3 on a timer and steps 1-2 on demand
//!
//! ## Core Types
//!
//! - [`Coordinates`]: latitude/longitude pair in decimal degrees
//! - [`PrayerTimeSet`]: the six clock times of one day
//! - [`TimeSourceResult`]: a time set tagged with where it came from
//! - [`NextEventInfo`]: the upcoming prayer and the countdown to it

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// Module declarations
pub mod arbiter;
pub mod astronomy;
pub mod clock;
pub mod config;
pub mod engine;
pub mod location;
pub mod next_event;
pub mod remote;
pub mod renderer;

#[cfg(test)]
mod tests;

/// A geographic position in decimal degrees (WGS84).
///
/// # Example
/// ```
/// use prayer_clock_lib::Coordinates;
///
/// let kuala_lumpur = Coordinates::new(3.1390, 101.6869);
/// assert!(kuala_lumpur.is_valid());
/// assert!(!Coordinates::new(91.0, 0.0).is_valid());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Degrees north of the equator (-90 to 90)
    pub latitude: f64,
    /// Degrees east of Greenwich (-180 to 180)
    pub longitude: f64,
}

impl Coordinates {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both components are finite and within their geographic range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// One of the five daily ritual prayers, in daily order.
///
/// Sunrise is tracked in [`PrayerTimeSet`] but is not a prayer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prayer {
    Fajr,
    Dhuhr,
    Asr,
    Maghrib,
    Isha,
}

impl Prayer {
    /// All prayers in the order they occur during the day.
    pub const ALL: [Prayer; 5] = [
        Prayer::Fajr,
        Prayer::Dhuhr,
        Prayer::Asr,
        Prayer::Maghrib,
        Prayer::Isha,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Prayer::Fajr => "fajr",
            Prayer::Dhuhr => "dhuhr",
            Prayer::Asr => "asr",
            Prayer::Maghrib => "maghrib",
            Prayer::Isha => "isha",
        }
    }
}

impl fmt::Display for Prayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A [`PrayerTimeSet`] could not be built because its times are not strictly
/// increasing within one day.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{earlier} at {earlier_time} is not before {later} at {later_time}")]
pub struct TimeSetError {
    pub earlier: &'static str,
    pub earlier_time: NaiveTime,
    pub later: &'static str,
    pub later_time: NaiveTime,
}

/// The six clock times of one civil day, at minute resolution.
///
/// Fields are private so the ordering invariant
/// `fajr < sunrise < dhuhr < asr < maghrib < isha` always holds.
///
/// # Example
/// ```
/// use chrono::NaiveTime;
/// use prayer_clock_lib::{Prayer, PrayerTimeSet};
///
/// let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
/// let times = PrayerTimeSet::new(
///     hm(5, 45), hm(7, 10), hm(13, 5), hm(16, 20), hm(19, 10), hm(20, 25),
/// ).unwrap();
/// assert_eq!(times.time_of(Prayer::Asr), hm(16, 20));
///
/// // Maghrib before Asr is rejected
/// assert!(PrayerTimeSet::new(
///     hm(5, 45), hm(7, 10), hm(13, 5), hm(19, 10), hm(16, 20), hm(20, 25),
/// ).is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PrayerTimeSet {
    fajr: NaiveTime,
    sunrise: NaiveTime,
    dhuhr: NaiveTime,
    asr: NaiveTime,
    maghrib: NaiveTime,
    isha: NaiveTime,
}

impl PrayerTimeSet {
    /// Build a set from six clock times. Seconds are truncated.
    pub fn new(
        fajr: NaiveTime,
        sunrise: NaiveTime,
        dhuhr: NaiveTime,
        asr: NaiveTime,
        maghrib: NaiveTime,
        isha: NaiveTime,
    ) -> Result<Self, TimeSetError> {
        let set = Self {
            fajr: truncate_to_minute(fajr),
            sunrise: truncate_to_minute(sunrise),
            dhuhr: truncate_to_minute(dhuhr),
            asr: truncate_to_minute(asr),
            maghrib: truncate_to_minute(maghrib),
            isha: truncate_to_minute(isha),
        };

        let entries = set.entries();
        for pair in entries.windows(2) {
            let ((earlier, earlier_time), (later, later_time)) = (pair[0], pair[1]);
            if earlier_time >= later_time {
                return Err(TimeSetError {
                    earlier,
                    earlier_time,
                    later,
                    later_time,
                });
            }
        }

        Ok(set)
    }

    pub fn fajr(&self) -> NaiveTime {
        self.fajr
    }

    pub fn sunrise(&self) -> NaiveTime {
        self.sunrise
    }

    pub fn dhuhr(&self) -> NaiveTime {
        self.dhuhr
    }

    pub fn asr(&self) -> NaiveTime {
        self.asr
    }

    pub fn maghrib(&self) -> NaiveTime {
        self.maghrib
    }

    pub fn isha(&self) -> NaiveTime {
        self.isha
    }

    /// Clock time of a ritual prayer.
    pub fn time_of(&self, prayer: Prayer) -> NaiveTime {
        match prayer {
            Prayer::Fajr => self.fajr,
            Prayer::Dhuhr => self.dhuhr,
            Prayer::Asr => self.asr,
            Prayer::Maghrib => self.maghrib,
            Prayer::Isha => self.isha,
        }
    }

    /// All six named times in daily order, sunrise included.
    pub fn entries(&self) -> [(&'static str, NaiveTime); 6] {
        [
            ("fajr", self.fajr),
            ("sunrise", self.sunrise),
            ("dhuhr", self.dhuhr),
            ("asr", self.asr),
            ("maghrib", self.maghrib),
            ("isha", self.isha),
        ]
    }
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    time.with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .unwrap_or(time)
}

/// Where a [`TimeSourceResult`] came from.
///
/// The secondary (Hijri) calendar label only exists on the remote variant, so a
/// locally computed result cannot carry one by construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "origin", rename_all = "lowercase")]
pub enum Origin {
    /// Fetched from the prayer-time web service.
    Remote {
        /// Hijri date as "day month year", e.g. "3 Rajab 1445"
        hijri_date: String,
    },
    /// Computed offline from solar position.
    Local,
}

/// A complete answer for one location and day.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimeSourceResult {
    pub times: PrayerTimeSet,
    /// Degrees clockwise from true north, in `[0, 360)`
    pub qibla_bearing: f64,
    pub origin: Origin,
}

impl TimeSourceResult {
    /// Hijri date label, present only for remote results.
    pub fn secondary_calendar_label(&self) -> Option<&str> {
        match &self.origin {
            Origin::Remote { hijri_date } => Some(hijri_date),
            Origin::Local => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.origin, Origin::Remote { .. })
    }
}

/// Whole hours and minutes left until an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Remaining {
    pub hours: i64,
    pub minutes: i64,
}

impl Remaining {
    pub fn from_minutes(total: i64) -> Self {
        Self {
            hours: total.div_euclid(60),
            minutes: total.rem_euclid(60),
        }
    }

    pub fn total_minutes(&self) -> i64 {
        self.hours * 60 + self.minutes
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h {}m", self.hours, self.minutes)
    }
}

/// The upcoming prayer as seen from some instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct NextEventInfo {
    pub prayer: Prayer,
    /// Clock time as listed in the day's time set
    pub clock_time: NaiveTime,
    /// Full local date and time of the event (tomorrow after Isha)
    pub at: NaiveDateTime,
    pub remaining: Remaining,
}

/// Coarse lifecycle state exposed to display code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// No current result; a location or arbitration cycle is in flight
    #[default]
    Loading,
    /// A fresh result is available
    Ready,
    /// Both sources failed; `refresh` retries the whole cycle
    Error { message: String },
}
