//! # Offline Prayer Time Calculation
//!
//! This module computes the daily prayer times and the qibla bearing from solar
//! position alone, with no network access. It is the fallback used whenever the
//! remote service cannot answer, and it must give the same answer every time for
//! the same inputs.
//!
//! ## Model
//!
//! ### Solar position
//! A low-precision solar ephemeris (accurate to about a minute of time between
//! 1950 and 2050) gives the sun's declination and the equation of time for a
//! Julian date. Each prayer is then the moment the sun reaches a given altitude:
//!
//! ```text
//! cos(H) = (sin(-angle) - sin(decl) * sin(lat)) / (cos(decl) * cos(lat))
//! time   = noon ∓ H / 15
//! ```
//!
//! Every event is solved twice, the second pass using the first pass's result as
//! the fraction of the day at which to evaluate the sun.
//!
//! ### Convention
//! Fixed constants compatible with the Malaysian/Singaporean authorities:
//! - **Fajr**: sun 20° below the horizon
//! - **Sunrise/Maghrib**: 0.833° below the horizon (refraction + solar radius)
//! - **Dhuhr**: one minute after solar transit
//! - **Asr**: shadow length equal to object length plus the noon shadow
//! - **Isha**: sun 18° below the horizon
//!
//! ### High latitudes
//! When twilight never gets deep enough (or is unreasonably long), Fajr and Isha
//! are limited to a portion of the night: half of it up to 45°, a seventh of it
//! beyond. When the sun does not rise, set or reach the Asr altitude at all, the
//! day is solved at the nearest latitude (stepping toward the equator) where it
//! does, and that latitude is reported as [`LocalCalculation::reference_latitude`].
//!
//! ### Civil day
//! The result is always one ordered set inside `00:00..=23:59`. Events the sun
//! places before midnight or after the next midnight (Isha in a European
//! midsummer, Maghrib in Reykjavik) are pinned to the edge of the day, keeping
//! one minute between neighbours.
//!
//! ### Determinism
//! All arithmetic is plain `f64` on the supplied inputs. Clock times are truncated
//! to the minute, never rounded.

use crate::{Coordinates, PrayerTimeSet};
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveTime};
use thiserror::Error;

/// Position of the Kaaba, the qibla reference point
pub const KAABA: Coordinates = Coordinates::new(21.422_524_1, 39.826_181_8);

const FAJR_ANGLE: f64 = 20.0;
const ISHA_ANGLE: f64 = 18.0;
const RISE_SET_ANGLE: f64 = 0.833;
const ASR_SHADOW_FACTOR: f64 = 1.0;
const DHUHR_OFFSET_HOURS: f64 = 1.0 / 60.0;
/// Above this latitude the seventh-of-the-night rule replaces middle-of-the-night
const SEVENTH_OF_NIGHT_LATITUDE: f64 = 45.0;
const ITERATIONS: usize = 2;
/// Degrees moved toward the equator per nearest-latitude attempt
const LATITUDE_STEP: f64 = 0.5;
const MINUTES_PER_DAY: i64 = 24 * 60;

/// Failure of the local calculation.
///
/// Every valid coordinate pair produces a result; only unusable input fails.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AstronomyError {
    /// Latitude or longitude is not finite or out of range
    #[error("invalid coordinates ({0})")]
    InvalidCoordinates(Coordinates),
}

/// Output of the local calculation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalCalculation {
    pub times: PrayerTimeSet,
    /// Degrees clockwise from true north, in `[0, 360)`
    pub qibla_bearing: f64,
    /// Latitude the sun was solved at; differs from the input only where the
    /// sun does not rise, set or reach the Asr altitude on that date
    pub reference_latitude: f64,
}

/// Compute the prayer times and qibla bearing for a civil date.
///
/// `utc_offset` is the offset of the civil clock the times are expressed in.
///
/// # Example
/// ```
/// use chrono::{FixedOffset, NaiveDate};
/// use prayer_clock_lib::{astronomy, Coordinates};
///
/// let kl = Coordinates::new(3.1390, 101.6869);
/// let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
/// let offset = FixedOffset::east_opt(8 * 3600).unwrap();
///
/// let result = astronomy::compute(kl, date, offset).unwrap();
/// assert_eq!(result.times.dhuhr().format("%H:%M").to_string(), "13:23");
/// ```
pub fn compute(
    coords: Coordinates,
    date: NaiveDate,
    utc_offset: FixedOffset,
) -> Result<LocalCalculation, AstronomyError> {
    if !coords.is_valid() {
        return Err(AstronomyError::InvalidCoordinates(coords));
    }

    let (reference_latitude, solar) = nearest_solvable_latitude(coords, date);
    let day = civil_hours(solar, reference_latitude, coords.longitude, utc_offset);
    let [fajr, sunrise, dhuhr, asr, maghrib, isha] = fit_to_civil_day(&day);

    // fit_to_civil_day yields strictly increasing minutes of one day
    let times = PrayerTimeSet {
        fajr,
        sunrise,
        dhuhr,
        asr,
        maghrib,
        isha,
    };

    Ok(LocalCalculation {
        times,
        qibla_bearing: qibla_bearing(coords),
        reference_latitude,
    })
}

/// Initial great-circle bearing from `coords` to the Kaaba.
///
/// Returns degrees clockwise from true north, normalized to `[0, 360)`. At the
/// Kaaba itself the bearing is 0.
///
/// # Example
/// ```
/// use prayer_clock_lib::{astronomy, Coordinates};
///
/// let bearing = astronomy::qibla_bearing(Coordinates::new(3.1390, 101.6869));
/// assert!((bearing - 292.54).abs() < 0.01);
/// ```
pub fn qibla_bearing(coords: Coordinates) -> f64 {
    let phi1 = coords.latitude.to_radians();
    let phi2 = KAABA.latitude.to_radians();
    let delta_lambda = (KAABA.longitude - coords.longitude).to_radians();

    let y = delta_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round a tiny negative input up to exactly 360.0
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Event times as fractional hours of the civil day (may be NaN or out of range).
#[derive(Clone, Copy, Debug)]
struct DayHours {
    fajr: f64,
    sunrise: f64,
    dhuhr: f64,
    asr: f64,
    maghrib: f64,
    isha: f64,
}

/// Seed values used for the first pass (and whenever a pass yields NaN).
const INITIAL_GUESS: DayHours = DayHours {
    fajr: 5.0,
    sunrise: 6.0,
    dhuhr: 12.0,
    asr: 13.0,
    maghrib: 18.0,
    isha: 18.0,
};

/// Solve the day at the input latitude, or at the nearest latitude toward the
/// equator where sunrise, Asr and sunset all exist.
fn nearest_solvable_latitude(coords: Coordinates, date: NaiveDate) -> (f64, DayHours) {
    let mut latitude = coords.latitude;
    loop {
        let hours = solar_hours(latitude, coords.longitude, date);
        let solvable =
            hours.sunrise.is_finite() && hours.asr.is_finite() && hours.maghrib.is_finite();
        if solvable || latitude == 0.0 {
            return (latitude, hours);
        }
        latitude = (latitude.abs() - LATITUDE_STEP).max(0.0).copysign(latitude);
    }
}

/// Event times in local solar hours; unreachable altitudes come back as NaN.
fn solar_hours(lat: f64, lng: f64, date: NaiveDate) -> DayHours {
    let sky = Sky {
        jdate: julian_day(date.year(), date.month(), date.day()) - lng / (15.0 * 24.0),
        lat,
    };

    let mut hours = INITIAL_GUESS;
    for _ in 0..ITERATIONS {
        let portion = |value: f64, seed: f64| {
            let hour = if value.is_finite() { value } else { seed };
            hour / 24.0
        };
        let p = DayHours {
            fajr: portion(hours.fajr, INITIAL_GUESS.fajr),
            sunrise: portion(hours.sunrise, INITIAL_GUESS.sunrise),
            dhuhr: portion(hours.dhuhr, INITIAL_GUESS.dhuhr),
            asr: portion(hours.asr, INITIAL_GUESS.asr),
            maghrib: portion(hours.maghrib, INITIAL_GUESS.maghrib),
            isha: portion(hours.isha, INITIAL_GUESS.isha),
        };

        hours = DayHours {
            fajr: sky.angle_time(FAJR_ANGLE, p.fajr, Direction::BeforeNoon),
            sunrise: sky.angle_time(RISE_SET_ANGLE, p.sunrise, Direction::BeforeNoon),
            dhuhr: sky.mid_day(p.dhuhr),
            asr: sky.asr_time(ASR_SHADOW_FACTOR, p.asr),
            maghrib: sky.angle_time(RISE_SET_ANGLE, p.maghrib, Direction::AfterNoon),
            isha: sky.angle_time(ISHA_ANGLE, p.isha, Direction::AfterNoon),
        };
    }
    hours
}

/// Shift solar hours onto the civil clock and bound Fajr/Isha by the night.
fn civil_hours(hours: DayHours, lat: f64, lng: f64, utc_offset: FixedOffset) -> DayHours {
    let zone = f64::from(utc_offset.local_minus_utc()) / 3600.0;
    let shift = zone - lng / 15.0;
    let mut day = DayHours {
        fajr: hours.fajr + shift,
        sunrise: hours.sunrise + shift,
        dhuhr: hours.dhuhr + shift + DHUHR_OFFSET_HOURS,
        asr: hours.asr + shift,
        maghrib: hours.maghrib + shift,
        isha: hours.isha + shift,
    };

    // Limit twilight to a portion of the night
    let night = fix_hour(day.sunrise - day.maghrib);
    let portion = if lat.abs() > SEVENTH_OF_NIGHT_LATITUDE {
        night / 7.0
    } else {
        night / 2.0
    };
    if day.fajr.is_nan() || fix_hour(day.sunrise - day.fajr) > portion {
        day.fajr = day.sunrise - portion;
    }
    if day.isha.is_nan() || fix_hour(day.isha - day.maghrib) > portion {
        day.isha = day.maghrib + portion;
    }

    day
}

/// Truncate to whole minutes and squeeze into one strictly increasing civil day.
fn fit_to_civil_day(day: &DayHours) -> [NaiveTime; 6] {
    let hours = [day.fajr, day.sunrise, day.dhuhr, day.asr, day.maghrib, day.isha];
    let seeds = [
        INITIAL_GUESS.fajr,
        INITIAL_GUESS.sunrise,
        INITIAL_GUESS.dhuhr,
        INITIAL_GUESS.asr,
        INITIAL_GUESS.maghrib,
        INITIAL_GUESS.isha,
    ];

    let mut minutes = [0i64; 6];
    for (slot, (hour, seed)) in minutes.iter_mut().zip(hours.into_iter().zip(seeds)) {
        let hour = if hour.is_finite() { hour } else { seed };
        *slot = truncate_to_minutes(hour).clamp(0, MINUTES_PER_DAY - 1);
    }

    // Push later events forward past their predecessor, then pull everything
    // back under the end of the day
    for i in 1..minutes.len() {
        minutes[i] = minutes[i].max(minutes[i - 1] + 1);
    }
    minutes[5] = minutes[5].min(MINUTES_PER_DAY - 1);
    for i in (0..minutes.len() - 1).rev() {
        minutes[i] = minutes[i].min(minutes[i + 1] - 1);
    }

    minutes.map(minute_of_day)
}

/// Fractional hours to whole minutes, truncating seconds.
fn truncate_to_minutes(hours: f64) -> i64 {
    ((hours * 3600.0).floor() as i64).div_euclid(60)
}

fn minute_of_day(minutes: i64) -> NaiveTime {
    let minutes = minutes.clamp(0, MINUTES_PER_DAY - 1) as u32;
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap_or(NaiveTime::MIN)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    BeforeNoon,
    AfterNoon,
}

/// Solar geometry for one observer and date.
struct Sky {
    /// Julian date at local midnight, corrected for longitude
    jdate: f64,
    lat: f64,
}

impl Sky {
    /// Solar noon as fractional hours of local solar time.
    fn mid_day(&self, day_portion: f64) -> f64 {
        let sun = sun_position(self.jdate + day_portion);
        fix_hour(12.0 - sun.equation_of_time)
    }

    /// Time the sun is `angle` degrees below the horizon, before or after noon.
    fn angle_time(&self, angle: f64, day_portion: f64, direction: Direction) -> f64 {
        let decl = sun_position(self.jdate + day_portion).declination;
        let noon = self.mid_day(day_portion);
        let cos_h = (-dsin(angle) - dsin(decl) * dsin(self.lat)) / (dcos(decl) * dcos(self.lat));
        // acos of an out-of-range value is NaN, which marks "no solution"
        let t = dacos(cos_h) / 15.0;
        match direction {
            Direction::BeforeNoon => noon - t,
            Direction::AfterNoon => noon + t,
        }
    }

    fn asr_time(&self, factor: f64, day_portion: f64) -> f64 {
        let decl = sun_position(self.jdate + day_portion).declination;
        let angle = -dacot(factor + dtan((self.lat - decl).abs()));
        self.angle_time(angle, day_portion, Direction::AfterNoon)
    }
}

struct SunPosition {
    declination: f64,
    equation_of_time: f64,
}

fn sun_position(jd: f64) -> SunPosition {
    let d = jd - 2_451_545.0;
    let g = fix_angle(357.529 + 0.985_600_28 * d);
    let q = fix_angle(280.459 + 0.985_647_36 * d);
    let l = fix_angle(q + 1.915 * dsin(g) + 0.020 * dsin(2.0 * g));
    let e = 23.439 - 0.000_000_36 * d;

    let ra = datan2(dcos(e) * dsin(l), dcos(l)) / 15.0;
    SunPosition {
        declination: dasin(dsin(e) * dsin(l)),
        equation_of_time: q / 15.0 - fix_hour(ra),
    }
}

/// Julian day number at 0h UT of a proleptic Gregorian date.
fn julian_day(year: i32, month: u32, day: u32) -> f64 {
    let (mut y, mut m) = (f64::from(year), f64::from(month));
    if m <= 2.0 {
        y -= 1.0;
        m += 12.0;
    }
    let a = (y / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();
    (365.25 * (y + 4716.0)).floor() + (30.6001 * (m + 1.0)).floor() + f64::from(day) + b - 1524.5
}

fn fix(value: f64, modulus: f64) -> f64 {
    value.rem_euclid(modulus)
}

fn fix_angle(degrees: f64) -> f64 {
    fix(degrees, 360.0)
}

fn fix_hour(hours: f64) -> f64 {
    fix(hours, 24.0)
}

fn dsin(d: f64) -> f64 {
    d.to_radians().sin()
}

fn dcos(d: f64) -> f64 {
    d.to_radians().cos()
}

fn dtan(d: f64) -> f64 {
    d.to_radians().tan()
}

fn dasin(x: f64) -> f64 {
    x.asin().to_degrees()
}

fn dacos(x: f64) -> f64 {
    x.acos().to_degrees()
}

fn datan2(y: f64, x: f64) -> f64 {
    y.atan2(x).to_degrees()
}

fn dacot(x: f64) -> f64 {
    (1.0 / x).atan().to_degrees()
}
