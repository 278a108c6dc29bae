//! # Remote Prayer Time Fetching
//!
//! This module handles the single network call that fetches the day's prayer
//! times and Hijri date from the AlAdhan timings service. It performs no retries
//! and never returns a partial answer: every field must be present and the times
//! must be strictly ordered, otherwise the whole call fails and the arbitrator
//! falls back to local computation.
//!
//! ## Data Source
//!
//! - **URL**: `{base_url}/timings/{unix_timestamp}?latitude=..&longitude=..&method=..`
//! - **Format**: JSON envelope
//!
//! ```json
//! { "code": 200,
//!   "data": {
//!     "timings": { "Fajr": "05:58", "Sunrise": "07:13", "Dhuhr": "13:15", ... },
//!     "date": { "hijri": { "day": "3", "month": { "en": "Rajab" }, "year": "1445" } } } }
//! ```
//!
//! Time strings may carry a trailing annotation (`"05:58 (+08)"`), which is
//! ignored.
//!
//! ## Error Handling
//!
//! All failure modes map onto [`RemoteError`]:
//! - **Transport**: connection, TLS, body read
//! - **Status**: any non-2xx answer
//! - **Payload**: malformed JSON, missing fields, unparseable or unordered times

use crate::config::RemoteConfig;
use crate::{Coordinates, PrayerTimeSet, TimeSetError};
use chrono::NaiveTime;
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while fetching remote prayer times.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// HTTP request failed (network, TLS or protocol error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),

    /// Body is not the expected JSON
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A required field is absent
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A time string is not `HH:MM`
    #[error("invalid time {value:?} for {field}")]
    InvalidTime { field: &'static str, value: String },

    /// The times do not form a valid day
    #[error("inconsistent timings: {0}")]
    Inconsistent(#[from] TimeSetError),

    /// No answer within the allotted time
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// Coordinates are unusable, so no request was sent
    #[error("refusing to query invalid coordinates ({0})")]
    InvalidCoordinates(Coordinates),

    /// The remote source is switched off
    #[error("remote source disabled")]
    Disabled,
}

/// Successful answer from a remote source.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTimes {
    pub times: PrayerTimeSet,
    /// Hijri date as "day month year"
    pub hijri_date: String,
}

/// A source of prayer times reachable over the network.
pub trait RemoteTimeSource: Send + Sync + 'static {
    /// Fetch the times for the day containing `timestamp` (Unix seconds).
    fn fetch(
        &self,
        coords: Coordinates,
        timestamp: i64,
    ) -> impl Future<Output = Result<RemoteTimes, RemoteError>> + Send;
}

/// `None` stands for a disabled remote source.
impl<S: RemoteTimeSource> RemoteTimeSource for Option<S> {
    async fn fetch(&self, coords: Coordinates, timestamp: i64) -> Result<RemoteTimes, RemoteError> {
        match self {
            Some(source) => source.fetch(coords, timestamp).await,
            None => Err(RemoteError::Disabled),
        }
    }
}

/// Client for the AlAdhan timings API.
#[derive(Debug, Clone)]
pub struct AladhanClient {
    http: reqwest::Client,
    base_url: String,
    method: u8,
}

impl AladhanClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            method: config.method,
        })
    }

    /// Request URL for a position and instant.
    pub fn url_for(&self, coords: Coordinates, timestamp: i64) -> String {
        format!(
            "{}/timings/{}?latitude={}&longitude={}&method={}",
            self.base_url, timestamp, coords.latitude, coords.longitude, self.method
        )
    }
}

impl RemoteTimeSource for AladhanClient {
    async fn fetch(&self, coords: Coordinates, timestamp: i64) -> Result<RemoteTimes, RemoteError> {
        let url = self.url_for(coords, timestamp);
        debug!(%url, "requesting remote prayer times");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status));
        }

        let body = response.bytes().await?;
        parse_timings(&body)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<Data>,
}

#[derive(Debug, Deserialize)]
struct Data {
    timings: Option<Timings>,
    date: Option<DateInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Timings {
    fajr: Option<String>,
    sunrise: Option<String>,
    dhuhr: Option<String>,
    asr: Option<String>,
    maghrib: Option<String>,
    isha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DateInfo {
    hijri: Option<Hijri>,
}

#[derive(Debug, Deserialize)]
struct Hijri {
    day: Option<String>,
    month: Option<HijriMonth>,
    year: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HijriMonth {
    en: Option<String>,
}

/// Parse a timings response body.
///
/// # Example
/// ```
/// use prayer_clock_lib::remote::parse_timings;
///
/// let body = br#"{"data":{
///     "timings":{"Fajr":"05:45","Sunrise":"07:10","Dhuhr":"13:05",
///                "Asr":"16:20","Maghrib":"19:10","Isha":"20:25 (+08)"},
///     "date":{"hijri":{"day":"3","month":{"en":"Rajab"},"year":"1445"}}}}"#;
///
/// let parsed = parse_timings(body).unwrap();
/// assert_eq!(parsed.hijri_date, "3 Rajab 1445");
/// assert_eq!(parsed.times.isha().format("%H:%M").to_string(), "20:25");
/// ```
pub fn parse_timings(body: &[u8]) -> Result<RemoteTimes, RemoteError> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    let data = envelope.data.ok_or(RemoteError::MissingField("data"))?;
    let timings = data.timings.ok_or(RemoteError::MissingField("data.timings"))?;

    let times = PrayerTimeSet::new(
        clock_time("Fajr", timings.fajr)?,
        clock_time("Sunrise", timings.sunrise)?,
        clock_time("Dhuhr", timings.dhuhr)?,
        clock_time("Asr", timings.asr)?,
        clock_time("Maghrib", timings.maghrib)?,
        clock_time("Isha", timings.isha)?,
    )?;

    let hijri = data
        .date
        .and_then(|date| date.hijri)
        .ok_or(RemoteError::MissingField("data.date.hijri"))?;
    let day = hijri.day.ok_or(RemoteError::MissingField("hijri.day"))?;
    let month = hijri
        .month
        .and_then(|month| month.en)
        .ok_or(RemoteError::MissingField("hijri.month.en"))?;
    let year = hijri.year.ok_or(RemoteError::MissingField("hijri.year"))?;

    Ok(RemoteTimes {
        times,
        hijri_date: format!("{day} {month} {year}"),
    })
}

fn clock_time(field: &'static str, value: Option<String>) -> Result<NaiveTime, RemoteError> {
    let value = value.ok_or(RemoteError::MissingField(field))?;
    let clock = value.split_whitespace().next().unwrap_or_default();
    NaiveTime::parse_from_str(clock, "%H:%M").map_err(|_| RemoteError::InvalidTime { field, value })
}
