//! # Location Resolution
//!
//! This module turns a location capability into a [`Coordinates`] value. The
//! capability is a single attempt that may fail (denied, unavailable, timed out,
//! nonsense answer); [`resolve`] never fails and substitutes a fixed fallback
//! position instead.
//!
//! ## Providers
//! - [`IpApiLocator`]: approximate position from IP geolocation (ip-api.com)
//! - [`FixedLocator`]: a position known ahead of time
//! - [`NoLocator`]: no capability at all
//!
//! [`ConfiguredLocator`] picks one of these from the configuration file.

use crate::config::{LocationConfig, LocationProvider};
use crate::Coordinates;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

/// Reasons a location attempt produced no usable position.
///
/// These never leave this module's [`resolve`]; they are logged and replaced by
/// the fallback position.
#[derive(Error, Debug)]
pub enum LocationError {
    /// No location capability is available
    #[error("location capability unavailable")]
    Unavailable,

    /// Transport failure talking to the geolocation service
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered but refused or could not locate us
    #[error("geolocation service failed: {0}")]
    Service(String),

    /// The attempt did not finish in time
    #[error("no location within {0:?}")]
    Timeout(Duration),

    /// The reported position is not a valid coordinate pair
    #[error("invalid position reported ({0})")]
    Invalid(Coordinates),
}

/// A capability that can report the current position once per call.
pub trait Locator: Send + Sync + 'static {
    fn locate(&self) -> impl Future<Output = Result<Coordinates, LocationError>> + Send;
}

/// Resolve the current position with a single bounded attempt.
///
/// Any failure is logged and the `fallback` position returned instead.
pub async fn resolve<L: Locator>(
    locator: &L,
    fallback: Coordinates,
    timeout: Duration,
) -> Coordinates {
    let span = info_span!("location.resolve", timeout_ms = timeout.as_millis() as u64);

    async move {
        let attempt = match tokio::time::timeout(timeout, locator.locate()).await {
            Ok(Ok(coords)) if coords.is_valid() => Ok(coords),
            Ok(Ok(coords)) => Err(LocationError::Invalid(coords)),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(LocationError::Timeout(timeout)),
        };

        match attempt {
            Ok(coords) => {
                info!(lat = coords.latitude, lon = coords.longitude, "location resolved");
                coords
            }
            Err(error) => {
                warn!(
                    %error,
                    lat = fallback.latitude,
                    lon = fallback.longitude,
                    "location unavailable; using fallback position"
                );
                fallback
            }
        }
    }
    .instrument(span)
    .await
}

/// Always reports the same position.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocator(pub Coordinates);

impl Locator for FixedLocator {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        Ok(self.0)
    }
}

/// Has no location capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocator;

impl Locator for NoLocator {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        Err(LocationError::Unavailable)
    }
}

/// Default IP geolocation endpoint
pub const IP_API_URL: &str = "http://ip-api.com/json/?fields=status,message,lat,lon,city";

/// Approximate position from the public IP address.
#[derive(Debug, Clone)]
pub struct IpApiLocator {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
}

impl IpApiLocator {
    pub fn new(timeout: Duration) -> Result<Self, LocationError> {
        Self::with_url(IP_API_URL, timeout)
    }

    pub fn with_url(url: impl Into<String>, timeout: Duration) -> Result<Self, LocationError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

impl Locator for IpApiLocator {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        let response = self.http.get(&self.url).send().await?.error_for_status()?;
        let body: IpApiResponse = response.json().await?;
        parse_ip_api(body)
    }
}

fn parse_ip_api(body: IpApiResponse) -> Result<Coordinates, LocationError> {
    if body.status != "success" {
        return Err(LocationError::Service(
            body.message.unwrap_or_else(|| body.status.clone()),
        ));
    }
    match (body.lat, body.lon) {
        (Some(lat), Some(lon)) => {
            if let Some(city) = &body.city {
                info!(%city, "geolocated by IP");
            }
            Ok(Coordinates::new(lat, lon))
        }
        _ => Err(LocationError::Service("response without coordinates".into())),
    }
}

/// The locator selected by `[location] provider`.
#[derive(Debug, Clone)]
pub enum ConfiguredLocator {
    Ip(IpApiLocator),
    Fixed(FixedLocator),
    None(NoLocator),
}

impl ConfiguredLocator {
    pub fn from_config(config: &LocationConfig) -> Result<Self, LocationError> {
        Ok(match config.provider {
            LocationProvider::Ip => Self::Ip(IpApiLocator::new(config.timeout())?),
            LocationProvider::Fixed => match config.fixed() {
                Some(coords) => Self::Fixed(FixedLocator(coords)),
                None => {
                    warn!("provider is \"fixed\" but latitude/longitude are missing");
                    Self::None(NoLocator)
                }
            },
            LocationProvider::None => Self::None(NoLocator),
        })
    }
}

impl Locator for ConfiguredLocator {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        match self {
            Self::Ip(locator) => locator.locate().await,
            Self::Fixed(locator) => locator.locate().await,
            Self::None(locator) => locator.locate().await,
        }
    }
}
