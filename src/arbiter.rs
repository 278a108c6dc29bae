//! # Time Source Arbitration
//!
//! Decides where a day's prayer times come from. The remote source is always
//! tried first, bounded by a timeout; any failure there is logged and swallowed,
//! and the same coordinates and date are computed locally straight away.
//!
//! ```text
//! Idle ──> FetchingRemote ──> ReadyRemote
//!                │
//!                └──> FetchingLocal ──> ReadyLocal
//!                          │
//!                          └──> Failed
//! ```
//!
//! `Failed` is only reachable from `FetchingLocal`, so callers see an error only
//! when the last fallback fails.

use crate::astronomy::{self, AstronomyError};
use crate::remote::{RemoteError, RemoteTimeSource};
use crate::{Coordinates, Origin, TimeSourceResult};
use chrono::{DateTime, FixedOffset};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Arbitration progress for one cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArbiterState {
    Idle,
    FetchingRemote,
    ReadyRemote,
    FetchingLocal,
    ReadyLocal,
    Failed,
}

/// Runs one remote-then-local arbitration per call.
#[derive(Debug)]
pub struct Arbiter<R> {
    remote: Arc<R>,
    timeout: Duration,
    state: ArbiterState,
}

impl<R: RemoteTimeSource> Arbiter<R> {
    pub fn new(remote: Arc<R>, timeout: Duration) -> Self {
        Self {
            remote,
            timeout,
            state: ArbiterState::Idle,
        }
    }

    pub fn state(&self) -> ArbiterState {
        self.state
    }

    /// Produce the times for `coords` on the civil day containing `now`.
    ///
    /// Only a failure of the local calculation is returned as an error.
    pub async fn arbitrate(
        &mut self,
        coords: Coordinates,
        now: DateTime<FixedOffset>,
    ) -> Result<TimeSourceResult, AstronomyError> {
        let span = info_span!(
            "arbitrate",
            lat = coords.latitude,
            lon = coords.longitude,
            date = %now.date_naive()
        );

        async move {
            self.transition(ArbiterState::FetchingRemote);
            match self.fetch_remote(coords, now).await {
                Ok(result) => {
                    self.transition(ArbiterState::ReadyRemote);
                    info!(origin = "remote", "prayer times ready");
                    return Ok(result);
                }
                Err(error) => {
                    warn!(%error, "remote prayer times unavailable; computing locally");
                }
            }

            self.transition(ArbiterState::FetchingLocal);
            match astronomy::compute(coords, now.date_naive(), *now.offset()) {
                Ok(local) => {
                    if local.reference_latitude != coords.latitude {
                        info!(
                            reference_latitude = local.reference_latitude,
                            "sun does not rise or set here today; using nearest latitude"
                        );
                    }
                    self.transition(ArbiterState::ReadyLocal);
                    info!(origin = "local", "prayer times ready");
                    Ok(TimeSourceResult {
                        times: local.times,
                        qibla_bearing: local.qibla_bearing,
                        origin: Origin::Local,
                    })
                }
                Err(err) => {
                    self.transition(ArbiterState::Failed);
                    error!(error = %err, "local prayer time calculation failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn fetch_remote(
        &self,
        coords: Coordinates,
        now: DateTime<FixedOffset>,
    ) -> Result<TimeSourceResult, RemoteError> {
        if !coords.is_valid() {
            return Err(RemoteError::InvalidCoordinates(coords));
        }

        let fetch = self.remote.fetch(coords, now.timestamp());
        let remote = tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| RemoteError::Timeout(self.timeout))??;

        Ok(TimeSourceResult {
            times: remote.times,
            // The service does not provide a bearing
            qibla_bearing: astronomy::qibla_bearing(coords),
            origin: Origin::Remote {
                hijri_date: remote.hijri_date,
            },
        })
    }

    fn transition(&mut self, next: ArbiterState) {
        debug!(from = ?self.state, to = ?next, "arbiter transition");
        self.state = next;
    }
}
