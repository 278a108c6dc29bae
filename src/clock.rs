//! # Wall Clock
//!
//! The engine reads "now" through [`Clock`] so the civil clock the prayer times
//! are expressed in can be pinned to a UTC offset, and so tests can drive it.

use chrono::{DateTime, FixedOffset, Local, Utc};

/// Source of the current civil date and time.
pub trait Clock: Send + Sync + 'static {
    /// Current instant, carrying the offset of the civil clock.
    fn now(&self) -> DateTime<FixedOffset>;
}

/// The system clock, shown at a fixed UTC offset or in the host's local zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemClock {
    utc_offset: Option<FixedOffset>,
}

impl SystemClock {
    pub fn new(utc_offset: Option<FixedOffset>) -> Self {
        Self { utc_offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        match self.utc_offset {
            Some(offset) => Utc::now().with_timezone(&offset),
            None => Local::now().into(),
        }
    }
}
