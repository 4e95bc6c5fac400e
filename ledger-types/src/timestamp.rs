//! Wall-clock timestamps.
//!
//! Documents are ordered across backends and devices purely by the wall-clock
//! millisecond at which they were written. There is no logical component, so
//! clock skew between devices is not compensated for.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The current system time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(millis)
    }

    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Converts to a UTC datetime. Out-of-range values clamp to the epoch.
    #[must_use]
    pub fn to_datetime(&self) -> DateTime<Utc> {
        i64::try_from(self.0)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_default()
    }

    /// The UTC calendar day this timestamp falls on.
    #[must_use]
    pub fn utc_date(&self) -> NaiveDate {
        self.to_datetime().date_naive()
    }

    /// Parses an RFC 3339 string.
    pub fn parse_rfc3339(s: &str) -> crate::Result<Self> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| crate::Error::InvalidTimestamp(format!("{s}: {e}")))?;
        u64::try_from(dt.timestamp_millis())
            .map(Self)
            .map_err(|_| crate::Error::InvalidTimestamp(format!("{s}: before Unix epoch")))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(u64::try_from(dt.timestamp_millis()).unwrap_or(0))
    }
}

/// Source of the current time.
///
/// Components take an `Arc<dyn Clock>` so day-bucketed behaviour (snapshot
/// rate limits) and document ordering can be driven deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(start.as_millis()),
        }
    }

    pub fn set(&self, ts: Timestamp) {
        self.millis.store(ts.as_millis(), Ordering::SeqCst);
    }

    /// Advances the clock and returns the new time.
    pub fn advance_millis(&self, millis: u64) -> Timestamp {
        Timestamp(self.millis.fetch_add(millis, Ordering::SeqCst) + millis)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.millis.load(Ordering::SeqCst))
    }
}
