//! Totally ordered timestamps used for conflict resolution.
//!
//! A timestamp pairs an NTP64 time with the 16-byte id of the clock that
//! produced it. Ordering is by time first, then lexicographically by clock
//! id, so two distinct clocks never produce equal timestamps.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Number of NTP fractions per second (2^32).
const FRAC_PER_SEC: u64 = 1 << 32;

/// Number of nanoseconds per second.
const NANO_PER_SEC: u64 = 1_000_000_000;

/// Identifier of the clock that generated a timestamp.
pub type ClockId = [u8; 16];

/// A unique, totally ordered timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    time: u64,
    clock_id: ClockId,
}

impl Timestamp {
    /// Build a timestamp from a raw NTP64 time and a clock id.
    pub const fn new(time: u64, clock_id: ClockId) -> Self {
        Self { time, clock_id }
    }

    /// Build a timestamp from wall-clock time.
    pub fn from_system_time(t: SystemTime, clock_id: ClockId) -> Self {
        let since_epoch = t.duration_since(UNIX_EPOCH).unwrap_or_default();
        let secs = since_epoch.as_secs() & 0xffff_ffff;
        let frac = (u64::from(since_epoch.subsec_nanos()) * FRAC_PER_SEC) / NANO_PER_SEC;
        Self::new((secs << 32) | frac, clock_id)
    }

    /// A timestamp for "now" with an all-zero clock id.
    ///
    /// Used only when a reply arrives without a timestamp and the workspace
    /// is configured to tolerate it. Ordering against real timestamps from
    /// remote clocks is not meaningful.
    pub fn synthesize() -> Self {
        Self::from_system_time(SystemTime::now(), [0; 16])
    }

    /// Raw NTP64 time: upper 32 bits are seconds since the UNIX epoch,
    /// lower 32 bits a fraction of a second.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Id of the clock that generated this timestamp.
    pub fn clock_id(&self) -> &ClockId {
        &self.clock_id
    }

    /// True if this timestamp was synthesized locally.
    pub fn is_synthesized(&self) -> bool {
        self.clock_id == [0; 16]
    }

    /// The time part as a UTC date-time.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.time >> 32;
        let frac = self.time & 0xffff_ffff;
        let nanos = (frac * NANO_PER_SEC) / FRAC_PER_SEC;
        Utc.timestamp_opt(secs as i64, nanos as u32)
            .single()
            .unwrap_or_default()
    }

    /// True if `self` orders strictly before `other`.
    pub fn before(&self, other: &Timestamp) -> bool {
        self < other
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.to_datetime().to_rfc3339_opts(SecondsFormat::Nanos, true),
            hex::encode(self.clock_id)
        )
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_system_time(dt.into(), [0; 16])
    }
}
