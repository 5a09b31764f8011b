//! Absolute instants shared by every time source.
//!
//! Log lines, container tags and telemetry all end up as a [`Timestamp`]:
//! integer microseconds since the Unix epoch, so ordering is exact at the
//! granularity the log format carries.

use std::fmt;
use std::ops::{Add, Sub};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const MICROS_PER_SEC: i64 = 1_000_000;

/// Naive date/time formats accepted for ISO-8601 values without a zone designator
const NAIVE_ISO_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// How to place a wall-clock reading that carries no zone designator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    /// The machine's local timezone
    #[default]
    Local,
    /// Coordinated universal time
    Utc,
}

/// An absolute point in time with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    pub const fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    pub const fn as_micros(&self) -> i64 {
        self.micros
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self {
            micros: (secs * MICROS_PER_SEC as f64).round() as i64,
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.micros as f64 / MICROS_PER_SEC as f64
    }

    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        Self {
            micros: dt.timestamp_micros(),
        }
    }

    /// Place a zone-less wall-clock reading. Ambiguous local times (DST fold)
    /// resolve to the earlier instant; nonexistent ones return `None`.
    pub fn from_naive(naive: &NaiveDateTime, zone: Zone) -> Option<Self> {
        match zone {
            Zone::Utc => Some(Self::from_datetime(&Utc.from_utc_datetime(naive))),
            Zone::Local => Local
                .from_local_datetime(naive)
                .earliest()
                .map(|dt| Self::from_datetime(&dt)),
        }
    }

    /// Parse an ISO-8601 value. Explicit offsets (including a trailing `Z`)
    /// are honoured; values without one are placed in `assumed`.
    pub fn parse_iso8601(value: &str, assumed: Zone) -> Option<Self> {
        let value = value.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Some(Self::from_datetime(&dt));
        }

        let naive_part = value.strip_suffix('Z').unwrap_or(value);
        let zone = if naive_part.len() != value.len() {
            Zone::Utc
        } else {
            assumed
        };

        NAIVE_ISO_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(naive_part, fmt).ok())
            .and_then(|naive| Self::from_naive(&naive, zone))
    }

    pub fn to_utc(&self) -> DateTime<Utc> {
        let secs = self.micros.div_euclid(MICROS_PER_SEC);
        let nanos = (self.micros.rem_euclid(MICROS_PER_SEC) * 1_000) as u32;
        Utc.timestamp_opt(secs, nanos)
            .single()
            .unwrap_or_default()
    }

    pub fn to_local(&self) -> DateTime<Local> {
        self.to_utc().with_timezone(&Local)
    }

    /// Render in local time with a chrono format string
    pub fn format_local(&self, fmt: &str) -> String {
        self.to_local().format(fmt).to_string()
    }

    pub fn format_in(&self, zone: Zone, fmt: &str) -> String {
        match zone {
            Zone::Local => self.format_local(fmt),
            Zone::Utc => self.to_utc().format(fmt).to_string(),
        }
    }
}

impl Add<f64> for Timestamp {
    type Output = Timestamp;

    fn add(self, secs: f64) -> Timestamp {
        Timestamp {
            micros: self.micros + (secs * MICROS_PER_SEC as f64).round() as i64,
        }
    }
}

impl Sub for Timestamp {
    type Output = f64;

    /// Signed distance in seconds
    fn sub(self, earlier: Timestamp) -> f64 {
        (self.micros - earlier.micros) as f64 / MICROS_PER_SEC as f64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_local("%Y-%m-%d %H:%M:%S%.6f"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iso8601_with_trailing_z_is_utc() {
        let ts = Timestamp::parse_iso8601("2022-06-11T17:42:10.250000Z", Zone::Local).unwrap();
        let expected = Utc.with_ymd_and_hms(2022, 6, 11, 17, 42, 10).unwrap();
        assert_eq!(ts.as_micros(), expected.timestamp_micros() + 250_000);
    }

    #[test]
    fn test_parse_iso8601_with_offset() {
        let a = Timestamp::parse_iso8601("2022-06-11T12:00:00-05:00", Zone::Local).unwrap();
        let b = Timestamp::parse_iso8601("2022-06-11T17:00:00Z", Zone::Local).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_iso8601_naive_uses_assumed_zone() {
        let naive = Timestamp::parse_iso8601("2022-06-11 17:00:00.5", Zone::Utc).unwrap();
        let zoned = Timestamp::parse_iso8601("2022-06-11T17:00:00.5Z", Zone::Local).unwrap();
        assert_eq!(naive, zoned);
    }

    #[test]
    fn test_parse_iso8601_rejects_garbage() {
        assert!(Timestamp::parse_iso8601("yesterday", Zone::Utc).is_none());
        assert!(Timestamp::parse_iso8601("", Zone::Utc).is_none());
    }

    #[test]
    fn test_arithmetic_keeps_microseconds() {
        let base = Timestamp::from_micros(1_000_000);
        let later = base + 2.000_001;
        assert_eq!(later.as_micros(), 3_000_001);
        assert!((later - base - 2.000_001).abs() < 1e-9);
        assert!((base - later + 2.000_001).abs() < 1e-9);
    }

    #[test]
    fn test_utc_round_trip_before_epoch() {
        let ts = Timestamp::from_micros(-1_500_000);
        assert_eq!(Timestamp::from_datetime(&ts.to_utc()), ts);
    }
}
