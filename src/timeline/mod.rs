//! # Timeline Alignment
//!
//! Places the secondary (dash) video on the primary video's timeline.
//!
//! The two start times come from different places: the primary's from its
//! container tag or GPS telemetry, the secondary's from its own `TIMESTAMP`
//! tag. Nothing guarantees both clocks share a zone: an offset close to a
//! whole number of hours is flagged, and an optional hard limit rejects
//! large offsets outright.

use std::path::Path;

use tracing::{info, warn};

use crate::{
    config::AlignmentConfig,
    error::{AlignmentError, Result},
    timestamp::Timestamp,
    video::MediaProbe,
};

const SECS_PER_HOUR: f64 = 3600.0;

/// How close to a whole number of hours an offset must sit to look like a
/// zone mismatch
const ZONE_MISMATCH_TOLERANCE_SECS: f64 = 120.0;

/// Signed shift from the primary timeline to the secondary one:
/// `primary_start - secondary_start`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeOffset {
    secs: f64,
}

/// Range to read from the secondary video, in its own seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecondaryWindow {
    /// May be negative when the secondary starts after the requested window
    pub start: f64,
    pub duration: f64,
}

impl TimeOffset {
    pub fn between(primary_start: Timestamp, secondary_start: Timestamp) -> Self {
        Self {
            secs: primary_start - secondary_start,
        }
    }

    pub fn from_secs(secs: f64) -> Self {
        Self { secs }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.secs
    }

    /// Secondary read request matching the primary window `[start, start + duration)`
    pub fn secondary_window(&self, start: f64, duration: f64) -> SecondaryWindow {
        SecondaryWindow {
            start: start + self.secs,
            duration,
        }
    }
}

/// Secondary start time from its probed timestamp tag.
///
/// Accepts ISO-8601 (zone-less values use the configured zone) or numeric
/// epoch seconds.
pub fn secondary_start_from_probe(
    path: &Path,
    probe: &MediaProbe,
    config: &AlignmentConfig,
) -> Result<Timestamp> {
    let value = probe
        .tag(&config.timestamp_tag)
        .ok_or_else(|| AlignmentError::MissingTag {
            path: path.display().to_string(),
            tag: config.timestamp_tag.clone(),
        })?;

    let parsed = match value.trim().parse::<f64>() {
        Ok(epoch) if epoch.is_finite() => Some(Timestamp::from_secs_f64(epoch)),
        _ => Timestamp::parse_iso8601(value, config.zone),
    };

    parsed.ok_or_else(|| {
        AlignmentError::InvalidTimestamp {
            path: path.display().to_string(),
            tag: config.timestamp_tag.clone(),
            value: value.to_string(),
        }
        .into()
    })
}

/// Offset between the two start times, checked for plausibility
pub fn align(
    primary_start: Timestamp,
    secondary_start: Timestamp,
    config: &AlignmentConfig,
) -> Result<TimeOffset> {
    let offset = TimeOffset::between(primary_start, secondary_start);
    let secs = offset.as_secs_f64();

    if let Some(limit) = config.max_offset_secs {
        if secs.abs() > limit {
            return Err(AlignmentError::Implausible {
                offset_secs: secs,
                limit_secs: limit,
            }
            .into());
        }
    }

    if looks_like_zone_mismatch(secs) {
        warn!(
            "Dash offset of {:.3}s is close to a whole number of hours; check that both start times use the same timezone",
            secs
        );
    }

    info!("Dash video offset: {:+.3}s", secs);
    Ok(offset)
}

fn looks_like_zone_mismatch(secs: f64) -> bool {
    let hours = (secs / SECS_PER_HOUR).round();
    hours != 0.0 && (secs - hours * SECS_PER_HOUR).abs() <= ZONE_MISMATCH_TOLERANCE_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Zone;
    use crate::video::probe::tests::sample_probe;
    use crate::VidlogError;

    fn ts(value: &str) -> Timestamp {
        Timestamp::parse_iso8601(value, Zone::Utc).unwrap()
    }

    #[test]
    fn test_offset_is_primary_minus_secondary() {
        let t1 = ts("2022-06-11T17:42:10.250Z");
        let t2 = ts("2022-06-11T17:42:05.000Z");
        let offset = align(t1, t2, &AlignmentConfig::default()).unwrap();
        assert_eq!(offset.as_secs_f64(), t1 - t2);
        assert_eq!(offset.as_secs_f64(), 5.25);
    }

    #[test]
    fn test_secondary_window_is_shifted() {
        let offset = TimeOffset::from_secs(5.25);
        let window = offset.secondary_window(12.0, 30.0);
        assert_eq!(window.start, 17.25);
        assert_eq!(window.start + window.duration, 12.0 + 5.25 + 30.0);

        let behind = TimeOffset::from_secs(-3.0).secondary_window(1.0, 10.0);
        assert_eq!(behind.start, -2.0);
    }

    #[test]
    fn test_secondary_start_from_tag() {
        let probe = sample_probe();
        let start =
            secondary_start_from_probe(Path::new("dash.mp4"), &probe, &AlignmentConfig::default())
                .unwrap();
        assert_eq!(start, ts("2022-06-11T17:42:05.5Z"));
    }

    #[test]
    fn test_secondary_start_from_epoch_seconds() {
        let probe = MediaProbe::from_json(
            "dash.mkv",
            br#"{"streams":[{"codec_type":"video"}],"format":{"tags":{"TIMESTAMP":"1654969325.5"}}}"#,
        )
        .unwrap();
        let start =
            secondary_start_from_probe(Path::new("dash.mkv"), &probe, &AlignmentConfig::default())
                .unwrap();
        assert_eq!(start.as_micros(), 1_654_969_325_500_000);
    }

    #[test]
    fn test_missing_secondary_tag_is_alignment_error() {
        let probe =
            MediaProbe::from_json("dash.mp4", br#"{"streams":[{"codec_type":"video"}]}"#).unwrap();
        let err =
            secondary_start_from_probe(Path::new("dash.mp4"), &probe, &AlignmentConfig::default())
                .unwrap_err();
        assert!(matches!(
            err,
            VidlogError::Alignment(AlignmentError::MissingTag { .. })
        ));
    }

    #[test]
    fn test_long_offset_accepted_by_default() {
        // Second chapter of a split recording against one continuous dash capture
        let dash = ts("2022-06-11T17:30:00Z");
        let offset = align(dash + 720.0, dash, &AlignmentConfig::default()).unwrap();
        assert_eq!(offset.as_secs_f64(), 720.0);

        let whole_hours = align(dash + 3600.0, dash, &AlignmentConfig::default()).unwrap();
        assert_eq!(whole_hours.as_secs_f64(), 3600.0);
    }

    #[test]
    fn test_offset_limit_is_opt_in() {
        let config = AlignmentConfig {
            max_offset_secs: Some(600.0),
            ..AlignmentConfig::default()
        };
        let dash = ts("2022-06-11T17:30:00Z");
        assert!(align(dash + 599.0, dash, &config).is_ok());

        let t1 = ts("2022-06-11T17:42:10Z");
        let t2 = ts("2022-06-11T12:42:10Z");
        let err = align(t1, t2, &config).unwrap_err();
        assert!(matches!(
            err,
            VidlogError::Alignment(AlignmentError::Implausible { .. })
        ));
    }

    #[test]
    fn test_zone_mismatch_heuristic() {
        assert!(looks_like_zone_mismatch(3600.0));
        assert!(looks_like_zone_mismatch(-18_030.0));
        assert!(!looks_like_zone_mismatch(5.0));
        assert!(!looks_like_zone_mismatch(1800.0));
    }
}
