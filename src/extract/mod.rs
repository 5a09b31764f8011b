//! # Start-Time Extraction
//!
//! Derives the absolute wall-clock time of a video's first frame.
//!
//! Two strategies exist and the caller picks one explicitly; a failure in the
//! chosen strategy is never papered over by trying the other:
//!
//! - [`StartTimeSource::ContainerMetadata`] reads the `creation_time` tag.
//!   Cheap, but cameras have been seen writing it up to a second off.
//! - [`StartTimeSource::Telemetry`] runs an external tool that dumps the
//!   embedded GPS track and takes the time of its first fix.

pub mod container;
pub mod telemetry;

use std::path::Path;

use tracing::info;

use crate::{error::Result, timestamp::Timestamp, video::MediaProbe};

pub use container::{start_from_container, CREATION_TIME_TAG};
pub use telemetry::TelemetryExtractor;

/// Where a video's start time comes from
#[derive(Debug, Clone, PartialEq)]
pub enum StartTimeSource {
    ContainerMetadata,
    Telemetry(TelemetryExtractor),
}

impl StartTimeSource {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ContainerMetadata => "container metadata",
            Self::Telemetry(_) => "telemetry",
        }
    }
}

/// Absolute start time of the video at `path`
pub fn extract_start_time(
    path: &Path,
    probe: &MediaProbe,
    source: &StartTimeSource,
) -> Result<Timestamp> {
    let start = match source {
        StartTimeSource::ContainerMetadata => start_from_container(path, probe)?,
        StartTimeSource::Telemetry(extractor) => extractor.extract(path)?,
    };
    info!("Start time of {:?} from {}: {}", path, source.name(), start);
    Ok(start)
}
