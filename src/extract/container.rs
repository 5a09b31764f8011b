use std::path::Path;

use crate::{
    error::{MetadataError, Result},
    timestamp::{Timestamp, Zone},
    video::MediaProbe,
};

pub const CREATION_TIME_TAG: &str = "creation_time";

/// Start time from the embedded `creation_time` tag, read as UTC
pub fn start_from_container(path: &Path, probe: &MediaProbe) -> Result<Timestamp> {
    let value = probe
        .tag(CREATION_TIME_TAG)
        .ok_or_else(|| MetadataError::MissingTag {
            path: path.display().to_string(),
            tag: CREATION_TIME_TAG.to_string(),
        })?;

    let trimmed = value.trim();
    let naive = trimmed.strip_suffix('Z').unwrap_or(trimmed);

    Timestamp::parse_iso8601(naive, Zone::Utc).ok_or_else(|| {
        MetadataError::InvalidTimestamp {
            path: path.display().to_string(),
            tag: CREATION_TIME_TAG.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}
