use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::debug;

use crate::{
    error::{MetadataError, Result},
    timestamp::Timestamp,
};

/// Parsed `ffprobe -show_streams -show_format` output
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaProbe {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    pub format: Option<ProbeFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bit_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub r_frame_rate: Option<String>,
    pub nb_frames: Option<String>,
    pub duration: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl MediaProbe {
    /// Run ffprobe against a file
    pub fn run<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Probing {:?}", path);

        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .output()
            .map_err(|e| MetadataError::ProbeFailed {
                path: path.display().to_string(),
                reason: format!("failed to run ffprobe: {}", e),
            })?;

        if !output.status.success() {
            return Err(MetadataError::ProbeFailed {
                path: path.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Self::from_json(path, &output.stdout)
    }

    pub fn from_json<P: AsRef<Path>>(path: P, json: &[u8]) -> Result<Self> {
        serde_json::from_slice(json).map_err(|e| {
            MetadataError::ProbeFailed {
                path: path.as_ref().display().to_string(),
                reason: format!("ffprobe json parse failed: {}", e),
            }
            .into()
        })
    }

    /// First video stream
    pub fn video_stream(&self) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }

    /// Look a tag up on the video stream, then on the container.
    /// Tag names compare case-insensitively.
    pub fn tag(&self, name: &str) -> Option<&str> {
        let stream_tags = self.video_stream().map(|s| &s.tags);
        let format_tags = self.format.as_ref().map(|f| &f.tags);
        [stream_tags, format_tags]
            .into_iter()
            .flatten()
            .find_map(|tags| find_tag(tags, name))
    }
}

fn find_tag<'a>(tags: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Anything that can describe a media file's streams and tags
pub trait Prober: Send + Sync {
    fn probe(&self, path: &Path) -> Result<MediaProbe>;
}

/// Probes with the `ffprobe` binary on PATH
#[derive(Debug, Clone, Copy, Default)]
pub struct Ffprobe;

impl Prober for Ffprobe {
    fn probe(&self, path: &Path) -> Result<MediaProbe> {
        MediaProbe::run(path)
    }
}

/// Parse an ffmpeg rational such as `30000/1001`
pub fn parse_ff_ratio(s: &str) -> Option<(u32, u32)> {
    let (num, den) = s.split_once('/')?;
    let num: u32 = num.trim().parse().ok()?;
    let den: u32 = den.trim().parse().ok()?;
    if num == 0 || den == 0 {
        return None;
    }
    Some((num, den))
}

/// A probed video file with its absolute start time
#[derive(Debug, Clone)]
pub struct VideoAsset {
    pub path: PathBuf,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Seconds
    pub duration: f64,
    pub start: Timestamp,
    pub codec: String,
    pub bit_rate: Option<u64>,
    pub frame_count: Option<u64>,
}

impl VideoAsset {
    /// Combine probe output with a start time derived elsewhere
    pub fn from_probe<P: Into<PathBuf>>(path: P, probe: &MediaProbe, start: Timestamp) -> Result<Self> {
        let path = path.into();
        let missing = |field: &str| MetadataError::MissingField {
            path: path.display().to_string(),
            field: field.to_string(),
        };

        let stream = probe.video_stream().ok_or_else(|| MetadataError::NoVideoStream {
            path: path.display().to_string(),
        })?;

        let width = stream.width.ok_or_else(|| missing("width"))?;
        let height = stream.height.ok_or_else(|| missing("height"))?;

        let (num, den) = [&stream.avg_frame_rate, &stream.r_frame_rate]
            .into_iter()
            .flatten()
            .find_map(|rate| parse_ff_ratio(rate))
            .ok_or_else(|| missing("avg_frame_rate"))?;

        let duration = stream
            .duration
            .as_deref()
            .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        let bit_rate = stream
            .bit_rate
            .as_deref()
            .or(probe.format.as_ref().and_then(|f| f.bit_rate.as_deref()))
            .and_then(|b| b.parse().ok());

        Ok(Self {
            path,
            fps: num as f64 / den as f64,
            width,
            height,
            duration,
            start,
            codec: stream.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
            bit_rate,
            frame_count: stream.nb_frames.as_deref().and_then(|n| n.parse().ok()),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"{
        "streams": [
            {
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1280,
                "height": 720,
                "bit_rate": "12000000",
                "avg_frame_rate": "30000/1001",
                "r_frame_rate": "30000/1001",
                "nb_frames": "1798",
                "duration": "60.0600",
                "tags": { "creation_time": "2022-06-11T17:42:10.000000Z", "timecode": "17:42:10:00" }
            },
            { "codec_type": "audio", "codec_name": "aac" }
        ],
        "format": {
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": "60.060000",
            "tags": { "TIMESTAMP": "2022-06-11T17:42:05.500000Z" }
        }
    }"#;

    pub(crate) fn sample_probe() -> MediaProbe {
        MediaProbe::from_json("sample.mp4", SAMPLE.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_ff_ratio() {
        assert_eq!(parse_ff_ratio("30000/1001"), Some((30000, 1001)));
        assert_eq!(parse_ff_ratio("25/1"), Some((25, 1)));
        assert_eq!(parse_ff_ratio("0/0"), None);
        assert_eq!(parse_ff_ratio("abc"), None);
    }

    #[test]
    fn test_tag_lookup_falls_back_to_format() {
        let probe = sample_probe();
        assert_eq!(probe.tag("creation_time"), Some("2022-06-11T17:42:10.000000Z"));
        assert_eq!(probe.tag("timestamp"), Some("2022-06-11T17:42:05.500000Z"));
        assert_eq!(probe.tag("missing"), None);
    }

    #[test]
    fn test_asset_from_probe() {
        let probe = sample_probe();
        let asset = VideoAsset::from_probe("sample.mp4", &probe, Timestamp::from_micros(0)).unwrap();
        assert_eq!((asset.width, asset.height), (1280, 720));
        assert!((asset.fps - 29.97).abs() < 0.01);
        assert!((asset.duration - 60.06).abs() < 1e-9);
        assert_eq!(asset.codec, "h264");
        assert_eq!(asset.bit_rate, Some(12_000_000));
        assert_eq!(asset.frame_count, Some(1798));
    }

    #[test]
    fn test_asset_without_video_stream() {
        let probe = MediaProbe::from_json("a.m4a", br#"{"streams":[{"codec_type":"audio"}]}"#).unwrap();
        assert!(VideoAsset::from_probe("a.m4a", &probe, Timestamp::from_micros(0)).is_err());
    }
}
