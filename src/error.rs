use std::time::Duration;

use thiserror::Error;

/// Main error type for the vidlog library
#[derive(Error, Debug)]
pub enum VidlogError {
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Telemetry extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Log error: {0}")]
    Log(#[from] LogError),

    #[error("Alignment error: {0}")]
    Alignment(#[from] AlignmentError),

    #[error("Video processing error: {0}")]
    Video(#[from] VideoError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A required container tag is missing or unusable
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("'{tag}' tag not found in {path}")]
    MissingTag { path: String, tag: String },

    #[error("Invalid '{tag}' value in {path}: {value}")]
    InvalidTimestamp {
        path: String,
        tag: String,
        value: String,
    },

    #[error("No video stream found in {path}")]
    NoVideoStream { path: String },

    #[error("Missing stream property '{field}' in {path}")]
    MissingField { path: String, field: String },

    #[error("Probe failed for {path}: {reason}")]
    ProbeFailed { path: String, reason: String },
}

/// The external telemetry tool failed or produced unusable output
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to launch '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("'{program}' exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Telemetry side-file not produced: {path}")]
    MissingSideFile { path: String },

    #[error("Malformed telemetry side-file {path}: {reason}")]
    MalformedSideFile { path: String, reason: String },

    #[error("No time element found in telemetry side-file {path}")]
    MissingTime { path: String },

    #[error("Invalid telemetry time '{value}'")]
    InvalidTime { value: String },
}

/// Problems reading the timestamped text log
#[derive(Error, Debug)]
pub enum LogError {
    #[error("Malformed timestamp on log line {line}: {text:?}")]
    Parse { line: usize, text: String },

    #[error("Log line {line} goes back in time ({timestamp} after {previous})")]
    OutOfOrder {
        line: usize,
        timestamp: String,
        previous: String,
    },

    #[error("Failed to read log file {path}: {reason}")]
    ReadFailed { path: String, reason: String },
}

/// The secondary asset cannot be placed on the primary's timeline
#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("'{tag}' tag not found in secondary video {path}")]
    MissingTag { path: String, tag: String },

    #[error("Invalid '{tag}' value in secondary video {path}: {value}")]
    InvalidTimestamp {
        path: String,
        tag: String,
        value: String,
    },

    #[error("Offset of {offset_secs:.3}s between primary and secondary exceeds the {limit_secs:.0}s limit")]
    Implausible { offset_secs: f64, limit_secs: f64 },
}

/// Video asset open/read/write failures
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Failed to open video for reading: {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Video decoding failed: {reason}")]
    DecodingFailed { reason: String },

    #[error("Video encoding failed: {reason}")]
    EncodingFailed { reason: String },

    #[error("Invalid video parameters: {details}")]
    InvalidParameters { details: String },
}

/// The external transcode pipeline failed
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Failed to launch ffmpeg: {reason}")]
    SpawnFailed { reason: String },

    #[error("ffmpeg exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("ffmpeg did not finish within {0:?}")]
    Timeout(Duration),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Failed to load font '{font}': {reason}")]
    FontLoadFailed { font: String, reason: String },
}

/// Convenience type alias for Results using VidlogError
pub type Result<T> = std::result::Result<T, VidlogError>;

impl VidlogError {
    /// Whether a failed run may have succeeded with a longer budget
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transcode(TranscodeError::Timeout(_)))
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Metadata(MetadataError::MissingTag { path, tag }) => {
                format!(
                    "Video '{}' has no '{}' tag. Try the telemetry start-time source instead.",
                    path, tag
                )
            }
            Self::Extraction(ExtractionError::SpawnFailed { program, .. }) => {
                format!(
                    "Could not run '{}'. Install it or use '--source metadata'.",
                    program
                )
            }
            Self::Alignment(AlignmentError::MissingTag { path, .. }) => {
                format!(
                    "Dash video '{}' carries no start timestamp, so it cannot be aligned.",
                    path
                )
            }
            Self::Transcode(TranscodeError::Timeout(limit)) => {
                format!(
                    "ffmpeg did not finish within {}s. Raise 'output.transcode_timeout_secs' and retry.",
                    limit.as_secs()
                )
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeouts_are_recoverable() {
        let timeout: VidlogError = TranscodeError::Timeout(Duration::from_secs(5)).into();
        assert!(timeout.is_recoverable());

        let parse: VidlogError = LogError::Parse {
            line: 3,
            text: "garbage".to_string(),
        }
        .into();
        assert!(!parse.is_recoverable());
    }

    #[test]
    fn test_user_message_mentions_tag() {
        let err: VidlogError = MetadataError::MissingTag {
            path: "clip.mp4".to_string(),
            tag: "creation_time".to_string(),
        }
        .into();
        let msg = err.user_message();
        assert!(msg.contains("clip.mp4"));
        assert!(msg.contains("creation_time"));
    }
}
