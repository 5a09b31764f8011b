//! # vidlog
//!
//! Burn a timestamped text log and a dash instrument video into helmet or
//! dashcam footage.
//!
//! Each frame of the primary video gets a timecode box and a scrolling box
//! with the log lines that had been written by that moment. A final ffmpeg
//! pass lays a scaled, time-aligned secondary (dash) video over the result
//! and keeps the primary's audio.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vidlog::{
//!     config::Config,
//!     extract::StartTimeSource,
//!     pipeline::{Inputs, Pipeline, RenderRequest, Verbosity},
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config::load_or_default("vidlog.toml")?;
//! let pipeline = Pipeline::new(config, StartTimeSource::ContainerMetadata, Verbosity::Normal);
//!
//! let inputs = Inputs {
//!     video: "gopro.mp4".into(),
//!     log: "ride.log".into(),
//!     dash: "dash.mkv".into(),
//!     output: "out.mp4".into(),
//! };
//! pipeline
//!     .run(&inputs, RenderRequest { start: 30.0, duration: Some(60.0) })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`extract`] - Start time of the primary video (container tag or GPS telemetry)
//! - [`log`] - Sliding window over the text log
//! - [`overlay`] - Text box compositing onto frames
//! - [`timeline`] - Offset between the primary and dash videos
//! - [`render`] - Per-frame driver for the overlay pass
//! - [`pipeline`] - End-to-end job, including the final ffmpeg pass
//! - [`video`] - Frames, probing and the ffmpeg decode/encode pipes
//! - [`config`] - Configuration management

pub mod config;
pub mod error;
pub mod extract;
pub mod log;
pub mod overlay;
pub mod pipeline;
pub mod render;
pub mod timeline;
pub mod timestamp;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    config::Config,
    error::{Result, VidlogError},
    log::LogBuffer,
    pipeline::{Pipeline, Verbosity},
    render::{RenderDriver, RenderWindow},
    timestamp::{Timestamp, Zone},
};
