//! # Video Module
//!
//! Frames, metadata probing and the ffmpeg decode/encode pipes.

pub mod frame;
pub mod probe;
pub mod reader;
pub mod writer;

pub use frame::Frame;
pub use probe::{Ffprobe, MediaProbe, Prober, VideoAsset};
pub use reader::{FfmpegFrameReader, FrameSource};
pub use writer::{FfmpegFrameWriter, FrameSink, PngFrameSink};
