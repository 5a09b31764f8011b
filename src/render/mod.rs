//! # Render Driver
//!
//! Walks the primary video frame by frame over the requested window, keeps
//! the log buffer in step with each frame's wall-clock time, and hands the
//! composited frames to a sink.

use std::io::BufRead;

use tracing::{debug, info};

use crate::{
    config::Config,
    error::{Result, VideoError},
    log::LogBuffer,
    overlay::{compose, Overlay, OverlayBox},
    timestamp::{Timestamp, Zone},
    video::{FrameSink, FrameSource},
};

/// Number of progress reports over a full window
const PROGRESS_STEPS: u64 = 50;

/// Seconds of the primary video to render: `[start, start + duration)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderWindow {
    pub start: f64,
    pub duration: f64,
}

impl RenderWindow {
    pub fn new(start: f64, duration: f64) -> Self {
        Self { start, duration }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// What one render pass produced
#[derive(Debug, Clone, PartialEq)]
pub struct RenderStats {
    pub first_frame: u64,
    pub frames_written: u64,
    /// Play time of the last frame written
    pub last_play_time: Option<f64>,
    pub log_exhausted: bool,
}

/// Composites the timecode and log overlays onto every frame of a window
pub struct RenderDriver {
    timecode_box: OverlayBox,
    log_box: OverlayBox,
    timecode_format: String,
    display_zone: Zone,
    progress: bool,
}

impl RenderDriver {
    pub fn new(timecode_box: OverlayBox, log_box: OverlayBox, timecode_format: impl Into<String>) -> Self {
        Self {
            timecode_box,
            log_box,
            timecode_format: timecode_format.into(),
            display_zone: Zone::Local,
            progress: true,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let driver = Self::new(
            OverlayBox::from_section(&config.timecode)?,
            OverlayBox::from_section(&config.log)?,
            config.output.timecode_format.clone(),
        );
        Ok(driver.with_display_zone(config.logfile.zone))
    }

    /// Timezone the timecode overlay is printed in
    pub fn with_display_zone(mut self, zone: Zone) -> Self {
        self.display_zone = zone;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Lines the log box can show; size the [`LogBuffer`] with this
    pub fn log_lines(&self) -> usize {
        self.log_box.max_lines
    }

    /// Render `window` of a video whose first frame was shot at `asset_start`.
    ///
    /// Stops at the end of the window or when the source runs dry, whichever
    /// comes first, then finishes the sink.
    pub fn render<S, W, R>(
        &self,
        asset_start: Timestamp,
        window: RenderWindow,
        source: &mut S,
        log: &mut LogBuffer<R>,
        sink: &mut W,
    ) -> Result<RenderStats>
    where
        S: FrameSource + ?Sized,
        W: FrameSink + ?Sized,
        R: BufRead,
    {
        let fps = source.fps();
        if !(fps > 0.0) || window.start < 0.0 || !(window.duration > 0.0) {
            return Err(VideoError::InvalidParameters {
                details: format!(
                    "cannot render {:.3}s from {:.3}s at {} fps",
                    window.duration, window.start, fps
                ),
            }
            .into());
        }

        let first_frame = (window.start * fps).round() as u64;
        source.seek(first_frame)?;
        debug!(
            "Rendering [{:.3}s, {:.3}s) starting at frame {}",
            window.start,
            window.end(),
            first_frame
        );

        let expected_frames = ((window.duration * fps).ceil() as u64).max(1);
        let progress_every = (expected_frames / PROGRESS_STEPS).max(1);

        let mut stats = RenderStats {
            first_frame,
            frames_written: 0,
            last_play_time: None,
            log_exhausted: false,
        };

        loop {
            let play_time = source.position() as f64 / fps;
            if play_time >= window.end() {
                break;
            }

            let Some(frame) = source.read_frame()? else {
                debug!("Source exhausted at {:.3}s", play_time);
                break;
            };

            let real_time = asset_start + play_time;
            log.update(real_time)?;

            let timecode = real_time.format_in(self.display_zone, &self.timecode_format);
            let overlays = [
                Overlay::new(&self.timecode_box, vec![timecode.as_str()]),
                Overlay::new(&self.log_box, log.iter().collect()),
            ];
            let frame = compose(frame, &overlays);

            sink.write_frame(&frame)?;
            stats.frames_written += 1;
            stats.last_play_time = Some(play_time);

            if self.progress && stats.frames_written % progress_every == 0 {
                info!(
                    "Rendered {}/{} frames ({:.0}%)",
                    stats.frames_written,
                    expected_frames,
                    100.0 * stats.frames_written as f64 / expected_frames as f64
                );
            }
        }

        sink.finish()?;
        stats.log_exhausted = log.is_exhausted();

        info!(
            "Finished overlay pass: {} frames from {:.3}s",
            stats.frames_written, window.start
        );
        Ok(stats)
    }
}
