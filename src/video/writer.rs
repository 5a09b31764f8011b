use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use tracing::debug;

use crate::{
    config::OutputConfig,
    error::{Result, VideoError},
    video::{reader::StderrTail, Frame},
};

/// Destination for composited frames
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close; no frames may be written afterwards
    fn finish(&mut self) -> Result<()>;
}

/// Encodes raw RGB24 frames through an `ffmpeg` pipe
pub struct FfmpegFrameWriter {
    path: PathBuf,
    width: u32,
    height: u32,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<StderrTail>,
    frames_written: u64,
}

impl FfmpegFrameWriter {
    pub fn create<P: AsRef<Path>>(
        path: P,
        width: u32,
        height: u32,
        fps: f64,
        output: &OutputConfig,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if width == 0 || height == 0 || fps <= 0.0 {
            return Err(VideoError::InvalidParameters {
                details: format!("{}x{} at {} fps", width, height, fps),
            }
            .into());
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-y",
            "-v",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            &format!("{}x{}", width, height),
            "-r",
            &format!("{:.6}", fps),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            &output.codec,
            "-crf",
            &output.crf().to_string(),
            "-pix_fmt",
            &output.pixel_format,
        ])
        .arg(&path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

        debug!("Encoding intermediate video to {:?}", path);

        let mut child = cmd.spawn().map_err(|e| VideoError::EncodingFailed {
            reason: format!("failed to spawn ffmpeg (is it installed and on PATH?): {}", e),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| VideoError::EncodingFailed {
            reason: "failed to open ffmpeg stdin".to_string(),
        })?;

        let stderr = StderrTail::spawn(child.stderr.take());

        Ok(Self {
            path,
            width,
            height,
            child,
            stdin: Some(stdin),
            stderr: Some(stderr),
            frames_written: 0,
        })
    }
}

impl FrameSink for FfmpegFrameWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(VideoError::InvalidParameters {
                details: format!(
                    "frame size mismatch: got {}x{}, expected {}x{}",
                    frame.width(),
                    frame.height(),
                    self.width,
                    self.height
                ),
            }
            .into());
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(VideoError::EncodingFailed {
                reason: "encoder is already finished".to_string(),
            }
            .into());
        };

        stdin
            .write_all(frame.as_rgb_bytes())
            .map_err(|e| VideoError::EncodingFailed {
                reason: format!("failed to write frame to ffmpeg: {}", e),
            })?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.stdin.take().is_none() {
            return Ok(());
        }

        let status = self.child.wait().map_err(|e| VideoError::EncodingFailed {
            reason: format!("failed to wait for ffmpeg: {}", e),
        })?;
        let stderr = self.stderr.take().map(StderrTail::collect).unwrap_or_default();

        if !status.success() {
            return Err(VideoError::EncodingFailed {
                reason: format!(
                    "ffmpeg exited with {} writing {}: {}",
                    status,
                    self.path.display(),
                    stderr
                ),
            }
            .into());
        }

        debug!("Wrote {} frames to {:?}", self.frames_written, self.path);
        Ok(())
    }
}

impl Drop for FfmpegFrameWriter {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        if let Some(stderr) = self.stderr.take() {
            stderr.collect();
        }
    }
}

/// Saves the most recent frame as a PNG image
pub struct PngFrameSink {
    path: PathBuf,
    last: Option<Frame>,
}

impl PngFrameSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }
}

impl FrameSink for PngFrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.last = Some(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(frame) = self.last.take() else {
            return Err(VideoError::EncodingFailed {
                reason: "no frame rendered for preview".to_string(),
            }
            .into());
        };

        frame.save_png(&self.path).map_err(|e| VideoError::EncodingFailed {
            reason: format!("failed to save {}: {}", self.path.display(), e),
        })?;
        Ok(())
    }
}
