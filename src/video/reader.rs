use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::{
    error::{Result, VideoError},
    video::{Frame, VideoAsset},
};

/// Bytes of a child's stderr kept for error messages
const STDERR_TAIL_BYTES: usize = 4096;

/// Sequential access to decoded frames
pub trait FrameSource {
    /// Decode the next frame; `None` once the source is exhausted
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Index of the frame the next `read_frame` returns
    fn position(&self) -> u64;

    /// Move so that the next `read_frame` returns frame `index`
    fn seek(&mut self, index: u64) -> Result<()>;

    fn fps(&self) -> f64;
}

/// Drains a child's stderr on its own thread so the child never blocks on
/// a full pipe, keeping the last few KiB
pub(crate) struct StderrTail {
    handle: Option<JoinHandle<String>>,
}

impl StderrTail {
    pub(crate) fn spawn(stderr: Option<ChildStderr>) -> Self {
        let handle = stderr.map(|mut pipe| {
            thread::spawn(move || {
                let mut tail: VecDeque<u8> = VecDeque::with_capacity(STDERR_TAIL_BYTES);
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            tail.extend(&chunk[..n]);
                            let excess = tail.len().saturating_sub(STDERR_TAIL_BYTES);
                            tail.drain(..excess);
                        }
                    }
                }
                String::from_utf8_lossy(tail.make_contiguous()).trim().to_string()
            })
        });
        Self { handle }
    }

    /// Wait for the child's stderr to close and return what was kept
    pub(crate) fn collect(mut self) -> String {
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

struct Decoder {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: StderrTail,
}

/// Decodes a video to raw RGB24 frames through an `ffmpeg` pipe
pub struct FfmpegFrameReader {
    path: PathBuf,
    width: u32,
    height: u32,
    fps: f64,
    position: u64,
    program: OsString,
    leading_args: Vec<OsString>,
    decoder: Option<Decoder>,
    exhausted: bool,
}

impl FfmpegFrameReader {
    pub fn open(asset: &VideoAsset) -> Result<Self> {
        if asset.width == 0 || asset.height == 0 || asset.fps <= 0.0 {
            return Err(VideoError::InvalidParameters {
                details: format!(
                    "{}: {}x{} at {} fps",
                    asset.path.display(),
                    asset.width,
                    asset.height,
                    asset.fps
                ),
            }
            .into());
        }

        Ok(Self {
            path: asset.path.clone(),
            width: asset.width,
            height: asset.height,
            fps: asset.fps,
            position: 0,
            program: OsString::from("ffmpeg"),
            leading_args: Vec::new(),
            decoder: None,
            exhausted: false,
        })
    }

    /// Decode with another ffmpeg-compatible command; `leading_args` go
    /// before the usual decoder arguments
    pub fn with_program<P: Into<OsString>>(mut self, program: P, leading_args: Vec<OsString>) -> Self {
        self.program = program.into();
        self.leading_args = leading_args;
        self
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    fn spawn(&self) -> Result<Decoder> {
        let start_secs = self.position as f64 / self.fps;
        debug!(
            "Starting decoder for {:?} at frame {} ({:.3}s)",
            self.path, self.position, start_secs
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .args(["-v", "error", "-nostdin"]);
        if self.position > 0 {
            cmd.args(["-ss", &format!("{:.6}", start_secs)]);
        }
        cmd.arg("-i")
            .arg(&self.path)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| VideoError::OpenFailed {
            path: self.path.display().to_string(),
            reason: format!("failed to spawn {:?}: {}", self.program, e),
        })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(VideoError::OpenFailed {
                path: self.path.display().to_string(),
                reason: "failed to open ffmpeg stdout".to_string(),
            }
            .into());
        };
        let stderr = StderrTail::spawn(child.stderr.take());

        Ok(Decoder {
            child,
            stdout: BufReader::new(stdout),
            stderr,
        })
    }

    /// Reap the decoder after its output ends and surface its failure, if any
    fn finish_decoder(&mut self) -> Result<()> {
        let Some(Decoder {
            mut child,
            stdout,
            stderr,
        }) = self.decoder.take()
        else {
            return Ok(());
        };
        drop(stdout);

        let status = child.wait().map_err(|e| VideoError::DecodingFailed {
            reason: format!("failed to wait for ffmpeg: {}", e),
        })?;
        let stderr = stderr.collect();

        if !status.success() {
            return Err(VideoError::DecodingFailed {
                reason: format!("ffmpeg exited with {}: {}", status, stderr),
            }
            .into());
        }
        Ok(())
    }

    fn stop_decoder(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            let _ = decoder.child.kill();
            let _ = decoder.child.wait();
            decoder.stderr.collect();
        }
    }
}

impl FrameSource for FfmpegFrameReader {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.exhausted {
            return Ok(None);
        }
        if self.decoder.is_none() {
            self.decoder = Some(self.spawn()?);
        }

        let frame_len = self.frame_len();
        let mut data = vec![0u8; frame_len];
        let mut filled = 0;

        if let Some(decoder) = self.decoder.as_mut() {
            while filled < frame_len {
                let n = decoder
                    .stdout
                    .read(&mut data[filled..])
                    .map_err(|e| VideoError::DecodingFailed {
                        reason: format!("failed to read from ffmpeg: {}", e),
                    })?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
        }

        if filled < frame_len {
            if filled > 0 {
                warn!("Discarding truncated final frame ({} of {} bytes)", filled, frame_len);
            }
            self.exhausted = true;
            self.finish_decoder()?;
            return Ok(None);
        }

        let frame = Frame::from_rgb_bytes(self.width, self.height, data).ok_or_else(|| {
            VideoError::DecodingFailed {
                reason: "decoded frame has unexpected size".to_string(),
            }
        })?;
        self.position += 1;
        Ok(Some(frame))
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        if index != self.position || self.decoder.is_none() {
            self.stop_decoder();
            self.position = index;
            self.exhausted = false;
        }
        Ok(())
    }

    fn fps(&self) -> f64 {
        self.fps
    }
}

impl Drop for FfmpegFrameReader {
    fn drop(&mut self) {
        self.stop_decoder();
    }
}
