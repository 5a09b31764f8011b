use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{
    config::{DashSection, OutputConfig},
    error::{Result, TranscodeError},
    pipeline::Verbosity,
    render::RenderWindow,
    timeline::SecondaryWindow,
};

/// Everything the final ffmpeg pass needs to know
#[derive(Debug, Clone)]
pub struct FinishJob {
    /// Overlaid primary frames, already trimmed to the window
    pub intermediate: PathBuf,
    /// Audio comes from here, trimmed to the same window as the intermediate
    pub primary: PathBuf,
    pub primary_window: RenderWindow,
    pub dash: PathBuf,
    pub dash_window: SecondaryWindow,
    pub dash_layout: DashSection,
    pub output: PathBuf,
}

fn secs(value: f64) -> String {
    format!("{:.6}", value)
}

impl FinishJob {
    /// Arguments for the final transcode.
    ///
    /// Inputs are `0` the intermediate, `1` the dash video and `2` the
    /// primary (audio only). A dash video that starts after the window is
    /// delayed with `-itsoffset` instead of seeking to a negative time.
    pub fn ffmpeg_args(&self, output: &OutputConfig, verbosity: Verbosity) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-nostdin", "-v", verbosity.ffmpeg_loglevel(), "-i"]
            .map(OsString::from)
            .to_vec();
        args.push(self.intermediate.clone().into());

        if self.dash_window.start >= 0.0 {
            args.extend(["-ss".into(), secs(self.dash_window.start).into()]);
        } else {
            args.extend(["-itsoffset".into(), secs(-self.dash_window.start).into()]);
        }
        args.extend([
            "-t".into(),
            secs(self.dash_window.duration).into(),
            "-i".into(),
            self.dash.clone().into(),
        ]);

        args.extend([
            "-ss".into(),
            secs(self.primary_window.start).into(),
            "-t".into(),
            secs(self.primary_window.duration).into(),
            "-i".into(),
            self.primary.clone().into(),
        ]);

        let layout = &self.dash_layout;
        let filter = format!(
            "[1:v]scale={}:{}[dash];[0:v][dash]overlay={}:{}:eof_action=pass[out]",
            layout.width, layout.height, layout.x, layout.y
        );

        let crf = output.crf().to_string();
        args.extend(
            [
                "-filter_complex",
                filter.as_str(),
                "-map",
                "[out]",
                "-map",
                "2:a?",
                "-c:v",
                output.codec.as_str(),
                "-crf",
                crf.as_str(),
                "-pix_fmt",
                output.pixel_format.as_str(),
                "-c:a",
                "aac",
            ]
            .map(OsString::from),
        );
        args.push(self.output.clone().into());
        args
    }

    /// Run the final transcode, bounded by the configured timeout.
    ///
    /// A failed or timed-out run removes whatever partial output it left.
    pub async fn run(&self, output: &OutputConfig, verbosity: Verbosity) -> Result<()> {
        let limit = Duration::from_secs(output.transcode_timeout_secs);
        let args = self.ffmpeg_args(output, verbosity);
        debug!("ffmpeg {:?}", args);

        let result = run_tool("ffmpeg", &args, limit, verbosity).await;
        if result.is_err() {
            remove_partial(&self.output);
        }
        result?;

        info!("Final video written to {:?}", self.output);
        Ok(())
    }
}

async fn run_tool(
    program: &str,
    args: &[OsString],
    limit: Duration,
    verbosity: Verbosity,
) -> Result<()> {
    let stderr = if verbosity == Verbosity::Verbose {
        Stdio::inherit()
    } else {
        Stdio::piped()
    };

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(stderr)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TranscodeError::SpawnFailed {
            reason: format!("failed to spawn {} (is it installed and on PATH?): {}", program, e),
        })?;

    // Dropping the wait future on timeout kills the child
    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| TranscodeError::Timeout(limit))?
        .map_err(|e| TranscodeError::SpawnFailed {
            reason: format!("failed to wait for {}: {}", program, e),
        })?;

    if !output.status.success() {
        return Err(TranscodeError::Failed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }
    Ok(())
}

fn remove_partial(path: &Path) {
    if path.exists() {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed partial output {:?}", path),
            Err(e) => warn!("Could not remove partial output {:?}: {}", path, e),
        }
    }
}
