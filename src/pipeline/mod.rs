//! # Pipeline
//!
//! Runs a whole job end to end:
//! 1. Start times - probe both videos, derive the primary's start time and
//!    the dash video's offset
//! 2. Overlay pass - composite the timecode and log boxes onto the primary
//!    window and encode an intermediate file
//! 3. Finishing - one ffmpeg pass that lays the scaled dash video over the
//!    intermediate and carries the primary's audio across
//!
//! The intermediate lives in a temporary file that is removed on every exit
//! path, and a failed finishing pass leaves no output file behind.

pub mod finisher;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task;
use tracing::{info, Level};

use crate::{
    config::Config,
    error::{MetadataError, Result, VideoError},
    extract::{extract_start_time, StartTimeSource},
    log::LogBuffer,
    render::{RenderDriver, RenderStats, RenderWindow},
    timeline::{align, secondary_start_from_probe, TimeOffset},
    timestamp::Timestamp,
    video::{FfmpegFrameReader, FfmpegFrameWriter, Ffprobe, FrameSink, PngFrameSink, Prober, VideoAsset},
};

pub use finisher::FinishJob;

/// How chatty a run is, for both our own logging and the ffmpeg children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Self::Verbose,
            (false, true) => Self::Quiet,
            (false, false) => Self::Normal,
        }
    }

    pub fn tracing_level(self) -> Level {
        match self {
            Self::Quiet => Level::WARN,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
        }
    }

    pub fn ffmpeg_loglevel(self) -> &'static str {
        match self {
            Self::Quiet | Self::Normal => "error",
            Self::Verbose => "info",
        }
    }
}

/// Files a render reads and writes
#[derive(Debug, Clone)]
pub struct Inputs {
    /// Primary (helmet) video
    pub video: PathBuf,
    pub log: PathBuf,
    /// Secondary (dash) video
    pub dash: PathBuf,
    pub output: PathBuf,
}

/// Which part of the primary video to render, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderRequest {
    pub start: f64,
    /// `None` renders to the end of the video
    pub duration: Option<f64>,
}

/// The derived start times, for checking clocks before a long render
#[derive(Debug, Clone, PartialEq)]
pub struct StartTimes {
    pub video: Timestamp,
    /// `None` for an empty log
    pub log: Option<Timestamp>,
    pub dash: Timestamp,
    pub offset: TimeOffset,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub asset: VideoAsset,
    pub window: RenderWindow,
    pub offset: TimeOffset,
    pub stats: RenderStats,
    pub output: PathBuf,
}

/// Orchestrates probing, alignment, the overlay pass and finishing
#[derive(Clone)]
pub struct Pipeline {
    config: Config,
    start_source: StartTimeSource,
    verbosity: Verbosity,
    prober: Arc<dyn Prober>,
}

impl Pipeline {
    pub fn new(config: Config, start_source: StartTimeSource, verbosity: Verbosity) -> Self {
        Self {
            config,
            start_source,
            verbosity,
            prober: Arc::new(Ffprobe),
        }
    }

    /// Replace the ffprobe-backed prober
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Render `request` of `inputs.video` to `inputs.output`
    pub async fn run(&self, inputs: &Inputs, request: RenderRequest) -> Result<RunSummary> {
        info!("🎬 Starting vidlog render");
        info!("   Video: {:?}", inputs.video);
        info!("   Log: {:?}", inputs.log);
        info!("   Dash: {:?}", inputs.dash);
        info!("   Output: {:?}", inputs.output);

        let pipeline = self.clone();
        let job = inputs.clone();
        let (asset, window, offset, stats, intermediate) =
            task::spawn_blocking(move || -> Result<_> {
                info!("⏱️  Step 1: Deriving start times...");
                let asset = pipeline.primary_asset(&job.video)?;
                let window = resolve_window(&asset, request)?;
                let dash_start = pipeline.dash_start(&job.dash)?;
                let offset = align(asset.start, dash_start, &pipeline.config.alignment)?;

                info!("📝 Step 2: Overlaying log on {:.3}s..{:.3}s", window.start, window.end());
                let intermediate = tempfile::Builder::new()
                    .prefix("vidlog-overlay-")
                    .suffix(".mp4")
                    .tempfile()?
                    .into_temp_path();
                let mut writer = FfmpegFrameWriter::create(
                    &intermediate,
                    asset.width,
                    asset.height,
                    asset.fps,
                    &pipeline.config.output,
                )?;
                let stats = pipeline.render_to(&asset, &job.log, window, &mut writer)?;

                Ok((asset, window, offset, stats, intermediate))
            })
            .await
            .map_err(|e| VideoError::EncodingFailed {
                reason: format!("overlay task failed: {}", e),
            })??;

        info!("🎞️  Step 3: Adding dash video and audio...");
        let finish = FinishJob {
            intermediate: intermediate.to_path_buf(),
            primary: inputs.video.clone(),
            primary_window: window,
            dash: inputs.dash.clone(),
            dash_window: offset.secondary_window(window.start, window.duration),
            dash_layout: self.config.dash.clone(),
            output: inputs.output.clone(),
        };
        finish.run(&self.config.output, self.verbosity).await?;
        drop(intermediate);

        info!("🎉 Render complete! Output saved to: {:?}", inputs.output);
        Ok(RunSummary {
            asset,
            window,
            offset,
            stats,
            output: inputs.output.clone(),
        })
    }

    /// Derive all start times and the dash offset without rendering anything
    pub async fn check_timestamps(&self, inputs: &Inputs) -> Result<StartTimes> {
        let pipeline = self.clone();
        let job = inputs.clone();

        // Probing and telemetry extraction block on child processes
        task::spawn_blocking(move || -> Result<StartTimes> {
            let video = pipeline.primary_asset(&job.video)?.start;
            let log = LogBuffer::open(&job.log, 1, pipeline.config.logfile.zone)?.next_timestamp();
            let dash = pipeline.dash_start(&job.dash)?;
            let offset = align(video, dash, &pipeline.config.alignment)?;

            Ok(StartTimes {
                video,
                log,
                dash,
                offset,
            })
        })
        .await
        .map_err(|e| MetadataError::ProbeFailed {
            path: inputs.video.display().to_string(),
            reason: format!("timestamp check task failed: {}", e),
        })?
    }

    /// Save the composited frame shown `at` seconds into the video as a PNG
    pub async fn preview(&self, video: &Path, log: &Path, at: f64, png: &Path) -> Result<RenderStats> {
        let pipeline = self.clone();
        let (video, log, png) = (video.to_path_buf(), log.to_path_buf(), png.to_path_buf());

        task::spawn_blocking(move || -> Result<RenderStats> {
            let asset = pipeline.primary_asset(&video)?;
            let window = resolve_window(
                &asset,
                RenderRequest {
                    start: at,
                    duration: Some(1.0 / asset.fps),
                },
            )?;
            let mut sink = PngFrameSink::new(&png);
            let stats = pipeline.render_to(&asset, &log, window, &mut sink)?;
            info!("Preview saved to {:?}", png);
            Ok(stats)
        })
        .await
        .map_err(|e| VideoError::EncodingFailed {
            reason: format!("preview task failed: {}", e),
        })?
    }

    fn primary_asset(&self, path: &Path) -> Result<VideoAsset> {
        let probe = self.prober.probe(path)?;
        let start = extract_start_time(path, &probe, &self.start_source)?;
        let asset = VideoAsset::from_probe(path, &probe, start)?;
        info!(
            "   Video: {}x{} @ {:.3} fps, {:.1}s, codec {}",
            asset.width, asset.height, asset.fps, asset.duration, asset.codec
        );
        Ok(asset)
    }

    fn dash_start(&self, path: &Path) -> Result<Timestamp> {
        let probe = self.prober.probe(path)?;
        let start = secondary_start_from_probe(path, &probe, &self.config.alignment)?;
        info!("Start time of {:?} from {} tag: {}", path, self.config.alignment.timestamp_tag, start);
        Ok(start)
    }

    fn render_to<W: FrameSink + ?Sized>(
        &self,
        asset: &VideoAsset,
        log: &Path,
        window: RenderWindow,
        sink: &mut W,
    ) -> Result<RenderStats> {
        let driver =
            RenderDriver::from_config(&self.config)?.with_progress(self.verbosity != Verbosity::Quiet);
        let mut log = LogBuffer::open(log, driver.log_lines(), self.config.logfile.zone)?;
        let mut source = FfmpegFrameReader::open(asset)?;
        driver.render(asset.start, window, &mut source, &mut log, sink)
    }
}

/// Clamp a request to the part of the video that exists
pub fn resolve_window(asset: &VideoAsset, request: RenderRequest) -> Result<RenderWindow> {
    let invalid = |details: String| VideoError::InvalidParameters { details };

    if !(request.start >= 0.0) || (asset.duration > 0.0 && request.start >= asset.duration) {
        return Err(invalid(format!(
            "start {:.3}s is outside {:?} ({:.3}s long)",
            request.start, asset.path, asset.duration
        ))
        .into());
    }

    let remaining = asset.duration - request.start;
    let duration = match request.duration {
        Some(d) if asset.duration > 0.0 => d.min(remaining),
        Some(d) => d,
        None => remaining,
    };

    if !(duration > 0.0) {
        return Err(invalid(format!("nothing to render: duration {:.3}s", duration)).into());
    }
    Ok(RenderWindow::new(request.start, duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AlignmentError, MetadataError};
    use crate::video::probe::tests::SAMPLE;
    use crate::video::MediaProbe;
    use crate::VidlogError;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};

    /// Serves canned ffprobe output by file name
    struct CannedProber(HashMap<&'static str, String>);

    impl Prober for CannedProber {
        fn probe(&self, path: &Path) -> Result<MediaProbe> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let json = self.0.get(name).ok_or_else(|| MetadataError::ProbeFailed {
                path: path.display().to_string(),
                reason: "no such file".to_string(),
            })?;
            MediaProbe::from_json(path, json.as_bytes())
        }
    }

    const DASH: &str = r#"{
        "streams": [{ "codec_type": "video", "width": 640, "height": 480, "avg_frame_rate": "30/1" }],
        "format": { "tags": { "TIMESTAMP": "2022-06-11T17:42:05.500000Z" } }
    }"#;

    fn pipeline(primary: &str, dash: &str) -> Pipeline {
        let canned = HashMap::from([("gopro.mp4", primary.to_string()), ("dash.mkv", dash.to_string())]);
        Pipeline::new(Config::default(), StartTimeSource::ContainerMetadata, Verbosity::Quiet)
            .with_prober(Arc::new(CannedProber(canned)))
    }

    fn inputs(dir: &Path) -> Inputs {
        let log = dir.join("ride.log");
        std::fs::write(&log, "2022-06-11 17:42:11.000000 engine start\n").unwrap();
        Inputs {
            video: dir.join("gopro.mp4"),
            log,
            dash: dir.join("dash.mkv"),
            output: dir.join("out.mp4"),
        }
    }

    fn asset(duration: f64) -> VideoAsset {
        let probe = MediaProbe::from_json("gopro.mp4", SAMPLE.as_bytes()).unwrap();
        let mut asset = VideoAsset::from_probe("gopro.mp4", &probe, Timestamp::from_micros(0)).unwrap();
        asset.duration = duration;
        asset
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, false).tracing_level(), Level::INFO);
        assert_eq!(Verbosity::Verbose.ffmpeg_loglevel(), "info");
    }

    #[test]
    fn test_resolve_window() {
        let a = asset(60.0);
        let full = resolve_window(&a, RenderRequest::default()).unwrap();
        assert_eq!(full, RenderWindow::new(0.0, 60.0));

        let clipped = resolve_window(&a, RenderRequest { start: 50.0, duration: Some(30.0) }).unwrap();
        assert_eq!(clipped, RenderWindow::new(50.0, 10.0));

        assert!(resolve_window(&a, RenderRequest { start: 60.0, duration: None }).is_err());
        assert!(resolve_window(&a, RenderRequest { start: -1.0, duration: None }).is_err());
        assert!(resolve_window(&a, RenderRequest { start: 1.0, duration: Some(0.0) }).is_err());
    }

    #[tokio::test]
    async fn test_check_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(dir.path());
        let times = pipeline(SAMPLE, DASH).check_timestamps(&inputs).await.unwrap();

        assert_eq!(times.offset.as_secs_f64(), 4.5);
        assert_eq!(times.video - times.dash, 4.5);
        assert!(times.log.is_some());
    }

    /// Records the thread each lookup runs on
    struct ThreadRecordingProber {
        inner: CannedProber,
        threads: Mutex<Vec<ThreadId>>,
    }

    impl Prober for ThreadRecordingProber {
        fn probe(&self, path: &Path) -> Result<MediaProbe> {
            if let Ok(mut threads) = self.threads.lock() {
                threads.push(thread::current().id());
            }
            self.inner.probe(path)
        }
    }

    #[tokio::test]
    async fn test_check_timestamps_runs_off_the_runtime_thread() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(dir.path());
        let canned = HashMap::from([("gopro.mp4", SAMPLE.to_string()), ("dash.mkv", DASH.to_string())]);
        let prober = Arc::new(ThreadRecordingProber {
            inner: CannedProber(canned),
            threads: Mutex::new(Vec::new()),
        });
        let pipeline = Pipeline::new(Config::default(), StartTimeSource::ContainerMetadata, Verbosity::Quiet)
            .with_prober(prober.clone());

        pipeline.check_timestamps(&inputs).await.unwrap();

        let threads = prober.threads.lock().unwrap();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|id| *id != thread::current().id()));
    }

    #[tokio::test]
    async fn test_missing_creation_time_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(dir.path());
        let primary = SAMPLE.replace("creation_time", "encoder");

        let err = pipeline(&primary, DASH)
            .run(&inputs, RenderRequest::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VidlogError::Metadata(MetadataError::MissingTag { .. })
        ));
        assert!(!inputs.output.exists());
    }

    #[tokio::test]
    async fn test_missing_dash_timestamp_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(dir.path());
        let dash = DASH.replace("TIMESTAMP", "encoder");

        let err = pipeline(SAMPLE, &dash)
            .run(&inputs, RenderRequest::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VidlogError::Alignment(AlignmentError::MissingTag { .. })
        ));
        assert!(!inputs.output.exists());
    }
}
