use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use vidlog::{
    config::Config,
    extract::{StartTimeSource, TelemetryExtractor},
    pipeline::{Inputs, Pipeline, RenderRequest, Verbosity},
};

#[derive(Parser)]
#[command(
    name = "vidlog",
    version,
    about = "Overlay a timestamped text log and a dash video onto helmet camera footage",
    long_about = "vidlog burns a scrolling text log and a timecode into each frame of a video, then lays a time-aligned dash instrument video over it, keeping the original audio."
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "vidlog.toml")]
    config: PathBuf,

    /// Enable verbose logging (also shows ffmpeg output)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render the overlaid video
    Render {
        #[command(flatten)]
        inputs: InputArgs,

        /// Dash video to lay over the footage
        dash: PathBuf,

        /// Output video file
        output: PathBuf,

        #[command(flatten)]
        span: SpanArgs,
    },

    /// Print the derived start times and the dash offset, then exit
    Check {
        #[command(flatten)]
        inputs: InputArgs,

        /// Dash video to align
        dash: PathBuf,
    },

    /// Save one composited frame as a PNG
    Preview {
        #[command(flatten)]
        inputs: InputArgs,

        /// PNG file to write
        output: PathBuf,

        /// Seconds into the video
        #[arg(long, default_value_t = 0.0)]
        at: f64,
    },

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Helmet/dashcam video
    video: PathBuf,

    /// Timestamped text log
    log: PathBuf,

    /// Where the video's start time comes from
    #[arg(long, value_enum, default_value_t = SourceArg::Metadata)]
    source: SourceArg,
}

#[derive(Args)]
struct SpanArgs {
    /// Seconds into the video to start rendering
    #[arg(long, default_value_t = 0.0)]
    start: f64,

    /// Seconds to render (default: to the end)
    #[arg(long)]
    duration: Option<f64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    /// The container's creation_time tag
    Metadata,
    /// First fix of the embedded GPS track
    Telemetry,
}

impl InputArgs {
    fn start_source(&self, config: &Config) -> StartTimeSource {
        match self.source {
            SourceArg::Metadata => StartTimeSource::ContainerMetadata,
            SourceArg::Telemetry => {
                StartTimeSource::Telemetry(TelemetryExtractor::from_config(&config.telemetry))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let verbosity = Verbosity::from_flags(cli.verbose, cli.quiet);
    tracing_subscriber::fmt()
        .with_max_level(verbosity.tracing_level())
        .init();

    if let Err(e) = run(cli, verbosity).await {
        match e.downcast_ref::<vidlog::VidlogError>() {
            Some(err) => error!("{}", err.user_message()),
            None => error!("{:#}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli, verbosity: Verbosity) -> Result<()> {
    info!("Starting vidlog v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::InitConfig { force } => {
            if cli.config.exists() && !force {
                anyhow::bail!(
                    "{:?} already exists; pass --force to overwrite it",
                    cli.config
                );
            }
            Config::default().save_to_file(&cli.config)?;
            info!("Default configuration written to {:?}", cli.config);
        }

        Command::Render {
            inputs,
            dash,
            output,
            span,
        } => {
            let config = Config::load_or_default(&cli.config)?;
            let pipeline = Pipeline::new(config.clone(), inputs.start_source(&config), verbosity);
            let job = Inputs {
                video: inputs.video,
                log: inputs.log,
                dash,
                output,
            };
            let request = RenderRequest {
                start: span.start,
                duration: span.duration,
            };

            let summary = pipeline.run(&job, request).await?;
            info!(
                "Rendered {} frames ({:.1}s) with dash offset {:+.3}s",
                summary.stats.frames_written,
                summary.window.duration,
                summary.offset.as_secs_f64()
            );
        }

        Command::Check { inputs, dash } => {
            let config = Config::load_or_default(&cli.config)?;
            let pipeline = Pipeline::new(config.clone(), inputs.start_source(&config), verbosity);
            let job = Inputs {
                video: inputs.video,
                log: inputs.log,
                dash,
                output: PathBuf::new(),
            };

            let times = pipeline.check_timestamps(&job).await?;
            println!("video start: {}", times.video);
            match times.log {
                Some(log) => println!("log start:   {} ({:+.3}s from video)", log, log - times.video),
                None => println!("log start:   (empty log)"),
            }
            println!("dash start:  {}", times.dash);
            println!("dash offset: {:+.6}s", times.offset.as_secs_f64());
        }

        Command::Preview { inputs, output, at } => {
            let config = Config::load_or_default(&cli.config)?;
            let pipeline = Pipeline::new(config.clone(), inputs.start_source(&config), verbosity);
            pipeline
                .preview(&inputs.video, &inputs.log, at, &output)
                .await?;
        }
    }

    Ok(())
}
