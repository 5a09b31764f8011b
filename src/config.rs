use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::{ConfigError, Result},
    overlay::FontFace,
    timestamp::Zone,
};

/// Main configuration for vidlog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log text overlay box
    pub log: BoxSection,

    /// Timecode overlay box
    pub timecode: BoxSection,

    /// Placement of the scaled dash video
    pub dash: DashSection,

    /// How the text log is read
    pub logfile: LogFileConfig,

    /// Encoding and finishing settings
    pub output: OutputConfig,

    /// Secondary video alignment settings
    pub alignment: AlignmentConfig,

    /// External telemetry extractor
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log: BoxSection::log_defaults(),
            timecode: BoxSection::timecode_defaults(),
            dash: DashSection::default(),
            logfile: LogFileConfig::default(),
            output: OutputConfig::default(),
            alignment: AlignmentConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// On-disk shape: every section optional, box keys individually optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    log: Option<PartialBoxSection>,
    timecode: Option<PartialBoxSection>,
    dash: Option<DashSection>,
    logfile: Option<LogFileConfig>,
    output: Option<OutputConfig>,
    alignment: Option<AlignmentConfig>,
    telemetry: Option<TelemetryConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            crate::VidlogError::Config(ConfigError::ParseFailed { reason, .. }) => {
                ConfigError::ParseFailed {
                    path: path.display().to_string(),
                    reason,
                }
                .into()
            }
            other => other,
        })
    }

    /// Load the file if it exists, otherwise fall back to defaults with a warning
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            warn!(
                "Configuration file {:?} not found, using built-in defaults",
                path
            );
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration text. Absent sections and keys take
    /// their built-in defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| ConfigError::ParseFailed {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;

        let config = Self {
            log: apply_partial(file.log, BoxSection::log_defaults()),
            timecode: apply_partial(file.timecode, BoxSection::timecode_defaults()),
            dash: file.dash.unwrap_or_default(),
            logfile: file.logfile.unwrap_or_default(),
            output: file.output.unwrap_or_default(),
            alignment: file.alignment.unwrap_or_default(),
            telemetry: file.telemetry.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            key: "config".to_string(),
            value: e.to_string(),
        })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration, including loading any font files
    pub fn validate(&self) -> Result<()> {
        self.log.validate("log")?;
        self.timecode.validate("timecode")?;
        self.dash.validate()?;
        self.output.validate()?;
        self.alignment.validate()?;
        self.telemetry.validate()?;
        Ok(())
    }
}

fn apply_partial(partial: Option<PartialBoxSection>, defaults: BoxSection) -> BoxSection {
    match partial {
        Some(partial) => partial.apply(defaults),
        None => defaults,
    }
}

/// An RGB color, written as `[r, g, b]` or `"#rrggbb"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ColorRepr", into = "ColorRepr")]
pub struct Color(pub [u8; 3]);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Rgb([u8; 3]),
    Hex(String),
}

impl TryFrom<ColorRepr> for Color {
    type Error = String;

    fn try_from(repr: ColorRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ColorRepr::Rgb(rgb) => Ok(Color(rgb)),
            ColorRepr::Hex(hex) => {
                let digits = hex.strip_prefix('#').unwrap_or(&hex);
                if digits.len() != 6 || !digits.is_ascii() {
                    return Err(format!("malformed color '{}'", hex));
                }
                let channel = |i: usize| {
                    u8::from_str_radix(&digits[i..i + 2], 16)
                        .map_err(|_| format!("malformed color '{}'", hex))
                };
                Ok(Color([channel(0)?, channel(2)?, channel(4)?]))
            }
        }
    }
}

impl From<Color> for ColorRepr {
    fn from(color: Color) -> Self {
        ColorRepr::Rgb(color.0)
    }
}

/// One text overlay box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoxSection {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub padx: u32,
    pub pady: u32,
    pub fgcolor: Color,
    pub bgcolor: Color,
    /// Background opacity (0.0-1.0)
    pub alpha: f32,
    /// `"builtin"` or a path to a TrueType/OpenType file
    pub font: String,
    pub fontscale: f32,
    /// Pixel distance between baselines; derived from the font when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineheight: Option<u32>,
    /// Maximum visible lines; unset means single-line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,
}

impl BoxSection {
    pub fn log_defaults() -> Self {
        Self {
            x: 20,
            y: 20,
            width: 640,
            height: 180,
            padx: 10,
            pady: 20,
            fgcolor: Color([255, 255, 255]),
            bgcolor: Color([40, 40, 40]),
            alpha: 0.4,
            font: FontFace::BUILTIN.to_string(),
            fontscale: 1.0,
            lineheight: Some(16),
            lines: Some(10),
        }
    }

    pub fn timecode_defaults() -> Self {
        Self {
            x: 20,
            y: 210,
            width: 320,
            height: 30,
            padx: 10,
            pady: 20,
            fgcolor: Color([255, 255, 255]),
            bgcolor: Color([40, 40, 40]),
            alpha: 0.4,
            font: FontFace::BUILTIN.to_string(),
            fontscale: 1.0,
            lineheight: None,
            lines: None,
        }
    }

    /// Number of lines the box shows
    pub fn max_lines(&self) -> usize {
        self.lines.unwrap_or(1)
    }

    fn validate(&self, section: &str) -> Result<()> {
        let invalid = |key: &str, value: String| ConfigError::InvalidValue {
            key: format!("{}.{}", section, key),
            value,
        };

        if self.width == 0 || self.height == 0 {
            return Err(invalid("size", format!("{}x{}", self.width, self.height)).into());
        }

        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(invalid("alpha", self.alpha.to_string()).into());
        }

        if !(self.fontscale > 0.0 && self.fontscale.is_finite()) {
            return Err(invalid("fontscale", self.fontscale.to_string()).into());
        }

        if self.lineheight == Some(0) {
            return Err(invalid("lineheight", "0".to_string()).into());
        }

        if self.lines == Some(0) {
            return Err(invalid("lines", "0".to_string()).into());
        }

        FontFace::load(&self.font)?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialBoxSection {
    x: Option<u32>,
    y: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    padx: Option<u32>,
    pady: Option<u32>,
    fgcolor: Option<Color>,
    bgcolor: Option<Color>,
    alpha: Option<f32>,
    font: Option<String>,
    fontscale: Option<f32>,
    lineheight: Option<u32>,
    lines: Option<usize>,
}

impl PartialBoxSection {
    fn apply(self, defaults: BoxSection) -> BoxSection {
        BoxSection {
            x: self.x.unwrap_or(defaults.x),
            y: self.y.unwrap_or(defaults.y),
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            padx: self.padx.unwrap_or(defaults.padx),
            pady: self.pady.unwrap_or(defaults.pady),
            fgcolor: self.fgcolor.unwrap_or(defaults.fgcolor),
            bgcolor: self.bgcolor.unwrap_or(defaults.bgcolor),
            alpha: self.alpha.unwrap_or(defaults.alpha),
            font: self.font.unwrap_or(defaults.font),
            fontscale: self.fontscale.unwrap_or(defaults.fontscale),
            lineheight: self.lineheight.or(defaults.lineheight),
            lines: self.lines.or(defaults.lines),
        }
    }
}

/// Text box keys that a `[dash]` section may carry but does not use
const TEXT_BOX_KEYS: [&str; 9] = [
    "padx",
    "pady",
    "fgcolor",
    "bgcolor",
    "alpha",
    "font",
    "fontscale",
    "lineheight",
    "lines",
];

/// Where the scaled dash video lands in the output.
///
/// Shares the box key set with `[log]` and `[timecode]`, but only the
/// geometry applies to a video; the text keys are accepted and ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashSection {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,

    #[serde(flatten, skip_serializing)]
    ignored: BTreeMap<String, toml::Value>,
}

impl Default for DashSection {
    fn default() -> Self {
        Self {
            x: 800,
            y: 20,
            width: 400,
            height: 280,
            ignored: BTreeMap::new(),
        }
    }
}

impl DashSection {
    fn validate(&self) -> Result<()> {
        for key in self.ignored.keys() {
            if !TEXT_BOX_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: format!("dash.{}", key),
                    value: "unknown key".to_string(),
                }
                .into());
            }
            warn!("dash.{} has no effect on the dash video", key);
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidValue {
                key: "dash.size".to_string(),
                value: format!("{}x{}", self.width, self.height),
            }
            .into());
        }
        Ok(())
    }
}

/// How wall-clock log timestamps are interpreted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogFileConfig {
    /// Timezone of the log's zone-less timestamps
    pub zone: Zone,
}

/// Encoding and finishing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// ffmpeg video encoder for the intermediate and final files
    pub codec: String,

    /// Quality setting (0-100, higher is better)
    pub quality: u8,

    pub pixel_format: String,

    /// Upper bound on the final transcode, in seconds
    pub transcode_timeout_secs: u64,

    /// chrono format string for the timecode overlay
    pub timecode_format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            quality: 85,
            pixel_format: "yuv420p".to_string(),
            transcode_timeout_secs: 3600,
            timecode_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        }
    }
}

impl OutputConfig {
    /// Map the 0-100 quality scale onto x264's CRF range
    pub fn crf(&self) -> u8 {
        (51 - ((self.quality as f32 / 100.0) * 51.0) as u8).clamp(0, 51)
    }

    fn validate(&self) -> Result<()> {
        if self.quality > 100 {
            return Err(ConfigError::InvalidValue {
                key: "output.quality".to_string(),
                value: self.quality.to_string(),
            }
            .into());
        }

        if self.transcode_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "output.transcode_timeout_secs".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        if self.codec.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "output.codec".to_string(),
                value: self.codec.clone(),
            }
            .into());
        }

        Ok(())
    }
}

/// Secondary video alignment settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlignmentConfig {
    /// Probe tag holding the secondary video's start time
    pub timestamp_tag: String,

    /// Timezone assumed for a tag value without a zone designator
    pub zone: Zone,

    /// Reject offsets beyond this many seconds as a clock mismatch; unset
    /// accepts any offset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_offset_secs: Option<f64>,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            timestamp_tag: "TIMESTAMP".to_string(),
            zone: Zone::Local,
            max_offset_secs: None,
        }
    }
}

impl AlignmentConfig {
    fn validate(&self) -> Result<()> {
        if let Some(limit) = self.max_offset_secs {
            if !(limit > 0.0) {
                return Err(ConfigError::InvalidValue {
                    key: "alignment.max_offset_secs".to_string(),
                    value: limit.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// External telemetry extractor invocation
///
/// `{input}` and `{output}` in `args` are replaced by the video path and the
/// side-file base path. The tool is expected to write `{output}` followed by
/// `side_file_suffix`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub side_file_suffix: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("gopro2gpx"),
            args: vec![
                "-s".to_string(),
                "{input}".to_string(),
                "{output}".to_string(),
            ],
            side_file_suffix: ".gpx".to_string(),
        }
    }
}

impl TelemetryConfig {
    fn validate(&self) -> Result<()> {
        if !self.args.iter().any(|a| a.contains("{input}")) {
            return Err(ConfigError::InvalidValue {
                key: "telemetry.args".to_string(),
                value: format!("{:?} (missing {{input}})", self.args),
            }
            .into());
        }
        if !self.args.iter().any(|a| a.contains("{output}")) {
            return Err(ConfigError::InvalidValue {
                key: "telemetry.args".to_string(),
                value: format!("{:?} (missing {{output}})", self.args),
            }
            .into());
        }
        Ok(())
    }
}
