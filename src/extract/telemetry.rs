use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::{
    config::TelemetryConfig,
    error::{ExtractionError, Result},
    timestamp::{Timestamp, Zone},
};

/// Runs an external tool that dumps a video's embedded GPS track to GPX
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryExtractor {
    program: PathBuf,
    args: Vec<String>,
    side_file_suffix: String,
}

impl TelemetryExtractor {
    pub fn new<P: Into<PathBuf>>(program: P, args: Vec<String>, side_file_suffix: &str) -> Self {
        Self {
            program: program.into(),
            args,
            side_file_suffix: side_file_suffix.to_string(),
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.args.clone(),
            &config.side_file_suffix,
        )
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Start time of `video` according to its first telemetry fix.
    ///
    /// The side-file lives in a private temporary directory that is removed
    /// on every return path.
    pub fn extract(&self, video: &Path) -> Result<Timestamp> {
        let workdir = tempfile::Builder::new()
            .prefix("vidlog-telemetry")
            .tempdir()?;
        let output_base = workdir.path().join("telemetry");

        let args: Vec<OsString> = self
            .args
            .iter()
            .map(|arg| substitute(arg, video, &output_base))
            .collect();

        debug!("Running {:?} {:?}", self.program, args);
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| ExtractionError::SpawnFailed {
                program: self.program_name(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ExtractionError::ToolFailed {
                program: self.program_name(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let side_file = self.locate_side_file(&output_base)?;
        let content = std::fs::read_to_string(&side_file).map_err(|e| {
            ExtractionError::MalformedSideFile {
                path: side_file.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        let start = parse_first_fix(&content, &side_file)?;
        info!("Telemetry start time for {:?}: {}", video, start);
        Ok(start)
    }

    fn locate_side_file(&self, output_base: &Path) -> Result<PathBuf> {
        let mut with_suffix = output_base.as_os_str().to_owned();
        with_suffix.push(&self.side_file_suffix);
        let with_suffix = PathBuf::from(with_suffix);

        let found = [with_suffix.as_path(), output_base]
            .into_iter()
            .find(|p| p.is_file())
            .map(Path::to_path_buf);

        found.ok_or_else(|| {
            ExtractionError::MissingSideFile {
                path: with_suffix.display().to_string(),
            }
            .into()
        })
    }
}

fn substitute(template: &str, input: &Path, output: &Path) -> OsString {
    match template {
        "{input}" => input.as_os_str().to_owned(),
        "{output}" => output.as_os_str().to_owned(),
        other => other
            .replace("{input}", &input.to_string_lossy())
            .replace("{output}", &output.to_string_lossy())
            .into(),
    }
}

/// Text of the first `gpx/trk/trkseg/trkpt/time` element
pub fn first_track_point_time(xml: &str) -> std::result::Result<Option<String>, roxmltree::Error> {
    let doc = roxmltree::Document::parse(xml)?;
    let root = doc.root_element();
    if root.tag_name().name() != "gpx" {
        return Ok(None);
    }

    let time = child_elements(root, "trk")
        .flat_map(|trk| child_elements(trk, "trkseg"))
        .flat_map(|seg| child_elements(seg, "trkpt"))
        .flat_map(|pt| child_elements(pt, "time"))
        .find_map(|time| time.text().map(|t| t.trim().to_string()));

    Ok(time)
}

fn child_elements<'a, 'input: 'a>(
    node: roxmltree::Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn parse_first_fix(content: &str, side_file: &Path) -> Result<Timestamp> {
    let value = first_track_point_time(content)
        .map_err(|e| ExtractionError::MalformedSideFile {
            path: side_file.display().to_string(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| ExtractionError::MissingTime {
            path: side_file.display().to_string(),
        })?;

    Timestamp::parse_iso8601(&value, Zone::Utc)
        .ok_or_else(|| ExtractionError::InvalidTime { value }.into())
}
