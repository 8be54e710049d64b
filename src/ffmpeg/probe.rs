use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

pub const UNKNOWN_RESOLUTION: &str = "unknown";

/// Media metadata the engine needs. Failures are not errors here: an
/// unknown duration is `0.0` and an unknown resolution is `"unknown"`.
pub trait MediaProbe: Send + Sync {
    fn duration(&self, path: &Path) -> f64;

    fn resolution(&self, path: &Path) -> String;
}

#[derive(Serialize, Deserialize, Debug)]
struct FFProbeJsonOutput {
    #[serde(default)]
    pub streams: Vec<FFProbeJsonStream>,
    pub format: Option<FFProbeJsonFormat>,
}

#[derive(Serialize, Deserialize, Debug)]
struct FFProbeJsonStream {
    pub width: Option<u64>,
    pub height: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug)]
struct FFProbeJsonFormat {
    pub duration: Option<String>,
}

pub struct FFprobe {
    binary: PathBuf,
}

impl FFprobe {
    pub fn new(binary: &Path) -> Self {
        FFprobe { binary: PathBuf::from(binary) }
    }

    pub fn probe_duration(&self, path: &Path) -> Result<f64> {
        let json = self.run(path, "format=duration")?;
        parse_duration(&PathBuf::from(path), &json)
    }

    pub fn probe_resolution(&self, path: &Path) -> Result<String> {
        let json = self.run(path, "stream=width,height")?;
        parse_resolution(&PathBuf::from(path), &json)
    }

    fn run(&self, path: &Path, entries: &str) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(["-v", "error", "-of", "json", "-select_streams", "v:0", "-show_entries", entries])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ConvertError::probe(&PathBuf::from(path), &format!("unable to run {:?}: {}", self.binary, e)))?;
        if output.status.success() {
            String::from_utf8(output.stdout)
                .map_err(|_| ConvertError::probe(&PathBuf::from(path), "ffprobe output is not UTF-8"))
        } else {
            Err(ConvertError::probe(&PathBuf::from(path), "ffprobe did not exit successfully."))
        }
    }
}

impl MediaProbe for FFprobe {
    fn duration(&self, path: &Path) -> f64 {
        self.probe_duration(path).unwrap_or_else(|err| {
            log::warn!("{}; duration unknown", err);
            0.0
        })
    }

    fn resolution(&self, path: &Path) -> String {
        self.probe_resolution(path).unwrap_or_else(|err| {
            log::warn!("{}; resolution unknown", err);
            String::from(UNKNOWN_RESOLUTION)
        })
    }
}

fn parse_duration(path: &PathBuf, json: &str) -> Result<f64> {
    let deserialized = serde_json::from_str::<FFProbeJsonOutput>(json)
        .map_err(|e| ConvertError::probe(path, &e.to_string()))?;
    let duration = deserialized
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| ConvertError::probe(path, "no duration reported"))?;
    match duration.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs),
        _ => Err(ConvertError::probe(path, &format!("unexpected duration format: {:?}", duration))),
    }
}

fn parse_resolution(path: &PathBuf, json: &str) -> Result<String> {
    let deserialized = serde_json::from_str::<FFProbeJsonOutput>(json)
        .map_err(|e| ConvertError::probe(path, &e.to_string()))?;
    match deserialized.streams.first() {
        Some(FFProbeJsonStream { width: Some(width), height: Some(height) }) => Ok(format!("{}x{}", width, height)),
        _ => Err(ConvertError::probe(path, "no video stream dimensions reported")),
    }
}
