use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const ENCODER_ENV: &str = "FFBATCH_ENCODER";
pub const PROBE_ENV: &str = "FFBATCH_PROBE";
pub const GRACE_ENV: &str = "FFBATCH_GRACE_SECS";

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub encoder: PathBuf,
    pub probe: PathBuf,
    /// How long an interrupted encoder may take to exit before it is killed.
    pub grace_period: Duration,
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            encoder: PathBuf::from("ffmpeg"),
            probe: PathBuf::from("ffprobe"),
            grace_period: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        EngineConfig::default().apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(mut self, lookup: F) -> Self {
        if let Some(encoder) = lookup(ENCODER_ENV).filter(|s| !s.is_empty()) {
            self.encoder = PathBuf::from(encoder);
        }
        if let Some(probe) = lookup(PROBE_ENV).filter(|s| !s.is_empty()) {
            self.probe = PathBuf::from(probe);
        }
        if let Some(grace) = lookup(GRACE_ENV) {
            match grace.trim().parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => self.grace_period = Duration::from_secs_f64(secs),
                _ => log::warn!("ignoring {}={:?}: not a number of seconds", GRACE_ENV, grace),
            }
        }
        self
    }

    pub fn encoder(mut self, encoder: PathBuf) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn probe(mut self, probe: PathBuf) -> Self {
        self.probe = probe;
        self
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}
