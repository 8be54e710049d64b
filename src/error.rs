use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Unknown preset: {0:?}")]
    UnknownPreset(String),

    #[error("Unable to launch {encoder:?} for {input:?}: {source}")]
    Launch {
        encoder: PathBuf,
        input: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Error waiting for the encoder on {input:?}: {source}")]
    Wait {
        input: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Encoder exited with {code:?} while converting {input:?}")]
    NonZeroExit { input: PathBuf, code: Option<i32> },

    #[error("Error probing {path:?}: {msg}")]
    Probe { path: PathBuf, msg: String },

    #[error("{first:?} and {second:?} would both be written to {output:?}")]
    OutputCollision {
        first: PathBuf,
        second: PathBuf,
        output: PathBuf,
    },

    #[error("Output for {0:?} would overwrite the input file")]
    OutputOverwritesInput(PathBuf),

    #[error("Invalid output override {value:?}: {msg}")]
    InvalidOverride { value: String, msg: String },

    #[error("Job {index} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        index: usize,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Encoder {encoder:?} could not be started: {source}")]
    EncoderUnavailable {
        encoder: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to read presets: {0}")]
    PresetFile(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ConvertError {
    pub fn invalid_override(value: &str, msg: &str) -> Self {
        ConvertError::InvalidOverride {
            value: String::from(value),
            msg: String::from(msg),
        }
    }

    pub fn probe(path: &PathBuf, msg: &str) -> Self {
        ConvertError::Probe {
            path: path.clone(),
            msg: String::from(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
