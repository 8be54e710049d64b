use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{ConvertError, Result};

pub mod probe;
pub mod process;

pub struct FFmpeg {
    encoder: PathBuf,
}

impl FFmpeg {
    pub fn new(encoder: &Path) -> Self {
        FFmpeg { encoder: PathBuf::from(encoder) }
    }

    /// Fails only when the binary cannot be started; its exit status is
    /// not inspected.
    pub fn check_installed(&self) -> Result<()> {
        let cmd = Command::new(&self.encoder)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match cmd {
            Ok(_) => Ok(()),
            Err(source) => Err(ConvertError::EncoderUnavailable {
                encoder: self.encoder.clone(),
                source,
            }),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.check_installed().is_ok()
    }
}
