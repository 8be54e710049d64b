use std::fmt::Display;
use std::path::PathBuf;

use crate::error::{ConvertError, Result};
use crate::ffmpeg::process::TerminationKind;
use crate::resolver::OutputOverride;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    CancelledBeforeStart,
}

impl JobStatus {
    pub fn can_become(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::CancelledBeforeStart)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::CancelledBeforeStart)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status_str = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::CancelledBeforeStart => "cancelled",
        };
        write!(f, "{}", status_str)
    }
}

#[derive(Clone, Debug)]
pub struct ConversionJob {
    pub index: usize,
    pub input: PathBuf,
    pub output: PathBuf,
    pub output_override: OutputOverride,
    pub resolved_args: Option<String>,
    pub duration_secs: Option<f64>,
    pub progress: f64,
    pub exit_code: Option<i32>,
    pub termination: Option<TerminationKind>,
    pub error: Option<String>,
    status: JobStatus,
    history: Vec<JobStatus>,
}

impl ConversionJob {
    pub fn new(index: usize, input: PathBuf, output: PathBuf, output_override: OutputOverride) -> Self {
        ConversionJob {
            index,
            input,
            output,
            output_override,
            resolved_args: None,
            duration_secs: None,
            progress: 0.0,
            exit_code: None,
            termination: None,
            error: None,
            status: JobStatus::Queued,
            history: vec![JobStatus::Queued],
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Every status this job has been in, oldest first.
    pub fn history(&self) -> &[JobStatus] {
        &self.history
    }

    pub fn advance(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_become(next) {
            return Err(ConvertError::InvalidTransition {
                index: self.index,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.history.push(next);
        Ok(())
    }
}
