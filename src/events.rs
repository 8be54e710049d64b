use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::ffmpeg::process::TerminationKind;
use crate::job::JobStatus;

#[derive(Clone, Debug, PartialEq)]
pub enum ConversionEvent {
    BatchStarted {
        total: usize,
        preset: String,
    },
    JobStarted {
        index: usize,
        input: PathBuf,
        output: PathBuf,
        args: String,
        duration_secs: Option<f64>,
        estimated_mb: Option<f64>,
    },
    Warning {
        index: usize,
        message: String,
    },
    /// One raw line from the encoder's diagnostic stream.
    Log {
        index: usize,
        line: String,
    },
    Progress {
        index: usize,
        elapsed_secs: f64,
        fraction: f64,
    },
    JobFinished {
        index: usize,
        input: PathBuf,
        status: JobStatus,
        exit_code: Option<i32>,
        termination: Option<TerminationKind>,
        error: Option<String>,
    },
    JobCancelled {
        index: usize,
        input: PathBuf,
    },
    BatchProgress {
        completed: usize,
        total: usize,
    },
    BatchFinished {
        completed: usize,
        failed: usize,
        cancelled: usize,
    },
}

/// Fans events out to every subscriber. Subscribers that hung up are skipped.
#[derive(Clone, Default)]
pub struct Publisher {
    subscribers: Vec<Sender<ConversionEvent>>,
}

impl Publisher {
    pub fn new() -> Self {
        Publisher { subscribers: vec![] }
    }

    pub fn subscribe(&mut self) -> Receiver<ConversionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&self, event: ConversionEvent) {
        for tx in &self.subscribers {
            let _ = tx.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out() {
        let mut publisher = Publisher::new();
        let first = publisher.subscribe();
        let second = publisher.subscribe();
        publisher.publish(ConversionEvent::BatchProgress { completed: 1, total: 2 });
        assert_eq!(first.recv().unwrap(), ConversionEvent::BatchProgress { completed: 1, total: 2 });
        assert_eq!(second.recv().unwrap(), ConversionEvent::BatchProgress { completed: 1, total: 2 });
    }

    #[test]
    fn test_dropped_subscriber() {
        let mut publisher = Publisher::new();
        drop(publisher.subscribe());
        let live = publisher.subscribe();
        publisher.publish(ConversionEvent::Warning { index: 0, message: String::from("w") });
        assert!(matches!(live.recv().unwrap(), ConversionEvent::Warning { index: 0, .. }));
    }
}
