use std::fs;
use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::batch::Batch;
use crate::config::EngineConfig;
use crate::error::{ConvertError, Result};
use crate::estimate::estimate_size_mb;
use crate::events::{ConversionEvent, Publisher};
use crate::ffmpeg::probe::MediaProbe;
use crate::ffmpeg::process::{ProcessController, TerminationKind};
use crate::ffmpeg::FFmpeg;
use crate::job::{ConversionJob, JobStatus};
use crate::presets::Preset;
use crate::resolver;

/// Cloneable handle onto an engine's cancellation flag.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The raw flag, for registering with a signal handler.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

#[derive(Clone, Debug)]
pub struct BatchReport {
    pub jobs: Vec<ConversionJob>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status() == status).count()
    }

    pub fn completed(&self) -> usize {
        self.count(JobStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(JobStatus::Failed)
    }

    pub fn cancelled(&self) -> usize {
        self.count(JobStatus::CancelledBeforeStart)
    }
}

/// Runs a batch one job at a time and publishes what happens.
pub struct ConversionEngine {
    config: EngineConfig,
    probe: Arc<dyn MediaProbe>,
    cancel: CancelHandle,
    publisher: Publisher,
}

impl ConversionEngine {
    pub fn new(config: EngineConfig, probe: Arc<dyn MediaProbe>) -> Self {
        ConversionEngine {
            config,
            probe,
            cancel: CancelHandle { flag: Arc::new(AtomicBool::new(false)) },
            publisher: Publisher::new(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<ConversionEvent> {
        self.publisher.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Stops scheduling and terminates the running encoder. Jobs that
    /// already finished keep their status.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs the batch on a dedicated worker thread. Subscribers' channels
    /// close once the batch is done.
    pub fn start(self, batch: Batch) -> JoinHandle<Result<BatchReport>> {
        thread::spawn(move || self.run(batch))
    }

    pub fn run(&self, batch: Batch) -> Result<BatchReport> {
        let started = Instant::now();
        FFmpeg::new(&self.config.encoder).check_installed()?;

        let Batch { preset, mut jobs } = batch;
        let total = jobs.len();
        let mut completed = 0;
        info!("starting batch of {} job(s) with preset {:?}", total, preset.name);
        self.publisher.publish(ConversionEvent::BatchStarted {
            total,
            preset: preset.name.clone(),
        });

        for job in jobs.iter_mut() {
            if self.cancel.is_cancelled() {
                job.advance(JobStatus::CancelledBeforeStart)?;
                debug!("skipping {:?}: batch cancelled", job.input);
                self.publisher.publish(ConversionEvent::JobCancelled {
                    index: job.index,
                    input: job.input.clone(),
                });
                continue;
            }

            self.run_job(job, &preset)?;
            completed += 1;
            self.publisher.publish(ConversionEvent::BatchProgress { completed, total });
        }

        let report = BatchReport {
            jobs,
            elapsed: started.elapsed(),
        };
        info!(
            "batch finished: {} completed, {} failed, {} cancelled",
            report.completed(), report.failed(), report.cancelled());
        self.publisher.publish(ConversionEvent::BatchFinished {
            completed: report.completed(),
            failed: report.failed(),
            cancelled: report.cancelled(),
        });
        Ok(report)
    }

    fn run_job(&self, job: &mut ConversionJob, preset: &Preset) -> Result<()> {
        let input_extension = job
            .input
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let resolved = resolver::resolve(&preset.template, &input_extension, &job.output_override);
        let args_line = resolved.args_line();
        let duration = self.probe.duration(&job.input);
        job.resolved_args = Some(args_line.clone());
        job.duration_secs = if duration > 0.0 { Some(duration) } else { None };

        job.advance(JobStatus::Running)?;
        info!("[{}] {:?} -> {:?}", job.index, job.input, job.output);
        self.publisher.publish(ConversionEvent::JobStarted {
            index: job.index,
            input: job.input.clone(),
            output: job.output.clone(),
            args: args_line.clone(),
            duration_secs: job.duration_secs,
            estimated_mb: estimate_size_mb(duration, &args_line),
        });
        for message in resolved.warnings {
            warn!("[{}] {:?}: {}", job.index, job.input, message);
            self.publisher.publish(ConversionEvent::Warning { index: job.index, message });
        }

        let progress = Arc::new(AtomicU64::new(0f64.to_bits()));
        let outcome = self.drive(job, &resolved.args, Arc::clone(&progress));
        job.progress = f64::from_bits(progress.load(Ordering::SeqCst));

        match outcome {
            Ok((status, termination)) => {
                job.exit_code = status.code();
                job.termination = termination;
                if status.success() {
                    job.progress = 1.0;
                    job.advance(JobStatus::Completed)?;
                    info!("[{}] completed {:?}", job.index, job.output);
                } else {
                    let err = ConvertError::NonZeroExit {
                        input: job.input.clone(),
                        code: status.code(),
                    };
                    self.fail(job, err)?;
                    remove_partial_output(job);
                }
            },
            Err(err) => {
                let launched = !matches!(err, ConvertError::Launch { .. });
                self.fail(job, err)?;
                if launched {
                    remove_partial_output(job);
                }
            },
        };

        self.publisher.publish(ConversionEvent::JobFinished {
            index: job.index,
            input: job.input.clone(),
            status: job.status(),
            exit_code: job.exit_code,
            termination: job.termination,
            error: job.error.clone(),
        });
        Ok(())
    }

    fn fail(&self, job: &mut ConversionJob, err: ConvertError) -> Result<()> {
        error!("[{}] {}", job.index, err);
        job.error = Some(err.to_string());
        job.advance(JobStatus::Failed)
    }

    /// Launches the encoder and waits for it, terminating it if the batch is
    /// cancelled meanwhile.
    fn drive(&self, job: &ConversionJob, args: &[String], progress: Arc<AtomicU64>) -> Result<(ExitStatus, Option<TerminationKind>)> {
        let index = job.index;
        let duration = job.duration_secs;
        let lines = self.publisher.clone();
        let samples = self.publisher.clone();

        let mut encoder = ProcessController::new(&self.config.encoder)
            .on_line(move |line| lines.publish(ConversionEvent::Log { index, line: String::from(line) }))
            .on_progress(move |sample| {
                let fraction = raise_fraction(&progress, progress_fraction(sample.elapsed_secs, duration));
                samples.publish(ConversionEvent::Progress {
                    index,
                    elapsed_secs: sample.elapsed_secs,
                    fraction,
                });
            })
            .launch(&job.input, &job.output, args)?;

        loop {
            if let Some(status) = encoder.try_wait()? {
                return Ok((status, None));
            }
            if self.cancel.is_cancelled() {
                info!("[{}] cancelling encoder ({})", index, encoder.id());
                let (status, kind) = encoder.terminate(self.config.grace_period)?;
                return Ok((status, Some(kind)));
            }
            thread::sleep(self.config.poll_interval);
        }
    }
}

/// `elapsed / duration` clamped to `[0, 1]`; `0` when the duration is unknown.
pub fn progress_fraction(elapsed_secs: f64, duration_secs: Option<f64>) -> f64 {
    match duration_secs {
        Some(duration) if duration > 0.0 => (elapsed_secs / duration).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Stores `fraction` unless an earlier sample already reported more, and
/// returns what is stored.
fn raise_fraction(progress: &AtomicU64, fraction: f64) -> f64 {
    let previous = f64::from_bits(progress.load(Ordering::SeqCst));
    let fraction = fraction.max(previous);
    progress.store(fraction.to_bits(), Ordering::SeqCst);
    fraction
}

fn remove_partial_output(job: &ConversionJob) {
    match fs::remove_file(&job.output) {
        Ok(()) => debug!("removed partial output {:?}", job.output),
        Err(err) if err.kind() == io::ErrorKind::NotFound => (),
        Err(err) => warn!("unable to remove partial output {:?}: {}", job.output, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct FixedProbe(f64);

    impl MediaProbe for FixedProbe {
        fn duration(&self, _path: &Path) -> f64 {
            self.0
        }

        fn resolution(&self, _path: &Path) -> String {
            String::from("1920x1080")
        }
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(progress_fraction(30.0, Some(60.0)), 0.5);
        assert_eq!(progress_fraction(90.0, Some(60.0)), 1.0);
        assert_eq!(progress_fraction(30.0, None), 0.0);
        assert_eq!(progress_fraction(30.0, Some(0.0)), 0.0);
    }

    #[test]
    fn test_fraction_never_goes_back() {
        let progress = AtomicU64::new(0f64.to_bits());
        let duration = Some(4.0);
        let reported: Vec<f64> = [2.0, 1.0, 3.0, 0.5]
            .iter()
            .map(|elapsed| raise_fraction(&progress, progress_fraction(*elapsed, duration)))
            .collect();
        assert_eq!(reported, vec![0.5, 0.5, 0.75, 0.75]);
        assert_eq!(f64::from_bits(progress.load(Ordering::SeqCst)), 0.75);
    }

    #[test]
    fn test_cancel_handle() {
        let engine = ConversionEngine::new(EngineConfig::default(), Arc::new(FixedProbe(1.0)));
        let handle = engine.cancel_handle();
        assert!(!handle.is_cancelled());
        engine.cancel();
        assert!(handle.is_cancelled());
        assert!(handle.flag().load(Ordering::SeqCst));
    }

    #[test]
    fn test_missing_encoder_spawns_nothing() {
        let _guard = crate::test_support::serial();
        let presets = crate::presets::PresetSet::builtin();
        let requests = vec![crate::batch::JobRequest::new(std::path::PathBuf::from("/v/a.mp4"))];
        let policy = crate::batch::OutputPolicy::default().suffix("_x");
        let batch = Batch::plan(&requests, "Remux", &presets, &policy).unwrap();
        let config = EngineConfig::default().encoder(std::path::PathBuf::from("/nonexistent/ffbatch-encoder"));
        let mut engine = ConversionEngine::new(config, Arc::new(FixedProbe(1.0)));
        let events = engine.subscribe();

        assert!(matches!(engine.run(batch), Err(ConvertError::EncoderUnavailable { .. })));
        drop(engine);
        assert_eq!(events.iter().count(), 0);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use tempfile::TempDir;

        use crate::batch::{JobRequest, OutputPolicy};
        use crate::presets::PresetSet;
        use crate::resolver::{FormatOverride, OutputOverride};
        use crate::test_support::{fake_encoder, invocations, serial, SCRIPTED_ENCODER};

        fn presets() -> PresetSet {
            PresetSet::from_json_str(r#"{
                "h264": {"args": "-c:v libx264 -b:v 2000k -b:a 128k", "category": "Video"},
                "remux": {"args": "-c copy", "category": "Container"}
            }"#).unwrap()
        }

        fn setup(names: &[&str], preset: &str) -> (TempDir, ConversionEngine, Batch) {
            let dir = tempfile::tempdir().unwrap();
            let encoder = fake_encoder(dir.path(), SCRIPTED_ENCODER);
            let requests: Vec<JobRequest> = names
                .iter()
                .map(|n| JobRequest::new(dir.path().join(n)))
                .collect();
            let policy = OutputPolicy::default().output_dir(dir.path().join("out"));
            fs::create_dir_all(dir.path().join("out")).unwrap();
            let batch = Batch::plan(&requests, preset, &presets(), &policy).unwrap();
            let config = EngineConfig::default()
                .encoder(encoder)
                .grace_period(Duration::from_secs(5))
                .poll_interval(Duration::from_millis(10));
            let engine = ConversionEngine::new(config, Arc::new(FixedProbe(4.0)));
            (dir, engine, batch)
        }

        fn statuses(report: &BatchReport) -> Vec<JobStatus> {
            report.jobs.iter().map(|j| j.status()).collect()
        }

        #[test]
        fn test_sequential_batch() {
            let _guard = serial();
            let (dir, mut engine, batch) = setup(&["a.mp4", "b.mp4"], "h264");
            let events = engine.subscribe();
            let report = engine.start(batch).join().unwrap().unwrap();
            let events: Vec<ConversionEvent> = events.iter().collect();

            assert_eq!(statuses(&report), vec![JobStatus::Completed, JobStatus::Completed]);
            for job in &report.jobs {
                assert_eq!(job.history(), &[JobStatus::Queued, JobStatus::Running, JobStatus::Completed]);
                assert_eq!(job.exit_code, Some(0));
                assert_eq!(job.progress, 1.0);
                assert_eq!(job.resolved_args.as_deref(), Some("-c:v libx264 -b:v 2000k -b:a 128k"));
                assert!(job.output.exists());
            }
            assert_eq!(invocations(dir.path()).len(), 2);

            let finished: Vec<usize> = events
                .iter()
                .filter_map(|e| match e {
                    ConversionEvent::JobFinished { index, .. } => Some(*index),
                    _ => None,
                })
                .collect();
            assert_eq!(finished, vec![0, 1]);

            let overall: Vec<(usize, usize)> = events
                .iter()
                .filter_map(|e| match e {
                    ConversionEvent::BatchProgress { completed, total } => Some((*completed, *total)),
                    _ => None,
                })
                .collect();
            assert_eq!(overall, vec![(1, 2), (2, 2)]);

            assert!(events.iter().any(|e| matches!(e,
                ConversionEvent::JobStarted { index: 0, estimated_mb: Some(mb), .. } if *mb == 1.04)));
            assert!(matches!(events.last(), Some(ConversionEvent::BatchFinished { completed: 2, failed: 0, cancelled: 0 })));
        }

        #[test]
        fn test_progress_is_monotonic_and_bounded() {
            let _guard = serial();
            let (_dir, mut engine, batch) = setup(&["a.mp4"], "h264");
            let events = engine.subscribe();
            engine.run(batch).unwrap();
            drop(engine);

            let fractions: Vec<f64> = events
                .iter()
                .filter_map(|e| match e {
                    ConversionEvent::Progress { index: 0, fraction, .. } => Some(fraction),
                    _ => None,
                })
                .collect();
            assert_eq!(fractions, vec![0.25, 0.5, 1.0]);
            assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
            assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
        }

        #[test]
        fn test_raw_lines_forwarded() {
            let _guard = serial();
            let (_dir, mut engine, batch) = setup(&["a.mp4"], "h264");
            let events = engine.subscribe();
            engine.run(batch).unwrap();
            drop(engine);

            let lines: Vec<String> = events
                .iter()
                .filter_map(|e| match e {
                    ConversionEvent::Log { line, .. } => Some(line),
                    _ => None,
                })
                .collect();
            assert_eq!(lines.len(), 4);
            assert!(lines[0].starts_with("Input #0"));
        }

        #[test]
        fn test_failure_does_not_stop_batch() {
            let _guard = serial();
            let (dir, mut engine, batch) = setup(&["a.mp4", "fail.mp4", "c.mp4"], "h264");
            let _events = engine.subscribe();
            let report = engine.run(batch).unwrap();

            assert_eq!(statuses(&report), vec![JobStatus::Completed, JobStatus::Failed, JobStatus::Completed]);
            let failed = &report.jobs[1];
            assert_eq!(failed.history(), &[JobStatus::Queued, JobStatus::Running, JobStatus::Failed]);
            assert_eq!(failed.exit_code, Some(1));
            assert!(failed.error.as_deref().unwrap().contains("exited with Some(1)"));
            assert!(!failed.output.exists());
            assert_eq!(invocations(dir.path()).len(), 3);
            assert_eq!(report.completed(), 2);
            assert_eq!(report.failed(), 1);
        }

        #[test]
        fn test_cancel_while_running() {
            let _guard = serial();
            let (dir, mut engine, batch) = setup(&["a.mp4", "slow.mp4", "c.mp4", "d.mp4"], "h264");
            let events = engine.subscribe();
            let cancel = engine.cancel_handle();
            let worker = engine.start(batch);

            let mut seen = vec![];
            for event in events.iter() {
                // the slow job's trap is in place once it reports progress
                if let ConversionEvent::Progress { index: 1, .. } = event {
                    cancel.cancel();
                }
                seen.push(event);
            }
            let report = worker.join().unwrap().unwrap();

            assert_eq!(
                statuses(&report),
                vec![JobStatus::Completed, JobStatus::Failed, JobStatus::CancelledBeforeStart, JobStatus::CancelledBeforeStart]);
            assert_eq!(report.jobs[1].termination, Some(TerminationKind::Graceful));
            assert_eq!(report.jobs[1].exit_code, Some(255));
            for job in &report.jobs[2..] {
                assert_eq!(job.history(), &[JobStatus::Queued, JobStatus::CancelledBeforeStart]);
                assert!(job.resolved_args.is_none());
            }

            let spawned = invocations(dir.path());
            assert_eq!(spawned.len(), 2);
            assert!(spawned.iter().all(|i| !i.ends_with("c.mp4") && !i.ends_with("d.mp4")));

            let cancelled: Vec<usize> = seen
                .iter()
                .filter_map(|e| match e {
                    ConversionEvent::JobCancelled { index, .. } => Some(*index),
                    _ => None,
                })
                .collect();
            assert_eq!(cancelled, vec![2, 3]);
        }

        #[test]
        fn test_cancel_before_start() {
            let _guard = serial();
            let (dir, engine, batch) = setup(&["a.mp4", "b.mp4"], "h264");
            engine.cancel();
            let report = engine.run(batch).unwrap();
            assert_eq!(report.cancelled(), 2);
            assert!(invocations(dir.path()).is_empty());
        }

        #[test]
        fn test_copy_preset_warning() {
            let _guard = serial();
            let dir = tempfile::tempdir().unwrap();
            let encoder = fake_encoder(dir.path(), SCRIPTED_ENCODER);
            let requests = vec![JobRequest::new(dir.path().join("a.mp4"))
                .with_override(OutputOverride::default().format(FormatOverride::Extension(String::from("mkv"))))];
            let policy = OutputPolicy::default().suffix("_converted");
            let batch = Batch::plan(&requests, "remux", &presets(), &policy).unwrap();
            let mut engine = ConversionEngine::new(
                EngineConfig::default().encoder(encoder).poll_interval(Duration::from_millis(10)),
                Arc::new(FixedProbe(0.0)));
            let events = engine.subscribe();
            let report = engine.run(batch).unwrap();
            drop(engine);

            assert_eq!(report.jobs[0].output, dir.path().join("a_converted.mp4"));
            assert_eq!(report.jobs[0].duration_secs, None);
            let events: Vec<ConversionEvent> = events.iter().collect();
            assert!(events.iter().any(|e| matches!(e,
                ConversionEvent::Warning { message, .. } if message == resolver::COPY_CONTAINER_WARNING)));
            assert!(events.iter().all(|e| match e {
                ConversionEvent::Progress { fraction, .. } => *fraction == 0.0,
                _ => true,
            }));
            assert!(events.iter().any(|e| matches!(e,
                ConversionEvent::JobStarted { estimated_mb: None, .. })));
        }
    }
}
