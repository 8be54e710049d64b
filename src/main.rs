use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use human_repr::{HumanCount, HumanDuration};
use kdam::{term, tqdm, Bar, BarExt};
use log::{debug, error};
use rustop::opts;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;

use ffbatch::engine::progress_fraction;
use ffbatch::estimate::estimate_size_mb;
use ffbatch::ffmpeg::probe::{FFprobe, MediaProbe};
use ffbatch::fstools::usable_inputs;
use ffbatch::resolver;
use ffbatch::{
    Batch, CancelHandle, ConversionEngine, ConversionEvent, EngineConfig, FormatOverride, JobRequest, JobStatus,
    OutputOverride, OutputPolicy, PresetSet, ResolutionOverride, Result,
};

fn main() -> ExitCode {
    let (args, files) = opts! {
        synopsis "Convert a batch of media files with ffmpeg using a named preset.";
        opt preset:String=String::from("H264 CRF 23"), short:'p', desc:"Preset to convert with.";
        opt presets:Option<String>, short:'P', desc:"JSON file of presets ({name: {args, desc, category}}).";
        opt list:bool=false, short:'l', desc:"List the available presets and exit.";
        opt output_dir:Option<String>, short:'o', desc:"Directory to write outputs to. (default: next to each input)";
        opt suffix:String=String::from("_converted"), short:'s', desc:"Appended to each input's file stem.";
        opt resolution:String=String::from("Same"), short:'r', desc:"Scale video to WIDTHxHEIGHT, or Same.";
        opt format:String=String::from("Same"), short:'f', desc:"Output container extension, or Same.";
        opt dry_run:bool=false, short:'n', desc:"Describe what would be done, but don't actually do anything.";
        opt grace:Option<f64>, short:'g', desc:"Seconds a cancelled encoder gets to exit before it is killed.";
        opt encoder:Option<String>, short:'e', desc:"Path to the ffmpeg binary.";
    }.parse_or_exit();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let presets = match args.presets {
        Some(ref path) => PresetSet::from_path(Path::new(path)),
        None => Ok(PresetSet::builtin()),
    };
    let presets = match presets {
        Ok(presets) => presets,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        },
    };

    if args.list {
        for preset in presets.sorted() {
            println!("{:<40} {}", preset.to_string(), preset.description);
        }
        return ExitCode::SUCCESS;
    }

    let mut config = EngineConfig::from_env();
    if let Some(encoder) = args.encoder {
        config = config.encoder(PathBuf::from(encoder));
    }
    if let Some(grace) = args.grace.filter(|g| g.is_finite() && *g >= 0.0) {
        config = config.grace_period(Duration::from_secs_f64(grace));
    }

    let output_override = match parse_override(&args.resolution, &args.format) {
        Ok(output_override) => output_override,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        },
    };
    let mut policy = OutputPolicy::default().suffix(&args.suffix);
    if let Some(dir) = args.output_dir {
        policy = policy.output_dir(PathBuf::from(dir));
    }

    let inputs = usable_inputs(&files.iter().map(PathBuf::from).collect::<Vec<PathBuf>>());
    if inputs.is_empty() {
        error!("No input files to convert.");
        return ExitCode::FAILURE;
    }
    let requests: Vec<JobRequest> = inputs
        .into_iter()
        .map(|input| JobRequest::new(input).with_override(output_override.clone()))
        .collect();

    let batch = match Batch::plan(&requests, &args.preset, &presets, &policy) {
        Ok(batch) => batch,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        },
    };

    let probe: Arc<dyn MediaProbe> = Arc::new(FFprobe::new(&config.probe));
    if args.dry_run {
        describe(&batch, probe.as_ref());
        return ExitCode::SUCCESS;
    }

    let mut engine = ConversionEngine::new(config, probe);
    if let Err(err) = register_signals(&engine.cancel_handle()) {
        error!("Unable to register signal handlers: {}", err);
        return ExitCode::FAILURE;
    }
    let events = engine.subscribe();
    let worker = engine.start(batch);

    term::init(false);
    let mut pbar: Option<Bar> = None;
    for event in events {
        render(&mut pbar, event);
    }

    match worker.join() {
        Ok(Ok(report)) => {
            println!(
                "{} completed, {} failed, {} cancelled in {}",
                report.completed(), report.failed(), report.cancelled(),
                report.elapsed.as_secs_f64().human_duration());
            if report.failed() == 0 && report.cancelled() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        },
        Ok(Err(err)) => {
            error!("{}", err);
            ExitCode::FAILURE
        },
        Err(_) => {
            error!("The conversion worker panicked.");
            ExitCode::FAILURE
        },
    }
}

fn parse_override(resolution: &str, format: &str) -> Result<OutputOverride> {
    Ok(OutputOverride::default()
        .resolution(ResolutionOverride::parse(resolution)?)
        .format(FormatOverride::parse(format)?))
}

/// The first SIGINT/SIGTERM cancels the batch; a second one exits at once.
fn register_signals(cancel: &CancelHandle) -> std::io::Result<()> {
    for signal in [SIGINT, SIGTERM] {
        flag::register_conditional_shutdown(signal, 1, cancel.flag())?;
        flag::register(signal, cancel.flag())?;
    }
    Ok(())
}

fn describe(batch: &Batch, probe: &dyn MediaProbe) {
    println!("Preset: {}", batch.preset);
    for job in &batch.jobs {
        let extension = job
            .input
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let resolved = resolver::resolve(&batch.preset.template, &extension, &job.output_override);
        let duration = probe.duration(&job.input);
        println!("{:?} -> {:?}", job.input, job.output);
        println!("    resolution: {}", probe.resolution(&job.input));
        println!("    ffmpeg -y -i {:?} {} {:?}", job.input, resolved.args_line(), job.output);
        if let Some(mb) = estimate_size_mb(duration, &resolved.args_line()) {
            println!("    estimated size: {}", (mb * 1024.0 * 1024.0).human_count_bytes());
        }
        for warning in resolved.warnings {
            println!("    warning: {}", warning);
        }
    }
}

fn render(pbar: &mut Option<Bar>, event: ConversionEvent) {
    match event {
        ConversionEvent::BatchStarted { total, preset } => {
            println!("Converting {} file(s) with {:?}", total, preset);
        },
        ConversionEvent::JobStarted { index, input, duration_secs, estimated_mb, .. } => {
            let name = input.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            let mut bar = tqdm!(
                total = 1000,
                desc = format!("[{}] {}", index + 1, name),
                position = 0,
                force_refresh = true
            );
            let mut postfix = vec![];
            if let Some(secs) = duration_secs {
                postfix.push(secs.human_duration().to_string());
            }
            if let Some(mb) = estimated_mb {
                postfix.push(format!("~{}", (mb * 1024.0 * 1024.0).human_count_bytes()));
            }
            bar.set_postfix(postfix.join(" "));
            let _ = bar.refresh();
            *pbar = Some(bar);
        },
        ConversionEvent::Warning { index, message } => write_line(pbar, format!("[{}] warning: {}", index + 1, message)),
        ConversionEvent::Log { index, line } => debug!("[{}] {}", index + 1, line),
        ConversionEvent::Progress { fraction, .. } => {
            if let Some(bar) = pbar.as_mut() {
                let _ = bar.update_to((fraction * 1000.0) as usize);
            }
        },
        ConversionEvent::JobFinished { index, input, status, exit_code, error, .. } => {
            if let Some(bar) = pbar.as_mut() {
                if status == JobStatus::Completed {
                    let _ = bar.update_to(1000);
                }
            }
            let line = match status {
                JobStatus::Completed => format!("[{}] {:?} done", index + 1, input),
                _ => format!(
                    "[{}] {:?} {} (exit {:?}): {}",
                    index + 1, input, status, exit_code, error.unwrap_or_default()),
            };
            write_line(pbar, line);
            *pbar = None;
        },
        ConversionEvent::JobCancelled { index, input } => {
            write_line(pbar, format!("[{}] {:?} cancelled", index + 1, input));
        },
        ConversionEvent::BatchProgress { completed, total } => {
            debug!("{}/{} jobs processed ({:.0}%)", completed, total,
                progress_fraction(completed as f64, Some(total as f64)) * 100.0);
        },
        ConversionEvent::BatchFinished { .. } => (),
    }
}

fn write_line(pbar: &mut Option<Bar>, line: String) {
    match pbar.as_mut() {
        Some(bar) => {
            if bar.write(line.clone()).is_err() {
                eprintln!("{}", line);
            }
        },
        None => eprintln!("{}", line),
    }
}
