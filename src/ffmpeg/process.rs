use std::ffi::OsString;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{ConvertError, Result};
use crate::progress::{parse_progress_line, ProgressSample};

const TERMINATE_POLL: Duration = Duration::from_millis(25);

pub type LineCallback = Box<dyn FnMut(&str) + Send>;
pub type ProgressCallback = Box<dyn FnMut(ProgressSample) + Send>;

/// How a terminated encoder actually went away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationKind {
    /// Exited on its own within the grace period after the interrupt.
    Graceful,
    /// Still alive after the grace period and killed.
    Forced,
    AlreadyExited,
}

/// Launches one encoder invocation. Callbacks run on the stderr reader
/// thread, concurrently with whoever holds the [`RunningEncoder`].
pub struct ProcessController {
    encoder: PathBuf,
    on_line: Option<LineCallback>,
    on_progress: Option<ProgressCallback>,
}

impl ProcessController {
    pub fn new(encoder: &Path) -> Self {
        ProcessController {
            encoder: PathBuf::from(encoder),
            on_line: None,
            on_progress: None,
        }
    }

    pub fn on_line<F: FnMut(&str) + Send + 'static>(mut self, callback: F) -> Self {
        self.on_line = Some(Box::new(callback));
        self
    }

    pub fn on_progress<F: FnMut(ProgressSample) + Send + 'static>(mut self, callback: F) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn launch(self, input: &Path, output: &Path, args: &[String]) -> Result<RunningEncoder> {
        let args = build_args(input, output, args);
        log::debug!(
            "{} {}",
            self.encoder.display(),
            args.iter().map(|a| format!("{:?}", a)).collect::<Vec<String>>().join(" "));

        let mut command = Command::new(&self.encoder);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // own process group: a terminal Ctrl-C reaches the host, which decides
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| ConvertError::Launch {
            encoder: self.encoder.clone(),
            input: PathBuf::from(input),
            source,
        })?;

        let (on_line, on_progress) = (self.on_line, self.on_progress);
        let reader = child
            .stderr
            .take()
            .map(|stderr| thread::spawn(move || drain_diagnostics(stderr, on_line, on_progress)));

        Ok(RunningEncoder {
            input: PathBuf::from(input),
            child,
            reader,
        })
    }
}

/// `-y -i <input> <args...> <output>`
pub fn build_args(input: &Path, output: &Path, args: &[String]) -> Vec<OsString> {
    let mut full = vec![OsString::from("-y"), OsString::from("-i"), input.as_os_str().to_os_string()];
    full.extend(args.iter().map(OsString::from));
    full.push(output.as_os_str().to_os_string());
    full
}

pub struct RunningEncoder {
    input: PathBuf,
    child: Child,
    reader: Option<JoinHandle<()>>,
}

impl RunningEncoder {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Blocks until the encoder exits and every diagnostic line has been
    /// delivered.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().map_err(|source| self.wait_error(source))?;
        self.join_reader();
        Ok(status)
    }

    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        match self.child.try_wait().map_err(|source| self.wait_error(source))? {
            Some(status) => {
                self.join_reader();
                Ok(Some(status))
            },
            None => Ok(None),
        }
    }

    /// Interrupts the encoder so it can finalise its output, and kills it if
    /// it is still running once `grace` has passed.
    pub fn terminate(&mut self, grace: Duration) -> Result<(ExitStatus, TerminationKind)> {
        if let Some(status) = self.try_wait()? {
            return Ok((status, TerminationKind::AlreadyExited));
        }

        let interrupted = self.interrupt();
        if interrupted {
            let deadline = Instant::now() + grace;
            loop {
                if let Some(status) = self.try_wait()? {
                    log::debug!("encoder ({}) exited after interrupt", self.id());
                    return Ok((status, TerminationKind::Graceful));
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep(TERMINATE_POLL.min(deadline - now));
            }
        }

        log::warn!("encoder ({}) {}", self.id(), kill_reason(interrupted, grace));
        match self.child.kill() {
            Ok(()) => (),
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => (),
            Err(err) => return Err(self.wait_error(err)),
        }
        let status = self.wait()?;
        Ok((status, TerminationKind::Forced))
    }

    #[cfg(unix)]
    fn interrupt(&self) -> bool {
        // the child is not reaped yet, so its pid still belongs to it
        let pid = self.child.id() as libc::pid_t;
        unsafe { libc::kill(pid, libc::SIGINT) == 0 }
    }

    #[cfg(not(unix))]
    fn interrupt(&self) -> bool {
        false
    }

    fn join_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                log::error!("diagnostic reader for {:?} panicked", self.input);
            }
        }
    }

    fn wait_error(&self, source: io::Error) -> ConvertError {
        ConvertError::Wait {
            input: self.input.clone(),
            source,
        }
    }
}

impl Drop for RunningEncoder {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        self.join_reader();
    }
}

fn kill_reason(interrupted: bool, grace: Duration) -> String {
    match interrupted {
        true => format!("still running {:?} after interrupt; killing it", grace),
        false => String::from("cannot be interrupted; killing it"),
    }
}

fn drain_diagnostics(stderr: ChildStderr, mut on_line: Option<LineCallback>, mut on_progress: Option<ProgressCallback>) {
    let mut reader = BufReader::new(stderr);
    let mut splitter = LineSplitter::new();
    let mut emit = |line: String| {
        if let Some(callback) = on_line.as_mut() {
            callback(&line);
        }
        if let (Some(callback), Some(sample)) = (on_progress.as_mut(), parse_progress_line(&line)) {
            callback(sample);
        }
    };

    loop {
        let consumed = match reader.fill_buf() {
            Ok([]) => break,
            Ok(chunk) => {
                splitter.push(chunk).into_iter().for_each(&mut emit);
                chunk.len()
            },
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                log::warn!("error reading encoder diagnostics: {}", err);
                break;
            },
        };
        reader.consume(consumed);
    }

    if let Some(line) = splitter.finish() {
        emit(line);
    }
}

/// Splits a byte stream into lines on `\n` or `\r`; the encoder redraws its
/// status line with bare carriage returns.
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    fn new() -> Self {
        LineSplitter { pending: vec![] }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = vec![];
        for &b in chunk {
            if b == b'\n' || b == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).to_string());
                    self.pending.clear();
                }
            } else {
                self.pending.push(b);
            }
        }
        lines
    }

    fn finish(self) -> Option<String> {
        match self.pending.is_empty() {
            true => None,
            false => Some(String::from_utf8_lossy(&self.pending).to_string()),
        }
    }
}
