//! Interruptible subprocess execution.

use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::debug;

use crate::error::{ComposerError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Shared cancellation flag.
///
/// Cloning yields a handle to the same flag. Once cancelled, every subprocess started through
/// [`run_command`] with this token is killed and the call returns [`ComposerError::Interrupted`].
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag, e.g. one owned by a worker pool.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Fail with [`ComposerError::Interrupted`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ComposerError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct Output {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Render a command line for log and error messages.
pub fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            // A read error just truncates the captured output.
            let _ = reader.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Run `program` with `args` in `dir` and capture its output.
///
/// The call blocks until the process exits, polling `token` in between. On cancellation the
/// child is killed and reaped before [`ComposerError::Interrupted`] is returned. A non-zero exit
/// status is not an error here; callers decide what it means.
pub fn run_command(
    program: &str,
    args: &[String],
    dir: &Path,
    env: &[(&str, &str)],
    token: &CancellationToken,
) -> Result<Output> {
    token.check()?;

    let command_line = display_command(program, args);
    debug!("Running `{}` in {}", command_line, dir.display());

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(ComposerError::io(dir))?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if token.is_cancelled() {
            debug!("Killing `{}`", command_line);
            // The child may already have exited on its own.
            let _ = child.kill();
            let _ = child.wait();
            return Err(ComposerError::Interrupted);
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    debug!("`{}` exited with {}", command_line, status);

    Ok(Output { status, stdout, stderr })
}

/// Like [`run_command`], but a non-zero exit status becomes [`ComposerError::Subprocess`].
///
/// The output of the process is logged at debug level.
pub fn run_checked(
    program: &str,
    args: &[String],
    dir: &Path,
    env: &[(&str, &str)],
    token: &CancellationToken,
) -> Result<Output> {
    let output = run_command(program, args, dir, env, token)?;
    for line in output.stdout.lines().chain(output.stderr.lines()) {
        debug!("{}: {}", program, line);
    }
    if !output.success() {
        return Err(ComposerError::Subprocess {
            command: display_command(program, args),
            exit_code: output.status.code(),
        });
    }
    Ok(output)
}
