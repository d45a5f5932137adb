//! Object store backed by the `aws` command line tool
//!
//! The payload is piped into `aws s3 cp - s3://bucket/key`, which performs
//! the multipart transfer itself. Temporary credentials go into the child's
//! environment; part concurrency goes into a throwaway AWS config file.

use super::pool::CancelToken;
use super::remote::{ObjectStore, ObjectTarget};
use crate::error::{Result, UploadError};
use crate::io::compression::IO_BUFFER_SIZE;
use log::debug;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const CHILD_POLL: Duration = Duration::from_millis(200);

/// [`ObjectStore`] spawning `aws s3 cp` per object
#[derive(Debug, Clone)]
pub struct AwsCliStore {
    program: PathBuf,
}

impl Default for AwsCliStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsCliStore {
    /// Use `aws` from `PATH`
    pub fn new() -> Self {
        Self::with_program("aws")
    }

    /// Use a specific executable
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, target: &ObjectTarget, config_path: &std::path::Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["s3", "cp", "-"])
            .arg(target.s3_path())
            .args(["--sse", "AES256", "--only-show-errors"])
            .arg("--expected-size")
            .arg(target.expected_size.to_string())
            .env("AWS_ACCESS_KEY_ID", &target.access_key)
            .env("AWS_SECRET_ACCESS_KEY", &target.secret_key)
            .env("AWS_CONFIG_FILE", config_path)
            .env_remove("AWS_SESSION_TOKEN")
            .env_remove("AWS_PROFILE")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }
}

impl ObjectStore for AwsCliStore {
    fn put_object(
        &self,
        target: &ObjectTarget,
        body: &mut dyn Read,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check()?;

        let mut config = tempfile::NamedTempFile::new()?;
        write!(
            config,
            "[default]\ns3 =\n    max_concurrent_requests = {}\n",
            target.concurrency
        )?;
        config.flush()?;

        debug!("Starting {} for {}", self.program.display(), target.s3_path());
        let mut child = self.command(target, config.path()).spawn().map_err(|e| {
            UploadError::Upload(format!("Could not start {}: {}", self.program.display(), e))
        })?;

        let stderr = drain_stderr(&mut child);
        let Some(stdin) = child.stdin.take() else {
            kill(&mut child);
            return Err(UploadError::Upload("Child process has no stdin".into()));
        };

        // the supervisor kills the child on cancellation even while the
        // pump is blocked on a full pipe
        let abort = AtomicBool::new(false);
        let (pumped, status) = thread::scope(|scope| {
            let supervisor = scope.spawn(|| supervise(&mut child, cancel, &abort));
            let pumped = pump(body, stdin, cancel);
            if pumped.is_err() {
                abort.store(true, Ordering::SeqCst);
            }
            let status = supervisor.join().unwrap_or_else(|_| {
                Err(UploadError::Upload("Object store supervisor panicked".into()))
            });
            (pumped, status)
        });

        // on failure the stderr thread is left detached; grandchildren may
        // still hold the pipe open after the kill
        let pumped = pumped?;
        let status = status?;
        let output = stderr.join().unwrap_or_default();

        if !status.success() {
            return Err(UploadError::Upload(format!(
                "aws s3 cp to {} exited with {}: {}",
                target.s3_path(),
                status,
                output.trim()
            )));
        }
        if let Pumped::ChildGone(e) = pumped {
            return Err(UploadError::Upload(format!(
                "Object store process stopped reading: {}",
                e
            )));
        }
        Ok(())
    }
}

/// How feeding the child ended
enum Pumped {
    /// Body fully written and stdin closed
    Done,
    /// The child stopped reading before the body ended
    ChildGone(io::Error),
}

/// Copy `body` into the child until EOF; closes stdin when done
///
/// Body and cancellation errors are `Err`; a failed write means the child
/// went away and is reported as [`Pumped::ChildGone`].
fn pump(body: &mut dyn Read, mut stdin: ChildStdin, cancel: &CancelToken) -> Result<Pumped> {
    let mut buf = vec![0u8; IO_BUFFER_SIZE];
    loop {
        cancel.check()?;
        let n = match body.read(&mut buf) {
            Ok(0) => return Ok(Pumped::Done),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(UploadError::from_io(e)),
        };
        if let Err(e) = stdin.write_all(&buf[..n]) {
            return Ok(Pumped::ChildGone(e));
        }
    }
}

/// Wait for the child, killing it once `cancel` or `abort` fires
fn supervise(child: &mut Child, cancel: &CancelToken, abort: &AtomicBool) -> Result<ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(e) => {
                kill(child);
                return Err(e.into());
            }
        }
        if cancel.is_cancelled() || abort.load(Ordering::SeqCst) {
            kill(child);
            return Err(UploadError::Cancelled);
        }
        thread::sleep(CHILD_POLL);
    }
}

fn kill(child: &mut Child) {
    // the child may already have exited
    let _ = child.kill();
    let _ = child.wait();
}

/// Collect stderr on a helper thread so the child never blocks on it
fn drain_stderr(child: &mut Child) -> JoinHandle<String> {
    let stderr = child.stderr.take();
    thread::spawn(move || {
        let mut text = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut text);
        }
        text
    })
}
