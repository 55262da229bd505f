//! Supervised execution of external processes.
//!
//! Every subprocess the engine starts goes through [`CommandRunner`]. It:
//! - **Drains** stdout and stderr on their own tasks while awaiting exit, so a chatty
//!   child can never stall on a full pipe buffer
//! - **Bounds** execution time with an internal timeout layered under the caller's
//!   [`CancellationToken`]
//! - **Kills the whole tree** on timeout or cancellation (the child runs in its own
//!   process group on Unix)
//!
//! A timeout is not an error: the returned [`CommandResult`] has no exit code and
//! `timed_out` set. Caller-initiated cancellation is an error ([`MicasaError::Cancelled`])
//! and takes precedence over the timeout when both fire together.

use crate::error::{MicasaError, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one subprocess run.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: String,
    pub arguments: Vec<String>,
    pub duration: Duration,
    /// Captured stdout, `None` when empty or whitespace only
    pub stdout: Option<String>,
    /// Captured stderr, `None` when empty or whitespace only
    pub stderr: Option<String>,
    /// `None` when the process was killed before reporting a status
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CommandResult {
    fn new(command: &str, arguments: Vec<String>) -> Self {
        Self {
            command: command.to_string(),
            arguments,
            duration: Duration::ZERO,
            stdout: None,
            stderr: None,
            exit_code: None,
            timed_out: false,
        }
    }

    /// The command and its arguments joined for display.
    pub fn command_line(&self) -> String {
        if self.arguments.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.arguments.join(" "))
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Convert a failed run into an [`MicasaError::ExternalTool`].
    pub fn into_error(self) -> MicasaError {
        MicasaError::ExternalTool {
            command: self.command_line(),
            exit_code: self.exit_code,
            stderr: self.stderr,
        }
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

enum Finish {
    Completed,
    Failed(std::io::Error),
    TimedOut,
    Cancelled,
}

/// Runs external commands with a bounded execution time.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_COMMAND_TIMEOUT)
    }
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `command` in the current working directory.
    pub async fn run<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
        cancel: &CancellationToken,
    ) -> Result<CommandResult> {
        let work_dir = std::env::current_dir()?;
        self.run_in(command, args, &work_dir, cancel).await
    }

    /// Run `command` in `work_dir`.
    pub async fn run_in<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<CommandResult> {
        let arguments: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        let mut result = CommandResult::new(command, arguments);

        if cancel.is_cancelled() {
            return Err(MicasaError::Cancelled);
        }

        let mut cmd = Command::new(command);
        cmd.args(&result.arguments)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout can take down grandchildren too
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(
            "...running {} in {}...",
            result.command_line(),
            work_dir.display()
        );

        let timer = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut child = cmd.spawn().map_err(|e| {
            std::io::Error::new(e.kind(), format!("Failed to run '{}': {}", command, e))
        })?;
        // Still names the process group after the leader has been reaped
        let group = child.id();

        let mut stdout_task = spawn_reader(child.stdout.take());
        let mut stderr_task = spawn_reader(child.stderr.take());

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Cancelled,
            _ = tokio::time::sleep_until(deadline) => Outcome::TimedOut,
            status = child.wait() => Outcome::Exited(status),
        };

        let finish = match outcome {
            Outcome::Exited(Ok(status)) => {
                // A background grandchild can hold the pipes open after the leader
                // exits, so draining is bounded by the same deadline
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Finish::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => {
                        debug!("...{} exited, output pipes still open", result.command_line());
                        Finish::TimedOut
                    }
                    (stdout, stderr) = async {
                        tokio::join!(collect(&mut stdout_task), collect(&mut stderr_task))
                    } => {
                        result.stdout = stdout;
                        result.stderr = stderr;
                        result.exit_code = status.code();
                        result.duration = timer.elapsed();
                        Finish::Completed
                    }
                }
            }
            Outcome::Exited(Err(e)) => Finish::Failed(e),
            Outcome::TimedOut => Finish::TimedOut,
            Outcome::Cancelled => Finish::Cancelled,
        };

        match finish {
            Finish::Completed => {}
            Finish::Failed(e) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(e.into());
            }
            Finish::TimedOut => {
                warn!(
                    "Command '{}' timed out after {:.1?}, killing process...",
                    result.command_line(),
                    timer.elapsed()
                );
                if kill_tree(&mut child, group).await {
                    info!("Killed command process due to timeout");
                }
                stdout_task.abort();
                stderr_task.abort();
                result.timed_out = true;
                result.duration = timer.elapsed();
            }
            Finish::Cancelled => {
                debug!(
                    "...cancellation requested, stopping {}...",
                    result.command_line()
                );
                kill_tree(&mut child, group).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(MicasaError::Cancelled);
            }
        }

        debug!(
            "...process complete with exit code {:?}, in {:.1?}.",
            result.exit_code, result.duration
        );

        Ok(result)
    }

    /// True iff the run exited with code 0. Otherwise logs the command, exit code and
    /// captured stderr, and returns false.
    pub fn verify_exit_code_zero(&self, result: &CommandResult) -> bool {
        if result.success() {
            return true;
        }

        match result.exit_code {
            Some(code) => error!(
                "'{}' command returned non-zero exit code, {}.",
                result.command_line(),
                code
            ),
            None => error!(
                "'{}' command did not report an exit code.",
                result.command_line()
            ),
        }

        if let Some(stderr) = &result.stderr {
            info!("-> Standard Error:\n{}", stderr);
        }

        false
    }

    /// Like [`verify_exit_code_zero`](Self::verify_exit_code_zero), but turns a failure
    /// into an error.
    pub fn ensure_success(&self, result: CommandResult) -> Result<CommandResult> {
        if self.verify_exit_code_zero(&result) {
            Ok(result)
        } else {
            Err(result.into_error())
        }
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn collect(task: &mut JoinHandle<std::io::Result<Vec<u8>>>) -> Option<String> {
    match task.await {
        Ok(Ok(bytes)) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if text.trim().is_empty() {
                None
            } else {
                Some(text)
            }
        }
        Ok(Err(e)) => {
            warn!("Failed to read process output: {}", e);
            None
        }
        Err(e) => {
            warn!("Output reader task failed: {}", e);
            None
        }
    }
}

/// Kill the child and everything in its process group, then reap it.
///
/// `group` is the leader's pid captured at spawn; the group can outlive a leader that
/// has already been reaped. Returns true if a kill signal was delivered. A child that
/// exited before the kill attempt is not an error.
async fn kill_tree(child: &mut Child, group: Option<u32>) -> bool {
    let mut delivered = false;

    #[cfg(unix)]
    if let Some(pid) = group {
        // SAFETY: killpg only sends a signal; the group was created by process_group(0)
        // and its id cannot be reused while any member is alive.
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc == 0 {
            delivered = true;
        } else {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                debug!("Process already exited before kill attempt");
            } else {
                warn!("Unexpected error while killing process group {}: {}", pid, err);
            }
        }
    }

    if !delivered {
        match child.start_kill() {
            Ok(()) => delivered = true,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                debug!("Process already exited before kill attempt");
            }
            Err(e) => warn!("Unexpected error while attempting to kill process: {}", e),
        }
    }

    if let Err(e) = child.wait().await {
        warn!("Failed to reap killed process: {}", e);
    }

    delivered
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }

        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::DEBUG)
                .with_ansi(false)
                .with_writer(move || writer.clone())
                .finish();
            tracing::subscriber::set_default(subscriber)
        }
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let runner = CommandRunner::default();
        let result = runner
            .run(
                "sh",
                &["-c", "echo hello; echo oops >&2; exit 3"],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.stdout.as_deref(), Some("hello\n"));
        assert_eq!(result.stderr.as_deref(), Some("oops\n"));
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.timed_out);
        assert!(!runner.verify_exit_code_zero(&result));
        assert_eq!(result.command_line(), "sh -c echo hello; echo oops >&2; exit 3");
    }

    #[tokio::test]
    async fn test_blank_output_is_absent() {
        let runner = CommandRunner::default();
        let result = runner
            .run("sh", &["-c", "printf '  \\n'"], &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.stdout.is_none());
        assert!(result.stderr.is_none());
        assert!(runner.verify_exit_code_zero(&result));
    }

    #[tokio::test]
    async fn test_runs_in_work_dir() {
        let dir = TempDir::new().unwrap();
        let runner = CommandRunner::default();
        let result = runner
            .run_in("pwd", &[] as &[&str], dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        let reported = std::path::PathBuf::from(result.stdout.unwrap().trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_large_output_on_both_streams_does_not_deadlock() {
        let runner = CommandRunner::new(Duration::from_secs(30));
        let script = "head -c 300000 /dev/zero | tr '\\000' a; \
                      head -c 300000 /dev/zero | tr '\\000' b >&2";
        let result = runner
            .run("sh", &["-c", script], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout.unwrap().len(), 300_000);
        assert_eq!(result.stderr.unwrap().len(), 300_000);
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reports_no_exit_code() {
        let logs = LogBuffer::default();
        let _guard = logs.install();

        let runner = CommandRunner::new(Duration::from_millis(200));
        let result = runner
            .run("sleep", &["5"], &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
        assert!(result.duration >= Duration::from_millis(200));
        assert!(result.duration < Duration::from_secs(5));
        assert!(!runner.verify_exit_code_zero(&result));
        assert!(logs.contents().contains("timed out"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let script = format!("sleep 20 & echo $! > {}; wait", pid_file.display());

        let runner = CommandRunner::new(Duration::from_millis(500));
        let result = runner
            .run("sh", &["-c", script.as_str()], &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.timed_out);

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Gone entirely, or at worst a zombie waiting for its new parent
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid.trim()));
        if let Ok(stat) = stat {
            let state = stat.rsplit(')').next().unwrap().trim_start().chars().next();
            assert_eq!(state, Some('Z'), "grandchild still running: {stat}");
        }
    }

    #[tokio::test]
    async fn test_timeout_covers_pipes_held_by_background_children() {
        let runner = CommandRunner::new(Duration::from_millis(500));
        let started = Instant::now();
        let result = runner
            .run("sh", &["-c", "sleep 6 & echo started"], &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
        assert!(!runner.verify_exit_code_zero(&result));
    }

    #[tokio::test]
    async fn test_external_cancellation_is_distinct_from_timeout() {
        let logs = LogBuffer::default();
        let _guard = logs.install();

        let runner = CommandRunner::new(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = runner.run("sleep", &["5"], &cancel).await.unwrap_err();

        assert!(matches!(err, MicasaError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!logs.contents().contains("timed out"));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_spawns() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = CommandRunner::default()
            .run("true", &[] as &[&str], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MicasaError::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_command_is_io_error() {
        let err = CommandRunner::default()
            .run(
                "definitely-not-a-real-command-micasa",
                &[] as &[&str],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            MicasaError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[test]
    fn test_ensure_success_maps_to_external_tool_error() {
        let mut result = CommandResult::new("apt-get", vec!["install".into(), "bat".into()]);
        result.exit_code = Some(100);
        result.stderr = Some("E: Unable to locate package bat\n".into());

        let err = CommandRunner::default().ensure_success(result).unwrap_err();
        match &err {
            MicasaError::ExternalTool {
                command, exit_code, ..
            } => {
                assert_eq!(command, "apt-get install bat");
                assert_eq!(*exit_code, Some(100));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("Unable to locate package"));
    }
}
