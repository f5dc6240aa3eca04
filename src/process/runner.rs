//! Bounded-lifetime external process execution
//!
//! Every exit path (normal exit, timeout, caller cancellation, wait failure)
//! ends with the child reaped. On unix the child leads its own process group
//! and the whole group is killed before `run` returns, so anything the tool
//! forked goes with it. Dropping the `run` future mid-flight does the same.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{Result, SluiceError};

/// Per-stream capture limit
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 8 * 1024 * 1024;

/// How long to wait for pipes to drain after the child has exited.
/// Bounded by what is left of the process's timeout, down to `MIN_DRAIN`.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Floor for the drain so an exit right at the deadline still yields its output
const MIN_DRAIN: Duration = Duration::from_millis(20);

/// A command as a discrete argument list, never a shell string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    env_remove: Vec<String>,
    timeout: Duration,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            env_remove: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Split a configured command line on whitespace into program + args
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SluiceError::InvalidConfig("command must not be empty".into()))?;
        Ok(Self::new(program).args(parts))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Drop an inherited variable from the child environment
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn get_program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn get_env_remove(&self) -> &[String] {
        &self.env_remove
    }

    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    /// Program and arguments for logs; the environment is left out
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a process that exited on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Why a process did not produce a [`ProcessOutput`]
#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {}ms", timeout.as_millis())]
    Timeout { timeout: Duration, stderr: String },

    #[error("cancelled by caller")]
    Cancelled { stderr: String },

    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),
}

impl RunError {
    /// Whatever stderr was captured before the process was killed
    pub fn partial_stderr(&self) -> &str {
        match self {
            RunError::Timeout { stderr, .. } | RunError::Cancelled { stderr } => stderr,
            RunError::Spawn { .. } | RunError::Wait(_) => "",
        }
    }
}

enum Finish {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Spawns and supervises external commands
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_output_bytes: usize,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Run to completion, timeout, or cancellation; the child is never left running
    #[instrument(skip(self, spec, cancel), fields(program = %spec.program, timeout_ms = spec.timeout.as_millis() as u64))]
    pub async fn run(
        &self,
        spec: &ProcessSpec,
        cancel: &CancellationToken,
    ) -> std::result::Result<ProcessOutput, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled {
                stderr: String::new(),
            });
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        for key in &spec.env_remove {
            command.env_remove(key);
        }
        command.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let mut group = ProcessGroup::new(child.id());
        debug!(pid = child.id(), "Spawned {}", spec.display());

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| spawn_capture(pipe, stdout_buf.clone(), self.max_output_bytes));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| spawn_capture(pipe, stderr_buf.clone(), self.max_output_bytes));

        let finish = tokio::select! {
            status = child.wait() => Finish::Exited(status),
            _ = tokio::time::sleep(spec.timeout) => Finish::TimedOut,
            _ = cancel.cancelled() => Finish::Cancelled,
        };

        match finish {
            Finish::Exited(Ok(status)) => {
                // Stray descendants would otherwise keep the pipes open.
                group.kill();
                let grace = spec
                    .timeout
                    .saturating_sub(started.elapsed())
                    .clamp(MIN_DRAIN, DRAIN_GRACE);
                tokio::join!(drain(stdout_task, grace), drain(stderr_task, grace));
                let output = ProcessOutput {
                    stdout: take_string(&stdout_buf),
                    stderr: take_string(&stderr_buf),
                    exit_code: status.code(),
                    duration: started.elapsed(),
                };
                debug!(
                    exit_code = ?output.exit_code,
                    duration_ms = output.duration.as_millis() as u64,
                    "Process exited"
                );
                Ok(output)
            }
            Finish::Exited(Err(e)) => {
                terminate(&mut child, &mut group).await;
                abort(stdout_task);
                abort(stderr_task);
                Err(RunError::Wait(e))
            }
            Finish::TimedOut => {
                warn!("Process exceeded its {}ms budget, killing", spec.timeout.as_millis());
                terminate(&mut child, &mut group).await;
                abort(stdout_task);
                abort(stderr_task);
                Err(RunError::Timeout {
                    timeout: spec.timeout,
                    stderr: take_string(&stderr_buf),
                })
            }
            Finish::Cancelled => {
                debug!("Cancellation requested, killing process");
                terminate(&mut child, &mut group).await;
                abort(stdout_task);
                abort(stderr_task);
                Err(RunError::Cancelled {
                    stderr: take_string(&stderr_buf),
                })
            }
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_capture<R>(mut pipe: R, buf: Arc<Mutex<Vec<u8>>>, cap: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let mut guard = buf.lock();
                    let room = cap.saturating_sub(guard.len());
                    guard.extend_from_slice(&chunk[..n.min(room)]);
                    // Past the cap we keep reading so the child never blocks on a full pipe.
                }
                Err(e) => {
                    debug!("Output capture stopped: {}", e);
                    break;
                }
            }
        }
    })
}

async fn drain(task: Option<JoinHandle<()>>, grace: Duration) {
    let Some(mut task) = task else {
        return;
    };
    if tokio::time::timeout(grace, &mut task).await.is_err() {
        debug!("Output pipe still open after exit, abandoning capture");
        task.abort();
    }
}

fn abort(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        task.abort();
    }
}

async fn terminate(child: &mut Child, group: &mut ProcessGroup) {
    group.kill();
    // kill() also reaps the child.
    if let Err(e) = child.kill().await {
        debug!("Kill after exit: {}", e);
    }
}

/// The child's process group, SIGKILLed at most once (explicitly or on drop)
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        let Ok(pgid) = libc::pid_t::try_from(pgid) else {
            return;
        };
        // SAFETY: kill(2) only delivers a signal; a negative pid targets the group.
        if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
            debug!(pgid, "Process group already gone: {}", std::io::Error::last_os_error());
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.pgid.take();
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

fn take_string(buf: &Mutex<Vec<u8>>) -> String {
    let bytes = std::mem::take(&mut *buf.lock());
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::test_env::{EnvGuard, ENV_LOCK};
    use crate::process::ScratchDir;
    use tokio_test::{assert_err, assert_ok};

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh").arg("-c").arg(script)
    }

    fn pid_running(pid: &str) -> bool {
        if std::path::Path::new("/proc/self/stat").exists() {
            // A killed process can linger as a zombie until its new parent reaps it.
            return match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Ok(stat) => !stat
                    .rsplit_once(") ")
                    .is_some_and(|(_, rest)| rest.starts_with('Z')),
                Err(_) => false,
            };
        }
        std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// SIGKILL lands asynchronously; give the kernel a moment
    async fn gone(pid: &str) -> bool {
        for _ in 0..50 {
            if !pid_running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    fn read_pid(path: &std::path::Path) -> String {
        std::fs::read_to_string(path).unwrap().trim().to_string()
    }

    #[test]
    fn test_spec_from_command_line() {
        let spec = ProcessSpec::from_command_line("  python3   scripts/transcript.py  ").unwrap();
        assert_eq!(spec.get_program(), "python3");
        assert_eq!(spec.get_args(), ["scripts/transcript.py".to_string()]);
        assert!(ProcessSpec::from_command_line("   ").is_err());
    }

    #[test]
    fn test_spec_keeps_arguments_discrete() {
        let spec = ProcessSpec::new("yt-dlp")
            .arg("https://example.com/watch?v=1; rm -rf /")
            .env("HTTP_PROXY", "http://p:1")
            .env_remove("ALL_PROXY")
            .timeout(Duration::from_millis(10));
        assert_eq!(spec.get_args().len(), 1);
        assert_eq!(spec.get_env(), [("HTTP_PROXY".to_string(), "http://p:1".to_string())]);
        assert_eq!(spec.get_env_remove(), ["ALL_PROXY".to_string()]);
        assert_eq!(spec.get_timeout(), Duration::from_millis(10));
        assert_eq!(
            spec.display(),
            "yt-dlp https://example.com/watch?v=1; rm -rf /"
        );
    }

    #[tokio::test]
    async fn test_captures_stdout_stderr_and_exit_code() {
        let output = assert_ok!(
            ProcessRunner::new()
                .run(
                    &sh("echo out; echo err >&2; exit 3").timeout(Duration::from_secs(5)),
                    &CancellationToken::new(),
                )
                .await
        );
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_env_overlay_and_removal() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(&["SLUICE_RUNNER_TEST_INHERITED"]);
        std::env::set_var("SLUICE_RUNNER_TEST_INHERITED", "leak");

        let output = ProcessRunner::new()
            .run(
                &sh("printf '%s|%s' \"$INJECTED\" \"$SLUICE_RUNNER_TEST_INHERITED\"")
                    .env("INJECTED", "yes")
                    .env_remove("SLUICE_RUNNER_TEST_INHERITED")
                    .timeout(Duration::from_secs(5)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output.stdout, "yes|");
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_timeout_kills_within_deadline() {
        let started = Instant::now();
        let err = ProcessRunner::new()
            .run(
                &ProcessSpec::new("sleep").arg("5").timeout(Duration::from_millis(50)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, RunError::Timeout { .. }));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed <= Duration::from_millis(250), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_no_process_survives_timeout() {
        let scratch = ScratchDir::new("sluice-runner").unwrap();
        let pid_file = scratch.file("pid");
        let script = format!("echo $$ > {}; exec sleep 5", pid_file.display());

        let err = ProcessRunner::new()
            .run(
                &sh(&script).timeout(Duration::from_millis(200)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Timeout { .. }));

        assert!(gone(&read_pid(&pid_file)).await);
    }

    #[tokio::test]
    async fn test_timeout_kills_forked_descendants() {
        let scratch = ScratchDir::new("sluice-runner").unwrap();
        let pid_file = scratch.file("pid");
        let script = format!("sleep 5 & echo $! > {}; wait", pid_file.display());

        let err = ProcessRunner::new()
            .run(
                &sh(&script).timeout(Duration::from_millis(200)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Timeout { .. }));

        assert!(gone(&read_pid(&pid_file)).await);
    }

    #[tokio::test]
    async fn test_cancellation_kills_forked_descendants() {
        let scratch = ScratchDir::new("sluice-runner").unwrap();
        let pid_file = scratch.file("pid");
        let script = format!("sleep 5 & echo $! > {}; wait", pid_file.display());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let err = ProcessRunner::new()
            .run(&sh(&script).timeout(Duration::from_secs(10)), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Cancelled { .. }));

        assert!(gone(&read_pid(&pid_file)).await);
    }

    #[tokio::test]
    async fn test_exit_reaps_descendants_holding_the_pipe() {
        let scratch = ScratchDir::new("sluice-runner").unwrap();
        let pid_file = scratch.file("pid");
        let script = format!("sleep 5 & echo $! > {}; echo done", pid_file.display());

        let started = Instant::now();
        let output = assert_ok!(
            ProcessRunner::new()
                .run(
                    &sh(&script).timeout(Duration::from_secs(5)),
                    &CancellationToken::new(),
                )
                .await
        );

        assert_eq!(output.stdout.trim(), "done");
        assert!(output.success());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(gone(&read_pid(&pid_file)).await);
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = ProcessRunner::new()
            .run(
                &sh("echo starting >&2; exec sleep 5").timeout(Duration::from_secs(10)),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_spawns() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ProcessRunner::new()
            .run(&ProcessSpec::new("sleep").arg("5"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_stderr() {
        let err = ProcessRunner::new()
            .run(
                &sh("echo 'HTTP Error 403' >&2; exec sleep 5").timeout(Duration::from_millis(300)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.partial_stderr().contains("403"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let err = assert_err!(
            ProcessRunner::new()
                .run(
                    &ProcessSpec::new("/definitely/not/a/real/binary"),
                    &CancellationToken::new(),
                )
                .await
        );
        assert!(matches!(err, RunError::Spawn { .. }));
        assert_eq!(err.partial_stderr(), "");
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let output = ProcessRunner::new()
            .with_max_output_bytes(4)
            .run(
                &sh("printf 'abcdefgh'").timeout(Duration::from_secs(5)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output.stdout, "abcd");
    }
}
