//! Shared subprocess management utilities.
//!
//! Provides [`run_command`], the single spawn path used by the probe,
//! the installers, the dependency manager and the supervisor client. Each
//! caller describes the invocation as a [`CommandSpec`]; spawning, stdin
//! piping, output capture and timeout handling happen here.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Default timeout for short informational commands (`--version`, `jlist`).
pub const QUICK_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully described external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program to execute; either a bare name or an absolute path.
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Additional environment variables set for the child process.
    pub env_vars: Vec<(String, String)>,
    /// Working directory for the child process (inherits if `None`).
    pub working_directory: Option<PathBuf>,
    /// Bytes written to the child's stdin before it is closed.
    pub stdin: Option<Vec<u8>>,
    /// Maximum wall-clock time before the process is killed.
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_vars: Vec::new(),
            working_directory: None,
            stdin: None,
            timeout: QUICK_TIMEOUT,
        }
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
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human-readable rendering used in logs and error messages.
    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

/// Captured output from a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined, trimmed; pm2 and the installers split
    /// diagnostics between the two streams unpredictably.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.trim().to_string();
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr);
        }
        text
    }
}

/// Errors that prevent a command from producing an exit status.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Program not found: {0}")]
    NotFound(String),

    #[error("Command `{command}` timed out after {elapsed_ms}ms")]
    Timeout { command: String, elapsed_ms: u64 },

    #[error("I/O error running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Spawn the command, pipe `stdin` if given, capture stdout/stderr, and
/// enforce the configured timeout.
///
/// A non-zero exit status is not an error at this level; callers decide
/// what a failing exit code means for them.
pub async fn run_command(spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
    let rendered = spec.display();
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &spec.env_vars {
        cmd.env(key, value);
    }

    if let Some(dir) = &spec.working_directory {
        cmd.current_dir(dir);
    }

    let start = Instant::now();

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CommandError::NotFound(spec.program.display().to_string()),
        _ => CommandError::Io {
            command: rendered.clone(),
            source: e,
        },
    })?;

    if let (Some(mut stdin), Some(bytes)) = (child.stdin.take(), spec.stdin.as_ref()) {
        // The child may exit before reading everything; that surfaces
        // through its exit status instead.
        let _ = stdin.write_all(bytes).await;
        drop(stdin);
    }

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    // On timeout `child` is dropped and killed via `kill_on_drop`.
    let wait_result = tokio::time::timeout(spec.timeout, child.wait()).await;

    match wait_result {
        Ok(Ok(status)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();

            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                exit_code: status.code().unwrap_or(-1),
                duration_ms,
            })
        }
        Ok(Err(e)) => Err(CommandError::Io {
            command: rendered,
            source: e,
        }),
        Err(_elapsed) => Err(CommandError::Timeout {
            command: rendered,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let spec = CommandSpec::new("sh").args(["-c", "echo hello; exit 3"]);
        let output = run_command(&spec).await.expect("run");
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn pipes_stdin_to_child() {
        let spec = CommandSpec::new("sh").stdin(b"echo from-stdin\n".to_vec());
        let output = run_command(&spec).await.expect("run");
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "from-stdin");
    }

    #[tokio::test]
    async fn applies_env_and_working_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo $DEPLOY_MARKER; pwd"])
            .env("DEPLOY_MARKER", "marker-value")
            .current_dir(dir.path());
        let output = run_command(&spec).await.expect("run");
        assert!(output.stdout.contains("marker-value"));
        let expected = dir.path().canonicalize().expect("canonicalize");
        assert!(output
            .stdout
            .contains(expected.file_name().unwrap().to_str().unwrap()));
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let spec = CommandSpec::new("/nonexistent/cytodeploy-binary");
        let result = run_command(&spec).await;
        assert_matches!(result, Err(CommandError::NotFound(_)));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "sleep 30"])
            .timeout(Duration::from_millis(200));
        let result = run_command(&spec).await;
        assert_matches!(result, Err(CommandError::Timeout { .. }));
    }

    #[test]
    fn combined_joins_both_streams() {
        let output = CommandOutput {
            stdout: "out\n".into(),
            stderr: " err ".into(),
            exit_code: 1,
            duration_ms: 0,
        };
        assert_eq!(output.combined(), "out\nerr");
    }
}
