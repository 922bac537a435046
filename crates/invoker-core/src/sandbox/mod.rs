//! Execution sandbox - runs one job's code in an isolated child process.
//!
//! Every execution gets:
//! - a fresh working directory under `work_root`, removed when the run ends
//! - a child process leading its own process group, with a cleared environment
//! - a hard deadline; on expiry the whole group is SIGKILLed and reaped
//!
//! Whatever happens, `execute` returns an `ExecutionResult`. Sandbox-side
//! failures become `INTERNAL_ERROR`, never a Rust error.
//!
//! `start_time` and `duration_ms` cover the child process alone, from spawn
//! until it exits or is killed. Staging before spawn and draining its pipes
//! afterwards do not count against the function.

mod capture;
mod process;
mod unit;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::process::Command;

use crate::domain::{ExecutionResult, ExecutionStatus, JobDescriptor};
use crate::error::SandboxError;
use crate::ports::Clock;

use self::capture::CapturedOutput;
pub use self::unit::{Launch, LoadableUnit, loader_for};

const ARGS_FILE: &str = "args.json";
const INPUT_FILE: &str = "input";
const RESULT_FILE: &str = "result.json";
const ERROR_FILE: &str = "error";

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Parent directory for per-job working directories.
    pub work_root: PathBuf,

    /// Cap on combined stdout/stderr kept in `logs`.
    pub max_log_bytes: usize,

    /// How long to wait for the output pipes to close once the child is gone.
    pub kill_grace: Duration,

    /// `PATH` handed to the child.
    pub path: OsString,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir(),
            max_log_bytes: 1024 * 1024,
            kill_grace: Duration::from_secs(2),
            path: std::env::var_os("PATH")
                .unwrap_or_else(|| OsString::from("/usr/local/bin:/usr/bin:/bin")),
        }
    }
}

pub struct Sandbox {
    config: SandboxConfig,
    clock: Arc<dyn Clock>,
    live: Arc<AtomicUsize>,
}

/// How the child left.
enum Exit {
    Finished(ExitStatus),
    TimedOut,
}

/// Counts an execution as live until dropped.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Sandbox {
    pub fn new(config: SandboxConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Executions currently holding a working directory or a child process.
    pub fn active_executions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Run `descriptor` against `code`, staging `input` as the input file.
    pub async fn execute(
        &self,
        descriptor: &JobDescriptor,
        code: Vec<u8>,
        input: Option<Vec<u8>>,
    ) -> ExecutionResult {
        let _live = LiveGuard::enter(&self.live);
        let start_time = self.clock.now();
        let started = Instant::now();

        match self.run(descriptor, code, input).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(job_id = %descriptor.job_id, error = %err, "sandbox failure");
                ExecutionResult::internal_error(
                    descriptor.job_id.clone(),
                    err.to_string(),
                    start_time,
                    started.elapsed(),
                )
            }
        }
    }

    async fn run(
        &self,
        descriptor: &JobDescriptor,
        code: Vec<u8>,
        input: Option<Vec<u8>>,
    ) -> Result<ExecutionResult, SandboxError> {
        tokio::fs::create_dir_all(&self.config.work_root)
            .await
            .map_err(SandboxError::Workdir)?;
        // removed on drop, on every path out of this function
        let workdir = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(&self.config.work_root)
            .map_err(SandboxError::Workdir)?;
        let dir = workdir.path();

        let launch = loader_for(&descriptor.function_reference.format)
            .materialize(code, dir)
            .await?;
        let mut cmd = self.command(descriptor, &launch, dir, input).await?;

        let start_time = self.clock.now();
        let started = Instant::now();
        let mut child = process::spawn(&mut cmd).await.map_err(SandboxError::Spawn)?;
        let pid = child.id();
        tracing::debug!(job_id = %descriptor.job_id, ?pid, "function started");

        let mut output = tokio::spawn(capture::capture(
            child.stdout.take(),
            child.stderr.take(),
            self.config.max_log_bytes,
        ));

        let timeout = descriptor.timeout();
        let exit = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Exit::Finished(status),
            Ok(Err(err)) => {
                process::kill_group(pid);
                output.abort();
                return Err(SandboxError::Wait(err));
            }
            Err(_) => {
                process::kill_group(pid);
                child.wait().await.map_err(SandboxError::Wait)?;
                Exit::TimedOut
            }
        };
        let elapsed = started.elapsed();
        // stragglers left behind by the function would hold the pipes open
        process::kill_group(pid);

        let captured = match tokio::time::timeout(self.config.kill_grace, &mut output).await {
            Ok(Ok(Ok(captured))) => captured,
            Ok(Ok(Err(err))) => return Err(SandboxError::Capture(err.to_string())),
            Ok(Err(err)) => return Err(SandboxError::Capture(err.to_string())),
            Err(_) => {
                output.abort();
                tracing::warn!(job_id = %descriptor.job_id, "output pipes still open after grace period");
                CapturedOutput::incomplete()
            }
        };

        let result = match exit {
            Exit::TimedOut => ExecutionResult::failure(
                descriptor.job_id.clone(),
                ExecutionStatus::TimeoutExpired,
                format!(
                    "execution exceeded timeout of {}s (killed after {} ms)",
                    descriptor.timeout_seconds,
                    elapsed.as_millis()
                ),
                captured.logs,
                start_time,
                elapsed,
            ),
            Exit::Finished(status) if status.success() => {
                let value = read_return_value(&dir.join(RESULT_FILE)).await?;
                ExecutionResult::success(
                    descriptor.job_id.clone(),
                    value,
                    captured.logs,
                    start_time,
                    elapsed,
                )
            }
            Exit::Finished(status) => match process::terminating_signal(&status) {
                Some(signal) => ExecutionResult::failure(
                    descriptor.job_id.clone(),
                    ExecutionStatus::InternalError,
                    format!("function killed by signal {signal}"),
                    captured.logs,
                    start_time,
                    elapsed,
                ),
                None => {
                    let detail = user_error_detail(&status, &dir.join(ERROR_FILE), &captured).await;
                    ExecutionResult::failure(
                        descriptor.job_id.clone(),
                        ExecutionStatus::UserError,
                        detail,
                        captured.logs,
                        start_time,
                        elapsed,
                    )
                }
            },
        };

        tracing::debug!(
            job_id = %descriptor.job_id,
            status = ?result.status,
            duration_ms = result.duration_ms,
            truncated = captured.truncated,
            "function finished"
        );
        Ok(result)
    }

    /// Stage protocol files and build the child command.
    async fn command(
        &self,
        descriptor: &JobDescriptor,
        launch: &Launch,
        dir: &Path,
        input: Option<Vec<u8>>,
    ) -> Result<Command, SandboxError> {
        let args_json = serde_json::to_string(&descriptor.arguments)
            .map_err(|e| SandboxError::Load(format!("encoding arguments: {e}")))?;
        let args_file = dir.join(ARGS_FILE);
        tokio::fs::write(&args_file, &args_json)
            .await
            .map_err(|e| SandboxError::Load(format!("writing {ARGS_FILE}: {e}")))?;

        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args)
            .args(descriptor.arguments.iter().map(argv))
            .current_dir(dir)
            .env_clear()
            .env("PATH", &self.config.path)
            .env("HOME", dir)
            .envs(&descriptor.extra_env)
            .env("INVOKER_JOB_ID", &descriptor.job_id)
            .env("INVOKER_ARGS", &args_json)
            .env("INVOKER_ARGS_FILE", &args_file)
            .env("INVOKER_RESULT", dir.join(RESULT_FILE))
            .env("INVOKER_ERROR", dir.join(ERROR_FILE))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(input) = input {
            let input_file = dir.join(INPUT_FILE);
            tokio::fs::write(&input_file, input)
                .await
                .map_err(|e| SandboxError::Load(format!("writing input: {e}")))?;
            cmd.env("INVOKER_INPUT", input_file);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(limit_mb) = descriptor.memory_limit_mb {
            process::limit_memory(&mut cmd, limit_mb);
        }
        Ok(cmd)
    }
}

/// Strings go on the command line verbatim, everything else as JSON.
fn argv(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn read_return_value(path: &Path) -> Result<Value, SandboxError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Value::Null),
        Err(e) => return Err(SandboxError::Result(e)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).trim_end().to_string())))
}

async fn user_error_detail(status: &ExitStatus, error_file: &Path, captured: &CapturedOutput) -> String {
    let code = status.code().unwrap_or(-1);
    let reported = tokio::fs::read(error_file)
        .await
        .map(|b| String::from_utf8_lossy(&b).trim().to_string())
        .unwrap_or_default();
    let detail = if reported.is_empty() {
        captured.stderr_tail.as_str()
    } else {
        reported.as_str()
    };
    if detail.is_empty() {
        format!("exit status {code}")
    } else {
        format!("exit status {code}: {detail}")
    }
}
