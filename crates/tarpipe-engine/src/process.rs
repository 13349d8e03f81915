//! Subprocess pipeline management and outcome checking.
//!
//! A [`RunningPipeline`] owns every child of one [`CommandSpec`]. Stages are
//! chained with direct OS pipes. Each stage's stderr is drained by its own task
//! from the moment it is spawned, so a child that writes a lot of diagnostics
//! never blocks on a full stderr pipe while the engine is busy with the data
//! stream. The collected stderr is only looked at once the data stream is done.

use crate::command::CommandSpec;
use crate::error::{EngineError, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// How the first stage's stdin is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinMode {
    /// The engine writes into the pipeline
    Piped,
    /// The pipeline reads nothing
    Null,
}

struct StageProcess {
    program: String,
    child: Child,
    stderr: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
}

/// A launched command pipeline.
pub struct RunningPipeline {
    stages: Vec<StageProcess>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stdout_logger: Option<JoinHandle<()>>,
}

impl RunningPipeline {
    /// Launch every stage of `spec`, wiring stdout of each stage to stdin of
    /// the next. The last stage's stdout and every stage's stderr are piped.
    ///
    /// Must be called from within a Tokio runtime. If a later stage fails to
    /// launch, the stages already running are killed.
    pub fn spawn(spec: &CommandSpec, stdin: StdinMode) -> Result<Self> {
        let mut stages: Vec<StageProcess> = Vec::with_capacity(spec.stages().len());
        let mut first_stdin = None;
        let mut upstream: Option<ChildStdout> = None;

        for (index, stage) in spec.stages().iter().enumerate() {
            let mut cmd = Command::new(stage.program());
            cmd.args(stage.arguments());

            match upstream.take() {
                Some(previous) => {
                    let piped: Stdio = previous.try_into().map_err(|e| {
                        EngineError::spawn(stage.program(), e)
                    })?;
                    cmd.stdin(piped);
                }
                None if stdin == StdinMode::Piped => {
                    cmd.stdin(Stdio::piped());
                }
                None => {
                    cmd.stdin(Stdio::null());
                }
            }

            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            cmd.kill_on_drop(true);

            let mut child = cmd
                .spawn()
                .map_err(|e| EngineError::spawn(stage.program(), e))?;
            debug!("Spawned stage {}: {} (pid {:?})", index, stage.program(), child.id());

            if index == 0 {
                first_stdin = child.stdin.take();
            }
            upstream = child.stdout.take();
            let stderr = child.stderr.take().map(collect_stream);

            stages.push(StageProcess {
                program: stage.program().to_string(),
                child,
                stderr,
            });
        }

        Ok(Self {
            stages,
            stdin: first_stdin,
            stdout: upstream,
            stdout_logger: None,
        })
    }

    /// Stdin of the first stage, if it was piped and is still open
    pub fn stdin_mut(&mut self) -> Option<&mut ChildStdin> {
        self.stdin.as_mut()
    }

    /// Close the first stage's stdin so it sees end of input
    pub fn close_stdin(&mut self) {
        drop(self.stdin.take());
    }

    /// Stdout of the last stage, unless it has been handed to a logger
    pub fn stdout_mut(&mut self) -> Option<&mut ChildStdout> {
        self.stdout.as_mut()
    }

    /// Drain the last stage's stdout into debug logs on a background task.
    pub fn log_stdout(&mut self, label: &str) {
        if let Some(stdout) = self.stdout.take() {
            let label = label.to_string();
            self.stdout_logger = Some(tokio::spawn(async move {
                log_lines(stdout, &label).await;
            }));
        }
    }

    /// Programs of all stages, in pipeline order
    pub fn programs(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.program.as_str()).collect()
    }

    /// Kill every stage and reap it.
    pub async fn kill(mut self) {
        self.close_stdin();
        drop(self.stdout.take());
        for stage in &mut self.stages {
            if let Err(e) = stage.child.kill().await {
                warn!("Failed to kill {}: {}", stage.program, e);
            }
        }
    }
}

/// Log `reader` line by line at debug until end of input or a read error.
/// Returns the number of complete lines logged.
async fn log_lines<R>(reader: R, label: &str) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut logged = 0;
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                debug!("{}: {}", label, String::from_utf8_lossy(&line).trim_end());
                logged += 1;
            }
            Err(e) => {
                warn!("{}: reading stdout failed: {}", label, e);
                break;
            }
        }
    }
    logged
}

fn collect_stream<R>(mut reader: R) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    })
}

/// Exit status a shell reports for a child killed by SIGPIPE (128 + 13)
const SHELL_SIGPIPE_STATUS: i32 = 141;

/// Final state of one pipeline stage.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub program: String,
    /// Exit code, `None` if the stage was terminated by a signal
    pub code: Option<i32>,
    /// Terminating signal, if any
    pub signal: Option<i32>,
    pub stderr: Vec<u8>,
}

impl StageOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The stage died by a signal or with the shell's SIGPIPE status.
    ///
    /// An upstream stage ends this way when the stage it writes into exits
    /// first, so such a failure is usually a symptom of a later one.
    pub fn interrupted(&self) -> bool {
        self.code.is_none() || self.signal.is_some() || self.code == Some(SHELL_SIGPIPE_STATUS)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim_end().to_string()
    }
}

/// Final state of a whole pipeline, stages in data-flow order.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub stages: Vec<StageOutcome>,
}

impl ProcessOutcome {
    /// Log stderr and exit codes, then turn them into a result.
    ///
    /// Stderr is advisory and only logged. Exit codes decide: the first stage
    /// in data-flow order that did not exit with 0 is reported, unless it was
    /// [interrupted](StageOutcome::interrupted) and a later stage failed with a
    /// real exit code. That later stage closed the pipe and is reported instead.
    pub fn check(&self, operation: &str) -> Result<()> {
        for stage in &self.stages {
            if !stage.stderr.is_empty() {
                error!(
                    "{} error ({}): {}",
                    operation,
                    stage.program,
                    stage.stderr_lossy()
                );
            }
            if !stage.success() {
                error!(
                    "{} return code of {} is not 0: {:?}",
                    operation, stage.program, stage.code
                );
            }
        }

        match self.culprit() {
            Some(failed) => Err(EngineError::process(
                operation,
                failed.program.clone(),
                failed.code,
            )),
            None => Ok(()),
        }
    }

    /// The stage a failure is attributed to, `None` if every stage succeeded.
    pub fn culprit(&self) -> Option<&StageOutcome> {
        let first = self.stages.iter().position(|s| !s.success())?;
        let failed = &self.stages[first];
        if !failed.interrupted() {
            return Some(failed);
        }
        self.stages[first + 1..]
            .iter()
            .find(|s| !s.success() && !s.interrupted())
            .or(Some(failed))
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Wait for every stage to exit and gather exit codes and stderr.
///
/// Closes stdin and releases the data stdout first; callers are expected to
/// have drained the data stream already.
pub async fn collect_outcome(mut pipeline: RunningPipeline) -> Result<ProcessOutcome> {
    pipeline.close_stdin();
    drop(pipeline.stdout.take());

    let mut stages = Vec::with_capacity(pipeline.stages.len());
    for mut stage in pipeline.stages.drain(..) {
        let status = stage.child.wait().await?;
        let stderr = match stage.stderr.take() {
            Some(handle) => handle.await.map_err(std::io::Error::other)??,
            None => Vec::new(),
        };
        stages.push(StageOutcome {
            program: stage.program,
            code: status.code(),
            signal: exit_signal(&status),
            stderr,
        });
    }

    if let Some(logger) = pipeline.stdout_logger.take() {
        if let Err(e) = logger.await {
            warn!("stdout logger task failed: {}", e);
        }
    }

    Ok(ProcessOutcome { stages })
}

/// Process Outcome Checker: drain stderr, wait for exit, log, and fail on a
/// non-zero exit code of any stage.
pub async fn check_process_output(pipeline: RunningPipeline, operation: &str) -> Result<()> {
    collect_outcome(pipeline).await?.check(operation)
}
