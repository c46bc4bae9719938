//! External process execution

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::deploy::logbook::LogBook;
use crate::errors::BuildError;

/// A fully specified command: program, argument list, working directory
/// and extra environment. Nothing is interpreted by a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            env: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
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

    /// Program and arguments, for logs. The environment is left out since
    /// it carries credentials.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How command output is collected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Wait for exit and return the output. Only stderr reaches the log.
    Buffered,
    /// Forward stdout and stderr lines to the log as they arrive
    Streamed,
}

/// Result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// `Ok(stdout)` on a zero exit code, otherwise `Err(exit_code)`
    pub fn into_result(self) -> Result<String, Option<i32>> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(self.exit_code)
        }
    }
}

/// Runs external commands. Implemented by [`ProcessRunner`]; tests
/// substitute scripted runners.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion. A non-zero exit is not an error here;
    /// only failing to start or wait on the process is.
    async fn run(
        &self,
        spec: &CommandSpec,
        mode: OutputMode,
        log: &LogBook,
    ) -> Result<CommandOutput, BuildError>;
}

/// Runs commands as child processes of the builder
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        mode: OutputMode,
        log: &LogBook,
    ) -> Result<CommandOutput, BuildError> {
        debug!("Running {} in {}", spec.display(), spec.cwd.display());
        let spawn_err =
            |e: std::io::Error| BuildError::SpawnError(format!("{}: {}", spec.program, e));

        match mode {
            OutputMode::Buffered => {
                let output = Self::command(spec).output().await.map_err(spawn_err)?;
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                log.append(&stderr);
                Ok(CommandOutput {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr,
                })
            }
            OutputMode::Streamed => {
                let mut child = Self::command(spec)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(spawn_err)?;

                let stdout = child.stdout.take();
                let stderr = child.stderr.take();

                let (stdout, stderr, status) = tokio::try_join!(
                    forward_lines(stdout, log),
                    forward_lines(stderr, log),
                    child.wait(),
                )?;

                debug!("{} exited with {:?}", spec.program, status.code());
                Ok(CommandOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                })
            }
        }
    }
}

/// Copy each line of `pipe` into the log while also collecting it
async fn forward_lines<R>(pipe: Option<R>, log: &LogBook) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(pipe) = pipe else {
        return Ok(captured);
    };

    let mut segments = BufReader::new(pipe).split(b'\n');
    while let Some(segment) = segments.next_segment().await? {
        let line = String::from_utf8_lossy(&segment);
        let line = line.trim_end_matches('\r');
        log.line(line);
        captured.push_str(line);
        captured.push('\n');
    }

    Ok(captured)
}
