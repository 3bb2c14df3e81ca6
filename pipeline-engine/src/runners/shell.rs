// Shell Runner
// Executes `run:` scripts with sh, bash, pwsh and python

use crate::execution::binding::SECRET_ENV_PREFIX;

use indexmap::IndexMap;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long to keep draining output after the process was killed
const DRAIN_AFTER_KILL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("unsupported shell '{0}' (expected sh, bash, pwsh or python)")]
    Unsupported(String),

    #[error("shell '{0}' was not found on PATH")]
    NotFound(String),

    #[error("failed to spawn shell process '{shell}': {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for shell process: {0}")]
    Wait(#[from] std::io::Error),
}

/// Shell types supported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    /// POSIX sh, exits on the first failing command
    Sh,
    /// Bash with pipefail
    Bash,
    /// PowerShell Core
    Pwsh,
    /// Python 3
    Python,
}

impl Shell {
    /// Get the shell executable and arguments
    fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Sh => ("sh", &["-e", "-c"]),
            Shell::Bash => ("bash", &["--noprofile", "--norc", "-eo", "pipefail", "-c"]),
            Shell::Pwsh => ("pwsh", &["-NoLogo", "-NoProfile", "-NonInteractive", "-Command"]),
            Shell::Python => ("python3", &["-c"]),
        }
    }

    pub fn program(&self) -> &'static str {
        self.get_command().0
    }

    /// Whether the executable can be found
    pub fn is_available(&self) -> bool {
        which::which(self.program()).is_ok()
    }
}

impl FromStr for Shell {
    type Err = ShellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sh" => Ok(Shell::Sh),
            "bash" => Ok(Shell::Bash),
            "pwsh" | "powershell" => Ok(Shell::Pwsh),
            "python" | "python3" => Ok(Shell::Python),
            other => Err(ShellError::Unsupported(other.to_string())),
        }
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shell::Sh => "sh",
            Shell::Bash => "bash",
            Shell::Pwsh => "pwsh",
            Shell::Python => "python",
        };
        f.write_str(name)
    }
}

/// How the process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited,
    TimedOut(Duration),
    Cancelled,
}

/// Output collected during script execution
#[derive(Debug, Clone)]
pub struct ShellOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code (None when killed or terminated by a signal)
    pub exit_code: Option<i32>,
    pub termination: Termination,
}

impl ShellOutput {
    /// A successful run that produced only the given stdout
    pub fn completed(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            termination: Termination::Exited,
        }
    }

    pub fn success(&self) -> bool {
        self.termination == Termination::Exited && self.exit_code == Some(0)
    }
}

/// Shell runner for executing scripts
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run `script` to completion, timeout or cancellation.
    ///
    /// The child inherits the engine's environment, minus `GANTRY_SECRET_*`
    /// variables, overlaid with `env`. On timeout or cancellation the process
    /// is killed.
    pub async fn run(
        &self,
        shell: Shell,
        script: &str,
        env: &IndexMap<String, String>,
        working_dir: &Path,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ShellOutput, ShellError> {
        let (shell_cmd, shell_args) = shell.get_command();
        if !shell.is_available() {
            return Err(ShellError::NotFound(shell_cmd.to_string()));
        }

        let mut cmd = Command::new(shell_cmd);
        cmd.args(shell_args);
        cmd.arg(script);
        cmd.current_dir(working_dir);
        for (name, _) in std::env::vars_os() {
            if name.to_string_lossy().starts_with(SECRET_ENV_PREFIX) {
                cmd.env_remove(&name);
            }
        }
        cmd.envs(env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(shell = %shell, dir = %working_dir.display(), "spawning step process");

        let mut child = cmd.spawn().map_err(|source| ShellError::Spawn {
            shell: shell_cmd.to_string(),
            source,
        })?;

        // Read output streams concurrently
        let stdout_handle = child.stdout.take().map(collect_lines);
        let stderr_handle = child.stderr.take().map(collect_lines);

        enum Ended {
            Exited(std::io::Result<std::process::ExitStatus>),
            TimedOut(Duration),
            Cancelled,
        }

        let deadline = async {
            match timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending::<Duration>().await,
            }
        };

        let ended = tokio::select! {
            status = child.wait() => Ended::Exited(status),
            _ = cancel.cancelled() => Ended::Cancelled,
            limit = deadline => Ended::TimedOut(limit),
        };

        let (exit_code, termination) = match ended {
            Ended::Exited(status) => (status?.code(), Termination::Exited),
            Ended::TimedOut(limit) => {
                let _ = child.kill().await;
                (None, Termination::TimedOut(limit))
            }
            Ended::Cancelled => {
                let _ = child.kill().await;
                (None, Termination::Cancelled)
            }
        };

        // Grandchildren may keep the pipes open after a kill
        let drain = match termination {
            Termination::Exited => None,
            _ => Some(DRAIN_AFTER_KILL),
        };
        let stdout = join_lines(stdout_handle, drain).await;
        let mut stderr = join_lines(stderr_handle, drain).await;

        match termination {
            Termination::TimedOut(limit) => {
                push_line(&mut stderr, &format!("Process timed out after {:?}", limit))
            }
            Termination::Cancelled => push_line(&mut stderr, "Process was cancelled"),
            Termination::Exited => {}
        }

        Ok(ShellOutput {
            stdout,
            stderr,
            exit_code,
            termination,
        })
    }
}

fn collect_lines<R>(reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut output = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            push_line(&mut output, &line);
        }
        output
    })
}

async fn join_lines(handle: Option<JoinHandle<String>>, limit: Option<Duration>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match limit {
        None => handle.await.unwrap_or_default(),
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => {
                handle.abort();
                String::new()
            }
        },
    }
}

fn push_line(output: &mut String, line: &str) {
    if !output.is_empty() {
        output.push('\n');
    }
    output.push_str(line);
}
