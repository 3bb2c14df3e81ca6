// Runners Module
// Step executors for `run:` scripts and `uses:` actions

pub mod action;
pub mod outputs;
pub mod shell;

// Re-export key types
pub use action::{ActionHandler, ActionRegistry, CheckoutAction, CommandAction};
pub use shell::{Shell, ShellError, ShellOutput, ShellRunner, Termination};

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::execution::binding::Masker;
use crate::execution::results::StepStatus;

use indexmap::IndexMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A fully resolved step handed to an executor
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub instance_id: String,
    pub step_index: usize,
    pub name: String,
    pub kind: StepKind,
    /// Complete environment for the step, engine variables included
    pub env: IndexMap<String, String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
    /// File exported as `GITHUB_OUTPUT`
    pub output_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Command {
        script: String,
        shell: String,
    },
    Action {
        uses: String,
        inputs: IndexMap<String, String>,
    },
}

/// What a step executor reports back
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub outputs: IndexMap<String, String>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    /// Values the step asked to have masked
    pub masks: Vec<String>,
}

impl StepOutcome {
    pub fn succeeded(outputs: IndexMap<String, String>) -> Self {
        Self {
            status: StepStatus::Succeeded,
            outputs,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            error: None,
            masks: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            outputs: IndexMap::new(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            error: Some(error.into()),
            masks: Vec::new(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: StepStatus::Cancelled,
            error: Some("step was cancelled".to_string()),
            ..Self::failed("")
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

/// Executes a single step
#[async_trait::async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, request: &StepRequest, cancel: &CancellationToken) -> StepOutcome;
}

/// Run a step and redact everything it reports.
///
/// Masks requested by the step are added to `masker` first. A step that did
/// not succeed reports no outputs.
pub async fn execute_masked(
    executor: &dyn StepExecutor,
    request: &StepRequest,
    cancel: &CancellationToken,
    masker: &mut Masker,
) -> StepOutcome {
    let mut outcome = executor.execute(request, cancel).await;

    for mask in outcome.masks.drain(..) {
        masker.add(&mask);
    }
    if outcome.status != StepStatus::Succeeded {
        outcome.outputs.clear();
    }

    outcome.stdout = masker.mask(&outcome.stdout);
    outcome.stderr = masker.mask(&outcome.stderr);
    outcome.error = outcome.error.map(|e| masker.mask(&e));
    for value in outcome.outputs.values_mut() {
        *value = masker.mask(value);
    }
    outcome
}

/// Executor used by the CLI: shells for `run:`, the action registry for `uses:`
#[derive(Debug, Clone)]
pub struct DefaultStepExecutor {
    shell: ShellRunner,
    actions: ActionRegistry,
}

impl DefaultStepExecutor {
    pub fn new(actions: ActionRegistry) -> Self {
        Self {
            shell: ShellRunner::new(),
            actions,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(ActionRegistry::from_config(config)?))
    }

    async fn run(
        &self,
        request: &StepRequest,
        cancel: &CancellationToken,
    ) -> Result<ShellOutput, String> {
        match &request.kind {
            StepKind::Command { script, shell } => {
                let shell = Shell::from_str(shell).map_err(|e| e.to_string())?;
                self.shell
                    .run(
                        shell,
                        script,
                        &request.env,
                        &request.working_dir,
                        request.timeout,
                        cancel,
                    )
                    .await
                    .map_err(|e| e.to_string())
            }
            StepKind::Action { uses, inputs } => {
                let handler = self
                    .actions
                    .get(uses)
                    .ok_or_else(|| format!("no handler registered for action '{}'", uses))?;
                handler
                    .run(request, inputs, cancel)
                    .await
                    .map_err(|e| e.to_string())
            }
        }
    }
}

impl Default for DefaultStepExecutor {
    fn default() -> Self {
        Self::new(ActionRegistry::with_builtins())
    }
}

#[async_trait::async_trait]
impl StepExecutor for DefaultStepExecutor {
    async fn execute(&self, request: &StepRequest, cancel: &CancellationToken) -> StepOutcome {
        let output = match self.run(request, cancel).await {
            Ok(output) => output,
            Err(error) => return StepOutcome::failed(error),
        };

        let commands = outputs::parse_stdout_commands(&output.stdout);
        let mut outcome = StepOutcome {
            status: StepStatus::Succeeded,
            outputs: IndexMap::new(),
            stdout: commands.log,
            stderr: output.stderr,
            exit_code: output.exit_code,
            error: None,
            masks: commands.masks,
        };

        match output.termination {
            Termination::Cancelled => {
                outcome.status = StepStatus::Cancelled;
                outcome.error = Some("step was cancelled".to_string());
                return outcome;
            }
            Termination::TimedOut(limit) => {
                outcome.status = StepStatus::Failed;
                outcome.error = Some(format!("step timed out after {:?}", limit));
                return outcome;
            }
            Termination::Exited => {}
        }

        if outcome.exit_code != Some(0) {
            outcome.status = StepStatus::Failed;
            outcome.error = Some(match outcome.exit_code {
                Some(code) => format!("process exited with code {}", code),
                None => "process terminated by signal".to_string(),
            });
            return outcome;
        }

        let mut collected = commands.outputs;
        match outputs::read_output_file(&request.output_file) {
            Ok(file_outputs) => collected.extend(file_outputs),
            Err(e) => {
                outcome.status = StepStatus::Failed;
                outcome.error = Some(e.to_string());
                return outcome;
            }
        }
        outcome.outputs = collected;
        outcome
    }
}
