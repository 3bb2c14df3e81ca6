// Job Runner
// Runs the steps of one job instance in order and publishes its result

use crate::config::EngineConfig;
use crate::execution::binding::{resolve, JobEnv, Masker, NeedsContext, ResolvedAction, Scope, SecretStore};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::matrix::JobInstance;
use crate::execution::results::{JobResult, JobStatus, StepResult, StepStatus};
use crate::execution::state::RunState;
use crate::runners::{execute_masked, StepExecutor, StepKind, StepOutcome, StepRequest};
use crate::workflow::models::{shorten_label, Job, RunDefaults, Step};

use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Everything one job instance needs to run
#[derive(Debug, Clone)]
pub struct JobContext {
    pub instance: JobInstance,
    pub job: Arc<Job>,
    pub workflow_env: Arc<IndexMap<String, String>>,
    pub workflow_defaults: Option<RunDefaults>,
    /// Results and outputs of the jobs this one needs
    pub needs: IndexMap<String, NeedsContext>,
}

/// Why the remaining steps of a job are not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Failed,
    Cancelled,
}

/// Executes job instances against a step executor
#[derive(Clone)]
pub struct JobRunner {
    executor: Arc<dyn StepExecutor>,
    secrets: Arc<dyn SecretStore>,
    state: RunState,
    config: Arc<EngineConfig>,
    working_dir: PathBuf,
    event_tx: Option<ProgressSender>,
}

impl JobRunner {
    pub fn new(
        executor: Arc<dyn StepExecutor>,
        secrets: Arc<dyn SecretStore>,
        state: RunState,
        config: Arc<EngineConfig>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            executor,
            secrets,
            state,
            config,
            working_dir,
            event_tx: None,
        }
    }

    pub fn with_progress(mut self, tx: Option<ProgressSender>) -> Self {
        self.event_tx = tx;
        self
    }

    /// Run one job instance to a terminal state and publish it to the run state.
    ///
    /// The returned result is the one that was published, unless another
    /// writer (the cancellation grace timer) got there first.
    pub async fn run(&self, ctx: JobContext, cancel: CancellationToken) -> JobResult {
        let start = Instant::now();
        let instance = &ctx.instance;

        if let Err(e) = self.state.mark_running(&instance.id) {
            tracing::warn!(instance = %instance.id, error = %e, "could not mark instance running");
        }

        self.event_tx.send_event(ExecutionEvent::job_started(
            &instance.job_name,
            &instance.id,
            instance.matrix_label(),
            ctx.job.steps.len(),
        ));

        let mut result = self.execute(&ctx, &cancel).await;
        result.duration = start.elapsed();

        match self.state.publish(result.clone()) {
            Ok(()) => {
                tracing::debug!(instance = %instance.id, status = %result.status, "instance finished");
                self.event_tx.send_event(ExecutionEvent::job_completed(
                    &instance.job_name,
                    &instance.id,
                    result.status,
                    result.duration,
                ));
            }
            Err(e) => {
                tracing::warn!(instance = %instance.id, error = %e, "result discarded");
            }
        }
        result
    }

    async fn execute(&self, ctx: &JobContext, cancel: &CancellationToken) -> JobResult {
        let instance = &ctx.instance;
        let job = &ctx.job;
        let fail = |reason: String| {
            JobResult::failed(&instance.id, &instance.job_name, instance.matrix.clone(), reason)
        };

        if let Err(reason) = self.check_runner_labels(ctx) {
            return fail(reason);
        }

        let mut job_env = match JobEnv::build(
            &ctx.workflow_env,
            &job.env,
            instance.matrix.clone(),
            ctx.needs.clone(),
            self.secrets.as_ref(),
        ) {
            Ok(env) => env,
            Err(e) => return fail(format!("failed to resolve job environment: {}", e)),
        };

        let mut masker = Masker::new();
        for secret in &job_env.secrets {
            masker.add_secret(secret);
        }

        let temp = match tempfile::Builder::new().prefix("gantry-").tempdir() {
            Ok(dir) => dir,
            Err(e) => return fail(format!("failed to create runner temp directory: {}", e)),
        };

        job_env.set_var("CI", "true");
        job_env.set_var("GANTRY_JOB", &instance.job_name);
        job_env.set_var("GANTRY_INSTANCE", &instance.id);
        job_env.set_var("RUNNER_TEMP", temp.path().display().to_string());

        let mut steps = Vec::with_capacity(job.steps.len());
        let mut halted: Option<Halt> = None;

        for (index, step) in job.steps.iter().enumerate() {
            if halted.is_none() && cancel.is_cancelled() {
                halted = Some(Halt::Cancelled);
            }
            if let Some(halt) = halted {
                let reason = match halt {
                    Halt::Failed => "a previous step failed",
                    Halt::Cancelled => "the job was cancelled",
                };
                let name = step.display_name();
                self.event_tx.send_event(ExecutionEvent::step_skipped(
                    &instance.id,
                    index,
                    masker.mask(&name),
                    reason,
                ));
                steps.push(StepResult::skipped(step.id.clone(), masker.mask(&name)));
                continue;
            }

            let step_result = self
                .run_step(ctx, index, step, &mut job_env, &mut masker, temp.path(), cancel)
                .await;

            match step_result.status {
                StepStatus::Succeeded => {
                    if let Some(id) = &step.id {
                        job_env.record_step_outputs(id, step_result.outputs.clone());
                    }
                }
                StepStatus::Failed => halted = Some(Halt::Failed),
                StepStatus::Cancelled => halted = Some(Halt::Cancelled),
                StepStatus::Skipped => {}
            }
            steps.push(step_result);
        }

        let mut error = None;
        let mut outputs = IndexMap::new();
        let status = match halted {
            Some(Halt::Failed) => JobStatus::Failed,
            Some(Halt::Cancelled) => JobStatus::Cancelled,
            None => match self.evaluate_outputs(job, &job_env, &masker) {
                Ok(evaluated) => {
                    outputs = evaluated;
                    JobStatus::Succeeded
                }
                Err(e) => {
                    error = Some(e);
                    JobStatus::Failed
                }
            },
        };

        if let Err(e) = temp.close() {
            tracing::debug!(instance = %instance.id, error = %e, "failed to remove runner temp directory");
        }

        JobResult {
            instance_id: instance.id.clone(),
            job_name: instance.job_name.clone(),
            matrix: instance.matrix.clone(),
            status,
            steps,
            duration: Duration::ZERO,
            step_outputs: job_env.scope.steps.clone(),
            outputs,
            error,
        }
    }

    fn check_runner_labels(&self, ctx: &JobContext) -> Result<(), String> {
        let Some(runs_on) = &ctx.job.runs_on else {
            return Ok(());
        };

        let scope = Scope {
            matrix: ctx.instance.matrix.clone(),
            ..Default::default()
        };
        let mut labels = Vec::new();
        for label in runs_on.labels() {
            let resolved = scope
                .interpolate(label, self.secrets.as_ref())
                .map_err(|e| format!("failed to resolve runs-on: {}", e))?;
            labels.push(resolved.value);
        }

        let requested: Vec<&str> = labels.iter().map(String::as_str).collect();
        if self.config.accepts_labels(&requested) {
            Ok(())
        } else {
            Err(format!(
                "no runner offers labels [{}] (available: [{}])",
                requested.join(", "),
                self.config.runner_labels.join(", ")
            ))
        }
    }

    fn evaluate_outputs(
        &self,
        job: &Job,
        job_env: &JobEnv,
        masker: &Masker,
    ) -> Result<IndexMap<String, String>, String> {
        let mut outputs = IndexMap::new();
        for (name, template) in &job.outputs {
            let resolved = job_env
                .scope
                .interpolate(template, self.secrets.as_ref())
                .map_err(|e| format!("failed to evaluate output '{}': {}", name, e))?;
            outputs.insert(name.clone(), masker.mask(&resolved.value));
        }
        Ok(outputs)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        ctx: &JobContext,
        index: usize,
        step: &Step,
        job_env: &mut JobEnv,
        masker: &mut Masker,
        temp: &Path,
        cancel: &CancellationToken,
    ) -> StepResult {
        let start = Instant::now();
        let instance_id = &ctx.instance.id;

        let resolved = match resolve(step, job_env, self.secrets.as_ref()) {
            Ok(resolved) => resolved,
            Err(e) => {
                let name = masker.mask(&step.display_name());
                let error = masker.mask(&format!("resolution error: {}", e));
                self.event_tx
                    .send_event(ExecutionEvent::step_started(instance_id, step.id.clone(), &name, index));
                return self.finish_step(ctx, index, step, name, StepOutcome::failed(error), 0, start);
            }
        };
        for secret in &resolved.secrets {
            masker.add_secret(secret);
        }
        let name = shorten_label(&masker.mask(&resolved.name));

        let kind = match resolved.action {
            ResolvedAction::Run(script) => StepKind::Command {
                script,
                shell: self.shell_for(ctx, resolved.shell.as_deref()),
            },
            ResolvedAction::Uses { uses, inputs } => StepKind::Action { uses, inputs },
        };
        let working_dir = self.working_dir_for(ctx, resolved.working_directory.as_deref());
        let timeout = step
            .timeout_minutes
            .map(|minutes| Duration::from_secs(u64::from(minutes) * 60));

        self.event_tx
            .send_event(ExecutionEvent::step_started(instance_id, step.id.clone(), &name, index));

        let max_attempts = step.retries.saturating_add(1);
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;

            let output_file = temp.join(format!("output-{}-{}", index, attempt));
            if let Err(e) = fs::write(&output_file, "") {
                break StepOutcome::failed(format!("failed to create output file: {}", e));
            }

            let mut env = resolved.vars.clone();
            env.insert(
                "GITHUB_OUTPUT".to_string(),
                output_file.display().to_string(),
            );

            let request = StepRequest {
                instance_id: instance_id.clone(),
                step_index: index,
                name: name.clone(),
                kind: kind.clone(),
                env,
                working_dir: working_dir.clone(),
                timeout,
                output_file,
            };

            let outcome = execute_masked(self.executor.as_ref(), &request, cancel, masker).await;
            if outcome.status != StepStatus::Failed || attempt >= max_attempts || cancel.is_cancelled() {
                break outcome;
            }

            tracing::debug!(instance = %instance_id, step = index, attempt, "retrying failed step");
            self.event_tx.send_event(ExecutionEvent::StepRetry {
                instance_id: instance_id.clone(),
                step_index: index,
                attempt: attempt + 1,
                max_attempts,
            });
        };

        self.finish_step(ctx, index, step, name, outcome, attempt, start)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_step(
        &self,
        ctx: &JobContext,
        index: usize,
        step: &Step,
        name: String,
        outcome: StepOutcome,
        attempts: u32,
        start: Instant,
    ) -> StepResult {
        let instance_id = &ctx.instance.id;
        let duration = start.elapsed();

        for line in outcome.stdout.lines() {
            self.event_tx
                .send_event(ExecutionEvent::step_output(instance_id, index, line, false));
        }
        for line in outcome.stderr.lines() {
            self.event_tx
                .send_event(ExecutionEvent::step_output(instance_id, index, line, true));
        }

        self.event_tx.send_event(ExecutionEvent::StepCompleted {
            instance_id: instance_id.clone(),
            step_index: index,
            status: outcome.status,
            duration,
            exit_code: outcome.exit_code,
            error: outcome.error.clone(),
        });

        let mut output = outcome.stdout;
        if !outcome.stderr.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&outcome.stderr);
        }

        StepResult {
            step_id: step.id.clone(),
            display_name: name,
            status: outcome.status,
            output,
            error: outcome.error,
            exit_code: outcome.exit_code,
            duration,
            attempts,
            outputs: outcome.outputs,
        }
    }

    /// Step shell, else job defaults, else workflow defaults, else the engine default
    fn shell_for(&self, ctx: &JobContext, step_shell: Option<&str>) -> String {
        step_shell
            .or_else(|| ctx.job.run_defaults().and_then(|d| d.shell.as_deref()))
            .or_else(|| ctx.workflow_defaults.as_ref().and_then(|d| d.shell.as_deref()))
            .unwrap_or(&self.config.default_shell)
            .to_string()
    }

    fn working_dir_for(&self, ctx: &JobContext, step_dir: Option<&str>) -> PathBuf {
        let relative = step_dir
            .or_else(|| {
                ctx.job
                    .run_defaults()
                    .and_then(|d| d.working_directory.as_deref())
            })
            .or_else(|| {
                ctx.workflow_defaults
                    .as_ref()
                    .and_then(|d| d.working_directory.as_deref())
            });
        match relative {
            Some(dir) => self.working_dir.join(dir),
            None => self.working_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::binding::MapSecretStore;
    use crate::execution::events::progress_channel;
    use crate::runners::DefaultStepExecutor;
    use parking_lot::Mutex;

    /// Records every request and answers from a per-step script
    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<StepRequest>>,
        fail_names: Vec<String>,
        flaky: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl StepExecutor for Recorder {
        async fn execute(&self, request: &StepRequest, _cancel: &CancellationToken) -> StepOutcome {
            self.requests.lock().push(request.clone());
            if self.fail_names.contains(&request.name) {
                return StepOutcome::failed("scripted failure").with_exit_code(1);
            }
            if request.name == "flaky" {
                let mut failures = self.flaky.lock();
                if *failures < 2 {
                    *failures += 1;
                    return StepOutcome::failed("flaky");
                }
            }
            let outputs = IndexMap::from([("from".to_string(), request.name.clone())]);
            StepOutcome::succeeded(outputs).with_stdout(format!("ran {}", request.name))
        }
    }

    fn context(yaml: &str) -> JobContext {
        let job: Job = serde_yaml::from_str(yaml).unwrap();
        JobContext {
            instance: JobInstance::single("build"),
            job: Arc::new(job),
            workflow_env: Arc::new(IndexMap::new()),
            workflow_defaults: None,
            needs: IndexMap::new(),
        }
    }

    fn runner(executor: Arc<dyn StepExecutor>, state: &RunState, dir: &Path) -> JobRunner {
        JobRunner::new(
            executor,
            Arc::new(MapSecretStore::new().with("TOKEN", "hunter2")),
            state.clone(),
            Arc::new(EngineConfig::default()),
            dir.to_path_buf(),
        )
    }

    #[tokio::test]
    async fn test_second_step_failure_skips_third() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new();
        let ctx = context(
            r#"
steps:
  - id: one
    name: one
    run: echo one
  - id: two
    name: two
    run: exit 1
  - id: three
    name: three
    run: echo three
"#,
        );
        state.register([&ctx.instance]);

        let recorder = Arc::new(Recorder {
            fail_names: vec!["two".to_string()],
            ..Default::default()
        });
        let result = runner(recorder.clone(), &state, dir.path())
            .run(ctx, CancellationToken::new())
            .await;

        assert_eq!(result.status, JobStatus::Failed);
        let statuses: Vec<_> = result.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Skipped]
        );
        assert_eq!(recorder.requests.lock().len(), 2);

        let published = state.result("build").unwrap();
        assert_eq!(published.status, JobStatus::Failed);
        assert!(published.step_outputs.contains_key("one"));
        assert!(!published.step_outputs.contains_key("three"));
        assert!(published.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_step_outputs_flow_to_later_steps_and_job_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new();
        let ctx = context(
            r#"
outputs:
  origin: ${{ steps.first.outputs.from }}
env:
  TOKEN: ${{ secrets.TOKEN }}
steps:
  - id: first
    name: first
    run: echo first
  - name: second
    run: echo ${{ steps.first.outputs.from }}
"#,
        );
        state.register([&ctx.instance]);

        let recorder = Arc::new(Recorder::default());
        let result = runner(recorder.clone(), &state, dir.path())
            .run(ctx, CancellationToken::new())
            .await;

        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(result.outputs["origin"], "first");

        let requests = recorder.requests.lock();
        assert_eq!(
            requests[1].kind,
            StepKind::Command {
                script: "echo first".to_string(),
                shell: "sh".to_string()
            }
        );
        assert_eq!(requests[1].env["TOKEN"], "hunter2");
        assert_eq!(requests[1].env["CI"], "true");
        assert_eq!(requests[1].env["GANTRY_INSTANCE"], "build");
        assert!(requests[1].env.contains_key("RUNNER_TEMP"));
        assert_ne!(requests[0].output_file, requests[1].output_file);
    }

    #[tokio::test]
    async fn test_retries_are_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new();
        let ctx = context(
            r#"
steps:
  - name: flaky
    run: maybe
    retries: 2
"#,
        );
        state.register([&ctx.instance]);

        let (tx, mut rx) = progress_channel();
        let recorder = Arc::new(Recorder::default());
        let result = runner(recorder.clone(), &state, dir.path())
            .with_progress(Some(tx))
            .run(ctx, CancellationToken::new())
            .await;

        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(result.steps[0].attempts, 3);

        let mut retries = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ExecutionEvent::StepRetry { .. }) {
                retries += 1;
            }
        }
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_no_retry_without_declaration() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new();
        let ctx = context("steps:\n  - name: flaky\n    run: maybe\n");
        state.register([&ctx.instance]);

        let result = runner(Arc::new(Recorder::default()), &state, dir.path())
            .run(ctx, CancellationToken::new())
            .await;
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.steps[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_missing_secret_fails_step() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new();
        let ctx = context(
            r#"
steps:
  - name: upload
    run: upload ${{ secrets.NOT_THERE }}
  - name: after
    run: echo after
"#,
        );
        state.register([&ctx.instance]);

        let recorder = Arc::new(Recorder::default());
        let result = runner(recorder.clone(), &state, dir.path())
            .run(ctx, CancellationToken::new())
            .await;

        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.steps[0]
            .error
            .as_deref()
            .unwrap()
            .contains("secrets.NOT_THERE"));
        assert_eq!(result.steps[1].status, StepStatus::Skipped);
        assert!(recorder.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_runner_labels_checked() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new();
        let mut ctx = context(
            r#"
runs-on: ${{ matrix.os }}
steps:
  - run: echo hi
"#,
        );
        ctx.instance.matrix.insert("os".to_string(), "macos-latest".to_string());
        state.register([&ctx.instance]);

        let config = EngineConfig {
            runner_labels: vec!["ubuntu-latest".to_string()],
            ..Default::default()
        };
        let recorder = Arc::new(Recorder::default());
        let runner = JobRunner::new(
            recorder.clone(),
            Arc::new(MapSecretStore::new()),
            state.clone(),
            Arc::new(config),
            dir.path().to_path_buf(),
        );
        let result = runner.run(ctx, CancellationToken::new()).await;

        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error.unwrap().contains("macos-latest"));
        assert!(recorder.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_all_steps() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new();
        let ctx = context("steps:\n  - run: echo a\n  - run: echo b\n");
        state.register([&ctx.instance]);

        let token = CancellationToken::new();
        token.cancel();
        let recorder = Arc::new(Recorder::default());
        let result = runner(recorder.clone(), &state, dir.path())
            .run(ctx, token)
            .await;

        assert_eq!(result.status, JobStatus::Cancelled);
        assert!(result.steps.iter().all(|s| s.status == StepStatus::Skipped));
        assert_eq!(state.status("build"), Some(JobStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_long_templated_step_resolves_before_shortening() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new();
        let ctx = context(
            r#"
steps:
  - run: echo aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa ${{ secrets.TOKEN }} done
"#,
        );
        state.register([&ctx.instance]);

        let recorder = Arc::new(Recorder::default());
        let result = runner(recorder.clone(), &state, dir.path())
            .run(ctx, CancellationToken::new())
            .await;

        assert_eq!(result.status, JobStatus::Succeeded);
        let shown = &result.steps[0].display_name;
        assert_eq!(shown.chars().count(), 50);
        assert!(shown.ends_with("..."));
        assert!(!shown.contains("hu"));

        let requests = recorder.requests.lock();
        assert_eq!(
            requests[0].kind,
            StepKind::Command {
                script: "echo aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa hunter2 done".to_string(),
                shell: "sh".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_env_sourced_secret_is_hidden_from_steps() {
        std::env::set_var("GANTRY_SECRET_RUNNER_UPLOAD_TOKEN", "tok-abc123-secret");
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new();
        let ctx = context(
            r#"
steps:
  - name: upload
    run: |
      echo "raw=$GANTRY_SECRET_RUNNER_UPLOAD_TOKEN"
      echo "bound=$TOKEN"
    env:
      TOKEN: ${{ secrets.RUNNER_UPLOAD_TOKEN }}
"#,
        );
        state.register([&ctx.instance]);

        let result = JobRunner::new(
            Arc::new(DefaultStepExecutor::default()),
            Arc::new(MapSecretStore::from_env()),
            state.clone(),
            Arc::new(EngineConfig::default()),
            dir.path().to_path_buf(),
        )
        .run(ctx, CancellationToken::new())
        .await;

        assert_eq!(result.status, JobStatus::Succeeded);
        let report = serde_json::to_string(&result).unwrap();
        assert!(!report.contains("tok-abc123-secret"));
        assert!(report.contains("bound=***"));
    }

    #[tokio::test]
    async fn test_secrets_never_reach_logs_or_events() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new();
        let ctx = context(
            r#"
steps:
  - id: leak
    name: Leak ${{ secrets.TOKEN }}
    run: |
      echo "the token is $TOKEN"
      echo "echoed=$TOKEN" >> "$GITHUB_OUTPUT"
      echo "$TOKEN" >&2
    env:
      TOKEN: ${{ secrets.TOKEN }}
"#,
        );
        state.register([&ctx.instance]);

        let (tx, mut rx) = progress_channel();
        let result = runner(Arc::new(DefaultStepExecutor::default()), &state, dir.path())
            .with_progress(Some(tx))
            .run(ctx, CancellationToken::new())
            .await;

        assert_eq!(result.status, JobStatus::Succeeded);
        let report = serde_json::to_string(&result).unwrap();
        assert!(!report.contains("hunter2"));
        assert!(report.contains("the token is ***"));
        assert_eq!(result.steps[0].outputs["echoed"], "***");
        assert_eq!(result.steps[0].display_name, "Leak ***");

        while let Ok(event) = rx.try_recv() {
            assert!(!format!("{:?}", event).contains("hunter2"));
        }
    }
}
