// Pipeline Executor
// Orchestrates workflow execution: expansion, dependency scheduling and job dispatch

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::execution::binding::{MapSecretStore, NeedsContext, SecretStore};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::graph::{ExecutionGraph, JobNode};
use crate::execution::matrix::JobInstance;
use crate::execution::results::{JobResult, JobStatus, JobSummary, PipelineResult};
use crate::execution::runner::{JobContext, JobRunner};
use crate::execution::scheduler::{Decision, DependencyScheduler};
use crate::execution::state::RunState;
use crate::runners::{DefaultStepExecutor, StepExecutor};
use crate::workflow::models::{Job, RunDefaults, Trigger, TriggerEvent, Workflow};

use futures::FutureExt;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;

/// Per-job dispatch limits and cancellation scope
struct NodeControl {
    job: Arc<Job>,
    dependencies: Vec<String>,
    max_parallel: Option<Arc<Semaphore>>,
    fail_fast: bool,
    /// Child of the run token; cancelled by fail-fast
    token: CancellationToken,
}

/// What a finished instance task reports back to the driver
struct Finished {
    job_name: String,
    instance_id: String,
    status: JobStatus,
}

/// Workflow executor
pub struct PipelineExecutor {
    workflow_name: String,
    trigger: Trigger,
    workflow_env: Arc<IndexMap<String, String>>,
    workflow_defaults: Option<RunDefaults>,
    /// Execution graph
    graph: ExecutionGraph,
    config: Arc<EngineConfig>,
    /// Progress event sender
    event_tx: Option<ProgressSender>,
    step_executor: Arc<dyn StepExecutor>,
    secrets: Arc<dyn SecretStore>,
    working_dir: PathBuf,
    event: Option<TriggerEvent>,
}

impl PipelineExecutor {
    /// Create a new executor from a workflow
    pub fn from_workflow(workflow: &Workflow) -> Result<Self, ConfigError> {
        let graph = ExecutionGraph::from_workflow(workflow)?;
        Ok(Self {
            workflow_name: workflow.display_name().to_string(),
            trigger: workflow.on.clone(),
            workflow_env: Arc::new(workflow.env.clone()),
            workflow_defaults: workflow.run_defaults().cloned(),
            graph,
            config: Arc::new(EngineConfig::default()),
            event_tx: None,
            step_executor: Arc::new(DefaultStepExecutor::default()),
            secrets: Arc::new(MapSecretStore::new()),
            working_dir: PathBuf::from("."),
            event: None,
        })
    }

    /// Set engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_step_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.step_executor = executor;
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Directory steps run in; the workspace shared by every job
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Only run when the workflow's `on:` matches this event
    pub fn with_trigger(mut self, event: TriggerEvent) -> Self {
        self.event = Some(event);
        self
    }

    /// Restrict execution to the named jobs and their transitive needs
    pub fn select_jobs(mut self, names: &[String]) -> Result<Self, ConfigError> {
        self.graph = self.graph.select(names)?;
        Ok(self)
    }

    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    /// Execute the workflow until every job is resolved.
    ///
    /// Cancelling `cancel` stops dispatching, signals running instances and
    /// records as Cancelled any instance still running after the grace period.
    pub async fn execute(&self, cancel: CancellationToken) -> PipelineResult {
        let start = Instant::now();

        if let Some(event) = &self.event {
            if !self.trigger.matches(event) {
                tracing::info!(workflow = %self.workflow_name, event = %event.name, "workflow not triggered");
                self.event_tx.send_event(ExecutionEvent::PipelineNotTriggered {
                    workflow_name: self.workflow_name.clone(),
                    event: event.name.clone(),
                });
                return PipelineResult {
                    workflow_name: self.workflow_name.clone(),
                    triggered: false,
                    jobs: Vec::new(),
                    duration: start.elapsed(),
                };
            }
        }

        self.event_tx.send_event(ExecutionEvent::pipeline_started(
            &self.workflow_name,
            self.graph.len(),
            self.graph.instance_count(),
        ));

        let state = RunState::new();
        state.register(self.graph.jobs.iter().flat_map(|node| node.instances.iter()));

        let runner = JobRunner::new(
            self.step_executor.clone(),
            self.secrets.clone(),
            state.clone(),
            self.config.clone(),
            self.working_dir.clone(),
        )
        .with_progress(self.event_tx.clone());

        let global = match self.config.max_parallel_jobs {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        let controls = self.node_controls(&cancel);

        let mut scheduler =
            DependencyScheduler::new(&self.graph).with_progress(self.event_tx.clone());
        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let mut running: HashMap<task::Id, JobInstance> = HashMap::new();
        let mut decisions = scheduler.start();

        loop {
            for decision in decisions.drain(..) {
                match decision {
                    Decision::Dispatch(instance) => {
                        let Some(control) = controls.get(&instance.job_name) else {
                            continue;
                        };
                        let ctx = JobContext {
                            needs: self.needs_context(control, &scheduler, &state),
                            instance,
                            job: control.job.clone(),
                            workflow_env: self.workflow_env.clone(),
                            workflow_defaults: self.workflow_defaults.clone(),
                        };
                        let spawned_for = ctx.instance.clone();
                        let handle = tasks.spawn(run_instance(
                            runner.clone(),
                            state.clone(),
                            ctx,
                            control.token.clone(),
                            control.max_parallel.clone(),
                            global.clone(),
                            self.config.cancel_grace_period(),
                            self.event_tx.clone(),
                        ));
                        running.insert(handle.id(), spawned_for);
                    }
                    Decision::Skip { instance, reason } => {
                        let result = JobResult::skipped(
                            &instance.id,
                            &instance.job_name,
                            instance.matrix.clone(),
                            &reason,
                        );
                        self.publish(&state, result);
                        self.event_tx.send_event(ExecutionEvent::job_skipped(
                            &instance.job_name,
                            &instance.id,
                            reason,
                        ));
                    }
                    Decision::Cancel { instance, reason } => {
                        let result = JobResult::cancelled(
                            &instance.id,
                            &instance.job_name,
                            instance.matrix.clone(),
                            reason,
                        );
                        self.publish(&state, result);
                        self.event_tx.send_event(ExecutionEvent::job_completed(
                            &instance.job_name,
                            &instance.id,
                            JobStatus::Cancelled,
                            std::time::Duration::ZERO,
                        ));
                    }
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next_with_id() => {
                    let finished = match joined {
                        Some(Ok((id, finished))) => {
                            running.remove(&id);
                            finished
                        }
                        Some(Err(e)) => {
                            let Some(instance) = running.remove(&e.id()) else {
                                tracing::error!(error = %e, "untracked job instance task ended abnormally");
                                continue;
                            };
                            tracing::error!(instance = %instance.id, error = %e, "job instance task ended abnormally");
                            self.abandoned(&state, &instance, &e.to_string())
                        }
                        None => break,
                    };
                    if finished.status == JobStatus::Failed {
                        if let Some(control) = controls.get(&finished.job_name) {
                            if control.fail_fast && !control.token.is_cancelled() {
                                tracing::debug!(job = %finished.job_name, "fail-fast: cancelling remaining instances");
                                control.token.cancel();
                            }
                        }
                    }
                    decisions = scheduler.complete(&finished.instance_id, finished.status);
                },
                _ = cancel.cancelled(), if !scheduler.is_cancelled() => {
                    tracing::info!(workflow = %self.workflow_name, "run cancelled");
                    self.event_tx.send_event(ExecutionEvent::warning("Run cancelled, stopping jobs", None));
                    scheduler.cancel_pending();
                }
            }
        }

        let jobs: Vec<JobSummary> = self
            .graph
            .jobs
            .iter()
            .map(|node| {
                let status = match scheduler.resolution(&node.name) {
                    Some(status) => status,
                    None => self.unresolved(&state, node),
                };
                let instances: Vec<JobResult> = state
                    .job_results(&node.name)
                    .iter()
                    .map(|result| result.as_ref().clone())
                    .collect();
                JobSummary {
                    name: node.name.clone(),
                    status,
                    instances,
                }
            })
            .collect();

        let result = PipelineResult {
            workflow_name: self.workflow_name.clone(),
            triggered: true,
            jobs,
            duration: start.elapsed(),
        };

        self.event_tx.send_event(ExecutionEvent::pipeline_completed(
            &self.workflow_name,
            result.success(),
            result.duration,
        ));
        result
    }

    fn node_controls(&self, cancel: &CancellationToken) -> HashMap<String, NodeControl> {
        self.graph
            .jobs
            .iter()
            .map(|node| {
                let strategy = node.job.strategy.as_ref();
                let max_parallel = strategy
                    .and_then(|s| s.max_parallel)
                    .filter(|&n| n > 0)
                    .map(|n| Arc::new(Semaphore::new(n as usize)));
                let control = NodeControl {
                    job: Arc::new(node.job.clone()),
                    dependencies: node.dependencies.clone(),
                    max_parallel,
                    fail_fast: strategy.map_or(true, |s| s.fail_fast),
                    token: cancel.child_token(),
                };
                (node.name.clone(), control)
            })
            .collect()
    }

    /// Results and outputs of the jobs an instance needs
    fn needs_context(
        &self,
        control: &NodeControl,
        scheduler: &DependencyScheduler,
        state: &RunState,
    ) -> IndexMap<String, NeedsContext> {
        control
            .dependencies
            .iter()
            .map(|dep| {
                let context = NeedsContext {
                    result: scheduler.resolution(dep).unwrap_or(JobStatus::Succeeded),
                    outputs: state.job_outputs(dep),
                };
                (dep.clone(), context)
            })
            .collect()
    }

    /// Record a Failed result for an instance whose task died without reporting
    fn abandoned(&self, state: &RunState, instance: &JobInstance, error: &str) -> Finished {
        let result = JobResult::failed(
            &instance.id,
            &instance.job_name,
            instance.matrix.clone(),
            format!("job instance task ended abnormally: {}", error),
        );
        if state.publish(result).is_ok() {
            self.event_tx.send_event(ExecutionEvent::error(
                format!("Job '{}' aborted unexpectedly", instance.id),
                Some(instance.id.clone()),
            ));
        }
        Finished {
            job_name: instance.job_name.clone(),
            status: state
                .status(&instance.id)
                .filter(|published| published.is_terminal())
                .unwrap_or(JobStatus::Failed),
            instance_id: instance.id.clone(),
        }
    }

    /// A job the scheduler never resolved is reported Failed, never Succeeded
    fn unresolved(&self, state: &RunState, node: &JobNode) -> JobStatus {
        tracing::error!(job = %node.name, "job never reached a terminal state");
        for instance in &node.instances {
            if state.result(&instance.id).is_none() {
                self.publish(
                    state,
                    JobResult::failed(
                        &instance.id,
                        &instance.job_name,
                        instance.matrix.clone(),
                        "job never reached a terminal state",
                    ),
                );
            }
        }
        JobStatus::Failed
    }

    fn publish(&self, state: &RunState, result: JobResult) {
        if let Err(e) = state.publish(result) {
            tracing::warn!(error = %e, "result discarded");
        }
    }
}

/// Wait for capacity, run one instance and make sure a terminal result is published
#[allow(clippy::too_many_arguments)]
async fn run_instance(
    runner: JobRunner,
    state: RunState,
    ctx: JobContext,
    token: CancellationToken,
    max_parallel: Option<Arc<Semaphore>>,
    global: Option<Arc<Semaphore>>,
    grace: std::time::Duration,
    event_tx: Option<ProgressSender>,
) -> Finished {
    let instance = ctx.instance.clone();

    let run = async {
        let _job_permit = match acquire(max_parallel, &token).await {
            Ok(permit) => permit,
            Err(()) => return cancel_unstarted(&state, &instance, &event_tx),
        };
        let _global_permit = match acquire(global, &token).await {
            Ok(permit) => permit,
            Err(()) => return cancel_unstarted(&state, &instance, &event_tx),
        };

        let job = runner.run(ctx, token.clone());
        tokio::pin!(job);

        let abandon = async {
            token.cancelled().await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            result = &mut job => result.status,
            _ = abandon => {
                tracing::warn!(instance = %instance.id, "instance did not stop within the grace period");
                let result = JobResult::cancelled(
                    &instance.id,
                    &instance.job_name,
                    instance.matrix.clone(),
                    format!("job did not stop within {:?} of cancellation", grace),
                );
                if state.publish(result).is_ok() {
                    event_tx.send_event(ExecutionEvent::job_completed(
                        &instance.job_name,
                        &instance.id,
                        JobStatus::Cancelled,
                        grace,
                    ));
                }
                JobStatus::Cancelled
            }
        }
    };

    let status = match AssertUnwindSafe(run).catch_unwind().await {
        Ok(status) => status,
        Err(_) => {
            tracing::error!(instance = %instance.id, "job runner panicked");
            let published = state.publish(JobResult::failed(
                &instance.id,
                &instance.job_name,
                instance.matrix.clone(),
                "job runner panicked",
            ));
            if published.is_ok() {
                event_tx.send_event(ExecutionEvent::error(
                    format!("Job '{}' aborted unexpectedly", instance.id),
                    Some(instance.id.clone()),
                ));
            }
            JobStatus::Failed
        }
    };

    Finished {
        job_name: instance.job_name.clone(),
        status: state
            .status(&instance.id)
            .filter(|published| published.is_terminal())
            .unwrap_or(status),
        instance_id: instance.id,
    }
}

async fn acquire(
    semaphore: Option<Arc<Semaphore>>,
    token: &CancellationToken,
) -> Result<Option<OwnedSemaphorePermit>, ()> {
    let Some(semaphore) = semaphore else {
        return Ok(None);
    };
    tokio::select! {
        permit = semaphore.acquire_owned() => permit.map(Some).map_err(|_| ()),
        _ = token.cancelled() => Err(()),
    }
}

fn cancel_unstarted(
    state: &RunState,
    instance: &JobInstance,
    event_tx: &Option<ProgressSender>,
) -> JobStatus {
    let result = JobResult::cancelled(
        &instance.id,
        &instance.job_name,
        instance.matrix.clone(),
        "cancelled before it started",
    );
    if state.publish(result).is_ok() {
        event_tx.send_event(ExecutionEvent::job_completed(
            &instance.job_name,
            &instance.id,
            JobStatus::Cancelled,
            std::time::Duration::ZERO,
        ));
    }
    JobStatus::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigErrorKind;
    use crate::execution::events::progress_channel;
    use crate::execution::results::StepStatus;
    use crate::runners::{StepKind, StepOutcome, StepRequest};
    use crate::workflow::parser::WorkflowParser;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::time::Duration;

    /// In-memory executor: per-instance delays and failures, records the order of events
    #[derive(Default)]
    struct Scripted {
        delays: HashMap<String, Duration>,
        failing: HashSet<String>,
        /// Keep sleeping when cancelled
        stubborn: bool,
        log: Mutex<Vec<String>>,
        requests: Mutex<Vec<StepRequest>>,
        running: Mutex<(usize, usize)>,
    }

    impl Scripted {
        fn delay(mut self, instance: &str, millis: u64) -> Self {
            self.delays
                .insert(instance.to_string(), Duration::from_millis(millis));
            self
        }

        fn fail(mut self, instance: &str) -> Self {
            self.failing.insert(instance.to_string());
            self
        }

        fn position(&self, entry: &str) -> usize {
            self.log
                .lock()
                .iter()
                .position(|e| e == entry)
                .unwrap_or_else(|| panic!("'{}' never happened", entry))
        }

        fn ran(&self, instance: &str) -> bool {
            self.log.lock().iter().any(|e| e == &format!("start {}", instance))
        }
    }

    #[async_trait::async_trait]
    impl StepExecutor for Scripted {
        async fn execute(&self, request: &StepRequest, cancel: &CancellationToken) -> StepOutcome {
            let id = request.instance_id.clone();
            self.log.lock().push(format!("start {}", id));
            self.requests.lock().push(request.clone());
            {
                let mut running = self.running.lock();
                running.0 += 1;
                running.1 = running.1.max(running.0);
            }

            let delay = self.delays.get(&id).copied().unwrap_or_default();
            let cancelled = if self.stubborn {
                tokio::time::sleep(delay).await;
                false
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    _ = cancel.cancelled() => true,
                }
            };

            self.running.lock().0 -= 1;
            self.log.lock().push(format!("end {}", id));

            if cancelled {
                StepOutcome::cancelled()
            } else if self.failing.contains(&id) {
                StepOutcome::failed("scripted failure").with_exit_code(1)
            } else {
                StepOutcome::succeeded(IndexMap::from([("value".to_string(), id)]))
            }
        }
    }

    fn executor(yaml: &str, scripted: Arc<Scripted>) -> PipelineExecutor {
        let workflow = WorkflowParser::parse_and_validate(yaml).unwrap();
        let dir = std::env::temp_dir();
        PipelineExecutor::from_workflow(&workflow)
            .unwrap()
            .with_step_executor(scripted)
            .with_working_dir(dir)
    }

    const COVERAGE: &str = r#"
name: coverage
on: push
jobs:
  test:
    strategy:
      matrix:
        rust: [stable, beta, nightly]
    steps:
      - run: cargo test
  finish:
    needs: test
    fan-in: true
    steps:
      - uses: coverallsapp/github-action@v2
        with:
          parallel-finished: true
"#;

    const CHAIN: &str = r#"
on: push
jobs:
  build:
    steps: [{run: make}]
  deploy:
    needs: build
    steps: [{run: ship}]
"#;

    #[tokio::test]
    async fn test_abandoned_instance_fails_and_skips_dependents() {
        let exec = executor(CHAIN, Arc::new(Scripted::default()));
        let state = RunState::new();
        state.register(exec.graph.jobs.iter().flat_map(|node| node.instances.iter()));
        let mut scheduler = DependencyScheduler::new(&exec.graph);

        let started = scheduler.start();
        assert_eq!(started.len(), 1);
        let instance = started[0].instance().clone();

        let finished = exec.abandoned(&state, &instance, "task was aborted");
        assert_eq!(finished.status, JobStatus::Failed);
        let published = state.result("build").unwrap();
        assert_eq!(published.status, JobStatus::Failed);
        assert!(published
            .error
            .as_deref()
            .unwrap()
            .contains("task was aborted"));

        let decisions = scheduler.complete(&finished.instance_id, finished.status);
        assert!(matches!(
            &decisions[..],
            [Decision::Skip { instance, .. }] if instance.id == "deploy"
        ));
        assert_eq!(scheduler.resolution("build"), Some(JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_unresolved_job_is_never_reported_succeeded() {
        let exec = executor(CHAIN, Arc::new(Scripted::default()));
        let state = RunState::new();
        state.register(exec.graph.jobs.iter().flat_map(|node| node.instances.iter()));

        let deploy = &exec.graph.jobs[1];
        assert_eq!(exec.unresolved(&state, deploy), JobStatus::Failed);
        assert_eq!(state.status("deploy"), Some(JobStatus::Failed));
        assert_eq!(state.status("build"), Some(JobStatus::Pending));
    }

    #[tokio::test]
    async fn test_colliding_instance_ids_are_rejected() {
        let yaml = r#"
on: push
jobs:
  build:
    strategy:
      matrix:
        os: [linux]
    steps: [{run: make}]
  "build (linux)":
    steps: [{run: make}]
  deploy:
    needs: build
    steps: [{run: ship}]
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        let err = PipelineExecutor::from_workflow(&workflow).err().unwrap();
        assert_eq!(err.kind, ConfigErrorKind::InvalidStructure);
    }

    #[tokio::test]
    async fn test_barrier_waits_for_delayed_sibling() {
        let scripted = Arc::new(Scripted::default().delay("test (beta)", 200));
        let result = executor(COVERAGE, scripted.clone())
            .execute(CancellationToken::new())
            .await;

        assert!(result.success());
        assert_eq!(result.job_status("finish"), Some(JobStatus::Succeeded));
        let barrier = scripted.position("start finish");
        for sibling in ["test (stable)", "test (beta)", "test (nightly)"] {
            assert!(scripted.position(&format!("end {}", sibling)) < barrier);
        }
        assert_eq!(result.job("test").unwrap().instances.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_need_skips_dependent() {
        let scripted = Arc::new(Scripted::default().fail("test (nightly)"));
        let mut workflow = WorkflowParser::parse_and_validate(COVERAGE).unwrap();
        if let Some(strategy) = workflow
            .jobs
            .get_mut("test")
            .and_then(|job| job.strategy.as_mut())
        {
            strategy.fail_fast = false;
        }
        let result = PipelineExecutor::from_workflow(&workflow)
            .unwrap()
            .with_step_executor(scripted.clone())
            .with_working_dir(std::env::temp_dir())
            .execute(CancellationToken::new())
            .await;

        assert!(!result.success());
        assert_eq!(result.job_status("test"), Some(JobStatus::Failed));
        assert_eq!(result.job_status("finish"), Some(JobStatus::Skipped));
        assert!(!scripted.ran("finish"));

        let finish = &result.job("finish").unwrap().instances[0];
        assert_eq!(finish.status, JobStatus::Skipped);
        assert!(finish.steps.is_empty());
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_siblings() {
        let scripted = Arc::new(
            Scripted::default()
                .fail("test (stable)")
                .delay("test (beta)", 5_000)
                .delay("test (nightly)", 5_000),
        );
        let started = Instant::now();
        let result = executor(COVERAGE, scripted)
            .execute(CancellationToken::new())
            .await;

        assert!(started.elapsed() < Duration::from_secs(4));
        let test = result.job("test").unwrap();
        assert_eq!(test.status, JobStatus::Failed);
        let statuses: Vec<_> = test.instances.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Failed, JobStatus::Cancelled, JobStatus::Cancelled]
        );
        assert_eq!(result.job_status("finish"), Some(JobStatus::Skipped));
    }

    #[tokio::test]
    async fn test_cycle_dispatches_nothing() {
        let yaml = r#"
on: push
jobs:
  a:
    needs: b
    steps: [{run: echo a}]
  b:
    needs: a
    steps: [{run: echo b}]
"#;
        let err = WorkflowParser::parse_and_validate(yaml).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::CyclicDependency));

        let workflow = WorkflowParser::parse(yaml).unwrap();
        let err = PipelineExecutor::from_workflow(&workflow).err().unwrap();
        assert_eq!(err.kind, ConfigErrorKind::CyclicDependency);
    }

    #[tokio::test]
    async fn test_needs_outputs_reach_dependents() {
        let yaml = r#"
on: push
jobs:
  build:
    outputs:
      artifact: ${{ steps.pack.outputs.value }}
    steps:
      - id: pack
        run: pack
  deploy:
    needs: build
    steps:
      - run: deploy ${{ needs.build.outputs.artifact }} (${{ needs.build.result }})
"#;
        let scripted = Arc::new(Scripted::default());
        let result = executor(yaml, scripted.clone())
            .execute(CancellationToken::new())
            .await;

        assert!(result.success());
        let requests = scripted.requests.lock();
        let deploy = requests.iter().find(|r| r.instance_id == "deploy").unwrap();
        assert_eq!(
            deploy.kind,
            StepKind::Command {
                script: "deploy build (success)".to_string(),
                shell: "sh".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cancellation_marks_jobs_cancelled() {
        let yaml = r#"
on: push
jobs:
  build:
    steps: [{run: build}]
  test:
    needs: build
    steps: [{run: test}]
"#;
        let scripted = Arc::new(Scripted::default().delay("build", 10_000));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = executor(yaml, scripted.clone()).execute(token).await;

        assert!(!result.success());
        assert_eq!(result.job_status("build"), Some(JobStatus::Cancelled));
        assert_eq!(result.job_status("test"), Some(JobStatus::Cancelled));
        assert!(!scripted.ran("test"));
        let build = &result.job("build").unwrap().instances[0];
        assert_eq!(build.steps[0].status, StepStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_unresponsive_job_cancelled_after_grace_period() {
        let yaml = "on: push\njobs:\n  hang:\n    steps: [{run: hang}]\n";
        let scripted = Arc::new(Scripted {
            stubborn: true,
            ..Scripted::default().delay("hang", 10_000)
        });
        let config = EngineConfig {
            cancel_grace_period_secs: 0,
            ..Default::default()
        };
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = executor(yaml, scripted)
            .with_config(config)
            .execute(token)
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        let hang = &result.job("hang").unwrap().instances[0];
        assert_eq!(hang.status, JobStatus::Cancelled);
        assert!(hang.error.as_deref().unwrap().contains("did not stop"));
    }

    #[tokio::test]
    async fn test_max_parallel_jobs() {
        let yaml = r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        shard: [1, 2, 3, 4]
    steps: [{run: test}]
"#;
        let mut scripted = Scripted::default();
        for shard in 1..=4 {
            scripted = scripted.delay(&format!("test ({})", shard), 50);
        }
        let scripted = Arc::new(scripted);
        let config = EngineConfig {
            max_parallel_jobs: 2,
            ..Default::default()
        };
        let result = executor(yaml, scripted.clone())
            .with_config(config)
            .execute(CancellationToken::new())
            .await;

        assert!(result.success());
        assert_eq!(scripted.running.lock().1, 2);
    }

    #[tokio::test]
    async fn test_untriggered_workflow_runs_nothing() {
        let yaml = r#"
on:
  push:
    branches: [main]
jobs:
  build:
    steps: [{run: build}]
"#;
        let scripted = Arc::new(Scripted::default());
        let (tx, mut rx) = progress_channel();
        let result = executor(yaml, scripted.clone())
            .with_progress(tx)
            .with_trigger(TriggerEvent::new("push", Some("refs/heads/feature".to_string())))
            .execute(CancellationToken::new())
            .await;

        assert!(!result.triggered);
        assert!(result.success());
        assert!(result.jobs.is_empty());
        assert!(!scripted.ran("build"));
        assert!(matches!(
            rx.try_recv(),
            Ok(ExecutionEvent::PipelineNotTriggered { .. })
        ));
    }

    #[tokio::test]
    async fn test_selected_jobs_run_with_their_needs() {
        let yaml = r#"
on: push
jobs:
  build:
    steps: [{run: build}]
  lint:
    steps: [{run: lint}]
  test:
    needs: build
    steps: [{run: test}]
"#;
        let scripted = Arc::new(Scripted::default());
        let result = executor(yaml, scripted.clone())
            .select_jobs(&["test".to_string()])
            .unwrap()
            .execute(CancellationToken::new())
            .await;

        let names: Vec<_> = result.jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["build", "test"]);
        assert!(!scripted.ran("lint"));

        let err = executor(yaml, scripted)
            .select_jobs(&["deploy".to_string()])
            .err()
            .unwrap();
        assert_eq!(err.kind, ConfigErrorKind::UnknownJob);
    }

    #[tokio::test]
    async fn test_secrets_absent_from_report() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = r#"
on: push
jobs:
  upload:
    steps:
      - id: push
        run: |
          echo "uploading with $TOKEN"
          echo "used=$TOKEN" >> "$GITHUB_OUTPUT"
        env:
          TOKEN: ${{ secrets.COVERALLS_TOKEN }}
"#;
        let workflow = WorkflowParser::parse_and_validate(yaml).unwrap();
        let result = PipelineExecutor::from_workflow(&workflow)
            .unwrap()
            .with_secrets(Arc::new(MapSecretStore::new().with("COVERALLS_TOKEN", "s3cr3t-value")))
            .with_working_dir(dir.path())
            .execute(CancellationToken::new())
            .await;

        assert!(result.success());
        let report = result.to_json().unwrap();
        assert!(!report.contains("s3cr3t-value"));
        assert!(report.contains("uploading with ***"));
    }
}
