use crate::commands::{config_error, EXIT_FAILURE};
use crate::output;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tokio_util::sync::CancellationToken;

use pipeline_engine::execution::events::LogLevel;
use pipeline_engine::{
    progress_channel, DefaultStepExecutor, EngineConfig, ExecutionEvent, JobStatus,
    MapSecretStore, PipelineExecutor, PipelineResult, StepStatus, TriggerEvent, WorkflowParser,
};

/// Run a workflow locally
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,

    /// Run only this job and the jobs it needs (can be repeated)
    #[arg(long, value_name = "JOB")]
    pub job: Vec<String>,

    /// Provide a secret (can be repeated, format: NAME=VALUE).
    /// `GANTRY_SECRET_<NAME>` environment variables are read as well.
    #[arg(long = "secret", short = 's', value_name = "NAME=VALUE")]
    pub secrets: Vec<String>,

    /// Event matched against the workflow's `on:`
    #[arg(long, default_value = "push")]
    pub event: String,

    /// Branch the event happened on
    #[arg(long = "ref", default_value = "main", value_name = "BRANCH")]
    pub git_ref: String,

    /// Working directory for execution
    #[arg(long, short = 'w', value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Engine configuration file
    #[arg(long, value_name = "FILE", env = "GANTRY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write a JSON report of the run to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Maximum number of job instances running at once (0 = unlimited)
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let workflow_path = &args.workflow;

    if !workflow_path.exists() {
        config_error(&format!("Workflow file not found: {}", workflow_path.display()));
    }

    let mut secrets = MapSecretStore::from_env();
    for pair in &args.secrets {
        match parse_secret(pair) {
            Some((name, value)) => secrets.insert(name, value),
            None => config_error(&format!(
                "Invalid secret format '{}'. Expected NAME=VALUE",
                pair
            )),
        }
    }

    let working_dir = match &args.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    let mut config = match EngineConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => config_error(&format!("Invalid engine configuration: {}", e)),
    };
    if let Some(max_parallel) = args.max_parallel {
        config.max_parallel_jobs = max_parallel;
    }

    output::status("Parsing", &format!("{}", workflow_path.display()));
    let workflow = match WorkflowParser::load(workflow_path) {
        Ok(workflow) => workflow,
        Err(e) => config_error(&e.to_string()),
    };

    let step_executor = match DefaultStepExecutor::from_config(&config) {
        Ok(executor) => executor,
        Err(e) => config_error(&e.to_string()),
    };

    let (tx, mut rx) = progress_channel();

    let executor = PipelineExecutor::from_workflow(&workflow)
        .and_then(|executor| executor.select_jobs(&args.job));
    let executor = match executor {
        Ok(executor) => executor
            .with_config(config)
            .with_progress(tx)
            .with_step_executor(Arc::new(step_executor))
            .with_secrets(Arc::new(secrets))
            .with_working_dir(working_dir)
            .with_trigger(TriggerEvent::new(&args.event, Some(args.git_ref.clone()))),
        Err(e) => config_error(&e.to_string()),
    };

    output::info(&format!(
        "Workflow '{}': {} jobs, {} job instances",
        workflow.display_name(),
        executor.graph().len(),
        executor.graph().instance_count()
    ));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    // Spawn execution in background
    let run_token = cancel.clone();
    let exec_handle = tokio::spawn(async move { executor.execute(run_token).await });

    // Process events in the foreground
    while let Some(event) = rx.recv().await {
        render(&event);
    }

    let result = exec_handle.await?;
    summarize(&result);

    if let Some(path) = &args.report {
        let json = result.to_json().wrap_err("failed to serialize run report")?;
        std::fs::write(path, json)
            .wrap_err_with(|| format!("failed to write report to {}", path.display()))?;
        output::dim(&format!("Report written to {}", path.display()));
    }

    if !result.success() {
        std::process::exit(EXIT_FAILURE);
    }

    Ok(())
}

fn render(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::PipelineStarted {
            workflow_name,
            total_jobs,
            total_instances,
        } => {
            println!();
            output::header(&format!(
                "Workflow '{}' ({} jobs, {} instances)",
                workflow_name, total_jobs, total_instances
            ));
        }

        ExecutionEvent::PipelineCompleted {
            success, duration, ..
        } => {
            println!();
            if *success {
                output::success(&format!(
                    "Workflow completed successfully in {}",
                    output::seconds(*duration)
                ));
            } else {
                output::failure(&format!("Workflow failed after {}", output::seconds(*duration)));
            }
        }

        ExecutionEvent::PipelineNotTriggered {
            workflow_name,
            event,
        } => {
            output::warning(&format!(
                "Workflow '{}' is not triggered by '{}', nothing to run",
                workflow_name, event
            ));
        }

        ExecutionEvent::JobStarted {
            instance_id,
            total_steps,
            ..
        } => {
            output::job_header(instance_id, *total_steps);
        }

        ExecutionEvent::JobCompleted {
            instance_id,
            status,
            duration,
            ..
        } => {
            let line = format!(
                "  Job '{}' {} ({})",
                instance_id,
                status_label(*status),
                output::seconds(*duration)
            );
            if *status == JobStatus::Succeeded {
                output::dim_success(&line);
            } else {
                output::dim_failure(&line);
            }
        }

        ExecutionEvent::JobSkipped {
            instance_id,
            reason,
            ..
        } => {
            output::warning(&format!("Job '{}' skipped: {}", instance_id, reason));
        }

        ExecutionEvent::JobResolved { job_name, status } => {
            tracing::debug!(job = %job_name, %status, "job resolved");
        }

        ExecutionEvent::BarrierReleased {
            job_name,
            upstream_instances,
        } => {
            output::info(&format!(
                "'{}' released after {} upstream instance(s) finished",
                job_name, upstream_instances
            ));
        }

        ExecutionEvent::StepStarted {
            instance_id,
            display_name,
            step_index,
            ..
        } => {
            println!("    [{}] Step {}: {}", instance_id, step_index + 1, display_name);
        }

        ExecutionEvent::StepOutput {
            instance_id,
            output,
            is_error,
            ..
        } => {
            if *is_error {
                output::step_error(instance_id, output);
            } else {
                output::step_output(instance_id, output);
            }
        }

        ExecutionEvent::StepRetry {
            instance_id,
            step_index,
            attempt,
            max_attempts,
        } => {
            output::warning(&format!(
                "[{}] Step {} failed, attempt {}/{}",
                instance_id,
                step_index + 1,
                attempt,
                max_attempts
            ));
        }

        ExecutionEvent::StepCompleted {
            instance_id,
            step_index,
            status,
            duration,
            exit_code,
            error,
        } => {
            let symbol = match status {
                StepStatus::Succeeded => "OK",
                StepStatus::Failed => "FAIL",
                StepStatus::Cancelled => "CANCELLED",
                StepStatus::Skipped => "SKIP",
            };
            let exit_info = match exit_code {
                Some(code) if *code != 0 => format!(" (exit code: {})", code),
                _ => String::new(),
            };
            let line = format!(
                "    [{}] Step {} {} ({}){}",
                instance_id,
                step_index + 1,
                symbol,
                output::seconds(*duration),
                exit_info
            );
            if *status == StepStatus::Succeeded {
                output::dim_success(&line);
            } else {
                output::dim_failure(&line);
                if let Some(error) = error {
                    output::dim_failure(&format!("      {}", error));
                }
            }
        }

        ExecutionEvent::StepSkipped {
            instance_id,
            display_name,
            reason,
            ..
        } => {
            output::dim(&format!(
                "    [{}] {} skipped: {}",
                instance_id, display_name, reason
            ));
        }

        ExecutionEvent::Log { level, message, .. } => match level {
            LogLevel::Error => output::error(message),
            LogLevel::Warning => output::warning(message),
            _ => output::dim(message),
        },
    }
}

/// Split `NAME=VALUE`; the value may itself contain `=`
fn parse_secret(pair: &str) -> Option<(&str, &str)> {
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    (!name.is_empty()).then_some((name, value))
}

fn summarize(result: &PipelineResult) {
    if !result.triggered || result.jobs.is_empty() {
        return;
    }

    println!();
    output::header("Summary");
    for job in &result.jobs {
        let line = format!(
            "  {:<24} {} ({} instance{})",
            job.name,
            status_label(job.status),
            job.instances.len(),
            if job.instances.len() == 1 { "" } else { "s" }
        );
        match job.status {
            JobStatus::Succeeded => output::dim_success(&line),
            JobStatus::Skipped => output::dim(&line),
            _ => output::dim_failure(&line),
        }
    }
}

fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Succeeded => "OK",
        JobStatus::Failed => "FAIL",
        JobStatus::Cancelled => "CANCELLED",
        JobStatus::Skipped => "SKIPPED",
        JobStatus::Pending => "PENDING",
        JobStatus::Running => "RUNNING",
    }
}
