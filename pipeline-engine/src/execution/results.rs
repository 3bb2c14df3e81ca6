// Execution Results
// Step, job-instance and pipeline outcomes, serializable for run reports

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

/// Lifecycle of a job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled
        )
    }

    /// Value seen through `needs.<job>.result`
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "success",
            JobStatus::Failed => "failure",
            JobStatus::Skipped => "skipped",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Combine instance statuses of one job: Failed > Cancelled > Skipped > Succeeded.
    /// A job without instances resolves Succeeded.
    pub fn resolve<I: IntoIterator<Item = JobStatus>>(statuses: I) -> JobStatus {
        statuses
            .into_iter()
            .fold(JobStatus::Succeeded, |acc, status| {
                if status.rank() > acc.rank() {
                    status
                } else {
                    acc
                }
            })
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Succeeded => 0,
            JobStatus::Skipped => 1,
            JobStatus::Cancelled => 2,
            JobStatus::Failed => 3,
            // Non-terminal statuses never take part in resolution
            JobStatus::Pending | JobStatus::Running => 0,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: Option<String>,
    pub display_name: String,
    pub status: StepStatus,
    /// Masked combined stdout/stderr
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(serialize_with = "duration_secs")]
    pub duration: Duration,
    pub attempts: u32,
    pub outputs: IndexMap<String, String>,
}

impl StepResult {
    pub fn skipped(step_id: Option<String>, display_name: impl Into<String>) -> Self {
        Self {
            step_id,
            display_name: display_name.into(),
            status: StepStatus::Skipped,
            output: String::new(),
            error: None,
            exit_code: None,
            duration: Duration::ZERO,
            attempts: 0,
            outputs: IndexMap::new(),
        }
    }
}

/// Outcome of one job instance
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub instance_id: String,
    pub job_name: String,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub matrix: IndexMap<String, String>,
    pub status: JobStatus,
    pub steps: Vec<StepResult>,
    #[serde(serialize_with = "duration_secs")]
    pub duration: Duration,
    /// Outputs of every completed step, by step id; kept for diagnostics
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub step_outputs: IndexMap<String, IndexMap<String, String>>,
    /// Declared job outputs; only populated when the instance succeeded
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    fn empty(
        instance_id: impl Into<String>,
        job_name: impl Into<String>,
        matrix: IndexMap<String, String>,
        status: JobStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            job_name: job_name.into(),
            matrix,
            status,
            steps: Vec::new(),
            duration: Duration::ZERO,
            step_outputs: IndexMap::new(),
            outputs: IndexMap::new(),
            error,
        }
    }

    /// A job that never ran because a need did not succeed
    pub fn skipped(
        instance_id: impl Into<String>,
        job_name: impl Into<String>,
        matrix: IndexMap<String, String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::empty(
            instance_id,
            job_name,
            matrix,
            JobStatus::Skipped,
            Some(reason.into()),
        )
    }

    /// A job abandoned after the cancellation grace period
    pub fn cancelled(
        instance_id: impl Into<String>,
        job_name: impl Into<String>,
        matrix: IndexMap<String, String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::empty(
            instance_id,
            job_name,
            matrix,
            JobStatus::Cancelled,
            Some(reason.into()),
        )
    }

    /// A job that could not run at all
    pub fn failed(
        instance_id: impl Into<String>,
        job_name: impl Into<String>,
        matrix: IndexMap<String, String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::empty(
            instance_id,
            job_name,
            matrix,
            JobStatus::Failed,
            Some(reason.into()),
        )
    }
}

/// Resolved status of one workflow job across its instances
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub name: String,
    pub status: JobStatus,
    pub instances: Vec<JobResult>,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub workflow_name: String,
    /// Whether the trigger matched the event
    pub triggered: bool,
    pub jobs: Vec<JobSummary>,
    #[serde(serialize_with = "duration_secs")]
    pub duration: Duration,
}

impl PipelineResult {
    /// False if any job failed or was cancelled
    pub fn success(&self) -> bool {
        self.jobs
            .iter()
            .all(|job| !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled))
    }

    pub fn job_status(&self, name: &str) -> Option<JobStatus> {
        self.jobs.iter().find(|j| j.name == name).map(|j| j.status)
    }

    pub fn job(&self, name: &str) -> Option<&JobSummary> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn duration_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
