// Execution Events
// Progress reporting and event types for workflow execution

use crate::execution::results::{JobStatus, StepStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during workflow execution.
///
/// All text carried by events has already been masked.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Workflow execution started
    PipelineStarted {
        workflow_name: String,
        total_jobs: usize,
        total_instances: usize,
    },

    /// Workflow execution completed
    PipelineCompleted {
        workflow_name: String,
        success: bool,
        duration: Duration,
    },

    /// The trigger did not match the event, nothing ran
    PipelineNotTriggered {
        workflow_name: String,
        event: String,
    },

    /// Job instance execution started
    JobStarted {
        job_name: String,
        instance_id: String,
        matrix_instance: Option<String>,
        total_steps: usize,
    },

    /// Job instance execution completed
    JobCompleted {
        job_name: String,
        instance_id: String,
        status: JobStatus,
        duration: Duration,
    },

    /// Job instance was skipped because a need did not succeed
    JobSkipped {
        job_name: String,
        instance_id: String,
        reason: String,
    },

    /// Every instance of a job reached a terminal state
    JobResolved { job_name: String, status: JobStatus },

    /// A fan-in job was released after all upstream instances finished
    BarrierReleased {
        job_name: String,
        upstream_instances: usize,
    },

    /// Step execution started
    StepStarted {
        instance_id: String,
        step_id: Option<String>,
        display_name: String,
        step_index: usize,
    },

    /// Step output (stdout/stderr)
    StepOutput {
        instance_id: String,
        step_index: usize,
        output: String,
        is_error: bool,
    },

    /// A failed step is being attempted again
    StepRetry {
        instance_id: String,
        step_index: usize,
        attempt: u32,
        max_attempts: u32,
    },

    /// Step execution completed
    StepCompleted {
        instance_id: String,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
        error: Option<String>,
    },

    /// Step was not run because an earlier step failed or the job was cancelled
    StepSkipped {
        instance_id: String,
        step_index: usize,
        display_name: String,
        reason: String,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        instance_id: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    /// Create a pipeline started event
    pub fn pipeline_started(
        name: impl Into<String>,
        total_jobs: usize,
        total_instances: usize,
    ) -> Self {
        Self::PipelineStarted {
            workflow_name: name.into(),
            total_jobs,
            total_instances,
        }
    }

    /// Create a pipeline completed event
    pub fn pipeline_completed(name: impl Into<String>, success: bool, duration: Duration) -> Self {
        Self::PipelineCompleted {
            workflow_name: name.into(),
            success,
            duration,
        }
    }

    pub fn job_started(
        job_name: impl Into<String>,
        instance_id: impl Into<String>,
        matrix_instance: Option<String>,
        total_steps: usize,
    ) -> Self {
        Self::JobStarted {
            job_name: job_name.into(),
            instance_id: instance_id.into(),
            matrix_instance,
            total_steps,
        }
    }

    pub fn job_completed(
        job_name: impl Into<String>,
        instance_id: impl Into<String>,
        status: JobStatus,
        duration: Duration,
    ) -> Self {
        Self::JobCompleted {
            job_name: job_name.into(),
            instance_id: instance_id.into(),
            status,
            duration,
        }
    }

    pub fn job_skipped(
        job_name: impl Into<String>,
        instance_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::JobSkipped {
            job_name: job_name.into(),
            instance_id: instance_id.into(),
            reason: reason.into(),
        }
    }

    pub fn step_started(
        instance_id: impl Into<String>,
        step_id: Option<String>,
        display_name: impl Into<String>,
        step_index: usize,
    ) -> Self {
        Self::StepStarted {
            instance_id: instance_id.into(),
            step_id,
            display_name: display_name.into(),
            step_index,
        }
    }

    pub fn step_output(
        instance_id: impl Into<String>,
        step_index: usize,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::StepOutput {
            instance_id: instance_id.into(),
            step_index,
            output: output.into(),
            is_error,
        }
    }

    pub fn step_skipped(
        instance_id: impl Into<String>,
        step_index: usize,
        display_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::StepSkipped {
            instance_id: instance_id.into(),
            step_index,
            display_name: display_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>, instance_id: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            instance_id,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, instance_id: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            instance_id,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, instance_id: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            instance_id,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
