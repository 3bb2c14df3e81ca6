// Pipeline Engine Library
// Local execution of GitHub-Actions-style CI workflows

pub mod config;
pub mod error;
pub mod execution;
pub mod runners;
pub mod workflow;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{ConfigError, ConfigErrorKind, EngineError, EngineResult};

// Re-export execution types
pub use execution::{
    progress_channel, ExecutionEvent, ExecutionGraph, JobStatus, MapSecretStore, PipelineExecutor,
    PipelineResult, ProgressReceiver, ProgressSender, SecretStore, StepStatus,
};

// Re-export runner types
pub use runners::{ActionRegistry, DefaultStepExecutor, StepExecutor, StepOutcome, StepRequest};

// Re-export workflow types
pub use workflow::{TriggerEvent, Workflow, WorkflowParser};
