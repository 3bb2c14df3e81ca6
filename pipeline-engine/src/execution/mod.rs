// Execution Engine Module
// Matrix expansion, dependency scheduling, job execution and run state

pub mod binding;
pub mod events;
pub mod executor;
pub mod graph;
pub mod matrix;
pub mod results;
pub mod runner;
pub mod scheduler;
pub mod state;

// Re-export key types
pub use binding::{MapSecretStore, Masker, ResolutionError, Secret, SecretStore};
pub use events::{progress_channel, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use executor::PipelineExecutor;
pub use graph::{ExecutionGraph, JobNode};
pub use matrix::{JobInstance, MatrixExpander};
pub use results::{JobResult, JobStatus, JobSummary, PipelineResult, StepResult, StepStatus};
pub use runner::{JobContext, JobRunner};
pub use scheduler::{Decision, DependencyScheduler};
pub use state::{RunState, StateError};
