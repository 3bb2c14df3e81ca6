pub mod models;
pub mod parser;

pub use models::{
    Defaults, EventConfig, Job, JobNeeds, Matrix, RunDefaults, RunStep, RunsOn, Step, StepAction,
    Strategy, Trigger, TriggerEvent, UsesStep, Workflow,
};
pub use parser::WorkflowParser;
