use crate::output;

pub mod run;
pub mod validate;

/// Exit code for a workflow that cannot be run as declared
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Exit code for a run in which a job failed or was cancelled
pub const EXIT_FAILURE: i32 = 1;

/// Report a problem with the workflow or its inputs and exit before anything runs
pub fn config_error(message: &str) -> ! {
    output::error(message);
    std::process::exit(EXIT_CONFIG_ERROR)
}
