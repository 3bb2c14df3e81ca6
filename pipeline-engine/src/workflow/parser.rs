use crate::error::{ConfigError, EngineResult};
use crate::execution::binding::{references, Reference};
use crate::execution::graph::ExecutionGraph;
use crate::execution::matrix::MatrixExpander;
use crate::workflow::models::{Job, Workflow};

use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Parser for workflow YAML files.
pub struct WorkflowParser;

/// Namespaces a templated field may reference; `None` means not available there
#[derive(Default)]
struct Visible<'a> {
    matrix: Option<&'a [String]>,
    steps: Option<&'a [String]>,
    needs: Option<&'a [String]>,
}

impl WorkflowParser {
    /// Parse a workflow from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> EngineResult<Workflow> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a workflow from a YAML string.
    pub fn parse(content: &str) -> EngineResult<Workflow> {
        let workflow: Workflow = serde_yaml::from_str(content)?;
        Ok(workflow)
    }

    /// Parse and validate a workflow from a YAML string.
    pub fn parse_and_validate(content: &str) -> EngineResult<Workflow> {
        let workflow = Self::parse(content)?;
        Self::validate(&workflow)?;
        Ok(workflow)
    }

    /// Parse and validate a workflow file.
    pub fn load<P: AsRef<Path>>(path: P) -> EngineResult<Workflow> {
        let workflow = Self::from_file(path)?;
        Self::validate(&workflow)?;
        Ok(workflow)
    }

    /// Validate a parsed workflow for semantic correctness.
    ///
    /// Everything that would make the run impossible is reported here, before
    /// any job is dispatched: dangling or circular `needs`, malformed
    /// matrices, invalid fan-in jobs and references that can never resolve.
    pub fn validate(workflow: &Workflow) -> Result<(), ConfigError> {
        if workflow.jobs.is_empty() {
            return Err(ConfigError::invalid_structure("workflow has no jobs"));
        }

        // Unknown needs, cycles and matrix expansion
        ExecutionGraph::from_workflow(workflow)?;

        for (job_id, job) in &workflow.jobs {
            Self::validate_job(job_id, job)?;
        }

        Self::check_references(workflow)
    }

    fn validate_job(job_id: &str, job: &Job) -> Result<(), ConfigError> {
        if job.steps.is_empty() {
            return Err(ConfigError::invalid_structure(format!(
                "job '{}' has no steps",
                job_id
            )));
        }

        let mut ids = HashSet::new();
        for step in &job.steps {
            if let Some(id) = &step.id {
                if !ids.insert(id.as_str()) {
                    return Err(ConfigError::invalid_structure(format!(
                        "job '{}' has more than one step with id '{}'",
                        job_id, id
                    )));
                }
            }
        }

        if job.fan_in {
            if job.needs.is_empty() {
                return Err(ConfigError::invalid_structure(format!(
                    "fan-in job '{}' must declare the jobs it waits for in 'needs'",
                    job_id
                )));
            }
            if job.matrix().is_some() {
                return Err(ConfigError::invalid_structure(format!(
                    "fan-in job '{}' cannot have a matrix",
                    job_id
                )));
            }
        }

        if let Some(0) = job.strategy.as_ref().and_then(|s| s.max_parallel) {
            return Err(ConfigError::invalid_structure(format!(
                "job '{}': max-parallel must be at least 1",
                job_id
            )));
        }

        Ok(())
    }

    /// Check every `${{ }}` reference against what is visible where it appears
    fn check_references(workflow: &Workflow) -> Result<(), ConfigError> {
        for (name, value) in &workflow.env {
            check(value, &Visible::default(), || format!("workflow env '{}'", name))?;
        }

        for (job_id, job) in &workflow.jobs {
            let params = MatrixExpander::parameter_names(job);
            let needs = job.needs.to_vec();
            let step_ids: Vec<String> = job.steps.iter().filter_map(|s| s.id.clone()).collect();

            let job_scope = Visible {
                matrix: Some(params.as_slice()),
                steps: None,
                needs: Some(needs.as_slice()),
            };
            for (name, value) in &job.env {
                check(value, &job_scope, || format!("job '{}' env '{}'", job_id, name))?;
            }
            if let Some(runs_on) = &job.runs_on {
                for label in runs_on.labels() {
                    check(label, &job_scope, || format!("job '{}' runs-on", job_id))?;
                }
            }

            let mut earlier: Vec<String> = Vec::new();
            for (index, step) in job.steps.iter().enumerate() {
                let step_scope = Visible {
                    matrix: Some(params.as_slice()),
                    steps: Some(earlier.as_slice()),
                    needs: Some(needs.as_slice()),
                };
                for field in step.templated_fields() {
                    check(field, &step_scope, || {
                        format!("job '{}' step {} ('{}')", job_id, index + 1, step.display_name())
                    })?;
                }
                if let Some(id) = &step.id {
                    earlier.push(id.clone());
                }
            }

            let output_scope = Visible {
                matrix: Some(params.as_slice()),
                steps: Some(step_ids.as_slice()),
                needs: Some(needs.as_slice()),
            };
            for (name, value) in &job.outputs {
                check(value, &output_scope, || format!("job '{}' output '{}'", job_id, name))?;
            }
        }

        Ok(())
    }
}

fn check(
    template: &str,
    visible: &Visible<'_>,
    location: impl Fn() -> String,
) -> Result<(), ConfigError> {
    let refs = references(template)
        .map_err(|e| ConfigError::unresolved_reference(format!("{}: {}", location(), e)))?;

    for reference in refs {
        let problem = match &reference {
            Reference::Matrix(param) => match visible.matrix {
                None => Some("matrix values are not available here".to_string()),
                Some(params) if !params.contains(param) => {
                    Some(format!("matrix has no parameter '{}'", param))
                }
                Some(_) => None,
            },
            Reference::StepOutput { step, .. } => match visible.steps {
                None => Some("step outputs are not available here".to_string()),
                Some(ids) if !ids.contains(step) => {
                    Some(format!("no step with id '{}' is visible here", step))
                }
                Some(_) => None,
            },
            Reference::NeedsOutput { job, .. } | Reference::NeedsResult { job } => {
                match visible.needs {
                    None => Some("needs are not available here".to_string()),
                    Some(needs) if !needs.contains(job) => {
                        Some(format!("job '{}' is not listed in needs", job))
                    }
                    Some(_) => None,
                }
            }
            Reference::Secret(_) | Reference::Env(_) => None,
        };

        if let Some(problem) = problem {
            return Err(ConfigError::unresolved_reference(format!(
                "{}: {}",
                location(),
                problem
            )));
        }
    }
    Ok(())
}
