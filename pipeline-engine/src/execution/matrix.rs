// Matrix Strategy Expansion
// Expands matrix strategies into concrete job instances

use crate::error::ConfigError;
use crate::workflow::models::{render_value, Job, Matrix};

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;

/// One runnable copy of a job with its matrix parameters bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInstance {
    /// Unique, deterministic id: the job name, or `job (v1, v2)`
    pub id: String,
    /// Name of the workflow job this instance belongs to
    pub job_name: String,
    /// Position among the job's instances
    pub index: usize,
    /// Bound matrix parameters, rendered as strings
    pub matrix: IndexMap<String, String>,
}

impl JobInstance {
    /// The single instance of a job without a matrix
    pub fn single(job_name: impl Into<String>) -> Self {
        let job_name = job_name.into();
        Self {
            id: job_name.clone(),
            job_name,
            index: 0,
            matrix: IndexMap::new(),
        }
    }

    pub fn is_matrix(&self) -> bool {
        !self.matrix.is_empty()
    }

    /// Matrix values as shown in progress output, e.g. `ubuntu, stable`
    pub fn matrix_label(&self) -> Option<String> {
        if self.matrix.is_empty() {
            None
        } else {
            Some(self.matrix.values().cloned().collect::<Vec<_>>().join(", "))
        }
    }
}

/// Matrix expander for job strategies
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a job into its instances.
    ///
    /// Without a matrix the job has exactly one instance. With a matrix,
    /// the first declared parameter varies slowest. Any empty parameter
    /// list yields no instances at all.
    pub fn expand(job_name: &str, job: &Job) -> Result<Vec<JobInstance>, ConfigError> {
        let matrix = match job.matrix() {
            Some(matrix) => matrix,
            None => return Ok(vec![JobInstance::single(job_name)]),
        };

        let combinations = Self::combinations(job_name, matrix)?;

        let mut seen = HashSet::new();
        let mut instances = Vec::with_capacity(combinations.len());
        for (index, matrix) in combinations.into_iter().enumerate() {
            let id = Self::instance_id(job_name, &matrix);
            if !seen.insert(id.clone()) {
                return Err(ConfigError::malformed_matrix(format!(
                    "job '{}' produces duplicate matrix instance '{}'",
                    job_name, id
                )));
            }
            instances.push(JobInstance {
                id,
                job_name: job_name.to_string(),
                index,
                matrix,
            });
        }
        Ok(instances)
    }

    /// Number of instances a job expands to
    pub fn instance_count(job_name: &str, job: &Job) -> Result<usize, ConfigError> {
        Ok(Self::expand(job_name, job)?.len())
    }

    /// Parameter names visible as `matrix.*` for a job
    pub fn parameter_names(job: &Job) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(matrix) = job.matrix() {
            for key in matrix.dimensions.keys() {
                if !names.contains(key) {
                    names.push(key.clone());
                }
            }
            for entry in &matrix.include {
                for key in entry.keys() {
                    if !names.contains(key) {
                        names.push(key.clone());
                    }
                }
            }
        }
        names
    }

    fn combinations(
        job_name: &str,
        matrix: &Matrix,
    ) -> Result<Vec<IndexMap<String, String>>, ConfigError> {
        if matrix.dimensions.is_empty() && matrix.include.is_empty() {
            return Err(ConfigError::malformed_matrix(format!(
                "job '{}' declares a matrix without parameters",
                job_name
            )));
        }

        // An empty dimension removes the job from the graph entirely
        if matrix.dimensions.values().any(Vec::is_empty) {
            return Ok(Vec::new());
        }

        let mut combos: Vec<IndexMap<String, String>> = if matrix.dimensions.is_empty() {
            Vec::new()
        } else {
            vec![IndexMap::new()]
        };
        for (key, values) in &matrix.dimensions {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in values {
                    let mut extended = combo.clone();
                    extended.insert(key.clone(), render_value(value));
                    next.push(extended);
                }
            }
            combos = next;
        }

        for entry in &matrix.exclude {
            if let Some(key) = entry.keys().find(|k| !matrix.dimensions.contains_key(*k)) {
                return Err(ConfigError::malformed_matrix(format!(
                    "job '{}' excludes unknown matrix parameter '{}'",
                    job_name, key
                )));
            }
            combos.retain(|combo| !Self::matches(combo, entry));
        }

        for entry in &matrix.include {
            let (original, extra): (Vec<_>, Vec<_>) = entry
                .iter()
                .partition(|(key, _)| matrix.dimensions.contains_key(*key));

            let mut matched = false;
            for combo in combos.iter_mut() {
                let applies = original
                    .iter()
                    .all(|(key, value)| combo.get(*key) == Some(&render_value(value)));
                if applies && !is_appended(combo, &matrix.dimensions) {
                    for (key, value) in &extra {
                        combo.insert((*key).clone(), render_value(value));
                    }
                    matched = true;
                }
            }

            if !matched {
                combos.push(
                    entry
                        .iter()
                        .map(|(key, value)| (key.clone(), render_value(value)))
                        .collect(),
                );
            }
        }

        Ok(combos)
    }

    fn matches(combo: &IndexMap<String, String>, entry: &IndexMap<String, Value>) -> bool {
        entry
            .iter()
            .all(|(key, value)| combo.get(key) == Some(&render_value(value)))
    }

    fn instance_id(job_name: &str, matrix: &IndexMap<String, String>) -> String {
        if matrix.is_empty() {
            job_name.to_string()
        } else {
            let values: Vec<&str> = matrix.values().map(String::as_str).collect();
            format!("{} ({})", job_name, values.join(", "))
        }
    }
}

/// Combinations appended by `include` are never extended by later includes
fn is_appended(combo: &IndexMap<String, String>, dimensions: &IndexMap<String, Vec<Value>>) -> bool {
    dimensions.is_empty() || !dimensions.keys().all(|key| combo.contains_key(key))
}
