// Run State
// Shared record of job instance outcomes for one pipeline execution

use crate::execution::matrix::JobInstance;
use crate::execution::results::{JobResult, JobStatus};

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("instance '{0}' is not registered")]
    UnknownInstance(String),

    #[error("instance '{0}' already published a terminal result")]
    AlreadyPublished(String),

    #[error("cannot publish non-terminal status '{1}' for instance '{0}'")]
    NotTerminal(String, JobStatus),
}

#[derive(Debug, Clone)]
struct InstanceRecord {
    job_name: String,
    status: JobStatus,
    result: Option<Arc<JobResult>>,
}

/// Run-scoped map of instance id to status and result.
///
/// Cheap to clone; all clones share the same record. A terminal result is
/// written once, under the lock, and readers see either all of it or
/// nothing.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    inner: Arc<RwLock<IndexMap<String, InstanceRecord>>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register instances as Pending, in scheduling order
    pub fn register<'a, I>(&self, instances: I)
    where
        I: IntoIterator<Item = &'a JobInstance>,
    {
        let mut records = self.inner.write();
        for instance in instances {
            records
                .entry(instance.id.clone())
                .or_insert_with(|| InstanceRecord {
                    job_name: instance.job_name.clone(),
                    status: JobStatus::Pending,
                    result: None,
                });
        }
    }

    /// Pending -> Running; a no-op once the instance is terminal
    pub fn mark_running(&self, instance_id: &str) -> Result<(), StateError> {
        let mut records = self.inner.write();
        let record = records
            .get_mut(instance_id)
            .ok_or_else(|| StateError::UnknownInstance(instance_id.to_string()))?;
        if !record.status.is_terminal() {
            record.status = JobStatus::Running;
        }
        Ok(())
    }

    /// Publish the terminal result of an instance. The first publication wins.
    pub fn publish(&self, result: JobResult) -> Result<(), StateError> {
        if !result.status.is_terminal() {
            return Err(StateError::NotTerminal(
                result.instance_id.clone(),
                result.status,
            ));
        }

        let mut records = self.inner.write();
        let record = records
            .get_mut(&result.instance_id)
            .ok_or_else(|| StateError::UnknownInstance(result.instance_id.clone()))?;
        if record.result.is_some() {
            return Err(StateError::AlreadyPublished(result.instance_id.clone()));
        }
        record.status = result.status;
        record.result = Some(Arc::new(result));
        Ok(())
    }

    pub fn status(&self, instance_id: &str) -> Option<JobStatus> {
        self.inner.read().get(instance_id).map(|r| r.status)
    }

    pub fn result(&self, instance_id: &str) -> Option<Arc<JobResult>> {
        self.inner
            .read()
            .get(instance_id)
            .and_then(|r| r.result.clone())
    }

    /// Published results of a job's instances, in registration order
    pub fn job_results(&self, job_name: &str) -> Vec<Arc<JobResult>> {
        self.inner
            .read()
            .values()
            .filter(|r| r.job_name == job_name)
            .filter_map(|r| r.result.clone())
            .collect()
    }

    /// Declared outputs a dependent sees from `job_name`.
    ///
    /// Only succeeded instances contribute; later instances override
    /// earlier ones on key collisions.
    pub fn job_outputs(&self, job_name: &str) -> IndexMap<String, String> {
        let mut outputs = IndexMap::new();
        for result in self.job_results(job_name) {
            if result.status == JobStatus::Succeeded {
                for (key, value) in &result.outputs {
                    outputs.insert(key.clone(), value.clone());
                }
            }
        }
        outputs
    }

    /// True once every registered instance is terminal
    pub fn all_terminal(&self) -> bool {
        self.inner.read().values().all(|r| r.status.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(job: &str, id: &str) -> JobInstance {
        JobInstance {
            id: id.to_string(),
            job_name: job.to_string(),
            index: 0,
            matrix: IndexMap::new(),
        }
    }

    fn result(job: &str, id: &str, status: JobStatus, outputs: &[(&str, &str)]) -> JobResult {
        let mut result = JobResult::failed(id, job, IndexMap::new(), "");
        result.status = status;
        result.error = None;
        result.outputs = outputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        result
    }

    #[test]
    fn test_lifecycle_and_first_writer_wins() {
        let state = RunState::new();
        let build = instance("build", "build");
        state.register([&build]);
        assert_eq!(state.status("build"), Some(JobStatus::Pending));

        state.mark_running("build").unwrap();
        assert_eq!(state.status("build"), Some(JobStatus::Running));
        assert!(state.result("build").is_none());

        state
            .publish(result("build", "build", JobStatus::Succeeded, &[("sha", "abc")]))
            .unwrap();
        assert_eq!(state.status("build"), Some(JobStatus::Succeeded));

        let err = state
            .publish(result("build", "build", JobStatus::Cancelled, &[]))
            .unwrap_err();
        assert_eq!(err, StateError::AlreadyPublished("build".to_string()));
        assert_eq!(state.status("build"), Some(JobStatus::Succeeded));

        state.mark_running("build").unwrap();
        assert_eq!(state.status("build"), Some(JobStatus::Succeeded));
        assert!(state.all_terminal());
    }

    #[test]
    fn test_rejects_unknown_and_non_terminal() {
        let state = RunState::new();
        assert!(matches!(
            state.publish(result("x", "x", JobStatus::Succeeded, &[])),
            Err(StateError::UnknownInstance(_))
        ));

        state.register([&instance("x", "x")]);
        assert!(matches!(
            state.publish(result("x", "x", JobStatus::Running, &[])),
            Err(StateError::NotTerminal(_, JobStatus::Running))
        ));
    }

    #[test]
    fn test_job_outputs_only_from_succeeded_instances() {
        let state = RunState::new();
        let a = instance("ci", "ci (a)");
        let b = instance("ci", "ci (b)");
        let c = instance("ci", "ci (c)");
        state.register([&a, &b, &c]);

        state
            .publish(result("ci", "ci (a)", JobStatus::Succeeded, &[("k", "a"), ("only_a", "1")]))
            .unwrap();
        state
            .publish(result("ci", "ci (b)", JobStatus::Failed, &[("k", "b")]))
            .unwrap();
        state
            .publish(result("ci", "ci (c)", JobStatus::Succeeded, &[("k", "c")]))
            .unwrap();

        let outputs = state.job_outputs("ci");
        assert_eq!(outputs["k"], "c");
        assert_eq!(outputs["only_a"], "1");
        assert_eq!(state.job_results("ci").len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_publication_single_winner() {
        let state = RunState::new();
        state.register([&instance("race", "race")]);

        let mut handles = Vec::new();
        for i in 0..8 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                let status = if i % 2 == 0 {
                    JobStatus::Succeeded
                } else {
                    JobStatus::Cancelled
                };
                state.publish(result("race", "race", status, &[])).is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
