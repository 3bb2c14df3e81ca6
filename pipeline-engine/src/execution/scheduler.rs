// Dependency Scheduler
// Decides when job instances are dispatched, skipped or cancelled

use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::graph::ExecutionGraph;
use crate::execution::matrix::JobInstance;
use crate::execution::results::JobStatus;

use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};

/// What to do with a job instance whose needs are resolved
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Run the instance
    Dispatch(JobInstance),
    /// A need did not succeed; the instance never runs
    Skip { instance: JobInstance, reason: String },
    /// The run was cancelled before the instance started
    Cancel { instance: JobInstance, reason: String },
}

impl Decision {
    pub fn instance(&self) -> &JobInstance {
        match self {
            Decision::Dispatch(instance) => instance,
            Decision::Skip { instance, .. } | Decision::Cancel { instance, .. } => instance,
        }
    }

    pub fn is_dispatch(&self) -> bool {
        matches!(self, Decision::Dispatch(_))
    }
}

#[derive(Debug)]
struct NodeState {
    name: String,
    needs: Vec<usize>,
    dependents: Vec<usize>,
    instances: Vec<JobInstance>,
    fan_in: bool,
    /// Needed nodes that are not resolved yet
    waiting_on: usize,
    /// Instances that have not reported a terminal status
    remaining: usize,
    statuses: Vec<JobStatus>,
    released: bool,
    resolution: Option<JobStatus>,
}

/// Synchronous scheduling state machine over an [`ExecutionGraph`].
///
/// `start` yields the first decisions; every terminal instance is fed back
/// through `complete`, which yields whatever became ready as a result. A
/// node is released only when its last needed node resolves, and a node
/// resolves when its last instance reports.
#[derive(Debug)]
pub struct DependencyScheduler {
    nodes: Vec<NodeState>,
    order: Vec<usize>,
    owners: HashMap<String, usize>,
    reported: HashMap<String, JobStatus>,
    started: bool,
    cancelled: bool,
    event_tx: Option<ProgressSender>,
}

impl DependencyScheduler {
    pub fn new(graph: &ExecutionGraph) -> Self {
        let nodes: Vec<NodeState> = graph
            .jobs
            .iter()
            .map(|node| {
                let needs: Vec<usize> = node
                    .dependencies
                    .iter()
                    .filter_map(|d| graph.index_of(d))
                    .collect();
                NodeState {
                    name: node.name.clone(),
                    waiting_on: needs.len(),
                    needs,
                    dependents: node
                        .dependents
                        .iter()
                        .filter_map(|d| graph.index_of(d))
                        .collect(),
                    instances: node.instances.clone(),
                    fan_in: node.is_fan_in(),
                    remaining: node.instances.len(),
                    statuses: Vec::with_capacity(node.instances.len()),
                    released: false,
                    resolution: None,
                }
            })
            .collect();

        let owners = nodes
            .iter()
            .enumerate()
            .flat_map(|(idx, node)| node.instances.iter().map(move |i| (i.id.clone(), idx)))
            .collect();

        let order = graph
            .topological_order()
            .iter()
            .filter_map(|node| graph.index_of(&node.name))
            .collect();

        Self {
            nodes,
            order,
            owners,
            reported: HashMap::new(),
            started: false,
            cancelled: false,
            event_tx: None,
        }
    }

    pub fn with_progress(mut self, tx: Option<ProgressSender>) -> Self {
        self.event_tx = tx;
        self
    }

    /// Release every job with no needs
    pub fn start(&mut self) -> Vec<Decision> {
        if self.started {
            return Vec::new();
        }
        self.started = true;

        let ready: VecDeque<usize> = self
            .order
            .iter()
            .copied()
            .filter(|&idx| self.nodes[idx].waiting_on == 0)
            .collect();
        self.drain(ready)
    }

    /// Record a terminal status for a dispatched instance.
    ///
    /// Reports for unknown instances, non-terminal statuses and repeated
    /// reports are ignored.
    pub fn complete(&mut self, instance_id: &str, status: JobStatus) -> Vec<Decision> {
        if !status.is_terminal() || self.reported.contains_key(instance_id) {
            return Vec::new();
        }
        let Some(&idx) = self.owners.get(instance_id) else {
            tracing::warn!(instance = instance_id, "completion for unknown instance");
            return Vec::new();
        };
        self.reported.insert(instance_id.to_string(), status);

        let mut ready = VecDeque::new();
        self.record(idx, status, &mut ready);
        self.drain(ready)
    }

    /// Stop releasing work. Jobs released from now on are cancelled, not skipped.
    pub fn cancel_pending(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Every job has resolved
    pub fn is_finished(&self) -> bool {
        self.nodes.iter().all(|node| node.resolution.is_some())
    }

    pub fn resolution(&self, job_name: &str) -> Option<JobStatus> {
        self.nodes
            .iter()
            .find(|node| node.name == job_name)
            .and_then(|node| node.resolution)
    }

    /// Resolved status of every job that has resolved, in declaration order
    pub fn resolutions(&self) -> IndexMap<String, JobStatus> {
        self.nodes
            .iter()
            .filter_map(|node| node.resolution.map(|status| (node.name.clone(), status)))
            .collect()
    }

    fn record(&mut self, idx: usize, status: JobStatus, ready: &mut VecDeque<usize>) {
        let node = &mut self.nodes[idx];
        node.statuses.push(status);
        node.remaining = node.remaining.saturating_sub(1);
        if node.remaining == 0 && node.released {
            self.resolve(idx, ready);
        }
    }

    /// All instances of a node are terminal: fix its status and wake dependents
    fn resolve(&mut self, idx: usize, ready: &mut VecDeque<usize>) {
        if self.nodes[idx].resolution.is_some() {
            return;
        }
        let status = JobStatus::resolve(self.nodes[idx].statuses.iter().copied());
        self.nodes[idx].resolution = Some(status);

        tracing::debug!(job = %self.nodes[idx].name, %status, "job resolved");
        self.event_tx.send_event(ExecutionEvent::JobResolved {
            job_name: self.nodes[idx].name.clone(),
            status,
        });

        for dependent in self.nodes[idx].dependents.clone() {
            let node = &mut self.nodes[dependent];
            node.waiting_on = node.waiting_on.saturating_sub(1);
            if node.waiting_on == 0 {
                ready.push_back(dependent);
            }
        }
    }

    fn drain(&mut self, mut ready: VecDeque<usize>) -> Vec<Decision> {
        let mut decisions = Vec::new();
        while let Some(idx) = ready.pop_front() {
            self.release(idx, &mut ready, &mut decisions);
        }
        decisions
    }

    fn release(&mut self, idx: usize, ready: &mut VecDeque<usize>, decisions: &mut Vec<Decision>) {
        if self.nodes[idx].released {
            return;
        }
        self.nodes[idx].released = true;

        if self.nodes[idx].fan_in {
            let upstream_instances = self.nodes[idx]
                .needs
                .iter()
                .map(|&need| self.nodes[need].instances.len())
                .sum();
            self.event_tx.send_event(ExecutionEvent::BarrierReleased {
                job_name: self.nodes[idx].name.clone(),
                upstream_instances,
            });
        }

        if self.nodes[idx].instances.is_empty() {
            self.resolve(idx, ready);
            return;
        }

        let unmet: Vec<String> = self.nodes[idx]
            .needs
            .iter()
            .filter_map(|&need| {
                let node = &self.nodes[need];
                match node.resolution {
                    Some(JobStatus::Succeeded) => None,
                    Some(status) => Some(format!("needed job '{}' {}", node.name, status)),
                    None => Some(format!("needed job '{}' did not finish", node.name)),
                }
            })
            .collect();

        let instances = self.nodes[idx].instances.clone();
        if self.cancelled {
            for instance in instances {
                self.reported.insert(instance.id.clone(), JobStatus::Cancelled);
                self.record(idx, JobStatus::Cancelled, ready);
                decisions.push(Decision::Cancel {
                    instance,
                    reason: "the run was cancelled".to_string(),
                });
            }
        } else if !unmet.is_empty() {
            let reason = unmet.join("; ");
            for instance in instances {
                self.reported.insert(instance.id.clone(), JobStatus::Skipped);
                self.record(idx, JobStatus::Skipped, ready);
                decisions.push(Decision::Skip {
                    instance,
                    reason: reason.clone(),
                });
            }
        } else {
            decisions.extend(instances.into_iter().map(Decision::Dispatch));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::parser::WorkflowParser;

    fn scheduler(yaml: &str) -> DependencyScheduler {
        let workflow = WorkflowParser::parse(yaml).unwrap();
        DependencyScheduler::new(&ExecutionGraph::from_workflow(&workflow).unwrap())
    }

    fn ids(decisions: &[Decision]) -> Vec<String> {
        decisions.iter().map(|d| d.instance().id.clone()).collect()
    }

    const FAN_IN: &str = r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        rust: [stable, beta, nightly]
    steps:
      - run: cargo test
  finish:
    needs: test
    fan-in: true
    steps:
      - run: echo done
"#;

    #[test]
    fn test_barrier_waits_for_every_sibling() {
        let mut s = scheduler(FAN_IN);
        let first = s.start();
        assert_eq!(
            ids(&first),
            vec!["test (stable)", "test (beta)", "test (nightly)"]
        );
        assert!(first.iter().all(Decision::is_dispatch));

        assert!(s.complete("test (nightly)", JobStatus::Succeeded).is_empty());
        assert!(s.complete("test (stable)", JobStatus::Succeeded).is_empty());
        assert_eq!(s.resolution("test"), None);

        let released = s.complete("test (beta)", JobStatus::Succeeded);
        assert_eq!(released, vec![Decision::Dispatch(JobInstance::single("finish"))]);
        assert_eq!(s.resolution("test"), Some(JobStatus::Succeeded));

        assert!(s.complete("finish", JobStatus::Succeeded).is_empty());
        assert!(s.is_finished());
    }

    #[test]
    fn test_rendezvous_fires_once() {
        let mut s = scheduler(FAN_IN);
        s.start();
        s.complete("test (stable)", JobStatus::Succeeded);
        s.complete("test (beta)", JobStatus::Succeeded);
        assert_eq!(s.complete("test (nightly)", JobStatus::Succeeded).len(), 1);
        assert!(s.complete("test (nightly)", JobStatus::Failed).is_empty());
        assert!(s.complete("test (beta)", JobStatus::Succeeded).is_empty());
        assert_eq!(s.resolution("test"), Some(JobStatus::Succeeded));
    }

    #[test]
    fn test_one_failed_sibling_skips_barrier() {
        let mut s = scheduler(FAN_IN);
        s.start();
        s.complete("test (stable)", JobStatus::Succeeded);
        s.complete("test (beta)", JobStatus::Failed);
        let decisions = s.complete("test (nightly)", JobStatus::Cancelled);

        assert_eq!(s.resolution("test"), Some(JobStatus::Failed));
        match &decisions[..] {
            [Decision::Skip { instance, reason }] => {
                assert_eq!(instance.id, "finish");
                assert_eq!(reason, "needed job 'test' failed");
            }
            other => panic!("unexpected decisions: {:?}", other),
        }
        assert_eq!(s.resolution("finish"), Some(JobStatus::Skipped));
        assert!(s.is_finished());
    }

    #[test]
    fn test_skip_propagates_transitively() {
        let mut s = scheduler(
            r#"
on: push
jobs:
  a:
    steps: [{run: exit 1}]
  b:
    needs: a
    steps: [{run: echo b}]
  c:
    needs: b
    steps: [{run: echo c}]
  d:
    steps: [{run: echo d}]
"#,
        );
        assert_eq!(ids(&s.start()), vec!["a", "d"]);

        let decisions = s.complete("a", JobStatus::Failed);
        assert_eq!(ids(&decisions), vec!["b", "c"]);
        assert!(decisions
            .iter()
            .all(|d| matches!(d, Decision::Skip { .. })));
        assert_eq!(s.resolution("c"), Some(JobStatus::Skipped));
        assert!(!s.is_finished());

        s.complete("d", JobStatus::Succeeded);
        assert!(s.is_finished());
    }

    #[test]
    fn test_needs_on_several_jobs() {
        let mut s = scheduler(
            r#"
on: push
jobs:
  lint:
    steps: [{run: lint}]
  test:
    steps: [{run: test}]
  deploy:
    needs: [lint, test]
    steps: [{run: deploy}]
"#,
        );
        s.start();
        assert!(s.complete("test", JobStatus::Succeeded).is_empty());
        assert_eq!(ids(&s.complete("lint", JobStatus::Succeeded)), vec!["deploy"]);
    }

    #[test]
    fn test_zero_instance_job_resolves_vacuously() {
        let mut s = scheduler(
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: []
    steps: [{run: test}]
  report:
    needs: test
    steps: [{run: report}]
"#,
        );
        let decisions = s.start();
        assert_eq!(s.resolution("test"), Some(JobStatus::Succeeded));
        assert_eq!(decisions, vec![Decision::Dispatch(JobInstance::single("report"))]);
    }

    #[test]
    fn test_cancelled_run_cancels_unreleased_jobs() {
        let mut s = scheduler(
            r#"
on: push
jobs:
  build:
    steps: [{run: build}]
  test:
    needs: build
    steps: [{run: test}]
"#,
        );
        s.start();
        s.cancel_pending();
        let decisions = s.complete("build", JobStatus::Succeeded);
        assert!(matches!(
            &decisions[..],
            [Decision::Cancel { instance, .. }] if instance.id == "test"
        ));
        assert_eq!(s.resolution("test"), Some(JobStatus::Cancelled));
        assert!(s.is_finished());
    }

    #[test]
    fn test_barrier_event_counts_upstream_instances() {
        let (tx, mut rx) = crate::execution::events::progress_channel();
        let mut s = scheduler(FAN_IN).with_progress(Some(tx));
        s.start();
        for id in ["test (stable)", "test (beta)", "test (nightly)"] {
            s.complete(id, JobStatus::Succeeded);
        }

        let mut released = None;
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::BarrierReleased {
                job_name,
                upstream_instances,
            } = event
            {
                released = Some((job_name, upstream_instances));
            }
        }
        assert_eq!(released, Some(("finish".to_string(), 3)));
    }

    #[test]
    fn test_unknown_and_non_terminal_reports_ignored() {
        let mut s = scheduler(FAN_IN);
        s.start();
        assert!(s.complete("nope", JobStatus::Succeeded).is_empty());
        assert!(s.complete("test (beta)", JobStatus::Running).is_empty());
        assert!(!s.is_finished());
    }
}
