// Execution Graph (DAG) Builder
// Builds the job dependency graph from `needs` and orders it for execution

use crate::error::ConfigError;
use crate::execution::matrix::{JobInstance, MatrixExpander};
use crate::workflow::models::{Job, Workflow};

use std::collections::{HashMap, HashSet, VecDeque};

/// Execution graph of a workflow's jobs.
///
/// Matrix instances of a job are siblings under a single node; edges are
/// between job names.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    /// Jobs in declaration order
    pub jobs: Vec<JobNode>,
    /// Quick lookup of job index by name
    indices: HashMap<String, usize>,
    /// Topological order as indices into `jobs`
    order: Vec<usize>,
}

/// A node representing a job in the execution graph
#[derive(Debug, Clone)]
pub struct JobNode {
    /// Job name (the key under `jobs:`)
    pub name: String,
    /// Job definition
    pub job: Job,
    /// Names of jobs this job needs
    pub dependencies: Vec<String>,
    /// Names of jobs that need this job
    pub dependents: Vec<String>,
    /// Expanded instances; empty when a matrix dimension is empty
    pub instances: Vec<JobInstance>,
}

impl JobNode {
    pub fn is_fan_in(&self) -> bool {
        self.job.fan_in
    }
}

impl ExecutionGraph {
    /// Build an execution graph from a workflow definition
    pub fn from_workflow(workflow: &Workflow) -> Result<Self, ConfigError> {
        let mut nodes = Vec::with_capacity(workflow.jobs.len());
        // instance id -> owning job; ids key RunState and the scheduler
        let mut owners: HashMap<String, String> = HashMap::new();

        for (name, job) in &workflow.jobs {
            let dependencies = job.needs.to_vec();
            for dep in &dependencies {
                if !workflow.jobs.contains_key(dep) {
                    return Err(ConfigError::unknown_dependency(format!(
                        "job '{}' needs unknown job '{}'",
                        name, dep
                    )));
                }
            }

            let instances = MatrixExpander::expand(name, job)?;
            for instance in &instances {
                if let Some(other) = owners.insert(instance.id.clone(), name.clone()) {
                    return Err(ConfigError::invalid_structure(format!(
                        "job '{}' and job '{}' both produce instance '{}'",
                        other, name, instance.id
                    )));
                }
            }

            nodes.push(JobNode {
                name: name.clone(),
                job: job.clone(),
                dependencies,
                dependents: Vec::new(),
                instances,
            });
        }

        Self::from_nodes(nodes)
    }

    fn from_nodes(mut nodes: Vec<JobNode>) -> Result<Self, ConfigError> {
        let indices: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.name.clone(), idx))
            .collect();

        for node in nodes.iter_mut() {
            node.dependents.clear();
        }
        for idx in 0..nodes.len() {
            let name = nodes[idx].name.clone();
            for dep in nodes[idx].dependencies.clone() {
                if let Some(&dep_idx) = indices.get(&dep) {
                    nodes[dep_idx].dependents.push(name.clone());
                }
            }
        }

        let order = Self::kahn(&nodes, &indices)?;
        Ok(Self {
            jobs: nodes,
            indices,
            order,
        })
    }

    /// Kahn's algorithm; ties keep declaration order
    fn kahn(nodes: &[JobNode], indices: &HashMap<String, usize>) -> Result<Vec<usize>, ConfigError> {
        let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.dependencies.len()).collect();

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(idx, _)| idx)
            .collect();

        let mut result = Vec::with_capacity(nodes.len());

        while let Some(idx) = queue.pop_front() {
            result.push(idx);

            let mut ready = Vec::new();
            for dependent in &nodes[idx].dependents {
                if let Some(&dep_idx) = indices.get(dependent) {
                    in_degree[dep_idx] -= 1;
                    if in_degree[dep_idx] == 0 {
                        ready.push(dep_idx);
                    }
                }
            }
            ready.sort_unstable();
            queue.extend(ready);
        }

        if result.len() != nodes.len() {
            let stuck: Vec<&str> = nodes
                .iter()
                .enumerate()
                .filter(|(idx, _)| in_degree[*idx] > 0)
                .map(|(_, n)| n.name.as_str())
                .collect();
            return Err(ConfigError::cyclic(format!(
                "circular dependency between jobs: {}",
                stuck.join(", ")
            )));
        }

        Ok(result)
    }

    /// Restrict the graph to the named jobs and everything they transitively need.
    ///
    /// An empty selection keeps every job.
    pub fn select(&self, names: &[String]) -> Result<Self, ConfigError> {
        if names.is_empty() {
            return Ok(self.clone());
        }

        let mut keep: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();
        for name in names {
            let node = self.get_job(name).ok_or_else(|| {
                ConfigError::unknown_job(format!("workflow has no job named '{}'", name))
            })?;
            stack.push(node.name.as_str());
        }
        while let Some(name) = stack.pop() {
            if !keep.insert(name) {
                continue;
            }
            if let Some(node) = self.get_job(name) {
                stack.extend(node.dependencies.iter().map(String::as_str));
            }
        }

        let nodes = self
            .jobs
            .iter()
            .filter(|node| keep.contains(node.name.as_str()))
            .cloned()
            .collect();
        Self::from_nodes(nodes)
    }

    /// Get jobs in topological order (respecting dependencies)
    pub fn topological_order(&self) -> Vec<&JobNode> {
        self.order.iter().map(|&idx| &self.jobs[idx]).collect()
    }

    /// Group jobs into levels whose members do not depend on each other
    pub fn parallel_levels(&self) -> Vec<Vec<&JobNode>> {
        let mut levels: Vec<Vec<&JobNode>> = Vec::new();
        let mut assigned: HashMap<&str, usize> = HashMap::new();

        for job in self.topological_order() {
            let level = job
                .dependencies
                .iter()
                .filter_map(|dep| assigned.get(dep.as_str()))
                .max()
                .map(|l| l + 1)
                .unwrap_or(0);

            assigned.insert(job.name.as_str(), level);

            if level >= levels.len() {
                levels.resize(level + 1, Vec::new());
            }
            levels[level].push(job);
        }

        levels
    }

    /// Get a job by name
    pub fn get_job(&self, name: &str) -> Option<&JobNode> {
        self.indices.get(name).map(|&idx| &self.jobs[idx])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    /// Total number of job instances across all jobs
    pub fn instance_count(&self) -> usize {
        self.jobs.iter().map(|node| node.instances.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
