use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A GitHub Actions-compatible workflow definition.
///
/// This represents the top-level structure of a workflow YAML file. Jobs keep
/// their declaration order so that scheduling and reporting are deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// The name of the workflow
    #[serde(default)]
    pub name: Option<String>,

    /// The trigger configuration for the workflow
    #[serde(rename = "on")]
    pub on: Trigger,

    /// Workflow-level environment variables
    #[serde(default, deserialize_with = "string_map")]
    pub env: IndexMap<String, String>,

    /// Default settings for all jobs in the workflow
    #[serde(default)]
    pub defaults: Option<Defaults>,

    /// The jobs that make up this workflow
    pub jobs: IndexMap<String, Job>,
}

impl Workflow {
    /// Name used in reports when the workflow does not declare one
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }

    /// Default shell and working directory declared at workflow level
    pub fn run_defaults(&self) -> Option<&RunDefaults> {
        self.defaults.as_ref().and_then(|d| d.run.as_ref())
    }
}

/// Trigger configuration for when the workflow should run.
///
/// Supports multiple trigger formats:
/// - Simple: `on: push`
/// - List: `on: [push, pull_request]`
/// - Detailed: `on: { push: { branches: [main] } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    /// Single event trigger: `on: push`
    Single(String),

    /// Multiple events: `on: [push, pull_request]`
    Multiple(Vec<String>),

    /// Detailed event configuration
    Detailed(IndexMap<String, Option<EventConfig>>),
}

/// The event a run is started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    /// Event name (push, pull_request, workflow_dispatch, ...)
    pub name: String,
    /// Branch the event refers to, if known
    pub branch: Option<String>,
}

impl TriggerEvent {
    pub fn new(name: impl Into<String>, branch: Option<String>) -> Self {
        Self {
            name: name.into(),
            branch: branch.map(|b| b.trim_start_matches("refs/heads/").to_string()),
        }
    }
}

impl Trigger {
    /// Check whether this trigger enables a run for the given event.
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        match self {
            Trigger::Single(name) => *name == event.name,
            Trigger::Multiple(names) => names.iter().any(|n| *n == event.name),
            Trigger::Detailed(events) => match events.get(&event.name) {
                None => false,
                Some(None) => true,
                Some(Some(config)) => match &event.branch {
                    Some(branch) => config.matches_branch(branch),
                    None => true,
                },
            },
        }
    }

    /// Names of all events this trigger listens to.
    pub fn events(&self) -> Vec<&str> {
        match self {
            Trigger::Single(name) => vec![name.as_str()],
            Trigger::Multiple(names) => names.iter().map(String::as_str).collect(),
            Trigger::Detailed(events) => events.keys().map(String::as_str).collect(),
        }
    }
}

/// Configuration for a specific trigger event.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventConfig {
    /// Branch filters for push/pull_request events
    #[serde(default)]
    pub branches: Vec<String>,

    /// Branch ignore patterns
    #[serde(default, rename = "branches-ignore")]
    pub branches_ignore: Vec<String>,
}

impl EventConfig {
    /// Apply `branches` / `branches-ignore` glob filters to a branch name.
    pub fn matches_branch(&self, branch: &str) -> bool {
        if !self.branches.is_empty() {
            return self.branches.iter().any(|p| glob_matches(p, branch));
        }
        if !self.branches_ignore.is_empty() {
            return !self.branches_ignore.iter().any(|p| glob_matches(p, branch));
        }
        true
    }
}

fn glob_matches(pattern: &str, branch: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(branch),
        Err(_) => pattern == branch,
    }
}

/// Default settings for jobs and steps.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Defaults {
    /// Default settings for run steps
    #[serde(default)]
    pub run: Option<RunDefaults>,
}

/// Default settings for run steps.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunDefaults {
    /// Default shell to use
    #[serde(default)]
    pub shell: Option<String>,

    /// Default working directory
    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,
}

/// A job within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Display name for the job
    #[serde(default)]
    pub name: Option<String>,

    /// Jobs that must complete before this job runs
    #[serde(default)]
    pub needs: JobNeeds,

    /// Runner labels this job requires
    #[serde(default, rename = "runs-on")]
    pub runs_on: Option<RunsOn>,

    /// Job-level environment variables
    #[serde(default, deserialize_with = "string_map")]
    pub env: IndexMap<String, String>,

    /// Default settings for steps in this job
    #[serde(default)]
    pub defaults: Option<Defaults>,

    /// Job outputs to pass to dependent jobs
    #[serde(default)]
    pub outputs: IndexMap<String, String>,

    /// Matrix strategy for running multiple job instances
    #[serde(default)]
    pub strategy: Option<Strategy>,

    /// The steps that make up this job
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Many-to-one barrier over every instance of the jobs it needs
    #[serde(default, rename = "fan-in")]
    pub fan_in: bool,
}

impl Job {
    /// Default shell and working directory declared at job level
    pub fn run_defaults(&self) -> Option<&RunDefaults> {
        self.defaults.as_ref().and_then(|d| d.run.as_ref())
    }

    /// Matrix declaration, if the job has one
    pub fn matrix(&self) -> Option<&Matrix> {
        self.strategy.as_ref().and_then(|s| s.matrix.as_ref())
    }
}

/// Job dependencies - can be a single string or a list.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum JobNeeds {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl JobNeeds {
    /// Convert to a vector of job IDs, dropping duplicates.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            JobNeeds::None => vec![],
            JobNeeds::Single(s) => vec![s.clone()],
            JobNeeds::Multiple(v) => {
                let mut out: Vec<String> = Vec::with_capacity(v.len());
                for name in v {
                    if !out.contains(name) {
                        out.push(name.clone());
                    }
                }
                out
            }
        }
    }

    /// Check if there are any dependencies.
    pub fn is_empty(&self) -> bool {
        match self {
            JobNeeds::None => true,
            JobNeeds::Single(_) => false,
            JobNeeds::Multiple(v) => v.is_empty(),
        }
    }
}

/// Runner specification - can be a string or a list of labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunsOn {
    /// Single runner label: `runs-on: ubuntu-latest`
    Label(String),

    /// Multiple labels: `runs-on: [self-hosted, linux]`
    Labels(Vec<String>),
}

impl RunsOn {
    pub fn labels(&self) -> Vec<&str> {
        match self {
            RunsOn::Label(l) => vec![l.as_str()],
            RunsOn::Labels(ls) => ls.iter().map(String::as_str).collect(),
        }
    }
}

/// Strategy configuration for matrix builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    /// Matrix configuration
    #[serde(default)]
    pub matrix: Option<Matrix>,

    /// Whether to cancel all sibling instances if one fails
    #[serde(default = "default_fail_fast", rename = "fail-fast")]
    pub fail_fast: bool,

    /// Maximum number of instances to run in parallel
    #[serde(default, rename = "max-parallel")]
    pub max_parallel: Option<u32>,
}

fn default_fail_fast() -> bool {
    true
}

/// Matrix configuration for parallel job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matrix {
    /// Matrix dimensions (dynamic keys), in declaration order
    #[serde(flatten)]
    pub dimensions: IndexMap<String, Vec<Value>>,

    /// Additional matrix combinations to include
    #[serde(default)]
    pub include: Vec<IndexMap<String, Value>>,

    /// Matrix combinations to exclude
    #[serde(default)]
    pub exclude: Vec<IndexMap<String, Value>>,
}

/// A step within a job.
///
/// Exactly one of `run` or `uses` must be present; the choice is carried as a
/// tagged [`StepAction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct Step {
    /// Unique identifier for the step (used in outputs)
    pub id: Option<String>,

    /// Display name for the step
    pub name: Option<String>,

    /// What the step runs
    pub action: StepAction,

    /// Step-level environment variables
    pub env: IndexMap<String, String>,

    /// Step timeout in minutes
    pub timeout_minutes: Option<u32>,

    /// Additional attempts after a failure (0 = no retry)
    pub retries: u32,
}

/// The unit of work a step performs.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Inline shell command
    Run(RunStep),
    /// Reference to a reusable action
    Uses(UsesStep),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunStep {
    pub run: String,
    pub shell: Option<String>,
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsesStep {
    pub uses: String,
    pub with: IndexMap<String, Value>,
}

impl Step {
    /// Full, unshortened label: the step name, or `Run <uses>` / `Run <first line>`.
    ///
    /// May still contain `${{ }}` references.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.action {
            StepAction::Uses(u) => format!("Run {}", u.uses),
            StepAction::Run(r) => {
                let first_line = r.run.lines().next().unwrap_or(&r.run);
                format!("Run {}", first_line)
            }
        }
    }

    /// Label shortened for terminal output.
    pub fn display_name(&self) -> String {
        shorten_label(&self.label())
    }
}

/// Cut a label to 50 characters, ending in `...` when shortened.
pub fn shorten_label(label: &str) -> String {
    if label.chars().count() > 50 {
        let head: String = label.chars().take(47).collect();
        format!("{}...", head)
    } else {
        label.to_string()
    }
}

impl Step {
    /// Every string in the step that may carry `${{ }}` references.
    pub fn templated_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        if let Some(name) = &self.name {
            fields.push(name);
        }
        match &self.action {
            StepAction::Run(r) => {
                fields.push(&r.run);
                if let Some(dir) = &r.working_directory {
                    fields.push(dir);
                }
            }
            StepAction::Uses(u) => {
                fields.extend(u.with.values().filter_map(Value::as_str));
            }
        }
        fields.extend(self.env.values().map(String::as_str));
        fields
    }
}

/// Wire shape of a step, converted into [`Step`] after deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shell: Option<String>,
    #[serde(
        default,
        rename = "working-directory",
        skip_serializing_if = "Option::is_none"
    )]
    working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uses: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    with: IndexMap<String, Value>,
    #[serde(
        default,
        deserialize_with = "string_map",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    env: IndexMap<String, String>,
    #[serde(
        default,
        rename = "timeout-minutes",
        skip_serializing_if = "Option::is_none"
    )]
    timeout_minutes: Option<u32>,
    #[serde(default)]
    retries: u32,
}

impl TryFrom<RawStep> for Step {
    type Error = String;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let label = raw
            .name
            .clone()
            .or_else(|| raw.id.clone())
            .unwrap_or_else(|| "unnamed".to_string());

        let action = match (raw.run, raw.uses) {
            (Some(run), None) => StepAction::Run(RunStep {
                run,
                shell: raw.shell,
                working_directory: raw.working_directory,
            }),
            (None, Some(uses)) => StepAction::Uses(UsesStep {
                uses,
                with: raw.with,
            }),
            (Some(_), Some(_)) => {
                return Err(format!(
                    "step '{}' cannot have both 'run' and 'uses'",
                    label
                ))
            }
            (None, None) => {
                return Err(format!(
                    "step '{}' must have either 'run' or 'uses'",
                    label
                ))
            }
        };

        Ok(Step {
            id: raw.id,
            name: raw.name,
            action,
            env: raw.env,
            timeout_minutes: raw.timeout_minutes,
            retries: raw.retries,
        })
    }
}

impl From<Step> for RawStep {
    fn from(step: Step) -> Self {
        let (run, shell, working_directory, uses, with) = match step.action {
            StepAction::Run(r) => (Some(r.run), r.shell, r.working_directory, None, IndexMap::new()),
            StepAction::Uses(u) => (None, None, None, Some(u.uses), u.with),
        };
        RawStep {
            id: step.id,
            name: step.name,
            run,
            shell,
            working_directory,
            uses,
            with,
            env: step.env,
            timeout_minutes: step.timeout_minutes,
            retries: step.retries,
        }
    }
}

/// Render a YAML scalar as the string a shell would see.
///
/// Sequences and mappings render as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Deserialize an env-style map whose values may be YAML strings, numbers or booleans.
fn string_map<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = IndexMap::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| match value {
            Value::Array(_) | Value::Object(_) => Err(D::Error::custom(format!(
                "value of '{}' must be a string, number or boolean",
                key
            ))),
            scalar => Ok((key, render_value(&scalar))),
        })
        .collect()
}
