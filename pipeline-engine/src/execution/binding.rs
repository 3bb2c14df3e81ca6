// Environment & Secret Binding
// Resolves ${{ }} references in step fields and redacts secrets from captured output

use crate::execution::results::JobStatus;
use crate::workflow::models::{render_value, Step, StepAction};

use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;

/// A secret value. Never printed through `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value. Only the step executor boundary should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Environment variables read as secrets: `GANTRY_SECRET_<NAME>` provides `secrets.<NAME>`.
///
/// Variables with this prefix are never passed on to step processes.
pub const SECRET_ENV_PREFIX: &str = "GANTRY_SECRET_";

/// Source of `secrets.<NAME>` values
pub trait SecretStore: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Secret>;
}

/// In-memory secret store
#[derive(Debug, Clone, Default)]
pub struct MapSecretStore {
    values: IndexMap<String, Secret>,
}

impl MapSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the `GANTRY_SECRET_*` variables in the process environment
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let values = vars
            .into_iter()
            .filter_map(|(name, value)| {
                let name = name.strip_prefix(SECRET_ENV_PREFIX)?;
                (!name.is_empty()).then(|| (name.to_string(), Secret::new(value)))
            })
            .collect();
        Self { values }
    }

    /// Add or replace a secret
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), Secret::new(value));
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SecretStore for MapSecretStore {
    fn lookup(&self, name: &str) -> Option<Secret> {
        self.values.get(name).cloned()
    }
}

/// Errors raised while substituting `${{ }}` references
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolutionError {
    #[error("'{0}' is not defined")]
    Undefined(String),

    #[error("unsupported expression '{0}': only dotted references are allowed")]
    Unsupported(String),

    #[error("unterminated expression in '{0}'")]
    Unterminated(String),
}

/// A piece of a templated string
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Expr(String),
}

/// Split a string into literal text and `${{ }}` expressions
pub fn extract_expressions(input: &str) -> Result<Vec<Segment>, ResolutionError> {
    let mut segments = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find("${{") {
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        let after = &rest[start + 3..];
        let end = after
            .find("}}")
            .ok_or_else(|| ResolutionError::Unterminated(input.to_string()))?;
        segments.push(Segment::Expr(after[..end].trim().to_string()));
        rest = &after[end + 2..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

/// A dotted reference inside `${{ }}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `matrix.<param>`
    Matrix(String),
    /// `steps.<id>.outputs.<name>`
    StepOutput { step: String, name: String },
    /// `needs.<job>.outputs.<name>`
    NeedsOutput { job: String, name: String },
    /// `needs.<job>.result`
    NeedsResult { job: String },
    /// `secrets.<NAME>`
    Secret(String),
    /// `env.<NAME>`
    Env(String),
}

impl Reference {
    pub fn parse(expr: &str) -> Result<Self, ResolutionError> {
        let valid = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };
        let parts: Vec<&str> = expr.split('.').collect();
        if !parts.iter().all(|p| valid(*p)) {
            return Err(ResolutionError::Unsupported(expr.to_string()));
        }

        let reference = match parts.as_slice() {
            ["matrix", param] => Reference::Matrix(param.to_string()),
            ["steps", step, "outputs", name] => Reference::StepOutput {
                step: step.to_string(),
                name: name.to_string(),
            },
            ["needs", job, "outputs", name] => Reference::NeedsOutput {
                job: job.to_string(),
                name: name.to_string(),
            },
            ["needs", job, "result"] => Reference::NeedsResult {
                job: job.to_string(),
            },
            ["secrets", name] => Reference::Secret(name.to_string()),
            ["env", name] => Reference::Env(name.to_string()),
            _ => return Err(ResolutionError::Unsupported(expr.to_string())),
        };
        Ok(reference)
    }
}

/// Every reference appearing in a templated string
pub fn references(input: &str) -> Result<Vec<Reference>, ResolutionError> {
    extract_expressions(input)?
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Expr(expr) => Some(Reference::parse(&expr)),
            Segment::Text(_) => None,
        })
        .collect()
}

/// What a dependent job sees of one of its needs
#[derive(Debug, Clone, PartialEq)]
pub struct NeedsContext {
    pub result: JobStatus,
    pub outputs: IndexMap<String, String>,
}

/// Values visible to `${{ }}` expressions
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub matrix: IndexMap<String, String>,
    pub steps: IndexMap<String, IndexMap<String, String>>,
    pub needs: IndexMap<String, NeedsContext>,
    pub env: IndexMap<String, String>,
}

/// A substituted string plus the secrets that went into it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    pub value: String,
    pub secrets: Vec<Secret>,
}

impl Scope {
    /// Look up a single reference
    pub fn lookup(
        &self,
        reference: &Reference,
        secrets: &dyn SecretStore,
    ) -> Option<(String, Option<Secret>)> {
        match reference {
            Reference::Matrix(param) => self.matrix.get(param).map(|v| (v.clone(), None)),
            Reference::StepOutput { step, name } => self
                .steps
                .get(step)
                .and_then(|outputs| outputs.get(name))
                .map(|v| (v.clone(), None)),
            Reference::NeedsOutput { job, name } => self
                .needs
                .get(job)
                .and_then(|needs| needs.outputs.get(name))
                .map(|v| (v.clone(), None)),
            Reference::NeedsResult { job } => self
                .needs
                .get(job)
                .map(|needs| (needs.result.as_str().to_string(), None)),
            Reference::Secret(name) => secrets
                .lookup(name)
                .map(|secret| (secret.expose().to_string(), Some(secret))),
            Reference::Env(name) => self.env.get(name).map(|v| (v.clone(), None)),
        }
    }

    /// Substitute every `${{ }}` expression in `template`
    pub fn interpolate(
        &self,
        template: &str,
        secrets: &dyn SecretStore,
    ) -> Result<Resolved, ResolutionError> {
        let mut resolved = Resolved::default();
        for segment in extract_expressions(template)? {
            match segment {
                Segment::Text(text) => resolved.value.push_str(&text),
                Segment::Expr(expr) => {
                    let reference = Reference::parse(&expr)?;
                    let (value, secret) = self
                        .lookup(&reference, secrets)
                        .ok_or_else(|| ResolutionError::Undefined(expr.clone()))?;
                    resolved.value.push_str(&value);
                    if let Some(secret) = secret {
                        if !resolved.secrets.contains(&secret) {
                            resolved.secrets.push(secret);
                        }
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Resolve an env layer in declaration order on top of `self.env`
    fn resolve_layer(
        &mut self,
        layer: &IndexMap<String, String>,
        secrets: &dyn SecretStore,
        collected: &mut Vec<Secret>,
    ) -> Result<(), ResolutionError> {
        for (name, template) in layer {
            let resolved = self.interpolate(template, secrets)?;
            collect(collected, resolved.secrets);
            self.env.insert(name.clone(), resolved.value);
        }
        Ok(())
    }
}

fn collect(into: &mut Vec<Secret>, secrets: Vec<Secret>) {
    for secret in secrets {
        if !into.contains(&secret) {
            into.push(secret);
        }
    }
}

/// Environment and expression scope of one job instance.
///
/// Built once from the workflow and job env layers; step outputs are
/// recorded into it as the job progresses.
#[derive(Debug, Clone, Default)]
pub struct JobEnv {
    pub scope: Scope,
    /// Secrets pulled in by the workflow and job env layers
    pub secrets: Vec<Secret>,
}

impl JobEnv {
    /// Layer workflow env then job env, each resolved against the layers before it
    pub fn build(
        workflow_env: &IndexMap<String, String>,
        job_env: &IndexMap<String, String>,
        matrix: IndexMap<String, String>,
        needs: IndexMap<String, NeedsContext>,
        secrets: &dyn SecretStore,
    ) -> Result<Self, ResolutionError> {
        let mut scope = Scope {
            matrix,
            needs,
            ..Default::default()
        };
        let mut collected = Vec::new();
        scope.resolve_layer(workflow_env, secrets, &mut collected)?;
        scope.resolve_layer(job_env, secrets, &mut collected)?;
        Ok(Self {
            scope,
            secrets: collected,
        })
    }

    /// Variables exported to every step of the job
    pub fn vars(&self) -> &IndexMap<String, String> {
        &self.scope.env
    }

    /// Engine-provided variable; not visible to `${{ env.* }}` until set
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.scope.env.insert(name.into(), value.into());
    }

    /// Make a finished step's outputs visible as `steps.<id>.outputs.*`
    pub fn record_step_outputs(&mut self, step_id: &str, outputs: IndexMap<String, String>) {
        self.scope.steps.insert(step_id.to_string(), outputs);
    }
}

/// Concrete, fully substituted step ready for an executor
#[derive(Debug, Clone, PartialEq)]
pub struct StepEnv {
    pub name: String,
    pub action: ResolvedAction,
    /// Job env overlaid with step env
    pub vars: IndexMap<String, String>,
    pub working_directory: Option<String>,
    pub shell: Option<String>,
    /// Every secret substituted anywhere into this step
    pub secrets: Vec<Secret>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAction {
    Run(String),
    Uses {
        uses: String,
        inputs: IndexMap<String, String>,
    },
}

/// Resolve a step against its job environment and the secret store
pub fn resolve(
    step: &Step,
    job_env: &JobEnv,
    secrets: &dyn SecretStore,
) -> Result<StepEnv, ResolutionError> {
    let mut scope = job_env.scope.clone();
    let mut collected = job_env.secrets.clone();

    let name = scope.interpolate(&step.label(), secrets)?;
    collect(&mut collected, name.secrets);

    scope.resolve_layer(&step.env, secrets, &mut collected)?;

    let (action, working_directory, shell) = match &step.action {
        StepAction::Run(run) => {
            let script = scope.interpolate(&run.run, secrets)?;
            collect(&mut collected, script.secrets);
            let dir = match &run.working_directory {
                Some(dir) => {
                    let dir = scope.interpolate(dir, secrets)?;
                    collect(&mut collected, dir.secrets);
                    Some(dir.value)
                }
                None => None,
            };
            (ResolvedAction::Run(script.value), dir, run.shell.clone())
        }
        StepAction::Uses(uses) => {
            let mut inputs = IndexMap::new();
            for (key, value) in &uses.with {
                let input = scope.interpolate(&render_value(value), secrets)?;
                collect(&mut collected, input.secrets);
                inputs.insert(key.clone(), input.value);
            }
            (
                ResolvedAction::Uses {
                    uses: uses.uses.clone(),
                    inputs,
                },
                None,
                None,
            )
        }
    };

    Ok(StepEnv {
        name: name.value,
        action,
        vars: scope.env,
        working_directory,
        shell,
        secrets: collected,
    })
}

/// Redacts registered values from captured text
#[derive(Clone, Default)]
pub struct Masker {
    // longest first, so a secret containing another is replaced whole
    values: Vec<String>,
}

impl fmt::Debug for Masker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Masker")
            .field("values", &self.values.len())
            .finish()
    }
}

impl Masker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value; multi-line values are also masked line by line
    pub fn add(&mut self, value: &str) {
        let mut candidates = vec![value];
        if value.contains('\n') {
            candidates.extend(value.lines());
        }
        for candidate in candidates {
            let candidate = candidate.trim_end_matches('\r');
            if candidate.trim().is_empty() || self.values.iter().any(|v| v == candidate) {
                continue;
            }
            self.values.push(candidate.to_string());
        }
        self.values.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    pub fn add_secret(&mut self, secret: &Secret) {
        self.add(secret.expose());
    }

    pub fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for value in &self.values {
            if masked.contains(value.as_str()) {
                masked = masked.replace(value.as_str(), "***");
            }
        }
        masked
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
