// Action Runner
// Resolves `uses:` references to built-in or configured handlers

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::runners::shell::{Shell, ShellError, ShellOutput, ShellRunner};
use crate::runners::StepRequest;

use indexmap::IndexMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Something that can stand in for a `uses:` action
#[async_trait::async_trait]
pub trait ActionHandler: Send + Sync {
    async fn run(
        &self,
        request: &StepRequest,
        inputs: &IndexMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ShellOutput, ShellError>;
}

/// `actions/checkout`: the working directory already holds the sources
pub struct CheckoutAction;

#[async_trait::async_trait]
impl ActionHandler for CheckoutAction {
    async fn run(
        &self,
        request: &StepRequest,
        _inputs: &IndexMap<String, String>,
        _cancel: &CancellationToken,
    ) -> Result<ShellOutput, ShellError> {
        Ok(ShellOutput::completed(format!(
            "Using existing checkout at {}",
            request.working_dir.display()
        )))
    }
}

/// Runs a configured shell command with inputs exported as `INPUT_<NAME>`
pub struct CommandAction {
    runner: ShellRunner,
    run: String,
    shell: Shell,
}

impl CommandAction {
    pub fn new(run: impl Into<String>, shell: Shell) -> Self {
        Self {
            runner: ShellRunner::new(),
            run: run.into(),
            shell,
        }
    }
}

#[async_trait::async_trait]
impl ActionHandler for CommandAction {
    async fn run(
        &self,
        request: &StepRequest,
        inputs: &IndexMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ShellOutput, ShellError> {
        let mut env = request.env.clone();
        for (name, value) in inputs {
            env.insert(input_env_name(name), value.clone());
        }
        self.runner
            .run(
                self.shell,
                &self.run,
                &env,
                &request.working_dir,
                request.timeout,
                cancel,
            )
            .await
    }
}

/// `with:` key to environment variable name
pub fn input_env_name(key: &str) -> String {
    let normalized: String = key
        .chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect();
    format!("INPUT_{}", normalized)
}

/// Action name without its `@ref`
pub fn action_name(uses: &str) -> &str {
    uses.split_once('@').map_or(uses, |(name, _)| name).trim()
}

/// Registry of action handlers keyed by action name
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: IndexMap<String, Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the built-in actions
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("actions/checkout", Arc::new(CheckoutAction));
        registry
    }

    /// Built-ins plus the command adapters declared in the engine config
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::with_builtins();
        for (name, command) in &config.actions {
            let shell_name = command.shell.as_deref().unwrap_or(&config.default_shell);
            let shell = Shell::from_str(shell_name).map_err(|e| {
                ConfigError::invalid_structure(format!("action '{}': {}", name, e))
            })?;
            registry.register(
                action_name(name),
                Arc::new(CommandAction::new(command.run.clone(), shell)),
            );
        }
        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Handler for a `uses:` reference, ignoring the `@ref`
    pub fn get(&self, uses: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action_name(uses)).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActionCommand;
    use crate::runners::StepKind;
    use std::path::Path;

    fn request(dir: &Path, uses: &str) -> StepRequest {
        StepRequest {
            instance_id: "build".to_string(),
            step_index: 0,
            name: format!("Run {}", uses),
            kind: StepKind::Action {
                uses: uses.to_string(),
                inputs: IndexMap::new(),
            },
            env: IndexMap::new(),
            working_dir: dir.to_path_buf(),
            timeout: None,
            output_file: dir.join("output"),
        }
    }

    #[test]
    fn test_input_env_name() {
        assert_eq!(input_env_name("github-token"), "INPUT_GITHUB_TOKEN");
        assert_eq!(input_env_name("path-to.lcov"), "INPUT_PATH_TO_LCOV");
        assert_eq!(input_env_name("parallel finished"), "INPUT_PARALLEL_FINISHED");
    }

    #[test]
    fn test_action_name() {
        assert_eq!(action_name("actions/checkout@v4"), "actions/checkout");
        assert_eq!(action_name("local/action"), "local/action");
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ActionRegistry::with_builtins();
        assert!(registry.get("actions/checkout@v4").is_some());
        assert!(registry.get("actions/checkout@main").is_some());
        assert!(registry.get("coverallsapp/github-action@v2").is_none());
    }

    #[test]
    fn test_from_config_rejects_unknown_shell() {
        let mut config = EngineConfig::default();
        config.actions.insert(
            "acme/deploy".to_string(),
            ActionCommand {
                run: "deploy".to_string(),
                shell: Some("tcsh".to_string()),
            },
        );
        let err = ActionRegistry::from_config(&config).unwrap_err();
        assert!(err.message.contains("acme/deploy"));
    }

    #[tokio::test]
    async fn test_checkout_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let handler = ActionRegistry::with_builtins()
            .get("actions/checkout@v4")
            .unwrap();
        let output = handler
            .run(
                &request(dir.path(), "actions/checkout@v4"),
                &IndexMap::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_command_action_receives_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.actions.insert(
            "coverallsapp/github-action@v2".to_string(),
            ActionCommand {
                run: "echo \"upload $INPUT_PATH_TO_LCOV parallel=$INPUT_PARALLEL\"".to_string(),
                shell: None,
            },
        );
        let registry = ActionRegistry::from_config(&config).unwrap();
        let handler = registry.get("coverallsapp/github-action@v1").unwrap();

        let inputs = IndexMap::from([
            ("path-to-lcov".to_string(), "lcov.info".to_string()),
            ("parallel".to_string(), "true".to_string()),
        ]);
        let output = handler
            .run(
                &request(dir.path(), "coverallsapp/github-action@v1"),
                &inputs,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output.stdout, "upload lcov.info parallel=true");
    }
}
