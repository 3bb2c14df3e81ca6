// Engine Configuration
// Optional YAML file controlling concurrency, shells, runner labels and action adapters

use crate::error::{ConfigError, EngineResult};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum job instances running at once (0 = unlimited)
    pub max_parallel_jobs: usize,

    /// Seconds a cancelled instance gets before it is abandoned
    pub cancel_grace_period_secs: u64,

    /// Shell used when neither the step nor its defaults name one
    pub default_shell: String,

    /// Labels this machine offers to `runs-on` (empty = accept all)
    pub runner_labels: Vec<String>,

    /// Action name -> command adapter
    pub actions: IndexMap<String, ActionCommand>,
}

/// A shell command standing in for a `uses:` action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionCommand {
    pub run: String,
    #[serde(default)]
    pub shell: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: 0,
            cancel_grace_period_secs: 10,
            default_shell: "sh".to_string(),
            runner_labels: Vec::new(),
            actions: IndexMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a YAML string; an empty document yields defaults
    pub fn parse(content: &str) -> EngineResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: EngineConfig = serde_yaml::from_str(content)?;
        if config.default_shell.trim().is_empty() {
            return Err(ConfigError::invalid_structure("default_shell must not be empty").into());
        }
        Ok(config)
    }

    /// `<config dir>/gantry/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gantry").join("config.yaml"))
    }

    /// Load from an explicit path, else the default location if it exists, else defaults
    pub fn load(explicit: Option<&Path>) -> EngineResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "loading engine config");
                Self::from_file(path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn cancel_grace_period(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_period_secs)
    }

    /// Whether every requested label is offered by this runner
    pub fn accepts_labels(&self, requested: &[&str]) -> bool {
        self.runner_labels.is_empty()
            || requested
                .iter()
                .all(|label| self.runner_labels.iter().any(|offered| offered == label))
    }
}
