// Error Types
// Configuration errors are fatal before any job is dispatched

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while loading or preparing a workflow run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A workflow declaration that cannot be executed
#[derive(Debug, Clone, Error)]
#[error("configuration error: {message}")]
pub struct ConfigError {
    pub message: String,
    pub kind: ConfigErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// Circular `needs` relation
    CyclicDependency,
    /// `needs` names a job that does not exist
    UnknownDependency,
    /// Matrix without dimensions, or with colliding instance ids
    MalformedMatrix,
    /// `${{ }}` reference that can never resolve
    UnresolvedReference,
    /// Job selected on the command line does not exist
    UnknownJob,
    /// Anything else structurally wrong with the workflow
    InvalidStructure,
}

impl ConfigError {
    pub fn cyclic(message: impl Into<String>) -> Self {
        Self::new(message, ConfigErrorKind::CyclicDependency)
    }

    pub fn unknown_dependency(message: impl Into<String>) -> Self {
        Self::new(message, ConfigErrorKind::UnknownDependency)
    }

    pub fn malformed_matrix(message: impl Into<String>) -> Self {
        Self::new(message, ConfigErrorKind::MalformedMatrix)
    }

    pub fn unresolved_reference(message: impl Into<String>) -> Self {
        Self::new(message, ConfigErrorKind::UnresolvedReference)
    }

    pub fn unknown_job(message: impl Into<String>) -> Self {
        Self::new(message, ConfigErrorKind::UnknownJob)
    }

    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::new(message, ConfigErrorKind::InvalidStructure)
    }

    fn new(message: impl Into<String>, kind: ConfigErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl EngineError {
    /// The configuration error kind, if this is one
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            EngineError::Config(e) => Some(e.kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::cyclic("a -> b -> a");
        assert_eq!(err.to_string(), "configuration error: a -> b -> a");
        assert_eq!(err.kind, ConfigErrorKind::CyclicDependency);
    }

    #[test]
    fn test_engine_error_kind() {
        let err: EngineError = ConfigError::unknown_job("no job 'lint'").into();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownJob));

        let io: EngineError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(io.config_kind(), None);
    }
}
