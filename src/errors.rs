use thiserror::Error;

/// Fatal pre-run error: malformed spec, unknown assertion type, bad template.
/// Discovered during load/resolution, before any evaluation starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);

/// Fatal pre-run error from `$ref` expansion.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("reference not found: {0}")]
    NotFound(String),
    #[error("cyclic reference: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },
}

/// Anything that can go wrong turning a config file into an [`EvalConfig`].
///
/// [`EvalConfig`]: crate::model::EvalConfig
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config file is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
