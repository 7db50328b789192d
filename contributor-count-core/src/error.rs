use thiserror::Error;

use crate::contract::{ProviderError, ProviderKind};

/// Problems with the configuration document. Always reported before any network call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("invalid filter pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("failed to read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("failed to parse config YAML: {0}")]
    Malformed(String),
}

/// Run-level failures. Repository-level fetch failures are not errors; they are recorded in
/// the aggregation state and the run continues.
#[derive(Error, Debug)]
pub enum CountError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("authentication failed for {provider} scope '{scope}': {message}. The token needs {guidance}")]
    Auth {
        provider: ProviderKind,
        scope: String,
        message: String,
        guidance: &'static str,
    },
    #[error("could not list repositories for '{scope}': {source}")]
    ScopeUnavailable {
        scope: String,
        #[source]
        source: ProviderError,
    },
    #[error("{count} repositories could not be fetched")]
    RepositoryFailures { count: usize },
}

impl CountError {
    pub fn auth(provider: ProviderKind, scope: &str, message: impl Into<String>) -> Self {
        CountError::Auth {
            provider,
            scope: scope.to_string(),
            message: message.into(),
            guidance: provider.required_permissions(),
        }
    }
}
