//! HTTP implementations of [`ProviderClient`], one per supported SCM provider.
//!
//! [`build_client`] selects the implementation from the provider configuration. All clients
//! share [`http::HttpTransport`] for authentication, timeouts and status classification, and
//! differ only in endpoints, pagination style and response shapes.

pub mod azure_devops;
pub mod bitbucket;
pub mod bitbucket_server;
pub mod github;
pub mod gitlab;
pub mod http;

use std::time::Duration;

use tracing::info;

use crate::config::ProviderConfig;
use crate::contract::{ProviderClient, ProviderError, ProviderKind};

pub use azure_devops::AzureDevOpsClient;
pub use bitbucket::BitbucketClient;
pub use bitbucket_server::BitbucketServerClient;
pub use github::GitHubClient;
pub use gitlab::GitLabClient;
pub use http::HttpTransport;

/// How requests authenticate. Resolved by the caller; the core never reads the environment.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    /// Sent as a bearer token (Azure DevOps: as the basic-auth password).
    Token(String),
    Basic { username: String, password: String },
}

// Never print secrets.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::Token(_) => f.write_str("Token(***)"),
            Credentials::Basic { username, .. } => {
                write!(f, "Basic {{ username: {username:?}, password: *** }}")
            }
        }
    }
}

impl Credentials {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Credentials::Anonymous)
    }
}

/// Builds the client for `provider`, validating its base URL.
pub fn build_client(
    provider: &ProviderConfig,
    credentials: Credentials,
    timeout: Duration,
) -> Result<Box<dyn ProviderClient>, ProviderError> {
    let url = provider.url.as_deref();
    let client: Box<dyn ProviderClient> = match provider.kind {
        ProviderKind::GitHub => Box::new(GitHubClient::new(url, credentials, timeout)?),
        ProviderKind::GitLab => Box::new(GitLabClient::new(url, credentials, timeout)?),
        ProviderKind::Bitbucket => Box::new(BitbucketClient::new(url, credentials, timeout)?),
        ProviderKind::BitbucketServer => {
            let url = url.ok_or_else(|| {
                ProviderError::InvalidUrl("Bitbucket Server requires a base URL".into())
            })?;
            Box::new(BitbucketServerClient::new(url, credentials, timeout)?)
        }
        ProviderKind::AzureDevOps => Box::new(AzureDevOpsClient::new(
            &provider.org,
            provider.project.as_deref().unwrap_or_default(),
            url,
            credentials,
            timeout,
        )?),
    };
    info!(provider = %provider.kind, timeout_secs = timeout.as_secs(), "Provider client ready");
    Ok(client)
}
