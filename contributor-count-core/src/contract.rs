//! # contract: normalized provider data and the provider capability interface
//!
//! Every SCM provider (GitHub, GitLab, Bitbucket Cloud/Server, Azure DevOps) is reduced to
//! the same three paginated listings: repositories of a scope, branches of a repository,
//! and commits of a repository (optionally on one branch), newest first.
//!
//! ## Interface & Extensibility
//! - Implement [`ProviderClient`] for a new provider; see [`crate::providers`] for the HTTP
//!   implementations.
//! - Each call returns one [`Page`]. An empty `items` list is success-empty; errors are a
//!   [`ProviderError`] whose variant tells the pagination controller whether to retry.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall` so tests can script provider responses page by page.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use serde::{Deserialize, Serialize};

/// The supported source-control providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
    #[serde(rename = "bitbucket", alias = "bitbucket_cloud")]
    Bitbucket,
    #[serde(rename = "bitbucket_server", alias = "bitbucket-server")]
    BitbucketServer,
    #[serde(rename = "azure_devops", alias = "azure-devops", alias = "ado")]
    AzureDevOps,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "github",
            ProviderKind::GitLab => "gitlab",
            ProviderKind::Bitbucket => "bitbucket",
            ProviderKind::BitbucketServer => "bitbucket_server",
            ProviderKind::AzureDevOps => "azure_devops",
        }
    }

    /// What the provider calls its top-level scope; used as the identifier key in summary output.
    pub fn scope_label(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "org",
            ProviderKind::GitLab => "group",
            ProviderKind::Bitbucket => "workspace",
            ProviderKind::BitbucketServer | ProviderKind::AzureDevOps => "project",
        }
    }

    /// Token permissions needed to read a private scope.
    pub fn required_permissions(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "`read:org` and `repo` (read-only) scopes",
            ProviderKind::GitLab => "`read_api` scope on the group",
            ProviderKind::Bitbucket => "an app password with `Repositories: Read`",
            ProviderKind::BitbucketServer => "project and repository read permission",
            ProviderKind::AzureDevOps => "a personal access token with `Code (Read)`",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(ProviderKind::GitHub),
            "gitlab" => Ok(ProviderKind::GitLab),
            "bitbucket" | "bitbucket_cloud" => Ok(ProviderKind::Bitbucket),
            "bitbucket_server" | "bitbucket-server" => Ok(ProviderKind::BitbucketServer),
            "azure_devops" | "azure-devops" | "ado" => Ok(ProviderKind::AzureDevOps),
            other => Err(format!("unsupported provider type: {other}")),
        }
    }
}

/// The org/group/workspace/project being scanned. Immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scope {
    pub provider: ProviderKind,
    pub identifier: String,
    pub base_url: Option<String>,
}

/// A repository as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Provider-side handle used to address the repository in later calls
    /// (full name on GitHub, numeric id on GitLab, slug on Bitbucket, GUID on Azure DevOps).
    pub id: String,
    /// Short name, e.g. `app`.
    pub name: String,
    /// Name including the owning scope, e.g. `acme/app`. Used as the report key.
    pub full_name: String,
    pub default_branch: Option<String>,
    pub scope: String,
}

/// Author identity exactly as the provider reported it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: Option<String>,
    pub email: Option<String>,
    /// Provider-specific stable identifier (login, account id, slug).
    pub username: Option<String>,
    /// Further handles shown for the same account, e.g. a nickname next to an account id.
    /// Filters test them; identity keys never use them.
    pub aliases: Vec<String>,
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub sha: String,
    /// Full name of the repository the commit was listed from.
    pub repository: String,
    pub author: CommitAuthor,
    pub timestamp: DateTime<Utc>,
    /// Set when the commit was listed from an explicitly requested branch.
    pub branch: Option<String>,
}

/// Opaque continuation handle: a next-page URL, an offset or a page number depending on provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageCursor(pub String);

/// One page of a provider listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<PageCursor>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Page { items, next: None }
    }

    pub fn empty() -> Self {
        Page {
            items: Vec::new(),
            next: None,
        }
    }
}

/// Parameters for a commit listing call.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitQuery {
    pub repository: Repository,
    /// `None` lists the provider's default history for the repository.
    pub branch: Option<String>,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// Errors a provider client can signal. The variant decides the retry policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("could not decode provider response: {0}")]
    Decode(String),

    #[error("provider error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("invalid provider URL: {0}")]
    InvalidUrl(String),
}

impl ProviderError {
    /// Rate limiting, temporary unavailability and transport failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Unavailable(_)
                | ProviderError::Network(_)
        )
    }

    /// Delay requested by the provider, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Capability interface implemented once per SCM provider.
///
/// All listings are newest-first where the provider supports ordering; commit listings must be
/// reverse-chronological so the pagination controller can stop once a page falls entirely
/// before the window.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// List one page of repositories in the scope.
    async fn list_repositories(
        &self,
        scope: &Scope,
        cursor: Option<PageCursor>,
    ) -> Result<Page<Repository>, ProviderError>;

    /// List one page of branch names for a repository.
    async fn list_branches(
        &self,
        repository: &Repository,
        cursor: Option<PageCursor>,
    ) -> Result<Page<String>, ProviderError>;

    /// List one page of commits, newest first.
    async fn list_commits(
        &self,
        query: CommitQuery,
        cursor: Option<PageCursor>,
    ) -> Result<Page<CommitRecord>, ProviderError>;
}
