//! The structured configuration document for one run.
//!
//! Secrets are not part of it; credentials are resolved by the caller and passed separately.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contract::{ProviderKind, Scope};
use crate::error::ConfigError;
use crate::filter::FilterEngine;

pub const DEFAULT_WINDOW_DAYS: u32 = 90;
/// About a century; no hosted provider keeps history older than that.
pub const MAX_WINDOW_DAYS: u32 = 36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub repositories: RepositoryRules,
    #[serde(default)]
    pub contributors: ContributorRules,
    #[serde(default)]
    pub scan: ScanOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Org, group, workspace or project key, depending on provider.
    pub org: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Azure DevOps only: the project inside the organization.
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRules {
    #[serde(default)]
    pub include: Vec<RepoPattern>,
    #[serde(default)]
    pub exclude: Vec<RepoPattern>,
}

/// One repository rule; any populated field that matches makes the rule match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoPattern {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub exact: Option<String>,
    #[serde(default)]
    pub names: Vec<String>,
}

impl RepoPattern {
    pub fn glob(pattern: &str) -> Self {
        RepoPattern {
            pattern: Some(pattern.to_string()),
            ..Default::default()
        }
    }

    pub fn exact(name: &str) -> Self {
        RepoPattern {
            exact: Some(name.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributorRules {
    #[serde(default)]
    pub include: Vec<ContributorRule>,
    #[serde(default)]
    pub exclude: Vec<ContributorRule>,
    #[serde(default)]
    pub exclude_bots: bool,
}

/// One contributor rule; any populated field that matches makes the rule match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributorRule {
    /// Glob tested against the username and the email.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Exact usernames.
    #[serde(default)]
    pub users: Vec<String>,
    /// Globs tested against the email.
    #[serde(default)]
    pub emails: Vec<String>,
    /// Globs tested against the domain part of the email.
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub window_days: u32,
    pub default_branch_only: bool,
    pub max_repositories: Option<usize>,
    pub concurrency: usize,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    pub fail_on_repository_error: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            window_days: DEFAULT_WINDOW_DAYS,
            default_branch_only: false,
            max_repositories: None,
            concurrency: 1,
            max_retries: 5,
            request_timeout_secs: 30,
            fail_on_repository_error: false,
        }
    }
}

impl CountConfig {
    /// A config with default rules and options for the given provider and scope.
    pub fn for_scope(kind: ProviderKind, org: &str) -> Self {
        CountConfig {
            provider: ProviderConfig {
                kind,
                org: org.to_string(),
                url: None,
                project: None,
            },
            repositories: RepositoryRules::default(),
            contributors: ContributorRules::default(),
            scan: ScanOptions::default(),
        }
    }

    /// The scope this config scans. Azure DevOps scans a project inside an organization.
    pub fn scope(&self) -> Scope {
        let identifier = match (&self.provider.kind, &self.provider.project) {
            (ProviderKind::AzureDevOps, Some(project)) => {
                // The organization may be given as its URL.
                let org = self.provider.org.trim_end_matches('/');
                let org = org.rsplit('/').next().unwrap_or(org);
                format!("{org}/{project}")
            }
            _ => self.provider.org.clone(),
        };
        Scope {
            provider: self.provider.kind,
            identifier,
            base_url: self.provider.url.clone(),
        }
    }

    /// Checks everything that can be checked without the network, including compiling filters.
    pub fn validate(&self) -> Result<FilterEngine, ConfigError> {
        if self.provider.org.trim().is_empty() {
            return Err(ConfigError::MissingField("provider.org"));
        }
        if self.provider.kind == ProviderKind::AzureDevOps
            && self
                .provider
                .project
                .as_deref()
                .map_or(true, |p| p.trim().is_empty())
        {
            return Err(ConfigError::MissingField("provider.project"));
        }
        if self.provider.kind == ProviderKind::BitbucketServer && self.provider.url.is_none() {
            return Err(ConfigError::MissingField("provider.url"));
        }
        if let Some(url) = &self.provider.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field: "provider.url",
                    reason: format!("'{url}' is not an http(s) URL"),
                });
            }
        }
        if self.scan.window_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan.window_days",
                reason: "must be at least 1".into(),
            });
        }
        if self.scan.window_days > MAX_WINDOW_DAYS {
            return Err(ConfigError::InvalidValue {
                field: "scan.window_days",
                reason: format!("must be at most {MAX_WINDOW_DAYS}"),
            });
        }
        if self.scan.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan.concurrency",
                reason: "must be at least 1".into(),
            });
        }
        FilterEngine::compile(&self.repositories, &self.contributors)
    }

    pub fn trace_loaded(&self) {
        info!(
            provider = %self.provider.kind,
            org = %self.provider.org,
            window_days = self.scan.window_days,
            default_branch_only = self.scan.default_branch_only,
            repository_rules = self.repositories.include.len() + self.repositories.exclude.len(),
            contributor_rules = self.contributors.include.len() + self.contributors.exclude.len(),
            "Loaded CountConfig"
        );
        debug!(?self, "CountConfig loaded (full debug)");
    }
}
