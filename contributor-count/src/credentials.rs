//! Token resolution. The only place the process environment is read for secrets.
//!
//! Precedence: `--token`/`--username` flags (the token flag also reads `GIT_TOKEN`), then the
//! provider-specific variables.

use tracing::{info, warn};

use contributor_count_core::contract::ProviderKind;
use contributor_count_core::error::CountError;
use contributor_count_core::providers::Credentials;

fn from_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolves credentials from flags and the process environment.
pub fn resolve_credentials(
    kind: ProviderKind,
    scope: &str,
    token: Option<String>,
    username: Option<String>,
) -> Result<Credentials, CountError> {
    resolve_with(kind, scope, token, username, from_env)
}

/// Resolves credentials with an explicit variable lookup.
pub fn resolve_with(
    kind: ProviderKind,
    scope: &str,
    token: Option<String>,
    username: Option<String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, CountError> {
    let token = token.filter(|t| !t.trim().is_empty());
    let missing = |hint: &str| {
        CountError::auth(kind, scope, format!("no credentials provided; set {hint}"))
    };

    let credentials = match kind {
        ProviderKind::GitHub => match token.or_else(|| lookup("GITHUB_TOKEN")) {
            Some(token) => Credentials::Token(token),
            None => {
                warn!("No GitHub token found; using anonymous access with low rate limits and public repositories only");
                Credentials::Anonymous
            }
        },
        ProviderKind::GitLab => token
            .or_else(|| lookup("GITLAB_TOKEN"))
            .map(Credentials::Token)
            .ok_or_else(|| missing("--token, GIT_TOKEN or GITLAB_TOKEN"))?,
        ProviderKind::Bitbucket => {
            let username = username.or_else(|| lookup("BITBUCKET_USER"));
            let password = token.or_else(|| lookup("BITBUCKET_PASSWORD"));
            match (username, password) {
                (Some(username), Some(password)) => Credentials::Basic { username, password },
                _ => return Err(missing("BITBUCKET_USER and BITBUCKET_PASSWORD (app password)")),
            }
        }
        ProviderKind::BitbucketServer => {
            let username = username.or_else(|| lookup("BITBUCKET_SERVER_USER"));
            match username {
                Some(username) => {
                    let password = token
                        .or_else(|| lookup("BITBUCKET_SERVER_PASSWORD"))
                        .ok_or_else(|| missing("BITBUCKET_SERVER_PASSWORD"))?;
                    Credentials::Basic { username, password }
                }
                None => token
                    .or_else(|| lookup("BITBUCKET_SERVER_TOKEN"))
                    .map(Credentials::Token)
                    .ok_or_else(|| {
                        missing("BITBUCKET_SERVER_TOKEN, or BITBUCKET_SERVER_USER with BITBUCKET_SERVER_PASSWORD")
                    })?,
            }
        }
        ProviderKind::AzureDevOps => token
            .or_else(|| lookup("ADO_TOKEN"))
            .map(Credentials::Token)
            .ok_or_else(|| missing("--token, GIT_TOKEN or ADO_TOKEN"))?,
    };
    info!(provider = %kind, credentials = ?credentials, "Resolved credentials");
    Ok(credentials)
}
