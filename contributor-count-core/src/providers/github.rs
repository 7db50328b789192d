//! GitHub REST v3 (github.com or an Enterprise `/api/v3` base URL).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, warn};

use super::http::{endpoint, next_link, parse_base, parse_cursor, HttpTransport};
use super::Credentials;
use crate::contract::{
    CommitAuthor, CommitQuery, CommitRecord, Page, PageCursor, ProviderClient, ProviderError,
    Repository, Scope,
};

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";
const PER_PAGE: &str = "100";

#[derive(Debug, Deserialize)]
struct RepoDto {
    name: String,
    full_name: String,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BranchDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CommitDto {
    sha: String,
    commit: CommitDetail,
    /// The linked GitHub account; absent when the commit email matches no account.
    author: Option<UserDto>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    author: Option<GitActor>,
    committer: Option<GitActor>,
}

#[derive(Debug, Deserialize)]
struct GitActor {
    name: Option<String>,
    email: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct UserDto {
    login: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn to_repository(dto: RepoDto, scope: &Scope) -> Repository {
    Repository {
        id: dto.full_name.clone(),
        name: dto.name,
        full_name: dto.full_name,
        default_branch: dto.default_branch,
        scope: scope.identifier.clone(),
    }
}

fn to_record(dto: CommitDto, repository: &str) -> Option<CommitRecord> {
    let Some(timestamp) = dto
        .commit
        .author
        .as_ref()
        .and_then(|a| a.date)
        .or_else(|| dto.commit.committer.as_ref().and_then(|c| c.date))
    else {
        warn!(repository, sha = %dto.sha, "Commit has no author or committer date, skipping");
        return None;
    };
    let actor = dto.commit.author;
    Some(CommitRecord {
        sha: dto.sha,
        repository: repository.to_string(),
        author: CommitAuthor {
            name: actor.as_ref().and_then(|a| a.name.clone()),
            email: actor.and_then(|a| a.email),
            is_bot: dto
                .author
                .as_ref()
                .is_some_and(|u| u.kind.as_deref() == Some("Bot")),
            username: dto.author.map(|u| u.login),
            aliases: Vec::new(),
        },
        timestamp,
        branch: None,
    })
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub struct GitHubClient {
    transport: HttpTransport,
    base: Url,
}

impl GitHubClient {
    pub fn new(
        base_url: Option<&str>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(GitHubClient {
            transport: HttpTransport::new(credentials, timeout)?,
            base: parse_base(base_url.unwrap_or(DEFAULT_BASE_URL))?,
        })
    }

    fn repo_segments(repository: &Repository) -> (String, String) {
        match repository.full_name.split_once('/') {
            Some((owner, name)) => (owner.to_string(), name.to_string()),
            None => (repository.scope.clone(), repository.name.clone()),
        }
    }

    fn first_or_cursor(
        &self,
        cursor: Option<PageCursor>,
        first: impl FnOnce() -> Url,
    ) -> Result<Url, ProviderError> {
        match cursor {
            Some(PageCursor(next)) => parse_cursor(&next),
            None => Ok(first()),
        }
    }
}

#[async_trait]
impl ProviderClient for GitHubClient {
    async fn list_repositories(
        &self,
        scope: &Scope,
        cursor: Option<PageCursor>,
    ) -> Result<Page<Repository>, ProviderError> {
        let url = self.first_or_cursor(cursor, || {
            endpoint(
                &self.base,
                &["orgs", scope.identifier.as_str(), "repos"],
                &[("type", "all".into()), ("per_page", PER_PAGE.into())],
            )
        })?;
        let response = self.transport.get_json::<Vec<RepoDto>>(url).await?;
        Ok(Page {
            next: next_link(&response.headers).map(PageCursor),
            items: response
                .body
                .into_iter()
                .map(|dto| to_repository(dto, scope))
                .collect(),
        })
    }

    async fn list_branches(
        &self,
        repository: &Repository,
        cursor: Option<PageCursor>,
    ) -> Result<Page<String>, ProviderError> {
        let (owner, name) = Self::repo_segments(repository);
        let url = self.first_or_cursor(cursor, || {
            endpoint(
                &self.base,
                &["repos", owner.as_str(), name.as_str(), "branches"],
                &[("per_page", PER_PAGE.into())],
            )
        })?;
        let response = self.transport.get_json::<Vec<BranchDto>>(url).await?;
        Ok(Page {
            next: next_link(&response.headers).map(PageCursor),
            items: response.body.into_iter().map(|b| b.name).collect(),
        })
    }

    async fn list_commits(
        &self,
        query: CommitQuery,
        cursor: Option<PageCursor>,
    ) -> Result<Page<CommitRecord>, ProviderError> {
        let (owner, name) = Self::repo_segments(&query.repository);
        let url = self.first_or_cursor(cursor, || {
            let mut params = vec![
                ("since", rfc3339(query.since)),
                ("until", rfc3339(query.until)),
                ("per_page", PER_PAGE.into()),
            ];
            if let Some(branch) = &query.branch {
                params.push(("sha", branch.clone()));
            }
            endpoint(&self.base, &["repos", owner.as_str(), name.as_str(), "commits"], &params)
        })?;

        let response = match self.transport.get_json::<Vec<CommitDto>>(url).await {
            Ok(response) => response,
            Err(ProviderError::Api { status: 409, .. }) => {
                debug!(repository = %query.repository.full_name, "Repository is empty");
                return Ok(Page::empty());
            }
            Err(e) => return Err(e),
        };
        let full_name = &query.repository.full_name;
        Ok(Page {
            next: next_link(&response.headers).map(PageCursor),
            items: response
                .body
                .into_iter()
                .filter_map(|dto| to_record(dto, full_name))
                .collect(),
        })
    }
}
