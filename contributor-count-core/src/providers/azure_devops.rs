//! Azure DevOps Git REST API, scoped to one project of an organization.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::HeaderMap;
use reqwest::Url;
use serde::Deserialize;
use tracing::warn;

use super::http::{endpoint, parse_base, HttpTransport};
use super::Credentials;
use crate::contract::{
    CommitAuthor, CommitQuery, CommitRecord, Page, PageCursor, ProviderClient, ProviderError,
    Repository, Scope,
};

pub const DEFAULT_BASE_URL: &str = "https://dev.azure.com";
const API_VERSION: &str = "7.1";
const TOP: usize = 100;
const HEADS: &str = "refs/heads/";

#[derive(Debug, Deserialize)]
struct ValueList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepoDto {
    id: String,
    name: String,
    default_branch: Option<String>,
    #[serde(default)]
    is_disabled: bool,
}

#[derive(Debug, Deserialize)]
struct RefDto {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitDto {
    commit_id: String,
    author: Option<GitUserDate>,
    committer: Option<GitUserDate>,
}

#[derive(Debug, Default, Deserialize)]
struct GitUserDate {
    name: Option<String>,
    email: Option<String>,
    date: Option<DateTime<Utc>>,
}

/// The organization URL for an organization given either by name or by URL.
fn organization_url(org: &str, base_url: Option<&str>) -> String {
    if org.starts_with("http://") || org.starts_with("https://") {
        return org.trim_end_matches('/').to_string();
    }
    let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
    format!("{base}/{org}")
}

fn strip_heads(name: &str) -> String {
    name.strip_prefix(HEADS).unwrap_or(name).to_string()
}

fn continuation(headers: &HeaderMap) -> Option<PageCursor> {
    headers
        .get("x-ms-continuationtoken")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| PageCursor(v.to_string()))
}

fn to_record(dto: CommitDto, repository: &str) -> Option<CommitRecord> {
    let committed = dto.committer.and_then(|c| c.date);
    // A commit without an author stays in the history and is counted as unattributed.
    let author = dto.author.unwrap_or_default();
    let Some(timestamp) = author.date.or(committed) else {
        warn!(repository, sha = %dto.commit_id, "Commit has no author or committer date, skipping");
        return None;
    };
    Some(CommitRecord {
        timestamp,
        sha: dto.commit_id,
        repository: repository.to_string(),
        author: CommitAuthor {
            // No account handle on commits; the author name is the fallback key.
            username: author.name.clone(),
            aliases: Vec::new(),
            name: author.name,
            email: author.email,
            is_bot: false,
        },
        branch: None,
    })
}

pub struct AzureDevOpsClient {
    transport: HttpTransport,
    organization: Url,
    project: String,
}

impl AzureDevOpsClient {
    pub fn new(
        org: &str,
        project: &str,
        base_url: Option<&str>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        // Personal access tokens are sent as the basic-auth password with an empty user.
        let credentials = match credentials {
            Credentials::Token(token) => Credentials::Basic {
                username: String::new(),
                password: token,
            },
            other => other,
        };
        Ok(AzureDevOpsClient {
            transport: HttpTransport::new(credentials, timeout)?,
            organization: parse_base(&organization_url(org, base_url))?,
            project: project.to_string(),
        })
    }

    fn git_url(&self, segments: &[&str], mut query: Vec<(&str, String)>) -> Url {
        query.push(("api-version", API_VERSION.into()));
        let mut path = vec![self.project.as_str(), "_apis", "git", "repositories"];
        path.extend_from_slice(segments);
        endpoint(&self.organization, &path, &query)
    }
}

#[async_trait]
impl ProviderClient for AzureDevOpsClient {
    async fn list_repositories(
        &self,
        scope: &Scope,
        _cursor: Option<PageCursor>,
    ) -> Result<Page<Repository>, ProviderError> {
        let url = self.git_url(&[], Vec::new());
        let body = self.transport.get_json::<ValueList<RepoDto>>(url).await?.body;
        Ok(Page::last(
            body.value
                .into_iter()
                .filter(|r| !r.is_disabled)
                .map(|r| Repository {
                    full_name: format!("{}/{}", self.project, r.name),
                    id: r.id,
                    name: r.name,
                    default_branch: r.default_branch.as_deref().map(strip_heads),
                    scope: scope.identifier.clone(),
                })
                .collect(),
        ))
    }

    async fn list_branches(
        &self,
        repository: &Repository,
        cursor: Option<PageCursor>,
    ) -> Result<Page<String>, ProviderError> {
        let mut query = vec![("filter", "heads/".to_string())];
        if let Some(PageCursor(token)) = cursor {
            query.push(("continuationToken", token));
        }
        let url = self.git_url(&[repository.id.as_str(), "refs"], query);
        let response = self.transport.get_json::<ValueList<RefDto>>(url).await?;
        Ok(Page {
            next: continuation(&response.headers),
            items: response
                .body
                .value
                .into_iter()
                .map(|r| strip_heads(&r.name))
                .collect(),
        })
    }

    async fn list_commits(
        &self,
        query: CommitQuery,
        cursor: Option<PageCursor>,
    ) -> Result<Page<CommitRecord>, ProviderError> {
        let skip: usize = cursor.and_then(|c| c.0.parse().ok()).unwrap_or(0);
        let mut params = vec![
            (
                "searchCriteria.fromDate",
                query.since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "searchCriteria.toDate",
                query.until.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("searchCriteria.$top", TOP.to_string()),
            ("searchCriteria.$skip", skip.to_string()),
        ];
        if let Some(branch) = &query.branch {
            params.push(("searchCriteria.itemVersion.version", branch.clone()));
            params.push(("searchCriteria.itemVersion.versionType", "branch".into()));
        }
        let url = self.git_url(&[query.repository.id.as_str(), "commits"], params);
        let body = self.transport.get_json::<ValueList<CommitDto>>(url).await?.body;
        let next = (body.value.len() == TOP).then(|| PageCursor((skip + TOP).to_string()));
        let full_name = &query.repository.full_name;
        Ok(Page {
            next,
            items: body
                .value
                .into_iter()
                .filter_map(|dto| to_record(dto, full_name))
                .collect(),
        })
    }
}
