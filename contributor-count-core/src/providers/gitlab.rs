//! GitLab REST v4. Groups are scanned with their subgroups; pages are numbered and the next
//! page number arrives in the `X-Next-Page` header.

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

pub const DEFAULT_BASE_URL: &str = "https://gitlab.com";
const PER_PAGE: &str = "100";

#[derive(Debug, Deserialize)]
struct ProjectDto {
    id: u64,
    name: String,
    path_with_namespace: String,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BranchDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CommitDto {
    id: String,
    author_name: Option<String>,
    author_email: Option<String>,
    authored_date: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
}

fn next_page(headers: &HeaderMap) -> Option<PageCursor> {
    headers
        .get("x-next-page")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| PageCursor(v.to_string()))
}

fn to_record(dto: CommitDto, repository: &str) -> Option<CommitRecord> {
    let Some(timestamp) = dto.authored_date.or(dto.created_at) else {
        warn!(repository, sha = %dto.id, "Commit has no authored or created date, skipping");
        return None;
    };
    Some(CommitRecord {
        timestamp,
        sha: dto.id,
        repository: repository.to_string(),
        author: CommitAuthor {
            // GitLab commits carry no account handle; the author name is the fallback key.
            username: dto.author_name.clone(),
            aliases: Vec::new(),
            name: dto.author_name,
            email: dto.author_email,
            is_bot: false,
        },
        branch: None,
    })
}

pub struct GitLabClient {
    transport: HttpTransport,
    base: Url,
}

impl GitLabClient {
    pub fn new(
        base_url: Option<&str>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(GitLabClient {
            transport: HttpTransport::new(credentials, timeout)?,
            base: parse_base(base_url.unwrap_or(DEFAULT_BASE_URL))?,
        })
    }

    fn url(&self, segments: &[&str], mut query: Vec<(&str, String)>, cursor: Option<PageCursor>) -> Url {
        let page = cursor.map(|c| c.0).unwrap_or_else(|| "1".into());
        query.push(("per_page", PER_PAGE.into()));
        query.push(("page", page));
        let mut path = vec!["api", "v4"];
        path.extend_from_slice(segments);
        endpoint(&self.base, &path, &query)
    }
}

#[async_trait]
impl ProviderClient for GitLabClient {
    async fn list_repositories(
        &self,
        scope: &Scope,
        cursor: Option<PageCursor>,
    ) -> Result<Page<Repository>, ProviderError> {
        let url = self.url(
            &["groups", scope.identifier.as_str(), "projects"],
            vec![("include_subgroups", "true".into()), ("archived", "false".into())],
            cursor,
        );
        let response = self.transport.get_json::<Vec<ProjectDto>>(url).await?;
        Ok(Page {
            next: next_page(&response.headers),
            items: response
                .body
                .into_iter()
                .map(|p| Repository {
                    id: p.id.to_string(),
                    name: p.name,
                    full_name: p.path_with_namespace,
                    default_branch: p.default_branch,
                    scope: scope.identifier.clone(),
                })
                .collect(),
        })
    }

    async fn list_branches(
        &self,
        repository: &Repository,
        cursor: Option<PageCursor>,
    ) -> Result<Page<String>, ProviderError> {
        let url = self.url(
            &["projects", repository.id.as_str(), "repository", "branches"],
            Vec::new(),
            cursor,
        );
        let response = self.transport.get_json::<Vec<BranchDto>>(url).await?;
        Ok(Page {
            next: next_page(&response.headers),
            items: response.body.into_iter().map(|b| b.name).collect(),
        })
    }

    async fn list_commits(
        &self,
        query: CommitQuery,
        cursor: Option<PageCursor>,
    ) -> Result<Page<CommitRecord>, ProviderError> {
        let mut params = vec![
            ("since", query.since.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("until", query.until.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ];
        if let Some(branch) = &query.branch {
            params.push(("ref_name", branch.clone()));
        }
        let url = self.url(
            &["projects", query.repository.id.as_str(), "repository", "commits"],
            params,
            cursor,
        );
        let response = self.transport.get_json::<Vec<CommitDto>>(url).await?;
        let full_name = &query.repository.full_name;
        Ok(Page {
            next: next_page(&response.headers),
            items: response
                .body
                .into_iter()
                .filter_map(|dto| to_record(dto, full_name))
                .collect(),
        })
    }
}
