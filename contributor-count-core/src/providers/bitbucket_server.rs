//! Bitbucket Server / Data Center REST 1.0 (`start`/`limit` paging).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Url;
use serde::Deserialize;
use tracing::warn;

use super::http::{endpoint, parse_base, HttpTransport};
use super::Credentials;
use crate::contract::{
    CommitAuthor, CommitQuery, CommitRecord, Page, PageCursor, ProviderClient, ProviderError,
    Repository, Scope,
};

const LIMIT: &str = "100";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paged<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    #[serde(default = "last_page")]
    is_last_page: bool,
    next_page_start: Option<u64>,
}

fn last_page() -> bool {
    true
}

impl<T> Paged<T> {
    fn next(&self, start: u64) -> Option<PageCursor> {
        if self.is_last_page || self.values.is_empty() {
            return None;
        }
        let next = self
            .next_page_start
            .unwrap_or(start + self.values.len() as u64);
        Some(PageCursor(next.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RepoDto {
    slug: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchDto {
    display_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitDto {
    id: String,
    author: Option<PersonDto>,
    /// Milliseconds since the Unix epoch.
    author_timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonDto {
    name: Option<String>,
    email_address: Option<String>,
    slug: Option<String>,
    display_name: Option<String>,
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn to_record(dto: CommitDto, repository: &str) -> Option<CommitRecord> {
    let Some(timestamp) = from_millis(dto.author_timestamp) else {
        warn!(repository, sha = %dto.id, millis = dto.author_timestamp, "Commit timestamp out of range, skipping");
        return None;
    };
    let author = match dto.author {
        Some(p) => CommitAuthor {
            username: p.slug.or_else(|| p.name.clone()),
            aliases: p.name.iter().cloned().collect(),
            name: p.display_name.or(p.name),
            email: p.email_address,
            is_bot: false,
        },
        None => CommitAuthor::default(),
    };
    Some(CommitRecord {
        sha: dto.id,
        repository: repository.to_string(),
        author,
        timestamp,
        branch: None,
    })
}

fn start_of(cursor: &Option<PageCursor>) -> u64 {
    cursor
        .as_ref()
        .and_then(|c| c.0.parse().ok())
        .unwrap_or(0)
}

pub struct BitbucketServerClient {
    transport: HttpTransport,
    base: Url,
}

impl BitbucketServerClient {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(BitbucketServerClient {
            transport: HttpTransport::new(credentials, timeout)?,
            base: parse_base(base_url)?,
        })
    }

    fn url(&self, segments: &[&str], mut query: Vec<(&str, String)>, start: u64) -> Url {
        query.push(("limit", LIMIT.into()));
        query.push(("start", start.to_string()));
        let mut path = vec!["rest", "api", "1.0", "projects"];
        path.extend_from_slice(segments);
        endpoint(&self.base, &path, &query)
    }
}

#[async_trait]
impl ProviderClient for BitbucketServerClient {
    async fn list_repositories(
        &self,
        scope: &Scope,
        cursor: Option<PageCursor>,
    ) -> Result<Page<Repository>, ProviderError> {
        let start = start_of(&cursor);
        let url = self.url(&[scope.identifier.as_str(), "repos"], Vec::new(), start);
        let body = self.transport.get_json::<Paged<RepoDto>>(url).await?.body;
        Ok(Page {
            next: body.next(start),
            items: body
                .values
                .into_iter()
                .map(|r| Repository {
                    full_name: format!("{}/{}", scope.identifier, r.slug),
                    id: r.slug,
                    name: r.name,
                    default_branch: None,
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
        let start = start_of(&cursor);
        let url = self.url(
            &[
                repository.scope.as_str(),
                "repos",
                repository.id.as_str(),
                "branches",
            ],
            Vec::new(),
            start,
        );
        let body = self.transport.get_json::<Paged<BranchDto>>(url).await?.body;
        Ok(Page {
            next: body.next(start),
            items: body.values.into_iter().map(|b| b.display_id).collect(),
        })
    }

    async fn list_commits(
        &self,
        query: CommitQuery,
        cursor: Option<PageCursor>,
    ) -> Result<Page<CommitRecord>, ProviderError> {
        let start = start_of(&cursor);
        let mut params = Vec::new();
        if let Some(branch) = &query.branch {
            params.push(("until", format!("refs/heads/{branch}")));
        }
        let repository = &query.repository;
        let url = self.url(
            &[
                repository.scope.as_str(),
                "repos",
                repository.id.as_str(),
                "commits",
            ],
            params,
            start,
        );
        let body = self.transport.get_json::<Paged<CommitDto>>(url).await?.body;
        let next = body.next(start);
        Ok(Page {
            next,
            items: body
                .values
                .into_iter()
                .filter_map(|dto| to_record(dto, &repository.full_name))
                .collect(),
        })
    }
}
