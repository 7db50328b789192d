//! Bitbucket Cloud REST 2.0. Paginated responses carry the next page URL in the body.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;

use super::http::{endpoint, parse_base, parse_cursor, HttpTransport};
use super::Credentials;
use crate::contract::{
    CommitAuthor, CommitQuery, CommitRecord, Page, PageCursor, ProviderClient, ProviderError,
    Repository, Scope,
};

pub const DEFAULT_BASE_URL: &str = "https://api.bitbucket.org/2.0";
const PAGE_LEN: &str = "100";

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoDto {
    slug: String,
    name: String,
    full_name: String,
    mainbranch: Option<BranchDto>,
}

#[derive(Debug, Deserialize)]
struct BranchDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CommitDto {
    hash: String,
    date: DateTime<Utc>,
    author: Option<AuthorDto>,
}

#[derive(Debug, Deserialize)]
struct AuthorDto {
    /// `Name <email>` as written in the commit.
    raw: Option<String>,
    user: Option<UserDto>,
}

#[derive(Debug, Deserialize)]
struct UserDto {
    account_id: Option<String>,
    nickname: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Splits a raw git author (`Name <email>`) into its parts.
fn parse_raw_author(raw: &str) -> (Option<String>, Option<String>) {
    static RAW: OnceLock<Option<Regex>> = OnceLock::new();
    let captures = RAW
        .get_or_init(|| Regex::new(r"^\s*(.*?)\s*<([^>]*)>\s*$").ok())
        .as_ref()
        .and_then(|re| re.captures(raw));
    let non_empty = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
    match captures {
        Some(c) => (
            c.get(1).and_then(|m| non_empty(m.as_str())),
            c.get(2).and_then(|m| non_empty(m.as_str())),
        ),
        None => (non_empty(raw), None),
    }
}

fn to_record(dto: CommitDto, repository: &str) -> CommitRecord {
    let (raw, user) = match dto.author {
        Some(a) => (a.raw, a.user),
        None => (None, None),
    };
    let (name, email) = raw.as_deref().map(parse_raw_author).unwrap_or((None, None));
    let is_bot = user
        .as_ref()
        .is_some_and(|u| u.kind.as_deref() == Some("app_user"));
    // The account id is the stable key; the nickname is the handle people write rules for.
    let (username, aliases) = match user {
        Some(u) => {
            let aliases = u.nickname.iter().cloned().collect();
            (u.account_id.or(u.nickname), aliases)
        }
        None => (None, Vec::new()),
    };
    CommitRecord {
        sha: dto.hash,
        repository: repository.to_string(),
        author: CommitAuthor {
            name,
            email,
            username,
            aliases,
            is_bot,
        },
        timestamp: dto.date,
        branch: None,
    }
}

pub struct BitbucketClient {
    transport: HttpTransport,
    base: Url,
}

impl BitbucketClient {
    pub fn new(
        base_url: Option<&str>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(BitbucketClient {
            transport: HttpTransport::new(credentials, timeout)?,
            base: parse_base(base_url.unwrap_or(DEFAULT_BASE_URL))?,
        })
    }

    fn target(
        &self,
        cursor: Option<PageCursor>,
        segments: &[&str],
        mut query: Vec<(&str, String)>,
    ) -> Result<Url, ProviderError> {
        if let Some(PageCursor(next)) = cursor {
            return parse_cursor(&next);
        }
        query.push(("pagelen", PAGE_LEN.into()));
        Ok(endpoint(&self.base, segments, &query))
    }
}

#[async_trait]
impl ProviderClient for BitbucketClient {
    async fn list_repositories(
        &self,
        scope: &Scope,
        cursor: Option<PageCursor>,
    ) -> Result<Page<Repository>, ProviderError> {
        let url = self.target(cursor, &["repositories", scope.identifier.as_str()], Vec::new())?;
        let response = self.transport.get_json::<Paginated<RepoDto>>(url).await?;
        Ok(Page {
            next: response.body.next.map(PageCursor),
            items: response
                .body
                .values
                .into_iter()
                .map(|r| Repository {
                    id: r.slug,
                    name: r.name,
                    full_name: r.full_name,
                    default_branch: r.mainbranch.map(|b| b.name),
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
        let url = self.target(
            cursor,
            &[
                "repositories",
                repository.scope.as_str(),
                repository.id.as_str(),
                "refs",
                "branches",
            ],
            Vec::new(),
        )?;
        let response = self.transport.get_json::<Paginated<BranchDto>>(url).await?;
        Ok(Page {
            next: response.body.next.map(PageCursor),
            items: response.body.values.into_iter().map(|b| b.name).collect(),
        })
    }

    async fn list_commits(
        &self,
        query: CommitQuery,
        cursor: Option<PageCursor>,
    ) -> Result<Page<CommitRecord>, ProviderError> {
        let mut params = Vec::new();
        if let Some(branch) = &query.branch {
            params.push(("include", branch.clone()));
        }
        let repository = &query.repository;
        let url = self.target(
            cursor,
            &[
                "repositories",
                repository.scope.as_str(),
                repository.id.as_str(),
                "commits",
            ],
            params,
        )?;
        let response = self.transport.get_json::<Paginated<CommitDto>>(url).await?;
        Ok(Page {
            next: response.body.next.map(PageCursor),
            items: response
                .body
                .values
                .into_iter()
                .map(|dto| to_record(dto, &repository.full_name))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Identity;
    use crate::config::{ContributorRule, ContributorRules, RepositoryRules};
    use crate::filter::FilterEngine;

    #[test]
    fn raw_author_is_split_into_name_and_email() {
        assert_eq!(
            parse_raw_author("Jane Doe <Jane@Acme.com>"),
            (Some("Jane Doe".into()), Some("Jane@Acme.com".into()))
        );
        assert_eq!(parse_raw_author("<ci@acme.com>"), (None, Some("ci@acme.com".into())));
        assert_eq!(parse_raw_author("jenkins"), (Some("jenkins".into()), None));
    }

    #[test]
    fn mapped_user_supplies_account_id() {
        let page: Paginated<CommitDto> = serde_json::from_str(
            r#"{"values":[{"hash":"77aa","date":"2026-09-15T12:00:00+00:00",
                "author":{"raw":"Jane Doe <jane@acme.com>",
                          "user":{"account_id":"557058:abc","nickname":"jane","type":"user"}}}],
                "next":"https://api.bitbucket.org/2.0/repositories/acme/app/commits?page=2"}"#,
        )
        .unwrap();
        assert!(page.next.is_some());
        let record = to_record(page.values.into_iter().next().unwrap(), "acme/app");
        assert_eq!(record.author.username.as_deref(), Some("557058:abc"));
        assert_eq!(record.author.aliases, vec!["jane".to_string()]);
        assert_eq!(record.author.email.as_deref(), Some("jane@acme.com"));
        assert!(!record.author.is_bot);
    }

    #[test]
    fn user_rules_see_the_nickname_behind_the_account_id() {
        let page: Paginated<CommitDto> = serde_json::from_str(
            r#"{"values":[{"hash":"88bb","date":"2026-09-16T08:00:00+00:00",
                "author":{"raw":"Deploy Bot <deploy@acme.com>",
                          "user":{"account_id":"557058:def","nickname":"deploybot","type":"user"}}}]}"#,
        )
        .unwrap();
        let record = to_record(page.values.into_iter().next().unwrap(), "acme/app");
        let identity = Identity::resolve(&record.author).unwrap();
        assert_eq!(identity.key, "deploy@acme.com");

        let by_user = FilterEngine::compile(
            &RepositoryRules::default(),
            &ContributorRules {
                exclude: vec![ContributorRule {
                    users: vec!["deploybot".into()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!by_user.is_contributor_included(&identity));

        let by_pattern = FilterEngine::compile(
            &RepositoryRules::default(),
            &ContributorRules {
                exclude: vec![ContributorRule {
                    pattern: Some("*bot".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!by_pattern.is_contributor_included(&identity));
    }

    #[test]
    fn last_page_has_no_next() {
        let page: Paginated<BranchDto> = serde_json::from_str(r#"{"values":[{"name":"main"}]}"#).unwrap();
        assert_eq!(page.next, None);
        assert_eq!(page.values.len(), 1);
    }
}
