//! Window & Pagination Controller.
//!
//! Drives a [`ProviderClient`] page by page, keeps only commits inside the [`TimeWindow`],
//! stops paginating once a page lies entirely before the window, and retries transient
//! provider failures with bounded exponential backoff. A repository whose fetch fails is
//! reported as a [`RepositoryFailure`] and never partially applied.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::contract::{
    CommitQuery, CommitRecord, PageCursor, ProviderClient, ProviderError, Repository, Scope,
};
use crate::window::TimeWindow;

/// Which branches of a repository are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchScope {
    /// Every branch. Counts authors whose work only lives on unmerged branches.
    AllBranches,
    /// Only the repository's designated default branch.
    DefaultBranchOnly,
}

impl BranchScope {
    pub fn from_flag(default_branch_only: bool) -> Self {
        if default_branch_only {
            BranchScope::DefaultBranchOnly
        } else {
            BranchScope::AllBranches
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound for any single wait, including provider-requested ones.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        RetryPolicy {
            max_retries,
            ..Default::default()
        }
    }

    /// Provider hint if given, otherwise `base_delay * 2^attempt`; capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let delay = hint.unwrap_or_else(|| {
            self.base_delay
                .saturating_mul(2u32.saturating_pow(attempt.min(16)))
        });
        delay.min(self.max_delay)
    }
}

/// Runs `call` until it succeeds, fails permanently, or exhausts the retry budget.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt, e.retry_after());
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient provider error, retrying same page"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A repository whose commits could not be retrieved. Excluded from all totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryFailure {
    pub repository: String,
    pub reason: String,
}

/// Everything retrieved for one repository, already restricted to the window
/// and deduplicated by SHA across branches.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryHistory {
    pub repository: Repository,
    pub branches: Vec<String>,
    pub commits: Vec<CommitRecord>,
    pub pages: usize,
}

/// Lazily walks one branch's commit listing, one page at a time.
pub struct CommitPager<'a, C: ProviderClient + ?Sized> {
    client: &'a C,
    query: CommitQuery,
    window: TimeWindow,
    retry: &'a RetryPolicy,
    cursor: Option<PageCursor>,
    done: bool,
    pages: usize,
}

impl<'a, C: ProviderClient + ?Sized> CommitPager<'a, C> {
    pub fn new(
        client: &'a C,
        repository: Repository,
        branch: Option<String>,
        window: TimeWindow,
        retry: &'a RetryPolicy,
    ) -> Self {
        CommitPager {
            client,
            query: CommitQuery {
                repository,
                branch,
                since: window.start,
                until: window.end,
            },
            window,
            retry,
            cursor: None,
            done: false,
            pages: 0,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// The next page's in-window commits, `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Option<Result<Vec<CommitRecord>, ProviderError>> {
        if self.done {
            return None;
        }
        let cursor = self.cursor.clone();
        let client = self.client;
        let query = &self.query;
        let result = with_retry(self.retry, "list_commits", || {
            client.list_commits(query.clone(), cursor.clone())
        })
        .await;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        self.pages += 1;

        let window = self.window;
        let entirely_older =
            !page.items.is_empty() && page.items.iter().all(|c| window.is_before(c.timestamp));
        let branch = self.query.branch.clone();
        let commits: Vec<CommitRecord> = page
            .items
            .into_iter()
            .filter(|c| window.contains(c.timestamp))
            .map(|mut c| {
                if c.branch.is_none() {
                    c.branch = branch.clone();
                }
                c
            })
            .collect();

        match page.next {
            Some(next) if !entirely_older && cursor.as_ref() != Some(&next) => {
                self.cursor = Some(next);
            }
            _ => {
                if entirely_older {
                    debug!(
                        repository = %self.query.repository.full_name,
                        pages = self.pages,
                        "Page lies before window, stopping pagination early"
                    );
                }
                self.done = true;
            }
        }
        Some(Ok(commits))
    }
}

/// Drives provider listings for one run.
pub struct WindowedFetcher<'a, C: ProviderClient + ?Sized> {
    client: &'a C,
    window: TimeWindow,
    branch_scope: BranchScope,
    retry: RetryPolicy,
}

impl<'a, C: ProviderClient + ?Sized> WindowedFetcher<'a, C> {
    pub fn new(
        client: &'a C,
        window: TimeWindow,
        branch_scope: BranchScope,
        retry: RetryPolicy,
    ) -> Self {
        WindowedFetcher {
            client,
            window,
            branch_scope,
            retry,
        }
    }

    /// All repositories of the scope, in provider order.
    pub async fn list_repositories(&self, scope: &Scope) -> Result<Vec<Repository>, ProviderError> {
        let client = self.client;
        let mut repositories = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        loop {
            let current = cursor.clone();
            let page = with_retry(&self.retry, "list_repositories", || {
                client.list_repositories(scope, current.clone())
            })
            .await?;
            repositories.extend(page.items);
            match page.next {
                Some(next) if current.as_ref() != Some(&next) => cursor = Some(next),
                _ => break,
            }
        }
        info!(scope = %scope.identifier, count = repositories.len(), "Listed repositories");
        Ok(repositories)
    }

    /// Branches to scan; `None` means the provider's default history.
    pub async fn branches_for(
        &self,
        repository: &Repository,
    ) -> Result<Vec<Option<String>>, ProviderError> {
        if self.branch_scope == BranchScope::DefaultBranchOnly {
            return Ok(vec![repository.default_branch.clone()]);
        }
        let client = self.client;
        let mut names = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        loop {
            let current = cursor.clone();
            let page = with_retry(&self.retry, "list_branches", || {
                client.list_branches(repository, current.clone())
            })
            .await?;
            names.extend(page.items);
            match page.next {
                Some(next) if current.as_ref() != Some(&next) => cursor = Some(next),
                _ => break,
            }
        }
        if names.is_empty() {
            return Ok(vec![None]);
        }
        Ok(names.into_iter().map(Some).collect())
    }

    /// Fetches one repository completely or reports why it could not be fetched.
    pub async fn fetch_repository(
        &self,
        repository: Repository,
    ) -> Result<RepositoryHistory, RepositoryFailure> {
        let full_name = repository.full_name.clone();
        let fail = |stage: &str, e: ProviderError| {
            let reason = if e.is_transient() {
                format!("{stage}: {e} (gave up after {} retries)", self.retry.max_retries)
            } else {
                format!("{stage}: {e}")
            };
            warn!(repository = %full_name, reason = %reason, "Repository fetch failed");
            RepositoryFailure {
                repository: full_name.clone(),
                reason,
            }
        };

        let branches = self
            .branches_for(&repository)
            .await
            .map_err(|e| fail("listing branches", e))?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut commits = Vec::new();
        let mut pages = 0;
        for branch in &branches {
            let mut pager = CommitPager::new(
                self.client,
                repository.clone(),
                branch.clone(),
                self.window,
                &self.retry,
            );
            while let Some(page) = pager.next_page().await {
                let page = page.map_err(|e| fail("listing commits", e))?;
                commits.extend(page.into_iter().filter(|c| seen.insert(c.sha.clone())));
            }
            pages += pager.pages_fetched();
        }

        debug!(
            repository = %repository.full_name,
            branches = branches.len(),
            pages,
            commits = commits.len(),
            "Fetched repository history"
        );
        Ok(RepositoryHistory {
            branches: branches.into_iter().flatten().collect(),
            repository,
            commits,
            pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3, None), Duration::from_millis(500));
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(60))),
            Duration::from_millis(500)
        );
    }

    #[tokio::test]
    async fn with_retry_gives_up_after_budget() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let mut calls = 0;
        let result: Result<(), ProviderError> = with_retry(&policy, "test", || {
            calls += 1;
            async { Err(ProviderError::Unavailable("503".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn with_retry_does_not_retry_permanent_errors() {
        let policy = RetryPolicy::with_max_retries(3);
        let mut calls = 0;
        let result: Result<(), ProviderError> = with_retry(&policy, "test", || {
            calls += 1;
            async { Err(ProviderError::NotFound("gone".into())) }
        })
        .await;
        assert_eq!(result, Err(ProviderError::NotFound("gone".into())));
        assert_eq!(calls, 1);
    }
}
