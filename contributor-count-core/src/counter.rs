//! Top-level run: list → filter → fetch → aggregate for one scope.
//!
//! # Responsibilities
//! - Validates the configuration before touching the network (config errors come first)
//! - Lists the scope's repositories; an authentication failure here ends the run with
//!   guidance on the permissions the token needs
//! - Fetches included repositories with bounded concurrency; the driving task is the only
//!   writer to the [`Aggregator`], applying each repository's history whole
//! - Isolates repository failures: they are recorded and the run continues
//! - Honours a [`CancelFlag`] at repository granularity
//!
//! # Callable From
//! - The CLI crate and integration tests, with any [`ProviderClient`] (the HTTP clients in
//!   [`crate::providers`] or a `MockProviderClient`)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::aggregate::{AggregationState, Aggregator};
use crate::config::CountConfig;
use crate::contract::{ProviderClient, ProviderError};
use crate::error::CountError;
use crate::fetch::{BranchScope, RepositoryFailure, RepositoryHistory, RetryPolicy, WindowedFetcher};
use crate::window::TimeWindow;

/// Externally requested stop. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum Outcome {
    Fetched(RepositoryHistory),
    Failed(RepositoryFailure),
    Skipped,
}

/// Counts the distinct contributors of `config`'s scope within `window`.
///
/// Only configuration, authentication and repository-listing failures are errors; everything
/// that goes wrong for a single repository ends up in
/// [`AggregationState::failed_repositories`].
pub async fn count_contributors<C>(
    client: &C,
    config: &CountConfig,
    window: TimeWindow,
    cancel: &CancelFlag,
) -> Result<AggregationState, CountError>
where
    C: ProviderClient + ?Sized,
{
    let filters = config.validate()?;
    let scope = config.scope();
    info!(
        provider = %scope.provider,
        scope = %scope.identifier,
        start = %window.start,
        end = %window.end,
        "Counting contributors"
    );

    let fetcher = WindowedFetcher::new(
        client,
        window,
        BranchScope::from_flag(config.scan.default_branch_only),
        RetryPolicy::with_max_retries(config.scan.max_retries),
    );

    let mut repositories = match fetcher.list_repositories(&scope).await {
        Ok(repositories) => repositories,
        Err(ProviderError::Auth(message)) => {
            error!(scope = %scope.identifier, error = %message, "Authentication failed listing repositories");
            return Err(CountError::auth(scope.provider, &scope.identifier, message));
        }
        Err(e) => {
            error!(scope = %scope.identifier, error = ?e, "Listing repositories failed");
            return Err(CountError::ScopeUnavailable {
                scope: scope.identifier.clone(),
                source: e,
            });
        }
    };

    if let Some(limit) = config.scan.max_repositories {
        if repositories.len() > limit {
            info!(limit, listed = repositories.len(), "Limiting repositories scanned");
            repositories.truncate(limit);
        }
    }

    let mut aggregator = Aggregator::new(filters);
    let mut included = Vec::with_capacity(repositories.len());
    for repository in repositories {
        if aggregator.filters().is_repository_included(&repository) {
            included.push(repository);
        } else {
            aggregator.record_excluded_repository(&repository.full_name);
        }
    }
    info!(included = included.len(), "Scanning repositories");

    let fetcher = &fetcher;
    let mut outcomes = stream::iter(included)
        .map(|repository| async move {
            if cancel.is_cancelled() {
                return Outcome::Skipped;
            }
            match fetcher.fetch_repository(repository).await {
                Ok(history) => Outcome::Fetched(history),
                Err(failure) => Outcome::Failed(failure),
            }
        })
        .buffer_unordered(config.scan.concurrency);

    while let Some(outcome) = outcomes.next().await {
        if cancel.is_cancelled() {
            warn!("Run cancelled, unfinished repositories are dropped");
            aggregator.mark_cancelled();
            break;
        }
        match outcome {
            Outcome::Fetched(history) => {
                aggregator.ingest(history);
            }
            Outcome::Failed(failure) => aggregator.record_failure(failure),
            Outcome::Skipped => {}
        }
    }

    let state = aggregator.finish();
    info!(
        contributors = state.total_contributors(),
        repositories = state.total_repositories(),
        commits = state.total_commits(),
        failed = state.failed_repositories.len(),
        cancelled = state.cancelled,
        "Finished counting"
    );
    Ok(state)
}
