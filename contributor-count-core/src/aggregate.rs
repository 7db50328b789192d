//! Identity Resolution & Aggregation Engine.
//!
//! Commit records are keyed by [`Identity`] (lowercased email, else the provider's stable
//! username, else the author name) and folded into one [`Contributor`] per key. Two records
//! are the same contributor exactly when their keys are equal; nothing else is merged.
//!
//! The [`Aggregator`] is the single writer of the contributor mapping. Repository histories
//! are applied whole, so a repository contributes all of its in-window commits or none.
//! Per-repository statistics and all totals are derived from the contributor mapping in
//! [`Aggregator::finish`], which makes them consistent by construction and independent of
//! the order repositories were applied in.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::contract::CommitAuthor;
use crate::fetch::{RepositoryFailure, RepositoryHistory};
use crate::filter::FilterEngine;

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// The deduplication identity of a commit author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub key: String,
    /// Lowercased.
    pub email: Option<String>,
    pub username: Option<String>,
    pub aliases: Vec<String>,
    pub name: Option<String>,
    pub is_bot: bool,
}

impl Identity {
    /// `None` when the provider gave no email, username or name at all.
    pub fn resolve(author: &CommitAuthor) -> Option<Identity> {
        let email = non_empty(&author.email).map(|e| e.to_lowercase());
        let username = non_empty(&author.username);
        let name = non_empty(&author.name);
        let key = email
            .clone()
            .or_else(|| username.clone())
            .or_else(|| name.clone())?;
        let aliases = author
            .aliases
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty() && Some(*a) != username.as_deref())
            .map(String::from)
            .collect();
        Some(Identity {
            key,
            email,
            username,
            aliases,
            name,
            is_bot: author.is_bot,
        })
    }

    /// Every account handle filters should test: the username and aliases, or the author
    /// name when the provider gave no username.
    pub fn handles(&self) -> impl Iterator<Item = &str> {
        let primary = self.username.as_deref().or(self.name.as_deref());
        primary
            .into_iter()
            .chain(self.aliases.iter().map(String::as_str))
    }

    pub fn looks_like_bot(&self) -> bool {
        self.is_bot
            || self
                .handles()
                .any(|h| h.to_lowercase().ends_with("[bot]"))
    }
}

/// All counted commits sharing one identity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contributor {
    pub key: String,
    /// Author name on the contributor's earliest commit.
    pub display_name: String,
    pub email: Option<String>,
    pub usernames: BTreeSet<String>,
    pub commit_count: u64,
    /// Commit count per repository full name.
    pub repositories: BTreeMap<String, u64>,
    pub first_commit: DateTime<Utc>,
    pub last_commit: DateTime<Utc>,
}

impl Contributor {
    fn seed(identity: &Identity, timestamp: DateTime<Utc>) -> Self {
        Contributor {
            key: identity.key.clone(),
            display_name: identity.name.clone().unwrap_or_else(|| identity.key.clone()),
            email: identity.email.clone(),
            usernames: BTreeSet::new(),
            commit_count: 0,
            repositories: BTreeMap::new(),
            first_commit: timestamp,
            last_commit: timestamp,
        }
    }

    fn record(&mut self, identity: &Identity, repository: &str, timestamp: DateTime<Utc>) {
        self.commit_count += 1;
        *self.repositories.entry(repository.to_string()).or_insert(0) += 1;
        if let Some(username) = &identity.username {
            self.usernames.insert(username.clone());
        }
        self.usernames.extend(identity.aliases.iter().cloned());
        let candidate = identity.name.clone().unwrap_or_else(|| identity.key.clone());
        if timestamp < self.first_commit
            || (timestamp == self.first_commit && candidate < self.display_name)
        {
            self.display_name = candidate;
        }
        self.first_commit = self.first_commit.min(timestamp);
        self.last_commit = self.last_commit.max(timestamp);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryStats {
    pub name: String,
    pub commit_count: u64,
    pub contributors: BTreeSet<String>,
}

impl RepositoryStats {
    pub fn contributor_count(&self) -> usize {
        self.contributors.len()
    }
}

/// What applying one repository changed; used for progress logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestSummary {
    pub counted_commits: u64,
    pub excluded_commits: u64,
    pub unattributed_commits: u64,
}

#[derive(Debug)]
pub struct Aggregator {
    filters: FilterEngine,
    contributors: BTreeMap<String, Contributor>,
    excluded_contributors: BTreeSet<String>,
    excluded_repositories: BTreeSet<String>,
    failed_repositories: BTreeMap<String, String>,
    scanned_repositories: BTreeSet<String>,
    unattributed_commits: u64,
    cancelled: bool,
}

impl Aggregator {
    pub fn new(filters: FilterEngine) -> Self {
        Aggregator {
            filters,
            contributors: BTreeMap::new(),
            excluded_contributors: BTreeSet::new(),
            excluded_repositories: BTreeSet::new(),
            failed_repositories: BTreeMap::new(),
            scanned_repositories: BTreeSet::new(),
            unattributed_commits: 0,
            cancelled: false,
        }
    }

    pub fn filters(&self) -> &FilterEngine {
        &self.filters
    }

    pub fn record_excluded_repository(&mut self, full_name: &str) {
        debug!(repository = %full_name, "Skipping excluded repository");
        self.excluded_repositories.insert(full_name.to_string());
    }

    pub fn record_failure(&mut self, failure: RepositoryFailure) {
        self.failed_repositories
            .insert(failure.repository, failure.reason);
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Applies one repository's history as a unit.
    pub fn ingest(&mut self, history: RepositoryHistory) -> IngestSummary {
        let repository = history.repository.full_name;
        let mut summary = IngestSummary::default();
        self.scanned_repositories.insert(repository.clone());

        for commit in &history.commits {
            let Some(identity) = Identity::resolve(&commit.author) else {
                debug!(repository = %repository, sha = %commit.sha, "Commit has no author identity");
                summary.unattributed_commits += 1;
                continue;
            };
            if !self.filters.is_contributor_included(&identity) {
                debug!(repository = %repository, identity = %identity.key, "Skipping excluded contributor");
                self.excluded_contributors.insert(identity.key.clone());
                summary.excluded_commits += 1;
                continue;
            }
            self.contributors
                .entry(identity.key.clone())
                .or_insert_with(|| Contributor::seed(&identity, commit.timestamp))
                .record(&identity, &repository, commit.timestamp);
            summary.counted_commits += 1;
        }

        self.unattributed_commits += summary.unattributed_commits;
        info!(
            repository = %repository,
            branches = history.branches.len(),
            counted = summary.counted_commits,
            excluded = summary.excluded_commits,
            unattributed = summary.unattributed_commits,
            "Aggregated repository"
        );
        summary
    }

    pub fn finish(self) -> AggregationState {
        let mut repositories: BTreeMap<String, RepositoryStats> = BTreeMap::new();
        for contributor in self.contributors.values() {
            for (name, count) in &contributor.repositories {
                let stats = repositories
                    .entry(name.clone())
                    .or_insert_with(|| RepositoryStats {
                        name: name.clone(),
                        commit_count: 0,
                        contributors: BTreeSet::new(),
                    });
                stats.commit_count += count;
                stats.contributors.insert(contributor.key.clone());
            }
        }
        AggregationState {
            contributors: self.contributors,
            repositories,
            excluded_contributors: self.excluded_contributors,
            excluded_repositories: self.excluded_repositories,
            failed_repositories: self.failed_repositories,
            scanned_repositories: self.scanned_repositories,
            unattributed_commits: self.unattributed_commits,
            cancelled: self.cancelled,
        }
    }
}

/// The finalized result of one run. Immutable; reports are projections of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationState {
    pub contributors: BTreeMap<String, Contributor>,
    /// Only repositories that yielded at least one counted commit.
    pub repositories: BTreeMap<String, RepositoryStats>,
    pub excluded_contributors: BTreeSet<String>,
    pub excluded_repositories: BTreeSet<String>,
    /// Repository full name to failure reason.
    pub failed_repositories: BTreeMap<String, String>,
    /// Repositories fetched successfully, whether or not they had counted commits.
    pub scanned_repositories: BTreeSet<String>,
    pub unattributed_commits: u64,
    pub cancelled: bool,
}

impl AggregationState {
    pub fn total_contributors(&self) -> usize {
        self.contributors.len()
    }

    pub fn total_commits(&self) -> u64 {
        self.contributors.values().map(|c| c.commit_count).sum()
    }

    pub fn total_repositories(&self) -> usize {
        self.repositories.len()
    }
}
