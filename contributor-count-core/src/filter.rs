//! Filter Engine: repository and contributor include/exclude rules.
//!
//! Rules are compiled once from the configuration. Matching is case-insensitive. An entity is
//! kept when it matches some include rule (or no include rules exist) and matches no exclude
//! rule; exclusion always wins.

use std::collections::HashSet;

use globset::{GlobBuilder, GlobMatcher};

use crate::aggregate::Identity;
use crate::config::{ContributorRule, ContributorRules, RepoPattern, RepositoryRules};
use crate::contract::Repository;
use crate::error::ConfigError;

const BOT_SUFFIX: &str = "[bot]";

fn compile_glob(pattern: &str) -> Result<GlobMatcher, ConfigError> {
    GlobBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.kind().to_string(),
        })
}

fn compile_globs(patterns: &[String]) -> Result<Vec<GlobMatcher>, ConfigError> {
    patterns.iter().map(|p| compile_glob(p)).collect()
}

fn lowercase_set(values: &[String]) -> HashSet<String> {
    values.iter().map(|v| v.to_lowercase()).collect()
}

#[derive(Debug, Clone)]
struct RepoMatcher {
    glob: Option<GlobMatcher>,
    exact: Option<String>,
    names: HashSet<String>,
}

impl RepoMatcher {
    fn compile(rule: &RepoPattern) -> Result<Self, ConfigError> {
        Ok(RepoMatcher {
            glob: rule.pattern.as_deref().map(compile_glob).transpose()?,
            exact: rule.exact.as_ref().map(|e| e.to_lowercase()),
            names: lowercase_set(&rule.names),
        })
    }

    fn matches_name(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        self.glob.as_ref().is_some_and(|g| g.is_match(name))
            || self.exact.as_deref() == Some(lowered.as_str())
            || self.names.contains(&lowered)
    }

    fn matches(&self, repository: &Repository) -> bool {
        self.matches_name(&repository.name) || self.matches_name(&repository.full_name)
    }
}

#[derive(Debug, Clone)]
struct ContributorMatcher {
    pattern: Option<GlobMatcher>,
    users: HashSet<String>,
    emails: Vec<GlobMatcher>,
    domains: Vec<GlobMatcher>,
}

impl ContributorMatcher {
    fn compile(rule: &ContributorRule) -> Result<Self, ConfigError> {
        Ok(ContributorMatcher {
            pattern: rule.pattern.as_deref().map(compile_glob).transpose()?,
            users: lowercase_set(&rule.users),
            emails: compile_globs(&rule.emails)?,
            domains: compile_globs(&rule.domains)?,
        })
    }

    fn matches_user(&self, username: &str) -> bool {
        let lowered = username.to_lowercase();
        if self.users.contains(&lowered) {
            return true;
        }
        lowered
            .strip_suffix(BOT_SUFFIX)
            .is_some_and(|stripped| self.users.contains(stripped))
    }

    fn matches(&self, identity: &Identity) -> bool {
        let email = identity.email.as_deref();

        if let Some(glob) = &self.pattern {
            if identity.handles().any(|h| glob.is_match(h)) || email.is_some_and(|e| glob.is_match(e))
            {
                return true;
            }
        }
        if identity.handles().any(|h| self.matches_user(h)) {
            return true;
        }
        if let Some(email) = email {
            if self.emails.iter().any(|g| g.is_match(email)) {
                return true;
            }
            if let Some((_, domain)) = email.rsplit_once('@') {
                if self.domains.iter().any(|g| g.is_match(domain)) {
                    return true;
                }
            }
        }
        false
    }
}

/// Compiled repository and contributor rules. Pure and `Sync`; safe to share across tasks.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    repo_include: Vec<RepoMatcher>,
    repo_exclude: Vec<RepoMatcher>,
    contributor_include: Vec<ContributorMatcher>,
    contributor_exclude: Vec<ContributorMatcher>,
    exclude_bots: bool,
}

impl FilterEngine {
    pub fn compile(
        repositories: &RepositoryRules,
        contributors: &ContributorRules,
    ) -> Result<Self, ConfigError> {
        Ok(FilterEngine {
            repo_include: repositories
                .include
                .iter()
                .map(RepoMatcher::compile)
                .collect::<Result<_, _>>()?,
            repo_exclude: repositories
                .exclude
                .iter()
                .map(RepoMatcher::compile)
                .collect::<Result<_, _>>()?,
            contributor_include: contributors
                .include
                .iter()
                .map(ContributorMatcher::compile)
                .collect::<Result<_, _>>()?,
            contributor_exclude: contributors
                .exclude
                .iter()
                .map(ContributorMatcher::compile)
                .collect::<Result<_, _>>()?,
            exclude_bots: contributors.exclude_bots,
        })
    }

    /// An engine with no rules: everything is included.
    pub fn allow_all() -> Self {
        FilterEngine {
            repo_include: Vec::new(),
            repo_exclude: Vec::new(),
            contributor_include: Vec::new(),
            contributor_exclude: Vec::new(),
            exclude_bots: false,
        }
    }

    pub fn is_repository_included(&self, repository: &Repository) -> bool {
        let included =
            self.repo_include.is_empty() || self.repo_include.iter().any(|m| m.matches(repository));
        let excluded = self.repo_exclude.iter().any(|m| m.matches(repository));
        included && !excluded
    }

    pub fn is_contributor_included(&self, identity: &Identity) -> bool {
        if self.exclude_bots && identity.looks_like_bot() {
            return false;
        }
        let included = self.contributor_include.is_empty()
            || self.contributor_include.iter().any(|m| m.matches(identity));
        let excluded = self.contributor_exclude.iter().any(|m| m.matches(identity));
        included && !excluded
    }
}
