//! Report Generator.
//!
//! [`generate`] projects one [`AggregationState`] into a [`Report`]; [`render`] turns that
//! value into JSON or text. The explain detail and the summary are built from the same state
//! in the same call, and text output reads only fields of the `Report`, so the numbers shown
//! in every format agree.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::aggregate::AggregationState;
use crate::contract::{ProviderKind, Scope};
use crate::window::TimeWindow;

const RULE_HEAVY: &str = "========================================";
const RULE_LIGHT: &str = "----------------------------------------";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    Summary,
    Explain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Run facts the report needs besides the aggregation itself.
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub scope: Scope,
    pub window: TimeWindow,
    pub default_branch_only: bool,
    pub list_contributors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributorListing {
    pub identifier: String,
    pub display_name: String,
    pub emails: Vec<String>,
    pub usernames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub provider: ProviderKind,
    pub scope_identifier: String,
    pub scan_date: NaiveDate,
    pub window: TimeWindow,
    pub contributor_count: usize,
    pub repository_count: usize,
    pub repositories_scanned: usize,
    pub commit_count: u64,
    pub default_branch_only: bool,
    pub excluded_contributors: usize,
    pub excluded_repositories: usize,
    pub failed_repositories: usize,
    pub cancelled: bool,
    pub contributors: Option<Vec<ContributorListing>>,
}

impl SummaryReport {
    /// `contributors_90d` for a 90 day window.
    pub fn count_field(&self) -> String {
        format!("contributors_{}d", self.window.days)
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        match (self.provider, self.scope_identifier.split_once('/')) {
            (ProviderKind::AzureDevOps, Some((org, project))) => {
                map.insert("org".into(), Value::String(org.to_string()));
                map.insert("project".into(), Value::String(project.to_string()));
            }
            _ => {
                map.insert(
                    self.provider.scope_label().to_string(),
                    Value::String(self.scope_identifier.clone()),
                );
            }
        }
        map.insert(
            "scan_date".into(),
            Value::String(self.scan_date.format("%Y-%m-%d").to_string()),
        );
        map.insert("default_branch_only".into(), Value::Bool(self.default_branch_only));
        map.insert(self.count_field(), json!(self.contributor_count));
        if self.failed_repositories > 0 {
            map.insert("failed_repositories".into(), json!(self.failed_repositories));
        }
        if self.cancelled {
            map.insert("cancelled".into(), Value::Bool(true));
        }
        if let Some(listing) = &self.contributors {
            map.insert("contributors_details".into(), json!(listing));
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainMetadata {
    pub organization: String,
    pub provider: ProviderKind,
    pub url: Option<String>,
    pub period: Period,
    pub window_days: u32,
    pub default_branch_only: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainSummary {
    pub total_contributors: usize,
    pub total_repositories: usize,
    pub total_commits: u64,
    pub excluded_contributors: usize,
    pub excluded_repositories: usize,
    pub failed_repositories: usize,
    pub unattributed_commits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributorDetail {
    pub display_name: String,
    pub email: Option<String>,
    pub usernames: Vec<String>,
    pub commit_count: u64,
    pub first_commit: DateTime<Utc>,
    pub last_commit: DateTime<Utc>,
    pub repositories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryDetail {
    pub contributor_count: usize,
    pub commit_count: u64,
    pub contributors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRepository {
    pub repository: String,
    pub reason: String,
}

/// The audit document: per-contributor and per-repository breakdowns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainReport {
    pub metadata: ExplainMetadata,
    pub summary: ExplainSummary,
    pub contributors: BTreeMap<String, ContributorDetail>,
    pub repositories: BTreeMap<String, RepositoryDetail>,
    #[serde(rename = "excluded-contributors")]
    pub excluded_contributors: Vec<String>,
    #[serde(rename = "excluded-repositories")]
    pub excluded_repositories: Vec<String>,
    #[serde(rename = "failed-repositories")]
    pub failed_repositories: Vec<FailedRepository>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub mode: ReportMode,
    pub summary: SummaryReport,
    /// Present in explain mode.
    pub explain: Option<ExplainReport>,
}

fn listings(state: &AggregationState) -> Vec<ContributorListing> {
    state
        .contributors
        .values()
        .map(|c| ContributorListing {
            identifier: c.key.clone(),
            display_name: c.display_name.clone(),
            emails: c.email.iter().cloned().collect(),
            usernames: c.usernames.iter().cloned().collect(),
        })
        .collect()
}

fn explain(context: &ReportContext, state: &AggregationState) -> ExplainReport {
    ExplainReport {
        metadata: ExplainMetadata {
            organization: context.scope.identifier.clone(),
            provider: context.scope.provider,
            url: context.scope.base_url.clone(),
            period: Period {
                start: context.window.start,
                end: context.window.end,
            },
            window_days: context.window.days,
            default_branch_only: context.default_branch_only,
            cancelled: state.cancelled,
        },
        summary: ExplainSummary {
            total_contributors: state.total_contributors(),
            total_repositories: state.total_repositories(),
            total_commits: state.total_commits(),
            excluded_contributors: state.excluded_contributors.len(),
            excluded_repositories: state.excluded_repositories.len(),
            failed_repositories: state.failed_repositories.len(),
            unattributed_commits: state.unattributed_commits,
        },
        contributors: state
            .contributors
            .values()
            .map(|c| {
                (
                    c.key.clone(),
                    ContributorDetail {
                        display_name: c.display_name.clone(),
                        email: c.email.clone(),
                        usernames: c.usernames.iter().cloned().collect(),
                        commit_count: c.commit_count,
                        first_commit: c.first_commit,
                        last_commit: c.last_commit,
                        repositories: c.repositories.keys().cloned().collect(),
                    },
                )
            })
            .collect(),
        repositories: state
            .repositories
            .values()
            .map(|r| {
                (
                    r.name.clone(),
                    RepositoryDetail {
                        contributor_count: r.contributor_count(),
                        commit_count: r.commit_count,
                        contributors: r.contributors.iter().cloned().collect(),
                    },
                )
            })
            .collect(),
        excluded_contributors: state.excluded_contributors.iter().cloned().collect(),
        excluded_repositories: state.excluded_repositories.iter().cloned().collect(),
        failed_repositories: state
            .failed_repositories
            .iter()
            .map(|(repository, reason)| FailedRepository {
                repository: repository.clone(),
                reason: reason.clone(),
            })
            .collect(),
    }
}

pub fn generate(mode: ReportMode, context: &ReportContext, state: &AggregationState) -> Report {
    let summary = SummaryReport {
        provider: context.scope.provider,
        scope_identifier: context.scope.identifier.clone(),
        scan_date: context.window.scan_date(),
        window: context.window,
        contributor_count: state.total_contributors(),
        repository_count: state.total_repositories(),
        repositories_scanned: state.scanned_repositories.len(),
        commit_count: state.total_commits(),
        default_branch_only: context.default_branch_only,
        excluded_contributors: state.excluded_contributors.len(),
        excluded_repositories: state.excluded_repositories.len(),
        failed_repositories: state.failed_repositories.len(),
        cancelled: state.cancelled,
        contributors: context.list_contributors.then(|| listings(state)),
    };
    let explain = match mode {
        ReportMode::Summary => None,
        ReportMode::Explain => Some(explain(context, state)),
    };
    Report {
        mode,
        summary,
        explain,
    }
}

fn scope_heading(provider: ProviderKind) -> &'static str {
    match provider.scope_label() {
        "org" => "Organization",
        "group" => "Group",
        "workspace" => "Workspace",
        _ => "Project",
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

// `write!` into a String cannot fail.
fn render_text(report: &Report) -> String {
    let s = &report.summary;
    let mut out = String::new();
    let _ = writeln!(out, "{RULE_HEAVY}");
    let _ = writeln!(out, "{}: {}", scope_heading(s.provider), s.scope_identifier);
    let _ = writeln!(out, "Provider: {}", s.provider);
    let _ = writeln!(out, "Scan Date: {}", s.scan_date.format("%Y-%m-%d"));
    let _ = writeln!(
        out,
        "Period: {} - {}",
        s.window.start.date_naive(),
        s.window.end.date_naive()
    );
    let _ = writeln!(out, "Repositories scanned: {}", s.repositories_scanned);
    let _ = writeln!(out, "Default branch only: {}", yes_no(s.default_branch_only));
    let _ = writeln!(out, "{RULE_LIGHT}");
    let _ = writeln!(
        out,
        "Contributors in last {} days: {}",
        s.window.days, s.contributor_count
    );
    let _ = writeln!(out, "Repositories with commits: {}", s.repository_count);
    let _ = writeln!(out, "Commits counted: {}", s.commit_count);
    if s.excluded_contributors > 0 {
        let _ = writeln!(out, "Excluded contributors: {}", s.excluded_contributors);
    }
    if s.excluded_repositories > 0 {
        let _ = writeln!(out, "Excluded repositories: {}", s.excluded_repositories);
    }
    if s.failed_repositories > 0 {
        let _ = writeln!(
            out,
            "Failed repositories: {} (count may be an undercount)",
            s.failed_repositories
        );
    }
    if s.cancelled {
        let _ = writeln!(out, "Run was cancelled before all repositories were scanned");
    }

    if let Some(listing) = &s.contributors {
        let _ = writeln!(out, "{RULE_LIGHT}");
        let _ = writeln!(out, "Contributors:");
        for c in listing {
            let _ = writeln!(out, "  - {} ({})", c.identifier, c.display_name);
        }
    }

    if let Some(explain) = &report.explain {
        let _ = writeln!(out, "{RULE_LIGHT}");
        let _ = writeln!(out, "Contributor breakdown:");
        for (key, c) in &explain.contributors {
            let _ = writeln!(
                out,
                "  {key}: {} commits in {}",
                c.commit_count,
                c.repositories.join(", ")
            );
        }
        let _ = writeln!(out, "Repository breakdown:");
        for (name, r) in &explain.repositories {
            let _ = writeln!(
                out,
                "  {name}: {} contributors, {} commits",
                r.contributor_count, r.commit_count
            );
        }
        if !explain.failed_repositories.is_empty() {
            let _ = writeln!(out, "Failed repositories:");
            for f in &explain.failed_repositories {
                let _ = writeln!(out, "  {}: {}", f.repository, f.reason);
            }
        }
    }
    let _ = writeln!(out, "{RULE_HEAVY}");
    out
}

pub fn render(report: &Report, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Text => Ok(render_text(report)),
        OutputFormat::Json => match &report.explain {
            Some(explain) => serde_json::to_string_pretty(explain),
            None => serde_json::to_string_pretty(&report.summary.to_json()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::aggregate::Aggregator;
    use crate::contract::{CommitAuthor, CommitRecord, Repository};
    use crate::fetch::{RepositoryFailure, RepositoryHistory};
    use crate::filter::FilterEngine;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).unwrap()
    }

    fn context(provider: ProviderKind, list_contributors: bool) -> ReportContext {
        ReportContext {
            scope: Scope {
                provider,
                identifier: "acme".into(),
                base_url: None,
            },
            window: TimeWindow::trailing(now(), 90),
            default_branch_only: false,
            list_contributors,
        }
    }

    fn commit(repo: &str, sha: &str, email: &str) -> CommitRecord {
        CommitRecord {
            sha: sha.into(),
            repository: repo.into(),
            author: CommitAuthor {
                name: Some(email.split('@').next().unwrap_or(email).to_string()),
                email: Some(email.into()),
                username: None,
                aliases: Vec::new(),
                is_bot: false,
            },
            timestamp: now() - chrono::Duration::days(3),
            branch: Some("main".into()),
        }
    }

    fn state() -> AggregationState {
        let repository = Repository {
            id: "acme/app".into(),
            name: "app".into(),
            full_name: "acme/app".into(),
            default_branch: Some("main".into()),
            scope: "acme".into(),
        };
        let mut aggregator = Aggregator::new(FilterEngine::allow_all());
        aggregator.ingest(RepositoryHistory {
            repository,
            branches: vec!["main".into()],
            commits: vec![
                commit("acme/app", "1", "alice@acme.com"),
                commit("acme/app", "2", "bob@acme.com"),
                commit("acme/app", "3", "alice@acme.com"),
            ],
            pages: 1,
        });
        aggregator.record_excluded_repository("acme/app-test");
        aggregator.record_failure(RepositoryFailure {
            repository: "acme/broken".into(),
            reason: "listing commits: provider error: 500 - boom".into(),
        });
        aggregator.finish()
    }

    #[test]
    fn summary_json_uses_scope_label_and_window_key() {
        let report = generate(ReportMode::Summary, &context(ProviderKind::GitLab, false), &state());
        let value = report.summary.to_json();
        assert_eq!(value["group"], "acme");
        assert_eq!(value["scan_date"], "2026-10-14");
        assert_eq!(value["contributors_90d"], 2);
        assert_eq!(value["default_branch_only"], false);
        assert_eq!(value["failed_repositories"], 1);
        assert!(value.get("contributors_details").is_none());
        assert!(report.explain.is_none());
    }

    #[test]
    fn azure_devops_summary_splits_org_and_project() {
        let mut ctx = context(ProviderKind::AzureDevOps, false);
        ctx.scope.identifier = "acme/web".into();
        let value = generate(ReportMode::Summary, &ctx, &state()).summary.to_json();
        assert_eq!(value["org"], "acme");
        assert_eq!(value["project"], "web");
        assert_eq!(value["contributors_90d"], 2);
    }

    #[test]
    fn list_contributors_adds_details() {
        let report = generate(ReportMode::Summary, &context(ProviderKind::GitHub, true), &state());
        let value = report.summary.to_json();
        let details = value["contributors_details"].as_array().unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0]["identifier"], "alice@acme.com");
    }

    #[test]
    fn explain_totals_agree_with_summary() {
        let report = generate(ReportMode::Explain, &context(ProviderKind::GitHub, false), &state());
        let explain = report.explain.as_ref().unwrap();
        assert_eq!(explain.summary.total_contributors, report.summary.contributor_count);
        assert_eq!(explain.contributors.len(), explain.summary.total_contributors);
        let per_repo: u64 = explain.repositories.values().map(|r| r.commit_count).sum();
        assert_eq!(per_repo, explain.summary.total_commits);
        assert_eq!(explain.contributors["alice@acme.com"].commit_count, 2);
        assert_eq!(explain.excluded_repositories, vec!["acme/app-test".to_string()]);
        assert!(!explain.repositories.contains_key("acme/app-test"));
    }

    #[test]
    fn per_repository_contributors_union_to_the_total() {
        let mut aggregator = Aggregator::new(FilterEngine::allow_all());
        let layout = [
            ("acme/app", vec!["alice@acme.com", "bob@acme.com"]),
            ("acme/api", vec!["bob@acme.com", "carol@acme.com"]),
            ("acme/web", vec!["alice@acme.com", "carol@acme.com", "dave@acme.com"]),
        ];
        for (full_name, authors) in &layout {
            let name = full_name.trim_start_matches("acme/");
            aggregator.ingest(RepositoryHistory {
                repository: Repository {
                    id: full_name.to_string(),
                    name: name.into(),
                    full_name: full_name.to_string(),
                    default_branch: Some("main".into()),
                    scope: "acme".into(),
                },
                branches: vec!["main".into()],
                commits: authors
                    .iter()
                    .enumerate()
                    .map(|(i, email)| commit(full_name, &format!("{name}-{i}"), email))
                    .collect(),
                pages: 1,
            });
        }
        let report = generate(
            ReportMode::Explain,
            &context(ProviderKind::GitHub, false),
            &aggregator.finish(),
        );
        let explain = report.explain.as_ref().unwrap();

        let union: BTreeSet<&str> = explain
            .repositories
            .values()
            .flat_map(|r| r.contributors.iter().map(String::as_str))
            .collect();
        assert_eq!(union.len(), 4);
        assert_eq!(union.len(), explain.summary.total_contributors);
        assert_eq!(union.len(), report.summary.contributor_count);
        let listed: BTreeSet<&str> = explain.contributors.keys().map(String::as_str).collect();
        assert_eq!(union, listed);
    }

    #[test]
    fn explain_json_uses_hyphenated_section_names() {
        let report = generate(ReportMode::Explain, &context(ProviderKind::GitHub, false), &state());
        let rendered = render(&report, OutputFormat::Json).unwrap();
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["metadata"]["organization"], "acme");
        assert_eq!(value["metadata"]["provider"], "github");
        assert_eq!(value["failed-repositories"][0]["repository"], "acme/broken");
        assert!(value["excluded-contributors"].as_array().unwrap().is_empty());
    }

    #[test]
    fn text_is_a_projection_of_the_same_report() {
        let report = generate(ReportMode::Explain, &context(ProviderKind::Bitbucket, false), &state());
        let text = render(&report, OutputFormat::Text).unwrap();
        assert!(text.contains("Workspace: acme"));
        assert!(text.contains("Contributors in last 90 days: 2"));
        assert!(text.contains("Failed repositories: 1"));
        assert!(text.contains("acme/app: 2 contributors, 3 commits"));
    }
}
