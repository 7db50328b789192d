use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

use contributor_count_core::config::{ContributorRule, CountConfig, RepoPattern};
use contributor_count_core::contract::{
    CommitAuthor, CommitRecord, MockProviderClient, Page, PageCursor, ProviderError, ProviderKind,
    Repository,
};
use contributor_count_core::counter::{count_contributors, CancelFlag};
use contributor_count_core::error::CountError;
use contributor_count_core::report::{generate, render, OutputFormat, ReportContext, ReportMode};
use contributor_count_core::window::TimeWindow;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
}

fn window() -> TimeWindow {
    TimeWindow::trailing(now(), 90)
}

fn repo(full_name: &str) -> Repository {
    let (scope, name) = full_name.split_once('/').unwrap();
    Repository {
        id: full_name.to_string(),
        name: name.to_string(),
        full_name: full_name.to_string(),
        default_branch: Some("main".into()),
        scope: scope.to_string(),
    }
}

fn commit_at(repo: &str, sha: &str, email: &str, at: DateTime<Utc>) -> CommitRecord {
    CommitRecord {
        sha: sha.to_string(),
        repository: repo.to_string(),
        author: CommitAuthor {
            name: Some(email.split('@').next().unwrap().to_string()),
            email: Some(email.to_string()),
            username: None,
            aliases: Vec::new(),
            is_bot: false,
        },
        timestamp: at,
        branch: None,
    }
}

fn commit(repo: &str, sha: &str, email: &str, days_ago: i64) -> CommitRecord {
    commit_at(repo, sha, email, now() - chrono::Duration::days(days_ago))
}

/// A provider with one `main` branch per repository and one commit page per repository.
fn scripted(repos: Vec<Repository>, commits: Vec<CommitRecord>) -> MockProviderClient {
    let mut by_repo: HashMap<String, Vec<CommitRecord>> = HashMap::new();
    for c in commits {
        by_repo.entry(c.repository.clone()).or_default().push(c);
    }
    let mut client = MockProviderClient::new();
    client
        .expect_list_repositories()
        .returning(move |_, _| Ok(Page::last(repos.clone())));
    client
        .expect_list_branches()
        .returning(|_, _| Ok(Page::last(vec!["main".to_string()])));
    client.expect_list_commits().returning(move |query, _| {
        Ok(Page::last(
            by_repo
                .get(&query.repository.full_name)
                .cloned()
                .unwrap_or_default(),
        ))
    });
    client
}

fn acme_config() -> CountConfig {
    let mut config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    config.repositories.exclude.push(RepoPattern::glob("*-test"));
    config
}

fn acme_client() -> MockProviderClient {
    scripted(
        vec![repo("acme/app"), repo("acme/app-test")],
        vec![
            commit("acme/app", "1", "a@acme.com", 3),
            commit("acme/app", "2", "b@acme.com", 10),
            commit("acme/app-test", "3", "tester@acme.com", 1),
        ],
    )
}

fn context(config: &CountConfig) -> ReportContext {
    ReportContext {
        scope: config.scope(),
        window: window(),
        default_branch_only: config.scan.default_branch_only,
        list_contributors: false,
    }
}

#[tokio::test]
async fn excluded_repository_is_absent_from_counts_and_explain() {
    let config = acme_config();
    let state = count_contributors(&acme_client(), &config, window(), &CancelFlag::new())
        .await
        .expect("run should succeed");

    let report = generate(ReportMode::Explain, &context(&config), &state);
    assert_eq!(report.summary.to_json()["contributors_90d"], 2);

    let explain = report.explain.unwrap();
    assert!(!explain.repositories.contains_key("acme/app-test"));
    assert!(!explain.contributors.contains_key("tester@acme.com"));
    assert_eq!(explain.excluded_repositories, vec!["acme/app-test".to_string()]);
    assert_eq!(explain.summary.total_commits, 2);
}

#[tokio::test]
async fn excluded_repository_commits_are_never_fetched() {
    let requested = Arc::new(Mutex::new(Vec::new()));
    let seen = requested.clone();
    let mut client = MockProviderClient::new();
    client
        .expect_list_repositories()
        .returning(|_, _| Ok(Page::last(vec![repo("acme/app"), repo("acme/app-test")])));
    client
        .expect_list_branches()
        .returning(|_, _| Ok(Page::last(vec!["main".to_string()])));
    client.expect_list_commits().returning(move |query, _| {
        seen.lock().unwrap().push(query.repository.full_name.clone());
        Ok(Page::empty())
    });

    count_contributors(&client, &acme_config(), window(), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(*requested.lock().unwrap(), vec!["acme/app".to_string()]);
}

#[tokio::test]
async fn dependabot_is_excluded_by_username_rule() {
    let mut config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    config.contributors.exclude.push(ContributorRule {
        users: vec!["dependabot".into()],
        ..Default::default()
    });

    let mut bot = commit("acme/app", "2", "49699333+dependabot[bot]@users.noreply.github.com", 2);
    bot.author.username = Some("dependabot[bot]".into());
    bot.author.is_bot = true;
    let mut human = commit("acme/app", "1", "alice@acme.com", 2);
    human.author.username = Some("alice".into());

    let client = scripted(vec![repo("acme/app")], vec![human, bot]);
    let state = count_contributors(&client, &config, window(), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(state.total_contributors(), 1);
    assert!(state.contributors.contains_key("alice@acme.com"));
    assert_eq!(state.excluded_contributors.len(), 1);
}

#[tokio::test]
async fn result_is_independent_of_repository_order_and_concurrency() {
    let repos = vec![repo("acme/a"), repo("acme/b"), repo("acme/c")];
    let commits = vec![
        commit("acme/a", "1", "x@acme.com", 1),
        commit("acme/b", "2", "X@acme.com", 40),
        commit("acme/c", "3", "y@acme.com", 5),
        commit("acme/c", "4", "x@acme.com", 80),
    ];
    let mut reversed_repos = repos.clone();
    reversed_repos.reverse();
    let mut reversed_commits = commits.clone();
    reversed_commits.reverse();

    let sequential = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    let mut parallel = sequential.clone();
    parallel.scan.concurrency = 3;

    let first = count_contributors(&scripted(repos, commits), &sequential, window(), &CancelFlag::new())
        .await
        .unwrap();
    let second = count_contributors(
        &scripted(reversed_repos, reversed_commits),
        &parallel,
        window(),
        &CancelFlag::new(),
    )
    .await
    .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.total_contributors(), 2);
    assert_eq!(first.contributors["x@acme.com"].commit_count, 3);
}

#[tokio::test]
async fn repeated_runs_render_identical_explain_documents() {
    let config = acme_config();
    let mut rendered = Vec::new();
    for _ in 0..2 {
        let state = count_contributors(&acme_client(), &config, window(), &CancelFlag::new())
            .await
            .unwrap();
        let report = generate(ReportMode::Explain, &context(&config), &state);
        rendered.push(render(&report, OutputFormat::Json).unwrap());
    }
    assert_eq!(rendered[0], rendered[1]);
}

#[tokio::test]
async fn window_lower_bound_is_inclusive() {
    let edge = now() - chrono::Duration::days(90);
    let client = scripted(
        vec![repo("acme/app")],
        vec![
            commit_at("acme/app", "1", "edge@acme.com", edge),
            commit_at("acme/app", "2", "late@acme.com", edge - chrono::Duration::seconds(1)),
        ],
    );
    let config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    let state = count_contributors(&client, &config, window(), &CancelFlag::new())
        .await
        .unwrap();

    assert!(state.contributors.contains_key("edge@acme.com"));
    assert!(!state.contributors.contains_key("late@acme.com"));
}

#[tokio::test]
async fn failing_repository_is_isolated_and_listed() {
    let mut client = MockProviderClient::new();
    client
        .expect_list_repositories()
        .returning(|_, _| Ok(Page::last(vec![repo("acme/app"), repo("acme/broken")])));
    client
        .expect_list_branches()
        .returning(|_, _| Ok(Page::last(vec!["main".to_string()])));
    client.expect_list_commits().returning(|query, _| {
        if query.repository.full_name == "acme/broken" {
            Err(ProviderError::NotFound("acme/broken".into()))
        } else {
            Ok(Page::last(vec![commit("acme/app", "1", "a@acme.com", 1)]))
        }
    });

    let config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    let state = count_contributors(&client, &config, window(), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(state.total_contributors(), 1);
    assert_eq!(state.total_repositories(), 1);
    assert!(state.failed_repositories["acme/broken"].contains("not found"));

    let report = generate(ReportMode::Explain, &context(&config), &state);
    let explain = report.explain.unwrap();
    assert_eq!(explain.failed_repositories.len(), 1);
    assert_eq!(explain.failed_repositories[0].repository, "acme/broken");
}

#[tokio::test]
async fn rate_limited_page_is_retried_then_counted() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut client = MockProviderClient::new();
    client
        .expect_list_repositories()
        .returning(|_, _| Ok(Page::last(vec![repo("acme/app")])));
    client
        .expect_list_branches()
        .returning(|_, _| Ok(Page::last(vec!["main".to_string()])));
    client.expect_list_commits().returning(move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(ProviderError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            })
        } else {
            Ok(Page::last(vec![commit("acme/app", "1", "a@acme.com", 1)]))
        }
    });

    let config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    let state = count_contributors(&client, &config, window(), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(state.total_contributors(), 1);
    assert!(state.failed_repositories.is_empty());
}

#[tokio::test]
async fn exhausted_retries_become_a_repository_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut client = MockProviderClient::new();
    client
        .expect_list_repositories()
        .returning(|_, _| Ok(Page::last(vec![repo("acme/app")])));
    client
        .expect_list_branches()
        .returning(|_, _| Ok(Page::last(vec!["main".to_string()])));
    client.expect_list_commits().returning(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::RateLimited {
            retry_after: Some(Duration::from_millis(1)),
        })
    });

    let mut config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    config.scan.max_retries = 2;
    let state = count_contributors(&client, &config, window(), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(state.total_contributors(), 0);
    assert!(state.failed_repositories["acme/app"].contains("gave up after 2 retries"));
}

#[tokio::test]
async fn authentication_failure_listing_repositories_is_fatal() {
    let mut client = MockProviderClient::new();
    client
        .expect_list_repositories()
        .returning(|_, _| Err(ProviderError::Auth("Bad credentials".into())));
    client.expect_list_commits().never();

    let config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    let err = count_contributors(&client, &config, window(), &CancelFlag::new())
        .await
        .unwrap_err();
    match err {
        CountError::Auth { scope, guidance, .. } => {
            assert_eq!(scope, "acme");
            assert!(guidance.contains("read:org"));
        }
        other => panic!("expected auth error, got {other:?}"),
    }
}

#[tokio::test]
async fn configuration_errors_come_before_any_network_call() {
    let mut client = MockProviderClient::new();
    client.expect_list_repositories().never();
    let mut config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    config.contributors.exclude.push(ContributorRule {
        pattern: Some("[broken".into()),
        ..Default::default()
    });

    let err = count_contributors(&client, &config, window(), &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CountError::Config(_)));
}

fn branching_client(expect_branch_listing: bool) -> MockProviderClient {
    let mut client = MockProviderClient::new();
    client
        .expect_list_repositories()
        .returning(|_, _| Ok(Page::last(vec![repo("acme/app")])));
    if expect_branch_listing {
        client
            .expect_list_branches()
            .returning(|_, _| Ok(Page::last(vec!["main".to_string(), "feature".to_string()])));
    } else {
        client.expect_list_branches().never();
    }
    client.expect_list_commits().returning(|query, _| {
        let shared = commit("acme/app", "c1", "alice@acme.com", 4);
        let items = match query.branch.as_deref() {
            Some("feature") => vec![commit("acme/app", "c2", "bob@acme.com", 2), shared],
            _ => vec![shared],
        };
        Ok(Page::last(items))
    });
    client
}

#[tokio::test]
async fn all_branches_dedups_commits_by_sha() {
    let config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    let state = count_contributors(&branching_client(true), &config, window(), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(state.total_contributors(), 2);
    assert_eq!(state.total_commits(), 2);
}

#[tokio::test]
async fn default_branch_only_skips_other_branches() {
    let mut config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    config.scan.default_branch_only = true;
    let state = count_contributors(&branching_client(false), &config, window(), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(state.total_contributors(), 1);
    assert!(state.contributors.contains_key("alice@acme.com"));
}

#[tokio::test]
async fn pagination_stops_at_first_page_older_than_window() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut client = MockProviderClient::new();
    client
        .expect_list_repositories()
        .returning(|_, _| Ok(Page::last(vec![repo("acme/app")])));
    client
        .expect_list_branches()
        .returning(|_, _| Ok(Page::last(vec!["main".to_string()])));
    client.expect_list_commits().returning(move |_, cursor| {
        counter.fetch_add(1, Ordering::SeqCst);
        let cursor = cursor.map(|c| c.0);
        match cursor.as_deref() {
            None => Ok(Page {
                items: vec![
                    commit("acme/app", "1", "a@acme.com", 10),
                    commit("acme/app", "2", "b@acme.com", 95),
                ],
                next: Some(PageCursor("2".into())),
            }),
            Some("2") => Ok(Page {
                items: vec![commit("acme/app", "3", "old@acme.com", 120)],
                next: Some(PageCursor("3".into())),
            }),
            Some(other) => panic!("page {other} should not be requested"),
        }
    });

    let config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    let state = count_contributors(&client, &config, window(), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.total_contributors(), 1);
}

#[tokio::test]
async fn cancelled_run_is_marked_and_applies_nothing_further() {
    let cancel = CancelFlag::new();
    cancel.cancel();
    let config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    let state = count_contributors(&acme_client(), &config, window(), &cancel)
        .await
        .unwrap();
    assert!(state.cancelled);
    assert_eq!(state.total_contributors(), 0);
}

#[tokio::test]
async fn max_repositories_limits_the_listing() {
    let mut config = CountConfig::for_scope(ProviderKind::GitHub, "acme");
    config.scan.max_repositories = Some(1);
    let state = count_contributors(&acme_client(), &config, window(), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(state.scanned_repositories.len(), 1);
    assert!(state.scanned_repositories.contains("acme/app"));
}
