//! Command-line surface for contributor-count.
//!
//! All counting logic lives in `contributor-count-core`; this module parses flags, resolves
//! configuration and credentials, wires Ctrl-C to cancellation, and writes the rendered report.
//! Logs go to stderr so stdout carries only the report.
//!
//! Programmatic and integration-test use: build a [`Cli`] and call [`run`].

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

use contributor_count_core::counter::{count_contributors, CancelFlag};
use contributor_count_core::error::{ConfigError, CountError};
use contributor_count_core::providers::build_client;
use contributor_count_core::report::{generate, render, OutputFormat, ReportContext, ReportMode};
use contributor_count_core::window::TimeWindow;

use crate::credentials::resolve_credentials;
use crate::load_config::resolve_config;

/// Count distinct commit authors of an SCM organization over a trailing window.
#[derive(Parser, Debug)]
#[clap(
    name = "contributor-count",
    version,
    about = "Count distinct commit contributors across GitHub, GitLab, Bitbucket and Azure DevOps"
)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[clap(long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Count contributors for one org/group/workspace/project
    Count(CountArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Text,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => OutputFormat::Text,
            Format::Json => OutputFormat::Json,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct CountArgs {
    /// YAML config file; flags below override its values
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// github | gitlab | bitbucket | bitbucket_server | azure_devops
    #[clap(long)]
    pub provider: Option<String>,

    /// Org, group, workspace or project key (Azure DevOps: organization name or URL)
    #[clap(long, visible_aliases = ["group", "workspace"])]
    pub org: Option<String>,

    /// Base URL for self-hosted instances
    #[clap(long)]
    pub url: Option<String>,

    /// Azure DevOps project
    #[clap(long)]
    pub project: Option<String>,

    /// Window length in days
    #[clap(long)]
    pub days: Option<u32>,

    #[clap(long)]
    pub default_branch_only: bool,

    /// Drop bot accounts
    #[clap(long)]
    pub exclude_bots: bool,

    /// Scan at most this many repositories, in listing order
    #[clap(long)]
    pub max_repos: Option<usize>,

    /// Repositories fetched concurrently
    #[clap(long)]
    pub concurrency: Option<usize>,

    /// Access token or password
    #[clap(long, env = "GIT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Username for basic authentication (Bitbucket)
    #[clap(long)]
    pub username: Option<String>,

    #[clap(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,

    /// Include the contributor list in the summary
    #[clap(long)]
    pub list_contributors: bool,

    /// Produce the full audit document instead of the summary
    #[clap(long)]
    pub explain: bool,

    /// Write the report to this file instead of stdout
    #[clap(long)]
    pub output: Option<PathBuf>,

    /// Exit with status 4 when any repository could not be fetched
    #[clap(long)]
    pub fail_on_repository_error: bool,
}

/// Process exit status for a failed run.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<CountError>() {
            return match e {
                CountError::Config(_) => 2,
                CountError::Auth { .. } => 3,
                CountError::RepositoryFailures { .. } => 4,
                CountError::ScopeUnavailable { .. } => 1,
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return 2;
        }
    }
    1
}

fn write_report(output: Option<&Path>, rendered: &str) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            if !rendered.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}

fn watch_interrupt(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight repositories");
            cancel.cancel();
        }
    });
}

async fn count(args: CountArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    config.trace_loaded();
    config.validate().map_err(CountError::from)?;

    let scope = config.scope();
    let credentials = resolve_credentials(
        config.provider.kind,
        &scope.identifier,
        args.token.clone(),
        args.username.clone(),
    )?;
    let client = build_client(
        &config.provider,
        credentials,
        Duration::from_secs(config.scan.request_timeout_secs),
    )
    .map_err(|e| {
        CountError::from(ConfigError::InvalidValue {
            field: "provider.url",
            reason: e.to_string(),
        })
    })?;

    let cancel = CancelFlag::new();
    watch_interrupt(cancel.clone());

    let window = TimeWindow::trailing(Utc::now(), config.scan.window_days);
    let state = count_contributors(client.as_ref(), &config, window, &cancel).await?;

    let mode = if args.explain {
        ReportMode::Explain
    } else {
        ReportMode::Summary
    };
    let context = ReportContext {
        scope,
        window,
        default_branch_only: config.scan.default_branch_only,
        list_contributors: args.list_contributors,
    };
    let report = generate(mode, &context, &state);
    let rendered = render(&report, args.format.into()).context("Failed to render report")?;
    write_report(args.output.as_deref(), &rendered)?;

    let failed = state.failed_repositories.len();
    if failed > 0 {
        warn!(failed, "Some repositories could not be fetched; the count may be an undercount");
        if config.scan.fail_on_repository_error {
            return Err(CountError::RepositoryFailures { count: failed }.into());
        }
    }
    Ok(())
}

/// Async entrypoint for `main` and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Count(args) => {
            info!(command = "count", "Starting contributor count");
            let result = count(args).await;
            if let Err(e) = &result {
                error!(command = "count", error = %e, "Contributor count failed");
            }
            result
        }
    }
}
