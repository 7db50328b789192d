/// `load_config` module: reads the YAML run configuration and layers CLI flags on top.
///
/// This is the only place untrusted YAML is parsed. The file never holds secrets; tokens are
/// resolved separately in [`crate::credentials`].
///
/// # Responsibilities
/// - Parse a config file into the core's [`CountConfig`]
/// - Build a config from flags alone when no file is given
/// - Apply flag overrides (`--provider`, `--org`, `--days`, ...) to file values
///
/// # Errors
/// Failures are [`ConfigError`]s wrapped in `anyhow::Error`, so the CLI can map them to the
/// configuration exit status.
use std::fs;
use std::path::Path;

use anyhow::Result;
use tracing::{error, info};

use contributor_count_core::config::CountConfig;
use contributor_count_core::contract::ProviderKind;
use contributor_count_core::error::ConfigError;

use crate::cli::CountArgs;

/// Loads a YAML config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CountConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(ConfigError::Unreadable {
                path: path_ref.display().to_string(),
                reason: e.to_string(),
            }
            .into());
        }
    };

    match serde_yaml::from_str::<CountConfig>(&config_content) {
        Ok(config) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            Ok(config)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            Err(ConfigError::Malformed(e.to_string()).into())
        }
    }
}

fn parse_provider(value: &str) -> Result<ProviderKind, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::UnsupportedProvider(value.to_string()))
}

/// Applies flag values on top of `config`. Boolean flags only ever switch a setting on.
pub fn apply_overrides(config: &mut CountConfig, args: &CountArgs) -> Result<(), ConfigError> {
    if let Some(provider) = &args.provider {
        config.provider.kind = parse_provider(provider)?;
    }
    if let Some(org) = &args.org {
        config.provider.org = org.clone();
    }
    if let Some(url) = &args.url {
        config.provider.url = Some(url.clone());
    }
    if let Some(project) = &args.project {
        config.provider.project = Some(project.clone());
    }
    if let Some(days) = args.days {
        config.scan.window_days = days;
    }
    if let Some(limit) = args.max_repos {
        config.scan.max_repositories = Some(limit);
    }
    if let Some(concurrency) = args.concurrency {
        config.scan.concurrency = concurrency;
    }
    config.scan.default_branch_only |= args.default_branch_only;
    config.scan.fail_on_repository_error |= args.fail_on_repository_error;
    config.contributors.exclude_bots |= args.exclude_bots;
    Ok(())
}

/// The effective configuration: the file (if any) with flags applied, or flags alone.
pub fn resolve_config(args: &CountArgs) -> Result<CountConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let provider = args
                .provider
                .as_deref()
                .ok_or(ConfigError::MissingField("provider.type"))?;
            let org = args
                .org
                .as_deref()
                .ok_or(ConfigError::MissingField("provider.org"))?;
            info!(provider, org, "No config file given, configuring from flags");
            CountConfig::for_scope(parse_provider(provider)?, org)
        }
    };
    apply_overrides(&mut config, args)?;
    Ok(config)
}
