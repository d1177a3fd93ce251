use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;

use lgtm_core::ReviewPolicy;

#[derive(Clone)]
pub struct Config {
    pub github_app_id: u64,
    pub github_private_key: String,
    pub github_webhook_secret: String,
    /// Base URL of the OWNERS cache service.
    pub owners_service_url: String,
    pub policy_path: PathBuf,
    pub port: u16,
    pub log_level: Level,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let github_app_id = env::var("GITHUB_APP_ID")
            .context("GITHUB_APP_ID environment variable is required")?
            .parse::<u64>()
            .context("GITHUB_APP_ID must be a valid number")?;

        let github_private_key = env::var("GITHUB_PRIVATE_KEY")
            .context("GITHUB_PRIVATE_KEY environment variable is required")?
            .replace("\\n", "\n");

        let github_webhook_secret = env::var("GITHUB_WEBHOOK_SECRET")
            .context("GITHUB_WEBHOOK_SECRET environment variable is required")?;

        let owners_service_url = env::var("OWNERS_SERVICE_URL")
            .context("OWNERS_SERVICE_URL environment variable is required")?;

        let policy_path = env::var("LGTM_POLICY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("lgtm.toml"));

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let log_level = parse_log_level(env::var("LOG_LEVEL").ok().as_deref())?;

        Ok(Config {
            github_app_id,
            github_private_key,
            github_webhook_secret,
            owners_service_url,
            policy_path,
            port,
            log_level,
        })
    }
}

/// Parse LOG_LEVEL, defaulting to INFO when unset or blank.
pub fn parse_log_level(value: Option<&str>) -> Result<Level> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Level::INFO),
        Some(level) => Level::from_str(level)
            .map_err(|_| anyhow::anyhow!("LOG_LEVEL must be one of trace, debug, info, warn, error")),
    }
}

/// Review policies for the repositories the app serves.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub config_items: Vec<PolicyItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyItem {
    /// Entries of the form `org` or `org/repo`.
    pub repos: Vec<String>,
    #[serde(default)]
    pub excluded_repos: Vec<String>,
    #[serde(flatten)]
    pub policy: ReviewPolicy,
}

impl PolicyItem {
    fn admits(&self, org: &str, full_name: &str, exact: bool) -> bool {
        if exact {
            self.repos.iter().any(|r| r == full_name)
        } else {
            self.repos.iter().any(|r| r == org)
                && !self.excluded_repos.iter().any(|r| r == full_name)
        }
    }
}

impl PolicyFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid policy file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let file: PolicyFile = toml::from_str(text).context("Failed to parse policy TOML")?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<()> {
        for (i, item) in self.config_items.iter().enumerate() {
            if item.repos.is_empty() {
                bail!("config_items[{}]: repos must not be empty", i);
            }
            if item.policy.label.trim().is_empty() {
                bail!("config_items[{}]: label must not be empty", i);
            }
        }
        Ok(())
    }

    /// The policy for `org/repo`. A repository entry beats an org-wide one.
    pub fn policy_for(&self, org: &str, repo: &str) -> Option<&ReviewPolicy> {
        let full_name = format!("{}/{}", org, repo);
        self.config_items
            .iter()
            .find(|item| item.admits(org, &full_name, true))
            .or_else(|| {
                self.config_items
                    .iter()
                    .find(|item| item.admits(org, &full_name, false))
            })
            .map(|item| &item.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"
[[config_items]]
repos = ["acme"]
excluded_repos = ["acme/legacy"]
store_tree_hash = true
sticky_lgtm_team = "release-managers"

[[config_items]]
repos = ["acme/kernel"]
strict_review = true
label = "approved"
"#;

    #[test]
    fn test_policy_for_prefers_repo_entry() {
        let file = PolicyFile::parse(POLICY).unwrap();

        let kernel = file.policy_for("acme", "kernel").unwrap();
        assert!(kernel.strict_review);
        assert_eq!(kernel.label, "approved");

        let tools = file.policy_for("acme", "tools").unwrap();
        assert!(!tools.strict_review);
        assert!(tools.store_tree_hash);
        assert_eq!(tools.label, "lgtm");
        assert_eq!(tools.sticky_lgtm_team.as_deref(), Some("release-managers"));
    }

    #[test]
    fn test_policy_for_excluded_and_unknown() {
        let file = PolicyFile::parse(POLICY).unwrap();
        assert!(file.policy_for("acme", "legacy").is_none());
        assert!(file.policy_for("other", "repo").is_none());
    }

    #[test]
    fn test_validation_rejects_empty_repos() {
        let err = PolicyFile::parse("[[config_items]]\nrepos = []\n").unwrap_err();
        assert!(format!("{:#}", err).contains("repos must not be empty"));
    }

    #[test]
    fn test_empty_file_has_no_policies() {
        let file = PolicyFile::parse("").unwrap();
        assert!(file.policy_for("acme", "tools").is_none());
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level(None).unwrap(), Level::INFO);
        assert_eq!(parse_log_level(Some("  ")).unwrap(), Level::INFO);
        assert_eq!(parse_log_level(Some("debug")).unwrap(), Level::DEBUG);
        assert!(parse_log_level(Some("loud")).is_err());
    }
}
