//! Run configuration.
//!
//! Everything that comes from the process environment (token, repository,
//! PR number, refs) is collected here once by the binary and handed down
//! explicitly. Library code never reads environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Default GitHub REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Default rule table location, relative to the working directory.
pub const DEFAULT_RULES_PATH: &str = "autolabel.toml";

/// Default base reference for the diff.
pub const DEFAULT_BASE_REF: &str = "origin/master";

/// An `OWNER/NAME` repository identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl FromStr for Repository {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(ConfigError::InvalidRepository(s.to_string())),
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Credentials and target for the issue tracker.
#[derive(Clone)]
pub struct GitHubSettings {
    pub token: String,
    pub repository: Repository,
    pub api_url: String,
}

impl fmt::Debug for GitHubSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubSettings")
            .field("token", &"[REDACTED]")
            .field("repository", &self.repository)
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Everything a `run` invocation needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub pr_number: u64,
    pub rules_path: PathBuf,
    pub repo_dir: PathBuf,
    pub base_ref: String,
    pub head_ref: String,
    /// `None` in dry-run mode.
    pub github: Option<GitHubSettings>,
}

/// Unvalidated inputs, as collected from flags and environment.
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    pub pr_number: Option<u64>,
    pub rules_path: Option<PathBuf>,
    pub repo_dir: Option<PathBuf>,
    pub base_ref: Option<String>,
    pub head_ref: Option<String>,
    pub repository: Option<String>,
    pub token: Option<String>,
    pub api_url: Option<String>,
    pub dry_run: bool,
}

impl RunConfig {
    /// Validate inputs. The token is only required when labels will be applied.
    pub fn from_inputs(inputs: RunInputs) -> Result<Self, ConfigError> {
        let pr_number = inputs.pr_number.ok_or(ConfigError::Missing("PR number"))?;

        let github = if inputs.dry_run {
            None
        } else {
            let repository = inputs
                .repository
                .as_deref()
                .ok_or(ConfigError::Missing("repository (OWNER/NAME)"))?
                .parse::<Repository>()?;
            let token = inputs
                .token
                .filter(|t| !t.trim().is_empty())
                .ok_or(ConfigError::Missing("API token"))?;
            Some(GitHubSettings {
                token,
                repository,
                api_url: inputs.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            })
        };

        Ok(Self {
            pr_number,
            rules_path: inputs
                .rules_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RULES_PATH)),
            repo_dir: inputs.repo_dir.unwrap_or_else(|| PathBuf::from(".")),
            base_ref: inputs
                .base_ref
                .unwrap_or_else(|| DEFAULT_BASE_REF.to_string()),
            head_ref: inputs.head_ref.unwrap_or_else(|| "HEAD".to_string()),
            github,
        })
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.github.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> RunInputs {
        RunInputs {
            pr_number: Some(4242),
            repository: Some("leanprover-community/mathlib4".to_string()),
            token: Some("ghp_test".to_string()),
            ..RunInputs::default()
        }
    }

    #[test]
    fn test_repository_parsing() {
        let repo: Repository = "leanprover-community/mathlib4".parse().unwrap();
        assert_eq!(repo.owner, "leanprover-community");
        assert_eq!(repo.name, "mathlib4");
        assert_eq!(repo.to_string(), "leanprover-community/mathlib4");

        assert!("mathlib4".parse::<Repository>().is_err());
        assert!("/mathlib4".parse::<Repository>().is_err());
        assert!("a/b/c".parse::<Repository>().is_err());
    }

    #[test]
    fn test_defaults_applied() {
        let config = RunConfig::from_inputs(inputs()).unwrap();
        assert_eq!(config.pr_number, 4242);
        assert_eq!(config.base_ref, DEFAULT_BASE_REF);
        assert_eq!(config.head_ref, "HEAD");
        assert_eq!(config.rules_path, PathBuf::from(DEFAULT_RULES_PATH));
        let github = config.github.unwrap();
        assert_eq!(github.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_token_required_unless_dry_run() {
        let mut missing_token = inputs();
        missing_token.token = None;
        assert!(matches!(
            RunConfig::from_inputs(missing_token.clone()),
            Err(ConfigError::Missing("API token"))
        ));

        missing_token.dry_run = true;
        missing_token.repository = None;
        let config = RunConfig::from_inputs(missing_token).unwrap();
        assert!(config.is_dry_run());
    }

    #[test]
    fn test_pr_number_required() {
        let mut no_pr = inputs();
        no_pr.pr_number = None;
        assert!(matches!(
            RunConfig::from_inputs(no_pr),
            Err(ConfigError::Missing("PR number"))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = RunConfig::from_inputs(inputs()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("ghp_test"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
