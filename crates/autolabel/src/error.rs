//! Error types for the labeling pipeline.
//!
//! `FetchError` and `ConfigError` are fatal and abort a run before anything
//! is applied. `TrackerError` comes from the issue tracker and is wrapped in
//! an `ApplyError` per label, so one failing label never hides the others.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while computing the set of changed files.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The `git` binary could not be spawned
    #[error("failed to run git: {0}")]
    GitUnavailable(#[from] std::io::Error),

    /// The base reference does not name a commit
    #[error("base reference '{reference}' cannot be resolved: {stderr}")]
    BaseUnresolvable { reference: String, stderr: String },

    /// The head reference does not name a commit
    #[error("head reference '{reference}' cannot be resolved: {stderr}")]
    HeadUnresolvable { reference: String, stderr: String },

    /// Base and head share no history
    #[error("no merge base between '{base}' and '{head}'")]
    NoMergeBase { base: String, head: String },

    /// `git diff` exited unsuccessfully
    #[error("git diff failed: {0}")]
    DiffFailed(String),

    /// git produced output that is not valid UTF-8
    #[error("git returned non UTF-8 output: {0}")]
    InvalidOutput(#[from] std::string::FromUtf8Error),
}

/// Errors raised while loading the rule table or the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read rule table {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rule table {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("rule #{index} has an empty label")]
    EmptyLabel { index: usize },

    #[error("label '{0}' is defined more than once")]
    DuplicateLabel(String),

    #[error("label '{0}' has no path patterns")]
    NoPatterns(String),

    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("repository must be in OWNER/NAME form, got '{0}'")]
    InvalidRepository(String),
}

/// Errors returned by an issue tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limit exceeded, reset in {reset_in:?}")]
    RateLimitExceeded { reset_in: Duration },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrackerError {
    /// Whether a single retry has a reasonable chance of succeeding.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::RateLimitExceeded { .. }
            | Self::AuthenticationFailed(_)
            | Self::Serialization(_) => false,
        }
    }
}

/// A label that could not be added.
#[derive(Debug, Error)]
#[error("failed to add label '{label}' after {attempts} attempt(s): {source}")]
pub struct ApplyError {
    pub label: String,
    pub attempts: u32,
    #[source]
    pub source: TrackerError,
}

/// Fatal errors that abort a run.
#[derive(Debug, Error)]
pub enum AutolabelError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_transience() {
        let server_error = TrackerError::Api {
            status: 502,
            message: "Bad Gateway".to_string(),
        };
        assert!(server_error.is_transient());

        let throttled = TrackerError::Api {
            status: 429,
            message: "slow down".to_string(),
        };
        assert!(throttled.is_transient());

        let forbidden = TrackerError::Api {
            status: 403,
            message: "Resource not accessible by integration".to_string(),
        };
        assert!(!forbidden.is_transient());
    }

    #[test]
    fn test_rate_limit_is_not_retried() {
        let err = TrackerError::RateLimitExceeded {
            reset_in: Duration::from_secs(600),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_apply_error_message_names_label() {
        let err = ApplyError {
            label: "t-topology".to_string(),
            attempts: 2,
            source: TrackerError::Api {
                status: 500,
                message: "boom".to_string(),
            },
        };
        let message = err.to_string();
        assert!(message.contains("t-topology"));
        assert!(message.contains("2 attempt"));
    }
}
