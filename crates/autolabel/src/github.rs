//! # GitHub Label API Client
//!
//! Issue-tracker access behind the [`LabelTracker`] trait, plus the GitHub
//! REST implementation used in CI. Labels are only ever added: adding a label
//! that is already present is a no-op on GitHub's side.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header, Client as HttpClient, Method, Response};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::config::GitHubSettings;
use crate::error::TrackerError;

const USER_AGENT: &str = concat!("autolabel/", env!("CARGO_PKG_VERSION"));

/// Minimal label capability of an issue tracker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabelTracker: Send {
    /// Labels currently on the pull request.
    async fn list_labels(&mut self, pr_number: u64) -> Result<Vec<String>, TrackerError>;

    /// Add one label to the pull request.
    async fn add_label(&mut self, pr_number: u64, label: &str) -> Result<(), TrackerError>;
}

/// GitHub API client for label operations
#[derive(Clone)]
pub struct GitHubLabelClient {
    http_client: HttpClient,
    base_url: String,
    token: String,
    owner: String,
    repo: String,
    rate_limit_remaining: i32,
    rate_limit_reset: Option<Instant>,
}

#[derive(Debug, Deserialize)]
struct GitHubError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GitHubLabel {
    name: String,
}

impl GitHubLabelClient {
    /// Create a client from explicit settings.
    pub fn new(settings: &GitHubSettings) -> Result<Self, TrackerError> {
        if settings.token.trim().is_empty() {
            return Err(TrackerError::AuthenticationFailed(
                "empty API token".to_string(),
            ));
        }

        let http_client = HttpClient::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            owner: settings.repository.owner.clone(),
            repo: settings.repository.name.clone(),
            rate_limit_remaining: 5000, // GitHub's default rate limit
            rate_limit_reset: None,
        })
    }

    fn labels_url(&self, pr_number: u64) -> String {
        format!(
            "{}/repos/{}/{}/issues/{}/labels",
            self.base_url, self.owner, self.repo, pr_number
        )
    }

    /// Make an HTTP request with rate limit tracking
    async fn make_request(
        &mut self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response, TrackerError> {
        self.check_rate_limit()?;

        let mut request = self
            .http_client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        self.update_rate_limit(&response);

        let status = response.status().as_u16();
        if status == 401 {
            return Err(TrackerError::AuthenticationFailed(
                "token rejected by GitHub".to_string(),
            ));
        }
        if status == 403 || status == 429 {
            if let Some(reset_in) = Self::exhausted_rate_limit(&response) {
                return Err(TrackerError::RateLimitExceeded { reset_in });
            }
        }

        Ok(response)
    }

    /// Turn a non-success response into an API error.
    async fn api_error(response: Response) -> TrackerError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GitHubError>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        TrackerError::Api { status, message }
    }

    /// Check if we're within rate limits
    fn check_rate_limit(&self) -> Result<(), TrackerError> {
        if let Some(reset_time) = self.rate_limit_reset {
            let now = Instant::now();
            if self.rate_limit_remaining <= 0 && now < reset_time {
                return Err(TrackerError::RateLimitExceeded {
                    reset_in: reset_time - now,
                });
            }
        }
        Ok(())
    }

    /// Update rate limit tracking from response headers
    fn update_rate_limit(&mut self, response: &Response) {
        if let Some(remaining) = header_value::<i32>(response, "x-ratelimit-remaining") {
            self.rate_limit_remaining = remaining;
        }
        if let Some(reset_in) = Self::rate_limit_reset_in(response) {
            self.rate_limit_reset = Some(Instant::now() + reset_in);
        }
    }

    /// Time until reset, when the response says the quota is used up.
    fn exhausted_rate_limit(response: &Response) -> Option<Duration> {
        match header_value::<i32>(response, "x-ratelimit-remaining") {
            Some(0) => Self::rate_limit_reset_in(response),
            _ => None,
        }
    }

    fn rate_limit_reset_in(response: &Response) -> Option<Duration> {
        header_value::<i64>(response, "x-ratelimit-reset").map(|reset_timestamp| {
            let now = chrono::Utc::now().timestamp();
            let seconds_until_reset = (reset_timestamp - now).max(0) as u64;
            Duration::from_secs(seconds_until_reset)
        })
    }
}

fn header_value<T: std::str::FromStr>(response: &Response, name: &str) -> Option<T> {
    response
        .headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<T>().ok())
}

#[async_trait]
impl LabelTracker for GitHubLabelClient {
    #[instrument(skip(self), fields(pr_number = %pr_number))]
    async fn list_labels(&mut self, pr_number: u64) -> Result<Vec<String>, TrackerError> {
        let url = format!("{}?per_page=100", self.labels_url(pr_number));
        let response = self.make_request(Method::GET, &url, None).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let labels: Vec<GitHubLabel> = response.json().await?;
        let labels: Vec<String> = labels.into_iter().map(|label| label.name).collect();

        debug!("Retrieved {} labels for PR #{}", labels.len(), pr_number);
        Ok(labels)
    }

    #[instrument(skip(self), fields(pr_number = %pr_number, label = %label))]
    async fn add_label(&mut self, pr_number: u64, label: &str) -> Result<(), TrackerError> {
        let url = self.labels_url(pr_number);
        let body = serde_json::json!({ "labels": [label] });
        let response = self.make_request(Method::POST, &url, Some(body)).await?;

        if response.status().is_success() {
            info!("Added label '{}' to PR #{}", label, pr_number);
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }
}
