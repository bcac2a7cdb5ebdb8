//! Diff fetcher.
//!
//! Uses `tokio::process::Command` to ask git which paths a pull request
//! changes relative to its base reference.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::error::FetchError;
use crate::matcher::ChangeSet;

/// Source of the paths changed by a pull request.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    async fn changed_files(&self, pr_number: u64) -> Result<ChangeSet, FetchError>;
}

/// Computes changed files from a local checkout.
///
/// The checkout must contain both the base and head commits, which in CI
/// means cloning with enough history (`fetch-depth: 0`).
#[derive(Debug, Clone)]
pub struct GitDiffFetcher {
    repo_dir: PathBuf,
    base_ref: String,
    head_ref: String,
}

impl GitDiffFetcher {
    #[must_use]
    pub fn new(repo_dir: impl Into<PathBuf>, base_ref: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            base_ref: base_ref.into(),
            head_ref: "HEAD".to_string(),
        }
    }

    /// Diff against `head_ref` instead of `HEAD`.
    #[must_use]
    pub fn with_head(mut self, head_ref: impl Into<String>) -> Self {
        self.head_ref = head_ref.into();
        self
    }

    #[must_use]
    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn git(&self, args: &[&str]) -> Result<Output, FetchError> {
        debug!(?args, "Running git");
        Ok(Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await?)
    }

    async fn resolve(&self, reference: &str) -> Result<String, String> {
        let revision = format!("{reference}^{{commit}}");
        match self.git(&["rev-parse", "--verify", "--quiet", &revision]).await {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(output) => Err(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn merge_base(&self, base: &str, head: &str) -> Result<String, FetchError> {
        let output = self.git(&["merge-base", base, head]).await?;
        if !output.status.success() {
            return Err(FetchError::NoMergeBase {
                base: self.base_ref.clone(),
                head: self.head_ref.clone(),
            });
        }
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }
}

#[async_trait]
impl ChangeSource for GitDiffFetcher {
    #[instrument(skip(self), fields(base = %self.base_ref, head = %self.head_ref))]
    async fn changed_files(&self, pr_number: u64) -> Result<ChangeSet, FetchError> {
        // Surface a missing git binary before it gets mistaken for a bad ref
        self.git(&["--version"]).await?;

        let base = self
            .resolve(&self.base_ref)
            .await
            .map_err(|stderr| FetchError::BaseUnresolvable {
                reference: self.base_ref.clone(),
                stderr,
            })?;
        let head = self
            .resolve(&self.head_ref)
            .await
            .map_err(|stderr| FetchError::HeadUnresolvable {
                reference: self.head_ref.clone(),
                stderr,
            })?;

        let merge_base = self.merge_base(&base, &head).await?;
        debug!(%merge_base, "Resolved merge base");

        let output = self
            .git(&["diff", "--name-only", "--no-renames", "-z", &merge_base, &head])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::DiffFailed(stderr.trim().to_string()));
        }

        let changes = parse_name_only(&String::from_utf8(output.stdout)?);
        info!(
            pr_number,
            changed_files = changes.len(),
            "Fetched changed files"
        );
        Ok(changes)
    }
}

/// Parse NUL-separated `git diff --name-only -z` output.
fn parse_name_only(stdout: &str) -> ChangeSet {
    stdout.split('\0').collect()
}
