//! One-shot labeling pipeline: fetch, match, apply.

use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::applier::{ApplyReport, LabelApplier};
use crate::config::RunConfig;
use crate::diff::{ChangeSource, GitDiffFetcher};
use crate::error::AutolabelError;
use crate::github::{GitHubLabelClient, LabelTracker};
use crate::matcher::{self, LabelDecision, MatchResult};
use crate::rules::RuleTable;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Fetching,
    Matching,
    Applying,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Matching => "matching",
            Self::Applying => "applying",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a finished run did.
#[derive(Debug)]
pub struct RunSummary {
    pub pr_number: u64,
    pub changed_files: usize,
    pub matches: MatchResult,
    pub decision: LabelDecision,
    /// `None` when the run did not apply anything (dry run).
    pub report: Option<ApplyReport>,
}

impl RunSummary {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.report.as_ref().is_some_and(ApplyReport::has_failures)
    }
}

/// Drives the stages strictly in order for one pull request.
pub struct Pipeline<'a, S: ?Sized> {
    source: &'a S,
    table: &'a RuleTable,
    applier: LabelApplier,
    stage: Stage,
}

impl<'a, S> Pipeline<'a, S>
where
    S: ChangeSource + ?Sized,
{
    #[must_use]
    pub fn new(source: &'a S, table: &'a RuleTable) -> Self {
        Self {
            source,
            table,
            applier: LabelApplier::new(table.settings().skip_if_labeled),
            stage: Stage::Idle,
        }
    }

    /// Replace the applier, e.g. to shorten retry delays.
    #[must_use]
    pub fn with_applier(mut self, applier: LabelApplier) -> Self {
        self.applier = applier;
        self
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn transition(&mut self, next: Stage) {
        debug!(from = %self.stage, to = %next, "Pipeline stage");
        self.stage = next;
    }

    /// Run the pipeline. Without a tracker the applying stage is skipped.
    pub async fn run<T>(
        &mut self,
        pr_number: u64,
        tracker: Option<&mut T>,
    ) -> Result<RunSummary, AutolabelError>
    where
        T: LabelTracker + ?Sized,
    {
        self.transition(Stage::Fetching);
        let changes = match self.source.changed_files(pr_number).await {
            Ok(changes) => changes,
            Err(e) => {
                self.transition(Stage::Failed);
                error!(pr_number, error = %e, "Failed to fetch changed files");
                return Err(e.into());
            }
        };

        self.transition(Stage::Matching);
        let matches = matcher::evaluate(&changes, self.table);
        let decision = matcher::decide(&matches, self.table.settings());
        info!(
            pr_number,
            labels = ?decision.labels,
            policy = %decision.policy,
            "Resolved label decision"
        );

        let report = match tracker {
            Some(tracker) => {
                self.transition(Stage::Applying);
                Some(
                    self.applier
                        .apply(tracker, pr_number, &decision, self.table)
                        .await,
                )
            }
            None => {
                info!(pr_number, "Dry run, not applying labels");
                None
            }
        };

        self.transition(Stage::Done);
        Ok(RunSummary {
            pr_number,
            changed_files: changes.len(),
            matches,
            decision,
            report,
        })
    }
}

/// Label one pull request as described by `config`: load its rule table,
/// diff the checkout and, unless this is a dry run, apply through GitHub.
pub async fn label_pull_request(config: &RunConfig) -> Result<RunSummary, AutolabelError> {
    let table = RuleTable::load(&config.rules_path)?;

    info!(
        pr_number = config.pr_number,
        base = %config.base_ref,
        head = %config.head_ref,
        rules = table.rules().len(),
        dry_run = config.is_dry_run(),
        "Starting autolabel run"
    );

    let mut client = config
        .github
        .as_ref()
        .map(GitHubLabelClient::new)
        .transpose()?;

    let fetcher =
        GitDiffFetcher::new(&config.repo_dir, &config.base_ref).with_head(&config.head_ref);
    let mut pipeline = Pipeline::new(&fetcher, &table);
    let summary = pipeline.run(config.pr_number, client.as_mut()).await?;
    Ok(summary)
}
