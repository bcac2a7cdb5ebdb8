//! Label applier.
//!
//! Adds the decided labels one at a time so a failure on one label does not
//! prevent the others. Labels are never removed.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{ApplyError, TrackerError};
use crate::github::LabelTracker;
use crate::matcher::LabelDecision;
use crate::rules::RuleTable;

/// Attempts per tracker call: the first try plus one retry.
const MAX_ATTEMPTS: u32 = 2;

/// Overall result of applying a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The decision was empty.
    Nothing,
    /// The PR already carried a topic label outside the decision.
    Skipped,
    /// Every label is now present.
    Complete,
    /// Some labels were added, some failed.
    Partial,
    /// No label could be added.
    Failed,
}

/// Per-label record of one application.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub already_present: Vec<String>,
    pub failed: Vec<ApplyError>,
    /// Topic label found on the PR that caused the run to skip.
    pub skipped_for: Option<String>,
}

impl ApplyReport {
    #[must_use]
    pub fn outcome(&self) -> ApplyOutcome {
        if self.skipped_for.is_some() {
            ApplyOutcome::Skipped
        } else if !self.failed.is_empty() {
            if self.applied.is_empty() && self.already_present.is_empty() {
                ApplyOutcome::Failed
            } else {
                ApplyOutcome::Partial
            }
        } else if self.applied.is_empty() && self.already_present.is_empty() {
            ApplyOutcome::Nothing
        } else {
            ApplyOutcome::Complete
        }
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Applies decisions through a [`LabelTracker`].
#[derive(Debug, Clone)]
pub struct LabelApplier {
    retry_delay: Duration,
    skip_if_labeled: bool,
}

impl LabelApplier {
    #[must_use]
    pub fn new(skip_if_labeled: bool) -> Self {
        Self {
            retry_delay: Duration::from_secs(2),
            skip_if_labeled,
        }
    }

    /// Use a different pause before the retry.
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Ensure every label in `decision` is present on the PR.
    pub async fn apply<T>(
        &self,
        tracker: &mut T,
        pr_number: u64,
        decision: &LabelDecision,
        table: &RuleTable,
    ) -> ApplyReport
    where
        T: LabelTracker + ?Sized,
    {
        let mut report = ApplyReport::default();
        if decision.is_empty() {
            info!(pr_number, "No labels to apply");
            return report;
        }

        let existing: HashSet<String> = match self.list_with_retry(tracker, pr_number).await {
            Ok(labels) => labels.into_iter().collect(),
            Err(e) => {
                warn!(
                    pr_number,
                    error = %e,
                    "Could not read existing labels, adding without them"
                );
                HashSet::new()
            }
        };

        if self.skip_if_labeled {
            // Labels this decision would add do not count: a PR carrying only
            // those is a re-run of an incomplete application.
            let mut present: Vec<&String> = existing
                .iter()
                .filter(|l| table.is_known_label(l) && !decision.labels.contains(l))
                .collect();
            present.sort();
            if let Some(label) = present.first() {
                info!(pr_number, label = %label, "PR already has a topic label, skipping");
                report.skipped_for = Some((*label).clone());
                return report;
            }
        }

        for label in &decision.labels {
            if existing.contains(label) {
                info!(pr_number, label = %label, "Label already present");
                report.already_present.push(label.clone());
                continue;
            }

            match self.add_with_retry(tracker, pr_number, label).await {
                Ok(()) => report.applied.push(label.clone()),
                Err(e) => {
                    warn!(pr_number, error = %e, "Failed to apply label");
                    report.failed.push(e);
                }
            }
        }

        info!(
            pr_number,
            applied = ?report.applied,
            already_present = ?report.already_present,
            failed = report.failed.len(),
            outcome = ?report.outcome(),
            "Label application finished"
        );
        report
    }

    async fn list_with_retry<T>(
        &self,
        tracker: &mut T,
        pr_number: u64,
    ) -> Result<Vec<String>, TrackerError>
    where
        T: LabelTracker + ?Sized,
    {
        let mut attempt = 1;
        loop {
            match tracker.list_labels(pr_number).await {
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(error = %e, attempt, "Listing labels failed, retrying");
                    attempt += 1;
                    sleep(self.retry_delay).await;
                }
                result => return result,
            }
        }
    }

    async fn add_with_retry<T>(
        &self,
        tracker: &mut T,
        pr_number: u64,
        label: &str,
    ) -> Result<(), ApplyError>
    where
        T: LabelTracker + ?Sized,
    {
        let mut attempt = 1;
        loop {
            match tracker.add_label(pr_number, label).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(label, error = %e, attempt, "Adding label failed, retrying");
                    attempt += 1;
                    sleep(self.retry_delay).await;
                }
                Err(source) => {
                    return Err(ApplyError {
                        label: label.to_string(),
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::MockLabelTracker;
    use crate::rules::SelectionPolicy;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::path::Path;

    fn table() -> RuleTable {
        RuleTable::from_toml_str(
            r#"
            [[rules]]
            label = "t-algebra"
            dirs = ["Mathlib/Algebra/"]

            [[rules]]
            label = "t-topology"
            dirs = ["Mathlib/Topology/"]
            "#,
            Path::new("test.toml"),
        )
        .unwrap()
    }

    fn decision(labels: &[&str]) -> LabelDecision {
        LabelDecision {
            labels: labels.iter().map(ToString::to_string).collect(),
            policy: SelectionPolicy::All,
        }
    }

    fn applier(skip_if_labeled: bool) -> LabelApplier {
        LabelApplier::new(skip_if_labeled).with_retry_delay(Duration::ZERO)
    }

    fn server_error() -> TrackerError {
        TrackerError::Api {
            status: 502,
            message: "Bad Gateway".to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_decision_makes_no_calls() {
        let mut tracker = MockLabelTracker::new();
        tracker.expect_list_labels().never();
        tracker.expect_add_label().never();

        let report = applier(true)
            .apply(&mut tracker, 1, &decision(&[]), &table())
            .await;
        assert_eq!(report.outcome(), ApplyOutcome::Nothing);
    }

    #[tokio::test]
    async fn test_adds_missing_labels_only() {
        let mut tracker = MockLabelTracker::new();
        tracker
            .expect_list_labels()
            .with(eq(7))
            .returning(|_| Ok(vec!["t-algebra".to_string(), "WIP".to_string()]));
        tracker
            .expect_add_label()
            .withf(|pr, label| *pr == 7 && label == "t-topology")
            .times(1)
            .returning(|_, _| Ok(()));

        let report = applier(false)
            .apply(&mut tracker, 7, &decision(&["t-algebra", "t-topology"]), &table())
            .await;

        assert_eq!(report.applied, vec!["t-topology"]);
        assert_eq!(report.already_present, vec!["t-algebra"]);
        assert_eq!(report.outcome(), ApplyOutcome::Complete);
    }

    #[tokio::test]
    async fn test_skips_when_topic_label_present() {
        let mut tracker = MockLabelTracker::new();
        tracker
            .expect_list_labels()
            .returning(|_| Ok(vec!["t-algebra".to_string()]));
        tracker.expect_add_label().never();

        let report = applier(true)
            .apply(&mut tracker, 3, &decision(&["t-topology"]), &table())
            .await;

        assert_eq!(report.outcome(), ApplyOutcome::Skipped);
        assert_eq!(report.skipped_for.as_deref(), Some("t-algebra"));
    }

    #[tokio::test]
    async fn test_unrelated_labels_do_not_trigger_skip() {
        let mut tracker = MockLabelTracker::new();
        tracker
            .expect_list_labels()
            .returning(|_| Ok(vec!["awaiting-review".to_string()]));
        tracker
            .expect_add_label()
            .times(1)
            .returning(|_, _| Ok(()));

        let report = applier(true)
            .apply(&mut tracker, 3, &decision(&["t-topology"]), &table())
            .await;
        assert_eq!(report.outcome(), ApplyOutcome::Complete);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let mut seq = Sequence::new();
        let mut tracker = MockLabelTracker::new();
        tracker.expect_list_labels().returning(|_| Ok(vec![]));
        tracker
            .expect_add_label()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(server_error()));
        tracker
            .expect_add_label()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let report = applier(true)
            .apply(&mut tracker, 9, &decision(&["t-topology"]), &table())
            .await;
        assert_eq!(report.applied, vec!["t-topology"]);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let mut tracker = MockLabelTracker::new();
        tracker.expect_list_labels().returning(|_| Ok(vec![]));
        tracker.expect_add_label().times(1).returning(|_, _| {
            Err(TrackerError::Api {
                status: 403,
                message: "Resource not accessible by integration".to_string(),
            })
        });

        let report = applier(true)
            .apply(&mut tracker, 9, &decision(&["t-topology"]), &table())
            .await;
        assert_eq!(report.outcome(), ApplyOutcome::Failed);
        assert_eq!(report.failed[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_partial_failure_attempts_every_label() {
        let mut tracker = MockLabelTracker::new();
        tracker.expect_list_labels().returning(|_| Ok(vec![]));
        tracker
            .expect_add_label()
            .withf(|_, label| label == "t-algebra")
            .times(2)
            .returning(|_, _| Err(server_error()));
        tracker
            .expect_add_label()
            .withf(|_, label| label == "t-topology")
            .times(1)
            .returning(|_, _| Ok(()));

        let report = applier(false)
            .apply(&mut tracker, 5, &decision(&["t-algebra", "t-topology"]), &table())
            .await;

        assert_eq!(report.outcome(), ApplyOutcome::Partial);
        assert_eq!(report.applied, vec!["t-topology"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].label, "t-algebra");
        assert_eq!(report.failed[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_rerun_completes_partial_application() {
        let labels = decision(&["t-algebra", "t-topology"]);

        let mut first = MockLabelTracker::new();
        first.expect_list_labels().returning(|_| Ok(vec![]));
        first
            .expect_add_label()
            .withf(|_, label| label == "t-algebra")
            .times(1)
            .returning(|_, _| Ok(()));
        first
            .expect_add_label()
            .withf(|_, label| label == "t-topology")
            .times(2)
            .returning(|_, _| Err(server_error()));

        let report = applier(true).apply(&mut first, 11, &labels, &table()).await;
        assert_eq!(report.outcome(), ApplyOutcome::Partial);

        let mut second = MockLabelTracker::new();
        second
            .expect_list_labels()
            .returning(|_| Ok(vec!["t-algebra".to_string()]));
        second
            .expect_add_label()
            .withf(|_, label| label == "t-topology")
            .times(1)
            .returning(|_, _| Ok(()));

        let report = applier(true).apply(&mut second, 11, &labels, &table()).await;
        assert_eq!(report.outcome(), ApplyOutcome::Complete);
        assert_eq!(report.already_present, vec!["t-algebra"]);
        assert_eq!(report.applied, vec!["t-topology"]);
    }

    #[tokio::test]
    async fn test_list_failure_still_adds() {
        let mut tracker = MockLabelTracker::new();
        tracker.expect_list_labels().times(2).returning(|_| Err(server_error()));
        tracker
            .expect_add_label()
            .times(1)
            .returning(|_, _| Ok(()));

        let report = applier(true)
            .apply(&mut tracker, 5, &decision(&["t-topology"]), &table())
            .await;
        assert_eq!(report.outcome(), ApplyOutcome::Complete);
    }
}
