//! Matcher and decision engine.
//!
//! Both stages are pure: the same change set and rule table always yield
//! the same decision. Ordering never depends on input order or hash-map
//! iteration, since labels live in a `BTreeMap` and every sort uses a total
//! key ending in the label name.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::rules::{RuleTable, SelectionPolicy, Settings, Specificity};

/// Deduplicated set of paths changed by a pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet(BTreeSet<String>);

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path as given; blank entries are dropped.
    pub fn insert(&mut self, path: impl Into<String>) {
        let path = path.into();
        if path.trim().is_empty() {
            return;
        }
        let normalized = crate::rules::normalize_path(&path);
        if !normalized.is_empty() {
            self.0.insert(normalized.to_string());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for path in iter {
            set.insert(path);
        }
        set
    }
}

/// Files that matched a single label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelMatch {
    pub files: Vec<String>,
    /// Best specificity among the patterns that matched.
    pub specificity: Specificity,
}

/// Per-label matches for one change set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub labels: BTreeMap<String, LabelMatch>,
    pub unmatched: Vec<String>,
    pub ignored: Vec<String>,
}

impl MatchResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// The labels a run should add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelDecision {
    pub labels: Vec<String>,
    pub policy: SelectionPolicy,
}

impl LabelDecision {
    #[must_use]
    pub fn empty(policy: SelectionPolicy) -> Self {
        Self {
            labels: Vec::new(),
            policy,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Match every changed file against every rule.
#[must_use]
pub fn evaluate(changes: &ChangeSet, table: &RuleTable) -> MatchResult {
    let mut result = MatchResult::default();

    for path in changes.iter() {
        if table.is_ignored(path) {
            result.ignored.push(path.to_string());
            continue;
        }

        let mut matched = false;
        for rule in table.rules() {
            let Some(specificity) = rule.best_match(path) else {
                continue;
            };
            matched = true;
            let entry = result
                .labels
                .entry(rule.label.clone())
                .or_insert_with(|| LabelMatch {
                    files: Vec::new(),
                    specificity,
                });
            entry.files.push(path.to_string());
            entry.specificity = entry.specificity.max(specificity);
        }

        if !matched {
            result.unmatched.push(path.to_string());
        }
    }

    debug!(
        files = changes.len(),
        labels = result.labels.len(),
        unmatched = result.unmatched.len(),
        ignored = result.ignored.len(),
        "Evaluated change set"
    );
    result
}

/// Resolve matches into a decision under the table's settings.
#[must_use]
pub fn decide(matches: &MatchResult, settings: &Settings) -> LabelDecision {
    let mut ranked: Vec<(&String, &LabelMatch)> = matches.labels.iter().collect();

    match settings.policy {
        SelectionPolicy::All => {
            ranked.sort_by_key(|(label, m)| (Reverse(m.files.len()), *label));
        }
        SelectionPolicy::LongestPrefix => {
            ranked.sort_by_key(|(label, m)| {
                (Reverse(m.specificity), Reverse(m.files.len()), *label)
            });
        }
        SelectionPolicy::Unique => {
            if ranked.len() != 1 {
                if ranked.len() > 1 {
                    debug!(
                        candidates = ?matches.labels.keys().collect::<Vec<_>>(),
                        "Several labels matched, unique policy applies none"
                    );
                }
                return LabelDecision::empty(settings.policy);
            }
        }
    }

    let cap = settings.cap().unwrap_or(usize::MAX);
    LabelDecision {
        labels: ranked
            .into_iter()
            .take(cap)
            .map(|(label, _)| label.clone())
            .collect(),
        policy: settings.policy,
    }
}

/// Evaluate and decide in one step.
#[must_use]
pub fn label_decision(changes: &ChangeSet, table: &RuleTable) -> LabelDecision {
    decide(&evaluate(changes, table), table.settings())
}
