//! Topic labeling for pull requests.
//!
//! `autolabel` looks at the files a pull request changes, matches them
//! against a table of path patterns owned by topic labels, and adds the
//! resulting labels through the issue tracker.
//!
//! # Architecture
//!
//! The run is a linear, stateless pipeline:
//!
//! - [`diff::GitDiffFetcher`] computes the changed files against a base ref
//! - [`matcher::evaluate`] and [`matcher::decide`] turn them into a
//!   [`matcher::LabelDecision`] (pure)
//! - [`applier::LabelApplier`] adds the labels through a
//!   [`github::LabelTracker`], collecting per-label failures
//!
//! [`pipeline::Pipeline`] drives the three stages in order, and
//! [`pipeline::label_pull_request`] wires them up from a [`config::RunConfig`].

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod applier;
pub mod config;
pub mod diff;
pub mod error;
pub mod github;
pub mod matcher;
pub mod output;
pub mod pipeline;
pub mod rules;

pub use applier::{ApplyOutcome, ApplyReport, LabelApplier};
pub use config::{GitHubSettings, Repository, RunConfig, RunInputs};
pub use diff::{ChangeSource, GitDiffFetcher};
pub use error::{ApplyError, AutolabelError, ConfigError, FetchError, TrackerError};
pub use github::{GitHubLabelClient, LabelTracker};
pub use matcher::{ChangeSet, LabelDecision, MatchResult};
pub use pipeline::{label_pull_request, Pipeline, RunSummary, Stage};
pub use rules::{RuleTable, SelectionPolicy, Settings};
