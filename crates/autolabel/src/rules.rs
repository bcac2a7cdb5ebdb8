//! # Label Rule Table
//!
//! Rules map a topic label to the path patterns it owns. The table is read
//! once from TOML at startup and never mutated afterwards.
//!
//! ```toml
//! [settings]
//! policy = "longest-prefix"
//! max_labels = 1
//!
//! [[rules]]
//! label = "t-topology"
//! dirs = ["Mathlib/Topology/"]
//! exclusions = ["Mathlib/Topology/Category/"]
//! ```
//!
//! ## Pattern semantics
//!
//! - A pattern without wildcards is a **prefix** compared component by
//!   component: `Mathlib/Topology` matches `Mathlib/Topology/Basic.lean` but
//!   not `Mathlib/TopologyExtra.lean`. A trailing `/` is insignificant.
//! - A pattern containing `*`, `?`, `[` or `{` is a **glob**. `*` stays within
//!   one path component and `**` crosses them. Like a prefix, a glob also
//!   matches everything below the paths it names, with or without a
//!   trailing `/`.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

const GLOB_META: &[char] = &['*', '?', '[', '{'];

/// How competing labels are resolved into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Every matching label, most-matched first.
    All,
    /// Most specific pattern first.
    #[default]
    LongestPrefix,
    /// A label only when it is the single one that matched.
    Unique,
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::LongestPrefix => write!(f, "longest-prefix"),
            Self::Unique => write!(f, "unique"),
        }
    }
}

/// Table-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    /// Resolution policy for multiple matching labels.
    pub policy: SelectionPolicy,
    /// Largest number of labels a decision may hold; `0` means no cap.
    pub max_labels: usize,
    /// Leave the PR alone when it already carries one of the table's labels.
    pub skip_if_labeled: bool,
    /// Patterns whose files never count towards any label.
    pub ignore: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::LongestPrefix,
            max_labels: 1,
            skip_if_labeled: true,
            ignore: Vec::new(),
        }
    }
}

impl Settings {
    /// The cap applied to a decision, if any.
    #[must_use]
    pub fn cap(&self) -> Option<usize> {
        (self.max_labels > 0).then_some(self.max_labels)
    }
}

/// How literal a pattern is. Longer literal prefixes are more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub struct Specificity {
    /// Complete literal path components.
    pub components: usize,
    /// Literal characters before the first wildcard.
    pub chars: usize,
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub enum PathPattern {
    Prefix {
        raw: String,
        components: Vec<String>,
    },
    Glob {
        raw: String,
        matcher: GlobSet,
        specificity: Specificity,
    },
}

impl PathPattern {
    /// Compile a raw pattern string.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = normalize_path(raw.trim());
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidPattern {
                pattern: raw.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }

        if trimmed.contains(GLOB_META) {
            let base = trimmed.trim_end_matches('/');
            let mut builder = GlobSetBuilder::new();
            for expanded in [base.to_string(), format!("{base}/**")] {
                let glob = GlobBuilder::new(&expanded)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| ConfigError::InvalidPattern {
                        pattern: raw.to_string(),
                        reason: e.to_string(),
                    })?;
                builder.add(glob);
            }
            let matcher = builder.build().map_err(|e| ConfigError::InvalidPattern {
                pattern: raw.to_string(),
                reason: e.to_string(),
            })?;

            let literal = trimmed.split(GLOB_META).next().unwrap_or_default();
            let specificity = Specificity {
                components: literal.matches('/').count(),
                chars: literal.len(),
            };

            return Ok(Self::Glob {
                raw: raw.to_string(),
                matcher,
                specificity,
            });
        }

        let components = split_components(trimmed);
        if components.is_empty() {
            return Err(ConfigError::InvalidPattern {
                pattern: raw.to_string(),
                reason: "pattern names no path component".to_string(),
            });
        }

        Ok(Self::Prefix {
            raw: raw.to_string(),
            components,
        })
    }

    /// The pattern as written in the rule table.
    #[must_use]
    pub fn raw(&self) -> &str {
        match self {
            Self::Prefix { raw, .. } | Self::Glob { raw, .. } => raw,
        }
    }

    /// Whether `path` falls under this pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let path = normalize_path(path);
        match self {
            Self::Prefix { components, .. } => {
                let mut parts = path.split('/').filter(|c| !c.is_empty());
                components
                    .iter()
                    .all(|expected| parts.next() == Some(expected.as_str()))
            }
            Self::Glob { matcher, .. } => matcher.is_match(path),
        }
    }

    #[must_use]
    pub fn specificity(&self) -> Specificity {
        match self {
            Self::Prefix { components, .. } => Specificity {
                components: components.len(),
                chars: components.iter().map(String::len).sum::<usize>()
                    + components.len().saturating_sub(1),
            },
            Self::Glob { specificity, .. } => *specificity,
        }
    }

    /// Relative filesystem path named by a prefix pattern. Globs have none.
    #[must_use]
    pub fn literal_path(&self) -> Option<PathBuf> {
        match self {
            Self::Prefix { components, .. } => Some(components.iter().collect()),
            Self::Glob { .. } => None,
        }
    }
}

/// Strip a leading `./` so paths from different sources compare equal.
pub(crate) fn normalize_path(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

fn split_components(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// One topic label and the paths it owns.
#[derive(Debug, Clone)]
pub struct LabelRule {
    pub label: String,
    pub dirs: Vec<PathPattern>,
    pub exclusions: Vec<PathPattern>,
}

impl LabelRule {
    /// The most specific `dirs` pattern matching `path`, unless an exclusion
    /// also matches it.
    #[must_use]
    pub fn best_match(&self, path: &str) -> Option<Specificity> {
        if self.exclusions.iter().any(|p| p.matches(path)) {
            return None;
        }
        self.dirs
            .iter()
            .filter(|p| p.matches(path))
            .map(PathPattern::specificity)
            .max()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRuleTable {
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    label: String,
    dirs: Vec<String>,
    #[serde(default)]
    exclusions: Vec<String>,
}

/// The immutable rule table for one run.
#[derive(Debug, Clone)]
pub struct RuleTable {
    settings: Settings,
    ignore: Vec<PathPattern>,
    rules: Vec<LabelRule>,
}

impl RuleTable {
    /// Read and compile a rule table from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_toml_str(&contents, path)?;
        debug!(
            path = %path.display(),
            rules = table.rules.len(),
            policy = %table.settings.policy,
            "Loaded rule table"
        );
        Ok(table)
    }

    /// Compile a rule table from TOML text. `origin` is only used in errors.
    pub fn from_toml_str(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let raw: RawRuleTable = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            source: Box::new(e),
        })?;
        Self::compile(raw)
    }

    fn compile(raw: RawRuleTable) -> Result<Self, ConfigError> {
        let ignore = raw
            .settings
            .ignore
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(raw.rules.len());
        for (index, rule) in raw.rules.into_iter().enumerate() {
            let label = rule.label.trim().to_string();
            if label.is_empty() {
                return Err(ConfigError::EmptyLabel { index });
            }
            if !seen.insert(label.clone()) {
                return Err(ConfigError::DuplicateLabel(label));
            }
            if rule.dirs.is_empty() {
                return Err(ConfigError::NoPatterns(label));
            }

            let dirs = rule
                .dirs
                .iter()
                .map(|p| PathPattern::parse(p))
                .collect::<Result<Vec<_>, _>>()?;
            let exclusions = rule
                .exclusions
                .iter()
                .map(|p| PathPattern::parse(p))
                .collect::<Result<Vec<_>, _>>()?;

            rules.push(LabelRule {
                label,
                dirs,
                exclusions,
            });
        }

        Ok(Self {
            settings: raw.settings,
            ignore,
            rules,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn rules(&self) -> &[LabelRule] {
        &self.rules
    }

    /// Whether `path` is dropped before matching.
    #[must_use]
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignore.iter().any(|p| p.matches(path))
    }

    /// Whether `label` is one of the table's topic labels.
    #[must_use]
    pub fn is_known_label(&self, label: &str) -> bool {
        self.rules.iter().any(|r| r.label == label)
    }

    /// Prefix patterns that name nothing under `repo_dir`.
    ///
    /// Stale entries are usually left behind by a directory rename.
    #[must_use]
    pub fn missing_paths(&self, repo_dir: &Path) -> Vec<(String, String)> {
        let mut missing = Vec::new();
        for rule in &self.rules {
            for pattern in rule.dirs.iter().chain(&rule.exclusions) {
                if let Some(relative) = pattern.literal_path() {
                    if !repo_dir.join(&relative).exists() {
                        missing.push((rule.label.clone(), pattern.raw().to_string()));
                    }
                }
            }
        }
        missing
    }
}
