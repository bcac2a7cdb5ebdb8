//! GitHub Actions step outputs.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::matcher::LabelDecision;

/// Append `labels=<json array>` to the file named by `GITHUB_OUTPUT`.
pub fn write_github_output(path: &Path, decision: &LabelDecision) -> std::io::Result<()> {
    let labels = serde_json::to_string(&decision.labels)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "labels={labels}")
}
