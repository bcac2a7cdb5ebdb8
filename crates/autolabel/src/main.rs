//! autolabel CLI - add topic labels to a pull request from the paths it changes.

use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use autolabel::applier::ApplyOutcome;
use autolabel::config::{DEFAULT_API_URL, DEFAULT_BASE_REF, DEFAULT_RULES_PATH};
use autolabel::{
    label_pull_request, matcher, output, ChangeSet, RuleTable, RunConfig, RunInputs,
};

/// Exit code for runs where at least one label could not be applied.
const EXIT_APPLY_FAILED: u8 = 2;

/// Exit code for `check` when prefix patterns name nothing in the checkout.
const EXIT_STALE_PATTERNS: u8 = 2;

/// autolabel - topic labels for pull requests.
#[derive(Parser)]
#[command(name = "autolabel")]
#[command(about = "Label pull requests by the paths they change")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the PR's changed files, decide its labels and apply them
    Run {
        /// Pull request number
        #[arg(long, env = "PR_NUMBER")]
        pr: u64,

        /// Rule table
        #[arg(long, env = "AUTOLABEL_RULES", default_value = DEFAULT_RULES_PATH)]
        rules: PathBuf,

        /// Target repository (OWNER/NAME)
        #[arg(long, env = "GITHUB_REPOSITORY")]
        repository: Option<String>,

        /// API token with permission to label pull requests
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// GitHub API base URL
        #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
        api_url: String,

        /// Reference the PR is diffed against
        #[arg(long, env = "AUTOLABEL_BASE_REF", default_value = DEFAULT_BASE_REF)]
        base: String,

        /// Head of the PR
        #[arg(long, default_value = "HEAD")]
        head: String,

        /// Repository checkout to diff in
        #[arg(long, default_value = ".")]
        repo_dir: PathBuf,

        /// Compute the decision without touching the PR
        #[arg(long)]
        dry_run: bool,

        /// GitHub Actions output file to append `labels=` to
        #[arg(long, env = "GITHUB_OUTPUT")]
        github_output: Option<PathBuf>,
    },

    /// Decide labels for the given paths (stdin, one per line, if none given)
    Match {
        /// Rule table
        #[arg(long, env = "AUTOLABEL_RULES", default_value = DEFAULT_RULES_PATH)]
        rules: PathBuf,

        /// Print the decision as JSON
        #[arg(long)]
        json: bool,

        /// Changed paths
        files: Vec<String>,
    },

    /// Validate the rule table
    Check {
        /// Rule table
        #[arg(long, env = "AUTOLABEL_RULES", default_value = DEFAULT_RULES_PATH)]
        rules: PathBuf,

        /// Also report prefix patterns that name nothing in this checkout
        #[arg(long)]
        repo_dir: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("autolabel=debug,info")
        } else {
            EnvFilter::new("autolabel=info,warn")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let result = match cli.command {
        Commands::Run {
            pr,
            rules,
            repository,
            token,
            api_url,
            base,
            head,
            repo_dir,
            dry_run,
            github_output,
        } => {
            let inputs = RunInputs {
                pr_number: Some(pr),
                rules_path: Some(rules),
                repo_dir: Some(repo_dir),
                base_ref: Some(base),
                head_ref: Some(head),
                repository,
                token,
                api_url: Some(api_url),
                dry_run,
            };
            run(inputs, github_output).await
        }
        Commands::Match { rules, json, files } => run_match(&rules, files, json),
        Commands::Check { rules, repo_dir } => run_check(&rules, repo_dir),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(inputs: RunInputs, github_output: Option<PathBuf>) -> Result<ExitCode> {
    let config = RunConfig::from_inputs(inputs)?;
    let summary = label_pull_request(&config).await?;

    println!("{}", serde_json::to_string(&summary.decision.labels)?);

    if let Some(path) = github_output {
        output::write_github_output(&path, &summary.decision)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if let Some(report) = &summary.report {
        for failure in &report.failed {
            tracing::error!(label = %failure.label, error = %failure.source, "Label not applied");
        }
        if matches!(report.outcome(), ApplyOutcome::Partial | ApplyOutcome::Failed) {
            return Ok(ExitCode::from(EXIT_APPLY_FAILED));
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn run_match(rules: &Path, files: Vec<String>, json: bool) -> Result<ExitCode> {
    let table = RuleTable::load(rules)?;

    let changes: ChangeSet = if files.is_empty() && !io::stdin().is_terminal() {
        io::stdin()
            .lock()
            .lines()
            .collect::<io::Result<Vec<_>>>()
            .context("Failed to read paths from stdin")?
            .into_iter()
            .map(|line| line.trim().to_string())
            .collect()
    } else {
        files.into_iter().collect()
    };

    let matches = matcher::evaluate(&changes, &table);
    let decision = matcher::decide(&matches, table.settings());

    if json {
        let rendered = serde_json::json!({
            "decision": decision,
            "matches": matches,
        });
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        for (label, found) in &matches.labels {
            println!("{label}: {} file(s)", found.files.len());
        }
        println!("decision ({}): {:?}", decision.policy, decision.labels);
    }

    Ok(ExitCode::SUCCESS)
}

fn run_check(rules: &Path, repo_dir: Option<PathBuf>) -> Result<ExitCode> {
    let table = RuleTable::load(rules)?;
    println!(
        "{}: {} rule(s), policy {}",
        rules.display(),
        table.rules().len(),
        table.settings().policy
    );

    let Some(repo_dir) = repo_dir else {
        return Ok(ExitCode::SUCCESS);
    };

    let missing = table.missing_paths(&repo_dir);
    if missing.is_empty() {
        println!("all prefix patterns exist under {}", repo_dir.display());
        return Ok(ExitCode::SUCCESS);
    }

    for (label, pattern) in &missing {
        println!("{label}: '{pattern}' does not exist");
    }
    Ok(ExitCode::from(EXIT_STALE_PATTERNS))
}
