//! Pipewright - CI pipeline execution engine CLI
//!
//! The `pipewright` command runs pipeline documents against a change.
//!
//! ## Commands
//!
//! - `run`: Execute a pipeline document against a branch and changed paths
//! - `check`: Validate and expand a document without executing anything

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

use pipewright_core::{ChangeContext, GlobPolicy, PipelineDocument, RunResult, RunStatus};
use pipewright_engine::{LocalProvisioner, RunCoordinator, RunOptions, ShellExecutor};

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(author = "Pipewright Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CI pipeline execution engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline document against a change
    Run {
        /// Path to the pipeline document (.yml, .yaml, or .json)
        document: PathBuf,

        /// Branch the change landed on
        #[arg(short, long)]
        branch: String,

        /// Path touched by the change (repeatable; omit if the diff is unknown)
        #[arg(long = "changed-path")]
        changed_paths: Vec<String>,

        /// Override the document's max_concurrency
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// How directory globs in trigger exclusions treat nested paths
        #[arg(long, value_enum, default_value_t = GlobPolicyArg::Shallow)]
        glob_policy: GlobPolicyArg,

        /// Per-step output truncation bound in bytes
        #[arg(long, default_value = "65536")]
        output_limit_bytes: usize,

        /// Print the run result as JSON instead of text
        #[arg(long)]
        report_json: bool,
    },

    /// Validate and expand a document without executing anything
    Check {
        /// Path to the pipeline document (.yml, .yaml, or .json)
        document: PathBuf,
    },
}

/// CLI-facing spelling of the trigger glob policy.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum GlobPolicyArg {
    Shallow,
    Recursive,
}

impl From<GlobPolicyArg> for GlobPolicy {
    fn from(arg: GlobPolicyArg) -> Self {
        match arg {
            GlobPolicyArg::Shallow => GlobPolicy::Shallow,
            GlobPolicyArg::Recursive => GlobPolicy::Recursive,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    pipewright_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            document,
            branch,
            changed_paths,
            max_concurrency,
            glob_policy,
            output_limit_bytes,
            report_json,
        } => {
            cmd_run(
                &document,
                branch,
                changed_paths,
                max_concurrency,
                glob_policy.into(),
                output_limit_bytes,
                report_json,
            )
            .await
        }
        Commands::Check { document } => cmd_check(&document),
    }
}

/// Load a pipeline document, picking the parser from the file extension.
fn load_document(path: &Path) -> Result<PipelineDocument> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline document: {:?}", path))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    match extension {
        "yml" | "yaml" => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in {:?}", path)),
        "json" => serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {:?}", path)),
        other => anyhow::bail!(
            "Unsupported document extension '{}' for {:?} (expected .yml, .yaml, or .json)",
            other,
            path
        ),
    }
}

/// Execute a pipeline document against a change
async fn cmd_run(
    document_path: &Path,
    branch: String,
    changed_paths: Vec<String>,
    max_concurrency: Option<usize>,
    glob_policy: GlobPolicy,
    output_limit_bytes: usize,
    report_json: bool,
) -> Result<()> {
    let document = load_document(document_path)?;
    let change = ChangeContext {
        branch,
        changed_paths,
    };

    let options = RunOptions {
        glob_policy,
        max_concurrency,
        output_limit_bytes,
    };
    let coordinator = RunCoordinator::new(
        Arc::new(ShellExecutor::new()),
        Arc::new(LocalProvisioner::new()),
        options,
    );

    // Ctrl-C cancels the run; in-flight jobs tear down, queued jobs never start.
    let cancel = coordinator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, canceling run");
            cancel.cancel();
        }
    });

    let result = coordinator
        .run(&document, &change)
        .await
        .with_context(|| format!("Pipeline run failed to start for {:?}", document_path))?;

    if report_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_run_text(&document.name, &result));
    }

    match result.status {
        RunStatus::Succeeded | RunStatus::Skipped => Ok(()),
        RunStatus::Failed => anyhow::bail!("Pipeline run failed"),
        RunStatus::Canceled => anyhow::bail!("Pipeline run canceled"),
    }
}

/// Validate and expand a document without executing anything
fn cmd_check(document_path: &Path) -> Result<()> {
    let document = load_document(document_path)?;

    let coordinator = RunCoordinator::new(
        Arc::new(ShellExecutor::new()),
        Arc::new(LocalProvisioner::new()),
        RunOptions::default(),
    );
    let instances = coordinator.plan(&document)?;

    println!("Pipeline: {}", document.name);
    println!("Digest:   {}", document.digest()?);
    println!();
    println!("Expanded instances ({}):", instances.len());
    for instance in &instances {
        println!(
            "  {} ({} steps, timeout {}s, pool {})",
            instance.display_name,
            instance.steps.len(),
            instance.timeout_secs,
            instance.resolved_platform.pool_image
        );
    }

    Ok(())
}

fn render_run_text(pipeline: &str, result: &RunResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("Pipeline: {}\n", pipeline));
    out.push_str(&format!("Run ID:   {}\n", result.run_id));
    out.push_str(&format!("Status:   {}\n", status_label(result.status)));
    out.push_str(&format!("Duration: {}ms\n", result.duration_ms));

    if result.job_results.is_empty() {
        return out;
    }

    out.push('\n');
    for job in &result.job_results {
        out.push_str(&format!(
            "  {} {} ({}ms)\n",
            job_marker(job.status),
            job.display_name,
            job.duration_ms
        ));
        for step in &job.step_results {
            let exit = step
                .exit_code
                .map(|c| format!(", exit code: {}", c))
                .unwrap_or_default();
            out.push_str(&format!(
                "    {} {} ({}ms{})\n",
                step_marker(step.status),
                step.display_name,
                step.duration_ms,
                exit
            ));
        }
    }

    out.push('\n');
    out.push_str(&format!(
        "Summary: {}/{} jobs passed\n",
        result.passed_jobs(),
        result.job_results.len()
    ));
    out
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Succeeded => "SUCCEEDED",
        RunStatus::Failed => "FAILED",
        RunStatus::Canceled => "CANCELED",
        RunStatus::Skipped => "SKIPPED (trigger did not match)",
    }
}

fn job_marker(status: pipewright_core::JobStatus) -> &'static str {
    use pipewright_core::JobStatus;
    match status {
        JobStatus::Succeeded => "✓",
        JobStatus::Failed => "✗",
        JobStatus::TimedOut => "⏱",
        JobStatus::Canceled => "⊘",
    }
}

fn step_marker(status: pipewright_core::StepStatus) -> &'static str {
    use pipewright_core::StepStatus;
    match status {
        StepStatus::Succeeded => "✓",
        StepStatus::Failed => "✗",
        StepStatus::Skipped => "-",
        StepStatus::TimedOut => "⏱",
        StepStatus::Canceled => "⊘",
    }
}
