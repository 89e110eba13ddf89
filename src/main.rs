use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use factcheck_eval::config::{PipelineConfig, Settings};
use factcheck_eval::pipeline::store::{RunStatus, RunStore};
use factcheck_eval::pipeline::{Components, Pipeline, Step};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "factcheck", version, about = "Arabic claim verification: collect, retrieve, predict, evaluate")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
    /// Debug logging, overriding RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,
    /// JSON pipeline configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Root directory holding one sub-directory per run
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Reuse (and resume) an existing run directory
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    max_claims: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    queries_file: Option<PathBuf>,
    /// Read claims from a JSON file instead of the claim search API
    #[arg(long)]
    claims_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Every step: collect -> extract -> retrieve -> predict -> evaluate
    Run(RunArgs),
    /// Only the named steps; missing inputs are read from the run directory
    Steps {
        #[arg(required = true, value_enum)]
        steps: Vec<Step>,
        #[command(flatten)]
        args: RunArgs,
    },
    /// Show the state of one run
    Status { run_id: String },
    /// List runs, newest first
    ListRuns,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "factcheck failed");
            ExitCode::FAILURE
        }
    }
}

// Logs go to stderr so stdout carries only reports.
fn init_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// `-v` forces debug; otherwise RUST_LOG, defaulting to info.
fn log_filter(verbose: bool, env: Option<String>) -> EnvFilter {
    match env.filter(|d| !verbose && !d.trim().is_empty()) {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::new(if verbose { "debug" } else { "info" }),
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let mut cfg = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = cli.output_dir {
        cfg.output_dir = dir;
    }

    match cli.cmd {
        Cmd::Run(args) => run(cfg, args, None).await,
        Cmd::Steps { steps, args } => run(cfg, args, Some(steps)).await,
        Cmd::Status { run_id } => {
            let status = RunStore::new(&cfg.output_dir).status(&run_id)?;
            print_status(&status);
            Ok(())
        }
        Cmd::ListRuns => {
            let runs = RunStore::new(&cfg.output_dir).list_runs()?;
            print_runs(&runs);
            Ok(())
        }
    }
}

async fn run(mut cfg: PipelineConfig, args: RunArgs, steps: Option<Vec<Step>>) -> anyhow::Result<()> {
    if args.run_id.is_some() {
        cfg.run_id = args.run_id;
    }
    if args.max_claims.is_some() {
        cfg.max_claims = args.max_claims;
    }
    if let Some(n) = args.batch_size {
        cfg.batch_size = n;
    }
    if let Some(path) = args.queries_file {
        cfg.queries_file = path;
    }
    if args.claims_file.is_some() {
        cfg.claims_file = args.claims_file;
    }
    if let Some(steps) = steps {
        cfg.steps = steps;
    }
    cfg.validate()?;

    let settings = Settings::from_env();
    let components = Components::from_settings(&settings, &cfg, &cfg.steps)?;
    let mut pipeline = Pipeline::new(cfg, components)?;
    let run_id = pipeline.run_id().to_string();
    let summary = pipeline.run().await.with_context(|| format!("run {run_id} failed; see its error_state.json"))?;

    let counts = &summary.results_summary;
    info!(
        run_id = %summary.run_id,
        claims = counts.total_claims,
        gold = counts.gold_evidence_count,
        retrieved = counts.retrieved_evidence_count,
        predictions = counts.predictions_count,
        "run finished"
    );
    if let Some(eval) = &summary.evaluation_summary {
        println!("{}", serde_json::to_string_pretty(eval)?);
    }
    println!("results in {}", pipeline.run_dir().path().display());
    Ok(())
}

fn print_status(s: &RunStatus) {
    println!("Run: {}", s.run_id);
    println!("Status: {}", s.state);
    if let Some(ts) = &s.timestamp {
        println!("Timestamp: {ts}");
    }
    if let Some(n) = s.claims {
        println!("Claims: {n}");
    }
    if let Some(secs) = s.total_seconds {
        println!("Total time: {secs:.2}s");
    }
    if let Some(err) = &s.error {
        println!("Error: {err}");
    }
    if !s.completed_steps.is_empty() {
        println!("Completed steps: {}", s.completed_steps.join(", "));
    }
    println!("Files:");
    for (name, present) in &s.artifacts {
        println!("  {} {name}", if *present { "✓" } else { "✗" });
    }
}

fn print_runs(runs: &[RunStatus]) {
    if runs.is_empty() {
        println!("No runs found");
        return;
    }
    println!("{:<20} {:<12} {:<27} {:>7}", "RUN ID", "STATUS", "TIMESTAMP", "CLAIMS");
    println!("{}", "-".repeat(69));
    for r in runs {
        println!(
            "{:<20} {:<12} {:<27} {:>7}",
            r.run_id,
            r.state.to_string(),
            r.timestamp.as_deref().unwrap_or("-"),
            r.claims.map_or_else(|| "-".to_string(), |n| n.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_flag_beats_rust_log() {
        assert_eq!(log_filter(true, Some("warn".into())).to_string(), "debug");
        assert_eq!(log_filter(false, Some("warn".into())).to_string(), "warn");
        assert_eq!(log_filter(false, None).to_string(), "info");
        assert_eq!(log_filter(false, Some("  ".into())).to_string(), "info");
    }

    #[test]
    fn steps_subcommand_parses_step_names() {
        let cli = Cli::try_parse_from(["factcheck", "-v", "steps", "retrieve", "evaluate", "--run-id", "r1"]).unwrap();
        assert!(cli.verbose);
        match cli.cmd {
            Cmd::Steps { steps, args } => {
                assert_eq!(steps, vec![Step::Retrieve, Step::Evaluate]);
                assert_eq!(args.run_id.as_deref(), Some("r1"));
            }
            _ => panic!("expected steps"),
        }
    }
}
