//! FERRY CLI
//!
//! Loads a manifest of agents and workflows and drives the bridge from the
//! command line.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, bail, eyre};
use ferry_core::CacheKey;
use ferry_plan::Manifest;
use ferry_runtime::{Bridge, BridgeConfig, ExecuteOptions, SmokeTest, WorkflowOrchestrator};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "FERRY - run heterogeneous agents as supervised subprocesses", long_about = None)]
struct Cli {
    /// Manifest declaring agents, workflows and bridge settings
    #[arg(short, long, global = true, default_value = "ferry.json")]
    manifest: PathBuf,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered agents
    Agents,
    /// Check that agents can be started
    Check {
        /// Only this agent
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// Run one agent
    Exec {
        /// Agent name
        #[arg(short, long)]
        agent: String,
        /// Input payload as JSON
        #[arg(short, long, default_value = "{}")]
        input: String,
        /// Deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Cache the result under this key
        #[arg(long)]
        cache_key: Option<String>,
        /// Recompute even if a result is cached under the key
        #[arg(long, requires = "cache_key")]
        bypass_cache: bool,
    },
    /// List defined workflows
    Workflows,
    /// Run a workflow
    Run {
        /// Workflow name
        #[arg(short, long)]
        workflow: String,
        /// Run-level parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,
        /// Write the run report to this file
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
    /// Remove leftover artifacts
    Sweep {
        /// Only files older than this
        #[arg(long, default_value_t = 3600)]
        min_age_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.json);

    let manifest = Manifest::load(&cli.manifest)
        .wrap_err_with(|| format!("loading manifest {}", cli.manifest.display()))?;
    let registry = Arc::new(manifest.registry()?);
    let bridge = Arc::new(Bridge::new(
        registry,
        BridgeConfig::from_manifest(&manifest.config),
    ));

    match cli.command {
        Commands::Agents => {
            for (name, d) in bridge.registry().iter() {
                println!(
                    "{:<20} {} -> {}  {}",
                    name,
                    d.input_encoding,
                    d.output_encoding,
                    d.description.as_deref().unwrap_or("")
                );
                if !d.capabilities.is_empty() {
                    println!("{:<20} capabilities: {}", "", d.capabilities.join(", "));
                }
            }
            Ok(())
        }
        Commands::Check { agent } => {
            let reports = match agent {
                Some(name) => vec![bridge.validate(&name).await],
                None => bridge.validate_all().await,
            };
            let mut unhealthy = 0;
            for report in &reports {
                let smoke = match &report.smoke_test {
                    SmokeTest::Passed { duration_ms } => format!("passed in {}ms", duration_ms),
                    SmokeTest::Failed { reason } => format!("FAILED: {}", reason),
                    SmokeTest::Skipped { reason } => format!("skipped: {}", reason),
                    SmokeTest::NotDeclared => "none declared".to_string(),
                };
                let found = match &report.executable {
                    Some(path) => path.display().to_string(),
                    None => "NOT FOUND".to_string(),
                };
                println!("{:<20} {}  smoke test {}", report.agent, found, smoke);
                if !report.is_healthy() {
                    unhealthy += 1;
                }
            }
            if unhealthy > 0 {
                bail!("{} of {} agents are unhealthy", unhealthy, reports.len());
            }
            Ok(())
        }
        Commands::Exec {
            agent,
            input,
            timeout_ms,
            cache_key,
            bypass_cache,
        } => {
            let payload: Value = serde_json::from_str(&input).wrap_err("parsing --input")?;
            let options = ExecuteOptions {
                timeout: timeout_ms.map(Duration::from_millis),
                bypass_cache,
                cache_key: cache_key.map(|key| CacheKey::derive(&key, &agent)),
            };
            let result = bridge.execute(&agent, payload, options).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Workflows => {
            for (name, warning) in manifest.validate_workflows()? {
                tracing::warn!(workflow = %name, "{}", warning);
            }
            for (name, definition) in &manifest.workflows {
                println!(
                    "{:<20} {} steps  {}",
                    name,
                    definition.len(),
                    definition.description.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Commands::Run {
            workflow,
            params,
            report,
        } => {
            let params = parse_params(params.as_deref())?;
            let mut orchestrator = WorkflowOrchestrator::new(Arc::clone(&bridge));
            for (name, definition) in manifest.workflows {
                orchestrator.define_workflow(name, definition)?;
            }

            let run = orchestrator.run_workflow_with(&workflow, params).await?;
            for step in &run.steps {
                println!(
                    "{:<20} {:<32} {}ms  {}",
                    step.name,
                    format!("{:?}", step.status),
                    step.duration_ms,
                    step.message.as_deref().unwrap_or("")
                );
            }
            if let Some(path) = report {
                write_report(&path, &run)?;
            }
            if !run.succeeded() {
                bail!("workflow {} finished {} ({})", workflow, run.state, run.run_id);
            }
            println!("workflow {} completed ({})", workflow, run.run_id);
            Ok(())
        }
        Commands::Sweep { min_age_secs } => {
            let report = bridge.sweep(Duration::from_secs(min_age_secs))?;
            for path in &report.removed {
                println!("removed {}", path.display());
            }
            for (path, e) in &report.failed {
                eprintln!("could not remove {}: {}", path.display(), e);
            }
            println!("{} removed, {} failed", report.removed.len(), report.failed.len());
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ferry=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_params(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str(raw).wrap_err("parsing --params")? {
        Value::Object(map) => Ok(map),
        other => Err(eyre!("--params must be a JSON object, got {}", other)),
    }
}

fn write_report(path: &Path, run: &ferry_runtime::WorkflowRunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(run)?;
    std::fs::write(path, json).wrap_err_with(|| format!("writing report {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote run report");
    Ok(())
}
