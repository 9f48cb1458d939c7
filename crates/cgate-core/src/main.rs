use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cgate_core::{CgateError, ConfidenceSandbox, DeployOutcome, ExitStatus, ScheduledTask};
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "cgate", version, about = "Confidence-gated sandbox for generated code changes")]
struct Cli {
    /// Project root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or reuse the sandbox mirror
    Init,
    /// Screen, sandbox, and score candidate content (stdin unless --from)
    Execute {
        file: PathBuf,
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Re-run tests for the given files, or every sandbox candidate
    Test { files: Vec<PathBuf> },
    /// Show the confidence breakdown for a file
    Confidence { file: PathBuf },
    /// Show the gate decision for a file at a given confidence
    Check {
        file: PathBuf,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        confidence: u8,
    },
    /// Promote a sandbox candidate into the project
    Deploy {
        file: PathBuf,
        /// Skip the confidence gate; the access policy still applies
        #[arg(long)]
        force: bool,
    },
    /// Scan an existing project file for secrets and malicious constructs
    Scan { file: PathBuf },
    /// Remove temporary artifacts
    Clean {
        /// Also discard the mirror
        #[arg(long)]
        all: bool,
    },
    /// Discard the mirror and resynchronize from the project
    Reset,
    /// Re-evaluate sandbox candidates periodically until interrupted
    Watch {
        #[arg(long, default_value_t = 300)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(status) => status.into(),
        Err(err) => match err.downcast_ref::<CgateError>() {
            Some(e) => {
                eprintln!("error [{}]: {e}", e.reason_code());
                eprintln!("hint: {}", e.remediation());
                e.exit_status().into()
            }
            None => {
                eprintln!("error: {err:#}");
                ExitStatus::ExecutionFailure.into()
            }
        },
    }
}

fn init_tracing(json: bool) {
    use tracing_subscriber::prelude::*;

    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text());
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<ExitStatus> {
    let gate = Arc::new(ConfidenceSandbox::open_project(&cli.root).await?);
    let json = cli.json;

    match cli.command {
        Command::Init => {
            let state = gate.sandbox().state_dir().display().to_string();
            emit(json, &serde_json::json!({ "state_dir": state }), || {
                format!("sandbox ready at {state}\n")
            })?;
            Ok(ExitStatus::Success)
        }
        Command::Execute { file, from } => {
            let content = match from {
                Some(source) => std::fs::read_to_string(&source)
                    .with_context(|| format!("reading {}", source.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("reading candidate from stdin")?;
                    buf
                }
            };
            let outcome = gate.execute(&file, &content).await?;
            emit(json, &outcome, || outcome.output.clone())?;
            Ok(ExitStatus::Success)
        }
        Command::Test { files } => {
            let outcome = gate.run_tests(files.as_slice()).await?;
            emit(json, &outcome, || outcome.output.clone())?;
            Ok(if outcome.success {
                ExitStatus::Success
            } else {
                ExitStatus::ExecutionFailure
            })
        }
        Command::Confidence { file } => {
            let report = gate.get_confidence(&file).await?;
            emit(json, &report, || {
                let mut out = format!("{}: {}/100 ({})\n", report.path, report.total, report.tier);
                for (kind, score) in report.metrics.breakdown() {
                    out.push_str(&format!("  {:<20} {score:>3}/{}\n", kind.label(), kind.max()));
                }
                out
            })?;
            Ok(ExitStatus::Success)
        }
        Command::Check { file, confidence } => {
            let decision = gate.check_deployment_permission(&file, confidence).await?;
            emit(json, &decision, || {
                let mut out = format!("{}: {}\n", decision.tier, decision.reason);
                for step in decision.next_steps() {
                    out.push_str(&format!("  next: {}\n", step.action));
                }
                out
            })?;
            Ok(if decision.allows_deploy() {
                ExitStatus::Success
            } else {
                ExitStatus::AccessDenied
            })
        }
        Command::Deploy { file, force } => {
            let outcome = gate.deploy(&file, force).await?;
            emit(json, &outcome, || match &outcome {
                DeployOutcome::Deployed { receipt, forced } => {
                    let how = if *forced { " (forced)" } else { "" };
                    format!("deployed {}{how}, {} bytes\n", receipt.path, receipt.bytes)
                }
                DeployOutcome::Denied { decision } => format!("denied: {}\n", decision.reason),
            })?;
            Ok(if outcome.is_deployed() {
                ExitStatus::Success
            } else {
                ExitStatus::AccessDenied
            })
        }
        Command::Scan { file } => {
            let report = gate.scan_file(&file).await?;
            emit(json, &report, || {
                let mut out = format!("{}: {} finding(s)\n", report.path, report.findings.len());
                for finding in &report.findings {
                    out.push_str(&format!("  {} at {}..{}\n", finding.rule_id, finding.start, finding.end));
                }
                out
            })?;
            Ok(if report.malicious_patterns {
                ExitStatus::PolicyViolation
            } else if report.sensitive_data_found {
                ExitStatus::ValidationFailure
            } else {
                ExitStatus::Success
            })
        }
        Command::Clean { all } => {
            gate.clean(all).await?;
            Ok(ExitStatus::Success)
        }
        Command::Reset => {
            gate.reset().await?;
            Ok(ExitStatus::Success)
        }
        Command::Watch { interval_secs } => {
            let worker = Arc::clone(&gate);
            let task = ScheduledTask::spawn("rescan", Duration::from_secs(interval_secs.max(1)), move || {
                let gate = Arc::clone(&worker);
                async move {
                    for report in gate.rescan().await {
                        tracing::info!(path = %report.path, score = report.total, tier = %report.tier, "rescanned");
                    }
                }
            });
            tokio::signal::ctrl_c().await.context("waiting for interrupt")?;
            let runs = task.cancel().await;
            tracing::info!(runs, "watch stopped");
            Ok(ExitStatus::Success)
        }
    }
}
