//! `tollgate` command line
//!
//! Stores artifacts, evaluates gates and drives pipelines against the
//! on-disk store named by `tollgate.toml`. Logs go to stderr; reports go to
//! stdout. A BLOCK verdict exits with status 2.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tollgate_artifact::{ArtifactDraft, ArtifactId, ArtifactStore, FileStore, Mode, Verdict};
use tollgate_core::{
    render_run, render_status, verdict_exit_code, ApprovalSource, EngineConfig, FileApprovals,
    GateEvaluator, GateReport, Orchestrator, RunOutcome, StageRegistry, StageState,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tollgate",
    version,
    about = "Stage gates and traceability for artifact pipelines"
)]
struct Cli {
    /// Configuration file; defaults to ./tollgate.toml when present
    #[arg(long, global = true, env = "TOLLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the configured stages in pipeline order
    Stages {
        #[arg(long)]
        json: bool,
    },

    /// Store a new artifact version from a JSON draft (`-` reads stdin)
    Put { path: PathBuf },

    /// Evaluate one gate against the latest version of an artifact
    Evaluate {
        gate: String,
        artifact: String,
        /// Enforcement mode; the configured mode when omitted
        #[arg(long)]
        mode: Option<Mode>,
        /// Rationale for overriding a BLOCK under standard mode
        #[arg(long = "override", value_name = "RATIONALE")]
        rationale: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Show the state of every stage of a pipeline
    Status {
        pipeline: String,
        #[arg(long)]
        mode: Option<Mode>,
        #[arg(long)]
        json: bool,
    },

    /// Advance a pipeline as far as its gates allow
    Run {
        pipeline: String,
        #[arg(long)]
        mode: Option<Mode>,
        #[arg(long = "override", value_name = "RATIONALE")]
        rationale: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Print recorded gate results of an artifact
    Report {
        artifact: String,
        /// Every result in the ledger, not just the latest
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },

    /// Record an external approval of a stage
    Approve { pipeline: String, stage: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Everything a command needs, built from the resolved configuration
struct Engine {
    config: EngineConfig,
    store: Arc<FileStore>,
    registry: Arc<StageRegistry>,
}

impl Engine {
    async fn open(config_path: Option<&Path>) -> Result<Self> {
        let config = EngineConfig::resolve(config_path).context("loading configuration")?;
        let registry = config.stage_registry().context("loading stage table")?;
        let store = FileStore::open(&config.store_root)
            .await
            .with_context(|| format!("opening store at {}", config.store_root.display()))?;
        tracing::info!(
            store = %config.store_root.display(),
            mode = %config.mode,
            stages = registry.len(),
            "engine ready"
        );
        Ok(Self {
            config,
            store: Arc::new(store),
            registry: Arc::new(registry),
        })
    }

    fn evaluator(&self) -> Result<GateEvaluator> {
        Ok(GateEvaluator::with_builtin_checks(
            self.store.clone(),
            self.registry.clone(),
        )?)
    }

    fn orchestrator(&self) -> Result<Orchestrator> {
        let approvals: Arc<dyn ApprovalSource> =
            Arc::new(FileApprovals::new(self.config.approvals_path()));
        Ok(Orchestrator::new(self.evaluator()?, approvals))
    }

    fn mode(&self, flag: Option<Mode>) -> Mode {
        flag.unwrap_or(self.config.mode)
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let engine = Engine::open(cli.config.as_deref()).await?;

    match cli.cmd {
        Command::Stages { json } => {
            let stages: Vec<_> = engine.registry.stages().collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&stages)?);
            } else {
                for stage in stages {
                    let upstream = if stage.upstream.is_empty() {
                        "-".to_string()
                    } else {
                        stage.upstream.join(",")
                    };
                    let approval = if stage.requires_approval { "  approval" } else { "" };
                    println!(
                        "{:<14} -> {:<15} after {:<12} block<{:.0}%  [{}]{approval}",
                        stage.name,
                        stage.output,
                        upstream,
                        stage.forward.block_below * 100.0,
                        stage.checks.join(", ")
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Put { path } => {
            let text = read_input(&path)?;
            let draft: ArtifactDraft = serde_json::from_str(&text)
                .with_context(|| format!("parsing artifact draft {}", path.display()))?;
            let artifact = engine.store.put(draft).await?;
            println!(
                "stored {} v{} ({}, {}, {})",
                artifact.id,
                artifact.version,
                artifact.kind,
                artifact.pipeline,
                artifact.content_hash.short()
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Evaluate {
            gate,
            artifact,
            mode,
            rationale,
            json,
        } => {
            let id = ArtifactId::new(artifact)?;
            let result = engine
                .evaluator()?
                .evaluate(&gate, &id, engine.mode(mode), rationale.as_deref())
                .await
                .with_context(|| format!("evaluating gate {gate} on {id}"))?;
            let report = GateReport::new(&result);
            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{report}");
            }
            Ok(ExitCode::from(verdict_exit_code(result.verdict)))
        }

        Command::Status {
            pipeline,
            mode,
            json,
        } => {
            let status = engine
                .orchestrator()?
                .status(&pipeline, engine.mode(mode))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", render_status(&status));
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Run {
            pipeline,
            mode,
            rationale,
            json,
        } => {
            let report = engine
                .orchestrator()?
                .run(&pipeline, engine.mode(mode), rationale.as_deref())
                .await
                .with_context(|| format!("running pipeline {pipeline}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_run(&report));
            }
            Ok(ExitCode::from(run_exit_code(&report.outcome)))
        }

        Command::Report {
            artifact,
            all,
            json,
        } => {
            let id = ArtifactId::new(artifact)?;
            let ledger = engine.store.verdicts(&id).await?;
            let shown = if all {
                ledger.as_slice()
            } else {
                ledger.last().map(std::slice::from_ref).unwrap_or_default()
            };
            if shown.is_empty() {
                bail!("no gate results recorded for {id}");
            }
            if json {
                println!("{}", serde_json::to_string_pretty(shown)?);
            } else {
                for result in shown {
                    println!("{}", GateReport::new(result));
                }
            }
            let latest = shown.last().map_or(Verdict::Pass, |r| r.verdict);
            Ok(ExitCode::from(verdict_exit_code(latest)))
        }

        Command::Approve { pipeline, stage } => {
            engine.registry.resolve(&stage)?;
            FileApprovals::new(engine.config.approvals_path())
                .approve(&pipeline, &stage)
                .await?;
            println!("approved {stage} in {pipeline}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading draft from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

/// 0 when complete, 2 when halted on a BLOCK, 3 when waiting on input
fn run_exit_code(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Complete => 0,
        RunOutcome::Halted(halt) => match halt.state {
            StageState::Blocked { .. } => verdict_exit_code(Verdict::Block),
            _ => 3,
        },
    }
}
