//! Command-line front end for the workflow orchestrator (spec §6).
//!
//! Grounded on the binary-crate shape: a `clap` derive parser,
//! `tracing-subscriber` set up once at the top of `main`, and subcommands
//! that each build the same manager set before handing off to
//! `orchestrator_core::WorkflowRunner`.

mod config;

use clap::{Parser, Subcommand};
use config::OrchestratorConfig;
use orchestrator_core::{
    graph, registry, AgentRegistry, BudgetManager, ErrorContextManager, FileCheckpointer,
    HumanAction, HumanResponse, NullSessionStore, SessionManager, TaskSpec, WorkflowRunner,
    WorkflowState,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "orchestrator-cli", about = "Drives a multi-agent workflow from prerequisites to completion")]
struct Cli {
    /// Directory of the project being worked on.
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Starts a fresh run, or resumes from the latest checkpoint.
    Run {
        /// Human-readable project name recorded in the workflow state.
        #[arg(long)]
        project_name: String,
        /// Path to a JSON file containing the initial `Vec<TaskSpec>` plan.
        #[arg(long)]
        tasks: Option<PathBuf>,
    },
    /// Resumes a suspended run, optionally answering its pending interrupt.
    Resume {
        #[arg(long, value_enum)]
        action: Option<ResumeAction>,
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Prints the latest checkpointed state as JSON.
    Status,
    /// Prints the static workflow topology as JSON.
    Definition,
    /// Resets the repository and state to the commit recorded at `phase`.
    Rollback {
        #[arg(long)]
        phase: u8,
    },
    /// Clears phase status/decisions from `phase` onward without touching git.
    Reset {
        #[arg(long)]
        phase: Option<u8>,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum ResumeAction {
    Approve,
    Reject,
    RequestChanges,
    Retry,
    Abort,
    Skip,
}

impl From<ResumeAction> for HumanAction {
    fn from(a: ResumeAction) -> Self {
        match a {
            ResumeAction::Approve => HumanAction::Approve,
            ResumeAction::Reject => HumanAction::Reject,
            ResumeAction::RequestChanges => HumanAction::RequestChanges,
            ResumeAction::Retry => HumanAction::Retry,
            ResumeAction::Abort => HumanAction::Abort,
            ResumeAction::Skip => HumanAction::Skip,
        }
    }
}

struct LoggingCallback;
impl orchestrator_core::ProgressCallback for LoggingCallback {
    fn on_node_start(&self, name: &str, phase: u8) {
        tracing::info!(phase, node = name, "node started");
    }
    fn on_node_end(&self, name: &str, phase: u8) {
        tracing::info!(phase, node = name, "node finished");
    }
    fn on_task_start(&self, task_id: &str) {
        tracing::info!(task_id, "task started");
    }
    fn on_task_complete(&self, task_id: &str) {
        tracing::info!(task_id, "task completed");
    }
    fn on_interrupt(&self, pending: &serde_json::Value) {
        tracing::warn!(%pending, "workflow suspended on interrupt");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "orchestrator-cli failed");
            eprintln!("error: {e}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let project_dir = cli.project_dir;
    let cfg = OrchestratorConfig::load(&project_dir)?;

    match cli.command {
        Command::Definition => {
            let def = graph::default_definition();
            println!("{}", serde_json::to_string_pretty(&def)?);
            Ok(0)
        }
        Command::Status => {
            let checkpointer = FileCheckpointer {
                path: cfg.checkpoint_path(&project_dir),
            };
            match orchestrator_core::Checkpointer::load_latest(&checkpointer)? {
                Some((node, state)) => {
                    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                        "last_node": node,
                        "state": state,
                    }))?);
                    Ok(0)
                }
                None => {
                    println!("{{\"last_node\":null,\"state\":null}}");
                    Ok(0)
                }
            }
        }
        Command::Run { project_name, tasks } => {
            let tasks = load_tasks(tasks.as_deref())?;
            let (registry, budget, session, errors) = build_managers(&cfg);
            let checkpointer = Box::new(FileCheckpointer {
                path: cfg.checkpoint_path(&project_dir),
            });
            let runner = WorkflowRunner::new(&registry, &budget, &session, &errors, checkpointer, project_dir.clone());
            let callback = LoggingCallback;
            let result = runner
                .run(&project_name, cfg.workflow_run_config(), tasks, Some(&callback))
                .await?;
            print_result(&result)
        }
        Command::Resume { action, feedback } => {
            let (registry, budget, session, errors) = build_managers(&cfg);
            let checkpointer = Box::new(FileCheckpointer {
                path: cfg.checkpoint_path(&project_dir),
            });
            let runner = WorkflowRunner::new(&registry, &budget, &session, &errors, checkpointer, project_dir.clone());
            let response = action.map(|a| HumanResponse {
                action: a.into(),
                answers: Default::default(),
                feedback: feedback.clone(),
                reason: feedback,
            });
            let callback = LoggingCallback;
            let result = runner.resume(response, Some(&callback)).await?;
            print_result(&result)
        }
        Command::Rollback { phase } => {
            let (registry, budget, session, errors) = build_managers(&cfg);
            let checkpointer = Box::new(FileCheckpointer {
                path: cfg.checkpoint_path(&project_dir),
            });
            let runner = WorkflowRunner::new(&registry, &budget, &session, &errors, checkpointer, project_dir.clone());
            let mut state = runner
                .get_state()
                .ok_or_else(|| anyhow::anyhow!("no checkpoint to roll back"))?;
            runner.rollback_to_phase(&mut state, phase)?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(0)
        }
        Command::Reset { phase } => {
            let (registry, budget, session, errors) = build_managers(&cfg);
            let checkpointer = Box::new(FileCheckpointer {
                path: cfg.checkpoint_path(&project_dir),
            });
            let runner = WorkflowRunner::new(&registry, &budget, &session, &errors, checkpointer, project_dir.clone());
            let mut state = runner
                .get_state()
                .unwrap_or_else(|| WorkflowState::new("unnamed", project_dir.to_string_lossy()));
            runner.reset(&mut state, phase);
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(0)
        }
    }
}

fn build_managers(cfg: &OrchestratorConfig) -> (AgentRegistry, BudgetManager, SessionManager, ErrorContextManager) {
    (
        registry::default_registry(),
        BudgetManager::new(cfg.project_budget_usd, cfg.task_budget_usd, cfg.invocation_budget_usd),
        SessionManager::new(Box::new(NullSessionStore), cfg.session_ttl_hours),
        ErrorContextManager::new(cfg.error_log_cap),
    )
}

fn load_tasks(path: Option<&std::path::Path>) -> anyhow::Result<Vec<TaskSpec>> {
    match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(vec![]),
    }
}

fn print_result(result: &orchestrator_core::WorkflowResult) -> anyhow::Result<i32> {
    println!("{}", serde_json::to_string_pretty(result)?);
    if result.paused {
        return Ok(0);
    }
    if result.success {
        Ok(0)
    } else {
        Ok(1)
    }
}
