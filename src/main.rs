// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Climpire operator entry point.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use climpire::config::{self, OrchestratorConfig};
use climpire::credentials::SqliteCredentials;
use climpire::ledger::AuditLog;
use climpire::runner::{AgentRunner, CliRunner, HttpRunner, OutputHub};
use climpire::settings::SqliteSettings;
use climpire::storage::Database;
use climpire::telemetry::{init_telemetry, TelemetryConfig};
use climpire::types::{short_id, Agent, AgentRole, LogKind};
use climpire::workflow::{
    Directive, Orchestrator, OrchestratorServices, StopMode, StopOutcome, Task, TaskStatus,
};
use climpire::worktree::{PullRequestClient, WorktreeManager};

/// Climpire - multi-agent task orchestration.
#[derive(Parser)]
#[command(name = "climpire")]
#[command(author, version, about = "Multi-agent task orchestration", long_about = None)]
struct Cli {
    /// Config file (defaults to climpire.json / climpire.yaml in the current directory)
    #[arg(short, long, env = "CLIMPIRE_CONFIG")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a task from a directive
    Directive {
        /// Directive text; the first line becomes the title
        content: String,
        #[arg(long, default_value = "operator")]
        from: String,
        #[arg(short, long)]
        department: Option<String>,
        /// Assign this agent id
        #[arg(short, long)]
        agent: Option<String>,
        /// Git project the agent works in
        #[arg(short, long)]
        project: Option<PathBuf>,
        #[arg(long)]
        base_branch: Option<String>,
        #[arg(short = 'k', long)]
        idempotency_key: Option<String>,
        /// Drive the new task immediately
        #[arg(long)]
        run: bool,
    },

    /// Drive a task as far as it goes (Ctrl-C pauses the active run)
    Run { task: String },

    /// Stop a task
    Stop {
        task: String,
        /// Cancel and roll back instead of pausing
        #[arg(long)]
        cancel: bool,
    },

    /// Resume a paused task
    Resume { task: String },

    /// List tasks
    Tasks {
        #[arg(short, long)]
        status: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Show a task's log in order
    Logs {
        task: String,
        #[arg(long)]
        json: bool,
    },

    /// Manage the agent roster
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Write a runtime setting (autoAssign, language, mergeStrategy, ...)
    Set { key: String, value: String },

    /// Register an OAuth account for an HTTP provider or GitHub
    Account {
        id: String,
        provider: String,
        #[arg(long, env = "CLIMPIRE_ACCOUNT_TOKEN", hide_env_values = true)]
        token: String,
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },

    /// Audit log tools
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Add or update an agent
    Add {
        id: String,
        name: String,
        department: String,
        /// team_leader, senior, junior or intern
        #[arg(short, long, default_value = "senior")]
        role: String,
        #[arg(short, long, default_value = "claude")]
        provider: String,
        #[arg(short, long)]
        model: Option<String>,
    },
    /// List agents of a department, or all team leaders
    List { department: Option<String> },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Recompute the hash chain and report the first broken line
    Verify {
        /// Log file (defaults to the configured audit log)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _telemetry = init_telemetry(&TelemetryConfig::from_verbosity(cli.verbose))
        .context("failed to initialize logging")?;

    let config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config(&std::env::current_dir()?)?,
    };

    if let Commands::Audit {
        action: AuditAction::Verify { path },
    } = &cli.command
    {
        return verify_audit(&config, path.clone()).await;
    }

    let app = App::open(config).await?;
    app.handle(cli.command).await
}

async fn verify_audit(config: &OrchestratorConfig, path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(|| config.audit_log_path());
    let report = AuditLog::verify(&path, config.audit_chain_seed.as_deref()).await?;
    if report.is_intact() {
        println!(
            "{} {} lines, chain intact (tail {})",
            "✓".green(),
            report.lines,
            &report.tail_hash[..12.min(report.tail_hash.len())]
        );
        Ok(())
    } else {
        let line = report.first_broken.map(|i| i + 1).unwrap_or(0);
        println!(
            "{} chain broken at line {} ({} of {} lines valid)",
            "✗".red(),
            line,
            report.valid,
            report.lines
        );
        bail!("audit chain verification failed")
    }
}

struct App {
    config: OrchestratorConfig,
    orchestrator: Arc<Orchestrator>,
    db: Arc<Database>,
    worktrees: Arc<WorktreeManager>,
    hub: OutputHub,
}

impl App {
    async fn open(config: OrchestratorConfig) -> anyhow::Result<Self> {
        let db = Arc::new(Database::open(&config.data_dir, config.busy_retry)?);
        let audit = AuditLog::open(
            config.audit_log_path(),
            config.audit_fallback_path(),
            config.audit_chain_seed.clone(),
        )
        .await?;
        let credentials = Arc::new(SqliteCredentials::new(db.clone()));
        let hub = OutputHub::default();

        let cli = CliRunner::new()
            .with_hub(hub.clone())
            .with_dedup_window(Duration::from_millis(config.stream_dedup_window_ms));
        let http = HttpRunner::new(credentials.clone())
            .with_base_urls(config.copilot_base_url.clone(), config.antigravity_base_url.clone());
        let worktrees = Arc::new(
            WorktreeManager::new()
                .with_pull_request_client(PullRequestClient::new(config.github_api_base.clone())),
        );

        let orchestrator = Orchestrator::new(
            config.clone(),
            OrchestratorServices {
                db: db.clone(),
                audit: Arc::new(audit),
                worktrees: worktrees.clone(),
                runner: AgentRunner::new(cli, http).into_shared(),
                settings: Arc::new(SqliteSettings::new(db.clone())),
                credentials,
                hub: hub.clone(),
            },
        );
        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
            db,
            worktrees,
            hub,
        })
    }

    /// Accept a full id or a unique prefix.
    fn resolve(&self, prefix: &str) -> anyhow::Result<Task> {
        let matches: Vec<Task> = self
            .orchestrator
            .store()
            .list(None)?
            .into_iter()
            .filter(|t| t.id.starts_with(prefix))
            .collect();
        match matches.len() {
            0 => Err(anyhow!("no task matches {}", prefix)),
            1 => Ok(matches.into_iter().next().ok_or_else(|| anyhow!("no task"))?),
            n => Err(anyhow!("{} tasks match {}; use a longer prefix", n, prefix)),
        }
    }

    /// Report worktree directories left behind by an earlier process.
    async fn scan_orphans(&self) -> anyhow::Result<()> {
        let projects: BTreeSet<PathBuf> = self
            .orchestrator
            .store()
            .list(None)?
            .into_iter()
            .filter_map(|t| t.project_path)
            .collect();
        for project in projects {
            for orphan in self.worktrees.scan_orphans(&project).await {
                warn!(project = %project.display(), path = %orphan.display(), "orphaned worktree");
            }
        }
        Ok(())
    }

    async fn handle(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Directive {
                content,
                from,
                department,
                agent,
                project,
                base_branch,
                idempotency_key,
                run,
            } => {
                let project = project.map(|p| p.canonicalize().unwrap_or(p));
                let created = self
                    .orchestrator
                    .create_task_from_directive(&Directive {
                        sender: from,
                        content,
                        title: None,
                        department,
                        agent_id: agent,
                        project_path: project,
                        base_branch,
                        idempotency_key,
                    })
                    .await?;
                let marker = if created.created { "created".green() } else { "replayed".yellow() };
                println!("{} {} {}", marker, short_id(&created.task.id), created.task.title);
                if run {
                    self.drive(&created.task.id).await?;
                }
            }
            Commands::Run { task } => {
                let task = self.resolve(&task)?;
                self.drive(&task.id).await?;
            }
            Commands::Stop { task, cancel } => {
                let task = self.resolve(&task)?;
                let mode = if cancel { StopMode::Cancel } else { StopMode::Pause };
                match self.orchestrator.stop_task(&task.id, mode).await? {
                    StopOutcome::Signalled => println!("stop signalled for {}", short_id(&task.id)),
                    StopOutcome::Applied(status) => {
                        println!("{} -> {}", short_id(&task.id), paint(status))
                    }
                }
            }
            Commands::Resume { task } => {
                let task = self.resolve(&task)?;
                self.scan_orphans().await?;
                let stream = self.stream_output();
                let result = self.orchestrator.resume_task(&task.id).await;
                stream.abort();
                let task = result?;
                println!("{} -> {}", short_id(&task.id), paint(task.status));
            }
            Commands::Tasks { status, json } => {
                let status = status
                    .map(|s| s.parse::<TaskStatus>())
                    .transpose()
                    .map_err(|e| anyhow!(e))?;
                let tasks = self.orchestrator.store().list(status)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&tasks)?);
                } else if tasks.is_empty() {
                    println!("{}", "no tasks".dimmed());
                } else {
                    for task in tasks {
                        println!(
                            "{}  {:<13} {:<10} {}",
                            short_id(&task.id),
                            paint(task.status),
                            task.assigned_agent_id.as_deref().unwrap_or("-"),
                            task.title
                        );
                    }
                }
            }
            Commands::Logs { task, json } => {
                let task = self.resolve(&task)?;
                let logs = self.orchestrator.store().logs(&task.id)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&logs)?);
                } else {
                    for log in logs {
                        let kind = match log.kind {
                            LogKind::System => log.kind.as_str().cyan(),
                            LogKind::Agent => log.kind.as_str().green(),
                            LogKind::Stdout => log.kind.as_str().normal(),
                            LogKind::Stderr => log.kind.as_str().red(),
                        };
                        println!("{:<6} {}", kind, log.message);
                    }
                }
            }
            Commands::Agent { action } => self.handle_agent(action).await?,
            Commands::Set { key, value } => {
                SqliteSettings::new(self.db.clone()).write_setting(&key, &value).await?;
                println!("{} = {}", key, value);
            }
            Commands::Account {
                id,
                provider,
                token,
                priority,
            } => {
                SqliteCredentials::new(self.db.clone())
                    .upsert_account(&id, &provider, &token, priority)
                    .await?;
                println!("account {} ({}) registered", id, provider);
            }
            Commands::Audit {
                action: AuditAction::Verify { path },
            } => verify_audit(&self.config, path).await?,
        }
        Ok(())
    }

    async fn handle_agent(&self, action: AgentAction) -> anyhow::Result<()> {
        let store = self.orchestrator.store();
        match action {
            AgentAction::Add {
                id,
                name,
                department,
                role,
                provider,
                model,
            } => {
                let role: AgentRole = role.parse().map_err(|e: String| anyhow!(e))?;
                let mut agent = Agent::new(id, name, department, role, provider);
                agent.model = model;
                store.upsert_agent(&agent).await?;
                println!("agent {} ({}) saved", agent.id, agent.role.as_str());
            }
            AgentAction::List { department } => {
                let agents = match department {
                    Some(dept) => store.agents_in_department(&dept)?,
                    None => store.team_leaders()?,
                };
                for agent in agents {
                    println!(
                        "{:<12} {:<16} {:<10} {:<12} {}",
                        agent.id,
                        agent.name,
                        agent.department,
                        agent.role.as_str(),
                        agent.status.as_str()
                    );
                }
            }
        }
        Ok(())
    }

    /// Print live output until aborted.
    fn stream_output(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.hub.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match event.kind {
                        LogKind::Stderr => eprintln!("{}", event.line.dimmed()),
                        _ => println!("{}", event.line),
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        eprintln!("{}", format!("... {} lines skipped", n).dimmed());
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn drive(&self, task_id: &str) -> anyhow::Result<()> {
        self.scan_orphans().await?;
        let stream = self.stream_output();

        let registry = self.orchestrator.registry().clone();
        let id = task_id.to_string();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(task_id = %id, "interrupt received, pausing");
                registry.request_stop(&id, StopMode::Pause);
            }
        });

        let result = self.orchestrator.drive(task_id).await;
        interrupt.abort();
        stream.abort();

        let task = result?;
        println!("{} -> {}", short_id(&task.id), paint(task.status));
        if let Some(result) = task.result.as_deref() {
            println!("{}", result.dimmed());
        }
        Ok(())
    }
}

fn paint(status: TaskStatus) -> colored::ColoredString {
    let text = status.as_str();
    match status {
        TaskStatus::Done => text.green(),
        TaskStatus::Cancelled => text.red(),
        TaskStatus::Pending | TaskStatus::Review => text.yellow(),
        _ => text.cyan(),
    }
}
