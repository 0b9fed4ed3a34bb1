//! Command-line front end.
//!
//! `mnemon serve` runs the control plane with all background loops;
//! everything else is a one-shot command against the same database.
//! Exit codes: 0 success, 1 fatal startup failure, 2 misconfiguration.
//! All other failures are reported in-band as JSON on stdout.

use crate::api::ControlPlane;
use crate::config::Config;
use anyhow::Result;
use clap::{Parser, Subcommand};
use comfy_table::Table;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "mnemon", about = "Agent lifecycle & data ingestion control plane", version)]
pub struct Cli {
    /// Path to mnemon.toml (defaults apply when omitted)
    #[arg(short, long, global = true, env = "MNEMON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose console logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the control plane with all background loops
    Serve,
    /// Seed the schema directory and create the database
    Init,
    /// Memory table operations
    #[command(subcommand)]
    Tables(TablesCommand),
    /// Agent lifecycle operations
    #[command(subcommand)]
    Agents(AgentsCommand),
    /// Auto-ingestion operations
    #[command(subcommand)]
    Ingest(IngestCommand),
    /// Alert operations
    #[command(subcommand)]
    Alerts(AlertsCommand),
    /// Trust scoring operations
    #[command(subcommand)]
    Trust(TrustCommand),
    /// Training trigger operations
    #[command(subcommand)]
    Training(TrainingCommand),
}

#[derive(Subcommand)]
pub enum TablesCommand {
    /// List registered tables
    List,
    /// Show a table's schema
    Show { table: String },
    /// Query rows
    Rows {
        table: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long)]
        offset: Option<u32>,
        /// Equality filters as a JSON object
        #[arg(long)]
        filters: Option<String>,
    },
    /// Governed row insert
    Insert {
        table: String,
        /// Row data as a JSON object
        #[arg(long)]
        data: String,
    },
    /// Partial row update
    Update {
        table: String,
        id: String,
        /// Patch as a JSON object
        #[arg(long)]
        patch: String,
    },
    /// Analyze a file and propose a target table
    Analyze { file_path: String },
}

#[derive(Subcommand)]
pub enum AgentsCommand {
    /// Spawn an agent
    Spawn {
        kind: String,
        #[arg(long)]
        instance_id: Option<String>,
    },
    /// List active agents
    List,
    /// Execute a job synchronously
    Execute {
        kind: String,
        /// Job payload as a JSON object
        #[arg(long)]
        payload: String,
        #[arg(long)]
        reuse: bool,
    },
    /// Queue a job
    Submit {
        kind: String,
        #[arg(long)]
        payload: String,
    },
    /// Drain the job queue
    ProcessQueue {
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
    /// Terminate an agent
    Terminate { agent_id: String },
    /// Revoke an agent
    Revoke {
        agent_id: String,
        #[arg(long, default_value = "operator revocation")]
        reason: String,
    },
    /// Lifecycle metrics
    Metrics,
}

#[derive(Subcommand)]
pub enum IngestCommand {
    /// Drafts and proposals awaiting approval
    Pending,
    /// Approve or reject a pending proposal
    Decide {
        approval_id: String,
        #[arg(long)]
        approved: bool,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Pipeline statistics
    Stats,
}

#[derive(Subcommand)]
pub enum AlertsCommand {
    /// Active alerts
    Active {
        #[arg(long)]
        severity: Option<String>,
    },
    /// Alert counts
    Summary,
    /// Acknowledge an alert
    Ack { alert_id: String },
    /// Resolve an alert
    Resolve { alert_id: String },
}

#[derive(Subcommand)]
pub enum TrustCommand {
    /// Trust report across all tables
    Report,
    /// Re-detect contradictions and rescore a table
    Rescore { table: String },
    /// Contradictions in one table
    Contradictions { table: String },
}

#[derive(Subcommand)]
pub enum TrainingCommand {
    /// Per-table counter status
    Status,
    /// Fire training for a table regardless of thresholds
    Force { table: String },
}

/// Run a parsed command. Startup errors bubble up; command-level errors
/// are printed as in-band JSON and exit 0.
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(cli.config.as_deref())?;
    let plane = ControlPlane::build(config).await?;

    match cli.command {
        Command::Serve => serve(plane).await,
        Command::Init => {
            // Building the plane already seeded schemas and materialized
            // tables; report what exists.
            println!(
                "{}",
                serde_json::json!({
                    "tables": plane.tables().len(),
                    "schema_dir": plane.subsystems().config.schema_dir,
                    "database": plane.subsystems().config.database_path,
                })
            );
            Ok(())
        }
        Command::Tables(cmd) => tables(plane, cmd).await,
        Command::Agents(cmd) => agents(plane, cmd).await,
        Command::Ingest(cmd) => ingest(plane, cmd).await,
        Command::Alerts(cmd) => alerts(plane, cmd).await,
        Command::Trust(cmd) => trust(plane, cmd).await,
        Command::Training(cmd) => training(plane, cmd).await,
    }
}

async fn serve(plane: ControlPlane) -> Result<()> {
    plane.start_background_loops();
    info!("mnemon control plane running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    plane.shutdown().await;
    Ok(())
}

async fn tables(plane: ControlPlane, cmd: TablesCommand) -> Result<()> {
    match cmd {
        TablesCommand::List => {
            let mut table = Table::new();
            table.set_header(vec!["table", "fields", "description"]);
            for info in plane.tables() {
                table.add_row(vec![
                    info.name,
                    info.field_count.to_string(),
                    info.description,
                ]);
            }
            println!("{table}");
        }
        TablesCommand::Show { table } => match plane.table_schema(&table) {
            Ok(schema) => println!("{}", serde_json::to_string_pretty(&schema)?),
            Err(e) => print_error(&e),
        },
        TablesCommand::Rows {
            table,
            limit,
            offset,
            filters,
        } => {
            let filters = filters.map(|f| serde_json::from_str(&f)).transpose()?;
            match plane.rows(&table, Some(limit), offset, filters).await {
                Ok(rows) => {
                    let rendered: Vec<serde_json::Value> =
                        rows.iter().map(|r| r.to_json()).collect();
                    println!("{}", serde_json::to_string_pretty(&rendered)?);
                }
                Err(e) => print_error(&e),
            }
        }
        TablesCommand::Insert { table, data } => {
            let data = serde_json::from_str(&data)?;
            match plane.insert_row(&table, data).await {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(e) => print_error(&e),
            }
        }
        TablesCommand::Update { table, id, patch } => {
            let patch = serde_json::from_str(&patch)?;
            match plane.update_row(&table, &id, patch).await {
                Ok(ok) => println!("{}", serde_json::json!({"ok": ok})),
                Err(e) => print_error(&e),
            }
        }
        TablesCommand::Analyze { file_path } => match plane.analyze(&file_path) {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => print_error(&e),
        },
    }
    Ok(())
}

async fn agents(plane: ControlPlane, cmd: AgentsCommand) -> Result<()> {
    match cmd {
        AgentsCommand::Spawn { kind, instance_id } => {
            match plane.spawn_agent(&kind, instance_id).await {
                Ok(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                Err(e) => print_error(&e),
            }
        }
        AgentsCommand::List => {
            let mut table = Table::new();
            table.set_header(vec!["agent", "kind", "state", "trust", "jobs"]);
            for agent in plane.agents() {
                table.add_row(vec![
                    agent.agent_id.to_string(),
                    agent.kind.to_string(),
                    agent.state.to_string(),
                    format!("{:.2}", agent.trust_score),
                    format!("{}/{}", agent.jobs_completed, agent.jobs_failed),
                ]);
            }
            println!("{table}");
        }
        AgentsCommand::Execute {
            kind,
            payload,
            reuse,
        } => {
            let payload = serde_json::from_str(&payload)?;
            match plane.execute_job(&kind, payload, reuse).await {
                Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                Err(e) => print_error(&e),
            }
        }
        AgentsCommand::Submit { kind, payload } => {
            let payload = serde_json::from_str(&payload)?;
            match plane.submit_job(&kind, payload) {
                Ok(job_id) => {
                    println!("{}", serde_json::json!({"job_id": job_id, "status": "queued"}))
                }
                Err(e) => print_error(&e),
            }
        }
        AgentsCommand::ProcessQueue { max_concurrent } => {
            let metrics = plane.process_queue(max_concurrent).await;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        AgentsCommand::Terminate { agent_id } => match plane.terminate_agent(&agent_id).await {
            Ok(ok) => println!("{}", serde_json::json!({"ok": ok})),
            Err(e) => print_error(&e),
        },
        AgentsCommand::Revoke { agent_id, reason } => {
            match plane.revoke_agent(&agent_id, &reason).await {
                Ok(()) => println!("{}", serde_json::json!({"ok": true})),
                Err(e) => print_error(&e),
            }
        }
        AgentsCommand::Metrics => {
            println!("{}", serde_json::to_string_pretty(&plane.lifecycle_metrics())?);
        }
    }
    Ok(())
}

async fn ingest(plane: ControlPlane, cmd: IngestCommand) -> Result<()> {
    match cmd {
        IngestCommand::Pending => {
            println!(
                "{}",
                serde_json::to_string_pretty(&plane.pending_ingestions())?
            );
        }
        IngestCommand::Decide {
            approval_id,
            approved,
            reason,
        } => match plane
            .decide_ingestion(&approval_id, approved, reason.as_deref())
            .await
        {
            Ok(ok) => println!("{}", serde_json::json!({"ok": ok})),
            Err(e) => print_error(&e),
        },
        IngestCommand::Stats => {
            println!("{}", serde_json::to_string_pretty(&plane.ingestion_stats())?);
        }
    }
    Ok(())
}

async fn alerts(plane: ControlPlane, cmd: AlertsCommand) -> Result<()> {
    match cmd {
        AlertsCommand::Active { severity } => {
            match plane.active_alerts(severity.as_deref()) {
                Ok(alerts) => {
                    let mut table = Table::new();
                    table.set_header(vec!["id", "severity", "title", "first seen"]);
                    for alert in alerts {
                        table.add_row(vec![
                            alert.id,
                            alert.severity.to_string(),
                            alert.title,
                            alert.first_seen_at.to_rfc3339(),
                        ]);
                    }
                    println!("{table}");
                }
                Err(e) => print_error(&e),
            }
        }
        AlertsCommand::Summary => {
            println!("{}", serde_json::to_string_pretty(&plane.alert_summary())?);
        }
        AlertsCommand::Ack { alert_id } => {
            println!("{}", serde_json::json!({"ok": plane.acknowledge_alert(&alert_id)}));
        }
        AlertsCommand::Resolve { alert_id } => {
            println!("{}", serde_json::json!({"ok": plane.resolve_alert(&alert_id)}));
        }
    }
    Ok(())
}

async fn trust(plane: ControlPlane, cmd: TrustCommand) -> Result<()> {
    match cmd {
        TrustCommand::Report => match plane.trust_report().await {
            Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            Err(e) => print_error(&e),
        },
        TrustCommand::Rescore { table } => match plane.rescore(&table).await {
            Ok(updated) => println!("{}", serde_json::json!({"rescored": updated})),
            Err(e) => print_error(&e),
        },
        TrustCommand::Contradictions { table } => match plane.contradictions(&table).await {
            Ok(records) => println!("{}", serde_json::to_string_pretty(&records)?),
            Err(e) => print_error(&e),
        },
    }
    Ok(())
}

async fn training(plane: ControlPlane, cmd: TrainingCommand) -> Result<()> {
    match cmd {
        TrainingCommand::Status => match plane.training_status().await {
            Ok(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            Err(e) => print_error(&e),
        },
        TrainingCommand::Force { table } => match plane.force_training(&table).await {
            Ok(()) => println!("{}", serde_json::json!({"ok": true})),
            Err(e) => print_error(&e),
        },
    }
    Ok(())
}

fn print_error(err: &crate::api::ApiError) {
    let kind = match err {
        crate::api::ApiError::InvalidInput(_) => "invalid_input",
        crate::api::ApiError::UnknownTable(_) => "unknown_table",
        crate::api::ApiError::UnknownAgentKind(_) => "unknown_agent_kind",
        crate::api::ApiError::UnknownJob(_) => "unknown_job",
        crate::api::ApiError::Validation(_) => "validation",
        crate::api::ApiError::Capacity(_) => "capacity",
        crate::api::ApiError::Unavailable(_) => "unavailable",
        crate::api::ApiError::Internal(_) => "internal",
    };
    println!(
        "{}",
        serde_json::json!({"error": {"kind": kind, "message": err.to_string()}})
    );
}
