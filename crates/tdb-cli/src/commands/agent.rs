use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tdb_core::AgentSessionStatus;
use tdb_store::TempleDb;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum AgentAction {
    /// Start a new agent session against a project
    Start {
        project: String,
        #[arg(long, default_value = "general")]
        agent_type: String,
    },
    /// Update an agent session's status (active, idle, disconnected)
    SetStatus { session: Uuid, status: String },
    /// Show an agent session
    Show { session: Uuid },
}

pub async fn run(db: &TempleDb, action: AgentAction) -> Result<()> {
    match action {
        AgentAction::Start { project, agent_type } => {
            let project_id = db.projects().get_by_slug(&project).await.context("project not found")?.id;
            let session = db.coordinator().start_session(project_id, &agent_type).await?;
            println!("{} {}", "started session".green(), session.id);
            Ok(())
        }
        AgentAction::SetStatus { session, status } => {
            let status: AgentSessionStatus = status.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            db.coordinator().set_session_status(session, status).await?;
            println!("{} {} -> {}", "session".green(), session, status);
            Ok(())
        }
        AgentAction::Show { session } => {
            let s = db.coordinator().get_session(session).await?;
            println!("id:         {}", s.id);
            println!("agent_type: {}", s.agent_type);
            println!("status:     {}", s.status);
            println!("started_at: {}", s.started_at.to_rfc3339());
            Ok(())
        }
    }
}
