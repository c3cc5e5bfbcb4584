use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tdb_core::{Priority, WorkItemStatus};
use tdb_store::TempleDb;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum WorkAction {
    /// Create a new work item
    Create {
        project: String,
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "task")]
        item_type: String,
        #[arg(long, default_value = "medium")]
        priority: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// List work items for a project, optionally filtered by priority
    List {
        project: String,
        #[arg(long)]
        priority: Option<String>,
    },
    /// Show a work item's full history
    Show { id: String },
    /// Assign a work item to a session (auto-selects the least-busy agent if omitted)
    Assign {
        id: String,
        #[arg(long)]
        session: Option<Uuid>,
    },
    /// Transition a work item's status
    Status {
        id: String,
        to: String,
        #[arg(long)]
        session: Option<Uuid>,
    },
    /// Auto-dispatch pending work to available agents, in priority order
    Dispatch {
        project: String,
        #[arg(long)]
        priority: Option<String>,
    },
    /// List available agent sessions and their current workload
    Agents { project: String },
    /// Show coordination metrics for a project
    Metrics { project: String },
    /// Show an agent's mailbox summary
    Mailbox { session: Uuid },
}

async fn project_id(db: &TempleDb, slug: &str) -> Result<tdb_core::ProjectId> {
    Ok(db.projects().get_by_slug(slug).await.context("project not found")?.id)
}

pub async fn run(db: &TempleDb, action: WorkAction) -> Result<()> {
    match action {
        WorkAction::Create { project, title, description, item_type, priority, parent } => {
            let project_id = project_id(db, &project).await?;
            let priority: Priority = priority.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let item = db
                .work_items()
                .create(project_id, &title, description.as_deref(), &item_type, priority, parent.as_deref(), None)
                .await?;
            println!("{} {} {}", "created".green(), item.id, item.title);
            Ok(())
        }
        WorkAction::List { project, priority } => {
            let project_id = project_id(db, &project).await?;
            let priority = priority.map(|p| p.parse()).transpose().map_err(|e: String| anyhow::anyhow!(e))?;
            let items = db.work_items().dispatch_queue(project_id, priority).await?;
            for item in items {
                println!("{:<10} {:<8} {:<12} {}", item.id, item.priority, item.status.to_string(), item.title);
            }
            Ok(())
        }
        WorkAction::Show { id } => {
            let item = db.work_items().get(&id).await?;
            println!("id:          {}", item.id);
            println!("title:       {}", item.title);
            println!("type:        {}", item.item_type);
            println!("priority:    {}", item.priority);
            println!("status:      {}", item.status);
            println!("parent:      {}", item.parent_id.as_deref().unwrap_or("-"));
            println!("assigned:    {}", item.assigned_session_id.map(|s| s.to_string()).unwrap_or_else(|| "-".into()));
            println!();
            println!("transitions:");
            for t in db.work_items().transitions(&id).await? {
                println!(
                    "  {} {} -> {}",
                    t.at.to_rfc3339(),
                    t.from_status.map(|s| s.to_string()).unwrap_or_else(|| "(none)".into()),
                    t.to_status
                );
            }
            Ok(())
        }
        WorkAction::Assign { id, session } => {
            let assigned = db.coordinator().assign_work_item(&id, session).await?;
            println!("{} {} -> session {}", "assigned".green(), id, assigned);
            Ok(())
        }
        WorkAction::Status { id, to, session } => {
            let to: WorkItemStatus = to.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let item = db.work_items().transition(&id, to, session).await?;
            println!("{} {} -> {}", "transitioned".green(), item.id, item.status);
            Ok(())
        }
        WorkAction::Dispatch { project, priority } => {
            let project_id = project_id(db, &project).await?;
            let priority: Option<Priority> = priority.map(|p| p.parse()).transpose().map_err(|e: String| anyhow::anyhow!(e))?;
            let dispatched = db.coordinator().dispatch_pending(project_id, priority).await?;
            println!("{} {} item(s)", "dispatched".green(), dispatched);
            Ok(())
        }
        WorkAction::Agents { project } => {
            let project_id = project_id(db, &project).await?;
            for agent in db.coordinator().available_agents(project_id).await? {
                println!(
                    "{}  active_work={}  unread={}",
                    agent.session_id, agent.active_work_count, agent.unread_messages
                );
            }
            Ok(())
        }
        WorkAction::Metrics { project } => {
            let project_id = project_id(db, &project).await?;
            let m = db.coordinator().metrics(project_id).await?;
            println!("pending:            {}", m.pending);
            println!("assigned:           {}", m.assigned);
            println!("in_progress:        {}", m.in_progress);
            println!("blocked:            {}", m.blocked);
            println!("completed:          {}", m.completed);
            println!("agent_utilization:  {:.2}", m.agent_utilization);
            Ok(())
        }
        WorkAction::Mailbox { session } => {
            let summary = db.coordinator().mailbox_summary(session).await?;
            println!("total:            {}", summary.total);
            println!("unread:           {}", summary.unread);
            println!("read:             {}", summary.read);
            println!("urgent:           {}", summary.urgent);
            println!("work_assignments: {}", summary.work_assignments);
            Ok(())
        }
    }
}
