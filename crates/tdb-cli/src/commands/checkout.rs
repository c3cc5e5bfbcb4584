use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tdb_store::TempleDb;
use uuid::Uuid;

use crate::config::Workspace;

#[derive(Subcommand)]
pub enum CheckoutAction {
    /// Materialize a project's current content onto disk at `target`
    Create {
        project: String,
        target: PathBuf,
        /// Overwrite a non-empty target directory
        #[arg(long)]
        force: bool,
    },
    /// List a project's checkouts
    List { project: String },
    /// List checkouts whose directory no longer exists on disk
    FindStale { project: String },
    /// Delete a checkout and its snapshots
    Delete { id: Uuid },
}

pub async fn run(db: &TempleDb, action: CheckoutAction) -> Result<()> {
    match action {
        CheckoutAction::Create { project, target, force } => {
            let project = db.projects().get_by_slug(&project).await.context("project not found")?;
            let (files_written, bytes_written) =
                db.checkouts().checkout(project.id, &target, force).await?;

            let target = target.canonicalize().unwrap_or(target);
            let checkout = db
                .checkouts()
                .list_checkouts(project.id)
                .await?
                .into_iter()
                .find(|c| c.checkout_path == target.display().to_string())
                .context("checkout vanished after materialization")?;

            let branch = db.vcs().get_branch_by_name(project.id, &project.default_branch).await?;
            Workspace { project_id: project.id, checkout_id: checkout.id, branch_name: branch.name }
                .write(&target)?;

            println!(
                "{} {} file(s), {} byte(s) to {}",
                "checked out".green(),
                files_written,
                bytes_written,
                target.display()
            );
            Ok(())
        }
        CheckoutAction::List { project } => {
            let project = db.projects().get_by_slug(&project).await.context("project not found")?;
            for checkout in db.checkouts().list_checkouts(project.id).await? {
                println!(
                    "{:<36}  {:<40}  {}",
                    checkout.id,
                    checkout.checkout_path,
                    checkout.last_sync_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into())
                );
            }
            Ok(())
        }
        CheckoutAction::FindStale { project } => {
            let project = db.projects().get_by_slug(&project).await.context("project not found")?;
            for checkout in db.checkouts().find_stale(project.id).await? {
                println!("{}  {}", checkout.id, checkout.checkout_path);
            }
            Ok(())
        }
        CheckoutAction::Delete { id } => {
            db.checkouts().delete(id).await?;
            println!("{} {}", "deleted".green(), id);
            Ok(())
        }
    }
}
