use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tdb_store::TempleDb;

#[derive(Subcommand)]
pub enum ProjectAction {
    /// Create a project (without binding the current directory to it)
    Create {
        slug: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        repository_url: Option<String>,
    },
    /// List all projects
    List,
    /// Show a project's details
    Show { slug: String },
}

pub async fn run(db: &TempleDb, action: ProjectAction) -> Result<()> {
    match action {
        ProjectAction::Create { slug, name, repository_url } => {
            let name = name.unwrap_or_else(|| slug.clone());
            let project = db
                .projects()
                .create(&slug, &name, repository_url.as_deref())
                .await
                .context("failed to create project")?;
            println!("{} {} ({})", "created".green(), project.slug, project.id);
            Ok(())
        }
        ProjectAction::List => {
            let projects = db.projects().list().await?;
            if projects.is_empty() {
                println!("no projects");
                return Ok(());
            }
            for project in projects {
                println!("{:<24} {:<10} {}", project.slug, project.visibility.to_string(), project.id);
            }
            Ok(())
        }
        ProjectAction::Show { slug } => {
            let project = db.projects().get_by_slug(&slug).await.context("project not found")?;
            println!("slug:            {}", project.slug);
            println!("id:              {}", project.id);
            println!("name:            {}", project.name);
            println!("default_branch:  {}", project.default_branch);
            println!("visibility:      {}", project.visibility);
            println!("repository_url:  {}", project.repository_url.as_deref().unwrap_or("-"));
            println!("license:         {}", project.license.as_deref().unwrap_or("-"));
            Ok(())
        }
    }
}
