use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tdb_store::cathedral::ArchiveFormat;
use tdb_store::TempleDb;

#[derive(Subcommand)]
pub enum CathedralAction {
    /// Export a project as a .cathedral package
    Export {
        project: String,
        out: PathBuf,
        /// Glob patterns to exclude from the package
        #[arg(long)]
        exclude: Vec<String>,
        /// Archive as a single file instead of a directory (tar-gz or tar-zstd)
        #[arg(long, value_parser = ["directory", "tar-gz", "tar-zstd"], default_value = "directory")]
        archive: String,
    },
    /// Import a .cathedral package directory, creating the project if needed
    Import {
        pkg_root: PathBuf,
        /// Allow importing into an already-existing project slug
        #[arg(long)]
        overwrite: bool,
        /// Import under a different slug than the package records
        #[arg(long)]
        new_slug: Option<String>,
    },
}

pub async fn run(db: &TempleDb, action: CathedralAction) -> Result<()> {
    match action {
        CathedralAction::Export { project, out, exclude, archive } => {
            let project_id = db.projects().get_by_slug(&project).await.context("project not found")?.id;
            let archive = match archive.as_str() {
                "tar-gz" => ArchiveFormat::TarGz,
                "tar-zstd" => ArchiveFormat::TarZstd,
                _ => ArchiveFormat::Directory,
            };
            let path = db.export_cathedral(project_id, &out, &exclude, archive).await?;
            println!("{} {}", "exported".green(), path.display());
            Ok(())
        }
        CathedralAction::Import { pkg_root, overwrite, new_slug } => {
            let project = db.import_cathedral(&pkg_root, overwrite, new_slug.as_deref()).await?;
            println!("{} {} ({})", "imported".green(), project.slug, project.id);
            Ok(())
        }
    }
}
