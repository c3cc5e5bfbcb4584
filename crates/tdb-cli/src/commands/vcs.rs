use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use tdb_core::{ConflictStrategy, WorkingFileState};
use tdb_store::TempleDb;

use crate::config::{resolve_author, Workspace};

pub async fn init(db: &TempleDb, path: Option<PathBuf>, slug: Option<String>) -> Result<()> {
    let dir = path.unwrap_or(std::env::current_dir()?);
    std::fs::create_dir_all(&dir)?;
    let dir = dir.canonicalize()?;

    let slug = slug.unwrap_or_else(|| {
        dir.file_name().and_then(|n| n.to_str()).unwrap_or("project").to_string()
    });

    let project = match db.projects().get_by_slug(&slug).await {
        Ok(project) => project,
        Err(_) => db.projects().create(&slug, &slug, dir.to_str()).await.context("failed to create project")?,
    };

    let branch = db.vcs().get_branch_by_name(project.id, &project.default_branch).await?;
    let checkout = db.checkouts().create(project.id, dir.to_str().unwrap_or_default()).await?;

    let workspace = Workspace {
        project_id: project.id,
        checkout_id: checkout.id,
        branch_name: branch.name.clone(),
    };
    workspace.write(&dir)?;

    db.working_state().refresh(project.id, branch.id, &dir).await?;

    println!("{} {} at {}", "initialized".green(), project.slug, dir.display());
    Ok(())
}

async fn bound(db: &TempleDb) -> Result<(Workspace, PathBuf, tdb_core::BranchId)> {
    let cwd = std::env::current_dir()?;
    let (workspace, root) = Workspace::discover(&cwd)?;
    let branch = db.vcs().get_branch_by_name(workspace.project_id, &workspace.branch_name).await?;
    Ok((workspace, root, branch.id))
}

pub async fn sync(db: &TempleDb) -> Result<()> {
    let (workspace, root, branch_id) = bound(db).await?;
    let entries = db.working_state().refresh(workspace.project_id, branch_id, &root).await?;

    let files = db.files();
    let mut snapshots = Vec::new();
    for entry in &entries {
        if entry.state == WorkingFileState::Deleted {
            continue;
        }
        let file = files.get(entry.file_id).await?;
        if let (Some(version), Some(hash)) = (file.current_version, file.current_hash.clone()) {
            snapshots.push((entry.file_id, version, hash));
        }
    }
    db.checkouts().snapshot(workspace.checkout_id, &snapshots).await?;

    println!("{} {} file(s) tracked", "synced".green(), entries.len());
    Ok(())
}

pub async fn status(db: &TempleDb) -> Result<()> {
    let (_workspace, root, branch_id) = bound(db).await?;
    let entries = db.working_state().refresh(_workspace.project_id, branch_id, &root).await?;

    let (staged, unstaged): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.staged);

    if staged.is_empty() && unstaged.is_empty() {
        println!("nothing to commit, working tree clean");
        return Ok(());
    }

    if !staged.is_empty() {
        println!("Changes to be committed:");
        for e in &staged {
            println!("  {}", format!("{}: {}", e.state, e.relative_path).green());
        }
    }
    if !unstaged.is_empty() {
        println!("Changes not staged for commit:");
        for e in &unstaged {
            println!("  {}", format!("{}: {}", e.state, e.relative_path).red());
        }
    }
    Ok(())
}

fn matches_pathspec(path: &str, pathspec: &[String]) -> bool {
    pathspec.is_empty() || pathspec.iter().any(|p| path.contains(p.as_str()))
}

pub async fn add(db: &TempleDb, pathspec: Vec<String>, all: bool) -> Result<()> {
    if !all && pathspec.is_empty() {
        anyhow::bail!("specify --all or one or more path patterns");
    }
    let (_workspace, root, branch_id) = bound(db).await?;
    let entries = db.working_state().refresh(_workspace.project_id, branch_id, &root).await?;

    let mut staged_count = 0;
    for entry in entries.iter().filter(|e| e.state != WorkingFileState::Unmodified) {
        if all || matches_pathspec(&entry.relative_path, &pathspec) {
            db.working_state().set_staged(branch_id, entry.file_id, true).await?;
            staged_count += 1;
        }
    }
    println!("{} {} file(s)", "staged".green(), staged_count);
    Ok(())
}

pub async fn reset(db: &TempleDb, pathspec: Vec<String>, all: bool) -> Result<()> {
    let (_workspace, _root, branch_id) = bound(db).await?;
    let entries = db.working_state().list(branch_id).await?;

    let mut unstaged_count = 0;
    for entry in entries.iter().filter(|e| e.staged) {
        if all || matches_pathspec(&entry.relative_path, &pathspec) {
            db.working_state().set_staged(branch_id, entry.file_id, false).await?;
            unstaged_count += 1;
        }
    }
    println!("{} {} file(s)", "unstaged".green(), unstaged_count);
    Ok(())
}

pub async fn commit(db: &TempleDb, message: String, on_conflict: String) -> Result<()> {
    let strategy: ConflictStrategy = on_conflict.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let (workspace, _root, branch_id) = bound(db).await?;
    let author = resolve_author();

    let commit = db
        .commit_engine()
        .commit(workspace.project_id, branch_id, Some(workspace.checkout_id), &author, &message, strategy)
        .await?;

    println!("{} {} {}", "committed".green(), commit.commit_hash, commit.message);
    Ok(())
}

pub async fn log(db: &TempleDb, oneline: bool, n: Option<u32>) -> Result<()> {
    let (_workspace, _root, branch_id) = bound(db).await?;
    let commits = db.vcs().log(branch_id, n.unwrap_or(20)).await?;

    for commit in commits {
        if oneline {
            println!("{} {}", commit.commit_hash.yellow(), commit.message);
        } else {
            println!("{} {}", "commit".yellow(), commit.commit_hash);
            println!("Author: {}", commit.author);
            println!("Date:   {}", commit.created_at.to_rfc3339());
            println!();
            println!("    {}", commit.message);
            println!();
        }
    }
    Ok(())
}

async fn resolve_commit(db: &TempleDb, branch_id: tdb_core::BranchId, hash: &str) -> Result<tdb_core::CommitId> {
    // Commit hashes are opaque and not indexed for direct lookup from the
    // CLI (spec §4.5) — resolve against the branch log instead.
    let commits = db.vcs().log(branch_id, u32::MAX).await?;
    commits
        .into_iter()
        .find(|c| c.commit_hash == hash)
        .map(|c| c.id)
        .context("no such commit on this branch")
}

pub async fn diff(db: &TempleDb, path: String, commit_a: Option<String>, commit_b: Option<String>) -> Result<()> {
    let (_workspace, _root, branch_id) = bound(db).await?;

    let commit_a = match commit_a {
        Some(hash) => Some(resolve_commit(db, branch_id, &hash).await?),
        None => None,
    };
    let commit_b = match commit_b {
        Some(hash) => Some(resolve_commit(db, branch_id, &hash).await?),
        None => None,
    };

    let text = db.vcs().diff_file(db.content(), branch_id, &path, commit_a, commit_b).await?;
    if text.is_empty() {
        println!("no changes");
    } else {
        print!("{text}");
    }
    Ok(())
}

pub async fn branch(db: &TempleDb, name: Option<String>, from: Option<String>) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let (workspace, _root) = Workspace::discover(&cwd)?;

    match name {
        Some(name) => {
            let parent_id = match from {
                Some(parent_name) => Some(db.vcs().get_branch_by_name(workspace.project_id, &parent_name).await?.id),
                None => Some(db.vcs().get_branch_by_name(workspace.project_id, &workspace.branch_name).await?.id),
            };
            let branch = db.vcs().create_branch(workspace.project_id, &name, parent_id).await?;
            println!("{} {}", "created branch".green(), branch.name);
        }
        None => {
            let branches = db.vcs().list_branches(workspace.project_id).await?;
            for b in branches {
                let marker = if b.name == workspace.branch_name { "*" } else { " " };
                println!("{} {}", marker, b.name);
            }
        }
    }
    Ok(())
}
