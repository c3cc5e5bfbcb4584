use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker written by `tdb init` at the root of a working directory,
/// analogous to a `.git` directory: it records which project, checkout, and
/// branch this directory is bound to so later commands don't need them
/// repeated on every invocation.
const MARKER_DIR: &str = ".templedb";
const MARKER_FILE: &str = "workspace.toml";

#[derive(Debug, Serialize, Deserialize)]
pub struct Workspace {
    pub project_id: Uuid,
    pub checkout_id: Uuid,
    pub branch_name: String,
}

impl Workspace {
    fn marker_path(dir: &Path) -> PathBuf {
        dir.join(MARKER_DIR).join(MARKER_FILE)
    }

    /// Walks up from `start` looking for a `.templedb/workspace.toml`
    /// marker, mirroring how a git client walks up for `.git`.
    pub fn discover(start: &Path) -> Result<(Self, PathBuf)> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = Self::marker_path(&dir);
            if candidate.exists() {
                let content = std::fs::read_to_string(&candidate).context("failed to read workspace marker")?;
                let workspace: Workspace = toml::from_str(&content).context("failed to parse workspace marker")?;
                return Ok((workspace, dir));
            }
            if !dir.pop() {
                anyhow::bail!("not a templedb workspace (or any parent up to filesystem root) — run `tdb init` first");
            }
        }
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = Self::marker_path(dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create .templedb directory")?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize workspace marker")?;
        std::fs::write(&path, content).context("failed to write workspace marker")?;
        Ok(())
    }
}

/// Resolves the author name the same way `git commit` falls back when no
/// identity is configured: `git config user.name`, then `$USER`.
pub fn resolve_author() -> String {
    std::process::Command::new("git")
        .args(["config", "user.name"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| {
            let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
            (!name.is_empty()).then_some(name)
        })
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string())
}
