use std::path::{Path, PathBuf};

use sqlx::SqlitePool;
use tdb_core::Result;

use crate::cathedral::{self, ArchiveFormat, ExportOptions};
use crate::checkout::CheckoutStore;
use crate::commit_engine::CommitEngine;
use crate::content_store::ContentStore;
use crate::coordinator::Coordinator;
use crate::db;
use crate::file_registry::FileRegistryStore;
use crate::project_store::ProjectStore;
use crate::vcs::VcsStore;
use crate::working_state::WorkingStateStore;
use crate::workitems::WorkItemStore;

/// The central facade tying together every store (C1-C10) behind a single
/// `SqlitePool`, mirroring the role the code-platform engine's top-level
/// orchestrator plays for its own graph/workspace stores: one struct,
/// constructed once at startup, handed out by dependency injection rather
/// than reached for through a global.
pub struct TempleDb {
    pub db: SqlitePool,
    projects: ProjectStore,
    content: ContentStore,
    files: FileRegistryStore,
    working_state: WorkingStateStore,
    vcs: VcsStore,
    checkouts: CheckoutStore,
    commit_engine: CommitEngine,
    work_items: WorkItemStore,
    coordinator: Coordinator,
}

impl TempleDb {
    /// Opens (creating if absent) the database file at `path` and runs
    /// migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::open(path).await?;
        Ok(Self::from_pool(pool))
    }

    /// Opens an in-memory database, for tests and ephemeral sessions.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = db::open_in_memory().await?;
        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            projects: ProjectStore::new(pool.clone()),
            content: ContentStore::new(pool.clone()),
            files: FileRegistryStore::new(pool.clone()),
            working_state: WorkingStateStore::new(pool.clone()),
            vcs: VcsStore::new(pool.clone()),
            checkouts: CheckoutStore::new(pool.clone()),
            commit_engine: CommitEngine::new(pool.clone()),
            work_items: WorkItemStore::new(pool.clone()),
            coordinator: Coordinator::new(pool.clone()),
            db: pool,
        }
    }

    pub fn projects(&self) -> &ProjectStore {
        &self.projects
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn files(&self) -> &FileRegistryStore {
        &self.files
    }

    pub fn working_state(&self) -> &WorkingStateStore {
        &self.working_state
    }

    pub fn vcs(&self) -> &VcsStore {
        &self.vcs
    }

    pub fn checkouts(&self) -> &CheckoutStore {
        &self.checkouts
    }

    pub fn commit_engine(&self) -> &CommitEngine {
        &self.commit_engine
    }

    pub fn work_items(&self) -> &WorkItemStore {
        &self.work_items
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Exports a project as a `.cathedral` package (spec §4.8).
    pub async fn export_cathedral(
        &self,
        project_id: tdb_core::ProjectId,
        out_path: &Path,
        exclude_patterns: &[String],
        archive: ArchiveFormat,
    ) -> Result<PathBuf> {
        cathedral::export(
            project_id,
            &self.projects,
            &self.files,
            &self.content,
            &self.vcs,
            out_path,
            &ExportOptions { exclude_patterns, archive },
        )
        .await
    }

    /// Imports a `.cathedral` package directory (spec §4.8). `overwrite`
    /// permits importing into an already-existing project slug; `new_slug`
    /// renames the imported project instead of reusing its original slug.
    pub async fn import_cathedral(&self, pkg_root: &Path, overwrite: bool, new_slug: Option<&str>) -> Result<tdb_core::Project> {
        cathedral::import(pkg_root, &self.projects, &self.files, &self.content, &self.vcs, overwrite, new_slug).await
    }
}
