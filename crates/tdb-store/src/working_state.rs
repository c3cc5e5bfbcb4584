use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tdb_core::{BranchId, FileId, ProjectId, Result, WorkingFileState, WorkingStateEntry};

use crate::content_store::ContentStore;
use crate::file_registry::FileRegistryStore;
use crate::scanner;

#[derive(sqlx::FromRow)]
struct WorkingStateRow {
    project_id: String,
    branch_id: String,
    file_id: String,
    relative_path: String,
    state: String,
    staged: i64,
    detected_hash: Option<String>,
}

impl WorkingStateRow {
    fn into_entry(self) -> Result<WorkingStateEntry> {
        use uuid::Uuid;
        Ok(WorkingStateEntry {
            project_id: Uuid::parse_str(&self.project_id).map_err(|e| tdb_core::Error::Internal(e.to_string()))?,
            branch_id: Uuid::parse_str(&self.branch_id).map_err(|e| tdb_core::Error::Internal(e.to_string()))?,
            file_id: Uuid::parse_str(&self.file_id).map_err(|e| tdb_core::Error::Internal(e.to_string()))?,
            relative_path: self.relative_path,
            state: self.state.parse().map_err(tdb_core::Error::Internal)?,
            staged: self.staged != 0,
            detected_hash: self.detected_hash,
        })
    }
}

/// Computes and persists the diff between a working directory and the
/// registry's last-known state for a branch (spec §4.4, "C4").
#[derive(Clone)]
pub struct WorkingStateStore {
    pool: SqlitePool,
    files: FileRegistryStore,
    content: ContentStore,
}

impl WorkingStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        let files = FileRegistryStore::new(pool.clone());
        let content = ContentStore::new(pool.clone());
        Self { pool, files, content }
    }

    fn hash_of(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Writes a scanned file's bytes into the content-addressable store so
    /// the hash recorded in working state always has a durable blob behind
    /// it by the time a commit reads it back.
    async fn store_blob(&self, bytes: &[u8], expected_hash: &str) -> Result<()> {
        let hash = match std::str::from_utf8(bytes) {
            Ok(text) => self.content.put_text(text, "utf-8").await?,
            Err(_) => self.content.put_binary(bytes, "application/octet-stream").await?,
        };
        debug_assert_eq!(hash, expected_hash, "content store hash must match working-state detection hash");
        Ok(())
    }

    /// Scans `working_dir`, compares every tracked path against the
    /// registry's current hash, and rewrites the `working_state` table for
    /// `branch_id`. Returns the refreshed entries.
    pub async fn refresh(
        &self,
        project_id: ProjectId,
        branch_id: BranchId,
        working_dir: &Path,
    ) -> Result<Vec<WorkingStateEntry>> {
        let scanned = scanner::scan_directory(working_dir)?;
        let registered = self.files.list_active(project_id).await?;

        let mut by_path: HashMap<String, _> = registered.into_iter().map(|f| (f.relative_path.clone(), f)).collect();

        let mut entries = Vec::new();

        for file in &scanned {
            let bytes = std::fs::read(&file.absolute_path)?;
            let detected_hash = Self::hash_of(&bytes);

            let (file_id, state) = match by_path.remove(&file.relative_path) {
                Some(existing) => {
                    let state = match existing.current_hash.as_deref() {
                        None => WorkingFileState::Added, // registered but never committed
                        Some(h) if h == detected_hash => WorkingFileState::Unmodified,
                        Some(_) => WorkingFileState::Modified,
                    };
                    (existing.id, state)
                }
                None => {
                    let created = self
                        .files
                        .register(project_id, &file.relative_path, &file.file_name, &file.file_type, file.lines_of_code)
                        .await?;
                    (created.id, WorkingFileState::Added)
                }
            };

            if matches!(state, WorkingFileState::Added | WorkingFileState::Modified) {
                self.store_blob(&bytes, &detected_hash).await?;
            }

            self.upsert(project_id, branch_id, file_id, &file.relative_path, state, Some(&detected_hash)).await?;
            entries.push(self.get(branch_id, file_id).await?);
        }

        // Anything still left in `by_path` was registered but not found on disk: deleted.
        for (path, file) in by_path {
            self.upsert(project_id, branch_id, file.id, &path, WorkingFileState::Deleted, None).await?;
            entries.push(self.get(branch_id, file.id).await?);
        }

        Ok(entries)
    }

    async fn upsert(
        &self,
        project_id: ProjectId,
        branch_id: BranchId,
        file_id: FileId,
        relative_path: &str,
        state: WorkingFileState,
        detected_hash: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO working_state (project_id, branch_id, file_id, relative_path, state, staged, detected_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
            ON CONFLICT(branch_id, file_id) DO UPDATE SET
                state = excluded.state,
                relative_path = excluded.relative_path,
                detected_hash = excluded.detected_hash
            "#,
        )
        .bind(project_id.to_string())
        .bind(branch_id.to_string())
        .bind(file_id.to_string())
        .bind(relative_path)
        .bind(state.to_string())
        .bind(detected_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, branch_id: BranchId, file_id: FileId) -> Result<WorkingStateEntry> {
        let row = sqlx::query_as::<_, WorkingStateRow>(
            r#"
            SELECT project_id, branch_id, file_id, relative_path, state, staged, detected_hash
            FROM working_state WHERE branch_id = ?1 AND file_id = ?2
            "#,
        )
        .bind(branch_id.to_string())
        .bind(file_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        row.into_entry()
    }

    pub async fn list(&self, branch_id: BranchId) -> Result<Vec<WorkingStateEntry>> {
        let rows = sqlx::query_as::<_, WorkingStateRow>(
            r#"
            SELECT project_id, branch_id, file_id, relative_path, state, staged, detected_hash
            FROM working_state WHERE branch_id = ?1
            ORDER BY relative_path
            "#,
        )
        .bind(branch_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkingStateRow::into_entry).collect()
    }

    /// Stages or unstages a file for the next commit.
    pub async fn set_staged(&self, branch_id: BranchId, file_id: FileId, staged: bool) -> Result<()> {
        sqlx::query("UPDATE working_state SET staged = ?3 WHERE branch_id = ?1 AND file_id = ?2")
            .bind(branch_id.to_string())
            .bind(file_id.to_string())
            .bind(staged as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn staged(&self, branch_id: BranchId) -> Result<Vec<WorkingStateEntry>> {
        let rows = sqlx::query_as::<_, WorkingStateRow>(
            r#"
            SELECT project_id, branch_id, file_id, relative_path, state, staged, detected_hash
            FROM working_state WHERE branch_id = ?1 AND staged = 1
            ORDER BY relative_path
            "#,
        )
        .bind(branch_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkingStateRow::into_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::project_store::ProjectStore;
    use uuid::Uuid;

    async fn seed(pool: &SqlitePool) -> (ProjectId, BranchId) {
        let projects = ProjectStore::new(pool.clone());
        let project = projects.create("demo", "Demo", None).await.unwrap();
        let branch_id: String = sqlx::query_scalar("SELECT id FROM branches WHERE project_id = ?1")
            .bind(project.id.to_string())
            .fetch_one(pool)
            .await
            .unwrap();
        (project.id, Uuid::parse_str(&branch_id).unwrap())
    }

    #[tokio::test]
    async fn refresh_keeps_uncommitted_file_as_added() {
        let pool = db::open_in_memory().await.unwrap();
        let (project_id, branch_id) = seed(&pool).await;
        let store = WorkingStateStore::new(pool);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn a() {}\n").unwrap();

        let entries = store.refresh(project_id, branch_id, dir.path()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, WorkingFileState::Added);

        // Still uncommitted: re-scanning a changed file has nothing to diff
        // against yet, so it stays Added rather than Modified.
        std::fs::write(dir.path().join("lib.rs"), "pub fn b() {}\n").unwrap();
        let entries = store.refresh(project_id, branch_id, dir.path()).await.unwrap();
        assert_eq!(entries[0].state, WorkingFileState::Added);
    }

    #[tokio::test]
    async fn refresh_detects_modification_after_commit() {
        let pool = db::open_in_memory().await.unwrap();
        let (project_id, branch_id) = seed(&pool).await;
        let files = FileRegistryStore::new(pool.clone());
        let store = WorkingStateStore::new(pool);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn a() {}\n").unwrap();
        let entries = store.refresh(project_id, branch_id, dir.path()).await.unwrap();

        // Simulate a commit: the file now has a current version/hash.
        files.add_version(entries[0].file_id, &entries[0].detected_hash.clone().unwrap(), 1).await.unwrap();

        std::fs::write(dir.path().join("lib.rs"), "pub fn b() {}\n").unwrap();
        let entries = store.refresh(project_id, branch_id, dir.path()).await.unwrap();
        assert_eq!(entries[0].state, WorkingFileState::Modified);
    }

    #[tokio::test]
    async fn refresh_detects_deletion() {
        let pool = db::open_in_memory().await.unwrap();
        let (project_id, branch_id) = seed(&pool).await;
        let store = WorkingStateStore::new(pool);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn a() {}\n").unwrap();
        store.refresh(project_id, branch_id, dir.path()).await.unwrap();

        std::fs::remove_file(dir.path().join("lib.rs")).unwrap();
        let entries = store.refresh(project_id, branch_id, dir.path()).await.unwrap();
        assert_eq!(entries[0].state, WorkingFileState::Deleted);
    }
}
