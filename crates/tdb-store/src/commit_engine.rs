use sqlx::SqlitePool;
use tdb_core::{
    BranchId, ChangeType, CheckoutId, Commit, CommitFile, ConflictStrategy, ConflictingFile,
    Error, FileId, ProjectId, Result, WorkingFileState,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::checkout::CheckoutStore;
use crate::content_store::ContentStore;
use crate::file_registry::FileRegistryStore;
use crate::project_store::ProjectStore;
use crate::vcs::VcsStore;
use crate::working_state::WorkingStateStore;

/// Orchestrates a commit: checks staged working-state entries for
/// version-skew against a checkout's last-known snapshot, writes new
/// content-blob versions, and records the commit (spec §4.7, "C7").
///
/// This is the one component allowed to convert a `Conflict` into success,
/// under `ConflictStrategy::Force` (spec §7).
#[derive(Clone)]
pub struct CommitEngine {
    pool: SqlitePool,
    projects: ProjectStore,
    files: FileRegistryStore,
    content: ContentStore,
    working_state: WorkingStateStore,
    checkouts: CheckoutStore,
    vcs: VcsStore,
}

impl CommitEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            projects: ProjectStore::new(pool.clone()),
            files: FileRegistryStore::new(pool.clone()),
            content: ContentStore::new(pool.clone()),
            working_state: WorkingStateStore::new(pool.clone()),
            checkouts: CheckoutStore::new(pool.clone()),
            vcs: VcsStore::new(pool.clone()),
            pool,
        }
    }

    /// Commits every staged entry in `branch_id`'s working state.
    ///
    /// Step order (spec §4.7):
    /// 1. Load staged working-state entries.
    /// 2. If `checkout_id` is given, batch-check each staged file's
    ///    checkout snapshot version against its current registry version.
    /// 3. On skew: `Abort` returns `Error::CommitConflict`, `Force` proceeds
    ///    anyway, `Rebase` is not yet implemented (spec Open Question,
    ///    resolved in DESIGN.md as out of scope for this release).
    /// 4. Write new blob/version rows for added and modified files.
    /// 5. Record the commit and its file changes.
    /// 6. Clear staged flags and reset working state to unmodified.
    pub async fn commit(
        &self,
        project_id: ProjectId,
        branch_id: BranchId,
        checkout_id: Option<CheckoutId>,
        author: &str,
        message: &str,
        strategy: ConflictStrategy,
    ) -> Result<Commit> {
        let project = self.projects.get(project_id).await?;
        let branch = self.vcs.get_branch(branch_id).await?;
        let parent_commit = self.vcs.latest_commit(branch_id).await?;

        let staged = self.working_state.staged(branch_id).await?;
        if staged.is_empty() {
            return Err(Error::InvalidInput("nothing staged to commit".into()));
        }

        let mut conflicts = Vec::new();
        if let Some(checkout_id) = checkout_id {
            for entry in &staged {
                let file = self.files.get(entry.file_id).await?;
                let Some(your_version) = self.checkouts.snapshot_version(checkout_id, entry.file_id).await? else {
                    continue; // never synced: nothing to compare against
                };
                let current_version = file.current_version.unwrap_or(0);
                if your_version < current_version {
                    conflicts.push(ConflictingFile {
                        relative_path: entry.relative_path.clone(),
                        your_version,
                        current_version,
                    });
                }
            }
        }

        if !conflicts.is_empty() {
            match strategy {
                ConflictStrategy::Abort => {
                    warn!(project = %project.slug, conflict_count = conflicts.len(), "commit aborted: version skew");
                    return Err(Error::CommitConflict { conflicts });
                }
                ConflictStrategy::Force => {
                    warn!(project = %project.slug, conflict_count = conflicts.len(), "commit forced over version skew");
                }
                ConflictStrategy::Rebase => {
                    return Err(Error::NotImplemented("rebase conflict strategy".into()));
                }
            }
        }

        let mut changes = Vec::with_capacity(staged.len());
        let mut advanced: Vec<(FileId, u32, String)> = Vec::new();
        let mut deleted: Vec<FileId> = Vec::new();

        for entry in &staged {
            let file = self.files.get(entry.file_id).await?;
            let change = match entry.state {
                WorkingFileState::Added | WorkingFileState::Modified => {
                    let hash = entry
                        .detected_hash
                        .clone()
                        .ok_or_else(|| Error::Internal(format!("staged file {} missing detected hash", entry.relative_path)))?;
                    let old_hash = file.current_hash.clone();
                    let new_version = self.files.add_version(entry.file_id, &hash, file.line_count).await?;
                    advanced.push((entry.file_id, new_version, hash.clone()));

                    CommitFile {
                        commit_id: Uuid::nil(),
                        file_id: entry.file_id,
                        change_type: if old_hash.is_none() { ChangeType::Added } else { ChangeType::Modified },
                        old_content_hash: old_hash,
                        new_content_hash: Some(hash),
                        old_path: Some(entry.relative_path.clone()),
                        new_path: Some(entry.relative_path.clone()),
                    }
                }
                WorkingFileState::Deleted => {
                    let old_hash = file.current_hash.clone();
                    self.files.mark_deleted(entry.file_id).await?;
                    deleted.push(entry.file_id);

                    CommitFile {
                        commit_id: Uuid::nil(),
                        file_id: entry.file_id,
                        change_type: ChangeType::Deleted,
                        old_content_hash: old_hash,
                        new_content_hash: None,
                        old_path: Some(entry.relative_path.clone()),
                        new_path: None,
                    }
                }
                WorkingFileState::Unmodified => continue,
            };

            changes.push(change);
        }

        let commit = self
            .vcs
            .record_commit(
                project_id,
                &project.slug,
                branch_id,
                &branch.name,
                parent_commit.map(|c| c.id),
                author,
                message,
                &changes,
            )
            .await?;

        let mut tx = self.pool.begin().await?;
        for entry in &staged {
            sqlx::query("DELETE FROM working_state WHERE branch_id = ?1 AND file_id = ?2")
                .bind(branch_id.to_string())
                .bind(entry.file_id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        if let Some(checkout_id) = checkout_id {
            if !advanced.is_empty() {
                self.checkouts.snapshot(checkout_id, &advanced).await?;
            }
            if !deleted.is_empty() {
                self.checkouts.forget(checkout_id, &deleted).await?;
            }
        }

        info!(
            project = %project.slug,
            commit_hash = %commit.commit_hash,
            files_changed = changes.len(),
            "commit recorded"
        );

        Ok(commit)
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn seed(pool: &SqlitePool) -> (ProjectId, BranchId) {
        let projects = ProjectStore::new(pool.clone());
        let project = projects.create("demo", "Demo", None).await.unwrap();
        let vcs = VcsStore::new(pool.clone());
        let branch = vcs.get_branch_by_name(project.id, "main").await.unwrap();
        (project.id, branch.id)
    }

    #[tokio::test]
    async fn commit_writes_content_and_clears_staged_state() {
        let pool = db::open_in_memory().await.unwrap();
        let (project_id, branch_id) = seed(&pool).await;

        let files = FileRegistryStore::new(pool.clone());
        let working_state = WorkingStateStore::new(pool.clone());
        let engine = CommitEngine::new(pool.clone());

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn a() {}\n").unwrap();
        let entries = working_state.refresh(project_id, branch_id, dir.path()).await.unwrap();
        working_state.set_staged(branch_id, entries[0].file_id, true).await.unwrap();

        let commit = engine.commit(project_id, branch_id, None, "agent-1", "add lib.rs", ConflictStrategy::Abort).await.unwrap();
        assert_eq!(commit.message, "add lib.rs");

        let file = files.get(entries[0].file_id).await.unwrap();
        assert_eq!(file.current_version, Some(1));

        let remaining = working_state.list(branch_id).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn commit_without_staged_files_is_invalid_input() {
        let pool = db::open_in_memory().await.unwrap();
        let (project_id, branch_id) = seed(&pool).await;
        let engine = CommitEngine::new(pool);

        let err = engine.commit(project_id, branch_id, None, "agent-1", "empty", ConflictStrategy::Abort).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn commit_detects_version_skew_against_checkout_snapshot() {
        let pool = db::open_in_memory().await.unwrap();
        let (project_id, branch_id) = seed(&pool).await;

        let working_state = WorkingStateStore::new(pool.clone());
        let checkouts = CheckoutStore::new(pool.clone());
        let engine = CommitEngine::new(pool.clone());

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn a() {}\n").unwrap();
        let entries = working_state.refresh(project_id, branch_id, dir.path()).await.unwrap();
        working_state.set_staged(branch_id, entries[0].file_id, true).await.unwrap();

        let checkout = checkouts.create(project_id, dir.path().to_str().unwrap()).await.unwrap();
        // Simulate a stale checkout that last synced at version 0, while
        // another writer has already advanced the file to version 1.
        let files = FileRegistryStore::new(pool.clone());
        files.add_version(entries[0].file_id, "someone-elses-hash", 1).await.unwrap();
        checkouts.snapshot(checkout.id, &[(entries[0].file_id, 0, "stale".to_string())]).await.unwrap();

        let err = engine
            .commit(project_id, branch_id, Some(checkout.id), "agent-1", "my change", ConflictStrategy::Abort)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommitConflict { .. }));

        let ok = engine
            .commit(project_id, branch_id, Some(checkout.id), "agent-1", "my change", ConflictStrategy::Force)
            .await
            .unwrap();
        assert_eq!(ok.message, "my change");
    }

    #[tokio::test]
    async fn sequential_commits_from_same_checkout_do_not_conflict() {
        let pool = db::open_in_memory().await.unwrap();
        let (project_id, branch_id) = seed(&pool).await;

        let working_state = WorkingStateStore::new(pool.clone());
        let checkouts = CheckoutStore::new(pool.clone());
        let engine = CommitEngine::new(pool.clone());

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn a() {}\n").unwrap();
        let entries = working_state.refresh(project_id, branch_id, dir.path()).await.unwrap();
        working_state.set_staged(branch_id, entries[0].file_id, true).await.unwrap();
        let checkout = checkouts.create(project_id, dir.path().to_str().unwrap()).await.unwrap();
        checkouts.snapshot(checkout.id, &[(entries[0].file_id, 0, "unset".to_string())]).await.unwrap();

        engine
            .commit(project_id, branch_id, Some(checkout.id), "agent-1", "first change", ConflictStrategy::Abort)
            .await
            .unwrap();

        std::fs::write(dir.path().join("lib.rs"), "pub fn a() { 1 }\n").unwrap();
        let entries = working_state.refresh(project_id, branch_id, dir.path()).await.unwrap();
        working_state.set_staged(branch_id, entries[0].file_id, true).await.unwrap();

        // Without the post-commit snapshot update, this second commit from
        // the same checkout would see its own first commit as version skew.
        let second = engine
            .commit(project_id, branch_id, Some(checkout.id), "agent-1", "second change", ConflictStrategy::Abort)
            .await
            .unwrap();
        assert_eq!(second.message, "second change");
    }
}
