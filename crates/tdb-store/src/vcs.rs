use chrono::Utc;
use sha2::{Digest, Sha256};
use similar::TextDiff;
use sqlx::SqlitePool;
use tdb_core::{BlobPayload, Branch, BranchId, ChangeType, Commit, CommitFile, CommitId, Error, ProjectId, Result};
use uuid::Uuid;

use crate::content_store::ContentStore;

#[derive(sqlx::FromRow)]
struct BranchRow {
    id: String,
    project_id: String,
    name: String,
    is_default: i64,
    parent_branch_id: Option<String>,
}

impl BranchRow {
    fn into_branch(self) -> Result<Branch> {
        Ok(Branch {
            id: Uuid::parse_str(&self.id).map_err(|e| Error::Internal(e.to_string()))?,
            project_id: Uuid::parse_str(&self.project_id).map_err(|e| Error::Internal(e.to_string()))?,
            name: self.name,
            is_default: self.is_default != 0,
            parent_branch_id: self.parent_branch_id.map(|s| Uuid::parse_str(&s)).transpose().map_err(|e| Error::Internal(e.to_string()))?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommitRow {
    id: String,
    project_id: String,
    branch_id: String,
    parent_commit_id: Option<String>,
    commit_hash: String,
    author: String,
    message: String,
    created_at: String,
}

impl CommitRow {
    fn into_commit(self) -> Result<Commit> {
        Ok(Commit {
            id: Uuid::parse_str(&self.id).map_err(|e| Error::Internal(e.to_string()))?,
            project_id: Uuid::parse_str(&self.project_id).map_err(|e| Error::Internal(e.to_string()))?,
            branch_id: Uuid::parse_str(&self.branch_id).map_err(|e| Error::Internal(e.to_string()))?,
            parent_commit_id: self.parent_commit_id.map(|s| Uuid::parse_str(&s)).transpose().map_err(|e| Error::Internal(e.to_string()))?,
            commit_hash: self.commit_hash,
            author: self.author,
            message: self.message,
            created_at: self.created_at.parse().map_err(|e: chrono::ParseError| Error::Internal(e.to_string()))?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommitFileRow {
    commit_id: String,
    file_id: String,
    change_type: String,
    old_content_hash: Option<String>,
    new_content_hash: Option<String>,
    old_path: Option<String>,
    new_path: Option<String>,
}

impl CommitFileRow {
    fn into_commit_file(self) -> Result<CommitFile> {
        Ok(CommitFile {
            commit_id: Uuid::parse_str(&self.commit_id).map_err(|e| Error::Internal(e.to_string()))?,
            file_id: Uuid::parse_str(&self.file_id).map_err(|e| Error::Internal(e.to_string()))?,
            change_type: self.change_type.parse().map_err(Error::Internal)?,
            old_content_hash: self.old_content_hash,
            new_content_hash: self.new_content_hash,
            old_path: self.old_path,
            new_path: self.new_path,
        })
    }
}

/// Branch and commit history (spec §4.5, "C5").
#[derive(Clone)]
pub struct VcsStore {
    pool: SqlitePool,
}

impl VcsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_branch(&self, project_id: ProjectId, name: &str, parent_branch_id: Option<BranchId>) -> Result<Branch> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO branches (id, project_id, name, is_default, parent_branch_id) VALUES (?1, ?2, ?3, 0, ?4)",
        )
        .bind(id.to_string())
        .bind(project_id.to_string())
        .bind(name)
        .bind(parent_branch_id.map(|b| b.to_string()))
        .execute(&self.pool)
        .await?;

        self.get_branch(id).await
    }

    pub async fn get_branch(&self, id: BranchId) -> Result<Branch> {
        let row = sqlx::query_as::<_, BranchRow>(
            "SELECT id, project_id, name, is_default, parent_branch_id FROM branches WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("branch {id}")))?;

        row.into_branch()
    }

    pub async fn get_branch_by_name(&self, project_id: ProjectId, name: &str) -> Result<Branch> {
        let row = sqlx::query_as::<_, BranchRow>(
            "SELECT id, project_id, name, is_default, parent_branch_id FROM branches WHERE project_id = ?1 AND name = ?2",
        )
        .bind(project_id.to_string())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("branch {name}")))?;

        row.into_branch()
    }

    pub async fn list_branches(&self, project_id: ProjectId) -> Result<Vec<Branch>> {
        let rows = sqlx::query_as::<_, BranchRow>(
            "SELECT id, project_id, name, is_default, parent_branch_id FROM branches WHERE project_id = ?1 ORDER BY name",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BranchRow::into_branch).collect()
    }

    /// Computes the opaque commit hash: `sha256(slug||branch||message||now)`
    /// truncated to 16 hex chars, upper-cased (spec §4.5, §6). Not a content
    /// hash — two commits with identical metadata at different instants
    /// never collide, and it cannot be independently re-derived by a
    /// consumer from the stored row alone.
    fn compute_commit_hash(project_slug: &str, branch_name: &str, message: &str, now: chrono::DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(project_slug.as_bytes());
        hasher.update(branch_name.as_bytes());
        hasher.update(message.as_bytes());
        hasher.update(now.to_rfc3339().as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex[..16].to_uppercase()
    }

    /// Records a commit and its file changes in one transaction. The caller
    /// (the commit engine, C7) is responsible for conflict detection and
    /// content versioning before calling this.
    pub async fn record_commit(
        &self,
        project_id: ProjectId,
        project_slug: &str,
        branch_id: BranchId,
        branch_name: &str,
        parent_commit_id: Option<CommitId>,
        author: &str,
        message: &str,
        changes: &[CommitFile],
    ) -> Result<Commit> {
        let now = Utc::now();
        let commit_hash = Self::compute_commit_hash(project_slug, branch_name, message, now);
        self.insert_commit(project_id, branch_id, parent_commit_id, &commit_hash, author, message, now, changes).await
    }

    /// Inserts a commit with an externally-supplied hash and timestamp,
    /// preserving a cathedral package's original commit identity instead of
    /// recomputing it (spec §4.8 import).
    pub async fn import_commit(
        &self,
        project_id: ProjectId,
        branch_id: BranchId,
        parent_commit_id: Option<CommitId>,
        commit_hash: &str,
        author: &str,
        message: &str,
        created_at: chrono::DateTime<Utc>,
        changes: &[CommitFile],
    ) -> Result<Commit> {
        self.insert_commit(project_id, branch_id, parent_commit_id, commit_hash, author, message, created_at, changes).await
    }

    async fn insert_commit(
        &self,
        project_id: ProjectId,
        branch_id: BranchId,
        parent_commit_id: Option<CommitId>,
        commit_hash: &str,
        author: &str,
        message: &str,
        created_at: chrono::DateTime<Utc>,
        changes: &[CommitFile],
    ) -> Result<Commit> {
        let id = Uuid::new_v4();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO commits (id, project_id, branch_id, parent_commit_id, commit_hash, author, message, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(id.to_string())
        .bind(project_id.to_string())
        .bind(branch_id.to_string())
        .bind(parent_commit_id.map(|c| c.to_string()))
        .bind(commit_hash)
        .bind(author)
        .bind(message)
        .bind(created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for change in changes {
            sqlx::query(
                r#"
                INSERT INTO commit_files (commit_id, file_id, change_type, old_content_hash, new_content_hash, old_path, new_path)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(id.to_string())
            .bind(change.file_id.to_string())
            .bind(change.change_type.to_string())
            .bind(&change.old_content_hash)
            .bind(&change.new_content_hash)
            .bind(&change.old_path)
            .bind(&change.new_path)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.get_commit(id).await
    }

    /// Finds a commit globally by its hash (the column is unique across all
    /// projects) — used by cathedral import to dedup commits it has already
    /// seen rather than re-inserting them.
    pub async fn find_by_hash(&self, commit_hash: &str) -> Result<Option<Commit>> {
        let row = sqlx::query_as::<_, CommitRow>(
            "SELECT id, project_id, branch_id, parent_commit_id, commit_hash, author, message, created_at FROM commits WHERE commit_hash = ?1",
        )
        .bind(commit_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CommitRow::into_commit).transpose()
    }

    pub async fn get_commit(&self, id: CommitId) -> Result<Commit> {
        let row = sqlx::query_as::<_, CommitRow>(
            "SELECT id, project_id, branch_id, parent_commit_id, commit_hash, author, message, created_at FROM commits WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("commit {id}")))?;

        row.into_commit()
    }

    pub async fn latest_commit(&self, branch_id: BranchId) -> Result<Option<Commit>> {
        let row = sqlx::query_as::<_, CommitRow>(
            r#"
            SELECT id, project_id, branch_id, parent_commit_id, commit_hash, author, message, created_at
            FROM commits WHERE branch_id = ?1 ORDER BY created_at DESC LIMIT 1
            "#,
        )
        .bind(branch_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CommitRow::into_commit).transpose()
    }

    pub async fn log(&self, branch_id: BranchId, limit: u32) -> Result<Vec<Commit>> {
        let rows = sqlx::query_as::<_, CommitRow>(
            r#"
            SELECT id, project_id, branch_id, parent_commit_id, commit_hash, author, message, created_at
            FROM commits WHERE branch_id = ?1 ORDER BY created_at DESC LIMIT ?2
            "#,
        )
        .bind(branch_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CommitRow::into_commit).collect()
    }

    /// Returns the file-level diff recorded for a commit (spec §4.5 `diff`).
    pub async fn commit_diff(&self, commit_id: CommitId) -> Result<Vec<CommitFile>> {
        let rows = sqlx::query_as::<_, CommitFileRow>(
            r#"
            SELECT commit_id, file_id, change_type, old_content_hash, new_content_hash, old_path, new_path
            FROM commit_files WHERE commit_id = ?1
            "#,
        )
        .bind(commit_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CommitFileRow::into_commit_file).collect()
    }

    /// The CommitFile row touching `path` at `commit_id`, if that commit
    /// changed it (matched on either its old or new path, to follow
    /// renames).
    async fn commit_file_for_path(&self, commit_id: CommitId, path: &str) -> Result<Option<CommitFile>> {
        let row = sqlx::query_as::<_, CommitFileRow>(
            r#"
            SELECT commit_id, file_id, change_type, old_content_hash, new_content_hash, old_path, new_path
            FROM commit_files WHERE commit_id = ?1 AND (old_path = ?2 OR new_path = ?2)
            "#,
        )
        .bind(commit_id.to_string())
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CommitFileRow::into_commit_file).transpose()
    }

    /// Resolves `path`'s text content at two revisions and emits a unified
    /// diff (spec §4.5 `diff`). `commit_b` defaults to the latest commit on
    /// `branch_id`; `commit_a` defaults to `commit_b`'s parent. A side whose
    /// commit didn't touch `path` is treated as empty, same as an
    /// add/delete. Binary content cannot be diffed this way and is reported
    /// as `InvalidInput`.
    pub async fn diff_file(
        &self,
        content: &ContentStore,
        branch_id: BranchId,
        path: &str,
        commit_a: Option<CommitId>,
        commit_b: Option<CommitId>,
    ) -> Result<String> {
        let commit_b = match commit_b {
            Some(id) => self.get_commit(id).await?,
            None => self
                .latest_commit(branch_id)
                .await?
                .ok_or_else(|| Error::NotFound("no commits on this branch".into()))?,
        };
        let commit_a_id = match commit_a {
            Some(id) => Some(id),
            None => commit_b.parent_commit_id,
        };

        let new_hash = self.commit_file_for_path(commit_b.id, path).await?.and_then(|c| c.new_content_hash);
        let old_hash = match commit_a_id {
            Some(id) => self.commit_file_for_path(id, path).await?.and_then(|c| c.new_content_hash),
            None => None,
        };

        let old_text = Self::resolve_text(content, old_hash, path).await?;
        let new_text = Self::resolve_text(content, new_hash, path).await?;

        let diff = TextDiff::from_lines(&old_text, &new_text);
        Ok(diff
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{path}"), &format!("b/{path}"))
            .to_string())
    }

    async fn resolve_text(content: &ContentStore, hash: Option<String>, path: &str) -> Result<String> {
        match hash {
            None => Ok(String::new()),
            Some(h) => match content.get(&h).await? {
                BlobPayload::Text(text) => Ok(text),
                BlobPayload::Binary(_) => Err(Error::InvalidInput(format!("{path} is binary, cannot diff"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::project_store::ProjectStore;
    use tdb_core::ChangeType;

    #[tokio::test]
    async fn record_commit_and_read_back_diff() {
        let pool = db::open_in_memory().await.unwrap();
        let projects = ProjectStore::new(pool.clone());
        let project = projects.create("demo", "Demo", None).await.unwrap();

        let vcs = VcsStore::new(pool);
        let branch = vcs.get_branch_by_name(project.id, "main").await.unwrap();

        let file_id = Uuid::new_v4();
        let change = CommitFile {
            commit_id: Uuid::nil(),
            file_id,
            change_type: ChangeType::Added,
            old_content_hash: None,
            new_content_hash: Some("abc".to_string()),
            old_path: None,
            new_path: Some("lib.rs".to_string()),
        };

        let commit = vcs
            .record_commit(project.id, &project.slug, branch.id, &branch.name, None, "agent-1", "initial import", &[change])
            .await
            .unwrap();

        assert_eq!(commit.commit_hash.len(), 16);

        let diff = vcs.commit_diff(commit.id).await.unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].change_type, ChangeType::Added);
    }

    #[tokio::test]
    async fn commit_hashes_differ_for_commits_a_moment_apart() {
        let pool = db::open_in_memory().await.unwrap();
        let projects = ProjectStore::new(pool.clone());
        let project = projects.create("demo", "Demo", None).await.unwrap();
        let vcs = VcsStore::new(pool);
        let branch = vcs.get_branch_by_name(project.id, "main").await.unwrap();

        let c1 = vcs.record_commit(project.id, &project.slug, branch.id, &branch.name, None, "a", "msg", &[]).await.unwrap();
        let c2 = vcs.record_commit(project.id, &project.slug, branch.id, &branch.name, Some(c1.id), "a", "msg", &[]).await.unwrap();

        assert_ne!(c1.commit_hash, c2.commit_hash);
    }

    #[tokio::test]
    async fn diff_file_emits_unified_diff_between_two_commits() {
        let pool = db::open_in_memory().await.unwrap();
        let projects = ProjectStore::new(pool.clone());
        let project = projects.create("demo", "Demo", None).await.unwrap();

        let vcs = VcsStore::new(pool.clone());
        let content = ContentStore::new(pool.clone());
        let branch = vcs.get_branch_by_name(project.id, "main").await.unwrap();

        let old_hash = content.put_text("pub fn a() {}\n", "utf-8").await.unwrap();
        let file_id = Uuid::new_v4();
        let add = CommitFile {
            commit_id: Uuid::nil(),
            file_id,
            change_type: ChangeType::Added,
            old_content_hash: None,
            new_content_hash: Some(old_hash.clone()),
            old_path: None,
            new_path: Some("lib.rs".to_string()),
        };
        let c1 = vcs
            .record_commit(project.id, &project.slug, branch.id, &branch.name, None, "agent-1", "add lib.rs", &[add])
            .await
            .unwrap();

        let new_hash = content.put_text("pub fn a() { 1 }\n", "utf-8").await.unwrap();
        let modify = CommitFile {
            commit_id: Uuid::nil(),
            file_id,
            change_type: ChangeType::Modified,
            old_content_hash: Some(old_hash),
            new_content_hash: Some(new_hash),
            old_path: Some("lib.rs".to_string()),
            new_path: Some("lib.rs".to_string()),
        };
        let c2 = vcs
            .record_commit(project.id, &project.slug, branch.id, &branch.name, Some(c1.id), "agent-1", "tweak lib.rs", &[modify])
            .await
            .unwrap();

        let diff = vcs.diff_file(&content, branch.id, "lib.rs", Some(c1.id), Some(c2.id)).await.unwrap();
        assert!(diff.contains("--- a/lib.rs"));
        assert!(diff.contains("+++ b/lib.rs"));
        assert!(diff.contains("-pub fn a() {}"));
        assert!(diff.contains("+pub fn a() { 1 }"));
    }

    #[tokio::test]
    async fn diff_file_treats_missing_side_as_empty() {
        let pool = db::open_in_memory().await.unwrap();
        let projects = ProjectStore::new(pool.clone());
        let project = projects.create("demo", "Demo", None).await.unwrap();

        let vcs = VcsStore::new(pool.clone());
        let content = ContentStore::new(pool.clone());
        let branch = vcs.get_branch_by_name(project.id, "main").await.unwrap();

        let hash = content.put_text("pub fn a() {}\n", "utf-8").await.unwrap();
        let file_id = Uuid::new_v4();
        let add = CommitFile {
            commit_id: Uuid::nil(),
            file_id,
            change_type: ChangeType::Added,
            old_content_hash: None,
            new_content_hash: Some(hash),
            old_path: None,
            new_path: Some("lib.rs".to_string()),
        };
        let commit = vcs
            .record_commit(project.id, &project.slug, branch.id, &branch.name, None, "agent-1", "add lib.rs", &[add])
            .await
            .unwrap();

        let diff = vcs.diff_file(&content, branch.id, "lib.rs", None, Some(commit.id)).await.unwrap();
        assert!(diff.contains("+pub fn a() {}"));
        assert!(!diff.contains("-pub fn"));
    }
}
