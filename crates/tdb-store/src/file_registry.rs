use sqlx::SqlitePool;
use tdb_core::{Error, FileId, FileStatus, ProjectFile, ProjectId, Result};
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct FileRow {
    id: String,
    project_id: String,
    relative_path: String,
    name: String,
    file_type: String,
    line_count: i64,
    status: String,
    current_version: Option<i64>,
    current_hash: Option<String>,
}

impl FileRow {
    fn into_file(self) -> Result<ProjectFile> {
        Ok(ProjectFile {
            id: Uuid::parse_str(&self.id).map_err(|e| Error::Internal(e.to_string()))?,
            project_id: Uuid::parse_str(&self.project_id).map_err(|e| Error::Internal(e.to_string()))?,
            relative_path: self.relative_path,
            name: self.name,
            file_type: self.file_type,
            line_count: self.line_count as u32,
            status: self.status.parse().map_err(Error::Internal)?,
            current_version: self.current_version.map(|v| v as u32),
            current_hash: self.current_hash,
        })
    }
}

/// Registry of tracked files per project and their version chains (§4.2,
/// "C2"). Each file's `current_version`/`current_hash` are a denormalized
/// pointer to the row in `file_contents` with `is_current = 1`.
#[derive(Clone)]
pub struct FileRegistryStore {
    pool: SqlitePool,
}

impl FileRegistryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Registers a new file at `relative_path`, or returns the existing one.
    pub async fn register(
        &self,
        project_id: ProjectId,
        relative_path: &str,
        name: &str,
        file_type: &str,
        line_count: u32,
    ) -> Result<ProjectFile> {
        if let Some(existing) = self.find_by_path(project_id, relative_path).await? {
            return Ok(existing);
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO project_files (id, project_id, relative_path, name, file_type, line_count, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active')
            "#,
        )
        .bind(id.to_string())
        .bind(project_id.to_string())
        .bind(relative_path)
        .bind(name)
        .bind(file_type)
        .bind(line_count as i64)
        .execute(&self.pool)
        .await?;

        self.find_by_path(project_id, relative_path)
            .await?
            .ok_or_else(|| Error::Internal("file vanished after insert".into()))
    }

    pub async fn find_by_path(&self, project_id: ProjectId, relative_path: &str) -> Result<Option<ProjectFile>> {
        let row = sqlx::query_as::<_, FileRow>(
            r#"
            SELECT id, project_id, relative_path, name, file_type, line_count, status, current_version, current_hash
            FROM project_files WHERE project_id = ?1 AND relative_path = ?2
            "#,
        )
        .bind(project_id.to_string())
        .bind(relative_path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FileRow::into_file).transpose()
    }

    pub async fn get(&self, file_id: FileId) -> Result<ProjectFile> {
        let row = sqlx::query_as::<_, FileRow>(
            r#"
            SELECT id, project_id, relative_path, name, file_type, line_count, status, current_version, current_hash
            FROM project_files WHERE id = ?1
            "#,
        )
        .bind(file_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("file {file_id}")))?;

        row.into_file()
    }

    pub async fn list_active(&self, project_id: ProjectId) -> Result<Vec<ProjectFile>> {
        let rows = sqlx::query_as::<_, FileRow>(
            r#"
            SELECT id, project_id, relative_path, name, file_type, line_count, status, current_version, current_hash
            FROM project_files WHERE project_id = ?1 AND status = 'active'
            ORDER BY relative_path
            "#,
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FileRow::into_file).collect()
    }

    /// Appends a new version to a file's content chain, making it current.
    pub async fn add_version(&self, file_id: FileId, content_hash: &str, line_count: u32) -> Result<u32> {
        let mut tx = self.pool.begin().await?;

        let next_version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM file_contents WHERE file_id = ?1",
        )
        .bind(file_id.to_string())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE file_contents SET is_current = 0 WHERE file_id = ?1")
            .bind(file_id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO file_contents (file_id, version, content_hash, is_current) VALUES (?1, ?2, ?3, 1)",
        )
        .bind(file_id.to_string())
        .bind(next_version)
        .bind(content_hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE project_files SET current_version = ?2, current_hash = ?3, line_count = ?4, status = 'active' WHERE id = ?1",
        )
        .bind(file_id.to_string())
        .bind(next_version)
        .bind(content_hash)
        .bind(line_count as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next_version as u32)
    }

    pub async fn mark_deleted(&self, file_id: FileId) -> Result<()> {
        sqlx::query("UPDATE project_files SET status = 'deleted' WHERE id = ?1")
            .bind(file_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn content_hash_at(&self, file_id: FileId, version: u32) -> Result<String> {
        sqlx::query_scalar("SELECT content_hash FROM file_contents WHERE file_id = ?1 AND version = ?2")
            .bind(file_id.to_string())
            .bind(version as i64)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("file {file_id} version {version}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::project_store::ProjectStore;

    async fn seed_project(pool: &SqlitePool) -> ProjectId {
        let projects = ProjectStore::new(pool.clone());
        projects.create("demo", "Demo", None).await.unwrap().id
    }

    #[tokio::test]
    async fn register_is_idempotent_per_path() {
        let pool = db::open_in_memory().await.unwrap();
        let project_id = seed_project(&pool).await;
        let store = FileRegistryStore::new(pool);

        let a = store.register(project_id, "src/main.rs", "main.rs", "rust", 10).await.unwrap();
        let b = store.register(project_id, "src/main.rs", "main.rs", "rust", 10).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn add_version_increments_and_tracks_current() {
        let pool = db::open_in_memory().await.unwrap();
        let project_id = seed_project(&pool).await;
        let store = FileRegistryStore::new(pool);

        let file = store.register(project_id, "README.md", "README.md", "markdown", 1).await.unwrap();
        let v1 = store.add_version(file.id, "aaa", 1).await.unwrap();
        let v2 = store.add_version(file.id, "bbb", 2).await.unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);

        let refreshed = store.get(file.id).await.unwrap();
        assert_eq!(refreshed.current_version, Some(2));
        assert_eq!(refreshed.current_hash.as_deref(), Some("bbb"));
    }
}
