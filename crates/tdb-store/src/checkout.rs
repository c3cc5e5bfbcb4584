use std::path::Path;

use chrono::Utc;
use sqlx::SqlitePool;
use tdb_core::{BlobPayload, Checkout, CheckoutId, Error, FileId, ProjectId, Result};
use uuid::Uuid;

use crate::content_store::ContentStore;
use crate::file_registry::FileRegistryStore;

#[derive(sqlx::FromRow)]
struct CheckoutRow {
    id: String,
    project_id: String,
    checkout_path: String,
    last_sync_at: Option<String>,
}

impl CheckoutRow {
    fn into_checkout(self) -> Result<Checkout> {
        Ok(Checkout {
            id: Uuid::parse_str(&self.id).map_err(|e| Error::Internal(e.to_string()))?,
            project_id: Uuid::parse_str(&self.project_id).map_err(|e| Error::Internal(e.to_string()))?,
            checkout_path: self.checkout_path,
            last_sync_at: self
                .last_sync_at
                .map(|s| s.parse().map_err(|e: chrono::ParseError| Error::Internal(e.to_string())))
                .transpose()?,
        })
    }
}

/// Tracks materialized working copies and the per-file version snapshot
/// taken when each was created or last synced (spec §4.6, "C6"). The
/// snapshot is the basis for the commit engine's version-skew check.
#[derive(Clone)]
pub struct CheckoutStore {
    pool: SqlitePool,
    files: FileRegistryStore,
    content: ContentStore,
}

impl CheckoutStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { files: FileRegistryStore::new(pool.clone()), content: ContentStore::new(pool.clone()), pool }
    }

    pub async fn create(&self, project_id: ProjectId, checkout_path: &str) -> Result<Checkout> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO checkouts (id, project_id, checkout_path) VALUES (?1, ?2, ?3)")
            .bind(id.to_string())
            .bind(project_id.to_string())
            .bind(checkout_path)
            .execute(&self.pool)
            .await?;

        self.get(id).await
    }

    pub async fn get(&self, id: CheckoutId) -> Result<Checkout> {
        let row = sqlx::query_as::<_, CheckoutRow>(
            "SELECT id, project_id, checkout_path, last_sync_at FROM checkouts WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("checkout {id}")))?;

        row.into_checkout()
    }

    /// Records the version/hash of every given file as of this sync, and
    /// bumps `last_sync_at`. Replaces any prior snapshot for files present
    /// in `files` (a full materialization writes every tracked file).
    pub async fn snapshot(&self, checkout_id: CheckoutId, files: &[(FileId, u32, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (file_id, version, hash) in files {
            sqlx::query(
                r#"
                INSERT INTO checkout_snapshots (checkout_id, file_id, version, content_hash)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(checkout_id, file_id) DO UPDATE SET version = excluded.version, content_hash = excluded.content_hash
                "#,
            )
            .bind(checkout_id.to_string())
            .bind(file_id.to_string())
            .bind(*version as i64)
            .bind(hash)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE checkouts SET last_sync_at = ?2 WHERE id = ?1")
            .bind(checkout_id.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Returns the snapshotted version for a file, if this checkout has
    /// ever synced it.
    pub async fn snapshot_version(&self, checkout_id: CheckoutId, file_id: FileId) -> Result<Option<u32>> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM checkout_snapshots WHERE checkout_id = ?1 AND file_id = ?2",
        )
        .bind(checkout_id.to_string())
        .bind(file_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(version.map(|v| v as u32))
    }

    /// Removes snapshot rows for files no longer present in the checkout
    /// (e.g. files deleted by a commit), bumping `last_sync_at`.
    pub async fn forget(&self, checkout_id: CheckoutId, file_ids: &[FileId]) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for file_id in file_ids {
            sqlx::query("DELETE FROM checkout_snapshots WHERE checkout_id = ?1 AND file_id = ?2")
                .bind(checkout_id.to_string())
                .bind(file_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE checkouts SET last_sync_at = ?2 WHERE id = ?1")
            .bind(checkout_id.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Materializes every active file's current content onto disk at
    /// `target_dir` (spec §4.6). Fails with `CheckoutTargetNotEmpty` if the
    /// directory already exists and has entries, unless `force` is set.
    /// Returns `(files_written, bytes_written)`.
    pub async fn checkout(
        &self,
        project_id: ProjectId,
        target_dir: &Path,
        force: bool,
    ) -> Result<(u32, u64)> {
        if target_dir.exists() {
            let non_empty = std::fs::read_dir(target_dir)?.next().is_some();
            if non_empty && !force {
                return Err(Error::CheckoutTargetNotEmpty(target_dir.display().to_string()));
            }
        } else {
            std::fs::create_dir_all(target_dir)?;
        }

        let active = self.files.list_active(project_id).await?;

        let mut files_written = 0u32;
        let mut bytes_written = 0u64;
        let mut snapshots = Vec::with_capacity(active.len());

        for file in &active {
            let Some(hash) = file.current_hash.clone() else { continue };
            let Some(version) = file.current_version else { continue };

            let dest = target_dir.join(&file.relative_path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let payload = self.content.get(&hash).await?;
            let bytes: Vec<u8> = match payload {
                BlobPayload::Text(text) => text.into_bytes(),
                BlobPayload::Binary(data) => data,
            };
            bytes_written += bytes.len() as u64;
            std::fs::write(&dest, &bytes)?;

            files_written += 1;
            snapshots.push((file.id, version, hash));
        }

        let checkout = match self.find_by_path(project_id, target_dir).await? {
            Some(existing) => existing,
            None => self.create(project_id, &target_dir.display().to_string()).await?,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM checkout_snapshots WHERE checkout_id = ?1")
            .bind(checkout.id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.snapshot(checkout.id, &snapshots).await?;

        Ok((files_written, bytes_written))
    }

    async fn find_by_path(&self, project_id: ProjectId, target_dir: &Path) -> Result<Option<Checkout>> {
        let path = target_dir.display().to_string();
        let row = sqlx::query_as::<_, CheckoutRow>(
            "SELECT id, project_id, checkout_path, last_sync_at FROM checkouts WHERE project_id = ?1 AND checkout_path = ?2",
        )
        .bind(project_id.to_string())
        .bind(&path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CheckoutRow::into_checkout).transpose()
    }

    pub async fn list_checkouts(&self, project_id: ProjectId) -> Result<Vec<Checkout>> {
        let rows = sqlx::query_as::<_, CheckoutRow>(
            "SELECT id, project_id, checkout_path, last_sync_at FROM checkouts WHERE project_id = ?1 ORDER BY checkout_path",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CheckoutRow::into_checkout).collect()
    }

    /// Checkouts whose `checkout_path` no longer exists on disk.
    pub async fn find_stale(&self, project_id: ProjectId) -> Result<Vec<Checkout>> {
        let all = self.list_checkouts(project_id).await?;
        Ok(all.into_iter().filter(|c| !Path::new(&c.checkout_path).exists()).collect())
    }

    /// Deletes a checkout and its snapshots (cascades via foreign key).
    pub async fn delete(&self, checkout_id: CheckoutId) -> Result<()> {
        sqlx::query("DELETE FROM checkouts WHERE id = ?1")
            .bind(checkout_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::project_store::ProjectStore;

    #[tokio::test]
    async fn snapshot_records_version_and_sync_time() {
        let pool = db::open_in_memory().await.unwrap();
        let projects = ProjectStore::new(pool.clone());
        let project = projects.create("demo", "Demo", None).await.unwrap();

        let store = CheckoutStore::new(pool);
        let checkout = store.create(project.id, "/tmp/demo").await.unwrap();
        assert!(checkout.last_sync_at.is_none());

        let file_id = Uuid::new_v4();
        store.snapshot(checkout.id, &[(file_id, 3, "abc".to_string())]).await.unwrap();

        let version = store.snapshot_version(checkout.id, file_id).await.unwrap();
        assert_eq!(version, Some(3));

        let refreshed = store.get(checkout.id).await.unwrap();
        assert!(refreshed.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn checkout_materializes_active_files_onto_disk() {
        let pool = db::open_in_memory().await.unwrap();
        let projects = ProjectStore::new(pool.clone());
        let project = projects.create("demo", "Demo", None).await.unwrap();

        let files = FileRegistryStore::new(pool.clone());
        let content = ContentStore::new(pool.clone());
        let hash = content.put_text("hello\n", "utf-8").await.unwrap();
        let file = files.register(project.id, "README.md", "README.md", "markdown", 1).await.unwrap();
        files.add_version(file.id, &hash, 1).await.unwrap();

        let store = CheckoutStore::new(pool);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("work");

        let (files_written, bytes_written) = store.checkout(project.id, &target, false).await.unwrap();
        assert_eq!(files_written, 1);
        assert_eq!(bytes_written, 6);
        assert_eq!(std::fs::read_to_string(target.join("README.md")).unwrap(), "hello\n");

        let checkouts = store.list_checkouts(project.id).await.unwrap();
        assert_eq!(checkouts.len(), 1);
        let version = store.snapshot_version(checkouts[0].id, file.id).await.unwrap();
        assert_eq!(version, Some(1));
    }

    #[tokio::test]
    async fn checkout_rejects_non_empty_target_without_force() {
        let pool = db::open_in_memory().await.unwrap();
        let projects = ProjectStore::new(pool.clone());
        let project = projects.create("demo", "Demo", None).await.unwrap();

        let store = CheckoutStore::new(pool);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("existing.txt"), "stuff").unwrap();

        let err = store.checkout(project.id, dir.path(), false).await.unwrap_err();
        assert!(matches!(err, Error::CheckoutTargetNotEmpty(_)));

        store.checkout(project.id, dir.path(), true).await.unwrap();
    }

    #[tokio::test]
    async fn find_stale_reports_checkouts_whose_directory_is_gone() {
        let pool = db::open_in_memory().await.unwrap();
        let projects = ProjectStore::new(pool.clone());
        let project = projects.create("demo", "Demo", None).await.unwrap();

        let store = CheckoutStore::new(pool);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("work");
        store.checkout(project.id, &target, false).await.unwrap();

        assert!(store.find_stale(project.id).await.unwrap().is_empty());

        std::fs::remove_dir_all(&target).unwrap();
        let stale = store.find_stale(project.id).await.unwrap();
        assert_eq!(stale.len(), 1);

        store.delete(stale[0].id).await.unwrap();
        assert!(store.list_checkouts(project.id).await.unwrap().is_empty());
    }
}
