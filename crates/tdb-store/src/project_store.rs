use sqlx::SqlitePool;
use tdb_core::{Error, Project, ProjectId, ProjectVisibility, Result};
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    slug: String,
    name: String,
    repository_url: Option<String>,
    default_branch: String,
    visibility: String,
    license: Option<String>,
}

impl ProjectRow {
    fn into_project(self) -> Result<Project> {
        Ok(Project {
            id: Uuid::parse_str(&self.id).map_err(|e| Error::Internal(e.to_string()))?,
            slug: self.slug,
            name: self.name,
            repository_url: self.repository_url,
            default_branch: self.default_branch,
            visibility: self.visibility.parse().map_err(Error::Internal)?,
            license: self.license,
        })
    }
}

/// Project registry: one row per project, each the root of a file registry,
/// branch set, and work-item backlog (§3).
#[derive(Clone)]
pub struct ProjectStore {
    pool: SqlitePool,
}

impl ProjectStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates a project and its `main` default branch in one transaction.
    pub async fn create(&self, slug: &str, name: &str, repository_url: Option<&str>) -> Result<Project> {
        let mut tx = self.pool.begin().await?;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO projects (id, slug, name, repository_url, default_branch, visibility)
            VALUES (?1, ?2, ?3, ?4, 'main', 'private')
            "#,
        )
        .bind(id.to_string())
        .bind(slug)
        .bind(name)
        .bind(repository_url)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO branches (id, project_id, name, is_default) VALUES (?1, ?2, 'main', 1)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get(id).await
    }

    pub async fn get(&self, id: ProjectId) -> Result<Project> {
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT id, slug, name, repository_url, default_branch, visibility, license
            FROM projects WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("project {id}")))?;

        row.into_project()
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Project> {
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT id, slug, name, repository_url, default_branch, visibility, license
            FROM projects WHERE slug = ?1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("project {slug}")))?;

        row.into_project()
    }

    pub async fn set_visibility(&self, id: ProjectId, visibility: ProjectVisibility) -> Result<()> {
        sqlx::query("UPDATE projects SET visibility = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(visibility.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_license(&self, id: ProjectId, license: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE projects SET license = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(license)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, slug, name, repository_url, default_branch, visibility, license FROM projects ORDER BY slug",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProjectRow::into_project).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn create_registers_main_branch() {
        let pool = db::open_in_memory().await.unwrap();
        let projects = ProjectStore::new(pool.clone());
        let project = projects.create("demo", "Demo", None).await.unwrap();

        let branch: String = sqlx::query_scalar("SELECT name FROM branches WHERE project_id = ?1")
            .bind(project.id.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(branch, "main");
    }

    #[tokio::test]
    async fn get_by_slug_round_trips() {
        let pool = db::open_in_memory().await.unwrap();
        let projects = ProjectStore::new(pool);
        let created = projects.create("demo", "Demo", None).await.unwrap();
        let fetched = projects.get_by_slug("demo").await.unwrap();
        assert_eq!(created.id, fetched.id);
        assert_eq!(fetched.visibility, ProjectVisibility::Private);
    }
}
