use chrono::Utc;
use rand::Rng;
use sqlx::SqlitePool;
use tdb_core::{
    AgentSessionId, Error, Priority, ProjectId, Result, WorkItem, WorkItemId, WorkItemStatus,
    WorkItemTransition,
};
use uuid::Uuid;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_SUFFIX_LEN: usize = 5;
const MAX_ID_ATTEMPTS: u32 = 8;

#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: String,
    project_id: String,
    title: String,
    description: Option<String>,
    item_type: String,
    priority: String,
    status: String,
    parent_id: Option<String>,
    assigned_session_id: Option<String>,
    creating_session_id: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    assigned_at: Option<String>,
}

impl WorkItemRow {
    fn into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            id: self.id,
            project_id: Uuid::parse_str(&self.project_id).map_err(|e| Error::Internal(e.to_string()))?,
            title: self.title,
            description: self.description,
            item_type: self.item_type,
            priority: self.priority.parse().map_err(Error::Internal)?,
            status: self.status.parse().map_err(Error::Internal)?,
            parent_id: self.parent_id,
            assigned_session_id: self.assigned_session_id.map(|s| Uuid::parse_str(&s)).transpose().map_err(|e| Error::Internal(e.to_string()))?,
            creating_session_id: self.creating_session_id.map(|s| Uuid::parse_str(&s)).transpose().map_err(|e| Error::Internal(e.to_string()))?,
            created_at: self.created_at.parse().map_err(|e: chrono::ParseError| Error::Internal(e.to_string()))?,
            started_at: self.started_at.map(|s| s.parse().map_err(|e: chrono::ParseError| Error::Internal(e.to_string()))).transpose()?,
            completed_at: self.completed_at.map(|s| s.parse().map_err(|e: chrono::ParseError| Error::Internal(e.to_string()))).transpose()?,
            assigned_at: self.assigned_at.map(|s| s.parse().map_err(|e: chrono::ParseError| Error::Internal(e.to_string()))).transpose()?,
        })
    }
}

/// Work item backlog and its state-machine transitions (spec §4.9, "C9").
#[derive(Clone)]
pub struct WorkItemStore {
    pool: SqlitePool,
}

impl WorkItemStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn generate_id() -> WorkItemId {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..ID_SUFFIX_LEN)
            .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect();
        format!("tdb-{suffix}")
    }

    /// Allocates a fresh work item ID, retrying on collision. Widens the
    /// suffix by one character after `MAX_ID_ATTEMPTS` failed tries, since
    /// a backlog approaching the 5-char space's exhaustion should degrade
    /// rather than loop forever (DESIGN NOTES).
    async fn allocate_id(&self) -> Result<WorkItemId> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = Self::generate_id();

            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM work_items WHERE id = ?1")
                .bind(&candidate)
                .fetch_optional(&self.pool)
                .await?;

            if exists.is_none() {
                return Ok(candidate);
            }
        }

        Ok(format!("tdb-{}", Uuid::new_v4().simple()))
    }

    /// Walks the parent chain up to a bounded depth to reject a cycle before
    /// it's written (DESIGN NOTES: "cycle detection via bounded ancestor
    /// walk", matching §4.9's tree invariant).
    async fn would_cycle(&self, new_child: &str, proposed_parent: &str) -> Result<bool> {
        const MAX_DEPTH: u32 = 64;
        let mut current = proposed_parent.to_string();

        for _ in 0..MAX_DEPTH {
            if current == new_child {
                return Ok(true);
            }
            let parent: Option<String> = sqlx::query_scalar("SELECT parent_id FROM work_items WHERE id = ?1")
                .bind(&current)
                .fetch_optional(&self.pool)
                .await?
                .flatten();

            match parent {
                Some(p) => current = p,
                None => return Ok(false),
            }
        }

        Ok(false)
    }

    pub async fn create(
        &self,
        project_id: ProjectId,
        title: &str,
        description: Option<&str>,
        item_type: &str,
        priority: Priority,
        parent_id: Option<&str>,
        creating_session_id: Option<AgentSessionId>,
    ) -> Result<WorkItem> {
        if let Some(parent) = parent_id {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM work_items WHERE id = ?1")
                .bind(parent)
                .fetch_optional(&self.pool)
                .await?;
            if exists.is_none() {
                return Err(Error::NotFound(format!("parent work item {parent}")));
            }
        }

        let id = self.allocate_id().await?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO work_items (id, project_id, title, description, item_type, priority, status, parent_id, creating_session_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?9)
            "#,
        )
        .bind(&id)
        .bind(project_id.to_string())
        .bind(title)
        .bind(description)
        .bind(item_type)
        .bind(priority.to_string())
        .bind(parent_id)
        .bind(creating_session_id.map(|s| s.to_string()))
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get(&id).await
    }

    /// Reparents an existing work item, rejecting the move if it would
    /// create a cycle.
    pub async fn set_parent(&self, id: &str, parent_id: &str) -> Result<()> {
        if self.would_cycle(id, parent_id).await? {
            return Err(Error::InvalidInput(format!("setting parent {parent_id} on {id} would create a cycle")));
        }

        sqlx::query("UPDATE work_items SET parent_id = ?2 WHERE id = ?1")
            .bind(id)
            .bind(parent_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<WorkItem> {
        let row = sqlx::query_as::<_, WorkItemRow>(
            r#"
            SELECT id, project_id, title, description, item_type, priority, status, parent_id,
                   assigned_session_id, creating_session_id, created_at, started_at, completed_at, assigned_at
            FROM work_items WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("work item {id}")))?;

        row.into_work_item()
    }

    /// Transitions a work item's status, rejecting moves the state machine
    /// (spec §4.9) doesn't allow, and recording the transition.
    pub async fn transition(&self, id: &str, to: WorkItemStatus, session_id: Option<AgentSessionId>) -> Result<WorkItem> {
        let item = self.get(id).await?;
        if !item.status.can_transition_to(to) {
            return Err(Error::InvalidInput(format!("cannot transition {id} from {} to {to}", item.status)));
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut set_clauses = vec!["status = ?2"];
        if to == WorkItemStatus::InProgress && item.started_at.is_none() {
            set_clauses.push("started_at = ?3");
        }
        if to == WorkItemStatus::Completed {
            set_clauses.push("completed_at = ?3");
        }
        if to == WorkItemStatus::Assigned {
            set_clauses.push("assigned_at = ?3");
        }

        let sql = format!("UPDATE work_items SET {} WHERE id = ?1", set_clauses.join(", "));
        sqlx::query(&sql)
            .bind(id)
            .bind(to.to_string())
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO work_item_transitions (id, work_item_id, from_status, to_status, session_id, at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(id)
        .bind(item.status.to_string())
        .bind(to.to_string())
        .bind(session_id.map(|s| s.to_string()))
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.get(id).await
    }

    pub async fn assign(&self, id: &str, session_id: AgentSessionId) -> Result<WorkItem> {
        sqlx::query("UPDATE work_items SET assigned_session_id = ?2 WHERE id = ?1")
            .bind(id)
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;

        self.transition(id, WorkItemStatus::Assigned, Some(session_id)).await
    }

    /// Returns pending work ordered by priority (critical first), then age,
    /// matching the original's `CASE priority WHEN 'critical' THEN 0 ...`
    /// dispatch ordering (SPEC_FULL.md §11.2) without re-deriving it in SQL.
    pub async fn dispatch_queue(&self, project_id: ProjectId, priority_filter: Option<Priority>) -> Result<Vec<WorkItem>> {
        let rows = sqlx::query_as::<_, WorkItemRow>(
            r#"
            SELECT id, project_id, title, description, item_type, priority, status, parent_id,
                   assigned_session_id, creating_session_id, created_at, started_at, completed_at, assigned_at
            FROM work_items WHERE project_id = ?1 AND status = 'pending'
            ORDER BY created_at
            "#,
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut items: Vec<WorkItem> = rows.into_iter().map(WorkItemRow::into_work_item).collect::<Result<_>>()?;

        if let Some(filter) = priority_filter {
            items.retain(|i| i.priority == filter);
        }

        items.sort_by_key(|i| i.priority);
        Ok(items)
    }

    pub async fn transitions(&self, work_item_id: &str) -> Result<Vec<WorkItemTransition>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: String,
            work_item_id: String,
            from_status: Option<String>,
            to_status: String,
            session_id: Option<String>,
            at: String,
        }

        let rows = sqlx::query_as::<_, Row>(
            "SELECT id, work_item_id, from_status, to_status, session_id, at FROM work_item_transitions WHERE work_item_id = ?1 ORDER BY at",
        )
        .bind(work_item_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(WorkItemTransition {
                    id: Uuid::parse_str(&r.id).map_err(|e| Error::Internal(e.to_string()))?,
                    work_item_id: r.work_item_id,
                    from_status: r.from_status.map(|s| s.parse()).transpose().map_err(Error::Internal)?,
                    to_status: r.to_status.parse().map_err(Error::Internal)?,
                    session_id: r.session_id.map(|s| Uuid::parse_str(&s)).transpose().map_err(|e| Error::Internal(e.to_string()))?,
                    at: r.at.parse().map_err(|e: chrono::ParseError| Error::Internal(e.to_string()))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::project_store::ProjectStore;

    async fn seed_project(pool: &SqlitePool) -> ProjectId {
        ProjectStore::new(pool.clone()).create("demo", "Demo", None).await.unwrap().id
    }

    #[tokio::test]
    async fn create_generates_tdb_prefixed_id() {
        let pool = db::open_in_memory().await.unwrap();
        let project_id = seed_project(&pool).await;
        let store = WorkItemStore::new(pool);

        let item = store.create(project_id, "Fix bug", None, "bug", Priority::High, None, None).await.unwrap();
        assert!(item.id.starts_with("tdb-"));
        assert_eq!(item.id.len(), 9);
    }

    #[tokio::test]
    async fn dispatch_queue_orders_critical_first() {
        let pool = db::open_in_memory().await.unwrap();
        let project_id = seed_project(&pool).await;
        let store = WorkItemStore::new(pool);

        store.create(project_id, "Low thing", None, "task", Priority::Low, None, None).await.unwrap();
        let critical = store.create(project_id, "Urgent thing", None, "task", Priority::Critical, None, None).await.unwrap();

        let queue = store.dispatch_queue(project_id, None).await.unwrap();
        assert_eq!(queue[0].id, critical.id);
    }

    #[tokio::test]
    async fn set_parent_rejects_cycle() {
        let pool = db::open_in_memory().await.unwrap();
        let project_id = seed_project(&pool).await;
        let store = WorkItemStore::new(pool);

        let a = store.create(project_id, "A", None, "task", Priority::Medium, None, None).await.unwrap();
        let b = store.create(project_id, "B", None, "task", Priority::Medium, Some(&a.id), None).await.unwrap();

        let err = store.set_parent(&a.id, &b.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn transition_enforces_state_machine() {
        let pool = db::open_in_memory().await.unwrap();
        let project_id = seed_project(&pool).await;
        let store = WorkItemStore::new(pool);

        let item = store.create(project_id, "A", None, "task", Priority::Medium, None, None).await.unwrap();
        let err = store.transition(&item.id, WorkItemStatus::Completed, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let assigned = store.transition(&item.id, WorkItemStatus::Assigned, None).await.unwrap();
        assert_eq!(assigned.status, WorkItemStatus::Assigned);
        assert!(assigned.assigned_at.is_some());
    }
}
