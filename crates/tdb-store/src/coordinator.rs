use chrono::Utc;
use sqlx::SqlitePool;
use tdb_core::{
    AgentAvailability, AgentSession, AgentSessionId, AgentSessionStatus, Convoy, ConvoyId,
    ConvoyStatus, CoordinatorMetrics, Error, MailboxMessage, MailboxMessageType, MailboxSummary,
    Priority, ProjectId, Result, WorkItemId, WorkItemStatus,
};
use uuid::Uuid;

use crate::workitems::WorkItemStore;

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    project_id: String,
    agent_type: String,
    status: String,
    started_at: String,
}

impl SessionRow {
    fn into_session(self) -> Result<AgentSession> {
        Ok(AgentSession {
            id: Uuid::parse_str(&self.id).map_err(|e| Error::Internal(e.to_string()))?,
            project_id: Uuid::parse_str(&self.project_id).map_err(|e| Error::Internal(e.to_string()))?,
            agent_type: self.agent_type,
            status: self.status.parse().map_err(Error::Internal)?,
            started_at: self.started_at.parse().map_err(|e: chrono::ParseError| Error::Internal(e.to_string()))?,
        })
    }
}

/// Multi-agent work coordination: sessions, mailbox, dispatch, and convoys
/// (spec §4.10, "C10"). Layers on top of `WorkItemStore` rather than
/// duplicating its state machine.
#[derive(Clone)]
pub struct Coordinator {
    pool: SqlitePool,
    work_items: WorkItemStore,
}

impl Coordinator {
    pub fn new(pool: SqlitePool) -> Self {
        let work_items = WorkItemStore::new(pool.clone());
        Self { pool, work_items }
    }

    pub async fn start_session(&self, project_id: ProjectId, agent_type: &str) -> Result<AgentSession> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO agent_sessions (id, project_id, agent_type, status, started_at) VALUES (?1, ?2, ?3, 'active', ?4)")
            .bind(id.to_string())
            .bind(project_id.to_string())
            .bind(agent_type)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        self.get_session(id).await
    }

    pub async fn get_session(&self, id: AgentSessionId) -> Result<AgentSession> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, project_id, agent_type, status, started_at FROM agent_sessions WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("agent session {id}")))?;

        row.into_session()
    }

    pub async fn set_session_status(&self, id: AgentSessionId, status: AgentSessionStatus) -> Result<()> {
        sqlx::query("UPDATE agent_sessions SET status = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(status.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Active sessions ranked by ascending current load, for `auto_select`
    /// assignment.
    pub async fn available_agents(&self, project_id: ProjectId) -> Result<Vec<AgentAvailability>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            session_id: String,
            active_work_count: i64,
            unread_messages: i64,
            started_at: String,
        }

        let rows = sqlx::query_as::<_, Row>(
            r#"
            SELECT
                s.id as session_id,
                (SELECT COUNT(*) FROM work_items wi WHERE wi.assigned_session_id = s.id AND wi.status IN ('assigned', 'in_progress')) as active_work_count,
                (SELECT COUNT(*) FROM agent_mailbox m WHERE m.session_id = s.id AND m.read_at IS NULL) as unread_messages,
                s.started_at
            FROM agent_sessions s
            WHERE s.project_id = ?1 AND s.status = 'active'
            ORDER BY active_work_count ASC
            "#,
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(AgentAvailability {
                    session_id: Uuid::parse_str(&r.session_id).map_err(|e| Error::Internal(e.to_string()))?,
                    active_work_count: r.active_work_count as u32,
                    unread_messages: r.unread_messages as u32,
                    started_at: r.started_at.parse().map_err(|e: chrono::ParseError| Error::Internal(e.to_string()))?,
                })
            })
            .collect()
    }

    /// Assigns a work item either to `session_id`, or — if `None` — to
    /// the least-loaded available agent (§4.10 `auto_select`).
    pub async fn assign_work_item(&self, work_item_id: &str, session_id: Option<AgentSessionId>) -> Result<AgentSessionId> {
        let item = self.work_items.get(work_item_id).await?;

        let target = match session_id {
            Some(s) => s,
            None => {
                let agents = self.available_agents(item.project_id).await?;
                agents
                    .first()
                    .map(|a| a.session_id)
                    .ok_or_else(|| Error::Unavailable("no available agents to assign work".into()))?
            }
        };

        self.work_items.assign(work_item_id, target).await?;
        self.post_message(
            target,
            MailboxMessageType::WorkAssignment,
            Some(item.priority),
            &format!("assigned: {} ({})", item.title, item.id),
        )
        .await?;

        Ok(target)
    }

    /// Iterates pending work items in priority order (tie-break by
    /// `created_at` ascending, per `WorkItemStore::dispatch_queue`),
    /// assigning each to the currently least-busy available agent
    /// (spec §4.10). The dispatch set is a snapshot taken at the start of
    /// the call. Items for which no agent is available are skipped rather
    /// than aborting the rest of the dispatch. Returns the number assigned.
    pub async fn dispatch_pending(&self, project_id: ProjectId, priority: Option<Priority>) -> Result<u32> {
        let pending = self.work_items.dispatch_queue(project_id, priority).await?;
        let mut dispatched = 0u32;

        for item in pending.into_iter().filter(|i| i.status == WorkItemStatus::Pending) {
            match self.assign_work_item(&item.id, None).await {
                Ok(_) => dispatched += 1,
                Err(Error::Unavailable(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(dispatched)
    }

    pub async fn post_message(
        &self,
        session_id: AgentSessionId,
        message_type: MailboxMessageType,
        priority: Option<Priority>,
        body: &str,
    ) -> Result<MailboxMessage> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO agent_mailbox (id, session_id, message_type, priority, body, delivered_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(id.to_string())
        .bind(session_id.to_string())
        .bind(message_type.to_string())
        .bind(priority.map(|p| p.to_string()))
        .bind(body)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(MailboxMessage {
            id,
            session_id,
            message_type,
            priority,
            body: body.to_string(),
            delivered_at: now,
            read_at: None,
        })
    }

    pub async fn mark_read(&self, message_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE agent_mailbox SET read_at = ?2 WHERE id = ?1")
            .bind(message_id.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mailbox_summary(&self, session_id: AgentSessionId) -> Result<MailboxSummary> {
        #[derive(sqlx::FromRow)]
        struct Row {
            total: i64,
            unread: i64,
            read: i64,
            urgent: i64,
            work_assignments: i64,
        }

        let row = sqlx::query_as::<_, Row>(
            r#"
            SELECT
                COUNT(*) as total,
                SUM(CASE WHEN read_at IS NULL THEN 1 ELSE 0 END) as unread,
                SUM(CASE WHEN read_at IS NOT NULL THEN 1 ELSE 0 END) as read,
                SUM(CASE WHEN priority IN ('critical', 'high') THEN 1 ELSE 0 END) as urgent,
                SUM(CASE WHEN message_type = 'work_assignment' THEN 1 ELSE 0 END) as work_assignments
            FROM agent_mailbox WHERE session_id = ?1
            "#,
        )
        .bind(session_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(MailboxSummary {
            total: row.total as u64,
            unread: row.unread as u64,
            read: row.read as u64,
            urgent: row.urgent as u64,
            work_assignments: row.work_assignments as u64,
        })
    }

    /// Creates a convoy with explicit item ordering (SPEC_FULL.md §11.1).
    pub async fn create_convoy(&self, project_id: ProjectId, name: &str, description: Option<&str>, work_item_ids: &[WorkItemId]) -> Result<Convoy> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO convoys (id, project_id, name, description, status) VALUES (?1, ?2, ?3, ?4, 'draft')")
            .bind(id.to_string())
            .bind(project_id.to_string())
            .bind(name)
            .bind(description)
            .execute(&mut *tx)
            .await?;

        for (idx, item_id) in work_item_ids.iter().enumerate() {
            sqlx::query("INSERT INTO convoy_items (convoy_id, work_item_id, sequence) VALUES (?1, ?2, ?3)")
                .bind(id.to_string())
                .bind(item_id)
                .bind(idx as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(Convoy {
            id,
            project_id,
            name: name.to_string(),
            description: description.map(|s| s.to_string()),
            status: ConvoyStatus::Draft,
        })
    }

    /// Starts a convoy, walking items in sequence order; when `auto_assign`
    /// is set, dispatches each unassigned pending item to the
    /// least-loaded agent (SPEC_FULL.md §11.1).
    pub async fn start_convoy(&self, convoy_id: ConvoyId, auto_assign: bool) -> Result<()> {
        sqlx::query("UPDATE convoys SET status = 'active' WHERE id = ?1")
            .bind(convoy_id.to_string())
            .execute(&self.pool)
            .await?;

        if !auto_assign {
            return Ok(());
        }

        let item_ids: Vec<String> = sqlx::query_scalar(
            "SELECT work_item_id FROM convoy_items WHERE convoy_id = ?1 ORDER BY sequence",
        )
        .bind(convoy_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        for item_id in item_ids {
            let item = self.work_items.get(&item_id).await?;
            if item.status == WorkItemStatus::Pending && item.assigned_session_id.is_none() {
                self.assign_work_item(&item_id, None).await?;
            }
        }

        Ok(())
    }

    pub async fn metrics(&self, project_id: ProjectId) -> Result<CoordinatorMetrics> {
        #[derive(sqlx::FromRow)]
        struct Row {
            pending: i64,
            assigned: i64,
            in_progress: i64,
            completed: i64,
            blocked: i64,
        }

        let row = sqlx::query_as::<_, Row>(
            r#"
            SELECT
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) as pending,
                SUM(CASE WHEN status = 'assigned' THEN 1 ELSE 0 END) as assigned,
                SUM(CASE WHEN status = 'in_progress' THEN 1 ELSE 0 END) as in_progress,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) as completed,
                SUM(CASE WHEN status = 'blocked' THEN 1 ELSE 0 END) as blocked
            FROM work_items WHERE project_id = ?1
            "#,
        )
        .bind(project_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        let active_sessions: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM agent_sessions WHERE project_id = ?1 AND status = 'active'",
        )
        .bind(project_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        let busy_sessions: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT assigned_session_id) FROM work_items
            WHERE project_id = ?1 AND status IN ('assigned', 'in_progress') AND assigned_session_id IS NOT NULL
            "#,
        )
        .bind(project_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        let agent_utilization = if active_sessions > 0 {
            busy_sessions as f64 / active_sessions as f64
        } else {
            0.0
        };

        Ok(CoordinatorMetrics {
            pending: row.pending as u64,
            assigned: row.assigned as u64,
            in_progress: row.in_progress as u64,
            completed: row.completed as u64,
            blocked: row.blocked as u64,
            agent_utilization,
        })
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
    async fn assign_work_item_auto_selects_least_loaded_agent() {
        let pool = db::open_in_memory().await.unwrap();
        let project_id = seed_project(&pool).await;
        let coordinator = Coordinator::new(pool.clone());
        let work_items = WorkItemStore::new(pool);

        let session = coordinator.start_session(project_id, "claude-code").await.unwrap();
        let item = work_items.create(project_id, "Do a thing", None, "task", Priority::Medium, None, None).await.unwrap();

        let assigned_to = coordinator.assign_work_item(&item.id, None).await.unwrap();
        assert_eq!(assigned_to, session.id);

        let summary = coordinator.mailbox_summary(session.id).await.unwrap();
        assert_eq!(summary.work_assignments, 1);
        assert_eq!(summary.unread, 1);
    }

    #[tokio::test]
    async fn convoy_auto_assign_dispatches_every_pending_item() {
        let pool = db::open_in_memory().await.unwrap();
        let project_id = seed_project(&pool).await;
        let coordinator = Coordinator::new(pool.clone());
        let work_items = WorkItemStore::new(pool);

        coordinator.start_session(project_id, "claude-code").await.unwrap();
        let a = work_items.create(project_id, "A", None, "task", Priority::Medium, None, None).await.unwrap();
        let b = work_items.create(project_id, "B", None, "task", Priority::Medium, None, None).await.unwrap();

        let convoy = coordinator.create_convoy(project_id, "release", None, &[a.id.clone(), b.id.clone()]).await.unwrap();
        coordinator.start_convoy(convoy.id, true).await.unwrap();

        let a_after = work_items.get(&a.id).await.unwrap();
        let b_after = work_items.get(&b.id).await.unwrap();
        assert_eq!(a_after.status, WorkItemStatus::Assigned);
        assert_eq!(b_after.status, WorkItemStatus::Assigned);
    }

    #[tokio::test]
    async fn dispatch_pending_assigns_and_skips_when_no_agents() {
        let pool = db::open_in_memory().await.unwrap();
        let project_id = seed_project(&pool).await;
        let coordinator = Coordinator::new(pool.clone());
        let work_items = WorkItemStore::new(pool);

        let a = work_items.create(project_id, "A", None, "task", Priority::High, None, None).await.unwrap();

        let dispatched = coordinator.dispatch_pending(project_id, None).await.unwrap();
        assert_eq!(dispatched, 0);
        assert_eq!(work_items.get(&a.id).await.unwrap().status, WorkItemStatus::Pending);

        let session = coordinator.start_session(project_id, "claude-code").await.unwrap();
        let dispatched = coordinator.dispatch_pending(project_id, None).await.unwrap();
        assert_eq!(dispatched, 1);
        let after = work_items.get(&a.id).await.unwrap();
        assert_eq!(after.status, WorkItemStatus::Assigned);
        assert_eq!(after.assigned_session_id, Some(session.id));
    }

    #[tokio::test]
    async fn metrics_counts_by_status() {
        let pool = db::open_in_memory().await.unwrap();
        let project_id = seed_project(&pool).await;
        let coordinator = Coordinator::new(pool.clone());
        let work_items = WorkItemStore::new(pool);

        work_items.create(project_id, "A", None, "task", Priority::Low, None, None).await.unwrap();
        let b = work_items.create(project_id, "B", None, "task", Priority::Low, None, None).await.unwrap();
        work_items.transition(&b.id, WorkItemStatus::Assigned, None).await.unwrap();

        let metrics = coordinator.metrics(project_id).await.unwrap();
        assert_eq!(metrics.pending, 1);
        assert_eq!(metrics.assigned, 1);
    }
}
