use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ── ID types ──
pub type ProjectId = Uuid;
pub type FileId = Uuid;
pub type BranchId = Uuid;
pub type CommitId = Uuid;
pub type CheckoutId = Uuid;
pub type WorkItemId = String; // tdb-xxxxx
pub type AgentSessionId = Uuid;
pub type ConvoyId = Uuid;

/// Hex-encoded SHA-256 digest, lower-case, always 64 characters.
pub type BlobHash = String;

// ── Project ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectVisibility {
    Private,
    Public,
}

impl Default for ProjectVisibility {
    fn default() -> Self {
        Self::Private
    }
}

impl std::fmt::Display for ProjectVisibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Private => "private",
            Self::Public => "public",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ProjectVisibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            other => Err(format!("unknown visibility: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub slug: String,
    pub name: String,
    pub repository_url: Option<String>,
    pub default_branch: String,
    pub visibility: ProjectVisibility,
    pub license: Option<String>,
}

// ── Content blob (C1) ──

/// Polymorphic content payload: a `ContentBlob` is either decoded text or
/// an opaque binary payload — never both. See DESIGN NOTES
/// "Polymorphism over content kind".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    Text { encoding: String, line_count: u32 },
    Binary { content_type: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlob {
    pub hash_sha256: BlobHash,
    pub size_bytes: u64,
    pub reference_count: u64,
    pub kind: ContentKind,
}

/// The decoded payload returned by `ContentStore::get`.
#[derive(Debug, Clone)]
pub enum BlobPayload {
    Text(String),
    Binary(Vec<u8>),
}

// ── File registry (C2) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Active,
    Deleted,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown file status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub id: FileId,
    pub project_id: ProjectId,
    pub relative_path: String,
    pub name: String,
    pub file_type: String,
    pub line_count: u32,
    pub status: FileStatus,
    pub current_version: Option<u32>,
    pub current_hash: Option<BlobHash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub file_id: FileId,
    pub version: u32,
    pub content_hash: BlobHash,
    pub is_current: bool,
}

// ── Scanner (C3) ──

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub absolute_path: std::path::PathBuf,
    pub relative_path: String,
    pub file_name: String,
    pub file_type: String,
    pub component_name: Option<String>,
    pub lines_of_code: u32,
}

// ── Working state (C4) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkingFileState {
    Unmodified,
    Added,
    Modified,
    Deleted,
}

impl std::fmt::Display for WorkingFileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unmodified => "unmodified",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WorkingFileState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unmodified" => Ok(Self::Unmodified),
            "added" => Ok(Self::Added),
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown working state: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingStateEntry {
    pub project_id: ProjectId,
    pub branch_id: BranchId,
    pub file_id: FileId,
    pub relative_path: String,
    pub state: WorkingFileState,
    pub staged: bool,
    pub detected_hash: Option<BlobHash>,
}

// ── VCS (C5) ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub project_id: ProjectId,
    pub name: String,
    pub is_default: bool,
    pub parent_branch_id: Option<BranchId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub project_id: ProjectId,
    pub branch_id: BranchId,
    pub parent_commit_id: Option<CommitId>,
    pub commit_hash: String,
    pub author: String,
    pub message: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(Self::Added),
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            "renamed" => Ok(Self::Renamed),
            other => Err(format!("unknown change type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitFile {
    pub commit_id: CommitId,
    pub file_id: FileId,
    pub change_type: ChangeType,
    pub old_content_hash: Option<BlobHash>,
    pub new_content_hash: Option<BlobHash>,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
}

// ── Checkout (C6) ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkout {
    pub id: CheckoutId,
    pub project_id: ProjectId,
    pub checkout_path: String,
    pub last_sync_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSnapshot {
    pub checkout_id: CheckoutId,
    pub file_id: FileId,
    pub version: u32,
    pub content_hash: BlobHash,
}

/// A file whose checkout snapshot is older than the current registry
/// version — the commit engine's version-skew conflict (spec §4.7, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictingFile {
    pub relative_path: String,
    pub your_version: u32,
    pub current_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    Abort,
    Force,
    Rebase,
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(Self::Abort),
            "force" => Ok(Self::Force),
            "rebase" => Ok(Self::Rebase),
            other => Err(format!("unknown conflict strategy: {other}")),
        }
    }
}

// ── Work items (C9) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    // Declaration order is the dispatch order (§4.10): Critical first.
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkItemStatus {
    Pending,
    Assigned,
    InProgress,
    Blocked,
    Completed,
    Cancelled,
}

impl std::fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WorkItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown work item status: {other}")),
        }
    }
}

impl WorkItemStatus {
    /// Valid transitions per the state machine in spec §4.9.
    pub fn can_transition_to(self, to: WorkItemStatus) -> bool {
        use WorkItemStatus::*;
        matches!(
            (self, to),
            (Pending, Assigned)
                | (Pending, Cancelled)
                | (Assigned, InProgress)
                | (Assigned, Blocked)
                | (InProgress, Completed)
                | (InProgress, Blocked)
                | (Blocked, InProgress)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub project_id: ProjectId,
    pub title: String,
    pub description: Option<String>,
    pub item_type: String,
    pub priority: Priority,
    pub status: WorkItemStatus,
    pub parent_id: Option<WorkItemId>,
    pub assigned_session_id: Option<AgentSessionId>,
    pub creating_session_id: Option<AgentSessionId>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub assigned_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemTransition {
    pub id: Uuid,
    pub work_item_id: WorkItemId,
    pub from_status: Option<WorkItemStatus>,
    pub to_status: WorkItemStatus,
    pub session_id: Option<AgentSessionId>,
    pub at: chrono::DateTime<chrono::Utc>,
}

// ── Coordinator (C10) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentSessionStatus {
    Active,
    Idle,
    Disconnected,
}

impl std::fmt::Display for AgentSessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Disconnected => "disconnected",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AgentSessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "disconnected" => Ok(Self::Disconnected),
            other => Err(format!("unknown agent session status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: AgentSessionId,
    pub project_id: ProjectId,
    pub agent_type: String,
    pub status: AgentSessionStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Agent availability summary used by `available_agents` / dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAvailability {
    pub session_id: AgentSessionId,
    pub active_work_count: u32,
    pub unread_messages: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MailboxMessageType {
    WorkAssignment,
    StatusUpdate,
    ConflictNotice,
    Broadcast,
}

impl std::fmt::Display for MailboxMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WorkAssignment => "work_assignment",
            Self::StatusUpdate => "status_update",
            Self::ConflictNotice => "conflict_notice",
            Self::Broadcast => "broadcast",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MailboxMessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work_assignment" => Ok(Self::WorkAssignment),
            "status_update" => Ok(Self::StatusUpdate),
            "conflict_notice" => Ok(Self::ConflictNotice),
            "broadcast" => Ok(Self::Broadcast),
            other => Err(format!("unknown mailbox message type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxMessage {
    pub id: Uuid,
    pub session_id: AgentSessionId,
    pub message_type: MailboxMessageType,
    pub priority: Option<Priority>,
    pub body: String,
    pub delivered_at: chrono::DateTime<chrono::Utc>,
    pub read_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxSummary {
    pub total: u64,
    pub unread: u64,
    pub read: u64,
    pub urgent: u64,
    pub work_assignments: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvoyStatus {
    Draft,
    Active,
    Completed,
}

impl std::fmt::Display for ConvoyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ConvoyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown convoy status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Convoy {
    pub id: ConvoyId,
    pub project_id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub status: ConvoyStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvoyItem {
    pub convoy_id: ConvoyId,
    pub work_item_id: WorkItemId,
    /// Position within the convoy; auto-assign walks items in this order
    /// (SPEC_FULL.md §11.1).
    pub sequence: u32,
}

/// Aggregate coordinator metrics (§4.10 `metrics`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorMetrics {
    pub pending: u64,
    pub assigned: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub blocked: u64,
    pub agent_utilization: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_critical_first() {
        let mut ps = vec![Priority::Low, Priority::Critical, Priority::Medium, Priority::High];
        ps.sort();
        assert_eq!(
            ps,
            vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
        );
    }

    #[test]
    fn work_item_status_transitions() {
        use WorkItemStatus::*;
        assert!(Pending.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Blocked));
        assert!(Blocked.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Assigned.can_transition_to(Completed));
    }

    #[test]
    fn status_display_round_trips_through_from_str() {
        for s in [
            WorkItemStatus::Pending,
            WorkItemStatus::Assigned,
            WorkItemStatus::InProgress,
            WorkItemStatus::Blocked,
            WorkItemStatus::Completed,
            WorkItemStatus::Cancelled,
        ] {
            let parsed: WorkItemStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }
}
