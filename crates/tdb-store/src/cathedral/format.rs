use serde::{Deserialize, Serialize};

pub const CATHEDRAL_FORMAT_VERSION: &str = "1.0.0";
pub const CATHEDRAL_SCHEMA_VERSION: u32 = 1;

/// `manifest.json` at the root of a `.cathedral` package (spec §4.8, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CathedralManifest {
    pub version: String,
    pub format: String,
    pub created_at: String,
    pub created_by: String,
    pub project: ProjectManifest,
    pub source: SourceManifest,
    pub contents: ContentsManifest,
    pub checksums: Checksums,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub slug: String,
    pub name: String,
    pub visibility: String,
    pub license: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceManifest {
    pub templedb_version: String,
    pub schema_version: u32,
    pub export_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentsManifest {
    pub files: u64,
    pub commits: u64,
    pub branches: u64,
    pub total_size_bytes: u64,
    pub has_secrets: bool,
    pub has_environments: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checksums {
    pub sha256: String,
    pub algorithm: String,
}

/// One entry in `files/manifest.json`, the ordered `(file_id, path, hash)`
/// index referenced by spec §4.8. Per-file detail lives in the matching
/// `file-NNNNNN.json` sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIndexEntry {
    pub file_id: String,
    pub file_path: String,
    pub hash_sha256: String,
}

/// `file-NNNNNN.json` per-file metadata, paired with a `file-NNNNNN.blob`
/// holding the raw content bytes (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileManifestEntry {
    pub file_id: String,
    pub file_path: String,
    pub file_type: String,
    pub lines_of_code: u32,
    pub file_size_bytes: u64,
    pub hash_sha256: String,
    pub version_number: u32,
    pub author: Option<String>,
    pub created_at: String,
    pub metadata: serde_json::Value,
}

/// One commit in `vcs/history.json`, with its file changes inlined so
/// import doesn't need a second pass to reattach them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub commit_id: String,
    pub branch_id: String,
    pub parent_commit_id: Option<String>,
    pub commit_hash: String,
    pub author: String,
    pub message: String,
    pub created_at: String,
    pub changes: Vec<HistoryChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryChange {
    pub file_id: String,
    pub change_type: String,
    pub old_content_hash: Option<String>,
    pub new_content_hash: Option<String>,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
}

/// One entry in `vcs/branches.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchManifestEntry {
    pub branch_id: String,
    pub name: String,
    pub is_default: bool,
    pub parent_branch_id: Option<String>,
}

/// `file-NNNNNN` ids are renumbered by path order on export (spec §4.8),
/// 1-indexed so the first file is `file-000001`.
pub fn file_slot_name(index: usize) -> String {
    format!("file-{:06}", index + 1)
}
