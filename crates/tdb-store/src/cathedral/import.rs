use std::collections::HashMap;
use std::path::Path;

use tdb_core::{CommitFile, Error, Project, Result};
use uuid::Uuid;

use super::format::{BranchManifestEntry, CathedralManifest, FileIndexEntry, HistoryEntry};
use crate::content_store::ContentStore;
use crate::file_registry::FileRegistryStore;
use crate::project_store::ProjectStore;
use crate::vcs::VcsStore;

/// Reads and verifies a `.cathedral` package directory (spec §4.8). Archive
/// formats must be extracted by the caller first — import always operates
/// on a directory, mirroring export's staging step.
pub fn read_manifest(pkg_root: &Path) -> Result<CathedralManifest> {
    let bytes = std::fs::read(pkg_root.join("manifest.json"))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Recomputes the package checksum and compares it against the manifest's
/// recorded value (spec §4.8 integrity check).
pub fn verify_integrity(pkg_root: &Path) -> Result<bool> {
    let manifest = read_manifest(pkg_root)?;
    let actual = super::export::package_checksum(pkg_root)?;
    Ok(actual == manifest.checksums.sha256)
}

/// Imports a `.cathedral` package into the store (spec §4.8, "C8").
///
/// Upserts the project (optionally renamed via `new_slug`; refuses an
/// existing slug unless `overwrite` is set), re-registers every file
/// through the content store (deduping blobs by hash), then replays
/// `vcs/branches.json` and `vcs/history.json`, deduplicating commits
/// globally by hash. A `CommitFile` whose `file_id` isn't in this
/// package's file index (e.g. a file since deleted and excluded from the
/// exported active set) is dropped rather than failing the whole import,
/// since `commit_files.file_id` has no dangling-reference tolerance.
pub async fn import(
    pkg_root: &Path,
    projects: &ProjectStore,
    files: &FileRegistryStore,
    content: &ContentStore,
    vcs: &VcsStore,
    overwrite: bool,
    new_slug: Option<&str>,
) -> Result<Project> {
    let manifest = read_manifest(pkg_root)?;

    if !verify_integrity(pkg_root)? {
        return Err(Error::IntegrityViolation(format!("checksum mismatch importing {}", manifest.project.slug)));
    }

    let slug = new_slug.unwrap_or(&manifest.project.slug);
    let project = match projects.get_by_slug(slug).await {
        Ok(existing) if overwrite => existing,
        Ok(_) => return Err(Error::Conflict(format!("project '{slug}' already exists"))),
        Err(Error::NotFound(_)) => projects.create(slug, &manifest.project.name, None).await?,
        Err(e) => return Err(e),
    };

    let index_bytes = std::fs::read(pkg_root.join("files/manifest.json"))?;
    let index: Vec<FileIndexEntry> = serde_json::from_slice(&index_bytes)?;

    let mut file_id_map: HashMap<String, Uuid> = HashMap::new();
    for (slot, entry) in index.iter().enumerate() {
        let slot_name = super::format::file_slot_name(slot);
        let meta_bytes = std::fs::read(pkg_root.join("files").join(format!("{slot_name}.json")))?;
        let meta: super::format::FileManifestEntry = serde_json::from_slice(&meta_bytes)?;

        let bytes = std::fs::read(pkg_root.join("files").join(format!("{slot_name}.blob")))?;
        let hash = match std::str::from_utf8(&bytes) {
            Ok(text) => content.put_text(text, "utf-8").await?,
            Err(_) => content.put_binary(&bytes, "application/octet-stream").await?,
        };

        let file_name = Path::new(&entry.file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&entry.file_path)
            .to_string();

        let registered = files.register(project.id, &entry.file_path, &file_name, &meta.file_type, meta.lines_of_code).await?;
        files.add_version(registered.id, &hash, meta.lines_of_code).await?;
        file_id_map.insert(entry.file_id.clone(), registered.id);
    }

    let branches_bytes = std::fs::read(pkg_root.join("vcs/branches.json")).unwrap_or_default();
    let branch_entries: Vec<BranchManifestEntry> = if branches_bytes.is_empty() { Vec::new() } else { serde_json::from_slice(&branches_bytes)? };

    let mut branch_id_map: HashMap<String, Uuid> = HashMap::new();
    for entry in &branch_entries {
        let branch = match vcs.get_branch_by_name(project.id, &entry.name).await {
            Ok(existing) => existing,
            Err(Error::NotFound(_)) => {
                let parent = entry.parent_branch_id.as_ref().and_then(|p| branch_id_map.get(p)).copied();
                vcs.create_branch(project.id, &entry.name, parent).await?
            }
            Err(e) => return Err(e),
        };
        branch_id_map.insert(entry.branch_id.clone(), branch.id);
    }

    let history_bytes = std::fs::read(pkg_root.join("vcs/history.json")).unwrap_or_default();
    let history: Vec<HistoryEntry> = if history_bytes.is_empty() { Vec::new() } else { serde_json::from_slice(&history_bytes)? };

    let mut commit_id_map: HashMap<String, Uuid> = HashMap::new();
    let mut commits_imported = 0u32;
    for entry in &history {
        if let Some(existing) = vcs.find_by_hash(&entry.commit_hash).await? {
            commit_id_map.insert(entry.commit_id.clone(), existing.id);
            continue;
        }

        let Some(&branch_id) = branch_id_map.get(&entry.branch_id) else { continue };
        let parent_commit_id = entry.parent_commit_id.as_ref().and_then(|p| commit_id_map.get(p)).copied();
        let created_at = entry
            .created_at
            .parse()
            .map_err(|e: chrono::ParseError| Error::Internal(e.to_string()))?;

        let changes: Vec<CommitFile> = entry
            .changes
            .iter()
            .filter_map(|c| {
                let file_id = *file_id_map.get(&c.file_id)?;
                Some(CommitFile {
                    commit_id: Uuid::nil(),
                    file_id,
                    change_type: c.change_type.parse().ok()?,
                    old_content_hash: c.old_content_hash.clone(),
                    new_content_hash: c.new_content_hash.clone(),
                    old_path: c.old_path.clone(),
                    new_path: c.new_path.clone(),
                })
            })
            .collect();

        let commit = vcs
            .import_commit(project.id, branch_id, parent_commit_id, &entry.commit_hash, &entry.author, &entry.message, created_at, &changes)
            .await?;
        commit_id_map.insert(entry.commit_id.clone(), commit.id);
        commits_imported += 1;
    }

    tracing::info!(project = %project.slug, files = file_id_map.len(), commits = commits_imported, "cathedral import completed");

    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cathedral::export::{export, ArchiveFormat, ExportOptions};
    use crate::db;
    use tdb_core::ChangeType;

    #[tokio::test]
    async fn export_then_import_round_trips_a_file() {
        let pool = db::open_in_memory().await.unwrap();
        let projects = ProjectStore::new(pool.clone());
        let files = FileRegistryStore::new(pool.clone());
        let content = ContentStore::new(pool.clone());
        let vcs = VcsStore::new(pool.clone());

        let project = projects.create("demo", "Demo", None).await.unwrap();
        let hash = content.put_text("pub fn a() {}\n", "utf-8").await.unwrap();
        let file = files.register(project.id, "lib.rs", "lib.rs", "rust", 1).await.unwrap();
        files.add_version(file.id, &hash, 1).await.unwrap();

        let branch = vcs.get_branch_by_name(project.id, "main").await.unwrap();
        let change = CommitFile {
            commit_id: Uuid::nil(),
            file_id: file.id,
            change_type: ChangeType::Added,
            old_content_hash: None,
            new_content_hash: Some(hash.clone()),
            old_path: None,
            new_path: Some("lib.rs".to_string()),
        };
        vcs.record_commit(project.id, &project.slug, branch.id, &branch.name, None, "agent-1", "add lib.rs", &[change]).await.unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let pkg_path = out_dir.path().join("demo.cathedral");
        export(project.id, &projects, &files, &content, &vcs, &pkg_path, &ExportOptions { exclude_patterns: &[], archive: ArchiveFormat::Directory })
            .await
            .unwrap();

        assert!(verify_integrity(&pkg_path).unwrap());

        let pool2 = db::open_in_memory().await.unwrap();
        let projects2 = ProjectStore::new(pool2.clone());
        let files2 = FileRegistryStore::new(pool2.clone());
        let content2 = ContentStore::new(pool2.clone());
        let vcs2 = VcsStore::new(pool2.clone());

        let imported = import(&pkg_path, &projects2, &files2, &content2, &vcs2, false, None).await.unwrap();
        assert_eq!(imported.slug, "demo");

        let imported_file = files2.find_by_path(imported.id, "lib.rs").await.unwrap().unwrap();
        assert_eq!(imported_file.current_hash, Some(hash));

        let branch2 = vcs2.get_branch_by_name(imported.id, "main").await.unwrap();
        let log = vcs2.log(branch2.id, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, "add lib.rs");
    }

    #[tokio::test]
    async fn import_without_overwrite_rejects_existing_slug() {
        let pool = db::open_in_memory().await.unwrap();
        let projects = ProjectStore::new(pool.clone());
        let files = FileRegistryStore::new(pool.clone());
        let content = ContentStore::new(pool.clone());
        let vcs = VcsStore::new(pool.clone());

        let project = projects.create("demo", "Demo", None).await.unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let pkg_path = out_dir.path().join("demo.cathedral");
        export(project.id, &projects, &files, &content, &vcs, &pkg_path, &ExportOptions::default()).await.unwrap();

        let err = import(&pkg_path, &projects, &files, &content, &vcs, false, None).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let renamed = import(&pkg_path, &projects, &files, &content, &vcs, false, Some("demo-2")).await.unwrap();
        assert_eq!(renamed.slug, "demo-2");
    }
}
