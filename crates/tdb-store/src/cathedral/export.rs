use std::io::Write;
use std::path::{Path, PathBuf};

use glob::Pattern;
use sha2::{Digest, Sha256};
use tdb_core::{Error, ProjectId, Result};

use super::format::{
    BranchManifestEntry, CathedralManifest, Checksums, ContentsManifest, FileIndexEntry, FileManifestEntry, HistoryChange, HistoryEntry,
    ProjectManifest, SourceManifest, CATHEDRAL_FORMAT_VERSION, CATHEDRAL_SCHEMA_VERSION,
};
use crate::content_store::ContentStore;
use crate::file_registry::FileRegistryStore;
use crate::project_store::ProjectStore;
use crate::vcs::VcsStore;

/// Archive compression for a cathedral package (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Directory,
    TarGz,
    TarZstd,
}

pub struct ExportOptions<'a> {
    pub exclude_patterns: &'a [String],
    pub archive: ArchiveFormat,
}

impl Default for ExportOptions<'_> {
    fn default() -> Self {
        Self { exclude_patterns: &[], archive: ArchiveFormat::Directory }
    }
}

/// Writes a `.cathedral` package for `project_id` to `out_path` (spec §4.8,
/// "C8"). Exported file content comes from the content-addressable store,
/// not the filesystem, so the package is reproducible regardless of where
/// the originating checkout lives.
pub async fn export(
    project_id: ProjectId,
    projects: &ProjectStore,
    files: &FileRegistryStore,
    content: &ContentStore,
    vcs: &VcsStore,
    out_path: &Path,
    opts: &ExportOptions<'_>,
) -> Result<PathBuf> {
    let project = projects.get(project_id).await?;
    let staging = tempfile::tempdir()?;
    let pkg_root = staging.path();

    std::fs::create_dir_all(pkg_root.join("files"))?;
    std::fs::create_dir_all(pkg_root.join("vcs"))?;

    let excludes: Vec<Pattern> = opts
        .exclude_patterns
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect();

    let mut active_files = files.list_active(project_id).await?;
    active_files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let mut index_entries = Vec::new();
    let mut total_size = 0u64;
    let mut excluded_count = 0u32;

    for (slot, file) in active_files.iter().enumerate() {
        if excludes.iter().any(|p| p.matches(&file.relative_path)) {
            excluded_count += 1;
            continue;
        }
        let Some(hash) = &file.current_hash else { continue };

        let payload = content.get(hash).await?;
        let bytes: Vec<u8> = match payload {
            tdb_core::BlobPayload::Text(t) => t.into_bytes(),
            tdb_core::BlobPayload::Binary(b) => b,
        };
        total_size += bytes.len() as u64;

        let slot_name = super::format::file_slot_name(slot);
        std::fs::write(pkg_root.join("files").join(format!("{slot_name}.blob")), &bytes)?;

        let metadata = FileManifestEntry {
            file_id: file.id.to_string(),
            file_path: file.relative_path.clone(),
            file_type: file.file_type.clone(),
            lines_of_code: file.line_count,
            file_size_bytes: bytes.len() as u64,
            hash_sha256: hash.clone(),
            version_number: file.current_version.unwrap_or(0),
            author: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            metadata: serde_json::Value::Null,
        };
        std::fs::write(pkg_root.join("files").join(format!("{slot_name}.json")), serde_json::to_vec_pretty(&metadata)?)?;

        index_entries.push(FileIndexEntry { file_id: file.id.to_string(), file_path: file.relative_path.clone(), hash_sha256: hash.clone() });
    }

    std::fs::write(pkg_root.join("files/manifest.json"), serde_json::to_vec_pretty(&index_entries)?)?;

    let branches = vcs.list_branches(project_id).await?;
    let branch_entries: Vec<BranchManifestEntry> = branches
        .iter()
        .map(|b| BranchManifestEntry {
            branch_id: b.id.to_string(),
            name: b.name.clone(),
            is_default: b.is_default,
            parent_branch_id: b.parent_branch_id.map(|id| id.to_string()),
        })
        .collect();
    std::fs::write(pkg_root.join("vcs/branches.json"), serde_json::to_vec_pretty(&branch_entries)?)?;

    let mut history = Vec::new();
    for branch in &branches {
        let log = vcs.log(branch.id, u32::MAX).await?;
        for commit in log {
            let changes = vcs
                .commit_diff(commit.id)
                .await?
                .into_iter()
                .map(|c| HistoryChange {
                    file_id: c.file_id.to_string(),
                    change_type: c.change_type.to_string(),
                    old_content_hash: c.old_content_hash,
                    new_content_hash: c.new_content_hash,
                    old_path: c.old_path,
                    new_path: c.new_path,
                })
                .collect();
            history.push(HistoryEntry {
                commit_id: commit.id.to_string(),
                branch_id: commit.branch_id.to_string(),
                parent_commit_id: commit.parent_commit_id.map(|id| id.to_string()),
                commit_hash: commit.commit_hash,
                author: commit.author,
                message: commit.message,
                created_at: commit.created_at.to_rfc3339(),
                changes,
            });
        }
    }
    // Sort oldest-first so a replaying importer encounters each commit's
    // parent before the commit itself.
    history.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    let commit_count = history.len() as u64;
    std::fs::write(pkg_root.join("vcs/history.json"), serde_json::to_vec_pretty(&history)?)?;

    let project_json = serde_json::json!({
        "slug": project.slug,
        "name": project.name,
        "repository_url": project.repository_url,
        "default_branch": project.default_branch,
        "visibility": project.visibility.to_string(),
        "license": project.license,
    });
    std::fs::write(pkg_root.join("project.json"), serde_json::to_vec_pretty(&project_json)?)?;

    let mut manifest = CathedralManifest {
        version: CATHEDRAL_FORMAT_VERSION.to_string(),
        format: "cathedral-package".to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        created_by: "templedb".to_string(),
        project: ProjectManifest {
            slug: project.slug.clone(),
            name: project.name.clone(),
            visibility: project.visibility.to_string(),
            license: project.license.clone(),
        },
        source: SourceManifest {
            templedb_version: env!("CARGO_PKG_VERSION").to_string(),
            schema_version: CATHEDRAL_SCHEMA_VERSION,
            export_method: "full".to_string(),
        },
        contents: ContentsManifest {
            files: index_entries.len() as u64,
            commits: commit_count,
            branches: branch_entries.len() as u64,
            total_size_bytes: total_size,
            has_secrets: false,
            has_environments: false,
        },
        checksums: Checksums { sha256: String::new(), algorithm: "sha256".to_string() },
        signature: None,
    };

    // Write a placeholder manifest first (it's excluded from its own
    // checksum), then compute and rewrite with the real digest.
    std::fs::write(pkg_root.join("manifest.json"), serde_json::to_vec_pretty(&manifest)?)?;
    manifest.checksums.sha256 = package_checksum(pkg_root)?;
    std::fs::write(pkg_root.join("manifest.json"), serde_json::to_vec_pretty(&manifest)?)?;

    tracing::info!(
        project = %project.slug,
        files = index_entries.len(),
        excluded = excluded_count,
        commits = commit_count,
        "cathedral export staged"
    );

    match opts.archive {
        ArchiveFormat::Directory => {
            copy_dir_all(pkg_root, out_path)?;
            Ok(out_path.to_path_buf())
        }
        ArchiveFormat::TarGz => write_tar_gz(pkg_root, out_path),
        ArchiveFormat::TarZstd => write_tar_zstd(pkg_root, out_path),
    }
}

/// SHA-256 over every file under `root` except `manifest.json`, in sorted
/// path order, so the checksum is deterministic regardless of filesystem
/// directory-entry ordering.
pub(crate) fn package_checksum(root: &Path) -> Result<String> {
    let mut paths = Vec::new();
    collect_files(root, root, &mut paths)?;
    paths.sort();

    let mut hasher = Sha256::new();
    for rel in &paths {
        if rel == "manifest.json" {
            continue;
        }
        let bytes = std::fs::read(root.join(rel))?;
        hasher.update(&bytes);
    }

    Ok(hasher.finalize().iter().map(|b| format!("{b:02x}")).collect())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path.strip_prefix(root).map_err(|e| Error::Internal(e.to_string()))?;
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let dest = dst.join(entry.file_name());
        if path.is_dir() {
            copy_dir_all(&path, &dest)?;
        } else {
            std::fs::copy(&path, &dest)?;
        }
    }
    Ok(())
}

fn write_tar_gz(pkg_root: &Path, out_path: &Path) -> Result<PathBuf> {
    let file = std::fs::File::create(out_path)?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", pkg_root)?;
    builder.into_inner()?.finish()?;
    Ok(out_path.to_path_buf())
}

fn write_tar_zstd(pkg_root: &Path, out_path: &Path) -> Result<PathBuf> {
    let file = std::fs::File::create(out_path)?;
    let encoder = zstd::stream::Encoder::new(file, 0)?.auto_finish();
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", pkg_root)?;
    let mut encoder = builder.into_inner()?;
    encoder.flush()?;
    Ok(out_path.to_path_buf())
}
