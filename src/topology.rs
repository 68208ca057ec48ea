//! Directory topology scanning
//!
//! A topology is a summary of a directory tree: how many files and
//! directories it holds, their total size, and a histogram of file
//! extensions. The CLI stores topologies in a [`HandleStore`] so repeated
//! reads are served from the handle until a change event makes it stale.
//!
//! [`HandleStore`]: crate::store::HandleStore

use crate::error::{HandleError, HandleResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extension bucket for files without one
const NO_EXTENSION: &str = "(none)";

/// Options controlling a scan
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Include dotfiles and descend into dot-directories
    pub include_hidden: bool,
    /// Maximum directory depth below the root (0 = root entries only)
    pub max_depth: Option<usize>,
}

/// Summary of a scanned directory tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub root: PathBuf,
    pub files: u64,
    pub directories: u64,
    pub total_bytes: u64,
    /// File count per lowercase extension
    pub extensions: BTreeMap<String, u64>,
    /// Relative file paths, sorted
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub entries: Vec<String>,
}

impl Topology {
    /// Extensions ordered by descending count, then name
    pub fn top_extensions(&self, limit: usize) -> Vec<(&str, u64)> {
        let mut ranked: Vec<(&str, u64)> = self
            .extensions
            .iter()
            .map(|(ext, count)| (ext.as_str(), *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        ranked.truncate(limit);
        ranked
    }
}

/// Cheap fingerprint of `root` for change detection (first 12 hex chars)
///
/// Hashes the names, sizes and modification times of the root's immediate
/// entries without descending. Adding, removing or touching a top-level
/// entry changes it; edits deeper in the tree only show up once they bump a
/// top-level directory's mtime.
pub fn source_fingerprint(root: &Path, options: &ScanOptions) -> HandleResult<String> {
    let entries = fs::read_dir(root)
        .map_err(|e| HandleError::io(format!("reading directory {}", root.display()), e))?;

    let mut listing = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| HandleError::io(format!("reading entry in {}", root.display()), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !options.include_hidden && name.starts_with('.') {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|e| HandleError::io(format!("reading metadata for {}", name), e))?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        listing.push((name, metadata.len(), modified));
    }
    listing.sort();

    let mut hasher = Sha256::new();
    for (name, len, modified) in &listing {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(len.to_le_bytes());
        hasher.update(modified.to_le_bytes());
    }
    let result = hasher.finalize();
    Ok(hex::encode(&result[..6]))
}

/// Scan `root` on the blocking pool
pub async fn scan(root: PathBuf, options: ScanOptions) -> HandleResult<Topology> {
    tokio::task::spawn_blocking(move || scan_blocking(&root, &options))
        .await
        .map_err(|e| HandleError::Internal(format!("scan task failed: {}", e)))?
}

/// Scan `root` synchronously
pub fn scan_blocking(root: &Path, options: &ScanOptions) -> HandleResult<Topology> {
    if !root.is_dir() {
        return Err(HandleError::PathNotFound(root.to_path_buf()));
    }

    let mut topology = Topology {
        root: root.to_path_buf(),
        files: 0,
        directories: 0,
        total_bytes: 0,
        extensions: BTreeMap::new(),
        entries: Vec::new(),
    };
    walk(root, root, 0, options, &mut topology)?;
    topology.entries.sort();

    debug!(
        "Scanned {}: {} files, {} directories",
        root.display(),
        topology.files,
        topology.directories
    );
    Ok(topology)
}

fn walk(
    root: &Path,
    dir: &Path,
    depth: usize,
    options: &ScanOptions,
    topology: &mut Topology,
) -> HandleResult<()> {
    let entries = fs::read_dir(dir)
        .map_err(|e| HandleError::io(format!("reading directory {}", dir.display()), e))?;

    for entry in entries {
        let entry =
            entry.map_err(|e| HandleError::io(format!("reading entry in {}", dir.display()), e))?;
        let name = entry.file_name();
        if !options.include_hidden && name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| HandleError::io(format!("inspecting {}", path.display()), e))?;

        if file_type.is_dir() {
            topology.directories += 1;
            if options.max_depth.is_none_or(|max| depth < max) {
                walk(root, &path, depth + 1, options, topology)?;
            }
        } else if file_type.is_file() {
            let size = entry
                .metadata()
                .map_err(|e| HandleError::io(format!("reading metadata for {}", path.display()), e))?
                .len();
            topology.files += 1;
            topology.total_bytes += size;

            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_else(|| NO_EXTENSION.to_string());
            *topology.extensions.entry(ext).or_insert(0) += 1;

            let relative = path.strip_prefix(root).unwrap_or(&path);
            topology
                .entries
                .push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}
