//! Building upload items from the local filesystem.
//!
//! Directory scans map relative paths (normalized to forward slashes) under
//! a target prefix. An explicit file list maps each file to
//! `<prefix>/<file name>`.

use std::path::{Path, PathBuf};

use crate::error::UploadError;
use crate::types::UploadItem;

/// Target prefix used when the caller gives none.
pub const DEFAULT_TARGET_PREFIX: &str = "/assets";

/// Scans a directory recursively and returns one item per regular file.
///
/// Items are sorted by target path so batches are reproducible.
pub fn scan_items(root: &Path, prefix: &str) -> Result<Vec<UploadItem>, UploadError> {
    let mut items = Vec::new();
    walk_dir(root, root, prefix, &mut items)?;
    items.sort_by(|a, b| a.target_path.cmp(&b.target_path));
    Ok(items)
}

/// Builds items for an explicit list of files.
///
/// Fails on the first path that is not a readable regular file.
pub fn items_from_paths(paths: &[PathBuf], prefix: &str) -> Result<Vec<UploadItem>, UploadError> {
    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )
            .into());
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("path has no file name: {}", path.display()),
                )
            })?;
        items.push(UploadItem::from_file(
            path.clone(),
            join_target(prefix, &name),
            metadata.len(),
        ));
    }
    Ok(items)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    prefix: &str,
    items: &mut Vec<UploadItem>,
) -> Result<(), UploadError> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            walk_dir(root, &path, prefix, items)?;
        } else if metadata.is_file() {
            let rel_path = path.strip_prefix(root).map_err(std::io::Error::other)?;
            // Normalize to forward slashes.
            let rel_str = rel_path.to_string_lossy().replace('\\', "/");
            items.push(UploadItem::from_file(
                path.clone(),
                join_target(prefix, &rel_str),
                metadata.len(),
            ));
        }
    }
    Ok(())
}

fn join_target(prefix: &str, rel: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    format!("{prefix}/{rel}")
}
