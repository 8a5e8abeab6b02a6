use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Data directory not found: {path}")]
    NotFound { path: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recursively collect every file under `root` whose extension matches
/// `extension` (case-insensitive, without the leading dot).
///
/// Paths are absolute and sorted lexicographically so repeated runs visit
/// files in the same order. An empty directory yields an empty list.
pub fn find_data_files(root: &Path, extension: &str) -> Result<Vec<PathBuf>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotFound {
            path: root.display().to_string(),
        });
    }
    let root = std::fs::canonicalize(root)?;
    let wanted = extension.trim_start_matches('.').to_lowercase();

    let mut files = Vec::new();
    for entry in WalkDir::new(&root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if ext == wanted {
            files.push(entry.into_path());
        }
    }

    files.sort();
    log::debug!("Found {} .{} files under {}", files.len(), wanted, root.display());
    Ok(files)
}
