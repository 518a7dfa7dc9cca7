use std::path::Path;

use crate::error::{AgentError, Result};

/// List the schedule entries in `dir`, sorted by name.
///
/// Only regular files count (symlinks are followed); subdirectories and
/// anything else are ignored. Names that are not valid UTF-8 are skipped.
pub async fn list_entries(dir: &Path) -> Result<Vec<String>> {
    let discovery_err = |source| AgentError::Discovery {
        dir: dir.to_path_buf(),
        source,
    };

    let mut read_dir = tokio::fs::read_dir(dir).await.map_err(discovery_err)?;
    let mut entries = Vec::new();

    while let Some(entry) = read_dir.next_entry().await.map_err(discovery_err)? {
        let path = entry.path();
        let is_file = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.is_file(),
            Err(e) => {
                // Dangling symlink or entry removed since listing
                tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                false
            }
        };
        if !is_file {
            continue;
        }

        match entry.file_name().into_string() {
            Ok(name) => entries.push(name),
            Err(name) => {
                tracing::warn!(name = ?name, "Skipping entry with non UTF-8 name");
            }
        }
    }

    entries.sort();
    Ok(entries)
}
