//! Directory listing for the root picker

use std::path::Path;

use pt_core::DirectoryEntry;

use crate::error::ListError;

/// List the entries of `path`, sorted by name.
///
/// Entries whose metadata cannot be read are skipped.
pub async fn list_directory(path: &str) -> Result<Vec<DirectoryEntry>, ListError> {
    if path.trim().is_empty() {
        return Err(ListError::InvalidPath);
    }

    let read_err = |source| ListError::Read {
        path: path.to_string(),
        source,
    };
    let mut dir = tokio::fs::read_dir(Path::new(path)).await.map_err(read_err)?;

    let mut entries = Vec::new();
    while let Some(entry) = dir.next_entry().await.map_err(read_err)? {
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!("Skipping {:?}: {}", entry.path(), e);
                continue;
            }
        };
        entries.push(DirectoryEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            mod_time: metadata
                .modified()
                .map(pt_core::time::system_time_rfc3339)
                .unwrap_or_default(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lists_sorted_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("a.html"), b"<p>").unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();

        let entries = list_directory(dir.path().to_str().unwrap()).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.html", "assets", "b.txt"]);

        let file = entries.iter().find(|e| e.name == "b.txt").unwrap();
        assert!(!file.is_dir);
        assert_eq!(file.size, 5);
        assert!(file.mod_time.ends_with('Z'));

        assert!(entries.iter().find(|e| e.name == "assets").unwrap().is_dir);
    }

    #[tokio::test]
    async fn test_empty_path_is_invalid() {
        let err = list_directory("  ").await.unwrap_err();
        assert!(matches!(err, ListError::InvalidPath));
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = list_directory(missing.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, ListError::Read { .. }));
    }

    #[tokio::test]
    async fn test_file_is_not_listable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"x").unwrap();
        let err = list_directory(file.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, ListError::Read { .. }));
    }
}
