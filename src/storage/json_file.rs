use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use super::Storage;

/// JSON file-based storage implementation.
///
/// Each key maps to one file; `/` in a key becomes a directory level:
/// ```text
/// data/
///   options.json
///   {caller}/
///     {path...}.json
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    base_path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns true if the string is safe to use as a single path segment.
    pub fn is_path_safe(segment: &str) -> bool {
        if segment.is_empty() || segment == "." || segment == ".." {
            return false;
        }
        !segment.chars().any(|c| c == '\\' || c == '\0')
    }

    fn entry_file(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.base_path.clone();
        for segment in key.split('/') {
            if !Self::is_path_safe(segment) {
                anyhow::bail!("Invalid storage key {key:?}: unsafe path segment {segment:?}");
            }
            path.push(segment);
        }
        let mut file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        file_name.push(".json");
        path.set_file_name(file_name);
        Ok(path)
    }

    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for JsonFileStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_file(key)?;
        match fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.entry_file(key)?;
        self.ensure_dir(&path).await?;

        // Write-then-rename so a crash never leaves a truncated entry behind.
        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        fs::write(&staging, value)
            .await
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        fs::rename(&staging, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.entry_file(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}
