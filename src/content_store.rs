//! Content-addressed file storage.
//!
//! Fetched raw files are written under a configured root directory, keyed
//! by their content hash. The extract stage reads them back by the same
//! key, so the store never needs a listing operation.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, sha_hash: &str) -> PathBuf {
        self.root.join(sha_hash)
    }

    pub async fn write(&self, sha_hash: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create content dir {}", self.root.display()))?;
        let path = self.path_for(sha_hash);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub async fn read(&self, sha_hash: &str) -> Result<Vec<u8>> {
        let path = self.path_for(sha_hash);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ContentStore::new(tmp.path().join("content"));

        store.write("deadbeef", b"API_KEY=hunter2").await.unwrap();
        let bytes = store.read("deadbeef").await.unwrap();
        assert_eq!(bytes, b"API_KEY=hunter2");
    }

    #[tokio::test]
    async fn test_read_missing_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ContentStore::new(tmp.path());
        assert!(store.read("cafebabe").await.is_err());
    }
}
