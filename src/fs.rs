//! File system abstraction for testability.

use async_trait::async_trait;
use std::path::Path;

/// Abstraction over the file operations a transfer needs.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Creates all directories in the given path.
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Opens a file for appending, creating it if missing.
    async fn open_append(&self, path: &Path) -> std::io::Result<tokio::fs::File>;
}

/// Default file system implementation using `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    /// Creates a new `TokioFileSystem` instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn open_append(&self, path: &Path) -> std::io::Result<tokio::fs::File> {
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn tokio_fs_create_dir_all() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/c");

        let fs = TokioFileSystem::new();
        fs.create_dir_all(&nested).await.unwrap();
        assert!(nested.exists());
    }

    #[tokio::test]
    async fn tokio_fs_open_append_keeps_existing_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("part.bin");
        std::fs::write(&path, b"hello").unwrap();

        let fs = TokioFileSystem::new();
        let mut file = fs.open_append(&path).await.unwrap();
        assert_eq!(file.metadata().await.unwrap().len(), 5);
        file.write_all(b" world").await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn tokio_fs_open_append_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.bin");

        let fs = TokioFileSystem::new();
        let file = fs.open_append(&path).await.unwrap();
        assert_eq!(file.metadata().await.unwrap().len(), 0);
        assert!(path.exists());
    }
}
