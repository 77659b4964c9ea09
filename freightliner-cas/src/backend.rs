use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Durable tier behind the in-memory cache. Implementations may be filesystem-backed,
/// object-store-backed, or the no-op null backend used when no durable tier is wanted.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn put(&self, digest: &str, data: Bytes) -> Result<()>;
    async fn get(&self, digest: &str) -> Result<Bytes>;
    async fn exists(&self, digest: &str) -> Result<bool>;
    async fn delete(&self, digest: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<String>>;
}

/// Stores each blob as a file named after its digest (with `:` replaced, since it's not
/// a valid path separator-free character on every filesystem) under `root`.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, digest: &str) -> PathBuf {
        self.root.join(digest.replace(':', "_"))
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn put(&self, digest: &str, data: Bytes) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| Error::Backend(Box::new(e)))?;
        let path = self.path_for(digest);
        let tmp = path.with_extension("tmp");
        let mut f = fs::File::create(&tmp).await.map_err(|e| Error::Backend(Box::new(e)))?;
        f.write_all(&data).await.map_err(|e| Error::Backend(Box::new(e)))?;
        f.flush().await.map_err(|e| Error::Backend(Box::new(e)))?;
        fs::rename(&tmp, &path).await.map_err(|e| Error::Backend(Box::new(e)))?;
        Ok(())
    }

    async fn get(&self, digest: &str) -> Result<Bytes> {
        match fs::read(self.path_for(digest)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound { digest: digest.to_string() }),
            Err(e) => Err(Error::Backend(Box::new(e))),
        }
    }

    async fn exists(&self, digest: &str) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(digest)).await.map_err(|e| Error::Backend(Box::new(e)))?)
    }

    async fn delete(&self, digest: &str) -> Result<()> {
        match fs::remove_file(self.path_for(digest)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Backend(Box::new(e))),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Backend(Box::new(e))),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::Backend(Box::new(e)))? {
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(".tmp") {
                    out.push(name.replace('_', ":"));
                }
            }
        }
        Ok(out)
    }
}

/// Discards everything. Useful when the CAS should only ever serve its memory tier.
#[derive(Default)]
pub struct NullBackend;

#[async_trait]
impl StorageBackend for NullBackend {
    async fn put(&self, _digest: &str, _data: Bytes) -> Result<()> {
        Ok(())
    }

    async fn get(&self, digest: &str) -> Result<Bytes> {
        Err(Error::NotFound { digest: digest.to_string() })
    }

    async fn exists(&self, _digest: &str) -> Result<bool> {
        Ok(false)
    }

    async fn delete(&self, _digest: &str) -> Result<()> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        backend.put("sha256:abc", Bytes::from_static(b"hello")).await.unwrap();
        assert!(backend.exists("sha256:abc").await.unwrap());
        assert_eq!(backend.get("sha256:abc").await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(backend.list().await.unwrap(), vec!["sha256:abc".to_string()]);
        backend.delete("sha256:abc").await.unwrap();
        assert!(!backend.exists("sha256:abc").await.unwrap());
    }

    #[tokio::test]
    async fn fs_backend_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let err = backend.get("sha256:missing").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn null_backend_never_has_anything() {
        let backend = NullBackend;
        backend.put("sha256:abc", Bytes::from_static(b"x")).await.unwrap();
        assert!(!backend.exists("sha256:abc").await.unwrap());
        assert!(backend.get("sha256:abc").await.is_err());
    }
}
