use crate::error::AppError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Named byte blobs under a single root.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Creates or overwrites the blob.
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), AppError>;
    /// Path of an existing blob, for streaming it back out.
    /// Fails with `NotFound` when the blob does not exist.
    async fn locate(&self, name: &str) -> Result<PathBuf, AppError>;
    /// Fails with `NotFound` when the blob does not exist.
    async fn remove(&self, name: &str) -> Result<(), AppError>;
}

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn ensure_root(&self) -> Result<(), AppError> {
        tokio::fs::create_dir_all(&self.root).await?;
        log::debug!("Blob directory ready at {:?}", self.root);
        Ok(())
    }

    /// Resolves `name` under the root. Only a single plain file name is accepted.
    fn path(&self, name: &str) -> Result<PathBuf, AppError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(file)), None) => Ok(self.root.join(file)),
            _ => {
                log::debug!("Rejected blob name {:?}", name);
                Err(AppError::NotFound("Image not found".into()))
            }
        }
    }
}

/// Maps a missing file to `NotFound`; other I/O failures stay `Io`.
pub fn not_found_or(e: std::io::Error) -> AppError {
    if e.kind() == ErrorKind::NotFound {
        AppError::NotFound("Image not found".into())
    } else {
        AppError::Io(e)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), AppError> {
        let path = self.path(name)?;
        log::trace!("Writing {} bytes to {:?}", bytes.len(), path);
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn locate(&self, name: &str) -> Result<PathBuf, AppError> {
        let path = self.path(name)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(not_found_or)?;
        if !metadata.is_file() {
            return Err(AppError::NotFound("Image not found".into()));
        }
        log::trace!("Located blob {:?}", path);
        Ok(path)
    }

    async fn remove(&self, name: &str) -> Result<(), AppError> {
        let path = self.path(name)?;
        log::trace!("Removing blob {:?}", path);
        tokio::fs::remove_file(&path).await.map_err(not_found_or)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_locate_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.write("a.png", b"\x89PNG").await.unwrap();
        let path = store.locate("a.png").await.unwrap();
        assert_eq!(path, dir.path().join("a.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"\x89PNG");

        store.write("a.png", b"new").await.unwrap();
        assert_eq!(std::fs::read(store.locate("a.png").await.unwrap()).unwrap(), b"new");

        store.remove("a.png").await.unwrap();
        assert!(matches!(store.locate("a.png").await, Err(AppError::NotFound(_))));
        assert!(matches!(store.remove("a.png").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn names_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().join("images"));
        store.ensure_root().await.unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("images").join("sub")).unwrap();

        for name in ["../secret.txt", "/etc/passwd", "..", "sub/a.png", ""] {
            assert!(matches!(store.locate(name).await, Err(AppError::NotFound(_))), "{}", name);
            assert!(matches!(store.write(name, b"y").await, Err(AppError::NotFound(_))), "{}", name);
        }
        assert_eq!(std::fs::read(dir.path().join("secret.txt")).unwrap(), b"x");
        // Directories are not blobs.
        assert!(matches!(store.locate("sub").await, Err(AppError::NotFound(_))));
    }
}
