use anyhow::Context;
use bytes::Bytes;
use futures::StreamExt;
use keel_core::store::{PathStream, StoreError, StoreResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// A [`keel_core::Store`] rooted at a directory.
///
/// Every write lands in a temp file in the destination directory, is
/// fsynced and then renamed over the target path.
#[derive(Debug, Clone)]
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalStore {
            base_path: base_path.into(),
        }
    }

    fn resolve_path(&self, path: &str) -> StoreResult<PathBuf> {
        if path.is_empty()
            || path.starts_with('/')
            || path.contains('\\')
            || path.split('/').any(|c| c.is_empty() || c == "." || c == "..")
        {
            return Err(StoreError::InvalidPath(path.to_owned()).into());
        }
        Ok(self.base_path.join(path))
    }
}

fn not_found_as_store_error(err: std::io::Error, path: &str) -> anyhow::Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(path.to_owned()).into()
    } else {
        err.into()
    }
}

/// Writes `bytes` to `full_path` via a synced temp file and rename.
fn write_atomic(full_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent_dir = full_path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not find parent directory",
        )
    })?;
    std::fs::create_dir_all(parent_dir)?;
    let mut temp_file = NamedTempFile::new_in(parent_dir)?;
    temp_file.write_all(bytes)?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(full_path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait::async_trait]
impl keel_core::store::Store for LocalStore {
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let full_path = self.resolve_path(path)?;
        tokio::fs::try_exists(&full_path).await.map_err(Into::into)
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        let full_path = self.resolve_path(path)?;
        tracing::debug!(path, len = bytes.len(), "local store: write");
        tokio::task::spawn_blocking(move || write_atomic(&full_path, &bytes))
            .await
            .context("write task panicked")??;
        Ok(())
    }

    async fn read_bytes(&self, path: &str) -> StoreResult<Bytes> {
        let full_path = self.resolve_path(path)?;
        let bytes = tokio::fs::read(&full_path)
            .await
            .map_err(|e| not_found_as_store_error(e, path))?;
        Ok(Bytes::from(bytes))
    }

    async fn list(&self) -> StoreResult<PathStream> {
        let base_path = self.base_path.clone();
        let walker = WalkDir::new(&base_path).into_iter();
        let stream = futures::stream::iter(walker).filter_map(move |entry| {
            futures::future::ready(match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    match entry.path().strip_prefix(&base_path) {
                        Ok(relative) => Some(Ok(relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/"))),
                        Err(e) => Some(Err(std::io::Error::other(e))),
                    }
                }
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
        });

        Ok(Box::new(stream))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let full_path = self.resolve_path(path)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
