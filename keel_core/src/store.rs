use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

pub type StoreResult<T, E = anyhow::Error> = std::result::Result<T, E>;

/// Boxed stream of object paths returned by [`Store::list`].
pub type PathStream = Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>;

/// Errors a backend reports in a form callers can match on.
///
/// Backends wrap these in `anyhow::Error`; use
/// `err.downcast_ref::<StoreError>()` to inspect them.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Returns true if `err` is a [`StoreError::NotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<StoreError>(), Some(StoreError::NotFound(_)))
}

/// Flat, path-addressed object storage backing a repository.
///
/// Paths are relative, `/`-separated and never contain `..`.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync + 'static {
    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Replaces the object at `path`. Readers observe either the old or the
    /// new content, never a partial write.
    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()>;

    /// Reads the whole object. Missing objects yield [`StoreError::NotFound`].
    async fn read_bytes(&self, path: &str) -> StoreResult<Bytes>;

    async fn list(&self) -> StoreResult<PathStream>;

    /// Deletes the object. Deleting a missing object succeeds.
    async fn delete(&self, path: &str) -> StoreResult<()>;
}
