use std::path::PathBuf;

use keel_core::TargetMismatch;

pub type TrustResult<T> = std::result::Result<T, TrustError>;

/// Everything a trust operation can fail with.
///
/// None of these are fatal to the host process; callers reject the
/// operation that triggered them.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum TrustError {
    #[error("configuration error at {path:?}: {reason}")]
    Configuration { path: PathBuf, reason: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("integrity check failed for target {name}: {mismatch}")]
    Integrity {
        name: String,
        mismatch: TargetMismatch,
    },

    #[error("persistence error while {context}: {source:#}")]
    Persistence {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("key {key_id} failed to sign: {reason}")]
    Signing { key_id: String, reason: String },

    #[error("trust anchor unavailable: {0}")]
    TrustAnchor(String),

    #[error("{role} has {valid} valid signatures, threshold is {threshold}")]
    ThresholdNotMet {
        role: String,
        valid: usize,
        threshold: u32,
    },

    #[error("repository is not initialized")]
    NotInitialized,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TrustError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        TrustError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn persistence(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        TrustError::Persistence {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TrustError::NotFound { .. })
    }
}

/// Attaches a persistence context to fallible storage calls.
pub(crate) trait PersistContext<T> {
    fn persist_context<C, F>(self, f: F) -> TrustResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> PersistContext<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn persist_context<C, F>(self, f: F) -> TrustResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| TrustError::persistence(f(), e))
    }
}
