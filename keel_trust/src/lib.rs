//! Signed trust metadata for keel repositories.
//!
//! A repository is described by four signed JSON documents:
//!
//! - `root.json` lists every top-level key and which role each belongs to,
//! - `targets.json` records the length and SHA-256 of every target file,
//! - `snapshot.json` pins the current version and hash of `targets.json`,
//! - `timestamp.json` pins `snapshot.json` and expires soonest.
//!
//! [`TrustManager`] is the entry point. It keeps the documents in memory,
//! re-signs them on every change and writes them back through a
//! [`keel_core::Store`]. Private keys live in a [`KeyStore`] directory.
//!
//! ```no_run
//! # async fn demo() -> keel_trust::TrustResult<()> {
//! use keel_trust::{TrustConfig, TrustManager};
//!
//! let manager = TrustManager::open(TrustConfig::in_dir("/var/lib/keel")).await?;
//! if !manager.is_initialized().await {
//!     manager.initialize().await?;
//! }
//! manager
//!     .add_target("app/image.tar", bytes::Bytes::from_static(b"hello"), None)
//!     .await?;
//! manager.verify_target("app/image.tar", b"hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod manager;
pub mod repository;
pub mod signer;
pub mod verify;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ExpiryConfig, Thresholds, TrustConfig};
pub use error::{TrustError, TrustResult};
pub use keys::{Key, KeyRing, KeyStore, RetiredKey};
pub use manager::{
    ExpiryWarning, KeyInfo, NewDelegation, RefreshReport, Status, TierStatus, TrustManager,
};
pub use repository::{LoadedRepository, Repository};
pub use signer::{SignOutcome, Signer, verify_signature};
pub use verify::{verify_role, verify_threshold};
