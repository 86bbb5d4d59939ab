//! Core keel types and traits.
//!
//! This crate defines the shared types used by all keel crates.
//!
//! ## Wire types (stable)
//!
//! - SHA-256 content digests (`hash::Sha256Digest`)
//! - Role names (`role::Role`)
//! - The four signed metadata documents and their envelope
//!   (`metadata::Root`, `metadata::Targets`, `metadata::Snapshot`,
//!   `metadata::Timestamp`, `metadata::Signed`)
//!
//! These types are written to disk and handed to clients verbatim;
//! changes to them are format changes.
//!
//! ## Storage
//!
//! The [`Store`] trait abstracts the directory that holds a repository.
//! Implementations live in `keel_store_local` and `keel_store_memory`.

pub mod hash;
pub mod metadata;
pub mod role;
pub mod store;

// Test utilities (behind feature flag)
#[cfg(feature = "testutil")]
pub mod testutil;

pub use hash::Sha256Digest;
pub use metadata::{
    DelegatedRole, Delegations, Hashes, KeyId, KeyVal, MetaFile, Metadata, MetadataKind,
    PublicKey, Root, RoleKeys, Signature, Signed, Snapshot, TargetFile, TargetMismatch, Targets,
    Timestamp, expiry_from,
};
pub use role::Role;
pub use store::{PathStream, Store, StoreError, StoreResult, is_not_found};
