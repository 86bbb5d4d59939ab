//! The metadata manager.
//!
//! [`TrustManager`] owns the in-memory copy of the four signed documents
//! and the loaded keys. Every mutation follows the same path:
//!
//! 1. copy the current payloads into a [`Draft`] and edit it,
//! 2. sign every changed document and check its threshold ([`TrustManager::seal`]),
//! 3. write the changed documents in root, targets, snapshot, timestamp
//!    order ([`TrustManager::publish`]).
//!
//! Nothing is written unless step 2 succeeds for every document. If a
//! write fails part way, memory keeps the previous documents and disk holds
//! whatever landed; [`TrustManager::reload`] adopts the disk state and the
//! next successful mutation rewrites the whole chain.

mod delegation;
mod refresh;
mod rotation;
mod status;
mod targets;

pub use delegation::NewDelegation;
pub use refresh::{ExpiryWarning, RefreshReport};
pub use status::{KeyInfo, Status, TierStatus};

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use keel_core::{
    Metadata, Role, RoleKeys, Root, Signed, Snapshot, Store, Targets, Timestamp, expiry_from,
};
use keel_store_local::LocalStore;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::TrustConfig;
use crate::error::{PersistContext, TrustError, TrustResult};
use crate::keys::{Key, KeyRing, KeyStore, RetiredKey};
use crate::repository::{LoadedRepository, Repository};
use crate::signer::Signer;
use crate::verify::verify_role;

/// The four current signed documents.
#[derive(Debug, Clone)]
struct Tiers {
    root: Signed<Root>,
    targets: Signed<Targets>,
    snapshot: Signed<Snapshot>,
    timestamp: Signed<Timestamp>,
}

#[derive(Debug, Default)]
struct TrustState {
    tiers: Option<Tiers>,
    keys: KeyRing,
    retired: Vec<RetiredKey>,
}

impl TrustState {
    fn tiers(&self) -> TrustResult<&Tiers> {
        self.tiers.as_ref().ok_or(TrustError::NotInitialized)
    }
}

impl From<LoadedRepository> for TrustState {
    fn from(loaded: LoadedRepository) -> Self {
        let tiers = match (loaded.targets, loaded.snapshot, loaded.timestamp) {
            (Some(targets), Some(snapshot), Some(timestamp)) => Some(Tiers {
                root: loaded.root,
                targets,
                snapshot,
                timestamp,
            }),
            _ => {
                warn!("repository is incomplete, initialize it before mutating");
                None
            }
        };
        Self {
            tiers,
            keys: loaded.keys,
            retired: loaded.retired,
        }
    }
}

/// Which documents a draft changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Dirty {
    root: bool,
    targets: bool,
    snapshot: bool,
    timestamp: bool,
}

impl Dirty {
    const ALL: Dirty = Dirty {
        root: true,
        targets: true,
        snapshot: true,
        timestamp: true,
    };

    fn is_clean(&self) -> bool {
        *self == Dirty::default()
    }
}

/// Unsigned working copy of the four payloads.
#[derive(Debug)]
struct Draft {
    root: Root,
    targets: Targets,
    snapshot: Snapshot,
    timestamp: Timestamp,
    dirty: Dirty,
}

impl Draft {
    fn new(tiers: &Tiers) -> Self {
        Self {
            root: tiers.root.signed.clone(),
            targets: tiers.targets.signed.clone(),
            snapshot: tiers.snapshot.signed.clone(),
            timestamp: tiers.timestamp.signed.clone(),
            dirty: Dirty::default(),
        }
    }

    fn bump_root(&mut self, expires: DateTime<Utc>) {
        self.root.bump(expires);
        self.dirty.root = true;
    }

    fn bump_targets(&mut self, expires: DateTime<Utc>) {
        self.targets.bump(expires);
        self.dirty.targets = true;
    }

    /// Re-points snapshot at the current targets and timestamp at the new
    /// snapshot, bumping both.
    fn update_snapshot_and_timestamp(
        &mut self,
        snapshot_expires: DateTime<Utc>,
        timestamp_expires: DateTime<Utc>,
    ) -> TrustResult<()> {
        self.snapshot
            .record_targets(&self.targets)
            .persist_context(|| "hashing targets")?;
        self.snapshot.bump(snapshot_expires);
        self.dirty.snapshot = true;
        self.refresh_timestamp(timestamp_expires)
    }

    fn refresh_timestamp(&mut self, expires: DateTime<Utc>) -> TrustResult<()> {
        self.timestamp
            .record_snapshot(&self.snapshot)
            .persist_context(|| "hashing snapshot")?;
        self.timestamp.bump(expires);
        self.dirty.timestamp = true;
        Ok(())
    }
}

/// Signed documents ready to be written.
#[derive(Debug)]
struct Sealed {
    tiers: Tiers,
    dirty: Dirty,
}

/// Issues and maintains the signed metadata of one repository.
#[derive(Debug)]
pub struct TrustManager {
    config: TrustConfig,
    repo: Repository,
    keystore: KeyStore,
    clock: Arc<dyn Clock>,
    state: RwLock<TrustState>,
}

impl TrustManager {
    /// Opens the repository described by `config` on the local filesystem,
    /// creating its directories if needed.
    ///
    /// A missing `root.json` is not an error: the manager comes up
    /// uninitialized and waits for [`TrustManager::initialize`].
    pub async fn open(config: TrustConfig) -> TrustResult<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.repository_path)
            .await
            .map_err(|e| TrustError::Configuration {
                path: config.repository_path.clone(),
                reason: format!("creating repository directory: {e}"),
            })?;
        let store = Arc::new(LocalStore::new(&config.repository_path));
        Self::with_store(config, store, Arc::new(SystemClock)).await
    }

    /// Like [`TrustManager::open`] with an explicit metadata store and clock.
    pub async fn with_store(
        config: TrustConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> TrustResult<Self> {
        config.validate()?;
        let keystore = KeyStore::open(&config.keys_path).await?;
        let repo = Repository::new(store);
        let state = match repo.load_repository(&keystore).await {
            Ok(loaded) => TrustState::from(loaded),
            Err(TrustError::TrustAnchor(reason)) => {
                warn!(%reason, "no trust anchor yet, repository needs initialization");
                TrustState::default()
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            config,
            repo,
            keystore,
            clock,
            state: RwLock::new(state),
        })
    }

    pub fn config(&self) -> &TrustConfig {
        &self.config
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.tiers.is_some()
    }

    /// Re-reads metadata and keys from disk and replaces the in-memory
    /// state. On error the current state is kept.
    pub async fn reload(&self) -> TrustResult<()> {
        let mut state = self.state.write().await;
        let loaded = self.repo.load_repository(&self.keystore).await?;
        *state = TrustState::from(loaded);
        info!("reloaded repository");
        Ok(())
    }

    /// Creates a fresh repository at version 1 with new keys for every role.
    ///
    /// Destructive: any existing metadata, target entries, delegations and
    /// retired keys are replaced.
    pub async fn initialize(&self) -> TrustResult<()> {
        let mut state = self.state.write().await;

        let mut root = Root::new(self.expires(Role::Root), self.config.consistent_snapshot);
        let mut keys = KeyRing::new();
        let mut role_keys = Vec::with_capacity(Role::ALL.len());
        for role in Role::ALL {
            let threshold = self.config.threshold(role);
            let generated = generate_keys(role.as_str(), threshold)?;
            for key in &generated {
                root.keys.insert(key.id().to_owned(), key.public_metadata()?);
                keys.insert(key.clone());
            }
            root.roles.insert(
                role.as_str().to_owned(),
                RoleKeys {
                    keyids: generated.iter().map(|k| k.id().to_owned()).collect(),
                    threshold,
                },
            );
            role_keys.push((role, generated));
        }

        let targets = Targets::new(self.expires(Role::Targets));
        let mut snapshot = Snapshot::new(self.expires(Role::Snapshot));
        snapshot
            .record_targets(&targets)
            .persist_context(|| "hashing targets")?;
        let mut timestamp = Timestamp::new(self.expires(Role::Timestamp));
        timestamp
            .record_snapshot(&snapshot)
            .persist_context(|| "hashing snapshot")?;

        let draft = Draft {
            root,
            targets,
            snapshot,
            timestamp,
            dirty: Dirty::ALL,
        };
        let sealed = self.seal(&keys, None, draft)?;

        if let Some(previous) = state.tiers.take() {
            for delegated in previous.targets.signed.delegated_roles() {
                self.keystore.remove_role_keys(&delegated.name).await;
            }
            for name in previous.targets.signed.targets.keys() {
                self.repo.delete_target(name).await;
            }
        }
        let stale = self.repo.remove_versioned_meta().await?;
        if stale > 0 {
            debug!(stale, "removed versioned metadata from a previous repository");
        }
        self.keystore.clear_retired().await?;
        for (role, generated) in &role_keys {
            self.keystore.save_role_keys(role.as_str(), generated).await?;
        }

        state.retired.clear();
        self.publish(&mut state, sealed).await?;
        info!(keys = keys.len(), "initialized repository");
        state.keys = keys;
        Ok(())
    }

    /// Raw signed `root.json`.
    pub async fn root_metadata(&self) -> TrustResult<Bytes> {
        self.raw_metadata(Role::Root).await
    }

    pub async fn targets_metadata(&self) -> TrustResult<Bytes> {
        self.raw_metadata(Role::Targets).await
    }

    pub async fn snapshot_metadata(&self) -> TrustResult<Bytes> {
        self.raw_metadata(Role::Snapshot).await
    }

    pub async fn timestamp_metadata(&self) -> TrustResult<Bytes> {
        self.raw_metadata(Role::Timestamp).await
    }

    async fn raw_metadata(&self, role: Role) -> TrustResult<Bytes> {
        let _state = self.state.read().await;
        self.repo.raw_meta(role.filename()).await
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn expires(&self, role: Role) -> DateTime<Utc> {
        expiry_from(self.now(), self.config.window(role))
    }

    /// Signs every dirty document of `draft` and checks it meets its
    /// threshold. Clean documents are carried over from `previous`.
    fn seal(&self, keys: &KeyRing, previous: Option<&Tiers>, draft: Draft) -> TrustResult<Sealed> {
        let Draft {
            root,
            targets,
            snapshot,
            timestamp,
            dirty,
        } = draft;

        let root_signed = match previous {
            Some(prev) if !dirty.root => prev.root.clone(),
            _ => {
                let signed = sign_doc(keys, &root, root.clone())?;
                // a new root must also satisfy the root it replaces
                if let Some(prev) = previous {
                    verify_role(&prev.root.signed, &signed)?;
                }
                signed
            }
        };
        let tiers = Tiers {
            targets: reuse_or_sign(keys, &root, targets, dirty.targets, previous.map(|p| &p.targets))?,
            snapshot: reuse_or_sign(
                keys,
                &root,
                snapshot,
                dirty.snapshot,
                previous.map(|p| &p.snapshot),
            )?,
            timestamp: reuse_or_sign(
                keys,
                &root,
                timestamp,
                dirty.timestamp,
                previous.map(|p| &p.timestamp),
            )?,
            root: root_signed,
        };
        Ok(Sealed { tiers, dirty })
    }

    /// Writes the changed documents and adopts them as current state.
    async fn publish(&self, state: &mut TrustState, sealed: Sealed) -> TrustResult<()> {
        let Sealed { tiers, dirty } = sealed;
        let consistent = tiers.root.signed.consistent_snapshot;

        if dirty.root {
            self.write_tier(&tiers.root, true).await?;
        }
        if dirty.targets {
            self.write_tier(&tiers.targets, consistent).await?;
        }
        if dirty.snapshot {
            self.write_tier(&tiers.snapshot, consistent).await?;
        }
        if dirty.timestamp {
            self.write_tier(&tiers.timestamp, false).await?;
        }
        state.tiers = Some(tiers);
        Ok(())
    }

    async fn write_tier<T: Metadata>(&self, signed: &Signed<T>, versioned: bool) -> TrustResult<()> {
        let role = T::ROLE;
        self.repo.save_meta_file(role.filename(), signed).await?;
        if versioned {
            let name = role.versioned_filename(signed.signed.version());
            self.repo.save_meta_file(&name, signed).await?;
        }
        Ok(())
    }
}

fn generate_keys(role: &str, count: u32) -> TrustResult<Vec<Key>> {
    (0..count).map(|_| Key::generate(role)).collect()
}

fn sign_doc<T: Metadata>(keys: &KeyRing, root: &Root, doc: T) -> TrustResult<Signed<T>> {
    let role = T::ROLE;
    let bytes = doc
        .canonical_bytes()
        .persist_context(|| format!("serializing {role}"))?;
    let outcome = Signer::new(keys).sign(role.as_str(), &bytes);
    let signed = Signed {
        signatures: outcome.signatures,
        signed: doc,
    };
    verify_role(root, &signed)?;
    Ok(signed)
}

fn reuse_or_sign<T: Metadata>(
    keys: &KeyRing,
    root: &Root,
    doc: T,
    dirty: bool,
    previous: Option<&Signed<T>>,
) -> TrustResult<Signed<T>> {
    match previous {
        Some(prev) if !dirty => Ok(prev.clone()),
        _ => sign_doc(keys, root, doc),
    }
}
