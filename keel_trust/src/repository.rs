//! Signed metadata and target blobs on top of a [`Store`].

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use keel_core::{Metadata, Role, Root, Signed, Snapshot, Store, Targets, Timestamp, is_not_found};
use tracing::{debug, warn};

use crate::error::{PersistContext, TrustError, TrustResult};
use crate::keys::{KeyRing, KeyStore, RetiredKey};

const TARGETS_DIR: &str = "targets";

/// Everything `load_repository` could reconstruct.
#[derive(Debug)]
pub struct LoadedRepository {
    pub root: Signed<Root>,
    pub targets: Option<Signed<Targets>>,
    pub snapshot: Option<Signed<Snapshot>>,
    pub timestamp: Option<Signed<Timestamp>>,
    pub keys: KeyRing,
    pub retired: Vec<RetiredKey>,
}

#[derive(Debug, Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
}

impl Repository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Writes `signed` as indented JSON at `name`.
    pub async fn save_meta_file<T: Metadata>(&self, name: &str, signed: &Signed<T>) -> TrustResult<()> {
        let json = signed
            .to_json_pretty()
            .persist_context(|| format!("serializing {name}"))?;
        self.store
            .put_bytes(name, Bytes::from(json))
            .await
            .persist_context(|| format!("writing {name}"))?;
        debug!(name, version = signed.signed.version(), "saved metadata");
        Ok(())
    }

    /// Parses `name`, `None` if absent. The `_type` tag must match `T`.
    pub async fn load_meta_file<T: Metadata>(&self, name: &str) -> TrustResult<Option<Signed<T>>> {
        let bytes = match self.store.read_bytes(name).await {
            Ok(bytes) => bytes,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(TrustError::persistence(format!("reading {name}"), e)),
        };
        let signed: Signed<T> =
            Signed::from_slice(&bytes).persist_context(|| format!("parsing {name}"))?;
        let expected = keel_core::MetadataKind::from(T::ROLE);
        if signed.signed.kind() != expected {
            return Err(TrustError::persistence(
                format!("parsing {name}"),
                anyhow::anyhow!("expected _type {expected:?}, found {:?}", signed.signed.kind()),
            ));
        }
        Ok(Some(signed))
    }

    /// Raw signed bytes of a metadata file, as clients would fetch them.
    pub async fn raw_meta(&self, name: &str) -> TrustResult<Bytes> {
        match self.store.read_bytes(name).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if is_not_found(&e) => Err(TrustError::not_found("metadata", name)),
            Err(e) => Err(TrustError::persistence(format!("reading {name}"), e)),
        }
    }

    /// Deletes every `<version>.<role>.json` copy, returning how many.
    pub async fn remove_versioned_meta(&self) -> TrustResult<usize> {
        let mut paths = self
            .store
            .list()
            .await
            .persist_context(|| "listing repository")?;
        let mut stale = Vec::new();
        while let Some(path) = paths.next().await {
            let path = path.persist_context(|| "listing repository")?;
            if is_versioned_meta(&path) {
                stale.push(path);
            }
        }
        for path in &stale {
            self.store
                .delete(path)
                .await
                .persist_context(|| format!("deleting {path}"))?;
        }
        Ok(stale.len())
    }

    fn target_path(name: &str) -> String {
        format!("{TARGETS_DIR}/{name}")
    }

    pub async fn put_target(&self, name: &str, data: Bytes) -> TrustResult<()> {
        self.store
            .put_bytes(&Self::target_path(name), data)
            .await
            .persist_context(|| format!("writing target {name}"))
    }

    /// Best-effort delete; a missing file is not an error.
    pub async fn delete_target(&self, name: &str) {
        if let Err(e) = self.store.delete(&Self::target_path(name)).await {
            warn!(name, error = %e, "failed to delete target file");
        }
    }

    /// Reconstructs the repository from disk.
    ///
    /// Only a missing or unreadable root is fatal. Any other tier that
    /// cannot be read comes back as `None`, which leaves the manager
    /// uninitialized until the repository is initialized again. Private keys are loaded
    /// for every role and delegated role; a key the metadata does not list
    /// is skipped.
    pub async fn load_repository(&self, keystore: &KeyStore) -> TrustResult<LoadedRepository> {
        let root: Signed<Root> = match self.load_meta_file(Role::Root.filename()).await {
            Ok(Some(root)) => root,
            Ok(None) => return Err(TrustError::TrustAnchor("root.json is missing".into())),
            Err(e) => return Err(TrustError::TrustAnchor(e.to_string())),
        };
        let targets = self.load_tier::<Targets>().await;
        let snapshot = self.load_tier::<Snapshot>().await;
        let timestamp = self.load_tier::<Timestamp>().await;

        let mut keys = KeyRing::new();
        for (role, role_keys) in &root.signed.roles {
            for key in load_keys_or_warn(keystore, role).await {
                if role_keys.keyids.iter().any(|id| id == key.id()) {
                    keys.insert(key);
                } else {
                    warn!(role = %role, key_id = key.id(), "key is not listed in root, skipping");
                }
            }
        }

        if let Some(targets) = &targets {
            for delegated in targets.signed.delegated_roles() {
                for key in load_keys_or_warn(keystore, &delegated.name).await {
                    if delegated.keyids.iter().any(|id| id == key.id()) {
                        keys.insert(key);
                    } else {
                        warn!(
                            delegation = %delegated.name,
                            key_id = key.id(),
                            "key is not listed for delegation, skipping"
                        );
                    }
                }
            }
        }

        let schedule = keystore.load_retired_schedule().await.unwrap_or_else(|e| {
            warn!(error = %e, "unreadable retirement schedule, ignoring retired keys");
            Vec::new()
        });
        let mut retired = Vec::new();
        for entry in schedule {
            if !root.signed.keys.contains_key(&entry.keyid) {
                warn!(key_id = %entry.keyid, "retired key no longer in root, skipping");
                continue;
            }
            match keystore.load_retired_key(&entry).await {
                Ok(Some(key)) => {
                    keys.insert(key);
                    retired.push(entry);
                }
                Ok(None) => warn!(key_id = %entry.keyid, "retired key file missing, skipping"),
                Err(e) => warn!(key_id = %entry.keyid, error = %e, "unreadable retired key, skipping"),
            }
        }

        debug!(
            root_version = root.signed.version,
            keys = keys.len(),
            retired = retired.len(),
            "loaded repository"
        );
        Ok(LoadedRepository {
            root,
            targets,
            snapshot,
            timestamp,
            keys,
            retired,
        })
    }

    async fn load_tier<T: Metadata>(&self) -> Option<Signed<T>> {
        let name = T::ROLE.filename();
        match self.load_meta_file::<T>(name).await {
            Ok(Some(tier)) => Some(tier),
            Ok(None) => {
                warn!(name, "metadata file missing");
                None
            }
            Err(e) => {
                warn!(name, error = %e, "unreadable metadata file, ignoring it");
                None
            }
        }
    }
}

async fn load_keys_or_warn(keystore: &KeyStore, role: &str) -> Vec<crate::keys::Key> {
    match keystore.load_role_keys(role).await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(role, error = %e, "unreadable key files, continuing without them");
            Vec::new()
        }
    }
}

fn is_versioned_meta(path: &str) -> bool {
    let Some((version, rest)) = path.split_once('.') else {
        return false;
    };
    !version.is_empty()
        && version.bytes().all(|b| b.is_ascii_digit())
        && Role::ALL.iter().any(|role| role.filename() == rest)
}
