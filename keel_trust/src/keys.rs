//! Signing keys and their on-disk home.
//!
//! Every key is ECDSA P-256. Private keys are stored as SEC1 PEM, one file
//! per key, readable only by the owner:
//!
//! ```text
//! <keys>/<role>.key          first key of a role or delegation
//! <keys>/<role>.<i>.key      further keys when the threshold is above one
//! <keys>/retired/<id>.key    keys rotated out and waiting to be pruned
//! <keys>/retired.json        when each retired key may be pruned
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use keel_core::{KeyId, PublicKey, Sha256Digest};
use p256::ecdsa::SigningKey;
use p256::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PersistContext, TrustError, TrustResult};

const RETIRED_DIR: &str = "retired";
const RETIRED_SCHEDULE: &str = "retired.json";

/// A key pair, or just the public half, tagged with the roles it signs for.
#[derive(Clone)]
pub struct Key {
    id: KeyId,
    roles: BTreeSet<String>,
    public: p256::PublicKey,
    secret: Option<p256::SecretKey>,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("roles", &self.roles)
            .field("private", &self.secret.is_some())
            .finish()
    }
}

impl Key {
    /// Generates a fresh key pair tagged with `role`.
    pub fn generate(role: &str) -> TrustResult<Self> {
        let secret = p256::SecretKey::random(&mut OsRng);
        Self::from_secret(secret, role)
    }

    pub fn from_secret(secret: p256::SecretKey, role: &str) -> TrustResult<Self> {
        let public = secret.public_key();
        Ok(Self {
            id: key_id(&public)?,
            roles: BTreeSet::from([role.to_owned()]),
            public,
            secret: Some(secret),
        })
    }

    /// Parses a private key from SEC1 or PKCS#8 PEM.
    pub fn from_pem(pem: &str, role: &str) -> TrustResult<Self> {
        let secret = p256::SecretKey::from_sec1_pem(pem)
            .or_else(|_| p256::SecretKey::from_pkcs8_pem(pem))
            .map_err(|e| TrustError::InvalidInput(format!("unreadable {role} key: {e}")))?;
        Self::from_secret(secret, role)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn add_role(&mut self, role: impl Into<String>) {
        self.roles.insert(role.into());
    }

    pub fn has_private(&self) -> bool {
        self.secret.is_some()
    }

    pub(crate) fn signing_key(&self) -> Option<SigningKey> {
        self.secret.as_ref().map(SigningKey::from)
    }

    /// The form listed in root and delegations.
    pub fn public_metadata(&self) -> TrustResult<PublicKey> {
        let pem = self
            .public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| TrustError::Signing {
                key_id: self.id.clone(),
                reason: format!("encoding public key: {e}"),
            })?;
        Ok(PublicKey::ecdsa_p256(pem))
    }

    fn to_pem(&self) -> TrustResult<String> {
        let secret = self.secret.as_ref().ok_or_else(|| TrustError::Signing {
            key_id: self.id.clone(),
            reason: "no private key".into(),
        })?;
        let pem = secret
            .to_sec1_pem(LineEnding::LF)
            .map_err(|e| TrustError::Signing {
                key_id: self.id.clone(),
                reason: format!("encoding private key: {e}"),
            })?;
        Ok(pem.as_str().to_owned())
    }
}

/// Hex SHA-256 of the DER encoded SubjectPublicKeyInfo.
pub fn key_id(public: &p256::PublicKey) -> TrustResult<KeyId> {
    let der = public
        .to_public_key_der()
        .map_err(|e| TrustError::InvalidInput(format!("encoding public key: {e}")))?;
    Ok(Sha256Digest::new(der.as_bytes()).to_hex())
}

/// In-memory registry of loaded keys, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: BTreeMap<KeyId, Key>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key`, merging role tags if the id is already present.
    pub fn insert(&mut self, key: Key) {
        match self.keys.get_mut(&key.id) {
            Some(existing) => {
                existing.roles.extend(key.roles);
                if existing.secret.is_none() {
                    existing.secret = key.secret;
                }
            }
            None => {
                self.keys.insert(key.id.clone(), key);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Key> {
        self.keys.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Key> {
        self.keys.remove(id)
    }

    /// Drops every key tagged with `role`.
    pub fn remove_role(&mut self, role: &str) {
        self.keys.retain(|_, key| !key.has_role(role));
    }

    pub fn for_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a Key> + 'a {
        self.keys.values().filter(move |key| key.has_role(role))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.keys.values()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// A rotated-out key that keeps co-signing until `prune_after`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetiredKey {
    pub keyid: KeyId,
    pub role: String,
    pub prune_after: DateTime<Utc>,
}

impl RetiredKey {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.prune_after
    }
}

/// Directory of private keys.
#[derive(Debug, Clone)]
pub struct KeyStore {
    keys_path: PathBuf,
}

impl KeyStore {
    /// Opens (creating if needed) the key directory.
    pub async fn open(keys_path: impl Into<PathBuf>) -> TrustResult<Self> {
        let keys_path = keys_path.into();
        tokio::fs::create_dir_all(&keys_path)
            .await
            .map_err(|e| TrustError::Configuration {
                path: keys_path.clone(),
                reason: format!("creating key directory: {e}"),
            })?;
        Ok(Self { keys_path })
    }

    pub fn path(&self) -> &Path {
        &self.keys_path
    }

    fn key_path(&self, role: &str, index: usize) -> PathBuf {
        if index == 0 {
            self.keys_path.join(format!("{role}.key"))
        } else {
            self.keys_path.join(format!("{role}.{index}.key"))
        }
    }

    fn retired_path(&self, keyid: &str) -> PathBuf {
        self.keys_path.join(RETIRED_DIR).join(format!("{keyid}.key"))
    }

    /// Generates a key for `role` and stores it as the role's first key.
    pub async fn generate_key(&self, role: &str) -> TrustResult<Key> {
        let key = Key::generate(role)?;
        write_private(self.key_path(role, 0), key.to_pem()?).await?;
        Ok(key)
    }

    /// Loads the role's first key.
    pub async fn load_key(&self, role: &str) -> TrustResult<Key> {
        let path = self.key_path(role, 0);
        read_key(&path, role)
            .await?
            .ok_or_else(|| TrustError::not_found("key", path.display().to_string()))
    }

    /// Generates and stores `count` keys for `role`.
    pub async fn generate_role_keys(&self, role: &str, count: usize) -> TrustResult<Vec<Key>> {
        let keys = (0..count)
            .map(|_| Key::generate(role))
            .collect::<TrustResult<Vec<_>>>()?;
        self.save_role_keys(role, &keys).await?;
        Ok(keys)
    }

    /// Stores `keys` as the complete key set of `role`, removing any
    /// higher-numbered files left from a larger set.
    pub async fn save_role_keys(&self, role: &str, keys: &[Key]) -> TrustResult<()> {
        for (index, key) in keys.iter().enumerate() {
            write_private(self.key_path(role, index), key.to_pem()?).await?;
        }
        let mut index = keys.len().max(1);
        loop {
            let path = self.key_path(role, index);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed stale key file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
                Err(e) => {
                    return Err(TrustError::persistence(
                        format!("removing {}", path.display()),
                        e,
                    ));
                }
            }
            index += 1;
        }
        Ok(())
    }

    /// Loads every key of `role`, in index order. Empty if none exist.
    pub async fn load_role_keys(&self, role: &str) -> TrustResult<Vec<Key>> {
        let mut keys = Vec::new();
        while let Some(key) = read_key(&self.key_path(role, keys.len()), role).await? {
            keys.push(key);
        }
        Ok(keys)
    }

    /// Best-effort removal of all key files of `role`.
    pub async fn remove_role_keys(&self, role: &str) {
        let mut index = 0;
        loop {
            let path = self.key_path(role, index);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove key file");
                    break;
                }
            }
            index += 1;
        }
    }

    /// Moves `key` into the retired set and schedules it for pruning.
    pub async fn retire_key(
        &self,
        role: &str,
        key: &Key,
        prune_after: DateTime<Utc>,
    ) -> TrustResult<RetiredKey> {
        write_private(self.retired_path(&key.id), key.to_pem()?).await?;
        let mut schedule = self.load_retired_schedule().await?;
        schedule.retain(|entry| entry.keyid != key.id);
        let entry = RetiredKey {
            keyid: key.id.clone(),
            role: role.to_owned(),
            prune_after,
        };
        schedule.push(entry.clone());
        self.save_retired_schedule(&schedule).await?;
        Ok(entry)
    }

    /// Loads a retired key, `None` if its file is gone.
    pub async fn load_retired_key(&self, entry: &RetiredKey) -> TrustResult<Option<Key>> {
        read_key(&self.retired_path(&entry.keyid), &entry.role).await
    }

    /// Forgets a retired key and deletes its file.
    pub async fn remove_retired(&self, keyid: &str) -> TrustResult<()> {
        let mut schedule = self.load_retired_schedule().await?;
        schedule.retain(|entry| entry.keyid != keyid);
        self.save_retired_schedule(&schedule).await?;
        match tokio::fs::remove_file(self.retired_path(keyid)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TrustError::persistence(
                format!("removing retired key {keyid}"),
                e,
            )),
        }
    }

    /// Drops every retired key.
    /// Drops every retired key, including ones an unreadable schedule no
    /// longer names.
    pub async fn clear_retired(&self) -> TrustResult<()> {
        let dir = self.keys_path.join(RETIRED_DIR);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(TrustError::persistence("removing retired keys", e)),
        }
        self.save_retired_schedule(&[]).await
    }

    pub async fn load_retired_schedule(&self) -> TrustResult<Vec<RetiredKey>> {
        let path = self.keys_path.join(RETIRED_SCHEDULE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).persist_context(|| format!("parsing {RETIRED_SCHEDULE}"))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(TrustError::persistence(
                format!("reading {RETIRED_SCHEDULE}"),
                e,
            )),
        }
    }

    async fn save_retired_schedule(&self, schedule: &[RetiredKey]) -> TrustResult<()> {
        let json = serde_json::to_vec_pretty(schedule)
            .persist_context(|| format!("serializing {RETIRED_SCHEDULE}"))?;
        write_atomic(self.keys_path.join(RETIRED_SCHEDULE), json, false).await
    }
}

async fn read_key(path: &Path, role: &str) -> TrustResult<Option<Key>> {
    match tokio::fs::read_to_string(path).await {
        Ok(pem) => Key::from_pem(&pem, role).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TrustError::persistence(
            format!("reading {}", path.display()),
            e,
        )),
    }
}

async fn write_private(path: PathBuf, pem: String) -> TrustResult<()> {
    write_atomic(path, pem.into_bytes(), true).await
}

/// Writes through a temp file in the same directory, then renames.
async fn write_atomic(path: PathBuf, contents: Vec<u8>, private: bool) -> TrustResult<()> {
    let context = format!("writing {}", path.display());
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| std::io::Error::other("path has no parent"))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(dir)?;
        if private {
            restrict_to_owner(tmp.as_file())?;
        }
        tmp.write_all(&contents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(path = %path.display(), "wrote key material");
        Ok(())
    })
    .await
    .persist_context(|| context.clone())?
    .persist_context(|| context)
}

#[cfg(unix)]
fn restrict_to_owner(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_is_deterministic() {
        let key = Key::generate("root").unwrap();
        let pem = key.to_pem().unwrap();
        let again = Key::from_pem(&pem, "root").unwrap();
        assert_eq!(key.id(), again.id());
        assert_eq!(key.id().len(), 64);
        assert_eq!(key.public_metadata().unwrap(), again.public_metadata().unwrap());
    }

    #[test]
    fn public_metadata_is_spki_pem() {
        let key = Key::generate("targets").unwrap();
        let public = key.public_metadata().unwrap();
        assert_eq!(public.keytype, "ecdsa");
        assert_eq!(public.scheme, "ecdsa-sha2-nistp256");
        assert!(public.keyval.public.starts_with("-----BEGIN PUBLIC KEY-----"));
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let key = Key::generate("root").unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("private: true"));
        assert!(!debug.contains("BEGIN"));
    }

    #[test]
    fn keyring_merges_roles() {
        let key = Key::generate("snapshot").unwrap();
        let mut other = key.clone();
        other.roles = BTreeSet::from(["timestamp".to_owned()]);

        let mut ring = KeyRing::new();
        ring.insert(key.clone());
        ring.insert(other);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.for_role("snapshot").count(), 1);
        assert_eq!(ring.for_role("timestamp").count(), 1);
        assert_eq!(ring.for_role("root").count(), 0);

        ring.remove_role("snapshot");
        assert!(ring.is_empty());
    }

    #[tokio::test]
    async fn generate_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path().join("keys")).await.unwrap();
        let key = store.generate_key("root").await.unwrap();
        let loaded = store.load_key("root").await.unwrap();
        assert_eq!(key.id(), loaded.id());
        assert!(loaded.has_role("root"));
        assert!(loaded.has_private());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("keys/root.key"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn load_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).await.unwrap();
        let err = store.load_key("targets").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn role_key_sets_shrink_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).await.unwrap();
        let three = store.generate_role_keys("root", 3).await.unwrap();
        assert!(dir.path().join("root.2.key").exists());
        let loaded = store.load_role_keys("root").await.unwrap();
        let ids: Vec<_> = loaded.iter().map(|k| k.id().to_owned()).collect();
        let expected: Vec<_> = three.iter().map(|k| k.id().to_owned()).collect();
        assert_eq!(ids, expected);

        store.generate_role_keys("root", 1).await.unwrap();
        assert!(!dir.path().join("root.1.key").exists());
        assert!(!dir.path().join("root.2.key").exists());
        assert_eq!(store.load_role_keys("root").await.unwrap().len(), 1);

        store.remove_role_keys("root").await;
        assert!(store.load_role_keys("root").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retire_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).await.unwrap();
        let key = store.generate_key("targets").await.unwrap();
        let when = Utc::now();
        let entry = store.retire_key("targets", &key, when).await.unwrap();

        let schedule = store.load_retired_schedule().await.unwrap();
        assert_eq!(schedule, vec![entry.clone()]);
        let loaded = store.load_retired_key(&entry).await.unwrap().unwrap();
        assert_eq!(loaded.id(), key.id());
        assert!(loaded.has_role("targets"));

        store.remove_retired(key.id()).await.unwrap();
        assert!(store.load_retired_schedule().await.unwrap().is_empty());
        assert!(store.load_retired_key(&entry).await.unwrap().is_none());
    }
}
