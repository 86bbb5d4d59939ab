//! Signed metadata documents.
//!
//! Every document is stored as `{"signatures": [...], "signed": {...}}`
//! (see [`Signed`]). Signatures and the snapshot/timestamp hash chain are
//! computed over [`Metadata::canonical_bytes`]: compact JSON of the
//! `signed` payload. All maps are `BTreeMap` so the encoding is
//! deterministic.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Role, Sha256Digest};

/// Version of the metadata format these documents follow.
pub const SPEC_VERSION: &str = "1.0.31";

/// Key type recorded for every key keel generates.
pub const KEYTYPE_ECDSA: &str = "ecdsa";

/// Signature scheme recorded for every key keel generates.
pub const SCHEME_ECDSA_SHA2_NISTP256: &str = "ecdsa-sha2-nistp256";

/// Hex SHA-256 of a key's DER encoded public key.
pub type KeyId = String;

/// Value of the `_type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataKind {
    Root,
    Targets,
    Snapshot,
    Timestamp,
}

impl From<Role> for MetadataKind {
    fn from(role: Role) -> Self {
        match role {
            Role::Root => MetadataKind::Root,
            Role::Targets => MetadataKind::Targets,
            Role::Snapshot => MetadataKind::Snapshot,
            Role::Timestamp => MetadataKind::Timestamp,
        }
    }
}

/// Computes an expiry `window` after `now`, truncated to whole seconds so
/// that it survives an RFC 3339 round trip unchanged.
pub fn expiry_from(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    (now + window).trunc_subsecs(0)
}

/// Behaviour shared by the four top-level documents.
pub trait Metadata: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Role that signs this document.
    const ROLE: Role;

    fn kind(&self) -> MetadataKind;

    fn version(&self) -> u64;

    fn expires(&self) -> DateTime<Utc>;

    /// Increments the version by exactly one and replaces the expiry.
    fn bump(&mut self, expires: DateTime<Utc>);

    /// Bytes that are signed and hashed.
    fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires()
    }
}

macro_rules! impl_metadata {
    ($ty:ty, $role:expr) => {
        impl Metadata for $ty {
            const ROLE: Role = $role;

            fn kind(&self) -> MetadataKind {
                self.kind
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn expires(&self) -> DateTime<Utc> {
                self.expires
            }

            fn bump(&mut self, expires: DateTime<Utc>) {
                self.version += 1;
                self.expires = expires;
            }
        }
    };
}

/// One signature over a document's canonical bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: KeyId,
    /// Hex of the fixed-width `r || s` encoding.
    pub sig: String,
}

/// The on-disk envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<T> {
    pub signatures: Vec<Signature>,
    pub signed: T,
}

impl<T: Metadata> Signed<T> {
    pub fn to_json_pretty(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Public half of a key as listed in root or delegations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub keytype: String,
    pub scheme: String,
    pub keyval: KeyVal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVal {
    /// PEM encoded SubjectPublicKeyInfo.
    pub public: String,
}

impl PublicKey {
    pub fn ecdsa_p256(public_pem: impl Into<String>) -> Self {
        Self {
            keytype: KEYTYPE_ECDSA.to_owned(),
            scheme: SCHEME_ECDSA_SHA2_NISTP256.to_owned(),
            keyval: KeyVal {
                public: public_pem.into(),
            },
        }
    }
}

/// Key ids and signature threshold for a role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    pub keyids: Vec<KeyId>,
    pub threshold: u32,
}

// ============================================================================
// Root
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    #[serde(rename = "_type")]
    pub kind: MetadataKind,
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub keys: BTreeMap<KeyId, PublicKey>,
    pub roles: BTreeMap<String, RoleKeys>,
    pub consistent_snapshot: bool,
}

impl_metadata!(Root, Role::Root);

impl Root {
    pub fn new(expires: DateTime<Utc>, consistent_snapshot: bool) -> Self {
        Self {
            kind: MetadataKind::Root,
            spec_version: SPEC_VERSION.to_owned(),
            version: 1,
            expires,
            keys: BTreeMap::new(),
            roles: BTreeMap::new(),
            consistent_snapshot,
        }
    }

    pub fn role_keys(&self, role: Role) -> Option<&RoleKeys> {
        self.roles.get(role.as_str())
    }

    /// True if any role still lists `keyid`.
    pub fn is_key_referenced(&self, keyid: &str) -> bool {
        self.roles
            .values()
            .any(|role| role.keyids.iter().any(|id| id == keyid))
    }
}

// ============================================================================
// Targets
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hashes {
    pub sha256: Sha256Digest,
}

/// Why a candidate blob does not match its target entry.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum TargetMismatch {
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    Length { expected: u64, actual: u64 },

    #[error("sha256 mismatch: expected {expected}, got {actual}")]
    Hash {
        expected: Sha256Digest,
        actual: Sha256Digest,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFile {
    pub length: u64,
    pub hashes: Hashes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

impl TargetFile {
    pub fn from_bytes(data: &[u8], custom: Option<serde_json::Value>) -> Self {
        Self {
            length: data.len() as u64,
            hashes: Hashes {
                sha256: Sha256Digest::new(data),
            },
            custom,
        }
    }

    /// Checks length first, then the digest.
    pub fn check(&self, data: &[u8]) -> Result<(), TargetMismatch> {
        let actual = data.len() as u64;
        if actual != self.length {
            return Err(TargetMismatch::Length {
                expected: self.length,
                actual,
            });
        }
        let digest = Sha256Digest::new(data);
        if digest != self.hashes.sha256 {
            return Err(TargetMismatch::Hash {
                expected: self.hashes.sha256,
                actual: digest,
            });
        }
        Ok(())
    }
}

/// A role that was handed signing authority over a set of path patterns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedRole {
    pub name: String,
    pub keyids: Vec<KeyId>,
    pub threshold: u32,
    pub paths: Vec<String>,
    /// A terminating role stops lookup of further delegations for the
    /// paths it matches.
    pub terminating: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegations {
    pub keys: BTreeMap<KeyId, PublicKey>,
    pub roles: Vec<DelegatedRole>,
}

impl Delegations {
    pub fn role(&self, name: &str) -> Option<&DelegatedRole> {
        self.roles.iter().find(|role| role.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.keys.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Targets {
    #[serde(rename = "_type")]
    pub kind: MetadataKind,
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub targets: BTreeMap<String, TargetFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,
}

impl_metadata!(Targets, Role::Targets);

impl Targets {
    pub fn new(expires: DateTime<Utc>) -> Self {
        Self {
            kind: MetadataKind::Targets,
            spec_version: SPEC_VERSION.to_owned(),
            version: 1,
            expires,
            targets: BTreeMap::new(),
            delegations: None,
        }
    }

    pub fn delegated_roles(&self) -> &[DelegatedRole] {
        self.delegations
            .as_ref()
            .map(|d| d.roles.as_slice())
            .unwrap_or_default()
    }
}

// ============================================================================
// Snapshot & Timestamp
// ============================================================================

/// Version, length and digest of another metadata file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u64,
    pub length: u64,
    pub hashes: Hashes,
}

impl MetaFile {
    pub fn describe(version: u64, bytes: &[u8]) -> Self {
        Self {
            version,
            length: bytes.len() as u64,
            hashes: Hashes {
                sha256: Sha256Digest::new(bytes),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "_type")]
    pub kind: MetadataKind,
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, MetaFile>,
}

impl_metadata!(Snapshot, Role::Snapshot);

impl Snapshot {
    pub fn new(expires: DateTime<Utc>) -> Self {
        Self {
            kind: MetadataKind::Snapshot,
            spec_version: SPEC_VERSION.to_owned(),
            version: 1,
            expires,
            meta: BTreeMap::new(),
        }
    }

    /// Points `meta["targets.json"]` at the current targets document.
    pub fn record_targets(&mut self, targets: &Targets) -> serde_json::Result<()> {
        let bytes = targets.canonical_bytes()?;
        self.meta.insert(
            Role::Targets.filename().to_owned(),
            MetaFile::describe(targets.version, &bytes),
        );
        Ok(())
    }

    pub fn targets_meta(&self) -> Option<&MetaFile> {
        self.meta.get(Role::Targets.filename())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    #[serde(rename = "_type")]
    pub kind: MetadataKind,
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, MetaFile>,
}

impl_metadata!(Timestamp, Role::Timestamp);

impl Timestamp {
    pub fn new(expires: DateTime<Utc>) -> Self {
        Self {
            kind: MetadataKind::Timestamp,
            spec_version: SPEC_VERSION.to_owned(),
            version: 1,
            expires,
            meta: BTreeMap::new(),
        }
    }

    /// Points `meta["snapshot.json"]` at the current snapshot document.
    pub fn record_snapshot(&mut self, snapshot: &Snapshot) -> serde_json::Result<()> {
        let bytes = snapshot.canonical_bytes()?;
        self.meta.insert(
            Role::Snapshot.filename().to_owned(),
            MetaFile::describe(snapshot.version, &bytes),
        );
        Ok(())
    }

    pub fn snapshot_meta(&self) -> Option<&MetaFile> {
        self.meta.get(Role::Snapshot.filename())
    }
}
