use std::collections::{BTreeMap, BTreeSet};

use keel_core::{KeyId, Metadata, PublicKey, RoleKeys, Root, Signature, Signed};

use crate::error::{PersistContext, TrustError, TrustResult};
use crate::signer::verify_signature;

/// Counts distinct keys listed in `role_keys` with a valid signature over
/// `bytes`, failing with [`TrustError::ThresholdNotMet`] below the
/// threshold.
///
/// Signatures by keys outside the role (such as retired keys still
/// co-signing) are ignored.
pub fn verify_threshold(
    role: &str,
    keys: &BTreeMap<KeyId, PublicKey>,
    role_keys: &RoleKeys,
    bytes: &[u8],
    signatures: &[Signature],
) -> TrustResult<usize> {
    let mut valid = BTreeSet::new();
    for sig in signatures {
        if valid.contains(sig.keyid.as_str()) || !role_keys.keyids.contains(&sig.keyid) {
            continue;
        }
        let Some(public) = keys.get(&sig.keyid) else {
            continue;
        };
        if verify_signature(public, bytes, &sig.sig) {
            valid.insert(sig.keyid.as_str());
        }
    }
    if role_keys.threshold == 0 || valid.len() < role_keys.threshold as usize {
        return Err(TrustError::ThresholdNotMet {
            role: role.to_owned(),
            valid: valid.len(),
            threshold: role_keys.threshold,
        });
    }
    Ok(valid.len())
}

/// Verifies a top-level document against the keys and threshold `root`
/// assigns to its role.
pub fn verify_role<T: Metadata>(root: &Root, signed: &Signed<T>) -> TrustResult<usize> {
    let role = T::ROLE;
    let role_keys = root
        .role_keys(role)
        .ok_or_else(|| TrustError::TrustAnchor(format!("root does not define role {role}")))?;
    let bytes = signed
        .signed
        .canonical_bytes()
        .persist_context(|| format!("serializing {role}"))?;
    verify_threshold(
        role.as_str(),
        &root.keys,
        role_keys,
        &bytes,
        &signed.signatures,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Key, KeyRing};
    use crate::signer::Signer;

    fn setup(count: usize) -> (KeyRing, BTreeMap<KeyId, PublicKey>, RoleKeys) {
        let mut ring = KeyRing::new();
        let mut keys = BTreeMap::new();
        let mut keyids = Vec::new();
        for _ in 0..count {
            let key = Key::generate("targets").unwrap();
            keys.insert(key.id().to_owned(), key.public_metadata().unwrap());
            keyids.push(key.id().to_owned());
            ring.insert(key);
        }
        (ring, keys, RoleKeys { keyids, threshold: 2 })
    }

    #[test]
    fn counts_distinct_valid_keys() {
        let (ring, keys, role_keys) = setup(2);
        let mut sigs = Signer::new(&ring).sign("targets", b"doc").signatures;
        assert_eq!(
            verify_threshold("targets", &keys, &role_keys, b"doc", &sigs).unwrap(),
            2
        );

        // the same signature twice does not count twice
        sigs[1] = sigs[0].clone();
        let err = verify_threshold("targets", &keys, &role_keys, b"doc", &sigs).unwrap_err();
        assert!(matches!(
            err,
            TrustError::ThresholdNotMet {
                valid: 1,
                threshold: 2,
                ..
            }
        ));
    }

    #[test]
    fn ignores_unlisted_signers() {
        let (ring, keys, mut role_keys) = setup(2);
        let sigs = Signer::new(&ring).sign("targets", b"doc").signatures;
        role_keys.keyids.truncate(1);
        role_keys.threshold = 1;
        assert_eq!(
            verify_threshold("targets", &keys, &role_keys, b"doc", &sigs).unwrap(),
            1
        );
    }

    #[test]
    fn wrong_payload_fails() {
        let (ring, keys, role_keys) = setup(2);
        let sigs = Signer::new(&ring).sign("targets", b"doc").signatures;
        assert!(verify_threshold("targets", &keys, &role_keys, b"other", &sigs).is_err());
    }
}
