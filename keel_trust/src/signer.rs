use keel_core::{PublicKey, Signature};
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{self, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use tracing::warn;

use crate::error::TrustError;
use crate::keys::KeyRing;

/// Signatures produced for one payload, plus the keys that failed.
#[derive(Debug, Default)]
pub struct SignOutcome {
    pub signatures: Vec<Signature>,
    pub failures: Vec<TrustError>,
}

/// Signs payloads with every private key tagged for a role.
#[derive(Debug, Clone, Copy)]
pub struct Signer<'a> {
    keys: &'a KeyRing,
}

impl<'a> Signer<'a> {
    pub fn new(keys: &'a KeyRing) -> Self {
        Self { keys }
    }

    /// ECDSA/SHA-256 over `bytes` with each of `role`'s private keys.
    ///
    /// A key that fails is recorded in [`SignOutcome::failures`] and the
    /// remaining keys still sign.
    pub fn sign(&self, role: &str, bytes: &[u8]) -> SignOutcome {
        let mut outcome = SignOutcome::default();
        for key in self.keys.for_role(role) {
            let Some(signing_key) = key.signing_key() else {
                continue;
            };
            let signed: Result<ecdsa::Signature, _> = signing_key.try_sign(bytes);
            match signed {
                Ok(sig) => {
                    outcome.signatures.push(Signature {
                        keyid: key.id().to_owned(),
                        sig: hex::encode(sig.to_bytes()),
                    });
                }
                Err(e) => {
                    warn!(role, key_id = key.id(), error = %e, "key failed to sign");
                    outcome.failures.push(TrustError::Signing {
                        key_id: key.id().to_owned(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        outcome
    }
}

/// Checks a hex `r || s` signature against a listed public key.
pub fn verify_signature(public: &PublicKey, bytes: &[u8], sig_hex: &str) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_public_key_pem(&public.keyval.public) else {
        return false;
    };
    let Ok(raw) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(sig) = ecdsa::Signature::from_slice(&raw) else {
        return false;
    };
    verifying_key.verify(bytes, &sig).is_ok()
}
