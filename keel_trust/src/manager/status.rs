use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use keel_core::{KeyId, Metadata, PublicKey, Role, Signed};
use serde::Serialize;

use super::TrustManager;
use crate::error::TrustResult;

/// Overview of the repository, safe to print: keys are listed by id only.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub initialized: bool,
    pub key_count: usize,
    pub keys: Vec<KeyInfo>,
    pub tiers: Vec<TierStatus>,
    pub target_count: usize,
    pub delegation_count: usize,
    pub retired_key_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub id: KeyId,
    pub roles: Vec<String>,
    pub has_private: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStatus {
    pub role: Role,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub expired: bool,
}

fn tier_status<T: Metadata>(signed: &Signed<T>, now: DateTime<Utc>) -> TierStatus {
    TierStatus {
        role: T::ROLE,
        version: signed.signed.version(),
        expires: signed.signed.expires(),
        expired: signed.signed.is_expired(now),
    }
}

impl TrustManager {
    pub async fn status(&self) -> Status {
        let state = self.state.read().await;
        let now = self.now();
        let keys = state
            .keys
            .iter()
            .map(|key| KeyInfo {
                id: key.id().to_owned(),
                roles: key.roles().iter().cloned().collect(),
                has_private: key.has_private(),
            })
            .collect::<Vec<_>>();

        let (tiers, target_count, delegation_count) = match &state.tiers {
            Some(t) => (
                vec![
                    tier_status(&t.root, now),
                    tier_status(&t.targets, now),
                    tier_status(&t.snapshot, now),
                    tier_status(&t.timestamp, now),
                ],
                t.targets.signed.targets.len(),
                t.targets.signed.delegated_roles().len(),
            ),
            None => (Vec::new(), 0, 0),
        };

        Status {
            initialized: state.tiers.is_some(),
            key_count: keys.len(),
            keys,
            tiers,
            target_count,
            delegation_count,
            retired_key_count: state.retired.len(),
        }
    }

    /// Every public key the repository lists, top-level and delegated.
    pub async fn export_public_keys(&self) -> TrustResult<BTreeMap<KeyId, PublicKey>> {
        let state = self.state.read().await;
        let tiers = state.tiers()?;
        let mut keys = tiers.root.signed.keys.clone();
        if let Some(delegations) = &tiers.targets.signed.delegations {
            keys.extend(
                delegations
                    .keys
                    .iter()
                    .map(|(id, key)| (id.clone(), key.clone())),
            );
        }
        Ok(keys)
    }
}
