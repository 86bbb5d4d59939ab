use keel_core::{KeyId, Role};
use tracing::{info, warn};

use super::{Draft, TrustManager, generate_keys};
use crate::error::{TrustError, TrustResult};

impl TrustManager {
    /// Replaces the keys of `role` and bumps root once.
    ///
    /// The outgoing keys leave `roles[role]` immediately but stay listed in
    /// root and keep co-signing the role's documents until the current
    /// timestamp expires; [`TrustManager::auto_refresh`] prunes them after
    /// that. A new root is therefore cross-signed by the old root keys.
    /// The role's current document is re-signed with the new keys at its
    /// current version.
    pub async fn rotate_key(&self, role: Role) -> TrustResult<Vec<KeyId>> {
        let mut state = self.state.write().await;
        let tiers = state.tiers()?;
        let prune_after = tiers.timestamp.signed.expires;

        let mut draft = Draft::new(tiers);
        let role_keys = draft
            .root
            .roles
            .get(role.as_str())
            .cloned()
            .ok_or_else(|| TrustError::TrustAnchor(format!("root does not define role {role}")))?;
        let generated = generate_keys(role.as_str(), role_keys.threshold)?;
        let new_ids: Vec<KeyId> = generated.iter().map(|k| k.id().to_owned()).collect();

        for key in &generated {
            draft
                .root
                .keys
                .insert(key.id().to_owned(), key.public_metadata()?);
        }
        if let Some(entry) = draft.root.roles.get_mut(role.as_str()) {
            entry.keyids = new_ids.clone();
        }

        let mut keys = state.keys.clone();
        let mut outgoing = Vec::new();
        for old_id in &role_keys.keyids {
            if draft.root.is_key_referenced(old_id) {
                continue;
            }
            let private = keys.get(old_id).filter(|key| key.has_private()).cloned();
            match private {
                Some(key) => outgoing.push(key),
                None => {
                    // nothing can co-sign with it, so drop it right away
                    warn!(role = %role, key_id = %old_id, "no private key for outgoing key, removing it");
                    draft.root.keys.remove(old_id);
                    keys.remove(old_id);
                }
            }
        }
        for key in &generated {
            keys.insert(key.clone());
        }

        draft.bump_root(self.expires(Role::Root));
        match role {
            Role::Root => {}
            Role::Targets => draft.dirty.targets = true,
            Role::Snapshot => draft.dirty.snapshot = true,
            Role::Timestamp => draft.dirty.timestamp = true,
        }
        let sealed = self.seal(&keys, Some(tiers), draft)?;
        let root_version = sealed.tiers.root.signed.version;

        let mut retired = state.retired.clone();
        for key in &outgoing {
            let entry = self
                .keystore
                .retire_key(role.as_str(), key, prune_after)
                .await?;
            retired.retain(|r| r.keyid != entry.keyid);
            retired.push(entry);
        }
        self.keystore
            .save_role_keys(role.as_str(), &generated)
            .await?;
        self.publish(&mut state, sealed).await?;
        state.keys = keys;
        state.retired = retired;

        info!(
            role = %role,
            new_keys = ?new_ids,
            retired = outgoing.len(),
            %prune_after,
            root_version,
            "rotated keys"
        );
        Ok(new_ids)
    }
}
