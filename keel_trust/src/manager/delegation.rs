//! Delegated targets roles.
//!
//! Only storage is handled here: a delegation is recorded in
//! `targets.json` together with its public keys, and its private keys are
//! kept in the key store under the delegation's name. Deciding which
//! delegation is authoritative for a path is left to verifiers.

use keel_core::{DelegatedRole, Role};
use tracing::info;

use super::{Draft, TrustManager, generate_keys};
use crate::error::{TrustError, TrustResult};

/// Upper bound on keys generated for one delegation.
const MAX_DELEGATION_THRESHOLD: u32 = 16;

/// Parameters for [`TrustManager::add_delegation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDelegation {
    pub name: String,
    pub paths: Vec<String>,
    pub threshold: u32,
    pub terminating: bool,
}

impl NewDelegation {
    pub fn new<P: Into<String>>(
        name: impl Into<String>,
        paths: impl IntoIterator<Item = P>,
        threshold: u32,
    ) -> Self {
        Self {
            name: name.into(),
            paths: paths.into_iter().map(Into::into).collect(),
            threshold,
            terminating: false,
        }
    }

    pub fn terminating(mut self, terminating: bool) -> Self {
        self.terminating = terminating;
        self
    }

    fn validate(&self) -> TrustResult<()> {
        let invalid = |reason: String| Err(TrustError::InvalidInput(reason));
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return invalid(format!(
                "delegation name {:?} must be non-empty and use only [A-Za-z0-9_-]",
                self.name
            ));
        }
        if Role::is_reserved(&self.name) {
            return invalid(format!("{} is a top-level role name", self.name));
        }
        if self.paths.is_empty() || self.paths.iter().any(|p| p.trim().is_empty()) {
            return invalid("delegation needs at least one non-empty path pattern".into());
        }
        if self.threshold == 0 || self.threshold > MAX_DELEGATION_THRESHOLD {
            return invalid(format!(
                "delegation threshold must be between 1 and {MAX_DELEGATION_THRESHOLD}"
            ));
        }
        Ok(())
    }
}

impl TrustManager {
    /// Creates a delegated role with `threshold` fresh keys.
    pub async fn add_delegation(&self, delegation: NewDelegation) -> TrustResult<DelegatedRole> {
        delegation.validate()?;
        let mut state = self.state.write().await;
        let tiers = state.tiers()?;
        if tiers
            .targets
            .signed
            .delegated_roles()
            .iter()
            .any(|role| role.name == delegation.name)
        {
            return Err(TrustError::InvalidInput(format!(
                "delegation {} already exists",
                delegation.name
            )));
        }

        let generated = generate_keys(&delegation.name, delegation.threshold)?;
        let role = DelegatedRole {
            name: delegation.name.clone(),
            keyids: generated.iter().map(|k| k.id().to_owned()).collect(),
            threshold: delegation.threshold,
            paths: delegation.paths,
            terminating: delegation.terminating,
        };

        let mut draft = Draft::new(tiers);
        let delegations = draft.targets.delegations.get_or_insert_with(Default::default);
        for key in &generated {
            delegations
                .keys
                .insert(key.id().to_owned(), key.public_metadata()?);
        }
        delegations.roles.push(role.clone());
        draft.bump_targets(self.expires(Role::Targets));
        draft.update_snapshot_and_timestamp(
            self.expires(Role::Snapshot),
            self.expires(Role::Timestamp),
        )?;
        let sealed = self.seal(&state.keys, Some(tiers), draft)?;

        self.keystore.save_role_keys(&role.name, &generated).await?;
        self.publish(&mut state, sealed).await?;
        for key in generated {
            state.keys.insert(key);
        }
        info!(name = %role.name, threshold = role.threshold, paths = ?role.paths, "added delegation");
        Ok(role)
    }

    /// Removes a delegated role and every key no other delegation uses.
    pub async fn remove_delegation(&self, name: &str) -> TrustResult<()> {
        let mut state = self.state.write().await;
        let tiers = state.tiers()?;
        if tiers.targets.signed.delegated_roles().iter().all(|r| r.name != name) {
            return Err(TrustError::not_found("delegation", name));
        }

        let mut draft = Draft::new(tiers);
        if let Some(delegations) = draft.targets.delegations.as_mut() {
            delegations.roles.retain(|role| role.name != name);
            let still_used: std::collections::BTreeSet<_> = delegations
                .roles
                .iter()
                .flat_map(|role| role.keyids.iter().cloned())
                .collect();
            delegations.keys.retain(|id, _| still_used.contains(id));
            if delegations.is_empty() {
                draft.targets.delegations = None;
            }
        }
        draft.bump_targets(self.expires(Role::Targets));
        draft.update_snapshot_and_timestamp(
            self.expires(Role::Snapshot),
            self.expires(Role::Timestamp),
        )?;
        let sealed = self.seal(&state.keys, Some(tiers), draft)?;

        self.publish(&mut state, sealed).await?;
        state.keys.remove_role(name);
        self.keystore.remove_role_keys(name).await;
        info!(name, "removed delegation");
        Ok(())
    }

    pub async fn list_delegations(&self) -> TrustResult<Vec<DelegatedRole>> {
        let state = self.state.read().await;
        Ok(state.tiers()?.targets.signed.delegated_roles().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation() {
        assert!(NewDelegation::new("team-a", ["team-a/*"], 1).validate().is_ok());
        assert!(NewDelegation::new("Team_2", ["x/*", "y/*"], 3).validate().is_ok());

        let rejected = [
            NewDelegation::new("", ["a/*"], 1),
            NewDelegation::new("team a", ["a/*"], 1),
            NewDelegation::new("team/a", ["a/*"], 1),
            NewDelegation::new("targets", ["a/*"], 1),
            NewDelegation::new("root", ["a/*"], 1),
            NewDelegation::new("team-a", Vec::<String>::new(), 1),
            NewDelegation::new("team-a", [" "], 1),
            NewDelegation::new("team-a", ["a/*"], 0),
            NewDelegation::new("team-a", ["a/*"], 17),
        ];
        for delegation in rejected {
            assert!(
                matches!(delegation.validate(), Err(TrustError::InvalidInput(_))),
                "{delegation:?}"
            );
        }
    }

    #[test]
    fn terminating_builder() {
        let delegation = NewDelegation::new("team-a", ["a/*"], 1).terminating(true);
        assert!(delegation.terminating);
    }
}
