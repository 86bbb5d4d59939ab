use std::collections::BTreeMap;

use bytes::Bytes;
use keel_core::{Role, TargetFile};
use tracing::info;

use super::{Draft, TrustManager};
use crate::error::{TrustError, TrustResult};

/// Target names become paths under `targets/`, so they must be relative
/// and free of `.`/`..` segments.
fn validate_target_name(name: &str) -> TrustResult<()> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.chars().any(char::is_control)
        || name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(TrustError::InvalidInput(format!(
            "invalid target name {name:?}"
        )));
    }
    Ok(())
}

/// Blobs are stored at `targets/<name>`, so one target cannot be a
/// directory prefix of another (`app` and `app/image.tar`).
fn conflicting_target<'a>(
    existing: impl IntoIterator<Item = &'a String>,
    name: &str,
) -> Option<&'a String> {
    fn is_dir_of(dir: &str, path: &str) -> bool {
        path.strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
    }
    existing
        .into_iter()
        .find(|other| is_dir_of(other.as_str(), name) || is_dir_of(name, other.as_str()))
}

impl TrustManager {
    /// Records `data` as target `name`, stores the blob and re-signs
    /// targets, snapshot and timestamp. Replaces an existing entry.
    pub async fn add_target(
        &self,
        name: &str,
        data: Bytes,
        custom: Option<serde_json::Value>,
    ) -> TrustResult<TargetFile> {
        validate_target_name(name)?;
        let mut state = self.state.write().await;
        let tiers = state.tiers()?;
        if let Some(other) = conflicting_target(tiers.targets.signed.targets.keys(), name) {
            return Err(TrustError::InvalidInput(format!(
                "target {name:?} clashes with existing target {other:?}"
            )));
        }

        let entry = TargetFile::from_bytes(&data, custom);
        let mut draft = Draft::new(tiers);
        draft.targets.targets.insert(name.to_owned(), entry.clone());
        draft.bump_targets(self.expires(Role::Targets));
        draft.update_snapshot_and_timestamp(
            self.expires(Role::Snapshot),
            self.expires(Role::Timestamp),
        )?;
        let sealed = self.seal(&state.keys, Some(tiers), draft)?;
        let version = sealed.tiers.targets.signed.version;

        self.repo.put_target(name, data).await?;
        self.publish(&mut state, sealed).await?;
        info!(name, length = entry.length, version, "added target");
        Ok(entry)
    }

    /// Drops target `name` and its blob.
    pub async fn remove_target(&self, name: &str) -> TrustResult<()> {
        let mut state = self.state.write().await;
        let tiers = state.tiers()?;
        if !tiers.targets.signed.targets.contains_key(name) {
            return Err(TrustError::not_found("target", name));
        }

        let mut draft = Draft::new(tiers);
        draft.targets.targets.remove(name);
        draft.bump_targets(self.expires(Role::Targets));
        draft.update_snapshot_and_timestamp(
            self.expires(Role::Snapshot),
            self.expires(Role::Timestamp),
        )?;
        let sealed = self.seal(&state.keys, Some(tiers), draft)?;
        let version = sealed.tiers.targets.signed.version;

        self.publish(&mut state, sealed).await?;
        self.repo.delete_target(name).await;
        info!(name, version, "removed target");
        Ok(())
    }

    pub async fn get_target(&self, name: &str) -> TrustResult<TargetFile> {
        let state = self.state.read().await;
        state
            .tiers()?
            .targets
            .signed
            .targets
            .get(name)
            .cloned()
            .ok_or_else(|| TrustError::not_found("target", name))
    }

    pub async fn list_targets(&self) -> TrustResult<BTreeMap<String, TargetFile>> {
        let state = self.state.read().await;
        Ok(state.tiers()?.targets.signed.targets.clone())
    }

    /// Checks `data` against the recorded length and SHA-256 of `name`.
    pub async fn verify_target(&self, name: &str, data: &[u8]) -> TrustResult<()> {
        let entry = self.get_target(name).await?;
        entry.check(data).map_err(|mismatch| TrustError::Integrity {
            name: name.to_owned(),
            mismatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_prefix_clashes() {
        let existing = ["app".to_owned(), "team-a/tool.bin".to_owned()];
        assert_eq!(
            conflicting_target(&existing, "app/image.tar"),
            Some(&existing[0])
        );
        assert_eq!(conflicting_target(&existing, "team-a"), Some(&existing[1]));
        assert_eq!(conflicting_target(&existing, "app"), None);
        assert_eq!(conflicting_target(&existing, "apple/x"), None);
        assert_eq!(conflicting_target(&existing, "team-a/other.bin"), None);
    }

    #[test]
    fn target_names() {
        for ok in ["app/image.tar", "a", "team-a/x/y.bin", "v1.2.3"] {
            assert!(validate_target_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "/abs", "a//b", "../up", "a/./b", "a/..", "dir/", "win\\path", "nl\n"] {
            assert!(validate_target_name(bad).is_err(), "{bad:?}");
        }
    }
}
