use chrono::{DateTime, Duration, Utc};
use keel_core::{KeyId, Metadata, Role};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Draft, TrustManager};
use crate::error::TrustResult;

/// How close to expiry the timestamp gets refreshed.
const TIMESTAMP_REFRESH_MARGIN: Duration = Duration::hours(1);

/// How close to expiry the snapshot gets refreshed.
const SNAPSHOT_REFRESH_MARGIN: Duration = Duration::hours(24);

/// What one [`TrustManager::auto_refresh`] pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub snapshot_refreshed: bool,
    pub timestamp_refreshed: bool,
    /// Retired keys removed from root.
    pub pruned_keys: Vec<KeyId>,
}

impl RefreshReport {
    pub fn is_noop(&self) -> bool {
        !self.snapshot_refreshed && !self.timestamp_refreshed && self.pruned_keys.is_empty()
    }
}

/// A tier whose expiry has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiryWarning {
    pub role: Role,
    pub version: u64,
    pub expires: DateTime<Utc>,
}

impl std::fmt::Display for ExpiryWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} metadata (version {}) expired at {}",
            self.role,
            self.version,
            self.expires.to_rfc3339()
        )
    }
}

fn expires_within<T: Metadata>(doc: &T, now: DateTime<Utc>, margin: Duration) -> bool {
    doc.expires() - now <= margin
}

impl TrustManager {
    /// Bumps the timestamp and extends its expiry. Returns the new version.
    pub async fn refresh_timestamp(&self) -> TrustResult<u64> {
        let mut state = self.state.write().await;
        let tiers = state.tiers()?;
        let mut draft = Draft::new(tiers);
        draft.refresh_timestamp(self.expires(Role::Timestamp))?;
        let sealed = self.seal(&state.keys, Some(tiers), draft)?;
        let version = sealed.tiers.timestamp.signed.version;
        self.publish(&mut state, sealed).await?;
        info!(version, "refreshed timestamp");
        Ok(version)
    }

    /// One maintenance pass, meant to be driven periodically.
    ///
    /// Prunes retired keys whose grace period is over, refreshes the
    /// snapshot (and with it the timestamp) within a day of expiry, and
    /// the timestamp alone within an hour of expiry. Writes nothing when
    /// none of that is due.
    pub async fn auto_refresh(&self) -> TrustResult<RefreshReport> {
        let mut state = self.state.write().await;
        let tiers = state.tiers()?;
        let now = self.now();
        let mut report = RefreshReport::default();
        let mut draft = Draft::new(tiers);

        let (due, pending): (Vec<_>, Vec<_>) =
            state.retired.iter().cloned().partition(|entry| entry.is_due(now));
        let mut keys = state.keys.clone();
        for entry in &due {
            keys.remove(&entry.keyid);
            if !draft.root.is_key_referenced(&entry.keyid) {
                draft.root.keys.remove(&entry.keyid);
            }
            report.pruned_keys.push(entry.keyid.clone());
        }
        if !due.is_empty() {
            draft.bump_root(self.expires(Role::Root));
        }

        if expires_within(&draft.snapshot, now, SNAPSHOT_REFRESH_MARGIN) {
            draft.update_snapshot_and_timestamp(
                self.expires(Role::Snapshot),
                self.expires(Role::Timestamp),
            )?;
            report.snapshot_refreshed = true;
            report.timestamp_refreshed = true;
        } else if expires_within(&draft.timestamp, now, TIMESTAMP_REFRESH_MARGIN) {
            draft.refresh_timestamp(self.expires(Role::Timestamp))?;
            report.timestamp_refreshed = true;
        }

        if draft.dirty.is_clean() {
            debug!("nothing to refresh");
            return Ok(report);
        }

        let sealed = self.seal(&keys, Some(tiers), draft)?;
        self.publish(&mut state, sealed).await?;
        state.keys = keys;
        state.retired = pending;

        for entry in &due {
            if let Err(e) = self.keystore.remove_retired(&entry.keyid).await {
                warn!(key_id = %entry.keyid, error = %e, "failed to delete retired key");
            }
        }
        info!(
            snapshot = report.snapshot_refreshed,
            timestamp = report.timestamp_refreshed,
            pruned = report.pruned_keys.len(),
            "auto refresh"
        );
        Ok(report)
    }

    /// Tiers whose expiry has already passed.
    pub async fn check_expiry(&self) -> TrustResult<Vec<ExpiryWarning>> {
        let state = self.state.read().await;
        let tiers = state.tiers()?;
        let now = self.now();
        let mut warnings = Vec::new();
        let mut check = |role: Role, version: u64, expires: DateTime<Utc>| {
            if now > expires {
                warnings.push(ExpiryWarning {
                    role,
                    version,
                    expires,
                });
            }
        };
        let root = &tiers.root.signed;
        check(Role::Root, root.version, root.expires);
        let targets = &tiers.targets.signed;
        check(Role::Targets, targets.version, targets.expires);
        let snapshot = &tiers.snapshot.signed;
        check(Role::Snapshot, snapshot.version, snapshot.expires);
        let timestamp = &tiers.timestamp.signed;
        check(Role::Timestamp, timestamp.version, timestamp.expires);
        Ok(warnings)
    }
}
