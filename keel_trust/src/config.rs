use std::path::PathBuf;

use keel_core::Role;
use serde::{Deserialize, Serialize};

use crate::error::{TrustError, TrustResult};

/// Upper bound on any validity window (100 years).
const MAX_WINDOW_SECS: u64 = 100 * 366 * 24 * 60 * 60;

/// Where the repository lives and how its metadata is signed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustConfig {
    #[serde(default = "default_repository_path")]
    pub repository_path: PathBuf,
    #[serde(default = "default_keys_path")]
    pub keys_path: PathBuf,
    /// Also write `<version>.targets.json` and `<version>.snapshot.json`.
    #[serde(default)]
    pub consistent_snapshot: bool,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub expiry: ExpiryConfig,
}

fn default_repository_path() -> PathBuf {
    PathBuf::from("/var/lib/keel/repository")
}

fn default_keys_path() -> PathBuf {
    PathBuf::from("/var/lib/keel/keys")
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            repository_path: default_repository_path(),
            keys_path: default_keys_path(),
            consistent_snapshot: false,
            thresholds: Thresholds::default(),
            expiry: ExpiryConfig::default(),
        }
    }
}

/// Signatures required for root and targets. Snapshot and timestamp are
/// always signed by a single online key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thresholds {
    #[serde(default = "one")]
    pub root: u32,
    #[serde(default = "one")]
    pub targets: u32,
}

fn one() -> u32 {
    1
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { root: 1, targets: 1 }
    }
}

/// Validity windows in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpiryConfig {
    #[serde(default = "default_root_expiry")]
    pub root: u64,
    #[serde(default = "default_targets_expiry")]
    pub targets: u64,
    #[serde(default = "default_snapshot_expiry")]
    pub snapshot: u64,
    #[serde(default = "default_timestamp_expiry")]
    pub timestamp: u64,
}

fn default_root_expiry() -> u64 {
    365 * 24 * 60 * 60
}

fn default_targets_expiry() -> u64 {
    90 * 24 * 60 * 60
}

fn default_snapshot_expiry() -> u64 {
    7 * 24 * 60 * 60
}

fn default_timestamp_expiry() -> u64 {
    24 * 60 * 60
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            root: default_root_expiry(),
            targets: default_targets_expiry(),
            snapshot: default_snapshot_expiry(),
            timestamp: default_timestamp_expiry(),
        }
    }
}

impl TrustConfig {
    /// Config rooted at a single directory, with `repository/` and `keys/`
    /// beneath it.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            repository_path: dir.join("repository"),
            keys_path: dir.join("keys"),
            ..Self::default()
        }
    }

    pub fn threshold(&self, role: Role) -> u32 {
        match role {
            Role::Root => self.thresholds.root,
            Role::Targets => self.thresholds.targets,
            Role::Snapshot | Role::Timestamp => 1,
        }
    }

    fn window_secs(&self, role: Role) -> u64 {
        match role {
            Role::Root => self.expiry.root,
            Role::Targets => self.expiry.targets,
            Role::Snapshot => self.expiry.snapshot,
            Role::Timestamp => self.expiry.timestamp,
        }
    }

    /// Validity window for `role`. Out of range values saturate; they are
    /// rejected by [`TrustConfig::validate`].
    pub fn window(&self, role: Role) -> chrono::Duration {
        i64::try_from(self.window_secs(role))
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn validate(&self) -> TrustResult<()> {
        let invalid = |reason: String| TrustError::Configuration {
            path: self.repository_path.clone(),
            reason,
        };
        if self.thresholds.root == 0 || self.thresholds.targets == 0 {
            return Err(invalid("thresholds must be at least 1".into()));
        }
        for role in Role::ALL {
            let secs = self.window_secs(role);
            if secs == 0 {
                return Err(invalid(format!("{role} expiry must be non-zero")));
            }
            // keep expiry computations well inside chrono's range
            if secs > MAX_WINDOW_SECS {
                return Err(invalid(format!("{role} expiry is out of range")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_windows() {
        let config = TrustConfig::default();
        assert_eq!(config.window(Role::Root), chrono::Duration::days(365));
        assert_eq!(config.window(Role::Targets), chrono::Duration::days(90));
        assert_eq!(config.window(Role::Snapshot), chrono::Duration::days(7));
        assert_eq!(config.window(Role::Timestamp), chrono::Duration::days(1));
        assert_eq!(config.threshold(Role::Root), 1);
        config.validate().unwrap();
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: TrustConfig = serde_json::from_str(
            r#"{"repository_path": "/tmp/r", "thresholds": {"root": 2}, "expiry": {"timestamp": 60}}"#,
        )
        .unwrap();
        assert_eq!(config.repository_path, PathBuf::from("/tmp/r"));
        assert_eq!(config.keys_path, default_keys_path());
        assert_eq!(config.thresholds.root, 2);
        assert_eq!(config.thresholds.targets, 1);
        assert_eq!(config.expiry.timestamp, 60);
        assert_eq!(config.expiry.snapshot, default_snapshot_expiry());
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut config = TrustConfig::default();
        config.thresholds.targets = 0;
        assert!(matches!(
            config.validate(),
            Err(TrustError::Configuration { .. })
        ));

        let mut config = TrustConfig::default();
        config.expiry.snapshot = 0;
        assert!(matches!(
            config.validate(),
            Err(TrustError::Configuration { .. })
        ));
    }
}
