#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use keel_core::{Metadata, Root, Signed, Snapshot, Targets, Timestamp};
use keel_store_memory::MemoryStore;
use keel_trust::{Clock, ManualClock, TrustConfig, TrustManager};
use tempfile::TempDir;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
}

/// A manager whose metadata lives in memory and whose keys live in a temp
/// directory, driven by a manual clock.
pub struct Harness {
    pub dir: TempDir,
    pub config: TrustConfig,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub manager: TrustManager,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut TrustConfig)) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("tmp");
        let mut config = TrustConfig::in_dir(dir.path());
        configure(&mut config);
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let manager = TrustManager::with_store(config.clone(), store.clone(), clock.clone())
            .await
            .expect("manager");
        Self {
            dir,
            config,
            store,
            clock,
            manager,
        }
    }

    pub async fn initialized() -> Self {
        let harness = Self::new().await;
        harness.manager.initialize().await.expect("initialize");
        harness
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Opens a second manager over the same metadata and keys.
    pub async fn reopen(&self) -> TrustManager {
        TrustManager::with_store(self.config.clone(), self.store.clone(), self.clock.clone())
            .await
            .expect("reopen")
    }

    pub async fn root(&self) -> Signed<Root> {
        parse(&self.manager.root_metadata().await.unwrap())
    }

    pub async fn targets(&self) -> Signed<Targets> {
        parse(&self.manager.targets_metadata().await.unwrap())
    }

    pub async fn snapshot(&self) -> Signed<Snapshot> {
        parse(&self.manager.snapshot_metadata().await.unwrap())
    }

    pub async fn timestamp(&self) -> Signed<Timestamp> {
        parse(&self.manager.timestamp_metadata().await.unwrap())
    }
}

pub fn parse<T: Metadata>(bytes: &[u8]) -> Signed<T> {
    Signed::from_slice(bytes).expect("parse metadata")
}
