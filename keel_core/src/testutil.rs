//! Contract checks for [`Store`] backends.
//!
//! Enable the `testutil` feature in a backend's dev-dependencies and run
//! [`StoreTests::run_all`] against a fresh instance:
//!
//! ```ignore
//! StoreTests::new(&store).run_all().await?;
//! ```

use crate::store::{Store, StoreResult, is_not_found};
use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use std::collections::BTreeSet;

/// Exercises the parts of [`Store`] a repository relies on: whole-object
/// replace, `NotFound` on missing reads, idempotent delete and recursive
/// listing of nested paths.
pub struct StoreTests<'a, S> {
    store: &'a S,
    /// Every path is written below this directory.
    prefix: String,
}

impl<'a, S: Store> StoreTests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        let prefix = format!("_contract_{:08x}/", rand::thread_rng().r#gen::<u32>());
        Self { store, prefix }
    }

    fn path(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    pub async fn run_all(&self) -> StoreResult<()> {
        self.metadata_replace().await?;
        self.missing_objects().await?;
        self.target_blobs().await?;
        self.listing().await?;
        self.remove_prefix().await
    }

    /// A rewritten metadata file is read back whole, never appended to.
    pub async fn metadata_replace(&self) -> StoreResult<()> {
        let path = self.path("timestamp.json");
        self.store
            .put_bytes(&path, Bytes::from_static(b"{\"signed\":{\"version\":1}}"))
            .await?;
        self.store
            .put_bytes(&path, Bytes::from_static(b"{}"))
            .await?;
        assert_eq!(self.store.read_bytes(&path).await?.as_ref(), b"{}");
        assert!(self.store.exists(&path).await?);
        Ok(())
    }

    pub async fn missing_objects(&self) -> StoreResult<()> {
        let path = self.path("3.root.json");
        assert!(!self.store.exists(&path).await?);
        let err = self
            .store
            .read_bytes(&path)
            .await
            .expect_err("reading a missing object must fail");
        assert!(is_not_found(&err), "expected NotFound, got {err:#}");
        // deleting what is not there is not an error
        self.store.delete(&path).await
    }

    /// Target blobs live in nested directories and can be binary.
    pub async fn target_blobs(&self) -> StoreResult<()> {
        let path = self.path("targets/app/image.tar");
        let mut data = vec![0u8; 4096];
        rand::thread_rng().fill(&mut data[..]);
        let data = Bytes::from(data);

        self.store.put_bytes(&path, data.clone()).await?;
        assert_eq!(self.store.read_bytes(&path).await?, data);

        self.store.delete(&path).await?;
        assert!(!self.store.exists(&path).await?);
        Ok(())
    }

    pub async fn listing(&self) -> StoreResult<()> {
        let files = ["root.json", "1.root.json", "targets/team-a/app.bin"];
        for file in files {
            self.store
                .put_bytes(&self.path(file), Bytes::from_static(b"x"))
                .await?;
        }

        let listed = self.listed().await?;
        let expected: BTreeSet<String> = files.iter().map(|f| self.path(f)).collect();
        assert!(
            expected.is_subset(&listed),
            "listing {listed:?} is missing some of {expected:?}"
        );
        Ok(())
    }

    /// Deletes everything below the prefix; leaves nothing listed there.
    pub async fn remove_prefix(&self) -> StoreResult<()> {
        for path in self.listed().await? {
            self.store.delete(&path).await?;
        }
        assert!(self.listed().await?.is_empty());
        Ok(())
    }

    async fn listed(&self) -> StoreResult<BTreeSet<String>> {
        let mut stream = self.store.list().await?;
        let mut found = BTreeSet::new();
        while let Some(path) = stream.next().await {
            let path = path?;
            if path.starts_with(&self.prefix) {
                found.insert(path);
            }
        }
        Ok(found)
    }
}
