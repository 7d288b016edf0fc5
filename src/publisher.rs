//! Image mosaic publishing.
//!
//! A store is either absent or present in the catalog. Publishing to an absent store creates it
//! and declares its time dimension; publishing to a present store harvests the new granules.

use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use hashbrown::HashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::catalog::{Catalog, CoverageResource, DimensionInfo, StoreInfo};
use crate::error::MosaicistError;
use crate::metrics::MOSAIC_PUBLISHES;
use crate::models::StoreState;
use crate::mosaic::StagingArchive;

/// Publishes staged archives to the image mosaic stores of one workspace.
#[derive(Debug)]
pub struct MosaicPublisher<C> {
    catalog: C,
    workspace: String,
}

impl<C: Catalog> MosaicPublisher<C> {
    pub fn new(catalog: C, workspace: &str) -> Self {
        MosaicPublisher {
            catalog,
            workspace: workspace.to_string(),
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// Look up a store. Returns `None` if it is absent.
    pub async fn lookup(&self, store: &str) -> Result<Option<StoreInfo>, MosaicistError> {
        self.catalog.get_store(&self.workspace, store).await
    }

    /// Publish an archive to a store, creating the store if it is absent.
    ///
    /// Failures are reported as [MosaicistError::Publish].
    #[tracing::instrument(level = "INFO", skip(self, archive), fields(workspace = %self.workspace))]
    pub async fn publish(
        &self,
        store: &str,
        archive: &StagingArchive,
    ) -> Result<StoreState, MosaicistError> {
        let result = self.try_publish(store, archive).await;
        let outcome = match &result {
            Ok(state) => state.to_string(),
            Err(_) => "failed".to_string(),
        };
        MOSAIC_PUBLISHES.with_label_values(&[&outcome]).inc();
        match &result {
            Ok(state) => tracing::info!(%state, "published mosaic"),
            Err(error) => tracing::warn!(%error, "failed to publish mosaic"),
        }
        result.map_err(|error| MosaicistError::publish(store, error))
    }

    async fn try_publish(
        &self,
        store: &str,
        archive: &StagingArchive,
    ) -> Result<StoreState, MosaicistError> {
        if !self.catalog.workspace_exists(&self.workspace).await? {
            return Err(MosaicistError::Publish {
                store: store.to_string(),
                source: Box::new(MosaicistError::validation(format!(
                    "workspace {} does not exist",
                    self.workspace
                ))),
            });
        }
        match self.lookup(store).await? {
            None => {
                self.create(store, archive).await?;
                Ok(StoreState::Created)
            }
            Some(_) => {
                self.catalog
                    .harvest_granules(&self.workspace, store, &archive.path)
                    .await?;
                Ok(StoreState::Updated)
            }
        }
    }

    /// Create the store, then declare its formats and time dimension.
    ///
    /// If the declaration fails the store is deleted again, so that it stays absent until a
    /// publish completes both steps.
    async fn create(&self, store: &str, archive: &StagingArchive) -> Result<(), MosaicistError> {
        self.catalog
            .create_image_mosaic(&self.workspace, store, &archive.path)
            .await?;
        if let Err(error) = self.declare(store).await {
            if let Err(delete_error) = self.catalog.delete_store(&self.workspace, store).await {
                tracing::error!(%delete_error, "failed to remove partially created store");
            }
            return Err(error);
        }
        Ok(())
    }

    async fn declare(&self, store: &str) -> Result<(), MosaicistError> {
        let coverage = self
            .catalog
            .get_coverage(&self.workspace, store, store)
            .await?;
        let coverage = CoverageResource {
            supported_formats: vec!["GEOTIFF".to_string()],
            time: Some(DimensionInfo::time_list()),
            dir_name: Some(format!("{}_{}", store, store)),
            ..coverage
        };
        self.catalog
            .save_coverage(&self.workspace, store, &coverage)
            .await
    }
}

/// Per-store locks serialising publishes to the same (catalog, workspace, store).
///
/// Entries are removed once no task holds or waits for them.
#[derive(Debug, Default)]
pub struct PublishLocks {
    locks: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Holds the lock of one store until dropped.
#[derive(Debug)]
pub struct PublishGuard<'a> {
    locks: &'a PublishLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PublishGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.key);
    }
}

impl PublishLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock of a store. The lock is held until the guard is dropped.
    pub async fn acquire(&self, catalog: &str, workspace: &str, store: &str) -> PublishGuard<'_> {
        // Declared before the lock is awaited so that a cancelled acquire still releases the
        // entry.
        let mut guard = PublishGuard {
            locks: self,
            key: format!("{}|{}|{}", catalog, workspace, store),
            guard: None,
        };
        let lock = self
            .map()
            .entry(guard.key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        guard.guard = Some(lock.lock_owned().await);
        guard
    }

    /// Number of stores with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, key: &str) {
        let mut locks = self.map();
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CatalogEvent, FakeCatalog};

    use std::path::PathBuf;
    use std::time::Duration;

    fn archive() -> StagingArchive {
        StagingArchive {
            path: PathBuf::from("/tmp/mosaic.zip"),
            entries: vec!["indexer.properties".to_string()],
        }
    }

    #[tokio::test]
    async fn publish_absent_then_present() {
        let catalog = FakeCatalog::with_workspace("mosaics");
        let publisher = MosaicPublisher::new(catalog, "mosaics");

        assert_eq!(None, publisher.lookup("PREC").await.unwrap());
        let state = publisher.publish("PREC", &archive()).await.unwrap();
        assert_eq!(StoreState::Created, state);
        assert!(publisher.lookup("PREC").await.unwrap().is_some());

        let coverage = publisher.catalog().coverage("PREC").unwrap();
        assert_eq!(vec!["GEOTIFF".to_string()], coverage.supported_formats);
        assert_eq!(Some(DimensionInfo::time_list()), coverage.time);
        assert_eq!(Some("PREC_PREC".to_string()), coverage.dir_name);

        let state = publisher.publish("PREC", &archive()).await.unwrap();
        assert_eq!(StoreState::Updated, state);

        assert_eq!(
            vec![
                CatalogEvent::Created("PREC".to_string()),
                CatalogEvent::CoverageSaved("PREC".to_string()),
                CatalogEvent::Harvested("PREC".to_string()),
            ],
            publisher.catalog().events()
        );
    }

    #[tokio::test]
    async fn publish_missing_workspace() {
        let catalog = FakeCatalog::with_workspace("other");
        let publisher = MosaicPublisher::new(catalog, "mosaics");
        let error = publisher.publish("PREC", &archive()).await.unwrap_err();
        assert_eq!("failed to save mosaic PREC", error.to_string());
        assert!(publisher.catalog().events().is_empty());
    }

    #[tokio::test]
    async fn publish_create_failure_is_not_created() {
        let catalog = FakeCatalog::with_workspace("mosaics");
        catalog.fail_coverage_save(true);
        let publisher = MosaicPublisher::new(catalog, "mosaics");
        let error = publisher.publish("PREC", &archive()).await.unwrap_err();
        assert!(matches!(error, MosaicistError::Publish { .. }));
        assert_eq!(None, publisher.lookup("PREC").await.unwrap());
        assert_eq!(
            vec![
                CatalogEvent::Created("PREC".to_string()),
                CatalogEvent::Deleted("PREC".to_string()),
            ],
            publisher.catalog().events()
        );
    }

    #[tokio::test]
    async fn publish_after_failed_create_declares_time() {
        let catalog = FakeCatalog::with_workspace("mosaics");
        catalog.fail_coverage_save(true);
        let publisher = MosaicPublisher::new(catalog, "mosaics");
        publisher.publish("PREC", &archive()).await.unwrap_err();

        publisher.catalog().fail_coverage_save(false);
        let state = publisher.publish("PREC", &archive()).await.unwrap();
        assert_eq!(StoreState::Created, state);
        let coverage = publisher.catalog().coverage("PREC").unwrap();
        assert_eq!(Some(DimensionInfo::time_list()), coverage.time);
    }

    #[tokio::test]
    async fn concurrent_publishes_create_once() {
        let catalog = FakeCatalog::with_workspace("mosaics");
        let publisher = Arc::new(MosaicPublisher::new(catalog, "mosaics"));
        let locks = Arc::new(PublishLocks::new());
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let publisher = publisher.clone();
                let locks = locks.clone();
                tokio::spawn(async move {
                    let _guard = locks.acquire("catalog", "mosaics", "PREC").await;
                    publisher.publish("PREC", &archive()).await.unwrap()
                })
            })
            .collect();
        let mut states = vec![];
        for task in tasks {
            states.push(task.await.unwrap());
        }
        assert!(locks.is_empty());
        assert_eq!(
            1,
            states
                .iter()
                .filter(|state| **state == StoreState::Created)
                .count()
        );
        assert_eq!(
            3,
            states
                .iter()
                .filter(|state| **state == StoreState::Updated)
                .count()
        );
    }

    #[tokio::test]
    async fn locks_are_per_store() {
        let locks = PublishLocks::new();
        let _prec = locks.acquire("catalog", "mosaics", "PREC").await;
        // A different store is not blocked.
        tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire("catalog", "mosaics", "TMAX"),
        )
        .await
        .unwrap();
        // The same store is.
        assert!(tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire("catalog", "mosaics", "PREC"),
        )
        .await
        .is_err());
        assert_eq!(1, locks.len());
    }

    #[tokio::test]
    async fn released_locks_are_removed() {
        let locks = PublishLocks::new();
        let prec = locks.acquire("catalog", "mosaics", "PREC").await;
        let tmax = locks.acquire("catalog", "mosaics", "TMAX").await;
        assert_eq!(2, locks.len());
        drop(prec);
        assert_eq!(1, locks.len());
        drop(tmax);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn awaited_lock_is_kept() {
        let locks = Arc::new(PublishLocks::new());
        let held = locks.acquire("catalog", "mosaics", "PREC").await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("catalog", "mosaics", "PREC").await;
            })
        };
        // Let the waiter queue on the lock.
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);
        assert_eq!(1, locks.len());
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
