//! Resource management

use crate::error::MosaicistError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// [crate::resource_manager::ResourceManager] provides a simple way to allocate various resources
/// to tasks. Resource management is performed using a Tokio Semaphore for each type of resource.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for outbound map-server connections.
    connections: Option<Semaphore>,

    /// Optional semaphore for CPU-bound tasks.
    tasks: Option<Semaphore>,

    /// Whether to run CPU-bound tasks on the Rayon thread pool.
    use_rayon: bool,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(connection_limit: Option<usize>, task_limit: Option<usize>, use_rayon: bool) -> Self {
        Self {
            connections: connection_limit.map(Semaphore::new),
            tasks: task_limit.map(Semaphore::new),
            use_rayon,
        }
    }

    /// Acquire a map-server connection resource.
    pub async fn connection(&self) -> Result<Option<SemaphorePermit>, MosaicistError> {
        optional_acquire(&self.connections, 1).await
    }

    /// Acquire a task resource.
    pub async fn task(&self) -> Result<Option<SemaphorePermit>, MosaicistError> {
        optional_acquire(&self.tasks, 1).await
    }

    /// Whether CPU-bound work runs on the Rayon thread pool.
    pub fn uses_rayon(&self) -> bool {
        self.use_rayon
    }

    /// Run a CPU-bound closure while holding a task resource.
    ///
    /// The closure runs on the Rayon thread pool if enabled, otherwise on the current task.
    pub async fn compute<F, T>(&self, f: F) -> Result<T, MosaicistError>
    where
        F: FnOnce() -> Result<T, MosaicistError> + Send + 'static,
        T: Send + 'static,
    {
        let _task_permit = self.task().await?;
        if self.use_rayon {
            tokio_rayon::spawn(f).await
        } else {
            f()
        }
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit>, MosaicistError> {
    let n = n.try_into()?;
    if let Some(sem) = sem {
        sem.acquire_many(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::TryAcquireError;

    #[tokio::test]
    async fn no_resource_management() {
        let rm = ResourceManager::new(None, None, false);
        assert!(rm.connections.is_none());
        assert!(rm.tasks.is_none());
        let _c = rm.connection().await.unwrap();
        let _t = rm.task().await.unwrap();
        assert!(_c.is_none());
        assert!(_t.is_none());
    }

    #[tokio::test]
    async fn full_resource_management() {
        let rm = ResourceManager::new(Some(1), Some(1), false);
        assert!(rm.connections.is_some());
        assert!(rm.tasks.is_some());
        let _c = rm.connection().await.unwrap();
        let _t = rm.task().await.unwrap();
        assert!(_c.is_some());
        assert!(_t.is_some());
        // Check that there are no more resources (without blocking).
        assert_eq!(
            rm.connections.as_ref().unwrap().try_acquire().err(),
            Some(TryAcquireError::NoPermits)
        );
        assert_eq!(
            rm.tasks.as_ref().unwrap().try_acquire().err(),
            Some(TryAcquireError::NoPermits)
        );
    }

    #[tokio::test]
    async fn compute_inline() {
        let rm = ResourceManager::new(None, Some(1), false);
        assert_eq!(42, rm.compute(|| Ok(6 * 7)).await.unwrap());
        assert_eq!(None, rm.compute(|| Ok(rayon::current_thread_index())).await.unwrap());
        // The task permit is released afterwards.
        assert!(rm.tasks.as_ref().unwrap().try_acquire().is_ok());
    }

    #[tokio::test]
    async fn compute_rayon() {
        let rm = ResourceManager::new(None, None, true);
        let result: Result<(), _> = rm
            .compute(|| Err(MosaicistError::validation("failed on rayon")))
            .await;
        assert_eq!("failed on rayon", result.unwrap_err().to_string());
        let index = rm.compute(|| Ok(rayon::current_thread_index())).await.unwrap();
        assert!(index.is_some());
    }
}
