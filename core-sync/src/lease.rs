//! Collection leases held by this process.
//!
//! [`LeaseManager`] stamps leases with the process's worker id and the
//! injected clock, and remembers which collections it holds so a shutdown
//! can hand them all back. [`LeaseGuard`] releases its lease when dropped if
//! [`LeaseGuard::release`] was never awaited.
//!
//! A lease only stays live for `ttl_secs` after its last stamp, so the
//! holder calls [`LeaseGuard::renew`] as it makes progress. Renewal fails
//! with [`SyncError::LeaseLost`] once another worker has reclaimed it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use bridge_traits::time::Clock;
use core_async::runtime::Handle;
use core_store::SyncStateRepository;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Random worker identity used as the lease owner.
pub fn generate_worker_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Clone)]
pub struct LeaseManager {
    repository: Arc<dyn SyncStateRepository>,
    clock: Arc<dyn Clock>,
    worker_id: String,
    ttl_secs: i64,
    held: Arc<Mutex<HashSet<String>>>,
}

impl LeaseManager {
    pub fn new(
        repository: Arc<dyn SyncStateRepository>,
        clock: Arc<dyn Clock>,
        worker_id: impl Into<String>,
        ttl_secs: i64,
    ) -> Self {
        Self {
            repository,
            clock,
            worker_id: worker_id.into(),
            ttl_secs,
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Try to take the lease. `None` means a live lease belongs to someone
    /// else (or to this worker from an earlier, still-live acquisition).
    pub async fn acquire(&self, collection: &str) -> Result<Option<LeaseGuard>> {
        let now = self.clock.unix_timestamp();
        let granted = self
            .repository
            .acquire_lease(collection, &self.worker_id, self.ttl_secs, now)
            .await?;

        if !granted {
            debug!(collection, worker_id = %self.worker_id, "Lease denied");
            return Ok(None);
        }

        self.held_set().insert(collection.to_string());
        debug!(collection, worker_id = %self.worker_id, "Lease acquired");

        Ok(Some(LeaseGuard {
            manager: self.clone(),
            collection: collection.to_string(),
            released: false,
        }))
    }

    /// Current time as stamped on leases.
    pub fn now(&self) -> i64 {
        self.clock.unix_timestamp()
    }

    /// Restamp the lease if this worker still owns it.
    pub async fn renew(&self, collection: &str) -> Result<()> {
        let renewed = self
            .repository
            .renew_lease(collection, &self.worker_id, self.now())
            .await?;

        if !renewed {
            self.held_set().remove(collection);
            warn!(collection, worker_id = %self.worker_id, "Lease lost to another worker");
            return Err(SyncError::LeaseLost(collection.to_string()));
        }
        Ok(())
    }

    /// Clear the lease if this worker owns it.
    pub async fn release(&self, collection: &str) -> Result<bool> {
        self.held_set().remove(collection);
        let released = self
            .repository
            .release_lease(collection, &self.worker_id)
            .await?;

        debug!(collection, released, "Lease release requested");
        Ok(released)
    }

    /// Release every lease this process holds. Used on shutdown.
    pub async fn release_all(&self) -> Result<usize> {
        let collections: Vec<String> = self.held_set().drain().collect();
        let mut released = 0;

        for collection in &collections {
            match self
                .repository
                .release_lease(collection, &self.worker_id)
                .await
            {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => warn!(collection = %collection, error = %e, "Failed to release lease"),
            }
        }

        if released > 0 {
            info!(released, "Released held leases");
        }
        Ok(released)
    }

    /// Collections currently leased by this process.
    pub fn held(&self) -> Vec<String> {
        let mut held: Vec<_> = self.held_set().iter().cloned().collect();
        held.sort();
        held
    }

    fn held_set(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Scoped ownership of one collection's lease.
pub struct LeaseGuard {
    manager: LeaseManager,
    collection: String,
    released: bool,
}

impl LeaseGuard {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Worker id recorded as the lease owner.
    pub fn owner(&self) -> &str {
        self.manager.worker_id()
    }

    pub fn now(&self) -> i64 {
        self.manager.now()
    }

    /// Keep the lease live. Errors with [`SyncError::LeaseLost`] if it was
    /// reclaimed by another worker in the meantime.
    pub async fn renew(&self) -> Result<()> {
        self.manager.renew(&self.collection).await
    }

    /// Release now and report whether the row was still ours.
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        self.manager.release(&self.collection).await
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let manager = self.manager.clone();
        let collection = std::mem::take(&mut self.collection);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = manager.release(&collection).await {
                        warn!(collection = %collection, error = %e, "Deferred lease release failed");
                    }
                });
            }
            // The TTL reclaims it
            Err(_) => warn!(collection = %collection, "Lease dropped outside a runtime"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use core_store::{create_test_pool, SqliteSyncStateRepository};

    const T0: i64 = 1_700_000_000;

    async fn setup() -> (Arc<SqliteSyncStateRepository>, Arc<ManualClock>) {
        let pool = create_test_pool().await.unwrap();
        (
            Arc::new(SqliteSyncStateRepository::new(pool)),
            Arc::new(ManualClock::at_unix(T0)),
        )
    }

    #[core_async::test]
    async fn test_second_worker_waits_for_ttl() {
        let (repo, clock) = setup().await;
        let a = LeaseManager::new(repo.clone(), clock.clone(), "A", 30);
        let b = LeaseManager::new(repo.clone(), clock.clone(), "B", 30);

        let _guard = a.acquire("C").await.unwrap().expect("A gets the lease");
        assert!(b.acquire("C").await.unwrap().is_none());

        clock.advance_secs(31);
        let guard = b.acquire("C").await.unwrap().expect("stale lease reclaimed");
        assert_eq!(guard.collection(), "C");

        let record = repo.find("C").await.unwrap().unwrap();
        assert_eq!(record.lock_owner.as_deref(), Some("B"));
        assert_eq!(record.lock_acquired_at, Some(T0 + 31));
    }

    #[core_async::test]
    async fn test_renew_extends_lease() {
        let (repo, clock) = setup().await;
        let a = LeaseManager::new(repo.clone(), clock.clone(), "A", 30);
        let b = LeaseManager::new(repo.clone(), clock.clone(), "B", 30);

        let guard = a.acquire("C").await.unwrap().unwrap();
        clock.advance_secs(25);
        guard.renew().await.unwrap();

        clock.advance_secs(25);
        assert!(b.acquire("C").await.unwrap().is_none());
        assert_eq!(
            repo.find("C").await.unwrap().unwrap().lock_acquired_at,
            Some(T0 + 25)
        );
    }

    #[core_async::test]
    async fn test_renew_after_takeover_is_lease_lost() {
        let (repo, clock) = setup().await;
        let a = LeaseManager::new(repo.clone(), clock.clone(), "A", 30);
        let b = LeaseManager::new(repo.clone(), clock.clone(), "B", 30);

        let guard = a.acquire("C").await.unwrap().unwrap();
        clock.advance_secs(31);
        let _taken = b.acquire("C").await.unwrap().expect("stale lease reclaimed");

        let err = guard.renew().await.unwrap_err();
        assert!(matches!(err, SyncError::LeaseLost(ref c) if c == "C"));
        assert!(a.held().is_empty());

        // Releasing the lost lease leaves B's alone
        assert!(!guard.release().await.unwrap());
        assert_eq!(
            repo.find("C").await.unwrap().unwrap().lock_owner.as_deref(),
            Some("B")
        );
    }

    #[core_async::test]
    async fn test_guard_release() {
        let (repo, clock) = setup().await;
        let manager = LeaseManager::new(repo.clone(), clock, "A", 30);

        let guard = manager.acquire("C").await.unwrap().unwrap();
        assert_eq!(manager.held(), vec!["C"]);

        assert!(guard.release().await.unwrap());
        assert!(manager.held().is_empty());
        assert!(repo.find("C").await.unwrap().unwrap().lock_owner.is_none());
    }

    #[core_async::test]
    async fn test_release_by_other_worker_is_noop() {
        let (repo, clock) = setup().await;
        let a = LeaseManager::new(repo.clone(), clock.clone(), "A", 30);
        let b = LeaseManager::new(repo.clone(), clock, "B", 30);

        let _guard = a.acquire("C").await.unwrap().unwrap();
        assert!(!b.release("C").await.unwrap());
        assert_eq!(
            repo.find("C").await.unwrap().unwrap().lock_owner.as_deref(),
            Some("A")
        );
    }

    #[core_async::test]
    async fn test_release_all() {
        let (repo, clock) = setup().await;
        let manager = LeaseManager::new(repo.clone(), clock, "A", 30);

        let first = manager.acquire("C1").await.unwrap().unwrap();
        let second = manager.acquire("C2").await.unwrap().unwrap();
        std::mem::forget(first);
        std::mem::forget(second);

        assert_eq!(manager.held(), vec!["C1", "C2"]);
        assert_eq!(manager.release_all().await.unwrap(), 2);
        assert!(manager.held().is_empty());

        for name in ["C1", "C2"] {
            assert!(repo.find(name).await.unwrap().unwrap().lock_owner.is_none());
        }
    }

    #[core_async::test]
    async fn test_dropped_guard_releases_in_background() {
        let (repo, clock) = setup().await;
        let manager = LeaseManager::new(repo.clone(), clock, "A", 30);

        drop(manager.acquire("C").await.unwrap().unwrap());

        for _ in 0..50 {
            if repo.find("C").await.unwrap().unwrap().lock_owner.is_none() {
                return;
            }
            core_async::time::sleep(core_async::time::Duration::from_millis(10)).await;
        }
        panic!("dropped guard did not release the lease");
    }

    #[test]
    fn test_worker_ids_are_unique() {
        assert_ne!(generate_worker_id(), generate_worker_id());
    }
}
