//! # Sync Orchestrator
//!
//! Drives mirror cycles.
//!
//! ## Workflow
//!
//! Each cycle:
//! 1. Fetch and parse the schema, discover collection types
//! 2. Drop collections outside the allow-list
//! 3. Resolve the data endpoint
//! 4. For each collection, in schema order:
//!    - take the lease, or skip the collection if another worker holds it
//!    - create the element table if needed
//!    - loop: renew the lease, read the stored cursor, fetch a page, apply
//!      it atomically under the lease, pause, until `hasMore` is false
//!    - release the lease, whatever happened
//!
//! A failing collection does not stop the others. Schema and auth failures
//! stop the whole cycle. A collection whose lease is reclaimed mid-run (a
//! rate-limit wait longer than the TTL, say) fails with
//! [`SyncError::LeaseLost`] without applying the page in hand.
//!
//! ## Modes
//!
//! [`RunMode::OneShot`] runs one cycle. [`RunMode::Continuous`] repeats after
//! a fixed interval until cancelled; a failed cycle is logged and retried on
//! the next tick. Cancellation is observed between pages and between
//! collections, and every lease still held is released before `run` returns.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncConfig, SyncContext, SyncOrchestrator};
//! use core_async::sync::CancellationToken;
//!
//! let context = SyncContext::new(http, tokens, endpoints, pool);
//! let orchestrator = SyncOrchestrator::new(SyncConfig::from(&mirror_config), context);
//!
//! let report = orchestrator.run(CancellationToken::new()).await?;
//! println!("{} collections failed", report.failed());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bridge_traits::http::HttpClient;
use bridge_traits::time::{Clock, SystemClock};
use core_async::sync::CancellationToken;
use core_async::time::{sleep, timeout};
use core_auth::{EndpointResolver, TokenProvider};
use core_runtime::config::RunMode;
use core_runtime::events::{EventBus, SyncEvent};
use core_schema::{CollectionDescriptor, CollectionRegistry, SchemaIntrospector};
use core_store::{
    SqlitePool, SqliteSyncStateRepository, SyncStateRecord, SyncStateRepository, TableSync,
};
use tracing::{debug, error, info, instrument, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::fetcher::{PageQuery, PageVariables, RateLimitedFetcher};
use crate::lease::{generate_worker_id, LeaseGuard, LeaseManager};
use crate::state::{CollectionRun, CollectionState};

/// Collaborators handed to the orchestrator.
pub struct SyncContext {
    pub http_client: Arc<dyn HttpClient>,
    pub tokens: Arc<dyn TokenProvider>,
    pub endpoints: Arc<dyn EndpointResolver>,
    pub pool: SqlitePool,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    /// Lease owner recorded in `sync_state`
    pub worker_id: String,
}

impl SyncContext {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        tokens: Arc<dyn TokenProvider>,
        endpoints: Arc<dyn EndpointResolver>,
        pool: SqlitePool,
    ) -> Self {
        Self {
            http_client,
            tokens,
            endpoints,
            pool,
            clock: Arc::new(SystemClock),
            events: EventBus::default(),
            worker_id: generate_worker_id(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }
}

/// How one collection's turn in a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionOutcome {
    Completed { pages: u64 },
    /// Another worker held the lease.
    Skipped,
    Cancelled { pages: u64 },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionReport {
    pub collection: String,
    pub outcome: CollectionOutcome,
}

/// Result of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub collections: Vec<CollectionReport>,
    /// Shutdown was requested before the cycle finished.
    pub cancelled: bool,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, CollectionOutcome::Completed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, CollectionOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, CollectionOutcome::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, collection: &str) -> Option<&CollectionOutcome> {
        self.collections
            .iter()
            .find(|r| r.collection == collection)
            .map(|r| &r.outcome)
    }

    fn count(&self, predicate: impl Fn(&CollectionOutcome) -> bool) -> usize {
        self.collections
            .iter()
            .filter(|r| predicate(&r.outcome))
            .count()
    }
}

pub struct SyncOrchestrator {
    config: SyncConfig,
    introspector: SchemaIntrospector,
    registry: CollectionRegistry,
    endpoints: Arc<dyn EndpointResolver>,
    fetcher: RateLimitedFetcher,
    leases: LeaseManager,
    state: Arc<dyn SyncStateRepository>,
    tables: TableSync,
    events: EventBus,
    cycles: AtomicU64,
}

impl SyncOrchestrator {
    pub fn new(config: SyncConfig, context: SyncContext) -> Self {
        let state: Arc<dyn SyncStateRepository> =
            Arc::new(SqliteSyncStateRepository::new(context.pool.clone()));
        let leases = LeaseManager::new(
            state.clone(),
            context.clock.clone(),
            context.worker_id,
            config.lock_ttl_secs,
        );
        let fetcher = RateLimitedFetcher::new(
            context.http_client.clone(),
            context.tokens,
            config.fetch_policy.clone(),
        )
        .with_events(context.events.clone());

        Self {
            introspector: SchemaIntrospector::new(context.http_client),
            registry: CollectionRegistry::new(config.collection_suffix.clone()),
            endpoints: context.endpoints,
            fetcher,
            leases,
            state,
            tables: TableSync::new(context.pool),
            events: context.events,
            cycles: AtomicU64::new(0),
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        self.leases.worker_id()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    /// Run according to the configured mode.
    ///
    /// One-shot returns the cycle's report, or its error when the cycle
    /// could not run at all. Continuous returns the last completed report
    /// once `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<CycleReport> {
        let result = match self.config.mode {
            RunMode::OneShot => self.run_cycle(&cancel).await,
            RunMode::Continuous { interval } => {
                let mut last = CycleReport::default();
                loop {
                    match self.run_cycle(&cancel).await {
                        Ok(report) => last = report,
                        Err(e) => warn!(error = %e, "Cycle failed, retrying after interval"),
                    }

                    if cancel.is_cancelled() {
                        break;
                    }
                    debug!(interval_ms = interval.as_millis() as u64, "Waiting for next cycle");
                    if timeout(interval, cancel.cancelled()).await.is_ok() {
                        break;
                    }
                }
                Ok(last)
            }
        };

        self.release_leases().await;
        result
    }

    /// One pass over every selected collection.
    #[instrument(skip(self, cancel))]
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;

        match self.execute_cycle(cycle, cancel).await {
            Ok(report) => {
                info!(
                    cycle,
                    succeeded = report.succeeded(),
                    skipped = report.skipped(),
                    failed = report.failed(),
                    cancelled = report.cancelled,
                    "Cycle completed"
                );
                self.emit(SyncEvent::CycleCompleted {
                    cycle,
                    succeeded: report.succeeded(),
                    skipped: report.skipped(),
                    failed: report.failed(),
                });
                Ok(report)
            }
            Err(e) => {
                error!(cycle, error = %e, "Cycle aborted");
                self.emit(SyncEvent::CycleFailed {
                    cycle,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Fetch the schema and return the selected collections.
    pub async fn discover(&self) -> Result<Vec<CollectionDescriptor>> {
        let schema = self.introspector.introspect(&self.config.schema_url).await?;
        let descriptors: Vec<_> = self
            .registry
            .discover(&schema)
            .into_iter()
            .filter(|d| self.config.is_selected(d))
            .collect();

        for name in &self.config.collections {
            let known = descriptors
                .iter()
                .any(|d| &d.collection_name == name || &d.element_type_name == name);
            if !known {
                warn!(collection = %name, "Selected collection not found in schema");
            }
        }

        Ok(descriptors)
    }

    /// Stored cursor and lease rows.
    pub async fn status(&self) -> Result<Vec<SyncStateRecord>> {
        Ok(self.state.list().await?)
    }

    /// Forget a collection's cursor so the next cycle starts over.
    pub async fn reset_cursor(&self, collection: &str) -> Result<bool> {
        Ok(self.state.reset_cursor(collection).await?)
    }

    /// Hand back every lease this process holds.
    pub async fn release_leases(&self) {
        if let Err(e) = self.leases.release_all().await {
            warn!(error = %e, "Failed to release leases");
        }
    }

    async fn execute_cycle(&self, cycle: u64, cancel: &CancellationToken) -> Result<CycleReport> {
        let descriptors = self.discover().await?;
        let endpoint = self.endpoints.resolve().await?;

        info!(cycle, collections = descriptors.len(), "Cycle started");
        self.emit(SyncEvent::CycleStarted {
            cycle,
            collections: descriptors.len(),
        });

        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };

        for descriptor in &descriptors {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let outcome = self.sync_collection(&endpoint, descriptor, cancel).await?;
            let cancelled = matches!(outcome, CollectionOutcome::Cancelled { .. });
            report.collections.push(CollectionReport {
                collection: descriptor.collection_name.clone(),
                outcome,
            });

            if cancelled {
                report.cancelled = true;
                break;
            }
        }

        Ok(report)
    }

    /// Runs one collection under its lease. Only run-fatal errors escape;
    /// everything else becomes [`CollectionOutcome::Failed`].
    #[instrument(skip(self, endpoint, descriptor, cancel), fields(collection = %descriptor.collection_name))]
    async fn sync_collection(
        &self,
        endpoint: &str,
        descriptor: &CollectionDescriptor,
        cancel: &CancellationToken,
    ) -> Result<CollectionOutcome> {
        let collection = descriptor.collection_name.as_str();
        let mut run = CollectionRun::new(collection);
        run.transition(CollectionState::LeaseRequested)?;

        let guard = match self.leases.acquire(collection).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                run.transition(CollectionState::Skipped)?;
                info!("Lease held by another worker, skipping");
                self.emit(SyncEvent::LeaseDenied {
                    collection: collection.to_string(),
                });
                return Ok(CollectionOutcome::Skipped);
            }
            Err(e) => {
                run.transition(CollectionState::Failed)?;
                error!(error = %e, "Lease acquisition failed");
                self.emit(SyncEvent::CollectionFailed {
                    collection: collection.to_string(),
                    message: e.to_string(),
                });
                return Ok(CollectionOutcome::Failed {
                    message: e.to_string(),
                });
            }
        };

        self.emit(SyncEvent::LeaseAcquired {
            collection: collection.to_string(),
            owner: self.leases.worker_id().to_string(),
        });
        run.transition(CollectionState::Fetching)?;

        let mut fatal = None;
        let outcome = match self.drive(endpoint, descriptor, &guard, &mut run, cancel).await {
            Ok(()) => {
                run.transition(CollectionState::Done)?;
                info!(pages = run.pages, "Collection mirrored");
                self.emit(SyncEvent::CollectionCompleted {
                    collection: collection.to_string(),
                    pages: run.pages,
                });
                CollectionOutcome::Completed { pages: run.pages }
            }
            Err(SyncError::Cancelled) => {
                run.transition(CollectionState::Cancelled)?;
                info!(pages = run.pages, "Collection interrupted by shutdown");
                CollectionOutcome::Cancelled { pages: run.pages }
            }
            Err(e) => {
                run.transition(CollectionState::Failed)?;
                error!(error = %e, pages = run.pages, "Collection failed");
                self.emit(SyncEvent::CollectionFailed {
                    collection: collection.to_string(),
                    message: e.to_string(),
                });
                let message = e.to_string();
                if e.is_fatal_to_run() {
                    fatal = Some(e);
                }
                CollectionOutcome::Failed { message }
            }
        };

        match guard.release().await {
            Ok(true) => {}
            Ok(false) => warn!("Lease was taken over before release"),
            Err(e) => warn!(error = %e, "Failed to release lease"),
        }
        run.transition(CollectionState::LeaseReleased)?;
        self.emit(SyncEvent::LeaseReleased {
            collection: collection.to_string(),
        });

        match fatal {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// Fetch/persist loop. Leaves `run` in `Persisting` on success.
    async fn drive(
        &self,
        endpoint: &str,
        descriptor: &CollectionDescriptor,
        lease: &LeaseGuard,
        run: &mut CollectionRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let collection = descriptor.collection_name.as_str();
        self.tables.ensure_table(descriptor).await?;
        let query = PageQuery::for_collection(descriptor);

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            lease.renew().await?;

            let after = self.state.get_cursor(collection).await?;
            let variables = PageVariables {
                after: after.clone(),
                limit: self.config.page_size,
            };
            let page = self.fetcher.fetch(endpoint, &query, &variables).await?;

            self.emit(SyncEvent::PageFetched {
                collection: collection.to_string(),
                items: page.items.len(),
                deleted: page.deleted_ids.len(),
                has_more: page.has_more,
            });

            if page.has_more && (page.cursor.is_none() || page.cursor == after) {
                return Err(SyncError::DataShape(format!(
                    "page reports more items but cursor did not advance from {:?}",
                    after
                )));
            }

            run.transition(CollectionState::Persisting)?;
            let applied = self
                .tables
                .apply_page(descriptor, &page, lease.owner(), lease.now())
                .await?;
            run.pages += 1;

            debug!(
                page = run.pages,
                upserted = applied.upserted,
                deleted = applied.deleted,
                cursor = ?page.cursor,
                has_more = page.has_more,
                "Page persisted"
            );
            self.emit(SyncEvent::PagePersisted {
                collection: collection.to_string(),
                cursor: page.cursor.clone(),
            });

            if !page.has_more {
                return Ok(());
            }

            run.transition(CollectionState::Fetching)?;
            sleep(self.config.page_delay).await;
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is not an error
        self.events.emit(event).ok();
    }
}
