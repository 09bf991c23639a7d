//! Resource pool implementation.
//!
//! The pool holds a fixed set of resources created up front. Idle resources
//! live in a bounded FIFO queue; a semaphore carries one permit per queued
//! resource so that waiters are woken as soon as something is released.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ResourceFactory, ResourceMetadata, ResourceState, StateTable};

/// A fixed-capacity pool of reusable resources.
///
/// All resources are created when the pool is built and live until
/// [`shutdown()`](Pool::shutdown). Cloning a `Pool` is cheap and yields
/// another handle to the same pool.
///
/// # Example
///
/// ```rust,ignore
/// use skymeal_pool::{Pool, PoolConfig};
/// use std::time::Duration;
///
/// let pool = Pool::builder()
///     .capacity(3)
///     .acquire_timeout(Duration::from_secs(3))
///     .build(factory)
///     .await?;
///
/// let conn = pool.acquire().await?;
/// // Use connection...
/// pool.release(conn);
///
/// pool.shutdown();
/// ```
pub struct Pool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

struct PoolInner<F: ResourceFactory> {
    /// Pool configuration.
    config: PoolConfig,

    /// Creates and closes resources.
    factory: F,

    /// Idle resources, oldest release first.
    idle: ArrayQueue<Slot<F::Resource>>,

    /// One permit per resource in `idle`. Closed on shutdown.
    available: Semaphore,

    /// Whether the pool has been shut down.
    closed: AtomicBool,

    /// Per-resource state, for status and dumps.
    states: StateTable,

    /// When the pool was created.
    created_at: Instant,

    /// Pool metrics.
    metrics: Mutex<PoolMetricsInner>,
}

/// A resource together with its bookkeeping.
struct Slot<R> {
    resource: R,
    metadata: ResourceMetadata,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    /// Total resources created.
    resources_created: u64,
    /// Total resources destroyed.
    resources_destroyed: u64,
    /// Total successful checkouts.
    checkouts_successful: u64,
    /// Total failed checkouts (timeouts, closed pool, cancellation).
    checkouts_failed: u64,
    /// Checkouts that failed on their deadline.
    checkout_timeouts: u64,
    /// Resources returned to the idle store.
    releases: u64,
    /// Releases that could not put the resource back.
    release_failures: u64,
    /// Resources whose close reported an error.
    destroy_failures: u64,
}

impl Pool<NoFactory> {
    /// Create a new pool builder.
    ///
    /// Use the builder to configure the pool before creating it.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }
}

impl<F: ResourceFactory> Pool<F> {
    /// Create a new pool, eagerly populating it with `config.capacity` resources.
    ///
    /// Construction is all-or-nothing: if the factory fails, every resource
    /// created so far is destroyed and [`PoolError::Construction`] is returned.
    pub async fn new(config: PoolConfig, factory: F) -> Result<Self, PoolError> {
        config.validate()?;
        let capacity = config.capacity;

        let mut slots = Vec::with_capacity(capacity);
        for id in 1..=capacity as u64 {
            match factory.create().await {
                Ok(resource) => {
                    tracing::trace!(resource_id = id, "resource created");
                    slots.push(Slot {
                        resource,
                        metadata: ResourceMetadata::new(id),
                    });
                }
                Err(e) => {
                    let created = slots.len();
                    tracing::error!(
                        created,
                        capacity,
                        error = %e,
                        "failed to initialize resource pool"
                    );
                    for slot in slots {
                        if let Err(close_err) = factory.destroy(slot.resource) {
                            tracing::warn!(
                                resource_id = slot.metadata.id,
                                error = %close_err,
                                "failed to close resource after aborted initialization"
                            );
                        }
                    }
                    return Err(PoolError::construction(created, capacity, e));
                }
            }
        }

        let idle = ArrayQueue::new(capacity);
        for slot in slots {
            let pushed = idle.push(slot).is_ok();
            debug_assert!(pushed, "idle store is sized to capacity");
        }

        let inner = Arc::new(PoolInner {
            config,
            factory,
            idle,
            available: Semaphore::new(capacity),
            closed: AtomicBool::new(false),
            states: StateTable::new(capacity),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner {
                resources_created: capacity as u64,
                ..PoolMetricsInner::default()
            }),
        });

        tracing::info!(capacity, "resource pool initialized");

        Ok(Self { inner })
    }

    /// Get a resource, waiting up to the configured acquire timeout.
    pub async fn acquire(&self) -> Result<PooledResource<F>, PoolError> {
        self.acquire_timeout(self.inner.config.acquire_timeout).await
    }

    /// Get a resource, waiting at most `timeout` for one to become idle.
    ///
    /// A zero timeout never waits. Fails with [`PoolError::Timeout`] when the
    /// deadline passes and with [`PoolError::PoolClosed`] if the pool is or
    /// becomes shut down. Dropping the returned future abandons the wait
    /// without affecting the pool.
    pub async fn acquire_timeout(
        &self,
        timeout: Duration,
    ) -> Result<PooledResource<F>, PoolError> {
        let result = self.wait_for_permit(timeout, None).await;
        self.finish_checkout(result)
    }

    /// Like [`acquire_timeout()`](Pool::acquire_timeout), but gives up with
    /// [`PoolError::Cancelled`] as soon as `cancel` is triggered.
    pub async fn acquire_with_cancel(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PooledResource<F>, PoolError> {
        let result = self.wait_for_permit(timeout, Some(cancel)).await;
        self.finish_checkout(result)
    }

    /// Try to get a resource without waiting.
    ///
    /// Returns `None` if no resources are immediately idle.
    pub fn try_acquire(&self) -> Result<Option<PooledResource<F>>, PoolError> {
        if self.is_shut_down() {
            return Err(PoolError::PoolClosed);
        }

        match self.inner.available.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.finish_checkout(Ok(())).map(Some)
            }
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(PoolError::PoolClosed),
        }
    }

    async fn wait_for_permit(
        &self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), PoolError> {
        if self.is_shut_down() {
            return Err(PoolError::PoolClosed);
        }

        tracing::trace!(timeout = ?timeout, "acquiring resource from pool");

        let permit = if timeout.is_zero() {
            self.inner
                .available
                .try_acquire()
                .map_err(|e| match e {
                    TryAcquireError::Closed => PoolError::PoolClosed,
                    TryAcquireError::NoPermits => PoolError::Timeout(timeout),
                })?
        } else {
            let deadline = deadline_after(timeout);
            let wait = tokio::time::timeout_at(deadline, self.inner.available.acquire());

            let outcome = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(PoolError::Cancelled),
                    outcome = wait => outcome,
                },
                None => wait.await,
            };

            outcome
                .map_err(|_| PoolError::Timeout(timeout))?
                .map_err(|_| PoolError::PoolClosed)?
        };

        // The permit now stands for the slot popped below; release re-adds it.
        permit.forget();
        Ok(())
    }

    fn finish_checkout(
        &self,
        permitted: Result<(), PoolError>,
    ) -> Result<PooledResource<F>, PoolError> {
        let result = permitted.and_then(|()| self.inner.take_idle());
        let mut metrics = self.inner.metrics.lock();

        match result {
            Ok(slot) => {
                metrics.checkouts_successful += 1;
                drop(metrics);
                tracing::trace!(
                    resource_id = slot.metadata.id,
                    checkout_count = slot.metadata.checkout_count,
                    "resource checked out"
                );
                Ok(PooledResource {
                    slot: Some(slot),
                    pool: Arc::clone(&self.inner),
                })
            }
            Err(e) => {
                metrics.checkouts_failed += 1;
                if e.is_timeout() {
                    metrics.checkout_timeouts += 1;
                }
                drop(metrics);
                tracing::debug!(error = %e, "resource checkout failed");
                Err(e)
            }
        }
    }

    /// Return a borrowed resource to the pool.
    ///
    /// Accepts either a [`PooledResource`] or `None`. Never fails: a resource
    /// that cannot be reused is destroyed and the failure is logged. Dropping
    /// a [`PooledResource`] has the same effect.
    pub fn release(&self, resource: impl Into<Option<PooledResource<F>>>) {
        match resource.into() {
            Some(resource) => {
                if !Arc::ptr_eq(&resource.pool, &self.inner) {
                    tracing::warn!(
                        resource_id = resource.id(),
                        "resource released to a pool it was not borrowed from"
                    );
                }
                drop(resource);
            }
            None => tracing::debug!("release called without a resource"),
        }
    }

    /// Shut the pool down, destroying every idle resource.
    ///
    /// Waiters and later acquires fail with [`PoolError::PoolClosed`].
    /// Resources still borrowed are destroyed when they are released.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("resource pool already shut down");
            return;
        }

        self.inner.available.close();
        let destroyed = self.inner.drain();
        let borrowed = self.inner.states.count(ResourceState::Borrowed);

        if borrowed > 0 {
            tracing::warn!(
                borrowed,
                "resources still borrowed at shutdown will be destroyed on release"
            );
        }
        tracing::info!(destroyed, "resource pool shut down");
    }

    /// Check if the pool has been shut down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// The fixed number of resources this pool manages.
    ///
    /// This is the capacity, not the number currently idle.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.config.capacity
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let capacity = self.inner.config.capacity;
        let destroyed = self.inner.states.count(ResourceState::Destroyed);
        PoolStatus {
            available: self.inner.idle.len(),
            in_use: self.inner.states.count(ResourceState::Borrowed),
            total: capacity.saturating_sub(destroyed),
            max: capacity,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            resources_created: inner.resources_created,
            resources_destroyed: inner.resources_destroyed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            checkout_timeouts: inner.checkout_timeouts,
            releases: inner.releases,
            release_failures: inner.release_failures,
            destroy_failures: inner.destroy_failures,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Log and return the ids of every idle resource under `label`.
    pub fn dump(&self, label: impl Into<String>) -> PoolDump {
        let dump = PoolDump {
            label: label.into(),
            idle: self.inner.states.ids_in(ResourceState::Idle),
        };
        tracing::info!(label = %dump.label, idle = ?dump.idle, "pool dump");
        dump
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the factory backing this pool.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl<F: ResourceFactory> PoolInner<F> {
    /// Pop the oldest idle slot. Only fails if a shutdown drained the store.
    fn take_idle(&self) -> Result<Slot<F::Resource>, PoolError> {
        let mut slot = self.idle.pop().ok_or(PoolError::PoolClosed)?;
        slot.metadata.mark_checkout();
        self.states.set(slot.metadata.id, ResourceState::Borrowed);
        Ok(slot)
    }

    fn return_slot(&self, slot: Slot<F::Resource>) {
        let id = slot.metadata.id;

        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(resource_id = id, "resource released after shutdown, destroying");
            self.destroy(slot);
            return;
        }

        if self.factory.is_closed(&slot.resource) {
            tracing::warn!(resource_id = id, "released resource is closed, discarding");
            self.destroy(slot);
            return;
        }

        // Mark idle before the push: once queued, another task may borrow it.
        self.states.set(id, ResourceState::Idle);
        match self.idle.push(slot) {
            Ok(()) => {
                self.metrics.lock().releases += 1;
                self.available.add_permits(1);
                tracing::trace!(resource_id = id, "resource returned to pool");

                // Shutdown ran between the closed check above and the push.
                if self.closed.load(Ordering::SeqCst) {
                    self.drain();
                }
            }
            Err(slot) => {
                self.metrics.lock().release_failures += 1;
                tracing::error!(
                    resource_id = id,
                    "failed to return resource to pool, destroying it"
                );
                self.destroy(slot);
            }
        }
    }

    /// Destroy every idle resource. Returns how many were destroyed.
    fn drain(&self) -> usize {
        let mut destroyed = 0;
        while let Some(slot) = self.idle.pop() {
            self.destroy(slot);
            destroyed += 1;
        }
        destroyed
    }

    fn destroy(&self, slot: Slot<F::Resource>) {
        let id = slot.metadata.id;
        self.states.set(id, ResourceState::Destroyed);
        let result = self.factory.destroy(slot.resource);

        let mut metrics = self.metrics.lock();
        metrics.resources_destroyed += 1;
        if let Err(e) = result {
            metrics.destroy_failures += 1;
            drop(metrics);
            tracing::warn!(resource_id = id, error = %e, "failed to close resource");
        }
    }
}

/// Deadline `timeout` from now, capped at roughly thirty years out.
fn deadline_after(timeout: Duration) -> tokio::time::Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

    let now = tokio::time::Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

impl<F: ResourceFactory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        let destroyed = self.drain();
        if destroyed > 0 {
            tracing::debug!(destroyed, "resource pool dropped, idle resources closed");
        }
    }
}

/// Builder for creating a resource pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder()
///     .pool_config(pool_config)
///     .build(factory)
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    pool_config: PoolConfig,
}

impl PoolBuilder {
    /// Create a new pool builder with default settings.
    pub fn new() -> Self {
        Self {
            pool_config: PoolConfig::default(),
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the number of resources.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.pool_config.capacity = capacity;
        self
    }

    /// Set the default acquire timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.acquire_timeout = timeout;
        self
    }

    /// Build the pool, creating every resource through `factory`.
    pub async fn build<F: ResourceFactory>(self, factory: F) -> Result<Pool<F>, PoolError> {
        Pool::new(self.pool_config, factory).await
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Placeholder factory naming the type of [`Pool::builder()`].
///
/// Never instantiated; the builder picks the real factory at
/// [`build()`](PoolBuilder::build).
#[derive(Debug)]
pub enum NoFactory {}

#[async_trait::async_trait]
impl ResourceFactory for NoFactory {
    type Resource = ();
    type Error = std::convert::Infallible;

    async fn create(&self) -> Result<Self::Resource, Self::Error> {
        match *self {}
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle resources available.
    pub available: usize,
    /// Number of resources currently borrowed.
    pub in_use: usize,
    /// Number of resources not yet destroyed.
    pub total: usize,
    /// Capacity the pool was built with.
    pub max: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if no resource is idle.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.available == 0
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total resources created since pool start.
    pub resources_created: u64,
    /// Total resources destroyed since pool start.
    pub resources_destroyed: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Failed checkouts (timeouts, pool closed, cancellation).
    pub checkouts_failed: u64,
    /// Checkouts that timed out.
    pub checkout_timeouts: u64,
    /// Resources returned to the idle store.
    pub releases: u64,
    /// Releases that had to destroy the resource instead.
    pub release_failures: u64,
    /// Resources whose close reported an error.
    pub destroy_failures: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

/// Snapshot of the idle resources, produced by [`Pool::dump()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDump {
    /// Caller-supplied label.
    pub label: String,
    /// Ids of the idle resources, ascending.
    pub idle: Vec<u64>,
}

impl fmt::Display for PoolDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "====================")?;
        writeln!(f, "{}", self.label)?;
        for id in &self.idle {
            writeln!(f, "resource #{id}")?;
        }
        write!(f, "====================")
    }
}

/// A resource borrowed from the pool.
///
/// Dereferences to the underlying resource. When dropped, the resource is
/// returned to the pool it came from.
pub struct PooledResource<F: ResourceFactory> {
    /// Taken only on drop.
    slot: Option<Slot<F::Resource>>,
    /// Pool to return the resource to.
    pool: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> PooledResource<F> {
    fn slot(&self) -> &Slot<F::Resource> {
        self.slot
            .as_ref()
            .unwrap_or_else(|| unreachable!("slot is only taken on drop"))
    }

    /// The pool-unique id of this resource.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.slot().metadata.id
    }

    /// Get the resource metadata.
    #[must_use]
    pub fn metadata(&self) -> &ResourceMetadata {
        &self.slot().metadata
    }
}

impl<F: ResourceFactory> Deref for PooledResource<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        &self.slot().resource
    }
}

impl<F: ResourceFactory> DerefMut for PooledResource<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self
            .slot
            .as_mut()
            .unwrap_or_else(|| unreachable!("slot is only taken on drop"))
            .resource
    }
}

impl<F> fmt::Debug for PooledResource<F>
where
    F: ResourceFactory,
    F::Resource: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("resource", &self.slot().resource)
            .field("metadata", &self.slot().metadata)
            .finish()
    }
}

impl<F: ResourceFactory> Drop for PooledResource<F> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.return_slot(slot);
        }
    }
}
