//! Resource lifecycle management.
//!
//! The pool never inspects the resources it holds. Everything it needs to
//! know about them (how to create one, whether one has gone bad, how to
//! dispose of one) is supplied by a [`ResourceFactory`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use async_trait::async_trait;

/// Creates and disposes of the resources managed by a [`Pool`](crate::Pool).
///
/// `create` is called exactly `capacity` times, while the pool is being
/// constructed. `destroy` is called during shutdown and whenever a released
/// resource cannot go back into the idle store.
///
/// # Example
///
/// ```rust,ignore
/// struct Connector { url: String }
///
/// #[async_trait]
/// impl ResourceFactory for Connector {
///     type Resource = MySqlConnection;
///     type Error = std::io::Error;
///
///     async fn create(&self) -> Result<Self::Resource, Self::Error> {
///         MySqlConnection::open(&self.url).await
///     }
///
///     fn is_closed(&self, conn: &Self::Resource) -> bool {
///         conn.is_closed()
///     }
/// }
/// ```
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled resource type.
    type Resource: Send + 'static;

    /// Error returned when a resource cannot be created or closed.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create one live resource.
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Report whether a resource is already closed and must not be reused.
    fn is_closed(&self, _resource: &Self::Resource) -> bool {
        false
    }

    /// Close a resource that is leaving the pool for good.
    fn destroy(&self, resource: Self::Resource) -> Result<(), Self::Error> {
        drop(resource);
        Ok(())
    }
}

/// Where a pooled resource currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceState {
    /// Held in the idle store, ready to be borrowed.
    Idle = 0,
    /// Owned by exactly one caller.
    Borrowed = 1,
    /// Closed and gone from the pool.
    Destroyed = 2,
}

impl ResourceState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Borrowed,
            _ => Self::Destroyed,
        }
    }

    /// Check if the resource is available for borrowing.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Bookkeeping attached to each pooled resource.
#[derive(Debug, Clone)]
pub struct ResourceMetadata {
    /// Pool-unique resource identifier, assigned in creation order from 1.
    pub id: u64,
    /// When the resource was created.
    pub created_at: Instant,
    /// When the resource was last handed out.
    pub last_checkout: Option<Instant>,
    /// How many times the resource has been handed out.
    pub checkout_count: u64,
}

impl ResourceMetadata {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            last_checkout: None,
            checkout_count: 0,
        }
    }

    pub(crate) fn mark_checkout(&mut self) {
        self.last_checkout = Some(Instant::now());
        self.checkout_count += 1;
    }

    /// Age of the resource.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

/// Per-resource state, indexed by resource id.
///
/// Diagnostic only: the idle store and the semaphore are the source of truth
/// for handing out resources.
#[derive(Debug)]
pub(crate) struct StateTable {
    states: Box<[AtomicU8]>,
}

impl StateTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            states: (0..capacity)
                .map(|_| AtomicU8::new(ResourceState::Idle as u8))
                .collect(),
        }
    }

    pub(crate) fn set(&self, id: u64, state: ResourceState) {
        if let Some(slot) = self.slot(id) {
            slot.store(state as u8, Ordering::Release);
        }
    }

    pub(crate) fn get(&self, id: u64) -> Option<ResourceState> {
        self.slot(id)
            .map(|slot| ResourceState::from_u8(slot.load(Ordering::Acquire)))
    }

    /// Ids of every resource currently in `state`, ascending.
    pub(crate) fn ids_in(&self, state: ResourceState) -> Vec<u64> {
        (1..=self.states.len() as u64)
            .filter(|&id| self.get(id) == Some(state))
            .collect()
    }

    pub(crate) fn count(&self, state: ResourceState) -> usize {
        self.states
            .iter()
            .filter(|slot| slot.load(Ordering::Acquire) == state as u8)
            .count()
    }

    fn slot(&self, id: u64) -> Option<&AtomicU8> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        self.states.get(index)
    }
}
