//! # skymeal-pool
//!
//! Fixed-capacity resource pool for the skymeal catering persistence layer.
//!
//! Every DAO call borrows one connection from the pool, runs a statement and
//! hands the connection back. The pool creates all of its connections up
//! front and never grows or shrinks them on demand.
//!
//! ## Features
//!
//! - Eager, all-or-nothing population through a [`ResourceFactory`]
//! - Bounded waits: every acquire has a deadline (3 s by default)
//! - FIFO reuse of idle resources
//! - Release that never fails; unusable resources are destroyed and logged
//! - Shutdown that closes idle resources and fails later acquires fast
//! - Status, metrics and dumps for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use skymeal_pool::{Pool, PoolConfig};
//! use std::time::Duration;
//!
//! // Using the builder pattern
//! let pool = Pool::builder()
//!     .capacity(3)
//!     .acquire_timeout(Duration::from_secs(3))
//!     .build(factory)
//!     .await?;
//!
//! // Or using PoolConfig directly
//! let config = PoolConfig::from_properties("DB_POOL_SIZE=5")?;
//! let pool = Pool::new(config, factory).await?;
//!
//! // Borrow a connection
//! let conn = pool.acquire().await?;
//! // Use connection...
//! // Connection automatically returned to pool on drop, or explicitly:
//! pool.release(conn);
//!
//! // Check pool status
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//!
//! pool.shutdown();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{NoFactory, Pool, PoolBuilder, PoolDump, PoolMetrics, PoolStatus, PooledResource};

// Lifecycle management
pub use lifecycle::{ResourceFactory, ResourceMetadata, ResourceState};

// Factory implementations name the trait's async methods through this attribute.
pub use async_trait::async_trait;

// Cancellation handle accepted by `Pool::acquire_with_cancel`.
pub use tokio_util::sync::CancellationToken;
