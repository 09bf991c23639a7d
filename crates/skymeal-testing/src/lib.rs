//! # skymeal-testing
//!
//! Test infrastructure for the skymeal resource pool.
//!
//! Provides an in-memory stand-in for a database connection together with a
//! [`ResourceFactory`] that can be told to fail, so pool behaviour can be
//! exercised without a running database server.
//!
//! ## Example
//!
//! ```rust,ignore
//! use skymeal_pool::Pool;
//! use skymeal_testing::MockFactory;
//!
//! let factory = MockFactory::new();
//! let pool = Pool::builder().capacity(3).build(factory.clone()).await?;
//!
//! pool.shutdown();
//! assert!(factory.probes().iter().all(|probe| probe.is_closed()));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

pub use mock::{ConnectionProbe, MockConnection, MockError, MockFactory};

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
