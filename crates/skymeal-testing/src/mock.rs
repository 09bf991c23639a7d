//! In-memory connection and factory for pool tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use skymeal_pool::{ResourceFactory, async_trait};
use thiserror::Error;

/// Errors produced by the mock connection layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MockError {
    /// The factory was configured to refuse this connection.
    #[error("connection {serial} refused by backing store")]
    CreateFailed {
        /// Serial number of the refused connection.
        serial: u64,
    },

    /// The factory was configured to fail closing connections.
    #[error("failed to close connection {serial}")]
    CloseFailed {
        /// Serial number of the connection.
        serial: u64,
    },

    /// A statement was issued on a closed connection.
    #[error("connection {serial} is closed")]
    Closed {
        /// Serial number of the connection.
        serial: u64,
    },
}

/// Observes whether a connection has been closed, after the pool owns it.
#[derive(Debug, Clone)]
pub struct ConnectionProbe {
    serial: u64,
    closed: Arc<AtomicBool>,
}

impl ConnectionProbe {
    /// Serial number of the observed connection.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Check if the observed connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A fake database connection.
#[derive(Debug)]
pub struct MockConnection {
    serial: u64,
    closed: Arc<AtomicBool>,
    statements: u64,
}

impl MockConnection {
    fn new(serial: u64) -> Self {
        Self {
            serial,
            closed: Arc::new(AtomicBool::new(false)),
            statements: 0,
        }
    }

    /// Serial number assigned by the factory, starting at 1.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Run a statement. Fails once the connection is closed.
    pub fn execute(&mut self, statement: &str) -> Result<u64, MockError> {
        if self.is_closed() {
            return Err(MockError::Closed {
                serial: self.serial,
            });
        }
        self.statements += 1;
        tracing::trace!(serial = self.serial, statement, "mock statement executed");
        Ok(self.statements)
    }

    /// Number of statements run on this connection.
    #[must_use]
    pub fn statements(&self) -> u64 {
        self.statements
    }

    /// Simulate the server dropping the connection.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Check if the connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn probe(&self) -> ConnectionProbe {
        ConnectionProbe {
            serial: self.serial,
            closed: Arc::clone(&self.closed),
        }
    }
}

#[derive(Debug, Default)]
struct FactoryState {
    created: AtomicU64,
    fail_create_at: Option<u64>,
    fail_destroy: AtomicBool,
    probes: Mutex<Vec<ConnectionProbe>>,
}

/// A [`ResourceFactory`] producing [`MockConnection`]s.
///
/// Clones share state, so a test can keep a clone to inspect connections
/// after handing the factory to a pool.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<FactoryState>,
}

impl MockFactory {
    /// Create a factory that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory that refuses the connection with the given serial.
    ///
    /// Serials start at 1, so `failing_at(3)` creates two connections and
    /// then fails.
    #[must_use]
    pub fn failing_at(serial: u64) -> Self {
        Self {
            state: Arc::new(FactoryState {
                fail_create_at: Some(serial),
                ..FactoryState::default()
            }),
        }
    }

    /// Make every subsequent close attempt fail.
    ///
    /// Failed closes still mark the connection closed, as a real driver
    /// would after tearing down the socket.
    pub fn fail_destroy(&self, fail: bool) {
        self.state.fail_destroy.store(fail, Ordering::SeqCst);
    }

    /// Number of connections created so far.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Probes for every connection created, in creation order.
    #[must_use]
    pub fn probes(&self) -> Vec<ConnectionProbe> {
        self.state.probes.lock().clone()
    }

    /// Number of created connections that have been closed.
    #[must_use]
    pub fn closed_count(&self) -> usize {
        self.state
            .probes
            .lock()
            .iter()
            .filter(|probe| probe.is_closed())
            .count()
    }
}

#[async_trait]
impl ResourceFactory for MockFactory {
    type Resource = MockConnection;
    type Error = MockError;

    async fn create(&self) -> Result<MockConnection, MockError> {
        let serial = self.state.created.load(Ordering::SeqCst) + 1;
        if self.state.fail_create_at == Some(serial) {
            return Err(MockError::CreateFailed { serial });
        }

        self.state.created.store(serial, Ordering::SeqCst);
        let conn = MockConnection::new(serial);
        self.state.probes.lock().push(conn.probe());
        Ok(conn)
    }

    fn is_closed(&self, conn: &MockConnection) -> bool {
        conn.is_closed()
    }

    fn destroy(&self, conn: MockConnection) -> Result<(), MockError> {
        conn.close();
        if self.state.fail_destroy.load(Ordering::SeqCst) {
            return Err(MockError::CloseFailed {
                serial: conn.serial,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_connection_rejects_statements() {
        let mut conn = MockConnection::new(7);
        assert_eq!(conn.execute("SELECT 1").unwrap(), 1);
        conn.close();
        assert_eq!(
            conn.execute("SELECT 1").unwrap_err(),
            MockError::Closed { serial: 7 }
        );
        assert_eq!(conn.statements(), 1);
    }

    #[test]
    fn test_probe_tracks_close() {
        let conn = MockConnection::new(1);
        let probe = conn.probe();
        assert!(!probe.is_closed());
        conn.close();
        assert!(probe.is_closed());
        assert_eq!(probe.serial(), 1);
    }

    #[test]
    fn test_failing_destroy_still_closes() {
        let factory = MockFactory::new();
        factory.fail_destroy(true);
        let conn = MockConnection::new(2);
        let probe = conn.probe();
        assert_eq!(
            factory.destroy(conn).unwrap_err(),
            MockError::CloseFailed { serial: 2 }
        );
        assert!(probe.is_closed());
    }
}
