//! Behavioural tests for the resource pool, run against mock connections.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use skymeal_pool::{CancellationToken, Pool, PoolConfig, PoolError, PooledResource};
use skymeal_testing::{MockFactory, init_test_tracing};
use tokio::time::Instant;
use tokio_test::{assert_pending, assert_ready_ok, task};

const POOL_SIZE: usize = 3;

async fn pool_with(factory: &MockFactory, capacity: usize) -> Pool<MockFactory> {
    init_test_tracing();
    Pool::builder()
        .capacity(capacity)
        .build(factory.clone())
        .await
        .unwrap()
}

async fn exhaust(pool: &Pool<MockFactory>) -> Vec<PooledResource<MockFactory>> {
    let mut held = Vec::with_capacity(pool.size());
    for _ in 0..pool.size() {
        held.push(pool.acquire().await.unwrap());
    }
    held
}

// =============================================================================
// Acquire / release
// =============================================================================

#[tokio::test]
async fn test_acquire_returns_open_connection() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;

    let mut conn = pool.acquire().await.unwrap();
    assert!(!conn.is_closed());
    assert_eq!(conn.execute("SELECT * FROM airline").unwrap(), 1);

    pool.release(conn);
    assert_eq!(pool.status().available, POOL_SIZE);
    assert_eq!(factory.created(), POOL_SIZE as u64);
}

#[tokio::test]
async fn test_cyclic_acquisition() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;
    pool.dump("Initial pool state:");

    let first = pool.acquire().await.unwrap();
    let first_serial = first.serial();
    pool.release(first);

    let mut others = Vec::new();
    for _ in 0..pool.size() - 1 {
        others.push(pool.acquire().await.unwrap());
    }
    pool.dump("Acquire all the connections beside one:");

    let again = pool.acquire().await.unwrap();
    assert_eq!(again.serial(), first_serial, "released connection should be reused");
    assert_eq!(again.metadata().checkout_count, 2);

    pool.release(again);
    for conn in others {
        pool.release(conn);
    }
    assert_eq!(pool.dump("End pool state:").idle.len(), POOL_SIZE);
}

#[tokio::test]
async fn test_single_slot_reuse_is_identical() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 1).await;

    let conn = pool.acquire().await.unwrap();
    let id = conn.id();
    pool.release(conn);

    assert_eq!(pool.acquire().await.unwrap().id(), id);
}

#[tokio::test]
async fn test_multiple_acquire_release_cycles() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;

    for _ in 0..pool.size() * 2 + 1 {
        let conn = pool.acquire().await.unwrap();
        pool.release(conn);
        assert_eq!(pool.status().available, POOL_SIZE);
        assert_eq!(pool.status().in_use, 0);
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.checkouts_successful, (POOL_SIZE * 2 + 1) as u64);
    assert_eq!(metrics.releases, (POOL_SIZE * 2 + 1) as u64);
    assert_eq!(factory.created(), POOL_SIZE as u64);
}

#[tokio::test]
async fn test_dropping_guard_releases() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;

    {
        let _conn = pool.acquire().await.unwrap();
        assert_eq!(pool.status().in_use, 1);
    }
    assert_eq!(pool.status().in_use, 0);
    assert_eq!(pool.status().available, POOL_SIZE);
}

// =============================================================================
// Exhaustion, blocking and timeouts
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_over_capacity_blocks() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;
    let held = exhaust(&pool).await;

    let waiter_pool = pool.clone();
    let mut waiter = tokio::spawn(async move { waiter_pool.acquire().await });

    let blocked = tokio::time::timeout(Duration::from_millis(500), &mut waiter).await;
    assert!(blocked.is_err(), "acquire on an empty pool should block");

    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());

    drop(held);
    assert_eq!(pool.status().available, POOL_SIZE);
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test(start_paused = true)]
async fn test_connection_blocks_until_available() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;
    let mut held = exhaust(&pool).await;

    let mut waiter = task::spawn(pool.acquire_timeout(Duration::from_secs(5)));
    assert_pending!(waiter.poll());

    let released = held.remove(0);
    let released_serial = released.serial();
    pool.release(released);

    assert!(waiter.is_woken());
    let acquired = assert_ready_ok!(waiter.poll());
    assert_eq!(acquired.serial(), released_serial);
    drop(waiter);

    pool.release(acquired);
    drop(held);
    assert_eq!(pool.status().available, POOL_SIZE);
}

#[tokio::test(start_paused = true)]
async fn test_connection_timeout_when_pool_is_empty() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;
    let held = exhaust(&pool).await;

    let start = Instant::now();
    let err = pool
        .acquire_timeout(Duration::from_millis(1000))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(1000), "waited {elapsed:?}");
    assert!(err.is_timeout());
    assert!(err.to_string().to_lowercase().contains("timeout"));
    assert_eq!(pool.metrics().checkout_timeouts, 1);

    drop(held);
}

#[tokio::test]
async fn test_unbounded_timeout_on_idle_pool_succeeds() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 2).await;

    let conn = pool.acquire_timeout(Duration::MAX).await.unwrap();
    assert!(!conn.is_closed());
    pool.release(conn);
    assert_eq!(pool.status().available, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_timeout_waits_for_release() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 1).await;
    let held = pool.acquire().await.unwrap();
    let held_serial = held.serial();

    let mut waiter = task::spawn(pool.acquire_timeout(Duration::MAX));
    assert_pending!(waiter.poll());

    pool.release(held);
    assert!(waiter.is_woken());
    let acquired = assert_ready_ok!(waiter.poll());
    assert_eq!(acquired.serial(), held_serial);
}

#[tokio::test(start_paused = true)]
async fn test_default_timeout_is_three_seconds() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, 1).await;
    let _held = pool.acquire().await.unwrap();

    let start = Instant::now();
    let err = pool.acquire().await.unwrap_err();

    assert!(matches!(err, PoolError::Timeout(d) if d == Duration::from_millis(3000)));
    assert!(start.elapsed() >= Duration::from_millis(3000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_never_duplicates() {
    const TASKS: usize = 16;
    const ROUNDS: usize = 50;

    let factory = MockFactory::new();
    let pool = pool_with(&factory, 4).await;
    let in_flight = Arc::new(Mutex::new(HashSet::new()));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..TASKS {
        let pool = pool.clone();
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            for _ in 0..ROUNDS {
                let mut conn = pool.acquire().await.unwrap();
                {
                    let mut set = in_flight.lock();
                    assert!(set.insert(conn.id()), "resource handed out twice");
                    peak.fetch_max(set.len(), Ordering::SeqCst);
                }
                conn.execute("UPDATE inventory SET quantity = quantity - 1").unwrap();
                tokio::task::yield_now().await;
                in_flight.lock().remove(&conn.id());
                pool.release(conn);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= pool.size());
    let status = pool.status();
    assert_eq!(status.available, pool.size());
    assert_eq!(status.in_use, 0);
    assert_eq!(pool.metrics().checkouts_successful, (TASKS * ROUNDS) as u64);
    assert_eq!(factory.created(), 4);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_fails() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;
    let held = exhaust(&pool).await;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let err = pool
        .acquire_with_cancel(Duration::from_secs(5), &token)
        .await
        .unwrap_err();

    assert!(matches!(err, PoolError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!pool.is_shut_down());

    drop(held);
    assert!(pool.acquire().await.is_ok());
}

#[tokio::test]
async fn test_pre_cancelled_waiter_fails_without_blocking() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;
    let held = exhaust(&pool).await;

    let token = CancellationToken::new();
    token.cancel();
    let err = pool
        .acquire_with_cancel(Duration::from_secs(60), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Cancelled));

    drop(held);
    assert_eq!(pool.status().available, POOL_SIZE);
}

// =============================================================================
// Release edge cases
// =============================================================================

#[tokio::test]
async fn test_release_none_is_noop() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;

    pool.release(None);

    let status = pool.status();
    assert_eq!(status.available, POOL_SIZE);
    assert_eq!(status.total, POOL_SIZE);
    assert_eq!(pool.metrics().releases, 0);
}

#[tokio::test]
async fn test_release_closed_connection_discards_it() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;

    let conn = pool.acquire().await.unwrap();
    conn.close();
    pool.release(conn);

    let status = pool.status();
    assert_eq!(status.total, POOL_SIZE - 1);
    assert_eq!(status.available + status.in_use, status.total);
    assert_eq!(pool.metrics().resources_destroyed, 1);
    assert_eq!(factory.created(), POOL_SIZE as u64);

    // The remaining connections keep cycling.
    for _ in 0..POOL_SIZE * 2 {
        let conn = pool.acquire().await.unwrap();
        assert!(!conn.is_closed());
        pool.release(conn);
    }
}

#[tokio::test]
async fn test_release_to_other_pool_returns_to_origin() {
    let factory = MockFactory::new();
    let origin = pool_with(&factory, 1).await;
    let other = pool_with(&MockFactory::new(), 1).await;

    let conn = origin.acquire().await.unwrap();
    other.release(conn);

    assert_eq!(origin.status().available, 1);
    assert_eq!(other.status().available, 1);
}

// =============================================================================
// Construction
// =============================================================================

#[tokio::test]
async fn test_construction_failure_closes_created_connections() {
    init_test_tracing();
    let factory = MockFactory::failing_at(3);

    let err = Pool::new(PoolConfig::new().capacity(5), factory.clone())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PoolError::Construction {
            created: 2,
            capacity: 5,
            ..
        }
    ));
    assert!(err.to_string().contains("refused"));
    assert_eq!(factory.probes().len(), 2);
    assert_eq!(factory.closed_count(), 2);
}

#[tokio::test]
async fn test_pool_from_properties() {
    let config = PoolConfig::from_properties("DB_POOL_SIZE=2\nDB_POOL_TIMEOUT_MS=250").unwrap();
    let pool = Pool::new(config, MockFactory::new()).await.unwrap();

    assert_eq!(pool.size(), 2);
    assert_eq!(pool.config().acquire_timeout, Duration::from_millis(250));
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;

    let conn = pool.acquire().await.unwrap();
    let probe_serial = conn.serial();
    pool.release(conn);
    pool.shutdown();

    assert!(pool.is_shut_down());
    assert!(factory.probes().iter().all(|probe| probe.is_closed()));
    assert!(
        factory
            .probes()
            .iter()
            .any(|probe| probe.serial() == probe_serial)
    );
    assert!(matches!(
        pool.acquire().await.unwrap_err(),
        PoolError::PoolClosed
    ));
    assert!(matches!(pool.try_acquire(), Err(PoolError::PoolClosed)));
}

#[tokio::test]
async fn test_acquire_after_shutdown_fails_fast() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;
    pool.shutdown();

    let start = std::time::Instant::now();
    let err = pool
        .acquire_timeout(Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::PoolClosed));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_late_release_after_shutdown_destroys() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;

    let conn = pool.acquire().await.unwrap();
    pool.shutdown();
    assert_eq!(factory.closed_count(), POOL_SIZE - 1);

    pool.release(conn);
    assert_eq!(factory.closed_count(), POOL_SIZE);
    assert_eq!(pool.status().available, 0);
    assert_eq!(pool.status().total, 0);
    assert!(pool.dump("after late release").idle.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_wakes_waiters() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;
    let held = exhaust(&pool).await;

    let waiter_pool = pool.clone();
    let waiter =
        tokio::spawn(async move { waiter_pool.acquire_timeout(Duration::from_secs(10)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    pool.shutdown();
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::PoolClosed));

    drop(held);
    assert_eq!(factory.closed_count(), POOL_SIZE);
}

#[tokio::test]
async fn test_shutdown_continues_past_close_failures() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;
    factory.fail_destroy(true);

    pool.shutdown();

    let metrics = pool.metrics();
    assert_eq!(metrics.resources_destroyed, POOL_SIZE as u64);
    assert_eq!(metrics.destroy_failures, POOL_SIZE as u64);
    assert_eq!(factory.closed_count(), POOL_SIZE);
}

#[tokio::test]
async fn test_double_shutdown_is_harmless() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;

    pool.shutdown();
    pool.shutdown();

    assert!(pool.is_shut_down());
    assert_eq!(pool.metrics().resources_destroyed, POOL_SIZE as u64);
}

#[tokio::test]
async fn test_dropping_pool_closes_connections() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;
    drop(pool);
    assert_eq!(factory.closed_count(), POOL_SIZE);
}

// =============================================================================
// Introspection
// =============================================================================

#[tokio::test]
async fn test_dump_and_status() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, POOL_SIZE).await;

    let conn = pool.acquire().await.unwrap();
    let dump = pool.dump("one borrowed");
    assert_eq!(dump.idle.len(), POOL_SIZE - 1);
    assert!(!dump.idle.contains(&conn.id()));
    assert!(dump.to_string().contains("one borrowed"));

    let status = pool.status();
    assert_eq!(status.in_use, 1);
    assert_eq!(status.max, POOL_SIZE);
    assert!(!status.is_exhausted());

    pool.release(conn);
    assert_eq!(pool.size(), POOL_SIZE);
}
