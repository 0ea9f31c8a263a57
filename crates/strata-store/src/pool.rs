//! Bounded pool of validated connection leases.
//!
//! Unlike `r2d2::Pool`, the lease pool never blocks: when every slot is busy
//! [`LeasePool::acquire`] fails with [`PoolError::Exhausted`] and the caller
//! decides whether to retry. Connections are opened and validated through an
//! `r2d2::ManageConnection`, so the same manager (and its per-connection
//! init hook) works for both.
//!
//! Leases are handed back explicitly with [`LeasePool::release`] or thrown
//! away with [`LeasePool::discard`]. Releasing a lease the pool does not know
//! is a no-op.

use std::collections::{HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use r2d2::ManageConnection;
use thiserror::Error;
use tracing::{debug, warn};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Pool sizing and validation bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum leases outstanding at once (idle + busy).
    pub connection_limit: usize,
    /// An idle connection whose validity check takes longer than this is
    /// treated as stale.
    pub liveness_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection_limit: 10,
            liveness_timeout: Duration::from_millis(100),
        }
    }
}

/// Errors from the lease pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every slot is busy.
    #[error("pool exhausted: all {limit} connections are leased")]
    Exhausted {
        /// Configured connection limit.
        limit: usize,
    },
    /// The manager could not open a connection.
    #[error("failed to open connection: {0}")]
    Connect(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct LeaseId {
    pool: u64,
    seq: u64,
}

/// A connection exclusively owned by one caller until released.
#[derive(Debug)]
pub struct Lease<C> {
    id: LeaseId,
    conn: C,
}

impl<C> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for Lease<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

struct Slots<C> {
    idle: VecDeque<(LeaseId, C)>,
    busy: HashSet<LeaseId>,
    next_seq: u64,
}

enum Reserved<C> {
    Idle(LeaseId, C),
    Fresh(LeaseId),
}

/// Non-blocking pool of at most `connection_limit` connections.
pub struct LeasePool<M: ManageConnection> {
    id: u64,
    manager: M,
    config: PoolConfig,
    slots: Mutex<Slots<M::Connection>>,
}

impl<M: ManageConnection> LeasePool<M> {
    /// Build the pool and open its first connection.
    ///
    /// Failing to open that connection is fatal: a pool that cannot reach
    /// its backend at startup is never handed out.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        if config.connection_limit == 0 {
            return Err(PoolError::Exhausted { limit: 0 });
        }
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let first = manager
            .connect()
            .map_err(|err| PoolError::Connect(err.to_string()))?;

        let mut idle = VecDeque::with_capacity(config.connection_limit);
        idle.push_back((LeaseId { pool: id, seq: 0 }, first));

        Ok(Self {
            id,
            manager,
            config,
            slots: Mutex::new(Slots {
                idle,
                busy: HashSet::new(),
                next_seq: 1,
            }),
        })
    }

    /// Lease a connection, reusing a live idle one when possible.
    pub fn acquire(&self) -> Result<Lease<M::Connection>, PoolError> {
        let (id, conn) = match self.reserve()? {
            Reserved::Idle(id, mut conn) => {
                if self.is_live(&mut conn) {
                    (id, conn)
                } else {
                    debug!(lease = id.seq, "idle connection failed liveness check, replacing");
                    drop(conn);
                    (id, self.connect_into(id)?)
                }
            }
            Reserved::Fresh(id) => (id, self.connect_into(id)?),
        };
        Ok(Lease { id, conn })
    }

    /// Return a lease to the idle set. Unknown leases are ignored.
    pub fn release(&self, lease: Lease<M::Connection>) {
        let mut slots = self.slots.lock();
        if slots.busy.remove(&lease.id) {
            slots.idle.push_back((lease.id, lease.conn));
        } else {
            debug!(lease = lease.id.seq, "release of unknown lease ignored");
        }
    }

    /// Close a leased connection and free its slot.
    pub fn discard(&self, lease: Lease<M::Connection>) {
        let _ = self.slots.lock().busy.remove(&lease.id);
    }

    /// Leases currently held by callers.
    pub fn busy_count(&self) -> usize {
        self.slots.lock().busy.len()
    }

    /// Open connections waiting to be leased.
    pub fn idle_count(&self) -> usize {
        self.slots.lock().idle.len()
    }

    /// Configured limit.
    pub fn connection_limit(&self) -> usize {
        self.config.connection_limit
    }

    fn reserve(&self) -> Result<Reserved<M::Connection>, PoolError> {
        let mut slots = self.slots.lock();
        if let Some((id, conn)) = slots.idle.pop_front() {
            let _ = slots.busy.insert(id);
            return Ok(Reserved::Idle(id, conn));
        }
        if slots.busy.len() < self.config.connection_limit {
            let id = LeaseId {
                pool: self.id,
                seq: slots.next_seq,
            };
            slots.next_seq += 1;
            let _ = slots.busy.insert(id);
            return Ok(Reserved::Fresh(id));
        }
        Err(PoolError::Exhausted {
            limit: self.config.connection_limit,
        })
    }

    fn connect_into(&self, id: LeaseId) -> Result<M::Connection, PoolError> {
        self.manager.connect().map_err(|err| {
            let _ = self.slots.lock().busy.remove(&id);
            warn!(error = %err, "failed to open connection");
            PoolError::Connect(err.to_string())
        })
    }

    fn is_live(&self, conn: &mut M::Connection) -> bool {
        let started = Instant::now();
        let valid = !self.manager.has_broken(conn) && self.manager.is_valid(conn).is_ok();
        valid && started.elapsed() <= self.config.liveness_timeout
    }
}

impl<M: ManageConnection> std::fmt::Debug for LeasePool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("LeasePool")
            .field("limit", &self.config.connection_limit)
            .field("idle", &slots.idle.len())
            .field("busy", &slots.busy.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use assert_matches::assert_matches;

    use super::*;

    #[derive(Debug)]
    struct FakeConn {
        serial: usize,
    }

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        refuse: AtomicBool,
        stale: AtomicBool,
    }

    struct FakeManager(Arc<Counters>);

    impl ManageConnection for FakeManager {
        type Connection = FakeConn;
        type Error = std::io::Error;

        fn connect(&self) -> Result<FakeConn, std::io::Error> {
            if self.0.refuse.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("refused"));
            }
            let serial = self.0.opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConn { serial })
        }

        fn is_valid(&self, _conn: &mut FakeConn) -> Result<(), std::io::Error> {
            if self.0.stale.load(Ordering::SeqCst) {
                Err(std::io::Error::other("stale"))
            } else {
                Ok(())
            }
        }

        fn has_broken(&self, _conn: &mut FakeConn) -> bool {
            false
        }
    }

    fn pool(limit: usize) -> (Arc<Counters>, LeasePool<FakeManager>) {
        let manager = Arc::new(Counters::default());
        let pool = LeasePool::new(
            FakeManager(Arc::clone(&manager)),
            PoolConfig {
                connection_limit: limit,
                liveness_timeout: Duration::from_secs(1),
            },
        )
        .unwrap();
        (manager, pool)
    }

    #[test]
    fn opens_one_connection_eagerly() {
        let (manager, pool) = pool(3);
        assert_eq!(manager.opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.busy_count(), 0);
    }

    #[test]
    fn construction_failure_is_fatal() {
        let counters = Arc::new(Counters::default());
        counters.refuse.store(true, Ordering::SeqCst);
        let result = LeasePool::new(FakeManager(counters), PoolConfig::default());
        assert_matches!(result, Err(PoolError::Connect(_)));
    }

    #[test]
    fn exhausts_at_limit_and_recovers_on_release() {
        let (_manager, pool) = pool(2);
        let first = pool.acquire().unwrap();
        let _second = pool.acquire().unwrap();
        assert_matches!(pool.acquire(), Err(PoolError::Exhausted { limit: 2 }));

        pool.release(first);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn released_connection_is_reused() {
        let (manager, pool) = pool(2);
        let lease = pool.acquire().unwrap();
        let serial = lease.serial;
        pool.release(lease);

        let again = pool.acquire().unwrap();
        assert_eq!(again.serial, serial);
        assert_eq!(manager.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_idle_connection_is_replaced() {
        let (manager, pool) = pool(1);
        manager.stale.store(true, Ordering::SeqCst);
        let lease = pool.acquire().unwrap();
        assert_eq!(lease.serial, 1);
        assert_eq!(pool.busy_count(), 1);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn failed_replacement_frees_the_slot() {
        let (manager, pool) = pool(1);
        manager.stale.store(true, Ordering::SeqCst);
        manager.refuse.store(true, Ordering::SeqCst);
        assert_matches!(pool.acquire(), Err(PoolError::Connect(_)));
        assert_eq!(pool.busy_count(), 0);

        manager.refuse.store(false, Ordering::SeqCst);
        manager.stale.store(false, Ordering::SeqCst);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn release_of_foreign_lease_is_noop() {
        let (_m1, pool_a) = pool(2);
        let (_m2, pool_b) = pool(2);
        let foreign = pool_b.acquire().unwrap();

        pool_a.release(foreign);
        assert_eq!(pool_a.idle_count(), 1);
        assert_eq!(pool_a.busy_count(), 0);
    }

    #[test]
    fn discard_frees_slot_without_reuse() {
        let (manager, pool) = pool(1);
        let lease = pool.acquire().unwrap();
        pool.discard(lease);
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.idle_count(), 0);

        let fresh = pool.acquire().unwrap();
        assert_eq!(fresh.serial, 1);
        assert_eq!(manager.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_acquire_never_exceeds_limit() {
        let (_manager, pool) = pool(4);
        let pool = Arc::new(pool);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.acquire().ok())
            })
            .collect();
        let leases: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(leases.len(), 4);
        assert_eq!(pool.busy_count(), 4);
    }
}
