//! Connection pool implementation.
//!
//! Capacity is a count of semaphore permits. A permit is held for as long
//! as a connection is checked out, so idle plus in-use connections never
//! exceed capacity. Capacity starts at `init_capacity`, grows by
//! `expand_by` when an acquire has waited `soft_wait` without a permit,
//! and is trimmed back toward `init_capacity` by the reaper. The reaper
//! closes every idle connection past `idle_timeout`, including those
//! within `init_capacity`; the capacity itself never drops below it.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionMetadata, Driver, ManagedConnection};

/// An elastic pool of driver connections.
///
/// Cloning is cheap; clones share the same connections.
pub struct Pool<D: Driver> {
    shared: Arc<Shared<D>>,
}

impl<D: Driver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: Driver> std::fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

struct Shared<D: Driver> {
    driver: D,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    state: Mutex<State<D::Connection>>,
    released: Notify,
    next_id: AtomicU64,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

struct State<C> {
    idle: VecDeque<Idle<C>>,
    capacity: u32,
    live: u32,
    in_use: u32,
    closed: bool,
}

struct Idle<C> {
    conn: C,
    meta: ConnectionMetadata,
}

enum Slot<C> {
    Reuse(Idle<C>),
    Expired(C),
    Create,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Slots the pool may currently hold.
    pub capacity: u32,
    /// Idle connections ready to hand out.
    pub available: u32,
    /// Connections checked out.
    pub in_use: u32,
    /// Open connections, idle or not.
    pub live: u32,
    /// Upper bound on capacity.
    pub max: u32,
}

impl<D: Driver> Pool<D> {
    /// Build a pool and open `init_capacity` connections through `driver`.
    pub async fn open(driver: D, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            semaphore: Arc::new(Semaphore::new(config.init_capacity as usize)),
            state: Mutex::new(State {
                idle: VecDeque::with_capacity(config.max_capacity as usize),
                capacity: config.init_capacity,
                live: 0,
                in_use: 0,
                closed: false,
            }),
            released: Notify::new(),
            next_id: AtomicU64::new(1),
            reaper: Mutex::new(None),
            driver,
            config,
        });

        for _ in 0..shared.config.init_capacity {
            let conn = shared
                .driver
                .connect()
                .await
                .map_err(PoolError::ConnectionCreation)?;
            let meta = ConnectionMetadata::new(shared.next_id());
            let mut state = shared.state.lock();
            state.live += 1;
            state.idle.push_back(Idle { conn, meta });
        }

        *shared.reaper.lock() = Some(spawn_reaper(&shared));

        info!(
            init_capacity = shared.config.init_capacity,
            max_capacity = shared.config.max_capacity,
            "connection pool opened"
        );
        Ok(Self { shared })
    }

    /// Check out a connection.
    ///
    /// Waits `soft_wait` for a free slot, then expands capacity once (if
    /// below the maximum) and keeps waiting. Dropping the returned future
    /// abandons the wait without leaking a slot.
    pub async fn acquire(&self) -> Result<PooledConnection<D>, PoolError> {
        trace!("acquiring connection from pool");
        match self.shared.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, self.acquire_inner())
                .await
                .map_err(|_| PoolError::AcquisitionTimeout(limit))?,
            None => self.acquire_inner().await,
        }
    }

    async fn acquire_inner(&self) -> Result<PooledConnection<D>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        let permit = match Arc::clone(&self.shared.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(PoolError::PoolClosed),
            Err(TryAcquireError::NoPermits) => self.wait_for_permit().await?,
        };
        self.checkout(permit).await
    }

    async fn wait_for_permit(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        let semaphore = &self.shared.semaphore;
        if let Ok(permit) =
            tokio::time::timeout(self.shared.config.soft_wait, Arc::clone(semaphore).acquire_owned())
                .await
        {
            return permit.map_err(|_| PoolError::PoolClosed);
        }

        if let Some(capacity) = self.shared.expand() {
            debug!(capacity, "expanded pool after soft wait");
        }

        Arc::clone(semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::PoolClosed)
    }

    async fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<PooledConnection<D>, PoolError> {
        let shared = &self.shared;
        loop {
            let slot = {
                let mut state = shared.state.lock();
                if state.closed {
                    return Err(PoolError::PoolClosed);
                }
                match state.idle.pop_front() {
                    Some(idle) if idle.meta.is_expired(shared.config.max_lifetime) => {
                        state.live -= 1;
                        Slot::Expired(idle.conn)
                    }
                    Some(idle) => {
                        state.in_use += 1;
                        Slot::Reuse(idle)
                    }
                    None => {
                        state.live += 1;
                        Slot::Create
                    }
                }
            };

            match slot {
                Slot::Reuse(Idle { conn, mut meta }) => {
                    meta.mark_checkout();
                    trace!(id = meta.id, "reusing idle connection");
                    return Ok(PooledConnection::new(conn, meta, permit, shared));
                }
                Slot::Expired(conn) => {
                    debug!("closing idle connection past its lifetime");
                    drop(conn);
                }
                Slot::Create => {
                    let mut reservation = Reservation {
                        shared,
                        armed: true,
                    };
                    let conn = shared
                        .driver
                        .connect()
                        .await
                        .map_err(PoolError::ConnectionCreation)?;
                    {
                        let mut state = shared.state.lock();
                        if state.closed {
                            return Err(PoolError::PoolClosed);
                        }
                        state.in_use += 1;
                        reservation.armed = false;
                    }
                    let mut meta = ConnectionMetadata::new(shared.next_id());
                    meta.mark_checkout();
                    debug!(id = meta.id, "opened pooled connection");
                    return Ok(PooledConnection::new(conn, meta, permit, shared));
                }
            }
        }
    }

    /// Current counters.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            capacity: state.capacity,
            available: state.idle.len() as u32,
            in_use: state.in_use,
            live: state.live,
            max: self.shared.config.max_capacity,
        }
    }

    /// Close the pool.
    ///
    /// New acquisitions fail with [`PoolError::PoolClosed`] and idle
    /// connections are closed at once. Returns when every checked-out
    /// connection has come back; those are closed instead of kept.
    pub async fn close(&self) {
        let (was_open, idle) = {
            let mut state = self.shared.state.lock();
            let was_open = !state.closed;
            state.closed = true;
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.live -= idle.len() as u32;
            (was_open, idle)
        };
        self.shared.semaphore.close();
        if let Some(reaper) = self.shared.reaper.lock().take() {
            reaper.abort();
        }
        let closed_idle = idle.len();
        drop(idle);

        loop {
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.state.lock().in_use == 0 {
                break;
            }
            notified.await;
        }

        if was_open {
            info!(closed_idle, "connection pool closed");
        }
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// The driver connections are opened with.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.shared.driver
    }
}

impl<D: Driver> Shared<D> {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn expand(&self) -> Option<u32> {
        let mut state = self.state.lock();
        if state.closed || state.capacity >= self.config.max_capacity {
            return None;
        }
        let grown = state
            .capacity
            .saturating_add(self.config.expand_by.max(1))
            .min(self.config.max_capacity);
        self.semaphore.add_permits((grown - state.capacity) as usize);
        state.capacity = grown;
        Some(grown)
    }

    async fn prepare_for_idle(&self, conn: &mut D::Connection) -> bool {
        if !conn.is_reusable() {
            return false;
        }
        let Some(query) = self.config.reset_query.as_deref() else {
            return true;
        };
        match conn.reset(query).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "reset query failed; closing connection");
                false
            }
        }
    }

    fn checkin(
        &self,
        conn: D::Connection,
        mut meta: ConnectionMetadata,
        permit: Option<OwnedSemaphorePermit>,
        reusable: bool,
    ) {
        let id = meta.id;
        let rejected = {
            let mut state = self.state.lock();
            state.in_use = state.in_use.saturating_sub(1);
            if state.closed || !reusable || meta.is_expired(self.config.max_lifetime) {
                state.live = state.live.saturating_sub(1);
                Some(conn)
            } else {
                meta.mark_checkin();
                state.idle.push_back(Idle { conn, meta });
                None
            }
        };
        drop(permit);

        if let Some(conn) = rejected {
            debug!(id, "closing released connection");
            drop(conn);
        } else {
            trace!(id, "connection returned to pool");
        }
        self.released.notify_waiters();
    }

    /// Close stale idle connections and trim capacity. `None` once closed.
    fn reap(&self) -> Option<usize> {
        let reaped = {
            let mut state = self.state.lock();
            if state.closed {
                return None;
            }
            let init = self.config.init_capacity;
            let mut live = state.live;
            let mut kept = VecDeque::with_capacity(state.idle.len());
            let mut reaped = Vec::new();
            while let Some(idle) = state.idle.pop_front() {
                let expired = idle.meta.is_expired(self.config.max_lifetime);
                let stale = idle.meta.is_idle_expired(self.config.idle_timeout);
                if expired || stale {
                    live -= 1;
                    reaped.push(idle.conn);
                } else {
                    kept.push_back(idle);
                }
            }
            state.idle = kept;
            state.live = live;

            let target = init.max(state.live);
            if state.capacity > target {
                let forgotten = self
                    .semaphore
                    .forget_permits((state.capacity - target) as usize);
                state.capacity -= forgotten as u32;
            }
            reaped
        };

        if !reaped.is_empty() {
            debug!(count = reaped.len(), "reaper closed idle connections");
        }
        Some(reaped.len())
    }
}

fn spawn_reaper<D: Driver>(shared: &Arc<Shared<D>>) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    let period = shared.config.reaper_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else {
                break;
            };
            if shared.reap().is_none() {
                break;
            }
        }
    })
}

/// Gives back a `live` slot if connection creation is abandoned.
struct Reservation<'a, D: Driver> {
    shared: &'a Shared<D>,
    armed: bool,
}

impl<D: Driver> Drop for Reservation<'_, D> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.shared.state.lock();
            state.live = state.live.saturating_sub(1);
        }
    }
}

/// A connection checked out of a [`Pool`].
///
/// Dropping it returns the connection; [`PooledConnection::release`] does
/// the same and waits for the reset query to finish.
pub struct PooledConnection<D: Driver> {
    // Some until release or drop
    conn: Option<D::Connection>,
    meta: ConnectionMetadata,
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<Shared<D>>,
}

impl<D: Driver> PooledConnection<D> {
    fn new(
        conn: D::Connection,
        meta: ConnectionMetadata,
        permit: OwnedSemaphorePermit,
        shared: &Arc<Shared<D>>,
    ) -> Self {
        Self {
            conn: Some(conn),
            meta,
            permit: Some(permit),
            shared: Arc::clone(shared),
        }
    }

    /// Pool bookkeeping for this connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.meta
    }

    /// Return the connection, running the reset query first if one is configured.
    pub async fn release(mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let permit = self.permit.take();
        let reusable = self.shared.prepare_for_idle(&mut conn).await;
        self.shared
            .checkin(conn, self.meta.clone(), permit, reusable);
    }
}

impl<D: Driver> Deref for PooledConnection<D> {
    type Target = D::Connection;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until release")
    }
}

impl<D: Driver> DerefMut for PooledConnection<D> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until release")
    }
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let permit = self.permit.take();
        let meta = self.meta.clone();
        let shared = Arc::clone(&self.shared);

        if shared.config.reset_query.is_none() || !conn.is_reusable() {
            let reusable = conn.is_reusable();
            shared.checkin(conn, meta, permit, reusable);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let reusable = shared.prepare_for_idle(&mut conn).await;
                    shared.checkin(conn, meta, permit, reusable);
                });
            }
            Err(_) => shared.checkin(conn, meta, permit, false),
        }
    }
}

impl<D: Driver> std::fmt::Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}
