//! Bounded connection pool
//!
//! Hands out authenticated connections, bounded by the configured
//! pool size (plus one when a dedicated store connection is
//! reserved). Dead connections are detected on acquire via the
//! liveness probe and replaced; stale idle connections are evicted on
//! release. The pool mutex is never held across socket I/O.

use crate::config::ImapConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const MAX_CONNECTION_RETRIES: u32 = 3;
const MAX_POOL_WAIT: Duration = Duration::from_millis(500);

struct PoolState {
    available: Vec<Connection>,
    /// Connections alive anywhere: available, checked out, or being
    /// created.
    active: usize,
    closed: bool,
}

enum Candidate {
    Existing(Connection),
    Create,
}

pub(crate) struct Pool {
    config: Arc<ImapConfig>,
    capacity: usize,
    state: Mutex<PoolState>,
    wakeup: Condvar,
}

impl Pool {
    pub fn new(config: Arc<ImapConfig>) -> Self {
        let capacity =
            config.pool_size.max(1) + usize::from(config.separate_store_connection);
        Self {
            config,
            capacity,
            state: Mutex::new(PoolState {
                available: Vec::new(),
                active: 0,
                closed: false,
            }),
            wakeup: Condvar::new(),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire an authenticated connection, blocking up to the pool
    /// timeout for one to come back when the pool is exhausted.
    pub fn acquire(&self) -> Result<Connection> {
        let deadline = Instant::now() + self.config.pool_timeout;
        let mut creation_failures = 0;
        loop {
            let candidate = self.next_candidate(deadline)?;
            match candidate {
                Candidate::Existing(mut connection) => {
                    if connection.is_alive(self.config.pool_timeout) {
                        return Ok(connection);
                    }
                    debug!("dropping dead pooled connection");
                    drop(connection);
                    self.forget_one();
                }
                Candidate::Create => match Connection::open(Arc::clone(&self.config)) {
                    Ok(connection) => return Ok(connection),
                    Err(error) => {
                        self.forget_one();
                        creation_failures += 1;
                        if matches!(error, Error::Authentication(_))
                            || creation_failures >= MAX_CONNECTION_RETRIES
                        {
                            return Err(error);
                        }
                        warn!("connection attempt failed, retrying: {error}");
                    }
                },
            }
        }
    }

    /// Pick the next acquisition step under the pool lock, waiting on
    /// the condition variable while the pool is exhausted.
    fn next_candidate(&self, deadline: Instant) -> Result<Candidate> {
        let mut state = self.state.lock().map_err(|_| Error::StoreClosed)?;
        loop {
            if state.closed {
                return Err(Error::StoreClosed);
            }
            if let Some(connection) = state.available.pop() {
                return Ok(Candidate::Existing(connection));
            }
            if state.active < self.capacity {
                state.active += 1;
                return Ok(Candidate::Create);
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout("waiting for a pooled connection"));
            }
            let (next, _) = self
                .wakeup
                .wait_timeout(state, MAX_POOL_WAIT)
                .map_err(|_| Error::StoreClosed)?;
            state = next;
        }
    }

    /// Account for a connection that no longer exists.
    fn forget_one(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.active = state.active.saturating_sub(1);
        }
        self.wakeup.notify_one();
    }

    /// Return a connection to the pool (or close it when the pool is
    /// already at capacity, closed, or the connection is dead).
    pub fn release(&self, mut connection: Connection) {
        if connection.is_closed() {
            drop(connection);
            self.forget_one();
            return;
        }

        let stale = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.closed || state.available.len() >= self.capacity {
                state.active = state.active.saturating_sub(1);
                drop(state);
                self.wakeup.notify_one();
                connection.logout();
                return;
            }
            state.available.push(connection);

            // Evict idle connections that outlived the pool timeout.
            // Held connections are unaffected: only `available` entries
            // are candidates.
            let timeout = self.config.pool_timeout;
            let mut stale = Vec::new();
            let mut index = 0;
            while index < state.available.len() {
                if state.available[index].idle_for() > timeout {
                    stale.push(state.available.remove(index));
                } else {
                    index += 1;
                }
            }
            state.active = state.active.saturating_sub(stale.len());
            stale
        };
        self.wakeup.notify_one();
        for mut connection in stale {
            debug!("evicting stale pooled connection");
            connection.logout();
        }
    }

    /// Close every pooled connection and abort waiting acquirers.
    pub fn shutdown(&self) {
        let drained = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.closed = true;
            state.active = state.active.saturating_sub(state.available.len());
            std::mem::take(&mut state.available)
        };
        self.wakeup.notify_all();
        for mut connection in drained {
            connection.logout();
        }
    }
}
