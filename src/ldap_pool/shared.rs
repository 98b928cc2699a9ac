//! Accounting shared between the pool and every client it hands out.
//!
//! All counters live behind one short-lived lock. Nothing in here holds the lock across an
//! await point; waiting for an idle connection happens on the `available` semaphore, whose
//! permits track the idle queue one to one.
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use super::client::PooledClient;
use crate::error::{LPError, Result};
use crate::factory::Connection;

/// Lifecycle of a pool. `Closing` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initializing,
    Ready,
    /// No connection could be established during initialization.
    Failed,
    Closing,
    Closed,
}

pub(crate) struct State<C> {
    pub(crate) phase: Phase,
    pub(crate) idle: VecDeque<C>,
    pub(crate) checked_out: usize,
    pub(crate) pending: usize,
}

impl<C> State<C> {
    fn tracked(&self) -> usize {
        self.idle.len() + self.checked_out + self.pending
    }

    fn outstanding(&self) -> usize {
        self.checked_out + self.pending
    }

    fn closing(&self) -> bool {
        matches!(self.phase, Phase::Closing | Phase::Closed)
    }
}

pub(crate) struct Shared<C> {
    count: usize,
    pub(crate) state: Mutex<State<C>>,
    pub(crate) available: Semaphore,
    drained: Notify,
}

enum Rejected<C> {
    Overflow(C),
    Closing(C),
    Closed(C),
}

impl<C: Connection> Shared<C> {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            count,
            state: Mutex::new(State {
                phase: Phase::Uninitialized,
                idle: VecDeque::with_capacity(count),
                checked_out: 0,
                pending: 0,
            }),
            available: Semaphore::new(0),
            drained: Notify::new(),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.state.lock().phase = phase;
    }

    /// Fails with the error matching the phase if the pool cannot serve acquisitions.
    pub(crate) fn check_open(&self) -> Result<()> {
        match self.phase() {
            Phase::Failed => Err(LPError::Unusable),
            Phase::Closing | Phase::Closed => Err(LPError::Closed),
            _ => Ok(()),
        }
    }

    pub(crate) fn tracked(&self) -> usize {
        self.state.lock().tracked()
    }

    pub(crate) fn has_spare_capacity(&self) -> bool {
        let st = self.state.lock();
        !st.closing() && st.tracked() < self.count
    }

    /// Claims a slot for a connection that is about to be created. The slot is given back
    /// when the returned reservation is dropped without being filled.
    pub(crate) fn reserve(self: &Arc<Self>) -> Result<Reservation<C>> {
        let mut st = self.state.lock();

        if st.closing() {
            return Err(LPError::Closed);
        }

        if st.tracked() >= self.count {
            return Err(LPError::Exhausted);
        }

        st.pending += 1;

        Ok(Reservation {
            shared: Arc::clone(self),
            active: true,
        })
    }

    /// Takes the idle connection whose permit the caller has just consumed.
    pub(crate) fn checkout_idle(&self) -> Result<C> {
        let mut st = self.state.lock();

        if st.closing() {
            return Err(LPError::Closed);
        }

        let conn = st.idle.pop_front().ok_or(LPError::Exhausted)?;
        st.checked_out += 1;

        Ok(conn)
    }

    /// Gives up the slot of a checked out connection that will not come back.
    pub(crate) fn forget(&self) {
        let mut st = self.state.lock();
        st.checked_out = st.checked_out.saturating_sub(1);
        self.settle(&st);
    }

    /// Guards the slot of a checked out connection that is being closed. The slot is
    /// given back when the guard drops, including when the closing future is cancelled.
    pub(crate) fn closing_slot(&self) -> ClosingSlot<'_, C> {
        ClosingSlot { shared: self }
    }

    /// Returns a checked out connection. It is buffered again unless the pool is shutting
    /// down or already holds `count` idle connections, in which case it is closed.
    pub(crate) async fn relinquish(&self, conn: C) -> Result<()> {
        let rejected = {
            let mut st = self.state.lock();

            match st.phase {
                Phase::Closing => Some(Rejected::Closing(conn)),
                Phase::Closed => {
                    st.checked_out = st.checked_out.saturating_sub(1);
                    Some(Rejected::Closed(conn))
                }
                _ => {
                    st.checked_out = st.checked_out.saturating_sub(1);

                    if st.idle.len() >= self.count {
                        Some(Rejected::Overflow(conn))
                    } else {
                        st.idle.push_back(conn);
                        self.available.add_permits(1);
                        None
                    }
                }
            }
        };

        match rejected {
            None => {
                debug!("Client returned to the pool");
                Ok(())
            }
            Some(Rejected::Overflow(mut conn)) => {
                debug!("Pool already holds {} idle clients, closing returned client", self.count);
                conn.close().await
            }
            Some(Rejected::Closing(mut conn)) => {
                // only counted as drained once the close went through or was abandoned
                let _slot = self.closing_slot();
                conn.close().await
            }
            Some(Rejected::Closed(mut conn)) => {
                warn!("Client released after the pool was shut down, closing it");
                if let Err(e) = conn.close().await {
                    debug!("Failed to close late client: {e}");
                }
                Err(LPError::Closed)
            }
        }
    }

    /// Flips the pool into `Closing` and takes every idle connection out of the buffer.
    /// Returns `None` if the pool was already shut down.
    pub(crate) fn begin_shutdown(&self) -> Option<Vec<C>> {
        let mut st = self.state.lock();

        if st.closing() {
            return None;
        }

        st.phase = Phase::Closing;
        self.available.close();

        Some(st.idle.drain(..).collect())
    }

    pub(crate) fn finish_shutdown(&self) {
        self.set_phase(Phase::Closed);
    }

    /// Resolves once no connection is checked out or being created.
    pub(crate) async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            let outstanding = self.state.lock().outstanding();

            if outstanding == 0 {
                return;
            }

            notified.await;
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.state.lock().outstanding()
    }

    fn settle(&self, st: &State<C>) {
        if st.closing() && st.outstanding() == 0 {
            self.drained.notify_waiters();
        }
    }
}

/// A claimed slot for a connection under construction.
pub(crate) struct Reservation<C: Connection> {
    shared: Arc<Shared<C>>,
    active: bool,
}

impl<C: Connection> Reservation<C> {
    /// Puts the freshly created connection into the idle buffer, or closes it if the pool
    /// started shutting down while it was being established.
    pub(crate) async fn into_idle(mut self, conn: C) {
        let conn = {
            let mut st = self.shared.state.lock();

            if st.closing() {
                Some(conn)
            } else {
                self.active = false;
                st.pending -= 1;
                st.idle.push_back(conn);
                self.shared.available.add_permits(1);
                None
            }
        };

        if let Some(mut conn) = conn {
            self.discard(&mut conn).await;
        }
    }

    /// Hands the freshly created connection straight to a caller. Fails with
    /// `LPError::Closed` and closes the connection if the pool started shutting down while
    /// it was being established.
    pub(crate) async fn checkout(mut self, mut conn: C) -> Result<PooledClient<C>> {
        let closing = {
            let mut st = self.shared.state.lock();

            if st.closing() {
                true
            } else {
                self.active = false;
                st.pending -= 1;
                st.checked_out += 1;
                false
            }
        };

        if closing {
            self.discard(&mut conn).await;
            return Err(LPError::Closed);
        }

        Ok(PooledClient::pooled(conn, Arc::clone(&self.shared)))
    }

    // the slot stays pending until the close is done; dropping `self` gives it back
    async fn discard(&self, conn: &mut C) {
        debug!("Pool is shutting down, closing freshly created client");

        if let Err(e) = conn.close().await {
            debug!("Failed to close client: {e}");
        }
    }
}

impl<C: Connection> Drop for Reservation<C> {
    fn drop(&mut self) {
        if self.active {
            let mut st = self.shared.state.lock();
            st.pending -= 1;
            self.shared.settle(&st);
        }
    }
}

/// Slot of a checked out connection that is being closed.
pub(crate) struct ClosingSlot<'a, C: Connection> {
    shared: &'a Shared<C>,
}

impl<C: Connection> Drop for ClosingSlot<'_, C> {
    fn drop(&mut self) {
        self.shared.forget();
    }
}
