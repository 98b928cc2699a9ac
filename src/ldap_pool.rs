//! A bounded connection pool for ldap connections.
//!
//! [`LdapClientPooledFactory`] decorates another [`ClientFactory`]. It keeps up to `count`
//! bound connections around and hands them out under a timeout. Connections found closing
//! at acquisition time are replaced transparently, and shutdown drains every connection,
//! including the ones still checked out, within a bounded time.
mod client;
mod shared;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, TryAcquireError};
use tokio::time::{self, Instant};

pub use client::PooledClient;
pub use shared::Phase;
use shared::{Reservation, Shared};

use crate::config::{
    PoolConfig, DEFAULT_DRAIN_TIMEOUT, DEFAULT_POOL_COUNT, DEFAULT_POOL_RETRIES,
    DEFAULT_POOL_TIMEOUT,
};
use crate::error::{LPError, Result};
use crate::factory::{ClientFactory, ClientOptions, Connection};

/// Snapshot of the pool's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub phase: Phase,
    pub capacity: usize,
    pub idle: usize,
    pub checked_out: usize,
    /// Connections currently being established for the pool.
    pub pending: usize,
}

pub struct LdapClientPooledFactory<F>
where
    F: ClientFactory,
    F::Client: Connection,
{
    factory: F,
    count: usize,
    timeout: Duration,
    sleep: Duration,
    drain_timeout: Duration,
    shared: Arc<Shared<F::Client>>,
    // serializes initialization and shutdown
    lifecycle: Mutex<()>,
}

impl<F> LdapClientPooledFactory<F>
where
    F: ClientFactory,
    F::Client: Connection,
{
    /// Creates a pool over `factory`. Zero values fall back to the defaults: five
    /// connections, two retries and a ten second acquisition timeout. The pause between
    /// replacement attempts is `timeout / retries`.
    ///
    /// The pool is filled on `initialize` or lazily on the first acquisition.
    pub fn new(factory: F, count: usize, retries: usize, timeout: Duration) -> Self {
        let count = if count == 0 { DEFAULT_POOL_COUNT } else { count };
        let retries = if retries == 0 { DEFAULT_POOL_RETRIES } else { retries };
        let timeout = if timeout.is_zero() { DEFAULT_POOL_TIMEOUT } else { timeout };
        let sleep = timeout / u32::try_from(retries).unwrap_or(u32::MAX);

        Self {
            factory,
            count,
            timeout,
            sleep,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            shared: Arc::new(Shared::new(count)),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn from_config(factory: F, config: &PoolConfig) -> Self {
        Self::new(factory, config.count(), config.retries(), config.timeout())
            .with_drain_timeout(config.drain_timeout())
    }

    /// Sets how long `shutdown` waits for checked out connections to come back.
    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        if !drain_timeout.is_zero() {
            self.drain_timeout = drain_timeout;
        }
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn sleep(&self) -> Duration {
        self.sleep
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn inner(&self) -> &F {
        &self.factory
    }

    pub fn status(&self) -> PoolStatus {
        let st = self.shared.state.lock();

        PoolStatus {
            phase: st.phase,
            capacity: self.shared.count(),
            idle: st.idle.len(),
            checked_out: st.checked_out,
            pending: st.pending,
        }
    }

    /// Fills the pool with up to `count` connections. Individual failures are logged and
    /// tolerated; if not a single connection can be established the pool becomes unusable.
    /// Calling this on an initialized pool does nothing. A fill that was cancelled half way
    /// is resumed by the next call.
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        match self.shared.phase() {
            // `Initializing` under the lock means an earlier fill was cancelled
            Phase::Uninitialized | Phase::Initializing => (),
            Phase::Ready => return Ok(()),
            Phase::Failed => return Err(LPError::Unusable),
            Phase::Closing | Phase::Closed => return Err(LPError::Closed),
        }

        self.factory.initialize().await?;
        self.shared.set_phase(Phase::Initializing);

        let mut errors = Vec::new();
        let missing = self.count.saturating_sub(self.shared.tracked());

        for _ in 0..missing {
            match self.create().await {
                Ok((reservation, conn)) => reservation.into_idle(conn).await,
                Err(e) => {
                    warn!("Failed to establish client for the pool: {e}");
                    errors.push(e);
                }
            }
        }

        if self.shared.tracked() == 0 {
            self.shared.set_phase(Phase::Failed);
            error!("No connections could be established for the client pool");

            return Err(LPError::NoConnections(errors));
        }

        self.shared.set_phase(Phase::Ready);
        info!(
            "Client pool initialized with {} of {} connections",
            self.shared.tracked(),
            self.count
        );

        Ok(())
    }

    /// Acquires a client within the configured timeout.
    pub async fn acquire(&self) -> Result<PooledClient<F::Client>> {
        self.acquire_timeout(self.timeout).await
    }

    /// Acquires a client, waiting at most `timeout` (capped at the configured timeout) for
    /// an idle one. Idle clients that are already closing get replaced by a new connection
    /// within the same deadline. Filling a pool that was never initialized counts against
    /// the deadline too.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledClient<F::Client>> {
        let timeout = timeout.min(self.timeout);
        let deadline = Instant::now() + timeout;

        if matches!(
            self.shared.phase(),
            Phase::Uninitialized | Phase::Initializing
        ) {
            time::timeout_at(deadline, self.initialize())
                .await
                .map_err(|_| LPError::Timeout(timeout))??;
        }

        self.shared.check_open()?;

        let permit = match self.shared.available.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(LPError::Closed),
            Err(TryAcquireError::NoPermits) => {
                // below capacity, e.g. after a partial fill: try to grow before waiting
                if self.shared.has_spare_capacity() {
                    match time::timeout_at(deadline, self.create()).await {
                        Ok(Ok((reservation, conn))) => {
                            debug!("Grew the pool with a new client");
                            return reservation.checkout(conn).await;
                        }
                        Ok(Err(e)) => debug!("Could not grow the pool: {e}"),
                        Err(_) => return Err(LPError::Timeout(timeout)),
                    }
                }

                match time::timeout_at(deadline, self.shared.available.acquire()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(LPError::Closed),
                    Err(_) => return Err(LPError::Timeout(timeout)),
                }
            }
        };
        permit.forget();

        let mut conn = self.shared.checkout_idle()?;

        if !conn.is_closing() {
            debug!("Acquired idle client from the pool");
            return Ok(PooledClient::pooled(conn, Arc::clone(&self.shared)));
        }

        debug!("Idle client is closing, replacing it");

        {
            let _slot = self.shared.closing_slot();

            match time::timeout_at(deadline, conn.close()).await {
                Ok(Err(e)) => debug!("Failed to close dead client: {e}"),
                Err(_) => debug!("Timed out closing dead client"),
                Ok(Ok(())) => (),
            }
        }

        self.replace(deadline, timeout).await
    }

    /// Creates a replacement connection, pausing `sleep` between failed attempts, until one
    /// succeeds or the deadline passes.
    async fn replace(&self, deadline: Instant, timeout: Duration) -> Result<PooledClient<F::Client>> {
        loop {
            match time::timeout_at(deadline, self.create()).await {
                Ok(Ok((reservation, conn))) => {
                    debug!("Replaced dead client");
                    return reservation.checkout(conn).await;
                }
                Ok(Err(LPError::Closed)) => return Err(LPError::Closed),
                Ok(Err(e)) => warn!("Failed to replace dead client: {e}"),
                Err(_) => return Err(LPError::Timeout(timeout)),
            }

            if time::timeout_at(deadline, time::sleep(self.sleep)).await.is_err() {
                return Err(LPError::Timeout(timeout));
            }
        }
    }

    async fn create(&self) -> Result<(Reservation<F::Client>, F::Client)> {
        let reservation = self.shared.reserve()?;
        let conn = self.factory.get_client(ClientOptions::default()).await?;

        Ok((reservation, conn))
    }

    /// Closes the pool. New acquisitions fail right away, idle connections are closed and
    /// checked out ones are closed as they are released. Waits at most the drain timeout
    /// for outstanding connections; stragglers released later are closed on release.
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let Some(idle) = self.shared.begin_shutdown() else {
            return Ok(());
        };

        info!("Shutting down client pool, closing {} idle clients", idle.len());

        let deadline = Instant::now() + self.drain_timeout;

        for mut conn in idle {
            match time::timeout_at(deadline, conn.close()).await {
                Ok(Ok(())) => (),
                Ok(Err(e)) => debug!("Failed to close idle client: {e}"),
                Err(_) => debug!("Timed out closing idle client"),
            }
        }

        if time::timeout_at(deadline, self.shared.drained()).await.is_err() {
            warn!(
                "Timed out after {:?} waiting for {} outstanding clients, they will be closed on release",
                self.drain_timeout,
                self.shared.outstanding()
            );
        }

        self.shared.finish_shutdown();
        info!("Client pool shut down");

        self.factory.shutdown().await
    }
}

#[async_trait]
impl<F> ClientFactory for LdapClientPooledFactory<F>
where
    F: ClientFactory,
    F::Client: Connection,
{
    type Client = PooledClient<F::Client>;

    async fn initialize(&self) -> Result<()> {
        LdapClientPooledFactory::initialize(self).await
    }

    /// Acquires a pooled client. Requests with overrides bypass the pool and get a one-off
    /// connection from the inner factory.
    async fn get_client(&self, options: ClientOptions) -> Result<Self::Client> {
        if !options.is_empty() {
            return self
                .factory
                .get_client(options)
                .await
                .map(PooledClient::unpooled);
        }

        self.acquire().await
    }

    async fn release(&self, client: Self::Client) -> Result<()> {
        client.release().await
    }

    async fn shutdown(&self) -> Result<()> {
        LdapClientPooledFactory::shutdown(self).await
    }
}
