//! In-memory connections and factory used by the unit tests.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{LPError, Result};
use crate::factory::{ClientFactory, ClientOptions, Connection};

#[derive(Debug, Default)]
pub struct MockStats {
    pub attempts: AtomicUsize,
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub double_closed: AtomicUsize,
    pub direct: AtomicUsize,
}

#[derive(Debug)]
pub struct MockConn {
    pub id: usize,
    alive: Arc<AtomicBool>,
    in_use: Arc<AtomicBool>,
    closed: bool,
    close_delay: Duration,
    stats: Arc<MockStats>,
}

impl MockConn {
    /// Marks the connection as in use. Returns false if somebody else already holds it.
    pub fn claim(&self) -> bool {
        !self.in_use.swap(true, Ordering::SeqCst)
    }

    pub fn unclaim(&self) {
        self.in_use.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl Connection for MockConn {
    fn is_closing(&mut self) -> bool {
        self.closed || !self.alive.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }

        if self.closed {
            self.stats.double_closed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.closed = true;
            self.alive.store(false, Ordering::SeqCst);
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }

        Ok(())
    }
}

/// Factory producing `MockConn`s. Outcomes of connection attempts can be scripted; once the
/// script is exhausted every attempt succeeds unless the factory is set to fail.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    stats: Arc<MockStats>,
    script: Arc<Mutex<VecDeque<bool>>>,
    failing: Arc<AtomicBool>,
    alive: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
    delay: Duration,
    close_delay: Duration,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let factory = Self::default();
        factory.set_failing(true);
        factory
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes closing every connection created from now on take `delay`.
    #[must_use]
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    pub fn script(&self, outcomes: &[bool]) {
        self.script.lock().extend(outcomes.iter().copied());
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes connection `id` report itself as closing.
    pub fn kill(&self, id: usize) {
        self.alive.lock()[id].store(false, Ordering::SeqCst);
    }

    pub fn kill_all(&self) {
        for alive in self.alive.lock().iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn attempts(&self) -> usize {
        self.stats.attempts.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.stats.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    pub fn double_closed(&self) -> usize {
        self.stats.double_closed.load(Ordering::SeqCst)
    }

    pub fn direct(&self) -> usize {
        self.stats.direct.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for MockFactory {
    type Client = MockConn;

    async fn get_client(&self, options: ClientOptions) -> Result<MockConn> {
        self.stats.attempts.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let succeed = {
            let scripted = self.script.lock().pop_front();
            scripted.unwrap_or_else(|| !self.failing.load(Ordering::SeqCst))
        };

        if !succeed {
            return Err(LPError::Connection("mock dial failure".to_owned()));
        }

        if !options.is_empty() {
            self.stats.direct.fetch_add(1, Ordering::SeqCst);
        }

        let alive = Arc::new(AtomicBool::new(true));
        let id = {
            let mut conns = self.alive.lock();
            conns.push(Arc::clone(&alive));
            conns.len() - 1
        };
        self.stats.created.fetch_add(1, Ordering::SeqCst);

        Ok(MockConn {
            id,
            alive,
            in_use: Arc::new(AtomicBool::new(false)),
            closed: false,
            close_delay: self.close_delay,
            stats: Arc::clone(&self.stats),
        })
    }

    async fn release(&self, mut client: MockConn) -> Result<()> {
        client.close().await
    }
}
