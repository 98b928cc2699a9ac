use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::shared::Shared;
use crate::error::Result;
use crate::factory::Connection;

/// A connection handed out by a pool. It dereferences to the underlying connection, so
/// every directory operation is available on it directly.
///
/// Call [`PooledClient::release`] when done: a pooled client goes back to its pool, an
/// unpooled one (created for a one-off request with overridden credentials) is closed.
/// Dropping a pooled client without releasing it frees its slot in the pool and drops the
/// connection.
pub struct PooledClient<C: Connection> {
    conn: Option<C>,
    pool: Option<Arc<Shared<C>>>,
}

impl<C: Connection> PooledClient<C> {
    pub(crate) fn pooled(conn: C, pool: Arc<Shared<C>>) -> Self {
        Self {
            conn: Some(conn),
            pool: Some(pool),
        }
    }

    /// Wraps a connection that does not belong to any pool.
    pub fn unpooled(conn: C) -> Self {
        Self {
            conn: Some(conn),
            pool: None,
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    pub async fn release(mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        match self.pool.take() {
            Some(pool) => pool.relinquish(conn).await,
            None => conn.close().await,
        }
    }
}

impl<C: Connection> Deref for PooledClient<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection present until released")
    }
}

impl<C: Connection> DerefMut for PooledClient<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection present until released")
    }
}

impl<C: Connection> Drop for PooledClient<C> {
    fn drop(&mut self) {
        if let (Some(_), Some(pool)) = (self.conn.take(), self.pool.as_ref()) {
            warn!("Pooled client dropped without being released");
            pool.forget();
        }
    }
}
