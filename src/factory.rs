//! The contracts shared by every way of obtaining a directory connection.
use async_trait::async_trait;

use crate::error::Result;

/// A single authenticated directory session.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Cheap local check whether the connection is already being torn down. Must not
    /// perform a network round trip.
    fn is_closing(&mut self) -> bool;

    /// Performs a real close of the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Produces directory connections. Callers receive a client with `get_client` and hand it
/// back with `release` when they are done, regardless of whether the implementation pools
/// connections or opens a fresh one every time.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Send + 'static;

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn get_client(&self, options: ClientOptions) -> Result<Self::Client>;

    /// Transfers ownership of `client` back to the factory.
    async fn release(&self, client: Self::Client) -> Result<()>;

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Per-call overrides of the configured address and credentials. A client requested with
/// overrides is always a one-off connection and never pooled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    address: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_none() && self.username.is_none() && self.password.is_none()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}
