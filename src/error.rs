use std::time::Duration;

use ldap3::LdapError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LPError>;

#[derive(Debug, Error)]
pub enum LPError {
    #[error("error occurred dialing address {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: LdapError,
    },

    #[error("error occurred performing starttls: {0}")]
    StartTls(#[source] LdapError),

    #[error("error occurred performing bind as '{username}': {source}")]
    Bind {
        username: String,
        #[source]
        source: LdapError,
    },

    #[error("error occurred closing connection: {0}")]
    Unbind(#[source] LdapError),

    #[error("error occurred establishing new client for the pool: pool is already the maximum size")]
    Exhausted,

    #[error("errors occurred initializing the client pool: no connections could be established ({} attempts failed)", .0.len())]
    NoConnections(Vec<LPError>),

    #[error("the pool failed to initialize and cannot be used")]
    Unusable,

    #[error("timed out after {0:?} waiting for a client")]
    Timeout(Duration),

    #[error("error acquiring client: the pool is closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failure reported by a connection implementation outside of ldap3.
    #[error("connection error: {0}")]
    Connection(String),
}

impl LPError {
    /// Whether the error is a deadline expiry rather than a connection failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LPError::Timeout(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, LPError::Closed)
    }
}
