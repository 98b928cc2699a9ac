//! Connection management for LDAP authentication backends.
//!
//! Directory connections are expensive to establish: a dial, an optional StartTLS upgrade
//! and a bind. This crate keeps a bounded number of bound connections around and shares
//! them between concurrent requests.
//!
//! ```no_run
//! use ldappool::{ClientFactory, ClientOptions, Config, LdapClientSource};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load_from_file("/etc/ldappool.toml")?;
//! let source = LdapClientSource::from_config(config.ldap().cloned().unwrap());
//!
//! source.initialize().await?;
//! let client = source.get_client(ClientOptions::new()).await?;
//! // ... use the client like an ldap3::Ldap
//! source.release(client).await?;
//! source.shutdown().await?;
//! # Ok(())
//! # }
//! ```
#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod factory;
pub mod ldap_pool;
pub mod source;
pub mod standard;

#[cfg(test)]
mod mock;

pub use config::{Config, LdapConfig, PoolConfig, TlsConfig};
pub use error::{LPError, Result};
pub use factory::{ClientFactory, ClientOptions, Connection};
pub use ldap_pool::{LdapClientPooledFactory, Phase, PoolStatus, PooledClient};
pub use source::{ClientSource, LdapClientSource};
pub use standard::LdapClientStandardFactory;
