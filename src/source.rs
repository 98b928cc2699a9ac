//! Selects between direct and pooled connections without the caller having to care.
use async_trait::async_trait;

use crate::config::{LdapConfig, PoolConfig};
use crate::error::Result;
use crate::factory::{ClientFactory, ClientOptions, Connection};
use crate::ldap_pool::{LdapClientPooledFactory, PooledClient};
use crate::standard::LdapClientStandardFactory;

pub type LdapClientSource = ClientSource<LdapClientStandardFactory>;

/// A connection source that either opens a fresh connection per request or reuses pooled
/// ones. Both variants hand out `PooledClient`s; for the direct variant these are unpooled
/// and closed on release.
pub enum ClientSource<F>
where
    F: ClientFactory,
    F::Client: Connection,
{
    Direct(F),
    Pooled(LdapClientPooledFactory<F>),
}

impl LdapClientSource {
    /// Builds the source described by `config`: pooled if the pool is enabled, direct
    /// otherwise.
    pub fn from_config(config: LdapConfig) -> Self {
        let pool = config.pool().clone();
        let factory = LdapClientStandardFactory::new(config);

        ClientSource::new(factory, pool.enable().then_some(&pool))
    }
}

impl<F> ClientSource<F>
where
    F: ClientFactory,
    F::Client: Connection,
{
    pub fn new(factory: F, pool: Option<&PoolConfig>) -> Self {
        match pool {
            Some(pool) => ClientSource::Pooled(LdapClientPooledFactory::from_config(factory, pool)),
            None => ClientSource::Direct(factory),
        }
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, ClientSource::Pooled(_))
    }
}

#[async_trait]
impl<F> ClientFactory for ClientSource<F>
where
    F: ClientFactory,
    F::Client: Connection,
{
    type Client = PooledClient<F::Client>;

    async fn initialize(&self) -> Result<()> {
        match self {
            ClientSource::Direct(factory) => factory.initialize().await,
            ClientSource::Pooled(pool) => pool.initialize().await,
        }
    }

    async fn get_client(&self, options: ClientOptions) -> Result<Self::Client> {
        match self {
            ClientSource::Direct(factory) => factory
                .get_client(options)
                .await
                .map(PooledClient::unpooled),
            ClientSource::Pooled(pool) => ClientFactory::get_client(pool, options).await,
        }
    }

    async fn release(&self, client: Self::Client) -> Result<()> {
        client.release().await
    }

    async fn shutdown(&self) -> Result<()> {
        match self {
            ClientSource::Direct(factory) => factory.shutdown().await,
            ClientSource::Pooled(pool) => pool.shutdown().await,
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::mock::MockFactory;

    #[tokio::test]
    async fn direct_source_opens_and_closes_per_request() {
        let factory = MockFactory::new();
        let source = ClientSource::new(factory.clone(), None);
        assert!(!source.is_pooled());

        source.initialize().await.unwrap();
        assert_eq!(factory.created(), 0);

        let client = source.get_client(ClientOptions::new()).await.unwrap();
        assert!(!client.is_pooled());
        source.release(client).await.unwrap();

        assert_eq!(factory.created(), 1);
        assert_eq!(factory.closed(), 1);

        source.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn pooled_source_reuses_clients() {
        let factory = MockFactory::new();
        let config = PoolConfig::enabled(2, 2, Duration::from_secs(1));
        let source = ClientSource::new(factory.clone(), Some(&config));
        assert!(source.is_pooled());

        source.initialize().await.unwrap();

        for _ in 0..5 {
            let client = source.get_client(ClientOptions::new()).await.unwrap();
            assert!(client.is_pooled());
            source.release(client).await.unwrap();
        }

        assert_eq!(factory.created(), 2);
        assert_eq!(factory.closed(), 0);

        source.shutdown().await.unwrap();
        assert_eq!(factory.closed(), 2);
    }

    #[tokio::test]
    async fn pooled_source_bypasses_pool_for_overrides() {
        let factory = MockFactory::new();
        let config = PoolConfig::enabled(1, 1, Duration::from_secs(1));
        let source = ClientSource::new(factory.clone(), Some(&config));
        source.initialize().await.unwrap();

        let options = ClientOptions::new().with_username("uid=jane,ou=users,dc=example,dc=org");
        let client = source.get_client(options).await.unwrap();
        assert!(!client.is_pooled());
        source.release(client).await.unwrap();

        assert_eq!(factory.direct(), 1);
        assert_eq!(factory.closed(), 1);
    }
}
