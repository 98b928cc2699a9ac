//! The plain connection factory: every client is a freshly dialed and bound ldap3 connection.
use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError};

use crate::config::LdapConfig;
use crate::error::{LPError, Result};
use crate::factory::{ClientFactory, ClientOptions, Connection};

#[async_trait]
impl Connection for Ldap {
    fn is_closing(&mut self) -> bool {
        self.is_closed()
    }

    async fn close(&mut self) -> Result<()> {
        self.unbind().await.map_err(LPError::Unbind)
    }
}

/// Creates one authenticated connection per `get_client` call using the configured server
/// and credentials.
pub struct LdapClientStandardFactory {
    config: LdapConfig,
    settings: LdapConnSettings,
}

/// Address and credentials a single connection is established with.
#[derive(Debug, PartialEq, Eq)]
struct Target<'a> {
    address: &'a str,
    username: &'a str,
    password: &'a str,
}

impl LdapClientStandardFactory {
    pub fn new(config: LdapConfig) -> Self {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(config.timeout())
            .set_starttls(config.starttls())
            .set_no_tls_verify(config.tls().skip_verify());

        Self { config, settings }
    }

    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    fn target<'a>(&'a self, options: &'a ClientOptions) -> Target<'a> {
        Target {
            address: options.address().unwrap_or(self.config.address().as_str()),
            username: options.username().unwrap_or(self.config.user()),
            password: options.password().unwrap_or(self.config.password()),
        }
    }

    fn dial_error(&self, address: &str, source: LdapError) -> LPError {
        match source {
            LdapError::NativeTLS { .. } if self.config.starttls() => LPError::StartTls(source),
            source => LPError::Dial {
                address: address.to_owned(),
                source,
            },
        }
    }
}

#[async_trait]
impl ClientFactory for LdapClientStandardFactory {
    type Client = Ldap;

    async fn get_client(&self, options: ClientOptions) -> Result<Ldap> {
        let target = self.target(&options);

        // StartTLS, if requested, is negotiated by ldap3 while connecting. A failed upgrade
        // never hands back a connection.
        let (conn, mut ldap) = LdapConnAsync::with_settings(self.settings.clone(), target.address)
            .await
            .map_err(|e| self.dial_error(target.address, e))?;
        ldap3::drive!(conn);

        if target.password.is_empty() {
            debug!("Performing unauthenticated bind as '{}'", target.username);
        }

        let bind = ldap
            .simple_bind(target.username, target.password)
            .await
            .and_then(|res| res.success());

        if let Err(source) = bind {
            if let Err(e) = ldap.unbind().await {
                debug!("Failed to close connection after bind failure: {e}");
            }

            return Err(LPError::Bind {
                username: target.username.to_owned(),
                source,
            });
        }

        Ok(ldap)
    }

    async fn release(&self, mut client: Ldap) -> Result<()> {
        Connection::close(&mut client).await
    }
}
