//! Configuration file support. The configuration is a TOML file with an optional
//! `[ldap]` table describing the directory server, the transport security and the
//! pool used to reuse connections.
use std::path::Path;
use std::time::Duration;

use log::LevelFilter;
use serde::Deserialize;
use toml::Deserializer;
use url::Url;

use crate::error::{LPError, Result};

pub const DEFAULT_POOL_COUNT: usize = 5;
pub const DEFAULT_POOL_RETRIES: usize = 2;
pub const DEFAULT_POOL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_log")]
    log: LevelFilter,

    ldap: Option<LdapConfig>,
}

fn default_log() -> LevelFilter {
    LevelFilter::Info
}

impl Config {
    pub fn load_from_file<A: AsRef<Path>>(path: A) -> anyhow::Result<Config> {
        let string = std::fs::read_to_string(path)?;

        Self::parse(string.as_str())
    }

    pub fn parse(string: &str) -> anyhow::Result<Config> {
        let deserializer = Deserializer::new(string);

        let config: Config = Deserialize::deserialize(deserializer)?;

        if let Some(ldap) = config.ldap.as_ref() {
            ldap.validate()?;
        }

        Ok(config)
    }

    pub fn log(&self) -> LevelFilter {
        self.log
    }

    pub fn ldap(&self) -> Option<&LdapConfig> {
        self.ldap.as_ref()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LdapConfig {
    // The server to connect to, e.g. ldap://localhost:389 or ldaps://localhost:636
    address: Url,
    // The user to use for connecting to the server
    user: String,
    // Optionally, the password to use when connecting. Without one, an unauthenticated
    // bind is performed.
    password: Option<String>,
    #[serde(default)]
    starttls: bool,
    // Dial timeout in seconds
    #[serde(default = "default_dial_timeout")]
    timeout: u64,
    #[serde(default)]
    tls: TlsConfig,
    #[serde(default)]
    pool: PoolConfig,
}

fn default_dial_timeout() -> u64 {
    DEFAULT_DIAL_TIMEOUT.as_secs()
}

impl LdapConfig {
    pub fn new(address: Url, user: String) -> Self {
        Self {
            address,
            user,
            password: None,
            starttls: false,
            timeout: default_dial_timeout(),
            tls: TlsConfig::default(),
            pool: PoolConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.address.scheme() {
            "ldap" | "ldaps" => (),
            scheme => {
                return Err(LPError::Config(format!(
                    "unsupported address scheme '{scheme}', expected ldap or ldaps"
                )))
            }
        }

        if self.address.host_str().is_none() {
            return Err(LPError::Config(format!("address {} has no host", self.address)));
        }

        if self.starttls && self.address.scheme() == "ldaps" {
            return Err(LPError::Config(
                "starttls cannot be combined with an ldaps address".to_owned(),
            ));
        }

        Ok(())
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    pub fn user(&self) -> &str {
        self.user.as_str()
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }

    pub fn starttls(&self) -> bool {
        self.starttls
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    pub fn set_address(&mut self, address: Url) {
        self.address = address;
    }

    pub fn set_user(&mut self, user: String) {
        self.user = user;
    }

    pub fn set_password(&mut self, password: Option<String>) {
        self.password = password;
    }

    pub fn set_starttls(&mut self, starttls: bool) {
        self.starttls = starttls;
    }

    pub fn set_pool(&mut self, pool: PoolConfig) {
        self.pool = pool;
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    /// Accept any server certificate. Only meant for test setups.
    #[serde(default)]
    skip_verify: bool,
}

impl TlsConfig {
    pub fn skip_verify(&self) -> bool {
        self.skip_verify
    }
}

/// Pool tuning. Zero values fall back to the defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    enable: bool,
    count: usize,
    retries: usize,
    // Acquisition timeout, given in seconds in the file
    #[serde(deserialize_with = "seconds")]
    timeout: Duration,
    // Shutdown drain timeout, given in seconds in the file
    #[serde(deserialize_with = "seconds")]
    drain_timeout: Duration,
}

fn seconds<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enable: false,
            count: DEFAULT_POOL_COUNT,
            retries: DEFAULT_POOL_RETRIES,
            timeout: DEFAULT_POOL_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl PoolConfig {
    pub fn enabled(count: usize, retries: usize, timeout: Duration) -> Self {
        Self {
            enable: true,
            count,
            retries,
            timeout,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn enable(&self) -> bool {
        self.enable
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn drain_timeout(&self) -> Duration {
        if self.drain_timeout.is_zero() {
            DEFAULT_DRAIN_TIMEOUT
        } else {
            self.drain_timeout
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config = Config::parse(
            r#"
            log = "debug"

            [ldap]
            address = "ldap://127.0.0.1:389"
            user = "cn=admin,dc=example,dc=org"
            password = "secret"
            starttls = true
            timeout = 3

            [ldap.tls]
            skip_verify = true

            [ldap.pool]
            enable = true
            count = 8
            retries = 4
            timeout = 20
            drain_timeout = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.log(), LevelFilter::Debug);

        let ldap = config.ldap().unwrap();
        assert_eq!(ldap.address().as_str(), "ldap://127.0.0.1:389");
        assert_eq!(ldap.user(), "cn=admin,dc=example,dc=org");
        assert_eq!(ldap.password(), "secret");
        assert!(ldap.starttls());
        assert_eq!(ldap.timeout(), Duration::from_secs(3));
        assert!(ldap.tls().skip_verify());

        let pool = ldap.pool();
        assert!(pool.enable());
        assert_eq!(pool.count(), 8);
        assert_eq!(pool.retries(), 4);
        assert_eq!(pool.timeout(), Duration::from_secs(20));
        assert_eq!(pool.drain_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn defaults_apply_to_missing_values() {
        let config = Config::parse(
            r#"
            [ldap]
            address = "ldaps://ldap.example.org"
            user = "cn=reader,dc=example,dc=org"
            "#,
        )
        .unwrap();

        assert_eq!(config.log(), LevelFilter::Info);

        let ldap = config.ldap().unwrap();
        assert_eq!(ldap.password(), "");
        assert!(!ldap.starttls());
        assert_eq!(ldap.timeout(), DEFAULT_DIAL_TIMEOUT);

        let pool = ldap.pool();
        assert!(!pool.enable());
        assert_eq!(pool.count(), DEFAULT_POOL_COUNT);
        assert_eq!(pool.retries(), DEFAULT_POOL_RETRIES);
        assert_eq!(pool.timeout(), DEFAULT_POOL_TIMEOUT);
        assert_eq!(pool.drain_timeout(), DEFAULT_DRAIN_TIMEOUT);
    }

    #[test]
    fn ldap_section_is_optional() {
        let config = Config::parse("log = \"warn\"").unwrap();

        assert!(config.ldap().is_none());
        assert_eq!(config.log(), LevelFilter::Warn);
    }

    #[test]
    fn sub_second_pool_timeouts_are_kept() {
        let pool = PoolConfig::enabled(2, 2, Duration::from_millis(300))
            .with_drain_timeout(Duration::from_millis(150));

        assert_eq!(pool.timeout(), Duration::from_millis(300));
        assert_eq!(pool.drain_timeout(), Duration::from_millis(150));

        let pool = PoolConfig::enabled(2, 2, Duration::from_secs(1))
            .with_drain_timeout(Duration::ZERO);
        assert_eq!(pool.drain_timeout(), DEFAULT_DRAIN_TIMEOUT);
    }

    #[test]
    fn reject_unknown_scheme() {
        let res = Config::parse(
            r#"
            [ldap]
            address = "http://ldap.example.org"
            user = "cn=admin"
            "#,
        );

        assert!(res.is_err());
    }

    #[test]
    fn reject_starttls_over_ldaps() {
        let mut ldap = LdapConfig::new(
            Url::parse("ldaps://ldap.example.org").unwrap(),
            "cn=admin".to_owned(),
        );
        assert!(ldap.validate().is_ok());

        ldap.starttls = true;
        assert!(matches!(ldap.validate(), Err(LPError::Config(_))));
    }
}
