use clap::{Parser, Subcommand};
use ldappool::LdapConfig;
use url::Url;

#[derive(Parser)]
#[clap(version, author, about, long_about = None)]
pub struct CliArgs {
    #[arg(short, long, default_value_t = String::from("/etc/ldappool.toml"))]
    /// The config file to use
    pub config_file: String,

    /// The server to connect to, overrides the configured address
    #[arg(short, long)]
    pub server: Option<Url>,

    /// The user to bind as, overrides the configured user
    #[arg(short, long)]
    pub user: Option<String>,

    /// If set, prompt for the bind password instead of using the configured one
    #[arg(short, long)]
    pub password: bool,

    #[command(subcommand)]
    pub cmd: MainCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum MainCommand {
    /// Run concurrent acquire/search/release cycles against the server
    Bench {
        /// Number of concurrent requests
        #[arg(short = 'n', long, default_value_t = 1)]
        requests: usize,

        /// Number of cycles each request performs
        #[arg(short, long, default_value_t = 1)]
        rounds: usize,
    },
    /// Verify the credentials of a user with a one-off connection
    Check {
        /// The DN to bind as
        dn: String,
    },
}

impl CliArgs {
    /// Builds a server configuration purely from the command line, if both server and
    /// user were given.
    pub fn ldap_config(&self) -> Option<LdapConfig> {
        Some(LdapConfig::new(self.server.clone()?, self.user.clone()?))
    }

    /// Applies command line overrides to a configuration loaded from file.
    pub fn merge_into(&self, config: &mut LdapConfig) -> anyhow::Result<()> {
        if let Some(ref server) = self.server {
            config.set_address(server.clone());
        }

        if let Some(ref user) = self.user {
            config.set_user(user.clone());
        }

        if self.password {
            let password = rpassword::prompt_password(format!("Password for {}: ", config.user()))?;
            config.set_password(Some(password));
        }

        Ok(())
    }
}
