#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use ldap3::{Ldap, Scope, SearchEntry};

mod cli;

use cli::{CliArgs, MainCommand};
use ldappool::{ClientFactory, ClientOptions, Config, LPError, LdapClientSource, LdapConfig};

lazy_static! {
    static ref ARGS: CliArgs = CliArgs::parse();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = &ARGS;
    let cfg = args.config_file.as_str();

    let config = Config::load_from_file(cfg)?;

    env_logger::builder().filter_level(config.log()).init();

    let Some(mut ldap_config) = config.ldap().cloned().or_else(|| args.ldap_config()) else {
        error!("Missing required parameters to connect to server. Check config or provide via cli (--help for more info)");
        bail!("Missing required server information");
    };

    args.merge_into(&mut ldap_config)?;
    ldap_config.validate()?;

    match args.cmd {
        MainCommand::Bench { requests, rounds } => bench(ldap_config, requests, rounds).await,
        MainCommand::Check { ref dn } => check(ldap_config, dn.as_str()).await,
    }
}

// runs `requests` tasks in parallel, each acquiring a client, reading the root DSE and
// releasing the client again `rounds` times.
async fn bench(config: LdapConfig, requests: usize, rounds: usize) -> anyhow::Result<()> {
    let source = Arc::new(LdapClientSource::from_config(config));

    if let Err(e) = source.initialize().await {
        error!("Failed to initialize connection source: {e}");
        return Err(e.into());
    }

    info!(
        "Probing with {requests} concurrent requests using {} connections",
        if source.is_pooled() { "pooled" } else { "direct" }
    );

    let start = Instant::now();
    let mut handles = Vec::with_capacity(requests);

    for _ in 0..requests {
        let source = Arc::clone(&source);
        handles.push(tokio::spawn(async move { bench_task(&source, rounds).await }));
    }

    let mut failed = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => (),
            Ok(Err(e)) => {
                warn!("Bench request failed: {e}");
                failed += 1;
            }
            Err(e) => {
                warn!("Bench task failed: {e}");
                failed += 1;
            }
        }
    }

    info!(
        "Finished {} operations in {}ms",
        requests * rounds,
        start.elapsed().as_millis()
    );

    source.shutdown().await?;

    if failed != 0 {
        bail!("{failed} of {requests} bench requests failed");
    }

    Ok(())
}

async fn bench_task(source: &LdapClientSource, rounds: usize) -> anyhow::Result<()> {
    for _ in 0..rounds {
        let mut client = source.get_client(ClientOptions::new()).await?;
        let res = naming_contexts(&mut client).await;

        // give the client back before looking at the result
        source.release(client).await?;

        debug!("namingContexts: {:?}", res?);
    }

    Ok(())
}

async fn naming_contexts(ldap: &mut Ldap) -> anyhow::Result<Vec<String>> {
    let (entries, _) = ldap
        .search("", Scope::Base, "(objectClass=*)", vec!["namingContexts"])
        .await?
        .success()?;

    Ok(entries
        .into_iter()
        .map(SearchEntry::construct)
        .flat_map(|mut entry| entry.attrs.remove("namingContexts").unwrap_or_default())
        .collect())
}

// binds as `dn` on a one-off connection, which never touches the pool.
async fn check(config: LdapConfig, dn: &str) -> anyhow::Result<()> {
    let password = rpassword::prompt_password(format!("Password for {dn}: "))?;
    let source = LdapClientSource::from_config(config);
    let options = ClientOptions::new().with_username(dn).with_password(password);

    match source.get_client(options).await {
        Ok(client) => {
            source.release(client).await?;
            info!("Credentials of {dn} are valid");
            Ok(())
        }
        Err(e @ LPError::Bind { .. }) => {
            error!("Credentials of {dn} were rejected: {e}");
            bail!("authentication failed");
        }
        Err(e) => Err(e.into()),
    }
}
