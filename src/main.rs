//! git-stable gateway entry point.

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use git_stable::{
    Gateway, GatewayConfig, GitStableError,
    config::RoutingScheme,
    logging::{LogFormat, init_logging},
    router,
};
use tokio::net::TcpListener;

/// Serve semver-pinned views of upstream Git repositories over smart HTTP.
#[derive(Parser, Debug)]
#[command(name = "git-stable")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "GIT_STABLE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "GIT_STABLE_ADDR")]
    addr: Option<String>,

    /// Routing scheme: subdomain (org.host/repo@v1) or path (host/org/repo@v1)
    #[arg(long, env = "GIT_STABLE_SCHEME")]
    scheme: Option<RoutingScheme>,

    /// Character separating repository and version
    #[arg(long, env = "GIT_STABLE_SEPARATOR")]
    separator: Option<char>,

    /// Upstream Git server
    #[arg(long, env = "GIT_STABLE_SERVER")]
    server: Option<String>,

    /// Organization used when a request names none
    #[arg(long, env = "GIT_STABLE_ORG")]
    org: Option<String>,

    /// Scheme used to reach the upstream server
    #[arg(long, env = "GIT_STABLE_UPSTREAM_SCHEME")]
    upstream_scheme: Option<String>,

    /// Upstream timeout in seconds
    #[arg(long, env = "GIT_STABLE_TIMEOUT")]
    timeout: Option<u64>,

    /// Realm of the Basic authentication challenge
    #[arg(long, env = "GIT_STABLE_REALM")]
    realm: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GIT_STABLE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, env = "GIT_STABLE_LOG_FORMAT")]
    log_format: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<GatewayConfig, GitStableError> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::from_file(path)?,
            None => GatewayConfig::default(),
        };

        if let Some(addr) = self.addr {
            config.addr = addr;
        }
        if let Some(scheme) = self.scheme {
            config.routing.scheme = scheme;
        }
        if let Some(separator) = self.separator {
            config.routing.separator = separator;
        }
        if let Some(server) = self.server {
            config.upstream.server = server;
        }
        if let Some(org) = self.org {
            config.upstream.default_organization = Some(org);
        }
        if let Some(scheme) = self.upstream_scheme {
            config.upstream.scheme = scheme;
        }
        if let Some(timeout) = self.timeout {
            config.upstream.timeout_secs = timeout;
        }
        if let Some(realm) = self.realm {
            config.realm = realm;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), GitStableError> {
    let config = Args::parse().into_config()?;
    init_logging(&config.log.level, LogFormat::parse(&config.log.format)?)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.addr,
        scheme = ?config.routing.scheme,
        separator = %config.routing.separator,
        server = %config.upstream.server,
        "Starting git-stable"
    );

    let listener = TcpListener::bind(&config.addr).await?;
    let gateway = Arc::new(Gateway::from_config(config)?);
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("git-stable stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
