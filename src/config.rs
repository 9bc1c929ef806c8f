use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::GitStableError;

/// How the organization is carried by an inbound request.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoutingScheme {
    /// `org.host/repo@constraint`
    #[default]
    Subdomain,
    /// `host/org/repo@constraint`
    Path,
}

impl std::str::FromStr for RoutingScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "subdomain" => Ok(RoutingScheme::Subdomain),
            "path" => Ok(RoutingScheme::Path),
            _ => Err(format!("invalid routing scheme {s:?}, expected subdomain or path")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RoutingConfig {
    pub scheme: RoutingScheme,
    /// Separates repository and constraint, `@` in `repo@v1`.
    pub separator: char,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            scheme: RoutingScheme::Subdomain,
            separator: '@',
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Host of the upstream Git server, e.g. `github.com`.
    pub server: String,
    /// URL scheme used to reach `server`.
    pub scheme: String,
    /// Organization used when a request carries none, and target of the root redirect.
    pub default_organization: Option<String>,
    pub connect_timeout_secs: u64,
    /// Bound on the advertisement request and on each read of a pack transfer.
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            server: "github.com".to_string(),
            scheme: "https".to_string(),
            default_organization: None,
            connect_timeout_secs: 10,
            timeout_secs: 30,
            user_agent: crate::protocol::types::AGENT.to_string(),
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub addr: String,
    /// Realm of the Basic challenge sent when the upstream wants credentials.
    pub realm: String,
    pub routing: RoutingConfig,
    pub upstream: UpstreamConfig,
    pub log: LogConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            realm: "git-stable".to_string(),
            routing: RoutingConfig::default(),
            upstream: UpstreamConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, GitStableError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, GitStableError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GitStableError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), GitStableError> {
        if self.upstream.server.is_empty() {
            return Err(GitStableError::InvalidConfig(
                "upstream server must not be empty".to_string(),
            ));
        }
        if matches!(self.routing.separator, '/' | '?' | '.' | '#') {
            return Err(GitStableError::InvalidConfig(format!(
                "{:?} cannot be used as version separator",
                self.routing.separator
            )));
        }
        if self.upstream.timeout_secs == 0 || self.upstream.connect_timeout_secs == 0 {
            return Err(GitStableError::InvalidConfig(
                "upstream timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
