//! Mapping of inbound requests onto upstream repository coordinates.
//!
//! Two routing schemes are supported. With [`RoutingScheme::Subdomain`] the organization is
//! the leftmost host label (`org.example.com/repo@v1`); with [`RoutingScheme::Path`] it is
//! the first path segment (`example.com/org/repo@v1`). Resolution is pure string work, no
//! request reaches the upstream from here.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::config::{RoutingConfig, RoutingScheme, UpstreamConfig};
use crate::protocol::http::strip_service_suffix;
use crate::protocol::types::ProtocolError;

/// Basic credentials taken from the inbound request and forwarded to the upstream as is.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    /// Parse an `Authorization: Basic ...` header value.
    pub fn from_authorization(value: &str) -> Option<Credentials> {
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, secret) = decoded.split_once(':')?;
        Some(Credentials {
            username: username.to_string(),
            secret: secret.to_string(),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Upstream repository plus the version constraint a request asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinate {
    pub server: String,
    pub organization: String,
    pub repository: String,
    pub constraint: String,
    /// Canonical import path of the repository root, e.g. `org.example.com/repo@v1`.
    pub display_name: String,
    /// Package path below the repository root, with a leading `/`, or empty.
    pub subpath: String,
}

impl Coordinate {
    /// `<scheme>://<server>/<org>/<repo>`, the base of the upstream smart HTTP endpoints.
    pub fn upstream_url(&self, scheme: &str) -> String {
        format!(
            "{}://{}/{}/{}",
            scheme, self.server, self.organization, self.repository
        )
    }

    /// Where a browser is sent for the repository.
    pub fn browse_url(&self) -> String {
        self.upstream_url("https")
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.server, self.organization, self.repository, self.constraint
        )
    }
}

#[derive(Debug, Clone)]
pub struct CoordinateResolver {
    scheme: RoutingScheme,
    separator: char,
    server: String,
    default_organization: Option<String>,
}

impl CoordinateResolver {
    pub fn new(routing: &RoutingConfig, upstream: &UpstreamConfig) -> Self {
        Self {
            scheme: routing.scheme,
            separator: routing.separator,
            server: upstream.server.clone(),
            default_organization: upstream.default_organization.clone(),
        }
    }

    /// Resolve an inbound request's host and path (query string allowed).
    pub fn resolve(&self, host: &str, path: &str) -> Result<Coordinate, ProtocolError> {
        let host = strip_port(host);
        let path = path.split_once('?').map_or(path, |(p, _)| p);
        let path = strip_service_suffix(path);

        if path.matches(self.separator).count() != 1 {
            return Err(ProtocolError::InvalidRequest(format!(
                "expected exactly one {:?} in {path:?}",
                self.separator
            )));
        }

        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let organization = match self.scheme {
            RoutingScheme::Subdomain => self.organization_from_host(host)?,
            RoutingScheme::Path => segments
                .next()
                .ok_or_else(|| ProtocolError::invalid_request("missing organization"))?
                .to_string(),
        };
        let versioned = segments
            .next()
            .ok_or_else(|| ProtocolError::invalid_request("missing repository"))?;
        let subpath: String = segments.map(|s| format!("/{s}")).collect();

        let (repository, constraint) = versioned.split_once(self.separator).ok_or_else(|| {
            ProtocolError::InvalidRequest(format!("no version in {versioned:?}"))
        })?;

        if !is_valid_name(&organization) || !is_valid_name(repository) {
            return Err(ProtocolError::InvalidRequest(format!(
                "invalid repository name {organization:?}/{repository:?}"
            )));
        }
        if constraint.is_empty() || constraint.chars().any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ProtocolError::InvalidRequest(format!(
                "invalid version {constraint:?}"
            )));
        }

        let display_name = match self.scheme {
            RoutingScheme::Subdomain => {
                format!("{host}/{repository}{}{constraint}", self.separator)
            }
            RoutingScheme::Path => format!(
                "{host}/{organization}/{repository}{}{constraint}",
                self.separator
            ),
        };

        Ok(Coordinate {
            server: self.server.clone(),
            organization,
            repository: repository.to_string(),
            constraint: constraint.to_string(),
            display_name,
            subpath,
        })
    }

    /// Resolve an import path such as a [`Coordinate::display_name`].
    pub fn resolve_import_path(&self, import_path: &str) -> Result<Coordinate, ProtocolError> {
        let (host, path) = import_path
            .split_once('/')
            .ok_or_else(|| ProtocolError::invalid_request("import path has no path"))?;
        self.resolve(host, &format!("/{path}"))
    }

    /// The leftmost label of a host with more than two labels, else the default organization.
    fn organization_from_host(&self, host: &str) -> Result<String, ProtocolError> {
        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() > 2 {
            return Ok(labels[0].to_string());
        }
        self.default_organization
            .clone()
            .ok_or_else(|| ProtocolError::InvalidRequest(format!("no organization in host {host:?}")))
    }
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
