use std::fmt;
use std::str::FromStr;

use super::upstream::UpstreamError;

/// Protocol error types
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The request does not name a coordinate this gateway serves.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Unsupported service: {0}")]
    UnsupportedService(String),

    /// A wire frame could not be built (e.g. a ref name too long for a pkt-line).
    #[error("Protocol encoding error: {0}")]
    Encoding(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn invalid_request(msg: &str) -> Self {
        ProtocolError::InvalidRequest(msg.to_string())
    }

    pub fn version_not_found(constraint: &str) -> Self {
        ProtocolError::VersionNotFound(constraint.to_string())
    }
}

/// Git service types for smart protocol
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ServiceType {
    UploadPack,
    ReceivePack,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServiceType::UploadPack => write!(f, "git-upload-pack"),
            ServiceType::ReceivePack => write!(f, "git-receive-pack"),
        }
    }
}

impl FromStr for ServiceType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git-upload-pack" => Ok(ServiceType::UploadPack),
            "git-receive-pack" => Ok(ServiceType::ReceivePack),
            _ => Err(ProtocolError::UnsupportedService(s.to_string())),
        }
    }
}

/// Capabilities the gateway reads from an upstream advertisement or writes into its own.
/// Everything it does not act on is kept verbatim as [`Capability::Unknown`].
#[derive(Debug, Clone, PartialEq)]
pub enum Capability {
    /// `symref=<name>:<target>`, e.g. `symref=HEAD:refs/heads/main`.
    Symref(String, String),
    ObjectFormat(String),
    Agent(String),
    Unknown(String),
}

impl FromStr for Capability {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("symref=") {
            return match rest.split_once(':') {
                Some((name, target)) => Ok(Capability::Symref(name.to_string(), target.to_string())),
                None => Ok(Capability::Unknown(s.to_string())),
            };
        }
        if let Some(rest) = s.strip_prefix("agent=") {
            return Ok(Capability::Agent(rest.to_string()));
        }
        if let Some(rest) = s.strip_prefix("object-format=") {
            return Ok(Capability::ObjectFormat(rest.to_string()));
        }

        Ok(Capability::Unknown(s.to_string()))
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Symref(name, target) => write!(f, "symref={}:{}", name, target),
            Capability::ObjectFormat(format) => write!(f, "object-format={}", format),
            Capability::Agent(agent) => write!(f, "agent={}", agent),
            Capability::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Protocol constants
pub const LF: char = '\n';
pub const SP: char = ' ';
pub const NUL: char = '\0';
pub const PKT_LINE_END_MARKER: &[u8; 4] = b"0000";
/// Largest pkt-line git accepts, length prefix included.
pub const MAX_PKT_LINE_LEN: usize = 65520;
pub const HEAD: &str = "HEAD";
pub const BRANCH_PREFIX: &str = "refs/heads/";
pub const TAG_PREFIX: &str = "refs/tags/";
pub const PEELED_SUFFIX: &str = "^{}";

pub const AGENT: &str = concat!("git-stable/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_round_trip_through_display() {
        for raw in [
            "symref=HEAD:refs/heads/main",
            "agent=git/2.43.0",
            "object-format=sha256",
            "side-band-64k",
            "ofs-delta",
            "filter",
        ] {
            let cap: Capability = raw.parse().unwrap();
            assert_eq!(cap.to_string(), raw);
        }
        assert_eq!(
            "side-band-64k".parse::<Capability>().unwrap(),
            Capability::Unknown("side-band-64k".to_string())
        );
    }

    #[test]
    fn symref_capability_splits_name_and_target() {
        let cap: Capability = "symref=HEAD:refs/heads/master".parse().unwrap();
        assert_eq!(
            cap,
            Capability::Symref("HEAD".to_string(), "refs/heads/master".to_string())
        );
    }

    #[test]
    fn service_type_parses_known_services() {
        assert_eq!(
            "git-upload-pack".parse::<ServiceType>().unwrap(),
            ServiceType::UploadPack
        );
        assert_eq!(ServiceType::ReceivePack.to_string(), "git-receive-pack");
        assert!(matches!(
            "git-archive".parse::<ServiceType>(),
            Err(ProtocolError::UnsupportedService(_))
        ));
    }
}
