//! git-stable: a version-pinning gateway for Git smart HTTP.
//!
//! A client clones `org.example.com/repo@v1` and receives a repository with a single branch:
//! the newest upstream tag or branch matching the constraint, relabeled as a branch so the
//! checkout is not detached. Pack data is streamed from the upstream as it arrives.
//!
//! Modules
//! - `coordinate`: request host and path to upstream repository plus constraint.
//! - `version`: typed references and semantic-version resolution over them.
//! - `protocol`: pkt-line codec, advertisement rewriting and the upstream smart HTTP client.
//! - `server`: the request dispatcher and its axum router.
//! - `config`, `logging`, `errors`: process setup.
//! - `hash`: object ids as carried on the wire.
//! - `utils`: transfer accounting.

pub mod config;
pub mod coordinate;
pub mod errors;
pub mod hash;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod utils;
pub mod version;

pub use config::GatewayConfig;
pub use coordinate::{Coordinate, CoordinateResolver, Credentials};
pub use errors::GitStableError;
pub use protocol::{ProtocolError, ServiceType, Session, Upstream, UpstreamError};
pub use server::{Gateway, router};
pub use version::{Reference, ResolvedVersion, Versions};
