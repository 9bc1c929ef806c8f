/// Git smart protocol plumbing
///
/// Both sides of the gateway live here: the upstream client adapter that reads a real
/// repository's advertisement and pack, and the rewriter that presents one resolved
/// version to the client as a single-branch repository.
pub mod http;
pub mod smart;
pub mod types;
pub mod upstream;
pub mod utils;

// Re-export main interfaces
pub use http::RequestKind;
pub use smart::{Advertisement, build_advertisement, build_transfer_envelope, parse_advertisement};
pub use types::*;
pub use upstream::{HttpUpstream, PackTransfer, Session, Upstream, UpstreamError};
