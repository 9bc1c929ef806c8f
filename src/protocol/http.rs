//! HTTP-specific helpers: request classification, smart HTTP path suffixes, query parsing
//! and content types.

use super::types::ServiceType;

pub const INFO_REFS_SUFFIX: &str = "/info/refs";
pub const UPLOAD_PACK_SUFFIX: &str = "/git-upload-pack";
pub const RECEIVE_PACK_SUFFIX: &str = "/git-receive-pack";

/// What an inbound request asks the gateway to do, decided once from method and path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// `GET .../info/refs`: rewrite the upstream advertisement.
    Advertisement,
    /// `POST .../git-upload-pack`: stream the pack for the resolved version.
    Transfer,
    /// Anything else: go-get meta page, redirects.
    Default,
}

impl RequestKind {
    pub fn classify(method: &str, path: &str) -> RequestKind {
        let path = path.split_once('?').map_or(path, |(p, _)| p);
        if path.ends_with(INFO_REFS_SUFFIX) {
            RequestKind::Advertisement
        } else if path.ends_with(UPLOAD_PACK_SUFFIX) && method.eq_ignore_ascii_case("POST") {
            RequestKind::Transfer
        } else {
            RequestKind::Default
        }
    }
}

/// Remove a trailing smart HTTP endpoint from a request path.
pub fn strip_service_suffix(path: &str) -> &str {
    [INFO_REFS_SUFFIX, UPLOAD_PACK_SUFFIX, RECEIVE_PACK_SUFFIX]
        .iter()
        .find_map(|suffix| path.strip_suffix(suffix))
        .unwrap_or(path)
}

/// Look a parameter up in a raw query string.
pub fn get_query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query.split('&').find_map(|param| match param.split_once('=') {
        Some((key, value)) if key == name => Some(value),
        None if param == name => Some(""),
        _ => None,
    })
}

/// Get Git service from query parameters
pub fn get_service_from_query(query: &str) -> Option<&str> {
    get_query_param(query, "service")
}

/// Content type of a service's result body.
pub fn get_content_type(service: ServiceType) -> &'static str {
    match service {
        ServiceType::UploadPack => "application/x-git-upload-pack-result",
        ServiceType::ReceivePack => "application/x-git-receive-pack-result",
    }
}

/// Content type of a service's info/refs advertisement.
pub fn get_advertisement_content_type(service: ServiceType) -> &'static str {
    match service {
        ServiceType::UploadPack => "application/x-git-upload-pack-advertisement",
        ServiceType::ReceivePack => "application/x-git-receive-pack-advertisement",
    }
}
