//! Smart protocol framing on both sides of the gateway: decoding an upstream's ref
//! advertisement, rewriting a resolved version into a single-branch advertisement, and the
//! upload-pack result envelope that precedes the streamed pack.

use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{
    types::{AGENT, Capability, HEAD, LF, NUL, PKT_LINE_END_MARKER, ProtocolError, SP, ServiceType},
    upstream::UpstreamError,
    utils::{PktLine, add_pkt_line_string, build_smart_reply, read_pkt_line},
};
use crate::hash::{HashKind, ObjectHash};
use crate::version::{Reference, ResolvedVersion};

/// Ref name used by servers that advertise an empty repository.
const EMPTY_REPOSITORY_REF: &str = "capabilities^{}";

/// A decoded `info/refs` advertisement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Advertisement {
    /// `(full name, id)` in advertised order.
    pub refs: Vec<(String, ObjectHash)>,
    pub capabilities: Vec<Capability>,
}

impl Advertisement {
    /// Target of the `symref=<name>:<target>` capability for `name`.
    pub fn symref(&self, name: &str) -> Option<&str> {
        self.capabilities.iter().find_map(|cap| match cap {
            Capability::Symref(n, target) if n == name => Some(target.as_str()),
            _ => None,
        })
    }

    /// Object format the repository declares, or the width of its first id when it does not.
    pub fn hash_kind(&self) -> HashKind {
        self.capabilities
            .iter()
            .find_map(|cap| match cap {
                Capability::ObjectFormat(format) => HashKind::from_str(format).ok(),
                _ => None,
            })
            .or_else(|| self.refs.first().map(|(_, hash)| hash.kind()))
            .unwrap_or_default()
    }

    /// Branches and tags, followed by `HEAD` when the advertisement names its target.
    pub fn references(&self) -> Vec<Reference> {
        let mut references: Vec<Reference> = self
            .refs
            .iter()
            .filter_map(|(name, hash)| Reference::new(name.as_str(), *hash))
            .collect();
        let head = self
            .symref(HEAD)
            .and_then(|target| references.iter().find(|r| r.name() == target))
            .map(Reference::symbolic);
        references.extend(head);
        references
    }
}

/// Decode a smart HTTP ref advertisement. The `# service=` preamble is optional.
pub fn parse_advertisement(mut bytes: Bytes) -> Result<Advertisement, ProtocolError> {
    let mut advertisement = Advertisement::default();
    let mut first_ref = true;

    loop {
        if bytes.is_empty() {
            return Err(ProtocolError::invalid_request(
                "advertisement ended without flush",
            ));
        }
        let line = read_pkt_line(&mut bytes)?;
        let Some(text) = line.text() else {
            if first_ref && advertisement.refs.is_empty() && !bytes.is_empty() {
                // flush closing the service announcement
                continue;
            }
            break;
        };

        if text.starts_with(b"# service=") || text == b"version 1" {
            continue;
        }
        if let Some(message) = text.strip_prefix(b"ERR ") {
            return Err(UpstreamError::Protocol(String::from_utf8_lossy(message).to_string()).into());
        }

        let (ref_part, caps) = match memchr::memchr(0, text) {
            Some(pos) => (&text[..pos], Some(&text[pos + 1..])),
            None => (text, None),
        };
        if let Some(caps) = caps {
            advertisement.capabilities = String::from_utf8_lossy(caps)
                .split_whitespace()
                .filter_map(|cap| cap.parse::<Capability>().ok())
                .collect();
        }
        first_ref = false;

        let ref_line = std::str::from_utf8(ref_part)
            .map_err(|_| ProtocolError::invalid_request("Invalid UTF-8 in ref line"))?;
        let (hash, name) = ref_line.split_once(SP).ok_or_else(|| {
            ProtocolError::InvalidRequest(format!("Malformed ref line: {ref_line:?}"))
        })?;
        if name == EMPTY_REPOSITORY_REF {
            continue;
        }
        let hash = ObjectHash::from_str(hash)
            .map_err(|e| ProtocolError::InvalidRequest(format!("Bad id for {name}: {e}")))?;
        advertisement.refs.push((name.to_string(), hash));
    }

    let kind = advertisement.hash_kind();
    if let Some((name, hash)) = advertisement.refs.iter().find(|(_, h)| h.kind() != kind) {
        return Err(UpstreamError::Protocol(format!(
            "{name} is a {} id in a {kind} repository",
            hash.kind()
        ))
        .into());
    }

    Ok(advertisement)
}

/// Advertise `resolved` as the only branch, with `HEAD` pointing at it.
///
/// Tags are presented under `refs/heads/` so clients check out a branch named after the
/// tag instead of ending up detached.
pub fn build_advertisement(resolved: &ResolvedVersion) -> Result<BytesMut, ProtocolError> {
    let branch = resolved.branch();
    let head = Reference::symbolic(&branch);
    let capabilities = [
        Capability::Symref(HEAD.to_string(), branch.name().to_string()),
        Capability::ObjectFormat(branch.hash().kind().to_string()),
        Capability::Agent(AGENT.to_string()),
    ]
    .iter()
    .map(Capability::to_string)
    .collect::<Vec<_>>()
    .join(" ");

    let ref_list = vec![
        format!("{}{SP}{}{NUL}{capabilities}{LF}", head.hash(), head.name()),
        format!("{}{SP}{}{LF}", branch.hash(), branch.name()),
    ];

    let pkt_line_stream = build_smart_reply(&ref_list, ServiceType::UploadPack.to_string())?;
    tracing::debug!(
        branch = branch.name(),
        hash = %branch.hash(),
        relabeled = resolved.relabeled(),
        "built advertisement"
    );
    Ok(pkt_line_stream)
}

/// Writes pkt-lines to an async sink.
pub struct PktWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> PktWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        let mut buf = BytesMut::new();
        add_pkt_line_string(&mut buf, line.to_string())?;
        self.inner.write_all(&buf).await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Start an upload-pack result: the `NAK` acknowledgement, after which raw pack bytes follow.
pub async fn build_transfer_envelope<W: AsyncWrite + Unpin>(
    sink: W,
) -> Result<PktWriter<W>, ProtocolError> {
    let mut writer = PktWriter::new(sink);
    writer.write_line("NAK\n").await?;
    Ok(writer)
}

/// Request body asking an upload-pack endpoint for everything reachable from `hash`.
pub fn build_want_request(hash: &ObjectHash) -> Result<BytesMut, ProtocolError> {
    let mut request = BytesMut::new();
    add_pkt_line_string(
        &mut request,
        format!("want {hash}{SP}{}{LF}", Capability::Agent(AGENT.to_string())),
    )?;
    request.extend_from_slice(&PKT_LINE_END_MARKER[..]);
    add_pkt_line_string(&mut request, format!("done{LF}"))?;
    Ok(request)
}

/// Whether a negotiation pkt-line is the final `NAK`/`ACK` before pack data.
pub(crate) fn is_negotiation_end(line: &PktLine) -> bool {
    matches!(line.text(), Some(text) if text == b"NAK" || text.starts_with(b"ACK "))
}
