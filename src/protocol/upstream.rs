//! Client side of the gateway: one smart HTTP session against the upstream per request.
//!
//! [`Upstream::connect`] fetches and decodes the ref advertisement, [`Session::open_pack`]
//! negotiates a single `want` and hands back a [`PackTransfer`] positioned at the first pack
//! byte. Nothing here buffers a pack; bytes are copied through a fixed buffer as they arrive.

use std::{
    io,
    pin::{Pin, pin},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use reqwest::{Client, RequestBuilder, Response, StatusCode, header::CONTENT_TYPE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::io::{ReaderStream, StreamReader};

use super::{
    http::{INFO_REFS_SUFFIX, UPLOAD_PACK_SUFFIX, get_advertisement_content_type},
    smart::{build_want_request, is_negotiation_end, parse_advertisement},
    types::{ProtocolError, ServiceType},
    utils::{PktLine, parse_pkt_len},
};
use crate::config::UpstreamConfig;
use crate::coordinate::{Coordinate, Credentials};
use crate::errors::GitStableError;
use crate::utils::{CountingWriter, TransferStatus};
use crate::version::{Reference, Versions};

/// Size of the copy buffer used while streaming pack data.
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

const PACK_SIGNATURE: &[u8; 4] = b"PACK";

/// Failures of the upstream collaborator, independent of the HTTP client underneath.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Upstream requires authentication")]
    AuthRequired,

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Upstream connection failed: {0}")]
    Connection(String),

    #[error("Pack transfer failed: {0}")]
    Transfer(String),

    #[error("Upstream timed out: {0}")]
    Timeout(String),

    /// The upstream answered, but not with a well formed smart protocol message.
    #[error("Upstream protocol error: {0}")]
    Protocol(String),
}

impl From<ProtocolError> for UpstreamError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Upstream(inner) => inner,
            other => UpstreamError::Protocol(other.to_string()),
        }
    }
}

/// Opens sessions against an upstream Git server.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Open a session for `coordinate` and read its advertisement.
    async fn connect(
        &self,
        coordinate: &Coordinate,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn Session>, UpstreamError>;
}

/// One connected upstream repository.
#[async_trait]
pub trait Session: Send {
    /// Branches and tags the upstream advertised.
    fn advertised(&self) -> &Versions;

    /// Negotiate a fetch of `reference` and return the pack stream that follows.
    async fn open_pack(&mut self, reference: &Reference) -> Result<PackTransfer, UpstreamError>;

    /// Stream the pack for `reference` into `sink`.
    async fn fetch(
        &mut self,
        reference: &Reference,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<TransferStatus, UpstreamError> {
        let transfer = self.open_pack(reference).await?;
        transfer.copy_to(sink).await
    }
}

pub type PackReader = Pin<Box<dyn AsyncRead + Send>>;

/// Pack data from the upstream, not yet copied anywhere.
pub struct PackTransfer {
    /// Bytes consumed while looking for the end of negotiation that belong to the pack.
    prefix: Bytes,
    reader: PackReader,
    read_timeout: Duration,
}

impl PackTransfer {
    pub fn new(prefix: Bytes, reader: PackReader, read_timeout: Duration) -> Self {
        Self {
            prefix,
            reader,
            read_timeout,
        }
    }

    /// The pack as a stream of chunks read through a fixed size buffer. Each upstream read
    /// is bounded by the read timeout. Dropping the stream drops the upstream connection.
    pub fn into_stream(
        self,
    ) -> impl Stream<Item = Result<Bytes, UpstreamError>> + Send + 'static {
        let read_timeout = self.read_timeout;
        let prefix_len = self.prefix.len() as u64;
        let prefix = (!self.prefix.is_empty()).then_some(Ok::<_, UpstreamError>(self.prefix));
        let prefix = stream::iter(prefix);
        let state = PackStream {
            reader: ReaderStream::with_capacity(self.reader, COPY_BUFFER_SIZE),
            bytes: prefix_len,
            started: Instant::now(),
            finished: false,
            span: tracing::Span::current(),
        };

        let body = stream::unfold(Some(state), move |state| async move {
            let mut state = state?;
            let err = match timeout(read_timeout, state.reader.next()).await {
                Ok(Some(Ok(chunk))) => {
                    state.bytes += chunk.len() as u64;
                    return Some((Ok(chunk), Some(state)));
                }
                Ok(None) => {
                    state.finish(None);
                    return None;
                }
                Ok(Some(Err(e))) => UpstreamError::Transfer(e.to_string()),
                Err(_) => UpstreamError::Timeout(format!(
                    "no pack data for {read_timeout:?} after {} bytes",
                    state.bytes
                )),
            };
            state.finish(Some(&err));
            Some((Err(err), None))
        });
        prefix.chain(body)
    }

    /// Copy the whole pack into `sink`.
    pub async fn copy_to<W>(self, sink: &mut W) -> Result<TransferStatus, UpstreamError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut writer = CountingWriter::new(sink);
        let mut chunks = pin!(self.into_stream());
        while let Some(chunk) = chunks.next().await {
            writer.write_all(&chunk?).await.map_err(sink_error)?;
        }
        writer.flush().await.map_err(sink_error)?;
        Ok(writer.status())
    }
}

/// Upstream side of a pack stream, with the accounting reported when it ends.
struct PackStream {
    reader: ReaderStream<PackReader>,
    bytes: u64,
    started: Instant,
    finished: bool,
    span: tracing::Span,
}

impl PackStream {
    fn status(&self) -> TransferStatus {
        TransferStatus {
            bytes: self.bytes,
            elapsed: self.started.elapsed(),
        }
    }

    fn finish(&mut self, error: Option<&UpstreamError>) {
        self.finished = true;
        let status = self.status();
        match error {
            None => tracing::info!(
                parent: &self.span,
                bytes = status.bytes,
                elapsed = ?status.elapsed,
                bytes_per_sec = status.rate(),
                "pack streamed"
            ),
            Some(err) => tracing::warn!(
                parent: &self.span,
                bytes = status.bytes,
                error = %err,
                "pack stream aborted"
            ),
        }
    }
}

impl Drop for PackStream {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(
                parent: &self.span,
                bytes = self.bytes,
                elapsed = ?self.started.elapsed(),
                "client went away, upstream pack dropped"
            );
        }
    }
}

fn sink_error(e: io::Error) -> UpstreamError {
    UpstreamError::Transfer(format!("client sink: {e}"))
}

/// [`Upstream`] speaking smart HTTP through `reqwest`.
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client,
    scheme: String,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, GitStableError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| GitStableError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            scheme: config.scheme.clone(),
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn connect(
        &self,
        coordinate: &Coordinate,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn Session>, UpstreamError> {
        let base_url = coordinate.upstream_url(&self.scheme);
        let url = format!(
            "{base_url}{INFO_REFS_SUFFIX}?service={}",
            ServiceType::UploadPack
        );
        tracing::debug!(%url, "fetching upstream advertisement");

        let request = with_credentials(self.client.get(&url), credentials).timeout(self.timeout);
        let response = request.send().await.map_err(|e| request_error(e, &url))?;
        let response = check_status(response, &url)?;

        let expected = get_advertisement_content_type(ServiceType::UploadPack);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with(expected) {
            return Err(UpstreamError::Protocol(format!(
                "{url} answered with {content_type:?}, not a smart HTTP advertisement"
            )));
        }

        let body = response.bytes().await.map_err(|e| request_error(e, &url))?;
        let advertisement = parse_advertisement(body)?;
        let versions = Versions::new(
            advertisement.references(),
            advertisement.symref(super::types::HEAD),
        );
        tracing::debug!(
            refs = versions.len(),
            head = ?versions.default_branch().map(Reference::name),
            "upstream advertisement decoded"
        );

        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            base_url,
            credentials: credentials.cloned(),
            timeout: self.timeout,
            versions,
        }))
    }
}

struct HttpSession {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    timeout: Duration,
    versions: Versions,
}

#[async_trait]
impl Session for HttpSession {
    fn advertised(&self) -> &Versions {
        &self.versions
    }

    async fn open_pack(&mut self, reference: &Reference) -> Result<PackTransfer, UpstreamError> {
        let url = format!("{}{UPLOAD_PACK_SUFFIX}", self.base_url);
        let body = build_want_request(&reference.hash())?;
        tracing::debug!(%url, reference = reference.name(), hash = %reference.hash(), "requesting pack");

        let request = with_credentials(self.client.post(&url), self.credentials.as_ref())
            .header(CONTENT_TYPE, "application/x-git-upload-pack-request")
            .body(body.freeze());
        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| UpstreamError::Timeout(format!("{url} did not answer")))?
            .map_err(|e| request_error(e, &url))?;
        let response = check_status(response, &url)?;

        let stream = response.bytes_stream().map_err(io::Error::other);
        let mut reader: PackReader = Box::pin(StreamReader::new(stream));
        let prefix = timeout(self.timeout, skip_negotiation(&mut reader))
            .await
            .map_err(|_| UpstreamError::Timeout(format!("{url} negotiation stalled")))??;

        Ok(PackTransfer::new(prefix, reader, self.timeout))
    }
}

fn with_credentials(request: RequestBuilder, credentials: Option<&Credentials>) -> RequestBuilder {
    match credentials {
        Some(c) => request.basic_auth(&c.username, Some(&c.secret)),
        None => request,
    }
}

fn request_error(e: reqwest::Error, url: &str) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout(format!("{url}: {e}"))
    } else {
        UpstreamError::Connection(format!("{url}: {e}"))
    }
}

fn check_status(response: Response, url: &str) -> Result<Response, UpstreamError> {
    match response.status() {
        s if s.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(UpstreamError::AuthRequired),
        StatusCode::NOT_FOUND => Err(UpstreamError::RepositoryNotFound(url.to_string())),
        s => Err(UpstreamError::Connection(format!("{url} answered {s}"))),
    }
}

/// Consume the upload-pack result up to the pack. Returns pack bytes already read.
async fn skip_negotiation<R>(reader: &mut R) -> Result<Bytes, UpstreamError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        let mut len = [0u8; 4];
        reader
            .read_exact(&mut len)
            .await
            .map_err(|e| UpstreamError::Transfer(format!("reading negotiation: {e}")))?;
        if &len == PACK_SIGNATURE {
            return Ok(Bytes::from_static(PACK_SIGNATURE));
        }

        let pkt_len = parse_pkt_len(&len)?;
        if pkt_len == 0 {
            continue;
        }
        let mut payload = vec![0u8; pkt_len - 4];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| UpstreamError::Transfer(format!("reading negotiation: {e}")))?;
        let line = PktLine::Data(Bytes::from(payload));

        if is_negotiation_end(&line) {
            return Ok(Bytes::new());
        }
        if let Some(message) = line.text().and_then(|t| t.strip_prefix(b"ERR ")) {
            return Err(UpstreamError::Protocol(
                String::from_utf8_lossy(message).to_string(),
            ));
        }
        tracing::trace!(?line, "skipping negotiation line");
    }
}
