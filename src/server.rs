//! Request dispatcher and axum wiring.
//!
//! Every request is classified once into a [`RequestKind`]. Advertisement and transfer flows
//! resolve a [`Coordinate`], open an upstream session and pick a version; anything that is
//! not a coordinate falls through to the default flow (go-get meta page, redirects).

use std::{io, sync::Arc, time::Instant};

use askama::Template;
use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{
        HeaderMap, HeaderValue, Method, StatusCode, Uri,
        header::{AUTHORIZATION, CONTENT_TYPE, HOST, LOCATION, WWW_AUTHENTICATE},
    },
    response::{Html, IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt, future, stream};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::coordinate::{Coordinate, CoordinateResolver, Credentials};
use crate::errors::GitStableError;
use crate::protocol::{
    http::{
        RequestKind, get_advertisement_content_type, get_content_type, get_query_param,
        get_service_from_query,
    },
    smart::{build_advertisement, build_transfer_envelope},
    types::{ProtocolError, ServiceType},
    upstream::{HttpUpstream, Session, Upstream, UpstreamError},
};
use crate::version::ResolvedVersion;

/// Shared, read-only state of the gateway.
pub struct Gateway {
    config: GatewayConfig,
    resolver: CoordinateResolver,
    upstream: Arc<dyn Upstream>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, upstream: Arc<dyn Upstream>) -> Self {
        let resolver = CoordinateResolver::new(&config.routing, &config.upstream);
        Self {
            config,
            resolver,
            upstream,
        }
    }

    /// Gateway talking smart HTTP to the configured upstream server.
    pub fn from_config(config: GatewayConfig) -> Result<Self, GitStableError> {
        let upstream = HttpUpstream::new(&config.upstream)?;
        Ok(Self::new(config, Arc::new(upstream)))
    }

    async fn handle(&self, method: &Method, headers: &HeaderMap, uri: &Uri) -> Response {
        let host = request_host(headers, uri);
        let path = uri.path();
        let query = uri.query().unwrap_or_default();
        let credentials = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(Credentials::from_authorization);

        let kind = RequestKind::classify(method.as_str(), path);
        if kind == RequestKind::Default {
            return self.default_flow(host, path, query);
        }

        let coordinate = match self.resolver.resolve(host, path) {
            Ok(coordinate) => coordinate,
            Err(err) => {
                tracing::debug!(error = %err, "not a coordinate, using default flow");
                return self.default_flow(host, path, query);
            }
        };
        tracing::debug!(%coordinate, ?kind, "resolved coordinate");

        let result = match kind {
            RequestKind::Advertisement => {
                self.advertise(&coordinate, query, credentials.as_ref()).await
            }
            _ => self.transfer(&coordinate, credentials.as_ref()).await,
        };
        result.unwrap_or_else(|err| self.error_response(err, &coordinate, credentials.is_some()))
    }

    /// Connect to the upstream and pick the reference the constraint names.
    async fn open_version(
        &self,
        coordinate: &Coordinate,
        credentials: Option<&Credentials>,
    ) -> Result<(Box<dyn Session>, ResolvedVersion), ProtocolError> {
        let session = self.upstream.connect(coordinate, credentials).await?;
        let resolved = session.advertised().resolve(&coordinate.constraint)?;
        tracing::debug!(
            constraint = %coordinate.constraint,
            reference = resolved.reference().name(),
            hash = %resolved.reference().hash(),
            "version resolved"
        );
        Ok((session, resolved))
    }

    async fn advertise(
        &self,
        coordinate: &Coordinate,
        query: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Response, ProtocolError> {
        let service = requested_service(query)?;
        let (_session, resolved) = self.open_version(coordinate, credentials).await?;
        let body = build_advertisement(&resolved)?;
        Ok((
            [(CONTENT_TYPE, get_advertisement_content_type(service))],
            body.freeze(),
        )
            .into_response())
    }

    /// Stream `NAK` and the upstream pack. Headers are only sent once the upstream has
    /// accepted the `want`; later failures can only cut the body short. The body owns the
    /// upstream reader, so a client that goes away closes the upstream connection too.
    async fn transfer(
        &self,
        coordinate: &Coordinate,
        credentials: Option<&Credentials>,
    ) -> Result<Response, ProtocolError> {
        let (mut session, resolved) = self.open_version(coordinate, credentials).await?;
        let pack = session.open_pack(resolved.reference()).await?;
        drop(session);

        let nak = build_transfer_envelope(Vec::<u8>::new()).await?.into_inner();
        let pack = pack.into_stream().map_err(io::Error::other);
        let envelope = stream::once(future::ready(Ok::<_, io::Error>(Bytes::from(nak))));
        let body = Body::from_stream(envelope.chain(pack));

        Ok((
            [(CONTENT_TYPE, get_content_type(ServiceType::UploadPack))],
            body,
        )
            .into_response())
    }

    fn default_flow(&self, host: &str, path: &str, query: &str) -> Response {
        if path == "/" {
            return match &self.config.upstream.default_organization {
                Some(org) => found(&format!("https://{}/{org}", self.config.upstream.server)),
                None => StatusCode::NOT_FOUND.into_response(),
            };
        }

        let coordinate = match self.resolver.resolve(host, path) {
            Ok(coordinate) => coordinate,
            Err(err) => {
                tracing::debug!(error = %err, "no route");
                return StatusCode::NOT_FOUND.into_response();
            }
        };

        if get_query_param(query, "go-get") == Some("1") {
            let page = GoImportTemplate {
                name: &coordinate.display_name,
            };
            return match page.render() {
                Ok(html) => Html(html).into_response(),
                Err(err) => {
                    tracing::error!(error = %err, "go-import page failed to render");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            };
        }

        found(&coordinate.browse_url())
    }

    fn error_response(
        &self,
        err: ProtocolError,
        coordinate: &Coordinate,
        has_credentials: bool,
    ) -> Response {
        let status = match &err {
            ProtocolError::Upstream(UpstreamError::AuthRequired) if !has_credentials => {
                let challenge = format!("Basic realm=\"{}\"", self.config.realm);
                let mut response = (StatusCode::UNAUTHORIZED, err.to_string()).into_response();
                if let Ok(value) = HeaderValue::from_str(&challenge) {
                    response.headers_mut().insert(WWW_AUTHENTICATE, value);
                }
                return response;
            }
            ProtocolError::Upstream(UpstreamError::AuthRequired)
            | ProtocolError::Upstream(UpstreamError::RepositoryNotFound(_))
            | ProtocolError::VersionNotFound(_)
            | ProtocolError::InvalidRequest(_) => StatusCode::NOT_FOUND,
            ProtocolError::UnsupportedService(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %err, upstream = %coordinate, "request failed");
        } else {
            tracing::debug!(error = %err, %status, "request rejected");
        }

        let message = match status {
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::FORBIDDEN => "Forbidden",
            _ => "Internal Server Error",
        };
        (status, message).into_response()
    }
}

/// Meta page answering `go get` for a versioned import path.
#[derive(Template)]
#[template(path = "go_import.html")]
struct GoImportTemplate<'a> {
    name: &'a str,
}

/// Router serving every path through the dispatcher.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new().fallback(dispatch).with_state(gateway)
}

async fn dispatch(
    State(gateway): State<Arc<Gateway>>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("request", %request_id, %method, path = %uri.path());

    async move {
        let started = Instant::now();
        tracing::debug!("request accepted");

        let response = gateway.handle(&method, &headers, &uri).await;

        let status = response.status();
        let elapsed = started.elapsed();
        if status == StatusCode::OK {
            tracing::info!(status = status.as_u16(), ?elapsed, "request completed");
        } else {
            tracing::warn!(status = status.as_u16(), ?elapsed, "request completed");
        }
        response
    }
    .instrument(span)
    .await
}

/// The service a `?service=` query asks for. Pushes are refused; a missing parameter means
/// upload-pack.
fn requested_service(query: &str) -> Result<ServiceType, ProtocolError> {
    let Some(name) = get_service_from_query(query) else {
        return Ok(ServiceType::UploadPack);
    };
    match name.parse::<ServiceType>()? {
        ServiceType::UploadPack => Ok(ServiceType::UploadPack),
        ServiceType::ReceivePack => Err(ProtocolError::UnsupportedService(name.to_string())),
    }
}

fn request_host<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> &'a str {
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or_default()
}

fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Cursor,
        pin::Pin,
        sync::atomic::{AtomicBool, Ordering},
        task::{Context, Poll},
        time::Duration,
    };

    use async_trait::async_trait;
    use axum::{body::to_bytes, http::Request};
    use tokio::io::{AsyncRead, ReadBuf};
    use tokio_util::io::StreamReader;
    use tower::ServiceExt;

    use super::*;
    use crate::hash::ObjectHash;
    use crate::protocol::upstream::{PackReader, PackTransfer};
    use crate::version::{Reference, Versions};

    const MASTER: &str = "6ecf0ef2c2dffb796033e5a02219af86ec6584e5";
    const PEELED_113: &str = "e8d3ffab552895c19b9fcf7aa264d277cde33881";
    const PACK: &[u8] = b"PACK\x00\x00\x00\x02\x00\x00\x00\x00fake pack body";

    fn hash(hex: &str) -> ObjectHash {
        hex.parse().unwrap()
    }

    fn fixture() -> Versions {
        let refs = [
            ("refs/heads/master", MASTER),
            ("refs/tags/1.1.2", "b029517f6300c2da0f4b651b8642506cd6aaf45d"),
            ("refs/tags/1.1.2^{}", "a5b8b09e2f8fcb0bb99d3ccb0958157b40890d69"),
            ("refs/tags/1.1.3", "1669dce138d9b841a518c64b10914d88f5e488ea"),
            ("refs/tags/1.1.3^{}", PEELED_113),
            ("refs/tags/v2.0.3", "35e85108805c84807bc66a02d91535e1e24b38b9"),
        ];
        Versions::new(
            refs.iter()
                .filter_map(|(name, id)| Reference::new(*name, hash(id))),
            Some("refs/heads/master"),
        )
    }

    enum Behavior {
        Serve,
        RequireCredentials(&'static str, &'static str),
        Missing,
        Unreachable,
        StallPack(Arc<AtomicBool>),
        BreakPack,
    }

    struct MockUpstream {
        behavior: Behavior,
    }

    enum PackSource {
        Complete,
        Stalled(Arc<AtomicBool>),
        Broken,
    }

    struct MockSession {
        versions: Versions,
        pack: PackSource,
    }

    /// Upstream pack that never delivers a byte and records when it is dropped.
    struct StalledPack(Arc<AtomicBool>);

    impl AsyncRead for StalledPack {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl Drop for StalledPack {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Upstream for MockUpstream {
        async fn connect(
            &self,
            _coordinate: &Coordinate,
            credentials: Option<&Credentials>,
        ) -> Result<Box<dyn Session>, UpstreamError> {
            let pack = match &self.behavior {
                Behavior::Serve => PackSource::Complete,
                Behavior::RequireCredentials(user, secret) => match credentials {
                    Some(c) if c.username == *user && c.secret == *secret => PackSource::Complete,
                    _ => return Err(UpstreamError::AuthRequired),
                },
                Behavior::Missing => {
                    return Err(UpstreamError::RepositoryNotFound("gone".to_string()));
                }
                Behavior::Unreachable => {
                    return Err(UpstreamError::Connection(
                        "http://github.com/foo/qux: connection refused".to_string(),
                    ));
                }
                Behavior::StallPack(dropped) => PackSource::Stalled(dropped.clone()),
                Behavior::BreakPack => PackSource::Broken,
            };
            Ok(Box::new(MockSession {
                versions: fixture(),
                pack,
            }))
        }
    }

    #[async_trait]
    impl Session for MockSession {
        fn advertised(&self) -> &Versions {
            &self.versions
        }

        async fn open_pack(
            &mut self,
            _reference: &Reference,
        ) -> Result<PackTransfer, UpstreamError> {
            let reader: PackReader = match &self.pack {
                PackSource::Complete => Box::pin(Cursor::new(PACK.to_vec())),
                PackSource::Stalled(dropped) => Box::pin(StalledPack(dropped.clone())),
                PackSource::Broken => Box::pin(StreamReader::new(stream::iter(vec![
                    Ok(Bytes::from_static(b"PACKabc")),
                    Err(io::Error::other("connection reset")),
                ]))),
            };
            Ok(PackTransfer::new(
                Bytes::new(),
                reader,
                Duration::from_secs(30),
            ))
        }
    }

    fn app_with(behavior: Behavior, config: GatewayConfig) -> Router {
        let upstream = Arc::new(MockUpstream { behavior });
        router(Arc::new(Gateway::new(config, upstream)))
    }

    fn app(behavior: Behavior) -> Router {
        app_with(behavior, GatewayConfig::default())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(HOST, "foo.gop.kg")
            .body(Body::empty())
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn advertisement_relabels_resolved_tag() {
        let response = app(Behavior::Serve)
            .oneshot(get("/qux@1.1/info/refs?service=git-upload-pack"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/x-git-upload-pack-advertisement"
        );
        let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(body.starts_with("001e# service=git-upload-pack\n0000"));
        assert!(body.contains(&format!("{PEELED_113} refs/heads/1.1.3\n")));
        assert!(body.contains("symref=HEAD:refs/heads/1.1.3"));
        assert!(!body.contains(MASTER));
    }

    #[tokio::test]
    async fn unknown_version_is_not_found() {
        let response = app(Behavior::Serve)
            .oneshot(get("/qux@foo/info/refs?service=git-upload-pack"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn auth_challenge_only_without_credentials() {
        let behavior = || Behavior::RequireCredentials("alice", "s3cret");

        let response = app(behavior())
            .oneshot(get("/qux@master/info/refs?service=git-upload-pack"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[WWW_AUTHENTICATE],
            "Basic realm=\"git-stable\""
        );

        let mut request = get("/qux@master/info/refs?service=git-upload-pack");
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_static("Basic YWxpY2U6d3Jvbmc="),
        );
        let response = app(behavior()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(WWW_AUTHENTICATE).is_none());

        let mut request = get("/qux@master/info/refs?service=git-upload-pack");
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_static("Basic YWxpY2U6czNjcmV0"),
        );
        let response = app(behavior()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn upstream_failures_map_to_status_codes() {
        let response = app(Behavior::Missing)
            .oneshot(get("/qux@v1/info/refs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app(Behavior::Unreachable)
            .oneshot(get("/qux@v1/info/refs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn push_is_refused() {
        let response = app(Behavior::Serve)
            .oneshot(get("/qux@master/info/refs?service=git-receive-pack"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn transfer_streams_nak_then_pack() {
        let response = app(Behavior::Serve).oneshot(upload_pack()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/x-git-upload-pack-result"
        );
        let body = body_bytes(response).await;
        let mut expected = b"0008NAK\n".to_vec();
        expected.extend_from_slice(PACK);
        assert_eq!(&body[..], &expected[..]);
    }

    #[tokio::test]
    async fn go_get_serves_meta_import() {
        let response = app(Behavior::Unreachable)
            .oneshot(get("/qux@v1/sub/pkg?go-get=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(body.contains(
            "<meta name=\"go-import\" content=\"foo.gop.kg/qux@v1 git https://foo.gop.kg/qux@v1\">"
        ));
    }

    #[tokio::test]
    async fn browser_is_redirected_upstream() {
        let response = app(Behavior::Unreachable)
            .oneshot(get("/qux@v1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "https://github.com/foo/qux");
    }

    #[tokio::test]
    async fn root_redirects_to_default_organization() {
        let response = app(Behavior::Serve).oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let mut config = GatewayConfig::default();
        config.upstream.default_organization = Some("go-stable".to_string());
        let response = app_with(Behavior::Serve, config)
            .oneshot(get("/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "https://github.com/go-stable");
    }

    #[tokio::test]
    async fn invalid_coordinates_fall_through() {
        let response = app(Behavior::Serve)
            .oneshot(get("/qux@v1@v2/info/refs?service=git-upload-pack"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app(Behavior::Serve)
            .oneshot(get("/no-version/info/refs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn go_get_page_escapes_import_path() {
        let response = app(Behavior::Serve)
            .oneshot(get("/qux@v1&x?go-get=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(body.contains("content=\"foo.gop.kg/qux@v1&amp;x git https://foo.gop.kg/qux@v1&amp;x\""));
        assert!(!body.contains("v1&x"));
    }

    #[tokio::test]
    async fn server_errors_hide_upstream_details() {
        let response = app(Behavior::Unreachable)
            .oneshot(get("/qux@v1/info/refs?service=git-upload-pack"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_bytes(response).await;
        assert_eq!(&body[..], b"Internal Server Error");
    }

    fn upload_pack() -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/qux@v2/git-upload-pack")
            .header(HOST, "foo.gop.kg")
            .body(Body::from("0032want 35e85108805c84807bc66a02d91535e1e24b38b9\n00000009done\n"))
            .unwrap()
    }

    #[tokio::test]
    async fn client_disconnect_drops_upstream_pack() {
        let dropped = Arc::new(AtomicBool::new(false));
        let response = app(Behavior::StallPack(dropped.clone()))
            .oneshot(upload_pack())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut data = response.into_body().into_data_stream();
        let first = data.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"0008NAK\n");
        assert!(
            tokio::time::timeout(Duration::from_millis(50), data.next())
                .await
                .is_err()
        );
        assert!(!dropped.load(Ordering::SeqCst));

        drop(data);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn upstream_failure_mid_pack_errors_the_body() {
        let response = app(Behavior::BreakPack)
            .oneshot(upload_pack())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let chunks: Vec<_> = response.into_body().into_data_stream().collect().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(&chunks[0].as_ref().unwrap()[..], b"0008NAK\n");
        assert_eq!(&chunks[1].as_ref().unwrap()[..], b"PACKabc");
        assert!(chunks[2].is_err());
    }
}
