//! Request dispatcher.
//!
//! Per request:
//!
//! 1. Capture the body when the method can carry one (bodies are single-read),
//!    up to `max_capture_bytes`; the origin still receives all of it.
//! 2. Forward to the origin.
//! 3. HTML response: inject the SDK script, PASS.
//! 4. Async keyword, success status, captured body: telemetry plus a
//!    fire-and-forget decision, PASS.
//! 5. Sync keyword, captured body: telemetry plus a wait-and-decide
//!    decision; BLOCK with a 403 when the score is over the threshold,
//!    otherwise PASS.
//! 6. Any failure or panic in 2-5: one direct, uninstrumented fetch of the
//!    original request.

use crate::config::{ProxySettings, RoutingConfig};
use crate::decision::{DecisionClient, DecisionMode};
use crate::error::{ProxyError, Result};
use crate::inject;
use crate::proxy_body::{self, BoxError, ProxyBody};
use crate::sdk::SdkClient;
use crate::telemetry;
use bytes::{Bytes, BytesMut};
use futures_util::{FutureExt, StreamExt, TryStreamExt, stream};
use http::header::{CONTENT_TYPE, HOST};
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body::{Body, Frame};
use http_body_util::{BodyExt, BodyStream, StreamBody};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};
use url::Url;
use uuid::Uuid;

type OriginClient = Client<HttpsConnector<HttpConnector>, ProxyBody>;

/// Hop-by-hop headers never forwarded in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// The interception proxy. Cheap to clone; all state is read-only.
#[derive(Clone)]
pub struct ProxyService {
    inner: Arc<Inner>,
}

struct Inner {
    routing: RoutingConfig,
    upstream: Url,
    origin: OriginClient,
    sdk: SdkClient,
    decisions: DecisionClient,
    decision_timeout: Duration,
    max_capture_bytes: usize,
}

/// Request body after the capture step.
enum InboundBody {
    /// Fully read; can be cloned for telemetry and replayed.
    Buffered(Bytes),
    /// Larger than the capture limit: the first `max_capture_bytes` are
    /// held for telemetry, the origin gets them followed by the rest of the
    /// stream. Single use.
    Truncated { prefix: Bytes, body: ProxyBody },
    /// Not captured (method without a body); streamed straight through.
    Streaming(ProxyBody),
}

impl InboundBody {
    fn replay(&self) -> Option<ProxyBody> {
        match self {
            InboundBody::Buffered(bytes) => Some(proxy_body::full(bytes.clone())),
            InboundBody::Truncated { .. } | InboundBody::Streaming(_) => None,
        }
    }

    /// Bytes available to the telemetry builder.
    fn captured(&self) -> Option<Bytes> {
        match self {
            InboundBody::Buffered(bytes) => Some(bytes.clone()),
            InboundBody::Truncated { prefix, .. } => Some(prefix.clone()),
            InboundBody::Streaming(_) => None,
        }
    }

    fn into_body(self) -> ProxyBody {
        match self {
            InboundBody::Buffered(bytes) => proxy_body::full(bytes),
            InboundBody::Truncated { body, .. } | InboundBody::Streaming(body) => body,
        }
    }
}

#[derive(Serialize)]
struct BlockBody {
    error: &'static str,
    score: serde_json::Value,
}

impl ProxyService {
    /// Build the service and its outbound clients.
    pub fn new(settings: ProxySettings, routing: RoutingConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        let sdk = SdkClient::new(http.clone(), &routing, settings.sdk_timeout)?;
        let decisions = DecisionClient::new(http, &routing, settings.forward_telemetry)?;

        let origin = Client::builder(TokioExecutor::new()).build(origin_connector());

        Ok(Self {
            inner: Arc::new(Inner {
                routing,
                upstream: settings.upstream,
                origin,
                sdk,
                decisions,
                decision_timeout: settings.decision_timeout,
                max_capture_bytes: settings.max_capture_bytes,
            }),
        })
    }

    /// Handle one inbound request. Never fails; the worst case is a 502
    /// when the origin itself is unreachable.
    pub async fn handle<B>(&self, req: Request<B>, peer: Option<SocketAddr>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let span = info_span!(
            "request",
            id = %Uuid::new_v4(),
            method = %req.method(),
            path = %req.uri().path(),
        );
        self.dispatch(req, peer.map(|addr| addr.ip()))
            .instrument(span)
            .await
    }

    async fn dispatch<B>(&self, req: Request<B>, peer: Option<IpAddr>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        let inbound = match self.capture(&parts.method, body).await {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(error = %err, "failed to read client body");
                return status_response(StatusCode::BAD_REQUEST);
            }
        };

        let replay = inbound.replay();
        let telemetry_body = if carries_body(&parts.method) {
            inbound.captured()
        } else {
            None
        };

        let outcome = AssertUnwindSafe(self.intercept(&parts, inbound, telemetry_body, peer))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(error = %err, "interception failed, falling back to direct fetch");
                self.passthrough(&parts, replay, peer).await
            }
            Err(_) => {
                error!("interception panicked, falling back to direct fetch");
                self.passthrough(&parts, replay, peer).await
            }
        }
    }

    /// Steps 2-5.
    async fn intercept(
        &self,
        parts: &Parts,
        inbound: InboundBody,
        telemetry_body: Option<Bytes>,
        peer: Option<IpAddr>,
    ) -> Result<Response<ProxyBody>> {
        let response = self.forward(parts, inbound.into_body(), peer).await?;
        let path = parts.uri.path().to_lowercase();
        let routing = &self.inner.routing;

        if is_html(response.headers()) {
            return Ok(match self.inner.sdk.fetch_script().await {
                Some(script) => {
                    debug!("injecting SDK script");
                    inject::inject_response(response, &script)
                }
                None => response,
            });
        }

        let Some(body) = telemetry_body else {
            return Ok(response);
        };

        if routing.async_keywords.matches(&path) && response.status().is_success() {
            let record = telemetry::build(parts, &body, peer, routing, &path);
            info!(kind = record.kind(), "async: fire-and-forget decision");
            debug!(telemetry = ?record, "telemetry record");
            self.inner
                .decisions
                .decide(&record, DecisionMode::FireAndForget)
                .await;
        } else if routing.sync_keywords.matches(&path) {
            let record = telemetry::build(parts, &body, peer, routing, &path);
            info!(kind = record.kind(), "sync: wait-and-decide decision");
            debug!(telemetry = ?record, "telemetry record");
            let decision = self
                .inner
                .decisions
                .decide(
                    &record,
                    DecisionMode::WaitAndDecide {
                        timeout: self.inner.decision_timeout,
                    },
                )
                .await;

            if decision.is_blocked() {
                info!(score = decision.score, "blocked");
                return Ok(block_response(decision.score));
            }
            info!(score = decision.score, "allowed");
        }

        Ok(response)
    }

    /// Read the body of a capturing method up to `max_capture_bytes`,
    /// whatever its size hint claims. Bodies of other methods are streamed
    /// unless they are known to be empty.
    async fn capture<B>(&self, method: &Method, body: B) -> Result<InboundBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        if body.size_hint().exact() == Some(0) {
            return Ok(InboundBody::Buffered(Bytes::new()));
        }
        if !carries_body(method) {
            return Ok(InboundBody::Streaming(proxy_body::boxed(body)));
        }

        let limit = self.inner.max_capture_bytes;
        let mut body = Box::pin(body);
        let mut captured = BytesMut::new();

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|err| {
                let err: BoxError = err.into();
                ProxyError::ClientBody(err.to_string())
            })?;
            // Trailers on a captured request body are not forwarded.
            let Ok(data) = frame.into_data() else {
                continue;
            };
            captured.extend_from_slice(&data);

            if captured.len() > limit {
                debug!(limit, "request body over capture limit, forwarding the rest unread");
                let captured = captured.freeze();
                let prefix = captured.slice(..limit);
                return Ok(InboundBody::Truncated {
                    prefix,
                    body: chain_remaining(captured, body),
                });
            }
        }

        Ok(InboundBody::Buffered(captured.freeze()))
    }

    async fn forward(
        &self,
        parts: &Parts,
        body: ProxyBody,
        peer: Option<IpAddr>,
    ) -> Result<Response<ProxyBody>> {
        let request = self.origin_request(parts, body, peer)?;
        let response = self.inner.origin.request(request).await?;
        Ok(origin_response(response))
    }

    /// Step 6: send the original request once more without interception.
    async fn passthrough(
        &self,
        parts: &Parts,
        replay: Option<ProxyBody>,
        peer: Option<IpAddr>,
    ) -> Response<ProxyBody> {
        let Some(body) = replay else {
            warn!(error = %ProxyError::NotReplayable, "direct fetch impossible");
            return status_response(StatusCode::BAD_GATEWAY);
        };

        match self.forward(parts, body, peer).await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "direct fetch failed");
                status_response(StatusCode::BAD_GATEWAY)
            }
        }
    }

    fn origin_request(
        &self,
        parts: &Parts,
        body: ProxyBody,
        peer: Option<IpAddr>,
    ) -> Result<Request<ProxyBody>> {
        let mut request = Request::new(body);
        *request.method_mut() = parts.method.clone();
        *request.uri_mut() = upstream_uri(&self.inner.upstream, &parts.uri)?;

        let headers = request.headers_mut();
        *headers = parts.headers.clone();
        strip_hop_by_hop(headers);
        headers.remove(HOST);
        if let Some(ip) = peer {
            append_forwarded_for(headers, ip);
        }

        Ok(request)
    }
}

/// Origin connector: HTTPS with native roots, or plain HTTP when no roots
/// can be loaded.
fn origin_connector() -> HttpsConnector<HttpConnector> {
    let builder = match HttpsConnectorBuilder::new().with_native_roots() {
        Ok(builder) => builder,
        Err(err) => {
            warn!(error = %err, "no native root certificates, HTTPS origins unavailable");
            let tls = rustls::ClientConfig::builder()
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth();
            HttpsConnectorBuilder::new().with_tls_config(tls)
        }
    };
    builder.https_or_http().enable_http1().build()
}

/// Already-read bytes followed by whatever is left of `rest`.
fn chain_remaining<B>(head: Bytes, rest: Pin<Box<B>>) -> ProxyBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let head = stream::once(async move { Ok::<_, BoxError>(Frame::data(head)) });
    let rest = TryStreamExt::map_err(BodyStream::new(rest), |err| -> BoxError { err.into() });
    proxy_body::boxed(StreamBody::new(head.chain(rest)))
}

/// Methods whose body is captured for telemetry.
pub fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn upstream_uri(upstream: &Url, uri: &Uri) -> Result<Uri> {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let base = upstream.as_str().trim_end_matches('/');
    Ok(format!("{base}{path_and_query}").parse::<Uri>()?)
}

fn origin_response(response: Response<Incoming>) -> Response<ProxyBody> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, proxy_body::boxed(body))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {ip}"),
        None => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR.clone(), value);
    }
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
}

/// The 403 emitted on a BLOCK decision.
pub fn block_response(score: f64) -> Response<ProxyBody> {
    let body = BlockBody {
        error: "Blocked",
        score: score_value(score),
    };
    let json = serde_json::to_vec(&body).unwrap_or_default();

    let mut response = Response::new(proxy_body::full(json));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Integral scores serialize without a fractional part.
fn score_value(score: f64) -> serde_json::Value {
    if score.fract() == 0.0 && score.abs() < i64::MAX as f64 {
        serde_json::Value::from(score as i64)
    } else {
        serde_json::Value::from(score)
    }
}

fn status_response(status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(proxy_body::empty());
    *response.status_mut() = status;
    response
}
