//! Streaming SDK injection into HTML responses.
//!
//! The script tag is inserted right before the first `</head>` end tag as
//! chunks flow through. At most the last few bytes of the stream are held
//! back between chunks (enough to recognise an end tag split across chunk
//! boundaries), so the body is never buffered as a whole. Each response
//! gets its own [`HeadInjector`]; there is no shared state between requests.

use crate::proxy_body::{BoxError, ProxyBody};
use bytes::{Bytes, BytesMut};
use http::Response;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use http_body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tracing::debug;

const END_TAG: &[u8] = b"</head";
const COMMENT_OPEN: &[u8] = b"<!--";
const COMMENT_CLOSE: &[u8] = b"-->";

/// Incremental byte-level injector.
///
/// End tags inside `<!-- ... -->` comments are ignored. The scan is not a
/// tokenizer: a `</head>` spelled out inside an inline `<script>` string
/// before the real end tag still wins.
#[derive(Debug)]
pub struct HeadInjector {
    script: Bytes,
    carry: BytesMut,
    in_comment: bool,
    injected: bool,
}

impl HeadInjector {
    /// Create an injector that inserts `<script>{payload}</script>`.
    pub fn new(payload: &str) -> Self {
        Self {
            script: Bytes::from(format!("<script>{payload}</script>")),
            carry: BytesMut::new(),
            in_comment: false,
            injected: false,
        }
    }

    /// Feed one chunk; returns the bytes that can be emitted now.
    pub fn push(&mut self, chunk: Bytes) -> Bytes {
        if self.injected {
            return chunk;
        }

        self.carry.extend_from_slice(&chunk);
        let buf = &self.carry[..];

        // `i` ends at the first byte that could still start a token; the
        // comment state always describes position `i`.
        let mut i = 0;
        while i < buf.len() {
            let rest = &buf[i..];
            if self.in_comment {
                if rest.starts_with(COMMENT_CLOSE) {
                    self.in_comment = false;
                    i += COMMENT_CLOSE.len();
                } else if is_partial(rest, COMMENT_CLOSE) {
                    break;
                } else {
                    i += 1;
                }
                continue;
            }

            if rest.starts_with(COMMENT_OPEN) {
                self.in_comment = true;
                i += COMMENT_OPEN.len();
                continue;
            }
            if starts_with_ignore_case(rest, END_TAG) {
                match rest.get(END_TAG.len()) {
                    // Delimiter not seen yet; hold from here.
                    None => break,
                    Some(b) if is_tag_delimiter(*b) => return self.splice(i),
                    Some(_) => {}
                }
            } else if is_partial(rest, COMMENT_OPEN) || is_partial(rest, END_TAG) {
                break;
            }
            i += 1;
        }

        self.carry.split_to(i).freeze()
    }

    /// Flush whatever is still held back at end of stream.
    pub fn finish(&mut self) -> Bytes {
        self.carry.split().freeze()
    }

    /// Returns `true` once the script has been emitted.
    pub fn injected(&self) -> bool {
        self.injected
    }

    /// Bytes currently held back.
    pub fn held(&self) -> usize {
        self.carry.len()
    }

    fn splice(&mut self, at: usize) -> Bytes {
        let buf = self.carry.split();
        let mut out = BytesMut::with_capacity(buf.len() + self.script.len());
        out.extend_from_slice(&buf[..at]);
        out.extend_from_slice(&self.script);
        out.extend_from_slice(&buf[at..]);
        self.injected = true;
        out.freeze()
    }
}

fn is_tag_delimiter(b: u8) -> bool {
    b == b'>' || b == b'/' || b.is_ascii_whitespace()
}

fn starts_with_ignore_case(buf: &[u8], token: &[u8]) -> bool {
    buf.len() >= token.len() && buf[..token.len()].eq_ignore_ascii_case(token)
}

/// `buf` is a proper prefix of `token`: the token may complete in the next chunk.
fn is_partial(buf: &[u8], token: &[u8]) -> bool {
    buf.len() < token.len() && token[..buf.len()].eq_ignore_ascii_case(buf)
}

/// Body adapter running a [`HeadInjector`] over an inner body.
pub struct InjectHead<B> {
    inner: B,
    injector: HeadInjector,
    pending_trailers: Option<Frame<Bytes>>,
    done: bool,
}

impl<B> InjectHead<B> {
    pub fn new(inner: B, payload: &str) -> Self {
        Self {
            inner,
            injector: HeadInjector::new(payload),
            pending_trailers: None,
            done: false,
        }
    }
}

impl<B> Body for InjectHead<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        if let Some(trailers) = this.pending_trailers.take() {
            return Poll::Ready(Some(Ok(trailers)));
        }

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => {
                        let out = this.injector.push(data);
                        if !out.is_empty() {
                            return Poll::Ready(Some(Ok(Frame::data(out))));
                        }
                    }
                    Err(trailers) => {
                        let tail = this.injector.finish();
                        if tail.is_empty() {
                            return Poll::Ready(Some(Ok(trailers)));
                        }
                        this.pending_trailers = Some(trailers);
                        return Poll::Ready(Some(Ok(Frame::data(tail))));
                    }
                },
                Some(Err(err)) => return Poll::Ready(Some(Err(err.into()))),
                None => {
                    this.done = true;
                    let tail = this.injector.finish();
                    if !tail.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(tail))));
                    }
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done && self.pending_trailers.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

/// Wrap an HTML response so `payload` is injected into its `<head>`.
///
/// Encoded (compressed) bodies are returned unchanged.
pub fn inject_response(response: Response<ProxyBody>, payload: &str) -> Response<ProxyBody> {
    let encoded = response
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().eq_ignore_ascii_case("identity"));
    if encoded {
        debug!("skipping SDK injection for encoded response");
        return response;
    }

    let (mut parts, body) = response.into_parts();
    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, crate::proxy_body::boxed(InjectHead::new(body, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;
    use futures::StreamExt;
    use http_body_util::{BodyExt, StreamBody};
    use std::convert::Infallible;

    const SCRIPT: &str = "<script>sdk()</script>";

    fn run(chunks: &[&str]) -> (String, HeadInjector) {
        let mut injector = HeadInjector::new("sdk()");
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(&injector.push(Bytes::copy_from_slice(chunk.as_bytes())));
            assert!(injector.held() <= END_TAG.len());
        }
        out.extend_from_slice(&injector.finish());
        (String::from_utf8(out).unwrap(), injector)
    }

    #[test]
    fn test_injects_before_head_end_tag() {
        let (out, injector) = run(&["<html><head><title>t</title></head><body>x</body></html>"]);
        assert_eq!(
            out,
            format!("<html><head><title>t</title>{SCRIPT}</head><body>x</body></html>")
        );
        assert!(injector.injected());
    }

    #[test]
    fn test_end_tag_split_across_chunks() {
        let (out, _) = run(&["<head><meta>", "</he", "ad", "><body>ok</body>"]);
        assert_eq!(out, format!("<head><meta>{SCRIPT}</head><body>ok</body>"));
    }

    #[test]
    fn test_case_insensitive_and_whitespace_delimited() {
        let (out, _) = run(&["<HEAD></HEAD >"]);
        assert_eq!(out, format!("<HEAD>{SCRIPT}</HEAD >"));
    }

    #[test]
    fn test_header_element_is_not_head() {
        let (out, injector) = run(&["<body><header>a</header></body>"]);
        assert_eq!(out, "<body><header>a</header></body>");
        assert!(!injector.injected());
    }

    #[test]
    fn test_only_first_head_is_used() {
        let (out, _) = run(&["</head>", "</head>"]);
        assert_eq!(out, format!("{SCRIPT}</head></head>"));
    }

    #[test]
    fn test_end_tag_inside_comment_is_skipped() {
        let (out, _) = run(&["<head><!-- old </head> -->", "<meta></head>"]);
        assert_eq!(out, format!("<head><!-- old </head> --><meta>{SCRIPT}</head>"));
    }

    #[test]
    fn test_comment_markers_split_across_chunks() {
        let (out, _) = run(&["<head><!", "-- </hea", "d> -", "-><title>t</title></he", "ad>"]);
        assert_eq!(
            out,
            format!("<head><!-- </head> --><title>t</title>{SCRIPT}</head>")
        );
    }

    #[test]
    fn test_unterminated_comment_never_injects() {
        let (out, injector) = run(&["<head><!-- </head>", "<body></body>"]);
        assert_eq!(out, "<head><!-- </head><body></body>");
        assert!(!injector.injected());
    }

    #[test]
    fn test_document_without_head_passes_through() {
        let (out, _) = run(&["plain", " text", "</he"]);
        assert_eq!(out, "plain text</he");
    }

    #[tokio::test]
    async fn test_injects_without_waiting_for_end_of_stream() {
        let (mut tx, rx) = futures::channel::mpsc::channel::<Bytes>(4);
        let stream = rx.map(|chunk| Ok::<_, Infallible>(Frame::data(chunk)));
        let mut body = InjectHead::new(StreamBody::new(stream), "sdk()");

        tx.send(Bytes::from_static(b"<html><head></head><body>"))
            .await
            .unwrap();

        // The sender is still open: the first frame must already carry the script.
        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let first = String::from_utf8(first.to_vec()).unwrap();
        assert!(first.contains(SCRIPT));

        tx.send(Bytes::from_static(b"rest</body></html>")).await.unwrap();
        drop(tx);

        let rest = body.collect().await.unwrap().to_bytes();
        assert_eq!(rest, Bytes::from_static(b"rest</body></html>"));
    }

    #[tokio::test]
    async fn test_inject_response_drops_content_length() {
        let response = Response::builder()
            .header(CONTENT_LENGTH, "20")
            .header("content-type", "text/html")
            .body(crate::proxy_body::full("<head></head>hello"))
            .unwrap();

        let injected = inject_response(response, "sdk()");
        assert!(injected.headers().get(CONTENT_LENGTH).is_none());
        let body = injected.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from(format!("<head>{SCRIPT}</head>hello")));
    }

    #[tokio::test]
    async fn test_encoded_response_untouched() {
        let response = Response::builder()
            .header(CONTENT_ENCODING, "gzip")
            .body(crate::proxy_body::full("<head></head>"))
            .unwrap();

        let out = inject_response(response, "sdk()");
        let body = out.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"<head></head>"));
    }
}
