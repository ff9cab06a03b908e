//! Per-request context and the middleware chain.
//!
//! A [`Context`] is created once per request and shared by every middleware
//! and the handler. Cloning it is cheap: all clones point at the same
//! request, so a handler may move a clone into a spawned task and finish the
//! response from there.
//!
//! # The chain
//!
//! ```text
//!  next() ─▶ global[0] ─▶ … ─▶ global[n] ─▶ route[0] ─▶ … ─▶ handler ─▶ not found
//!             each step runs only if the previous one called next()
//! ```
//!
//! Every `next()` advances one cursor. Once the response is closed, `next()`
//! does nothing. The handler runs at most once per resolved route; a further
//! `next()` with the response still open is answered as not found.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{Extensions, HeaderMap, Method, StatusCode, Uri};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::accept::Accepts;
use crate::bounded::BoundedValue;
use crate::dispatcher::{Dispatcher, MissKind};
use crate::error::Error;
use crate::extract::{self, BasicAuth};
use crate::handler::{self, BoxFuture};
use crate::middleware::BoxedMiddleware;
use crate::payload::{IntoPayload, Payload};
use crate::pipeline;
use crate::request::{Body, Request};
use crate::response::{ContentType, Outbound, Response};
use crate::route::Route;
use crate::table::{Resolution, RouteMatch};

/// The request being handled, its response, and everything derived from it.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    dispatcher: Dispatcher,
    method: Method,
    headers: HeaderMap,
    upgrade_head: Option<Bytes>,
    target: Mutex<Target>,
    chain: Mutex<Chain>,
    body: Mutex<Option<Body>>,
    outbound: Mutex<Outbound>,
    extensions: Mutex<Extensions>,

    body_limit: OnceLock<AtomicU64>,
    buffer: BoundedValue<Option<Bytes>>,
    text: BoundedValue<Option<String>>,
    parsed: BoundedValue<Option<Value>>,
    cookies: OnceLock<HashMap<String, String>>,
    basic_auth: OnceLock<BasicAuth>,
    accepts: OnceLock<Accepts>,
}

/// What the request currently points at. Rewritten by forwards.
struct Target {
    route: Arc<Route>,
    params: HashMap<String, String>,
    uri: Uri,
    history: Vec<Uri>,
}

struct Chain {
    global: Vec<BoxedMiddleware>,
    route: Vec<BoxedMiddleware>,
    cursor: usize,
    handler_invoked: bool,
    forwards: usize,
}

enum Step {
    Middleware(BoxedMiddleware),
    Handler,
    Exhausted,
}

impl Chain {
    fn advance(&mut self) -> Step {
        let index = self.cursor;
        self.cursor += 1;

        if let Some(mw) = self.global.get(index) {
            return Step::Middleware(Arc::clone(mw));
        }
        if let Some(mw) = self.route.get(index - self.global.len()) {
            return Step::Middleware(Arc::clone(mw));
        }
        if !self.handler_invoked {
            self.handler_invoked = true;
            return Step::Handler;
        }
        Step::Exhausted
    }
}

impl Context {
    pub(crate) fn new(
        dispatcher: Dispatcher,
        request: Request,
        outbound: Outbound,
        matched: RouteMatch,
        upgrade_head: Option<Bytes>,
    ) -> Self {
        let chain = Chain {
            global: dispatcher.global_middleware(),
            route: matched.route.middleware(),
            cursor: 0,
            handler_invoked: false,
            forwards: 0,
        };
        let target = Target {
            route: matched.route,
            params: matched.params,
            uri: request.uri,
            history: Vec::new(),
        };

        Self {
            inner: Arc::new(Inner {
                dispatcher,
                method: request.method,
                headers: request.headers,
                upgrade_head,
                target: Mutex::new(target),
                chain: Mutex::new(chain),
                body: Mutex::new(Some(request.body)),
                outbound: Mutex::new(outbound),
                extensions: Mutex::new(Extensions::new()),
                body_limit: OnceLock::new(),
                buffer: BoundedValue::new(),
                text: BoundedValue::new(),
                parsed: BoundedValue::new(),
                cookies: OnceLock::new(),
                basic_auth: OnceLock::new(),
                accepts: OnceLock::new(),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher { &self.inner.dispatcher }

    // ── Request ──────────────────────────────────────────────────────────────

    /// The original method. Forwards never change it.
    pub fn method(&self) -> &Method { &self.inner.method }

    /// The current URI; after a forward, the forward target.
    pub fn uri(&self) -> Uri {
        self.inner.target.lock().uri.clone()
    }

    pub fn path(&self) -> String {
        self.inner.target.lock().uri.path().to_owned()
    }

    /// URIs this request was forwarded away from, oldest first.
    pub fn forward_history(&self) -> Vec<Uri> {
        self.inner.target.lock().history.clone()
    }

    pub fn route(&self) -> Arc<Route> {
        Arc::clone(&self.inner.target.lock().route)
    }

    pub fn param(&self, name: &str) -> Option<String> {
        self.inner.target.lock().params.get(name).cloned()
    }

    pub fn params(&self) -> HashMap<String, String> {
        self.inner.target.lock().params.clone()
    }

    /// First value of a query-string parameter, percent-decoded.
    pub fn query(&self, name: &str) -> Option<String> {
        let uri = self.uri();
        url::form_urlencoded::parse(uri.query()?.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn request_headers(&self) -> &HeaderMap { &self.inner.headers }

    /// Case-insensitive request header lookup. Non-UTF-8 values read as absent.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `true` for requests dispatched with a socket instead of a response.
    pub fn is_upgrade(&self) -> bool {
        matches!(*self.inner.outbound.lock(), Outbound::Socket { .. })
    }

    /// Bytes the transport read past the upgrade request's head.
    pub fn upgrade_head(&self) -> Option<&Bytes> {
        self.inner.upgrade_head.as_ref()
    }

    // ── Chain ────────────────────────────────────────────────────────────────

    /// Runs the next middleware, or the handler once the middleware is
    /// exhausted. A no-op once the response is closed. A panicking step is
    /// answered with 500.
    pub fn next(&self) -> BoxFuture<()> {
        let ctx = self.clone();
        Box::pin(async move {
            if ctx.is_closed() {
                return;
            }
            let step = ctx.inner.chain.lock().advance();
            match step {
                Step::Middleware(mw) => {
                    handler::guarded(&ctx, "middleware", || mw.call(ctx.clone())).await;
                }
                Step::Handler => {
                    let route = ctx.route();
                    let dispatcher = &ctx.inner.dispatcher;
                    handler::guarded(&ctx, "route invoker", || dispatcher.invoke(ctx.clone(), route))
                        .await;
                }
                Step::Exhausted => {
                    debug!(path = %ctx.path(), "chain continued past the handler");
                    ctx.not_found();
                }
            }
        })
    }

    /// Re-dispatches this request to `path` with its original method.
    ///
    /// The current URI is pushed onto the forward history. On a match the
    /// new route's middleware and handler run; global middleware that
    /// already ran is not repeated. A miss is answered like any other.
    pub async fn forward_to(&self, path: &str) {
        if self.is_closed() {
            warn!(to = path, "forward on a closed response");
            return;
        }

        let max = self.inner.dispatcher.config().max_forwards;
        let depth = {
            let mut chain = self.inner.chain.lock();
            chain.forwards += 1;
            chain.forwards
        };
        if depth > max {
            warn!(to = path, max, "forward limit exceeded");
            self.error_status(StatusCode::LOOP_DETECTED, Error::ForwardLimit(max));
            return;
        }

        let uri = match path.parse::<Uri>() {
            Ok(uri) => uri,
            Err(e) => {
                self.error(Payload::failure(format!("invalid forward target {path}: {e}")));
                return;
            }
        };

        let from = {
            let mut target = self.inner.target.lock();
            let from = std::mem::replace(&mut target.uri, uri.clone());
            target.history.push(from.clone());
            from
        };
        debug!(%from, to = %uri, depth, "forwarding request");

        match self.inner.dispatcher.resolve(&self.inner.method, uri.path()) {
            Resolution::Matched(matched) => {
                {
                    let mut chain = self.inner.chain.lock();
                    chain.route = matched.route.middleware();
                    chain.handler_invoked = false;
                    chain.cursor = chain.cursor.min(chain.global.len());
                }
                {
                    let mut target = self.inner.target.lock();
                    target.route = matched.route;
                    target.params = matched.params;
                }
                self.next().await
            }
            Resolution::MethodNotAllowed { allow } => {
                self.answer_miss(MissKind::MethodNotAllowed { allow })
            }
            Resolution::NotFound => self.answer_miss(MissKind::NotFound),
        }
    }

    /// Answers the request through the dispatcher's not-found writer.
    pub fn not_found(&self) {
        self.answer_miss(MissKind::NotFound);
    }

    fn answer_miss(&self, kind: MissKind) {
        let uri = self.uri();
        let mut outbound = self.inner.outbound.lock();
        if outbound.is_closed() {
            return;
        }
        self.inner
            .dispatcher
            .answer_miss(kind, &self.inner.method, &uri, &self.inner.headers, &mut outbound);
    }

    // ── Response ─────────────────────────────────────────────────────────────

    /// `true` once the response was finalized or the socket closed.
    pub fn is_closed(&self) -> bool {
        self.inner.outbound.lock().is_closed()
    }

    /// Runs the send pipeline.
    pub fn send(&self, payload: impl IntoPayload) {
        pipeline::send(self, &payload.into_payload());
    }

    pub fn send_status(&self, status: StatusCode, payload: impl IntoPayload) {
        self.set_status(status);
        self.send(payload);
    }

    /// Runs the error pipeline.
    pub fn error(&self, payload: impl IntoPayload) {
        pipeline::error(self, &payload.into_payload());
    }

    pub fn error_status(&self, status: StatusCode, payload: impl IntoPayload) {
        self.set_status(status);
        self.error(payload);
    }

    /// Runs `f` against the response. `None` for upgrade requests.
    ///
    /// The response is locked while `f` runs; `f` must not call back into
    /// this context.
    pub fn with_response<R>(&self, f: impl FnOnce(&mut Response) -> R) -> Option<R> {
        self.inner.outbound.lock().response_mut().map(f)
    }

    pub fn set_status(&self, status: StatusCode) {
        self.with_response(|res| res.set_status(status));
    }

    /// No-op for upgrade requests.
    pub fn set_response_header(&self, name: &str, value: &str) -> Result<(), Error> {
        self.with_response(|res| res.set_header(name, value)).unwrap_or(Ok(()))
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        self.with_response(|res| res.header(name).map(str::to_owned)).flatten()
    }

    /// Closes the upgrade socket. No-op for regular requests.
    pub fn close_socket(&self) {
        self.inner.outbound.lock().close_socket();
    }

    // ── Derived values ───────────────────────────────────────────────────────

    pub fn cookies(&self) -> &HashMap<String, String> {
        self.inner
            .cookies
            .get_or_init(|| extract::parse_cookies(self.request_header("cookie").unwrap_or_default()))
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies().get(name).map(String::as_str)
    }

    pub fn basic_auth(&self) -> &BasicAuth {
        self.inner.basic_auth.get_or_init(|| {
            extract::parse_basic_auth(self.request_header("authorization").unwrap_or_default())
        })
    }

    /// `Accept` descriptors in header order. Empty when the header is absent.
    pub fn accepts(&self) -> &Accepts {
        self.inner.accepts.get_or_init(|| {
            let values: Vec<&str> = self
                .inner
                .headers
                .get_all(http::header::ACCEPT)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect();
            Accepts::parse(&values.join(","))
        })
    }

    /// The content type to answer with, chosen from `candidates`.
    ///
    /// With no candidates, the client's first descriptor, normalized to its
    /// lowercase `type/subtype` key without parameters. The descriptor as
    /// written is `accepts().preferred(&[])`. `None` when the client sent no
    /// `Accept` header or accepts none of the candidates.
    pub fn preferred_content_type(&self, candidates: &[&str]) -> Option<String> {
        self.accepts()
            .preferred(candidates)
            .map(|preference| preference.mime_type().to_owned())
    }

    /// The raw body, read once and shared by every caller.
    ///
    /// `limit` caps the body in bytes; `None` falls back to the configured
    /// default. A larger limit passed while the body is still streaming
    /// widens the cap; a smaller one is ignored. Exceeding it answers the
    /// request with 413 and fails every caller with
    /// [`Error::LimitExceeded`].
    pub async fn body_buffer(&self, limit: Option<u64>) -> Result<Option<Bytes>, Error> {
        self.widen_body_limit(limit);
        let ctx = self.clone();
        self.inner.buffer.get_or_load(move || read_body(ctx)).await
    }

    /// The body decoded as UTF-8. Invalid sequences are replaced; an empty
    /// body is `None`.
    pub async fn body_text(&self, limit: Option<u64>) -> Result<Option<String>, Error> {
        self.widen_body_limit(limit);
        let ctx = self.clone();
        self.inner
            .text
            .get_or_load(move || async move {
                let buffer = ctx.body_buffer(limit).await?;
                Ok::<_, Error>(buffer.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
            })
            .await
    }

    /// The body parsed according to the request's `Content-Type`
    /// (`application/json` when absent).
    pub async fn parsed_body(&self, limit: Option<u64>) -> Result<Option<Value>, Error> {
        self.widen_body_limit(limit);
        let ctx = self.clone();
        self.inner
            .parsed
            .get_or_load(move || async move {
                match ctx.body_text(limit).await? {
                    Some(text) => extract::parse_body(ctx.request_header("content-type"), &text),
                    None => Ok(None),
                }
            })
            .await
    }

    fn widen_body_limit(&self, requested: Option<u64>) {
        let limit = self.inner.body_limit.get_or_init(|| {
            let fallback = self.inner.dispatcher.config().body_limit;
            AtomicU64::new(requested.or(fallback).unwrap_or(u64::MAX))
        });
        if let Some(requested) = requested {
            limit.fetch_max(requested, Ordering::SeqCst);
        }
    }

    fn body_limit(&self) -> u64 {
        self.inner
            .body_limit
            .get()
            .map_or(u64::MAX, |limit| limit.load(Ordering::SeqCst))
    }

    /// Answers 413 directly; the body can no longer be read for anything else.
    fn reject_oversized(&self, limit: u64) {
        let mut outbound = self.inner.outbound.lock();
        if outbound.is_closed() {
            return;
        }
        let Some(res) = outbound.response_mut() else {
            outbound.close_socket();
            return;
        };
        res.set_status(StatusCode::PAYLOAD_TOO_LARGE);
        let written = res
            .set_header("content-type", ContentType::Text.as_str())
            .and_then(|()| res.end(Some(format!("Limit of {limit} bytes exceeded").as_bytes())));
        if let Err(e) = written {
            warn!(error = %e, "could not write the 413 response");
        }
    }

    // ── Extensions ───────────────────────────────────────────────────────────

    /// Stores a typed per-request value, returning the previous one.
    pub fn insert_extension<T>(&self, value: T) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.inner.extensions.lock().insert(value)
    }

    pub fn extension<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.inner.extensions.lock().get::<T>().cloned()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self.inner.target.lock();
        f.debug_struct("Context")
            .field("method", &self.inner.method)
            .field("uri", &target.uri)
            .field("route", &target.route.path())
            .field("forwards", &target.history.len())
            .finish_non_exhaustive()
    }
}

/// Drains the request body into one buffer, enforcing the context's limit
/// chunk by chunk.
async fn read_body(ctx: Context) -> Result<Option<Bytes>, Error> {
    let Some(mut body) = ctx.inner.body.lock().take() else {
        return Ok(None);
    };

    let mut chunks = Vec::new();
    let mut received = 0u64;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| Error::Body(e.to_string()))?;
        let Ok(chunk) = frame.into_data() else {
            continue;
        };
        if chunk.is_empty() {
            continue;
        }
        received += chunk.len() as u64;

        let limit = ctx.body_limit();
        if received > limit {
            warn!(received, limit, path = %ctx.path(), "request body over limit");
            ctx.reject_oversized(limit);
            return Err(Error::LimitExceeded { received, limit });
        }
        chunks.push(chunk);
    }

    Ok(match chunks.len() {
        0 => None,
        1 => chunks.pop(),
        _ => {
            let mut buffer = BytesMut::with_capacity(received as usize);
            for chunk in &chunks {
                buffer.extend_from_slice(chunk);
            }
            Some(buffer.freeze())
        }
    })
}
