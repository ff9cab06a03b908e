//! The dispatcher: route registration, resolution and request entry points.
//!
//! ```text
//! transport ─▶ Dispatcher::handle ─▶ resolve ─┬─▶ Context::next ─▶ middleware … handler ─▶ pipeline
//!                                             └─▶ miss writer (404 / 405 / socket close)
//! ```
//!
//! A dispatcher owns every registry: routes, global middleware, serializers,
//! observers. Nothing is process-wide, so tests build as many as they like.
//! Clones share the same registries.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::config::Config;
use crate::context::Context;
use crate::error::Error;
use crate::event::{Event, Extension, Observer};
use crate::handler::{self, BoxFuture, Handler, RouteInvoker};
use crate::middleware::{self, BoxedMiddleware, Middleware};
use crate::payload::Payload;
use crate::pipeline::Serializer;
use crate::request::Request;
use crate::response::{ContentType, Outbound, Response, Socket};
use crate::route::{Route, RouteConfig};
use crate::table::{MethodKey, Resolution, RouteTable};

/// Why a request has no route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MissKind {
    NotFound,
    /// Routes exist at the path under other methods, listed in `allow`.
    MethodNotAllowed { allow: Vec<String> },
}

/// Everything a miss writer gets to answer an unroutable request.
pub struct Miss<'a> {
    pub kind: MissKind,
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub outbound: &'a mut Outbound,
}

type MissHandler = Arc<dyn Fn(&mut Miss<'_>) + Send + Sync>;

#[derive(Default)]
struct Shared {
    config: Config,
    table: RwLock<RouteTable>,
    before: RwLock<Vec<BoxedMiddleware>>,
    serializers: RwLock<Vec<Serializer>>,
    error_serializers: RwLock<Vec<Serializer>>,
    observers: RwLock<Vec<Observer>>,
    miss: RwLock<Option<MissHandler>>,
    invoker: RwLock<Option<RouteInvoker>>,
}

/// Resolves requests to routes and drives them through middleware, handler
/// and response pipeline.
///
/// ```rust,ignore
/// let app = Dispatcher::new()
///     .before(middleware::trace())
///     .get("/cars/:id", get_car)
///     .post("/cars", create_car);
/// ```
#[derive(Clone, Default)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self { shared: Arc::new(Shared { config, ..Shared::default() }) }
    }

    pub fn config(&self) -> &Config { &self.shared.config }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Registers a route and raises [`Event::RouteAdded`] once, listing the
    /// method keys it went under.
    pub fn add_route(&self, config: RouteConfig) -> Result<Arc<Route>, Error> {
        let route = Arc::new(Route::from_config(config));
        let keys = self.shared.table.write().add(Arc::clone(&route))?;
        debug!(path = %route.path(), methods = ?route.methods(), "route added");

        self.emit(&Event::RouteAdded { methods: &keys, route: &route });
        Ok(route)
    }

    /// Builder form of [`add_route`](Self::add_route).
    ///
    /// # Panics
    ///
    /// Panics if the pattern is invalid or conflicts with a registered one.
    pub fn route(self, config: RouteConfig) -> Self {
        if let Err(e) = self.add_route(config) {
            panic!("{e}");
        }
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.route(RouteConfig::new(path, handler).method(Method::GET))
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.route(RouteConfig::new(path, handler).method(Method::POST))
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.route(RouteConfig::new(path, handler).method(Method::PUT))
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.route(RouteConfig::new(path, handler).method(Method::PATCH))
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.route(RouteConfig::new(path, handler).method(Method::DELETE))
    }

    /// A route for every method without an exact-method route at `path`.
    pub fn any(self, path: &str, handler: impl Handler) -> Self {
        self.route(RouteConfig::new(path, handler))
    }

    /// Builder form of [`add_before`](Self::add_before).
    pub fn before(self, middleware: impl Middleware) -> Self {
        self.add_before(middleware);
        self
    }

    /// Adds global middleware. It runs for every routed request, ahead of the
    /// route's own middleware, in registration order.
    pub fn add_before(&self, middleware: impl Middleware) {
        self.shared.before.write().push(middleware::boxed(middleware));
    }

    /// Adds a serializer to the send chain.
    pub fn add_serializer<F>(&self, serializer: F)
    where
        F: Fn(&Context, &Payload) + Send + Sync + 'static,
    {
        self.shared.serializers.write().push(Arc::new(serializer));
    }

    /// Adds a serializer to the error chain.
    pub fn add_error_serializer<F>(&self, serializer: F)
    where
        F: Fn(&Context, &Payload) + Send + Sync + 'static,
    {
        self.shared.error_serializers.write().push(Arc::new(serializer));
    }

    pub fn on_event<F>(&self, observer: F)
    where
        F: Fn(&Event<'_>) + Send + Sync + 'static,
    {
        self.shared.observers.write().push(Arc::new(observer));
    }

    /// Runs the extension's `init` against this dispatcher.
    pub fn extension(&self, extension: impl Extension) {
        extension.init(self);
    }

    /// Replaces the default 404 / 405 writer. [`default_miss`] is still
    /// available to delegate to.
    pub fn on_miss<F>(&self, handler: F)
    where
        F: Fn(&mut Miss<'_>) + Send + Sync + 'static,
    {
        *self.shared.miss.write() = Some(Arc::new(handler));
    }

    /// Replaces the step that calls a route's handler and dispatches its
    /// reply. [`invoke_route`](crate::invoke_route) is the default.
    pub fn set_route_invoker<F>(&self, invoker: F)
    where
        F: Fn(Context, Arc<Route>) -> BoxFuture<()> + Send + Sync + 'static,
    {
        *self.shared.invoker.write() = Some(Arc::new(invoker));
    }

    // ── Route table ──────────────────────────────────────────────────────────

    pub fn resolve(&self, method: &Method, path: &str) -> Resolution {
        self.shared.table.read().resolve(method, path)
    }

    pub fn routes(&self, key: &MethodKey) -> Vec<Arc<Route>> {
        self.shared.table.read().routes(key)
    }

    pub fn reset(&self, key: &MethodKey) {
        self.shared.table.write().reset(key);
    }

    // ── Dispatch ─────────────────────────────────────────────────────────────

    /// Dispatches `request`, answering through `response`.
    ///
    /// Returns the context once the chain has run, or `None` when the
    /// request had no route. The response may still be open: a handler can
    /// hand a clone of the context to another task and finish it later.
    pub async fn handle(&self, request: Request, response: Response) -> Option<Context> {
        self.dispatch(request, Outbound::Response(response), None).await
    }

    /// Dispatches an upgrade request. Misses close `socket`.
    pub async fn handle_upgrade(
        &self,
        request: Request,
        socket: Box<dyn Socket>,
        head: Bytes,
    ) -> Option<Context> {
        self.dispatch(request, Outbound::socket(socket), Some(head)).await
    }

    async fn dispatch(
        &self,
        request: Request,
        mut outbound: Outbound,
        head: Option<Bytes>,
    ) -> Option<Context> {
        let kind = match self.resolve(request.method(), request.path()) {
            Resolution::Matched(matched) => {
                let ctx = Context::new(self.clone(), request, outbound, matched, head);
                self.emit(&Event::BeforeHandle(&ctx));
                ctx.next().await;
                return Some(ctx);
            }
            Resolution::MethodNotAllowed { allow } => MissKind::MethodNotAllowed { allow },
            Resolution::NotFound => MissKind::NotFound,
        };

        self.answer_miss(kind, &request.method, &request.uri, &request.headers, &mut outbound);
        None
    }

    // ── Crate-internal ───────────────────────────────────────────────────────

    pub(crate) fn global_middleware(&self) -> Vec<BoxedMiddleware> {
        self.shared.before.read().clone()
    }

    pub(crate) fn serializers(&self) -> Vec<Serializer> {
        self.shared.serializers.read().clone()
    }

    pub(crate) fn error_serializers(&self) -> Vec<Serializer> {
        self.shared.error_serializers.read().clone()
    }

    /// Notifies observers in registration order. The list is copied first, so
    /// an observer may register further observers.
    pub(crate) fn emit(&self, event: &Event<'_>) {
        let observers = self.shared.observers.read().clone();
        for observer in &observers {
            observer(event);
        }
    }

    pub(crate) fn invoke(&self, ctx: Context, route: Arc<Route>) -> BoxFuture<()> {
        let invoker = self.shared.invoker.read().clone();
        match invoker {
            Some(invoker) => invoker(ctx, route),
            None => Box::pin(handler::invoke_route(ctx, route)),
        }
    }

    pub(crate) fn answer_miss(
        &self,
        kind: MissKind,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        outbound: &mut Outbound,
    ) {
        match &kind {
            MissKind::NotFound => {
                debug!(%method, %uri, "no route");
                self.emit(&Event::RouteNotFound { method, uri });
            }
            MissKind::MethodNotAllowed { allow } => {
                debug!(%method, %uri, ?allow, "method not allowed");
                self.emit(&Event::MethodNotAllowed { method, uri, allow });
            }
        }

        let handler = self.shared.miss.read().clone();
        let mut miss = Miss { kind, method, uri, headers, outbound };
        match handler {
            Some(handler) => handler(&mut miss),
            None => default_miss(&mut miss),
        }
    }
}

/// The default miss writer: plain-text 404 or 405 with an `Allow` header.
/// Upgrade sockets are closed instead.
pub fn default_miss(miss: &mut Miss<'_>) {
    let Some(res) = miss.outbound.response_mut() else {
        miss.outbound.close_socket();
        return;
    };
    if let Err(e) = write_miss(res, &miss.kind) {
        error!(error = %e, "could not write the miss response");
    }
}

fn write_miss(res: &mut Response, kind: &MissKind) -> Result<(), Error> {
    let (status, body) = match kind {
        MissKind::NotFound => (StatusCode::NOT_FOUND, "Not Found"),
        MissKind::MethodNotAllowed { allow } => {
            res.set_header("allow", &allow.join(","))?;
            (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
        }
    };
    res.set_status(status);
    res.set_header("content-type", ContentType::Text.as_str())?;
    res.end(Some(body.as_bytes()))
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    async fn noop(_ctx: Context) {}

    #[test]
    fn route_added_fires_once_per_route() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        dispatcher.on_event(move |event| {
            if let Event::RouteAdded { methods, route } = event {
                let keys: Vec<String> = methods.iter().map(ToString::to_string).collect();
                log.lock().push(format!("{} {}", route.path(), keys.join(",")));
            }
        });

        dispatcher
            .add_route(RouteConfig::new("/cars", noop).methods([Method::GET, Method::POST]))
            .unwrap();
        dispatcher.add_route(RouteConfig::new("/bikes", noop)).unwrap();
        assert_eq!(*seen.lock(), ["/cars GET,POST", "/bikes *"]);
    }

    #[test]
    fn conflicting_route_is_an_error() {
        let dispatcher = Dispatcher::new().get("/cars/:id", noop);
        let err = dispatcher
            .add_route(RouteConfig::new("/cars/:carId", noop).method(Method::GET))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRoute { .. }));
        assert_eq!(dispatcher.routes(&MethodKey::All).len(), 1);
    }

    #[test]
    #[should_panic]
    fn builder_panics_on_conflicting_route() {
        let _ = Dispatcher::new().get("/cars/:id", noop).get("/cars/:carId", noop);
    }

    #[test]
    fn reset_clears_one_method() {
        let dispatcher = Dispatcher::new().get("/cars", noop).post("/cars", noop);
        dispatcher.reset(&MethodKey::Exact(Method::GET));
        assert!(dispatcher.routes(&MethodKey::Exact(Method::GET)).is_empty());
        assert_eq!(dispatcher.routes(&MethodKey::Exact(Method::POST)).len(), 1);
        assert_eq!(dispatcher.routes(&MethodKey::All).len(), 1);
        assert!(matches!(
            dispatcher.resolve(&Method::GET, "/cars"),
            Resolution::MethodNotAllowed { ref allow } if allow == &["POST"]
        ));
    }

    #[test]
    fn clones_share_registries() {
        let dispatcher = Dispatcher::new();
        let clone = dispatcher.clone();
        clone.add_route(RouteConfig::new("/shared", noop)).unwrap();
        assert!(matches!(dispatcher.resolve(&Method::PUT, "/shared"), Resolution::Matched(_)));
    }

    #[test]
    fn config_is_kept() {
        let dispatcher = Dispatcher::with_config(Config { max_forwards: 2, body_limit: Some(64) });
        assert_eq!(dispatcher.config().max_forwards, 2);
        assert_eq!(dispatcher.config().body_limit, Some(64));
    }
}
