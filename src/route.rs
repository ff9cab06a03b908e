//! Routes and route configuration.

use std::fmt;
use std::sync::Arc;

use http::Method;
use parking_lot::RwLock;

use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{self, BoxedMiddleware, Middleware};

/// The methods a route answers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Methods {
    /// Registered without a method: matches whatever exact-method routes do not.
    Any,
    Only(Vec<Method>),
}

/// A registered route: pattern, methods, route-specific middleware, handler.
///
/// Everything but the middleware list is fixed at registration. Extensions
/// may append middleware later with [`Route::append_middleware`], typically
/// from a [`RouteAdded`](crate::Event::RouteAdded) observer.
pub struct Route {
    path: String,
    methods: Methods,
    before: RwLock<Vec<BoxedMiddleware>>,
    handler: BoxedHandler,
}

impl Route {
    pub(crate) fn from_config(config: RouteConfig) -> Self {
        let methods = match config.methods {
            Some(methods) => Methods::Only(methods),
            None => Methods::Any,
        };
        Self {
            path: config.path,
            methods,
            before: RwLock::new(config.before),
            handler: config.handler,
        }
    }

    /// The pattern as registered.
    pub fn path(&self) -> &str { &self.path }
    pub fn methods(&self) -> &Methods { &self.methods }
    pub(crate) fn handler(&self) -> &BoxedHandler { &self.handler }

    /// Adds middleware that runs after the global middleware and after the
    /// route's existing middleware. Requests already in flight keep the list
    /// they started with.
    pub fn append_middleware(&self, middleware: impl Middleware) {
        self.before.write().push(middleware::boxed(middleware));
    }

    pub fn middleware_count(&self) -> usize {
        self.before.read().len()
    }

    pub(crate) fn middleware(&self) -> Vec<BoxedMiddleware> {
        self.before.read().clone()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("methods", &self.methods)
            .field("middleware", &self.middleware_count())
            .finish_non_exhaustive()
    }
}

/// Describes a route to register.
///
/// Path parameters may be written `{name}` or `:name`; a trailing catch-all
/// as `{*rest}` or `*rest`.
///
/// ```rust,ignore
/// RouteConfig::new("/cars/:carId", get_car)
///     .method(Method::GET)
///     .before(require_login);
/// ```
pub struct RouteConfig {
    path: String,
    methods: Option<Vec<Method>>,
    before: Vec<BoxedMiddleware>,
    handler: BoxedHandler,
}

impl RouteConfig {
    /// A route that answers any method.
    pub fn new(path: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            path: path.into(),
            methods: None,
            before: Vec::new(),
            handler: handler.into_boxed_handler(),
        }
    }

    /// Restricts the route to `method`. May be called repeatedly.
    pub fn method(mut self, method: Method) -> Self {
        let methods = self.methods.get_or_insert_with(Vec::new);
        if !methods.contains(&method) {
            methods.push(method);
        }
        self
    }

    pub fn methods(self, methods: impl IntoIterator<Item = Method>) -> Self {
        methods.into_iter().fold(self, Self::method)
    }

    /// Appends route-specific middleware.
    pub fn before(mut self, middleware: impl Middleware) -> Self {
        self.before.push(middleware::boxed(middleware));
        self
    }

    pub fn path(&self) -> &str { &self.path }
}
