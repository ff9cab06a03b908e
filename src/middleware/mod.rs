//! Middleware layer.
//!
//! Middleware runs before the route handler and is the right place for
//! cross-cutting concerns: tracing, authentication, request-id injection.
//! Every middleware receives the request [`Context`] and must do exactly one
//! of two things:
//!
//! - finalize the response (`ctx.send(..)`, `ctx.error(..)`, ...), or
//! - continue the chain with `ctx.next().await`.
//!
//! ```rust,ignore
//! dispatcher.before(|ctx: Context| async move {
//!     if ctx.request_header("authorization").is_none() {
//!         return ctx.error_status(StatusCode::UNAUTHORIZED, "login required");
//!     }
//!     ctx.next().await
//! });
//! ```
//!
//! Calling `next` after the response is closed is a no-op, so a middleware
//! that both responds and continues cannot run the handler on a finished
//! request.

use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::handler::BoxFuture;

mod trace;

pub use trace::{Trace, trace};

/// A step in the request chain.
///
/// Implemented for every `Fn(Context) -> impl Future<Output = ()>`; implement
/// it directly on a struct when the middleware carries configuration.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> BoxFuture<()>;
}

impl<F, Fut> Middleware for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<()> {
        Box::pin(self(ctx))
    }
}

/// A shared, type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Boxes a middleware for storage in a route or dispatcher.
pub fn boxed(middleware: impl Middleware) -> BoxedMiddleware {
    Arc::new(middleware)
}
