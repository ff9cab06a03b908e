//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! A route table holds handlers of *different* types. Rust collections can
//! only hold one concrete type, so each handler is hidden behind a trait
//! object (`dyn ErasedHandler`) at registration time.
//!
//! ```text
//! async fn get_car(ctx: Context) -> Json<Car> { … }   ← user writes this
//!        ↓ RouteConfig::new("/cars/:id", get_car)
//! get_car.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(get_car))                       ← stored on the Route
//!        ↓
//! handler.call(ctx)  when the chain reaches it       ← one vtable dispatch
//!        ↓
//! Box::pin(async { get_car(ctx).await.into_reply() })
//! ```
//!
//! The [`Reply`] is then auto-dispatched by the invoker: values are sent,
//! errors go through the error pipeline, `()` leaves the response alone.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use http::StatusCode;
use tracing::error;

use crate::context::Context;
use crate::payload::{IntoReply, Payload, Reply};
use crate::route::Route;

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` so a middleware or handler may hand its context to a
/// spawned task and finish the request from there.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Internal dispatch interface.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: Context) -> BoxFuture<Reply>;
}

/// A heap-allocated, type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied for any function
/// with the signature:
///
/// ```text
/// async fn name(ctx: Context) -> impl IntoReply
/// ```
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<Reply> {
        let fut = (self.0)(ctx);
        Box::pin(async move { fut.await.into_reply() })
    }
}

// ── Route invocation ─────────────────────────────────────────────────────────

/// Replacement for the default route invoker.
pub type RouteInvoker = Arc<dyn Fn(Context, Arc<Route>) -> BoxFuture<()> + Send + Sync>;

/// Runs the route's handler and dispatches whatever it returns.
///
/// A panic, whether raised while building the handler's future or while
/// polling it, becomes a 500 response instead of taking the connection down.
pub async fn invoke_route(ctx: Context, route: Arc<Route>) {
    let handler = Arc::clone(route.handler());
    if let Some(reply) = guarded(&ctx, "route handler", || handler.call(ctx.clone())).await {
        dispatch_reply(&ctx, reply);
    }
}

/// Builds and drives a future from user code. A panic in either step is
/// logged and answered with 500 unless the response is already closed.
pub(crate) async fn guarded<T>(
    ctx: &Context,
    step: &'static str,
    call: impl FnOnce() -> BoxFuture<T>,
) -> Option<T> {
    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
        Err(panic) => Err(panic),
    };

    match outcome {
        Ok(value) => Some(value),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(path = %ctx.path(), step, %message, "panicked while handling request");
            if !ctx.is_closed() {
                ctx.error_status(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Payload::failure("Internal Server Error"),
                );
            }
            None
        }
    }
}

/// Sends or errors according to a handler's [`Reply`].
pub fn dispatch_reply(ctx: &Context, reply: Reply) {
    match reply {
        Reply::Done => {}
        Reply::Send(Some(status), payload) => ctx.send_status(status, payload),
        Reply::Send(None, payload) => ctx.send(payload),
        Reply::Error(Some(status), payload) => ctx.error_status(status, payload),
        Reply::Error(None, payload) => ctx.error(payload),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
