//! Dispatcher events and extensions.
//!
//! Observers are plain closures registered with
//! [`Dispatcher::on_event`](crate::Dispatcher::on_event). They run inline, in
//! registration order, on the task that raised the event.

use std::sync::Arc;

use http::{Method, Uri};

use crate::context::Context;
use crate::dispatcher::Dispatcher;
use crate::payload::Payload;
use crate::route::Route;
use crate::table::MethodKey;

#[derive(Debug)]
pub enum Event<'a> {
    /// A route was inserted under each of `methods`. Raised once per route,
    /// however many methods it answers.
    RouteAdded { methods: &'a [MethodKey], route: &'a Arc<Route> },
    /// A route matched and its middleware chain is about to start.
    BeforeHandle(&'a Context),
    BeforeSend { ctx: &'a Context, payload: &'a Payload },
    RequestError { ctx: &'a Context, payload: &'a Payload },
    RouteNotFound { method: &'a Method, uri: &'a Uri },
    MethodNotAllowed { method: &'a Method, uri: &'a Uri, allow: &'a [String] },
}

pub type Observer = Arc<dyn Fn(&Event<'_>) + Send + Sync>;

/// A pluggable add-on. `init` runs once, when the extension is registered,
/// and typically subscribes to events or adds global middleware.
///
/// ```rust,ignore
/// struct AdminOnly;
///
/// impl Extension for AdminOnly {
///     fn init(&self, dispatcher: &Dispatcher) {
///         dispatcher.on_event(|event| {
///             if let Event::RouteAdded { route, .. } = event {
///                 if route.path().starts_with("/admin") {
///                     route.append_middleware(require_admin);
///                 }
///             }
///         });
///     }
/// }
/// ```
pub trait Extension {
    fn init(&self, dispatcher: &Dispatcher);
}

impl<F> Extension for F
where
    F: Fn(&Dispatcher),
{
    fn init(&self, dispatcher: &Dispatcher) {
        self(dispatcher)
    }
}
