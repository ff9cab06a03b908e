//! # rested
//!
//! A request-dispatch core for HTTP services: method-aware routing, an
//! ordered middleware chain, lazily computed request values and a pluggable
//! response pipeline, on top of hyper and tokio.
//!
//! ## Request flow
//!
//! ```text
//! transport ─▶ Dispatcher ─▶ RouteTable::resolve ─┬─▶ Context::next ─▶ global mw ─▶ route mw ─▶ handler
//!                                                 │                                               │
//!                                                 │                      send / error pipeline ◀──┘
//!                                                 └─▶ 404 / 405 (or socket close for upgrades)
//! ```
//!
//! - Routing: one radix tree per method via [`matchit`], a wildcard tree
//!   for routes without a method, and an aggregate tree that tells
//!   `405 Method Not Allowed` apart from `404 Not Found`.
//! - Middleware: `async fn(Context)` that either finalizes the response or
//!   calls `ctx.next().await`.
//! - Request values: cookies, basic auth, `Accept` negotiation and the body
//!   (raw, text, parsed) are computed on first use and shared by everyone
//!   asking for them. Body reads are single-flight and size-limited.
//! - Responses: whatever a handler returns is sent; errors go through the
//!   error pipeline. Serializers can be chained in front of the defaults.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rested::{Context, Dispatcher, Json, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rested::Error> {
//!     let app = Dispatcher::new()
//!         .before(rested::middleware::trace())
//!         .get("/cars/:carId", get_car)
//!         .post("/cars", create_car);
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! async fn get_car(ctx: Context) -> Json<serde_json::Value> {
//!     Json(serde_json::json!({ "id": ctx.param("carId") }))
//! }
//!
//! async fn create_car(ctx: Context) -> Result<(StatusCode, serde_json::Value), rested::Error> {
//!     let car = ctx.parsed_body(Some(16 * 1024)).await?.unwrap_or_default();
//!     Ok((StatusCode::CREATED, car))
//! }
//! ```

mod accept;
mod bounded;
mod config;
mod context;
mod dispatcher;
mod error;
mod event;
mod extract;
mod handler;
mod payload;
mod pipeline;
mod request;
mod response;
mod route;
mod server;
mod table;

pub mod middleware;

pub use accept::{Accept, Accepts, Preference};
pub use bounded::BoundedValue;
pub use config::Config;
pub use context::Context;
pub use dispatcher::{Dispatcher, Miss, MissKind, default_miss};
pub use error::Error;
pub use event::{Event, Extension, Observer};
pub use extract::{BasicAuth, parse_basic_auth, parse_body, parse_cookies};
pub use handler::{BoxFuture, Handler, RouteInvoker, dispatch_reply, invoke_route};
pub use payload::{IntoPayload, IntoReply, Json, Payload, Reply};
pub use pipeline::{Serializer, default_error_serializer, default_serializer};
pub use request::{Body, BoxError, Request};
pub use response::{ContentType, Finished, Outbound, Pending, Response, Socket};
pub use route::{Methods, Route, RouteConfig};
pub use server::Server;
pub use table::{MethodKey, Resolution, RouteMatch, RouteTable};

pub use http::{Method, StatusCode, Uri};
