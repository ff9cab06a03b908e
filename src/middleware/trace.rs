//! Per-request tracing span with method, path, status and latency.

use std::time::Instant;

use tracing::{Instrument, info, info_span};

use super::Middleware;
use crate::context::Context;
use crate::handler::BoxFuture;

/// Logs one line per request once everything after it in the chain has run.
///
/// Register it first so the span covers the rest of the chain:
///
/// ```rust,ignore
/// let app = Dispatcher::new().before(middleware::trace());
/// ```
pub fn trace() -> Trace {
    Trace
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Middleware for Trace {
    fn call(&self, ctx: Context) -> BoxFuture<()> {
        let span = info_span!("request", method = %ctx.method(), path = %ctx.path());
        Box::pin(
            async move {
                let started = Instant::now();
                ctx.next().await;
                let status = ctx.with_response(|res| res.status().map(|s| s.as_u16()));
                info!(
                    status = ?status.flatten(),
                    closed = ctx.is_closed(),
                    latency_us = started.elapsed().as_micros() as u64,
                    "request handled"
                );
            }
            .instrument(span),
        )
    }
}
