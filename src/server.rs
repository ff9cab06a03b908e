//! HTTP server and graceful shutdown.
//!
//! Each connection is served by hyper (HTTP/1.1 or HTTP/2, whichever the
//! client negotiates). Every request gets a fresh [`Response`] channel; the
//! dispatcher runs the chain and the connection task waits for the response
//! to be finalized, which may happen after the chain returns if a handler
//! finishes the request from a spawned task.
//!
//! On SIGTERM or Ctrl-C the server stops accepting, lets in-flight
//! connections finish, then returns from [`Server::serve`].

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::request::Request;
use crate::response::{Finished, Response};

pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Validates `addr` (`host:port`). Nothing is bound until
    /// [`serve`](Server::serve).
    ///
    /// ```rust,no_run
    /// # fn main() -> Result<(), rested::Error> {
    /// let server = rested::Server::bind("0.0.0.0:3000")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr.parse().map_err(|e| Error::Addr(format!("{addr}: {e}")))?;
        Ok(Self { addr })
    }

    pub fn addr(&self) -> SocketAddr { self.addr }

    /// Accepts connections and dispatches their requests until a shutdown
    /// signal arrives and every in-flight connection has finished.
    pub async fn serve(self, dispatcher: Dispatcher) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "rested listening");

        let mut tasks = tokio::task::JoinSet::new();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown wins over queued connections.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let dispatcher = dispatcher.clone();
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| dispatch(dispatcher.clone(), req));
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(%peer, "connection error: {e}");
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("rested stopped");
        Ok(())
    }
}

/// Runs one request through the dispatcher and waits for its response.
async fn dispatch(
    dispatcher: Dispatcher,
    req: hyper::Request<Incoming>,
) -> Result<Finished, Infallible> {
    let (response, pending) = Response::channel();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    // Drop our handle so a request nobody finishes resolves as dropped
    // instead of hanging the connection.
    drop(dispatcher.handle(Request::from(req), response).await);

    match pending.await {
        Ok(finished) => Ok(finished),
        Err(e) => {
            warn!(%method, %path, error = %e, "request finished without a response");
            let mut fallback = http::Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            Ok(fallback)
        }
    }
}

/// Resolves on SIGTERM or Ctrl-C. A signal that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_rejects_malformed_addresses() {
        assert!(matches!(Server::bind("not an address"), Err(Error::Addr(_))));
        assert_eq!(Server::bind("127.0.0.1:3000").unwrap().addr().port(), 3000);
    }
}
