//! Outbound response handle.
//!
//! A [`Response`] is mutable while a request is in flight: middleware and
//! serializers set the status, headers and body, then exactly one call to
//! [`Response::end`] finalizes it. Finalization hands the assembled
//! `http::Response` to whoever holds the matching [`Pending`] receiver,
//! usually the server's connection task.
//!
//! Upgrade requests have no response. They carry a [`Socket`] instead, which
//! can only be closed.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::Error;

/// Content types the dispatcher itself writes or parses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    FormData,    // application/x-www-form-urlencoded
    Json,        // application/json
    OctetStream, // application/octet-stream
    Text,        // text/plain
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain",
        }
    }
}

/// The finalized response, as handed to the transport.
pub type Finished = http::Response<Full<Bytes>>;

/// Resolves to the finalized response once [`Response::end`] runs.
///
/// Resolves to [`Error::ResponseDropped`] if the response is dropped without
/// being finalized.
pub struct Pending(oneshot::Receiver<Finished>);

impl Future for Pending {
    type Output = Result<Finished, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|res| res.map_err(|_| Error::ResponseDropped))
    }
}

/// An outgoing HTTP response under construction.
pub struct Response {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    headers_sent: bool,
    closed: bool,
    sink: Option<oneshot::Sender<Finished>>,
}

impl Response {
    /// A response plus the receiver that observes its finalization.
    pub fn channel() -> (Self, Pending) {
        let (tx, rx) = oneshot::channel();
        let response = Self {
            status: None,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            headers_sent: false,
            closed: false,
            sink: Some(tx),
        };
        (response, Pending(rx))
    }

    /// The status set so far. `None` until someone sets one.
    pub fn status(&self) -> Option<StatusCode> { self.status }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Forgets the status so a serializer can choose its own default.
    pub fn clear_status(&mut self) {
        self.status = None;
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Sets (replaces) a header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        self.guard("set_header")?;
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// `true` once body bytes have been written. Status and headers are
    /// frozen from that point on.
    pub fn headers_sent(&self) -> bool { self.headers_sent }

    pub fn is_closed(&self) -> bool { self.closed }

    /// Appends a body chunk.
    pub fn write(&mut self, chunk: impl AsRef<[u8]>) -> Result<(), Error> {
        self.guard("write")?;
        self.headers_sent = true;
        self.body.extend_from_slice(chunk.as_ref());
        Ok(())
    }

    /// Finalizes the response, optionally appending a last chunk.
    ///
    /// The response is marked closed before it is handed to the transport, so
    /// every later observer sees [`is_closed`](Self::is_closed) as `true`.
    pub fn end(&mut self, chunk: Option<&[u8]>) -> Result<(), Error> {
        self.guard("end")?;
        if let Some(chunk) = chunk {
            self.body.extend_from_slice(chunk);
        }
        self.closed = true;
        self.headers_sent = true;

        let mut finished = http::Response::new(Full::new(self.body.split().freeze()));
        *finished.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *finished.headers_mut() = std::mem::take(&mut self.headers);

        if let Some(sink) = self.sink.take() {
            if sink.send(finished).is_err() {
                debug!("response finalized after the transport stopped waiting");
            }
        }
        Ok(())
    }

    fn guard(&self, op: &'static str) -> Result<(), Error> {
        if self.closed {
            error!(op, "attempted to modify a closed response");
            return Err(Error::ResponseClosed);
        }
        Ok(())
    }
}

/// The transport side of an upgrade request.
pub trait Socket: Send {
    fn close(&mut self);
}

/// Where a request's answer goes.
pub enum Outbound {
    Response(Response),
    Socket { socket: Box<dyn Socket>, closed: bool },
}

impl Outbound {
    pub fn socket(socket: Box<dyn Socket>) -> Self {
        Self::Socket { socket, closed: false }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Self::Response(res) => res.is_closed(),
            Self::Socket { closed, .. } => *closed,
        }
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        match self {
            Self::Response(res) => Some(res),
            Self::Socket { .. } => None,
        }
    }

    /// Closes an upgrade socket. No-op for regular responses or a socket
    /// that is already closed.
    pub fn close_socket(&mut self) {
        if let Self::Socket { socket, closed } = self {
            if !*closed {
                *closed = true;
                socket.close();
            }
        }
    }
}
