//! Inbound request handle.
//!
//! The transport hands over method, URI, headers and a body that yields
//! chunks as they arrive. Nothing is buffered here; the request context reads
//! the body lazily, at most once.

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::body::Body as HttpBody;

/// Boxed error type for body streams from any transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A type-erased, chunked request body.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

/// An inbound HTTP request as delivered by the transport.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
}

impl Request {
    pub fn new<B>(method: Method, uri: Uri, headers: HeaderMap, body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self { method, uri, headers, body: body.map_err(Into::into).boxed_unsync() }
    }

    /// A request with no body.
    pub fn empty(method: Method, uri: Uri) -> Self {
        Self::new(method, uri, HeaderMap::new(), Empty::<Bytes>::new())
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl<B> From<http::Request<B>> for Request
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    fn from(req: http::Request<B>) -> Self {
        let (parts, body) = req.into_parts();
        Self::new(parts.method, parts.uri, parts.headers, body)
    }
}
