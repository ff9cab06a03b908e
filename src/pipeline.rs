//! Response serialization pipeline.
//!
//! `send` and `error` run the registered serializers in order and stop as
//! soon as one of them closes the response. If none do, the default
//! serializer decides status code, content type and encoding.
//!
//! | Payload | `send` | `error` (no explicit status) |
//! |---|---|---|
//! | empty | 200, no body | 500, no body |
//! | text | 200, existing content type or `text/plain` | 400, existing or `text/plain` |
//! | bytes | 200, existing or `application/octet-stream` | 400, same |
//! | JSON | 200, `application/json` | 500, `application/json` |
//! | error | 200, `text/plain` | 500, `text/plain` |

use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer as JsonSerializer};
use tracing::error;

use crate::context::Context;
use crate::error::Error;
use crate::event::Event;
use crate::payload::Payload;
use crate::response::{ContentType, Response};

/// A registered serializer. It either finalizes the response or leaves it
/// for the next one in line.
pub type Serializer = Arc<dyn Fn(&Context, &Payload) + Send + Sync>;

/// Runs the send chain for `payload`.
pub(crate) fn send(ctx: &Context, payload: &Payload) {
    ctx.dispatcher().emit(&Event::BeforeSend { ctx, payload });

    if ctx.is_closed() {
        error!(path = %ctx.path(), "send on a closed response");
        return;
    }

    for serializer in ctx.dispatcher().serializers() {
        serializer(ctx, payload);
        if ctx.is_closed() {
            return;
        }
    }

    ctx.with_response(|res| {
        if let Err(e) = default_serializer(res, payload) {
            error!(error = %e, "default serializer failed");
        }
    });
}

/// Runs the error chain for `payload`.
pub(crate) fn error(ctx: &Context, payload: &Payload) {
    ctx.dispatcher().emit(&Event::RequestError { ctx, payload });

    if ctx.is_closed() {
        return;
    }

    for serializer in ctx.dispatcher().error_serializers() {
        serializer(ctx, payload);
        if ctx.is_closed() {
            return;
        }
    }

    ctx.with_response(|res| {
        if let Err(e) = default_error_serializer(res, payload) {
            error!(error = %e, "default error serializer failed");
        }
    });
}

/// The serializer of last resort for `send`.
pub fn default_serializer(res: &mut Response, payload: &Payload) -> Result<(), Error> {
    if res.status().is_none() {
        res.set_status(StatusCode::OK);
    }

    let (content_type, body) = match payload {
        Payload::Empty => return res.end(None),
        Payload::Text(text) => (existing_or(res, ContentType::Text), text.clone().into_bytes()),
        Payload::Bytes(bytes) => (existing_or(res, ContentType::OctetStream), bytes.to_vec()),
        Payload::Json(value) => encode_json(value),
        Payload::Error(err) => (ContentType::Text.as_str().to_owned(), err.to_string().into_bytes()),
    };

    write_body(res, &content_type, &body)
}

/// The serializer of last resort for `error`.
///
/// A status outside 400..=599 is discarded first, so a handler that set 200
/// before failing still produces an error status.
pub fn default_error_serializer(res: &mut Response, payload: &Payload) -> Result<(), Error> {
    if res.status().is_some_and(|s| !(s.is_client_error() || s.is_server_error())) {
        res.clear_status();
    }

    if payload.is_empty() {
        set_default_status(res, StatusCode::INTERNAL_SERVER_ERROR);
        return res.end(None);
    }

    if res.headers_sent() {
        let message = match payload {
            Payload::Json(value) => serde_json::to_string(value).unwrap_or_else(|_| value.to_string()),
            other => other.to_string(),
        };
        error!(%message, "error while handling request after the response started");
        return res.end(None);
    }

    let (status, content_type, body) = match payload {
        Payload::Empty => unreachable!("empty payloads return early"),
        Payload::Error(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ContentType::Text.as_str().to_owned(),
            err.to_string().into_bytes(),
        ),
        Payload::Text(text) => (
            StatusCode::BAD_REQUEST,
            existing_or(res, ContentType::Text),
            text.clone().into_bytes(),
        ),
        Payload::Bytes(bytes) => (
            StatusCode::BAD_REQUEST,
            existing_or(res, ContentType::OctetStream),
            bytes.to_vec(),
        ),
        Payload::Json(value) => {
            let (content_type, body) = encode_json(value);
            (StatusCode::INTERNAL_SERVER_ERROR, content_type, body)
        }
    };

    set_default_status(res, status);
    write_body(res, &content_type, &body)
}

fn set_default_status(res: &mut Response, status: StatusCode) {
    if res.status().is_none() {
        res.set_status(status);
    }
}

fn existing_or(res: &Response, fallback: ContentType) -> String {
    res.header("content-type").unwrap_or(fallback.as_str()).to_owned()
}

fn write_body(res: &mut Response, content_type: &str, body: &[u8]) -> Result<(), Error> {
    res.set_header("content-type", content_type)?;
    res.write(body)?;
    res.end(None)
}

/// Pretty-printed with a one-space indent; falls back to the compact
/// `Display` form as text.
fn encode_json(value: &Value) -> (String, Vec<u8>) {
    match to_pretty_json(value) {
        Ok(body) => (ContentType::Json.as_str().to_owned(), body),
        Err(_) => (ContentType::Text.as_str().to_owned(), value.to_string().into_bytes()),
    }
}

fn to_pretty_json(value: &Value) -> serde_json::Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut ser = JsonSerializer::with_formatter(&mut body, PrettyFormatter::with_indent(b" "));
    value.serialize(&mut ser)?;
    Ok(body)
}
