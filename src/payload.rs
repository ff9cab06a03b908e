//! Response payloads and handler replies.
//!
//! A [`Payload`] is what gets handed to the serializer chains. Its shape
//! decides the defaults: text is written as-is, JSON values are encoded,
//! errors are written from their `Display` form.
//!
//! Handlers return anything implementing [`IntoReply`]. The invoker turns
//! `Ok`/plain values into a send and `Err` into an error:
//!
//! ```rust,ignore
//! async fn get_car(ctx: Context) -> Result<Json<Car>, Error> {
//!     let car = load(ctx.param("carId")).await?;
//!     Ok(Json(car))
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;

/// Error payloads keep the original error so custom serializers can downcast.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A value on its way to the serializer chain.
#[derive(Clone)]
pub enum Payload {
    /// No body.
    Empty,
    Text(String),
    Bytes(Bytes),
    Json(Value),
    Error(SharedError),
}

impl Payload {
    /// Wraps any error as an error payload.
    pub fn error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Error(Arc::new(err))
    }

    /// A plain message treated as an error (rather than as text) by the
    /// default error serializer.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Error(Arc::new(Failure(message.into())))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Error(err) => f.debug_tuple("Error").field(&err.to_string()).finish(),
        }
    }
}

/// The `Display` form written by the default serializers.
impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Text(text) => f.write_str(text),
            Self::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Self::Json(value) => write!(f, "{value}"),
            Self::Error(err) => write!(f, "{err}"),
        }
    }
}

/// A message-only error.
#[derive(Debug)]
struct Failure(String);

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Failure {}

/// Serializes `T` as a JSON payload.
#[derive(Clone, Debug)]
pub struct Json<T>(pub T);

// ── IntoPayload ──────────────────────────────────────────────────────────────

/// Conversion into a [`Payload`].
pub trait IntoPayload {
    fn into_payload(self) -> Payload;
}

impl IntoPayload for Payload {
    fn into_payload(self) -> Payload { self }
}

impl IntoPayload for () {
    fn into_payload(self) -> Payload { Payload::Empty }
}

impl IntoPayload for String {
    fn into_payload(self) -> Payload { Payload::Text(self) }
}

impl IntoPayload for &'static str {
    fn into_payload(self) -> Payload { Payload::Text(self.to_owned()) }
}

impl IntoPayload for Bytes {
    fn into_payload(self) -> Payload { Payload::Bytes(self) }
}

impl IntoPayload for Value {
    fn into_payload(self) -> Payload { Payload::Json(self) }
}

impl IntoPayload for Error {
    fn into_payload(self) -> Payload { Payload::error(self) }
}

/// A value that cannot be represented as JSON becomes an error payload.
impl<T: Serialize> IntoPayload for Json<T> {
    fn into_payload(self) -> Payload {
        match serde_json::to_value(&self.0) {
            Ok(value) => Payload::Json(value),
            Err(e) => Payload::error(e),
        }
    }
}

impl<T: IntoPayload> IntoPayload for Option<T> {
    fn into_payload(self) -> Payload {
        self.map_or(Payload::Empty, IntoPayload::into_payload)
    }
}

// ── Reply ────────────────────────────────────────────────────────────────────

/// What the invoker does once a handler's future resolves.
#[derive(Debug)]
pub enum Reply {
    /// The handler dealt with the response itself (or will, later).
    Done,
    Send(Option<StatusCode>, Payload),
    Error(Option<StatusCode>, Payload),
}

/// Conversion from a handler's return value into a [`Reply`].
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply { self }
}

impl IntoReply for () {
    fn into_reply(self) -> Reply { Reply::Done }
}

macro_rules! send_reply {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> Reply { Reply::Send(None, self.into_payload()) }
            }
        )*
    };
}

send_reply!(Payload, String, &'static str, Bytes, Value);

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Reply { Reply::Send(None, self.into_payload()) }
}

/// A returned error goes through the error pipeline.
impl IntoReply for Error {
    fn into_reply(self) -> Reply { Reply::Error(None, self.into_payload()) }
}

/// `None` leaves the response alone.
impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Reply {
        self.map_or(Reply::Done, IntoReply::into_reply)
    }
}

impl<T: IntoReply, E: IntoPayload> IntoReply for Result<T, E> {
    fn into_reply(self) -> Reply {
        match self {
            Ok(value) => value.into_reply(),
            Err(err) => Reply::Error(None, err.into_payload()),
        }
    }
}

impl<T: IntoPayload> IntoReply for (StatusCode, T) {
    fn into_reply(self) -> Reply {
        Reply::Send(Some(self.0), self.1.into_payload())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn results_split_into_send_and_error() {
        let ok: Result<&'static str, Error> = Ok("fine");
        assert!(matches!(ok.into_reply(), Reply::Send(None, Payload::Text(ref t)) if t == "fine"));

        let err: Result<(), Error> = Err(Error::ForwardLimit(8));
        match err.into_reply() {
            Reply::Error(None, Payload::Error(e)) => assert_eq!(e.to_string(), "forward limit of 8 exceeded"),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn unit_and_none_leave_the_response_alone() {
        assert!(matches!(().into_reply(), Reply::Done));
        assert!(matches!(Option::<String>::None.into_reply(), Reply::Done));
        assert!(matches!(Ok::<(), Error>(()).into_reply(), Reply::Done));
    }

    #[test]
    fn status_tuples_carry_their_status() {
        let reply = (StatusCode::CREATED, Json(json!({"id": 1}))).into_reply();
        assert!(matches!(reply, Reply::Send(Some(StatusCode::CREATED), Payload::Json(_))));
    }

    #[test]
    fn display_form_of_payloads() {
        assert_eq!(Payload::failure("overheating").to_string(), "overheating");
        assert_eq!(Payload::Json(json!({"a": 1})).to_string(), r#"{"a":1}"#);
        assert_eq!(Payload::Empty.to_string(), "");
    }
}
