//! Parsers behind the lazy request values: cookies, basic-auth credentials,
//! and body decoding by content type.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

use crate::error::Error;

/// Content type assumed when a request body arrives without one.
pub const DEFAULT_BODY_TYPE: &str = "application/json";

/// Credentials from an `Authorization` header.
///
/// `username` and `password` are only present for the `Basic` scheme with a
/// well-formed `user:password` token.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BasicAuth {
    pub scheme: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Parses a `Cookie` header into name/value pairs.
///
/// Values are percent-decoded; a value that fails to decode is kept verbatim.
/// Later duplicates overwrite earlier ones.
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = value.trim();
            let value = urlencoding::decode(value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| value.to_owned());
            (name.trim().to_owned(), value)
        })
        .collect()
}

/// Parses an `Authorization` header value.
pub fn parse_basic_auth(header: &str) -> BasicAuth {
    let header = header.trim();
    let (scheme, token) = header.split_once(' ').unwrap_or((header, ""));
    let mut auth = BasicAuth { scheme: scheme.to_owned(), ..BasicAuth::default() };

    if !scheme.eq_ignore_ascii_case("basic") {
        return auth;
    }

    let decoded = STANDARD
        .decode(token.trim())
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok());
    if let Some((user, pass)) = decoded.as_deref().and_then(|s| s.split_once(':')) {
        auth.username = Some(user.to_owned());
        auth.password = Some(pass.to_owned());
    }
    auth
}

/// The media type of a `Content-Type` value with parameters removed:
/// `application/json; charset=utf-8` becomes `application/json`.
pub fn media_type(content_type: Option<&str>) -> String {
    match content_type {
        Some(value) => value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase(),
        None => DEFAULT_BODY_TYPE.to_owned(),
    }
}

/// Parses a decoded body according to its content type.
///
/// | Media type | Parser |
/// |---|---|
/// | `application/x-www-form-urlencoded` | query-string decoding |
/// | `application/json`, `text/plain` | JSON |
///
/// Anything else is an [`Error::UnsupportedContentType`].
pub fn parse_body(content_type: Option<&str>, body: &str) -> Result<Option<Value>, Error> {
    match media_type(content_type).as_str() {
        "application/x-www-form-urlencoded" => Ok(Some(parse_form(body))),
        "application/json" | "text/plain" => parse_json(body),
        other => Err(Error::UnsupportedContentType(other.to_owned())),
    }
}

/// Blank input is no value, not an error.
fn parse_json(body: &str) -> Result<Option<Value>, Error> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| Error::InvalidJson(e.to_string()))
}

/// Repeated keys collect into an array, in arrival order.
pub fn parse_form(body: &str) -> Value {
    let mut fields = Map::new();
    for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
        let value = Value::String(value.into_owned());
        match fields.get_mut(&*key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                fields.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cookies_are_trimmed_and_decoded() {
        let cookies = parse_cookies("session=abc%20123; theme = dark ;flag");
        assert_eq!(cookies["session"], "abc 123");
        assert_eq!(cookies["theme"], "dark");
        assert_eq!(cookies["flag"], "");
    }

    #[test]
    fn cookie_values_may_contain_equals() {
        let cookies = parse_cookies("token=a=b");
        assert_eq!(cookies["token"], "a=b");
    }

    #[test]
    fn basic_auth_decodes_credentials() {
        // "alice:s3cr:et"
        let auth = parse_basic_auth("Basic YWxpY2U6czNjcjpldA==");
        assert_eq!(auth.scheme, "Basic");
        assert_eq!(auth.username.as_deref(), Some("alice"));
        assert_eq!(auth.password.as_deref(), Some("s3cr:et"));
    }

    #[test]
    fn other_schemes_carry_no_credentials() {
        let auth = parse_basic_auth("Bearer abc.def");
        assert_eq!(auth.scheme, "Bearer");
        assert_eq!(auth.username, None);
    }

    #[test]
    fn missing_content_type_defaults_to_json() {
        assert_eq!(parse_body(None, r#"{"a":123}"#).unwrap(), Some(json!({"a": 123})));
    }

    #[test]
    fn charset_suffix_is_ignored() {
        let parsed = parse_body(Some("application/json; charset=utf-8"), "[1,2]").unwrap();
        assert_eq!(parsed, Some(json!([1, 2])));
    }

    #[test]
    fn text_plain_parses_as_json() {
        assert_eq!(parse_body(Some("text/plain"), "\"hi\"").unwrap(), Some(json!("hi")));
    }

    #[test]
    fn blank_json_is_no_value() {
        assert_eq!(parse_body(Some("application/json"), "   \n").unwrap(), None);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = parse_body(None, "{oops").unwrap_err();
        assert!(matches!(err, Error::InvalidJson(_)));
        assert!(err.to_string().starts_with("Invalid JSON: "));
    }

    #[test]
    fn form_bodies_collect_repeated_keys() {
        let parsed = parse_body(
            Some("application/x-www-form-urlencoded"),
            "name=alice+smith&tag=a&tag=b&tag=c",
        )
        .unwrap();
        assert_eq!(parsed, Some(json!({"name": "alice smith", "tag": ["a", "b", "c"]})));
    }

    #[test]
    fn unknown_content_type_is_an_error() {
        let err = parse_body(Some("application/xml"), "<a/>").unwrap_err();
        assert!(matches!(err, Error::UnsupportedContentType(ref t) if t == "application/xml"));
    }
}
