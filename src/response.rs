//! Outgoing HTTP response type and the [`Reply`] union handlers return.
//!
//! A [`Response`] is mutable all the way to transmission: after-middleware
//! add headers to it, error modifiers rewrite it, and any stage may replace
//! it wholesale.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::body::{Body, JsonBody};
use crate::cookie::Cookie;
use crate::error::Error;
use crate::status::Status;

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use arbor::{Response, Status};
///
/// let mut res = Response::text("zanzibar!");
/// res.set_status(Status::new(234))
///     .set_reason("Custom Reason")
///     .set_header("X-My-Header", "1")
///     .add_header("X-My-Header", "2");
///
/// assert_eq!(res.header_values("x-my-header"), ["1", "2"]);
/// ```
#[derive(Debug, Default)]
pub struct Response {
    status: Status,
    reason: Option<String>,
    // Keys are lowercased; values keep insertion order per name.
    headers: IndexMap<String, Vec<String>>,
    body: Body,
}

impl Response {
    /// `200 OK`, no headers, no body.
    pub fn new() -> Self {
        Self::default()
    }

    /// `200 OK` — `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::with_type("text/plain; charset=utf-8", body.into())
    }

    /// `200 OK` — `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::with_type("text/html; charset=utf-8", body.into())
    }

    /// `200 OK` with a serialized JSON body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        let mut res = Self::new();
        res.set_body(JsonBody::new(value)?);
        Ok(res)
    }

    /// Response with no body.
    pub fn status(code: Status) -> Self {
        Self { status: code, ..Self::default() }
    }

    /// Builds a response from a structured map.
    pub fn from_map(map: ResponseMap) -> Self {
        let mut res = Self::status(Status::new(map.status));
        res.reason = map.reason;
        for (name, value) in map.headers {
            res.add_header(&name, value);
        }
        if let Some(body) = map.body {
            res.body = Body::Text(body);
        }
        res
    }

    fn with_type(content_type: &str, body: String) -> Self {
        let mut res = Self::new();
        res.set_header("content-type", content_type);
        res.body = Body::Text(body);
        res
    }

    pub fn status_code(&self) -> u16 {
        self.status.code()
    }

    pub fn set_status(&mut self, status: impl Into<Status>) -> &mut Self {
        self.status = status.into();
        self
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) -> &mut Self {
        self.reason = Some(reason.into());
        self
    }

    // ── Headers ───────────────────────────────────────────────────────────────

    /// Replaces every value of `name` with `value`.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name.to_ascii_lowercase(), vec![value.into()]);
        self
    }

    /// Appends a value to `name`, keeping earlier ones (e.g. `Set-Cookie`).
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.entry(name.to_ascii_lowercase()).or_default().push(value.into());
        self
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.headers.shift_remove(&name.to_ascii_lowercase());
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(&name.to_ascii_lowercase())
    }

    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).first().map(String::as_str)
    }

    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers.get(&name.to_ascii_lowercase()).map_or(&[], Vec::as_slice)
    }

    /// Every header line in emission order: names in insertion order, each
    /// value of a multi-valued header as its own line.
    pub fn header_lines(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    pub fn set_cookie(&mut self, cookie: &Cookie) -> &mut Self {
        self.add_header("set-cookie", cookie.to_string())
    }

    // ── Body ──────────────────────────────────────────────────────────────────

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Sets the body. A [`BodyProducer`](crate::BodyProducer) contributes
    /// its headers here, replacing same-named ones.
    pub fn set_body(&mut self, body: impl Into<Body>) -> &mut Self {
        let body = body.into();
        if let Body::Producer(producer) = &body {
            for (name, value) in producer.headers() {
                self.set_header(&name, value);
            }
        }
        self.body = body;
        self
    }

    /// Sets the body from a primitive value, rejecting anything that is not
    /// text or null.
    pub fn try_set_body(&mut self, value: serde_json::Value) -> Result<&mut Self, Error> {
        let body = Body::try_from(value)?;
        Ok(self.set_body(body))
    }

    /// Fails when the body is empty and empty bodies are not allowed.
    ///
    /// Guards against handlers that forgot to return anything. Checking does
    /// not touch the body, so it may be repeated freely.
    pub fn check_body(&self, allow_empty: bool) -> Result<(), Error> {
        if allow_empty || !self.body.is_empty() {
            Ok(())
        } else {
            Err(Error::EmptyResponse)
        }
    }

    /// Checks that the status line and every header can be sent as built:
    /// a three-digit status, a reason without control characters, and
    /// header names and values that are valid HTTP tokens and field values.
    pub fn validate(&self) -> Result<(), Error> {
        let code = self.status_code();
        if http::StatusCode::from_u16(code).is_err() {
            return Err(Error::MalformedResponse(format!("status code {code} is out of range")));
        }
        if let Some(reason) = &self.reason {
            if hyper::ext::ReasonPhrase::try_from(reason.as_bytes()).is_err() {
                return Err(Error::MalformedResponse(format!("invalid reason phrase {reason:?}")));
            }
        }
        for (name, values) in &self.headers {
            if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(Error::MalformedResponse(format!("invalid header name {name:?}")));
            }
            for value in values {
                if http::HeaderValue::from_str(value).is_err() {
                    return Err(Error::MalformedResponse(format!("invalid value for header `{name}`")));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }
}

// ── ResponseMap ───────────────────────────────────────────────────────────────

/// A structured description of a response, for handlers that prefer data
/// over a builder. Deserializable, so it can come straight from JSON.
///
/// ```rust
/// use arbor::ResponseMap;
///
/// let map: ResponseMap = serde_json::from_str(
///     r#"{"status": 201, "headers": [["location", "/users/9"]], "body": "made"}"#,
/// ).unwrap();
/// assert_eq!(map.status, 201);
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ResponseMap {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl Default for ResponseMap {
    fn default() -> Self {
        Self { status: 200, reason: None, headers: Vec::new(), body: None }
    }
}

// ── Reply ─────────────────────────────────────────────────────────────────────

/// What a handler or before-middleware produced.
#[derive(Debug)]
pub enum Reply {
    /// Used as-is.
    Response(Response),
    /// Populates a fresh response.
    Map(ResponseMap),
    /// Wrapped as a literal body after type validation.
    Value(serde_json::Value),
}

impl Reply {
    /// Converts into a response. Only [`Reply::Value`] can fail, when the
    /// value is not a valid body type.
    pub fn into_response(self) -> Result<Response, Error> {
        match self {
            Self::Response(res) => Ok(res),
            Self::Map(map) => Ok(Response::from_map(map)),
            Self::Value(value) => {
                let mut res = Response::new();
                res.try_set_body(value)?;
                Ok(res)
            }
        }
    }

    pub(crate) fn is_literal(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

impl From<Response> for Reply {
    fn from(res: Response) -> Self {
        Self::Response(res)
    }
}

impl From<ResponseMap> for Reply {
    fn from(map: ResponseMap) -> Self {
        Self::Map(map)
    }
}

impl From<serde_json::Value> for Reply {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Self::Value(serde_json::Value::String(text))
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Self::Value(serde_json::Value::String(text.to_owned()))
    }
}

impl From<Status> for Reply {
    fn from(status: Status) -> Self {
        Self::Response(Response::status(status))
    }
}

// ── IntoReply ─────────────────────────────────────────────────────────────────

/// Conversion of a callable's return value into an optional [`Reply`].
///
/// `()` and `None` mean "no result"; `Err` is an uncaught failure.
pub trait IntoReply {
    fn into_reply(self) -> anyhow::Result<Option<Reply>>;
}

impl IntoReply for () {
    fn into_reply(self) -> anyhow::Result<Option<Reply>> {
        Ok(None)
    }
}

impl IntoReply for Reply {
    fn into_reply(self) -> anyhow::Result<Option<Reply>> {
        Ok(Some(self))
    }
}

macro_rules! into_reply_via_from {
    ($($ty:ty),*) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> anyhow::Result<Option<Reply>> {
                    Ok(Some(Reply::from(self)))
                }
            }
        )*
    };
}

into_reply_via_from!(Response, ResponseMap, serde_json::Value, String, &'static str, Status);

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> anyhow::Result<Option<Reply>> {
        match self {
            Some(inner) => inner.into_reply(),
            None => Ok(None),
        }
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<anyhow::Error>,
{
    fn into_reply(self) -> anyhow::Result<Option<Reply>> {
        self.map_err(Into::into)?.into_reply()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn validate_rejects_what_cannot_be_sent() {
        let mut res = Response::new();
        res.set_header("x-a", "caf\u{e9}").set_reason("Fine");
        assert!(res.validate().is_err());

        let mut res = Response::new();
        res.set_header("x-a", "1").add_header("set-cookie", "a=1; Path=/");
        assert!(res.validate().is_ok());

        res.set_header("x-a", "1\r\nset-cookie: evil=1");
        assert!(matches!(res.validate(), Err(Error::MalformedResponse(_))));

        let mut res = Response::new();
        res.set_header("bad name", "1");
        assert!(res.validate().is_err());

        let mut res = Response::status(Status::new(1000));
        assert!(res.validate().is_err());
        res.set_status(Status::new(99));
        assert!(res.validate().is_err());
        res.set_status(Status::new(234)).set_reason("Split\r\nLine");
        assert!(res.validate().is_err());
    }

    #[test]
    fn set_header_replaces_and_add_header_appends() {
        let mut res = Response::new();
        res.add_header("Set-Cookie", "a=1").add_header("set-cookie", "b=2");
        assert_eq!(res.header_values("SET-COOKIE"), ["a=1", "b=2"]);

        res.set_header("Set-Cookie", "c=3");
        assert_eq!(res.header_values("set-cookie"), ["c=3"]);
    }

    #[test]
    fn header_lines_repeat_multi_valued_headers_in_order() {
        let mut res = Response::new();
        res.set_header("x-a", "1").add_header("x-b", "2").add_header("x-a", "3");
        let lines: Vec<_> = res.header_lines().collect();
        assert_eq!(lines, [("x-a", "1"), ("x-a", "3"), ("x-b", "2")]);
    }

    #[test]
    fn producer_headers_are_merged_on_set_body() {
        let res = Response::json(&json!({"ok": true})).unwrap();
        assert_eq!(res.header("content-type"), Some("application/json; charset=utf-8"));
        assert_eq!(res.header("content-length"), Some("11"));
    }

    #[test]
    fn invalid_primitive_body_fails_fast() {
        let mut res = Response::new();
        assert!(matches!(res.try_set_body(json!(true)), Err(Error::InvalidBody("boolean"))));
        assert!(res.body().is_empty());
    }

    #[test]
    fn body_check_is_repeatable() {
        let res = Response::text("0");
        assert!(res.check_body(false).is_ok());
        assert!(res.check_body(false).is_ok());

        let empty = Response::new();
        assert!(matches!(empty.check_body(false), Err(Error::EmptyResponse)));
        assert!(matches!(empty.check_body(false), Err(Error::EmptyResponse)));
        assert!(empty.check_body(true).is_ok());
    }

    #[test]
    fn map_populates_status_headers_and_body() {
        let res = Response::from_map(ResponseMap {
            status: 201,
            headers: vec![("Location".into(), "/users/9".into())],
            body: Some("made".into()),
            ..ResponseMap::default()
        });
        assert_eq!(res.status_code(), 201);
        assert_eq!(res.header("location"), Some("/users/9"));
        assert_eq!(res.body().as_text(), Some("made"));
    }

    #[test]
    fn option_and_result_flatten() {
        assert!(None::<String>.into_reply().unwrap().is_none());
        assert!(Some("x").into_reply().unwrap().is_some());
        let failed: Result<String, std::io::Error> = Err(std::io::Error::other("boom"));
        assert_eq!(failed.into_reply().unwrap_err().to_string(), "boom");
    }
}
