//! Incoming HTTP request type.
//!
//! A [`Request`] is built once per call from server variables (the CGI-style
//! `REQUEST_METHOD`, `REQUEST_URI`, `HTTP_*` set) and exposes them through
//! separate namespaces: headers, query, form fields, uploaded files, cookies,
//! vars and route parameters. Every namespace follows the same accessor
//! pattern:
//!
//! ```rust
//! use arbor::Request;
//!
//! let req = Request::builder()
//!     .uri("/search?q=rust")
//!     .header("Accept", "text/html")
//!     .build();
//!
//! assert!(req.has_query("q"));
//! assert_eq!(req.query("q").unwrap(), "rust");
//! assert_eq!(req.header("accept").unwrap(), "text/html");
//! assert!(req.query("page").is_err()); // unknown query parameter: page
//! ```
//!
//! Lookups never return an implicit empty value: a missing field is an
//! [`Error::UnknownField`].

use std::fmt;
use std::io::{self, Cursor, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use indexmap::IndexMap;

use crate::cookie;
use crate::error::{Error, Namespace};
use crate::middleware::{After, BoxedAfter, Entry, Options};

/// Well-known server variable names.
pub mod vars {
    pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
    pub const REQUEST_URI: &str = "REQUEST_URI";
    /// `REQUEST_URI` without the query string; derived at construction.
    pub const REQUEST_URI_PATH: &str = "REQUEST_URI_PATH";
    pub const QUERY_STRING: &str = "QUERY_STRING";
    pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";
    pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
    pub const HTTPS: &str = "HTTPS";
    pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
    pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
    pub const HTTP_COOKIE: &str = "HTTP_COOKIE";
}

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

// ── Uploaded files ────────────────────────────────────────────────────────────

/// Descriptor of a file uploaded with a multipart form.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UploadedFile {
    /// Client-side file name.
    pub name: String,
    pub content_type: String,
    pub size: u64,
    /// Where the upload was spooled to.
    pub tmp_path: PathBuf,
    /// Upload error code, `0` on success.
    pub error: u32,
}

// ── Body ──────────────────────────────────────────────────────────────────────

enum BodySource {
    Absent,
    Stream(Box<dyn Read + Send>),
    Buffered(String),
}

// ── Output sink ───────────────────────────────────────────────────────────────

/// Raw output written outside the response object.
///
/// Anything written here is treated as a programming error: the pipeline
/// discards the response it was about to send and answers 500 instead.
#[derive(Default)]
pub struct Output(Vec<u8>);

impl Output {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl io::Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Write for Output {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// An incoming HTTP request.
pub struct Request {
    vars: IndexMap<String, String>,
    original_vars: IndexMap<String, String>,
    // Lowercase names, `-` separated.
    headers: IndexMap<String, String>,
    query: IndexMap<String, String>,
    form: IndexMap<String, String>,
    files: IndexMap<String, UploadedFile>,
    cookies: IndexMap<String, String>,
    body: BodySource,
    encrypted: bool,
    route_args: IndexMap<String, String>,
    extensions: http::Extensions,
    output: Output,
    deferred: Vec<Entry<BoxedAfter>>,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    /// Builds a request from hyper's request head and the collected body.
    pub fn from_http(parts: http::request::Parts, body: Bytes, remote: Option<SocketAddr>) -> Self {
        let mut vars = IndexMap::new();
        vars.insert(vars::REQUEST_METHOD.to_owned(), parts.method.as_str().to_owned());
        let uri = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        vars.insert(vars::REQUEST_URI.to_owned(), uri.to_owned());
        vars.insert(vars::SERVER_PROTOCOL.to_owned(), format!("{:?}", parts.version));
        if let Some(remote) = remote {
            vars.insert(vars::REMOTE_ADDR.to_owned(), remote.ip().to_string());
        }
        if parts.uri.scheme_str() == Some("https") {
            vars.insert(vars::HTTPS.to_owned(), "on".to_owned());
        }

        for name in parts.headers.keys() {
            let separator = if name == http::header::COOKIE { "; " } else { ", " };
            let value = parts
                .headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(separator);
            vars.insert(header_var(name.as_str()), value);
        }

        let body = if body.is_empty() {
            BodySource::Absent
        } else {
            BodySource::Stream(Box::new(Cursor::new(body)))
        };

        let mut req = Self::from_vars(vars, body, IndexMap::new());
        req.extensions = parts.extensions;
        req
    }

    fn from_vars(
        mut vars: IndexMap<String, String>,
        body: BodySource,
        files: IndexMap<String, UploadedFile>,
    ) -> Self {
        let uri = vars.get(vars::REQUEST_URI).cloned().unwrap_or_else(|| "/".to_owned());
        let (path, query_string) = match uri.split_once('?') {
            Some((path, qs)) => (path, Some(qs)),
            None => (uri.as_str(), None),
        };
        let path = path.split('#').next().unwrap_or_default();
        vars.insert(vars::REQUEST_URI_PATH.to_owned(), path.to_owned());
        if let Some(qs) = query_string {
            vars.entry(vars::QUERY_STRING.to_owned()).or_insert_with(|| qs.to_owned());
        }

        let mut headers = IndexMap::new();
        for (key, value) in &vars {
            let name = match key.as_str() {
                vars::CONTENT_TYPE | vars::CONTENT_LENGTH => key.as_str(),
                _ => match key.strip_prefix("HTTP_") {
                    Some(name) => name,
                    None => continue,
                },
            };
            headers.insert(name.replace('_', "-").to_ascii_lowercase(), value.clone());
        }

        let encrypted = vars
            .get(vars::HTTPS)
            .is_some_and(|v| !v.is_empty() && !v.eq_ignore_ascii_case("off"));

        let query = vars.get(vars::QUERY_STRING).map(|qs| parse_urlencoded(qs)).unwrap_or_default();

        let mut cookies = IndexMap::new();
        if let Some(header) = vars.get(vars::HTTP_COOKIE) {
            for (name, value) in cookie::parse_header(header) {
                cookies.entry(name).or_insert(value);
            }
        }

        let mut req = Self {
            original_vars: vars.clone(),
            vars,
            headers,
            query,
            form: IndexMap::new(),
            files,
            cookies,
            body,
            encrypted,
            route_args: IndexMap::new(),
            extensions: http::Extensions::new(),
            output: Output::default(),
            deferred: Vec::new(),
        };

        let is_form = req.method() == "POST"
            && req.header(vars::CONTENT_TYPE).is_ok_and(|ct| ct.starts_with(FORM_URLENCODED));
        if is_form {
            req.form = match req.body() {
                Ok(Some(text)) => parse_urlencoded(text),
                Ok(None) => IndexMap::new(),
                Err(e) => {
                    tracing::debug!("unreadable form body: {e}");
                    IndexMap::new()
                }
            };
        }
        req
    }

    // ── Core properties ───────────────────────────────────────────────────────

    /// The request method as sent, e.g. `"GET"`. Empty when unknown.
    pub fn method(&self) -> &str {
        self.vars.get(vars::REQUEST_METHOD).map_or("", String::as_str)
    }

    /// The request path without the query string.
    pub fn path(&self) -> &str {
        self.vars.get(vars::REQUEST_URI_PATH).map_or("/", String::as_str)
    }

    /// The path with the query string, as sent.
    pub fn uri(&self) -> &str {
        self.vars.get(vars::REQUEST_URI).map_or("/", String::as_str)
    }

    /// `true` when the request arrived over TLS.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    // ── Headers ───────────────────────────────────────────────────────────────

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(&header_key(name))
    }

    /// Case-insensitive header lookup; `_` and `-` are interchangeable.
    pub fn header(&self, name: &str) -> Result<&str, Error> {
        self.headers
            .get(&header_key(name))
            .map(String::as_str)
            .ok_or_else(|| unknown(Namespace::Header, name))
    }

    pub fn all_headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    // ── Query / form / cookies ────────────────────────────────────────────────

    pub fn has_query(&self, name: &str) -> bool {
        self.query.contains_key(name)
    }

    pub fn query(&self, name: &str) -> Result<&str, Error> {
        lookup(&self.query, Namespace::Query, name)
    }

    pub fn all_query(&self) -> &IndexMap<String, String> {
        &self.query
    }

    pub fn has_form_field(&self, name: &str) -> bool {
        self.form.contains_key(name)
    }

    pub fn form_field(&self, name: &str) -> Result<&str, Error> {
        lookup(&self.form, Namespace::Form, name)
    }

    pub fn all_form_fields(&self) -> &IndexMap<String, String> {
        &self.form
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        self.cookies.contains_key(name)
    }

    pub fn cookie(&self, name: &str) -> Result<&str, Error> {
        lookup(&self.cookies, Namespace::Cookie, name)
    }

    pub fn all_cookies(&self) -> &IndexMap<String, String> {
        &self.cookies
    }

    // ── Uploaded files ────────────────────────────────────────────────────────

    pub fn has_file(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn file(&self, name: &str) -> Result<&UploadedFile, Error> {
        self.files.get(name).ok_or_else(|| unknown(Namespace::File, name))
    }

    pub fn all_files(&self) -> &IndexMap<String, UploadedFile> {
        &self.files
    }

    pub fn file_name(&self, name: &str) -> Result<&str, Error> {
        self.file(name).map(|f| f.name.as_str())
    }

    pub fn file_type(&self, name: &str) -> Result<&str, Error> {
        self.file(name).map(|f| f.content_type.as_str())
    }

    pub fn file_size(&self, name: &str) -> Result<u64, Error> {
        self.file(name).map(|f| f.size)
    }

    pub fn file_tmp_path(&self, name: &str) -> Result<&Path, Error> {
        self.file(name).map(|f| f.tmp_path.as_path())
    }

    pub fn file_error(&self, name: &str) -> Result<u32, Error> {
        self.file(name).map(|f| f.error)
    }

    // ── Vars ──────────────────────────────────────────────────────────────────

    pub fn has_var(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn var(&self, name: &str) -> Result<&str, Error> {
        lookup(&self.vars, Namespace::Var, name)
    }

    pub fn all_vars(&self) -> &IndexMap<String, String> {
        &self.vars
    }

    /// Sets a var. The original snapshot is not affected.
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn remove_var(&mut self, name: &str) -> Option<String> {
        self.vars.shift_remove(name)
    }

    pub fn has_original_var(&self, name: &str) -> bool {
        self.original_vars.contains_key(name)
    }

    /// A var as it was when the request was constructed.
    pub fn original_var(&self, name: &str) -> Result<&str, Error> {
        lookup(&self.original_vars, Namespace::Var, name)
    }

    pub fn all_original_vars(&self) -> &IndexMap<String, String> {
        &self.original_vars
    }

    // ── Route parameters ──────────────────────────────────────────────────────

    pub fn has_param(&self, name: &str) -> bool {
        self.route_args.contains_key(name)
    }

    /// A named parameter of the matched route.
    ///
    /// For a route `/users/:id`, `req.param("id")` on `/users/42` is `"42"`.
    pub fn param(&self, name: &str) -> Result<&str, Error> {
        lookup(&self.route_args, Namespace::Param, name)
    }

    /// Every parameter of the matched route, in pattern order.
    pub fn route_args(&self) -> &IndexMap<String, String> {
        &self.route_args
    }

    pub(crate) fn set_route_args(&mut self, args: IndexMap<String, String>) {
        self.route_args = args;
    }

    // ── Body ──────────────────────────────────────────────────────────────────

    pub fn has_body(&self) -> bool {
        !matches!(self.body, BodySource::Absent)
    }

    /// The request body as text.
    ///
    /// The underlying stream is read on the first call only; later calls
    /// return the buffered copy.
    pub fn body(&mut self) -> Result<Option<&str>, Error> {
        if let BodySource::Stream(reader) = &mut self.body {
            let mut text = String::new();
            reader.read_to_string(&mut text)?;
            self.body = BodySource::Buffered(text);
        }
        Ok(match &self.body {
            BodySource::Buffered(text) => Some(text.as_str()),
            _ => None,
        })
    }

    // ── Request-scoped state ──────────────────────────────────────────────────

    pub fn extensions(&self) -> &http::Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut http::Extensions {
        &mut self.extensions
    }

    /// The raw output sink. See [`Output`].
    pub fn output(&mut self) -> &mut Output {
        &mut self.output
    }

    pub(crate) fn take_output(&mut self) -> Option<String> {
        if self.output.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.output.0);
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Adds an after-middleware for this request only.
    ///
    /// It is sorted together with the application's afters when the after
    /// stage starts, so a before-middleware or handler can still influence
    /// what runs after it.
    pub fn after(&mut self, after: impl After, options: Options) {
        self.deferred.push(Entry { middleware: std::sync::Arc::new(after), options });
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<Entry<BoxedAfter>> {
        std::mem::take(&mut self.deferred)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method())
            .field("uri", &self.uri())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn lookup<'a>(map: &'a IndexMap<String, String>, namespace: Namespace, name: &str) -> Result<&'a str, Error> {
    map.get(name).map(String::as_str).ok_or_else(|| unknown(namespace, name))
}

fn unknown(namespace: Namespace, name: &str) -> Error {
    Error::UnknownField { namespace, name: name.to_owned() }
}

fn header_key(name: &str) -> String {
    name.replace('_', "-").to_ascii_lowercase()
}

/// `content-type` → `CONTENT_TYPE`, `x-trace` → `HTTP_X_TRACE`.
fn header_var(name: &str) -> String {
    let upper = name.replace('-', "_").to_ascii_uppercase();
    match upper.as_str() {
        vars::CONTENT_TYPE | vars::CONTENT_LENGTH => upper,
        _ => format!("HTTP_{upper}"),
    }
}

/// Later duplicates replace earlier ones; malformed input yields nothing.
fn parse_urlencoded(input: &str) -> IndexMap<String, String> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(input)
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Assembles a [`Request`] from parts. Defaults to `GET / HTTP/1.1`.
pub struct RequestBuilder {
    vars: IndexMap<String, String>,
    body: BodySource,
    files: IndexMap<String, UploadedFile>,
}

impl RequestBuilder {
    fn new() -> Self {
        let mut vars = IndexMap::new();
        vars.insert(vars::REQUEST_METHOD.to_owned(), "GET".to_owned());
        vars.insert(vars::REQUEST_URI.to_owned(), "/".to_owned());
        vars.insert(vars::SERVER_PROTOCOL.to_owned(), "HTTP/1.1".to_owned());
        Self { vars, body: BodySource::Absent, files: IndexMap::new() }
    }

    pub fn method(self, method: impl Into<String>) -> Self {
        self.var(vars::REQUEST_METHOD, method)
    }

    /// Path plus optional query string.
    pub fn uri(self, uri: impl Into<String>) -> Self {
        self.var(vars::REQUEST_URI, uri)
    }

    pub fn protocol(self, protocol: impl Into<String>) -> Self {
        self.var(vars::SERVER_PROTOCOL, protocol)
    }

    pub fn header(self, name: &str, value: impl Into<String>) -> Self {
        let var = header_var(name);
        self.var(var, value)
    }

    /// Sets any server variable, e.g. `HTTPS` or `REMOTE_ADDR`.
    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = BodySource::Buffered(body.into());
        self
    }

    /// A body read lazily on first access.
    pub fn body_reader(mut self, reader: impl Read + Send + 'static) -> Self {
        self.body = BodySource::Stream(Box::new(reader));
        self
    }

    pub fn file(mut self, field: impl Into<String>, file: UploadedFile) -> Self {
        self.files.insert(field.into(), file);
        self
    }

    pub fn build(self) -> Request {
        Request::from_vars(self.vars, self.body, self.files)
    }
}
