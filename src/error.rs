//! Unified error type.
//!
//! Application-level outcomes (404, 405, a handler's own 422) are expressed as
//! [`Response`](crate::Response) values. [`Error`] covers everything the
//! pipeline has to *convert* into a response (injection failures, uncaught
//! handler failures, stray output) plus the infrastructure failures that
//! cannot be converted at all (transmission, binding a socket).

use std::fmt;

use thiserror::Error;

/// Shorthand for results carrying an [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by arbor's fallible operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A handler or middleware argument could not be bound.
    #[error("{context} injection failure: {source}")]
    Injection {
        context: &'static str,
        #[source]
        source: InjectionError,
    },

    /// A user callable returned an error.
    #[error("{context} threw an uncaught error: {source}")]
    Uncaught {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A user callable panicked.
    #[error("{context} panicked: {message}")]
    Panic { context: &'static str, message: String },

    /// Raw output was written outside the response object.
    #[error("unexpected output: {0}")]
    StrayOutput(String),

    /// An error modifier itself failed while customizing an error response.
    #[error("error modifier for status {status} failed: {source}")]
    ErrorModifier {
        status: u16,
        #[source]
        source: Box<Error>,
    },

    /// Writing a streaming body failed after the response was committed.
    #[error("transmission failed: {0}")]
    Transmission(#[source] anyhow::Error),

    #[error("unknown {namespace}: {name}")]
    UnknownField { namespace: Namespace, name: String },

    #[error("body must be a string, a body producer, or null; {0} provided")]
    InvalidBody(&'static str),

    #[error("empty primitive response")]
    EmptyResponse,

    /// The finished response cannot be put on the wire as built.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("invalid error status code: {0}")]
    InvalidErrorStatus(u16),

    #[error("unknown HTTP method: {0}")]
    UnknownMethod(String),

    #[error("invalid route `{path}`: {reason}")]
    Route { path: String, reason: String },

    #[error("config: {0}")]
    Config(String),

    #[error("session: {0}")]
    Session(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("http: {0}")]
    Http(#[from] http::Error),

    #[error("hyper: {0}")]
    Hyper(#[from] hyper::Error),
}

impl Error {
    /// Renders the error and every underlying cause, outermost first.
    pub fn detail(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            let text = err.to_string();
            // thiserror messages above already embed their direct source.
            if !out.ends_with(&text) {
                out.push_str(": ");
                out.push_str(&text);
            }
            cause = err.source();
        }
        out
    }
}

/// The lookup namespace an [`Error::UnknownField`] refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Namespace {
    Header,
    Query,
    Form,
    File,
    Cookie,
    Var,
    Param,
    Session,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Header  => "header field",
            Self::Query   => "query parameter",
            Self::Form    => "form field",
            Self::File    => "form file",
            Self::Cookie  => "cookie field",
            Self::Var     => "request variable",
            Self::Param   => "route parameter",
            Self::Session => "session field",
        })
    }
}

/// A handler argument that could not be resolved.
#[derive(Clone, Debug, Error)]
#[error("failed to inject {type_name}: {reason}")]
pub struct InjectionError {
    /// The type that could not be produced.
    pub type_name: &'static str,
    /// Why resolution failed.
    pub reason: String,
}

impl InjectionError {
    pub fn new<T: ?Sized>(reason: impl Into<String>) -> Self {
        Self { type_name: std::any::type_name::<T>(), reason: reason.into() }
    }

    pub fn not_registered<T: ?Sized>() -> Self {
        Self::new::<T>("service not registered")
    }
}
