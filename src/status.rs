//! HTTP status codes and the status → reason-phrase table.
//!
//! [`Status`] is a thin wrapper over the numeric code, so handlers can send
//! non-standard codes (`Status::new(234)`) while the common ones stay named:
//!
//! ```rust
//! use arbor::{Response, Status};
//!
//! let mut res = Response::status(Status::NO_CONTENT);
//! res.set_status(Status::new(234));
//! assert_eq!(res.status_code(), 234);
//! assert_eq!(Status::NOT_FOUND.reason(), Some("Not Found"));
//! ```

use std::fmt;

/// An HTTP status code.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Status(u16);

impl Status {
    pub const OK: Self                    = Self(200);
    pub const CREATED: Self               = Self(201);
    pub const ACCEPTED: Self              = Self(202);
    pub const NO_CONTENT: Self            = Self(204);
    pub const MOVED_PERMANENTLY: Self     = Self(301);
    pub const FOUND: Self                 = Self(302);
    pub const SEE_OTHER: Self             = Self(303);
    pub const NOT_MODIFIED: Self          = Self(304);
    pub const TEMPORARY_REDIRECT: Self    = Self(307);
    pub const BAD_REQUEST: Self           = Self(400);
    pub const UNAUTHORIZED: Self          = Self(401);
    pub const FORBIDDEN: Self             = Self(403);
    pub const NOT_FOUND: Self             = Self(404);
    pub const METHOD_NOT_ALLOWED: Self    = Self(405);
    pub const CONFLICT: Self              = Self(409);
    pub const UNPROCESSABLE_CONTENT: Self = Self(422);
    pub const TOO_MANY_REQUESTS: Self     = Self(429);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    pub const NOT_IMPLEMENTED: Self       = Self(501);
    pub const BAD_GATEWAY: Self           = Self(502);
    pub const SERVICE_UNAVAILABLE: Self   = Self(503);

    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    pub const fn code(self) -> u16 {
        self.0
    }

    /// `true` for 4xx and 5xx codes, the ones error modifiers apply to.
    pub const fn is_error(self) -> bool {
        self.0 >= 400
    }

    /// Standard reason phrase, or `None` for unregistered codes.
    pub fn reason(self) -> Option<&'static str> {
        let phrase = reason_phrase(self.0);
        (!phrase.is_empty()).then_some(phrase)
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::OK
    }
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<Status> for u16 {
    fn from(s: Status) -> u16 {
        s.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        103 => "Early Hints",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",
        226 => "IM Used",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Content Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        418 => "I'm a Teapot",
        421 => "Misdirected Request",
        422 => "Unprocessable Content",
        423 => "Locked",
        424 => "Failed Dependency",
        425 => "Too Early",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        451 => "Unavailable For Legal Reasons",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        510 => "Not Extended",
        511 => "Network Authentication Required",
        _   => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_reasons() {
        assert_eq!(Status::OK.reason(), Some("OK"));
        assert_eq!(Status::METHOD_NOT_ALLOWED.reason(), Some("Method Not Allowed"));
        assert_eq!(Status::new(599).reason(), None);
    }

    #[test]
    fn error_range_starts_at_400() {
        assert!(!Status::new(399).is_error());
        assert!(Status::BAD_REQUEST.is_error());
        assert!(Status::INTERNAL_SERVER_ERROR.is_error());
    }
}
