//! Where a finished response goes.
//!
//! The pipeline emits a response as a status line, header lines and body
//! bytes through a [`Transport`]. Status and headers stay buffered until the
//! body is requested; from then on they count as sent and can no longer be
//! replaced, which is what the last-resort 500 checks for.
//!
//! [`BufferedTransport`] captures everything in memory. The server converts
//! the capture into a hyper response; tests inspect it directly.

use std::io::Write;

use bytes::Bytes;
use http_body_util::Full;

use crate::error::Error;

/// Sink for one outgoing response.
pub trait Transport {
    /// `true` once the body has been requested.
    fn headers_sent(&self) -> bool;

    /// Sets the status line. Ignored once headers are sent.
    fn send_status(&mut self, protocol: &str, status: u16, reason: &str);

    /// Queues one header line. Ignored once headers are sent.
    fn send_header(&mut self, name: &str, value: &str);

    /// Drops every queued header line.
    fn clear_headers(&mut self);

    /// Commits status and headers and returns the body sink.
    fn body(&mut self) -> &mut dyn Write;
}

/// A [`Transport`] that keeps the whole response in memory.
pub struct BufferedTransport {
    protocol: String,
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    committed: bool,
}

impl BufferedTransport {
    pub fn new() -> Self {
        Self {
            protocol: "HTTP/1.1".to_owned(),
            status: 200,
            reason: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
            committed: false,
        }
    }

    pub fn finish(self) -> Captured {
        Captured {
            protocol: self.protocol,
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Default for BufferedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for BufferedTransport {
    fn headers_sent(&self) -> bool {
        self.committed
    }

    fn send_status(&mut self, protocol: &str, status: u16, reason: &str) {
        if self.committed {
            return;
        }
        protocol.clone_into(&mut self.protocol);
        self.status = status;
        reason.clone_into(&mut self.reason);
    }

    fn send_header(&mut self, name: &str, value: &str) {
        if !self.committed {
            self.headers.push((name.to_owned(), value.to_owned()));
        }
    }

    fn clear_headers(&mut self) {
        if !self.committed {
            self.headers.clear();
        }
    }

    fn body(&mut self) -> &mut dyn Write {
        self.committed = true;
        &mut self.body
    }
}

/// A response as it went out.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Captured {
    pub protocol: String,
    pub status: u16,
    pub reason: String,
    /// Header lines in emission order; multi-valued headers repeat.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Captured {
    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Renders HTTP/1.x wire bytes, adding `content-length` when absent.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(self.protocol.as_bytes());
        out.extend_from_slice(format!(" {}", self.status).as_bytes());
        if !self.reason.is_empty() {
            out.push(b' ');
            out.extend_from_slice(self.reason.as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        if self.header("content-length").is_none() {
            out.extend_from_slice(format!("content-length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Converts into a hyper-ready response. A non-standard reason phrase is
    /// kept through hyper's `ReasonPhrase` extension.
    pub fn into_http(self) -> Result<http::Response<Full<Bytes>>, Error> {
        let mut builder = http::Response::builder().status(self.status);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let canonical = http::StatusCode::from_u16(self.status).ok().and_then(|s| s.canonical_reason());
        if !self.reason.is_empty() && canonical != Some(self.reason.as_str()) {
            if let Ok(reason) = hyper::ext::ReasonPhrase::try_from(self.reason.as_bytes()) {
                builder = builder.extension(reason);
            }
        }
        Ok(builder.body(Full::new(Bytes::from(self.body)))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BufferedTransport {
        let mut transport = BufferedTransport::new();
        transport.send_status("HTTP/1.0", 201, "Created");
        transport.send_header("x-a", "1");
        transport.send_header("set-cookie", "a=1");
        transport.send_header("set-cookie", "b=2");
        transport
    }

    #[test]
    fn headers_freeze_once_the_body_starts() {
        let mut transport = sample();
        assert!(!transport.headers_sent());
        transport.body().write_all(b"hi").unwrap();
        assert!(transport.headers_sent());

        transport.send_status("HTTP/1.1", 500, "Internal Server Error");
        transport.clear_headers();

        let captured = transport.finish();
        assert_eq!(captured.status, 201);
        assert_eq!(captured.header_values("Set-Cookie"), ["a=1", "b=2"]);
        assert_eq!(captured.body_text(), "hi");
    }

    #[test]
    fn wire_format_adds_content_length() {
        let mut transport = sample();
        transport.body().write_all(b"hello").unwrap();
        let wire = String::from_utf8(transport.finish().to_wire()).unwrap();
        assert_eq!(
            wire,
            "HTTP/1.0 201 Created\r\nx-a: 1\r\nset-cookie: a=1\r\nset-cookie: b=2\r\ncontent-length: 5\r\n\r\nhello"
        );
    }

    #[test]
    fn converts_to_an_http_response() {
        let mut transport = sample();
        transport.send_status("HTTP/1.1", 234, "Custom Reason");
        transport.body().write_all(b"zanzibar!").unwrap();

        let res = transport.finish().into_http().unwrap();
        assert_eq!(res.status().as_u16(), 234);
        assert_eq!(res.headers().get_all("set-cookie").iter().count(), 2);
        assert!(res.extensions().get::<hyper::ext::ReasonPhrase>().is_some());
    }
}
