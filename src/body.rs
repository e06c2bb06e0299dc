//! Response bodies.
//!
//! A body is exactly one of: nothing, literal text, or a [`BodyProducer`]
//! that writes its bytes at transmission time. Producers may also announce
//! headers (content type, length) which are merged into the response the
//! moment the producer is set as its body.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::Context as _;
use serde::Serialize;

use crate::error::Error;

/// The body of a [`Response`](crate::Response).
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Producer(Box<dyn BodyProducer>),
}

impl Body {
    /// Wraps a closure as a streaming body.
    ///
    /// ```rust
    /// use std::io::Write;
    /// use arbor::{Body, Response};
    ///
    /// let mut res = Response::new();
    /// res.set_body(Body::stream(|out| {
    ///     for chunk in ["a", "b", "c"] {
    ///         out.write_all(chunk.as_bytes())?;
    ///     }
    ///     Ok(())
    /// }));
    /// ```
    pub fn stream<F>(f: F) -> Self
    where
        F: FnOnce(&mut dyn Write) -> anyhow::Result<()> + Send + 'static,
    {
        Self::Producer(Box::new(StreamBody(Box::new(f))))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.is_empty(),
            Self::Producer(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl<P: BodyProducer + 'static> From<P> for Body {
    fn from(producer: P) -> Self {
        Self::Producer(Box::new(producer))
    }
}

/// Primitive values become bodies only when they are text or null; anything
/// else is rejected rather than sent.
impl TryFrom<serde_json::Value> for Body {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        match value {
            Value::Null => Ok(Self::Empty),
            Value::String(text) => Ok(Self::Text(text)),
            Value::Bool(_) => Err(Error::InvalidBody("boolean")),
            Value::Number(_) => Err(Error::InvalidBody("number")),
            Value::Array(_) => Err(Error::InvalidBody("array")),
            Value::Object(_) => Err(Error::InvalidBody("object")),
        }
    }
}

/// A body that writes itself at transmission time.
///
/// A failure returned from [`send`](BodyProducer::send) happens after the
/// status line and headers are committed, so it aborts the request instead
/// of producing another response.
pub trait BodyProducer: Send {
    /// Headers sent ahead of the body.
    fn headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn send(self: Box<Self>, out: &mut dyn Write) -> anyhow::Result<()>;
}

type StreamFn = Box<dyn FnOnce(&mut dyn Write) -> anyhow::Result<()> + Send>;

struct StreamBody(StreamFn);

impl BodyProducer for StreamBody {
    fn send(self: Box<Self>, out: &mut dyn Write) -> anyhow::Result<()> {
        (self.0)(out)
    }
}

/// A pre-serialized JSON document.
pub struct JsonBody {
    json: Vec<u8>,
}

impl JsonBody {
    pub fn new<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        Ok(Self { json: serde_json::to_vec(value)? })
    }
}

impl BodyProducer for JsonBody {
    fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("content-type".to_owned(), "application/json; charset=utf-8".to_owned()),
            ("content-length".to_owned(), self.json.len().to_string()),
        ]
    }

    fn send(self: Box<Self>, out: &mut dyn Write) -> anyhow::Result<()> {
        out.write_all(&self.json)?;
        Ok(())
    }
}

/// Streams a file from disk in fixed-size chunks.
///
/// The file is opened at transmission time; a missing file is a
/// transmission failure, not a 404.
pub struct FileBody {
    path: PathBuf,
    chunk_size: usize,
}

impl FileBody {
    pub const DEFAULT_CHUNK_SIZE: usize = 8192;

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), chunk_size: Self::DEFAULT_CHUNK_SIZE }
    }

    /// A zero chunk size falls back to the default.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = if size == 0 { Self::DEFAULT_CHUNK_SIZE } else { size };
        self
    }
}

impl BodyProducer for FileBody {
    fn send(self: Box<Self>, out: &mut dyn Write) -> anyhow::Result<()> {
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed opening file path: {}", self.path.display()))?;
        let mut buf = vec![0; self.chunk_size];
        loop {
            let n = match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            out.write_all(&buf[..n])?;
            out.flush()?;
        }
        Ok(())
    }
}
