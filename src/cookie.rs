//! `Set-Cookie` rendering and `Cookie` header parsing.

use std::fmt;

/// An outgoing cookie, rendered as one `Set-Cookie` header line.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    /// Lifetime in seconds. `None` makes a session cookie.
    pub max_age: Option<u64>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), ..Self::default() }
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(domain) = self.domain.as_deref().filter(|d| !d.is_empty()) {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            write!(f, "; Path={path}")?;
        }
        if let Some(age) = self.max_age {
            write!(f, "; Max-Age={age}")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        Ok(())
    }
}

/// Splits a `Cookie:` request header into `(name, value)` pairs.
///
/// Malformed pairs (no `=`) are skipped. Later duplicates are kept; the
/// caller decides which one wins.
pub(crate) fn parse_header(header: &str) -> impl Iterator<Item = (String, String)> + '_ {
    header.split(';').filter_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some((name.to_owned(), value.trim().trim_matches('"').to_owned()))
    })
}
