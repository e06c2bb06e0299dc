//! Cookie-identified sessions.
//!
//! A [`Session`] is opened lazily: nothing touches the store until the first
//! read or write. [`Sessions`] wires sessions into an [`App`](crate::App):
//! it attaches one to every request and, through a request-scoped
//! after-middleware, saves it and emits `Set-Cookie` / `Cache-Control` once
//! the response exists.
//!
//! ```rust
//! use arbor::{App, Method, Request};
//! use arbor::session::{MemoryStore, SessionHandle, SessionOptions, Sessions};
//!
//! fn visit(_req: &mut Request, session: SessionHandle) -> arbor::Result<String> {
//!     let mut session = session.lock();
//!     let visits = session.get_as::<u64>("visits").unwrap_or(0) + 1;
//!     session.set("visits", visits)?;
//!     Ok(format!("visit #{visits}"))
//! }
//!
//! let mut app = App::new();
//! Sessions::new(SessionOptions::default(), MemoryStore::new())
//!     .unwrap()
//!     .install(&mut app);
//! app.route(Method::Get, "/", visit);
//! ```

mod middleware;
mod store;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use rand::{Rng, RngCore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cookie::Cookie;
use crate::error::{Error, Namespace};
use crate::request::Request;

pub use middleware::{SessionHandle, Sessions};
pub use store::{FileStore, MemoryStore, SessionStore};

/// The key/value content of one session.
pub type SessionData = IndexMap<String, Value>;

// ── Options ───────────────────────────────────────────────────────────────────

/// Which `Cache-Control` header a response that touched the session gets.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLimiter {
    #[default]
    Nocache,
    Private,
    PrivateNoExpire,
    Public,
}

impl CacheLimiter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nocache => "nocache",
            Self::Private => "private",
            Self::PrivateNoExpire => "private_no_expire",
            Self::Public => "public",
        }
    }

    /// The header value for a `max-age` of `expire_minutes`.
    pub fn header(self, expire_minutes: u64) -> String {
        let max_age = expire_minutes * 60;
        match self {
            Self::Nocache => "no-store, no-cache, must-revalidate".to_owned(),
            Self::Public => format!("public, max-age={max_age}"),
            Self::Private | Self::PrivateNoExpire => {
                format!("private, max-age={max_age}, pre-check={max_age}")
            }
        }
    }
}

impl FromStr for CacheLimiter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nocache" => Ok(Self::Nocache),
            "private" => Ok(Self::Private),
            "private_no_expire" => Ok(Self::PrivateNoExpire),
            "public" => Ok(Self::Public),
            _ => Err(Error::Session(format!("invalid session cache limiter value: {s}"))),
        }
    }
}

impl fmt::Display for CacheLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session behavior. Lives under `[session]` in the settings file.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Alphanumeric, at least 5 bytes.
    pub cookie_name: String,
    pub cookie_domain: String,
    pub cookie_path: String,
    pub cookie_secure: bool,
    pub cookie_http_only: bool,
    /// Cookie `Max-Age` in seconds; `0` for a browser-session cookie.
    pub cookie_lifetime: u64,
    /// When set, an incoming id is only honored if `Referer` equals this.
    pub check_referer: String,
    /// Random bytes hashed into a new session id.
    pub entropy_length: usize,
    pub cache_limiter: CacheLimiter,
    /// Minutes.
    pub cache_expire: u64,
    /// Garbage collection runs on close with probability
    /// `gc_probability / gc_divisor`.
    pub gc_probability: u32,
    pub gc_divisor: u32,
    /// Seconds a session may go unwritten before it expires.
    pub gc_max_lifetime: u64,
    /// Reject incoming ids the store does not know.
    pub strict: bool,
    /// Priority of the after-middleware that writes the cookie.
    pub priority: i32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cookie_name: "ASESSID".to_owned(),
            cookie_domain: String::new(),
            cookie_path: String::new(),
            cookie_secure: false,
            cookie_http_only: true,
            cookie_lifetime: 0,
            check_referer: String::new(),
            entropy_length: 1024,
            cache_limiter: CacheLimiter::Nocache,
            cache_expire: 180,
            gc_probability: 1,
            gc_divisor: 100,
            gc_max_lifetime: 1440,
            strict: true,
            priority: 20,
        }
    }
}

impl SessionOptions {
    pub fn validate(&self) -> Result<(), Error> {
        let name = &self.cookie_name;
        if name.len() < 5 {
            return Err(Error::Session(format!(
                "session cookie name must be at least 5 bytes: {name:?}"
            )));
        }
        if let Some(index) = name.bytes().position(|b| !b.is_ascii_alphanumeric()) {
            return Err(Error::Session(format!(
                "non-alphanumeric character in session cookie name at index {index}: {name:?}"
            )));
        }
        if self.entropy_length == 0 {
            return Err(Error::Session("session entropy length must be positive".to_owned()));
        }
        Ok(())
    }

    fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.gc_max_lifetime)
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// One request's view of a session.
pub struct Session {
    options: Arc<SessionOptions>,
    store: Arc<dyn SessionStore>,
    incoming_id: Option<String>,
    referer: Option<String>,
    id: Option<String>,
    data: SessionData,
    open: bool,
    needs_save: bool,
    altered: bool,
}

impl Session {
    /// Prepares a session for `req`. The store is not touched yet.
    pub fn new(req: &Request, options: Arc<SessionOptions>, store: Arc<dyn SessionStore>) -> Self {
        let incoming_id = req
            .cookie(&options.cookie_name)
            .ok()
            .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric()))
            .map(str::to_owned);
        let referer = req.header("referer").ok().map(str::to_owned);
        Self {
            options,
            store,
            incoming_id,
            referer,
            id: None,
            data: SessionData::new(),
            open: false,
            needs_save: false,
            altered: false,
        }
    }

    /// The session id, once one has been chosen.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn open(&mut self) -> Result<(), Error> {
        if self.open {
            return Ok(());
        }
        let id = match self.id.clone() {
            Some(id) => id,
            None => {
                let id = match self.existing_id()? {
                    Some(id) => id,
                    None => generate_id(self.options.entropy_length),
                };
                self.id = Some(id.clone());
                id
            }
        };
        self.data = self.store.read(&id)?;
        self.open = true;
        Ok(())
    }

    fn existing_id(&self) -> Result<Option<String>, Error> {
        let Some(id) = &self.incoming_id else {
            return Ok(None);
        };
        let check = &self.options.check_referer;
        if !check.is_empty() && self.referer.as_deref() != Some(check.as_str()) {
            return Ok(None);
        }
        if self.options.strict && !self.store.exists(id, self.options.max_lifetime())? {
            return Ok(None);
        }
        Ok(Some(id.clone()))
    }

    pub fn has(&mut self, field: &str) -> Result<bool, Error> {
        self.open()?;
        Ok(self.data.contains_key(field))
    }

    pub fn get(&mut self, field: &str) -> Result<&Value, Error> {
        self.open()?;
        self.data.get(field).ok_or_else(|| Error::UnknownField {
            namespace: Namespace::Session,
            name: field.to_owned(),
        })
    }

    /// [`get`](Self::get) deserialized into `T`.
    pub fn get_as<T: DeserializeOwned>(&mut self, field: &str) -> Result<T, Error> {
        let value = self.get(field)?.clone();
        Ok(serde_json::from_value(value)?)
    }

    pub fn all(&mut self) -> Result<&SessionData, Error> {
        self.open()?;
        Ok(&self.data)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Result<(), Error> {
        self.open()?;
        self.data.insert(field.into(), value.into());
        self.needs_save = true;
        self.altered = true;
        Ok(())
    }

    pub fn remove(&mut self, field: &str) -> Result<Option<Value>, Error> {
        self.open()?;
        let removed = self.data.shift_remove(field);
        if removed.is_some() {
            self.needs_save = true;
            self.altered = true;
        }
        Ok(removed)
    }

    /// Drops the current session and switches to a fresh id.
    pub fn regenerate(&mut self) -> Result<(), Error> {
        self.open()?;
        if let Some(old) = self.id.take() {
            self.store.destroy(&old)?;
        }
        self.data.clear();
        self.id = Some(generate_id(self.options.entropy_length));
        self.needs_save = true;
        self.altered = true;
        Ok(())
    }

    /// Writes pending changes to the store.
    pub fn save(&mut self) -> Result<(), Error> {
        if !self.needs_save {
            return Ok(());
        }
        self.open()?;
        if let Some(id) = &self.id {
            self.store.write(id, &self.data)?;
        }
        self.needs_save = false;
        Ok(())
    }

    /// Saves, then maybe collects garbage. A closed session reopens on the
    /// next access.
    pub fn close(&mut self) -> Result<(), Error> {
        if !self.open {
            return Ok(());
        }
        self.save()?;
        if gc_due(self.options.gc_probability, self.options.gc_divisor, &mut rand::thread_rng()) {
            tracing::debug!("collecting expired sessions");
            self.store.gc(self.options.max_lifetime())?;
        }
        self.open = false;
        Ok(())
    }

    /// `true` once the session was written to or regenerated.
    pub fn should_set_cookie(&self) -> bool {
        self.altered
    }

    /// The session cookie to send, if an id exists.
    pub fn cookie_elements(&self) -> Option<Cookie> {
        let id = self.id.as_ref()?;
        let options = &self.options;
        Some(Cookie {
            name: options.cookie_name.clone(),
            value: id.clone(),
            domain: Some(options.cookie_domain.clone()).filter(|d| !d.is_empty()),
            path: Some(options.cookie_path.clone()).filter(|p| !p.is_empty()),
            max_age: Some(options.cookie_lifetime).filter(|&l| l > 0),
            secure: options.cookie_secure,
            http_only: options.cookie_http_only,
        })
    }

    pub fn cache_control(&self) -> String {
        self.options.cache_limiter.header(self.options.cache_expire)
    }
}

/// Rolls for garbage collection with odds `probability / divisor`.
fn gc_due(probability: u32, divisor: u32, rng: &mut impl Rng) -> bool {
    probability > 0 && (probability >= divisor || rng.gen_range(0..divisor) < probability)
}

/// Hex SHA-256 of `entropy_length` random bytes.
fn generate_id(entropy_length: usize) -> String {
    let mut entropy = vec![0u8; entropy_length.max(1)];
    rand::thread_rng().fill_bytes(&mut entropy);
    hex::encode(Sha256::digest(&entropy))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_for(req: &Request, options: SessionOptions, store: &Arc<MemoryStore>) -> Session {
        let store: Arc<dyn SessionStore> = Arc::clone(store) as Arc<dyn SessionStore>;
        Session::new(req, Arc::new(options), store)
    }

    #[test]
    fn gc_odds_are_exact_fractions() {
        use rand::SeedableRng;

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let hits = (0..10_000).filter(|_| gc_due(2, 3, &mut rng)).count();
        assert!((6_200..7_100).contains(&hits), "{hits} hits");

        assert!(!gc_due(0, 100, &mut rng));
        assert!(gc_due(5, 5, &mut rng));
        assert!(gc_due(1, 0, &mut rng));
    }

    #[test]
    fn options_are_validated() {
        assert!(SessionOptions::default().validate().is_ok());
        let short = SessionOptions { cookie_name: "sid".into(), ..SessionOptions::default() };
        assert!(short.validate().is_err());
        let symbol = SessionOptions { cookie_name: "my-session".into(), ..SessionOptions::default() };
        assert!(symbol.validate().unwrap_err().to_string().contains("index 2"));
        assert!("hourly".parse::<CacheLimiter>().is_err());
    }

    #[test]
    fn ids_are_hex_sha256() {
        let id = generate_id(16);
        assert_eq!(id.len(), 64);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(id, generate_id(16));
    }

    #[test]
    fn opens_lazily_and_saves_on_close() {
        let store = Arc::new(MemoryStore::new());
        let req = Request::builder().build();
        let mut session = session_for(&req, SessionOptions::default(), &store);
        assert!(session.id().is_none());
        assert!(!session.should_set_cookie());

        session.set("user", "ann").unwrap();
        assert!(session.is_open());
        assert!(session.should_set_cookie());
        assert!(store.is_empty());

        session.close().unwrap();
        let id = session.id().unwrap().to_owned();
        assert_eq!(store.read(&id).unwrap()["user"], "ann");
    }

    #[test]
    fn known_cookie_resumes_the_session() {
        let store = Arc::new(MemoryStore::new());
        let mut data = SessionData::new();
        data.insert("user".into(), Value::from("bob"));
        store.write("abc123", &data).unwrap();

        let req = Request::builder().header("Cookie", "ASESSID=abc123").build();
        let mut session = session_for(&req, SessionOptions::default(), &store);
        assert_eq!(session.get("user").unwrap(), "bob");
        assert_eq!(session.id(), Some("abc123"));
        assert!(!session.should_set_cookie());
    }

    #[test]
    fn strict_mode_ignores_unknown_ids() {
        let store = Arc::new(MemoryStore::new());
        let req = Request::builder().header("Cookie", "ASESSID=forged").build();

        let mut strict = session_for(&req, SessionOptions::default(), &store);
        strict.open().unwrap();
        assert_ne!(strict.id(), Some("forged"));

        let lax = SessionOptions { strict: false, ..SessionOptions::default() };
        let mut lax = session_for(&req, lax, &store);
        lax.open().unwrap();
        assert_eq!(lax.id(), Some("forged"));
    }

    #[test]
    fn referer_check_gates_incoming_ids() {
        let store = Arc::new(MemoryStore::new());
        store.write("abc123", &SessionData::new()).unwrap();
        let options = SessionOptions {
            check_referer: "https://example.com/".into(),
            ..SessionOptions::default()
        };

        let foreign = Request::builder()
            .header("Cookie", "ASESSID=abc123")
            .header("Referer", "https://evil.test/")
            .build();
        let mut session = session_for(&foreign, options.clone(), &store);
        session.open().unwrap();
        assert_ne!(session.id(), Some("abc123"));

        let own = Request::builder()
            .header("Cookie", "ASESSID=abc123")
            .header("Referer", "https://example.com/")
            .build();
        let mut session = session_for(&own, options, &store);
        session.open().unwrap();
        assert_eq!(session.id(), Some("abc123"));
    }

    #[test]
    fn regenerate_destroys_the_old_session() {
        let store = Arc::new(MemoryStore::new());
        store.write("abc123", &SessionData::new()).unwrap();
        let req = Request::builder().header("Cookie", "ASESSID=abc123").build();
        let mut session = session_for(&req, SessionOptions::default(), &store);
        session.open().unwrap();

        session.regenerate().unwrap();
        assert!(store.is_empty());
        assert_ne!(session.id(), Some("abc123"));
        assert!(session.should_set_cookie());
    }

    #[test]
    fn gc_runs_when_probability_is_certain() {
        let store = Arc::new(MemoryStore::new());
        store.write("stale", &SessionData::new()).unwrap();
        let options = SessionOptions {
            gc_probability: 1,
            gc_divisor: 1,
            gc_max_lifetime: 0,
            ..SessionOptions::default()
        };
        let req = Request::builder().build();
        let mut session = session_for(&req, options, &store);
        std::thread::sleep(Duration::from_millis(5));
        session.open().unwrap();
        session.close().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn cookie_and_cache_control() {
        let store = Arc::new(MemoryStore::new());
        let req = Request::builder().build();
        let options = SessionOptions {
            cookie_path: "/".into(),
            cookie_lifetime: 3600,
            cache_limiter: CacheLimiter::Private,
            cache_expire: 1,
            ..SessionOptions::default()
        };
        let mut session = session_for(&req, options, &store);
        assert!(session.cookie_elements().is_none());
        session.set("k", 1).unwrap();

        let cookie = session.cookie_elements().unwrap();
        assert_eq!(cookie.name, "ASESSID");
        assert_eq!(cookie.path.as_deref(), Some("/"));
        assert_eq!(cookie.domain, None);
        assert_eq!(cookie.max_age, Some(3600));
        assert_eq!(session.cache_control(), "private, max-age=60, pre-check=60");
    }
}
