//! Application settings.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `ARBOR_*` environment variables. Later layers win.
//!
//! ```toml
//! debug = true
//! auto_reason = true
//! allow_empty_response = false
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! max_body_bytes = 1048576
//!
//! [session]
//! cookie_name = "APPSESSID"
//! cache_limiter = "private"
//! ```
//!
//! | Variable | Field |
//! |---|---|
//! | `ARBOR_DEBUG` | `debug` |
//! | `ARBOR_AUTO_REASON` | `auto_reason` |
//! | `ARBOR_ALLOW_EMPTY_RESPONSE` | `allow_empty_response` |
//! | `ARBOR_BIND` | `server.bind` |
//! | `ARBOR_MAX_BODY_BYTES` | `server.max_body_bytes` |
//! | `ARBOR_SESSION_COOKIE_NAME` | `session.cookie_name` |

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::session::SessionOptions;

/// Everything an [`App`](crate::App) and its server can be configured with.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Show failure details in 500 bodies.
    pub debug: bool,
    /// Fill in a missing reason phrase from the status table.
    pub auto_reason: bool,
    /// Accept handlers that return an empty literal body.
    pub allow_empty_response: bool,
    pub server: ServerSettings,
    pub session: SessionOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            auto_reason: true,
            allow_empty_response: false,
            server: ServerSettings::default(),
            session: SessionOptions::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// `host:port` to listen on.
    pub bind: String,
    /// Largest request body accepted; bigger ones get a 413.
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_owned(), max_body_bytes: 8 * 1024 * 1024 }
    }
}

impl Settings {
    pub const ENV_PREFIX: &'static str = "ARBOR_";

    /// Parses TOML. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        let settings: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads `path`, then applies the process environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed reading {}: {e}", path.display())))?;
        Self::from_toml_str(&content)?.apply_env(std::env::vars())
    }

    /// Defaults plus the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::default().apply_env(std::env::vars())
    }

    /// Applies `ARBOR_*` overrides from `vars`. Other variables are ignored.
    pub fn apply_env<I>(mut self, vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(Self::ENV_PREFIX) else {
                continue;
            };
            match name {
                "DEBUG" => self.debug = parse_bool(&key, &value)?,
                "AUTO_REASON" => self.auto_reason = parse_bool(&key, &value)?,
                "ALLOW_EMPTY_RESPONSE" => self.allow_empty_response = parse_bool(&key, &value)?,
                "BIND" => self.server.bind = value,
                "MAX_BODY_BYTES" => {
                    self.server.max_body_bytes = value
                        .parse()
                        .map_err(|_| Error::Config(format!("{key}: expected a byte count, got `{value}`")))?;
                }
                "SESSION_COOKIE_NAME" => self.session.cookie_name = value,
                _ => tracing::debug!(%key, "ignoring unknown setting"),
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.bind_addr()?;
        if self.server.max_body_bytes == 0 {
            return Err(Error::Config("server.max_body_bytes must be positive".to_owned()));
        }
        self.session.validate()
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, Error> {
        self.server
            .bind
            .parse()
            .map_err(|_| Error::Config(format!("invalid bind address: {}", self.server.bind)))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{key}: expected a boolean, got `{value}`"))),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::session::CacheLimiter;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert!(!settings.debug);
        assert!(settings.auto_reason);
        assert!(!settings.allow_empty_response);
        assert_eq!(settings.server.bind, "0.0.0.0:3000");
        assert_eq!(settings.server.max_body_bytes, 8 * 1024 * 1024);
        assert_eq!(settings.session.cookie_name, "ASESSID");
    }

    #[test]
    fn toml_overrides_only_what_it_names() {
        let settings = Settings::from_toml_str(
            r#"
            debug = true
            [session]
            cache_limiter = "private_no_expire"
            "#,
        )
        .unwrap();
        assert!(settings.debug);
        assert!(settings.auto_reason);
        assert_eq!(settings.session.cache_limiter, CacheLimiter::PrivateNoExpire);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(matches!(Settings::from_toml_str("debug = 3"), Err(Error::Config(_))));
        assert!(Settings::from_toml_str("[session]\ncache_limiter = \"sometimes\"").is_err());
        assert!(Settings::from_toml_str("[session]\ncookie_name = \"sid\"").is_err());
        assert!(Settings::from_toml_str("[server]\nbind = \"nowhere\"").is_err());
        assert!(Settings::from_toml_str("[server]\nmax_body_bytes = 0").is_err());
    }

    #[test]
    fn env_wins_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "debug = true\n[server]\nbind = \"127.0.0.1:9000\"").unwrap();

        let settings = Settings::load(file.path())
            .unwrap()
            .apply_env(env(&[("ARBOR_DEBUG", "off"), ("ARBOR_BIND", "127.0.0.1:9001"), ("HOME", "/root")]))
            .unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.bind_addr().unwrap().port(), 9001);
    }

    #[test]
    fn malformed_bool_is_rejected() {
        let err = Settings::default().apply_env(env(&[("ARBOR_AUTO_REASON", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("ARBOR_AUTO_REASON"));
    }

    #[test]
    fn body_limit_comes_from_env() {
        let settings = Settings::default().apply_env(env(&[("ARBOR_MAX_BODY_BYTES", "1024")])).unwrap();
        assert_eq!(settings.server.max_body_bytes, 1024);
        assert!(Settings::default().apply_env(env(&[("ARBOR_MAX_BODY_BYTES", "lots")])).is_err());
    }
}
