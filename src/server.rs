//! HTTP server and graceful shutdown.
//!
//! Each request body is collected in full, up to
//! [`ServerSettings::max_body_bytes`](crate::ServerSettings::max_body_bytes)
//! (larger bodies are answered with `413` without running the pipeline),
//! then the pipeline runs on
//! tokio's blocking pool: the pipeline is synchronous, so one slow handler
//! occupies one blocking thread and never stalls the accept loop.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or **Ctrl-C** the server:
//! 1. stops accepting new connections,
//! 2. lets every in-flight connection finish,
//! 3. returns from [`Server::serve`].

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body as HttpBody, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::app::App;
use crate::config::{ServerSettings, Settings};
use crate::error::Error;
use crate::request::Request;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    max_body_bytes: usize,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust
    /// use arbor::Server;
    /// let server = Server::bind("0.0.0.0:3000").unwrap();
    /// assert!(Server::bind("not an address").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr
            .parse()
            .map_err(|_| Error::Config(format!("invalid bind address: {addr}")))?;
        Ok(Self { addr, max_body_bytes: ServerSettings::default().max_body_bytes })
    }

    /// Caps the request body size. Zero is treated as one byte.
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit.max(1);
        self
    }

    /// Binds to `settings.server.bind`.
    pub fn from_settings(settings: &Settings) -> Result<Self, Error> {
        Ok(Self { addr: settings.bind_addr()?, max_body_bytes: settings.server.max_body_bytes })
    }

    /// Starts accepting connections and running them through `app`.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(self, app: App) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let app = Arc::new(app);

        info!(addr = %self.addr, "arbor listening");

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown first, so a signal stops accepting even under load.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let limit = self.max_body_bytes;
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| dispatch(Arc::clone(&app), req, remote_addr, limit));

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("arbor stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the pipeline.
///
/// An error here means the response could not be completed; hyper then
/// aborts the connection instead of sending a truncated response.
async fn dispatch(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    limit: usize,
) -> Result<http::Response<Full<Bytes>>, Error> {
    let (parts, body) = req.into_parts();
    let Some(body) = read_body(body, limit).await? else {
        warn!(peer = %remote_addr, limit, "request body too large");
        return Ok(http::Response::builder()
            .status(http::StatusCode::PAYLOAD_TOO_LARGE)
            .header("content-type", "text/plain; charset=utf-8")
            .body(Full::new(Bytes::from_static(b"Payload Too Large")))?);
    };
    let req = Request::from_http(parts, body, Some(remote_addr));

    let captured = tokio::task::spawn_blocking(move || app.handle(req))
        .await
        .map_err(|e| Error::Transmission(e.into()))??;
    captured.into_http()
}

/// Collects at most `limit` bytes. `None` means the body was larger.
async fn read_body<B>(body: B, limit: usize) -> Result<Option<Bytes>, Error>
where
    B: HttpBody,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(Some(collected.to_bytes())),
        Err(e) if e.is::<LengthLimitError>() => Ok(None),
        Err(e) => Err(Error::Transmission(anyhow::anyhow!(e))),
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. A handler that cannot be
/// installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bodies_over_the_limit_are_refused() {
        let body = Full::new(Bytes::from_static(b"hello world"));
        assert_eq!(read_body(body.clone(), 64).await.unwrap(), Some(Bytes::from_static(b"hello world")));
        assert_eq!(read_body(body, 5).await.unwrap(), None);
    }

    #[test]
    fn body_limit_follows_settings() {
        let mut settings = Settings::default();
        settings.server.max_body_bytes = 10;
        assert_eq!(Server::from_settings(&settings).unwrap().max_body_bytes, 10);
        assert_eq!(Server::bind("127.0.0.1:0").unwrap().max_body_bytes(0).max_body_bytes, 1);
    }
}
