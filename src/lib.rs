//! # arbor
//!
//! A small HTTP application framework built around one guarantee: every
//! request produces exactly one well-formed response.
//!
//! ## The lifecycle
//!
//! 1. **Before-middleware** run in priority order. The first one that
//!    returns something short-circuits the request.
//! 2. The **router** picks a handler. Misses become `404`, wrong methods
//!    `405` with an `Allow` header, and `HEAD` falls back to `GET`.
//! 3. **After-middleware** adjust the response. A failing one replaces it
//!    with a `500`.
//! 4. Raw output written through [`Request::output`] instead of the
//!    response is treated as a bug and turned into a `500`.
//! 5. **Error modifiers** customize any `4xx`/`5xx`, then the response is
//!    sent.
//! 6. **Finalizers** run, whatever happened.
//!
//! Errors and panics in user code become `500` responses; the failure detail
//! is only shown when [`Settings::debug`] is on.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use arbor::{App, Method, Request, Response, Server, Settings, Status};
//! use arbor::inject::Path;
//! use arbor::middleware::Options;
//!
//! #[tokio::main]
//! async fn main() -> arbor::Result<()> {
//!     let settings = Settings::from_env()?;
//!     let server = Server::from_settings(&settings)?;
//!
//!     let mut app = App::with_settings(settings);
//!     app.route(Method::Get, "/echo/:name", echo);
//!     app.route(Method::Post, "/users", create_user);
//!     app.after(
//!         |_req: &mut Request, res: &mut Response| { res.set_header("x-admin", "1"); },
//!         Options::new().uri("/admin/*"),
//!     );
//!
//!     server.serve(app).await
//! }
//!
//! fn echo(_req: &mut Request, Path(name): Path<String>) -> String {
//!     format!("hello {name}")
//! }
//!
//! fn create_user(req: &mut Request) -> arbor::Result<Response> {
//!     let name = req.form_field("name")?.to_owned();
//!     let mut res = Response::json(&serde_json::json!({ "name": name }))?;
//!     res.set_status(Status::CREATED).set_header("location", "/users/99");
//!     Ok(res)
//! }
//! ```

mod app;
mod body;
mod config;
mod cookie;
mod error;
mod fallback;
mod handler;
mod method;
mod pipeline;
mod request;
mod response;
mod router;
mod server;
mod status;
mod transport;

pub mod inject;
pub mod middleware;
pub mod session;

pub use app::{App, RouteScope};
pub use body::{Body, BodyProducer, FileBody, JsonBody};
pub use config::{ServerSettings, Settings};
pub use cookie::Cookie;
pub use error::{Error, InjectionError, Namespace, Result};
pub use fallback::ErrorModifier;
pub use handler::Handler;
pub use method::Method;
pub use request::{Output, Request, RequestBuilder, UploadedFile, vars};
pub use response::{IntoReply, Reply, Response, ResponseMap};
pub use router::RouteError;
pub use server::Server;
pub use status::Status;
pub use transport::{BufferedTransport, Captured, Transport};
