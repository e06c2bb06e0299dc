//! The application: routes, middleware, error modifiers and services.
//!
//! An [`App`] is filled in during setup through `&mut self` methods and is
//! read-only while requests are served, so one instance can be shared
//! behind an `Arc` by any number of concurrent requests.

use std::sync::Arc;

use crate::config::Settings;
use crate::error::Error;
use crate::fallback::{ErrorModifier, ErrorModifiers};
use crate::handler::Handler;
use crate::inject::Container;
use crate::method::Method;
use crate::middleware::{After, Finalizer, Middleware, Options, Priority, Registry};
use crate::pipeline;
use crate::request::Request;
use crate::router::Router;
use crate::transport::{BufferedTransport, Captured, Transport};

/// An HTTP application.
///
/// ```rust
/// use arbor::{App, Method, Request};
/// use arbor::inject::Path;
///
/// fn echo(_req: &mut Request, Path(name): Path<String>) -> String {
///     format!("hello {name}")
/// }
///
/// let mut app = App::new();
/// app.route(Method::Get, "/echo/:name", echo);
///
/// let res = app.handle(Request::builder().uri("/echo/world").build()).unwrap();
/// assert_eq!(res.status, 200);
/// assert_eq!(res.body_text(), "hello world");
/// ```
#[derive(Default)]
pub struct App {
    pub(crate) router: Router,
    pub(crate) registry: Registry,
    pub(crate) modifiers: ErrorModifiers,
    pub(crate) services: Container,
    pub(crate) settings: Settings,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self { settings, ..Self::default() }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    // ── Routes ────────────────────────────────────────────────────────────────

    /// Registers a route handler.
    ///
    /// Patterns take `:name` or `{name}` parameters and a trailing `*rest` or
    /// `{*rest}` catch-all. The returned [`RouteScope`] attaches middleware
    /// to this route only.
    ///
    /// # Panics
    ///
    /// Panics if the pattern is malformed or conflicts with an existing
    /// route. Use [`try_route`](Self::try_route) to get the error instead.
    pub fn route<M>(&mut self, method: Method, pattern: &str, handler: impl Handler<M>) -> RouteScope<'_> {
        if let Err(err) = self.router.add(method, pattern, handler.into_boxed_handler()) {
            panic!("{err}");
        }
        RouteScope { app: self, method, pattern: pattern.to_owned() }
    }

    pub fn try_route<M>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler<M>,
    ) -> Result<RouteScope<'_>, Error> {
        self.router.add(method, pattern, handler.into_boxed_handler())?;
        Ok(RouteScope { app: self, method, pattern: pattern.to_owned() })
    }

    // ── Middleware ────────────────────────────────────────────────────────────

    pub fn before<M>(&mut self, handler: impl Handler<M>, options: Options) -> &mut Self {
        self.register(Middleware::before(handler), options)
    }

    pub fn after(&mut self, after: impl After, options: Options) -> &mut Self {
        self.register(Middleware::after(after), options)
    }

    /// Finalizers run after transmission for every request. Their method and
    /// path filters are ignored; only the priority is used.
    pub fn finalize(&mut self, finalizer: impl Finalizer, options: Options) -> &mut Self {
        self.register(Middleware::finalize(finalizer), options)
    }

    pub fn register(&mut self, middleware: Middleware, options: Options) -> &mut Self {
        self.registry.register(middleware, options);
        self
    }

    // ── Error modifiers ───────────────────────────────────────────────────────

    /// Customizes every error response without a status-specific modifier.
    pub fn on_error(&mut self, modifier: impl ErrorModifier) -> &mut Self {
        self.modifiers.on_any(modifier);
        self
    }

    /// Customizes error responses with exactly `status`, which must be in
    /// `400..=599`.
    pub fn on_status(&mut self, status: u16, modifier: impl ErrorModifier) -> Result<&mut Self, Error> {
        self.modifiers.on_status(status, modifier)?;
        Ok(self)
    }

    // ── Services ──────────────────────────────────────────────────────────────

    /// Makes `service` available to handlers as [`Inject<T>`](crate::inject::Inject).
    pub fn provide<T: Send + Sync + 'static>(&mut self, service: Arc<T>) -> &mut Self {
        self.services.provide(service);
        self
    }

    // ── Serving ───────────────────────────────────────────────────────────────

    /// Runs `req` through the pipeline, emitting the response into
    /// `transport`.
    ///
    /// Every failure that can still become a response does. The error case
    /// means the response could not be completed, e.g. a streaming body
    /// failed after the headers went out.
    pub fn run(&self, req: Request, transport: &mut dyn Transport) -> Result<(), Error> {
        pipeline::execute(self, req, transport)
    }

    /// [`run`](Self::run) into memory.
    pub fn handle(&self, req: Request) -> Result<Captured, Error> {
        let mut transport = BufferedTransport::new();
        self.run(req, &mut transport)?;
        Ok(transport.finish())
    }
}

/// Middleware registration scoped to one route.
///
/// ```rust
/// use arbor::{App, Method, Request, Response, Status};
///
/// let mut app = App::new();
/// app.route(Method::Get, "/users/:id", |req: &mut Request| req.param("id").map(str::to_owned))
///     .before(
///         |req: &mut Request| (!req.has_header("authorization")).then(|| Status::UNAUTHORIZED),
///         10,
///     )
///     .after(|_: &mut Request, res: &mut Response| { res.set_header("x-user", "1"); }, 50);
/// ```
pub struct RouteScope<'a> {
    app: &'a mut App,
    method: Method,
    pattern: String,
}

impl RouteScope<'_> {
    /// A GET scope also covers HEAD, which is served by the GET handler.
    fn options(&self, priority: impl Into<Priority>) -> Options {
        let options = Options::new().method(self.method.as_str());
        let options = match self.method {
            Method::Get => options.method(Method::Head.as_str()),
            _ => options,
        };
        options.route(self.pattern.as_str()).priority(priority)
    }

    pub fn before<M>(self, handler: impl Handler<M>, priority: impl Into<Priority>) -> Self {
        let options = self.options(priority);
        self.app.before(handler, options);
        self
    }

    pub fn after(self, after: impl After, priority: impl Into<Priority>) -> Self {
        let options = self.options(priority);
        self.app.after(after, options);
        self
    }
}
