//! Middleware registration, filtering and ordering.
//!
//! Three stages wrap every request:
//!
//! | Stage | Runs | Can |
//! |---|---|---|
//! | **before** | prior to routing | short-circuit with a response |
//! | **after** | once a response exists | modify or (by failing) replace it |
//! | **finalize** | after transmission, always | observe only; failures are logged |
//!
//! Each entry carries an optional method filter, an optional path filter and
//! a priority. Filters are checked per request; a non-matching entry is
//! skipped as if it had never been registered. Entries run in ascending
//! priority, ties in registration order.
//!
//! ```rust
//! use arbor::{App, Request, Response};
//! use arbor::middleware::Options;
//!
//! let mut app = App::new();
//! app.after(
//!     |_req: &mut Request, res: &mut Response| { res.set_header("x-admin", "1"); },
//!     Options::new().uri("/admin/*").priority(10),
//! );
//! ```

use std::sync::Arc;

use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::response::Response;

// ── Stages and callables ──────────────────────────────────────────────────────

/// The stage a middleware entry belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Before,
    After,
    Finalize,
}

/// Return values accepted from after-middleware and finalizers.
pub trait IntoOutcome {
    fn into_outcome(self) -> anyhow::Result<()>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E: Into<anyhow::Error>> IntoOutcome for Result<(), E> {
    fn into_outcome(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

/// Middleware that runs once a response exists.
///
/// Implemented for every `Fn(&mut Request, &mut Response) -> R` where `R` is
/// `()` or `Result<(), E>`.
pub trait After: Send + Sync + 'static {
    fn run(&self, req: &mut Request, res: &mut Response) -> anyhow::Result<()>;
}

impl<F, R> After for F
where
    F: Fn(&mut Request, &mut Response) -> R + Send + Sync + 'static,
    R: IntoOutcome,
{
    fn run(&self, req: &mut Request, res: &mut Response) -> anyhow::Result<()> {
        self(req, res).into_outcome()
    }
}

/// Middleware that runs after the response has been sent.
pub trait Finalizer: Send + Sync + 'static {
    fn run(&self, req: &Request) -> anyhow::Result<()>;
}

impl<F, R> Finalizer for F
where
    F: Fn(&Request) -> R + Send + Sync + 'static,
    R: IntoOutcome,
{
    fn run(&self, req: &Request) -> anyhow::Result<()> {
        self(req).into_outcome()
    }
}

pub(crate) type BoxedAfter = Arc<dyn After>;
pub(crate) type BoxedFinalizer = Arc<dyn Finalizer>;

/// A middleware tagged with its stage, for [`Registry::register`].
pub enum Middleware {
    Before(BoxedHandler),
    After(BoxedAfter),
    Finalize(BoxedFinalizer),
}

impl Middleware {
    /// Before-middleware share the handler calling convention, including
    /// argument binding. Returning `()`/`None` lets the request continue.
    pub fn before<M>(handler: impl Handler<M>) -> Self {
        Self::Before(handler.into_boxed_handler())
    }

    pub fn after(after: impl After) -> Self {
        Self::After(Arc::new(after))
    }

    pub fn finalize(finalizer: impl Finalizer) -> Self {
        Self::Finalize(Arc::new(finalizer))
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Before(_) => Stage::Before,
            Self::After(_) => Stage::After,
            Self::Finalize(_) => Stage::Finalize,
        }
    }
}

// ── Options ───────────────────────────────────────────────────────────────────

/// Execution priority within a stage. Lower runs first.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Priority(pub i32);

impl Priority {
    pub const DEFAULT: Self = Self(50);
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<i32> for Priority {
    fn from(p: i32) -> Self {
        Self(p)
    }
}

/// Lenient parse: anything that is not an integer becomes the default.
impl From<&str> for Priority {
    fn from(s: &str) -> Self {
        s.trim().parse().map(Self).unwrap_or_default()
    }
}

/// Path filter: exact match, or prefix match with a trailing `*`.
///
/// [`UriFilter::Route`] is what [`RouteScope`](crate::RouteScope) uses: it
/// matches the paths a route pattern such as `/users/:id` would match.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UriFilter {
    Exact(String),
    Prefix(String),
    Route(String),
}

impl UriFilter {
    pub const WILDCARD: char = '*';

    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix(Self::WILDCARD) {
            Some(prefix) => Self::Prefix(prefix.to_owned()),
            None => Self::Exact(pattern.to_owned()),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == path,
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Self::Route(pattern) => pattern_matches(pattern, path),
        }
    }
}

fn is_param(segment: &str) -> bool {
    segment.starts_with(':') || (segment.starts_with('{') && segment.ends_with('}'))
}

fn is_catch_all(segment: &str) -> bool {
    segment.starts_with('*') || segment.starts_with("{*")
}

/// Segment-wise match of a route pattern against a concrete path.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let mut expected = pattern.split('/');
    let mut actual = path.split('/');
    loop {
        match (expected.next(), actual.next()) {
            (None, None) => return true,
            (Some(p), Some(rest)) if is_catch_all(p) => return !rest.is_empty(),
            (Some(p), Some(segment)) if is_param(p) => {
                if segment.is_empty() {
                    return false;
                }
            }
            (Some(p), Some(segment)) if p == segment => {}
            _ => return false,
        }
    }
}

/// Filters and priority for one middleware registration.
#[derive(Clone, Debug, Default)]
pub struct Options {
    methods: Vec<String>,
    uri: Option<UriFilter>,
    priority: Priority,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only run for this method. Repeat to accept several; empty adds no
    /// filter.
    pub fn method(mut self, method: impl AsRef<str>) -> Self {
        let method = method.as_ref().trim();
        if !method.is_empty() {
            self.methods.push(method.to_ascii_uppercase());
        }
        self
    }

    /// Only run for this path, or paths under it with a trailing `*`.
    /// Empty means no filter.
    pub fn uri(mut self, pattern: impl AsRef<str>) -> Self {
        let pattern = pattern.as_ref();
        self.uri = (!pattern.is_empty()).then(|| UriFilter::parse(pattern));
        self
    }

    /// Only run for paths matching a route pattern.
    pub fn route(mut self, pattern: impl Into<String>) -> Self {
        self.uri = Some(UriFilter::Route(pattern.into()));
        self
    }

    pub fn priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn priority_value(&self) -> Priority {
        self.priority
    }

    pub(crate) fn matches(&self, req: &Request) -> bool {
        if !self.methods.is_empty() && !self.methods.iter().any(|m| m == req.method()) {
            return false;
        }
        match &self.uri {
            Some(filter) => filter.matches(req.path()),
            None => true,
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub(crate) struct Entry<T> {
    pub(crate) middleware: T,
    pub(crate) options: Options,
}

/// The before/after/finalize lists of an application.
///
/// Registration only appends; ordering is decided when a stage runs.
#[derive(Default)]
pub struct Registry {
    befores: Vec<Entry<BoxedHandler>>,
    afters: Vec<Entry<BoxedAfter>>,
    finalizers: Vec<Entry<BoxedFinalizer>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, middleware: Middleware, options: Options) {
        match middleware {
            Middleware::Before(m) => self.befores.push(Entry { middleware: m, options }),
            Middleware::After(m) => self.afters.push(Entry { middleware: m, options }),
            Middleware::Finalize(m) => self.finalizers.push(Entry { middleware: m, options }),
        }
    }

    pub fn len(&self, stage: Stage) -> usize {
        match stage {
            Stage::Before => self.befores.len(),
            Stage::After => self.afters.len(),
            Stage::Finalize => self.finalizers.len(),
        }
    }

    pub(crate) fn befores(&self) -> &[Entry<BoxedHandler>] {
        &self.befores
    }

    pub(crate) fn afters(&self) -> &[Entry<BoxedAfter>] {
        &self.afters
    }

    pub(crate) fn finalizers(&self) -> &[Entry<BoxedFinalizer>] {
        &self.finalizers
    }
}

/// Orders entries by ascending priority. The sort is stable, so equal
/// priorities keep the order in which they were chained in.
pub(crate) fn by_priority<'a, T: 'a>(
    entries: impl IntoIterator<Item = &'a Entry<T>>,
) -> Vec<&'a Entry<T>> {
    let mut sorted: Vec<_> = entries.into_iter().collect();
    sorted.sort_by_key(|entry| entry.options.priority);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: &'static str, priority: i32) -> Entry<&'static str> {
        Entry { middleware: tag, options: Options::new().priority(priority) }
    }

    #[test]
    fn lower_priority_runs_first() {
        let entries = [entry("ten", 10), entry("fifty", 50), entry("five", 5)];
        let order: Vec<_> = by_priority(&entries).iter().map(|e| e.middleware).collect();
        assert_eq!(order, ["five", "ten", "fifty"]);
    }

    #[test]
    fn ties_keep_registration_order() {
        let entries = [entry("a", 50), entry("b", 1), entry("c", 50), entry("d", 50)];
        let order: Vec<_> = by_priority(&entries).iter().map(|e| e.middleware).collect();
        assert_eq!(order, ["b", "a", "c", "d"]);
    }

    #[test]
    fn malformed_priority_falls_back_to_default() {
        assert_eq!(Priority::from("7"), Priority(7));
        assert_eq!(Priority::from("soon"), Priority::DEFAULT);
        assert_eq!(Options::new().priority("").priority_value(), Priority(50));
    }

    #[test]
    fn uri_filter_is_exact_or_trailing_wildcard() {
        let admin = UriFilter::parse("/admin/*");
        assert!(admin.matches("/admin/anything"));
        assert!(admin.matches("/admin/"));
        assert!(!admin.matches("/admin"));
        assert!(!admin.matches("/public/page"));

        let exact = UriFilter::parse("/login");
        assert!(exact.matches("/login"));
        assert!(!exact.matches("/login/again"));
    }

    #[test]
    fn route_filter_follows_the_pattern() {
        let user = UriFilter::Route("/users/:id".into());
        assert!(user.matches("/users/42"));
        assert!(!user.matches("/users/"));
        assert!(!user.matches("/users/42/posts"));

        let files = UriFilter::Route("/files/{*path}".into());
        assert!(files.matches("/files/a/b.txt"));
        assert!(!files.matches("/files"));
    }

    #[test]
    fn filters_are_checked_against_the_request() {
        let post_only = Options::new().method("post");
        let get = Request::builder().method("GET").uri("/x").build();
        let post = Request::builder().method("POST").uri("/x").build();
        assert!(!post_only.matches(&get));
        assert!(post_only.matches(&post));

        assert!(Options::new().method("").uri("").matches(&get));

        let reads = Options::new().method("GET").method("HEAD");
        assert!(reads.matches(&get));
        assert!(reads.matches(&Request::builder().method("HEAD").uri("/x").build()));
        assert!(!reads.matches(&post));
    }

    #[test]
    fn register_appends_to_the_matching_stage() {
        let mut registry = Registry::new();
        registry.register(Middleware::finalize(|_: &Request| ()), Options::new());
        registry.register(
            Middleware::after(|_: &mut Request, _: &mut Response| ()),
            Options::new(),
        );
        assert_eq!(registry.len(Stage::Before), 0);
        assert_eq!(registry.len(Stage::After), 1);
        assert_eq!(registry.len(Stage::Finalize), 1);
    }
}
