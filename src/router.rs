//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. Patterns accept both
//! `:name` and `{name}` parameters and a trailing `*rest` / `{*rest}`
//! catch-all; either spelling is normalized to matchit's syntax on insert.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use matchit::Router as MatchitRouter;
use thiserror::Error;

use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::method::Method;

/// Why a request could not be matched to a handler.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum RouteError {
    #[error("no route matches the path")]
    NotFound,

    /// The path exists for other methods, listed here in [`Method::ALL`] order.
    #[error("method not allowed, allowed: {}", join(.0))]
    MethodNotAllowed(Vec<Method>),
}

fn join(methods: &[Method]) -> String {
    methods.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(",")
}

/// A matched handler and its named parameters in pattern order.
pub(crate) type Matched = (BoxedHandler, IndexMap<String, String>);

/// The application router.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    /// Registers `handler` for a method + pattern pair.
    pub fn add(&mut self, method: Method, pattern: &str, handler: BoxedHandler) -> Result<(), Error> {
        self.routes
            .entry(method)
            .or_default()
            .insert(normalize(pattern), handler)
            .map_err(|e| Error::Route { path: pattern.to_owned(), reason: e.to_string() })
    }

    /// Resolves a request method and path.
    ///
    /// An unknown method string never matches; it is answered like any other
    /// unregistered method, so an existing path still yields
    /// [`RouteError::MethodNotAllowed`].
    pub(crate) fn route(&self, method: &str, path: &str) -> Result<Matched, RouteError> {
        let tree = method.parse::<Method>().ok().and_then(|m| self.routes.get(&m));
        if let Some(matched) = tree.and_then(|t| t.at(path).ok()) {
            let handler = Arc::clone(matched.value);
            let params = matched
                .params
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Ok((handler, params));
        }

        let allowed: Vec<Method> = Method::ALL
            .iter()
            .copied()
            .filter(|m| self.routes.get(m).is_some_and(|t| t.at(path).is_ok()))
            .collect();
        if allowed.is_empty() {
            Err(RouteError::NotFound)
        } else {
            Err(RouteError::MethodNotAllowed(allowed))
        }
    }
}

/// `/users/:id/*rest` → `/users/{id}/{*rest}`.
fn normalize(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                let name = if name.is_empty() { "rest" } else { name };
                format!("{{*{name}}}")
            } else {
                segment.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::request::Request;

    fn noop() -> BoxedHandler {
        (|_: &mut Request| "ok").into_boxed_handler()
    }

    fn router() -> Router {
        let mut router = Router::default();
        router.add(Method::Get, "/users/:id", noop()).unwrap();
        router.add(Method::Delete, "/users/{id}", noop()).unwrap();
        router.add(Method::Get, "/static/*", noop()).unwrap();
        router
    }

    #[test]
    fn colon_and_brace_params_are_equivalent() {
        assert_eq!(normalize("/users/:id/posts/:post"), "/users/{id}/posts/{post}");
        assert_eq!(normalize("/files/*path"), "/files/{*path}");
        assert_eq!(normalize("/users/{id}"), "/users/{id}");
    }

    #[test]
    fn match_returns_params_in_order() {
        let (_, params) = router().route("GET", "/users/42").ok().unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("42"));

        let (_, params) = router().route("GET", "/static/css/site.css").ok().unwrap();
        assert_eq!(params.get("rest").map(String::as_str), Some("css/site.css"));
    }

    #[test]
    fn unknown_path_is_not_found() {
        assert_eq!(router().route("GET", "/nope").err(), Some(RouteError::NotFound));
    }

    #[test]
    fn wrong_method_lists_the_allowed_ones() {
        let err = router().route("POST", "/users/1").err();
        assert_eq!(err, Some(RouteError::MethodNotAllowed(vec![Method::Delete, Method::Get])));

        // Not a known method at all, same answer.
        let err = router().route("BREW", "/users/1").err();
        assert!(matches!(err, Some(RouteError::MethodNotAllowed(_))));
    }

    #[test]
    fn conflicting_route_is_an_error() {
        let mut router = router();
        let err = router.add(Method::Get, "/users/:id", noop()).unwrap_err();
        assert!(matches!(err, Error::Route { .. }));
    }
}
