//! Argument binding for handlers.
//!
//! Handlers receive the request plus any number of [`Resolve`] arguments.
//! Services are registered on the application once at startup and resolved
//! by type:
//!
//! ```rust
//! use std::sync::Arc;
//! use arbor::{App, Method, Request};
//! use arbor::inject::{Inject, Path};
//!
//! struct Greeter { greeting: &'static str }
//!
//! fn greet(_req: &mut Request, Path(name): Path<String>, g: Inject<Greeter>) -> String {
//!     format!("{} {name}", g.greeting)
//! }
//!
//! let mut app = App::new();
//! app.provide(Arc::new(Greeter { greeting: "hello" }));
//! app.route(Method::Get, "/greet/:name", greet);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;

use crate::error::InjectionError;
use crate::request::{Request, vars};

/// A handler argument produced from the request and the service container.
pub trait Resolve: Sized {
    fn resolve(req: &Request, services: &Container) -> Result<Self, InjectionError>;
}

// ── Container ─────────────────────────────────────────────────────────────────

/// Type-keyed store of shared services.
#[derive(Default)]
pub struct Container {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service, replacing any earlier one of the same type.
    pub fn provide<T: Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|s| Arc::clone(s).downcast::<T>().ok())
    }
}

// ── Inject ────────────────────────────────────────────────────────────────────

/// A service from the application's [`Container`].
pub struct Inject<T>(pub Arc<T>);

impl<T> Deref for Inject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Send + Sync + 'static> Resolve for Inject<T> {
    fn resolve(_req: &Request, services: &Container) -> Result<Self, InjectionError> {
        services.resolve::<T>().map(Inject).ok_or_else(InjectionError::not_registered::<T>)
    }
}

// ── Route arguments ───────────────────────────────────────────────────────────

/// All named route parameters of the matched route, in pattern order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Args(pub IndexMap<String, String>);

impl Args {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

impl Resolve for Args {
    fn resolve(req: &Request, _services: &Container) -> Result<Self, InjectionError> {
        Ok(Self(req.route_args().clone()))
    }
}

/// Route parameters parsed positionally.
///
/// `Path<u32>` takes a route with exactly one parameter; tuples take one
/// parameter per element: `Path<(String, u64)>` for `/users/:name/posts/:id`.
pub struct Path<T>(pub T);

/// Types that can be built from the ordered route parameter values.
pub trait FromRouteArgs: Sized {
    fn from_route_args(values: &[&str]) -> Result<Self, String>;
}

fn parse_one<T: FromStr>(value: &str, position: usize) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| {
            let expected = std::any::type_name::<T>();
            format!("route parameter {position} (`{value}`) is not a valid {expected}")
        })
}

fn expect_count(values: &[&str], count: usize) -> Result<(), String> {
    if values.len() == count {
        Ok(())
    } else {
        Err(format!("expected {count} route parameter(s), found {}", values.len()))
    }
}

macro_rules! scalar_route_args {
    ($($ty:ty),*) => {
        $(
            impl FromRouteArgs for $ty {
                fn from_route_args(values: &[&str]) -> Result<Self, String> {
                    expect_count(values, 1)?;
                    parse_one(values[0], 0)
                }
            }
        )*
    };
}

scalar_route_args!(String, bool, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f64);

macro_rules! tuple_route_args {
    ($count:literal; $($ty:ident $idx:tt),*) => {
        impl<$($ty: FromStr,)*> FromRouteArgs for ($($ty,)*) {
            fn from_route_args(values: &[&str]) -> Result<Self, String> {
                expect_count(values, $count)?;
                Ok(($(parse_one::<$ty>(values[$idx], $idx)?,)*))
            }
        }
    };
}

tuple_route_args!(1; T0 0);
tuple_route_args!(2; T0 0, T1 1);
tuple_route_args!(3; T0 0, T1 1, T2 2);
tuple_route_args!(4; T0 0, T1 1, T2 2, T3 3);

impl<T: FromRouteArgs> Resolve for Path<T> {
    fn resolve(req: &Request, _services: &Container) -> Result<Self, InjectionError> {
        let values: Vec<&str> = req.route_args().values().map(String::as_str).collect();
        T::from_route_args(&values)
            .map(Path)
            .map_err(|reason| InjectionError::new::<T>(reason))
    }
}

// ── Query ─────────────────────────────────────────────────────────────────────

/// The query string deserialized into `T`.
pub struct Query<T>(pub T);

impl<T: DeserializeOwned> Resolve for Query<T> {
    fn resolve(req: &Request, _services: &Container) -> Result<Self, InjectionError> {
        let raw = req.var(vars::QUERY_STRING).unwrap_or_default();
        serde_urlencoded::from_str(raw)
            .map(Query)
            .map_err(|e| InjectionError::new::<T>(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    fn request_with_args(args: &[(&str, &str)]) -> Request {
        let mut req = Request::builder().uri("/users/7?page=2").build();
        req.set_route_args(args.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect());
        req
    }

    #[test]
    fn container_resolves_by_type() {
        let mut services = Container::new();
        services.provide(Arc::new(7_u8));
        assert_eq!(*services.resolve::<u8>().unwrap(), 7);
        assert!(services.resolve::<u16>().is_none());

        let req = Request::builder().build();
        let err = Inject::<u16>::resolve(&req, &services).err().unwrap();
        assert_eq!(err.reason, "service not registered");
    }

    #[test]
    fn path_parses_positionally() {
        let req = request_with_args(&[("name", "ann"), ("id", "42")]);
        let Path((name, id)) = Path::<(String, u64)>::resolve(&req, &Container::new()).ok().unwrap();
        assert_eq!((name.as_str(), id), ("ann", 42));
    }

    #[test]
    fn path_rejects_bad_values_and_counts() {
        let req = request_with_args(&[("id", "forty-two")]);
        assert!(Path::<u32>::resolve(&req, &Container::new()).is_err());
        assert!(Path::<(u32, u32)>::resolve(&req, &Container::new()).is_err());
    }

    #[test]
    fn query_deserializes_the_query_string() {
        #[derive(Deserialize)]
        struct Page {
            page: u32,
        }

        let req = request_with_args(&[]);
        let Query(page) = Query::<Page>::resolve(&req, &Container::new()).ok().unwrap();
        assert_eq!(page.page, 2);
    }

    #[test]
    fn args_expose_every_named_parameter() {
        let req = request_with_args(&[("a", "1"), ("b", "2")]);
        let args = Args::resolve(&req, &Container::new()).unwrap();
        assert_eq!(args.get("b"), Some("2"));
        assert_eq!(args.0.len(), 2);
    }
}
