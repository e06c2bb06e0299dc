//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! The router and the middleware registry hold callables of many different
//! types in plain collections, so every handler is erased behind a trait
//! object (`dyn ErasedHandler`) once, at registration time.
//!
//! ```text
//! fn echo(req: &mut Request, Path(name): Path<String>) -> String { … }
//!        ↓ app.route(Method::Get, "/echo/:name", echo)
//! echo.into_boxed_handler()                  ← Handler<(Path<String>,)> blanket impl
//!        ↓
//! Arc::new(FnHandler { f: echo, .. })        ← stored as BoxedHandler
//!        ↓
//! handler.call(&mut req, &services)          ← resolve Path, call echo, into_reply
//! ```
//!
//! Arguments after the request are bound through [`Resolve`]; a binding
//! failure never reaches the handler body and is reported as an injection
//! failure instead.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Error, InjectionError};
use crate::inject::{Container, Resolve};
use crate::request::Request;
use crate::response::{IntoReply, Reply};

// ── Internal types ────────────────────────────────────────────────────────────

/// Why an erased call produced no reply.
#[doc(hidden)]
#[derive(Debug)]
pub enum Fault {
    Injection(InjectionError),
    Failed(anyhow::Error),
}

impl Fault {
    /// Attaches the calling stage, e.g. `"route handler"`.
    pub(crate) fn within(self, context: &'static str) -> Error {
        match self {
            Self::Injection(source) => Error::Injection { context, source },
            Self::Failed(source) => Error::Uncaught { context, source },
        }
    }
}

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: &mut Request, services: &Container) -> Result<Option<Reply>, Fault>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler and before-middleware.
///
/// You never implement this yourself. It is satisfied by any function or
/// closure shaped like
///
/// ```text
/// fn name(req: &mut Request, a1: A1, …, a4: A4) -> impl IntoReply
/// ```
///
/// with zero to four [`Resolve`] arguments. `M` is the argument tuple and
/// only exists to keep the blanket impls apart.
///
/// The trait is sealed: only the blanket impls below can satisfy it.
pub trait Handler<M>: private::Sealed<M> + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed<M> {}
}

/// Holds a concrete handler `F` together with its argument tuple `M`.
struct FnHandler<F, M> {
    f: F,
    _args: PhantomData<fn() -> M>,
}

// ── Blanket implementations ───────────────────────────────────────────────────

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> private::Sealed<($($arg,)*)> for F
        where
            F: Fn(&mut Request, $($arg,)*) -> R + Send + Sync + 'static,
            R: IntoReply,
            $($arg: Resolve,)*
        {
        }

        impl<F, R, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn(&mut Request, $($arg,)*) -> R + Send + Sync + 'static,
            R: IntoReply,
            $($arg: Resolve + 'static,)*
        {
            fn into_boxed_handler(self) -> BoxedHandler {
                Arc::new(FnHandler { f: self, _args: PhantomData::<fn() -> ($($arg,)*)> })
            }
        }

        impl<F, R, $($arg,)*> ErasedHandler for FnHandler<F, ($($arg,)*)>
        where
            F: Fn(&mut Request, $($arg,)*) -> R + Send + Sync,
            R: IntoReply,
            $($arg: Resolve,)*
        {
            #[allow(non_snake_case, unused_variables)]
            fn call(&self, req: &mut Request, services: &Container) -> Result<Option<Reply>, Fault> {
                // Bind everything first: the request borrow must be free
                // again before the handler gets `&mut` access.
                $(let $arg = $arg::resolve(req, services).map_err(Fault::Injection)?;)*
                (self.f)(req, $($arg,)*).into_reply().map_err(Fault::Failed)
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::Path;

    fn call<M>(handler: impl Handler<M>, req: &mut Request) -> Result<Option<Reply>, Fault> {
        handler.into_boxed_handler().call(req, &Container::new())
    }

    #[test]
    fn plain_closure_sees_the_request() {
        let mut req = Request::builder().uri("/x").build();
        let reply = call(|req: &mut Request| req.path().to_owned(), &mut req).unwrap();
        assert!(matches!(reply, Some(Reply::Value(v)) if v == "/x"));
    }

    #[test]
    fn resolution_failure_skips_the_body() {
        let mut req = Request::builder().uri("/x").build();
        let fault = call(|_: &mut Request, Path(n): Path<u32>| n.to_string(), &mut req).unwrap_err();
        assert!(matches!(fault, Fault::Injection(_)));
    }

    #[test]
    fn returned_error_is_a_failure() {
        let mut req = Request::builder().build();
        let fault = call(
            |_: &mut Request| -> anyhow::Result<String> { anyhow::bail!("nope") },
            &mut req,
        )
        .unwrap_err();
        assert!(matches!(fault, Fault::Failed(e) if e.to_string() == "nope"));
    }
}
