//! The request lifecycle.
//!
//! ```text
//! befores ──short-circuit──┐
//!    │                     │
//! route + handler          │
//!    │                     │
//! afters (global + request-scoped, re-sorted) ◄┘
//!    │
//! stray output check
//!    │
//! well-formedness check → error modifier → reason phrase → status, headers, body
//!    │
//! finalizers (always)
//! ```
//!
//! Every stage call is guarded: an error or a panic in user code becomes a
//! 500 at the point where it happened. The whole run is guarded once more;
//! whatever escapes it gets a last-resort 500 if the headers have not gone
//! out yet.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, warn};

use crate::app::App;
use crate::body::Body;
use crate::error::Error;
use crate::fallback;
use crate::middleware::by_priority;
use crate::request::{Request, vars};
use crate::response::{Reply, Response};
use crate::router::RouteError;
use crate::status::Status;
use crate::transport::Transport;

const DEFAULT_PROTOCOL: &str = "HTTP/1.1";

pub(crate) fn execute(app: &App, mut req: Request, transport: &mut dyn Transport) -> Result<(), Error> {
    let span = tracing::info_span!("request", method = %req.method(), path = %req.path());
    let _guard = span.enter();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| respond(app, &mut req, &mut *transport)));
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(payload) => Some(Error::Panic {
            context: "request pipeline",
            message: panic_message(payload.as_ref()),
        }),
    };
    let result = match failure {
        Some(err) if !last_resort(&req, transport, &err, app.settings.debug) => Err(err),
        _ => Ok(()),
    };

    finalize(app, &req);
    result
}

fn respond(app: &App, req: &mut Request, transport: &mut dyn Transport) -> Result<(), Error> {
    let res = match run_befores(app, req) {
        Some(res) => res,
        None => dispatch(app, req),
    };
    let res = run_afters(app, req, res);
    let res = check_output(app, req, res);
    transmit(app, req, res, transport)
}

// ── Stages ────────────────────────────────────────────────────────────────────

/// The first before that produces anything wins.
fn run_befores(app: &App, req: &mut Request) -> Option<Response> {
    for entry in by_priority(app.registry.befores()) {
        if !entry.options.matches(req) {
            continue;
        }
        let outcome = guarded("before middleware", || {
            entry
                .middleware
                .call(req, &app.services)
                .map_err(|fault| fault.within("before middleware"))
        });
        match outcome {
            Ok(None) => {}
            Ok(Some(reply)) => {
                debug!("before middleware short-circuited the request");
                return Some(reply.into_response().unwrap_or_else(|err| fail(app, &err)));
            }
            Err(err) => return Some(fail(app, &err)),
        }
    }
    None
}

fn dispatch(app: &App, req: &mut Request) -> Response {
    let routed = match app.router.route(req.method(), req.path()) {
        Err(RouteError::MethodNotAllowed(_)) if req.method() == "HEAD" => {
            debug!("no HEAD route, retrying as GET");
            app.router.route("GET", req.path())
        }
        other => other,
    };

    match routed {
        Ok((handler, args)) => {
            req.set_route_args(args);
            let allow_empty = app.settings.allow_empty_response;
            let outcome = guarded("route handler", || {
                let reply = handler
                    .call(req, &app.services)
                    .map_err(|fault| fault.within("route handler"))?;
                handler_response(reply, allow_empty)
            });
            outcome.unwrap_or_else(|err| fail(app, &err))
        }
        Err(RouteError::NotFound) => {
            debug!("no route matched");
            fallback::not_found()
        }
        Err(RouteError::MethodNotAllowed(allowed)) => {
            debug!(?allowed, "method not allowed");
            fallback::method_not_allowed(&allowed)
        }
    }
}

/// Handlers that forget to return something are caught here: an empty
/// literal (including no reply at all) is an error unless allowed.
fn handler_response(reply: Option<Reply>, allow_empty: bool) -> Result<Response, Error> {
    let reply = reply.unwrap_or(Reply::Value(serde_json::Value::Null));
    let literal = reply.is_literal();
    let res = reply.into_response()?;
    if literal {
        res.check_body(allow_empty)?;
    }
    Ok(res)
}

/// A failing after replaces the response and ends the stage.
fn run_afters(app: &App, req: &mut Request, mut res: Response) -> Response {
    let deferred = req.take_deferred();
    for entry in by_priority(app.registry.afters().iter().chain(&deferred)) {
        if !entry.options.matches(req) {
            continue;
        }
        let outcome = guarded("after middleware", || {
            entry
                .middleware
                .run(req, &mut res)
                .map_err(|source| Error::Uncaught { context: "after middleware", source })
        });
        if let Err(err) = outcome {
            return fail(app, &err);
        }
    }
    res
}

fn check_output(app: &App, req: &mut Request, res: Response) -> Response {
    match req.take_output() {
        Some(output) => fail(app, &Error::StrayOutput(output)),
        None => res,
    }
}

/// Nothing is committed until the response is known to be sendable. The
/// check runs before the modifier and again on what the modifier produced.
fn transmit(app: &App, req: &Request, res: Response, transport: &mut dyn Transport) -> Result<(), Error> {
    let mut res = well_formed(app, res);
    let status = res.status_code();
    if status >= 400 {
        if let Some(modifier) = app.modifiers.lookup(status) {
            let debug = app.settings.debug;
            res = panic::catch_unwind(AssertUnwindSafe(|| fallback::apply(modifier.as_ref(), req, res, debug)))
                .unwrap_or_else(|payload| {
                    let source = Error::Panic {
                        context: "error modifier",
                        message: panic_message(payload.as_ref()),
                    };
                    fail(app, &Error::ErrorModifier { status, source: Box::new(source) })
                });
            res = well_formed(app, res);
        }
    }

    if app.settings.auto_reason && res.reason().is_none() {
        if let Some(reason) = Status::new(res.status_code()).reason() {
            res.set_reason(reason);
        }
    }

    let protocol = protocol(req);
    transport.send_status(protocol, res.status_code(), res.reason().unwrap_or_default());
    for (name, value) in res.header_lines() {
        transport.send_header(name, value);
    }

    let out = transport.body();
    match res.take_body() {
        Body::Empty => Ok(()),
        Body::Text(text) => out
            .write_all(text.as_bytes())
            .and_then(|()| out.flush())
            .map_err(|e| Error::Transmission(e.into())),
        Body::Producer(producer) => guarded("body producer", || {
            producer.send(out).map_err(Error::Transmission)
        }),
    }
}

fn well_formed(app: &App, res: Response) -> Response {
    match res.validate() {
        Ok(()) => res,
        Err(err) => fail(app, &err),
    }
}

/// Finalizers ignore filters. Their failures are logged and dropped.
fn finalize(app: &App, req: &Request) {
    for entry in by_priority(app.registry.finalizers()) {
        let outcome = guarded("finalizer", || {
            entry
                .middleware
                .run(req)
                .map_err(|source| Error::Uncaught { context: "finalizer", source })
        });
        if let Err(err) = outcome {
            error!(error = %err.detail(), "finalizer failed");
        }
    }
}

// ── Failure handling ──────────────────────────────────────────────────────────

fn guarded<T>(context: &'static str, f: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(Error::Panic { context, message: panic_message(payload.as_ref()) })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

fn fail(app: &App, err: &Error) -> Response {
    warn!(error = %err.detail(), "responding with 500");
    fallback::internal_error(err, app.settings.debug)
}

fn protocol(req: &Request) -> &str {
    req.original_var(vars::SERVER_PROTOCOL)
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_PROTOCOL)
}

/// Emits a 500 for a failure that escaped the pipeline. Returns `false` when
/// the headers had already been sent and nothing could be done.
fn last_resort(req: &Request, transport: &mut dyn Transport, err: &Error, debug: bool) -> bool {
    if transport.headers_sent() {
        error!(error = %err.detail(), "request failed after the response was committed");
        return false;
    }
    error!(error = %err.detail(), "request failed outside the pipeline, sending last-resort 500");

    let mut res = fallback::internal_error(err, debug);
    transport.clear_headers();
    transport.send_status(protocol(req), res.status_code(), res.reason().unwrap_or_default());
    for (name, value) in res.header_lines() {
        transport.send_header(name, value);
    }
    let text = match res.take_body() {
        Body::Text(text) => text,
        _ => String::new(),
    };
    let out = transport.body();
    match out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "failed writing last-resort response");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_reply_is_an_empty_response() {
        assert!(matches!(handler_response(None, false), Err(Error::EmptyResponse)));
        assert!(handler_response(None, true).is_ok());
        assert!(matches!(
            handler_response(Some(Reply::from("")), false),
            Err(Error::EmptyResponse)
        ));
    }

    #[test]
    fn empty_response_objects_are_not_literals() {
        let res = handler_response(Some(Reply::from(Status::NO_CONTENT)), false).unwrap();
        assert_eq!(res.status_code(), 204);
    }

    #[test]
    fn non_text_literals_are_rejected() {
        let err = handler_response(Some(Reply::Value(serde_json::json!(42))), false).unwrap_err();
        assert!(matches!(err, Error::InvalidBody(_)));
    }

    fn payload_of(f: fn()) -> Box<dyn Any + Send> {
        panic::catch_unwind(f).unwrap_err()
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(payload_of(|| panic!("boom {}", 1)).as_ref()), "boom 1");
        assert_eq!(panic_message(payload_of(|| panic!("static")).as_ref()), "static");
        assert_eq!(
            panic_message(payload_of(|| std::panic::panic_any(7_u8)).as_ref()),
            "non-string panic payload"
        );
    }
}
