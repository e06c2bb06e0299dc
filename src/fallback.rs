//! Synthesized error responses and user error modifiers.
//!
//! Every failure the pipeline converts into a response goes through here, so
//! the 404/405/500 bodies have one shape. An error modifier registered with
//! [`App::on_status`](crate::App::on_status) or
//! [`App::on_error`](crate::App::on_error) gets the last word on any
//! response with a status of 400 or above.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::method::Method;
use crate::request::Request;
use crate::response::{IntoReply, Reply, Response};
use crate::status::Status;

const GENERIC_MESSAGE: &str = "<p>Something went terribly wrong!</p>";

pub(crate) fn not_found() -> Response {
    page(Status::NOT_FOUND)
}

/// `405` with an `Allow` header listing `allowed`.
pub(crate) fn method_not_allowed(allowed: &[Method]) -> Response {
    let mut res = page(Status::METHOD_NOT_ALLOWED);
    let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(",");
    res.set_header("allow", allow);
    res
}

/// `500` describing `err`. The cause chain is only shown in debug mode;
/// status and markup are otherwise identical.
pub(crate) fn internal_error(err: &Error, debug: bool) -> Response {
    let detail = match err {
        // The captured output is the whole story; no "unexpected output:" prefix.
        Error::StrayOutput(output) => output.clone(),
        _ => err.detail(),
    };
    let message = if debug {
        format!("<pre style=\"color:red\">{}</pre>", escape(&detail))
    } else {
        GENERIC_MESSAGE.to_owned()
    };

    let mut res = Response::html(format!(
        "<html><body><h1>500 Internal Server Error</h1><hr/>{message}</body></html>"
    ));
    res.set_status(Status::INTERNAL_SERVER_ERROR)
        .set_reason("Internal Server Error");
    res
}

fn page(status: Status) -> Response {
    let reason = status.reason().unwrap_or_default();
    let code = status.code();
    let mut res = Response::html(format!("<html><body><h1>{code} {reason}</h1></body></html>"));
    res.set_status(status).set_reason(reason);
    res
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ── Error modifiers ───────────────────────────────────────────────────────────

/// Customizes an error response.
///
/// Implemented for every `Fn(&Request, &mut Response) -> R` with
/// `R: IntoReply`. The modifier may edit the response in place, return a
/// replacement [`Response`], or return a literal used as the new body.
pub trait ErrorModifier: Send + Sync + 'static {
    fn modify(&self, req: &Request, res: &mut Response) -> anyhow::Result<Option<Reply>>;
}

impl<F, R> ErrorModifier for F
where
    F: Fn(&Request, &mut Response) -> R + Send + Sync + 'static,
    R: IntoReply,
{
    fn modify(&self, req: &Request, res: &mut Response) -> anyhow::Result<Option<Reply>> {
        self(req, res).into_reply()
    }
}

type BoxedModifier = Arc<dyn ErrorModifier>;

/// Per-status and wildcard modifiers. An exact status beats the wildcard.
#[derive(Default)]
pub(crate) struct ErrorModifiers {
    exact: HashMap<u16, BoxedModifier>,
    any: Option<BoxedModifier>,
}

impl ErrorModifiers {
    /// Replaces any modifier already registered for `status`.
    pub(crate) fn on_status(&mut self, status: u16, modifier: impl ErrorModifier) -> Result<(), Error> {
        if !(400..=599).contains(&status) {
            return Err(Error::InvalidErrorStatus(status));
        }
        self.exact.insert(status, Arc::new(modifier));
        Ok(())
    }

    pub(crate) fn on_any(&mut self, modifier: impl ErrorModifier) {
        self.any = Some(Arc::new(modifier));
    }

    pub(crate) fn lookup(&self, status: u16) -> Option<&BoxedModifier> {
        self.exact.get(&status).or(self.any.as_ref())
    }
}

/// Applies `modifier` to `res`, returning the response to send.
///
/// A failing modifier, or one that returns an invalid body, never leaves the
/// error unhandled: the result is a 500 describing the failure.
pub(crate) fn apply(
    modifier: &dyn ErrorModifier,
    req: &Request,
    mut res: Response,
    debug: bool,
) -> Response {
    let status = res.status_code();
    let outcome = match modifier.modify(req, &mut res) {
        Ok(None) => Ok(res),
        Ok(Some(Reply::Value(value))) => {
            let set = res.try_set_body(value).map(drop);
            set.map(|()| res)
        }
        Ok(Some(reply)) => reply.into_response(),
        Err(source) => Err(Error::Uncaught { context: "error modifier", source }),
    };
    outcome.unwrap_or_else(|source| {
        let err = Error::ErrorModifier { status, source: Box::new(source) };
        tracing::warn!(error = %err, "error modifier failed");
        internal_error(&err, debug)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_not_allowed_lists_methods() {
        let res = method_not_allowed(&[Method::Get, Method::Post]);
        assert_eq!(res.status_code(), 405);
        assert_eq!(res.header("Allow"), Some("GET,POST"));
        assert_eq!(res.reason(), Some("Method Not Allowed"));
    }

    #[test]
    fn debug_controls_only_the_detail() {
        let err = Error::Uncaught { context: "route handler", source: anyhow::anyhow!("<boom>") };

        let shown = internal_error(&err, true);
        let text = shown.body().as_text().unwrap();
        assert!(text.contains("route handler threw an uncaught error: &lt;boom&gt;"));

        let hidden = internal_error(&err, false);
        assert_eq!(hidden.status_code(), 500);
        assert!(hidden.body().as_text().unwrap().contains("Something went terribly wrong!"));
        assert!(!hidden.body().as_text().unwrap().contains("boom"));
    }

    #[test]
    fn exact_status_beats_wildcard() {
        let mut modifiers = ErrorModifiers::default();
        modifiers.on_any(|_: &Request, _: &mut Response| "any");
        modifiers.on_status(404, |_: &Request, _: &mut Response| "exact").unwrap();

        let req = Request::builder().build();
        let res = apply(modifiers.lookup(404).unwrap().as_ref(), &req, not_found(), false);
        assert_eq!(res.body().as_text(), Some("exact"));
        assert_eq!(res.status_code(), 404);

        let res = apply(modifiers.lookup(500).unwrap().as_ref(), &req, not_found(), false);
        assert_eq!(res.body().as_text(), Some("any"));
    }

    #[test]
    fn only_error_statuses_can_be_modified() {
        let mut modifiers = ErrorModifiers::default();
        let err = modifiers.on_status(302, |_: &Request, _: &mut Response| ()).unwrap_err();
        assert!(matches!(err, Error::InvalidErrorStatus(302)));
        assert!(modifiers.on_status(600, |_: &Request, _: &mut Response| ()).is_err());
    }

    #[test]
    fn failing_modifier_becomes_a_500() {
        let failing = |_: &Request, _: &mut Response| -> anyhow::Result<()> { anyhow::bail!("nope") };
        let req = Request::builder().build();
        let res = apply(&failing, &req, not_found(), true);
        assert_eq!(res.status_code(), 500);
        assert!(res.body().as_text().unwrap().contains("error modifier for status 404 failed"));
    }
}
