//! A small arbor application: routes, scoped middleware, sessions, error
//! modifiers and streaming bodies.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/echo/world
//!   curl -i -c jar -b jar http://localhost:3000/visits
//!   curl -i -X POST http://localhost:3000/users -d 'name=alice'
//!   curl -i http://localhost:3000/admin/stats -H 'authorization: secret'
//!   curl -i -X DELETE http://localhost:3000/echo/world
//!   curl -I http://localhost:3000/echo/world

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arbor::inject::{Inject, Path};
use arbor::middleware::Options;
use arbor::session::{MemoryStore, SessionHandle, Sessions};
use arbor::{App, Body, JsonBody, Method, Request, Response, Server, Settings, Status};

#[derive(Default)]
struct Stats {
    served: AtomicU64,
}

#[tokio::main]
async fn main() -> arbor::Result<()> {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env()?;
    let server = Server::from_settings(&settings)?;
    let session_options = settings.session.clone();

    let mut app = App::with_settings(settings);
    app.provide(Arc::new(Stats::default()));
    Sessions::new(session_options, MemoryStore::new())?.install(&mut app);

    app.route(Method::Get, "/echo/:name", echo);
    app.route(Method::Get, "/visits", visits);
    app.route(Method::Post, "/users", create_user);
    app.route(Method::Get, "/count/:to", count);
    app.route(Method::Get, "/admin/stats", admin_stats).before(require_auth, 10);

    app.after(
        |_: &mut Request, res: &mut Response| {
            res.set_header("x-admin", "1");
        },
        Options::new().uri("/admin/*"),
    );
    app.finalize(
        |req: &Request| {
            tracing::info!(method = req.method(), path = req.path(), "request finished");
        },
        Options::new(),
    );
    app.on_status(404, |req: &Request, _: &mut Response| {
        format!("nothing lives at {}", req.path())
    })?;

    server.serve(app).await
}

fn echo(_req: &mut Request, Path(name): Path<String>, stats: Inject<Stats>) -> String {
    stats.served.fetch_add(1, Ordering::Relaxed);
    format!("hello {name}")
}

fn visits(_req: &mut Request, session: SessionHandle) -> arbor::Result<String> {
    let mut session = session.lock();
    let visits = session.get_as::<u64>("visits").unwrap_or(0) + 1;
    session.set("visits", visits)?;
    Ok(format!("visit #{visits}"))
}

fn create_user(req: &mut Request) -> arbor::Result<Response> {
    let name = req.form_field("name")?.to_owned();
    let mut res = Response::new();
    res.set_status(Status::CREATED)
        .set_header("location", format!("/users/{name}"))
        .set_body(JsonBody::new(&serde_json::json!({ "name": name }))?);
    Ok(res)
}

fn count(_req: &mut Request, Path(to): Path<u32>) -> Response {
    let mut res = Response::new();
    res.set_header("content-type", "text/plain; charset=utf-8");
    res.set_body(Body::stream(move |out| {
        for n in 1..=to {
            writeln!(out, "{n}")?;
        }
        Ok(())
    }));
    res
}

fn require_auth(req: &mut Request) -> Option<Status> {
    (req.header("authorization").ok() != Some("secret")).then_some(Status::UNAUTHORIZED)
}

fn admin_stats(_req: &mut Request, stats: Inject<Stats>) -> String {
    format!("served {} echoes", stats.served.load(Ordering::Relaxed))
}
