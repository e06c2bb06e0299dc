use arbor::session::{FileStore, MemoryStore, SessionHandle, SessionOptions, SessionStore, Sessions};
use arbor::{App, Captured, Method, Request, Settings};

fn login(_req: &mut Request, session: SessionHandle) -> arbor::Result<&'static str> {
    session.lock().set("user", "ann")?;
    Ok("welcome")
}

fn whoami(_req: &mut Request, session: SessionHandle) -> arbor::Result<String> {
    session.lock().get_as::<String>("user")
}

fn rotate(_req: &mut Request, session: SessionHandle) -> arbor::Result<&'static str> {
    session.lock().regenerate()?;
    Ok("rotated")
}

fn app_with(store: impl SessionStore) -> App {
    let mut app = App::with_settings(Settings { debug: true, ..Settings::default() });
    Sessions::new(SessionOptions::default(), store).unwrap().install(&mut app);
    app.route(Method::Get, "/login", login);
    app.route(Method::Get, "/me", whoami);
    app.route(Method::Get, "/rotate", rotate);
    app.route(Method::Get, "/plain", |_: &mut Request| "plain");
    app
}

fn get(uri: &str, session_id: Option<&str>) -> Request {
    let builder = Request::builder().uri(uri);
    match session_id {
        Some(id) => builder.header("Cookie", format!("ASESSID={id}")).build(),
        None => builder.build(),
    }
}

fn session_id(res: &Captured) -> String {
    let cookie = res.header("set-cookie").expect("no session cookie");
    let pair = cookie.split(';').next().unwrap();
    pair.strip_prefix("ASESSID=").expect("wrong cookie name").to_owned()
}

#[test]
fn writing_the_session_sets_cookie_and_cache_headers() {
    let app = app_with(MemoryStore::new());
    let res = app.handle(get("/login", None)).unwrap();

    assert_eq!(res.status, 200);
    let id = session_id(&res);
    assert_eq!(id.len(), 64);
    assert!(res.header("set-cookie").unwrap().ends_with("; HttpOnly"));
    assert_eq!(res.header("cache-control"), Some("no-store, no-cache, must-revalidate"));
}

#[test]
fn cookie_resumes_the_session() {
    let app = app_with(MemoryStore::new());
    let id = session_id(&app.handle(get("/login", None)).unwrap());

    let res = app.handle(get("/me", Some(&id))).unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.body_text(), "ann");
    // Reading does not alter the session, so no new cookie.
    assert_eq!(res.header("set-cookie"), None);
}

#[test]
fn untouched_session_sends_nothing() {
    let app = app_with(MemoryStore::new());
    let res = app.handle(get("/plain", None)).unwrap();
    assert_eq!(res.header("set-cookie"), None);
    assert_eq!(res.header("cache-control"), None);
}

#[test]
fn unknown_id_starts_a_fresh_session() {
    let app = app_with(MemoryStore::new());
    let res = app.handle(get("/me", Some("forged0000"))).unwrap();
    assert_eq!(res.status, 500);
    assert!(res.body_text().contains("unknown session field: user"));
}

#[test]
fn regenerate_issues_a_new_id() {
    let app = app_with(MemoryStore::new());
    let first = session_id(&app.handle(get("/login", None)).unwrap());
    let second = session_id(&app.handle(get("/rotate", Some(&first))).unwrap());
    assert_ne!(first, second);

    let res = app.handle(get("/me", Some(&first))).unwrap();
    assert_eq!(res.status, 500);
}

#[test]
fn file_store_persists_between_requests() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(FileStore::new(dir.path()).unwrap());

    let id = session_id(&app.handle(get("/login", None)).unwrap());
    let shard = &id[..1];
    assert!(dir.path().join(shard).join(&id).is_file());

    assert_eq!(app.handle(get("/me", Some(&id))).unwrap().body_text(), "ann");
}

#[test]
fn handle_without_sessions_is_an_injection_failure() {
    let mut app = App::with_settings(Settings { debug: true, ..Settings::default() });
    app.route(Method::Get, "/me", whoami);

    let res = app.handle(get("/me", None)).unwrap();
    assert_eq!(res.status, 500);
    assert!(res.body_text().contains("sessions are not installed"));
}

#[test]
fn invalid_options_are_rejected_at_install() {
    let options = SessionOptions { cookie_name: "sid".into(), ..SessionOptions::default() };
    assert!(Sessions::new(options, MemoryStore::new()).is_err());
}
