use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::{Session, SessionOptions, SessionStore};
use crate::app::App;
use crate::error::{Error, InjectionError};
use crate::inject::{Container, Resolve};
use crate::middleware::Options;
use crate::request::Request;
use crate::response::Response;

/// The current request's session, as a handler argument.
///
/// Only available once [`Sessions`] is installed on the application.
#[derive(Clone)]
pub struct SessionHandle(Arc<Mutex<Session>>);

impl SessionHandle {
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.0.lock()
    }
}

impl Resolve for SessionHandle {
    fn resolve(req: &Request, _services: &Container) -> Result<Self, InjectionError> {
        req.extensions()
            .get::<SessionHandle>()
            .cloned()
            .ok_or_else(|| InjectionError::new::<Session>("sessions are not installed"))
    }
}

/// Attaches a [`Session`] to every request.
pub struct Sessions {
    options: Arc<SessionOptions>,
    store: Arc<dyn SessionStore>,
}

impl Sessions {
    pub fn new(options: SessionOptions, store: impl SessionStore) -> Result<Self, Error> {
        options.validate()?;
        Ok(Self { options: Arc::new(options), store: Arc::new(store) })
    }

    /// Registers the before-middleware that opens the session machinery for
    /// each request. The cookie is written by an after-middleware added to
    /// that request alone, filtered to its own method and path.
    pub fn install(self, app: &mut App) {
        let Self { options, store } = self;
        app.before(
            move |req: &mut Request| {
                let session = Session::new(req, Arc::clone(&options), Arc::clone(&store));
                let handle = SessionHandle(Arc::new(Mutex::new(session)));
                req.extensions_mut().insert(handle.clone());

                let filter = Options::new()
                    .method(req.method())
                    .uri(req.path())
                    .priority(options.priority);
                req.after(move |_: &mut Request, res: &mut Response| write_back(&handle, res), filter);
            },
            Options::new().priority(0),
        );
    }
}

fn write_back(handle: &SessionHandle, res: &mut Response) -> Result<(), Error> {
    let mut session = handle.lock();
    session.close()?;
    if session.should_set_cookie() {
        if let Some(cookie) = session.cookie_elements() {
            res.set_cookie(&cookie);
        }
        res.set_header("cache-control", session.cache_control());
    }
    Ok(())
}
