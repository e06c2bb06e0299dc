//! Session storage backends.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use super::SessionData;
use crate::error::Error;

/// Persistence for session data, keyed by session id.
///
/// Ids handed to a store have already been checked to be non-empty and
/// alphanumeric.
pub trait SessionStore: Send + Sync + 'static {
    /// `true` if `id` exists and was written within `max_age`.
    fn exists(&self, id: &str, max_age: Duration) -> Result<bool, Error>;

    /// The stored data, or an empty map for an unknown id.
    fn read(&self, id: &str) -> Result<SessionData, Error>;

    fn write(&self, id: &str, data: &SessionData) -> Result<(), Error>;

    /// Removing an id that does not exist succeeds.
    fn destroy(&self, id: &str) -> Result<(), Error>;

    /// Removes every session not written within `max_age`.
    fn gc(&self, max_age: Duration) -> Result<(), Error>;
}

fn expired(written: SystemTime, max_age: Duration, now: SystemTime) -> bool {
    written.checked_add(max_age).is_some_and(|deadline| deadline < now)
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// In-process store. Sessions vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, (SystemTime, SessionData)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemoryStore {
    fn exists(&self, id: &str, max_age: Duration) -> Result<bool, Error> {
        let sessions = self.sessions.lock();
        Ok(sessions
            .get(id)
            .is_some_and(|(written, _)| !expired(*written, max_age, SystemTime::now())))
    }

    fn read(&self, id: &str) -> Result<SessionData, Error> {
        Ok(self.sessions.lock().get(id).map(|(_, data)| data.clone()).unwrap_or_default())
    }

    fn write(&self, id: &str, data: &SessionData) -> Result<(), Error> {
        self.sessions.lock().insert(id.to_owned(), (SystemTime::now(), data.clone()));
        Ok(())
    }

    fn destroy(&self, id: &str) -> Result<(), Error> {
        self.sessions.lock().remove(id);
        Ok(())
    }

    fn gc(&self, max_age: Duration) -> Result<(), Error> {
        let now = SystemTime::now();
        self.sessions.lock().retain(|_, (written, _)| !expired(*written, max_age, now));
        Ok(())
    }
}

// ── Files ─────────────────────────────────────────────────────────────────────

/// One JSON file per session under `root/<first id char>/<id>`.
///
/// Age is the file's modification time.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Uses `root`, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            Error::Session(format!("failed creating session storage directory {}: {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    /// `<temp dir>/arborsession`.
    pub fn in_temp_dir() -> Result<Self, Error> {
        Self::new(std::env::temp_dir().join("arborsession"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, id: &str) -> Result<PathBuf, Error> {
        let shard = id
            .get(..1)
            .filter(|_| id.bytes().all(|b| b.is_ascii_alphanumeric()))
            .ok_or_else(|| Error::Session(format!("invalid session id: {id:?}")))?;
        Ok(self.root.join(shard).join(id))
    }
}

fn modified(path: &Path) -> io::Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(meta) => meta.modified().map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

impl SessionStore for FileStore {
    fn exists(&self, id: &str, max_age: Duration) -> Result<bool, Error> {
        let path = self.path(id)?;
        Ok(modified(&path)?.is_some_and(|written| !expired(written, max_age, SystemTime::now())))
    }

    fn read(&self, id: &str) -> Result<SessionData, Error> {
        let path = self.path(id)?;
        match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Ok(SessionData::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(SessionData::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, id: &str, data: &SessionData) -> Result<(), Error> {
        let path = self.path(id)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, serde_json::to_vec(data)?)?;
        Ok(())
    }

    fn destroy(&self, id: &str) -> Result<(), Error> {
        match fs::remove_file(self.path(id)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn gc(&self, max_age: Duration) -> Result<(), Error> {
        let now = SystemTime::now();
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?.path();
            if !shard.is_dir() {
                continue;
            }
            for file in fs::read_dir(&shard)? {
                let file = file?.path();
                if modified(&file)?.is_some_and(|written| expired(written, max_age, now)) {
                    fs::remove_file(&file)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data() -> SessionData {
        let mut data = SessionData::new();
        data.insert("user".into(), json!("ann"));
        data
    }

    #[test]
    fn huge_lifetimes_never_expire() {
        let now = SystemTime::now();
        assert!(!expired(now, Duration::MAX, now));
        assert!(expired(now - Duration::from_secs(10), Duration::from_secs(1), now));
    }

    #[test]
    fn memory_store_round_trip_and_gc() {
        let store = MemoryStore::new();
        assert!(!store.exists("abc", Duration::from_secs(60)).unwrap());

        store.write("abc", &data()).unwrap();
        assert!(store.exists("abc", Duration::from_secs(60)).unwrap());
        assert_eq!(store.read("abc").unwrap()["user"], "ann");

        store.gc(Duration::from_secs(60)).unwrap();
        assert_eq!(store.len(), 1);
        std::thread::sleep(Duration::from_millis(5));
        store.gc(Duration::ZERO).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn file_store_shards_by_first_char() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        store.write("f00d", &data()).unwrap();
        assert!(dir.path().join("f").join("f00d").is_file());
        assert_eq!(store.read("f00d").unwrap(), data());
        assert!(store.read("beef").unwrap().is_empty());

        store.destroy("f00d").unwrap();
        store.destroy("f00d").unwrap();
        assert!(!store.exists("f00d", Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.read("../etc/passwd").is_err());
        assert!(store.write("", &data()).is_err());
    }

    #[test]
    fn file_store_gc_removes_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.write("a1", &data()).unwrap();
        store.write("b2", &data()).unwrap();

        store.gc(Duration::from_secs(3600)).unwrap();
        assert!(store.exists("a1", Duration::from_secs(3600)).unwrap());

        std::thread::sleep(Duration::from_millis(20));
        store.gc(Duration::ZERO).unwrap();
        assert!(!dir.path().join("a").join("a1").exists());
        assert!(!dir.path().join("b").join("b2").exists());
    }
}
