//! Session numbering and the active game run.
//!
//! The directory listing of a date bucket is the index of sessions: the next
//! id is one more than the highest numeric sub-directory. Scans and directory
//! creation run under a single process-wide lock, and the highest id handed
//! out per (category, date) is remembered so an id is never reissued even if
//! its directory disappears.

use crate::error::CaptureError;
use crate::paths::{Category, DateBucket, PathResolver, SessionId};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Highest numeric sub-directory name in `dir`.
///
/// Plain files and non-numeric names are ignored. A missing directory counts
/// as empty.
pub fn highest_session_id(dir: &Path) -> io::Result<Option<SessionId>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut highest = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if let Some(id) = name.to_str().and_then(SessionId::from_dir_name) {
            highest = highest.max(Some(id));
        }
    }
    Ok(highest)
}

/// Allocates session directories for any category
pub struct SessionNumbering {
    resolver: PathResolver,
    issued: Mutex<HashMap<(Category, DateBucket), SessionId>>,
}

impl SessionNumbering {
    pub fn new(resolver: PathResolver) -> Self {
        Self {
            resolver,
            issued: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Reserve the next session for (category, date) and create its directory.
    pub fn allocate(&self, category: Category, date: DateBucket) -> Result<SessionId, CaptureError> {
        let mut issued = self.issued.lock();

        let date_dir = self.resolver.date_dir(category, date);
        fs::create_dir_all(&date_dir).map_err(|e| CaptureError::filesystem(&date_dir, e))?;

        let on_disk = highest_session_id(&date_dir)
            .map_err(|e| CaptureError::filesystem(&date_dir, e))?;
        let floor = issued.get(&(category, date)).copied();
        let session = match on_disk.max(floor) {
            Some(highest) => highest
                .next()
                .ok_or(CaptureError::SessionsExhausted { category, date })?,
            None => SessionId::FIRST,
        };

        let session_dir = self.resolver.session_dir(category, date, session);
        fs::create_dir_all(&session_dir).map_err(|e| CaptureError::filesystem(&session_dir, e))?;
        issued.insert((category, date), session);

        metrics::counter!("capture.sessions.allocated", "category" => category.as_str())
            .increment(1);
        info!(
            category = %category,
            date = %date,
            session = %session,
            path = %session_dir.display(),
            "Session directory allocated"
        );

        Ok(session)
    }
}

/// The run currently being captured
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveSession {
    pub category: Category,
    /// Bucket the session was created under; frame names keep using it
    pub date: DateBucket,
    pub session: SessionId,
    /// Index of the last saved frame, 0 before the first
    pub frame_index: u64,
}

/// Owns the process-wide active session.
///
/// Every mutation of the run state goes through this type and its single lock.
pub struct SessionAllocator {
    numbering: Arc<SessionNumbering>,
    state: Mutex<Option<ActiveSession>>,
}

impl SessionAllocator {
    pub fn new(numbering: Arc<SessionNumbering>) -> Self {
        Self {
            numbering,
            state: Mutex::new(None),
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        self.numbering.resolver()
    }

    /// Return the active session, reserving a new one if no run is active.
    pub fn ensure_session(
        &self,
        category: Category,
        date: DateBucket,
    ) -> Result<SessionId, CaptureError> {
        self.ensure_active(category, date).map(|active| active.session)
    }

    /// Like `ensure_session`, but returns the whole run snapshot taken under
    /// the same lock acquisition.
    pub fn ensure_active(
        &self,
        category: Category,
        date: DateBucket,
    ) -> Result<ActiveSession, CaptureError> {
        let mut state = self.state.lock();

        if let Some(active) = state.as_ref() {
            if active.category == category {
                debug!(session = %active.session, date = %active.date, "Reusing active session");
                return Ok(active.clone());
            }
            warn!(
                active_category = %active.category,
                requested_category = %category,
                session = %active.session,
                "Replacing active session of another category"
            );
        }

        let session = self.numbering.allocate(category, date)?;
        let active = ActiveSession {
            category,
            date,
            session,
            frame_index: 0,
        };
        *state = Some(active.clone());
        Ok(active)
    }

    /// Clear the active session. No-op when idle.
    pub fn end_session(&self) {
        self.end_session_with(|| ());
    }

    /// Run `f` and clear the active session inside one critical section.
    pub fn end_session_with<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut state = self.state.lock();
        let out = f();
        if let Some(ended) = state.take() {
            info!(
                session = %ended.session,
                date = %ended.date,
                frames = ended.frame_index,
                "Session ended"
            );
        }
        out
    }

    pub fn active(&self) -> Option<ActiveSession> {
        self.state.lock().clone()
    }

    /// Run `f` against the active session while holding the state lock.
    pub(crate) fn with_active<R>(
        &self,
        f: impl FnOnce(&mut ActiveSession) -> Result<R, CaptureError>,
    ) -> Result<R, CaptureError> {
        let mut state = self.state.lock();
        match state.as_mut() {
            Some(active) => f(active),
            None => Err(CaptureError::NoActiveSession),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::bucket;
    use std::thread;
    use tempfile::TempDir;

    fn allocator(root: &Path) -> SessionAllocator {
        SessionAllocator::new(Arc::new(SessionNumbering::new(PathResolver::new(root))))
    }

    fn subdirs(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_first_session_in_cold_bucket() {
        let temp = TempDir::new().unwrap();
        let sessions = allocator(temp.path());

        let id = sessions
            .ensure_session(Category::Capture, bucket("2024-01-01"))
            .unwrap();

        assert_eq!(id.to_string(), "1");
        assert!(temp.path().join("capture/2024-01-01/1").is_dir());
    }

    #[test]
    fn test_ensure_session_is_idempotent_within_run() {
        let temp = TempDir::new().unwrap();
        let sessions = allocator(temp.path());
        let date = bucket("2024-01-01");

        let first = sessions.ensure_session(Category::Capture, date).unwrap();
        for _ in 0..5 {
            assert_eq!(sessions.ensure_session(Category::Capture, date).unwrap(), first);
        }
        assert_eq!(subdirs(&temp.path().join("capture/2024-01-01")), vec!["1"]);
    }

    #[test]
    fn test_continues_after_existing_sessions() {
        let temp = TempDir::new().unwrap();
        for id in ["1", "2", "3"] {
            fs::create_dir_all(temp.path().join("capture/2024-03-10").join(id)).unwrap();
        }
        let sessions = allocator(temp.path());

        let id = sessions
            .ensure_session(Category::Capture, bucket("2024-03-10"))
            .unwrap();
        assert_eq!(id.to_string(), "4");

        // A different day starts its own numbering
        sessions.end_session();
        let id = sessions
            .ensure_session(Category::Capture, bucket("2024-03-11"))
            .unwrap();
        assert_eq!(id.to_string(), "1");
    }

    #[test]
    fn test_max_plus_one_skips_gaps_and_noise() {
        let temp = TempDir::new().unwrap();
        let day = temp.path().join("capture/2024-03-10");
        fs::create_dir_all(day.join("1")).unwrap();
        fs::create_dir_all(day.join("7")).unwrap();
        fs::create_dir_all(day.join("old-run")).unwrap();
        fs::write(day.join("42"), b"not a directory").unwrap();

        let sessions = allocator(temp.path());
        let id = sessions
            .ensure_session(Category::Capture, bucket("2024-03-10"))
            .unwrap();
        assert_eq!(id.to_string(), "8");
    }

    #[test]
    fn test_ids_not_reused_after_directory_removed() {
        let temp = TempDir::new().unwrap();
        let sessions = allocator(temp.path());
        let date = bucket("2024-01-01");

        let first = sessions.ensure_session(Category::Capture, date).unwrap();
        sessions.end_session();
        fs::remove_dir_all(temp.path().join("capture/2024-01-01/1")).unwrap();

        let second = sessions.ensure_session(Category::Capture, date).unwrap();
        assert_eq!(first.to_string(), "1");
        assert_eq!(second.to_string(), "2");
    }

    #[test]
    fn test_end_session_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let sessions = allocator(temp.path());

        sessions.end_session();
        sessions
            .ensure_session(Category::Capture, bucket("2024-01-01"))
            .unwrap();
        sessions.end_session();
        sessions.end_session();
        assert!(sessions.active().is_none());
    }

    #[test]
    fn test_new_run_after_end_gets_next_id() {
        let temp = TempDir::new().unwrap();
        let sessions = allocator(temp.path());
        let date = bucket("2024-01-01");

        let first = sessions.ensure_session(Category::Capture, date).unwrap();
        sessions.end_session();
        let second = sessions.ensure_session(Category::Capture, date).unwrap();

        assert_eq!(Some(second), first.next());
        assert_eq!(sessions.active().unwrap().frame_index, 0);
    }

    #[test]
    fn test_concurrent_ensure_session_creates_one_directory() {
        let temp = TempDir::new().unwrap();
        let sessions = Arc::new(allocator(temp.path()));
        let date = bucket("2024-05-05");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let sessions = sessions.clone();
                thread::spawn(move || sessions.ensure_session(Category::Capture, date).unwrap())
            })
            .collect();
        let ids: Vec<SessionId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(subdirs(&temp.path().join("capture/2024-05-05")), vec!["1"]);
    }

    #[test]
    fn test_concurrent_allocations_are_distinct() {
        let temp = TempDir::new().unwrap();
        let numbering = Arc::new(SessionNumbering::new(PathResolver::new(temp.path())));
        let date = bucket("2024-05-05");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let numbering = numbering.clone();
                thread::spawn(move || numbering.allocate(Category::Video, date).unwrap().get())
            })
            .collect();
        let mut ids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();

        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_unusable_root_is_filesystem_error() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("occupied");
        fs::write(&root, b"a file where the root should be").unwrap();
        let sessions = allocator(&root);

        let err = sessions
            .ensure_session(Category::Capture, bucket("2024-01-01"))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Filesystem { .. }));
        assert!(sessions.active().is_none());
    }

    #[test]
    fn test_exhausted_id_space_is_error_not_reuse() {
        let temp = TempDir::new().unwrap();
        let day = temp.path().join("capture/2024-01-01");
        fs::create_dir_all(day.join("4294967295")).unwrap();
        let numbering = SessionNumbering::new(PathResolver::new(temp.path()));

        for _ in 0..2 {
            let err = numbering
                .allocate(Category::Capture, bucket("2024-01-01"))
                .unwrap_err();
            assert!(matches!(err, CaptureError::SessionsExhausted { .. }));
        }
        assert_eq!(subdirs(&day), vec!["4294967295"]);
    }

    #[test]
    fn test_ensure_active_keeps_creation_date() {
        let temp = TempDir::new().unwrap();
        let sessions = allocator(temp.path());

        let started = sessions
            .ensure_active(Category::Capture, bucket("2024-01-01"))
            .unwrap();
        let rejoined = sessions
            .ensure_active(Category::Capture, bucket("2024-01-02"))
            .unwrap();

        assert_eq!(rejoined, started);
        assert_eq!(rejoined.date, bucket("2024-01-01"));
        assert_eq!(rejoined.session.to_string(), "1");
    }

    #[test]
    fn test_highest_session_id_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert_eq!(highest_session_id(&temp.path().join("nope")).unwrap(), None);
    }
}
