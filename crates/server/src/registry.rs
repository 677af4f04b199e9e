//! Live upload sessions, keyed by uid.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::session::UploadSession;

/// Holds at most one live session per uid.
pub trait SessionRegistry: Send + Sync + 'static {
    /// Inserts `session` unless its uid is already taken. Never replaces.
    fn register(&self, session: Arc<UploadSession>) -> bool;

    fn get(&self, uid: &str) -> Option<Arc<UploadSession>>;

    /// Removes whatever session is registered under `uid`.
    fn remove(&self, uid: &str) -> Option<Arc<UploadSession>>;

    /// Removes `session` only if it is the instance registered under its uid.
    fn remove_session(&self, session: &Arc<UploadSession>) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutex-guarded map; one per server.
#[derive(Default)]
pub struct InMemoryRegistry {
    sessions: Mutex<HashMap<String, Arc<UploadSession>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<UploadSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionRegistry for InMemoryRegistry {
    fn register(&self, session: Arc<UploadSession>) -> bool {
        let mut sessions = self.lock();
        if sessions.contains_key(session.uid()) {
            return false;
        }
        sessions.insert(session.uid().to_string(), session);
        true
    }

    fn get(&self, uid: &str) -> Option<Arc<UploadSession>> {
        self.lock().get(uid).cloned()
    }

    fn remove(&self, uid: &str) -> Option<Arc<UploadSession>> {
        self.lock().remove(uid)
    }

    fn remove_session(&self, session: &Arc<UploadSession>) -> bool {
        let mut sessions = self.lock();
        match sessions.get(session.uid()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(session.uid());
                true
            }
            _ => false,
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}
