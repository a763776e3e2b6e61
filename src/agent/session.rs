//! # Conversation Session Store
//!
//! Keeps the ordered turn history of every conversation the agent is having.
//! The store is an explicit object owned by `AppState` and handed to the
//! orchestrator by `Arc`; nothing here is a global.
//!
//! ## Locking:
//! - The outer map lock is held only long enough to look up, create or evict entries.
//! - Each session's history sits behind its own async mutex. The orchestrator holds
//!   it for the whole append → query → append section of a turn, so two turns for
//!   the same session cannot interleave their appends.
//!
//! ## Eviction:
//! - Sessions idle for longer than `idle_ttl` are dropped on the next store access.
//! - When `max_sessions` is reached, the least recently used session is dropped
//!   before a new one is created.
//! - A session whose handle is held outside the store (a turn in flight) is never
//!   evicted. If every session is busy the store grows past `max_sessions` until
//!   one frees up.

use crate::agent::history::{History, Turn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared handle to one session's history.
pub type SessionHandle = Arc<Mutex<History>>;

struct SessionEntry {
    history: SessionHandle,
    last_active: Instant,
}

impl SessionEntry {
    /// Someone besides the store holds the history.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.history) > 1
    }
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    max_sessions: usize,
    idle_ttl: Duration,
}

impl SessionStore {
    pub fn new(max_sessions: usize, idle_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
            idle_ttl,
        }
    }

    /// Return the history handle for `session_id`, creating an empty one if needed.
    ///
    /// Every call counts as activity for the session.
    pub async fn get_or_create(&self, session_id: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        Self::drop_expired(&mut sessions, now, self.idle_ttl);

        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_active = now;
            return entry.history.clone();
        }

        if sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .filter(|(_, entry)| !entry.in_use())
                .min_by_key(|(_, entry)| entry.last_active)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(oldest) => {
                    debug!(session_id = %oldest, "Evicting least recently used session");
                    sessions.remove(&oldest);
                }
                None => warn!(
                    sessions = sessions.len(),
                    max_sessions = self.max_sessions,
                    "All sessions busy, exceeding session limit"
                ),
            }
        }

        let history: SessionHandle = Arc::new(Mutex::new(History::new()));
        sessions.insert(
            session_id.to_string(),
            SessionEntry { history: history.clone(), last_active: now },
        );
        debug!(session_id = %session_id, "Created conversation session");
        history
    }

    /// Copy of the session's turns, or `None` if the session does not exist.
    pub async fn snapshot(&self, session_id: &str) -> Option<Vec<Turn>> {
        let handle = self.lookup(session_id).await?;
        let history = handle.lock().await;
        Some(history.clone())
    }

    /// Number of turns recorded for the session (0 if it does not exist).
    pub async fn history_len(&self, session_id: &str) -> usize {
        match self.lookup(session_id).await {
            Some(handle) => handle.lock().await.len(),
            None => 0,
        }
    }

    /// Mark the session as active now. Unknown sessions are ignored.
    pub async fn touch(&self, session_id: &str) {
        if let Some(entry) = self.sessions.lock().await.get_mut(session_id) {
            entry.last_active = Instant::now();
        }
    }

    /// Explicitly end a session. Returns whether it existed.
    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.lock().await.remove(session_id).is_some()
    }

    /// Drop every session idle for longer than the TTL. Returns how many were dropped.
    pub async fn evict_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        Self::drop_expired(&mut sessions, Instant::now(), self.idle_ttl)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn lookup(&self, session_id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).map(|entry| entry.history.clone())
    }

    fn drop_expired(sessions: &mut HashMap<String, SessionEntry>, now: Instant, ttl: Duration) -> usize {
        let before = sessions.len();
        sessions.retain(|_, entry| entry.in_use() || now.duration_since(entry.last_active) <= ttl);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "Evicted idle conversation sessions");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(10, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_history() {
        let store = store();
        let first = store.get_or_create("abc").await;
        first.lock().await.push(Turn::user("hello"));

        let second = store.get_or_create("abc").await;
        assert_eq!(second.lock().await.len(), 1);
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_of_unknown_session_is_none() {
        let store = store();
        assert!(store.snapshot("missing").await.is_none());
        assert_eq!(store.history_len("missing").await, 0);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached_copy() {
        let store = store();
        store.get_or_create("abc").await.lock().await.push(Turn::user("one"));

        let snapshot = store.snapshot("abc").await.unwrap();
        store.get_or_create("abc").await.lock().await.push(Turn::bot("two"));

        assert_eq!(snapshot, vec![Turn::user("one")]);
        assert_eq!(store.history_len("abc").await, 2);
    }

    #[tokio::test]
    async fn test_remove_ends_session() {
        let store = store();
        store.get_or_create("abc").await;
        assert!(store.remove("abc").await);
        assert!(!store.remove("abc").await);
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let store = SessionStore::new(2, Duration::from_secs(3600));
        store.get_or_create("a").await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.get_or_create("b").await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        // Touch "a" so "b" becomes the oldest
        store.get_or_create("a").await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.get_or_create("c").await;

        assert_eq!(store.session_count().await, 2);
        assert!(store.snapshot("a").await.is_some());
        assert!(store.snapshot("b").await.is_none());
        assert!(store.snapshot("c").await.is_some());
    }

    #[tokio::test]
    async fn test_capacity_never_evicts_a_held_session() {
        let store = SessionStore::new(1, Duration::from_secs(3600));
        let held = store.get_or_create("a").await;
        held.lock().await.push(Turn::user("mid-turn"));

        store.get_or_create("b").await;
        assert_eq!(store.session_count().await, 2);

        // The held handle is still the one the store hands out
        store.get_or_create("a").await.lock().await.push(Turn::bot("reply"));
        assert_eq!(held.lock().await.len(), 2);
        drop(held);

        // Once released, the limit is enforced again
        store.get_or_create("c").await;
        assert_eq!(store.session_count().await, 2);
        assert!(store.snapshot("c").await.is_some());
    }

    #[tokio::test]
    async fn test_held_session_outlives_idle_ttl() {
        let store = SessionStore::new(10, Duration::from_millis(30));
        let held = store.get_or_create("slow").await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.evict_expired().await, 0);
        drop(held);
        store.touch("slow").await;
        assert_eq!(store.evict_expired().await, 0);
        assert!(store.snapshot("slow").await.is_some());
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let store = SessionStore::new(10, Duration::from_millis(30));
        store.get_or_create("stale").await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        store.get_or_create("fresh").await;

        assert!(store.snapshot("stale").await.is_none());
        assert_eq!(store.evict_expired().await, 0);
        assert_eq!(store.session_count().await, 1);
    }
}
