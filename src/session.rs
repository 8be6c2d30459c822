//! In-memory conversation sessions.
//!
//! Each session sits behind its own async mutex. A chat turn holds that
//! mutex from history read to history append, so turns on one session are
//! strictly sequential while different sessions run in parallel.
//!
//! Sessions expire after `ttl` without activity and keep at most
//! `max_turns` turns (oldest dropped first).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use ragchat_core::models::ConversationTurn;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub history: Vec<ConversationTurn>,
    #[serde(skip)]
    max_turns: usize,
}

impl Session {
    fn new(id: String, user_id: Option<&str>, max_turns: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.unwrap_or("anonymous").to_string(),
            created_at: now,
            last_active: now,
            history: Vec::new(),
            max_turns,
        }
    }

    /// Record a completed turn, evicting the oldest beyond `max_turns`.
    pub fn push_turn(&mut self, turn: ConversationTurn) {
        self.history.push(turn);
        if self.history.len() > self.max_turns {
            let excess = self.history.len() - self.max_turns;
            self.history.drain(..excess);
        }
        self.last_active = Utc::now();
    }
}

pub type SessionGuard = OwnedMutexGuard<Session>;

struct Entry {
    session: Arc<AsyncMutex<Session>>,
    /// Mirrors `Session::last_active` so expiry checks need no async lock.
    last_active: DateTime<Utc>,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, Entry>>,
    max_turns: usize,
    ttl: chrono::Duration,
}

impl SessionStore {
    pub fn new(max_turns: usize, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns: max_turns.max(1),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
        }
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(
        &self,
        map: &mut HashMap<String, Entry>,
        user_id: Option<&str>,
    ) -> (String, Arc<AsyncMutex<Session>>) {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(AsyncMutex::new(Session::new(id.clone(), user_id, self.max_turns)));
        map.insert(
            id.clone(),
            Entry {
                session: session.clone(),
                last_active: Utc::now(),
            },
        );
        tracing::info!(session = %id, "created session");
        (id, session)
    }

    /// Create an empty session and return its id.
    pub fn create(&self, user_id: Option<&str>) -> String {
        let mut map = self.map();
        self.purge_expired(&mut map);
        self.insert(&mut map, user_id).0
    }

    /// Lock the session for one turn.
    ///
    /// An unknown or expired `session_id` (or none at all) starts a new
    /// session; the caller learns its id from the guard.
    pub async fn acquire(&self, session_id: Option<&str>, user_id: Option<&str>) -> SessionGuard {
        let session = {
            let mut map = self.map();
            self.purge_expired(&mut map);
            let now = Utc::now();
            match session_id.and_then(|id| map.get_mut(id)) {
                Some(entry) => {
                    entry.last_active = now;
                    entry.session.clone()
                }
                None => {
                    if let Some(id) = session_id {
                        tracing::info!(session = %id, "unknown or expired session, starting a new one");
                    }
                    self.insert(&mut map, user_id).1
                }
            }
        };
        session.lock_owned().await
    }

    /// Copy of a live session's state.
    pub async fn snapshot(&self, session_id: &str) -> Option<Session> {
        let session = {
            let mut map = self.map();
            self.purge_expired(&mut map);
            map.get(session_id).map(|e| e.session.clone())?
        };
        let guard = session.lock().await;
        Some(guard.clone())
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self, map: &mut HashMap<String, Entry>) {
        let cutoff = Utc::now() - self.ttl;
        let before = map.len();
        // A session in use (its mutex held or awaited) is never purged.
        map.retain(|_, e| e.last_active > cutoff || Arc::strong_count(&e.session) > 1);
        let purged = before - map.len();
        if purged > 0 {
            tracing::info!(purged, "purged expired sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_acquire_same_session() {
        let store = SessionStore::new(50, Duration::from_secs(3600));
        let id = store.create(Some("alice"));
        let guard = store.acquire(Some(&id), None).await;
        assert_eq!(guard.id, id);
        assert_eq!(guard.user_id, "alice");
    }

    #[tokio::test]
    async fn test_unknown_session_starts_new() {
        let store = SessionStore::new(50, Duration::from_secs(3600));
        let guard = store.acquire(Some("nope"), Some("bob")).await;
        assert_ne!(guard.id, "nope");
        assert_eq!(guard.user_id, "bob");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let store = SessionStore::new(3, Duration::from_secs(3600));
        let id = {
            let mut guard = store.acquire(None, None).await;
            for i in 0..5 {
                guard.push_turn(ConversationTurn::new(format!("q{}", i), format!("a{}", i)));
            }
            guard.id.clone()
        };
        let snap = store.snapshot(&id).await.unwrap();
        let users: Vec<&str> = snap.history.iter().map(|t| t.user_message.as_str()).collect();
        assert_eq!(users, vec!["q2", "q3", "q4"]);
    }

    #[tokio::test]
    async fn test_expired_sessions_are_purged() {
        let store = SessionStore::new(10, Duration::from_millis(20));
        let id = store.create(None);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.snapshot(&id).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_turns_on_one_session_are_sequential() {
        let store = Arc::new(SessionStore::new(10, Duration::from_secs(3600)));
        let id = store.create(None);
        let first = store.acquire(Some(&id), None).await;

        let store2 = store.clone();
        let id2 = id.clone();
        let waiter = tokio::spawn(async move { store2.acquire(Some(&id2), None).await.history.len() });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        let mut first = first;
        first.push_turn(ConversationTurn::new("q", "a"));
        drop(first);

        assert_eq!(waiter.await.unwrap(), 1);
    }
}
