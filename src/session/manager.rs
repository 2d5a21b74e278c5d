//! Live session table with TTL timers, hierarchy, and persistence

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{Result, ToolwireError};
use crate::session::{Session, SessionState, SessionTrigger, DEFAULT_SESSION_TTL};
use crate::storage::SessionStore;

struct Entry {
    session: Session,
    /// Bumped whenever the timer is re-armed or disarmed; a timer only
    /// fires if its generation is still current.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl Entry {
    fn disarm(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Inner {
    sessions: Mutex<HashMap<String, Entry>>,
    default_ttl: Duration,
    store: Option<Arc<dyn SessionStore>>,
}

/// Owns every live [`Session`].
///
/// Cloning is cheap and every clone shares the same table.
///
/// # Examples
///
/// ```
/// use toolwire::session::{SessionManager, SessionState};
///
/// # #[tokio::main]
/// # async fn main() -> toolwire::error::Result<()> {
/// let manager = SessionManager::new(std::time::Duration::from_secs(60));
/// let session = manager.create(Some("alice".into()), None).await;
/// manager.begin_initialize(&session.id).await?;
/// manager.complete_initialize(&session.id, true).await?;
/// assert_eq!(manager.get(&session.id).await?.state, SessionState::Active);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("default_ttl", &self.inner.default_ttl)
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionManager {
    /// A manager without persistence.
    pub fn new(default_ttl: Duration) -> Self {
        Self::build(default_ttl, None)
    }

    /// A manager that saves and loads through `store`.
    pub fn with_store(default_ttl: Duration, store: Arc<dyn SessionStore>) -> Self {
        Self::build(default_ttl, Some(store))
    }

    fn build(default_ttl: Duration, store: Option<Arc<dyn SessionStore>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                default_ttl,
                store,
            }),
        }
    }

    /// TTL applied when `create` is not given one.
    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Create a session in [`SessionState::Created`].
    pub async fn create(&self, user_id: Option<String>, ttl: Option<Duration>) -> Session {
        let mut sessions = self.inner.sessions.lock().await;
        let mut session = Session::new(user_id, ttl.unwrap_or(self.inner.default_ttl));
        session.record("created", Value::Null);
        tracing::debug!(session_id = %session.id, "session created");
        sessions.insert(
            session.id.clone(),
            Entry {
                session: session.clone(),
                generation: 0,
                timer: None,
            },
        );
        session
    }

    /// Create a session whose `parent_id` is `parent_id`. The child inherits
    /// the parent's user and TTL.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::SessionNotFound`] if the parent is unknown.
    pub async fn create_child(&self, parent_id: &str) -> Result<Session> {
        let mut sessions = self.inner.sessions.lock().await;
        let parent = sessions
            .get(parent_id)
            .map(|e| &e.session)
            .ok_or_else(|| ToolwireError::SessionNotFound(parent_id.to_string()))?;

        let mut child = Session::new(parent.user_id.clone(), parent.ttl);
        child.parent_id = Some(parent_id.to_string());
        child.record("created", json!({ "parentId": parent_id }));
        sessions.insert(
            child.id.clone(),
            Entry {
                session: child.clone(),
                generation: 0,
                timer: None,
            },
        );
        Ok(child)
    }

    /// Snapshot of one session.
    pub async fn get(&self, id: &str) -> Result<Session> {
        self.inner
            .sessions
            .lock()
            .await
            .get(id)
            .map(|e| e.session.clone())
            .ok_or_else(|| ToolwireError::SessionNotFound(id.to_string()))
    }

    /// Snapshots of every session.
    pub async fn list(&self) -> Vec<Session> {
        self.inner
            .sessions
            .lock()
            .await
            .values()
            .map(|e| e.session.clone())
            .collect()
    }

    /// Apply `trigger` to session `id`.
    ///
    /// Entering [`SessionState::Active`] arms the TTL timer; leaving it
    /// disarms the timer.
    ///
    /// # Errors
    ///
    /// [`ToolwireError::SessionNotFound`] or
    /// [`ToolwireError::InvalidTransition`].
    pub async fn transition(&self, id: &str, trigger: SessionTrigger) -> Result<SessionState> {
        let mut sessions = self.inner.sessions.lock().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| ToolwireError::SessionNotFound(id.to_string()))?;

        let from = entry.session.state;
        let to = entry.session.apply(trigger)?;
        if to == SessionState::Active {
            entry.session.last_activity_at = Utc::now();
            self.arm(id, entry);
        } else {
            entry.disarm();
        }
        if from != to {
            tracing::debug!(session_id = id, %from, %to, "session transition");
        }
        Ok(to)
    }

    /// `created -> initializing`.
    pub async fn begin_initialize(&self, id: &str) -> Result<SessionState> {
        self.transition(id, SessionTrigger::Initialize).await
    }

    /// `initializing -> active` on success, `initializing -> created` on failure.
    pub async fn complete_initialize(&self, id: &str, succeeded: bool) -> Result<SessionState> {
        let trigger = if succeeded {
            SessionTrigger::InitializeSucceeded
        } else {
            SessionTrigger::InitializeFailed
        };
        self.transition(id, trigger).await
    }

    /// `active -> suspended`.
    pub async fn suspend(&self, id: &str) -> Result<SessionState> {
        self.transition(id, SessionTrigger::Suspend).await
    }

    /// `suspended -> active`, re-arming the TTL timer.
    pub async fn resume(&self, id: &str) -> Result<SessionState> {
        self.transition(id, SessionTrigger::Resume).await
    }

    /// Close the session. Closing a closed session is a no-op.
    pub async fn close(&self, id: &str) -> Result<SessionState> {
        self.transition(id, SessionTrigger::Close).await
    }

    /// Drop a session from the table, closing it first.
    pub async fn remove(&self, id: &str) -> Result<Session> {
        let mut sessions = self.inner.sessions.lock().await;
        let mut entry = sessions
            .remove(id)
            .ok_or_else(|| ToolwireError::SessionNotFound(id.to_string()))?;
        entry.disarm();
        entry.session.apply(SessionTrigger::Close)?;
        Ok(entry.session)
    }

    /// Record activity, restarting the TTL timer if the session is active.
    ///
    /// # Errors
    ///
    /// [`ToolwireError::SessionExpired`] if the session is closed.
    pub async fn touch(&self, id: &str) -> Result<()> {
        self.mutate(id, |_| {}).await
    }

    /// Fail unless the session is active, then touch it.
    ///
    /// # Errors
    ///
    /// [`ToolwireError::SessionExpired`] if the session is suspended or
    /// closed; [`ToolwireError::SessionNotFound`] if it is unknown.
    pub async fn ensure_active(&self, id: &str) -> Result<()> {
        let mut sessions = self.inner.sessions.lock().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| ToolwireError::SessionNotFound(id.to_string()))?;
        if entry.session.state != SessionState::Active {
            return Err(ToolwireError::SessionExpired(format!(
                "session {id} is {}",
                entry.session.state
            )));
        }
        entry.session.last_activity_at = Utc::now();
        self.arm(id, entry);
        Ok(())
    }

    /// Set one context key.
    pub async fn set_context(&self, id: &str, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        self.mutate(id, move |s| {
            s.context.insert(key, value);
        })
        .await
    }

    /// Set one metadata key.
    pub async fn set_metadata(&self, id: &str, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        self.mutate(id, move |s| {
            s.metadata.insert(key, value);
        })
        .await
    }

    /// Append a conversation message.
    pub async fn push_message(&self, id: &str, message: Value) -> Result<()> {
        self.mutate(id, move |s| s.messages.push(message)).await
    }

    /// Ancestors of `id`, nearest first.
    pub async fn get_ancestors(&self, id: &str) -> Result<Vec<Session>> {
        let sessions = self.inner.sessions.lock().await;
        let start = sessions
            .get(id)
            .ok_or_else(|| ToolwireError::SessionNotFound(id.to_string()))?;

        let mut ancestors = Vec::new();
        let mut seen = HashSet::from([id.to_string()]);
        let mut next = start.session.parent_id.clone();
        while let Some(parent_id) = next {
            // A parent that was never loaded ends the walk; so does a cycle.
            if !seen.insert(parent_id.clone()) {
                break;
            }
            let Some(parent) = sessions.get(&parent_id) else {
                break;
            };
            next = parent.session.parent_id.clone();
            ancestors.push(parent.session.clone());
        }
        Ok(ancestors)
    }

    /// Topmost known ancestor, or the session itself.
    pub async fn get_root(&self, id: &str) -> Result<Session> {
        match self.get_ancestors(id).await?.pop() {
            Some(root) => Ok(root),
            None => self.get(id).await,
        }
    }

    /// Number of known ancestors; a root is depth 0.
    pub async fn get_depth(&self, id: &str) -> Result<usize> {
        Ok(self.get_ancestors(id).await?.len())
    }

    /// Persist session `id` through the configured store.
    ///
    /// # Errors
    ///
    /// [`ToolwireError::Config`] if no store is configured.
    pub async fn save(&self, id: &str) -> Result<()> {
        let store = self.store()?;
        let record = self.get(id).await?.to_stored();
        store.save(&record).await?;
        tracing::debug!(session_id = id, "session saved");
        Ok(())
    }

    /// Load session `id` from the store into the table as
    /// [`SessionState::Suspended`], replacing any live copy.
    ///
    /// # Errors
    ///
    /// [`ToolwireError::Config`] if no store is configured;
    /// [`ToolwireError::SessionNotFound`] if the store has no such record.
    pub async fn load(&self, id: &str) -> Result<Session> {
        let store = self.store()?;
        let record = store
            .load(id)
            .await?
            .ok_or_else(|| ToolwireError::SessionNotFound(id.to_string()))?;
        let session = Session::from_stored(record, self.inner.default_ttl)?;

        let mut sessions = self.inner.sessions.lock().await;
        if let Some(mut previous) = sessions.remove(id) {
            previous.disarm();
        }
        sessions.insert(
            session.id.clone(),
            Entry {
                session: session.clone(),
                generation: 0,
                timer: None,
            },
        );
        tracing::debug!(session_id = id, "session loaded");
        Ok(session)
    }

    fn store(&self) -> Result<&Arc<dyn SessionStore>> {
        self.inner
            .store
            .as_ref()
            .ok_or_else(|| ToolwireError::Config("no session store configured".into()))
    }

    async fn mutate(&self, id: &str, f: impl FnOnce(&mut Session)) -> Result<()> {
        let mut sessions = self.inner.sessions.lock().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| ToolwireError::SessionNotFound(id.to_string()))?;
        if entry.session.state == SessionState::Closed {
            return Err(ToolwireError::SessionExpired(format!("session {id} is closed")));
        }
        f(&mut entry.session);
        entry.session.last_activity_at = Utc::now();
        if entry.session.state == SessionState::Active {
            self.arm(id, entry);
        }
        Ok(())
    }

    /// (Re)start the TTL timer for an active session.
    fn arm(&self, id: &str, entry: &mut Entry) {
        entry.disarm();
        let generation = entry.generation;
        let ttl = entry.session.ttl;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let id = id.to_string();
        entry.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(inner) = weak.upgrade() else { return };
            let mut sessions = inner.sessions.lock().await;
            let Some(entry) = sessions.get_mut(&id) else { return };
            if entry.generation != generation || entry.session.state != SessionState::Active {
                return;
            }
            entry.timer = None;
            entry.generation += 1;
            if entry.session.apply(SessionTrigger::Suspend).is_ok() {
                entry
                    .session
                    .record("ttl_expired", json!({ "ttlMs": ttl.as_millis() as u64 }));
                tracing::info!(session_id = %id, "session suspended after TTL expiry");
            }
        }));
    }
}
