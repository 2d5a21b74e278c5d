//! Session records and the session state machine
//!
//! A [`Session`] is a stateful unit of work spanning one or more calls. Its
//! [`SessionState`] only moves along the edges listed in [`TRANSITIONS`];
//! [`SessionManager`] owns the live table, the TTL timers, and persistence.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, ToolwireError};
use crate::storage::StoredSession;

pub mod manager;

pub use manager::SessionManager;

/// Default time a session may stay idle while active.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(1800);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, handshake not started.
    Created,
    /// Handshake in progress.
    Initializing,
    /// Serving calls; the TTL timer is armed.
    Active,
    /// Idle or disconnected; must be resumed before serving calls.
    Suspended,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Initializing => "initializing",
            SessionState::Active => "active",
            SessionState::Suspended => "suspended",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Event that drives a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTrigger {
    /// Handshake started.
    Initialize,
    /// Handshake completed.
    InitializeSucceeded,
    /// Handshake failed; the session may try again.
    InitializeFailed,
    /// Explicit suspend, TTL expiry, or connection loss.
    Suspend,
    /// Return a suspended session to service.
    Resume,
    /// End the session.
    Close,
}

impl fmt::Display for SessionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionTrigger::Initialize => "initialize",
            SessionTrigger::InitializeSucceeded => "initialize_succeeded",
            SessionTrigger::InitializeFailed => "initialize_failed",
            SessionTrigger::Suspend => "suspend",
            SessionTrigger::Resume => "resume",
            SessionTrigger::Close => "close",
        };
        f.write_str(s)
    }
}

/// Legal `(from, trigger, to)` edges apart from `close`, which is legal
/// from every state.
pub const TRANSITIONS: &[(SessionState, SessionTrigger, SessionState)] = &[
    (SessionState::Created, SessionTrigger::Initialize, SessionState::Initializing),
    (SessionState::Initializing, SessionTrigger::InitializeSucceeded, SessionState::Active),
    (SessionState::Initializing, SessionTrigger::InitializeFailed, SessionState::Created),
    (SessionState::Active, SessionTrigger::Suspend, SessionState::Suspended),
    (SessionState::Suspended, SessionTrigger::Resume, SessionState::Active),
];

impl SessionState {
    /// State reached by applying `trigger`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::InvalidTransition`] for edges not in
    /// [`TRANSITIONS`].
    ///
    /// # Examples
    ///
    /// ```
    /// use toolwire::session::{SessionState, SessionTrigger};
    ///
    /// assert_eq!(
    ///     SessionState::Active.next(SessionTrigger::Suspend).unwrap(),
    ///     SessionState::Suspended
    /// );
    /// assert!(SessionState::Created.next(SessionTrigger::Resume).is_err());
    /// assert_eq!(
    ///     SessionState::Closed.next(SessionTrigger::Close).unwrap(),
    ///     SessionState::Closed
    /// );
    /// ```
    pub fn next(self, trigger: SessionTrigger) -> Result<SessionState> {
        if trigger == SessionTrigger::Close {
            return Ok(SessionState::Closed);
        }
        TRANSITIONS
            .iter()
            .find(|(from, t, _)| *from == self && *t == trigger)
            .map(|(_, _, to)| *to)
            .ok_or(ToolwireError::InvalidTransition {
                from: self,
                trigger,
            })
    }
}

/// One entry in a session's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Short event name, e.g. `transition` or `ttl_expired`.
    pub kind: String,
    /// Event details.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

/// A stateful unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Unique id (UUID v4).
    pub id: String,
    /// Owner, if known.
    pub user_id: Option<String>,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Caller-defined working context.
    pub context: HashMap<String, Value>,
    /// Caller-defined descriptive metadata.
    pub metadata: HashMap<String, Value>,
    /// Conversation messages attached to the session.
    pub messages: Vec<Value>,
    /// Idle time allowed while active.
    pub ttl: Duration,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation or touch.
    pub last_activity_at: DateTime<Utc>,
    /// Ordered record of lifecycle events.
    pub event_log: Vec<SessionEvent>,
    /// Parent in a session hierarchy.
    pub parent_id: Option<String>,
}

impl Session {
    /// A fresh session in [`SessionState::Created`].
    pub fn new(user_id: Option<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            state: SessionState::Created,
            context: HashMap::new(),
            metadata: HashMap::new(),
            messages: Vec::new(),
            ttl,
            created_at: now,
            last_activity_at: now,
            event_log: Vec::new(),
            parent_id: None,
        }
    }

    /// Append an event to the log.
    pub fn record(&mut self, kind: &str, detail: Value) {
        self.event_log.push(SessionEvent {
            at: Utc::now(),
            kind: kind.to_string(),
            detail,
        });
    }

    /// Apply `trigger`, logging the edge. Returns the new state.
    pub fn apply(&mut self, trigger: SessionTrigger) -> Result<SessionState> {
        let from = self.state;
        let to = from.next(trigger)?;
        if from != to {
            self.state = to;
            self.record(
                "transition",
                json!({ "from": from, "trigger": trigger, "to": to }),
            );
        }
        Ok(to)
    }

    /// Serialize into the storage record shape.
    pub fn to_stored(&self) -> StoredSession {
        StoredSession {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            data: json!({
                "context": self.context,
                "metadata": self.metadata,
                "eventLog": self.event_log,
                "ttlMs": self.ttl.as_millis() as u64,
                "lastActivityAt": self.last_activity_at,
            }),
            messages: self.messages.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
            parent_id: self.parent_id.clone(),
        }
    }

    /// Rebuild from a storage record. The result is always
    /// [`SessionState::Suspended`].
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Storage`] if `data` has the wrong shape.
    pub fn from_stored(record: StoredSession, default_ttl: Duration) -> Result<Self> {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase", default)]
        struct Data {
            context: HashMap<String, Value>,
            metadata: HashMap<String, Value>,
            event_log: Vec<SessionEvent>,
            ttl_ms: Option<u64>,
            last_activity_at: Option<DateTime<Utc>>,
        }

        let data: Data = serde_json::from_value(record.data).map_err(|e| {
            ToolwireError::Storage(format!("session {} has malformed data: {e}", record.id))
        })?;
        let mut session = Self {
            id: record.id,
            user_id: record.user_id,
            state: SessionState::Suspended,
            context: data.context,
            metadata: data.metadata,
            messages: record.messages,
            ttl: data.ttl_ms.map(Duration::from_millis).unwrap_or(default_ttl),
            created_at: record.created_at,
            last_activity_at: data.last_activity_at.unwrap_or(record.updated_at),
            event_log: data.event_log,
            parent_id: record.parent_id,
        };
        session.record("loaded", Value::Null);
        Ok(session)
    }
}
