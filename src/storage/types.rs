use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted form of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    /// Unique identifier for the session
    pub id: String,
    /// Owner of the session, if known
    pub user_id: Option<String>,
    /// Context, metadata, event log, and TTL
    pub data: Value,
    /// Conversation messages attached to the session
    pub messages: Vec<Value>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session was last updated
    pub updated_at: DateTime<Utc>,
    /// Parent session in a hierarchy
    pub parent_id: Option<String>,
}

/// Listing entry for a stored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Unique identifier for the session
    pub id: String,
    /// Owner of the session, if known
    pub user_id: Option<String>,
    /// When the session was last updated
    pub updated_at: DateTime<Utc>,
    /// Parent session in a hierarchy
    pub parent_id: Option<String>,
    /// Number of messages in the session
    pub message_count: usize,
}
