//! Opaque, signed pagination cursors
//!
//! A cursor token is `base64url(payload) "." base64url(tag)` where `payload`
//! is the compact JSON `{"s":scope,"o":offset,"p":page_size,"t":issued_at}`
//! and `tag` is HMAC-SHA256 over the encoded payload. The scope names the
//! list the cursor was issued for, so a `tools/list` cursor is refused by
//! `prompts/list`. Clients treat the token as opaque; the server rejects
//! anything it did not sign, anything issued for another list, and anything
//! older than the codec's validity window.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Result, ToolwireError};

type HmacSha256 = Hmac<Sha256>;

/// Default lifetime of an issued cursor.
pub const DEFAULT_CURSOR_VALIDITY: Duration = Duration::from_secs(3600);

/// Decoded pagination position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// List the cursor belongs to, e.g. `tools` or `prompts`.
    #[serde(rename = "s")]
    pub scope: String,
    /// Index of the first item of the page this cursor points at.
    #[serde(rename = "o")]
    pub offset: usize,
    /// Page size in effect when the cursor was issued.
    #[serde(rename = "p")]
    pub page_size: usize,
    /// Unix seconds at issue time.
    #[serde(rename = "t")]
    pub issued_at: i64,
}

impl Cursor {
    /// A cursor into `scope`, issued now.
    pub fn new(scope: impl Into<String>, offset: usize, page_size: usize) -> Self {
        Self {
            scope: scope.into(),
            offset,
            page_size,
            issued_at: Utc::now().timestamp(),
        }
    }
}

/// Signs and verifies [`Cursor`] tokens.
#[derive(Clone)]
pub struct CursorCodec {
    mac: HmacSha256,
    validity: Duration,
}

impl std::fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorCodec")
            .field("mac", &"<redacted>")
            .field("validity", &self.validity)
            .finish()
    }
}

impl CursorCodec {
    /// Codec keyed by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Config`] if `key` is empty.
    pub fn new(key: impl Into<Vec<u8>>, validity: Duration) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(ToolwireError::Config("cursor secret must not be empty".into()));
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(&key)
            .map_err(|e| ToolwireError::Config(format!("cursor secret rejected: {e}")))?;
        Ok(Self { mac, validity })
    }

    /// Codec keyed by a fresh random 32-byte secret. Cursors do not survive
    /// a restart.
    pub fn random(validity: Duration) -> Result<Self> {
        let key: [u8; 32] = rand::random();
        Self::new(key.to_vec(), validity)
    }

    /// How long an issued cursor stays valid.
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Encode and sign `cursor`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use toolwire::mcp::cursor::{Cursor, CursorCodec};
    ///
    /// let codec = CursorCodec::new(b"secret".to_vec(), Duration::from_secs(60)).unwrap();
    /// let cursor = Cursor::new("tools", 4, 2);
    /// let token = codec.encode(&cursor);
    /// assert_eq!(codec.decode(&token).unwrap(), cursor);
    /// assert!(codec.decode_for(&token, "prompts").is_err());
    /// ```
    pub fn encode(&self, cursor: &Cursor) -> String {
        let payload = serde_json::to_vec(cursor).unwrap_or_default();
        let encoded = URL_SAFE_NO_PAD.encode(payload);
        let tag = URL_SAFE_NO_PAD.encode(self.tag(encoded.as_bytes()));
        format!("{encoded}.{tag}")
    }

    /// Verify and decode `token`, checking expiry against the current time.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Pagination`] if the token is malformed, the
    /// signature does not match, or the cursor has expired.
    pub fn decode(&self, token: &str) -> Result<Cursor> {
        self.decode_at(token, Utc::now().timestamp())
    }

    /// Like [`decode`](Self::decode), and also require that the cursor was
    /// issued for `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Pagination`] for the same reasons as
    /// [`decode`](Self::decode), or if the cursor belongs to another list.
    pub fn decode_for(&self, token: &str, scope: &str) -> Result<Cursor> {
        let cursor = self.decode(token)?;
        if cursor.scope != scope {
            return Err(invalid("cursor belongs to another list"));
        }
        Ok(cursor)
    }

    /// Like [`decode`](Self::decode) with an explicit "now" in Unix seconds.
    pub fn decode_at(&self, token: &str, now: i64) -> Result<Cursor> {
        let (encoded, tag) = token
            .split_once('.')
            .ok_or_else(|| invalid("missing signature"))?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| invalid("signature is not base64url"))?;

        let mut mac = self.mac.clone();
        mac.update(encoded.as_bytes());
        mac.verify_slice(&tag)
            .map_err(|_| invalid("signature mismatch"))?;

        let payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| invalid("payload is not base64url"))?;
        let cursor: Cursor =
            serde_json::from_slice(&payload).map_err(|_| invalid("payload is not a cursor"))?;

        let age = now.saturating_sub(cursor.issued_at);
        if age < 0 || age as u64 > self.validity.as_secs() {
            return Err(invalid("cursor expired"));
        }
        Ok(cursor)
    }

    fn tag(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

fn invalid(why: &str) -> ToolwireError {
    ToolwireError::Pagination(format!("invalid cursor: {why}"))
}
