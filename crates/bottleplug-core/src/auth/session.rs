use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::{KeyValueStore, StorageError};

/// Session record storage key
pub const SESSION_KEY: &str = "bottleplug_session";
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const SESSION_ID_KEY: &str = "session_id";
/// Last identity-provider token, used when the provider itself fails
pub const ID_TOKEN_KEY: &str = "firebase_id_token";
pub const ID_TOKEN_EXP_KEY: &str = "firebase_id_token_exp";
const LEGACY_SESSION_START_KEY: &str = "user_session_start";
const LEGACY_SESSION_DURATION_KEY: &str = "user_session_duration";

/// Every key erased by `SessionManager::clear_session`
pub const CREDENTIAL_KEYS: [&str; 8] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    SESSION_ID_KEY,
    SESSION_KEY,
    LEGACY_SESSION_START_KEY,
    LEGACY_SESSION_DURATION_KEY,
    ID_TOKEN_KEY,
    ID_TOKEN_EXP_KEY,
];

/// Session length, independent of token expiry
const SESSION_DURATION_HOURS: i64 = 24;

/// Client-side record of the signed-in user's validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Session {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub started_at: DateTime<Utc>,
    /// Signed in through the backend only, without the identity provider
    #[serde(default)]
    pub backend_only: bool,
}

impl Session {
    pub fn new(uid: impl Into<String>, email: Option<String>, backend_only: bool) -> Self {
        Self {
            uid: uid.into(),
            email,
            started_at: Utc::now(),
            backend_only,
        }
    }

    pub fn duration() -> Duration {
        Duration::hours(SESSION_DURATION_HOURS)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.started_at + Self::duration()
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now - self.started_at < Self::duration()
    }

    pub fn is_expired(&self) -> bool {
        !self.is_valid_at(Utc::now())
    }

    pub fn time_until_expiry(&self) -> Duration {
        (self.expires_at() - Utc::now()).max(Duration::zero())
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes()
    }
}

/// Access/refresh credential pair issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: Option<String>,
}

/// Owns the session record and backend tokens in a `KeyValueStore`.
/// Clone is cheap; clones share the same store.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Load the session record. A record that fails to parse is reported as absent.
    pub fn load(&self) -> Result<Option<Session>, StorageError> {
        let Some(raw) = self.store.get(SESSION_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(error = %e, "Stored session record is malformed");
                Ok(None)
            }
        }
    }

    /// True iff a session exists and started less than 24h ago
    pub fn is_session_valid(&self) -> bool {
        match self.load() {
            Ok(Some(session)) => session.is_valid_at(Utc::now()),
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "Failed to load session for validity check");
                false
            }
        }
    }

    /// Record `now` as the session start
    pub fn start_session(
        &self,
        uid: &str,
        email: Option<&str>,
        backend_only: bool,
    ) -> Result<Session, StorageError> {
        let session = Session::new(uid, email.map(str::to_string), backend_only);
        self.store
            .set(SESSION_KEY, &serde_json::to_string(&session)?)?;
        info!(uid = %session.uid, backend_only, "Session started, expires in 24 hours");
        Ok(session)
    }

    /// Erase every session and token key, whatever was stored before
    pub fn clear_session(&self) -> Result<(), StorageError> {
        self.store.remove_many(&CREDENTIAL_KEYS)?;
        debug!("Cleared session and token storage");
        Ok(())
    }

    /// Start-up restore: returns the stored session if it is still valid.
    /// Expired or malformed records clear all credentials.
    pub fn check_existing_session(&self) -> Result<Option<Session>, StorageError> {
        let has_record = self.store.get(SESSION_KEY)?.is_some();
        match self.load()? {
            Some(session) if session.is_valid_at(Utc::now()) => {
                debug!(
                    uid = %session.uid,
                    hours_remaining = session.time_until_expiry().num_hours(),
                    "Valid session found"
                );
                Ok(Some(session))
            }
            Some(_) => {
                info!("Session expired, clearing credentials");
                self.clear_session()?;
                Ok(None)
            }
            None => {
                if has_record {
                    self.clear_session()?;
                }
                Ok(None)
            }
        }
    }

    /// Time left in the current session, zero when expired or absent
    pub fn remaining(&self) -> Duration {
        self.load()
            .ok()
            .flatten()
            .map(|s| s.time_until_expiry())
            .unwrap_or_else(Duration::zero)
    }

    // ===== Tokens =====

    pub fn access_token(&self) -> Result<Option<String>, StorageError> {
        self.non_empty(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Result<Option<String>, StorageError> {
        self.non_empty(REFRESH_TOKEN_KEY)
    }

    pub fn session_id(&self) -> Result<Option<String>, StorageError> {
        self.non_empty(SESSION_ID_KEY)
    }

    pub fn cached_id_token(&self) -> Result<Option<String>, StorageError> {
        self.non_empty(ID_TOKEN_KEY)
    }

    pub fn store_tokens(&self, tokens: &TokenPair) -> Result<(), StorageError> {
        self.store.set(ACCESS_TOKEN_KEY, &tokens.access)?;
        if let Some(ref refresh) = tokens.refresh {
            self.store.set(REFRESH_TOKEN_KEY, refresh)?;
        }
        Ok(())
    }

    pub fn store_session_id(&self, session_id: &str) -> Result<(), StorageError> {
        self.store.set(SESSION_ID_KEY, session_id)
    }

    pub fn cache_id_token(&self, token: &str, expires_at: Option<DateTime<Utc>>) -> Result<(), StorageError> {
        self.store.set(ID_TOKEN_KEY, token)?;
        match expires_at {
            Some(exp) => self
                .store
                .set(ID_TOKEN_EXP_KEY, &exp.timestamp_millis().to_string()),
            None => self.store.remove(ID_TOKEN_EXP_KEY),
        }
    }

    fn non_empty(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.store.get(key)?.filter(|v| !v.is_empty()))
    }
}
