use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const EXPIRES_AT_KEY: &str = "expiresAt";

/// Access/refresh token pair issued by the legal-data service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && now < self.expires_at
    }
}

/// Persisted token state shared by every request.
///
/// Absence of credentials is an ordinary state, so none of the operations
/// report errors.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Option<Credentials>;

    fn set(&self, credentials: Credentials);

    fn clear(&self);

    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.get()
            .map(|credentials| credentials.is_valid_at(now))
            .unwrap_or(false)
    }
}

/// Process-local store, mostly for tests.
#[derive(Default)]
pub struct MemoryTokenStore {
    inner: RwLock<Option<Credentials>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            inner: RwLock::new(Some(credentials)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<Credentials> {
        self.inner.read().clone()
    }

    fn set(&self, credentials: Credentials) {
        *self.inner.write() = Some(credentials);
    }

    fn clear(&self) {
        self.inner.write().take();
    }
}

/// Key/value document on disk holding the token triple next to keys owned by
/// other parts of the portal (`userEmail`, cached profile JSON, ...).
///
/// Only the three token keys are ever rewritten; everything else in the
/// document is carried over untouched.
pub struct PersistedTokenStore {
    path: Option<PathBuf>,
    entries: RwLock<Map<String, Value>>,
}

impl PersistedTokenStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Map<String, Value>>(&contents) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %path.display(), %err, "ignoring unreadable session file");
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        Self {
            path: Some(path),
            entries: RwLock::new(entries),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(Map::new()),
        }
    }

    pub fn entry(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    pub fn set_entry(&self, key: impl Into<String>, value: Value) {
        let mut entries = self.entries.write();
        entries.insert(key.into(), value);
        self.flush(&entries);
    }

    fn flush(&self, entries: &Map<String, Value>) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        let result = serde_json::to_vec_pretty(entries)
            .map_err(std::io::Error::from)
            .and_then(|bytes| fs::write(path, bytes));
        if let Err(err) = result {
            warn!(path = %path.display(), %err, "failed to persist session state");
        }
    }
}

impl TokenStore for PersistedTokenStore {
    fn get(&self) -> Option<Credentials> {
        let entries = self.entries.read();
        let access_token = entries.get(ACCESS_TOKEN_KEY)?.as_str()?;
        // An access token without a readable expiry is treated as no token.
        let expires_at = entries
            .get(EXPIRES_AT_KEY)?
            .as_str()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())?
            .with_timezone(&Utc);
        let refresh_token = entries
            .get(REFRESH_TOKEN_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default();
        Some(Credentials {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at,
        })
    }

    fn set(&self, credentials: Credentials) {
        let mut entries = self.entries.write();
        entries.insert(
            ACCESS_TOKEN_KEY.to_string(),
            Value::String(credentials.access_token),
        );
        entries.insert(
            REFRESH_TOKEN_KEY.to_string(),
            Value::String(credentials.refresh_token),
        );
        entries.insert(
            EXPIRES_AT_KEY.to_string(),
            Value::String(credentials.expires_at.to_rfc3339()),
        );
        self.flush(&entries);
    }

    fn clear(&self) {
        let mut entries = self.entries.write();
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, EXPIRES_AT_KEY] {
            entries.remove(key);
        }
        self.flush(&entries);
    }
}
