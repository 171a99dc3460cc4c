use std::{collections::HashMap, fmt, sync::Mutex};

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, RedisError, Script, SetExpiry, SetOptions, aio::MultiplexedConnection};
use serde::{Deserialize, Serialize};

// Redis key prefix
fn code_key(email: &str) -> String {
    format!("password_reset:code:{}", email)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResetCodeEntry {
    pub code: i64,
    pub expires_at: i64, // Unix timestamp
}

/// How a verification attempt resolved against the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Code matched before expiry; the entry has been consumed.
    Verified,
    /// Entry exists and is live, but the submitted code differs. The entry
    /// is kept so the user can retry within the TTL.
    Mismatch,
    /// Entry existed but its TTL had elapsed; it has been deleted.
    Expired,
    /// No entry for this email.
    Missing,
}

#[derive(Debug)]
pub enum StoreError {
    Redis(RedisError),
    Serialization(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Redis(e) => write!(f, "redis error: {}", e),
            StoreError::Serialization(e) => write!(f, "serialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        StoreError::Redis(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

/// Keyed store for password reset codes, one live entry per email.
#[async_trait]
pub trait ResetCodeStore: Send + Sync {
    /// Inserts the entry for `email`, replacing any previous one. The entry
    /// expires `ttl_seconds` from now (negative values produce an entry that
    /// is already expired).
    async fn put(&self, email: &str, code: i64, ttl_seconds: i64) -> Result<(), StoreError>;

    /// Returns the entry for `email` if it exists and has not expired. An
    /// expired entry is deleted on access and reported as absent.
    async fn get(&self, email: &str) -> Result<Option<ResetCodeEntry>, StoreError>;

    /// Deletes the entry for `email`; deleting an absent entry is fine.
    async fn remove(&self, email: &str) -> Result<(), StoreError>;

    /// Atomic check-and-delete for verification: looks the entry up, applies
    /// the expiry check, compares the codes and deletes the entry when it is
    /// consumed, all in one step so two concurrent verifies cannot both
    /// spend the same code. A `code` of `None` (an unparseable submission)
    /// never matches.
    async fn consume(&self, email: &str, code: Option<i64>) -> Result<VerifyOutcome, StoreError>;
}

/// In-process store backend, the default when no `REDIS_URL` is configured.
#[derive(Default)]
pub struct MemoryResetStore {
    entries: Mutex<HashMap<String, ResetCodeEntry>>,
}

impl MemoryResetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResetCodeStore for MemoryResetStore {
    async fn put(&self, email: &str, code: i64, ttl_seconds: i64) -> Result<(), StoreError> {
        let entry = ResetCodeEntry {
            code,
            expires_at: Utc::now().timestamp() + ttl_seconds,
        };
        self.entries.lock().unwrap().insert(email.to_owned(), entry);
        Ok(())
    }

    async fn get(&self, email: &str) -> Result<Option<ResetCodeEntry>, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(email) {
            Some(entry) if Utc::now().timestamp() > entry.expires_at => {
                entries.remove(email);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.clone())),
            None => Ok(None),
        }
    }

    async fn remove(&self, email: &str) -> Result<(), StoreError> {
        self.entries.lock().unwrap().remove(email);
        Ok(())
    }

    async fn consume(&self, email: &str, code: Option<i64>) -> Result<VerifyOutcome, StoreError> {
        // Lookup, expiry check, comparison and deletion all happen under one
        // guard.
        let mut entries = self.entries.lock().unwrap();
        let entry = match entries.get(email) {
            Some(entry) => entry,
            None => return Ok(VerifyOutcome::Missing),
        };
        if Utc::now().timestamp() > entry.expires_at {
            entries.remove(email);
            return Ok(VerifyOutcome::Expired);
        }
        if code != Some(entry.code) {
            return Ok(VerifyOutcome::Mismatch);
        }
        entries.remove(email);
        Ok(VerifyOutcome::Verified)
    }
}

// Keeps entries readable for a while past their logical expiry so a late
// verification can still be answered "expired" rather than "missing";
// Redis eviction collects them afterwards.
const EXPIRED_RETENTION_SECONDS: i64 = 60 * 60;

// Redis runs a script as one atomic unit, which gives consume the same
// no-double-spend property the in-memory mutex provides.
const CONSUME_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return 'missing'
end
local entry = cjson.decode(raw)
if tonumber(ARGV[2]) > entry.expires_at then
  redis.call('DEL', KEYS[1])
  return 'expired'
end
if ARGV[1] == '' or tonumber(ARGV[1]) ~= entry.code then
  return 'mismatch'
end
redis.call('DEL', KEYS[1])
return 'verified'
"#;

/// Redis-backed store for deployments running more than one instance of the
/// backend.
pub struct RedisResetStore {
    conn: MultiplexedConnection,
    consume_script: Script,
}

impl RedisResetStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            consume_script: Script::new(CONSUME_SCRIPT),
        })
    }
}

#[async_trait]
impl ResetCodeStore for RedisResetStore {
    async fn put(&self, email: &str, code: i64, ttl_seconds: i64) -> Result<(), StoreError> {
        let entry = ResetCodeEntry {
            code,
            expires_at: Utc::now().timestamp() + ttl_seconds,
        };
        let retention = (ttl_seconds + EXPIRED_RETENTION_SECONDS).max(1) as u64;

        let mut conn = self.conn.clone();
        let result: Result<(), RedisError> = conn
            .set_options(
                code_key(email),
                serde_json::to_string(&entry)?,
                SetOptions::default().with_expiration(SetExpiry::EX(retention)),
            )
            .await;
        result?;
        Ok(())
    }

    async fn get(&self, email: &str) -> Result<Option<ResetCodeEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(code_key(email)).await?;
        let raw = match raw {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let entry: ResetCodeEntry = serde_json::from_str(&raw)?;
        if Utc::now().timestamp() > entry.expires_at {
            let _: Result<(), RedisError> = conn.del(code_key(email)).await;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn remove(&self, email: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(code_key(email)).await?;
        Ok(())
    }

    async fn consume(&self, email: &str, code: Option<i64>) -> Result<VerifyOutcome, StoreError> {
        let submitted = code.map(|c| c.to_string()).unwrap_or_default();
        let now = Utc::now().timestamp();

        let mut conn = self.conn.clone();
        let verdict: String = self
            .consume_script
            .key(code_key(email))
            .arg(submitted)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;

        Ok(match verdict.as_str() {
            "verified" => VerifyOutcome::Verified,
            "mismatch" => VerifyOutcome::Mismatch,
            "expired" => VerifyOutcome::Expired,
            _ => VerifyOutcome::Missing,
        })
    }
}
