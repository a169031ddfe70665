//! Store adapter: typed operations over the backing key-value store.
//!
//! Two backends implement [`KeyStore`]: Redis (production) and an embedded
//! in-memory store for tests and local development. The service holds two
//! handles built from distinct credential pairs — the validator (read-only on
//! documents, write on stream/counters/sidecar) and the manager (full
//! read-write). The privilege split is enforced by store-side ACLs on those
//! credentials, not by this trait.
//!
//! Key layout (shared contract, do not change):
//! - `project:{project_id}`                         JSON document
//! - `apikey:{project_id}:{key_id}`                 JSON document
//! - `apiprojectkeys:{project_id}`                  set of key ids
//! - `apimeta:{project_id}:{key_id}`                usage hash
//! - `ratelimit:key:{project_id}:{key_id}:{minute}` counter, 120 s TTL
//! - `audit:keylookup`                              stream

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::{APIKeyDocument, AuditEvent, ProjectDocument, UsageMeta};
use crate::util::now_iso8601;

/// Requests allowed per key per minute unless a caller overrides it.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u64 = 100;

/// Rate windows outlive their minute by one more to absorb clock skew.
const RATE_WINDOW_TTL: Duration = Duration::from_secs(120);

/// Socket read/write timeout and pool checkout timeout.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

const AUDIT_STREAM: &str = "audit:keylookup";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (connection, IO, timeout).
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store answered with a command-level failure.
    #[error("store command failed: {0}")]
    Backend(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ==============================
// Key naming
// ==============================

fn project_key(project_id: &str) -> String {
    format!("project:{project_id}")
}

fn apikey_key(project_id: &str, key_id: &str) -> String {
    format!("apikey:{project_id}:{key_id}")
}

fn apiprojectkeys_key(project_id: &str) -> String {
    format!("apiprojectkeys:{project_id}")
}

fn apimeta_key(project_id: &str, key_id: &str) -> String {
    format!("apimeta:{project_id}:{key_id}")
}

fn ratelimit_key(project_id: &str, key_id: &str, minute: u64) -> String {
    format!("ratelimit:key:{project_id}:{key_id}:{minute}")
}

/// The current minute bucket: floor(epoch seconds / 60).
fn current_minute() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        / 60
}

// ==============================
// Storage trait
// ==============================

/// Typed operations over the backing store. Blocking; HTTP handlers bridge
/// through `web::block`.
pub trait KeyStore: Send + Sync {
    /// Probe store liveness.
    fn ping(&self) -> bool;

    fn get_project(&self, project_id: &str) -> Result<Option<ProjectDocument>, StoreError>;

    /// Unconditional overwrite; callers enforce any existence check.
    fn store_project(&self, doc: &ProjectDocument) -> Result<(), StoreError>;

    /// Absent and malformed documents both read as `None`; transport
    /// failures surface as `Err`.
    fn get_api_key(
        &self,
        project_id: &str,
        key_id: &str,
    ) -> Result<Option<APIKeyDocument>, StoreError>;

    /// Atomic triple: write the document, add the key id to the project set,
    /// initialize the usage sidecar to `{usage_count: 0, last_used: ""}`.
    fn store_api_key(&self, doc: &APIKeyDocument) -> Result<(), StoreError>;

    /// Flip `disabled` to true on the existing document. Returns false when
    /// the document is absent.
    fn revoke_api_key(&self, project_id: &str, key_id: &str) -> Result<bool, StoreError>;

    /// Page of documents in the key set's iteration order.
    fn list_project_keys(
        &self,
        project_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<APIKeyDocument>, StoreError>;

    fn log_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError>;

    /// Increment the key's minute bucket and report whether the request is
    /// allowed (count <= limit). Fails open: a store failure allows.
    fn check_rate_limit(&self, project_id: &str, key_id: &str, limit_per_minute: u64) -> bool;

    /// Increment `usage_count` and stamp `last_used`.
    fn update_key_usage(&self, project_id: &str, key_id: &str) -> Result<(), StoreError>;
}

/// Backend selection for both store handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl StoreBackend {
    /// Parse a backend spec string: "redis" or "memory".
    pub fn from_spec(spec: &str) -> Option<Self> {
        match spec.trim().to_ascii_lowercase().as_str() {
            "redis" => Some(Self::Redis),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

// ==============================
// Redis backend
// ==============================

/// Connection settings shared by both principals.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

/// One principal's ACL credentials.
#[derive(Debug, Clone)]
pub struct StoreCredentials {
    pub username: String,
    pub password: Option<String>,
}

pub struct RedisConnectionManager {
    client: redis::Client,
}

impl r2d2::ManageConnection for RedisConnectionManager {
    type Connection = redis::Connection;
    type Error = redis::RedisError;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let conn = self.client.get_connection()?;
        conn.set_read_timeout(Some(SOCKET_TIMEOUT))?;
        conn.set_write_timeout(Some(SOCKET_TIMEOUT))?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        let _: String = redis::cmd("PING").query(conn)?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        // r2d2 recycles on errors.
        false
    }
}

pub struct RedisKeyStore {
    pool: r2d2::Pool<RedisConnectionManager>,
}

impl RedisKeyStore {
    pub fn connect(config: &RedisConfig, creds: &StoreCredentials) -> Result<Self, StoreError> {
        let url = match &creds.password {
            Some(password) => format!(
                "redis://{}:{}@{}:{}/{}",
                creds.username, password, config.host, config.port, config.db
            ),
            None => format!("redis://{}:{}/{}", config.host, config.port, config.db),
        };
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let manager = RedisConnectionManager { client };
        let max_size = std::env::var("KEYMASTER_REDIS_POOL_MAX")
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(16);
        let pool = r2d2::Pool::builder()
            .max_size(max_size)
            .connection_timeout(SOCKET_TIMEOUT)
            .build(manager)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    fn map_err(e: redis::RedisError) -> StoreError {
        if e.is_io_error() || e.is_timeout() || e.is_connection_refusal() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }

    /// Run one round-trip, retrying once on timeout with a fresh connection.
    fn with_conn<T>(
        &self,
        op: impl Fn(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, StoreError> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        match op(&mut *conn) {
            Ok(v) => Ok(v),
            Err(e) if e.is_timeout() => {
                drop(conn);
                let mut conn = self
                    .pool
                    .get()
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                op(&mut *conn).map_err(Self::map_err)
            }
            Err(e) => Err(Self::map_err(e)),
        }
    }

    fn get_json_doc<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let raw: Option<String> =
            self.with_conn(|conn| redis::cmd("JSON.GET").arg(key).arg("$").query(conn))?;
        Ok(raw.and_then(|s| parse_json_root(&s, key)))
    }
}

/// JSON.GET with a `$` path wraps the root in a one-element array. Malformed
/// payloads read as absent.
fn parse_json_root<T: DeserializeOwned>(raw: &str, key: &str) -> Option<T> {
    match serde_json::from_str::<Vec<T>>(raw) {
        Ok(mut docs) if !docs.is_empty() => Some(docs.remove(0)),
        Ok(_) => None,
        Err(err) => {
            warn!("malformed JSON document at {key}: {err}");
            None
        }
    }
}

impl KeyStore for RedisKeyStore {
    fn ping(&self) -> bool {
        self.with_conn(|conn| redis::cmd("PING").query::<String>(conn))
            .is_ok()
    }

    fn get_project(&self, project_id: &str) -> Result<Option<ProjectDocument>, StoreError> {
        self.get_json_doc(&project_key(project_id))
    }

    fn store_project(&self, doc: &ProjectDocument) -> Result<(), StoreError> {
        let payload = serde_json::to_string(doc)?;
        self.with_conn(|conn| {
            redis::cmd("JSON.SET")
                .arg(project_key(&doc.project_id))
                .arg("$")
                .arg(&payload)
                .query(conn)
        })
    }

    fn get_api_key(
        &self,
        project_id: &str,
        key_id: &str,
    ) -> Result<Option<APIKeyDocument>, StoreError> {
        self.get_json_doc(&apikey_key(project_id, key_id))
    }

    fn store_api_key(&self, doc: &APIKeyDocument) -> Result<(), StoreError> {
        let payload = serde_json::to_string(doc)?;
        let doc_key = apikey_key(&doc.project_id, &doc.key_id);
        let set_key = apiprojectkeys_key(&doc.project_id);
        let meta_key = apimeta_key(&doc.project_id, &doc.key_id);
        // MULTI/EXEC so a crash cannot leave a document without its set
        // membership or sidecar.
        self.with_conn(|conn| {
            redis::pipe()
                .atomic()
                .cmd("JSON.SET")
                .arg(&doc_key)
                .arg("$")
                .arg(&payload)
                .ignore()
                .cmd("SADD")
                .arg(&set_key)
                .arg(&doc.key_id)
                .ignore()
                .cmd("HSET")
                .arg(&meta_key)
                .arg("usage_count")
                .arg(0)
                .arg("last_used")
                .arg("")
                .ignore()
                .query(conn)
        })
    }

    fn revoke_api_key(&self, project_id: &str, key_id: &str) -> Result<bool, StoreError> {
        let result = self.with_conn(|conn| {
            redis::cmd("JSON.SET")
                .arg(apikey_key(project_id, key_id))
                .arg("$.disabled")
                .arg("true")
                .query::<Option<String>>(conn)
        });
        match result {
            Ok(reply) => Ok(reply.is_some()),
            // JSON.SET on a non-root path of a missing key answers with an
            // error reply; treat it as "document absent".
            Err(StoreError::Backend(err)) => {
                warn!("revoke on {project_id}:{key_id} failed: {err}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn list_project_keys(
        &self,
        project_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<APIKeyDocument>, StoreError> {
        let key_ids: Vec<String> = self.with_conn(|conn| {
            redis::cmd("SMEMBERS")
                .arg(apiprojectkeys_key(project_id))
                .query(conn)
        })?;

        let mut docs = Vec::new();
        for key_id in key_ids.into_iter().skip(offset).take(limit) {
            if let Some(doc) = self.get_api_key(project_id, &key_id)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    fn log_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let mut cmd = redis::cmd("XADD");
            cmd.arg(AUDIT_STREAM).arg("*");
            for (field, value) in event.to_stream_fields() {
                cmd.arg(field).arg(value);
            }
            cmd.query::<String>(conn)?;
            Ok(())
        })
    }

    fn check_rate_limit(&self, project_id: &str, key_id: &str, limit_per_minute: u64) -> bool {
        let rate_key = ratelimit_key(project_id, key_id, current_minute());
        let result = self.with_conn(|conn| {
            redis::pipe()
                .cmd("INCR")
                .arg(&rate_key)
                .cmd("EXPIRE")
                .arg(&rate_key)
                .arg(RATE_WINDOW_TTL.as_secs())
                .ignore()
                .query::<(u64,)>(conn)
        });
        match result {
            Ok((count,)) => count <= limit_per_minute,
            Err(err) => {
                // Fail open: a counter outage must not deny an
                // already-authenticated request.
                error!("rate limit check failed for {project_id}:{key_id}: {err}");
                true
            }
        }
    }

    fn update_key_usage(&self, project_id: &str, key_id: &str) -> Result<(), StoreError> {
        let meta_key = apimeta_key(project_id, key_id);
        let last_used = now_iso8601();
        self.with_conn(|conn| {
            redis::pipe()
                .cmd("HINCRBY")
                .arg(&meta_key)
                .arg("usage_count")
                .arg(1)
                .ignore()
                .cmd("HSET")
                .arg(&meta_key)
                .arg("last_used")
                .arg(&last_used)
                .ignore()
                .query(conn)
        })
    }
}

// ==============================
// In-memory backend
// ==============================

struct RateWindow {
    count: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryInner {
    projects: HashMap<String, ProjectDocument>,
    api_keys: HashMap<(String, String), APIKeyDocument>,
    /// Key-id sets in insertion order, so pagination is deterministic.
    key_sets: HashMap<String, Vec<String>>,
    usage: HashMap<(String, String), UsageMeta>,
    audit: Vec<AuditEvent>,
    rate_windows: HashMap<(String, String, u64), RateWindow>,
}

/// Embedded store for tests and local development. What a Redis deployment
/// inspects via redis-cli (audit stream, usage sidecars) is exposed here as
/// accessor methods.
#[derive(Default)]
pub struct MemoryKeyStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle suitable for both principals.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.inner.lock().expect("lock").audit.clone()
    }

    pub fn usage(&self, project_id: &str, key_id: &str) -> Option<UsageMeta> {
        self.inner
            .lock()
            .expect("lock")
            .usage
            .get(&(project_id.to_string(), key_id.to_string()))
            .cloned()
    }

    pub fn key_set(&self, project_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .expect("lock")
            .key_sets
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn ping(&self) -> bool {
        true
    }

    fn get_project(&self, project_id: &str) -> Result<Option<ProjectDocument>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("lock")
            .projects
            .get(project_id)
            .cloned())
    }

    fn store_project(&self, doc: &ProjectDocument) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("lock")
            .projects
            .insert(doc.project_id.clone(), doc.clone());
        Ok(())
    }

    fn get_api_key(
        &self,
        project_id: &str,
        key_id: &str,
    ) -> Result<Option<APIKeyDocument>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("lock")
            .api_keys
            .get(&(project_id.to_string(), key_id.to_string()))
            .cloned())
    }

    fn store_api_key(&self, doc: &APIKeyDocument) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("lock");
        let id = (doc.project_id.clone(), doc.key_id.clone());
        inner.api_keys.insert(id.clone(), doc.clone());
        let set = inner.key_sets.entry(doc.project_id.clone()).or_default();
        if !set.contains(&doc.key_id) {
            set.push(doc.key_id.clone());
        }
        inner.usage.insert(id, UsageMeta::default());
        Ok(())
    }

    fn revoke_api_key(&self, project_id: &str, key_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("lock");
        match inner
            .api_keys
            .get_mut(&(project_id.to_string(), key_id.to_string()))
        {
            Some(doc) => {
                doc.disabled = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_project_keys(
        &self,
        project_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<APIKeyDocument>, StoreError> {
        let inner = self.inner.lock().expect("lock");
        let Some(set) = inner.key_sets.get(project_id) else {
            return Ok(Vec::new());
        };
        Ok(set
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|key_id| {
                inner
                    .api_keys
                    .get(&(project_id.to_string(), key_id.clone()))
                    .cloned()
            })
            .collect())
    }

    fn log_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.inner.lock().expect("lock").audit.push(event.clone());
        Ok(())
    }

    fn check_rate_limit(&self, project_id: &str, key_id: &str, limit_per_minute: u64) -> bool {
        let mut inner = self.inner.lock().expect("lock");
        let now = Instant::now();
        inner.rate_windows.retain(|_, w| w.expires_at > now);

        let window = inner
            .rate_windows
            .entry((project_id.to_string(), key_id.to_string(), current_minute()))
            .or_insert(RateWindow {
                count: 0,
                expires_at: now + RATE_WINDOW_TTL,
            });
        window.count += 1;
        window.count <= limit_per_minute
    }

    fn update_key_usage(&self, project_id: &str, key_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("lock");
        let meta = inner
            .usage
            .entry((project_id.to_string(), key_id.to_string()))
            .or_default();
        meta.usage_count += 1;
        meta.last_used = now_iso8601();
        Ok(())
    }
}
