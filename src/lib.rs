#![forbid(unsafe_code)]
#![doc = r#"
KeyMaster

Mint, validate, and manage opaque project-scoped API keys over a Redis-backed
store.

Crate highlights
- Credentials: `sk-proj.{project_id}.{key_id}.{secret}`, secrets stored only
  as Argon2id hashes.
- Hot path: `validate::validate_api_key` authenticates a credential, enforces
  per-key rate limits, emits an audit record, and returns routing metadata.
- HTTP server (in `server`): validate/mint/revoke/list plus project admin
  endpoints behind a bearer gate.

Modules
- `credential`: Wire-form codec.
- `security`: Random ids/secrets and Argon2id hashing.
- `models`: Persisted documents, audit events, HTTP bodies.
- `store`: Typed store operations with Redis and in-memory backends.
- `validate`: The validation state machine.
- `manage`: Project and key lifecycle operations.
- `error`: The closed error taxonomy and response envelope.
- `server`: Actix handlers and routing.
- `util`: Tracing/env bootstrap, clock, CORS helpers.
"#]

pub mod credential;
pub mod error;
pub mod manage;
pub mod models;
pub mod security;
pub mod server;
pub mod store;
pub mod util;
pub mod validate;

pub use crate::credential::{format_key, ParsedApiKey};
pub use crate::error::ApiError;
pub use crate::models::{
    APIKeyDocument, AuditEvent, AuditResult, KeyMetadata, ListKeysResponse, MintKeyRequest,
    ProjectDocument, UsageMeta,
};
pub use crate::security::SecretHasher;
pub use crate::server::AppState;
pub use crate::store::{
    KeyStore, MemoryKeyStore, RedisConfig, RedisKeyStore, StoreBackend, StoreCredentials,
    StoreError, DEFAULT_RATE_LIMIT_PER_MINUTE,
};
pub use crate::validate::{validate_api_key, validate_api_key_with_limit};
