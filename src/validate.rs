//! The validate hot path: parse → lookup → liveness → secret verification →
//! rate gate → audit → usage update.
//!
//! Every rejection after a successful parse emits exactly one audit event;
//! malformed credentials emit none. Audit and usage writes are best-effort
//! and never change the returned result.

use tracing::{debug, error, warn};

use crate::credential::ParsedApiKey;
use crate::error::ApiError;
use crate::models::{APIKeyDocument, AuditEvent, AuditResult};
use crate::security::SecretHasher;
use crate::store::{KeyStore, DEFAULT_RATE_LIMIT_PER_MINUTE};

/// Validate a presented credential with the default per-key rate limit.
pub fn validate_api_key(
    store: &dyn KeyStore,
    hasher: &SecretHasher,
    api_key: &str,
) -> Result<APIKeyDocument, ApiError> {
    validate_api_key_with_limit(store, hasher, api_key, DEFAULT_RATE_LIMIT_PER_MINUTE)
}

/// Validate with an explicit rate limit (requests per key per minute).
pub fn validate_api_key_with_limit(
    store: &dyn KeyStore,
    hasher: &SecretHasher,
    api_key: &str,
    limit_per_minute: u64,
) -> Result<APIKeyDocument, ApiError> {
    let parsed = match ParsedApiKey::parse(api_key) {
        Ok(parsed) => parsed,
        Err(_) => {
            debug!("rejected malformed API key");
            return Err(ApiError::InvalidKey);
        }
    };
    let (project_id, key_id) = (parsed.project_id.as_str(), parsed.key_id.as_str());

    let doc = store.get_api_key(project_id, key_id).map_err(|err| {
        error!("API key lookup failed for {project_id}:{key_id}: {err}");
        ApiError::Internal
    })?;
    let Some(doc) = doc else {
        audit(store, project_id, key_id, AuditResult::Denied);
        return Err(ApiError::InvalidKey);
    };

    // Liveness first, so disabled/expired keys cost no Argon2 work.
    if !doc.is_valid() {
        audit(store, project_id, key_id, AuditResult::Denied);
        return Err(ApiError::InvalidKey);
    }

    if !hasher.verify(&parsed.secret, &doc.secret_hash) {
        audit(store, project_id, key_id, AuditResult::Denied);
        return Err(ApiError::InvalidKey);
    }

    // The window is keyed by (project_id, key_id), which we only trust after
    // the secret checks out; counting earlier would let junk traffic inflate
    // a legitimate key's bucket.
    if !store.check_rate_limit(project_id, key_id, limit_per_minute) {
        audit(store, project_id, key_id, AuditResult::RateLimited);
        return Err(ApiError::InvalidKey);
    }

    audit(store, project_id, key_id, AuditResult::Ok);
    if let Err(err) = store.update_key_usage(project_id, key_id) {
        warn!("usage update failed for {project_id}:{key_id}: {err}");
    }

    Ok(doc)
}

fn audit(store: &dyn KeyStore, project_id: &str, key_id: &str, result: AuditResult) {
    let event = AuditEvent::new(project_id, key_id, result);
    if let Err(err) = store.log_audit_event(&event) {
        warn!("audit append failed for {project_id}:{key_id}: {err}");
    }
}
