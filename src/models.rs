//! Data model: persisted store documents, the audit event, and the HTTP
//! request/response bodies.
//!
//! Persisted field names are part of the on-store contract and must not be
//! renamed.

use serde::{Deserialize, Serialize};

use crate::util::now_epoch;

// ==============================
// Persisted documents
// ==============================

/// JSON document stored at `project:{project_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectDocument {
    pub project_id: String,
    pub label: String,
    pub owner: String,
    pub created_at: f64,
}

/// JSON document stored at `apikey:{project_id}:{key_id}`.
///
/// `secret_hash` never leaves the store layer; every outward projection goes
/// through [`KeyMetadata`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct APIKeyDocument {
    pub key_id: String,
    pub project_id: String,
    pub owner: String,
    pub metadata: String,
    pub secret_hash: String,
    #[serde(default)]
    pub disabled: bool,
    pub created_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,
}

impl APIKeyDocument {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => now_epoch() > expires_at,
            None => false,
        }
    }

    /// Not disabled and not expired.
    pub fn is_valid(&self) -> bool {
        !self.disabled && !self.is_expired()
    }
}

/// Usage sidecar stored as the hash `apimeta:{project_id}:{key_id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMeta {
    pub usage_count: u64,
    pub last_used: String,
}

// ==============================
// Audit events
// ==============================

/// Outcome recorded for a terminated validation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Ok,
    Denied,
    RateLimited,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Ok => "ok",
            AuditResult::Denied => "denied",
            AuditResult::RateLimited => "rate_limited",
        }
    }
}

/// Entry appended to the `audit:keylookup` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub ts: f64,
    pub project_id: String,
    pub key_id: String,
    pub result: AuditResult,
    pub client: String,
}

impl AuditEvent {
    pub fn new(project_id: &str, key_id: &str, result: AuditResult) -> Self {
        Self {
            ts: now_epoch(),
            project_id: project_id.to_string(),
            key_id: key_id.to_string(),
            result,
            client: "keymanager".to_string(),
        }
    }

    /// Flatten into stream field/value pairs for XADD.
    pub fn to_stream_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ts", self.ts.to_string()),
            ("project_id", self.project_id.clone()),
            ("key_id", self.key_id.clone()),
            ("result", self.result.as_str().to_string()),
            ("client", self.client.clone()),
        ]
    }
}

// ==============================
// HTTP bodies
// ==============================

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateKeyRequest {
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateKeyResponse {
    pub project_id: String,
    pub key_id: String,
    pub owner: String,
    pub metadata: String,
}

impl From<&APIKeyDocument> for ValidateKeyResponse {
    fn from(doc: &APIKeyDocument) -> Self {
        Self {
            project_id: doc.project_id.clone(),
            key_id: doc.key_id.clone(),
            owner: doc.owner.clone(),
            metadata: doc.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MintKeyRequest {
    pub project_id: String,
    pub owner: String,
    /// Free-form routing metadata: a server name, JSON, or any string.
    pub metadata: String,
    #[serde(default)]
    pub expires_at: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintKeyResponse {
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeKeyRequest {
    pub project_id: String,
    pub key_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeKeyResponse {
    pub revoked: bool,
}

/// Listing projection of an [`APIKeyDocument`] with the secret hash stripped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub key_id: String,
    pub owner: String,
    pub metadata: String,
    pub created_at: f64,
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,
}

impl From<&APIKeyDocument> for KeyMetadata {
    fn from(doc: &APIKeyDocument) -> Self {
        Self {
            key_id: doc.key_id.clone(),
            owner: doc.owner.clone(),
            metadata: doc.metadata.clone(),
            created_at: doc.created_at,
            disabled: doc.disabled,
            expires_at: doc.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListKeysResponse {
    pub items: Vec<KeyMetadata>,
    pub next: Option<String>,
}
