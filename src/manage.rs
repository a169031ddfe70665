//! Management operations: project create/get, key mint/revoke/list.
//!
//! All operations run against the manager store handle. Mint is the only
//! moment the plaintext secret exists outside the caller's memory — it is
//! returned once in wire form and stored only as an Argon2id hash.

use tracing::{error, info};

use crate::credential::format_key;
use crate::error::ApiError;
use crate::models::{
    APIKeyDocument, KeyMetadata, ListKeysResponse, MintKeyRequest, ProjectDocument,
};
use crate::security::{generate_key_id, generate_secret, SecretHasher, SECRET_LENGTH};
use crate::store::{KeyStore, StoreError};
use crate::util::now_epoch;

fn read_failed(err: StoreError) -> ApiError {
    error!("store read failed: {err}");
    ApiError::Internal
}

/// Create a project. Fails with `project_exists` when the id is taken.
pub fn create_project(
    store: &dyn KeyStore,
    project_id: &str,
    label: &str,
    owner: &str,
) -> Result<ProjectDocument, ApiError> {
    if store.get_project(project_id).map_err(read_failed)?.is_some() {
        return Err(ApiError::ProjectExists);
    }

    let doc = ProjectDocument {
        project_id: project_id.to_string(),
        label: label.to_string(),
        owner: owner.to_string(),
        created_at: now_epoch(),
    };
    store.store_project(&doc).map_err(|err| {
        error!("failed to store project {project_id}: {err}");
        ApiError::Storage("Failed to create project".to_string())
    })?;

    info!("Created project {project_id}");
    Ok(doc)
}

pub fn get_project(store: &dyn KeyStore, project_id: &str) -> Result<ProjectDocument, ApiError> {
    store
        .get_project(project_id)
        .map_err(read_failed)?
        .ok_or(ApiError::ProjectNotFound)
}

/// Mint a new key for an existing project and return its wire form.
pub fn mint_key(
    store: &dyn KeyStore,
    hasher: &SecretHasher,
    request: &MintKeyRequest,
) -> Result<String, ApiError> {
    // Referential integrity: no orphan keys.
    if store
        .get_project(&request.project_id)
        .map_err(read_failed)?
        .is_none()
    {
        return Err(ApiError::ProjectNotFound);
    }

    let key_id = generate_key_id();
    let secret = generate_secret(SECRET_LENGTH);
    let secret_hash = hasher.hash(&secret).map_err(|err| {
        error!("secret hashing failed: {err}");
        ApiError::Internal
    })?;

    let doc = APIKeyDocument {
        key_id: key_id.clone(),
        project_id: request.project_id.clone(),
        owner: request.owner.clone(),
        metadata: request.metadata.clone(),
        secret_hash,
        disabled: false,
        created_at: now_epoch(),
        expires_at: request.expires_at,
    };
    store.store_api_key(&doc).map_err(|err| {
        error!(
            "failed to store API key {}:{key_id}: {err}",
            request.project_id
        );
        ApiError::Storage("Failed to store API key".to_string())
    })?;

    info!(
        "Minted new API key for project {}, key {key_id}",
        request.project_id
    );
    Ok(format_key(&request.project_id, &key_id, &secret))
}

/// Flip `disabled` on an existing key. Idempotent: revoking a revoked key
/// succeeds.
pub fn revoke_key(store: &dyn KeyStore, project_id: &str, key_id: &str) -> Result<(), ApiError> {
    if store
        .get_api_key(project_id, key_id)
        .map_err(read_failed)?
        .is_none()
    {
        return Err(ApiError::KeyNotFound);
    }

    let revoked = store.revoke_api_key(project_id, key_id).map_err(|err| {
        error!("failed to revoke API key {project_id}:{key_id}: {err}");
        ApiError::Storage("Failed to revoke API key".to_string())
    })?;
    if !revoked {
        return Err(ApiError::Storage("Failed to revoke API key".to_string()));
    }

    info!("Revoked API key for project {project_id}, key {key_id}");
    Ok(())
}

/// Page of key metadata in set-iteration order. A full page yields a decimal
/// `next` offset cursor; a short page ends the listing.
pub fn list_keys(
    store: &dyn KeyStore,
    project_id: &str,
    offset: usize,
    limit: usize,
) -> Result<ListKeysResponse, ApiError> {
    let docs = store
        .list_project_keys(project_id, offset, limit)
        .map_err(read_failed)?;

    let items: Vec<KeyMetadata> = docs.iter().map(KeyMetadata::from).collect();
    let next = if items.len() == limit {
        Some((offset + limit).to_string())
    } else {
        None
    };
    Ok(ListKeysResponse { items, next })
}
