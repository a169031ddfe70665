//! HTTP surface: route table, admin bearer gate, and handlers bridging the
//! async Actix runtime to the blocking engine via `web::block`.

use std::sync::Arc;

use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::error::{error_envelope, ApiError};
use crate::manage;
use crate::models::{
    MintKeyRequest, MintKeyResponse, RevokeKeyRequest, RevokeKeyResponse, ValidateKeyRequest,
    ValidateKeyResponse,
};
use crate::security::SecretHasher;
use crate::store::{KeyStore, DEFAULT_RATE_LIMIT_PER_MINUTE};
use crate::util::now_iso8601;
use crate::validate::validate_api_key_with_limit;

/// Shared application state: the two store principals, the hasher, and the
/// admin gate secret. Nothing here is mutated after startup.
pub struct AppState {
    pub validator: Arc<dyn KeyStore>,
    pub manager: Arc<dyn KeyStore>,
    pub hasher: SecretHasher,
    pub admin_secret: Option<String>,
    pub rate_limit_per_minute: u64,
}

impl AppState {
    pub fn new(
        validator: Arc<dyn KeyStore>,
        manager: Arc<dyn KeyStore>,
        admin_secret: Option<String>,
    ) -> Self {
        Self {
            validator,
            manager,
            hasher: SecretHasher::new(),
            admin_secret,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
        }
    }

    pub fn with_rate_limit(mut self, limit_per_minute: u64) -> Self {
        self.rate_limit_per_minute = limit_per_minute;
        self
    }
}

/// Register the full route table.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/v1/validate-key", web::post().to(validate_key))
        .route("/v1/mint-key", web::post().to(mint_key))
        .route("/v1/revoke-key", web::post().to(revoke_key))
        .route("/v1/list-keys", web::get().to(list_keys))
        .route("/v1/admin/create-project", web::post().to(create_project))
        .route("/v1/admin/project/{project_id}", web::get().to(get_project));
}

/// Extract the token from an `Authorization: Bearer <token>` header.
fn bearer_token(req: &HttpRequest) -> Option<&str> {
    let raw = req
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .trim();
    if raw.len() < 7 {
        return None;
    }
    let (scheme, rest) = raw.split_at(6);
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

/// Gate for everything except `/health` and `/v1/validate-key`. A missing
/// process secret disables the endpoints entirely.
fn verify_admin(state: &AppState, req: &HttpRequest) -> Result<(), HttpResponse> {
    let Some(secret) = state.admin_secret.as_deref() else {
        return Err(error_envelope(
            StatusCode::SERVICE_UNAVAILABLE,
            "admin_disabled",
            "Admin endpoints are disabled (admin secret not configured)",
        ));
    };
    match bearer_token(req) {
        Some(token) if token == secret => Ok(()),
        _ => Err(error_envelope(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Invalid admin credentials",
        )),
    }
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    let store = state.validator.clone();
    let alive = web::block(move || store.ping()).await.unwrap_or(false);
    if alive {
        HttpResponse::Ok().json(serde_json::json!({
            "status": "healthy",
            "timestamp": now_iso8601(),
        }))
    } else {
        error_envelope(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            "Store connection failed",
        )
    }
}

async fn validate_key(
    state: web::Data<AppState>,
    body: web::Json<ValidateKeyRequest>,
) -> Result<HttpResponse, ApiError> {
    let store = state.validator.clone();
    let hasher = state.hasher.clone();
    let limit = state.rate_limit_per_minute;
    let api_key = body.into_inner().api_key;

    let doc = web::block(move || validate_api_key_with_limit(store.as_ref(), &hasher, &api_key, limit))
        .await
        .map_err(|_| ApiError::Internal)??;
    Ok(HttpResponse::Ok().json(ValidateKeyResponse::from(&doc)))
}

async fn mint_key(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<MintKeyRequest>,
) -> Result<HttpResponse, ApiError> {
    if let Err(resp) = verify_admin(&state, &req) {
        return Ok(resp);
    }
    let store = state.manager.clone();
    let hasher = state.hasher.clone();
    let request = body.into_inner();

    let api_key = web::block(move || manage::mint_key(store.as_ref(), &hasher, &request))
        .await
        .map_err(|_| ApiError::Internal)??;
    Ok(HttpResponse::Ok().json(MintKeyResponse { api_key }))
}

async fn revoke_key(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<RevokeKeyRequest>,
) -> Result<HttpResponse, ApiError> {
    if let Err(resp) = verify_admin(&state, &req) {
        return Ok(resp);
    }
    let store = state.manager.clone();
    let request = body.into_inner();

    web::block(move || manage::revoke_key(store.as_ref(), &request.project_id, &request.key_id))
        .await
        .map_err(|_| ApiError::Internal)??;
    Ok(HttpResponse::Ok().json(RevokeKeyResponse { revoked: true }))
}

#[derive(Debug, Deserialize)]
struct ListKeysQuery {
    project_id: String,
    offset: Option<usize>,
    limit: Option<usize>,
}

async fn list_keys(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<ListKeysQuery>,
) -> Result<HttpResponse, ApiError> {
    if let Err(resp) = verify_admin(&state, &req) {
        return Ok(resp);
    }
    let ListKeysQuery {
        project_id,
        offset,
        limit,
    } = query.into_inner();
    let offset = offset.unwrap_or(0);
    let limit = limit.unwrap_or(50);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::InvalidRequest(
            "limit must be between 1 and 100".to_string(),
        ));
    }

    let store = state.manager.clone();
    let page = web::block(move || manage::list_keys(store.as_ref(), &project_id, offset, limit))
        .await
        .map_err(|_| ApiError::Internal)??;
    Ok(HttpResponse::Ok().json(page))
}

#[derive(Debug, Deserialize)]
struct CreateProjectQuery {
    project_id: String,
    label: String,
    owner: String,
}

async fn create_project(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<CreateProjectQuery>,
) -> Result<HttpResponse, ApiError> {
    if let Err(resp) = verify_admin(&state, &req) {
        return Ok(resp);
    }
    let store = state.manager.clone();
    let CreateProjectQuery {
        project_id,
        label,
        owner,
    } = query.into_inner();

    let doc = web::block(move || manage::create_project(store.as_ref(), &project_id, &label, &owner))
        .await
        .map_err(|_| ApiError::Internal)??;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "project_id": doc.project_id,
        "created": true,
    })))
}

async fn get_project(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    if let Err(resp) = verify_admin(&state, &req) {
        return Ok(resp);
    }
    let store = state.manager.clone();
    let project_id = path.into_inner();

    let doc = web::block(move || manage::get_project(store.as_ref(), &project_id))
        .await
        .map_err(|_| ApiError::Internal)??;
    Ok(HttpResponse::Ok().json(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn state(admin_secret: Option<&str>) -> AppState {
        let store = crate::store::MemoryKeyStore::shared();
        AppState::new(store.clone(), store, admin_secret.map(String::from))
    }

    #[test]
    fn bearer_token_extraction() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer sekrit"))
            .to_http_request();
        assert_eq!(bearer_token(&req), Some("sekrit"));

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "bearer  spaced  "))
            .to_http_request();
        assert_eq!(bearer_token(&req), Some("spaced"));

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Basic abc"))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);

        let req = TestRequest::default().to_http_request();
        assert_eq!(bearer_token(&req), None);
    }

    #[test]
    fn admin_gate_requires_configured_secret() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer anything"))
            .to_http_request();
        let resp = verify_admin(&state(None), &req).unwrap_err();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn admin_gate_checks_token() {
        let st = state(Some("sekrit"));

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer sekrit"))
            .to_http_request();
        assert!(verify_admin(&st, &req).is_ok());

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer wrong"))
            .to_http_request();
        let resp = verify_admin(&st, &req).unwrap_err();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = TestRequest::default().to_http_request();
        let resp = verify_admin(&st, &req).unwrap_err();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
