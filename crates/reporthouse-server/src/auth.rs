//! API-key authentication.
//!
//! Requests carry `X-API-Key` and `X-Tenant-Id`. The key is hashed with
//! SHA-256 and looked up against the tenant's stored key hashes; the
//! resolved tenant id is inserted as a request extension so every
//! handler operates tenant-scoped.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};

use reporthouse_store::ApiKeyStore;

use crate::error::ApiError;
use crate::AppState;

/// The authenticated tenant, available to handlers via `Extension`.
#[derive(Debug, Clone)]
pub struct TenantId(pub String);

pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();
    let key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let tenant = headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::Unauthorized)?
        .to_string();

    if !state.store.verify_api_key(&tenant, &hash_key(key)).await? {
        return Err(ApiError::Unauthorized);
    }

    request.extensions_mut().insert(TenantId(tenant));
    Ok(next.run(request).await)
}
