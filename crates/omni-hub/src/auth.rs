//! Authentication middleware for the hub API.
//!
//! Site↔hub calls identify themselves with `X-Server-ID` (preferred) or
//! `X-MAC-Address`; protected routes additionally require the resolved row
//! to be admin-authorized. Admin UI calls carry a bearer session token
//! validated by the external session collaborator.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use omni_data::ServerRow;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::state::SharedState;

/// Header carrying the server row identifier.
pub const HEADER_SERVER_ID: &str = "x-server-id";
/// Header carrying the MAC address fallback.
pub const HEADER_MAC_ADDRESS: &str = "x-mac-address";

/// The authenticated server row, injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthedServer(pub ServerRow);

/// SHA-256 hex digest of a registration key, as stored on the server row.
#[must_use]
pub fn registration_key_digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

async fn resolve_server(
    state: &SharedState,
    request: &Request,
) -> Result<ServerRow, ApiError> {
    let headers = request.headers();
    if let Some(raw) = headers.get(HEADER_SERVER_ID).and_then(|v| v.to_str().ok()) {
        let id: Uuid = raw
            .parse()
            .map_err(|_| ApiError::unauthorized("malformed X-Server-ID header"))?;
        return state
            .store
            .servers()
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("unknown server identity"));
    }
    if let Some(mac) = headers.get(HEADER_MAC_ADDRESS).and_then(|v| v.to_str().ok()) {
        return state
            .store
            .servers()
            .find_by_mac(mac)
            .await?
            .ok_or_else(|| ApiError::unauthorized("unknown server identity"));
    }
    Err(ApiError::unauthorized(
        "missing X-Server-ID or X-MAC-Address header",
    ))
}

/// Require a known, admin-authorized server identity.
///
/// # Errors
///
/// 401 for unresolvable identities, 403 for unauthorized rows.
pub async fn require_server(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let server = resolve_server(&state, &request).await?;
    if !server.is_authorized {
        return Err(ApiError::forbidden("server awaits admin authorization"));
    }
    request.extensions_mut().insert(AuthedServer(server));
    Ok(next.run(request).await)
}

/// Require a known server identity without the authorization gate.
/// Registration, heartbeat, and authorization-status checks stay reachable
/// for servers an admin has not yet approved.
///
/// # Errors
///
/// 401 for unresolvable identities.
pub async fn require_known_server(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let server = resolve_server(&state, &request).await?;
    request.extensions_mut().insert(AuthedServer(server));
    Ok(next.run(request).await)
}

/// Require either an admin bearer session or an authorized server
/// identity. Used on routes shared by the UI and the fleet (the torrent
/// registry); server callers get their row injected, admin callers do not.
///
/// # Errors
///
/// 401 when neither credential is present, 403 for unauthorized servers.
pub async fn require_server_or_admin(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let has_bearer = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|v| !v.trim().is_empty());
    if has_bearer {
        return Ok(next.run(request).await);
    }

    let server = resolve_server(&state, &request).await?;
    if !server.is_authorized {
        return Err(ApiError::forbidden("server awaits admin authorization"));
    }
    request.extensions_mut().insert(AuthedServer(server));
    Ok(next.run(request).await)
}

/// Require an admin session bearer token. Session issuance and role
/// checks live in the external admin-auth collaborator; this middleware
/// gates on its token being present and forwards it for validation.
///
/// # Errors
///
/// 401 when the bearer token is absent or empty.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default();
    if token.is_empty() {
        return Err(ApiError::unauthorized("missing admin session token"));
    }
    Ok(next.run(request).await)
}

/// Guard that a site-scoped path id refers to the calling server.
///
/// # Errors
///
/// 403 when a server addresses another server's resources.
pub fn ensure_self(authed: &AuthedServer, path_id: Uuid) -> Result<(), ApiError> {
    if authed.0.id != path_id {
        return Err(ApiError::forbidden(
            "server identity does not match the addressed resource",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_lowercase_hex() {
        let digest = registration_key_digest("fleet-secret");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, registration_key_digest("fleet-secret"));
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(digest, registration_key_digest("other"));
    }
}
