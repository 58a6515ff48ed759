//! Bearer-token verification
//!
//! Access tokens are HS256-signed by the external credential service with a
//! 15-minute lifetime; only access tokens reach this service. The verifier
//! runs as a middleware layer: on success the subject claim is attached to
//! the request as [`CallerId`], on failure the request is answered with 401
//! and never reaches the run pipeline.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::server::AppState;

/// Caller identity extracted from the token's subject claim.
///
/// Rate-limit key and badge recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

/// Request-scoped identity record inserted by the verifier.
///
/// `None` means authentication is disabled; downstream components then fall
/// back to the peer address. A request with a bad token never produces a
/// record at all, it is answered with 401 here.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentity(pub Option<CallerId>);

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
}

/// Verify an access token against the shared secret and extract the caller.
pub fn verify_token(token: &str, secret: &str) -> Result<CallerId, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(CallerId(data.claims.sub))
}

/// Axum middleware enforcing `Authorization: Bearer <access_token>`.
///
/// When no signing secret is configured authentication is disabled (dev
/// only) and requests pass through without an identity; the rate limiter
/// then falls back to the peer address.
pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let Some(secret) = state.config.auth_jwt_secret.as_deref() else {
        request.extensions_mut().insert(RequestIdentity(None));
        return next.run(request).await;
    };

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(token) = token else {
        return unauthorized();
    };

    match verify_token(token, secret) {
        Ok(caller) => {
            request.extensions_mut().insert(RequestIdentity(Some(caller)));
            next.run(request).await
        }
        Err(err) => {
            debug!("rejected bearer token: {err}");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    crate::server::RequestError::Unauthorized.into_response()
}
