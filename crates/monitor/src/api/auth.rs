//! HS256 bearer-token authentication and role enforcement.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::error::reject;
use crate::state::AppState;

/// Ordered role hierarchy; derives compare by declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "viewer" => Some(Role::Viewer),
            "operator" => Some(Role::Operator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Validates the bearer token when auth is enabled and stores the claims in
/// request extensions for the role guard.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if !state.config.auth.enabled {
        return next.run(req).await;
    }

    let header = match req.headers().get(AUTHORIZATION) {
        Some(header) => header,
        None => {
            return reject(
                StatusCode::UNAUTHORIZED,
                "MISSING_AUTH_HEADER",
                "authorization header is required",
            );
        }
    };
    let token = match header.to_str().ok().and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if !token.is_empty() => token,
        _ => {
            return reject(
                StatusCode::UNAUTHORIZED,
                "INVALID_AUTH_FORMAT",
                "expected: Authorization: Bearer <token>",
            );
        }
    };

    let key = DecodingKey::from_secret(state.config.auth.hs256_secret.as_bytes());
    let claims = match decode::<Claims>(token, &key, &Validation::new(Algorithm::HS256)) {
        Ok(data) => data.claims,
        Err(_) => {
            return reject(
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "token is invalid or expired",
            );
        }
    };

    req.extensions_mut().insert(claims);
    next.run(req).await
}

/// Mutating operations require at least the configured role (operator by
/// default). Read operations pass through.
pub async fn protect_mutations_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.config.auth.enabled || !is_mutating(req.method()) {
        return next.run(req).await;
    }

    let required = Role::parse(&state.config.auth.required_role).unwrap_or(Role::Operator);
    match req.extensions().get::<Claims>() {
        Some(claims) if claims.role >= required => next.run(req).await,
        Some(_) => reject(
            StatusCode::FORBIDDEN,
            "INSUFFICIENT_PERMISSIONS",
            "this operation requires a higher role",
        ),
        None => reject(
            StatusCode::UNAUTHORIZED,
            "MISSING_AUTH_HEADER",
            "authorization header is required",
        ),
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

#[cfg(test)]
pub(crate) fn mint_token(secret: &str, role: Role, expires_in_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        user_id: "test-user".to_string(),
        role,
        exp: now + expires_in_secs,
        iat: now,
        iss: Some("monitor-tests".to_string()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
