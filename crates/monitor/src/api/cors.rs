//! CORS enforcement with an explicit origin allowlist.
//!
//! Implemented as a middleware rather than a permissive header layer because
//! non-preflight requests from non-allowed origins must be rejected with 403,
//! and preflights are validated against both the method and header
//! allowlists.

use axum::extract::{Request, State};
use axum::http::header::{HeaderValue, ORIGIN, VARY};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use super::error::reject;
use crate::state::AppState;

const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const ALLOWED_HEADERS: &[&str] = &["content-type", "authorization", "x-request-id"];

const REQUEST_METHOD: &str = "access-control-request-method";
const REQUEST_HEADERS: &str = "access-control-request-headers";
const ALLOW_ORIGIN: &str = "access-control-allow-origin";
const ALLOW_METHODS: &str = "access-control-allow-methods";
const ALLOW_HEADERS: &str = "access-control-allow-headers";
const MAX_AGE: &str = "access-control-max-age";

fn origin_allowed(allowlist: &[String], origin: &str) -> bool {
    allowlist
        .iter()
        .any(|allowed| allowed == "*" || allowed == origin)
}

fn method_allowed(requested: &str) -> bool {
    matches!(
        requested.to_ascii_uppercase().as_str(),
        "GET" | "POST" | "PUT" | "PATCH" | "DELETE" | "OPTIONS"
    )
}

fn headers_allowed(requested: &str) -> bool {
    requested
        .split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .all(|h| ALLOWED_HEADERS.contains(&h.as_str()))
}

fn append_cors_headers(response: &mut Response, origin: &HeaderValue, max_age: u64) {
    let headers = response.headers_mut();
    headers.insert(ALLOW_ORIGIN, origin.clone());
    headers.insert(ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
    if let Ok(value) = HeaderValue::from_str(&ALLOWED_HEADERS.join(", ")) {
        headers.insert(ALLOW_HEADERS, value);
    }
    if let Ok(value) = HeaderValue::from_str(&max_age.to_string()) {
        headers.insert(MAX_AGE, value);
    }
    headers.append(VARY, HeaderValue::from_static("origin"));
}

pub async fn cors_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let origin = match req.headers().get(ORIGIN).cloned() {
        // Same-origin or non-browser traffic: nothing to enforce.
        None => return next.run(req).await,
        Some(origin) => origin,
    };
    let origin_str = origin.to_str().unwrap_or("").to_string();

    let is_preflight =
        req.method() == Method::OPTIONS && req.headers().contains_key(REQUEST_METHOD);

    if !origin_allowed(&state.config.http.cors_allowed_origins, &origin_str) {
        return if is_preflight {
            reject(
                StatusCode::FORBIDDEN,
                "CORS_PREFLIGHT_DENIED",
                "origin is not allowed",
            )
        } else {
            reject(StatusCode::FORBIDDEN, "CORS_DENIED", "origin is not allowed")
        };
    }

    let max_age = state.config.http.cors_max_age_seconds;
    if is_preflight {
        let requested_method = req
            .headers()
            .get(REQUEST_METHOD)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !method_allowed(requested_method) {
            return reject(
                StatusCode::FORBIDDEN,
                "CORS_PREFLIGHT_DENIED",
                "requested method is not allowed",
            );
        }
        let requested_headers = req
            .headers()
            .get(REQUEST_HEADERS)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !headers_allowed(requested_headers) {
            return reject(
                StatusCode::FORBIDDEN,
                "CORS_PREFLIGHT_DENIED",
                "requested headers are not allowed",
            );
        }

        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        append_cors_headers(&mut response, &origin, max_age);
        return response;
    }

    let mut response = next.run(req).await;
    append_cors_headers(&mut response, &origin, max_age);
    response
}
