//! Security response headers and the opt-in HTTPS redirect.

use axum::extract::{Request, State};
use axum::http::header::{HeaderValue, HOST, LOCATION};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

const FORWARDED_PROTO: &str = "x-forwarded-proto";

fn is_tls(req: &Request) -> bool {
    req.headers()
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .map(|proto| proto.eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let tls = is_tls(&req);
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'self';"),
    );
    headers.insert(
        "x-permitted-cross-domain-policies",
        HeaderValue::from_static("none"),
    );
    // HSTS is only meaningful when the transport actually was TLS.
    if tls {
        headers.insert(
            "strict-transport-security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
    headers.remove("server");

    response
}

/// Opt-in redirect of plain-HTTP requests, trusting the proxy's
/// `X-Forwarded-Proto`.
pub async fn https_redirect_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.config.http.https_redirect {
        return next.run(req).await;
    }

    let forwarded_http = req
        .headers()
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .map(|proto| proto.eq_ignore_ascii_case("http"))
        .unwrap_or(false);
    if !forwarded_http {
        return next.run(req).await;
    }

    let host = match req.headers().get(HOST).and_then(|value| value.to_str().ok()) {
        Some(host) => host.to_string(),
        None => return next.run(req).await,
    };
    let target = format!("https://{host}{}", req.uri());

    let mut response = Response::new(axum::body::Body::empty());
    *response.status_mut() = StatusCode::PERMANENT_REDIRECT;
    if let Ok(value) = HeaderValue::from_str(&target) {
        response.headers_mut().insert(LOCATION, value);
    }
    response
}
