//! Bearer-token middleware for the control API.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

use super::AppState;

/// Constant-time byte comparison. The HTTP token check must not leak
/// length-adjusted timing the way the SNMP community check does.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn query_has_token(request: &Request<Body>) -> bool {
    request
        .uri()
        .query()
        .is_some_and(|q| q.split('&').any(|pair| pair.starts_with("token=")))
}

/// Guards every endpoint. An empty configured token disables auth (a
/// startup warning covers that case); tokens in the query string are
/// rejected outright so they never land in access logs.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    if state.token.is_empty() {
        return Ok(next.run(request).await);
    }

    if query_has_token(&request) {
        return Err((
            StatusCode::UNAUTHORIZED,
            "token must be sent in the Authorization header".to_string(),
        ));
    }

    let presented = bearer_token(&request)
        .ok_or((StatusCode::UNAUTHORIZED, "missing bearer token".to_string()))?;

    if !constant_time_eq(presented.as_bytes(), state.token.as_bytes()) {
        return Err((StatusCode::UNAUTHORIZED, "invalid token".to_string()));
    }

    Ok(next.run(request).await)
}

/// The three response headers every reply carries.
pub async fn security_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("X-XSS-Protection", "1; mode=block".parse().unwrap());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(constant_time_eq(b"", b""));
    }
}
