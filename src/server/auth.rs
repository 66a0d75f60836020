use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::prelude::{Engine as _, BASE64_STANDARD};

use super::App;

const HTTPS_REQUIRED: &str = "An https connection is required.\n";

/// Basic-auth gate over the configured `user:pass` pairs. Health stays
/// open so platform probes keep working.
pub async fn require_auth(State(app): State<App>, request: Request, next: Next) -> Response {
    let creds = match &app.config.creds {
        Some(creds) if !creds.is_empty() => creds,
        _ => return next.run(request).await,
    };
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }
    if authorized(creds, request.headers()) {
        next.run(request).await
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

pub async fn require_https(State(app): State<App>, request: Request, next: Next) -> Response {
    if app.config.enforce_https {
        let proto = request
            .headers()
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok());
        if proto != Some("https") {
            return (StatusCode::FORBIDDEN, HTTPS_REQUIRED).into_response();
        }
    }
    next.run(request).await
}

fn authorized(creds: &str, headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = BASE64_STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(pair) = String::from_utf8(decoded) else {
        return false;
    };
    creds.split('|').any(|candidate| candidate == pair)
}
