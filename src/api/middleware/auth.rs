//! Bearer token guard for the control API
//!
//! Rejections carry the route that was refused, so a scheduler calling
//! `/api/v1/monitoring/run` with a stale token shows up as such in its own logs.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

pub async fn auth_middleware(
    State(expected_token): State<String>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let authorized = bearer_token(&request).map(|token| token == expected_token);

    match authorized {
        Ok(true) => Ok(next.run(request).await),
        Ok(false) => Err(AuthError::new(&request, AuthFailure::InvalidToken)),
        Err(failure) => Err(AuthError::new(&request, failure)),
    }
}

fn bearer_token(request: &Request<Body>) -> Result<&str, AuthFailure> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthFailure::MissingToken)?;
    header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AuthFailure::InvalidFormat)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("missing Authorization header")]
    MissingToken,

    #[error("invalid Authorization format (expected: Bearer <token>)")]
    InvalidFormat,

    #[error("invalid token")]
    InvalidToken,
}

impl AuthFailure {
    fn status(self) -> StatusCode {
        match self {
            AuthFailure::MissingToken | AuthFailure::InvalidFormat => StatusCode::UNAUTHORIZED,
            AuthFailure::InvalidToken => StatusCode::FORBIDDEN,
        }
    }
}

/// A refused control API call
#[derive(Debug)]
pub struct AuthError {
    pub method: String,
    pub route: String,
    pub failure: AuthFailure,
}

impl AuthError {
    fn new(request: &Request<Body>, failure: AuthFailure) -> Self {
        Self {
            method: request.method().to_string(),
            route: request.uri().path().to_string(),
            failure,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        debug!("refused {} {}: {}", self.method, self.route, self.failure);

        let body = Json(json!({
            "error": self.failure.to_string(),
            "route": self.route,
        }));

        (self.failure.status(), body).into_response()
    }
}
