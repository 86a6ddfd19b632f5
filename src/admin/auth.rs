use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::admin::AdminState;

/// Reject requests without `Authorization: Bearer <admin.api_key>`.
pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == &*state.api_key);

    if authorized {
        Ok(next.run(request).await)
    } else {
        tracing::debug!(path = %request.uri().path(), "Rejected unauthenticated admin request");
        Err(StatusCode::UNAUTHORIZED)
    }
}
