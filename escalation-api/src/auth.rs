use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use escalation_engine::EscalationTask;

/// Accepts both `Authorization: <secret>` and `Authorization: Bearer <secret>`.
fn extract_secret(auth_header: Option<&str>) -> Option<&str> {
    let value = auth_header?.trim();
    let secret = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    if secret.is_empty() {
        None
    } else {
        Some(secret)
    }
}

/// Constant-time comparison.
fn secrets_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

/// Guards the trigger routes with the shared cron secret.
pub async fn cron_auth_middleware(req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let task = req
        .extensions()
        .get::<EscalationTask>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let expected = match task.context().config.server.cron_secret.as_deref() {
        Some(secret) => secret,
        None => {
            tracing::warn!("Trigger request rejected: CRON_SECRET not configured");
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    let given = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match extract_secret(given) {
        Some(secret) if secrets_match(secret, expected) => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!(path = %req.uri().path(), "Trigger request with wrong secret");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::debug!("Missing Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
