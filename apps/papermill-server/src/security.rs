use axum::http::HeaderMap;

/// Admin surface gate: requires `Authorization: Bearer <PAPERMILL_ADMIN_TOKEN>`.
/// With no token configured the admin routes are only open when
/// PAPERMILL_DEV=1, so a misconfigured deployment fails closed.
pub(crate) fn admin_authorized(headers: &HeaderMap) -> bool {
    match std::env::var("PAPERMILL_ADMIN_TOKEN") {
        Ok(token) if !token.is_empty() => headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|presented| presented == token)
            .unwrap_or(false),
        _ => std::env::var("PAPERMILL_DEV").as_deref() == Ok("1"),
    }
}
