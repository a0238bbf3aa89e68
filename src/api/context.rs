//! Request context construction and the protected-route gate.

use axum::{
    extract::{ConnectInfo, OriginalUri, Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_sessions::Session;
use tracing::warn;

use super::{ApiError, AppState};
use crate::context::RequestContext;
use crate::db::Center;
use crate::domain::AuditAction;
use crate::services::{
    AuditRecord, PipelineState, ResourceRef, SessionSecurityManager,
};

/// Response marker for handlers whose service call already wrote its own
/// audit entry. [`audit_mutations`] skips marked responses.
#[derive(Debug, Clone, Copy)]
pub struct AuditedByService;

/// Center resolved for the current request, if any.
#[derive(Debug, Clone)]
pub struct CurrentUnit(pub Option<Center>);

/// The socket peer, or the first `X-Forwarded-For` hop when the peer is a
/// trusted proxy.
#[must_use]
pub fn resolve_client_ip(
    peer: Option<IpAddr>,
    headers: &HeaderMap,
    trusted_proxies: &[IpAddr],
) -> Option<IpAddr> {
    let peer_is_trusted = peer.is_some_and(|ip| trusted_proxies.contains(&ip));
    if peer_is_trusted
        && let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|hop| hop.trim().parse::<IpAddr>().ok())
    {
        return Some(forwarded);
    }
    peer
}

/// Builds the [`RequestContext`] every handler and service sees.
pub async fn request_context_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = resolve_client_ip(peer, request.headers(), &state.trusted_proxies);
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .map(ToString::to_string);

    request
        .extensions_mut()
        .insert(RequestContext::new(client_ip, user_agent));
    next.run(request).await
}

/// Path or query fragments seen in scanner and injection traffic.
const SUSPICIOUS_PATTERNS: &[&str] = &[
    "admin/admin",
    "wp-admin",
    "phpmyadmin",
    ".php",
    "eval(",
    "<script",
    "union select",
    "drop table",
];

/// First suspicious pattern in the path or the decoded query string.
#[must_use]
pub fn suspicious_pattern(path: &str, query: Option<&str>) -> Option<&'static str> {
    let path = path.to_lowercase();
    let query = query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("&")
                .to_lowercase()
        })
        .unwrap_or_default();

    SUSPICIOUS_PATTERNS
        .iter()
        .copied()
        .find(|pattern| path.contains(pattern) || query.contains(pattern))
}

/// Logs requests matching a known attack pattern. Requests carrying a valid
/// session are also audited as `VIEW` against the caller.
pub async fn flag_suspicious_requests(
    State(state): State<Arc<AppState>>,
    session: Session,
    request: Request,
    next: Next,
) -> Response {
    let uri = request.uri();
    let Some(pattern) = suspicious_pattern(uri.path(), uri.query()) else {
        return next.run(request).await;
    };

    let path = uri.path().to_string();
    let query = uri.query().unwrap_or_default().to_string();
    let ctx = request.extensions().get::<RequestContext>().cloned();

    warn!(
        target: "centergate::security",
        pattern,
        path = %path,
        query = %query,
        client_ip = ?ctx.as_ref().and_then(|c| c.client_ip),
        "Suspicious request detected"
    );
    metrics::counter!("suspicious_requests_total", "pattern" => pattern).increment(1);

    if let (Some(ctx), Ok(Some(security))) = (ctx, SessionSecurityManager::load(&session).await)
    {
        let ctx = ctx
            .with_actor(security.account_id)
            .with_unit(security.current_unit);
        let record = AuditRecord::new(AuditAction::View)
            .resource(ResourceRef::new("http", &path))
            .detail(json!({
                "suspicious_activity": true,
                "pattern_matched": pattern,
                "path": path,
                "query_string": query,
            }));
        state.shared.recorder.record(&ctx, record).await;
    }

    next.run(request).await
}

/// Runs the request pipeline and exposes its results to handlers.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    session: Session,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .ok_or_else(|| ApiError::internal("Request context missing"))?;

    let stored = SessionSecurityManager::load(&session).await?;
    let outcome = match state.shared.pipeline.run(PipelineState::new(ctx, stored)).await {
        Ok(outcome) => outcome,
        Err(rejection) => {
            if rejection.ends_session() {
                SessionSecurityManager::destroy(&session).await;
            }
            return Err(rejection.into());
        }
    };

    if let Some(security) = &outcome.session {
        SessionSecurityManager::store(&session, security).await?;
    }
    let actor = outcome
        .actor
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    tracing::Span::current().record("user_id", tracing::field::display(actor.id));

    let extensions = request.extensions_mut();
    extensions.insert(outcome.ctx);
    extensions.insert(actor);
    extensions.insert(CurrentUnit(outcome.unit));

    Ok(next.run(request).await)
}

/// Audits every successful mutating request after the handler ran, unless
/// the handler marked its response with [`AuditedByService`].
pub async fn audit_mutations(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let action = match *request.method() {
        Method::POST => Some(AuditAction::Create),
        Method::PUT | Method::PATCH => Some(AuditAction::Update),
        Method::DELETE => Some(AuditAction::Delete),
        _ => None,
    };
    let Some(action) = action else {
        return next.run(request).await;
    };

    let method = request.method().to_string();
    // Nested routers see a stripped URI
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map_or_else(|| request.uri().path(), |uri| uri.path())
        .to_string();
    let ctx = request.extensions().get::<RequestContext>().cloned();

    let response = next.run(request).await;
    let status = response.status();

    if status.is_success()
        && response.extensions().get::<AuditedByService>().is_none()
        && let Some(ctx) = ctx
    {
        let record = AuditRecord::new(action)
            .resource(ResourceRef::new("http", &path))
            .detail(json!({
                "method": method,
                "path": path,
                "status": status.as_u16(),
            }));
        state.shared.recorder.record(&ctx, record).await;
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarded_header() {
        let peer: IpAddr = "203.0.113.9".parse().unwrap();
        let ip = resolve_client_ip(Some(peer), &forwarded("10.1.1.1"), &[]);
        assert_eq!(ip, Some(peer));
    }

    #[test]
    fn test_trusted_proxy_uses_first_hop() {
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        let ip = resolve_client_ip(
            Some(proxy),
            &forwarded("198.51.100.7, 10.0.0.1"),
            &[proxy],
        );
        assert_eq!(ip, Some("198.51.100.7".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxy_with_garbage_header_falls_back() {
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        let ip = resolve_client_ip(Some(proxy), &forwarded("unknown"), &[proxy]);
        assert_eq!(ip, Some(proxy));
    }

    #[test]
    fn test_suspicious_pattern_in_path() {
        assert_eq!(suspicious_pattern("/wp-admin/setup", None), Some("wp-admin"));
        assert_eq!(suspicious_pattern("/API/Index.PHP", None), Some(".php"));
        assert_eq!(suspicious_pattern("/api/centers", None), None);
    }

    #[test]
    fn test_suspicious_pattern_in_decoded_query() {
        assert_eq!(
            suspicious_pattern("/api/audit", Some("actor=1%20UNION%20SELECT%20*")),
            Some("union select")
        );
        assert_eq!(
            suspicious_pattern("/api/audit", Some("q=%3Cscript%3Ealert(1)")),
            Some("<script")
        );
        assert_eq!(suspicious_pattern("/api/audit", Some("days=7&limit=50")), None);
    }

    #[test]
    fn test_no_peer() {
        assert_eq!(resolve_client_ip(None, &HeaderMap::new(), &[]), None);
    }
}
