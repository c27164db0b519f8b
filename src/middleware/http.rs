//! axum adapter for the security pipeline

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use super::pipeline::{RequestContext, SecurityDecision, SecurityMiddleware};
use crate::error::SecurityError;
use crate::events::{RiskLevel, SecurityEventType, SecurityRequest};

/// Header carrying the caller's session id
pub const SESSION_HEADER: &str = "x-session-id";

/// Request extension set by an upstream authentication layer
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

/// State of [`security_layer`]
#[derive(Clone)]
pub struct SecurityLayerState {
    pub middleware: Arc<SecurityMiddleware>,
    /// Bodies larger than this are answered with 413
    pub max_body_bytes: usize,
}

impl SecurityLayerState {
    pub fn new(middleware: Arc<SecurityMiddleware>, max_body_bytes: usize) -> Self {
        Self {
            middleware,
            max_body_bytes,
        }
    }
}

/// Security middleware function for `axum::middleware::from_fn_with_state`
pub async fn security_layer(
    State(state): State<SecurityLayerState>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(
                limit = state.max_body_bytes,
                "Rejecting request body: {}", e
            );
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({
                    "error": "request body too large",
                    "limit": state.max_body_bytes,
                })),
            )
                .into_response();
        }
    };

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let mut request = security_request(
        parts.method.as_str(),
        parts.uri.path(),
        &parts.headers,
        peer,
    );
    if let Some(AuthenticatedUser(user)) = parts.extensions.get::<AuthenticatedUser>() {
        request = request.with_user_id(user.clone());
    }

    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    let body = match parse_body(&bytes, is_json) {
        Ok(body) => body,
        Err(error) => return denial_response(&SecurityDecision::default(), &error),
    };

    let mut context = RequestContext::new();
    if let Some(session_id) = request.header(SESSION_HEADER) {
        context = context.with_session_id(session_id);
    }
    if let Some(body) = body {
        context = context.with_body(body);
    }

    let decision = state.middleware.process_request(&request, context).await;
    if let Some(error) = &decision.error {
        return denial_response(&decision, error);
    }

    let bytes = match &decision.sanitized_body {
        Some(Value::String(text)) if !is_json => Bytes::from(text.clone()),
        Some(value) => match serde_json::to_vec(value) {
            Ok(encoded) => Bytes::from(encoded),
            Err(e) => {
                warn!("Failed to encode sanitized body: {}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        },
        None => bytes,
    };
    parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));

    let mut response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

/// Build the transport-neutral request descriptor
pub fn security_request(
    method: &str,
    path: &str,
    headers: &HeaderMap,
    peer: Option<String>,
) -> SecurityRequest {
    let ip = forwarded_ip(headers)
        .or(peer)
        .unwrap_or_else(|| "unknown".to_string());

    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .fold(SecurityRequest::new(method, path, ip), |request, (name, value)| {
            request.with_header(name, value)
        })
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|list| list.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|h| h.to_str().ok()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

fn parse_body(bytes: &Bytes, is_json: bool) -> Result<Option<Value>, SecurityError> {
    if bytes.is_empty() {
        return Ok(None);
    }

    if is_json {
        return serde_json::from_slice(bytes).map(Some).map_err(|e| {
            debug!("Rejecting malformed JSON body: {}", e);
            SecurityError::Validation {
                errors: vec!["request body is not valid JSON".to_string()],
                event_type: SecurityEventType::ValidationFailure,
                risk_level: RiskLevel::Low,
            }
        });
    }

    Ok(Some(Value::String(String::from_utf8_lossy(bytes).into_owned())))
}

fn denial_response(decision: &SecurityDecision, error: &SecurityError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(error.info())).into_response();
    apply_headers(response.headers_mut(), decision);
    response
}

fn apply_headers(headers: &mut HeaderMap, decision: &SecurityDecision) {
    for (name, value) in &decision.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Skipping invalid response header {}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_ip_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));

        let request = security_request("post", "/api/items", &headers, Some("127.0.0.1".into()));
        assert_eq!(request.ip, "203.0.113.7");
        assert_eq!(request.method, "POST");
        assert_eq!(request.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn test_peer_address_fallback() {
        let request = security_request("GET", "/", &HeaderMap::new(), Some("192.0.2.1".into()));
        assert_eq!(request.ip, "192.0.2.1");

        let request = security_request("GET", "/", &HeaderMap::new(), None);
        assert_eq!(request.ip, "unknown");
    }

    #[test]
    fn test_body_parsing() {
        assert_eq!(parse_body(&Bytes::new(), true), Ok(None));
        assert_eq!(
            parse_body(&Bytes::from_static(b"{\"a\":1}"), true),
            Ok(Some(serde_json::json!({"a": 1})))
        );
        assert_eq!(
            parse_body(&Bytes::from_static(b"plain"), false),
            Ok(Some(Value::String("plain".to_string())))
        );

        let err = parse_body(&Bytes::from_static(b"{oops"), true).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
