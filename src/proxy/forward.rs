//! The per-request pipeline: buffer, scan, decide, then block or forward.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::relay::{PendingEvent, RelayStream};
use crate::logging::LogEntry;
use crate::pii::detector::PiiDetector;
use crate::pii::json::{redact_value, scan_value};
use crate::pii::redact::redact;
use crate::pii::{distinct_types, PiiMatch};
use crate::policy::config::ProxyConfig;
use crate::policy::evaluator::{decide, Action};
use crate::sink::EventSink;

/// Response header carrying the action taken for the request.
pub const ACTION_HEADER: &str = "x-wiretaps-action";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared state for every request handler.
#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<ProxyConfig>,
    pub detector: Arc<PiiDetector>,
    pub client: reqwest::Client,
    pub sink: EventSink,
}

/// Outcome of scanning a request body.
#[derive(Debug, Default)]
pub struct Inspection {
    pub matches: Vec<PiiMatch>,
    /// Set when the body could not be inspected and was passed through.
    pub error: Option<&'static str>,
    /// Parsed body of a JSON request; redaction rewrites it and re-encodes.
    pub document: Option<Value>,
}

/// Fallback handler: every method and path lands here.
pub async fn handle(State(state): State<ProxyState>, req: Request) -> Response {
    let started = Instant::now();
    let (parts, body) = req.into_parts();
    let mut entry = LogEntry::new(parts.method.as_str(), parts.uri.path());

    let body = match read_body(body, state.config.max_body_bytes).await {
        Ok(body) => body,
        Err(BodyError::TooLarge) => {
            warn!(
                "REJECTED {} {}: body exceeds {} bytes",
                entry.method, entry.endpoint, state.config.max_body_bytes
            );
            entry.status = Some(StatusCode::PAYLOAD_TOO_LARGE.as_u16());
            entry.error = Some(format!(
                "request body exceeds {} bytes",
                state.config.max_body_bytes
            ));
            entry.duration_ms = started.elapsed().as_millis() as i64;
            state.sink.submit(entry);
            return json_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                Action::Pass,
                json!({ "error": "request body too large", "limit": state.config.max_body_bytes }),
            );
        }
        Err(BodyError::Read(e)) => {
            debug!("failed to read request body for {}: {}", entry.endpoint, e);
            return json_response(
                StatusCode::BAD_REQUEST,
                Action::Pass,
                json!({ "error": "failed to read request body" }),
            );
        }
    };

    let inspection = if state.config.pii_enabled {
        inspect(&state.detector, &parts.headers, &body)
    } else {
        Inspection::default()
    };
    let decision = decide(&inspection.matches, &state.config);

    entry.pii_types = distinct_types(&inspection.matches);
    entry.action = decision.action;
    entry.redacted = decision.action == Action::Redact;
    entry.error = inspection.error.map(str::to_string);
    if let Some(marker) = inspection.error {
        warn!("{} {}: {}, passing through", entry.method, entry.endpoint, marker);
    }

    let mut pending = PendingEvent::new(state.sink.clone(), entry.clone(), started);

    if let Some(rejection) = decision.rejection {
        warn!(
            "BLOCKED {} {} - PII detected: {}",
            entry.method,
            entry.endpoint,
            entry.pii_types.join(",")
        );
        pending.set_status(rejection.status.as_u16());
        pending.finish(0);
        let mut response = (rejection.status, Json(rejection.body)).into_response();
        set_action_header(response.headers_mut(), Action::Block);
        return response;
    }

    let outbound = match decision.action {
        Action::Redact => {
            // Redact is only chosen for inspected (UTF-8) bodies.
            let rewritten = match inspection.document {
                Some(mut document) => {
                    redact_value(&state.detector, &mut document);
                    document.to_string()
                }
                None => redact(&String::from_utf8_lossy(&body), &inspection.matches),
            };
            info!(
                "REDACTED {} {} - {}",
                entry.method,
                entry.endpoint,
                entry.pii_types.join(",")
            );
            Bytes::from(rewritten)
        }
        _ => {
            if entry.pii_types.is_empty() {
                debug!("PASS {} {}", entry.method, entry.endpoint);
            } else {
                info!(
                    "AUDIT {} {} - PII forwarded: {}",
                    entry.method,
                    entry.endpoint,
                    entry.pii_types.join(",")
                );
            }
            body
        }
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = target_url(&state.config.target_url, path_and_query);

    let request = state
        .client
        .request(parts.method.clone(), &url)
        .headers(forward_headers(&parts.headers, true))
        .body(outbound);

    let upstream = match tokio::time::timeout(state.config.upstream_timeout, request.send()).await {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(e)) => {
            warn!("upstream request to {} failed: {}", url, e);
            pending.fail(Some(StatusCode::BAD_GATEWAY.as_u16()), "upstream error");
            return json_response(
                StatusCode::BAD_GATEWAY,
                decision.action,
                json!({ "error": "upstream error", "detail": e.to_string() }),
            );
        }
        Err(_) => {
            warn!(
                "upstream {} did not respond within {:?}",
                url, state.config.upstream_timeout
            );
            pending.fail(Some(StatusCode::GATEWAY_TIMEOUT.as_u16()), "upstream timeout");
            return json_response(
                StatusCode::GATEWAY_TIMEOUT,
                decision.action,
                json!({
                    "error": "upstream timeout",
                    "detail": format!("no response within {}s", state.config.upstream_timeout.as_secs()),
                }),
            );
        }
    };

    let status = upstream.status();
    pending.set_status(status.as_u16());
    let mut headers = forward_headers(upstream.headers(), false);
    set_action_header(&mut headers, decision.action);

    let content_length = upstream.content_length();
    let body = if parts.method == Method::HEAD
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
        || content_length == Some(0)
    {
        pending.finish(0);
        Body::empty()
    } else {
        let capture = !upstream.headers().contains_key(CONTENT_ENCODING);
        let relay = RelayStream::new(upstream.bytes_stream(), pending, capture)
            .with_content_length(content_length);
        Body::from_stream(relay)
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

enum BodyError {
    TooLarge,
    Read(axum::Error),
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Read)?;
        if buf.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

/// Scan a request body, failing open on bodies that cannot be inspected.
///
/// JSON bodies are scanned value by value after decoding; anything else is
/// scanned as plain text. A non-UTF-8 body, or one declared as JSON that does
/// not parse, yields no matches and an error marker.
pub fn inspect(detector: &PiiDetector, headers: &HeaderMap, body: &[u8]) -> Inspection {
    if body.is_empty() {
        return Inspection::default();
    }
    let Ok(text) = std::str::from_utf8(body) else {
        return Inspection {
            error: Some("uninspectable body: not UTF-8"),
            ..Inspection::default()
        };
    };
    if !is_json(headers) {
        return Inspection {
            matches: detector.scan(text),
            ..Inspection::default()
        };
    }
    match serde_json::from_str::<Value>(text) {
        Ok(document) => Inspection {
            matches: scan_value(detector, &document),
            error: None,
            document: Some(document),
        },
        Err(_) => Inspection {
            error: Some("uninspectable body: invalid JSON"),
            ..Inspection::default()
        },
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Join the configured target with the incoming path and query.
pub fn target_url(target: &str, path_and_query: &str) -> String {
    let base = target.trim_end_matches('/');
    if path_and_query.starts_with('/') {
        format!("{}{}", base, path_and_query)
    } else {
        format!("{}/{}", base, path_and_query)
    }
}

/// Copy headers for the next hop.
///
/// Hop-by-hop headers, and any header named in `Connection`, are dropped.
/// Request headers additionally lose `Host` and `Content-Length`, which the
/// client recomputes for the target and the possibly rewritten body.
pub fn forward_headers(headers: &HeaderMap, is_request: bool) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower) || listed.iter().any(|l| l == lower) {
            continue;
        }
        if is_request && (*name == HOST || *name == CONTENT_LENGTH) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn set_action_header(headers: &mut HeaderMap, action: Action) {
    headers.insert(
        HeaderName::from_static(ACTION_HEADER),
        HeaderValue::from_static(action.as_str()),
    );
}

fn json_response(status: StatusCode, action: Action, body: serde_json::Value) -> Response {
    let mut response = (status, Json(body)).into_response();
    set_action_header(response.headers_mut(), action);
    response
}
