//! Server-facing HTTP surface: translation endpoints and the reverse
//! proxy to the backend origin.

use crate::client::BackendClient;
use crate::config::ModuleConfig;
use crate::error::ClientError;
use crate::translations::{self, TranslationDiff};
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Shared state behind the routes.
#[derive(Clone)]
pub struct ServerState {
    /// Server-context client (static access token).
    pub client: BackendClient,
    /// Plain HTTP client for the proxy route.
    pub proxy: reqwest::Client,
    pub config: Arc<ModuleConfig>,
}

impl ServerState {
    pub fn new(client: BackendClient, config: Arc<ModuleConfig>) -> Self {
        Self {
            client,
            proxy: reqwest::Client::new(),
            config,
        }
    }
}

/// Build the router for the enabled features. Disabled features simply
/// contribute no routes.
pub fn router(state: ServerState) -> Router {
    let mut router = Router::new();

    if state.config.i18n_enabled {
        router = router.route(
            &state.config.translations_endpoint,
            get(get_translations).patch(patch_translations),
        );
    } else {
        debug!("i18n disabled, skipping translation routes");
    }

    if state.config.proxy_enabled {
        let prefix = state.config.proxy_path.trim_end_matches('/').to_string();
        router = router
            .route(&format!("{prefix}/*rest"), any(proxy))
            .route(&prefix, any(proxy));
    } else {
        debug!("proxy disabled, skipping proxy route");
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

#[derive(Debug, Deserialize)]
struct TranslationsParams {
    locale: Option<String>,
    prefix: Option<String>,
}

/// Wire shape of one translation record served by the GET endpoint.
#[derive(Debug, Serialize)]
struct TranslationEntry {
    key: String,
    value: String,
    id: String,
}

/// GET: translation records for a locale (exact code or regional
/// variants), optionally narrowed to a key prefix.
async fn get_translations(
    State(state): State<ServerState>,
    Query(params): Query<TranslationsParams>,
) -> Response {
    let filter = endpoint_filter(params.locale.as_deref(), params.prefix.as_deref());

    match state.client.read_translations(filter.as_ref()).await {
        Ok(records) => {
            let entries: Vec<TranslationEntry> = records
                .into_iter()
                .map(|r| TranslationEntry {
                    key: r.key,
                    value: r.value,
                    id: r.id,
                })
                .collect();
            Json(entries).into_response()
        }
        Err(e) => backend_failure(e),
    }
}

/// PATCH: apply a `{create, update, remove}` changeset through the
/// server-context client.
async fn patch_translations(
    State(state): State<ServerState>,
    Json(changeset): Json<TranslationDiff>,
) -> Response {
    if !changeset.is_empty() {
        if let Err(e) = state.client.apply_translation_batch(&changeset).await {
            return backend_failure(e);
        }
    }

    Json(json!({ "success": true })).into_response()
}

/// Filter for the GET endpoint: locale matches exactly or as a regional
/// variant, keys optionally under a prefix. No params means no filter.
fn endpoint_filter(locale: Option<&str>, prefix: Option<&str>) -> Option<Value> {
    let mut clauses = Vec::new();
    if let Some(locale) = locale {
        clauses.push(translations::locale_variants_filter(locale));
    }
    if let Some(prefix) = prefix {
        clauses.push(json!({ "key": { "_starts_with": prefix } }));
    }

    match clauses.len() {
        0 => None,
        1 => Some(clauses.remove(0)),
        _ => Some(json!({ "_and": clauses })),
    }
}

/// Forward a request under the proxy prefix to the backend origin,
/// preserving path, query, headers and body.
async fn proxy(State(state): State<ServerState>, request: Request) -> Response {
    let prefix = state.config.proxy_path.trim_end_matches('/');
    let path = request.uri().path();
    let forwarded_path = path.strip_prefix(prefix).unwrap_or("");
    let query = request
        .uri()
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();
    let target = format!("{}{}{}", state.client.base_url(), forwarded_path, query);

    let method = request.method().clone();
    let headers = request.headers().clone();
    let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to read proxy request body: {e}");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let mut upstream = state.proxy.request(method, target);
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        upstream = upstream.header(name, value);
    }

    let response = match upstream.body(body).send().await {
        Ok(response) => response,
        Err(e) => return backend_failure(e.into()),
    };

    let mut builder = Response::builder().status(response.status());
    for (name, value) in response.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return backend_failure(e.into()),
    };

    match builder.body(Body::from(bytes)) {
        Ok(response) => response,
        Err(e) => {
            error!("failed to assemble proxy response: {e}");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Headers that describe the connection rather than the payload, dropped
/// in both proxy directions. Host and content-length are recomputed by
/// the upstream client.
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}

/// A failed backend call degrades to a 502 with the mapped message.
fn backend_failure(error: ClientError) -> Response {
    error!("backend request failed: {error}");
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": error.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Endpoint Filter Tests ====================

    #[test]
    fn test_endpoint_filter_empty() {
        assert!(endpoint_filter(None, None).is_none());
    }

    #[test]
    fn test_endpoint_filter_locale_matches_variants() {
        let filter = endpoint_filter(Some("en"), None).unwrap();
        assert_eq!(filter["_or"][0], json!({ "language": { "_eq": "en" } }));
        assert_eq!(
            filter["_or"][1],
            json!({ "language": { "_starts_with": "en-" } })
        );
    }

    #[test]
    fn test_endpoint_filter_prefix_only() {
        let filter = endpoint_filter(None, Some("app.")).unwrap();
        assert_eq!(filter, json!({ "key": { "_starts_with": "app." } }));
    }

    #[test]
    fn test_endpoint_filter_locale_and_prefix() {
        let filter = endpoint_filter(Some("de"), Some("app.")).unwrap();
        let clauses = filter["_and"].as_array().unwrap();
        assert_eq!(clauses.len(), 2);
        assert!(clauses[0].get("_or").is_some());
        assert_eq!(clauses[1], json!({ "key": { "_starts_with": "app." } }));
    }

    // ==================== Hop-by-hop Header Tests ====================

    #[test]
    fn test_hop_by_hop_headers_dropped() {
        for name in ["Connection", "host", "Transfer-Encoding", "content-length"] {
            assert!(is_hop_by_hop(name), "{name} should be dropped");
        }
    }

    #[test]
    fn test_payload_headers_kept() {
        for name in ["content-type", "authorization", "accept-language", "etag"] {
            assert!(!is_hop_by_hop(name), "{name} should pass through");
        }
    }
}
