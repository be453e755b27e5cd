use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use parley_core::net::protocol::{APP_PATH, DEV_PREFIX, DEV_SERVER_PORT, WS_PATH};

use crate::assets;
use crate::state::AppState;
use crate::ws;

/// Build the HTTP router: app redirect, bundled web client, WebSocket
/// upgrade, and the dev-forwarding/method gate in front of all of it.
pub fn build_router(state: AppState) -> Router<()> {
    let max_request_bytes = state.config.limits.max_request_bytes;

    let asset_routes = Router::new()
        .route("/voice", get(assets::serve_index))
        .route(APP_PATH, get(assets::serve_index))
        .route("/voice/{*path}", get(assets::serve_asset))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ));

    Router::new()
        .route("/", get(root_redirect))
        .route(WS_PATH, get(ws::ws_handler))
        .route(&format!("{WS_PATH}/{{*rest}}"), get(ws::ws_handler))
        .merge(asset_routes)
        .fallback(|| async { assets::not_found() })
        .layer(middleware::from_fn_with_state(state.clone(), front_gate))
        .layer(RequestBodyLimitLayer::new(max_request_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, "Bad request.").into_response(),
    }
}

async fn root_redirect() -> Response {
    found(APP_PATH)
}

/// Dev forwarding first (any method), then reject everything but GET.
async fn front_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.config.dev_forwarding {
        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok());
        let path_and_query = request
            .uri()
            .path_and_query()
            .map_or(request.uri().path(), |pq| pq.as_str());
        if let Some(target) = dev_redirect_target(host, path_and_query) {
            tracing::debug!(%target, "Forwarding to dev server");
            return found(&target);
        }
    }

    if request.method() != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed.").into_response();
    }
    next.run(request).await
}

/// Where a dev-prefixed request should go, or `None` if the path is not
/// under the dev prefix.
pub fn dev_redirect_target(host: Option<&str>, path_and_query: &str) -> Option<String> {
    let rest = path_and_query.strip_prefix(DEV_PREFIX)?;
    let mapped = if rest.is_empty() {
        "/".to_string()
    } else if rest.starts_with('?') {
        format!("/{rest}")
    } else if rest.starts_with('/') {
        rest.to_string()
    } else {
        "/".to_string()
    };
    let host = strip_port(host.unwrap_or_default());
    let host = if host.is_empty() { "localhost" } else { host };
    Some(format!("http://{host}:{DEV_SERVER_PORT}{mapped}"))
}

/// Drop a trailing `:port` from a Host header, keeping IPv6 brackets.
fn strip_port(host: &str) -> &str {
    let host = host.trim();
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        // More than one colon without brackets is a bare IPv6 literal.
        Some((name, _)) if !name.contains(':') => name,
        _ => host,
    }
}
