use std::path::{Component, Path, PathBuf};

use axum::extract::{Path as UrlPath, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

/// Name of the root document served for the app path and SPA fallback.
pub const INDEX_FILE: &str = "index.html";

/// Validate a request-relative asset path.
///
/// Returns `None` for anything that could leave the asset root: parent or
/// current-directory segments, absolute/root/drive prefixes, backslashes,
/// NUL bytes, or a path that is empty once surrounding slashes are removed.
pub fn normalize_asset_path(raw: &str) -> Option<PathBuf> {
    if raw.contains('\\') || raw.contains('\0') {
        return None;
    }
    // Windows drive prefixes such as `C:` are rejected on every platform.
    if raw.split('/').next().is_some_and(|first| first.contains(':')) {
        return None;
    }
    let trimmed = raw.strip_suffix('/').unwrap_or(raw);
    if trimmed.is_empty() || trimmed.starts_with('/') {
        return None;
    }

    let mut out = PathBuf::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return None;
        }
        out.push(segment);
    }
    if out.components().any(|c| !matches!(c, Component::Normal(_))) {
        return None;
    }
    Some(out)
}

/// Suffix-based content type lookup.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "txt" => "text/plain; charset=utf-8",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found.").into_response()
}

async fn read_file(path: &Path) -> Option<Vec<u8>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => tokio::fs::read(path).await.ok(),
        _ => None,
    }
}

fn file_response(path: &Path, body: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, content_type_for(path))], body).into_response()
}

async fn index_response(root: &Path) -> Response {
    let path = root.join(INDEX_FILE);
    match read_file(&path).await {
        Some(body) => file_response(&path, body),
        None => {
            tracing::warn!(path = %path.display(), "Root document missing");
            not_found()
        },
    }
}

/// `GET /voice` and `GET /voice/`.
pub async fn serve_index(State(state): State<AppState>) -> Response {
    index_response(&state.web_root).await
}

/// `GET /voice/<asset>`: the asset itself, or the root document for unknown
/// paths so client-side routing works.
pub async fn serve_asset(State(state): State<AppState>, UrlPath(raw): UrlPath<String>) -> Response {
    let Some(relative) = normalize_asset_path(&raw) else {
        tracing::debug!(path = %raw, "Rejected asset path");
        return not_found();
    };
    let path = state.web_root.join(&relative);
    match read_file(&path).await {
        Some(body) => file_response(&path, body),
        None => index_response(&state.web_root).await,
    }
}
