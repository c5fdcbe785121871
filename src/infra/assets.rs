//! Embedded static asset serving utilities.

use std::borrow::Cow;

use axum::{
    body::Body,
    extract::Path,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use include_dir::{Dir, include_dir};
use mime_guess::{Mime, MimeGuess};

use crate::application::error::ErrorReport;

static STATIC_PREVIEW_ASSETS: Dir<'_> = include_dir!("$OUT_DIR/static_preview");

/// Serve the embedded preview page assets (stylesheets, polling script).
pub async fn serve_preview_asset(path: Option<Path<String>>) -> Response {
    serve_static(
        &STATIC_PREVIEW_ASSETS,
        path,
        "infra::assets::serve_preview_asset",
    )
}

fn serve_static(
    bundle: &'static Dir<'static>,
    path: Option<Path<String>>,
    source: &'static str,
) -> Response {
    let captured = path.map(|Path(value)| value);
    match resolve_asset(bundle, captured) {
        Ok(Some(asset)) => asset.into_response(),
        Ok(None) => not_found_response(source),
        Err(status) => rejected_response(source, status),
    }
}

fn not_found_response(source: &'static str) -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    ErrorReport::from_message(source, StatusCode::NOT_FOUND, "Static asset not found")
        .attach(&mut response);
    response
}

fn rejected_response(source: &'static str, status: StatusCode) -> Response {
    let mut response = status.into_response();
    ErrorReport::from_message(source, status, "Static asset request rejected")
        .attach(&mut response);
    response
}

struct Asset<'a> {
    contents: Cow<'a, [u8]>,
    mime: MimeGuess,
}

fn resolve_asset(
    bundle: &'static Dir<'static>,
    path: Option<String>,
) -> Result<Option<Asset<'static>>, StatusCode> {
    let mut candidate = path.unwrap_or_default();
    if candidate.starts_with('/') {
        candidate = candidate.trim_start_matches('/').to_string();
    }

    if candidate.is_empty() || candidate.ends_with('/') || candidate.contains("..") {
        // Avoid directory traversal and disallow directory listings.
        return Ok(None);
    }

    let Some(file) = bundle.get_file(&candidate) else {
        return Ok(None);
    };

    let mime = mime_guess::from_path(&candidate);
    let contents = Cow::Borrowed(file.contents());
    Ok(Some(Asset { contents, mime }))
}

impl IntoResponse for Asset<'static> {
    fn into_response(self) -> Response {
        let mime = self.mime.first_or_octet_stream();
        match self.contents {
            Cow::Borrowed(slice) => build_response(Bytes::from_static(slice), mime),
            Cow::Owned(bytes) => build_response(Bytes::from(bytes), mime),
        }
    }
}

fn build_response(bytes: Bytes, mime: Mime) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_bundle_contains_preview_assets() {
        for name in ["preview.css", "code.css", "preview.js"] {
            let asset = resolve_asset(&STATIC_PREVIEW_ASSETS, Some(name.to_string()))
                .expect("accepted")
                .expect("present");
            assert!(!asset.contents.is_empty(), "{name} is empty");
        }
    }

    #[test]
    fn traversal_and_directories_are_not_served() {
        for candidate in ["../Cargo.toml", "", "nested/"] {
            let resolved = resolve_asset(&STATIC_PREVIEW_ASSETS, Some(candidate.to_string()))
                .expect("accepted");
            assert!(resolved.is_none(), "{candidate} resolved");
        }
    }

    #[test]
    fn script_is_served_with_javascript_mime() {
        let response = resolve_asset(&STATIC_PREVIEW_ASSETS, Some("/preview.js".to_string()))
            .expect("accepted")
            .expect("present")
            .into_response();

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.contains("javascript"));
    }
}
