//! Browser-facing routes: the preview page, its polling endpoint, and files
//! next to the document.

use std::io::ErrorKind;
use std::path::{Component, Path as FsPath, PathBuf};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::error;

use crate::{
    application::{error::ErrorReport, render::RenderError},
    domain::{CacheEntry, Document, DocumentId},
    infra::assets::serve_preview_asset,
    presentation::views::{
        ErrorPageView, PreviewPageView, PreviewTemplate, render_error_response,
        render_template_response,
    },
};

use super::HttpState;

pub(super) fn routes() -> Router<HttpState> {
    Router::new()
        .route("/view/{id}", get(view_page))
        .route("/view/{id}/", get(view_page))
        .route("/view/{id}/content", get(view_content))
        .route("/view/{id}/{*path}", get(view_file))
        .route("/static/{*path}", get(serve_preview_asset))
        .route("/_health", get(health))
}

/// Why a cache fill produced no entry.
enum FillError {
    NotFound(String),
    Render(RenderError),
    Join(String),
}

impl FillError {
    fn into_page(self, source: &'static str) -> Response {
        let (status, view, report) = match self {
            FillError::NotFound(detail) => (
                StatusCode::NOT_FOUND,
                ErrorPageView::not_found(),
                ErrorReport::from_message(source, StatusCode::NOT_FOUND, detail),
            ),
            FillError::Render(err) => {
                let (status, view) = if err.is_no_renderer() {
                    (StatusCode::NOT_FOUND, ErrorPageView::not_found())
                } else {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorPageView::render_failed(),
                    )
                };
                let report = ErrorReport::from_error(source, status, &err);
                let report = match err.document_id() {
                    Some(id) => report.for_document(id),
                    None => report,
                };
                (status, view, report)
            }
            FillError::Join(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorPageView::render_failed(),
                ErrorReport::from_message(source, StatusCode::INTERNAL_SERVER_ERROR, detail),
            ),
        };
        render_error_response(status, view, report)
    }
}

fn parse_id(raw: &str) -> Result<DocumentId, FillError> {
    raw.parse()
        .map_err(|_| FillError::NotFound(format!("`{raw}` is not a document id")))
}

fn open_document(state: &HttpState, id: DocumentId) -> Result<Document, FillError> {
    state
        .coordinator
        .documents()
        .get(id)
        .ok_or_else(|| FillError::NotFound(format!("document {id} is not open")))
}

/// Cached entry for `id`, rendering on the blocking pool on a miss.
async fn cached_or_render(state: &HttpState, id: DocumentId) -> Result<CacheEntry, FillError> {
    if let Some(entry) = state.coordinator.cache().get(id) {
        return Ok(entry);
    }

    let document = open_document(state, id)?;
    let pipeline = state.coordinator.pipeline().clone();
    let documents = state.coordinator.documents().clone();
    tokio::task::spawn_blocking(move || -> Result<Option<CacheEntry>, RenderError> {
        let entry = pipeline.render_entry(&document)?;
        if pipeline.discard_if_closed(documents.as_ref(), id) {
            return Ok(None);
        }
        Ok(Some(entry))
    })
    .await
    .map_err(|err| FillError::Join(err.to_string()))?
    .map_err(FillError::Render)?
    .ok_or_else(|| FillError::NotFound(format!("document {id} closed while rendering")))
}

async fn view_page(State(state): State<HttpState>, Path(raw_id): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::preview::view_page";

    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(err) => return err.into_page(SOURCE),
    };
    let entry = match cached_or_render(&state, id).await {
        Ok(entry) => entry,
        Err(err) => return err.into_page(SOURCE),
    };

    let title = state
        .coordinator
        .documents()
        .get(id)
        .map(|document| document.title())
        .unwrap_or_else(|| id.to_string());
    let poll_interval_ms = state
        .coordinator
        .preview_settings()
        .ajax_polling_interval
        .as_millis() as u64;

    let view = PreviewPageView {
        id: id.to_string(),
        title,
        content: entry.html.to_string(),
        revision: entry.revision,
        poll_interval_ms,
    };
    let mut response = render_template_response(PreviewTemplate { view }, StatusCode::OK);
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContentQuery {
    revision: Option<u64>,
}

async fn view_content(
    State(state): State<HttpState>,
    Path(raw_id): Path<String>,
    Query(query): Query<ContentQuery>,
) -> Response {
    const SOURCE: &str = "infra::http::preview::view_content";

    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(err) => return err.into_page(SOURCE),
    };
    match cached_or_render(&state, id).await {
        Ok(entry) if query.revision == Some(entry.revision) => {
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(entry) => {
            let mut response = Json(entry).into_response();
            response
                .headers_mut()
                .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(err) => err.into_page(SOURCE),
    }
}

async fn view_file(
    State(state): State<HttpState>,
    Path((raw_id, path)): Path<(String, String)>,
) -> Response {
    const SOURCE: &str = "infra::http::preview::view_file";

    let resolved = parse_id(&raw_id)
        .and_then(|id| open_document(&state, id))
        .and_then(|document| {
            let directory = document
                .directory()
                .map(FsPath::to_path_buf)
                .ok_or_else(|| FillError::NotFound("document has no directory".to_string()))?;
            resolve_relative(&directory, &path)
                .ok_or_else(|| FillError::NotFound(format!("rejected path `{path}`")))
        });
    let file = match resolved {
        Ok(file) => file,
        Err(err) => return err.into_page(SOURCE),
    };

    match tokio::fs::read(&file).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&file).first_or_octet_stream();
            let mut response = Response::new(Body::from(bytes));
            if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            response
        }
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
            FillError::NotFound(format!("{} not found", file.display())).into_page(SOURCE)
        }
        Err(err) => {
            error!(
                target = "livemark::http::preview",
                path = %file.display(),
                error = %err,
                "failed to read document-relative file"
            );
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            ErrorReport::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err)
                .attach(&mut response);
            response
        }
    }
}

/// Join `relative` onto `directory`, refusing anything that could escape it.
fn resolve_relative(directory: &FsPath, relative: &str) -> Option<PathBuf> {
    let relative = FsPath::new(relative.trim_start_matches('/'));
    if relative.as_os_str().is_empty() {
        return None;
    }
    relative
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        .then(|| directory.join(relative))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
