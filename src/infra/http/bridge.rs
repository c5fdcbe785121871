//! JSON API through which a host editor reports events and issues commands.

use std::path::PathBuf;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    application::{
        error::AppError,
        lifecycle::{CleanScope, ExportOutcome, PreviewOutcome},
    },
    domain::{Document, DocumentId, DomainError},
};

use super::HttpState;

pub(super) fn routes() -> Router<HttpState> {
    Router::new()
        .route(
            "/api/documents/{id}",
            get(document_status).put(upsert_document).delete(close_document),
        )
        .route("/api/documents/{id}/save", post(save_document))
        .route("/api/documents/{id}/preview", post(preview_document))
        .route("/api/documents/{id}/export", post(export_document))
        .route("/api/cache/clean", post(clean_cache))
}

#[derive(Debug, Deserialize)]
struct UpsertBody {
    path: Option<PathBuf>,
    syntax: Option<String>,
    text: String,
    #[serde(default)]
    loading: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SaveBody {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExportBody {
    output: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CleanBody {
    all: bool,
}

#[derive(Debug, Serialize)]
struct ScheduledResponse {
    id: DocumentId,
    scheduled: bool,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    id: DocumentId,
    enabled: bool,
    cached_revision: Option<u64>,
}

#[derive(Debug, Serialize)]
struct EvictedResponse {
    evicted: usize,
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|err| AppError::validation(err.to_string()))
}

/// Empty bodies deserialize to `T::default()`.
fn parse_optional_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(T::default())
    } else {
        parse_body(body)
    }
}

fn parse_id(raw: &str) -> Result<DocumentId, AppError> {
    raw.parse::<DocumentId>().map_err(AppError::from)
}

async fn blocking<T, F>(work: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AppError::unexpected(format!("blocking task failed: {err}")))?
}

async fn document_status(
    State(state): State<HttpState>,
    Path(raw_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let id = parse_id(&raw_id)?;
    if state.coordinator.documents().get(id).is_none() {
        return Err(DomainError::not_found("document").into());
    }

    Ok(Json(StatusResponse {
        id,
        enabled: state.coordinator.is_enabled(id),
        cached_revision: state.coordinator.cache().get(id).map(|entry| entry.revision),
    }))
}

async fn upsert_document(
    State(state): State<HttpState>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Result<Json<ScheduledResponse>, AppError> {
    let id = parse_id(&raw_id)?;
    let body: UpsertBody = parse_body(&body)?;

    let mut document = Document::new(id, body.text);
    document.path = body.path;
    document.syntax = body.syntax;
    document.loading = body.loading;
    state.documents.upsert(document);

    let coordinator = state.coordinator.clone();
    let scheduled = blocking(move || Ok(coordinator.on_modified(id))).await?;
    Ok(Json(ScheduledResponse { id, scheduled }))
}

async fn save_document(
    State(state): State<HttpState>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Result<Json<ScheduledResponse>, AppError> {
    let id = parse_id(&raw_id)?;
    let body: SaveBody = parse_optional_body(&body)?;

    let mut document = state
        .coordinator
        .documents()
        .get(id)
        .ok_or(DomainError::not_found("document"))?;
    if let Some(text) = body.text {
        document.text = text;
        document.loading = false;
        state.documents.upsert(document);
    }

    // Inline dispatch renders on this thread.
    let coordinator = state.coordinator.clone();
    let scheduled = blocking(move || Ok(coordinator.on_saved(id))).await?;
    Ok(Json(ScheduledResponse { id, scheduled }))
}

async fn close_document(
    State(state): State<HttpState>,
    Path(raw_id): Path<String>,
) -> Result<Json<EvictedResponse>, AppError> {
    let id = parse_id(&raw_id)?;
    if !state.documents.close(id) {
        return Err(DomainError::not_found("document").into());
    }
    let evicted = state.coordinator.on_closed(id);
    Ok(Json(EvictedResponse { evicted }))
}

async fn preview_document(
    State(state): State<HttpState>,
    Path(raw_id): Path<String>,
) -> Result<Json<PreviewOutcome>, AppError> {
    let id = parse_id(&raw_id)?;
    let coordinator = state.coordinator.clone();
    let outcome = blocking(move || coordinator.preview(id).map_err(AppError::from)).await?;
    Ok(Json(outcome))
}

async fn export_document(
    State(state): State<HttpState>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Result<Json<ExportOutcome>, AppError> {
    let id = parse_id(&raw_id)?;
    let body: ExportBody = parse_optional_body(&body)?;
    let coordinator = state.coordinator.clone();
    let outcome = blocking(move || {
        coordinator
            .export(id, body.output.as_deref())
            .map_err(AppError::from)
    })
    .await?;
    Ok(Json(outcome))
}

async fn clean_cache(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<Json<EvictedResponse>, AppError> {
    let body: CleanBody = parse_optional_body(&body)?;
    let scope = if body.all {
        CleanScope::All
    } else {
        CleanScope::Closed
    };
    Ok(Json(EvictedResponse {
        evicted: state.coordinator.clean_cache(scope),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_optional_body_uses_defaults() {
        let body: CleanBody = parse_optional_body(b"  \n").expect("blank body");
        assert!(!body.all);

        let body: CleanBody = parse_optional_body(br#"{"all": true}"#).expect("json body");
        assert!(body.all);
    }

    #[test]
    fn malformed_body_is_a_validation_error() {
        let err = parse_body::<UpsertBody>(b"{").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn non_numeric_id_is_rejected() {
        assert!(matches!(
            parse_id("abc"),
            Err(AppError::Domain(DomainError::Validation { .. }))
        ));
    }
}
