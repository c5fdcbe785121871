//! HTTP surface: preview pages for browsers and the JSON editor bridge.

mod bridge;
mod middleware;
mod preview;
mod server;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware};

use crate::application::lifecycle::PreviewCoordinator;
use crate::infra::documents::InMemoryDocuments;

pub use server::{PreviewServer, ServerError};

#[derive(Clone)]
pub struct HttpState {
    pub coordinator: Arc<PreviewCoordinator>,
    pub documents: Arc<InMemoryDocuments>,
}

pub fn build_router(state: HttpState) -> Router {
    preview::routes()
        .merge(bridge::routes())
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
