//! Renders one document through the registry and stores the result.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::application::repos::DocumentStore;
use crate::cache::RenderCache;
use crate::domain::{CacheEntry, Document, DocumentId};
use crate::presentation::views::render_export_page;

use super::registry::RendererRegistry;
use super::types::{RenderError, RenderFailure, RenderMode, RenderOutcome};

pub(crate) const METRIC_RENDER_TOTAL: &str = "livemark_render_total";
pub(crate) const METRIC_RENDER_MS: &str = "livemark_render_ms";

/// Renderer lookup plus cache write-back.
///
/// Safe to call concurrently. Two renders of the same document race on the
/// cache and the later write wins.
#[derive(Clone)]
pub struct RenderPipeline {
    registry: Arc<RendererRegistry>,
    cache: Arc<RenderCache>,
}

impl RenderPipeline {
    pub fn new(registry: Arc<RendererRegistry>, cache: Arc<RenderCache>) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &RendererRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<RenderCache> {
        &self.cache
    }

    pub fn has_renderer_enabled(&self, document: &Document) -> bool {
        self.registry.has_renderer_enabled(document)
    }

    /// Render `document` and store the fragment. A failed render leaves any
    /// previous entry untouched.
    pub fn render_entry(&self, document: &Document) -> Result<CacheEntry, RenderError> {
        let renderer = self
            .registry
            .find_renderer(document)
            .ok_or(RenderError::NoRendererAvailable { id: document.id })?;
        let name = renderer.name();

        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| renderer.render(&document.text)));
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (outcome, result) = match result {
            Ok(Ok(html)) => (RenderOutcome::Ok, Ok(html)),
            Ok(Err(err)) => (RenderOutcome::Failed, Err(RenderFailure::Markup(err))),
            Err(payload) => (
                RenderOutcome::Panicked,
                Err(RenderFailure::Panicked {
                    message: panic_message(payload.as_ref()),
                }),
            ),
        };

        counter!(METRIC_RENDER_TOTAL, "renderer" => name, "outcome" => outcome.as_str())
            .increment(1);
        histogram!(METRIC_RENDER_MS, "renderer" => name).record(elapsed_ms);

        match result {
            Ok(html) => {
                let entry = self.cache.put(document.id, html);
                debug!(
                    target = "livemark::render::pipeline",
                    document_id = %document.id,
                    renderer = name,
                    revision = entry.revision,
                    elapsed_ms,
                    "Document rendered"
                );
                Ok(entry)
            }
            Err(cause) => {
                warn!(
                    target = "livemark::render::pipeline",
                    document_id = %document.id,
                    renderer = name,
                    outcome = %outcome,
                    error = %cause,
                    "Render failed; keeping previous output"
                );
                Err(RenderError::RenderFailed {
                    id: document.id,
                    renderer: name,
                    cause,
                })
            }
        }
    }

    /// Drop the cached fragment of `id` when the document is no longer open.
    ///
    /// A close that lands mid-render evicts before the render writes back, so
    /// callers check again once the render returns.
    pub fn discard_if_closed(&self, documents: &dyn DocumentStore, id: DocumentId) -> bool {
        if documents.get(id).is_some() || !self.cache.remove(id) {
            return false;
        }
        debug!(
            target = "livemark::render::pipeline",
            document_id = %id,
            "Document closed during render; output dropped"
        );
        true
    }

    /// Render and return the fragment (`Preview`) or a standalone page
    /// (`Export`). Both write the fragment into the cache.
    pub fn render_document(
        &self,
        document: &Document,
        mode: RenderMode,
    ) -> Result<String, RenderError> {
        let entry = self.render_entry(document)?;
        match mode {
            RenderMode::Preview => Ok(entry.html.to_string()),
            RenderMode::Export => render_export_page(&document.title(), &entry.html).map_err(
                |err| RenderError::Template {
                    message: format!("{err}: {}", err.error),
                },
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::render::registry::{Matcher, RendererDescriptor};
    use crate::application::render::types::{MarkupError, Renderer};
    use crate::infra::documents::InMemoryDocuments;

    struct Scripted;

    impl Renderer for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn render(&self, text: &str) -> Result<String, MarkupError> {
            match text {
                "fail" => Err(MarkupError::document("bad input")),
                "panic" => panic!("renderer blew up"),
                other => Ok(format!("<p>{other}</p>")),
            }
        }
    }

    fn pipeline() -> RenderPipeline {
        let mut registry = RendererRegistry::new();
        registry.register(RendererDescriptor::new(
            Matcher::new(Vec::<String>::new(), ["md"]),
            Arc::new(Scripted),
        ));
        RenderPipeline::new(Arc::new(registry), Arc::new(RenderCache::new()))
    }

    fn doc(text: &str) -> Document {
        Document::new(DocumentId::new(1), text).with_path("/tmp/a.md")
    }

    #[test]
    fn success_writes_cache() {
        let pipeline = pipeline();
        let html = pipeline
            .render_document(&doc("ok"), RenderMode::Preview)
            .expect("render succeeds");

        assert_eq!(html, "<p>ok</p>");
        let cached = pipeline.cache().get(DocumentId::new(1)).expect("cached");
        assert_eq!(&*cached.html, "<p>ok</p>");
    }

    #[test]
    fn output_of_a_closed_document_is_discarded() {
        let pipeline = pipeline();
        let documents = InMemoryDocuments::new();
        documents.upsert(doc("open"));
        pipeline.render_entry(&doc("open")).expect("render");

        assert!(!pipeline.discard_if_closed(&documents, DocumentId::new(1)));
        assert!(pipeline.cache().contains(DocumentId::new(1)));

        documents.close(DocumentId::new(1));
        assert!(pipeline.discard_if_closed(&documents, DocumentId::new(1)));
        assert!(pipeline.cache().is_empty());
    }

    #[test]
    fn failure_preserves_previous_entry() {
        let pipeline = pipeline();
        pipeline.render_entry(&doc("A")).expect("first render");

        let err = pipeline.render_entry(&doc("fail")).unwrap_err();
        assert!(matches!(
            err,
            RenderError::RenderFailed {
                cause: RenderFailure::Markup(_),
                ..
            }
        ));

        let cached = pipeline.cache().get(DocumentId::new(1)).expect("cached");
        assert_eq!(&*cached.html, "<p>A</p>");
    }

    #[test]
    fn panicking_renderer_is_contained() {
        let pipeline = pipeline();
        pipeline.render_entry(&doc("A")).expect("first render");

        let err = pipeline.render_entry(&doc("panic")).unwrap_err();
        match err {
            RenderError::RenderFailed {
                cause: RenderFailure::Panicked { message },
                ..
            } => assert_eq!(message, "renderer blew up"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(pipeline.cache().contains(DocumentId::new(1)));
    }

    #[test]
    fn unmatched_document_reports_no_renderer() {
        let pipeline = pipeline();
        let doc = Document::new(DocumentId::new(5), "x").with_path("/tmp/a.rs");

        let err = pipeline.render_entry(&doc).unwrap_err();
        assert!(err.is_no_renderer());
        assert!(pipeline.cache().is_empty());
    }

    #[test]
    fn export_mode_wraps_fragment_in_page() {
        let pipeline = pipeline();
        let page = pipeline
            .render_document(&doc("body"), RenderMode::Export)
            .expect("export render");

        assert!(page.contains("<title>a.md</title>"));
        assert!(page.contains("<p>body</p>"));
        assert!(pipeline.cache().contains(DocumentId::new(1)));
    }
}
