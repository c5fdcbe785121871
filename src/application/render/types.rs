use std::fmt;

use thiserror::Error;

use crate::domain::DocumentId;

/// Failures raised inside a renderer while turning markup into HTML.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarkupError {
    #[error("markdown formatting failed: {message}")]
    Markdown { message: String },
    #[error("syntax highlighting failed: {language}: {message}")]
    Highlighting { language: String, message: String },
    #[error("document processing failed: {message}")]
    Document { message: String },
}

impl MarkupError {
    pub fn document(message: impl Into<String>) -> Self {
        Self::Document {
            message: message.into(),
        }
    }
}

/// A capability that converts document text to an HTML fragment.
///
/// Implementations must be safe to call from several threads at once; the
/// pipeline renders different documents concurrently.
pub trait Renderer: Send + Sync {
    /// Short stable name, used in logs, metrics and `renderers.ignored`.
    fn name(&self) -> &'static str;

    fn render(&self, text: &str) -> Result<String, MarkupError>;
}

/// What the caller wants back from a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// The bare fragment, as embedded by the preview page.
    Preview,
    /// A standalone HTML page with stylesheets inlined.
    Export,
}

/// Why a renderer did not produce output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderFailure {
    #[error(transparent)]
    Markup(#[from] MarkupError),
    #[error("renderer panicked: {message}")]
    Panicked { message: String },
}

#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The document has no enabled renderer. Callers treat this as "skip".
    #[error("no renderer available for document {id}")]
    NoRendererAvailable { id: DocumentId },
    #[error("renderer `{renderer}` failed for document {id}")]
    RenderFailed {
        id: DocumentId,
        renderer: &'static str,
        #[source]
        cause: RenderFailure,
    },
    #[error("export template failed: {message}")]
    Template { message: String },
}

impl RenderError {
    pub fn is_no_renderer(&self) -> bool {
        matches!(self, RenderError::NoRendererAvailable { .. })
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        match self {
            RenderError::NoRendererAvailable { id } | RenderError::RenderFailed { id, .. } => {
                Some(*id)
            }
            RenderError::Template { .. } => None,
        }
    }
}

/// Outcome label attached to render metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenderOutcome {
    Ok,
    Failed,
    Panicked,
}

impl RenderOutcome {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            RenderOutcome::Ok => "ok",
            RenderOutcome::Failed => "failed",
            RenderOutcome::Panicked => "panicked",
        }
    }
}

impl fmt::Display for RenderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
