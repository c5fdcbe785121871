//! Turning document text into HTML.
//!
//! Renderers are pure `text -> html` capabilities picked by an ordered
//! registry; the pipeline wraps the chosen renderer with panic isolation,
//! metrics and the write into the render cache.

mod pipeline;
mod plaintext;
mod registry;
mod service;
mod types;

pub use pipeline::RenderPipeline;
pub use plaintext::PlainTextRenderer;
pub use registry::{
    MARKDOWN_EXTENSIONS, MARKDOWN_SCOPE, Matcher, PLAINTEXT_SCOPE, RendererDescriptor,
    RendererRegistry,
};
pub use service::MarkdownRenderer;
pub use types::{MarkupError, RenderError, RenderFailure, RenderMode, Renderer};

pub(crate) use pipeline::{METRIC_RENDER_MS, METRIC_RENDER_TOTAL};
