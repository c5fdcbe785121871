//! Ordered lookup from document metadata to a renderer.

use std::sync::Arc;

use tracing::info;

use crate::domain::{Document, DocumentMeta};

use super::plaintext::PlainTextRenderer;
use super::service::MarkdownRenderer;
use super::types::Renderer;

pub const MARKDOWN_SCOPE: &str = "text.html.markdown";
pub const MARKDOWN_EXTENSIONS: [&str; 8] = [
    "md", "markdown", "mdown", "mkd", "mkdn", "mdwn", "mdtxt", "mdtext",
];
pub const PLAINTEXT_SCOPE: &str = "text.plain";

/// Pure predicate over [`DocumentMeta`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matcher {
    syntaxes: Vec<String>,
    extensions: Vec<String>,
}

impl Matcher {
    pub fn new<S, E>(syntaxes: S, extensions: E) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            syntaxes: syntaxes.into_iter().map(Into::into).collect(),
            extensions: extensions
                .into_iter()
                .map(|ext| ext.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// A listed scope matches itself and any more specific child scope
    /// (`text.html.markdown` matches `text.html.markdown.gfm`).
    pub fn matches(&self, meta: &DocumentMeta<'_>) -> bool {
        let syntax_match = meta.syntax.is_some_and(|scope| {
            self.syntaxes.iter().any(|listed| {
                scope == listed
                    || scope
                        .strip_prefix(listed.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            })
        });

        syntax_match
            || meta.extension.is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|listed| listed.eq_ignore_ascii_case(ext))
            })
    }
}

pub struct RendererDescriptor {
    pub matcher: Matcher,
    pub renderer: Arc<dyn Renderer>,
    pub enabled: bool,
}

impl RendererDescriptor {
    pub fn new(matcher: Matcher, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            matcher,
            renderer,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Descriptors in registration order; the first enabled match wins.
#[derive(Default)]
pub struct RendererRegistry {
    descriptors: Vec<RendererDescriptor>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled renderers, most specific first. Names listed
    /// in `ignored` are registered disabled.
    pub fn with_builtins(ignored: &[String]) -> Self {
        let mut registry = Self::new();
        let is_ignored = |name: &str| ignored.iter().any(|entry| entry.eq_ignore_ascii_case(name));

        let markdown: Arc<dyn Renderer> = Arc::new(MarkdownRenderer::new());
        let plaintext: Arc<dyn Renderer> = Arc::new(PlainTextRenderer);

        for (matcher, renderer) in [
            (
                Matcher::new([MARKDOWN_SCOPE], MARKDOWN_EXTENSIONS),
                markdown,
            ),
            (Matcher::new([PLAINTEXT_SCOPE], ["txt"]), plaintext),
        ] {
            let mut descriptor = RendererDescriptor::new(matcher, renderer);
            if is_ignored(descriptor.renderer.name()) {
                info!(
                    target = "livemark::render::registry",
                    renderer = descriptor.renderer.name(),
                    "Renderer disabled by configuration"
                );
                descriptor = descriptor.disabled();
            }
            registry.register(descriptor);
        }

        registry
    }

    pub fn register(&mut self, descriptor: RendererDescriptor) {
        self.descriptors.push(descriptor);
    }

    pub fn find_renderer(&self, document: &Document) -> Option<Arc<dyn Renderer>> {
        let meta = document.meta();
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.enabled && descriptor.matcher.matches(&meta))
            .map(|descriptor| Arc::clone(&descriptor.renderer))
    }

    pub fn has_renderer_enabled(&self, document: &Document) -> bool {
        self.find_renderer(document).is_some()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
