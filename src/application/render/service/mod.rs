mod config;
mod highlight;
mod math;
mod rewrite;

use comrak::{Arena, format_html, nodes::AstNode, parse_document};
use once_cell::sync::Lazy;
use syntect::{dumps::from_uncompressed_data, html::ClassStyle, parsing::SyntaxSet};
use tracing::warn;

use crate::application::render::types::{MarkupError, Renderer};

use config::{build_sanitizer, default_options};
use rewrite::{RewriteOutcome, rewrite_ast};

static SYNTAX_SET: Lazy<SyntaxSet> = Lazy::new(load_syntax_set);

fn load_syntax_set() -> SyntaxSet {
    let syntax_bytes = include_bytes!(env!("SYNTAX_PACK_FILE"));
    from_uncompressed_data(syntax_bytes).unwrap_or_else(|err| {
        warn!(
            target = "livemark::render::markdown",
            error = %err,
            "Bundled syntax pack unreadable; using syntect defaults"
        );
        SyntaxSet::load_defaults_newlines()
    })
}

/// Comrak-based Markdown renderer with Syntect highlighting, KaTeX math and
/// Ammonia sanitisation.
pub struct MarkdownRenderer {
    options: comrak::Options<'static>,
    class_style: ClassStyle,
    sanitizer: ammonia::Builder<'static>,
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self {
            options: default_options(),
            class_style: ClassStyle::SpacedPrefixed { prefix: "syntax-" },
            sanitizer: build_sanitizer(),
        }
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for MarkdownRenderer {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn render(&self, text: &str) -> Result<String, MarkupError> {
        let arena = Arena::new();
        let root = parse_document(&arena, text, &self.options);

        let rewrite_outcome = rewrite_ast(root, &SYNTAX_SET, &self.class_style)?;
        let rendered_html = render_html_stage(root, &self.options)?;
        let sanitized_html = self.sanitizer.clean(&rendered_html).to_string();

        Ok(restore_stage(sanitized_html, &rewrite_outcome))
    }
}

fn render_html_stage<'a>(
    root: &'a AstNode<'a>,
    options: &comrak::Options<'static>,
) -> Result<String, MarkupError> {
    let mut html = String::new();
    format_html(root, options, &mut html).map_err(|err| MarkupError::Markdown {
        message: err.to_string(),
    })?;
    Ok(html)
}

fn restore_stage(html: String, rewrite_outcome: &RewriteOutcome) -> String {
    rewrite_outcome
        .math_fragments
        .iter()
        .fold(html, |acc, fragment| fragment.restore(acc))
}
