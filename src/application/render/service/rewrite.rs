use comrak::nodes::{AstNode, NodeHtmlBlock, NodeValue};
use syntect::html::ClassStyle;
use syntect::parsing::SyntaxSet;
use tracing::warn;

use crate::application::render::types::MarkupError;

use super::{highlight, math};

#[derive(Default)]
pub(crate) struct RewriteOutcome {
    pub(crate) code_blocks: usize,
    pub(crate) math_fragments: Vec<MathFragment>,
}

/// KaTeX output parked behind a placeholder so the sanitiser never sees it.
#[derive(Clone)]
pub(crate) struct MathFragment {
    pub(crate) placeholder: String,
    pub(crate) html: String,
    pub(crate) is_block: bool,
}

impl MathFragment {
    /// Swap this fragment's placeholder in `html` for the rendered math.
    pub(crate) fn restore(&self, html: String) -> String {
        if self.is_block {
            let placeholder = format!("<div>{}</div>", self.placeholder);
            html.replace(&placeholder, &self.html)
        } else {
            html.replace(&self.placeholder, &self.html)
        }
    }
}

/// Replace fenced code with highlighted HTML and math with placeholders.
pub(crate) fn rewrite_ast<'a>(
    root: &'a AstNode<'a>,
    syntax_set: &SyntaxSet,
    class_style: &ClassStyle,
) -> Result<RewriteOutcome, MarkupError> {
    let mut walker = RewriteWalker {
        syntax_set,
        class_style,
        outcome: RewriteOutcome::default(),
    };
    walker.visit_nodes(root)?;
    Ok(walker.outcome)
}

struct RewriteWalker<'a> {
    syntax_set: &'a SyntaxSet,
    class_style: &'a ClassStyle,
    outcome: RewriteOutcome,
}

impl RewriteWalker<'_> {
    fn visit_nodes(&mut self, node: &AstNode<'_>) -> Result<(), MarkupError> {
        if self.handle_math_node(node) {
            // fully replaced
        } else if let Some((info, literal)) = extract_code_block(node) {
            let mut segments = info.split_whitespace();
            let language = segments.next().map(str::to_string);
            let meta = segments.collect::<Vec<_>>().join(" ");
            let meta_ref = (!meta.is_empty()).then_some(meta.as_str());

            let html = highlight::highlight_code(
                language.as_deref(),
                meta_ref,
                &literal,
                self.syntax_set,
                self.class_style,
            )?;
            self.outcome.code_blocks += 1;
            let mut data = node.data.borrow_mut();
            data.value = NodeValue::HtmlBlock(NodeHtmlBlock {
                block_type: 0,
                literal: html,
            });
        }

        let mut child = node.first_child();
        while let Some(next) = child {
            self.visit_nodes(next)?;
            child = next.next_sibling();
        }

        Ok(())
    }

    fn handle_math_node(&mut self, node: &AstNode<'_>) -> bool {
        let math_data = {
            let data = node.data.borrow();
            if let NodeValue::Math(math_node) = &data.value {
                Some((math_node.literal.clone(), math_node.display_math))
            } else {
                None
            }
        };

        let Some((literal, display_mode)) = math_data else {
            return false;
        };

        match math::render_math_html(&literal, display_mode) {
            Ok(html) => {
                let container = if display_mode {
                    format!("<div class=\"math-block\" data-math-style=\"display\">{html}</div>")
                } else {
                    format!("<span class=\"math-inline\" data-math-style=\"inline\">{html}</span>")
                };

                let placeholder = format!(
                    "__KATEX_PLACEHOLDER_{}__",
                    self.outcome.math_fragments.len()
                );
                self.outcome.math_fragments.push(MathFragment {
                    placeholder: placeholder.clone(),
                    html: container,
                    is_block: display_mode,
                });

                let mut data = node.data.borrow_mut();
                data.value = if display_mode {
                    NodeValue::HtmlBlock(NodeHtmlBlock {
                        block_type: 0,
                        literal: format!("<div>{placeholder}</div>"),
                    })
                } else {
                    NodeValue::HtmlInline(placeholder)
                };
            }
            Err(err) => {
                warn!(
                    target = "livemark::render::math",
                    display_mode,
                    "KaTeX rendering failed: {err}"
                );
                self.apply_math_fallback(node, &literal, display_mode);
            }
        }

        true
    }

    fn apply_math_fallback(&mut self, node: &AstNode<'_>, literal: &str, display_mode: bool) {
        let value = if display_mode {
            self.outcome.code_blocks += 1;
            let highlighted = highlight::highlight_code(
                Some("latex"),
                None,
                literal,
                self.syntax_set,
                self.class_style,
            )
            .unwrap_or_else(|_| build_plain_code_block("latex", literal));
            NodeValue::HtmlBlock(NodeHtmlBlock {
                block_type: 0,
                literal: highlighted,
            })
        } else {
            let escaped = ammonia::clean_text(literal);
            NodeValue::HtmlInline(format!("<code data-math-style=\"inline\">{escaped}</code>"))
        };

        node.data.borrow_mut().value = value;
    }
}

fn build_plain_code_block(language: &str, literal: &str) -> String {
    let escaped_code = ammonia::clean_text(literal);
    let mut html = String::from("<pre class=\"syntax-highlight\"");
    if !language.is_empty() {
        html.push_str(" data-language=\"");
        html.push_str(&escape_attribute(language));
        html.push('"');
    }
    html.push_str("><code>");
    html.push_str(&escaped_code);
    if !escaped_code.ends_with('\n') {
        html.push('\n');
    }
    html.push_str("</code></pre>");
    html
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\n' | '\r' | '\t' => escaped.push(' '),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn extract_code_block(node: &AstNode<'_>) -> Option<(String, String)> {
    let data = node.data.borrow();
    if let NodeValue::CodeBlock(block) = &data.value {
        Some((block.info.trim().to_string(), block.literal.clone()))
    } else {
        None
    }
}
