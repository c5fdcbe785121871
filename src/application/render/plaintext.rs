use super::types::{MarkupError, Renderer};

/// Shows text verbatim inside a `<pre>` block.
pub struct PlainTextRenderer;

impl Renderer for PlainTextRenderer {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn render(&self, text: &str) -> Result<String, MarkupError> {
        Ok(format!(
            "<pre class=\"plaintext\">{}</pre>",
            ammonia::clean_text(text)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        let html = PlainTextRenderer
            .render("<b>bold</b> & more")
            .expect("plaintext never fails");
        assert!(html.starts_with("<pre class=\"plaintext\">"));
        assert!(!html.contains("<b>"));
        assert!(html.contains("&lt;b&gt;"));
    }
}
