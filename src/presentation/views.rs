use crate::application::error::{ErrorReport, HttpError};
use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

const PREVIEW_CSS: &str = include_str!(concat!(env!("OUT_DIR"), "/static_preview/preview.css"));
const CODE_CSS: &str = include_str!(concat!(env!("OUT_DIR"), "/static_preview/code.css"));

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Error page carrying an [`ErrorReport`] for the response logger.
pub fn render_error_response(status: StatusCode, view: ErrorPageView, report: ErrorReport) -> Response {
    let mut response = render_template_response(ErrorTemplate { view }, status);
    report.attach(&mut response);
    response
}

/// Preview page for one document; the script keeps `content` fresh by polling.
pub struct PreviewPageView {
    pub id: String,
    pub title: String,
    pub content: String,
    pub revision: u64,
    pub poll_interval_ms: u64,
}

#[derive(Template)]
#[template(path = "preview.html")]
pub struct PreviewTemplate {
    pub view: PreviewPageView,
}

pub struct ExportPageView {
    pub title: String,
    pub content: String,
    pub stylesheet: String,
}

#[derive(Template)]
#[template(path = "export.html")]
pub struct ExportTemplate {
    pub view: ExportPageView,
}

/// Standalone page around a rendered fragment, stylesheets inlined.
pub fn render_export_page(title: &str, content: &str) -> Result<String, TemplateRenderError> {
    let mut stylesheet = String::with_capacity(PREVIEW_CSS.len() + CODE_CSS.len() + 1);
    stylesheet.push_str(PREVIEW_CSS);
    stylesheet.push('\n');
    stylesheet.push_str(CODE_CSS);

    ExportTemplate {
        view: ExportPageView {
            title: title.to_string(),
            content: content.to_string(),
            stylesheet,
        },
    }
    .render()
    .map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_export_page",
            "Export template rendering failed",
            err,
        )
    })
}

pub struct ErrorPageView {
    pub title: String,
    pub message: String,
}

impl ErrorPageView {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::new(
            "Nothing to preview",
            "This document is not open, or no renderer is enabled for its type.",
        )
    }

    pub fn render_failed() -> Self {
        Self::new(
            "Rendering failed",
            "The document could not be rendered. Fix the source and save again; the previous preview is kept until then.",
        )
    }
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub view: ErrorPageView,
}
