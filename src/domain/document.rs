//! Documents as seen by the previewer, and the artifacts rendered from them.

use std::{
    ffi::OsStr,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::DomainError;

/// Title shown for documents that have never been saved.
pub const UNTITLED: &str = "Untitled";

/// Editor-assigned handle, stable for as long as the document stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(u64);

impl DocumentId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for DocumentId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|err| DomainError::validation(format!("invalid document id `{value}`: {err}")))
    }
}

/// Snapshot of a live document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: DocumentId,
    /// Backing file, `None` while unsaved.
    pub path: Option<PathBuf>,
    /// Syntax scope reported by the host, e.g. `text.html.markdown.gfm`.
    pub syntax: Option<String>,
    pub text: String,
    /// Set while the host is still reading the file from disk.
    pub loading: bool,
}

impl Document {
    pub fn new(id: DocumentId, text: impl Into<String>) -> Self {
        Self {
            id,
            path: None,
            syntax: None,
            text: text.into(),
            loading: false,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_syntax(mut self, syntax: impl Into<String>) -> Self {
        self.syntax = Some(syntax.into());
        self
    }

    pub fn title(&self) -> String {
        self.path
            .as_deref()
            .and_then(Path::file_name)
            .and_then(OsStr::to_str)
            .map(str::to_string)
            .unwrap_or_else(|| UNTITLED.to_string())
    }

    /// Directory holding the backing file, if any.
    pub fn directory(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    pub fn meta(&self) -> DocumentMeta<'_> {
        DocumentMeta {
            syntax: self.syntax.as_deref(),
            extension: self
                .path
                .as_deref()
                .and_then(Path::extension)
                .and_then(OsStr::to_str),
        }
    }
}

/// The parts of a document renderer matching looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DocumentMeta<'a> {
    pub syntax: Option<&'a str>,
    pub extension: Option<&'a str>,
}

/// Latest rendered fragment for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub id: DocumentId,
    #[serde(serialize_with = "serialize_html")]
    pub html: Arc<str>,
    #[serde(with = "time::serde::rfc3339")]
    pub rendered_at: OffsetDateTime,
    /// Monotonic across the whole cache; a browser compares it to detect fresh output.
    pub revision: u64,
}

fn serialize_html<S>(html: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(html)
}
