//! Writing rendered documents to standalone HTML files.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;
use tracing::info;

use crate::application::render::RenderError;
use crate::config::ExportSettings;

const CURRENT_FOLDER: &str = ".";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("failed to write export to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create temporary export file: {0}")]
    TempFile(#[source] io::Error),
}

/// Where an export lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    File(PathBuf),
    /// A fresh, persisted temporary `.html` file.
    Temporary,
}

/// Pick the output location for a document.
///
/// `saved_path` is the backing file when it exists on disk; `folder_is_dir`
/// reports whether the configured target folder is an existing directory.
pub fn export_target(
    target_folder: Option<&Path>,
    folder_is_dir: bool,
    saved_path: Option<&Path>,
    timestamp: &str,
) -> ExportTarget {
    let Some(folder) = target_folder else {
        return ExportTarget::Temporary;
    };
    let is_current = folder == Path::new(CURRENT_FOLDER);

    match saved_path {
        _ if !is_current && !folder_is_dir => ExportTarget::Temporary,
        None if is_current => ExportTarget::Temporary,
        Some(path) if is_current => {
            let stem = path.with_extension("");
            ExportTarget::File(append_to_file_name(&stem, &format!("{timestamp}.html")))
        }
        None => ExportTarget::File(folder.join(format!("Untitled{timestamp}.html"))),
        Some(path) => {
            let base = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Untitled".to_string());
            ExportTarget::File(folder.join(format!("{base}{timestamp}.html")))
        }
    }
}

fn append_to_file_name(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Resolve the target for `document_path` under the current settings and clock.
pub fn resolve_target(settings: &ExportSettings, document_path: Option<&Path>) -> ExportTarget {
    let timestamp = Local::now().format(&settings.timestamp_format).to_string();
    let folder = settings.target_folder.as_deref();
    let folder_is_dir = folder.is_some_and(Path::is_dir);
    let saved_path = document_path.filter(|path| path.exists());
    export_target(folder, folder_is_dir, saved_path, &timestamp)
}

/// Write `html` to `target`, returning the path actually written.
pub fn write_export(target: &ExportTarget, html: &str) -> Result<PathBuf, ExportError> {
    let path = match target {
        ExportTarget::File(path) => {
            fs::write(path, html).map_err(|source| ExportError::Io {
                path: path.clone(),
                source,
            })?;
            path.clone()
        }
        ExportTarget::Temporary => {
            let mut file = tempfile::Builder::new()
                .prefix("livemark-")
                .suffix(".html")
                .tempfile()
                .map_err(ExportError::TempFile)?;
            file.write_all(html.as_bytes())
                .map_err(|source| ExportError::Io {
                    path: file.path().to_path_buf(),
                    source,
                })?;
            let (_, path) = file.keep().map_err(|err| ExportError::TempFile(err.error))?;
            path
        }
    };

    info!(
        target = "livemark::export",
        path = %path.display(),
        bytes = html.len(),
        "Document exported"
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "_240101120000";

    #[test]
    fn no_folder_means_temporary() {
        assert_eq!(
            export_target(None, false, Some(Path::new("/d/a.md")), TS),
            ExportTarget::Temporary
        );
    }

    #[test]
    fn current_folder_writes_beside_saved_source() {
        let target = export_target(Some(Path::new(".")), true, Some(Path::new("/d/a.md")), TS);
        assert_eq!(
            target,
            ExportTarget::File(PathBuf::from("/d/a_240101120000.html"))
        );
    }

    #[test]
    fn current_folder_with_unsaved_document_is_temporary() {
        assert_eq!(
            export_target(Some(Path::new(".")), true, None, TS),
            ExportTarget::Temporary
        );
    }

    #[test]
    fn directory_with_unsaved_document_uses_untitled() {
        let target = export_target(Some(Path::new("/out")), true, None, TS);
        assert_eq!(
            target,
            ExportTarget::File(PathBuf::from("/out/Untitled_240101120000.html"))
        );
    }

    #[test]
    fn directory_with_saved_document_keeps_file_name() {
        let target = export_target(Some(Path::new("/out")), true, Some(Path::new("/d/a.md")), TS);
        assert_eq!(
            target,
            ExportTarget::File(PathBuf::from("/out/a.md_240101120000.html"))
        );
    }

    #[test]
    fn missing_directory_falls_back_to_temporary() {
        let target = export_target(Some(Path::new("/nope")), false, Some(Path::new("/d/a.md")), TS);
        assert_eq!(target, ExportTarget::Temporary);
    }

    #[test]
    fn temporary_export_persists_html_file() {
        let path = write_export(&ExportTarget::Temporary, "<p>x</p>").expect("temp export");

        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("html"));
        assert_eq!(fs::read_to_string(&path).expect("read back"), "<p>x</p>");
        fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn write_failure_is_reported_with_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = ExportTarget::File(dir.path().join("missing").join("out.html"));

        let err = write_export(&target, "x").unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
    }
}
