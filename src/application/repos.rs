//! Port traits implemented by infrastructure adapters.

use std::collections::HashSet;
use std::io;

use thiserror::Error;

use crate::domain::{Document, DocumentId};

/// Read access to the host's live documents.
pub trait DocumentStore: Send + Sync {
    /// Current snapshot of an open document.
    fn get(&self, id: DocumentId) -> Option<Document>;

    /// Ids of every document that is still open.
    fn open_ids(&self) -> HashSet<DocumentId>;
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("browser command is empty")]
    EmptyCommand,
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Opens a URL for the user, usually in a web browser.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<(), LaunchError>;
}

/// Launcher that never opens anything; used by tests and headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLauncher;

impl BrowserLauncher for NoopLauncher {
    fn open(&self, _url: &str) -> Result<(), LaunchError> {
        Ok(())
    }
}
