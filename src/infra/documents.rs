//! In-process document store used by the standalone server and the editor bridge.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::application::repos::DocumentStore;
use crate::domain::{Document, DocumentId};

#[derive(Debug)]
pub struct InMemoryDocuments {
    documents: DashMap<DocumentId, Document>,
    next_id: AtomicU64,
}

impl Default for InMemoryDocuments {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Insert or replace a document, returning the previous snapshot.
    pub fn upsert(&self, document: Document) -> Option<Document> {
        self.next_id
            .fetch_max(document.id.get().saturating_add(1), Ordering::SeqCst);
        self.documents.insert(document.id, document)
    }

    /// Returns `false` when `id` was not open.
    pub fn close(&self, id: DocumentId) -> bool {
        self.documents.remove(&id).is_some()
    }

    /// Open `path`, reusing the id of an already-open document for the same file.
    pub fn open_file(&self, path: impl AsRef<Path>) -> io::Result<Document> {
        let path = normalize(path.as_ref());
        let text = fs::read_to_string(&path)?;

        let id = self
            .find_by_path(&path)
            .unwrap_or_else(|| DocumentId::new(self.next_id.fetch_add(1, Ordering::SeqCst)));
        let document = Document::new(id, text).with_path(path);
        self.documents.insert(id, document.clone());

        debug!(
            target = "livemark::documents",
            document_id = %id,
            path = ?document.path,
            "Document opened"
        );
        Ok(document)
    }

    /// Re-read the backing file of `id`. `Ok(None)` when `id` is not open or
    /// has no backing file.
    pub fn reload_from_disk(&self, id: DocumentId) -> io::Result<Option<Document>> {
        let Some(path) = self.documents.get(&id).and_then(|doc| doc.path.clone()) else {
            return Ok(None);
        };
        let text = fs::read_to_string(&path)?;

        Ok(self.documents.get_mut(&id).map(|mut entry| {
            entry.text = text;
            entry.loading = false;
            entry.clone()
        }))
    }

    pub fn find_by_path(&self, path: &Path) -> Option<DocumentId> {
        self.documents
            .iter()
            .find(|entry| entry.path.as_deref() == Some(path))
            .map(|entry| *entry.key())
    }

    /// Backing files of every open document.
    pub fn paths(&self) -> Vec<(DocumentId, PathBuf)> {
        self.documents
            .iter()
            .filter_map(|entry| entry.path.clone().map(|path| (*entry.key(), path)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl DocumentStore for InMemoryDocuments {
    fn get(&self, id: DocumentId) -> Option<Document> {
        self.documents.get(&id).map(|entry| entry.clone())
    }

    fn open_ids(&self) -> HashSet<DocumentId> {
        self.documents.iter().map(|entry| *entry.key()).collect()
    }
}

fn normalize(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
