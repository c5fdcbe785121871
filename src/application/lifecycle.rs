//! Wires editor events and commands to the scheduler, cache, and exporter.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::application::error::AppError;
use crate::application::export::{self, ExportError, ExportTarget};
use crate::application::render::{RenderError, RenderMode, RenderPipeline};
use crate::application::repos::{BrowserLauncher, DocumentStore};
use crate::application::throttle::{Schedule, ThrottleScheduler};
use crate::cache::RenderCache;
use crate::config::{
    BrowserSettings, ExportSettings, PreviewSettings, RendererSettings, Settings,
};
use crate::domain::{Document, DocumentId, DomainError};
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "application::lifecycle";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("document {id} is not open")]
    UnknownDocument { id: DocumentId },
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl From<CommandError> for AppError {
    fn from(error: CommandError) -> Self {
        match error {
            CommandError::UnknownDocument { .. } => DomainError::not_found("document").into(),
            CommandError::Render(err) => err.into(),
            CommandError::Export(err) => err.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanScope {
    /// Drop entries for documents that are no longer open.
    Closed,
    All,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PreviewOutcome {
    pub url: String,
    pub launched: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub path: PathBuf,
    /// Standalone HTML for the host to place on the clipboard.
    pub clipboard: Option<String>,
}

#[derive(Debug, Clone)]
struct LiveSettings {
    preview: PreviewSettings,
    export: ExportSettings,
    /// Baked into the launcher and registry at startup.
    browser: BrowserSettings,
    renderers: RendererSettings,
}

/// Owns the scheduler and routes host events and commands through it.
pub struct PreviewCoordinator {
    documents: Arc<dyn DocumentStore>,
    pipeline: RenderPipeline,
    scheduler: ThrottleScheduler,
    browser: Arc<dyn BrowserLauncher>,
    settings: RwLock<LiveSettings>,
    view_base: RwLock<String>,
}

impl PreviewCoordinator {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        pipeline: RenderPipeline,
        scheduler: ThrottleScheduler,
        browser: Arc<dyn BrowserLauncher>,
        settings: &Settings,
    ) -> Self {
        Self {
            documents,
            pipeline,
            scheduler,
            browser,
            settings: RwLock::new(LiveSettings {
                preview: settings.preview.clone(),
                export: settings.export.clone(),
                browser: settings.browser.clone(),
                renderers: settings.renderers.clone(),
            }),
            view_base: RwLock::new(view_base_for(settings.server.addr)),
        }
    }

    pub fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    pub fn cache(&self) -> &Arc<RenderCache> {
        self.pipeline.cache()
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn scheduler(&self) -> &ThrottleScheduler {
        &self.scheduler
    }

    pub fn preview_settings(&self) -> PreviewSettings {
        rw_read(&self.settings, SOURCE, "preview_settings")
            .preview
            .clone()
    }

    /// Document-modified event. Returns whether a render was scheduled.
    pub fn on_modified(&self, id: DocumentId) -> bool {
        let preview = self.preview_settings();
        if !preview.refresh_on_modified {
            return false;
        }
        self.schedule(id, Schedule::Debounced(preview.refresh_on_modified_delay))
    }

    /// Document-saved event. Returns whether a render was scheduled.
    pub fn on_saved(&self, id: DocumentId) -> bool {
        if !self.preview_settings().refresh_on_saved {
            return false;
        }
        self.schedule(id, Schedule::Immediate)
    }

    /// Document-closed event. The store must no longer list `id` as open.
    pub fn on_closed(&self, id: DocumentId) -> usize {
        self.scheduler.forget(id);
        let evicted = self.clean_cache(CleanScope::Closed);
        debug!(
            target = "livemark::lifecycle",
            document_id = %id,
            evicted,
            "Document closed"
        );
        evicted
    }

    fn schedule(&self, id: DocumentId, schedule: Schedule) -> bool {
        match self.documents.get(id) {
            Some(document) => self.scheduler.put(&document, schedule),
            None => false,
        }
    }

    /// Render `id` now and open its preview URL in the browser.
    pub fn preview(&self, id: DocumentId) -> Result<PreviewOutcome, CommandError> {
        let document = self.enabled_document(id)?;
        if !self.scheduler.put(&document, Schedule::Immediate) {
            debug!(
                target = "livemark::lifecycle",
                document_id = %id,
                "Immediate render not scheduled; page will fill on request"
            );
        }

        let url = self.view_url(id);
        let launched = self.launch(&url);
        info!(
            target = "livemark::lifecycle",
            document_id = %id,
            url = %url,
            launched,
            "Preview requested"
        );
        Ok(PreviewOutcome { url, launched })
    }

    /// Render `id` to a standalone page and write it out. `output` replaces
    /// the computed target.
    pub fn export(
        &self,
        id: DocumentId,
        output: Option<&Path>,
    ) -> Result<ExportOutcome, CommandError> {
        let document = self.enabled_document(id)?;
        let settings = rw_read(&self.settings, SOURCE, "export.settings")
            .export
            .clone();

        let html = self.pipeline.render_document(&document, RenderMode::Export)?;
        self.pipeline.discard_if_closed(self.documents.as_ref(), id);
        let target = match output {
            Some(path) => ExportTarget::File(path.to_path_buf()),
            None => export::resolve_target(&settings, document.path.as_deref()),
        };
        let path = export::write_export(&target, &html)?;

        if settings.open_after_exporting {
            let url = Url::from_file_path(&path)
                .map(String::from)
                .unwrap_or_else(|()| path.display().to_string());
            self.launch(&url);
        }

        Ok(ExportOutcome {
            path,
            clipboard: settings.copy_to_clipboard.then_some(html),
        })
    }

    pub fn clean_cache(&self, scope: CleanScope) -> usize {
        let cache = self.pipeline.cache();
        match scope {
            CleanScope::Closed => cache.evict(&self.documents.open_ids()),
            CleanScope::All => cache.clear_all(),
        }
    }

    /// Whether preview commands apply to `id` at all.
    pub fn is_enabled(&self, id: DocumentId) -> bool {
        self.documents
            .get(id)
            .is_some_and(|document| self.pipeline.has_renderer_enabled(&document))
    }

    pub fn view_url(&self, id: DocumentId) -> String {
        let base = rw_read(&self.view_base, SOURCE, "view_url");
        format!("{}/view/{id}", base.as_str())
    }

    /// Point preview URLs at a freshly bound listener.
    pub fn set_view_base(&self, addr: SocketAddr) {
        *rw_write(&self.view_base, SOURCE, "set_view_base") = view_base_for(addr);
    }

    /// Swap in reloaded preview and export settings. Returns the keys whose
    /// change only takes effect after a restart; those keep their current value.
    pub fn update_settings(&self, settings: &Settings) -> Vec<&'static str> {
        let mut live = rw_write(&self.settings, SOURCE, "update_settings");
        let mut restart = Vec::new();
        if live.preview.dispatch != settings.preview.dispatch {
            restart.push("preview.dispatch");
        }
        if live.browser != settings.browser {
            restart.push("browser.command");
        }
        if live.renderers != settings.renderers {
            restart.push("renderers.ignored");
        }
        for key in &restart {
            warn!(
                target = "livemark::lifecycle",
                key,
                "Setting change requires a restart; keeping the current value"
            );
        }

        let dispatch = live.preview.dispatch;
        live.preview = settings.preview.clone();
        live.preview.dispatch = dispatch;
        live.export = settings.export.clone();
        restart
    }

    pub fn shutdown(&self) {
        self.scheduler.stop();
    }

    fn enabled_document(&self, id: DocumentId) -> Result<Document, CommandError> {
        let document = self
            .documents
            .get(id)
            .ok_or(CommandError::UnknownDocument { id })?;
        if !self.pipeline.has_renderer_enabled(&document) {
            return Err(RenderError::NoRendererAvailable { id }.into());
        }
        Ok(document)
    }

    fn launch(&self, url: &str) -> bool {
        match self.browser.open(url) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target = "livemark::lifecycle",
                    url,
                    error = %err,
                    "Failed to launch browser"
                );
                false
            }
        }
    }
}

fn view_base_for(addr: SocketAddr) -> String {
    let ip = addr.ip();
    if ip.is_loopback() || ip.is_unspecified() {
        format!("http://localhost:{}", addr.port())
    } else {
        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;
    use crate::application::render::RendererRegistry;
    use crate::application::repos::LaunchError;
    use crate::application::throttle::InlineDispatcher;

    #[derive(Default)]
    struct Docs(Mutex<HashMap<DocumentId, Document>>);

    impl Docs {
        fn insert(&self, document: Document) {
            self.0.lock().expect("docs").insert(document.id, document);
        }

        fn remove(&self, id: DocumentId) {
            self.0.lock().expect("docs").remove(&id);
        }
    }

    impl DocumentStore for Docs {
        fn get(&self, id: DocumentId) -> Option<Document> {
            self.0.lock().expect("docs").get(&id).cloned()
        }

        fn open_ids(&self) -> HashSet<DocumentId> {
            self.0.lock().expect("docs").keys().copied().collect()
        }
    }

    #[derive(Default)]
    struct Recorder {
        urls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl BrowserLauncher for Recorder {
        fn open(&self, url: &str) -> Result<(), LaunchError> {
            if self.fail {
                return Err(LaunchError::EmptyCommand);
            }
            self.urls.lock().expect("urls").push(url.to_string());
            Ok(())
        }
    }

    fn settings() -> Settings {
        Settings::default()
    }

    fn coordinator_with(
        docs: Arc<Docs>,
        browser: Arc<Recorder>,
        settings: &Settings,
    ) -> PreviewCoordinator {
        let registry = RendererRegistry::with_builtins(&[]);
        let pipeline = RenderPipeline::new(Arc::new(registry), Arc::new(RenderCache::new()));
        let scheduler = ThrottleScheduler::start(
            pipeline.clone(),
            docs.clone(),
            Arc::new(InlineDispatcher),
        )
        .expect("scheduler starts");
        PreviewCoordinator::new(docs, pipeline, scheduler, browser, settings)
    }

    fn markdown(id: u64, text: &str) -> Document {
        Document::new(DocumentId::new(id), text).with_path(format!("/tmp/doc{id}.md"))
    }

    #[test]
    fn save_renders_immediately_with_inline_dispatch() {
        let docs = Arc::new(Docs::default());
        docs.insert(markdown(1, "# Title"));
        let coordinator = coordinator_with(docs, Arc::default(), &settings());

        assert!(coordinator.on_saved(DocumentId::new(1)));
        let entry = coordinator
            .cache()
            .get(DocumentId::new(1))
            .expect("rendered on save");
        assert!(entry.html.contains("Title"));
        coordinator.shutdown();
    }

    #[test]
    fn disabled_save_refresh_schedules_nothing() {
        let docs = Arc::new(Docs::default());
        docs.insert(markdown(1, "text"));
        let mut settings = settings();
        settings.preview.refresh_on_saved = false;
        let coordinator = coordinator_with(docs, Arc::default(), &settings);

        assert!(!coordinator.on_saved(DocumentId::new(1)));
        assert!(coordinator.cache().is_empty());
    }

    #[test]
    fn modification_is_queued_not_rendered() {
        let docs = Arc::new(Docs::default());
        docs.insert(markdown(2, "draft"));
        let mut settings = settings();
        settings.preview.refresh_on_modified_delay = std::time::Duration::from_secs(30);
        let coordinator = coordinator_with(docs, Arc::default(), &settings);

        assert!(coordinator.on_modified(DocumentId::new(2)));
        assert!(coordinator.scheduler().is_pending(DocumentId::new(2)));
        assert!(coordinator.cache().is_empty());
    }

    #[test]
    fn closing_evicts_cache_and_pending_entry() {
        let docs = Arc::new(Docs::default());
        docs.insert(markdown(1, "one"));
        docs.insert(markdown(2, "two"));
        let coordinator = coordinator_with(docs.clone(), Arc::default(), &settings());
        coordinator.on_saved(DocumentId::new(1));
        coordinator.on_saved(DocumentId::new(2));

        docs.remove(DocumentId::new(2));
        assert_eq!(coordinator.on_closed(DocumentId::new(2)), 1);
        assert!(coordinator.cache().contains(DocumentId::new(1)));
        assert!(!coordinator.cache().contains(DocumentId::new(2)));
    }

    #[test]
    fn preview_returns_url_and_launches_browser() {
        let docs = Arc::new(Docs::default());
        docs.insert(markdown(7, "hello"));
        let browser = Arc::new(Recorder::default());
        let coordinator = coordinator_with(docs, browser.clone(), &settings());

        let outcome = coordinator.preview(DocumentId::new(7)).expect("preview");
        assert_eq!(outcome.url, "http://localhost:51004/view/7");
        assert!(outcome.launched);
        assert_eq!(browser.urls.lock().expect("urls").len(), 1);
        assert!(coordinator.cache().contains(DocumentId::new(7)));
    }

    #[test]
    fn launch_failure_still_returns_url() {
        let docs = Arc::new(Docs::default());
        docs.insert(markdown(7, "hello"));
        let browser = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let coordinator = coordinator_with(docs, browser, &settings());

        let outcome = coordinator.preview(DocumentId::new(7)).expect("preview");
        assert!(!outcome.launched);
    }

    #[test]
    fn preview_of_unsupported_document_reports_no_renderer() {
        let docs = Arc::new(Docs::default());
        docs.insert(Document::new(DocumentId::new(3), "fn main() {}").with_path("/tmp/a.rs"));
        let coordinator = coordinator_with(docs, Arc::default(), &settings());

        assert!(!coordinator.is_enabled(DocumentId::new(3)));
        let err = coordinator.preview(DocumentId::new(3)).unwrap_err();
        assert!(matches!(err, CommandError::Render(ref inner) if inner.is_no_renderer()));
        assert!(matches!(
            coordinator.preview(DocumentId::new(99)),
            Err(CommandError::UnknownDocument { .. })
        ));
    }

    #[test]
    fn export_writes_page_and_offers_clipboard() {
        let dir = tempfile::tempdir().expect("tempdir");
        let docs = Arc::new(Docs::default());
        docs.insert(markdown(4, "*body*"));
        let mut settings = settings();
        settings.export.copy_to_clipboard = true;
        let coordinator = coordinator_with(docs, Arc::default(), &settings);

        let output = dir.path().join("out.html");
        let outcome = coordinator
            .export(DocumentId::new(4), Some(&output))
            .expect("export");

        assert_eq!(outcome.path, output);
        let written = std::fs::read_to_string(&output).expect("read export");
        assert!(written.contains("<em>body</em>"));
        assert_eq!(outcome.clipboard.as_deref(), Some(written.as_str()));
    }

    #[test]
    fn clean_all_clears_open_documents_too() {
        let docs = Arc::new(Docs::default());
        docs.insert(markdown(1, "one"));
        let coordinator = coordinator_with(docs, Arc::default(), &settings());
        coordinator.on_saved(DocumentId::new(1));

        assert_eq!(coordinator.clean_cache(CleanScope::Closed), 0);
        assert_eq!(coordinator.clean_cache(CleanScope::All), 1);
    }

    #[test]
    fn view_base_follows_rebind() {
        let coordinator = coordinator_with(Arc::default(), Arc::default(), &settings());
        coordinator.set_view_base("127.0.0.1:6001".parse().expect("addr"));
        assert_eq!(coordinator.view_url(DocumentId::new(1)), "http://localhost:6001/view/1");

        coordinator.set_view_base("192.168.1.5:7000".parse().expect("addr"));
        assert_eq!(
            coordinator.view_url(DocumentId::new(1)),
            "http://192.168.1.5:7000/view/1"
        );
    }

    #[test]
    fn reload_keeps_dispatch_mode() {
        let coordinator = coordinator_with(Arc::default(), Arc::default(), &settings());
        let mut reloaded = settings();
        reloaded.preview.dispatch = crate::config::DispatchMode::Inline;
        reloaded.preview.refresh_on_saved = false;

        assert_eq!(coordinator.update_settings(&reloaded), vec!["preview.dispatch"]);
        let live = coordinator.preview_settings();
        assert!(!live.refresh_on_saved);
        assert_eq!(live.dispatch, crate::config::DispatchMode::Runtime);
    }

    #[test]
    fn reload_reports_launcher_and_registry_changes() {
        let coordinator = coordinator_with(Arc::default(), Arc::default(), &settings());
        assert!(coordinator.update_settings(&settings()).is_empty());

        let mut reloaded = settings();
        reloaded.browser.command = vec!["firefox".to_string(), "{url}".to_string()];
        reloaded.renderers.ignored = vec!["plaintext".to_string()];

        assert_eq!(
            coordinator.update_settings(&reloaded),
            vec!["browser.command", "renderers.ignored"]
        );
        // Still reported on the next reload: the running values did not change.
        assert_eq!(coordinator.update_settings(&reloaded).len(), 2);
    }
}
