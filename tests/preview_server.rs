use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
};
use livemark::application::lifecycle::PreviewCoordinator;
use livemark::application::render::{
    Matcher, MarkupError, RenderPipeline, Renderer, RendererDescriptor, RendererRegistry,
};
use livemark::application::repos::NoopLauncher;
use livemark::application::throttle::{InlineDispatcher, ThrottleScheduler};
use livemark::cache::RenderCache;
use livemark::config::Settings;
use livemark::domain::{Document, DocumentId};
use livemark::infra::documents::InMemoryDocuments;
use livemark::infra::http::{HttpState, build_router};
use serde_json::Value;
use tower::ServiceExt;

#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
}

impl Renderer for Counting {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn render(&self, text: &str) -> Result<String, MarkupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text == "fail" {
            Err(MarkupError::document("refusing to render"))
        } else {
            Ok(format!("<p>{text}</p>"))
        }
    }
}

struct Harness {
    router: Router,
    renderer: Arc<Counting>,
    documents: Arc<InMemoryDocuments>,
    coordinator: Arc<PreviewCoordinator>,
}

impl Harness {
    fn new() -> Self {
        let renderer = Arc::new(Counting::default());
        let mut registry = RendererRegistry::new();
        registry.register(RendererDescriptor::new(
            Matcher::new(Vec::<String>::new(), ["md"]),
            renderer.clone(),
        ));
        let pipeline = RenderPipeline::new(Arc::new(registry), Arc::new(RenderCache::new()));
        let documents = Arc::new(InMemoryDocuments::new());
        let scheduler = ThrottleScheduler::start(
            pipeline.clone(),
            documents.clone(),
            Arc::new(InlineDispatcher),
        )
        .expect("scheduler starts");
        let coordinator = Arc::new(PreviewCoordinator::new(
            documents.clone(),
            pipeline,
            scheduler,
            Arc::new(NoopLauncher),
            &Settings::default(),
        ));
        let router = build_router(HttpState {
            coordinator: coordinator.clone(),
            documents: documents.clone(),
        });

        Self {
            router,
            renderer,
            documents,
            coordinator,
        }
    }

    fn open(&self, id: u64, text: &str) {
        self.documents
            .upsert(Document::new(DocumentId::new(id), text).with_path(format!("/tmp/doc{id}.md")));
    }

    fn calls(&self) -> usize {
        self.renderer.calls.load(Ordering::SeqCst)
    }

    async fn send(&self, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(body.map_or_else(Body::empty, |raw| Body::from(raw.to_string())))
            .expect("request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router responds");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, bytes.to_vec())
    }

    async fn get(&self, uri: &str) -> (StatusCode, String) {
        let (status, body) = self.send(Method::GET, uri, None).await;
        (status, String::from_utf8(body).expect("utf-8 body"))
    }

    async fn json(&self, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let (status, bytes) = self.send(method, uri, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

#[tokio::test]
async fn cache_miss_renders_once_then_serves_cached_page() {
    let harness = Harness::new();
    harness.open(42, "ok");

    let (status, first) = harness.get("/view/42").await;
    assert_eq!(status, StatusCode::OK);
    assert!(first.contains("<p>ok</p>"));
    assert!(first.contains(r#"<base href="/view/42/">"#));
    assert_eq!(harness.calls(), 1);

    let (status, second) = harness.get("/view/42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(harness.calls(), 1);
}

#[tokio::test]
async fn render_failure_on_miss_is_an_error_page() {
    let harness = Harness::new();
    harness.open(5, "fail");

    let (status, body) = harness.get("/view/5").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("Rendering failed"));
    assert!(harness.coordinator.cache().get(DocumentId::new(5)).is_none());
}

#[tokio::test]
async fn failed_save_keeps_previous_preview() {
    let harness = Harness::new();
    harness.open(1, "A");
    let (status, _) = harness.get("/view/1").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = harness
        .json(Method::POST, "/api/documents/1/save", Some(r#"{"text": "fail"}"#))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scheduled"], Value::Bool(true));
    assert_eq!(harness.calls(), 2);

    let (status, page) = harness.get("/view/1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("<p>A</p>"));
}

#[tokio::test]
async fn unknown_and_malformed_ids_are_not_found() {
    let harness = Harness::new();

    let (status, body) = harness.get("/view/7").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("Nothing to preview"));

    let (status, _) = harness.get("/view/not-a-number").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn document_without_renderer_is_not_found() {
    let harness = Harness::new();
    harness
        .documents
        .upsert(Document::new(DocumentId::new(3), "x").with_path("/tmp/main.rs"));

    let (status, _) = harness.get("/view/3").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(harness.calls(), 0);
}

#[tokio::test]
async fn content_endpoint_reports_unchanged_revision() {
    let harness = Harness::new();
    harness.open(9, "fresh");

    let (status, body) = harness.json(Method::GET, "/view/9/content", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["html"], Value::String("<p>fresh</p>".to_string()));
    let revision = body["revision"].as_u64().expect("revision");

    let (status, _) = harness
        .send(Method::GET, &format!("/view/9/content?revision={revision}"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = harness
        .json(Method::GET, "/view/9/content?revision=0", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revision"].as_u64(), Some(revision));
}

#[tokio::test]
async fn files_next_to_the_document_are_served() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("notes.txt"), "beside").expect("write");
    harness
        .documents
        .upsert(Document::new(DocumentId::new(2), "x").with_path(dir.path().join("doc.md")));

    let (status, body) = harness.get("/view/2/notes.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "beside");

    let (status, _) = harness.get("/view/2/missing.png").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bridge_tracks_document_lifecycle() {
    let harness = Harness::new();

    let (status, body) = harness
        .json(
            Method::PUT,
            "/api/documents/11",
            Some(r#"{"path": "/tmp/eleven.md", "text": "draft"}"#),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scheduled"], Value::Bool(true));

    let (status, body) = harness.json(Method::GET, "/api/documents/11", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], Value::Bool(true));

    let (status, _) = harness
        .json(Method::POST, "/api/documents/11/save", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!harness.coordinator.scheduler().is_pending(DocumentId::new(11)));

    let (_, body) = harness.json(Method::GET, "/api/documents/11", None).await;
    assert!(body["cached_revision"].as_u64().is_some());

    let (status, body) = harness
        .json(Method::DELETE, "/api/documents/11", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["evicted"], Value::from(1));

    let (status, _) = harness.json(Method::GET, "/api/documents/11", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bridge_preview_returns_view_url() {
    let harness = Harness::new();
    harness.open(4, "hello");

    let (status, body) = harness
        .json(Method::POST, "/api/documents/4/preview", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["url"],
        Value::String("http://localhost:51004/view/4".to_string())
    );
    assert_eq!(body["launched"], Value::Bool(true));
}

#[tokio::test]
async fn bridge_export_writes_requested_file() {
    let harness = Harness::new();
    harness.open(6, "exported");
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("six.html");
    let request = serde_json::json!({ "output": output }).to_string();

    let (status, body) = harness
        .json(Method::POST, "/api/documents/6/export", Some(&request))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clipboard"], Value::Null);

    let written = std::fs::read_to_string(&output).expect("export written");
    assert!(written.contains("<p>exported</p>"));
    assert!(written.contains("<title>doc6.md</title>"));
}

#[tokio::test]
async fn bridge_rejects_malformed_bodies() {
    let harness = Harness::new();

    let (status, _) = harness
        .send(Method::PUT, "/api/documents/1", Some("{not json"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = harness
        .send(Method::POST, "/api/documents/1/preview", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn clean_cache_respects_scope() {
    let harness = Harness::new();
    harness.open(1, "one");
    harness.get("/view/1").await;

    let (status, body) = harness.json(Method::POST, "/api/cache/clean", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["evicted"], Value::from(0));

    let (_, body) = harness
        .json(Method::POST, "/api/cache/clean", Some(r#"{"all": true}"#))
        .await;
    assert_eq!(body["evicted"], Value::from(1));
    assert!(harness.coordinator.cache().is_empty());
}

#[tokio::test]
async fn health_and_static_assets_are_served() {
    let harness = Harness::new();

    let (status, _) = harness.get("/_health").await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, script) = harness.get("/static/preview.js").await;
    assert_eq!(status, StatusCode::OK);
    assert!(script.contains("/content"));

    let (status, _) = harness.get("/static/missing.css").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
