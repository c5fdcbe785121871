use std::net::{SocketAddr, TcpListener as StdListener};
use std::sync::Arc;
use std::time::Duration;

use livemark::application::lifecycle::PreviewCoordinator;
use livemark::application::render::{RenderPipeline, RendererRegistry};
use livemark::application::repos::NoopLauncher;
use livemark::application::throttle::{InlineDispatcher, ThrottleScheduler};
use livemark::cache::RenderCache;
use livemark::config::Settings;
use livemark::domain::{Document, DocumentId};
use livemark::infra::documents::InMemoryDocuments;
use livemark::infra::http::{HttpState, PreviewServer, ServerError, build_router};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().expect("loopback address")
}

fn server() -> (PreviewServer, Arc<InMemoryDocuments>) {
    let pipeline = RenderPipeline::new(
        Arc::new(RendererRegistry::with_builtins(&[])),
        Arc::new(RenderCache::new()),
    );
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
        coordinator,
        documents: documents.clone(),
    });
    (
        PreviewServer::new(router, Duration::from_secs(1)),
        documents,
    )
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .expect("http client")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serves_rendered_markdown_over_a_real_socket() {
    let (mut server, documents) = server();
    documents.upsert(Document::new(DocumentId::new(1), "# Heading").with_path("/tmp/real.md"));

    let addr = server.bind(loopback()).await.expect("bind");
    let response = client()
        .get(format!("http://{addr}/view/1"))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.expect("body");
    assert!(body.contains("Heading"));
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconfigure_releases_the_previous_socket() {
    let (mut server, _) = server();
    let client = client();

    let first = server.bind(loopback()).await.expect("first bind");
    let status = client
        .get(format!("http://{first}/_health"))
        .send()
        .await
        .expect("health")
        .status();
    assert_eq!(status, reqwest::StatusCode::NO_CONTENT);

    let second = server.reconfigure(loopback()).await.expect("rebind");
    assert_ne!(first, second);
    assert_eq!(server.local_addr(), Some(second));
    assert!(client.get(format!("http://{first}/_health")).send().await.is_err());
    assert!(client
        .get(format!("http://{second}/_health"))
        .send()
        .await
        .is_ok());

    // The old port is free again.
    drop(StdListener::bind(first).expect("old port released"));

    server.stop().await;
    assert!(!server.is_running());
    assert!(client.get(format!("http://{second}/_health")).send().await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconfigure_to_the_same_address_keeps_the_listener() {
    let (mut server, _) = server();
    let addr = server.bind(loopback()).await.expect("bind");

    let again = server.reconfigure(addr).await.expect("no-op");
    assert_eq!(again, addr);
    assert!(server.is_running());
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn occupied_port_is_a_bind_error() {
    let occupied = StdListener::bind(loopback()).expect("occupy port");
    let addr = occupied.local_addr().expect("occupied addr");
    let (mut server, _) = server();

    let err = server.bind(addr).await.unwrap_err();
    assert!(matches!(err, ServerError::Bind { addr: failed, .. } if failed == addr));
    assert!(!server.is_running());
}
