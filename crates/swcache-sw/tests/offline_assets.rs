//! End-to-end runs of the static asset cache against a mock origin.

use swcache_core::WorkerConfig;
use swcache_net::Request;
use swcache_sw::{HostEvent, ServiceWorkerError, ServiceWorkerHost, WorkerState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_assets(server: &MockServer) {
    let assets = [
        ("/", "text/html", "<html>formulario</html>"),
        ("/static/styles.css", "text/css", "body { margin: 0 }"),
        ("/static/icons/icon-192x192.png", "image/png", "png-192"),
        ("/static/icons/icon-512x512.png", "image/png", "png-512"),
    ];
    for (asset, content_type, body) in assets {
        Mock::given(method("GET"))
            .and(path(asset))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), content_type),
            )
            .mount(server)
            .await;
    }
}

fn config_for(server: &MockServer) -> WorkerConfig {
    WorkerConfig {
        origin: server.uri(),
        ..Default::default()
    }
}

async fn hits(server: &MockServer, asset: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == asset)
        .count()
}

#[tokio::test]
async fn styles_come_from_network_then_cache() {
    let server = MockServer::start().await;
    mount_assets(&server).await;

    let (host, _rx) = ServiceWorkerHost::from_config(&config_for(&server))
        .await
        .unwrap();
    let styles = format!("{}/static/styles.css", server.uri());

    host.fetch(Request::parse(&styles).unwrap()).await.unwrap();
    assert_eq!(hits(&server, "/static/styles.css").await, 1);

    host.start().await.unwrap();
    assert_eq!(hits(&server, "/static/styles.css").await, 2);

    let response = host.fetch(Request::parse(&styles).unwrap()).await.unwrap();
    assert_eq!(response.text().unwrap(), "body { margin: 0 }");
    assert_eq!(response.content_type(), Some("text/css"));
    assert_eq!(hits(&server, "/static/styles.css").await, 2);
}

#[tokio::test]
async fn install_fails_when_one_asset_is_missing() {
    let server = MockServer::start().await;
    for asset in ["/", "/static/styles.css", "/static/icons/icon-192x192.png"] {
        Mock::given(method("GET"))
            .and(path(asset))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/static/icons/icon-512x512.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (host, mut rx) = ServiceWorkerHost::from_config(&config_for(&server))
        .await
        .unwrap();

    let err = host.start().await.unwrap_err();
    assert!(matches!(err, ServiceWorkerError::AssetFailed { status: 404, .. }));
    assert!(host.active_state().await.is_none());

    let caches = host.caches();
    let caches = caches.read().await;
    assert!(caches.get("flask-pwa-cache").map_or(true, |c| c.is_empty()));
    drop(caches);

    let mut saw_failure = false;
    while let Ok(event) = rx.try_recv() {
        if let HostEvent::InstallFailed { .. } = event {
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn uncached_requests_pass_through_verbatim() {
    let server = MockServer::start().await;
    mount_assets(&server).await;
    Mock::given(method("GET"))
        .and(path("/enviar"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let (host, _rx) = ServiceWorkerHost::from_config(&config_for(&server))
        .await
        .unwrap();
    host.start().await.unwrap();
    assert_eq!(host.active_state().await, Some(WorkerState::Activated));

    let request = Request::parse(&format!("{}/enviar", server.uri())).unwrap();
    let response = host.fetch(request).await.unwrap();
    assert_eq!(response.status.as_u16(), 503);
    assert_eq!(response.text().unwrap(), "maintenance");
}

#[tokio::test]
async fn persisted_caches_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    mount_assets(&server).await;

    let config = WorkerConfig {
        persist_caches: true,
        cache_dir: dir.path().to_path_buf(),
        ..config_for(&server)
    };

    {
        let (host, _rx) = ServiceWorkerHost::from_config(&config).await.unwrap();
        host.start().await.unwrap();
    }
    assert!(config.snapshot_path().exists());

    let (restarted, _rx) = ServiceWorkerHost::from_config(&config).await.unwrap();
    let root = Request::parse(&format!("{}/", server.uri())).unwrap();
    assert!(restarted.is_cached(&root).await);
}
