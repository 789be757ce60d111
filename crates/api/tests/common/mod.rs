// Shared helpers for API integration tests. Not every test binary uses
// every helper, so dead_code warnings are suppressed at the item level.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::{Rgb, RgbImage};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use slidemill_api::config::ServerConfig;
use slidemill_api::router::build_app_router;
use slidemill_api::state::AppState;
use slidemill_api::tenant::TENANT_HEADER;
use slidemill_core::config::Settings;
use slidemill_engine::{InferenceRegistry, Scheduler};
use slidemill_events::EventBus;
use slidemill_store::{FileStore, Store};

pub struct TestApp {
    pub router: Router,
    _dir: TempDir,
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
    }
}

/// Build the full application router with all middleware layers over an
/// in-memory engine rooted in a tempdir, so integration tests exercise
/// the same stack production uses.
pub fn build_test_app(configure: impl FnOnce(&mut Settings)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings {
        tile_size: 32,
        tile_overlap: 4,
        data_dir: dir.path().to_path_buf(),
        ..Settings::default()
    };
    configure(&mut settings);
    let settings = Arc::new(settings);

    let bus = Arc::new(EventBus::default());
    let store = Arc::new(Store::new(
        Arc::clone(&bus),
        settings.max_jobs_per_workflow,
    ));
    let files = Arc::new(FileStore::new(&settings.data_dir).unwrap());
    let inference = Arc::new(InferenceRegistry::new(&settings));
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&files),
        Arc::clone(&settings),
        inference,
        CancellationToken::new(),
    );

    let state = AppState {
        settings,
        store,
        files,
        scheduler,
        bus,
    };
    TestApp {
        router: build_app_router(state, &test_config()),
        _dir: dir,
    }
}

/// Issue a GET with an optional tenant header.
pub async fn get(app: &Router, tenant: Option<&str>, path: &str) -> Response<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(path);
    if let Some(tenant) = tenant {
        builder = builder.header(TENANT_HEADER, tenant);
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Issue a POST with a JSON body and an optional tenant header.
pub async fn post_json(
    app: &Router,
    tenant: Option<&str>,
    path: &str,
    body: serde_json::Value,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header("content-type", "application/json");
    if let Some(tenant) = tenant {
        builder = builder.header(TENANT_HEADER, tenant);
    }
    app.clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

/// Upload a small checkerboard PNG via the multipart endpoint and
/// return the stored file record.
pub async fn upload_png(app: &Router, tenant: &str) -> serde_json::Value {
    let img = RgbImage::from_fn(32, 32, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            Rgb([230, 230, 230])
        } else {
            Rgb([20, 20, 20])
        }
    });
    let mut png = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut png),
        image::ImageFormat::Png,
    )
    .unwrap();

    let boundary = "slidemill-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"slide.png\"\r\n\
             Content-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&png);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/files")
        .header(TENANT_HEADER, tenant)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    body_json(response).await
}

/// Poll GET /jobs/{id} until its state matches, panicking after ten
/// seconds.
pub async fn wait_for_job_state(
    app: &Router,
    tenant: &str,
    job_id: &str,
    state: &str,
) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let response = get(app, Some(tenant), &format!("/api/v1/jobs/{job_id}")).await;
        let job = body_json(response).await;
        if job["state"] == state {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {state}, last: {job}"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
