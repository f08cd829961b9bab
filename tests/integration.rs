//! End-to-end coverage across the HTTP gateway, dispatch engine and
//! storage layer, wired together the way `main.rs` wires them — an
//! in-memory `Server` plus the real `axum` router, exercised with
//! `tower::ServiceExt::oneshot` rather than a bound socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tetora::atoms::types::{EngineConfig, Task, TaskStatus};
use tetora::server::Server;
use tower::ServiceExt;

fn test_server(config: EngineConfig) -> Arc<Server> {
    let db = tetora::store::open_in_memory().expect("open in-memory store");
    Server::init(config, std::path::PathBuf::from("/dev/null"), db).expect("server init")
}

#[tokio::test]
async fn healthz_and_metrics_are_reachable_without_auth() {
    let mut config = EngineConfig::default();
    config.api_token = Some("super-secret-token".to_string());
    let server = test_server(config);
    let router = tetora::http::build_router(server);

    let health = router.clone().oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let metrics = router.oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_route_rejects_missing_bearer_token() {
    let mut config = EngineConfig::default();
    config.api_token = Some("super-secret-token".to_string());
    let server = test_server(config);
    let router = tetora::http::build_router(server);

    let resp = router
        .oneshot(Request::builder().method("GET").uri("/tasks/running").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_route_admits_a_valid_bearer_token() {
    let mut config = EngineConfig::default();
    config.api_token = Some("super-secret-token".to_string());
    let server = test_server(config);
    let router = tetora::http::build_router(server);

    let resp = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/tasks/running")
                .header("authorization", "Bearer super-secret-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn dispatch_rejects_a_task_whose_add_dirs_entry_does_not_exist() {
    let server = test_server(EngineConfig::default());
    let task = Task {
        id: "t1".to_string(),
        name: "probe".to_string(),
        prompt: "hello".to_string(),
        agent: "default".to_string(),
        model: None,
        provider: None,
        timeout_secs: Some(1),
        budget_usd: None,
        permission_mode: None,
        source: "test".to_string(),
        session_id: None,
        add_dirs: vec!["/definitely/does/not/exist/anywhere".to_string()],
        mcp_path: None,
    };

    let result = tetora::dispatch::dispatch_single(&server, task).await;
    assert_eq!(result.status, TaskStatus::Error);
    assert!(result.error.unwrap().contains("addDirs"));
    assert_eq!(result.id, "t1");
}

#[tokio::test]
async fn dispatch_is_rejected_while_a_batch_is_already_active() {
    use std::sync::atomic::Ordering;

    let server = test_server(EngineConfig::default());
    server.dispatch_active.store(true, Ordering::Release);

    let err = tetora::dispatch::dispatch(&server, vec![]).await.unwrap_err();
    assert!(err.to_string().contains("already running"));
}
