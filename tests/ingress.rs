//! End-to-end tests against the axum router (C11), exercised in-process
//! with `tower::ServiceExt::oneshot` rather than a bound socket.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use gateway::ingress;
use gateway::settings::Settings;
use gateway::state::GatewayState;
use tower::ServiceExt;

async fn test_state() -> GatewayState {
    let settings = Settings {
        coordination_url: String::new(),
        ..Settings::from_env()
    };
    GatewayState::bootstrap(&settings)
        .await
        .expect("in-memory store bootstrap never fails")
}

#[tokio::test]
async fn healthz_reports_ok_against_the_in_memory_store() {
    let router = ingress::router(test_state().await);

    let response = router
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn proxy_request_without_an_api_key_is_rejected() {
    let router = ingress::router(test_state().await);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/g/demo/items/1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn proxy_request_with_an_unknown_key_is_rejected() {
    let router = ingress::router(test_state().await);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/g/demo/items/1")
                .header("x-api-key", "not-a-real-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
