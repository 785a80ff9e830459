//! End-to-end scenarios over real HTTP: a catalog and a frontend bound to
//! their fixed ports, exercised with `reqwest` exactly as a real client
//! would, matching spec.md §8's concrete scenarios (happy-path buy via the
//! cache, insufficient stock, unknown product, cache invalidation on
//! purchase). Everything runs in one test function since the services bind
//! fixed ports (§6's port table) that can't be shared across concurrently
//! running test functions.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use toy_store::catalog::{self, CatalogService};
use toy_store::config::{CATALOG_HOST, CATALOG_PORT, FRONTEND_HOST, FRONTEND_PORT};
use toy_store::domain::{BuyRequest, RestockRequest};
use toy_store::frontend::{self, FrontendService};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_store_happy_path_and_edge_cases() {
    let catalog_service = CatalogService::new(FRONTEND_PORT);
    let catalog_app = catalog::router(Arc::clone(&catalog_service));
    let catalog_listener = tokio::net::TcpListener::bind(format!("{CATALOG_HOST}:{CATALOG_PORT}"))
        .await
        .expect("catalog port must be free for this test");
    tokio::spawn(async move {
        axum::serve(catalog_listener, catalog_app).await.unwrap();
    });

    let frontend_service = FrontendService::new(toy_store::config::FrontendConfig {
        use_raft: false,
        use_cache: true,
    });
    let frontend_app = frontend::router(frontend_service);
    let frontend_listener = tokio::net::TcpListener::bind(format!("{FRONTEND_HOST}:{FRONTEND_PORT}"))
        .await
        .expect("frontend port must be free for this test");
    tokio::spawn(async move {
        axum::serve(frontend_listener, frontend_app).await.unwrap();
    });

    // Give both listeners a beat to start accepting.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();

    // Unknown product through the frontend: 404 with the §7 error envelope.
    let response = client
        .get(format!("http://{FRONTEND_HOST}:{FRONTEND_PORT}/products/Nope/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], 404);

    // Known product through the frontend populates the cache.
    let response = client
        .get(format!("http://{FRONTEND_HOST}:{FRONTEND_PORT}/products/Tux/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["name"], "Tux");
    assert_eq!(body["data"]["quantity"], 100);

    // Buying directly against the catalog decrements stock and triggers a
    // cache-invalidation call back to the frontend.
    let response = client
        .post(format!("http://{CATALOG_HOST}:{CATALOG_PORT}/orders/"))
        .json(&BuyRequest {
            name: "Tux".to_string(),
            quantity: 5,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["quantity"], 95);

    tokio::time::sleep(Duration::from_millis(100)).await;

    // The frontend's cached copy must have been invalidated, so this read
    // goes back to the catalog and observes the decremented quantity.
    let response = client
        .get(format!("http://{FRONTEND_HOST}:{FRONTEND_PORT}/products/Tux/"))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["quantity"], 95);

    // Buying more than is in stock is a 400, not a panic or a 500.
    let response = client
        .post(format!("http://{CATALOG_HOST}:{CATALOG_PORT}/orders/"))
        .json(&BuyRequest {
            name: "Tux".to_string(),
            quantity: 10_000,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    // Restocking through the cache-restock interface resets the quantity.
    let response = client
        .post(format!("http://{CATALOG_HOST}:{CATALOG_PORT}/cache/restock/"))
        .json(&RestockRequest {
            product_name: "Tux".to_string(),
            quantity: 100,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["quantity"], 100);

    // DELETE /cache/{name}/ is idempotent and always reports success.
    let response = client
        .delete(format!("http://{FRONTEND_HOST}:{FRONTEND_PORT}/cache/Tux/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}
