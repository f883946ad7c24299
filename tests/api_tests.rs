use conduit_gate::{
    AppConfig, AppState, create_router,
    repository::{MemoryRepository, Repository, RepositoryState},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug)]
pub struct TestApp {
    pub address: String,
}

async fn spawn_app() -> TestApp {
    let repo = Arc::new(MemoryRepository::new());
    repo.ensure_schema().await.expect("schema");

    let state = AppState::new(AppConfig::default(), repo as RepositoryState);
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp { address }
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_token_from_register_unlocks_protected_operations() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/users", app.address))
        .json(&json!({ "user": {
            "username": "jake",
            "email": "jake@jake.jake",
            "password": "jakejake",
        }}))
        .send()
        .await
        .expect("register fail");
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    let token = body["user"]["token"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/api/articles", app.address))
        .json(&json!({ "article": { "title": "Hello", "body": "World" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Conduit clients send `Token <jwt>`.
    let response = client
        .post(format!("{}/api/articles", app.address))
        .header("Authorization", format!("Token {token}"))
        .json(&json!({ "article": { "title": "Hello", "body": "World" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["article"]["slug"], "hello");
    assert_eq!(body["article"]["tagList"], json!([]));

    let response = client
        .get(format!("{}/api/articles?author=jake", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["articlesCount"], 1);
}
