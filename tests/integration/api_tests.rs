//! API integration tests, run against a live server.
//!
//! Start the server with its default configuration, then run:
//! `cargo test --test api_tests -- --ignored`

use library_lending::models::{Role, SessionClaims};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";
const DEFAULT_SECRET: &str = "change-this-secret-in-production";

fn token_for(member_id: i32, role: Role) -> String {
    let secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| DEFAULT_SECRET.to_string());
    SessionClaims {
        member_id,
        email: format!("member{}@example.org", member_id),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
    }
    .create_token(&secret)
    .expect("Failed to sign token")
}

fn admin_token() -> String {
    token_for(0, Role::Admin)
}

/// Unique suffix so repeated runs do not collide on unique columns
fn unique() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

async fn create_member(client: &Client, token: &str) -> i32 {
    let response = client
        .post(format!("{}/members", BASE_URL))
        .bearer_auth(token)
        .json(&json!({
            "name": "Test Member",
            "email": format!("member-{}@example.org", unique())
        }))
        .send()
        .await
        .expect("Failed to create member");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.expect("Failed to parse member");
    body["id"].as_i64().expect("No member id") as i32
}

async fn create_book(client: &Client, token: &str, total_copies: i32) -> i32 {
    let response = client
        .post(format!("{}/books", BASE_URL))
        .bearer_auth(token)
        .json(&json!({
            "title": format!("Test Book {}", unique()),
            "author": "Test Author",
            "published_year": 1999,
            "total_copies": total_copies
        }))
        .send()
        .await
        .expect("Failed to create book");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.expect("Failed to parse book");
    assert_eq!(body["available_copies"], total_copies);
    body["id"].as_i64().expect("No book id") as i32
}

async fn availability(client: &Client, book_id: i32) -> i64 {
    let body: Value = client
        .get(format!("{}/books/{}/availability", BASE_URL, book_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse availability");
    body["available_copies"].as_i64().expect("No available_copies")
}

async fn borrow(client: &Client, token: &str, member_id: i32, book_id: i32) -> reqwest::Response {
    client
        .post(format!("{}/loans", BASE_URL))
        .bearer_auth(token)
        .json(&json!({ "member_id": member_id, "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send borrow request")
}

async fn return_loan(client: &Client, token: &str, loan_id: i64) -> reqwest::Response {
    client
        .post(format!("{}/loans/{}/return", BASE_URL, loan_id))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to send return request")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_borrow_requires_token() {
    let client = Client::new();

    let response = client
        .post(format!("{}/loans", BASE_URL))
        .json(&json!({ "member_id": 1, "book_id": 1 }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_member_cannot_create_book() {
    let client = Client::new();

    let response = client
        .post(format!("{}/books", BASE_URL))
        .bearer_auth(token_for(1, Role::Member))
        .json(&json!({
            "title": "Forbidden",
            "author": "Nobody",
            "published_year": 2000,
            "total_copies": 1
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
#[ignore]
async fn test_borrow_and_return_flow() {
    let client = Client::new();
    let token = admin_token();

    let member_id = create_member(&client, &token).await;
    let book_id = create_book(&client, &token, 2).await;

    let response = borrow(&client, &token, member_id, book_id).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let loan: Value = response.json().await.expect("Failed to parse loan");
    assert_eq!(loan["status"], "borrowed");
    assert!(loan["return_date"].is_null());
    assert_eq!(availability(&client, book_id).await, 1);

    let loan_id = loan["id"].as_i64().expect("No loan id");
    let response = return_loan(&client, &token, loan_id).await;
    assert!(response.status().is_success());
    let returned: Value = response.json().await.expect("Failed to parse loan");
    assert_eq!(returned["status"], "returned");
    assert!(returned["return_date"].is_string());
    assert_eq!(availability(&client, book_id).await, 2);
}

#[tokio::test]
#[ignore]
async fn test_borrow_exhausted_book() {
    let client = Client::new();
    let token = admin_token();

    let member_id = create_member(&client, &token).await;
    let book_id = create_book(&client, &token, 1).await;

    let first = borrow(&client, &token, member_id, book_id).await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = borrow(&client, &token, member_id, book_id).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body: Value = second.json().await.expect("Failed to parse error");
    assert_eq!(body["error"], "BookNotAvailable");
    assert_eq!(availability(&client, book_id).await, 0);
}

#[tokio::test]
#[ignore]
async fn test_double_return_is_rejected() {
    let client = Client::new();
    let token = admin_token();

    let member_id = create_member(&client, &token).await;
    let book_id = create_book(&client, &token, 1).await;

    let loan: Value = borrow(&client, &token, member_id, book_id)
        .await
        .json()
        .await
        .expect("Failed to parse loan");
    let loan_id = loan["id"].as_i64().expect("No loan id");

    assert!(return_loan(&client, &token, loan_id).await.status().is_success());

    let again = return_loan(&client, &token, loan_id).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    assert_eq!(availability(&client, book_id).await, 1);
}

#[tokio::test]
#[ignore]
async fn test_borrow_unknown_member_or_book() {
    let client = Client::new();
    let token = admin_token();

    let book_id = create_book(&client, &token, 1).await;
    let response = borrow(&client, &token, i32::MAX, book_id).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    // The failed borrow rolled back its decrement
    assert_eq!(availability(&client, book_id).await, 1);

    let member_id = create_member(&client, &token).await;
    let response = borrow(&client, &token, member_id, i32::MAX).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_borrows_of_last_copy() {
    let client = Client::new();
    let token = admin_token();

    let book_id = create_book(&client, &token, 1).await;
    let mut members = Vec::new();
    for _ in 0..5 {
        members.push(create_member(&client, &token).await);
    }

    let handles: Vec<_> = members
        .iter()
        .map(|&member_id| {
            let client = client.clone();
            let token = token.clone();
            tokio::spawn(async move { borrow(&client, &token, member_id, book_id).await.status() })
        })
        .collect();

    let mut statuses = Vec::with_capacity(handles.len());
    for handle in handles {
        statuses.push(handle.await.expect("Request task panicked"));
    }

    let created = statuses.iter().filter(|s| **s == StatusCode::CREATED).count();
    let conflicts = statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count();

    assert_eq!(created, 1);
    assert_eq!(conflicts, members.len() - 1);
    assert_eq!(availability(&client, book_id).await, 0);
}

#[tokio::test]
#[ignore]
async fn test_total_copies_below_on_loan_is_refused() {
    let client = Client::new();
    let token = admin_token();

    let member_id = create_member(&client, &token).await;
    let book_id = create_book(&client, &token, 2).await;
    for _ in 0..2 {
        assert_eq!(
            borrow(&client, &token, member_id, book_id).await.status(),
            StatusCode::CREATED
        );
    }

    let response = client
        .put(format!("{}/books/{}", BASE_URL, book_id))
        .bearer_auth(&token)
        .json(&json!({
            "title": "Resized",
            "author": "Test Author",
            "published_year": 1999,
            "total_copies": 1
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = client
        .put(format!("{}/books/{}", BASE_URL, book_id))
        .bearer_auth(&token)
        .json(&json!({
            "title": "Resized",
            "author": "Test Author",
            "published_year": 1999,
            "total_copies": 5
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse book");
    assert_eq!(body["total_copies"], 5);
    assert_eq!(body["available_copies"], 3);
}
