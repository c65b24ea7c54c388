use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use stockroom::config::{DirectoryUser, Inventory};
use stockroom::db::Database;
use stockroom::directory::Directory;
use stockroom::handler::{AppState, USER_HEADER};
use stockroom::model::Role;

async fn app() -> Router {
    let db = Database::open_in_memory().await.unwrap();
    let directory = Directory::new(db.connection());
    for (id, name, role) in [
        ("admin", "Ada Admin", Role::Admin),
        ("staff", "Sam Staff", Role::Staff),
        ("ann", "Ann Student", Role::Student),
        ("bob", "Bob Borrower", Role::Borrower),
    ] {
        directory
            .provision(&DirectoryUser {
                id: id.to_string(),
                full_name: name.to_string(),
                email: None,
                role,
                department: None,
            })
            .await
            .unwrap();
    }

    stockroom::router(AppState {
        db: Arc::new(db),
        inventory: Arc::new(Inventory::default()),
    })
}

async fn send(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn add_keyboards(app: &Router, total_stock: i64) -> Value {
    let (status, body) = send(
        app,
        "POST",
        "/api/items",
        Some("staff"),
        Some(json!({
            "name": "USB keyboard",
            "category": "Keyboard",
            "total_stock": total_stock,
            "location": "Shelf A",
            "purchase_price": "19.90"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"].clone()
}

fn due_in_days(days: i64) -> String {
    (chrono::Utc::now() + chrono::Duration::days(days)).to_rfc3339()
}

#[tokio::test]
async fn healthcheck_is_open() {
    let app = app().await;
    let (status, body) = send(&app, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "ok");
}

#[tokio::test]
async fn unknown_or_missing_users_are_unauthorized() {
    let app = app().await;
    let (status, _) = send(&app, "GET", "/api/items", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/api/items", Some("mallory"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn roles_gate_operations() {
    let app = app().await;
    let item = add_keyboards(&app, 2).await;
    let id = item["id"].as_i64().unwrap();

    let (status, _) = send(&app, "GET", "/api/dashboard", Some("ann"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "DELETE", &format!("/api/items/{id}"), Some("staff"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "POST",
        "/api/checkouts",
        Some("ann"),
        Some(json!({ "item_id": id, "borrower_id": "ann", "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "DELETE", &format!("/api/items/{id}"), Some("admin"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn checkout_and_checkin_round_trip() {
    let app = app().await;
    let item = add_keyboards(&app, 10).await;
    let id = item["id"].as_i64().unwrap();
    assert_eq!(item["barcode"], "CDM-KB-001");

    let (status, body) = send(
        &app,
        "POST",
        "/api/checkouts",
        Some("staff"),
        Some(json!({
            "item_id": id,
            "borrower_id": "ann",
            "quantity": 4,
            "due_date": due_in_days(7),
            "notes": "robotics club"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["status"], "checked_out");
    let tx = body["data"]["id"].as_i64().unwrap();

    let (_, body) = send(&app, "GET", &format!("/api/items/{id}"), Some("ann"), None).await;
    assert_eq!(body["data"]["current_stock"], 6);

    let (status, body) = send(&app, "POST", &format!("/api/checkins/{tx}"), Some("staff"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "returned");

    let (status, _) = send(&app, "POST", &format!("/api/checkins/{tx}"), Some("staff"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "POST", "/api/checkins/9999", Some("staff"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, "GET", "/api/items/barcode/cdm-kb-001", Some("ann"), None).await;
    assert_eq!(body["data"]["current_stock"], 10);
}

#[tokio::test]
async fn checkout_failures_map_to_status_codes() {
    let app = app().await;
    let item = add_keyboards(&app, 1).await;
    let id = item["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/api/checkouts",
        Some("staff"),
        Some(json!({ "item_id": id, "borrower_id": "ann", "quantity": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("insufficient stock"));

    let (status, body) = send(
        &app,
        "POST",
        "/api/checkouts",
        Some("staff"),
        Some(json!({ "item_id": id, "borrower_id": "ann", "quantity": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "quantity");

    let (status, _) = send(
        &app,
        "POST",
        "/api/checkouts",
        Some("staff"),
        Some(json!({ "item_id": 404, "borrower_id": "ann", "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn barcode_checkin_asks_for_a_choice_when_ambiguous() {
    let app = app().await;
    let item = add_keyboards(&app, 5).await;
    let id = item["id"].as_i64().unwrap();

    let (status, _) = send(&app, "POST", "/api/checkins/barcode/CDM-KB-001", Some("staff"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    for borrower in ["ann", "bob"] {
        let (status, _) = send(
            &app,
            "POST",
            "/api/checkouts",
            Some("staff"),
            Some(json!({ "item_id": id, "borrower_id": borrower, "quantity": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&app, "POST", "/api/checkins/barcode/cdm-kb-001", Some("staff"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["candidates"].as_array().unwrap().len(), 2);

    let (_, body) = send(&app, "GET", &format!("/api/items/{id}"), Some("staff"), None).await;
    assert_eq!(body["data"]["current_stock"], 3);
}

#[tokio::test]
async fn reports_are_served() {
    let app = app().await;
    let item = add_keyboards(&app, 3).await;
    let id = item["id"].as_i64().unwrap();

    send(
        &app,
        "POST",
        "/api/checkouts",
        Some("staff"),
        Some(json!({ "item_id": id, "borrower_id": "ann", "quantity": 2 })),
    )
    .await;

    let (status, body) = send(&app, "GET", "/api/dashboard", Some("staff"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["checked_out"], 2);
    assert_eq!(body["data"]["low_stock_items"], 1);

    let (status, body) = send(&app, "GET", "/api/items/low-stock", Some("staff"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        "GET",
        "/api/transactions?status=active&page=1&page_size=10",
        Some("staff"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["total_pages"], 1);
    assert_eq!(body["data"]["transactions"][0]["borrower_name"], "Ann Student");

    let (status, body) = send(&app, "GET", "/api/transactions/overdue", Some("staff"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, body) = send(&app, "GET", "/api/borrowers/ann/transactions", Some("ann"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["open"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "GET", "/api/borrowers/ann/transactions", Some("bob"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "GET", "/api/activity", Some("admin"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["action"], "check_out");
}

#[tokio::test]
async fn barcodes_are_reserved_per_category() {
    let app = app().await;
    add_keyboards(&app, 1).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/barcodes",
        Some("staff"),
        Some(json!({ "category": "Keyboard" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["barcode"], "CDM-KB-002");

    let (status, body) = send(&app, "POST", "/api/barcodes", Some("staff"), Some(json!({ "category": " " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "category: is required");
}
