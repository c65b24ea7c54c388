//! HTTP handlers for the item catalog.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
};
use serde::{Deserialize, Serialize};

use super::{Catalog, CreateItem, ItemQuery, UpdateItem};
use crate::api::{self, bad_request, created, internal_error, not_found, success};
use crate::handler::{AppState, authenticate, authorize};
use crate::model::Capability;
use crate::workflow::run_to_completion;

#[derive(Debug, Deserialize)]
pub struct BarcodeRequest {
    pub category: String,
}

#[derive(Debug, Serialize)]
pub struct BarcodeReservation {
    pub category: String,
    pub barcode: String,
}

pub async fn list_items(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ItemQuery>,
) -> Response {
    if let Err(denied) = authenticate(&state, &headers).await {
        return denied;
    }

    let snapshot = state.db.snapshot().await;
    match Catalog::new(snapshot.connection()).list_items(&query).await {
        Ok(items) => success(items),
        Err(e) => {
            tracing::error!("Failed to list items: {}", e);
            internal_error("Failed to list items")
        }
    }
}

pub async fn get_item(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(denied) = authenticate(&state, &headers).await {
        return denied;
    }

    let snapshot = state.db.snapshot().await;
    match Catalog::new(snapshot.connection()).get_item(id).await {
        Ok(Some(item)) => success(item),
        Ok(None) => not_found("Item not found"),
        Err(e) => {
            tracing::error!("Failed to get item: {}", e);
            internal_error("Failed to get item")
        }
    }
}

pub async fn get_item_by_barcode(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(barcode): Path<String>,
) -> Response {
    if let Err(denied) = authenticate(&state, &headers).await {
        return denied;
    }

    let snapshot = state.db.snapshot().await;
    match Catalog::new(snapshot.connection()).get_item_by_barcode(&barcode).await {
        Ok(Some(item)) => success(item),
        Ok(None) => not_found("No item with this barcode"),
        Err(e) => {
            tracing::error!("Failed to get item by barcode: {}", e);
            internal_error("Failed to get item")
        }
    }
}

pub async fn low_stock(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers, Capability::ViewReports).await {
        return denied;
    }

    let snapshot = state.db.snapshot().await;
    match Catalog::new(snapshot.connection()).low_stock_items().await {
        Ok(items) => success(items),
        Err(e) => {
            tracing::error!("Failed to list low stock items: {}", e);
            internal_error("Failed to list low stock items")
        }
    }
}

pub async fn create_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateItem>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers, Capability::ManageItems).await {
        return denied;
    }

    let db = state.db.clone();
    let inventory = state.inventory.clone();
    let result = run_to_completion(async move { super::create_item(&db, &inventory.barcode_site, payload).await }).await;
    match result {
        Ok(item) => created(item),
        Err(e) => api::workflow_error("Failed to create item", e),
    }
}

pub async fn update_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateItem>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers, Capability::ManageItems).await {
        return denied;
    }

    let db = state.db.clone();
    match run_to_completion(async move { super::update_item(&db, id, payload).await }).await {
        Ok(item) => success(item),
        Err(e) => api::workflow_error("Failed to update item", e),
    }
}

pub async fn delete_item(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(denied) = authorize(&state, &headers, Capability::DeleteItems).await {
        return denied;
    }

    let db = state.db.clone();
    match run_to_completion(async move { super::delete_item(&db, id).await }).await {
        Ok(item) => success(item),
        Err(e) => api::workflow_error("Failed to delete item", e),
    }
}

pub async fn reserve_barcode(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BarcodeRequest>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers, Capability::ManageItems).await {
        return denied;
    }
    if payload.category.trim().is_empty() {
        return bad_request("category: is required");
    }

    let db = state.db.clone();
    let inventory = state.inventory.clone();
    let category = payload.category.clone();
    let result =
        run_to_completion(async move { super::reserve_barcode(&db, &inventory.barcode_site, &category).await }).await;
    match result {
        Ok(barcode) => created(BarcodeReservation {
            category: payload.category,
            barcode,
        }),
        Err(e) => api::workflow_error("Failed to generate barcode", e),
    }
}
