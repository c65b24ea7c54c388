use axum::{
    Router,
    routing::{delete, get, post, put},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/items", get(handler::list_items))
        .route("/items", post(handler::create_item))
        .route("/items/low-stock", get(handler::low_stock))
        .route("/items/barcode/:barcode", get(handler::get_item_by_barcode))
        .route("/items/:id", get(handler::get_item))
        .route("/items/:id", put(handler::update_item))
        .route("/items/:id", delete(handler::delete_item))
        .route("/barcodes", post(handler::reserve_barcode))
}
