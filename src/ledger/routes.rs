use axum::{
    Router,
    routing::{get, post},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/checkouts", post(handler::check_out))
        .route("/checkins/:id", post(handler::check_in))
        .route("/checkins/barcode/:barcode", post(handler::check_in_by_barcode))
        .route("/transactions", get(handler::history))
        .route("/transactions/overdue", get(handler::overdue))
        .route("/borrowers", get(handler::list_borrowers))
        .route("/borrowers/:id/transactions", get(handler::borrower_transactions))
        .route("/activity", get(handler::activity))
}
