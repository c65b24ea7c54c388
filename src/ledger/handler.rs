//! HTTP handlers for checkouts, check-ins and transaction reports.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::Ledger;
use crate::api::{self, PageParams, PaginationParams, conflict, created, internal_error, not_found, success};
use crate::config::MAX_LOAN_DAYS;
use crate::directory::Directory;
use crate::handler::{AppState, authenticate, authorize};
use crate::model::Capability;
use crate::reports::{HistoryFilter, Reports};
use crate::workflow::{self, BarcodeCheckIn, CheckOutRequest};

#[derive(Debug, Deserialize)]
pub struct CheckOutPayload {
    pub item_id: i64,
    pub borrower_id: String,
    pub quantity: i64,
    /// Defaults to the configured loan period from now.
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: String,
}

pub async fn check_out(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CheckOutPayload>,
) -> Response {
    let processor = match authorize(&state, &headers, Capability::ProcessTransactions).await {
        Ok(user) => user,
        Err(denied) => return denied,
    };

    let now = Utc::now();
    let request = CheckOutRequest {
        item_id: payload.item_id,
        borrower_id: payload.borrower_id,
        quantity: payload.quantity,
        due_date: payload
            .due_date
            .unwrap_or_else(|| now + Duration::days(state.inventory.default_loan_days.clamp(1, MAX_LOAN_DAYS))),
        notes: payload.notes,
    };

    let db = state.db.clone();
    let result =
        workflow::run_to_completion(async move { workflow::check_out(&db, &request, &processor.id, now).await }).await;
    match result {
        Ok(transaction) => created(transaction),
        Err(e) => api::workflow_error("Failed to check out item", e),
    }
}

pub async fn check_in(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    let processor = match authorize(&state, &headers, Capability::ProcessTransactions).await {
        Ok(user) => user,
        Err(denied) => return denied,
    };

    let db = state.db.clone();
    let result =
        workflow::run_to_completion(async move { workflow::check_in(&db, id, &processor.id, Utc::now()).await }).await;
    let snapshot = state.db.snapshot().await;
    match result {
        Ok(true) => match Ledger::new(snapshot.connection()).get_transaction(id).await {
            Ok(Some(transaction)) => success(transaction),
            Ok(None) => not_found("Transaction not found"),
            Err(e) => {
                tracing::error!("Failed to load transaction after check-in: {}", e);
                internal_error("Failed to load transaction")
            }
        },
        Ok(false) => match Ledger::new(snapshot.connection()).get_transaction(id).await {
            Ok(Some(_)) => conflict("Transaction is already checked in"),
            Ok(None) => not_found("Transaction not found"),
            Err(e) => {
                tracing::error!("Failed to load transaction: {}", e);
                internal_error("Failed to load transaction")
            }
        },
        Err(e) => api::workflow_error("Failed to check in item", e),
    }
}

pub async fn check_in_by_barcode(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(barcode): Path<String>,
) -> Response {
    let processor = match authorize(&state, &headers, Capability::ProcessTransactions).await {
        Ok(user) => user,
        Err(denied) => return denied,
    };

    let db = state.db.clone();
    let result = workflow::run_to_completion(async move {
        workflow::check_in_by_barcode(&db, &barcode, &processor.id, Utc::now()).await
    })
    .await;
    match result {
        Ok(BarcodeCheckIn::CheckedIn { transaction }) => success(transaction),
        Ok(BarcodeCheckIn::Ambiguous { candidates }) => api::ambiguous(candidates),
        Ok(BarcodeCheckIn::NoActiveCheckout) => not_found("No active checkout for this barcode"),
        Err(e) => api::workflow_error("Failed to check in item", e),
    }
}

pub async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<HistoryFilter>,
    Query(page): Query<PageParams>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers, Capability::ViewReports).await {
        return denied;
    }

    let page_size = page.page_size.unwrap_or(state.inventory.page_size).min(100);
    let snapshot = state.db.snapshot().await;
    let reports = Reports::new(snapshot.connection());

    match reports.history(&filter, page.page.unwrap_or(1), page_size, Utc::now()).await {
        Ok(history) => success(history),
        Err(e) => {
            tracing::error!("Failed to list transactions: {}", e);
            internal_error("Failed to list transactions")
        }
    }
}

pub async fn overdue(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers, Capability::ViewReports).await {
        return denied;
    }

    let snapshot = state.db.snapshot().await;
    match Reports::new(snapshot.connection()).overdue(Utc::now()).await {
        Ok(transactions) => success(transactions),
        Err(e) => {
            tracing::error!("Failed to list overdue transactions: {}", e);
            internal_error("Failed to list overdue transactions")
        }
    }
}

pub async fn list_borrowers(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers, Capability::ProcessTransactions).await {
        return denied;
    }

    let snapshot = state.db.snapshot().await;
    match Directory::new(snapshot.connection()).list_borrowers().await {
        Ok(users) => success(users),
        Err(e) => {
            tracing::error!("Failed to list borrowers: {}", e);
            internal_error("Failed to list borrowers")
        }
    }
}

/// Borrowers may see their own loans; reporting roles may see anyone's.
pub async fn borrower_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(borrower_id): Path<String>,
) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(denied) => return denied,
    };
    if user.id != borrower_id {
        if let Err(denied) = authorize(&state, &headers, Capability::ViewReports).await {
            return denied;
        }
    }

    let snapshot = state.db.snapshot().await;
    match Reports::new(snapshot.connection())
        .borrower_view(&borrower_id, Utc::now())
        .await
    {
        Ok(Some(view)) => success(view),
        Ok(None) => not_found("Borrower not found"),
        Err(e) => {
            tracing::error!("Failed to load borrower transactions: {}", e);
            internal_error("Failed to load borrower transactions")
        }
    }
}

pub async fn activity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PaginationParams>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers, Capability::ViewReports).await {
        return denied;
    }

    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).max(0);

    let snapshot = state.db.snapshot().await;
    match Ledger::new(snapshot.connection()).list_activity(limit, offset).await {
        Ok(entries) => success(entries),
        Err(e) => {
            tracing::error!("Failed to list activity: {}", e);
            internal_error("Failed to list activity")
        }
    }
}
