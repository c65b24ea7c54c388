use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::ledger::TransactionView;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<TransactionView>>,
}

impl ErrorResponse {
    pub fn new(msg: &str) -> Self {
        ErrorResponse {
            error: msg.to_string(),
            ..Default::default()
        }
    }
}

pub fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse { data })).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse { data })).into_response()
}

pub fn error(status: StatusCode, msg: &str) -> Response {
    (status, Json(ErrorResponse::new(msg))).into_response()
}

pub fn not_found(msg: &str) -> Response {
    error(StatusCode::NOT_FOUND, msg)
}

pub fn bad_request(msg: &str) -> Response {
    error(StatusCode::BAD_REQUEST, msg)
}

pub fn conflict(msg: &str) -> Response {
    error(StatusCode::CONFLICT, msg)
}

pub fn internal_error(msg: &str) -> Response {
    error(StatusCode::INTERNAL_SERVER_ERROR, msg)
}

/// 409 for a barcode check-in that matches several open checkouts.
pub fn ambiguous(candidates: Vec<TransactionView>) -> Response {
    let body = ErrorResponse {
        error: format!("{} active checkouts for this barcode, choose one", candidates.len()),
        field: None,
        candidates: Some(candidates),
    };
    (StatusCode::CONFLICT, Json(body)).into_response()
}

/// Maps a workflow failure to a response. Store failures are logged and
/// reported without their details.
pub fn workflow_error(context: &str, err: WorkflowError) -> Response {
    let message = err.to_string();
    if err.is_business_rule() {
        tracing::info!(error = %message, "{}", context);
    }
    match err {
        WorkflowError::Validation { field, .. } => {
            let body = ErrorResponse {
                error: message,
                field: Some(field.to_string()),
                candidates: None,
            };
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        }
        WorkflowError::ItemNotFound(_) => not_found(&message),
        WorkflowError::InsufficientStock { .. }
        | WorkflowError::OpenTransactions(_)
        | WorkflowError::ReferencedByHistory(_)
        | WorkflowError::DuplicateBarcode(_) => conflict(&message),
        WorkflowError::Store(e) => {
            tracing::error!("{}: {:#}", context, e);
            internal_error(context)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_the_field() {
        let response = workflow_error("x", WorkflowError::validation("quantity", "must be greater than 0"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn business_rules_map_to_conflict_or_not_found() {
        let stock = WorkflowError::InsufficientStock {
            item_id: 1,
            available: 0,
            requested: 1,
        };
        assert_eq!(workflow_error("x", stock).status(), StatusCode::CONFLICT);
        assert_eq!(
            workflow_error("x", WorkflowError::ItemNotFound(3)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            workflow_error("x", WorkflowError::Store(anyhow::anyhow!("disk full"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn empty_optional_fields_are_omitted() {
        let json = serde_json::to_value(ErrorResponse::new("nope")).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "nope" }));
    }
}
