use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::info;

use crate::api::{self, ApiResponse};
use crate::config::Inventory;
use crate::db::Database;
use crate::directory::Directory;
use crate::model::{Capability, User};
use crate::reports::Reports;

/// Header carrying the id of the acting user, set by the upstream identity
/// provider.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub inventory: Arc<Inventory>,
}

/// Resolves the acting user and checks their capability.
///
/// Missing or unknown users are rejected with 401, users whose role lacks
/// `capability` with 403.
pub async fn authorize(state: &AppState, headers: &HeaderMap, capability: Capability) -> Result<User, Response> {
    let user = authenticate(state, headers).await?;
    if !user.can(capability) {
        tracing::info!(user_id = %user.id, role = user.role.as_str(), ?capability, "permission denied");
        return Err(api::error(StatusCode::FORBIDDEN, "You do not have permission to perform this action"));
    }
    Ok(user)
}

pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, Response> {
    let Some(user_id) = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    else {
        return Err(api::error(StatusCode::UNAUTHORIZED, "Authentication required"));
    };

    match Directory::new(state.db.connection()).get_user(user_id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(api::error(StatusCode::UNAUTHORIZED, "Unknown user")),
        Err(e) => {
            tracing::error!("Failed to resolve user: {}", e);
            Err(api::internal_error("Failed to resolve user"))
        }
    }
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(ApiResponse { data: "ok" })
}

pub async fn dashboard(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers, Capability::ViewReports).await {
        return denied;
    }

    let snapshot = state.db.snapshot().await;
    match Reports::new(snapshot.connection()).dashboard(Utc::now()).await {
        Ok(summary) => api::success(summary),
        Err(e) => {
            tracing::error!("Failed to build dashboard: {}", e);
            api::internal_error("Failed to build dashboard")
        }
    }
}
