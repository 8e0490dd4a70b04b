//! HTTP handlers, one module per resource.

pub(crate) mod audit;
pub(crate) mod auth;
pub(crate) mod cards;
pub(crate) mod imaging;
pub(crate) mod lab_results;
pub(crate) mod patients;
pub(crate) mod users;
pub(crate) mod visits;

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use api_shared::{HealthRes, HealthService};
use axum::extract::State;
use axum::Json;
use medlink_core::MedLinkResult;

/// Runs core work that hashes passwords on the blocking pool, away from the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> MedLinkResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => Ok(result?),
        Err(e) => {
            tracing::error!("blocking task failed: {:?}", e);
            Err(ApiError::internal())
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint used by monitoring and load balancers.
#[axum::debug_handler]
pub(crate) async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health())
}
