use crate::error::ApiResult;
use crate::extract::{ApiQuery, AuthUser};
use crate::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::Json;
use medlink_core::{AuditEntry, AuditFilter, AuditService, Page};

#[utoipa::path(
    get,
    path = "/audit",
    tag = "audit",
    security(("bearer" = [])),
    params(AuditFilter, Page),
    responses(
        (status = 200, description = "Audit entries, newest first", body = [AuditEntry]),
        (status = 403, description = "Caller is not an admin", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_audit(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(filter): ApiQuery<AuditFilter>,
    ApiQuery(page): ApiQuery<Page>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    user.require_admin()?;
    Ok(Json(AuditService::new(state.db.clone()).search(&filter, &page)?))
}
