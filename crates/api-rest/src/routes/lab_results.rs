use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery, AuthUser};
use crate::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use medlink_core::{LabFilter, LabResult, LabResultService, LabResultUpdate, NewLabResult, Page};

#[utoipa::path(
    get,
    path = "/lab-results",
    tag = "lab-results",
    security(("bearer" = [])),
    params(LabFilter, Page),
    responses(
        (status = 200, description = "Matching results, most recent first", body = [LabResult])
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_lab_results(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(mut filter): ApiQuery<LabFilter>,
    ApiQuery(page): ApiQuery<Page>,
) -> ApiResult<Json<Vec<LabResult>>> {
    filter.patient = user.scope_patient(filter.patient)?;
    let results = LabResultService::new(state.db.clone()).search(&filter, &page)?;
    Ok(Json(results))
}

#[utoipa::path(
    post,
    path = "/lab-results",
    tag = "lab-results",
    security(("bearer" = [])),
    request_body = NewLabResult,
    responses(
        (status = 201, description = "Result recorded", body = LabResult),
        (status = 400, description = "Invalid result or visit of another patient", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn create_lab_result(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(req): ApiJson<NewLabResult>,
) -> ApiResult<(StatusCode, Json<LabResult>)> {
    user.require_staff()?;
    let result = LabResultService::new(state.db.clone()).add(&user.actor(), req)?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[utoipa::path(
    get,
    path = "/lab-results/{id}",
    tag = "lab-results",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Lab result id")),
    responses(
        (status = 200, description = "Lab result", body = LabResult),
        (status = 403, description = "Another patient's result", body = ErrorRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_lab_result(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<LabResult>> {
    let result = LabResultService::new(state.db.clone()).get(id)?;
    user.ensure_patient_access(&result.patient_national_id)?;
    Ok(Json(result))
}

#[utoipa::path(
    put,
    path = "/lab-results/{id}",
    tag = "lab-results",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Lab result id")),
    request_body = LabResultUpdate,
    responses(
        (status = 200, description = "Lab result updated", body = LabResult),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn update_lab_result(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<LabResultUpdate>,
) -> ApiResult<Json<LabResult>> {
    user.require_staff()?;
    let result = LabResultService::new(state.db.clone()).update(&user.actor(), id, req)?;
    Ok(Json(result))
}

#[utoipa::path(
    delete,
    path = "/lab-results/{id}",
    tag = "lab-results",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Lab result id")),
    responses(
        (status = 204, description = "Lab result deleted"),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn delete_lab_result(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    LabResultService::new(state.db.clone()).delete(&user.actor(), id)?;
    Ok(StatusCode::NO_CONTENT)
}
