use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery, AuthUser};
use crate::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use medlink_core::{
    ImagingFilter, ImagingService, ImagingStudy, ImagingUpdate, NewImagingStudy, Page,
};

#[utoipa::path(
    get,
    path = "/imaging",
    tag = "imaging",
    security(("bearer" = [])),
    params(ImagingFilter, Page),
    responses(
        (status = 200, description = "Matching studies, most recent first", body = [ImagingStudy])
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_imaging(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(mut filter): ApiQuery<ImagingFilter>,
    ApiQuery(page): ApiQuery<Page>,
) -> ApiResult<Json<Vec<ImagingStudy>>> {
    filter.patient = user.scope_patient(filter.patient)?;
    Ok(Json(ImagingService::new(state.db.clone()).search(&filter, &page)?))
}

#[utoipa::path(
    post,
    path = "/imaging",
    tag = "imaging",
    security(("bearer" = [])),
    request_body = NewImagingStudy,
    responses(
        (status = 201, description = "Study recorded", body = ImagingStudy),
        (status = 400, description = "Invalid study", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn create_imaging(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(req): ApiJson<NewImagingStudy>,
) -> ApiResult<(StatusCode, Json<ImagingStudy>)> {
    user.require_staff()?;
    let study = ImagingService::new(state.db.clone()).add(&user.actor(), req)?;
    Ok((StatusCode::CREATED, Json(study)))
}

#[utoipa::path(
    get,
    path = "/imaging/{id}",
    tag = "imaging",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Imaging study id")),
    responses(
        (status = 200, description = "Imaging study", body = ImagingStudy),
        (status = 403, description = "Another patient's study", body = ErrorRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_imaging(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<ImagingStudy>> {
    let study = ImagingService::new(state.db.clone()).get(id)?;
    user.ensure_patient_access(&study.patient_national_id)?;
    Ok(Json(study))
}

#[utoipa::path(
    put,
    path = "/imaging/{id}",
    tag = "imaging",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Imaging study id")),
    request_body = ImagingUpdate,
    responses(
        (status = 200, description = "Study updated", body = ImagingStudy),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn update_imaging(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<ImagingUpdate>,
) -> ApiResult<Json<ImagingStudy>> {
    user.require_staff()?;
    let study = ImagingService::new(state.db.clone()).update(&user.actor(), id, req)?;
    Ok(Json(study))
}

#[utoipa::path(
    delete,
    path = "/imaging/{id}",
    tag = "imaging",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Imaging study id")),
    responses(
        (status = 204, description = "Study deleted"),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn delete_imaging(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    ImagingService::new(state.db.clone()).delete(&user.actor(), id)?;
    Ok(StatusCode::NO_CONTENT)
}
