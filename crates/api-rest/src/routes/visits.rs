use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery, AuthUser};
use crate::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use medlink_core::{NewVisit, Page, UserService, Visit, VisitFilter, VisitService, VisitUpdate};
use medlink_types::Role;

#[utoipa::path(
    get,
    path = "/visits",
    tag = "visits",
    security(("bearer" = [])),
    params(VisitFilter, Page),
    responses(
        (status = 200, description = "Matching visits, newest first", body = [Visit])
    )
)]
/// List visits. Patient tokens only ever see their own.
#[axum::debug_handler]
pub(crate) async fn list_visits(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(mut filter): ApiQuery<VisitFilter>,
    ApiQuery(page): ApiQuery<Page>,
) -> ApiResult<Json<Vec<Visit>>> {
    filter.patient = user.scope_patient(filter.patient)?;
    Ok(Json(VisitService::new(state.db.clone()).search(&filter, &page)?))
}

#[utoipa::path(
    post,
    path = "/visits",
    tag = "visits",
    security(("bearer" = [])),
    request_body = NewVisit,
    responses(
        (status = 201, description = "Visit recorded", body = Visit),
        (status = 400, description = "Invalid visit", body = ErrorRes),
        (status = 404, description = "Unknown patient or doctor", body = ErrorRes)
    )
)]
/// Record a visit. A doctor who names no attending doctor is recorded as the attending doctor.
#[axum::debug_handler]
pub(crate) async fn create_visit(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(mut req): ApiJson<NewVisit>,
) -> ApiResult<(StatusCode, Json<Visit>)> {
    user.require_staff()?;
    if req.doctor_id.is_none() && user.role() == Role::Doctor {
        let doctor = UserService::new(state.db.clone()).get_by_username(user.subject())?;
        req.doctor_id = Some(doctor.id);
    }
    let visit = VisitService::new(state.db.clone()).add(&user.actor(), req)?;
    Ok((StatusCode::CREATED, Json(visit)))
}

#[utoipa::path(
    get,
    path = "/visits/{id}",
    tag = "visits",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Visit id")),
    responses(
        (status = 200, description = "Visit", body = Visit),
        (status = 403, description = "Another patient's visit", body = ErrorRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_visit(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Visit>> {
    let visit = VisitService::new(state.db.clone()).get(id)?;
    user.ensure_patient_access(&visit.patient_national_id)?;
    Ok(Json(visit))
}

#[utoipa::path(
    put,
    path = "/visits/{id}",
    tag = "visits",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Visit id")),
    request_body = VisitUpdate,
    responses(
        (status = 200, description = "Visit updated", body = Visit),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn update_visit(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<VisitUpdate>,
) -> ApiResult<Json<Visit>> {
    user.require_staff()?;
    Ok(Json(VisitService::new(state.db.clone()).update(&user.actor(), id, req)?))
}

#[utoipa::path(
    delete,
    path = "/visits/{id}",
    tag = "visits",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Visit id")),
    responses(
        (status = 204, description = "Visit deleted"),
        (status = 403, description = "Caller is not an admin", body = ErrorRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn delete_visit(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    VisitService::new(state.db.clone()).delete(&user.actor(), id)?;
    Ok(StatusCode::NO_CONTENT)
}
