use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery, AuthUser};
use crate::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use medlink_core::{
    NewPatient, Page, Patient, PatientFilter, PatientRecord, PatientService, PatientUpdate,
};
use medlink_types::NationalId;

#[utoipa::path(
    get,
    path = "/patients",
    tag = "patients",
    security(("bearer" = [])),
    params(PatientFilter, Page),
    responses(
        (status = 200, description = "Matching patients ordered by name", body = [Patient]),
        (status = 403, description = "Caller is not staff", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_patients(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(filter): ApiQuery<PatientFilter>,
    ApiQuery(page): ApiQuery<Page>,
) -> ApiResult<Json<Vec<Patient>>> {
    user.require_staff()?;
    let patients = PatientService::new(state.db.clone()).search(&filter, &page)?;
    Ok(Json(patients))
}

#[utoipa::path(
    post,
    path = "/patients",
    tag = "patients",
    security(("bearer" = [])),
    request_body = NewPatient,
    responses(
        (status = 201, description = "Patient registered", body = Patient),
        (status = 400, description = "Invalid patient details", body = ErrorRes),
        (status = 409, description = "National id already registered", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn create_patient(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(req): ApiJson<NewPatient>,
) -> ApiResult<(StatusCode, Json<Patient>)> {
    user.require_staff()?;
    let patient = PatientService::new(state.db.clone()).add(&user.actor(), req)?;
    Ok((StatusCode::CREATED, Json(patient)))
}

#[utoipa::path(
    get,
    path = "/patients/{national_id}",
    tag = "patients",
    security(("bearer" = [])),
    params(("national_id" = String, Path, description = "14-digit national id")),
    responses(
        (status = 200, description = "Patient", body = Patient),
        (status = 403, description = "Another patient's record", body = ErrorRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_patient(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(national_id): ApiPath<NationalId>,
) -> ApiResult<Json<Patient>> {
    user.ensure_patient_access(&national_id)?;
    Ok(Json(PatientService::new(state.db.clone()).get(&national_id)?))
}

#[utoipa::path(
    put,
    path = "/patients/{national_id}",
    tag = "patients",
    security(("bearer" = [])),
    params(("national_id" = String, Path, description = "14-digit national id")),
    request_body = PatientUpdate,
    responses(
        (status = 200, description = "Patient updated", body = Patient),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn update_patient(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(national_id): ApiPath<NationalId>,
    ApiJson(req): ApiJson<PatientUpdate>,
) -> ApiResult<Json<Patient>> {
    user.require_staff()?;
    let patient = PatientService::new(state.db.clone()).update(&user.actor(), &national_id, req)?;
    Ok(Json(patient))
}

#[utoipa::path(
    delete,
    path = "/patients/{national_id}",
    tag = "patients",
    security(("bearer" = [])),
    params(("national_id" = String, Path, description = "14-digit national id")),
    responses(
        (status = 204, description = "Patient and their history deleted"),
        (status = 403, description = "Caller is not an admin", body = ErrorRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
/// Delete a patient. Visits, results, imaging, cards and fingerprints go with them.
#[axum::debug_handler]
pub(crate) async fn delete_patient(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(national_id): ApiPath<NationalId>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    PatientService::new(state.db.clone()).delete(&user.actor(), &national_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/patients/{national_id}/record",
    tag = "patients",
    security(("bearer" = [])),
    params(("national_id" = String, Path, description = "14-digit national id")),
    responses(
        (status = 200, description = "Patient with visits, results, imaging and active cards",
            body = PatientRecord),
        (status = 403, description = "Another patient's record", body = ErrorRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn patient_record(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(national_id): ApiPath<NationalId>,
) -> ApiResult<Json<PatientRecord>> {
    user.ensure_patient_access(&national_id)?;
    Ok(Json(PatientService::new(state.db.clone()).summary(&national_id)?))
}
