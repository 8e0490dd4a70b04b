//! Card and fingerprint registration.

use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, AuthUser};
use crate::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use medlink_core::{CardRecord, CardService, FingerprintEnrolment, Holder, IdentityResolver};
use medlink_types::{CardUid, NationalId};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct IssueDoctorCardReq {
    #[schema(value_type = String, example = "04112233445566")]
    pub card_uid: CardUid,
    pub user_id: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct IssuePatientCardReq {
    #[schema(value_type = String, example = "04A21B7F")]
    pub card_uid: CardUid,
    #[schema(value_type = String, example = "29001011234567")]
    pub national_id: NationalId,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct EnrollFingerprintReq {
    pub slot: u16,
    pub holder: Holder,
}

#[utoipa::path(
    post,
    path = "/cards/doctor",
    tag = "cards",
    security(("bearer" = [])),
    request_body = IssueDoctorCardReq,
    responses(
        (status = 201, description = "Staff card issued", body = CardRecord),
        (status = 400, description = "User is not active staff", body = ErrorRes),
        (status = 409, description = "UID already registered", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn issue_doctor_card(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(req): ApiJson<IssueDoctorCardReq>,
) -> ApiResult<(StatusCode, Json<CardRecord>)> {
    user.require_admin()?;
    let card = CardService::new(state.db.clone()).issue_doctor_card(
        &user.actor(),
        &req.card_uid,
        req.user_id,
    )?;
    Ok((StatusCode::CREATED, Json(card)))
}

#[utoipa::path(
    post,
    path = "/cards/patient",
    tag = "cards",
    security(("bearer" = [])),
    request_body = IssuePatientCardReq,
    responses(
        (status = 201, description = "Patient card issued", body = CardRecord),
        (status = 404, description = "Unknown patient", body = ErrorRes),
        (status = 409, description = "UID already registered", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn issue_patient_card(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(req): ApiJson<IssuePatientCardReq>,
) -> ApiResult<(StatusCode, Json<CardRecord>)> {
    user.require_staff()?;
    let card = CardService::new(state.db.clone()).issue_patient_card(
        &user.actor(),
        &req.card_uid,
        &req.national_id,
    )?;
    Ok((StatusCode::CREATED, Json(card)))
}

#[utoipa::path(
    get,
    path = "/cards/{uid}",
    tag = "cards",
    security(("bearer" = [])),
    params(("uid" = String, Path, description = "Card UID in hex")),
    responses(
        (status = 200, description = "Card registration", body = CardRecord),
        (status = 404, description = "Not registered", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_card(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(uid): ApiPath<CardUid>,
) -> ApiResult<Json<CardRecord>> {
    user.require_staff()?;
    Ok(Json(CardService::new(state.db.clone()).get(&uid)?))
}

#[utoipa::path(
    delete,
    path = "/cards/{uid}",
    tag = "cards",
    security(("bearer" = [])),
    params(("uid" = String, Path, description = "Card UID in hex")),
    responses(
        (status = 204, description = "Registration removed"),
        (status = 404, description = "Not registered", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn delete_card(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(uid): ApiPath<CardUid>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    CardService::new(state.db.clone()).delete(&user.actor(), &uid)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/cards/{uid}/revoke",
    tag = "cards",
    security(("bearer" = [])),
    params(("uid" = String, Path, description = "Card UID in hex")),
    responses(
        (status = 200, description = "Card revoked", body = CardRecord),
        (status = 404, description = "Not registered", body = ErrorRes)
    )
)]
/// Revoke a lost or stolen card. Any staff member may do this.
#[axum::debug_handler]
pub(crate) async fn revoke_card(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(uid): ApiPath<CardUid>,
) -> ApiResult<Json<CardRecord>> {
    user.require_staff()?;
    Ok(Json(CardService::new(state.db.clone()).revoke(&user.actor(), &uid)?))
}

#[utoipa::path(
    post,
    path = "/cards/{uid}/reactivate",
    tag = "cards",
    security(("bearer" = [])),
    params(("uid" = String, Path, description = "Card UID in hex")),
    responses(
        (status = 200, description = "Card reactivated", body = CardRecord),
        (status = 404, description = "Not registered", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn reactivate_card(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(uid): ApiPath<CardUid>,
) -> ApiResult<Json<CardRecord>> {
    user.require_admin()?;
    let card = CardService::new(state.db.clone()).reactivate(&user.actor(), &uid)?;
    Ok(Json(card))
}

#[utoipa::path(
    post,
    path = "/fingerprints",
    tag = "fingerprints",
    security(("bearer" = [])),
    request_body = EnrollFingerprintReq,
    responses(
        (status = 201, description = "Slot enrolled", body = FingerprintEnrolment),
        (status = 400, description = "Slot out of range", body = ErrorRes),
        (status = 409, description = "Slot already enrolled", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn enroll_fingerprint(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(req): ApiJson<EnrollFingerprintReq>,
) -> ApiResult<(StatusCode, Json<FingerprintEnrolment>)> {
    user.require_admin()?;
    let enrolment = IdentityResolver::new(state.db.clone()).enroll_fingerprint(
        &user.actor(),
        req.slot,
        req.holder,
    )?;
    Ok((StatusCode::CREATED, Json(enrolment)))
}

#[utoipa::path(
    get,
    path = "/fingerprints/{slot}",
    tag = "fingerprints",
    security(("bearer" = [])),
    params(("slot" = u16, Path, description = "Sensor template slot")),
    responses(
        (status = 200, description = "Enrolment", body = FingerprintEnrolment),
        (status = 404, description = "Slot is free", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_fingerprint(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(slot): ApiPath<u16>,
) -> ApiResult<Json<FingerprintEnrolment>> {
    user.require_admin()?;
    Ok(Json(IdentityResolver::new(state.db.clone()).get_fingerprint(slot)?))
}

#[utoipa::path(
    delete,
    path = "/fingerprints/{slot}",
    tag = "fingerprints",
    security(("bearer" = [])),
    params(("slot" = u16, Path, description = "Sensor template slot")),
    responses(
        (status = 204, description = "Slot freed"),
        (status = 404, description = "Slot is free", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn remove_fingerprint(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(slot): ApiPath<u16>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    IdentityResolver::new(state.db.clone()).remove_fingerprint(&user.actor(), slot)?;
    Ok(StatusCode::NO_CONTENT)
}
