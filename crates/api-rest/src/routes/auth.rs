//! Login endpoints. Each one resolves a credential to a principal and answers with a signed token.

use crate::error::ApiResult;
use crate::extract::{ApiJson, AuthUser, Terminal};
use crate::routes::blocking;
use crate::AppState;
use api_shared::{
    CardLoginReq, Claims, ErrorRes, FingerprintLoginReq, LoginReq, TokenRes, TokenSubject,
};
use axum::extract::State;
use axum::Json;
use medlink_core::{AuthService, Identity, IdentityResolver, User};
use medlink_types::Role;

fn subject_for_user(user: &User) -> TokenSubject {
    TokenSubject {
        subject: user.username.clone(),
        role: user.role,
        name: user.full_name.clone(),
        patient: user
            .patient_national_id
            .as_ref()
            .map(|id| id.as_str().to_string()),
    }
}

fn subject_for_identity(identity: &Identity) -> TokenSubject {
    match identity {
        Identity::Staff(user) => subject_for_user(user),
        Identity::Patient(patient) => TokenSubject {
            subject: patient.national_id.as_str().to_string(),
            role: Role::Patient,
            name: patient.full_name.clone(),
            patient: Some(patient.national_id.as_str().to_string()),
        },
    }
}

fn token_response(state: &AppState, subject: TokenSubject) -> ApiResult<Json<TokenRes>> {
    let token = state.tokens.issue(&subject)?;
    Ok(Json(TokenRes {
        token,
        token_type: "Bearer".into(),
        expires_in: state.tokens.ttl_seconds(),
        role: subject.role,
        subject: subject.subject,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginReq,
    responses(
        (status = 200, description = "Token issued", body = TokenRes),
        (status = 401, description = "Invalid credentials", body = ErrorRes)
    )
)]
/// Log in with a username and password.
#[axum::debug_handler]
pub(crate) async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginReq>,
) -> ApiResult<Json<TokenRes>> {
    let auth = AuthService::new(state.db.clone());
    let user = blocking(move || auth.login(&req.username, &req.password)).await?;
    token_response(&state, subject_for_user(&user))
}

#[utoipa::path(
    post,
    path = "/auth/card",
    tag = "auth",
    security(("terminal_key" = [])),
    request_body = CardLoginReq,
    responses(
        (status = 200, description = "Token issued", body = TokenRes),
        (status = 400, description = "Malformed card UID", body = ErrorRes),
        (status = 401, description = "Unknown or inactive card, or missing terminal key",
            body = ErrorRes)
    )
)]
/// Log in by tapping an NFC card at a clinic terminal. Patients without an account are
/// identified by national id.
#[axum::debug_handler]
pub(crate) async fn card_login(
    State(state): State<AppState>,
    _terminal: Terminal,
    ApiJson(req): ApiJson<CardLoginReq>,
) -> ApiResult<Json<TokenRes>> {
    let identity = IdentityResolver::new(state.db.clone()).resolve_card(&req.card_uid)?;
    token_response(&state, subject_for_identity(&identity))
}

#[utoipa::path(
    post,
    path = "/auth/fingerprint",
    tag = "auth",
    security(("terminal_key" = [])),
    request_body = FingerprintLoginReq,
    responses(
        (status = 200, description = "Token issued", body = TokenRes),
        (status = 401, description = "Fingerprint not enrolled, or missing terminal key",
            body = ErrorRes)
    )
)]
/// Log in with a fingerprint already matched to a sensor slot by the terminal.
#[axum::debug_handler]
pub(crate) async fn fingerprint_login(
    State(state): State<AppState>,
    _terminal: Terminal,
    ApiJson(req): ApiJson<FingerprintLoginReq>,
) -> ApiResult<Json<TokenRes>> {
    let identity = IdentityResolver::new(state.db.clone()).resolve_fingerprint(req.slot)?;
    token_response(&state, subject_for_identity(&identity))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Claims of the presented token", body = Claims),
        (status = 401, description = "Missing or invalid token", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn me(State(_state): State<AppState>, user: AuthUser) -> Json<Claims> {
    Json(user.claims)
}
