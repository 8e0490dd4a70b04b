//! Account management. Admins manage every account; doctors may look up fellow doctors, for
//! example to pick an attending doctor for a visit.

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath, ApiQuery, AuthUser};
use crate::routes::blocking;
use crate::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use medlink_core::{NewUser, Page, User, UserFilter, UserService, UserUpdate};
use medlink_types::Role;

#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    security(("bearer" = [])),
    params(UserFilter, Page),
    responses(
        (status = 200, description = "Matching accounts", body = [User]),
        (status = 403, description = "Caller is a patient", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(mut filter): ApiQuery<UserFilter>,
    ApiQuery(page): ApiQuery<Page>,
) -> ApiResult<Json<Vec<User>>> {
    match user.role() {
        Role::Admin => {}
        Role::Doctor => filter.role = Some(Role::Doctor),
        Role::Patient => return Err(ApiError::forbidden()),
    }
    Ok(Json(UserService::new(state.db.clone()).search(&filter, &page)?))
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    security(("bearer" = [])),
    request_body = NewUser,
    responses(
        (status = 201, description = "Account created", body = User),
        (status = 400, description = "Invalid account details", body = ErrorRes),
        (status = 409, description = "Username taken or patient already has an account",
            body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn create_user(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(req): ApiJson<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    user.require_admin()?;
    let users = UserService::new(state.db.clone());
    let actor = user.actor();
    let created = blocking(move || users.add(&actor, req)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Account", body = User),
        (status = 403, description = "Not visible to the caller", body = ErrorRes),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
/// Fetch an account. Anyone may fetch their own.
#[axum::debug_handler]
pub(crate) async fn get_user(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<User>> {
    let found = UserService::new(state.db.clone()).get(id)?;
    let visible = match user.role() {
        Role::Admin => true,
        Role::Doctor => found.role == Role::Doctor || found.username == user.subject(),
        Role::Patient => found.username == user.subject(),
    };
    if !visible {
        return Err(ApiError::forbidden());
    }
    Ok(Json(found))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "users",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "User id")),
    request_body = UserUpdate,
    responses(
        (status = 200, description = "Account updated", body = User),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn update_user(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UserUpdate>,
) -> ApiResult<Json<User>> {
    user.require_admin()?;
    let users = UserService::new(state.db.clone());
    let actor = user.actor();
    let updated = blocking(move || users.update(&actor, id, req)).await?;
    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "users",
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 204, description = "Account deleted; their visits keep no doctor"),
        (status = 404, description = "Not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    UserService::new(state.db.clone()).delete(&user.actor(), id)?;
    Ok(StatusCode::NO_CONTENT)
}
