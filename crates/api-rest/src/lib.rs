//! # API REST
//!
//! REST API implementation for MedLink.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - Bearer-token authentication and role checks
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialisation, status codes, CORS, request tracing)
//!
//! Uses `api-shared` for tokens and wire types and `medlink-core` for everything else.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod extract;
mod routes;

use api_shared::TokenService;
use axum::routing::{get, post};
use axum::Router;
use medlink_core::constants::TERMINAL_KEY_HEADER;
use medlink_core::{CoreConfig, Database};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{
    ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme,
};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

pub use error::{ApiError, ApiResult};
pub use extract::{ApiJson, ApiPath, ApiQuery, AuthUser, Terminal};

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<CoreConfig>,
    pub db: Database,
    pub tokens: TokenService,
}

impl AppState {
    pub fn new(cfg: Arc<CoreConfig>, db: Database) -> Self {
        let tokens = TokenService::new(cfg.jwt_secret(), cfg.token_ttl_minutes());
        Self { cfg, db, tokens }
    }
}

struct SecuritySchemes;

impl Modify for SecuritySchemes {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "terminal_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(TERMINAL_KEY_HEADER))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "MedLink", description = "Clinic records, cards and identity resolution"),
    paths(
        routes::health,
        routes::auth::login,
        routes::auth::card_login,
        routes::auth::fingerprint_login,
        routes::auth::me,
        routes::patients::list_patients,
        routes::patients::create_patient,
        routes::patients::get_patient,
        routes::patients::update_patient,
        routes::patients::delete_patient,
        routes::patients::patient_record,
        routes::visits::list_visits,
        routes::visits::create_visit,
        routes::visits::get_visit,
        routes::visits::update_visit,
        routes::visits::delete_visit,
        routes::lab_results::list_lab_results,
        routes::lab_results::create_lab_result,
        routes::lab_results::get_lab_result,
        routes::lab_results::update_lab_result,
        routes::lab_results::delete_lab_result,
        routes::imaging::list_imaging,
        routes::imaging::create_imaging,
        routes::imaging::get_imaging,
        routes::imaging::update_imaging,
        routes::imaging::delete_imaging,
        routes::users::list_users,
        routes::users::create_user,
        routes::users::get_user,
        routes::users::update_user,
        routes::users::delete_user,
        routes::cards::issue_doctor_card,
        routes::cards::issue_patient_card,
        routes::cards::get_card,
        routes::cards::delete_card,
        routes::cards::revoke_card,
        routes::cards::reactivate_card,
        routes::cards::enroll_fingerprint,
        routes::cards::get_fingerprint,
        routes::cards::remove_fingerprint,
        routes::audit::list_audit,
    ),
    components(schemas(
        api_shared::HealthRes,
        api_shared::LoginReq,
        api_shared::CardLoginReq,
        api_shared::FingerprintLoginReq,
        api_shared::TokenRes,
        api_shared::ErrorRes,
        api_shared::Claims,
        medlink_types::Role,
        medlink_types::Gender,
        medlink_types::NationalId,
        medlink_types::CardUid,
        medlink_types::NonEmptyText,
        medlink_core::Patient,
        medlink_core::NewPatient,
        medlink_core::PatientUpdate,
        medlink_core::PatientRecord,
        medlink_core::Visit,
        medlink_core::NewVisit,
        medlink_core::VisitUpdate,
        medlink_core::LabResult,
        medlink_core::LabStatus,
        medlink_core::NewLabResult,
        medlink_core::LabResultUpdate,
        medlink_core::ImagingStudy,
        medlink_core::Modality,
        medlink_core::NewImagingStudy,
        medlink_core::ImagingUpdate,
        medlink_core::User,
        medlink_core::NewUser,
        medlink_core::UserUpdate,
        medlink_core::CardRecord,
        medlink_core::Holder,
        medlink_core::FingerprintEnrolment,
        medlink_core::AuditEntry,
        routes::cards::IssueDoctorCardReq,
        routes::cards::IssuePatientCardReq,
        routes::cards::EnrollFingerprintReq,
    )),
    modifiers(&SecuritySchemes)
)]
pub struct ApiDoc;

/// Builds the complete REST router, including Swagger UI at `/swagger-ui`.
pub fn router(state: AppState) -> Router {
    use routes::{audit, auth, cards, imaging, lab_results, patients, users, visits};

    Router::new()
        .route("/health", get(routes::health))
        .route("/auth/login", post(auth::login))
        .route("/auth/card", post(auth::card_login))
        .route("/auth/fingerprint", post(auth::fingerprint_login))
        .route("/auth/me", get(auth::me))
        .route(
            "/patients",
            get(patients::list_patients).post(patients::create_patient),
        )
        .route(
            "/patients/:national_id",
            get(patients::get_patient)
                .put(patients::update_patient)
                .delete(patients::delete_patient),
        )
        .route(
            "/patients/:national_id/record",
            get(patients::patient_record),
        )
        .route("/visits", get(visits::list_visits).post(visits::create_visit))
        .route(
            "/visits/:id",
            get(visits::get_visit)
                .put(visits::update_visit)
                .delete(visits::delete_visit),
        )
        .route(
            "/lab-results",
            get(lab_results::list_lab_results).post(lab_results::create_lab_result),
        )
        .route(
            "/lab-results/:id",
            get(lab_results::get_lab_result)
                .put(lab_results::update_lab_result)
                .delete(lab_results::delete_lab_result),
        )
        .route(
            "/imaging",
            get(imaging::list_imaging).post(imaging::create_imaging),
        )
        .route(
            "/imaging/:id",
            get(imaging::get_imaging)
                .put(imaging::update_imaging)
                .delete(imaging::delete_imaging),
        )
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/cards/doctor", post(cards::issue_doctor_card))
        .route("/cards/patient", post(cards::issue_patient_card))
        .route(
            "/cards/:uid",
            get(cards::get_card).delete(cards::delete_card),
        )
        .route("/cards/:uid/revoke", post(cards::revoke_card))
        .route("/cards/:uid/reactivate", post(cards::reactivate_card))
        .route("/fingerprints", post(cards::enroll_fingerprint))
        .route(
            "/fingerprints/:slot",
            get(cards::get_fingerprint).delete(cards::remove_fingerprint),
        )
        .route("/audit", get(audit::list_audit))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves `router(state)` on `addr` until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails while running.
pub async fn serve(addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("-- MedLink REST API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => {
            tracing::error!("failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
