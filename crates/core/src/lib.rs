//! # MedLink Core
//!
//! Core business logic for the MedLink clinic records system.
//!
//! This crate owns the SQLite schema and every operation on it:
//! - Patients, visits, lab results and imaging studies
//! - Staff and patient accounts with salted password hashes
//! - RFID cards and fingerprint enrolments, and their resolution to identities
//! - An append-only audit log written in the same transaction as each change
//! - JSON fixture import and random demo data
//!
//! **No API concerns**: token issuing, HTTP routing and request extraction belong in `api-shared`
//! and `api-rest`.

pub mod actor;
pub mod auth;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod hardware;
pub mod identity;
pub mod repositories;
pub mod seed;
pub mod validation;

pub use actor::Actor;
pub use auth::{hash_password, verify_password, AuthService};
pub use config::CoreConfig;
pub use db::Database;
pub use error::{MedLinkError, MedLinkResult};
pub use identity::{FingerprintEnrolment, Identity, IdentityResolver};
pub use repositories::audit::{AuditEntry, AuditFilter, AuditService};
pub use repositories::cards::{CardRecord, CardService, Holder};
pub use repositories::helpers::Page;
pub use repositories::imaging::{
    ImagingFilter, ImagingService, ImagingStudy, ImagingUpdate, Modality, NewImagingStudy,
};
pub use repositories::lab_results::{
    LabFilter, LabResult, LabResultService, LabResultUpdate, LabStatus, NewLabResult,
};
pub use repositories::patients::{
    NewPatient, Patient, PatientFilter, PatientRecord, PatientService, PatientUpdate,
};
pub use repositories::users::{NewUser, User, UserFilter, UserService, UserUpdate};
pub use repositories::visits::{NewVisit, Visit, VisitFilter, VisitService, VisitUpdate};
